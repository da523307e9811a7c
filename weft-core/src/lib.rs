//! Leaderless cluster topology coordination.
//!
//! Every node independently arrives at, persists, and converges on a shared
//! view of which members exist, which partitions they host, and what
//! topology change is in flight — without a central coordinator. Updates
//! may originate concurrently on any node; divergent views reconcile
//! through a join-semilattice merge, so gossip exchanges converge to the
//! same fixed point regardless of message order or duplication. A node
//! bootstraps through a prioritized chain of sources (local disk, peer
//! pull, gossip, static configuration) and keeps working whether it starts
//! with valid local state, corrupted local state, or nothing at all.

// Safety-focused Clippy lints to prevent unsafe error handling regression
#![warn(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::unimplemented,
    clippy::todo
)]
#![deny(clippy::unwrap_in_result, clippy::panic_in_result_fn)]
#![warn(missing_docs)]

/// Bootstrap initializer strategies and composition combinators.
pub mod bootstrap;
/// Static bootstrap configuration and partition distribution.
pub mod config;
/// Errors surfaced by the topology subsystem.
pub mod error;
/// Dissemination boundary, loopback transport, and wire codec.
pub mod gossip;
/// Single-task orchestrator owning the authoritative snapshot.
pub mod manager;
/// Immutable topology snapshot types and the convergent merge.
pub mod state;
/// Durable corruption-checked persistence of the latest snapshot.
pub mod store;

pub use bootstrap::{
    FileInitializer, GossipInitializer, OrThen, Recover, StaticInitializer, SyncInitializer,
    TopologyInitializer, build_static_initializer,
};
pub use config::{PartitionMetadata, StaticConfiguration};
pub use error::{TopologyError, TopologyErrorKind};
pub use gossip::{InProcessGossip, TopologyGossip, decode_snapshot, encode_snapshot};
pub use manager::{TopologyManager, TopologyManagerHandle};
pub use state::{
    ChangeOperation, ChangeStatus, ClusterChangePlan, ClusterTopology, CompletedChange,
    CompletedOperation, MemberId, MemberState, MemberStatus, PartitionId, PartitionState,
    PartitionStatus,
};
pub use store::{TOPOLOGY_FILE_NAME, TopologyStore};
