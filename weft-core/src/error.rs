use thiserror::Error;

use crate::state::{MemberId, MemberStatus, PartitionId};

/// Errors surfaced while bootstrapping, persisting, or coordinating the
/// cluster topology.
///
/// The durable-store variants stay distinct so operators can tell disk
/// corruption, format drift, and a never-initialized node apart instead of
/// seeing one generic bootstrap failure.
#[derive(Debug, Error)]
pub enum TopologyError {
    /// Topology file exists but is shorter than its fixed-size header.
    #[error("topology file too short to contain its header ({len} bytes)")]
    MissingHeader {
        /// Observed file length in bytes.
        len: u64,
    },
    /// Topology file carries an unknown format marker or format version.
    #[error("unrecognised topology file format (magic {magic:#018x}, format version {version})")]
    UnexpectedVersion {
        /// Magic number found in the header.
        magic: u64,
        /// Format version found in the header.
        version: u32,
    },
    /// Stored checksum does not cover the payload actually present.
    #[error("topology file checksum mismatch (header {expected:#010x}, payload {actual:#010x})")]
    ChecksumMismatch {
        /// Checksum recorded in the header.
        expected: u32,
        /// Checksum computed over the payload on disk.
        actual: u32,
    },
    /// Wrapper for any persisted-state corruption, so bootstrap chains can
    /// target the whole class with a single `recover` arm.
    #[error("persisted topology is broken: {0}")]
    PersistedTopologyIsBroken(#[source] Box<TopologyError>),
    /// Underlying filesystem failure.
    #[error("topology storage I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// Encoding or decoding a topology snapshot failed.
    #[error("topology serialization error: {0}")]
    Serialization(String),
    /// The gossip subscription closed before any topology was received.
    #[error("gossip channel closed while waiting for a topology")]
    GossipChannelClosed,
    /// Operation referenced a member that is not part of the topology.
    #[error("member {0} is not part of the cluster topology")]
    UnknownMember(MemberId),
    /// `add_member` targeted an identity that already exists.
    #[error("member {0} already exists in the cluster topology")]
    MemberAlreadyExists(MemberId),
    /// Members may only be dropped from the map once they have fully left.
    #[error("member {id} cannot be removed while {status:?}")]
    MemberNotRemovable {
        /// Member targeted for removal.
        id: MemberId,
        /// Status that blocked the removal.
        status: MemberStatus,
    },
    /// Operation referenced a partition the member does not host.
    #[error("partition {0} is not hosted by this member")]
    UnknownPartition(PartitionId),
    /// The member already hosts the partition it was asked to add.
    #[error("partition {0} is already hosted by this member")]
    PartitionAlreadyExists(PartitionId),
    /// A topology change plan is already in flight.
    #[error("cluster change {id} is still in progress")]
    ChangeInProgress {
        /// Identifier of the in-flight change plan.
        id: u64,
    },
    /// No change plan exists to advance or cancel.
    #[error("no cluster change is in progress")]
    NoPendingChange,
    /// Invalid static configuration prevented bootstrap.
    #[error("topology configuration error: {0}")]
    Configuration(String),
    /// The manager task has stopped and can no longer serve requests.
    #[error("topology manager is no longer running")]
    ManagerClosed,
}

/// Flat discriminants for [`TopologyError`], matched by
/// [`recover`](crate::bootstrap::TopologyInitializer::recover) chains.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TopologyErrorKind {
    /// See [`TopologyError::MissingHeader`].
    MissingHeader,
    /// See [`TopologyError::UnexpectedVersion`].
    UnexpectedVersion,
    /// See [`TopologyError::ChecksumMismatch`].
    ChecksumMismatch,
    /// See [`TopologyError::PersistedTopologyIsBroken`].
    PersistedTopologyIsBroken,
    /// See [`TopologyError::Io`].
    Io,
    /// See [`TopologyError::Serialization`].
    Serialization,
    /// See [`TopologyError::GossipChannelClosed`].
    GossipChannelClosed,
    /// See [`TopologyError::UnknownMember`].
    UnknownMember,
    /// See [`TopologyError::MemberAlreadyExists`].
    MemberAlreadyExists,
    /// See [`TopologyError::MemberNotRemovable`].
    MemberNotRemovable,
    /// See [`TopologyError::UnknownPartition`].
    UnknownPartition,
    /// See [`TopologyError::PartitionAlreadyExists`].
    PartitionAlreadyExists,
    /// See [`TopologyError::ChangeInProgress`].
    ChangeInProgress,
    /// See [`TopologyError::NoPendingChange`].
    NoPendingChange,
    /// See [`TopologyError::Configuration`].
    Configuration,
    /// See [`TopologyError::ManagerClosed`].
    ManagerClosed,
}

impl TopologyError {
    /// Discriminant of this error, used by bootstrap `recover` combinators.
    #[must_use]
    pub const fn kind(&self) -> TopologyErrorKind {
        match self {
            Self::MissingHeader { .. } => TopologyErrorKind::MissingHeader,
            Self::UnexpectedVersion { .. } => TopologyErrorKind::UnexpectedVersion,
            Self::ChecksumMismatch { .. } => TopologyErrorKind::ChecksumMismatch,
            Self::PersistedTopologyIsBroken(_) => TopologyErrorKind::PersistedTopologyIsBroken,
            Self::Io(_) => TopologyErrorKind::Io,
            Self::Serialization(_) => TopologyErrorKind::Serialization,
            Self::GossipChannelClosed => TopologyErrorKind::GossipChannelClosed,
            Self::UnknownMember(_) => TopologyErrorKind::UnknownMember,
            Self::MemberAlreadyExists(_) => TopologyErrorKind::MemberAlreadyExists,
            Self::MemberNotRemovable { .. } => TopologyErrorKind::MemberNotRemovable,
            Self::UnknownPartition(_) => TopologyErrorKind::UnknownPartition,
            Self::PartitionAlreadyExists(_) => TopologyErrorKind::PartitionAlreadyExists,
            Self::ChangeInProgress { .. } => TopologyErrorKind::ChangeInProgress,
            Self::NoPendingChange => TopologyErrorKind::NoPendingChange,
            Self::Configuration(_) => TopologyErrorKind::Configuration,
            Self::ManagerClosed => TopologyErrorKind::ManagerClosed,
        }
    }

    /// True for errors that mean the persisted file is structurally unusable.
    #[must_use]
    pub const fn is_file_corruption(&self) -> bool {
        matches!(
            self.kind(),
            TopologyErrorKind::MissingHeader
                | TopologyErrorKind::UnexpectedVersion
                | TopologyErrorKind::ChecksumMismatch
                | TopologyErrorKind::Serialization
        )
    }
}
