use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;

use tokio::sync::{broadcast, mpsc};
use tracing::{debug, warn};

use crate::config::PartitionMetadata;
use crate::error::{TopologyError, TopologyErrorKind};
use crate::gossip::TopologyGossip;
use crate::state::{ClusterTopology, MemberId, MemberState, PartitionId, PartitionState};
use crate::store::TopologyStore;

/// One bootstrap strategy for obtaining an initial topology.
///
/// "No data available" is a valid, non-error outcome and is expressed as
/// [`ClusterTopology::uninitialized`]; only structural corruption or
/// protocol failure is an error. Strategies are one-shot values, consumed
/// by [`initialize`](Self::initialize), and compose into declarative
/// fallback chains with [`or_then`](Self::or_then) and
/// [`recover`](Self::recover):
///
/// ```ignore
/// let chain = FileInitializer::new(store.clone())
///     .recover(
///         TopologyErrorKind::PersistedTopologyIsBroken,
///         SyncInitializer::new(known_members, request),
///     )
///     .or_then(build_static_initializer(config));
/// ```
pub trait TopologyInitializer: Sized {
    /// Resolves this strategy's initial topology.
    fn initialize(self) -> impl Future<Output = Result<ClusterTopology, TopologyError>> + Send;

    /// Continues with `next` when this strategy resolves without data; an
    /// initialized result short-circuits and `next` is never invoked.
    /// Failures propagate unless intercepted by [`recover`](Self::recover).
    fn or_then<N>(self, next: N) -> OrThen<Self, N>
    where
        N: TopologyInitializer,
    {
        OrThen {
            first: self,
            second: next,
        }
    }

    /// Substitutes `fallback` when this strategy fails with the given error
    /// kind. Other error kinds, and `fallback`'s own failures, propagate
    /// normally; on success `fallback` is never invoked.
    fn recover<F>(self, kind: TopologyErrorKind, fallback: F) -> Recover<Self, F>
    where
        F: TopologyInitializer,
    {
        Recover {
            inner: self,
            kind,
            fallback,
        }
    }
}

/// Chains two strategies: the second runs only when the first resolves
/// uninitialized. Built by [`TopologyInitializer::or_then`].
pub struct OrThen<A, B> {
    first: A,
    second: B,
}

impl<A, B> TopologyInitializer for OrThen<A, B>
where
    A: TopologyInitializer + Send,
    B: TopologyInitializer + Send,
{
    async fn initialize(self) -> Result<ClusterTopology, TopologyError> {
        let topology = self.first.initialize().await?;
        if topology.is_uninitialized() {
            debug!("initializer yielded no data, continuing with the next strategy");
            self.second.initialize().await
        } else {
            Ok(topology)
        }
    }
}

/// Substitutes a fallback strategy for one declared error kind. Built by
/// [`TopologyInitializer::recover`].
pub struct Recover<A, B> {
    inner: A,
    kind: TopologyErrorKind,
    fallback: B,
}

impl<A, B> TopologyInitializer for Recover<A, B>
where
    A: TopologyInitializer + Send,
    B: TopologyInitializer + Send,
{
    async fn initialize(self) -> Result<ClusterTopology, TopologyError> {
        match self.inner.initialize().await {
            Ok(topology) => Ok(topology),
            Err(err) if err.kind() == self.kind => {
                warn!("initializer failed ({err}), switching to fallback");
                self.fallback.initialize().await
            }
            Err(err) => Err(err),
        }
    }
}

/// Bootstraps from the node's own persisted topology file.
///
/// Structural corruption of the file — a truncated header, an unknown
/// format version, a checksum mismatch, or an undecodable payload — is
/// reported as [`TopologyError::PersistedTopologyIsBroken`] so chains can
/// target the whole class with a single `recover` arm. An absent or empty
/// file resolves uninitialized without error.
pub struct FileInitializer {
    store: Arc<TopologyStore>,
}

impl FileInitializer {
    /// Creates a strategy reading from the given store.
    #[must_use]
    pub fn new(store: Arc<TopologyStore>) -> Self {
        Self { store }
    }
}

impl TopologyInitializer for FileInitializer {
    async fn initialize(self) -> Result<ClusterTopology, TopologyError> {
        match self.store.open() {
            Ok(topology) => {
                debug!(
                    initialized = !topology.is_uninitialized(),
                    "loaded persisted topology"
                );
                Ok(topology)
            }
            Err(err) if err.is_file_corruption() => {
                Err(TopologyError::PersistedTopologyIsBroken(Box::new(err)))
            }
            Err(err) => Err(err),
        }
    }
}

/// Derives the very first topology of a cluster from a fixed
/// partition-distribution description.
///
/// The distribution is computed lazily so that a chain which never reaches
/// this strategy never evaluates (or validates) the static configuration.
pub struct StaticInitializer<F> {
    distribution: F,
}

impl<F> StaticInitializer<F>
where
    F: FnOnce() -> Result<Vec<PartitionMetadata>, TopologyError> + Send,
{
    /// Creates a strategy around a distribution supplier.
    pub fn new(distribution: F) -> Self {
        Self { distribution }
    }
}

/// Builds a static-bootstrap strategy that lazily derives its partition
/// distribution from the given configuration.
pub fn build_static_initializer(
    config: crate::config::StaticConfiguration,
) -> StaticInitializer<impl FnOnce() -> Result<Vec<PartitionMetadata>, TopologyError> + Send> {
    StaticInitializer::new(move || config.generate_distribution())
}

impl<F> TopologyInitializer for StaticInitializer<F>
where
    F: FnOnce() -> Result<Vec<PartitionMetadata>, TopologyError> + Send,
{
    async fn initialize(self) -> Result<ClusterTopology, TopologyError> {
        let distribution = (self.distribution)()?;

        let mut hosted: BTreeMap<MemberId, BTreeMap<PartitionId, PartitionState>> =
            BTreeMap::new();
        for partition in &distribution {
            for member in &partition.members {
                let priority = partition.priorities.get(member).copied().ok_or_else(|| {
                    TopologyError::Configuration(format!(
                        "partition {} lists member {member} without a priority",
                        partition.id
                    ))
                })?;
                hosted
                    .entry(member.clone())
                    .or_default()
                    .insert(partition.id, PartitionState::active(priority));
            }
        }

        let mut topology = ClusterTopology::init();
        for (member, partitions) in hosted {
            topology =
                topology.add_member(&member, MemberState::active_with_partitions(partitions))?;
        }
        debug!(
            members = topology.members.len(),
            partitions = distribution.len(),
            "derived topology from static configuration"
        );
        Ok(topology)
    }
}

/// Bootstraps from the first topology a peer gossips to us.
///
/// The strategy registers with the transport at construction time and
/// resolves on the first delivered snapshot, initialized or not — a peer's
/// "I am also uninitialized" signal is informative and must not block the
/// chain forever. The received snapshot is persisted and re-published
/// through the injected gossip handle before the future resolves, so peers
/// that start concurrently keep learning about each other's bootstrap
/// progress.
pub struct GossipInitializer {
    gossip: Arc<dyn TopologyGossip>,
    store: Arc<TopologyStore>,
    updates: broadcast::Receiver<ClusterTopology>,
}

impl GossipInitializer {
    /// Creates a strategy and immediately registers its gossip listener.
    #[must_use]
    pub fn new(gossip: Arc<dyn TopologyGossip>, store: Arc<TopologyStore>) -> Self {
        let updates = gossip.subscribe();
        Self {
            gossip,
            store,
            updates,
        }
    }
}

impl TopologyInitializer for GossipInitializer {
    async fn initialize(mut self) -> Result<ClusterTopology, TopologyError> {
        debug!("waiting for the first gossiped topology");
        loop {
            match self.updates.recv().await {
                Ok(remote) => {
                    self.store.update(&remote)?;
                    self.gossip.publish(remote.clone());
                    debug!(
                        version = remote.version,
                        initialized = !remote.is_uninitialized(),
                        "bootstrapped from gossiped topology"
                    );
                    return Ok(remote);
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "gossip receiver lagged while bootstrapping");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    return Err(TopologyError::GossipChannelClosed);
                }
            }
        }
    }
}

/// Bootstraps by synchronously pulling the topology from already-known
/// members.
///
/// One request goes to every known member; the first response of any kind
/// (initialized or not) resolves the strategy. Failed targets are absorbed
/// as "no answer" — this strategy performs no retries of its own, relying
/// on the surrounding fallback chain. Requests still in flight when the
/// first response arrives are left to the transport's own timeout handling
/// rather than being cancelled.
pub struct SyncInitializer<F> {
    known_members: Vec<MemberId>,
    request: F,
}

impl<F> SyncInitializer<F> {
    /// Creates a strategy pulling from `known_members` via `request`.
    pub fn new(known_members: Vec<MemberId>, request: F) -> Self {
        Self {
            known_members,
            request,
        }
    }
}

impl<F, Fut> TopologyInitializer for SyncInitializer<F>
where
    F: Fn(MemberId) -> Fut + Send,
    Fut: Future<Output = Result<ClusterTopology, TopologyError>> + Send + 'static,
{
    async fn initialize(self) -> Result<ClusterTopology, TopologyError> {
        if self.known_members.is_empty() {
            debug!("no known members to pull a topology from");
            return Ok(ClusterTopology::uninitialized());
        }

        let (responses_tx, mut responses_rx) = mpsc::channel(self.known_members.len());
        for member in self.known_members {
            let request = (self.request)(member.clone());
            let responses_tx = responses_tx.clone();
            tokio::spawn(async move {
                let _ = responses_tx.send((member, request.await)).await;
            });
        }
        drop(responses_tx);

        while let Some((member, response)) = responses_rx.recv().await {
            match response {
                Ok(topology) => {
                    debug!(
                        member = %member,
                        initialized = !topology.is_uninitialized(),
                        "pulled topology from peer"
                    );
                    return Ok(topology);
                }
                Err(err) => warn!(member = %member, "topology pull failed: {err}"),
            }
        }
        debug!("no member answered the topology pull");
        Ok(ClusterTopology::uninitialized())
    }
}
