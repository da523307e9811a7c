use tokio::sync::broadcast;

use crate::error::TopologyError;
use crate::state::ClusterTopology;

const DEFAULT_CHANNEL_CAPACITY: usize = 256;

/// Boundary to the dissemination transport that physically moves topology
/// snapshots between nodes.
///
/// Delivery is push-based and best-effort: at most once per physical
/// message, with no ordering guarantee. Duplicates and reordering are
/// absorbed by the merge algebra, so implementations do not need to
/// deduplicate. Subscribing registers a listener; dropping the receiver
/// deregisters it.
pub trait TopologyGossip: Send + Sync {
    /// Registers a listener for snapshots received from peers.
    fn subscribe(&self) -> broadcast::Receiver<ClusterTopology>;

    /// Hands a snapshot to the transport for best-effort dissemination.
    fn publish(&self, topology: ClusterTopology);
}

/// Loopback implementation backed by a broadcast channel.
///
/// Every published snapshot is delivered to every subscriber, including the
/// publisher's own subscriptions — which is exactly what co-located
/// managers and tests need to exercise the anti-entropy path.
pub struct InProcessGossip {
    updates_tx: broadcast::Sender<ClusterTopology>,
}

impl InProcessGossip {
    /// Creates a loopback gossip hub with the default buffer.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    /// Creates a loopback gossip hub buffering up to `capacity` snapshots
    /// per subscriber.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let (updates_tx, _) = broadcast::channel(capacity);
        Self { updates_tx }
    }
}

impl Default for InProcessGossip {
    fn default() -> Self {
        Self::new()
    }
}

impl TopologyGossip for InProcessGossip {
    fn subscribe(&self) -> broadcast::Receiver<ClusterTopology> {
        self.updates_tx.subscribe()
    }

    fn publish(&self, topology: ClusterTopology) {
        // No subscribers is fine; gossip is best-effort.
        let _ = self.updates_tx.send(topology);
    }
}

/// Encodes a snapshot into the wire framing shared by all transports.
pub fn encode_snapshot(topology: &ClusterTopology) -> Result<Vec<u8>, TopologyError> {
    bincode::serialize(topology).map_err(|err| TopologyError::Serialization(err.to_string()))
}

/// Decodes a snapshot received off the wire.
///
/// Transport adapters are expected to log and drop messages that fail to
/// decode instead of forwarding them — one bad peer must not halt
/// convergence.
pub fn decode_snapshot(bytes: &[u8]) -> Result<ClusterTopology, TopologyError> {
    bincode::deserialize(bytes).map_err(|err| TopologyError::Serialization(err.to_string()))
}
