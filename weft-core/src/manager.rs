use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::bootstrap::TopologyInitializer;
use crate::error::TopologyError;
use crate::gossip::TopologyGossip;
use crate::state::{ChangeOperation, ClusterTopology, MemberId, MemberState};
use crate::store::TopologyStore;

const COMMAND_CHANNEL_CAPACITY: usize = 64;

type MemberUpdateFn = Box<dyn FnOnce(&MemberState) -> Result<MemberState, TopologyError> + Send>;
type MutationReply = oneshot::Sender<Result<ClusterTopology, TopologyError>>;

enum Command {
    GetClusterTopology {
        reply: oneshot::Sender<ClusterTopology>,
    },
    GossipReceived {
        remote: ClusterTopology,
        reply: oneshot::Sender<ClusterTopology>,
    },
    AddMember {
        id: MemberId,
        state: MemberState,
        reply: MutationReply,
    },
    UpdateMember {
        id: MemberId,
        update: MemberUpdateFn,
        reply: MutationReply,
    },
    RemoveMember {
        id: MemberId,
        reply: MutationReply,
    },
    StartChange {
        operations: Vec<ChangeOperation>,
        reply: MutationReply,
    },
    AdvanceChange {
        reply: MutationReply,
    },
    CancelChange {
        reply: MutationReply,
    },
}

/// Owns the authoritative in-memory topology for the local node.
///
/// All state lives on one task: every public operation becomes a message on
/// that task's queue, so the in-memory snapshot and the on-disk file are
/// never touched concurrently. Gossiped snapshots are merged one at a time
/// in arrival order; merge commutativity makes the final state independent
/// of that order, while "persist, then notify" in application order keeps
/// observers from ever seeing the version counter move backwards.
pub struct TopologyManager {
    local: MemberId,
    store: Arc<TopologyStore>,
    gossip: Arc<dyn TopologyGossip>,
}

impl TopologyManager {
    /// Creates a manager for the local member, backed by the given store
    /// and gossip transport.
    pub fn new(
        local: MemberId,
        store: Arc<TopologyStore>,
        gossip: Arc<dyn TopologyGossip>,
    ) -> Self {
        Self {
            local,
            store,
            gossip,
        }
    }

    /// Runs the bootstrap chain, persists and publishes its outcome, and
    /// enters steady state.
    ///
    /// The returned future completes once the initial snapshot is durable.
    /// A failed chain fails `start` — running with an unknown membership
    /// view is worse than failing fast, so there is no degraded fallback
    /// beyond what the chain itself declares.
    pub async fn start<I>(self, initializer: I) -> Result<TopologyManagerHandle, TopologyError>
    where
        I: TopologyInitializer,
    {
        let initial = initializer.initialize().await?;
        // Subscribe before publishing so no concurrent bootstrap is missed.
        let updates = self.gossip.subscribe();
        self.store.update(&initial)?;
        self.gossip.publish(initial.clone());
        info!(
            member = %self.local,
            version = initial.version,
            initialized = !initial.is_uninitialized(),
            "cluster topology bootstrapped"
        );

        let (commands_tx, commands_rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let actor = Actor {
            local: self.local,
            store: self.store,
            gossip: self.gossip,
            current: initial,
        };
        let task = tokio::spawn(actor.run(commands_rx, updates, shutdown_rx));

        Ok(TopologyManagerHandle {
            commands: commands_tx,
            shutdown: shutdown_tx,
            task,
        })
    }
}

/// Handle to a running [`TopologyManager`] task.
///
/// All methods are safe to call from any task; they serialize onto the
/// manager's queue.
pub struct TopologyManagerHandle {
    commands: mpsc::Sender<Command>,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl TopologyManagerHandle {
    /// Returns the current topology snapshot.
    pub async fn get_cluster_topology(&self) -> Result<ClusterTopology, TopologyError> {
        let (reply, response) = oneshot::channel();
        self.send(Command::GetClusterTopology { reply }).await?;
        response.await.map_err(|_| TopologyError::ManagerClosed)
    }

    /// Merges a snapshot received from a peer, returning the (possibly
    /// unchanged) local state afterwards. Transports that deliver
    /// point-to-point instead of via the gossip subscription feed the
    /// manager through this entry point.
    pub async fn on_gossip_received(
        &self,
        remote: ClusterTopology,
    ) -> Result<ClusterTopology, TopologyError> {
        let (reply, response) = oneshot::channel();
        self.send(Command::GossipReceived { remote, reply }).await?;
        response.await.map_err(|_| TopologyError::ManagerClosed)
    }

    /// Adds a new member entry, then persists and gossips the result.
    pub async fn add_member(
        &self,
        id: MemberId,
        state: MemberState,
    ) -> Result<ClusterTopology, TopologyError> {
        let (reply, response) = oneshot::channel();
        self.send(Command::AddMember { id, state, reply }).await?;
        response.await.map_err(|_| TopologyError::ManagerClosed)?
    }

    /// Applies a pure transformation to one member's entry, then persists
    /// and gossips the result.
    pub async fn update_member<F>(
        &self,
        id: MemberId,
        update: F,
    ) -> Result<ClusterTopology, TopologyError>
    where
        F: FnOnce(&MemberState) -> Result<MemberState, TopologyError> + Send + 'static,
    {
        let (reply, response) = oneshot::channel();
        self.send(Command::UpdateMember {
            id,
            update: Box::new(update),
            reply,
        })
        .await?;
        response.await.map_err(|_| TopologyError::ManagerClosed)?
    }

    /// Drops a LEFT member's entry, then persists and gossips the result.
    pub async fn remove_member(&self, id: MemberId) -> Result<ClusterTopology, TopologyError> {
        let (reply, response) = oneshot::channel();
        self.send(Command::RemoveMember { id, reply }).await?;
        response.await.map_err(|_| TopologyError::ManagerClosed)?
    }

    /// Proposes a new change plan, then persists and gossips the result.
    pub async fn start_change(
        &self,
        operations: Vec<ChangeOperation>,
    ) -> Result<ClusterTopology, TopologyError> {
        let (reply, response) = oneshot::channel();
        self.send(Command::StartChange { operations, reply }).await?;
        response.await.map_err(|_| TopologyError::ManagerClosed)?
    }

    /// Marks the in-flight plan's next operation as applied.
    pub async fn advance_change(&self) -> Result<ClusterTopology, TopologyError> {
        let (reply, response) = oneshot::channel();
        self.send(Command::AdvanceChange { reply }).await?;
        response.await.map_err(|_| TopologyError::ManagerClosed)?
    }

    /// Cancels the in-flight change plan.
    pub async fn cancel_change(&self) -> Result<ClusterTopology, TopologyError> {
        let (reply, response) = oneshot::channel();
        self.send(Command::CancelChange { reply }).await?;
        response.await.map_err(|_| TopologyError::ManagerClosed)?
    }

    /// Signals the manager task to exit.
    pub fn request_shutdown(&self) {
        let _ = self.shutdown.send(true);
    }

    /// Waits for the manager task to terminate.
    pub async fn wait(self) {
        let _ = self.task.await;
    }

    async fn send(&self, command: Command) -> Result<(), TopologyError> {
        self.commands
            .send(command)
            .await
            .map_err(|_| TopologyError::ManagerClosed)
    }
}

struct Actor {
    local: MemberId,
    store: Arc<TopologyStore>,
    gossip: Arc<dyn TopologyGossip>,
    current: ClusterTopology,
}

impl Actor {
    async fn run(
        mut self,
        mut commands: mpsc::Receiver<Command>,
        mut updates: broadcast::Receiver<ClusterTopology>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                command = commands.recv() => match command {
                    Some(command) => self.handle_command(command),
                    None => break,
                },
                update = updates.recv() => match update {
                    Ok(remote) => self.handle_gossip(remote),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(member = %self.local, skipped, "dropped gossiped topologies while busy");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
            }
        }
        debug!(member = %self.local, "topology manager stopped");
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::GetClusterTopology { reply } => {
                let _ = reply.send(self.current.clone());
            }
            Command::GossipReceived { remote, reply } => {
                self.handle_gossip(remote);
                let _ = reply.send(self.current.clone());
            }
            Command::AddMember { id, state, reply } => {
                let result = self.current.add_member(&id, state);
                self.commit(result, reply);
            }
            Command::UpdateMember { id, update, reply } => {
                let result = self.current.update_member(&id, update);
                self.commit(result, reply);
            }
            Command::RemoveMember { id, reply } => {
                let result = self.current.remove_member(&id);
                self.commit(result, reply);
            }
            Command::StartChange { operations, reply } => {
                let result = self.current.start_change(operations);
                self.commit(result, reply);
            }
            Command::AdvanceChange { reply } => {
                let result = self.current.advance_change();
                self.commit(result, reply);
            }
            Command::CancelChange { reply } => {
                let result = self.current.cancel_change();
                self.commit(result, reply);
            }
        }
    }

    /// Anti-entropy: merge, and only when something actually changed,
    /// persist the merged state and push it back out.
    fn handle_gossip(&mut self, remote: ClusterTopology) {
        let merged = self.current.merge(&remote);
        if merged == self.current {
            return;
        }
        if let Err(err) = self.store.update(&merged) {
            // Keep the old state; the peer will gossip again.
            warn!(member = %self.local, "failed to persist merged topology: {err}");
            return;
        }
        debug!(
            member = %self.local,
            version = merged.version,
            members = merged.members.len(),
            "merged gossiped topology"
        );
        self.gossip.publish(merged.clone());
        self.current = merged;
    }

    fn commit(
        &mut self,
        result: Result<ClusterTopology, TopologyError>,
        reply: MutationReply,
    ) {
        let outcome = result.and_then(|next| {
            self.store.update(&next)?;
            self.gossip.publish(next.clone());
            self.current = next.clone();
            Ok(next)
        });
        if let Err(err) = &outcome {
            debug!(member = %self.local, "topology mutation rejected: {err}");
        }
        let _ = reply.send(outcome);
    }
}
