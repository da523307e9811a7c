use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::TopologyError;

/// Stable logical identifier of a cluster member.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MemberId(String);

impl MemberId {
    /// Creates a member id from any string-like value.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The raw identifier.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MemberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for MemberId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for MemberId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Identifier of a partition (shard) hosted by cluster members.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct PartitionId(pub u32);

impl fmt::Display for PartitionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle of a member inside the cluster.
///
/// Transitions only ever move forward:
/// UNINITIALIZED → JOINING → ACTIVE → LEAVING → LEFT. A LEFT member stays in
/// the map until an explicit removal drops it; merge never removes entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemberStatus {
    /// Entry exists but the member has not started joining yet.
    Uninitialized,
    /// Member is in the process of joining the cluster.
    Joining,
    /// Member is a fully participating part of the cluster.
    Active,
    /// Member is gracefully handing off its partitions.
    Leaving,
    /// Member has left; terminal.
    Left,
}

/// Lifecycle of one partition replica on one member: JOINING → ACTIVE →
/// LEAVING, after which the partition is no longer hosted there.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PartitionStatus {
    /// Replica is being brought up on this member.
    Joining,
    /// Replica is serving on this member.
    Active,
    /// Replica is being torn down on this member.
    Leaving,
}

/// State of one partition replica hosted by a member.
///
/// `priority` feeds downstream leader selection and is opaque here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionState {
    /// Replica lifecycle status.
    pub status: PartitionStatus,
    /// Leader-selection priority, higher wins.
    pub priority: u32,
}

impl PartitionState {
    /// A replica that is still being brought up.
    #[must_use]
    pub const fn joining(priority: u32) -> Self {
        Self {
            status: PartitionStatus::Joining,
            priority,
        }
    }

    /// A serving replica.
    #[must_use]
    pub const fn active(priority: u32) -> Self {
        Self {
            status: PartitionStatus::Active,
            priority,
        }
    }

    /// This replica, now serving.
    #[must_use]
    pub const fn to_active(self) -> Self {
        Self {
            status: PartitionStatus::Active,
            priority: self.priority,
        }
    }

    /// This replica, now being torn down.
    #[must_use]
    pub const fn to_leaving(self) -> Self {
        Self {
            status: PartitionStatus::Leaving,
            priority: self.priority,
        }
    }

    /// This replica with a different leader-selection priority.
    #[must_use]
    pub const fn with_priority(self, priority: u32) -> Self {
        Self {
            status: self.status,
            priority,
        }
    }
}

/// One member's entry in the topology.
///
/// `version` is owned by the member itself: it is bumped on every local
/// change to this entry and never touched by other members. Cross-node
/// reconciliation keeps the entry with the strictly higher version, which is
/// safe precisely because of that single-writer rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberState {
    /// Per-member version counter; single writer, monotonic.
    pub version: u64,
    /// When this entry last changed. Bookkeeping only; merge ignores it.
    pub last_updated: DateTime<Utc>,
    /// Member lifecycle status.
    pub status: MemberStatus,
    /// Partitions hosted by this member.
    pub partitions: BTreeMap<PartitionId, PartitionState>,
}

impl MemberState {
    /// Entry for a member that is known but has not started joining.
    #[must_use]
    pub fn uninitialized() -> Self {
        Self {
            version: 0,
            last_updated: DateTime::UNIX_EPOCH,
            status: MemberStatus::Uninitialized,
            partitions: BTreeMap::new(),
        }
    }

    /// Fresh entry for a member that starts out joining.
    #[must_use]
    pub fn initialized_as_joining() -> Self {
        Self {
            version: 1,
            last_updated: Utc::now(),
            status: MemberStatus::Joining,
            partitions: BTreeMap::new(),
        }
    }

    /// Fresh ACTIVE entry hosting the given partitions, as produced by
    /// static bootstrap.
    #[must_use]
    pub fn active_with_partitions(partitions: BTreeMap<PartitionId, PartitionState>) -> Self {
        Self {
            version: 1,
            last_updated: Utc::now(),
            status: MemberStatus::Active,
            partitions,
        }
    }

    /// This member, now joining.
    #[must_use]
    pub fn to_joining(&self) -> Self {
        self.advanced(MemberStatus::Joining)
    }

    /// This member, now active.
    #[must_use]
    pub fn to_active(&self) -> Self {
        self.advanced(MemberStatus::Active)
    }

    /// This member, now leaving.
    #[must_use]
    pub fn to_leaving(&self) -> Self {
        self.advanced(MemberStatus::Leaving)
    }

    /// This member, now left. The entry stays in the map until explicitly
    /// removed.
    #[must_use]
    pub fn to_left(&self) -> Self {
        self.advanced(MemberStatus::Left)
    }

    /// Whether this member hosts the given partition.
    #[must_use]
    pub fn has_partition(&self, id: PartitionId) -> bool {
        self.partitions.contains_key(&id)
    }

    /// Adds a partition this member does not host yet.
    pub fn add_partition(
        &self,
        id: PartitionId,
        state: PartitionState,
    ) -> Result<Self, TopologyError> {
        if self.partitions.contains_key(&id) {
            return Err(TopologyError::PartitionAlreadyExists(id));
        }
        let mut partitions = self.partitions.clone();
        partitions.insert(id, state);
        Ok(self.advanced_with_partitions(partitions))
    }

    /// Applies a pure transformation to one hosted partition.
    pub fn update_partition(
        &self,
        id: PartitionId,
        update: impl FnOnce(PartitionState) -> PartitionState,
    ) -> Result<Self, TopologyError> {
        let Some(&existing) = self.partitions.get(&id) else {
            return Err(TopologyError::UnknownPartition(id));
        };
        let mut partitions = self.partitions.clone();
        partitions.insert(id, update(existing));
        Ok(self.advanced_with_partitions(partitions))
    }

    /// Drops a partition this member no longer hosts.
    pub fn remove_partition(&self, id: PartitionId) -> Result<Self, TopologyError> {
        if !self.partitions.contains_key(&id) {
            return Err(TopologyError::UnknownPartition(id));
        }
        let mut partitions = self.partitions.clone();
        partitions.remove(&id);
        Ok(self.advanced_with_partitions(partitions))
    }

    fn advanced(&self, status: MemberStatus) -> Self {
        Self {
            version: self.version + 1,
            last_updated: Utc::now(),
            status,
            partitions: self.partitions.clone(),
        }
    }

    fn advanced_with_partitions(
        &self,
        partitions: BTreeMap<PartitionId, PartitionState>,
    ) -> Self {
        Self {
            version: self.version + 1,
            last_updated: Utc::now(),
            status: self.status,
            partitions,
        }
    }
}

/// Outcome of a change plan once it stops being in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeStatus {
    /// Plan still has pending operations.
    InProgress,
    /// All operations were applied.
    Completed,
    /// The plan was aborted after a failed operation.
    Failed,
    /// The plan was cancelled before it finished.
    Cancelled,
}

/// One step of a topology change plan, always scoped to a single member.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChangeOperation {
    /// Member starts joining the cluster.
    MemberJoin {
        /// Joining member.
        member: MemberId,
    },
    /// Member starts gracefully leaving the cluster.
    MemberLeave {
        /// Leaving member.
        member: MemberId,
    },
    /// A LEFT member's entry is dropped from the topology.
    MemberRemove {
        /// Member to drop.
        member: MemberId,
    },
    /// Member starts hosting a partition replica.
    PartitionJoin {
        /// Hosting member.
        member: MemberId,
        /// Partition to host.
        partition: PartitionId,
        /// Leader-selection priority of the new replica.
        priority: u32,
    },
    /// Member stops hosting a partition replica.
    PartitionLeave {
        /// Hosting member.
        member: MemberId,
        /// Partition to stop hosting.
        partition: PartitionId,
    },
    /// Member changes the leader-selection priority of a hosted replica.
    PartitionReconfigurePriority {
        /// Hosting member.
        member: MemberId,
        /// Partition to reconfigure.
        partition: PartitionId,
        /// New priority.
        priority: u32,
    },
}

impl ChangeOperation {
    /// The member this operation applies to.
    #[must_use]
    pub const fn member(&self) -> &MemberId {
        match self {
            Self::MemberJoin { member }
            | Self::MemberLeave { member }
            | Self::MemberRemove { member }
            | Self::PartitionJoin { member, .. }
            | Self::PartitionLeave { member, .. }
            | Self::PartitionReconfigurePriority { member, .. } => member,
        }
    }
}

/// A change-plan operation that has already been applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletedOperation {
    /// The operation that was applied.
    pub operation: ChangeOperation,
    /// When it was applied.
    pub completed_at: DateTime<Utc>,
}

/// The ordered set of operations currently reshaping the cluster.
///
/// Plans carry their own version counter, bumped per advancement, and a
/// cluster-wide monotonic `id`. Two concurrently proposed plans reconcile by
/// last-writer-wins on (`id`, `version`); keeping proposals on a single
/// coordinating member is a deployment convention, not something this type
/// enforces.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterChangePlan {
    /// Monotonic identifier across all plans of this cluster.
    pub id: u64,
    /// Version within this plan, bumped per advancement.
    pub version: u64,
    /// Whether the plan is still in flight.
    pub status: ChangeStatus,
    /// When the plan was proposed.
    pub started_at: DateTime<Utc>,
    /// Operations already applied, oldest first.
    pub completed_operations: Vec<CompletedOperation>,
    /// Operations still to apply, next first.
    pub pending_operations: Vec<ChangeOperation>,
}

impl ClusterChangePlan {
    /// A freshly proposed plan.
    #[must_use]
    pub fn init(id: u64, operations: Vec<ChangeOperation>) -> Self {
        Self {
            id,
            version: 1,
            status: ChangeStatus::InProgress,
            started_at: Utc::now(),
            completed_operations: Vec::new(),
            pending_operations: operations,
        }
    }

    /// The next operation to apply, if any.
    #[must_use]
    pub fn next_operation(&self) -> Option<&ChangeOperation> {
        self.pending_operations.first()
    }

    /// Marks the next pending operation as applied. The plan completes once
    /// the pending list drains.
    pub fn advance(&self) -> Result<Self, TopologyError> {
        if self.pending_operations.is_empty() {
            return Err(TopologyError::NoPendingChange);
        }
        let mut pending = self.pending_operations.clone();
        let operation = pending.remove(0);
        let mut completed = self.completed_operations.clone();
        completed.push(CompletedOperation {
            operation,
            completed_at: Utc::now(),
        });
        let status = if pending.is_empty() {
            ChangeStatus::Completed
        } else {
            ChangeStatus::InProgress
        };
        Ok(Self {
            id: self.id,
            version: self.version + 1,
            status,
            started_at: self.started_at,
            completed_operations: completed,
            pending_operations: pending,
        })
    }

    /// Aborts the plan, discarding operations that were never applied.
    #[must_use]
    pub fn cancel(&self) -> Self {
        Self {
            id: self.id,
            version: self.version + 1,
            status: ChangeStatus::Cancelled,
            started_at: self.started_at,
            completed_operations: self.completed_operations.clone(),
            pending_operations: Vec::new(),
        }
    }

    /// The durable record left behind once this plan stops being in flight.
    #[must_use]
    pub fn finished(&self) -> CompletedChange {
        CompletedChange {
            id: self.id,
            status: self.status,
            started_at: self.started_at,
            completed_at: Utc::now(),
        }
    }
}

/// Record of the most recently finished change plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletedChange {
    /// Identifier the finished plan carried.
    pub id: u64,
    /// Final status of the plan.
    pub status: ChangeStatus,
    /// When the plan was proposed.
    pub started_at: DateTime<Utc>,
    /// When the plan finished.
    pub completed_at: DateTime<Utc>,
}

const UNINITIALIZED_VERSION: i64 = -1;
const INITIAL_VERSION: i64 = 1;

/// Immutable snapshot of the cluster: which members exist, which partitions
/// they host, and what change is in flight.
///
/// `merge` forms a join-semilattice over valid snapshots (commutative,
/// associative, idempotent, with [`ClusterTopology::uninitialized`] as the
/// identity), so repeated, reordered, or duplicated gossip exchanges
/// converge to the same fixed point on every node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterTopology {
    /// Snapshot version, bumped on every local mutation. `-1` marks the
    /// uninitialized sentinel.
    pub version: i64,
    /// All known members keyed by id.
    pub members: BTreeMap<MemberId, MemberState>,
    /// The most recently finished change plan, if any.
    pub last_change: Option<CompletedChange>,
    /// The change plan currently in flight, if any.
    pub changes: Option<ClusterChangePlan>,
}

impl ClusterTopology {
    /// The "no data yet" sentinel: a valid, mergeable value, not an error.
    #[must_use]
    pub fn uninitialized() -> Self {
        Self {
            version: UNINITIALIZED_VERSION,
            members: BTreeMap::new(),
            last_change: None,
            changes: None,
        }
    }

    /// An empty but initialized topology, ready to accept members.
    #[must_use]
    pub fn init() -> Self {
        Self {
            version: INITIAL_VERSION,
            members: BTreeMap::new(),
            last_change: None,
            changes: None,
        }
    }

    /// Whether this snapshot is the uninitialized sentinel.
    #[must_use]
    pub const fn is_uninitialized(&self) -> bool {
        self.version == UNINITIALIZED_VERSION
    }

    /// Looks up one member's entry.
    #[must_use]
    pub fn member(&self, id: &MemberId) -> Option<&MemberState> {
        self.members.get(id)
    }

    /// Whether the member is part of this snapshot.
    #[must_use]
    pub fn has_member(&self, id: &MemberId) -> bool {
        self.members.contains_key(id)
    }

    /// Whether a change plan is currently in flight.
    #[must_use]
    pub const fn has_pending_changes(&self) -> bool {
        self.changes.is_some()
    }

    /// Adds a new member entry. The identity must not exist yet; re-adding
    /// an identity that peers may still hold at a higher version breaks the
    /// single-writer versioning rule.
    pub fn add_member(&self, id: &MemberId, state: MemberState) -> Result<Self, TopologyError> {
        if self.members.contains_key(id) {
            return Err(TopologyError::MemberAlreadyExists(id.clone()));
        }
        let mut members = self.members.clone();
        members.insert(id.clone(), state);
        Ok(self.bumped_with_members(members))
    }

    /// Applies a pure transformation to one member's entry. The
    /// transformation itself is responsible for bumping the member version
    /// (all [`MemberState`] helpers do).
    pub fn update_member<F>(&self, id: &MemberId, update: F) -> Result<Self, TopologyError>
    where
        F: FnOnce(&MemberState) -> Result<MemberState, TopologyError>,
    {
        let Some(existing) = self.members.get(id) else {
            return Err(TopologyError::UnknownMember(id.clone()));
        };
        let updated = update(existing)?;
        let mut members = self.members.clone();
        members.insert(id.clone(), updated);
        Ok(self.bumped_with_members(members))
    }

    /// Drops a member's entry. Only LEFT members may be removed; merge never
    /// removes entries on its own.
    pub fn remove_member(&self, id: &MemberId) -> Result<Self, TopologyError> {
        let Some(existing) = self.members.get(id) else {
            return Err(TopologyError::UnknownMember(id.clone()));
        };
        if existing.status != MemberStatus::Left {
            return Err(TopologyError::MemberNotRemovable {
                id: id.clone(),
                status: existing.status,
            });
        }
        let mut members = self.members.clone();
        members.remove(id);
        Ok(self.bumped_with_members(members))
    }

    /// Proposes a new change plan. Refuses to stack plans locally while one
    /// is in flight.
    pub fn start_change(
        &self,
        operations: Vec<ChangeOperation>,
    ) -> Result<Self, TopologyError> {
        if operations.is_empty() {
            return Err(TopologyError::Configuration(
                "a topology change needs at least one operation".to_string(),
            ));
        }
        if let Some(plan) = &self.changes {
            return Err(TopologyError::ChangeInProgress { id: plan.id });
        }
        let next_id = self.last_change.map_or(0, |change| change.id) + 1;
        Ok(Self {
            version: self.version + 1,
            members: self.members.clone(),
            last_change: self.last_change,
            changes: Some(ClusterChangePlan::init(next_id, operations)),
        })
    }

    /// Marks the in-flight plan's next operation as applied; once the plan
    /// drains it is sealed into `last_change`.
    pub fn advance_change(&self) -> Result<Self, TopologyError> {
        let Some(plan) = &self.changes else {
            return Err(TopologyError::NoPendingChange);
        };
        let advanced = plan.advance()?;
        if advanced.status == ChangeStatus::InProgress {
            Ok(Self {
                version: self.version + 1,
                members: self.members.clone(),
                last_change: self.last_change,
                changes: Some(advanced),
            })
        } else {
            Ok(Self {
                version: self.version + 1,
                members: self.members.clone(),
                last_change: Some(advanced.finished()),
                changes: None,
            })
        }
    }

    /// Cancels the in-flight plan, sealing it into `last_change`.
    pub fn cancel_change(&self) -> Result<Self, TopologyError> {
        let Some(plan) = &self.changes else {
            return Err(TopologyError::NoPendingChange);
        };
        let cancelled = plan.cancel();
        Ok(Self {
            version: self.version + 1,
            members: self.members.clone(),
            last_change: Some(cancelled.finished()),
            changes: None,
        })
    }

    /// Merges a snapshot received from another node into this one.
    ///
    /// The member map becomes the key-wise union of both inputs; a key
    /// present in both keeps the entry with the strictly higher member
    /// version. The change plan and the last-change record reconcile by
    /// last-writer-wins on their own counters, and a pending plan that is
    /// older than the merged last-change record is stale and dropped. The
    /// result's version is the maximum of both inputs.
    #[must_use]
    pub fn merge(&self, other: &Self) -> Self {
        let mut members = self.members.clone();
        for (id, state) in &other.members {
            members
                .entry(id.clone())
                .and_modify(|current| {
                    if state.version > current.version {
                        *current = state.clone();
                    }
                })
                .or_insert_with(|| state.clone());
        }

        let last_change = match (self.last_change, other.last_change) {
            (Some(ours), Some(theirs)) => Some(if theirs.id > ours.id { theirs } else { ours }),
            (ours, theirs) => ours.or(theirs),
        };

        let changes = match (&self.changes, &other.changes) {
            (Some(ours), Some(theirs)) => Some(
                if (theirs.id, theirs.version) > (ours.id, ours.version) {
                    theirs.clone()
                } else {
                    ours.clone()
                },
            ),
            (ours, theirs) => ours.clone().or_else(|| theirs.clone()),
        };
        // A finished change must not be resurrected by a lagging peer.
        let changes = match (&last_change, changes) {
            (Some(done), Some(plan)) if plan.id <= done.id => None,
            (_, changes) => changes,
        };

        Self {
            version: self.version.max(other.version),
            members,
            last_change,
            changes,
        }
    }

    fn bumped_with_members(&self, members: BTreeMap<MemberId, MemberState>) -> Self {
        Self {
            version: self.version + 1,
            members,
            last_change: self.last_change,
            changes: self.changes.clone(),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn member(idx: u32) -> MemberId {
        MemberId::new(format!("member-{idx}"))
    }

    #[test]
    fn transitions_bump_member_version() {
        let state = MemberState::initialized_as_joining();
        assert_eq!(state.version, 1);
        assert_eq!(state.status, MemberStatus::Joining);

        let active = state.to_active();
        assert_eq!(active.version, 2);
        assert_eq!(active.status, MemberStatus::Active);

        let left = active.to_leaving().to_left();
        assert_eq!(left.version, 4);
        assert_eq!(left.status, MemberStatus::Left);
    }

    #[test]
    fn partition_bookkeeping_is_versioned() {
        let state = MemberState::initialized_as_joining()
            .add_partition(PartitionId(1), PartitionState::joining(3))
            .expect("add partition");
        assert_eq!(state.version, 2);
        assert!(state.has_partition(PartitionId(1)));

        let err = state
            .add_partition(PartitionId(1), PartitionState::joining(3))
            .expect_err("duplicate partition");
        assert_eq!(err.kind(), crate::error::TopologyErrorKind::PartitionAlreadyExists);

        let activated = state
            .update_partition(PartitionId(1), PartitionState::to_active)
            .expect("activate partition");
        assert_eq!(activated.version, 3);
        assert_eq!(
            activated.partitions[&PartitionId(1)].status,
            PartitionStatus::Active
        );

        let removed = activated
            .remove_partition(PartitionId(1))
            .expect("remove partition");
        assert!(!removed.has_partition(PartitionId(1)));
    }

    #[test]
    fn add_member_rejects_existing_identity() {
        let topology = ClusterTopology::init()
            .add_member(&member(1), MemberState::initialized_as_joining())
            .expect("add member");
        assert_eq!(topology.version, 2);

        let err = topology
            .add_member(&member(1), MemberState::initialized_as_joining())
            .expect_err("duplicate member");
        assert!(matches!(err, TopologyError::MemberAlreadyExists(_)));
    }

    #[test]
    fn update_member_requires_known_identity() {
        let topology = ClusterTopology::init();
        let err = topology
            .update_member(&member(9), |state| Ok(state.to_active()))
            .expect_err("unknown member");
        assert!(matches!(err, TopologyError::UnknownMember(_)));
    }

    #[test]
    fn only_left_members_can_be_removed() {
        let topology = ClusterTopology::init()
            .add_member(&member(1), MemberState::initialized_as_joining())
            .expect("add member");

        let err = topology.remove_member(&member(1)).expect_err("still joining");
        assert!(matches!(err, TopologyError::MemberNotRemovable { .. }));

        let topology = topology
            .update_member(&member(1), |state| Ok(state.to_active().to_leaving().to_left()))
            .expect("march to left");
        let removed = topology.remove_member(&member(1)).expect("remove left member");
        assert!(!removed.has_member(&member(1)));
    }

    #[test]
    fn merge_keeps_higher_member_version() {
        let base = ClusterTopology::init()
            .add_member(&member(1), MemberState::initialized_as_joining())
            .expect("add member");

        let ours = base
            .update_member(&member(1), |state| Ok(state.to_active()))
            .expect("activate");
        let merged = ours.merge(&base);
        assert_eq!(
            merged.member(&member(1)).expect("member").status,
            MemberStatus::Active
        );
        // Direction must not matter.
        assert_eq!(base.merge(&ours), merged);
    }

    #[test]
    fn merge_unions_disjoint_members() {
        let base = ClusterTopology::init();
        let ours = base
            .add_member(&member(1), MemberState::initialized_as_joining())
            .expect("add member 1");
        let theirs = base
            .add_member(&member(2), MemberState::initialized_as_joining())
            .expect("add member 2");

        let merged = ours.merge(&theirs);
        assert!(merged.has_member(&member(1)));
        assert!(merged.has_member(&member(2)));
        assert_eq!(merged.version, 2);
    }

    #[test]
    fn change_plan_lifecycle() {
        let topology = ClusterTopology::init()
            .add_member(&member(1), MemberState::initialized_as_joining())
            .expect("add member");

        let operations = vec![
            ChangeOperation::PartitionJoin {
                member: member(1),
                partition: PartitionId(1),
                priority: 1,
            },
            ChangeOperation::MemberLeave { member: member(2) },
        ];
        let topology = topology.start_change(operations).expect("start change");
        let plan = topology.changes.as_ref().expect("plan in flight");
        assert_eq!(plan.id, 1);
        assert_eq!(plan.pending_operations.len(), 2);

        let err = topology
            .start_change(vec![ChangeOperation::MemberJoin { member: member(3) }])
            .expect_err("stacked change");
        assert!(matches!(err, TopologyError::ChangeInProgress { id: 1 }));

        let topology = topology.advance_change().expect("advance once");
        assert!(topology.has_pending_changes());

        let topology = topology.advance_change().expect("advance twice");
        assert!(!topology.has_pending_changes());
        let done = topology.last_change.expect("sealed change");
        assert_eq!(done.id, 1);
        assert_eq!(done.status, ChangeStatus::Completed);

        // The next plan picks up the id sequence where the last one ended.
        let topology = topology
            .start_change(vec![ChangeOperation::MemberJoin { member: member(3) }])
            .expect("next change");
        assert_eq!(topology.changes.as_ref().expect("plan").id, 2);
    }

    #[test]
    fn cancelled_plan_is_sealed() {
        let topology = ClusterTopology::init()
            .start_change(vec![ChangeOperation::MemberJoin { member: member(1) }])
            .expect("start change");
        let topology = topology.cancel_change().expect("cancel");
        assert!(!topology.has_pending_changes());
        assert_eq!(
            topology.last_change.expect("sealed").status,
            ChangeStatus::Cancelled
        );
    }

    #[test]
    fn merge_drops_stale_resurrected_plan() {
        let proposed = ClusterTopology::init()
            .start_change(vec![ChangeOperation::MemberJoin { member: member(1) }])
            .expect("start change");
        // One node finished the plan; a lagging peer still gossips it.
        let finished = proposed.advance_change().expect("finish plan");
        let merged = finished.merge(&proposed);
        assert!(!merged.has_pending_changes());
        assert_eq!(merged.last_change, finished.last_change);
        assert_eq!(proposed.merge(&finished), merged);
    }

    #[test]
    fn merge_with_uninitialized_is_identity() {
        let topology = ClusterTopology::init()
            .add_member(&member(1), MemberState::initialized_as_joining())
            .expect("add member");
        assert_eq!(topology.merge(&ClusterTopology::uninitialized()), topology);
        assert_eq!(ClusterTopology::uninitialized().merge(&topology), topology);
    }
}
