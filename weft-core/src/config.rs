use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::error::TopologyError;
use crate::state::{MemberId, PartitionId};

/// Fixed description of a cluster's very first topology, consumed once by
/// static bootstrap when no data exists anywhere yet.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StaticConfiguration {
    /// All members of the initial cluster.
    pub members: Vec<MemberId>,
    /// Number of partitions to distribute across the members.
    pub partition_count: u32,
    /// Replicas per partition, primary included.
    pub replication_factor: u32,
}

impl Default for StaticConfiguration {
    fn default() -> Self {
        Self {
            members: Vec::new(),
            partition_count: 1,
            replication_factor: 1,
        }
    }
}

impl StaticConfiguration {
    /// Assigns partitions to members round-robin.
    ///
    /// Partition `p` lands on `replication_factor` consecutive members
    /// starting at offset `p - 1`; replica priorities descend with replica
    /// position, so the first member of each partition is its primary.
    pub fn generate_distribution(&self) -> Result<Vec<PartitionMetadata>, TopologyError> {
        self.validate()?;

        let member_count = self.members.len() as u32;
        let mut distribution = Vec::with_capacity(self.partition_count as usize);
        for partition in 1..=self.partition_count {
            let mut members = Vec::with_capacity(self.replication_factor as usize);
            let mut priorities = BTreeMap::new();
            for replica in 0..self.replication_factor {
                let member =
                    self.members[(((partition - 1) + replica) % member_count) as usize].clone();
                priorities.insert(member.clone(), self.replication_factor - replica);
                members.push(member);
            }
            let primary = members[0].clone();
            distribution.push(PartitionMetadata {
                id: PartitionId(partition),
                members,
                priorities,
                replication_factor: self.replication_factor,
                primary,
            });
        }
        Ok(distribution)
    }

    fn validate(&self) -> Result<(), TopologyError> {
        if self.members.is_empty() {
            return Err(TopologyError::Configuration(
                "static bootstrap needs at least one member".to_string(),
            ));
        }
        let unique: BTreeSet<_> = self.members.iter().collect();
        if unique.len() != self.members.len() {
            return Err(TopologyError::Configuration(
                "static bootstrap member list contains duplicates".to_string(),
            ));
        }
        if self.partition_count == 0 {
            return Err(TopologyError::Configuration(
                "partition count must be at least 1".to_string(),
            ));
        }
        if self.replication_factor == 0 {
            return Err(TopologyError::Configuration(
                "replication factor must be at least 1".to_string(),
            ));
        }
        if self.replication_factor as usize > self.members.len() {
            return Err(TopologyError::Configuration(format!(
                "replication factor {} exceeds the {} configured members",
                self.replication_factor,
                self.members.len()
            )));
        }
        Ok(())
    }
}

/// Placement of one partition across the initial member set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionMetadata {
    /// Partition this placement describes.
    pub id: PartitionId,
    /// Hosting members, primary first.
    pub members: Vec<MemberId>,
    /// Leader-selection priority per hosting member.
    pub priorities: BTreeMap<MemberId, u32>,
    /// Number of replicas, primary included.
    pub replication_factor: u32,
    /// Member designated as the partition's primary.
    pub primary: MemberId,
}
