//! Per-shard replica of the cluster members view
//!
//! Every shard holds one `MembersTable`; replicas are mutated only through
//! `apply(offset, cmd)` and `update_brokers(offset, brokers)`, both driven
//! with identical inputs on every shard, so the replicas stay in lockstep.

use crate::commands::NodeCommand;
use crate::error::ErrorCode;
use crate::types::{Broker, LogOffset, NodeId};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::debug;

/// Membership state of a node
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum MembershipState {
    /// Fully participating member
    Active,

    /// Decommissioned; partitions are draining away
    Draining,

    /// No longer part of the replicated configuration
    Removed,
}

/// Maintenance state of a node
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum MaintenanceState {
    /// Node is in maintenance mode
    Active,

    /// Normal operation
    Inactive,
}

/// Everything the members table knows about one node
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NodeMetadata {
    /// Advertised broker record
    pub broker: Broker,

    /// Membership state
    pub membership: MembershipState,

    /// Maintenance state
    pub maintenance: MaintenanceState,
}

impl NodeMetadata {
    fn new(broker: Broker) -> Self {
        Self {
            broker,
            membership: MembershipState::Active,
            maintenance: MaintenanceState::Inactive,
        }
    }
}

/// One shard's view of the cluster members
#[derive(Debug, Clone, Default)]
pub struct MembersTable {
    nodes: HashMap<NodeId, NodeMetadata>,
    removed: HashMap<NodeId, NodeMetadata>,
    last_applied: LogOffset,
}

impl MembersTable {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Current members, keyed by node id
    pub fn nodes(&self) -> &HashMap<NodeId, NodeMetadata> {
        &self.nodes
    }

    /// Whether the table contains an active or draining node with this id
    pub fn contains(&self, id: NodeId) -> bool {
        self.nodes.contains_key(&id)
    }

    /// Metadata for a current member
    pub fn get_node_metadata(&self, id: NodeId) -> Option<&NodeMetadata> {
        self.nodes.get(&id)
    }

    /// Metadata retained for a node that left the configuration
    pub fn get_removed_node_metadata(&self, id: NodeId) -> Option<&NodeMetadata> {
        self.removed.get(&id)
    }

    /// Ids of removed nodes
    pub fn removed_node_ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.removed.keys().copied()
    }

    /// Offset of the last mutation applied to this replica
    pub fn last_applied(&self) -> LogOffset {
        self.last_applied
    }

    /// Apply a committed membership command.
    ///
    /// Every shard receives the same `(offset, cmd)` input; the returned
    /// code is compared across shards by the caller.
    pub fn apply(&mut self, offset: LogOffset, cmd: &NodeCommand) -> ErrorCode {
        self.last_applied = self.last_applied.max(offset);
        match cmd {
            NodeCommand::Decommission(id) => match self.nodes.get_mut(id) {
                Some(node) if node.membership == MembershipState::Active => {
                    node.membership = MembershipState::Draining;
                    ErrorCode::Success
                }
                _ => ErrorCode::InvalidNodeOperation,
            },
            NodeCommand::Recommission(id) => match self.nodes.get_mut(id) {
                Some(node) if node.membership == MembershipState::Draining => {
                    node.membership = MembershipState::Active;
                    ErrorCode::Success
                }
                _ => ErrorCode::InvalidNodeOperation,
            },
            NodeCommand::MaintenanceMode { id, enabled } => match self.nodes.get_mut(id) {
                Some(node) => {
                    node.maintenance = if *enabled {
                        MaintenanceState::Active
                    } else {
                        MaintenanceState::Inactive
                    };
                    ErrorCode::Success
                }
                None => ErrorCode::InvalidNodeOperation,
            },
            // not routed to the members table
            NodeCommand::FinishReallocations(_) | NodeCommand::RegisterNodeUuid { .. } => {
                ErrorCode::Success
            }
        }
    }

    /// Reconcile the table with a newly committed broker list.
    ///
    /// Brokers absent from `brokers` move to the removed set, keeping their
    /// last metadata; a previously removed id reappearing in the
    /// configuration is revived as an active member.
    pub fn update_brokers(&mut self, offset: LogOffset, brokers: &[Broker]) {
        self.last_applied = self.last_applied.max(offset);

        for broker in brokers {
            if let Some(node) = self.nodes.get_mut(&broker.id) {
                node.broker = broker.clone();
            } else {
                self.removed.remove(&broker.id);
                self.nodes.insert(broker.id, NodeMetadata::new(broker.clone()));
            }
        }

        let gone: Vec<NodeId> = self
            .nodes
            .keys()
            .copied()
            .filter(|id| !brokers.iter().any(|b| b.id == *id))
            .collect();
        for id in gone {
            if let Some(mut node) = self.nodes.remove(&id) {
                debug!(node_id = id, "node removed from configuration");
                node.membership = MembershipState::Removed;
                self.removed.insert(id, node);
            }
        }
    }
}
