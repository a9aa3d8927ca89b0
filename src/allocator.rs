//! Partition allocator node registry
//!
//! The allocator proper assigns partitions elsewhere; the membership manager
//! only keeps its node set coherent with the replicated configuration and
//! flags nodes that must not receive new allocations.

use crate::types::{Broker, NodeId};
use std::collections::HashMap;
use tracing::debug;

/// One node as seen by the allocator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllocationNode {
    /// Advertised broker record
    pub broker: Broker,

    /// Whether the node is excluded from new allocations
    pub decommissioned: bool,
}

/// Registry of nodes available for partition allocation; hosted on the
/// controller shard only
#[derive(Debug, Clone, Default)]
pub struct PartitionAllocator {
    nodes: HashMap<NodeId, AllocationNode>,
}

impl PartitionAllocator {
    /// Create an empty allocator
    pub fn new() -> Self {
        Self::default()
    }

    /// Reconcile the node set with a newly committed broker list.
    ///
    /// Known nodes keep their decommission flag; nodes absent from the list
    /// are dropped.
    pub fn update_allocation_nodes(&mut self, brokers: &[Broker]) {
        for broker in brokers {
            match self.nodes.get_mut(&broker.id) {
                Some(node) => node.broker = broker.clone(),
                None => {
                    self.nodes.insert(
                        broker.id,
                        AllocationNode {
                            broker: broker.clone(),
                            decommissioned: false,
                        },
                    );
                }
            }
        }
        self.nodes
            .retain(|id, _| brokers.iter().any(|b| b.id == *id));
        debug!(nodes = self.nodes.len(), "allocation node set updated");
    }

    /// Exclude a node from new allocations
    pub fn decommission_node(&mut self, id: NodeId) {
        if let Some(node) = self.nodes.get_mut(&id) {
            node.decommissioned = true;
        }
    }

    /// Reinstate a node for new allocations
    pub fn recommission_node(&mut self, id: NodeId) {
        if let Some(node) = self.nodes.get_mut(&id) {
            node.decommissioned = false;
        }
    }

    /// Whether a node is currently excluded from allocations
    pub fn is_decommissioned(&self, id: NodeId) -> bool {
        self.nodes
            .get(&id)
            .map(|n| n.decommissioned)
            .unwrap_or(false)
    }

    /// Snapshot of the node set
    pub fn nodes(&self) -> &HashMap<NodeId, AllocationNode> {
        &self.nodes
    }
}
