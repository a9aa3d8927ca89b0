//! Replicated membership commands and the node-update event model
//!
//! Commands arrive through the replicated controller log as committed
//! batches; node updates leave through the bounded update channel toward the
//! node-update backend.

use crate::raft::GroupConfiguration;
use crate::types::{Broker, LogOffset, NodeId, NodeUuid};
use serde::{Deserialize, Serialize};

/// A membership command carried by the controller log
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum NodeCommand {
    /// Logically remove a node from the allocation pool
    Decommission(NodeId),

    /// Reinstate a previously decommissioned node
    Recommission(NodeId),

    /// Signal that a node's partition reallocations completed
    FinishReallocations(NodeId),

    /// Toggle maintenance mode for a node
    MaintenanceMode { id: NodeId, enabled: bool },

    /// Register a node UUID, optionally with an explicitly requested id
    RegisterNodeUuid {
        uuid: NodeUuid,
        id: Option<NodeId>,
    },
}

/// Payload of a committed controller-log batch
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum BatchPayload {
    /// A raft-configuration batch; carries exactly one record
    RaftConfiguration(Vec<GroupConfiguration>),

    /// A single membership command
    Command(NodeCommand),
}

/// A committed batch handed to the command applier in log order
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CommandBatch {
    /// Offset of the batch in the controller log
    pub base_offset: LogOffset,

    /// Decoded payload
    pub payload: BatchPayload,
}

impl CommandBatch {
    /// Build a command batch
    pub fn command(base_offset: LogOffset, command: NodeCommand) -> Self {
        Self {
            base_offset,
            payload: BatchPayload::Command(command),
        }
    }

    /// Build a raft-configuration batch with a single record
    pub fn raft_configuration(base_offset: LogOffset, cfg: GroupConfiguration) -> Self {
        Self {
            base_offset,
            payload: BatchPayload::RaftConfiguration(vec![cfg]),
        }
    }
}

/// Kind of a node lifecycle event
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum NodeUpdateType {
    /// Node appeared in the replicated configuration
    Added,

    /// Node was decommissioned
    Decommissioned,

    /// Node was recommissioned
    Recommissioned,

    /// Node finished its partition reallocations
    ReallocationFinished,
}

impl std::fmt::Display for NodeUpdateType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NodeUpdateType::Added => write!(f, "added"),
            NodeUpdateType::Decommissioned => write!(f, "decommissioned"),
            NodeUpdateType::Recommissioned => write!(f, "recommissioned"),
            NodeUpdateType::ReallocationFinished => write!(f, "reallocation_finished"),
        }
    }
}

/// A node lifecycle event delivered to the node-update backend
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct NodeUpdate {
    /// Affected node
    pub id: NodeId,

    /// Event kind
    pub update_type: NodeUpdateType,

    /// Log offset of the command that produced the event
    pub offset: LogOffset,
}

impl std::fmt::Display for NodeUpdate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{{node_id: {}, type: {}, offset: {}}}",
            self.id, self.update_type, self.offset
        )
    }
}

/// Diff between the replicated configuration and the local members view,
/// computed once per reconciliation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangedNodes {
    /// Brokers present in the configuration but not in the members table
    pub added: Vec<Broker>,

    /// Brokers present in both with differing attributes
    pub updated: Vec<Broker>,

    /// Node ids present only in the members table
    pub removed: Vec<NodeId>,
}

impl ChangedNodes {
    /// Whether the diff is empty
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.updated.is_empty() && self.removed.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_serde_roundtrip() {
        let cmd = NodeCommand::RegisterNodeUuid {
            uuid: NodeUuid::random(),
            id: Some(4),
        };
        let encoded = serde_json::to_string(&cmd).unwrap();
        let decoded: NodeCommand = serde_json::from_str(&encoded).unwrap();
        assert_eq!(cmd, decoded);
    }

    #[test]
    fn test_node_update_display() {
        let update = NodeUpdate {
            id: 7,
            update_type: NodeUpdateType::Decommissioned,
            offset: 100,
        };
        assert_eq!(
            update.to_string(),
            "{node_id: 7, type: decommissioned, offset: 100}"
        );
    }

    #[test]
    fn test_changed_nodes_empty() {
        let diff = ChangedNodes::default();
        assert!(diff.is_empty());

        let diff = ChangedNodes {
            removed: vec![3],
            ..Default::default()
        };
        assert!(!diff.is_empty());
    }

    #[test]
    fn test_raft_configuration_batch_has_one_record() {
        let batch = CommandBatch::raft_configuration(10, GroupConfiguration::default());
        match batch.payload {
            BatchPayload::RaftConfiguration(records) => assert_eq!(records.len(), 1),
            BatchPayload::Command(_) => panic!("expected configuration payload"),
        }
    }
}
