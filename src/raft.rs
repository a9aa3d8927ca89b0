//! Consumed interfaces of the raft-0 consensus group
//!
//! The consensus engine itself lives outside this crate. The membership
//! manager reads its replicated [`GroupConfiguration`], asks it about
//! leadership, and hands it membership changes; the controller state machine
//! replicates membership commands. Both are trait seams so tests can supply
//! in-process stubs.

use crate::commands::NodeCommand;
use crate::error::ErrorCode;
use crate::types::{Broker, LogOffset, NodeId};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Duration;

/// State of the replicated group configuration
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub enum ConfigurationState {
    /// A single voter set
    #[default]
    Simple,

    /// Transitional configuration with both an old and a new voter set
    Joint,
}

/// The old-configuration view exposed while in joint state
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct OldConfigurationView {
    /// Voters of the previous configuration
    pub voters: Vec<NodeId>,

    /// Learners of the previous configuration; demoted voters pending
    /// removal appear here
    pub learners: Vec<NodeId>,
}

/// The replicated raft-0 configuration, read-only to this crate
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct GroupConfiguration {
    brokers: Vec<Broker>,
    state: ConfigurationState,
    old_config: Option<OldConfigurationView>,
}

impl GroupConfiguration {
    /// Build a simple configuration from a broker list
    pub fn new(brokers: Vec<Broker>) -> Self {
        Self {
            brokers,
            state: ConfigurationState::Simple,
            old_config: None,
        }
    }

    /// Build a joint configuration with the given old-config view
    pub fn joint(brokers: Vec<Broker>, old_config: OldConfigurationView) -> Self {
        Self {
            brokers,
            state: ConfigurationState::Joint,
            old_config: Some(old_config),
        }
    }

    /// Ordered list of current brokers
    pub fn brokers(&self) -> &[Broker] {
        &self.brokers
    }

    /// Current configuration state
    pub fn state(&self) -> ConfigurationState {
        self.state
    }

    /// Old-configuration view; present only in joint state
    pub fn old_config(&self) -> Option<&OldConfigurationView> {
        self.old_config.as_ref()
    }

    /// Whether a broker with the given id is part of the configuration
    pub fn contains_broker(&self, id: NodeId) -> bool {
        self.brokers.iter().any(|b| b.id == id)
    }

    /// Find a broker by id
    pub fn find_broker(&self, id: NodeId) -> Option<&Broker> {
        self.brokers.iter().find(|b| b.id == id)
    }

    /// Whether any broker advertises the given RPC address
    pub fn contains_address(&self, addr: &SocketAddr) -> bool {
        self.brokers.iter().any(|b| b.rpc_address == *addr)
    }
}

/// Interface of the raft-0 consensus group consumed by the membership
/// manager
#[async_trait]
pub trait ControllerRaft: Send + Sync {
    /// Current replicated configuration
    fn config(&self) -> GroupConfiguration;

    /// Id of the current leader, if one is known
    fn leader_id(&self) -> Option<NodeId>;

    /// Whether this node is the elected leader of raft-0
    fn is_elected_leader(&self) -> bool;

    /// Offset of the latest committed configuration
    fn latest_configuration_offset(&self) -> LogOffset;

    /// Add brokers to the group at the given revision
    async fn add_group_members(&self, brokers: Vec<Broker>, revision: i64) -> ErrorCode;

    /// Replace a member's broker record
    async fn update_group_member(&self, broker: Broker) -> ErrorCode;
}

/// Interface of the controller state machine: replicate a membership command
/// and wait until it commits and applies locally
#[async_trait]
pub trait ControllerStm: Send + Sync {
    /// Replicate `cmd`, waiting up to `timeout` for commit + local apply
    async fn replicate_and_wait(&self, cmd: NodeCommand, timeout: Duration) -> ErrorCode;
}
