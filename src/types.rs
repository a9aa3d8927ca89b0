//! Core identity and broker types for cluster membership
//!
//! This module defines the identifiers and the advertised broker record that
//! the rest of the membership subsystem is built around.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;

/// Node identifier used throughout the cluster.
///
/// Small non-negative integer assigned by the controller leader. The value
/// `UNASSIGNED_NODE_ID` marks a node that has not been assigned yet and
/// `MAX_NODE_ID` is a pure sentinel that is never handed out.
pub type NodeId = i32;

/// Sentinel for a node that has no assigned id yet
pub const UNASSIGNED_NODE_ID: NodeId = -1;

/// Terminal sentinel of the id space; never assigned to a node
pub const MAX_NODE_ID: NodeId = i32::MAX;

/// Offset into the replicated controller log
pub type LogOffset = i64;

/// Length in bytes of a node UUID
pub const NODE_UUID_LEN: usize = 16;

/// Opaque fixed-length node identifier generated once per data directory at
/// first boot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeUuid([u8; NODE_UUID_LEN]);

impl NodeUuid {
    /// Generate a fresh random UUID
    pub fn random() -> Self {
        Self(*uuid::Uuid::new_v4().as_bytes())
    }

    /// Build from raw bytes; returns `None` unless exactly 16 bytes long
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        let raw: [u8; NODE_UUID_LEN] = bytes.try_into().ok()?;
        Some(Self(raw))
    }

    /// Raw byte view
    pub fn as_bytes(&self) -> &[u8; NODE_UUID_LEN] {
        &self.0
    }

    /// Owned byte vector, as carried in join requests
    pub fn to_vec(&self) -> Vec<u8> {
        self.0.to_vec()
    }
}

impl From<[u8; NODE_UUID_LEN]> for NodeUuid {
    fn from(raw: [u8; NODE_UUID_LEN]) -> Self {
        Self(raw)
    }
}

impl std::fmt::Display for NodeUuid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", uuid::Uuid::from_bytes(self.0))
    }
}

/// A named host/port pair a broker advertises for the kafka protocol
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BrokerEndpoint {
    /// Listener name (e.g. "internal", "external")
    pub name: String,

    /// Advertised host
    pub host: String,

    /// Advertised port
    pub port: u16,
}

impl BrokerEndpoint {
    /// Create a new endpoint
    pub fn new(name: impl Into<String>, host: impl Into<String>, port: u16) -> Self {
        Self {
            name: name.into(),
            host: host.into(),
            port,
        }
    }
}

impl std::fmt::Display for BrokerEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}://{}:{}", self.name, self.host, self.port)
    }
}

/// Broker properties advertised alongside the addresses.
///
/// `cores` is the broker's shard count and is semantically significant: the
/// configuration validator refuses updates that decrease it.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct BrokerProperties {
    /// Number of shards (cores) the broker runs
    pub cores: u32,
}

impl Default for BrokerProperties {
    fn default() -> Self {
        Self { cores: 1 }
    }
}

/// The advertised description of a node in the cluster.
///
/// Two brokers are equal iff all attributes are equal; the configuration
/// reconciler relies on this to detect updated nodes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Broker {
    /// Node id; `UNASSIGNED_NODE_ID` until the controller assigns one
    pub id: NodeId,

    /// Address for inter-node controller RPC
    pub rpc_address: SocketAddr,

    /// Advertised kafka-protocol endpoints
    pub kafka_endpoints: Vec<BrokerEndpoint>,

    /// Optional rack identifier for failure-domain-aware placement
    pub rack: Option<String>,

    /// Broker properties
    pub properties: BrokerProperties,
}

impl Broker {
    /// Create a broker record with defaults for the optional fields
    pub fn new(id: NodeId, rpc_address: SocketAddr) -> Self {
        Self {
            id,
            rpc_address,
            kafka_endpoints: Vec::new(),
            rack: None,
            properties: BrokerProperties::default(),
        }
    }

    /// Add a kafka-protocol endpoint
    pub fn with_kafka_endpoint(mut self, endpoint: BrokerEndpoint) -> Self {
        self.kafka_endpoints.push(endpoint);
        self
    }

    /// Set the rack identifier
    pub fn with_rack(mut self, rack: impl Into<String>) -> Self {
        self.rack = Some(rack.into());
        self
    }

    /// Set the shard count
    pub fn with_cores(mut self, cores: u32) -> Self {
        self.properties.cores = cores;
        self
    }

    /// Whether this broker has an assigned node id
    pub fn has_assigned_id(&self) -> bool {
        self.id != UNASSIGNED_NODE_ID
    }
}

impl std::fmt::Display for Broker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{{id: {}, rpc: {}, cores: {}}}",
            self.id, self.rpc_address, self.properties.cores
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_uuid_length() {
        assert!(NodeUuid::from_slice(&[0u8; 16]).is_some());
        assert!(NodeUuid::from_slice(&[0u8; 15]).is_none());
        assert!(NodeUuid::from_slice(&[0u8; 17]).is_none());
    }

    #[test]
    fn test_node_uuid_random_unique() {
        let a = NodeUuid::random();
        let b = NodeUuid::random();
        assert_ne!(a, b);
        assert_eq!(a.to_vec().len(), NODE_UUID_LEN);
    }

    #[test]
    fn test_broker_builder() {
        let broker = Broker::new(3, "10.0.0.3:33145".parse().unwrap())
            .with_kafka_endpoint(BrokerEndpoint::new("external", "10.0.0.3", 9092))
            .with_rack("rack-a")
            .with_cores(8);

        assert_eq!(broker.id, 3);
        assert_eq!(broker.properties.cores, 8);
        assert_eq!(broker.rack.as_deref(), Some("rack-a"));
        assert_eq!(broker.kafka_endpoints.len(), 1);
        assert!(broker.has_assigned_id());
    }

    #[test]
    fn test_broker_structural_equality() {
        let addr: SocketAddr = "10.0.0.3:33145".parse().unwrap();
        let a = Broker::new(3, addr).with_cores(8);
        let mut b = a.clone();
        assert_eq!(a, b);

        b.properties.cores = 4;
        assert_ne!(a, b);
    }

    #[test]
    fn test_unassigned_broker() {
        let broker = Broker::new(UNASSIGNED_NODE_ID, "10.0.0.9:33145".parse().unwrap());
        assert!(!broker.has_assigned_id());
    }
}
