//! Node-local configuration for the membership subsystem
//!
//! Values here are read once at construction; file formats and environment
//! lookup are the embedding application's concern.

use crate::types::{Broker, BrokerEndpoint, BrokerProperties, NodeId};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;

/// Default base for the jittered join retry interval
pub const DEFAULT_JOIN_RETRY_TIMEOUT_MS: u64 = 5000;

/// Default capacity of the node-update queue
pub const DEFAULT_MAX_UPDATES_QUEUE_SIZE: usize = 100;

/// Default shard count for the local replicas
pub const DEFAULT_SHARD_COUNT: usize = 4;

/// TLS settings for the controller RPC server and clients.
///
/// Carried through the connection layer; certificate negotiation itself is
/// handled by the transport.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RpcTlsConfig {
    /// Enable TLS for controller RPC
    pub enabled: bool,

    /// Path to the PEM certificate for this node
    pub cert_path: Option<PathBuf>,

    /// Path to the PEM private key for this node
    pub key_path: Option<PathBuf>,

    /// Path to the CA certificate used to verify peers
    pub ca_cert_path: Option<PathBuf>,
}

impl RpcTlsConfig {
    /// Validate the TLS configuration
    pub fn validate(&self) -> Result<(), String> {
        if !self.enabled {
            return Ok(());
        }
        if self.cert_path.is_none() {
            return Err("rpc TLS enabled but cert_path not provided".to_string());
        }
        if self.key_path.is_none() {
            return Err("rpc TLS enabled but key_path not provided".to_string());
        }
        Ok(())
    }
}

/// Configuration for a single node's membership manager
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Node id this broker advertises; `UNASSIGNED_NODE_ID` on first boot of
    /// a node relying on automatic id assignment
    pub node_id: NodeId,

    /// Address this node's controller RPC server listens on and advertises
    pub rpc_address: SocketAddr,

    /// Advertised kafka-protocol endpoints
    pub kafka_endpoints: Vec<BrokerEndpoint>,

    /// Optional rack identifier
    pub rack: Option<String>,

    /// Number of shards this broker runs
    pub cores: u32,

    /// Ordered seed-server list used while joining
    pub seed_servers: Vec<SocketAddr>,

    /// Base for the jittered retry interval between join rounds
    pub join_retry_timeout_ms: u64,

    /// Capacity of the node-update queue
    pub max_updates_queue_size: usize,

    /// Number of local shards hosting members-table and drain replicas
    pub shard_count: usize,

    /// TLS settings for controller RPC
    pub rpc_server_tls: RpcTlsConfig,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            node_id: 1,
            rpc_address: "127.0.0.1:33145".parse().expect("valid default address"),
            kafka_endpoints: Vec::new(),
            rack: None,
            cores: 1,
            seed_servers: Vec::new(),
            join_retry_timeout_ms: DEFAULT_JOIN_RETRY_TIMEOUT_MS,
            max_updates_queue_size: DEFAULT_MAX_UPDATES_QUEUE_SIZE,
            shard_count: DEFAULT_SHARD_COUNT,
            rpc_server_tls: RpcTlsConfig::default(),
        }
    }
}

impl NodeConfig {
    /// Create a config with the given node id
    pub fn new(node_id: NodeId) -> Self {
        Self {
            node_id,
            ..Default::default()
        }
    }

    /// Set the controller RPC address
    pub fn with_rpc_address(mut self, addr: SocketAddr) -> Self {
        self.rpc_address = addr;
        self
    }

    /// Add an advertised kafka-protocol endpoint
    pub fn with_kafka_endpoint(mut self, endpoint: BrokerEndpoint) -> Self {
        self.kafka_endpoints.push(endpoint);
        self
    }

    /// Set the rack identifier
    pub fn with_rack(mut self, rack: impl Into<String>) -> Self {
        self.rack = Some(rack.into());
        self
    }

    /// Set the shard count advertised in broker properties
    pub fn with_cores(mut self, cores: u32) -> Self {
        self.cores = cores;
        self
    }

    /// Set the seed-server list
    pub fn with_seed_servers(mut self, seeds: Vec<SocketAddr>) -> Self {
        self.seed_servers = seeds;
        self
    }

    /// Set the join retry base interval
    pub fn with_join_retry_timeout_ms(mut self, ms: u64) -> Self {
        self.join_retry_timeout_ms = ms;
        self
    }

    /// Set the local shard count
    pub fn with_shard_count(mut self, shards: usize) -> Self {
        self.shard_count = shards;
        self
    }

    /// Build the broker record this node advertises
    pub fn make_self_broker(&self) -> Broker {
        Broker {
            id: self.node_id,
            rpc_address: self.rpc_address,
            kafka_endpoints: self.kafka_endpoints.clone(),
            rack: self.rack.clone(),
            properties: BrokerProperties { cores: self.cores },
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.cores == 0 {
            return Err("cores must be greater than 0".to_string());
        }
        if self.shard_count == 0 {
            return Err("shard_count must be greater than 0".to_string());
        }
        if self.max_updates_queue_size == 0 {
            return Err("max_updates_queue_size must be greater than 0".to_string());
        }
        if self.join_retry_timeout_ms == 0 {
            return Err("join_retry_timeout_ms must be greater than 0".to_string());
        }
        self.rpc_server_tls.validate()?;
        Ok(())
    }
}
