#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

//! # Flotilla Cluster
//!
//! Cluster membership management for the Flotilla distributed streaming
//! log. On every node this crate is responsible for:
//!
//! - **Bootstrapping** the node's participation in the cluster via the
//!   seed-server join protocol
//! - **Node identity**: assigning and persisting stable node ids from node
//!   UUIDs, exactly once per UUID
//! - **Command application**: consuming committed membership commands from
//!   the replicated controller log and applying them identically on every
//!   local shard
//! - **Configuration reconciliation**: diffing replicated raft-0
//!   configurations against the local members view and converging the
//!   inter-node connection set
//! - **Node updates**: delivering ordered node lifecycle events to the
//!   downstream backend
//!
//! The consensus engine, partition allocation and drain mechanics live in
//! sibling subsystems; this crate consumes them through the interfaces in
//! [`raft`], [`allocator`] and [`drain`].
//!
//! ## Example
//!
//! ```no_run
//! use flotilla_cluster::{
//!     AbortSource, ControllerRaft, ControllerStm, FeatureTable, MembersManager, NodeConfig,
//!     NodeUuid,
//! };
//! use std::sync::Arc;
//!
//! async fn start(raft0: Arc<dyn ControllerRaft>, stm: Arc<dyn ControllerStm>) {
//!     let config = NodeConfig::new(1)
//!         .with_rpc_address("10.0.0.1:33145".parse().unwrap())
//!         .with_seed_servers(vec!["10.0.0.1:33145".parse().unwrap()]);
//!     let abort = AbortSource::new();
//!     let manager = MembersManager::new(
//!         &config,
//!         NodeUuid::random(),
//!         raft0,
//!         stm,
//!         Arc::new(FeatureTable::with_all_active()),
//!         &abort,
//!     )
//!     .unwrap();
//!
//!     manager.start().await;
//!     manager.join_cluster().await;
//! }
//! ```

pub mod allocator;
pub mod commands;
pub mod config;
pub mod connection_cache;
pub mod drain;
pub mod error;
pub mod features;
pub mod identity;
pub mod manager;
pub mod members_table;
pub mod raft;
pub mod rpc;
pub mod shard;
pub mod shutdown;
pub mod types;
pub mod update_channel;

pub use allocator::{AllocationNode, PartitionAllocator};
pub use commands::{
    BatchPayload, ChangedNodes, CommandBatch, NodeCommand, NodeUpdate, NodeUpdateType,
};
pub use config::{NodeConfig, RpcTlsConfig};
pub use connection_cache::ConnectionCache;
pub use drain::{DrainManager, DrainStatus};
pub use error::{ClusterError, ErrorCode, Result};
pub use features::{Feature, FeatureTable, LATEST_LOGICAL_VERSION};
pub use identity::IdentityRegistry;
pub use manager::{check_result_configuration, MembersManager};
pub use members_table::{MaintenanceState, MembershipState, MembersTable, NodeMetadata};
pub use raft::{
    ConfigurationState, ControllerRaft, ControllerStm, GroupConfiguration, OldConfigurationView,
};
pub use rpc::{
    ConfigurationUpdateReply, ConfigurationUpdateRequest, ControllerClient, ControllerRpcServer,
    HelloReply, HelloRequest, JoinNodeReply, JoinNodeRequest,
};
pub use shard::{Sharded, CONTROLLER_SHARD};
pub use shutdown::{AbortSource, AbortWatch, Gate};
pub use types::{
    Broker, BrokerEndpoint, BrokerProperties, LogOffset, NodeId, NodeUuid, MAX_NODE_ID,
    NODE_UUID_LEN, UNASSIGNED_NODE_ID,
};
pub use update_channel::UpdateChannel;
