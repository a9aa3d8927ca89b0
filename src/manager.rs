//! Cluster members manager
//!
//! The controller-shard singleton that bootstraps this node's cluster
//! membership, applies committed membership commands from the controller
//! log, keeps every shard's members view coherent with the replicated
//! configuration, and maintains the inter-node connection set.
//!
//! Three asynchronous worlds meet here: the replicated log delivering
//! ordered commands, the sharded local state that must apply them with
//! identical outcomes everywhere, and best-effort RPC exchanges with peers
//! that may fail, time out or race with leadership changes.

use crate::allocator::PartitionAllocator;
use crate::commands::{
    BatchPayload, ChangedNodes, CommandBatch, NodeCommand, NodeUpdate, NodeUpdateType,
};
use crate::config::NodeConfig;
use crate::connection_cache::ConnectionCache;
use crate::drain::{DrainManager, DrainStatus};
use crate::error::{ClusterError, ErrorCode, Result};
use crate::features::{Feature, FeatureTable, LATEST_LOGICAL_VERSION};
use crate::identity::IdentityRegistry;
use crate::members_table::{MembersTable, NodeMetadata};
use crate::raft::{ConfigurationState, ControllerRaft, ControllerStm, GroupConfiguration};
use crate::rpc::{
    ConfigurationUpdateReply, ConfigurationUpdateRequest, ControllerClient, HelloReply,
    HelloRequest, JoinNodeReply, JoinNodeRequest,
};
use crate::shard::{Sharded, CONTROLLER_SHARD};
use crate::shutdown::{AbortSource, AbortWatch, Gate};
use crate::types::{Broker, LogOffset, NodeId, NodeUuid, UNASSIGNED_NODE_ID};
use crate::update_channel::UpdateChannel;
use parking_lot::Mutex;
use rand::Rng;
use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, error, info, trace, warn};

/// Timeout for one-shot join and configuration-update RPCs
const JOIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Timeout for the startup hello handshake
const HELLO_TIMEOUT: Duration = Duration::from_secs(2);

/// Deadline for replicating a register-uuid command
const REPLICATE_TIMEOUT: Duration = Duration::from_secs(30);

/// State owned by each local shard
struct ShardState {
    members: MembersTable,
    drain: DrainManager,
    /// present only on the controller shard
    allocator: Option<PartitionAllocator>,
}

/// The cluster members manager
pub struct MembersManager {
    weak_self: Weak<MembersManager>,
    self_broker: Broker,
    node_uuid: NodeUuid,
    seed_servers: Vec<SocketAddr>,
    join_retry_base: Duration,
    raft0: Arc<dyn ControllerRaft>,
    stm: Arc<dyn ControllerStm>,
    features: Arc<FeatureTable>,
    shards: Sharded<ShardState>,
    connections: Arc<ConnectionCache>,
    identity: Mutex<IdentityRegistry>,
    update_queue: UpdateChannel,
    last_connection_update_offset: AtomicI64,
    apply_lock: tokio::sync::Mutex<()>,
    abort: AbortWatch,
    gate: Gate,
    start_time_ms: i64,
}

impl MembersManager {
    /// Build a members manager from the node-local configuration and its
    /// external collaborators.
    ///
    /// Must run inside a tokio runtime: the shard pool spawns its tasks
    /// here. The update queue subscribes to `abort` on construction.
    pub fn new(
        config: &NodeConfig,
        node_uuid: NodeUuid,
        raft0: Arc<dyn ControllerRaft>,
        stm: Arc<dyn ControllerStm>,
        features: Arc<FeatureTable>,
        abort: &AbortSource,
    ) -> Result<Arc<Self>> {
        config.validate().map_err(ClusterError::Config)?;
        let self_broker = config.make_self_broker();
        info!(broker = %self_broker, shards = config.shard_count, "creating members manager");

        let shards = Sharded::new(config.shard_count, |shard| ShardState {
            members: MembersTable::new(),
            drain: DrainManager::new(shard),
            allocator: (shard == CONTROLLER_SHARD).then(PartitionAllocator::new),
        });
        let connections = Arc::new(ConnectionCache::new(
            self_broker.id,
            config.rpc_server_tls.clone(),
        ));
        let start_time_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as i64)
            .unwrap_or(0);

        let update_queue = UpdateChannel::new(config.max_updates_queue_size, abort.watch());
        let seed_servers = config.seed_servers.clone();
        let join_retry_base = Duration::from_millis(config.join_retry_timeout_ms);
        let abort = abort.watch();
        Ok(Arc::new_cyclic(|weak| Self {
            weak_self: weak.clone(),
            self_broker,
            node_uuid,
            seed_servers,
            join_retry_base,
            raft0,
            stm,
            features,
            shards,
            connections,
            identity: Mutex::new(IdentityRegistry::new()),
            update_queue,
            last_connection_update_offset: AtomicI64::new(-1),
            apply_lock: tokio::sync::Mutex::new(()),
            abort,
            gate: Gate::new(),
            start_time_ms,
        }))
    }

    /// A strong reference to self for spawning background work.
    ///
    /// The manager is always owned by an `Arc` (see `new`), so upgrading
    /// cannot fail while a method runs on it.
    fn arc(&self) -> Arc<Self> {
        self.weak_self
            .upgrade()
            .expect("members manager methods run on an Arc-owned instance")
    }

    /// The broker record this node advertises
    pub fn self_broker(&self) -> &Broker {
        &self.self_broker
    }

    /// The connection cache holding peer controller clients
    pub fn connection_cache(&self) -> Arc<ConnectionCache> {
        self.connections.clone()
    }

    /// Offset of the configuration the connection pool reflects
    pub fn last_connection_update_offset(&self) -> LogOffset {
        self.last_connection_update_offset.load(Ordering::Acquire)
    }

    /// Start the manager: greet every known peer and align the connection
    /// offset with the latest committed configuration.
    ///
    /// The hello request lets an already-running peer react to this node
    /// starting; it is a best-effort optimization sent with a short timeout.
    pub async fn start(&self) {
        info!("starting members manager");
        for broker in self.raft0.config().brokers() {
            if broker.id == self.self_broker.id {
                continue;
            }
            let manager = self.arc();
            let broker = broker.clone();
            self.gate.spawn(async move {
                manager.initialize_broker_connection(broker).await;
            });
        }
        self.last_connection_update_offset
            .store(self.raft0.latest_configuration_offset(), Ordering::Release);
    }

    /// Close the gate and wait for background work to drain
    pub async fn stop(&self) {
        info!("stopping members manager");
        self.gate.close().await;
    }

    /// Drive this node into the cluster.
    ///
    /// A node that is already in the replicated configuration only checks
    /// whether its advertised record went stale while it was down; a new
    /// node starts the seed-server join loop in the background.
    pub async fn join_cluster(&self) {
        if self.is_already_member() {
            let manager = self.arc();
            self.gate.spawn(async move {
                manager.maybe_update_current_node_configuration().await;
            });
        } else {
            self.join_raft0();
        }
    }

    /// Whether this node is part of the replicated configuration
    pub fn is_already_member(&self) -> bool {
        self.raft0.config().contains_broker(self.self_broker.id)
    }

    /// Consume buffered node updates; see [`UpdateChannel::get_node_updates`]
    pub async fn get_node_updates(&self) -> Result<Vec<NodeUpdate>> {
        self.update_queue.get_node_updates().await
    }

    /// Id registered for `uuid`; registration must have completed
    pub fn get_node_id(&self, uuid: &NodeUuid) -> NodeId {
        self.identity.lock().get(uuid)
    }

    /// Id registered for `uuid`, if any
    pub fn lookup_node_id(&self, uuid: &NodeUuid) -> Option<NodeId> {
        self.identity.lock().lookup(uuid)
    }

    /// One-shot installation of a recovered uuid → id map
    pub fn apply_initial_node_uuid_map(&self, id_by_uuid: HashMap<NodeUuid, NodeId>) {
        if !id_by_uuid.is_empty() {
            debug!(entries = id_by_uuid.len(), "installing initial node uuid map");
        }
        self.identity.lock().bulk_install(id_by_uuid);
    }

    /// Controller-shard members view, cloned
    pub async fn members_snapshot(&self) -> MembersTable {
        self.shards
            .invoke_on(CONTROLLER_SHARD, |s| s.members.clone())
            .await
    }

    /// Allocator node registry, cloned
    pub async fn allocator_snapshot(&self) -> PartitionAllocator {
        self.shards
            .invoke_on(CONTROLLER_SHARD, |s| {
                s.allocator.clone().unwrap_or_default()
            })
            .await
    }

    /// Drain status of every shard, in shard order
    pub async fn drain_status(&self) -> Vec<DrainStatus> {
        self.shards.invoke_on_all(|s| s.drain.status()).await
    }

    // ---- command applier -------------------------------------------------

    /// Apply one committed controller-log batch.
    ///
    /// Batches arrive in log order; the lock keeps application strictly
    /// serial so all post-apply effects of a command land before the next
    /// command begins.
    pub async fn apply_update(&self, batch: CommandBatch) -> ErrorCode {
        let _guard = self.apply_lock.lock().await;
        let update_offset = batch.base_offset;
        match batch.payload {
            BatchPayload::RaftConfiguration(mut records) => {
                assert_eq!(
                    records.len(),
                    1,
                    "raft configuration batches are expected to have exactly one record, \
                     current batch contains {} records",
                    records.len()
                );
                let cfg = records.remove(0);
                self.handle_raft0_cfg_update(cfg, update_offset).await;
                ErrorCode::Success
            }
            BatchPayload::Command(cmd) => self.apply_command(update_offset, cmd).await,
        }
    }

    async fn apply_command(&self, update_offset: LogOffset, cmd: NodeCommand) -> ErrorCode {
        match cmd {
            NodeCommand::Decommission(id) => {
                let code = self
                    .dispatch_updates_to_shards(update_offset, NodeCommand::Decommission(id))
                    .await;
                if code.is_success() {
                    self.shards
                        .invoke_on(CONTROLLER_SHARD, move |s| {
                            if let Some(allocator) = s.allocator.as_mut() {
                                allocator.decommission_node(id);
                            }
                        })
                        .await;
                    self.push_update(NodeUpdate {
                        id,
                        update_type: NodeUpdateType::Decommissioned,
                        offset: update_offset,
                    })
                    .await;
                }
                code
            }
            NodeCommand::Recommission(id) => {
                // a demoted voter that is already in flight for removal must
                // not be recommissioned
                let cfg = self.raft0.config();
                if cfg.state() == ConfigurationState::Joint
                    && cfg
                        .old_config()
                        .map(|old| old.learners.contains(&id))
                        .unwrap_or(false)
                {
                    return ErrorCode::InvalidNodeOperation;
                }

                let code = self
                    .dispatch_updates_to_shards(update_offset, NodeCommand::Recommission(id))
                    .await;
                if code.is_success() {
                    self.shards
                        .invoke_on(CONTROLLER_SHARD, move |s| {
                            if let Some(allocator) = s.allocator.as_mut() {
                                allocator.recommission_node(id);
                            }
                        })
                        .await;
                    self.push_update(NodeUpdate {
                        id,
                        update_type: NodeUpdateType::Recommissioned,
                        offset: update_offset,
                    })
                    .await;
                }
                code
            }
            NodeCommand::FinishReallocations(id) => {
                // only the node-update backend consumes this signal; the
                // members table is not involved
                self.push_update(NodeUpdate {
                    id,
                    update_type: NodeUpdateType::ReallocationFinished,
                    offset: update_offset,
                })
                .await;
                ErrorCode::Success
            }
            NodeCommand::MaintenanceMode { id, enabled } => {
                let code = self
                    .dispatch_updates_to_shards(
                        update_offset,
                        NodeCommand::MaintenanceMode { id, enabled },
                    )
                    .await;
                if code.is_success() && id == self.self_broker.id {
                    self.shards
                        .invoke_on_all(move |s| {
                            if enabled {
                                s.drain.drain();
                            } else {
                                s.drain.restore();
                            }
                        })
                        .await;
                }
                code
            }
            NodeCommand::RegisterNodeUuid { uuid, id } => match id {
                Some(requested) => {
                    info!(%uuid, node_id = requested, "applying registration of node uuid");
                    if self.identity.lock().try_register(requested, uuid) {
                        ErrorCode::Success
                    } else {
                        warn!(
                            %uuid,
                            node_id = requested,
                            "could not register node uuid, node id already taken"
                        );
                        ErrorCode::JoinRequestDispatchError
                    }
                }
                None => {
                    info!(%uuid, "applying registration of node uuid with id assignment");
                    let in_use: HashSet<NodeId> = self
                        .shards
                        .invoke_on(CONTROLLER_SHARD, |s| {
                            s.members
                                .nodes()
                                .keys()
                                .copied()
                                .chain(s.members.removed_node_ids())
                                .collect()
                        })
                        .await;
                    match self
                        .identity
                        .lock()
                        .get_or_assign(uuid, |id| in_use.contains(&id))
                    {
                        Some(assigned) => {
                            info!(%uuid, node_id = assigned, "node uuid has node id");
                            ErrorCode::Success
                        }
                        None => {
                            error!("no more node ids to assign");
                            ErrorCode::InvalidNodeOperation
                        }
                    }
                }
            },
        }
    }

    /// Fan a command out to every shard's members table and check that all
    /// replicas agreed on the outcome.
    async fn dispatch_updates_to_shards(
        &self,
        update_offset: LogOffset,
        cmd: NodeCommand,
    ) -> ErrorCode {
        let results = self
            .shards
            .invoke_on_all(move |s| s.members.apply(update_offset, &cmd))
            .await;
        let sentinel = results[0];
        assert!(
            results.iter().all(|code| *code == sentinel),
            "state inconsistency across shards detected, expected result: {}, have: {:?}",
            sentinel,
            results
        );
        sentinel
    }

    async fn push_update(&self, update: NodeUpdate) {
        if self.update_queue.push_eventually(update).await.is_err() {
            debug!(%update, "update queue aborted, dropping node update");
        }
    }

    // ---- configuration reconciler ----------------------------------------

    /// React to a committed raft-0 configuration at `update_offset`
    async fn handle_raft0_cfg_update(&self, cfg: GroupConfiguration, update_offset: LogOffset) {
        debug!(
            offset = update_offset,
            brokers = cfg.brokers().len(),
            "updating cluster configuration"
        );
        let brokers = cfg.brokers().to_vec();

        {
            let brokers = brokers.clone();
            self.shards
                .invoke_on(CONTROLLER_SHARD, move |s| {
                    if let Some(allocator) = s.allocator.as_mut() {
                        allocator.update_allocation_nodes(&brokers);
                    }
                })
                .await;
        }

        let diff = {
            let cfg = cfg.clone();
            self.shards
                .invoke_on(CONTROLLER_SHARD, move |s| {
                    calculate_changed_nodes(&s.members, &cfg)
                })
                .await
        };
        let added_nodes = diff.added.clone();

        {
            let brokers = brokers.clone();
            self.shards
                .invoke_on_all(move |s| s.members.update_brokers(update_offset, &brokers))
                .await;
        }

        // a replayed configuration must not churn the connection pool or
        // re-emit events
        if update_offset <= self.last_connection_update_offset.load(Ordering::Acquire) {
            return;
        }
        self.update_connections(diff);
        self.last_connection_update_offset
            .store(update_offset, Ordering::Release);

        for broker in added_nodes {
            self.push_update(NodeUpdate {
                id: broker.id,
                update_type: NodeUpdateType::Added,
                offset: update_offset,
            })
            .await;
        }
    }

    /// Reconcile the connection cache with a computed diff, skipping self
    fn update_connections(&self, changed: ChangedNodes) {
        let self_id = self.self_broker.id;
        for id in changed.removed {
            if id == self_id {
                continue;
            }
            self.connections.remove_broker_client(id);
        }
        for broker in changed.added.into_iter().chain(changed.updated) {
            if broker.id == self_id {
                continue;
            }
            self.connections
                .update_broker_client(broker.id, broker.rpc_address);
        }
    }

    /// Retry loop that delivers this node's updated broker record to the
    /// cluster. Right after a restart the node may not know the current
    /// leader (its own address may be what changed), so the request goes to
    /// any broker, which forwards it. Terminates only on success or abort.
    pub async fn dispatch_configuration_update(&self, broker: Broker) -> Result<()> {
        loop {
            let brokers = self.raft0.config().brokers().to_vec();
            if brokers.is_empty() {
                self.abort.sleep(self.join_retry_base).await?;
                continue;
            }
            let target = pick_update_target(self.raft0.leader_id(), &brokers);
            match self
                .do_dispatch_configuration_update(&target, broker.clone())
                .await
            {
                Ok(reply) if reply.success => return Ok(()),
                Ok(_) => {
                    debug!(target = %target, "configuration update rejected, retrying");
                    self.abort.sleep(self.join_retry_base).await?;
                }
                Err(e) => {
                    debug!(target = %target, error = %e, "configuration update failed, retrying");
                    self.abort.sleep(self.join_retry_base).await?;
                }
            }
        }
    }

    async fn do_dispatch_configuration_update(
        &self,
        target: &Broker,
        updated: Broker,
    ) -> Result<ConfigurationUpdateReply> {
        if target.id == self.self_broker.id {
            return self
                .handle_configuration_update_request(ConfigurationUpdateRequest {
                    node: updated,
                    target_node: self.self_broker.id,
                })
                .await;
        }
        trace!(target = %target, "dispatching configuration update request");
        let client = self
            .connections
            .get_or_create(target.id, target.rpc_address)
            .with_timeout(JOIN_TIMEOUT);
        client
            .update_node_configuration(ConfigurationUpdateRequest {
                node: updated,
                target_node: target.id,
            })
            .await
    }

    /// Handle a configuration update addressed to this node.
    ///
    /// Validates the new record against the members view, refreshes the
    /// local connection for the updated broker, then applies the change on
    /// raft-0 (directly when leader, forwarded otherwise).
    pub async fn handle_configuration_update_request(
        &self,
        req: ConfigurationUpdateRequest,
    ) -> Result<ConfigurationUpdateReply> {
        if req.target_node != self.self_broker.id {
            warn!(
                self_id = self.self_broker.id,
                target = req.target_node,
                "ignoring configuration update addressed to a different node"
            );
            return Ok(ConfigurationUpdateReply { success: false });
        }
        trace!(node_id = req.node.id, "handling node configuration update");

        let current = self
            .shards
            .invoke_on(CONTROLLER_SHARD, |s| s.members.nodes().clone())
            .await;
        if let Some(reason) = check_result_configuration(&current, &req.node) {
            warn!(
                node_id = req.node.id,
                reason = %reason,
                "rejecting invalid configuration update"
            );
            return Err(ErrorCode::InvalidConfigurationUpdate.into());
        }

        self.update_connections(ChangedNodes {
            updated: vec![req.node.clone()],
            ..Default::default()
        });

        let Some(leader_id) = self.raft0.leader_id() else {
            warn!(
                node_id = req.node.id,
                "unable to handle configuration update, no leader controller"
            );
            return Err(ErrorCode::NoLeaderController.into());
        };

        if leader_id == self.self_broker.id {
            let code = self.raft0.update_group_member(req.node).await;
            if code.is_success() {
                return Ok(ConfigurationUpdateReply { success: true });
            }
            warn!(error = %code, "unable to handle configuration update");
            return Err(code.into());
        }

        let leader = self
            .shards
            .invoke_on(CONTROLLER_SHARD, move |s| {
                s.members
                    .get_node_metadata(leader_id)
                    .map(|m| m.broker.clone())
            })
            .await;
        let Some(leader) = leader else {
            return Err(ErrorCode::NoLeaderController.into());
        };

        let client = self
            .connections
            .get_or_create(leader_id, leader.rpc_address)
            .with_timeout(JOIN_TIMEOUT);
        client
            .update_node_configuration(ConfigurationUpdateRequest {
                node: req.node,
                target_node: leader_id,
            })
            .await
            .map_err(|e| match e {
                ClusterError::Code(code) => ClusterError::Code(code),
                other => {
                    warn!(error = %other, "error while dispatching configuration update request");
                    ErrorCode::JoinRequestDispatchError.into()
                }
            })
    }

    // ---- join coordinator ------------------------------------------------

    /// Handle an inbound join request.
    ///
    /// Followers forward to the leader. On the leader, node identity is
    /// settled first (registering the UUID through the controller log when
    /// needed), then the broker is added to raft-0 or, if already present,
    /// treated as a configuration update.
    pub async fn handle_join_request(&self, req: JoinNodeRequest) -> Result<JoinNodeReply> {
        let node_id_assignment = self.features.is_active(Feature::NodeIdAssignment);
        let has_uuid = !req.node_uuid.is_empty();
        if node_id_assignment && !has_uuid {
            warn!(
                node_id = req.node.id,
                "invalid join request, node uuid is required"
            );
            return Err(ErrorCode::InvalidRequest.into());
        }

        let req_node_id = (req.node.id != UNASSIGNED_NODE_ID).then_some(req.node.id);
        if !node_id_assignment && req_node_id.is_none() {
            warn!("got request to assign node id, but feature is not active");
            return Err(ErrorCode::InvalidRequest.into());
        }

        let node_uuid = if has_uuid {
            match NodeUuid::from_slice(&req.node_uuid) {
                Some(uuid) => Some(uuid),
                None => {
                    warn!(
                        len = req.node_uuid.len(),
                        "invalid join request, expected node uuid or empty"
                    );
                    return Err(ErrorCode::InvalidRequest.into());
                }
            }
        } else {
            None
        };
        if req_node_id.is_none() && node_uuid.is_none() {
            warn!("node id assignment attempt had no node uuid");
            return Err(ErrorCode::InvalidRequest.into());
        }

        info!(
            node_id = req.node.id,
            uuid = %node_uuid.map(|u| u.to_string()).unwrap_or_else(|| "none".to_string()),
            version = req.logical_version,
            "processing node join request"
        );

        if !self.raft0.is_elected_leader() {
            debug!("not the leader, dispatching join request to leader node");
            return self.forward_join_to_leader(req).await.map_err(|e| match e {
                ClusterError::Code(code) => ClusterError::Code(code),
                other => {
                    warn!(error = %other, "error while dispatching join request to leader node");
                    ErrorCode::JoinRequestDispatchError.into()
                }
            });
        }

        if let (true, Some(uuid)) = (node_id_assignment, node_uuid) {
            let registered = self.identity.lock().lookup(&uuid);
            match (req_node_id, registered) {
                (None, None) => {
                    // register the uuid and reply with the assigned id; the
                    // node is expected to come back with a follow-up join
                    // request once its raft subsystems run under that id
                    return self.replicate_new_node_uuid(uuid, None).await;
                }
                (None, Some(id)) => {
                    // duplicate assignment request; return the registered id
                    return Ok(JoinNodeReply { success: true, id });
                }
                (Some(requested), None) => {
                    let reply = self.replicate_new_node_uuid(uuid, Some(requested)).await?;
                    if !reply.success {
                        return Ok(reply);
                    }
                }
                (Some(requested), Some(registered)) => {
                    if requested != registered {
                        return Ok(JoinNodeReply {
                            success: false,
                            id: UNASSIGNED_NODE_ID,
                        });
                    }
                    let removed = self
                        .shards
                        .invoke_on(CONTROLLER_SHARD, move |s| {
                            s.members.get_removed_node_metadata(registered).is_some()
                        })
                        .await;
                    if removed {
                        warn!(
                            node_id = registered,
                            %uuid,
                            "preventing decommissioned node from rejoining the cluster"
                        );
                        return Ok(JoinNodeReply {
                            success: false,
                            id: UNASSIGNED_NODE_ID,
                        });
                    }
                }
            }
        }

        // identity settled; a broker already in the configuration only needs
        // its record refreshed
        if self.raft0.config().contains_broker(req.node.id) {
            info!(
                node_id = req.node.id,
                "broker is already a cluster member, updating configuration"
            );
            let node_id = req.node.id;
            let reply = self
                .handle_configuration_update_request(ConfigurationUpdateRequest {
                    node: req.node,
                    target_node: self.self_broker.id,
                })
                .await?;
            return Ok(JoinNodeReply {
                success: reply.success,
                id: if reply.success {
                    node_id
                } else {
                    UNASSIGNED_NODE_ID
                },
            });
        }

        // legacy clusters cannot host two nodes behind one rpc address
        if !node_id_assignment && self.raft0.config().contains_address(&req.node.rpc_address) {
            info!(
                node_id = req.node.id,
                addr = %req.node.rpc_address,
                "broker address conflicts with the address of another node"
            );
            return Ok(JoinNodeReply {
                success: false,
                id: UNASSIGNED_NODE_ID,
            });
        }

        if req.node.id != self.self_broker.id {
            self.connections
                .update_broker_client(req.node.id, req.node.rpc_address);
        }

        // raft0 does not use revisions; membership works like a revisionless
        // protocol at revision 0
        let code = self.raft0.add_group_members(vec![req.node.clone()], 0).await;
        if code.is_success() {
            Ok(JoinNodeReply {
                success: true,
                id: req.node.id,
            })
        } else {
            warn!(broker = %req.node, error = %code, "error adding node to cluster");
            Err(code.into())
        }
    }

    async fn forward_join_to_leader(&self, req: JoinNodeRequest) -> Result<JoinNodeReply> {
        let Some(leader_id) = self.raft0.leader_id() else {
            return Err(ErrorCode::NoLeaderController.into());
        };
        let Some(leader) = self.raft0.config().find_broker(leader_id).cloned() else {
            return Err(ErrorCode::NoLeaderController.into());
        };
        let client = self
            .connections
            .get_or_create(leader_id, leader.rpc_address)
            .with_timeout(JOIN_TIMEOUT);
        client.join_node(req).await
    }

    /// Replicate a register-uuid command and reply with the resulting id
    async fn replicate_new_node_uuid(
        &self,
        uuid: NodeUuid,
        requested_id: Option<NodeId>,
    ) -> Result<JoinNodeReply> {
        debug!(%uuid, requested = ?requested_id, "replicating registration of node uuid");
        let code = self
            .stm
            .replicate_and_wait(
                NodeCommand::RegisterNodeUuid {
                    uuid,
                    id: requested_id,
                },
                REPLICATE_TIMEOUT,
            )
            .await;
        debug!(%uuid, %code, "registration replication completed");
        if !code.is_success() {
            return Err(code.into());
        }

        let assigned = self.get_node_id(&uuid);
        if let Some(requested) = requested_id {
            if assigned != requested {
                warn!(
                    %uuid,
                    requested,
                    assigned,
                    "node registration completed but uuid already assigned"
                );
                return Err(ErrorCode::InvalidRequest.into());
            }
        }
        Ok(JoinNodeReply {
            success: true,
            id: assigned,
        })
    }

    fn join_raft0(&self) {
        let manager = self.arc();
        self.gate.spawn(async move {
            debug!("trying to join the cluster");
            loop {
                let req = JoinNodeRequest {
                    logical_version: LATEST_LOGICAL_VERSION,
                    node_uuid: manager.node_uuid.to_vec(),
                    node: manager.self_broker.clone(),
                };
                let result = manager.dispatch_join_to_seed_servers(&req).await;
                let success = matches!(&result, Ok(reply) if reply.success);
                if success
                    || manager.gate.is_closed()
                    || manager.abort.is_aborted()
                    || manager.is_already_member()
                {
                    break;
                }

                let delay = manager.next_join_retry_interval();
                info!(
                    delay_ms = delay.as_millis() as u64,
                    "next cluster join attempt"
                );
                if manager.abort.sleep(delay).await.is_err() {
                    debug!("aborting join sequence");
                    return;
                }
            }

            if manager.is_already_member() {
                manager.maybe_update_current_node_configuration().await;
            }
        });
    }

    /// Walk the seed-server list once, servicing the join locally when a
    /// seed is this node
    async fn dispatch_join_to_seed_servers(&self, req: &JoinNodeRequest) -> Result<JoinNodeReply> {
        for seed in &self.seed_servers {
            let result = if *seed == self.self_broker.rpc_address {
                debug!("using current node as a seed server");
                self.handle_join_request(req.clone()).await
            } else {
                info!(seed = %seed, "sending join request to seed server");
                self.dispatch_join_to_remote(*seed, req.clone()).await
            };
            match result {
                Ok(reply) if reply.success => return Ok(reply),
                Ok(_) => {
                    warn!(seed = %seed, "not allowed to join the cluster using seed server");
                }
                Err(e) => {
                    warn!(seed = %seed, error = %e, "error joining cluster using seed server");
                }
            }
        }
        Err(ErrorCode::SeedServersExhausted.into())
    }

    async fn dispatch_join_to_remote(
        &self,
        seed: SocketAddr,
        req: JoinNodeRequest,
    ) -> Result<JoinNodeReply> {
        // seed servers are dialed one-shot, before they have cache entries
        let client = ControllerClient::new(seed, self.connections.tls().clone())
            .with_timeout(JOIN_TIMEOUT);
        client.join_node(req).await
    }

    fn next_join_retry_interval(&self) -> Duration {
        let base = self.join_retry_base.as_millis() as u64;
        let jitter = rand::thread_rng().gen_range(0..=base / 2);
        Duration::from_millis(base + jitter)
    }

    /// Compare the advertised broker record with the replicated one and
    /// dispatch a configuration update if they differ. Best effort: errors
    /// are logged and swallowed, an abort exits silently.
    async fn maybe_update_current_node_configuration(&self) {
        let active = self
            .raft0
            .config()
            .find_broker(self.self_broker.id)
            .cloned()
            .expect("current broker is expected to be present in members configuration");

        if active == self.self_broker {
            return;
        }
        debug!(
            from = %active,
            to = %self.self_broker,
            "broker configuration changed"
        );
        match self
            .dispatch_configuration_update(self.self_broker.clone())
            .await
        {
            Ok(()) => info!("node configuration updated successfully"),
            Err(ClusterError::Aborted) => {}
            Err(e) => error!(error = %e, "unable to update node configuration"),
        }
    }

    // ---- startup hello ---------------------------------------------------

    async fn initialize_broker_connection(&self, broker: Broker) {
        self.connections
            .update_broker_client(broker.id, broker.rpc_address);
        let Some(client) = self.connections.client_for(broker.id) else {
            return;
        };
        let req = HelloRequest {
            peer: self.self_broker.id,
            start_time_ms: self.start_time_ms,
        };
        match client.with_timeout(HELLO_TIMEOUT).hello(req).await {
            Ok(reply) if !reply.error.is_success() => {
                info!(
                    node_id = broker.id,
                    error = %reply.error,
                    "hello response contained error"
                );
            }
            Ok(_) => {}
            Err(e) => {
                info!(
                    node_id = broker.id,
                    error = %e,
                    "node did not respond to hello message"
                );
            }
        }
    }

    /// Serve a peer's hello greeting
    pub async fn handle_hello(&self, req: HelloRequest) -> HelloReply {
        debug!(
            peer = req.peer,
            start_time_ms = req.start_time_ms,
            "received hello from peer"
        );
        HelloReply {
            error: ErrorCode::Success,
        }
    }
}

/// Diff a committed configuration against one shard's members view
fn calculate_changed_nodes(members: &MembersTable, cfg: &GroupConfiguration) -> ChangedNodes {
    let mut diff = ChangedNodes::default();
    for cfg_broker in cfg.brokers() {
        match members.get_node_metadata(cfg_broker.id) {
            None => diff.added.push(cfg_broker.clone()),
            Some(node) if node.broker != *cfg_broker => diff.updated.push(cfg_broker.clone()),
            Some(_) => {}
        }
    }
    for id in members.nodes().keys() {
        if !cfg.contains_broker(*id) {
            diff.removed.push(*id);
        }
    }
    diff
}

/// Pick the broker a configuration update is sent to: the leader when it is
/// known and present, otherwise a uniformly random broker.
///
/// `brokers` must be non-empty.
fn pick_update_target(leader: Option<NodeId>, brokers: &[Broker]) -> Broker {
    if let Some(leader_id) = leader {
        if let Some(broker) = brokers.iter().find(|b| b.id == leader_id) {
            return broker.clone();
        }
    }
    brokers[rand::thread_rng().gen_range(0..brokers.len())].clone()
}

/// Validate a configuration update against the current members view.
///
/// The updated node must not decrease its core count; against every other
/// node, the new rpc address and each new kafka endpoint must be distinct.
/// Returns the rejection reason, or `None` when the update is acceptable.
pub fn check_result_configuration(
    current_nodes: &HashMap<NodeId, NodeMetadata>,
    to_update: &Broker,
) -> Option<String> {
    for (id, node) in current_nodes {
        if *id == to_update.id {
            if node.broker.properties.cores > to_update.properties.cores {
                return Some("core count must not decrease on any broker".to_string());
            }
            continue;
        }

        if node.broker.rpc_address == to_update.rpc_address {
            return Some(format!(
                "duplicate rpc endpoint {} with existing node {}",
                to_update.rpc_address, id
            ));
        }
        for current_ep in &node.broker.kafka_endpoints {
            if to_update.kafka_endpoints.iter().any(|ep| ep == current_ep) {
                return Some(format!(
                    "duplicate kafka advertised endpoint {} with existing node {}",
                    current_ep, id
                ));
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::members_table::{MaintenanceState, MembershipState};
    use crate::types::BrokerEndpoint;

    fn metadata(broker: Broker) -> NodeMetadata {
        NodeMetadata {
            broker,
            membership: MembershipState::Active,
            maintenance: MaintenanceState::Inactive,
        }
    }

    fn nodes(brokers: Vec<Broker>) -> HashMap<NodeId, NodeMetadata> {
        brokers
            .into_iter()
            .map(|b| (b.id, metadata(b)))
            .collect()
    }

    #[test]
    fn test_check_result_configuration_accepts_valid_update() {
        let current = nodes(vec![
            Broker::new(1, "10.0.0.1:33145".parse().unwrap()).with_cores(8),
            Broker::new(2, "10.0.0.2:33145".parse().unwrap()),
        ]);
        let update = Broker::new(1, "10.0.0.10:33145".parse().unwrap()).with_cores(8);
        assert_eq!(check_result_configuration(&current, &update), None);
    }

    #[test]
    fn test_check_result_configuration_rejects_core_decrease() {
        let current = nodes(vec![
            Broker::new(1, "10.0.0.1:33145".parse().unwrap()).with_cores(8)
        ]);
        let update = Broker::new(1, "10.0.0.1:33145".parse().unwrap()).with_cores(4);
        let reason = check_result_configuration(&current, &update).unwrap();
        assert!(reason.contains("core count"));
    }

    #[test]
    fn test_check_result_configuration_allows_core_increase() {
        let current = nodes(vec![
            Broker::new(1, "10.0.0.1:33145".parse().unwrap()).with_cores(8)
        ]);
        let update = Broker::new(1, "10.0.0.1:33145".parse().unwrap()).with_cores(16);
        assert_eq!(check_result_configuration(&current, &update), None);
    }

    #[test]
    fn test_check_result_configuration_rejects_duplicate_rpc_address() {
        let current = nodes(vec![
            Broker::new(2, "10.0.0.2:33145".parse().unwrap())
        ]);
        let update = Broker::new(3, "10.0.0.2:33145".parse().unwrap());
        let reason = check_result_configuration(&current, &update).unwrap();
        assert!(reason.contains("duplicate rpc endpoint"));
    }

    #[test]
    fn test_check_result_configuration_rejects_duplicate_kafka_endpoint() {
        let current = nodes(vec![Broker::new(2, "10.0.0.2:33145".parse().unwrap())
            .with_kafka_endpoint(BrokerEndpoint::new("external", "10.0.0.2", 9092))]);
        let update = Broker::new(3, "10.0.0.3:33145".parse().unwrap())
            .with_kafka_endpoint(BrokerEndpoint::new("external", "10.0.0.2", 9092));
        let reason = check_result_configuration(&current, &update).unwrap();
        assert!(reason.contains("duplicate kafka advertised endpoint"));
    }

    #[test]
    fn test_pick_update_target_prefers_known_leader() {
        let brokers = vec![
            Broker::new(1, "10.0.0.1:33145".parse().unwrap()),
            Broker::new(2, "10.0.0.2:33145".parse().unwrap()),
        ];
        let target = pick_update_target(Some(2), &brokers);
        assert_eq!(target.id, 2);
    }

    #[test]
    fn test_pick_update_target_falls_back_to_random_member() {
        let brokers = vec![
            Broker::new(1, "10.0.0.1:33145".parse().unwrap()),
            Broker::new(2, "10.0.0.2:33145".parse().unwrap()),
        ];
        // leader unknown or not in the broker list
        for leader in [None, Some(9)] {
            let target = pick_update_target(leader, &brokers);
            assert!(brokers.iter().any(|b| b.id == target.id));
        }
    }

    #[test]
    fn test_calculate_changed_nodes() {
        let mut members = MembersTable::new();
        members.update_brokers(
            1,
            &[
                Broker::new(1, "10.0.0.1:33145".parse().unwrap()),
                Broker::new(2, "10.0.0.2:33145".parse().unwrap()),
            ],
        );

        let cfg = GroupConfiguration::new(vec![
            Broker::new(1, "10.0.0.1:33145".parse().unwrap()),
            // node 2 dropped, node 3 added, node 1 unchanged
            Broker::new(3, "10.0.0.3:33145".parse().unwrap()),
        ]);

        let diff = calculate_changed_nodes(&members, &cfg);
        assert_eq!(diff.added.len(), 1);
        assert_eq!(diff.added[0].id, 3);
        assert!(diff.updated.is_empty());
        assert_eq!(diff.removed, vec![2]);
    }

    #[test]
    fn test_calculate_changed_nodes_detects_attribute_change() {
        let mut members = MembersTable::new();
        members.update_brokers(
            1,
            &[Broker::new(1, "10.0.0.1:33145".parse().unwrap()).with_cores(4)],
        );

        let cfg = GroupConfiguration::new(vec![
            Broker::new(1, "10.0.0.1:33145".parse().unwrap()).with_cores(8)
        ]);

        let diff = calculate_changed_nodes(&members, &cfg);
        assert!(diff.added.is_empty());
        assert_eq!(diff.updated.len(), 1);
        assert_eq!(diff.updated[0].properties.cores, 8);
        assert!(diff.removed.is_empty());
    }
}
