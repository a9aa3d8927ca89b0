//! Shared helpers for membership integration tests
//!
//! Provides in-process stubs for the two consumed collaborators: a raft-0
//! handle whose configuration and leadership the test controls, and a
//! loopback controller state machine that "replicates" a command by applying
//! it straight back through the members manager, the way a committed command
//! re-enters via the controller log.

#![allow(dead_code)]

use async_trait::async_trait;
use flotilla_cluster::{
    AbortSource, Broker, CommandBatch, ControllerRaft, ControllerStm, ErrorCode, FeatureTable,
    GroupConfiguration, LogOffset, MembersManager, NodeCommand, NodeConfig, NodeId, NodeUuid,
};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, OnceLock, Weak};
use std::time::Duration;

/// Controllable raft-0 stub
pub struct StubRaft {
    self_id: NodeId,
    inner: Mutex<StubRaftState>,
}

struct StubRaftState {
    config: GroupConfiguration,
    leader: Option<NodeId>,
    latest_cfg_offset: LogOffset,
}

impl StubRaft {
    pub fn new(self_id: NodeId) -> Arc<Self> {
        Arc::new(Self {
            self_id,
            inner: Mutex::new(StubRaftState {
                config: GroupConfiguration::default(),
                leader: None,
                latest_cfg_offset: -1,
            }),
        })
    }

    pub fn set_config(&self, config: GroupConfiguration) {
        self.inner.lock().config = config;
    }

    pub fn set_leader(&self, leader: Option<NodeId>) {
        self.inner.lock().leader = leader;
    }

    pub fn set_latest_configuration_offset(&self, offset: LogOffset) {
        self.inner.lock().latest_cfg_offset = offset;
    }
}

#[async_trait]
impl ControllerRaft for StubRaft {
    fn config(&self) -> GroupConfiguration {
        self.inner.lock().config.clone()
    }

    fn leader_id(&self) -> Option<NodeId> {
        self.inner.lock().leader
    }

    fn is_elected_leader(&self) -> bool {
        self.inner.lock().leader == Some(self.self_id)
    }

    fn latest_configuration_offset(&self) -> LogOffset {
        self.inner.lock().latest_cfg_offset
    }

    async fn add_group_members(&self, brokers: Vec<Broker>, _revision: i64) -> ErrorCode {
        let mut inner = self.inner.lock();
        let mut list = inner.config.brokers().to_vec();
        for broker in brokers {
            if list.iter().any(|b| b.id == broker.id) {
                return ErrorCode::InvalidNodeOperation;
            }
            list.push(broker);
        }
        inner.config = GroupConfiguration::new(list);
        ErrorCode::Success
    }

    async fn update_group_member(&self, broker: Broker) -> ErrorCode {
        let mut inner = self.inner.lock();
        let mut list = inner.config.brokers().to_vec();
        match list.iter_mut().find(|b| b.id == broker.id) {
            Some(slot) => {
                *slot = broker;
                inner.config = GroupConfiguration::new(list);
                ErrorCode::Success
            }
            None => ErrorCode::InvalidNodeOperation,
        }
    }
}

/// Loopback controller state machine: replication immediately applies the
/// command back through the attached manager at the next log offset.
pub struct LoopbackStm {
    manager: OnceLock<Weak<MembersManager>>,
    next_offset: AtomicI64,
}

impl LoopbackStm {
    pub fn new(first_offset: LogOffset) -> Arc<Self> {
        Arc::new(Self {
            manager: OnceLock::new(),
            next_offset: AtomicI64::new(first_offset),
        })
    }

    /// Wire the stm back to the manager it replicates into
    pub fn attach(&self, manager: &Arc<MembersManager>) {
        let _ = self.manager.set(Arc::downgrade(manager));
    }
}

#[async_trait]
impl ControllerStm for LoopbackStm {
    async fn replicate_and_wait(&self, cmd: NodeCommand, _timeout: Duration) -> ErrorCode {
        let Some(manager) = self.manager.get().and_then(Weak::upgrade) else {
            return ErrorCode::NoLeaderController;
        };
        let offset = self.next_offset.fetch_add(1, Ordering::SeqCst);
        manager.apply_update(CommandBatch::command(offset, cmd)).await
    }
}

/// One assembled node under test
pub struct TestNode {
    pub manager: Arc<MembersManager>,
    pub raft: Arc<StubRaft>,
    pub stm: Arc<LoopbackStm>,
    pub abort: AbortSource,
    pub node_uuid: NodeUuid,
}

impl TestNode {
    pub fn new(config: NodeConfig, features: FeatureTable) -> Self {
        Self::with_uuid(config, features, NodeUuid::random())
    }

    pub fn with_uuid(config: NodeConfig, features: FeatureTable, node_uuid: NodeUuid) -> Self {
        let raft = StubRaft::new(config.node_id);
        let stm = LoopbackStm::new(1000);
        let abort = AbortSource::new();
        let manager = MembersManager::new(
            &config,
            node_uuid,
            raft.clone(),
            stm.clone(),
            Arc::new(features),
            &abort,
        )
        .expect("valid test configuration");
        stm.attach(&manager);
        Self {
            manager,
            raft,
            stm,
            abort,
            node_uuid,
        }
    }
}

/// Broker record on a local loopback address that nothing listens on
pub fn test_broker(id: NodeId, port: u16) -> Broker {
    Broker::new(id, format!("127.0.0.1:{}", port).parse().unwrap())
}

/// Poll `predicate` until it holds or the deadline passes
pub async fn wait_until(deadline: Duration, mut predicate: impl FnMut() -> bool) -> bool {
    let start = std::time::Instant::now();
    while start.elapsed() < deadline {
        if predicate() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    predicate()
}
