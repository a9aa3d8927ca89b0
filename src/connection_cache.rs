//! Connection cache for peer controller endpoints
//!
//! Maps node ids to controller RPC clients. The configuration reconciler is
//! the single writer: entries are created when a node is added, refreshed
//! when its address changes and torn down when it leaves the configuration.

use crate::config::RpcTlsConfig;
use crate::rpc::ControllerClient;
use crate::types::NodeId;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::net::SocketAddr;
use tracing::{debug, info};

/// Cache of controller clients keyed by peer node id
#[derive(Debug)]
pub struct ConnectionCache {
    self_id: NodeId,
    tls: RpcTlsConfig,
    clients: RwLock<HashMap<NodeId, ControllerClient>>,
}

impl ConnectionCache {
    /// Create an empty cache for this node
    pub fn new(self_id: NodeId, tls: RpcTlsConfig) -> Self {
        Self {
            self_id,
            tls,
            clients: RwLock::new(HashMap::new()),
        }
    }

    /// Id of the local node; never cached
    pub fn self_id(&self) -> NodeId {
        self.self_id
    }

    /// TLS settings used for every client built by this cache
    pub fn tls(&self) -> &RpcTlsConfig {
        &self.tls
    }

    /// Create or refresh the client for a peer.
    ///
    /// Replacing an entry drops the previous client, so a changed address
    /// takes effect on the next call.
    pub fn update_broker_client(&self, id: NodeId, addr: SocketAddr) {
        debug_assert!(id != self.self_id, "must not cache a client for self");
        let client = ControllerClient::new(addr, self.tls.clone());
        let replaced = self.clients.write().insert(id, client).is_some();
        if replaced {
            info!(node_id = id, %addr, "refreshed controller client");
        } else {
            info!(node_id = id, %addr, "created controller client");
        }
    }

    /// Drop the client for a peer that left the configuration
    pub fn remove_broker_client(&self, id: NodeId) {
        if self.clients.write().remove(&id).is_some() {
            info!(node_id = id, "removed controller client");
        }
    }

    /// Client for a peer, if one is cached
    pub fn client_for(&self, id: NodeId) -> Option<ControllerClient> {
        self.clients.read().get(&id).cloned()
    }

    /// Client for a peer, creating one from `addr` if missing
    pub fn get_or_create(&self, id: NodeId, addr: SocketAddr) -> ControllerClient {
        if let Some(client) = self.client_for(id) {
            return client;
        }
        debug!(node_id = id, %addr, "creating controller client on demand");
        self.update_broker_client(id, addr);
        ControllerClient::new(addr, self.tls.clone())
    }

    /// Whether a peer has a cached client
    pub fn contains(&self, id: NodeId) -> bool {
        self.clients.read().contains_key(&id)
    }

    /// Ids of all cached peers
    pub fn node_ids(&self) -> Vec<NodeId> {
        self.clients.read().keys().copied().collect()
    }
}
