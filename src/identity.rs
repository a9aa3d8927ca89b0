//! Node identity registry
//!
//! Authoritative bidirectional mapping between node UUIDs and node ids,
//! hosted on the controller shard and mutated only through replicated
//! `register_node_uuid` commands, so every controller replica converges on
//! the same assignments. The map only grows; assignment is idempotent per
//! UUID.

use crate::types::{NodeId, NodeUuid, MAX_NODE_ID, UNASSIGNED_NODE_ID};
use std::collections::HashMap;
use tracing::{info, warn};

/// UUID → node id registry with monotonic id assignment
#[derive(Debug, Clone)]
pub struct IdentityRegistry {
    id_by_uuid: HashMap<NodeUuid, NodeId>,
    next_assigned_id: NodeId,
}

impl IdentityRegistry {
    /// Create an empty registry; assignment starts at id 1
    pub fn new() -> Self {
        Self {
            id_by_uuid: HashMap::new(),
            next_assigned_id: 1,
        }
    }

    /// Number of registered UUIDs
    pub fn len(&self) -> usize {
        self.id_by_uuid.len()
    }

    /// Whether the registry is empty
    pub fn is_empty(&self) -> bool {
        self.id_by_uuid.is_empty()
    }

    /// The id the next automatic assignment will start probing from
    pub fn next_assigned_id(&self) -> NodeId {
        self.next_assigned_id
    }

    /// Look up the id registered for a UUID
    pub fn lookup(&self, uuid: &NodeUuid) -> Option<NodeId> {
        self.id_by_uuid.get(uuid).copied()
    }

    /// Id registered for `uuid`.
    ///
    /// Registration must have completed before calling; an unknown UUID is
    /// an invariant violation.
    pub fn get(&self, uuid: &NodeUuid) -> NodeId {
        match self.id_by_uuid.get(uuid) {
            Some(id) => *id,
            None => panic!(
                "node registration must be completed before calling, uuid: {}",
                uuid
            ),
        }
    }

    /// Register `uuid` under an explicitly requested id.
    ///
    /// Returns true if the UUID is new (and is now registered) or already
    /// registered with the same id; false if the UUID is registered with a
    /// different id, or the id is already taken by a different UUID.
    /// Requesting the unassigned sentinel is an invariant violation.
    pub fn try_register(&mut self, requested_id: NodeId, uuid: NodeUuid) -> bool {
        assert!(
            requested_id != UNASSIGNED_NODE_ID,
            "invalid node id registration for uuid {}",
            uuid
        );
        match self.id_by_uuid.get(&uuid) {
            Some(existing) => *existing == requested_id,
            None => {
                if self.id_assigned(requested_id) {
                    return false;
                }
                info!(node_id = requested_id, %uuid, "registering node id for uuid");
                self.id_by_uuid.insert(uuid, requested_id);
                self.bump_next(requested_id);
                true
            }
        }
    }

    /// Return the id registered for `uuid`, assigning a fresh one if the
    /// UUID is unknown.
    ///
    /// `id_in_use` reports ids that must be skipped (members-table entries,
    /// both active and removed). Returns `None` when the id space is
    /// exhausted before a free id is found.
    pub fn get_or_assign(
        &mut self,
        uuid: NodeUuid,
        id_in_use: impl Fn(NodeId) -> bool,
    ) -> Option<NodeId> {
        if let Some(id) = self.id_by_uuid.get(&uuid) {
            return Some(*id);
        }

        while id_in_use(self.next_assigned_id) || self.id_assigned(self.next_assigned_id) {
            if self.next_assigned_id == MAX_NODE_ID {
                return None;
            }
            self.next_assigned_id += 1;
        }
        if self.next_assigned_id == MAX_NODE_ID {
            return None;
        }

        let assigned = self.next_assigned_id;
        self.next_assigned_id += 1;
        self.id_by_uuid.insert(uuid, assigned);
        info!(%uuid, node_id = assigned, "assigned node id to uuid");
        Some(assigned)
    }

    /// One-shot installation of a recovered uuid → id map.
    ///
    /// Overwriting a non-empty registry is an invariant violation. Advances
    /// the assignment counter past every installed id so removed seed
    /// servers are accounted for.
    pub fn bulk_install(&mut self, id_by_uuid: HashMap<NodeUuid, NodeId>) {
        assert!(
            self.id_by_uuid.is_empty(),
            "will not overwrite existing identity registry data"
        );
        if id_by_uuid.is_empty() {
            return;
        }
        for id in id_by_uuid.values() {
            self.bump_next(*id);
        }
        self.id_by_uuid = id_by_uuid;
        if self.next_assigned_id == MAX_NODE_ID {
            warn!("node id space exhausted by installed identity map");
        }
    }

    fn id_assigned(&self, id: NodeId) -> bool {
        self.id_by_uuid.values().any(|assigned| *assigned == id)
    }

    fn bump_next(&mut self, seen: NodeId) {
        if seen == MAX_NODE_ID {
            self.next_assigned_id = MAX_NODE_ID;
        } else {
            self.next_assigned_id = self.next_assigned_id.max(seen + 1);
        }
    }
}

impl Default for IdentityRegistry {
    fn default() -> Self {
        Self::new()
    }
}
