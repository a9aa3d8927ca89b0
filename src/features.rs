//! Cluster feature gating
//!
//! A thin registry of cluster-wide feature flags. The membership subsystem
//! consults it for the node-id-assignment feature; the logical version is
//! what nodes advertise in join requests.

use parking_lot::RwLock;
use std::collections::HashSet;

/// Logical version advertised by this build in join requests
pub const LATEST_LOGICAL_VERSION: u32 = 7;

/// Cluster-wide feature flags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Feature {
    /// Controller-driven node id assignment from node UUIDs
    NodeIdAssignment,
}

/// Registry of currently active features
#[derive(Debug, Default)]
pub struct FeatureTable {
    active: RwLock<HashSet<Feature>>,
}

impl FeatureTable {
    /// Create a table with no active features
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a table with every feature active
    pub fn with_all_active() -> Self {
        let table = Self::new();
        table.activate(Feature::NodeIdAssignment);
        table
    }

    /// Whether a feature is active
    pub fn is_active(&self, feature: Feature) -> bool {
        self.active.read().contains(&feature)
    }

    /// Activate a feature
    pub fn activate(&self, feature: Feature) {
        self.active.write().insert(feature);
    }
}
