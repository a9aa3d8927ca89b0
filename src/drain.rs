//! Per-shard drain manager
//!
//! Maintenance mode drains a node's responsibilities shard by shard. The
//! mechanics of moving leadership and traffic away live elsewhere; this
//! replica tracks the drain state the membership manager toggles.

use tracing::info;

/// Drain status of one shard
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainStatus {
    /// Normal operation
    Restored,

    /// Shard is draining or drained
    Draining,
}

/// One shard's drain manager replica
#[derive(Debug, Clone)]
pub struct DrainManager {
    shard: usize,
    status: DrainStatus,
}

impl DrainManager {
    /// Create a restored drain manager for a shard
    pub fn new(shard: usize) -> Self {
        Self {
            shard,
            status: DrainStatus::Restored,
        }
    }

    /// Enter maintenance: begin draining this shard
    pub fn drain(&mut self) {
        if self.status != DrainStatus::Draining {
            info!(shard = self.shard, "draining shard");
            self.status = DrainStatus::Draining;
        }
    }

    /// Leave maintenance: restore this shard
    pub fn restore(&mut self) {
        if self.status != DrainStatus::Restored {
            info!(shard = self.shard, "restoring shard");
            self.status = DrainStatus::Restored;
        }
    }

    /// Current drain status
    pub fn status(&self) -> DrainStatus {
        self.status
    }
}
