//! Concurrency guards for sync passes.
//!
//! - [`Bulkhead`]: Semaphore bounding how many sync passes run at once
//! - [`NodeLocks`]: At most one sync pass per node
//!
//! # Example
//!
//! ```rust,no_run
//! # async fn example() -> Result<(), truth_replication::resilience::BulkheadFull> {
//! use truth_replication::resilience::{Bulkhead, NodeLocks};
//!
//! let bulkhead = Bulkhead::new(8);
//! let locks = NodeLocks::new();
//!
//! if let Some(_node_guard) = locks.try_lock(42) {
//!     let _permit = bulkhead.acquire().await?;
//!     // sync node 42
//! }
//! # Ok(())
//! # }
//! ```

use crate::model::NodeId;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard, OwnedSemaphorePermit, Semaphore};

// =============================================================================
// Bulkhead (Concurrency Limiter)
// =============================================================================

/// Error when bulkhead is closed.
#[derive(Debug, Clone, thiserror::Error)]
#[error("bulkhead closed: max {max_concurrent} concurrent operations")]
pub struct BulkheadFull {
    /// Maximum concurrent operations allowed.
    pub max_concurrent: usize,
}

/// Limits concurrent sync passes so a burst of sync requests cannot open
/// an unbounded number of outbound connections.
///
/// Callers wait for a slot; nothing fails fast here.
#[derive(Debug)]
pub struct Bulkhead {
    semaphore: Arc<Semaphore>,
    max_concurrent: usize,
}

impl Bulkhead {
    /// Create a new bulkhead with the given concurrency limit (minimum 1).
    pub fn new(max_concurrent: usize) -> Self {
        let max_concurrent = max_concurrent.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(max_concurrent)),
            max_concurrent,
        }
    }

    /// Acquire a permit, waiting if necessary.
    ///
    /// Returns a permit that releases the slot when dropped.
    pub async fn acquire(&self) -> Result<OwnedSemaphorePermit, BulkheadFull> {
        self.semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| BulkheadFull {
                max_concurrent: self.max_concurrent,
            })
    }

    /// Get the maximum concurrent operations allowed.
    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }
}

// =============================================================================
// Per-node exclusion
// =============================================================================

/// Held for the duration of one sync pass against one node.
pub type NodeGuard = OwnedMutexGuard<()>;

/// One lock per node id. A second pass for the same node is refused, not queued.
#[derive(Debug, Default)]
pub struct NodeLocks {
    locks: DashMap<NodeId, Arc<Mutex<()>>>,
}

impl NodeLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Try to claim `node_id`. `None` if a pass for it is already running.
    pub fn try_lock(&self, node_id: NodeId) -> Option<NodeGuard> {
        let lock = self.locks.entry(node_id).or_default().clone();
        lock.try_lock_owned().ok()
    }

    /// Forget the lock for a removed node. A guard still held keeps working.
    pub fn remove(&self, node_id: NodeId) {
        self.locks.remove(&node_id);
    }
}
