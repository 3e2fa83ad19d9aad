//! OccupancyState - Process-wide Last Snapshot
//!
//! ## Responsibilities
//!
//! - Hold the most recently computed occupancy snapshot
//! - Single writer (the detection loop), many readers (API, new subscribers)
//!
//! Writes swap an `Arc` handle rather than mutating in place, so readers
//! always observe a fully formed snapshot or the previous one.

use crate::occupancy_engine::OccupancySnapshot;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Shared cell for the last computed snapshot
pub struct OccupancyState {
    current: RwLock<Option<Arc<OccupancySnapshot>>>,
}

impl OccupancyState {
    /// Create an empty state; no snapshot exists until the first successful
    /// detection cycle
    pub fn new() -> Self {
        Self {
            current: RwLock::new(None),
        }
    }

    /// Replace the last snapshot. Called only by the detection loop.
    pub async fn publish(&self, snapshot: OccupancySnapshot) {
        let mut current = self.current.write().await;
        *current = Some(Arc::new(snapshot));
    }

    /// Most recent snapshot, if any cycle has completed yet
    pub async fn latest(&self) -> Option<Arc<OccupancySnapshot>> {
        self.current.read().await.clone()
    }
}

impl Default for OccupancyState {
    fn default() -> Self {
        Self::new()
    }
}
