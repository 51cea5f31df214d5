//! Critical-status signal queue.
//!
//! When a submitted reading turns a device `critical`, the device registry
//! signals the region here instead of running detection inline. A worker owned
//! by the orchestrator drains the queue and runs one detection pass per region.
//!
//! The queue is bounded by the number of distinct pending regions. Repeated
//! signals for a pending region coalesce. When the queue is full a new region
//! is not dropped: the pending batch is widened to "all regions", so every
//! critical reading still leads to at least one detection pass covering it.

use std::collections::BTreeSet;
use std::sync::Arc;

use tokio::sync::{Mutex, Notify};
use tracing::{debug, warn};

/// Default number of distinct regions that may be pending at once.
pub const DEFAULT_QUEUE_CAPACITY: usize = 64;

/// Regions awaiting a detection pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DetectionBatch {
    /// Regions to re-analyse, in sorted order.
    pub regions: Vec<String>,
    /// The queue overflowed; run one unscoped pass instead.
    pub all_regions: bool,
}

impl DetectionBatch {
    pub fn is_empty(&self) -> bool {
        self.regions.is_empty() && !self.all_regions
    }
}

#[derive(Default)]
struct Pending {
    regions: BTreeSet<String>,
    all_regions: bool,
}

struct Inner {
    pending: Mutex<Pending>,
    notify: Notify,
    capacity: usize,
}

/// Bounded, coalescing queue of regions that need re-analysis.
#[derive(Clone)]
pub struct DetectionQueue {
    inner: Arc<Inner>,
}

impl Default for DetectionQueue {
    fn default() -> Self {
        Self::new(DEFAULT_QUEUE_CAPACITY)
    }
}

impl DetectionQueue {
    /// Create a queue holding at most `capacity` distinct regions.
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                pending: Mutex::new(Pending::default()),
                notify: Notify::new(),
                capacity: capacity.max(1),
            }),
        }
    }

    /// Request a detection pass for `region`. Never blocks on the worker.
    pub async fn signal(&self, region: &str) {
        {
            let mut pending = self.inner.pending.lock().await;
            if pending.all_regions || pending.regions.contains(region) {
                debug!(region = %region, "Detection already pending");
            } else if pending.regions.len() >= self.inner.capacity {
                warn!(
                    region = %region,
                    capacity = self.inner.capacity,
                    "Detection queue full, widening to all regions"
                );
                pending.regions.clear();
                pending.all_regions = true;
            } else {
                pending.regions.insert(region.to_string());
            }
        }
        self.inner.notify.notify_one();
    }

    /// Take everything pending without waiting.
    pub async fn drain(&self) -> DetectionBatch {
        let mut pending = self.inner.pending.lock().await;
        let batch = DetectionBatch {
            regions: std::mem::take(&mut pending.regions).into_iter().collect(),
            all_regions: pending.all_regions,
        };
        pending.all_regions = false;
        batch
    }

    /// Wait until something is pending, then take it.
    pub async fn next_batch(&self) -> DetectionBatch {
        loop {
            let batch = self.drain().await;
            if !batch.is_empty() {
                return batch;
            }
            self.inner.notify.notified().await;
        }
    }

    /// Number of distinct regions pending.
    pub async fn len(&self) -> usize {
        self.inner.pending.lock().await.regions.len()
    }

    pub async fn is_empty(&self) -> bool {
        let pending = self.inner.pending.lock().await;
        pending.regions.is_empty() && !pending.all_regions
    }
}
