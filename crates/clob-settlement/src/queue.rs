//! Insertion-ordered fill queue.

use indexmap::IndexMap;
use parking_lot::Mutex;

use clob_core::{Fill, FillId};

/// Fills awaiting batching, oldest insertion first.
///
/// Keyed by fill id so re-injection from recovery is idempotent: a later
/// insert with a known id overwrites in place and keeps the original queue
/// position.
#[derive(Default)]
pub struct FillQueue {
    fills: Mutex<IndexMap<FillId, Fill>>,
}

impl FillQueue {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a fill. Returns `false` if a fill with the same id was
    /// already queued (and has been replaced).
    pub fn insert(&self, fill: Fill) -> bool {
        self.fills.lock().insert(fill.id.clone(), fill).is_none()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.fills.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fills.lock().is_empty()
    }

    /// Creation timestamp of the oldest queued fill, Unix milliseconds.
    #[must_use]
    pub fn oldest_timestamp_ms(&self) -> Option<u64> {
        self.fills
            .lock()
            .first()
            .map(|(_, fill)| fill.timestamp_ms)
    }

    /// Remove and return up to `max` fills, oldest first, in one atomic
    /// step.
    pub fn take(&self, max: usize) -> Vec<Fill> {
        let mut fills = self.fills.lock();
        let n = max.min(fills.len());
        fills.drain(..n).map(|(_, fill)| fill).collect()
    }

    /// Remove and return every queued fill, oldest first.
    pub fn drain_all(&self) -> Vec<Fill> {
        let mut fills = self.fills.lock();
        let n = fills.len();
        fills.drain(..n).map(|(_, fill)| fill).collect()
    }
}
