//! Per-run sequence numbers.
//!
//! Each run gets an atomic counter seeded from the highest sequence number
//! already persisted for it, so numbers continue across restarts and across
//! resubmissions of the same session.

use crate::db::RecordStore;
use crate::types::{AppError, Result};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use tokio::sync::OnceCell;

pub struct SequenceAllocator {
    store: Arc<dyn RecordStore>,
    counters: RwLock<HashMap<String, Arc<OnceCell<AtomicI64>>>>,
}

impl SequenceAllocator {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self {
            store,
            counters: RwLock::new(HashMap::new()),
        }
    }

    fn cell(&self, research_id: &str) -> Arc<OnceCell<AtomicI64>> {
        if let Some(cell) = self.counters.read().get(research_id) {
            return Arc::clone(cell);
        }
        let mut counters = self.counters.write();
        Arc::clone(counters.entry(research_id.to_string()).or_default())
    }

    /// Next sequence number for the run. Concurrent callers always get
    /// distinct, gap-free values.
    pub async fn next(&self, research_id: &str) -> Result<i64> {
        let cell = self.cell(research_id);
        let counter = cell
            .get_or_try_init(|| async {
                let max = self.store.max_sequence(research_id).await?;
                Ok::<_, AppError>(AtomicI64::new(max))
            })
            .await?;
        Ok(counter.fetch_add(1, Ordering::SeqCst) + 1)
    }

    /// Last issued number, if the counter is loaded.
    pub fn current(&self, research_id: &str) -> Option<i64> {
        self.counters
            .read()
            .get(research_id)
            .and_then(|cell| cell.get().map(|c| c.load(Ordering::SeqCst)))
    }

    /// Forget the in-memory counter; the next call reseeds from the store.
    pub fn reset(&self, research_id: &str) {
        self.counters.write().remove(research_id);
    }

    pub fn tracked_runs(&self) -> usize {
        self.counters.read().len()
    }
}
