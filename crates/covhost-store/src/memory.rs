use covhost_model::CoverageRecord;
use parking_lot::Mutex;

use crate::{CoverageStore, Result, StoreDocument};

/// Store that keeps everything in memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

#[derive(Debug, Default)]
struct MemoryState {
    document: StoreDocument,
    hit_batches: usize,
    flushes: usize,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of the stored document.
    #[must_use]
    pub fn document(&self) -> StoreDocument {
        self.state.lock().document.clone()
    }

    #[must_use]
    pub fn meta(&self, key: &str) -> Option<String> {
        self.state.lock().document.meta(key).map(str::to_string)
    }

    /// Number of `register_hits` calls received.
    #[must_use]
    pub fn hit_batches(&self) -> usize {
        self.state.lock().hit_batches
    }

    /// Number of `register_hits` calls that requested a flush.
    #[must_use]
    pub fn flushes(&self) -> usize {
        self.state.lock().flushes
    }
}

impl CoverageStore for MemoryStore {
    fn register_method(&self, record: &CoverageRecord) -> Result<()> {
        self.state.lock().document.register_method(record);
        Ok(())
    }

    fn save_meta(&self, key: &str, value: &str) -> Result<()> {
        self.state.lock().document.set_meta(key, value);
        Ok(())
    }

    fn register_hits(&self, records: &[CoverageRecord], flush: bool) -> Result<()> {
        let mut state = self.state.lock();
        state.document.register_hits(records);
        state.hit_batches += 1;
        if flush {
            state.flushes += 1;
        }
        Ok(())
    }
}
