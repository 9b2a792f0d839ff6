//! Background persistence of coverage snapshots.

use std::sync::Arc;
use std::sync::mpsc::{self, Receiver};
use std::time::Instant;

use covhost_model::CoverageRecords;
use covhost_store::{CoverageStore, StoreError};
use parking_lot::Mutex;
use tracing::{debug, error};

use crate::SessionError;
use crate::metrics;

/// Completion signal of one background save.
pub struct SaveTicket {
    done: Receiver<Result<usize, StoreError>>,
}

impl SaveTicket {
    /// Block until the save completes. Returns the number of records saved.
    pub fn wait(self) -> Result<usize, SessionError> {
        self.done.recv().map_err(|_| SessionError::SaveLost)?.map_err(SessionError::from)
    }
}

/// Hands record snapshots to the store on the rayon pool.
pub struct Persister {
    records: Arc<Mutex<CoverageRecords>>,
    store: Arc<dyn CoverageStore>,
}

impl Persister {
    pub fn new(records: Arc<Mutex<CoverageRecords>>, store: Arc<dyn CoverageStore>) -> Self {
        Self { records, store }
    }

    /// Snapshot the records and save them in the background.
    ///
    /// The record lock is held only while copying; the event loop keeps
    /// counting hits while the store works.
    pub fn save(&self) -> SaveTicket {
        let snapshot = self.records.lock().snapshot();
        let store = Arc::clone(&self.store);
        let (tx, rx) = mpsc::sync_channel(1);

        rayon::spawn(move || {
            let started = Instant::now();
            debug!(records = snapshot.len(), "saving records in background");
            let result = store.register_hits(&snapshot, true).map(|()| snapshot.len());
            match &result {
                Ok(count) => {
                    metrics::record_save(*count, started.elapsed().as_secs_f64());
                    debug!(records = count, "save complete");
                }
                Err(e) => error!(error = %e, "save failed"),
            }
            // Nobody waits on non-blocking saves.
            tx.send(result).ok();
        });

        SaveTicket { done: rx }
    }

    /// Save and wait for the store to finish.
    pub fn save_blocking(&self) -> Result<usize, SessionError> {
        self.save().wait()
    }
}
