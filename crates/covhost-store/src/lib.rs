//! Storage backends for coverage sessions.
//!
//! The session engine talks to storage only through [`CoverageStore`]:
//! methods are registered once when discovered, session metadata is saved as
//! key/value pairs, and accumulated hits are upserted in batches. Two
//! backends are provided: [`MemoryStore`] and the file-backed [`JsonStore`].

mod document;
mod json;
mod memory;

pub use document::StoreDocument;
pub use json::{DOCUMENT_NAME, JsonStore};
pub use memory::MemoryStore;

use covhost_model::CoverageRecord;
use thiserror::Error;

/// Storage errors.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid coverage document: {0}")]
    Json(#[from] serde_json::Error),
    #[error("could not replace coverage document: {0}")]
    Persist(#[from] tempfile::PersistError),
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Durable storage for coverage records and session metadata.
///
/// Called from the event-loop thread (`register_method`, `save_meta`) and
/// from persistence workers (`register_hits`), so implementations
/// synchronise internally.
pub trait CoverageStore: Send + Sync {
    /// Register a newly discovered method. Registering a token twice keeps
    /// the first registration.
    fn register_method(&self, record: &CoverageRecord) -> Result<()>;

    /// Save a session-level metadata entry, replacing any previous value.
    fn save_meta(&self, key: &str, value: &str) -> Result<()>;

    /// Upsert hit and call counts. With `flush`, the data is durable when
    /// this returns.
    fn register_hits(&self, records: &[CoverageRecord], flush: bool) -> Result<()>;
}
