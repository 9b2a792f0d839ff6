use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use covhost_model::CoverageRecord;
use parking_lot::Mutex;
use tempfile::NamedTempFile;
use tracing::debug;

use crate::{CoverageStore, Result, StoreDocument};

/// File name of the coverage document inside a store directory.
pub const DOCUMENT_NAME: &str = "coverage.json";

/// Store persisting a single JSON document in a directory.
///
/// Updates are kept in memory until a flush, which replaces the document
/// atomically: a reader never observes a partially written file.
#[derive(Debug)]
pub struct JsonStore {
    dir: PathBuf,
    document: Mutex<StoreDocument>,
}

impl JsonStore {
    /// Open the store in `dir` for a new session, creating the directory if
    /// needed.
    ///
    /// The session starts from an empty document; its first flush replaces
    /// whatever an earlier session left behind.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        debug!(path = %dir.display(), "opened coverage store");
        Ok(Self {
            dir,
            document: Mutex::new(StoreDocument::new()),
        })
    }

    /// Read the document stored in `dir`.
    pub fn load(dir: &Path) -> Result<StoreDocument> {
        let text = fs::read_to_string(dir.join(DOCUMENT_NAME))?;
        Ok(StoreDocument::from_json(&text)?)
    }

    /// Path of the coverage document.
    #[must_use]
    pub fn path(&self) -> PathBuf {
        self.dir.join(DOCUMENT_NAME)
    }

    /// Copy of the in-memory document, including unflushed updates.
    #[must_use]
    pub fn document(&self) -> StoreDocument {
        self.document.lock().clone()
    }

    /// Write the document to disk.
    pub fn flush(&self) -> Result<()> {
        let document = self.document.lock();
        self.write(&document)
    }

    fn write(&self, document: &StoreDocument) -> Result<()> {
        let mut tmp = NamedTempFile::new_in(&self.dir)?;
        serde_json::to_writer_pretty(&mut tmp, document)?;
        tmp.write_all(b"\n")?;
        tmp.as_file().sync_all()?;
        tmp.persist(self.path())?;
        debug!(path = %self.path().display(), "flushed coverage store");
        Ok(())
    }
}

impl CoverageStore for JsonStore {
    fn register_method(&self, record: &CoverageRecord) -> Result<()> {
        self.document.lock().register_method(record);
        Ok(())
    }

    fn save_meta(&self, key: &str, value: &str) -> Result<()> {
        self.document.lock().set_meta(key, value);
        Ok(())
    }

    fn register_hits(&self, records: &[CoverageRecord], flush: bool) -> Result<()> {
        let mut document = self.document.lock();
        document.register_hits(records);
        if flush {
            self.write(&document)?;
        }
        Ok(())
    }
}
