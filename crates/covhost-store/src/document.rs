use std::collections::BTreeMap;

use covhost_model::{CoverageRecord, MethodToken};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

/// Stored coverage: session metadata plus one record per method token.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct StoreDocument {
    #[serde(default)]
    meta: BTreeMap<String, String>,
    #[serde(default)]
    records: Vec<CoverageRecord>,
    #[serde(skip)]
    index: FxHashMap<MethodToken, usize>,
}

impl StoreDocument {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a stored document.
    pub fn from_json(text: &str) -> serde_json::Result<Self> {
        let mut doc: Self = serde_json::from_str(text)?;
        doc.reindex();
        Ok(doc)
    }

    fn reindex(&mut self) {
        self.index = self
            .records
            .iter()
            .enumerate()
            .map(|(i, record)| (record.token, i))
            .collect();
    }

    /// Stored records in registration order.
    #[must_use]
    pub fn records(&self) -> &[CoverageRecord] {
        &self.records
    }

    #[must_use]
    pub fn meta(&self, key: &str) -> Option<&str> {
        self.meta.get(key).map(String::as_str)
    }

    /// Metadata entries sorted by key.
    pub fn meta_entries(&self) -> impl Iterator<Item = (&str, &str)> {
        self.meta.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn set_meta(&mut self, key: &str, value: &str) {
        self.meta.insert(key.to_string(), value.to_string());
    }

    /// Add a record unless its token is already stored.
    pub fn register_method(&mut self, record: &CoverageRecord) -> bool {
        if self.index.contains_key(&record.token) {
            return false;
        }
        self.index.insert(record.token, self.records.len());
        self.records.push(record.clone());
        true
    }

    /// Fold snapshots into the stored records, adding unknown ones.
    pub fn register_hits(&mut self, records: &[CoverageRecord]) {
        for record in records {
            match self.index.get(&record.token) {
                Some(&i) => self.records[i].absorb(record),
                None => {
                    self.register_method(record);
                }
            }
        }
    }
}
