//! Session-wide record index.

use rustc_hash::FxHashMap;

use crate::{CoverageRecord, MethodToken};

/// Stable position of a record inside [`CoverageRecords`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct RecordSlot(usize);

/// What a breakpoint hit did to its record.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HitOutcome {
    /// The line is not tracked by the record (or the slot is unknown).
    Untracked,
    /// A line hit was counted.
    Line,
    /// A hit on the method's first line: counted as a line hit and a call.
    Entry,
}

/// Every record of a session, in discovery order, indexed by method token.
///
/// Records are never removed, so a [`RecordSlot`] stays valid for the
/// lifetime of the index.
#[derive(Debug, Default)]
pub struct CoverageRecords {
    records: Vec<CoverageRecord>,
    by_token: FxHashMap<MethodToken, RecordSlot>,
}

impl CoverageRecords {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a record unless one with the same token exists.
    ///
    /// Returns the slot of the record now owning the token and whether the
    /// given record was inserted.
    pub fn insert(&mut self, record: CoverageRecord) -> (RecordSlot, bool) {
        if let Some(&slot) = self.by_token.get(&record.token) {
            return (slot, false);
        }
        let slot = RecordSlot(self.records.len());
        self.by_token.insert(record.token, slot);
        self.records.push(record);
        (slot, true)
    }

    #[must_use]
    pub fn slot(&self, token: MethodToken) -> Option<RecordSlot> {
        self.by_token.get(&token).copied()
    }

    #[must_use]
    pub fn get(&self, slot: RecordSlot) -> Option<&CoverageRecord> {
        self.records.get(slot.0)
    }

    #[must_use]
    pub fn get_by_token(&self, token: MethodToken) -> Option<&CoverageRecord> {
        self.slot(token).and_then(|slot| self.get(slot))
    }

    /// Count a breakpoint hit on `line` of the record at `slot`.
    ///
    /// A hit on the first tracked line also counts a call; it stands in for
    /// a method-entry event.
    pub fn record_hit(&mut self, slot: RecordSlot, line: u32) -> HitOutcome {
        let Some(record) = self.records.get_mut(slot.0) else {
            return HitOutcome::Untracked;
        };
        if !record.record_hit(line) {
            return HitOutcome::Untracked;
        }
        if record.first_line() == Some(line) {
            record.record_call();
            HitOutcome::Entry
        } else {
            HitOutcome::Line
        }
    }

    /// Count a method-entry event for the method with `token`.
    ///
    /// A method with tracked lines already counts its calls through hits on
    /// its first line, so entry events only count for methods without any.
    /// Returns true if a call was counted.
    pub fn record_entry(&mut self, token: MethodToken) -> bool {
        match self.by_token.get(&token) {
            Some(slot) => {
                let record = &mut self.records[slot.0];
                if record.first_line().is_some() {
                    return false;
                }
                record.record_call();
                true
            }
            None => false,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &CoverageRecord> {
        self.records.iter()
    }

    /// Copy of every record, in discovery order.
    #[must_use]
    pub fn snapshot(&self) -> Vec<CoverageRecord> {
        self.records.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bar() -> CoverageRecord {
        CoverageRecord::new(MethodToken(1), "Foo", "MyLib", "Bar", "Foo.cs", 10..=12)
    }

    #[test]
    fn test_insert_is_keyed_by_token() {
        let mut records = CoverageRecords::new();
        let (first, inserted) = records.insert(bar());
        assert!(inserted);

        let (second, inserted) = records.insert(bar());
        assert!(!inserted);
        assert_eq!(first, second);
        assert_eq!(records.len(), 1);
        assert_eq!(records.slot(MethodToken(1)), Some(first));
    }

    #[test]
    fn test_first_line_hit_counts_call() {
        let mut records = CoverageRecords::new();
        let (slot, _) = records.insert(bar());

        for _ in 0..3 {
            assert_eq!(records.record_hit(slot, 10), HitOutcome::Entry);
        }
        assert_eq!(records.record_hit(slot, 11), HitOutcome::Line);
        assert_eq!(records.record_hit(slot, 40), HitOutcome::Untracked);

        let rec = records.get(slot).unwrap();
        assert_eq!(rec.hits(10), Some(3));
        assert_eq!(rec.hits(11), Some(1));
        assert_eq!(rec.hits(12), Some(0));
        assert_eq!(rec.call_count(), 3);
    }

    #[test]
    fn test_entry_counts_only_methods_without_lines() {
        let mut records = CoverageRecords::new();
        let (slot, _) = records.insert(bar());
        let no_lines =
            CoverageRecord::new(MethodToken(2), "Foo", "MyLib", "Abstract", "", [0_u32; 0]);
        records.insert(no_lines);

        // Bar's calls come from its first line; the entry event must not add one.
        assert!(!records.record_entry(MethodToken(1)));
        assert_eq!(records.record_hit(slot, 10), HitOutcome::Entry);
        assert_eq!(records.get_by_token(MethodToken(1)).unwrap().call_count(), 1);

        assert!(records.record_entry(MethodToken(2)));
        assert_eq!(records.get_by_token(MethodToken(2)).unwrap().call_count(), 1);

        assert!(!records.record_entry(MethodToken(3)));
    }

    #[test]
    fn test_snapshot_is_detached() {
        let mut records = CoverageRecords::new();
        let (slot, _) = records.insert(bar());
        let snapshot = records.snapshot();
        records.record_hit(slot, 11);

        assert_eq!(snapshot[0].hits(11), Some(0));
        assert_eq!(records.get(slot).unwrap().hits(11), Some(1));
    }
}
