//! Per-method coverage record.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Process-unique method identifier (the method's metadata token).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MethodToken(pub u32);

impl fmt::Display for MethodToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08x}", self.0)
    }
}

/// Coverage state of one instrumented method.
///
/// `lines` is fixed at construction. Every tracked line has a hit counter
/// starting at zero; counters and `call_count` only ever grow.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoverageRecord {
    pub token: MethodToken,
    /// Declaring type name with generic argument groups stripped.
    pub class_name: String,
    /// Full name of the containing assembly.
    pub assembly: String,
    pub name: String,
    pub source_file: String,
    lines: Vec<u32>,
    hits: BTreeMap<u32, u64>,
    call_count: u64,
}

impl CoverageRecord {
    /// Create a record tracking the distinct lines of `line_numbers`.
    ///
    /// The line table may contain duplicates and be in any order.
    pub fn new(
        token: MethodToken,
        class_name: impl Into<String>,
        assembly: impl Into<String>,
        name: impl Into<String>,
        source_file: impl Into<String>,
        line_numbers: impl IntoIterator<Item = u32>,
    ) -> Self {
        let mut lines: Vec<u32> = line_numbers.into_iter().collect();
        lines.sort_unstable();
        lines.dedup();
        let hits = lines.iter().map(|&line| (line, 0)).collect();

        Self {
            token,
            class_name: class_name.into(),
            assembly: assembly.into(),
            name: name.into(),
            source_file: source_file.into(),
            lines,
            hits,
            call_count: 0,
        }
    }

    /// Tracked lines in ascending order.
    #[must_use]
    pub fn lines(&self) -> &[u32] {
        &self.lines
    }

    /// The method's first tracked line, used as the entry proxy.
    #[must_use]
    pub fn first_line(&self) -> Option<u32> {
        self.lines.first().copied()
    }

    /// Hit count of a tracked line, `None` for lines outside the method.
    #[must_use]
    pub fn hits(&self, line: u32) -> Option<u64> {
        self.hits.get(&line).copied()
    }

    /// `(line, hits)` pairs in ascending line order.
    pub fn hit_counts(&self) -> impl Iterator<Item = (u32, u64)> + '_ {
        self.hits.iter().map(|(&line, &hits)| (line, hits))
    }

    #[must_use]
    pub const fn call_count(&self) -> u64 {
        self.call_count
    }

    /// Number of tracked lines hit at least once.
    #[must_use]
    pub fn covered_lines(&self) -> usize {
        self.hits.values().filter(|&&hits| hits > 0).count()
    }

    /// Count one hit on `line`. Returns false if the line is not tracked.
    pub fn record_hit(&mut self, line: u32) -> bool {
        match self.hits.get_mut(&line) {
            Some(hits) => {
                *hits += 1;
                true
            }
            None => false,
        }
    }

    /// Count one entry into the method.
    pub const fn record_call(&mut self) {
        self.call_count += 1;
    }

    /// Fold a snapshot of the same method into this record.
    ///
    /// Snapshots are taken from monotonic counters, so the larger value is
    /// always the newer one. Saves that complete out of order therefore
    /// never move a counter backwards.
    pub fn absorb(&mut self, snapshot: &Self) {
        for (line, hits) in snapshot.hit_counts() {
            if let Some(current) = self.hits.get_mut(&line) {
                *current = (*current).max(hits);
            }
        }
        self.call_count = self.call_count.max(snapshot.call_count);
    }
}

impl fmt::Display for CoverageRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{} ({}) calls={}",
            self.class_name, self.name, self.assembly, self.call_count
        )
    }
}
