//! Text coverage report.
//!
//! One header per method with tracked lines, sorted by class, method name
//! and token, followed by `sourceFile:LLLL hits` for each line in ascending
//! order:
//!
//! ```text
//! Foo:Bar (MyLib, Version=1.0.0.0) calls=3
//! Foo.cs:0010 3
//! Foo.cs:0011 1
//! Foo.cs:0012 0
//! ```

use std::fmt::Write as _;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use covhost_model::CoverageRecord;
use tracing::info;

/// Render the report for `records`.
#[must_use]
pub fn render_report(records: &[CoverageRecord]) -> String {
    let mut sorted: Vec<&CoverageRecord> =
        records.iter().filter(|r| !r.lines().is_empty()).collect();
    // Overloads share a class and method name; the token keeps them in a fixed order.
    sorted.sort_by(|a, b| {
        (&a.class_name, &a.name, a.token).cmp(&(&b.class_name, &b.name, b.token))
    });

    let mut out = String::new();
    for record in sorted {
        // Writing to a String cannot fail.
        let _ = writeln!(out, "{record}");
        for (line, hits) in record.hit_counts() {
            let _ = writeln!(out, "{}:{line:04} {hits}", record.source_file);
        }
    }
    out
}

/// Write the report to `path`, first moving any existing file aside.
///
/// Returns where the previous report was moved, if there was one.
pub fn write_report(path: &Path, records: &[CoverageRecord]) -> io::Result<Option<PathBuf>> {
    let backup = rename_backup_file(path)?;
    fs::write(path, render_report(records))?;
    info!(path = %path.display(), "wrote report");
    Ok(backup)
}

/// Rename an existing `path` to `path.{secs}`, `secs` being its creation
/// time in seconds since the epoch (modification time where the platform
/// records no creation time). A numeric suffix is added if that name is
/// taken too.
pub fn rename_backup_file(path: &Path) -> io::Result<Option<PathBuf>> {
    let meta = match fs::metadata(path) {
        Ok(meta) => meta,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e),
    };
    let created = meta.created().or_else(|_| meta.modified())?;
    let secs = created.duration_since(UNIX_EPOCH).map_or(0, |d| d.as_secs());

    let mut backup = suffixed(path, &secs.to_string());
    let mut n = 1;
    while backup.exists() {
        backup = suffixed(path, &format!("{secs}.{n}"));
        n += 1;
    }
    fs::rename(path, &backup)?;
    info!(from = %path.display(), to = %backup.display(), "kept previous report");
    Ok(Some(backup))
}

fn suffixed(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".");
    name.push(suffix);
    PathBuf::from(name)
}
