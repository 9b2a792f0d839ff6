//! Show command.

use std::io::{self, Write};
use std::path::Path;

use covhost::report::{render_report, write_report};
use covhost_store::JsonStore;
use tracing::error;

use crate::cli::{EXIT_FAILURE, EXIT_SUCCESS};
use crate::terminal;

/// Handle the `show` command.
pub fn cmd_show(store_dir: &Path, report_path: Option<&Path>) -> i32 {
    let document = match JsonStore::load(store_dir) {
        Ok(document) => document,
        Err(e) => {
            error!(error = %e, path = %store_dir.display(), "failed to load coverage store");
            return EXIT_FAILURE;
        }
    };

    for (key, value) in document.meta_entries() {
        terminal::info(&format!("{key}: {value}"));
    }

    if let Some(path) = report_path {
        if let Err(e) = write_report(path, document.records()) {
            error!(error = %e, path = %path.display(), "failed to write report");
            return EXIT_FAILURE;
        }
        terminal::path_output("report", path);
        return EXIT_SUCCESS;
    }

    let mut stdout = io::stdout().lock();
    match stdout.write_all(render_report(document.records()).as_bytes()) {
        Ok(()) => EXIT_SUCCESS,
        Err(e) => {
            error!(error = %e, "failed to print report");
            EXIT_FAILURE
        }
    }
}
