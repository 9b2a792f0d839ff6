//! Replay command.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use covhost::report::write_report;
use covhost::{
    CoverHost, CoverageRecord, Error, HitMode, InvokeTarget, SessionConfig, SessionEnd,
    read_patterns_file,
};
use covhost_debug::script::{Script, ScriptedMetadata};
use covhost_store::{CoverageStore, JsonStore};
use tracing::{error, info, warn};

use crate::cli::{EXIT_FAILURE, EXIT_SUCCESS, SessionArgs};
use crate::terminal::{self, Spinner, Status};

/// Handle the `replay` command.
pub fn cmd_replay(script_path: &Path, args: &SessionArgs) -> i32 {
    let config = match session_config(args) {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "invalid session options");
            return EXIT_FAILURE;
        }
    };

    let script = match Script::load(script_path) {
        Ok(script) => script,
        Err(e) => {
            error!(error = %e, path = %script_path.display(), "failed to load script");
            return EXIT_FAILURE;
        }
    };

    let store: Arc<dyn CoverageStore> = match JsonStore::open(&args.store) {
        Ok(store) => Arc::new(store),
        Err(e) => {
            error!(error = %e, path = %args.store.display(), "failed to open store");
            return EXIT_FAILURE;
        }
    };

    let mut host = match open_session(&script, store) {
        Ok(host) => host,
        Err(e) => {
            error!(error = %e, "failed to open debugging session");
            return EXIT_FAILURE;
        }
    };

    for e in host.configure(config) {
        warn!(error = %e, "configuration entry ignored");
    }

    let spinner = Spinner::start("collecting coverage");
    let outcome = host.run();
    let records = host.records();
    let lines: usize = records.iter().map(|r| r.lines().len()).sum();
    let covered: usize = records.iter().map(CoverageRecord::covered_lines).sum();
    let hits: u64 = records
        .iter()
        .flat_map(CoverageRecord::hit_counts)
        .map(|(_, h)| h)
        .sum();
    let summary = format!(
        "{} ({} methods, {covered}/{lines} lines, {hits} hits)",
        outcome.end,
        records.len()
    );
    match &outcome.end {
        SessionEnd::Failed(_) => spinner.finish(Status::Failure, &summary),
        _ if outcome.killed => {
            spinner.finish(Status::Warning, &format!("{summary}, debuggee killed"));
        }
        _ => spinner.finish(Status::Success, &summary),
    }

    match write_report(&args.report, &records) {
        Ok(backup) => {
            if let Some(backup) = backup {
                info!(path = %backup.display(), "previous report kept");
            }
            terminal::path_output("report", &args.report);
        }
        Err(e) => {
            error!(error = %e, path = %args.report.display(), "failed to write report");
            return EXIT_FAILURE;
        }
    }

    if outcome.is_success() {
        EXIT_SUCCESS
    } else {
        EXIT_FAILURE
    }
}

fn session_config(args: &SessionArgs) -> Result<SessionConfig, Error> {
    let mut config = SessionConfig::new()
        .with_patterns(args.patterns.iter().cloned())
        .with_drain_timeout(Duration::from_secs(args.drain_timeout))
        .with_error_path(&args.error_file);

    if let Some(path) = &args.patterns_file {
        config = config.with_patterns(read_patterns_file(path)?);
    }
    if let (Some(target), Some(thread)) = (&args.invoke, &args.invoke_thread) {
        config = config.with_invoke(InvokeTarget::parse(target, thread.as_str())?);
    }
    if let Some(method) = &args.terminator {
        config = config.with_terminator(method.as_str());
    }
    if args.first_hit_only {
        config = config.with_hit_mode(HitMode::FirstHit);
    }
    if let Some(n) = args.save_every {
        config = config.with_save_interval(n);
    }
    Ok(config)
}

fn open_session(script: &Script, store: Arc<dyn CoverageStore>) -> Result<CoverHost, Error> {
    let metadata = Box::new(ScriptedMetadata::new(script));
    if let Some(command_line) = &script.launch {
        Ok(CoverHost::launch(script, command_line, metadata, store)?)
    } else if let Some(endpoint) = script.attach {
        Ok(CoverHost::connect(script, endpoint, metadata, store)?)
    } else {
        Err(Error::NoTarget)
    }
}
