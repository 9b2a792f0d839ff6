//! covhost CLI - live code coverage for managed debuggees

mod cli;
mod commands;
mod terminal;

use std::fs::File;
use std::sync::Mutex;

use clap::Parser;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::writer::BoxMakeWriter;

use cli::{Cli, EXIT_FAILURE};

fn main() {
    let cli = Cli::parse();

    // Metrics are only kept when a summary was asked for.
    let metrics_handle = if cli.metrics {
        covhost::metrics::CliRecorder::new().install()
    } else {
        None
    };
    covhost::metrics::init();

    let default_level = if cli.verbose {
        "covhost=debug"
    } else if cli.silent {
        "covhost=error"
    } else {
        "covhost=info"
    };
    let writer = match &cli.log {
        Some(path) => match File::create(path) {
            Ok(file) => BoxMakeWriter::new(Mutex::new(file)),
            Err(e) => {
                terminal::report(
                    terminal::Status::Failure,
                    &format!("cannot open log file {}: {e}", path.display()),
                );
                std::process::exit(EXIT_FAILURE);
            }
        },
        None => BoxMakeWriter::new(std::io::stderr),
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(writer)
        .with_ansi(cli.log.is_none())
        .with_target(false)
        .init();

    let exit_code = commands::run_command(&cli);

    if let Some(handle) = metrics_handle {
        handle.print_summary();
    }

    std::process::exit(exit_code);
}
