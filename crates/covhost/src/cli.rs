//! CLI definitions and argument types.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use covhost::DEFAULT_ERROR_FILE;

/// Exit code for success.
pub const EXIT_SUCCESS: i32 = 0;
/// Exit code for failure.
pub const EXIT_FAILURE: i32 = 1;

#[derive(Parser)]
#[command(name = "covhost")]
#[command(about = "Live code-coverage collector for managed debuggees")]
#[command(version)]
pub struct Cli {
    /// Print a metrics summary when the command finishes
    #[arg(long, global = true)]
    pub metrics: bool,

    /// Log at debug level
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Log errors only
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub silent: bool,

    /// Write the log to a file instead of stderr
    #[arg(long, global = true, value_name = "PATH")]
    pub log: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run a coverage session against a scripted debuggee
    Replay {
        /// Script describing the debuggee and its events (JSON)
        #[arg(value_name = "SCRIPT")]
        script: PathBuf,

        #[command(flatten)]
        session: SessionArgs,
    },
    /// Print the report of a stored coverage document
    Show {
        /// Store directory
        #[arg(value_name = "STORE_DIR")]
        store: PathBuf,

        /// Write the report to a file instead of stdout
        #[arg(long, value_name = "PATH")]
        report: Option<PathBuf>,
    },
}

/// Session options.
#[derive(Args)]
pub struct SessionArgs {
    /// Type pattern (regular expression over full type names) or
    /// `assembly:NAME` directive. Repeatable.
    #[arg(short, long = "pattern", value_name = "PATTERN")]
    pub patterns: Vec<String>,

    /// File with one pattern per line
    #[arg(long, value_name = "PATH")]
    pub patterns_file: Option<PathBuf>,

    /// Static method to invoke once the session starts
    #[arg(long, value_name = "TYPE.METHOD", requires = "invoke_thread")]
    pub invoke: Option<String>,

    /// Name of the debuggee thread running the invoke target
    #[arg(long, value_name = "NAME", requires = "invoke")]
    pub invoke_thread: Option<String>,

    /// Full name of the method ending the session when hit, e.g. `Demo.App:Quit ()`
    #[arg(long, value_name = "METHOD")]
    pub terminator: Option<String>,

    /// Stop counting a line after its first hit
    #[arg(long)]
    pub first_hit_only: bool,

    /// Seconds a launched debuggee gets to exit before it is killed
    #[arg(long, default_value = "10", value_name = "SECS")]
    pub drain_timeout: u64,

    /// Save in the background every N event sets
    #[arg(long, value_name = "N")]
    pub save_every: Option<u64>,

    /// Error artifact written when the session fails
    #[arg(long, default_value = DEFAULT_ERROR_FILE, value_name = "PATH")]
    pub error_file: PathBuf,

    /// Store directory
    #[arg(long, default_value = "covhost-data", value_name = "DIR")]
    pub store: PathBuf,

    /// Report file
    #[arg(long, default_value = "coverage.txt", value_name = "PATH")]
    pub report: PathBuf,
}
