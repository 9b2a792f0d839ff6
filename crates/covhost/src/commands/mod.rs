//! Command implementations.

mod replay;
mod show;

use crate::cli::{Cli, Commands};

/// Dispatch CLI command to the appropriate handler.
pub fn run_command(cli: &Cli) -> i32 {
    match &cli.command {
        Commands::Replay { script, session } => replay::cmd_replay(script, session),
        Commands::Show { store, report } => show::cmd_show(store, report.as_deref()),
    }
}
