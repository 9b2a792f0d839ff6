//! Styled terminal output and the session spinner.

use std::borrow::Cow;
use std::path::Path;
use std::time::Duration;

use console::style;
use indicatif::{ProgressBar, ProgressStyle};

/// How a step ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Success,
    Warning,
    Failure,
}

/// Spinner shown while a session collects coverage.
pub struct Spinner {
    bar: ProgressBar,
}

impl Spinner {
    pub fn start(message: impl Into<Cow<'static, str>>) -> Self {
        let bar = ProgressBar::new_spinner();
        let template = ProgressStyle::with_template("{spinner:.cyan} {msg} [{elapsed}]")
            .unwrap_or_else(|_| ProgressStyle::default_spinner());
        bar.set_style(template.tick_chars("◐◓◑◒ "));
        bar.set_message(message);
        bar.enable_steady_tick(Duration::from_millis(100));
        Self { bar }
    }

    /// Clear the spinner and print the final status line.
    pub fn finish(self, status: Status, message: &str) {
        self.bar.finish_and_clear();
        report(status, message);
    }
}

impl Drop for Spinner {
    fn drop(&mut self) {
        if !self.bar.is_finished() {
            self.bar.finish_and_clear();
        }
    }
}

/// Print a status line to stderr.
pub fn report(status: Status, message: &str) {
    let marker = match status {
        Status::Success => style("✓").green().bold(),
        Status::Warning => style("!").yellow().bold(),
        Status::Failure => style("✗").red().bold(),
    };
    eprintln!("{marker} {message}");
}

/// Print a neutral line to stderr.
pub fn info(message: &str) {
    eprintln!("{} {message}", style("·").cyan());
}

/// Print a file the run produced.
pub fn path_output(label: &str, path: &Path) {
    eprintln!("  {label} {}", style(path.display()).dim());
}
