//! Session configuration.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::ConfigError;

/// Grace period a launched debuggee gets to exit on its own during drain.
pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Error artifact written when the event loop fails.
pub const DEFAULT_ERROR_FILE: &str = "covhost.error";

/// Prefix routing a pattern to the whole-assembly matcher.
pub const ASSEMBLY_DIRECTIVE: &str = "assembly:";

/// How breakpoint hits are counted.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum HitMode {
    /// Every hit of every location is counted.
    #[default]
    EveryHit,
    /// A location's breakpoint is disabled after its first hit.
    FirstHit,
}

/// Method to invoke on a named debuggee thread once the session starts.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InvokeTarget {
    pub type_name: String,
    pub method: String,
    pub thread: String,
}

impl InvokeTarget {
    /// Parse `Namespace.Type.Method`; the method name follows the last dot.
    pub fn parse(target: &str, thread: impl Into<String>) -> Result<Self, ConfigError> {
        match target.rsplit_once('.') {
            Some((type_name, method)) if !type_name.is_empty() && !method.is_empty() => {
                Ok(Self {
                    type_name: type_name.to_string(),
                    method: method.to_string(),
                    thread: thread.into(),
                })
            }
            _ => Err(ConfigError::InvalidInvokeTarget(target.to_string())),
        }
    }
}

/// Configuration of one coverage session.
#[derive(Clone, Debug)]
pub struct SessionConfig {
    /// Regular expressions over full type names, or `assembly:NAME`
    /// directives, in configuration order.
    pub patterns: Vec<String>,
    pub invoke: Option<InvokeTarget>,
    /// Protocol full name of the method whose breakpoint ends the session,
    /// e.g. `Demo.Program:Shutdown ()`.
    pub terminator: Option<String>,
    pub hit_mode: HitMode,
    pub drain_timeout: Duration,
    /// Issue a background save every N processed event sets.
    pub save_interval: Option<u64>,
    pub error_path: PathBuf,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            patterns: Vec::new(),
            invoke: None,
            terminator: None,
            hit_mode: HitMode::default(),
            drain_timeout: DEFAULT_DRAIN_TIMEOUT,
            save_interval: None,
            error_path: PathBuf::from(DEFAULT_ERROR_FILE),
        }
    }
}

impl SessionConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.patterns.push(pattern.into());
        self
    }

    #[must_use]
    pub fn with_patterns<I, S>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.patterns.extend(patterns.into_iter().map(Into::into));
        self
    }

    #[must_use]
    pub fn with_invoke(mut self, invoke: InvokeTarget) -> Self {
        self.invoke = Some(invoke);
        self
    }

    #[must_use]
    pub fn with_terminator(mut self, method: impl Into<String>) -> Self {
        self.terminator = Some(method.into());
        self
    }

    #[must_use]
    pub const fn with_hit_mode(mut self, mode: HitMode) -> Self {
        self.hit_mode = mode;
        self
    }

    #[must_use]
    pub const fn with_drain_timeout(mut self, timeout: Duration) -> Self {
        self.drain_timeout = timeout;
        self
    }

    #[must_use]
    pub const fn with_save_interval(mut self, event_sets: u64) -> Self {
        self.save_interval = Some(event_sets);
        self
    }

    #[must_use]
    pub fn with_error_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.error_path = path.into();
        self
    }
}

/// Read patterns from a file, one per line. Blank lines and lines starting
/// with `#` are skipped.
pub fn read_patterns_file(path: &Path) -> std::io::Result<Vec<String>> {
    let text = fs::read_to_string(path)?;
    Ok(parse_patterns(&text))
}

fn parse_patterns(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect()
}
