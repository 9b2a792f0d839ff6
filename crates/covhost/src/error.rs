use covhost_debug::DebugError;
use covhost_debug::script::ScriptError;
use covhost_store::StoreError;
use thiserror::Error;

/// Configuration errors. Each one rejects a single setting; the rest of the
/// configuration still applies.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("pattern {index}: whole-assembly directive has no assembly name")]
    MissingAssemblyName { index: usize },
    #[error("pattern {index}: invalid regular expression: {source}")]
    InvalidPattern {
        index: usize,
        #[source]
        source: regex::Error,
    },
    #[error("invalid invoke target '{0}': expected TYPE.METHOD")]
    InvalidInvokeTarget(String),
    #[error("could not save session metadata: {0}")]
    Store(#[from] StoreError),
}

/// Errors that end a running session.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("debugger error: {0}")]
    Debug(#[from] DebugError),
    #[error("storage error: {0}")]
    Store(#[from] StoreError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("background save did not report completion")]
    SaveLost,
}

/// Top-level errors.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error("storage error: {0}")]
    Store(#[from] StoreError),
    #[error("script error: {0}")]
    Script(#[from] ScriptError),
    #[error("script names neither a command line to launch nor an endpoint to attach to")]
    NoTarget,
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
