//! covhost - live code coverage through a debugger session
//!
//! Attaches to (or launches) a managed debuggee, places a breakpoint on
//! every line of every method whose declaring type matches the configured
//! patterns, and counts line hits and method calls while the program runs.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use covhost::{CoverHost, SessionConfig, report};
//! use covhost_debug::script::{Script, ScriptedMetadata};
//! use covhost_store::JsonStore;
//!
//! let script = Script::load("session.json".as_ref())?;
//! let store = Arc::new(JsonStore::open("coverage-data")?);
//! let args = vec!["mono".to_string(), "app.exe".to_string()];
//! let metadata = Box::new(ScriptedMetadata::new(&script));
//! let mut host = CoverHost::launch(&script, &args, metadata, store)?;
//! host.configure(SessionConfig::new().with_pattern("^Demo\\."));
//! let outcome = host.run();
//! report::write_report("coverage.txt".as_ref(), &host.records())?;
//! ```

mod config;
mod discovery;
mod error;
mod matcher;
pub mod metrics;
mod persist;
pub mod report;
mod session;

pub use config::{
    ASSEMBLY_DIRECTIVE, DEFAULT_DRAIN_TIMEOUT, DEFAULT_ERROR_FILE, HitMode, InvokeTarget,
    SessionConfig, read_patterns_file,
};
pub use discovery::{BreakpointBinding, Discovery};
pub use error::{ConfigError, Error, Result, SessionError};
pub use matcher::PatternMatcher;
pub use persist::{Persister, SaveTicket};
pub use session::{CoverHost, SessionEnd, SessionOrigin, SessionOutcome, SessionState};

pub use covhost_model::{CoverageRecord, MethodToken};
