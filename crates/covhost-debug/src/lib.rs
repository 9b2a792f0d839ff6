//! Contracts for the debugging session a coverage host drives.
//!
//! The remote-debugging transport and the non-executing metadata reader are
//! external collaborators. This crate pins down the narrow surface the
//! coverage engine needs from them ([`Debuggee`], [`Transport`],
//! [`MetadataReader`]) and ships a [`script`] implementation that replays a
//! scripted event sequence, used for replays and tests.

mod metadata;
mod protocol;
pub mod script;
mod types;

pub use metadata::{DeclaredMethod, DeclaredType, MetadataReader};
pub use protocol::{Debuggee, TargetProcess, Transport};
pub use types::*;

use std::path::PathBuf;

use thiserror::Error;

/// Debug-protocol errors.
#[derive(Debug, Error)]
pub enum DebugError {
    /// The connection to the debuggee is gone (exit, detach or transport loss).
    #[error("debuggee disconnected")]
    Disconnected,
    /// Resume was requested while the debuggee was not suspended.
    #[error("debuggee is not suspended")]
    AlreadyRunning,
    #[error("type not found: {0}")]
    TypeNotFound(String),
    #[error("method not found: {type_name}.{method}")]
    MethodNotFound { type_name: String, method: String },
    #[error("thread not found: {0}")]
    ThreadNotFound(String),
    #[error("unknown event request {0}")]
    InvalidRequest(RequestId),
    #[error("protocol error: {0}")]
    Protocol(String),
}

/// Metadata inspection errors. All of them are recoverable for the caller.
#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("malformed image {path}: {reason}")]
    Malformed { path: PathBuf, reason: String },
    #[error("could not load types from {0}")]
    LoadFailure(PathBuf),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, DebugError>;
