//! Mirrors of debuggee entities and the events that reference them.

use std::fmt;
use std::path::PathBuf;

use covhost_model::MethodToken;
use serde::{Deserialize, Serialize};

/// Handle of an event request (breakpoint, assembly load, method entry).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestId(pub u32);

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Runtime type handle assigned by the debuggee.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TypeId(pub u64);

/// Debuggee thread handle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ThreadId(pub u64);

/// A thread of the debuggee.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreadInfo {
    pub id: ThreadId,
    pub name: String,
}

/// A loaded assembly.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct AssemblyMirror {
    /// Full display name, e.g. `MyLib, Version=1.0.0.0, Culture=neutral`.
    pub full_name: String,
    /// Simple name, e.g. `MyLib`.
    pub name: String,
    /// Path of the image the assembly was loaded from. Empty or missing for
    /// assemblies generated in memory.
    pub location: PathBuf,
}

/// A type loaded in the debuggee.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TypeMirror {
    pub id: TypeId,
    pub full_name: String,
    pub assembly: AssemblyMirror,
}

/// An executable code location inside a method.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Location {
    pub method: MethodToken,
    pub il_offset: u32,
    pub line: u32,
}

/// A method declared on a loaded type, with its debug information.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MethodMirror {
    pub token: MethodToken,
    pub name: String,
    /// Protocol-level full name, e.g. `Demo.Foo:Bar ()`.
    pub full_name: String,
    /// Display name of the declaring type, generic arguments included.
    pub declaring_type: String,
    /// Full name of the declaring type's assembly.
    pub assembly: String,
    pub source_file: String,
    /// Line-number table, one entry per location, unsorted.
    pub line_numbers: Vec<u32>,
    pub locations: Vec<Location>,
}

/// Lightweight method reference carried by events.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MethodRef {
    pub token: MethodToken,
    pub full_name: String,
}

/// Event kinds that can be enabled session-wide.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EventKind {
    VmStart,
    VmDeath,
    VmDisconnect,
    AssemblyLoad,
    TypeLoad,
}

/// How much of the debuggee was suspended when an event set was delivered.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuspendPolicy {
    None,
    EventThread,
    #[default]
    All,
}

/// A debug event.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Event {
    VmStart,
    VmDeath,
    VmDisconnect,
    AssemblyLoad(AssemblyMirror),
    TypeLoad(TypeMirror),
    Breakpoint {
        request: RequestId,
        method: MethodRef,
        location: Location,
    },
    MethodEntry {
        request: RequestId,
        method: MethodRef,
    },
}

/// A batch of events delivered together.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EventSet {
    pub events: Vec<Event>,
    pub suspend_policy: SuspendPolicy,
}
