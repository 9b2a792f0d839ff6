//! Scripted debuggee.
//!
//! A [`Script`] describes a debuggee ahead of time: its threads, the
//! assemblies it will load (with their types, methods and line tables) and
//! the ordered batches of events it will raise. [`ScriptedDebuggee`] replays
//! those batches through the [`Debuggee`] contract the way a live runtime
//! would: breakpoint and method-entry events are only raised for requests
//! that are currently enabled, resume fails when nothing is suspended, and
//! exiting or detaching ends the connection.
//!
//! # Format
//!
//! ```json
//! {
//!   "launch": ["mono", "app.exe"],
//!   "threads": [{ "id": 1, "name": "Main" }],
//!   "assemblies": [{
//!     "full_name": "MyLib, Version=1.0.0.0",
//!     "name": "MyLib",
//!     "location": "/app/MyLib.dll",
//!     "types": [{
//!       "id": 7, "full_name": "Foo",
//!       "methods": [{
//!         "token": 100663297, "name": "Bar",
//!         "source_file": "Foo.cs", "lines": [10, 11, 12]
//!       }]
//!     }]
//!   }],
//!   "batches": [
//!     { "events": [{ "event": "assembly_load", "assembly": "MyLib" }] },
//!     { "events": [{ "event": "hit", "method": 100663297, "line": 10 }] }
//!   ]
//! }
//! ```

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use covhost_model::MethodToken;
use parking_lot::Mutex;
use rustc_hash::{FxHashMap, FxHashSet};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, trace};

use crate::{
    AssemblyMirror, DebugError, Debuggee, DeclaredMethod, DeclaredType, Event, EventKind,
    EventSet, Location, MetadataError, MetadataReader, MethodMirror, MethodRef, RequestId,
    Result, SuspendPolicy, TargetProcess, ThreadId, ThreadInfo, Transport, TypeId, TypeMirror,
};

/// Script loading errors.
#[derive(Debug, Error)]
pub enum ScriptError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid script: {0}")]
    Json(#[from] serde_json::Error),
}

/// A scripted debuggee description.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Script {
    /// Command line of a launched debuggee.
    #[serde(default)]
    pub launch: Option<Vec<String>>,
    /// Endpoint of an already-running debuggee.
    #[serde(default)]
    pub attach: Option<SocketAddr>,
    #[serde(default)]
    pub threads: Vec<ThreadInfo>,
    #[serde(default)]
    pub assemblies: Vec<ScriptAssembly>,
    #[serde(default)]
    pub batches: Vec<ScriptBatch>,
    /// The process ignores exit requests and never exits on its own.
    #[serde(default)]
    pub hang_on_exit: bool,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ScriptAssembly {
    pub full_name: String,
    pub name: String,
    #[serde(default)]
    pub location: PathBuf,
    /// Generated in memory: no image on disk.
    #[serde(default)]
    pub in_memory: bool,
    /// The image exists but its metadata cannot be read.
    #[serde(default)]
    pub malformed: bool,
    #[serde(default)]
    pub types: Vec<ScriptType>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ScriptType {
    pub id: TypeId,
    pub full_name: String,
    /// Declaring-type display name; defaults to `full_name`.
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub methods: Vec<ScriptMethod>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ScriptMethod {
    pub token: MethodToken,
    pub name: String,
    #[serde(default)]
    pub source_file: String,
    /// Line table, one location per entry.
    #[serde(default)]
    pub lines: Vec<u32>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ScriptBatch {
    #[serde(default)]
    pub suspend: SuspendPolicy,
    pub events: Vec<ScriptEvent>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ScriptEvent {
    VmStart,
    VmDeath,
    VmDisconnect,
    /// Load of an assembly, by full or simple name. Unknown names load as
    /// in-memory assemblies.
    AssemblyLoad { assembly: String },
    TypeLoad { type_name: String },
    /// Execution reaches `line` of the method with token `method`.
    Hit { method: MethodToken, line: u32 },
    /// Execution enters the method with token `method`.
    Enter { method: MethodToken },
    /// The transport fails with a protocol error.
    Fail { message: String },
}

impl Script {
    /// Parse a script from JSON text.
    pub fn from_json(text: &str) -> std::result::Result<Self, ScriptError> {
        Ok(serde_json::from_str(text)?)
    }

    /// Load a script from a JSON file.
    pub fn load(path: &Path) -> std::result::Result<Self, ScriptError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    fn find_assembly(&self, name: &str) -> Option<&ScriptAssembly> {
        self.assemblies
            .iter()
            .find(|a| a.full_name == name || a.name == name)
    }
}

impl Transport for Script {
    fn launch(&self, args: &[String]) -> Result<Box<dyn Debuggee>> {
        debug!(command = %args.join(" "), "launching scripted debuggee");
        Ok(Box::new(ScriptedDebuggee::launched(self.clone())))
    }

    fn connect(&self, endpoint: SocketAddr) -> Result<Box<dyn Debuggee>> {
        debug!(%endpoint, "attaching to scripted debuggee");
        Ok(Box::new(ScriptedDebuggee::attached(self.clone())))
    }
}

/// A method invocation started through [`Debuggee::begin_invoke`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Invocation {
    pub thread: ThreadId,
    pub type_name: String,
    pub method: String,
}

/// Everything the engine asked the scripted debuggee to do.
#[derive(Clone, Debug, Default)]
pub struct Journal {
    pub enabled_kinds: Vec<EventKind>,
    pub breakpoints_created: usize,
    pub disabled_requests: Vec<RequestId>,
    pub suspends: usize,
    pub resumes: usize,
    pub resume_failures: usize,
    pub invocations: Vec<Invocation>,
    pub events_delivered: usize,
    pub exit_code: Option<i32>,
    pub detached: bool,
    pub killed: bool,
}

#[derive(Clone, Copy, Debug)]
enum RequestKind {
    AssemblyLoad,
    MethodEntry,
    Breakpoint(Location),
}

#[derive(Clone, Copy, Debug)]
struct Request {
    kind: RequestKind,
    enabled: bool,
}

/// Position of a type inside the script: (assembly index, type index).
type TypePos = (usize, usize);

/// Debuggee that replays a [`Script`].
pub struct ScriptedDebuggee {
    script: Script,
    batches: VecDeque<ScriptBatch>,
    types_by_name: FxHashMap<String, TypePos>,
    methods: FxHashMap<MethodToken, (TypePos, usize)>,
    enabled_kinds: FxHashSet<EventKind>,
    requests: FxHashMap<RequestId, Request>,
    next_request: u32,
    suspended: bool,
    connected: bool,
    exit_pending: bool,
    process: Option<ScriptedProcess>,
    journal: Arc<Mutex<Journal>>,
}

impl ScriptedDebuggee {
    /// A debuggee launched by the session, suspended at startup.
    #[must_use]
    pub fn launched(script: Script) -> Self {
        let journal = Arc::new(Mutex::new(Journal::default()));
        let process = ScriptedProcess {
            exited: false,
            hangs: script.hang_on_exit,
            journal: Arc::clone(&journal),
        };
        let mut vm = Self::new(script, journal);
        vm.suspended = true;
        vm.process = Some(process);
        vm
    }

    /// A debuggee the session attached to; already running.
    #[must_use]
    pub fn attached(script: Script) -> Self {
        let journal = Arc::new(Mutex::new(Journal::default()));
        Self::new(script, journal)
    }

    fn new(script: Script, journal: Arc<Mutex<Journal>>) -> Self {
        let mut types_by_name = FxHashMap::default();
        let mut methods = FxHashMap::default();
        for (ai, assembly) in script.assemblies.iter().enumerate() {
            for (ti, ty) in assembly.types.iter().enumerate() {
                types_by_name.insert(ty.full_name.clone(), (ai, ti));
                for (mi, method) in ty.methods.iter().enumerate() {
                    methods.insert(method.token, ((ai, ti), mi));
                }
            }
        }

        Self {
            batches: script.batches.iter().cloned().collect(),
            script,
            types_by_name,
            methods,
            enabled_kinds: FxHashSet::default(),
            requests: FxHashMap::default(),
            next_request: 1,
            suspended: false,
            connected: true,
            exit_pending: false,
            process: None,
            journal,
        }
    }

    /// Shared view of the actions taken on this debuggee.
    #[must_use]
    pub fn journal(&self) -> Arc<Mutex<Journal>> {
        Arc::clone(&self.journal)
    }

    fn assembly_mirror(assembly: &ScriptAssembly) -> AssemblyMirror {
        AssemblyMirror {
            full_name: assembly.full_name.clone(),
            name: assembly.name.clone(),
            location: assembly.location.clone(),
        }
    }

    fn type_mirror(&self, (ai, ti): TypePos) -> TypeMirror {
        let assembly = &self.script.assemblies[ai];
        let ty = &assembly.types[ti];
        TypeMirror {
            id: ty.id,
            full_name: ty.full_name.clone(),
            assembly: Self::assembly_mirror(assembly),
        }
    }

    fn method_mirror(&self, (ai, ti): TypePos, mi: usize) -> MethodMirror {
        let assembly = &self.script.assemblies[ai];
        let ty = &assembly.types[ti];
        let method = &ty.methods[mi];
        let locations = method
            .lines
            .iter()
            .zip(0u32..)
            .map(|(&line, il_offset)| Location {
                method: method.token,
                il_offset,
                line,
            })
            .collect();

        MethodMirror {
            token: method.token,
            name: method.name.clone(),
            full_name: format!("{}:{} ()", ty.full_name, method.name),
            declaring_type: ty
                .display_name
                .clone()
                .unwrap_or_else(|| ty.full_name.clone()),
            assembly: assembly.full_name.clone(),
            source_file: method.source_file.clone(),
            line_numbers: method.lines.clone(),
            locations,
        }
    }

    fn method_ref(&self, token: MethodToken) -> Option<MethodRef> {
        let &(pos, mi) = self.methods.get(&token)?;
        let method = self.method_mirror(pos, mi);
        Some(MethodRef {
            token,
            full_name: method.full_name,
        })
    }

    fn alloc_request(&mut self, kind: RequestKind) -> RequestId {
        let id = RequestId(self.next_request);
        self.next_request += 1;
        self.requests.insert(
            id,
            Request {
                kind,
                enabled: false,
            },
        );
        id
    }

    fn enabled_request(&self, matches: impl Fn(&RequestKind) -> bool) -> Option<RequestId> {
        let mut ids: Vec<_> = self
            .requests
            .iter()
            .filter(|(_, r)| r.enabled && matches(&r.kind))
            .map(|(&id, _)| id)
            .collect();
        ids.sort_unstable();
        ids.first().copied()
    }

    fn assembly_load_enabled(&self) -> bool {
        self.enabled_kinds.contains(&EventKind::AssemblyLoad)
            || self
                .enabled_request(|k| matches!(k, RequestKind::AssemblyLoad))
                .is_some()
    }

    /// Translate one scripted event into what a live runtime would deliver.
    fn translate(&self, event: &ScriptEvent) -> Result<Option<Event>> {
        let event = match event {
            ScriptEvent::VmStart => self
                .enabled_kinds
                .contains(&EventKind::VmStart)
                .then_some(Event::VmStart),
            ScriptEvent::VmDeath => self
                .enabled_kinds
                .contains(&EventKind::VmDeath)
                .then_some(Event::VmDeath),
            ScriptEvent::VmDisconnect => Some(Event::VmDisconnect),
            ScriptEvent::AssemblyLoad { assembly } => {
                if self.assembly_load_enabled() {
                    let mirror = self.script.find_assembly(assembly).map_or_else(
                        || in_memory_assembly(assembly),
                        Self::assembly_mirror,
                    );
                    Some(Event::AssemblyLoad(mirror))
                } else {
                    None
                }
            }
            ScriptEvent::TypeLoad { type_name } => {
                if self.enabled_kinds.contains(&EventKind::TypeLoad) {
                    self.types_by_name
                        .get(type_name)
                        .map(|&pos| Event::TypeLoad(self.type_mirror(pos)))
                } else {
                    None
                }
            }
            ScriptEvent::Hit { method, line } => {
                let request = self.enabled_request(|k| {
                    matches!(
                        k,
                        RequestKind::Breakpoint(loc) if loc.method == *method && loc.line == *line
                    )
                });
                match (request, self.method_ref(*method)) {
                    (Some(request), Some(method_ref)) => {
                        let Some(Request {
                            kind: RequestKind::Breakpoint(location),
                            ..
                        }) = self.requests.get(&request).copied()
                        else {
                            return Err(DebugError::InvalidRequest(request));
                        };
                        Some(Event::Breakpoint {
                            request,
                            method: method_ref,
                            location,
                        })
                    }
                    _ => None,
                }
            }
            ScriptEvent::Enter { method } => {
                let request = self.enabled_request(|k| matches!(k, RequestKind::MethodEntry));
                match (request, self.method_ref(*method)) {
                    (Some(request), Some(method_ref)) => Some(Event::MethodEntry {
                        request,
                        method: method_ref,
                    }),
                    _ => None,
                }
            }
            ScriptEvent::Fail { message } => return Err(DebugError::Protocol(message.clone())),
        };
        Ok(event)
    }

    fn end_of_script(&mut self) -> Result<EventSet> {
        match self.process.as_mut() {
            Some(process) if !process.hangs => {
                process.exited = true;
                self.connected = false;
                Ok(EventSet {
                    events: vec![Event::VmDeath],
                    suspend_policy: SuspendPolicy::None,
                })
            }
            _ => {
                self.connected = false;
                Err(DebugError::Disconnected)
            }
        }
    }
}

fn in_memory_assembly(name: &str) -> AssemblyMirror {
    let simple = name.split(',').next().unwrap_or(name).trim();
    AssemblyMirror {
        full_name: name.to_string(),
        name: simple.to_string(),
        location: PathBuf::new(),
    }
}

impl Debuggee for ScriptedDebuggee {
    fn enable_events(&mut self, kinds: &[EventKind]) -> Result<()> {
        self.enabled_kinds.extend(kinds.iter().copied());
        self.journal.lock().enabled_kinds.extend_from_slice(kinds);
        Ok(())
    }

    fn create_assembly_load_request(&mut self) -> Result<RequestId> {
        Ok(self.alloc_request(RequestKind::AssemblyLoad))
    }

    fn create_method_entry_request(&mut self) -> Result<RequestId> {
        Ok(self.alloc_request(RequestKind::MethodEntry))
    }

    fn create_breakpoint_request(&mut self, location: &Location) -> Result<RequestId> {
        if !self.connected {
            return Err(DebugError::Disconnected);
        }
        self.journal.lock().breakpoints_created += 1;
        Ok(self.alloc_request(RequestKind::Breakpoint(*location)))
    }

    fn set_request_enabled(&mut self, request: RequestId, enabled: bool) -> Result<()> {
        let entry = self
            .requests
            .get_mut(&request)
            .ok_or(DebugError::InvalidRequest(request))?;
        entry.enabled = enabled;
        if !enabled {
            self.journal.lock().disabled_requests.push(request);
        }
        Ok(())
    }

    fn suspend(&mut self) -> Result<()> {
        if !self.connected {
            return Err(DebugError::Disconnected);
        }
        self.suspended = true;
        self.journal.lock().suspends += 1;
        Ok(())
    }

    fn resume(&mut self) -> Result<()> {
        if !self.connected {
            return Err(DebugError::Disconnected);
        }
        if !self.suspended {
            self.journal.lock().resume_failures += 1;
            return Err(DebugError::AlreadyRunning);
        }
        self.suspended = false;
        self.journal.lock().resumes += 1;
        Ok(())
    }

    fn next_event_set(&mut self) -> Result<EventSet> {
        if !self.connected {
            return Err(DebugError::Disconnected);
        }
        if self.exit_pending {
            self.exit_pending = false;
            self.connected = false;
            return Ok(EventSet {
                events: vec![Event::VmDeath],
                suspend_policy: SuspendPolicy::None,
            });
        }

        while let Some(batch) = self.batches.pop_front() {
            let mut events = Vec::with_capacity(batch.events.len());
            for scripted in &batch.events {
                if let Some(event) = self.translate(scripted)? {
                    events.push(event);
                } else {
                    trace!(event = ?scripted, "scripted event not observed");
                }
            }
            if events.is_empty() {
                continue;
            }
            if batch.suspend != SuspendPolicy::None {
                self.suspended = true;
            }
            self.journal.lock().events_delivered += events.len();
            return Ok(EventSet {
                events,
                suspend_policy: batch.suspend,
            });
        }

        self.end_of_script()
    }

    fn threads(&mut self) -> Result<Vec<ThreadInfo>> {
        Ok(self.script.threads.clone())
    }

    fn find_type(&mut self, full_name: &str) -> Result<Option<TypeMirror>> {
        Ok(self
            .types_by_name
            .get(full_name)
            .map(|&pos| self.type_mirror(pos)))
    }

    fn assembly_type(
        &mut self,
        assembly: &AssemblyMirror,
        full_name: &str,
    ) -> Result<Option<TypeMirror>> {
        Ok(self
            .types_by_name
            .get(full_name)
            .filter(|&&(ai, _)| self.script.assemblies[ai].full_name == assembly.full_name)
            .map(|&pos| self.type_mirror(pos)))
    }

    fn type_methods(&mut self, ty: &TypeMirror) -> Result<Vec<MethodMirror>> {
        let &pos = self
            .types_by_name
            .get(&ty.full_name)
            .ok_or_else(|| DebugError::TypeNotFound(ty.full_name.clone()))?;
        let count = self.script.assemblies[pos.0].types[pos.1].methods.len();
        Ok((0..count).map(|mi| self.method_mirror(pos, mi)).collect())
    }

    fn begin_invoke(&mut self, thread: ThreadId, ty: &TypeMirror, method: &str) -> Result<()> {
        if !self.suspended {
            return Err(DebugError::Protocol(
                "invoke requires a suspended debuggee".to_string(),
            ));
        }
        if !self.script.threads.iter().any(|t| t.id == thread) {
            return Err(DebugError::ThreadNotFound(format!("{thread:?}")));
        }
        let &(ai, ti) = self
            .types_by_name
            .get(&ty.full_name)
            .ok_or_else(|| DebugError::TypeNotFound(ty.full_name.clone()))?;
        if !self.script.assemblies[ai].types[ti]
            .methods
            .iter()
            .any(|m| m.name == method)
        {
            return Err(DebugError::MethodNotFound {
                type_name: ty.full_name.clone(),
                method: method.to_string(),
            });
        }
        self.journal.lock().invocations.push(Invocation {
            thread,
            type_name: ty.full_name.clone(),
            method: method.to_string(),
        });
        Ok(())
    }

    fn exit(&mut self, code: i32) -> Result<()> {
        if !self.connected {
            return Err(DebugError::Disconnected);
        }
        self.journal.lock().exit_code = Some(code);
        if let Some(process) = self.process.as_mut().filter(|p| !p.hangs) {
            process.exited = true;
            self.exit_pending = true;
        }
        Ok(())
    }

    fn detach(&mut self) -> Result<()> {
        if !self.connected {
            return Err(DebugError::Disconnected);
        }
        self.connected = false;
        self.journal.lock().detached = true;
        Ok(())
    }

    fn process(&mut self) -> Option<&mut dyn TargetProcess> {
        self.process.as_mut().map(|p| p as &mut dyn TargetProcess)
    }
}

/// Process handle of a launched scripted debuggee.
struct ScriptedProcess {
    exited: bool,
    hangs: bool,
    journal: Arc<Mutex<Journal>>,
}

impl TargetProcess for ScriptedProcess {
    fn has_exited(&mut self) -> bool {
        self.exited
    }

    fn wait_for_exit(&mut self, _timeout: Duration) -> bool {
        if !self.hangs {
            self.exited = true;
        }
        self.exited
    }

    fn kill(&mut self) -> Result<()> {
        self.exited = true;
        self.journal.lock().killed = true;
        Ok(())
    }
}

/// Metadata reader answering from a [`Script`]'s assembly descriptions.
pub struct ScriptedMetadata {
    assemblies: Vec<ScriptAssembly>,
}

impl ScriptedMetadata {
    #[must_use]
    pub fn new(script: &Script) -> Self {
        Self {
            assemblies: script.assemblies.clone(),
        }
    }

    fn image(&self, path: &Path) -> Option<&ScriptAssembly> {
        self.assemblies
            .iter()
            .find(|a| !a.in_memory && !a.location.as_os_str().is_empty() && a.location == path)
    }
}

impl MetadataReader for ScriptedMetadata {
    fn exists(&self, path: &Path) -> bool {
        self.image(path).is_some()
    }

    fn declared_types(&self, path: &Path) -> std::result::Result<Vec<DeclaredType>, MetadataError> {
        let assembly = self
            .image(path)
            .ok_or_else(|| MetadataError::LoadFailure(path.to_path_buf()))?;
        if assembly.malformed {
            return Err(MetadataError::Malformed {
                path: path.to_path_buf(),
                reason: "bad CLI header".to_string(),
            });
        }

        Ok(assembly
            .types
            .iter()
            .map(|ty| DeclaredType {
                full_name: ty.full_name.clone(),
                methods: ty
                    .methods
                    .iter()
                    .map(|m| DeclaredMethod {
                        name: m.name.clone(),
                        declaring_type: ty.full_name.clone(),
                        source_file: m.source_file.clone(),
                        line_numbers: m.lines.clone(),
                    })
                    .collect(),
            })
            .collect())
    }
}
