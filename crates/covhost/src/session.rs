//! Coverage session: configuration, event loop, drain and save.

use std::fmt;
use std::fs;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::Instant;

use covhost_debug::{
    DebugError, Debuggee, Event, EventKind, Location, MetadataReader, MethodRef, RequestId,
    SuspendPolicy, Transport,
};
use covhost_model::{CoverageRecord, CoverageRecords};
use covhost_store::CoverageStore;
use parking_lot::Mutex;
use tracing::{debug, error, info, trace, warn};

use crate::config::{HitMode, InvokeTarget, SessionConfig};
use crate::discovery::Discovery;
use crate::matcher::PatternMatcher;
use crate::metrics;
use crate::persist::Persister;
use crate::{ConfigError, SessionError};

/// Event kinds observed for the whole session.
const SESSION_EVENTS: [EventKind; 5] = [
    EventKind::VmStart,
    EventKind::VmDeath,
    EventKind::VmDisconnect,
    EventKind::AssemblyLoad,
    EventKind::TypeLoad,
];

/// Lifecycle of a session.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    Configuring,
    Running,
    Draining,
    Saved,
    Closed,
}

/// How the session got hold of its debuggee.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SessionOrigin {
    /// The session launched the process and owns it.
    Launched { command_line: Vec<String> },
    /// The session attached to a process that keeps running without it.
    Attached,
}

/// Why the event loop stopped.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SessionEnd {
    /// The debuggee process exited.
    Exited,
    /// The connection to the debuggee was lost or closed.
    Disconnected,
    /// An unexpected error; details are in the error artifact.
    Failed(String),
}

impl fmt::Display for SessionEnd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exited => write!(f, "debuggee exited"),
            Self::Disconnected => write!(f, "debuggee disconnected"),
            Self::Failed(reason) => write!(f, "session failed: {reason}"),
        }
    }
}

/// Result of [`CoverHost::run`].
#[derive(Clone, Debug)]
pub struct SessionOutcome {
    pub end: SessionEnd,
    /// Records persisted by the final save, `None` if it failed.
    pub saved: Option<usize>,
    /// Whether the debuggee had to be killed during drain.
    pub killed: bool,
    pub event_sets: u64,
}

impl SessionOutcome {
    #[must_use]
    pub fn is_success(&self) -> bool {
        !matches!(self.end, SessionEnd::Failed(_)) && self.saved.is_some()
    }
}

/// A live coverage session over one debuggee.
pub struct CoverHost {
    debuggee: Box<dyn Debuggee>,
    origin: SessionOrigin,
    config: SessionConfig,
    matcher: PatternMatcher,
    discovery: Discovery,
    records: Arc<Mutex<CoverageRecords>>,
    store: Arc<dyn CoverageStore>,
    persister: Persister,
    entry_request: Option<RequestId>,
    event_sets: u64,
    state: SessionState,
}

impl CoverHost {
    pub fn new(
        debuggee: Box<dyn Debuggee>,
        metadata: Box<dyn MetadataReader>,
        store: Arc<dyn CoverageStore>,
        origin: SessionOrigin,
    ) -> Self {
        let records = Arc::new(Mutex::new(CoverageRecords::new()));
        Self {
            debuggee,
            origin,
            config: SessionConfig::default(),
            matcher: PatternMatcher::new(),
            discovery: Discovery::new(metadata, Arc::clone(&store), Arc::clone(&records)),
            persister: Persister::new(Arc::clone(&records), Arc::clone(&store)),
            records,
            store,
            entry_request: None,
            event_sets: 0,
            state: SessionState::Configuring,
        }
    }

    /// Launch `command_line` suspended and open a session on it.
    pub fn launch(
        transport: &dyn Transport,
        command_line: &[String],
        metadata: Box<dyn MetadataReader>,
        store: Arc<dyn CoverageStore>,
    ) -> Result<Self, SessionError> {
        info!(command = %command_line.join(" "), "launching debuggee");
        let debuggee = transport.launch(command_line)?;
        let origin = SessionOrigin::Launched {
            command_line: command_line.to_vec(),
        };
        Ok(Self::new(debuggee, metadata, store, origin))
    }

    /// Attach to a debuggee listening on `endpoint`.
    pub fn connect(
        transport: &dyn Transport,
        endpoint: SocketAddr,
        metadata: Box<dyn MetadataReader>,
        store: Arc<dyn CoverageStore>,
    ) -> Result<Self, SessionError> {
        info!(%endpoint, "attaching to debuggee");
        let debuggee = transport.connect(endpoint)?;
        Ok(Self::new(debuggee, metadata, store, SessionOrigin::Attached))
    }

    /// Apply `config` and record the session metadata.
    ///
    /// Rejected settings are returned; everything else still applies.
    pub fn configure(&mut self, config: SessionConfig) -> Vec<ConfigError> {
        let mut errors = Vec::new();

        if let SessionOrigin::Launched { command_line } = &self.origin {
            if let Err(e) = self.store.save_meta("commandline", &command_line.join(" ")) {
                errors.push(e.into());
            }
        }
        let started = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string();
        if let Err(e) = self.store.save_meta("started", &started) {
            errors.push(e.into());
        }

        let (matcher, rejected) =
            PatternMatcher::from_patterns(&config.patterns, self.store.as_ref());
        for e in &rejected {
            warn!(error = %e, "rejected pattern");
        }
        errors.extend(rejected);
        if matcher.is_empty() {
            warn!("no patterns configured; nothing will be instrumented");
        }

        self.matcher = matcher;
        self.config = config;
        errors
    }

    #[must_use]
    pub const fn state(&self) -> SessionState {
        self.state
    }

    #[must_use]
    pub const fn origin(&self) -> &SessionOrigin {
        &self.origin
    }

    /// Snapshot of every record, in discovery order.
    #[must_use]
    pub fn records(&self) -> Vec<CoverageRecord> {
        self.records.lock().snapshot()
    }

    #[must_use]
    pub fn breakpoint_count(&self) -> usize {
        self.discovery.breakpoint_count()
    }

    /// Run the session to completion.
    ///
    /// The event loop runs on its own thread until the debuggee exits,
    /// disconnects or an error occurs. A launched debuggee is then given
    /// the drain grace period before it is killed, and the records are
    /// saved once, blocking until the store is done.
    pub fn run(&mut self) -> SessionOutcome {
        let started = Instant::now();
        let error_path = self.config.error_path.clone();

        let end = thread::scope(|scope| {
            let spawned = thread::Builder::new()
                .name("covhost-events".to_string())
                .spawn_scoped(scope, || self.run_events());
            match spawned {
                Ok(handle) => handle.join().unwrap_or_else(|_| {
                    error!("event loop panicked");
                    write_error_artifact(&error_path, &"event loop panicked");
                    SessionEnd::Failed("event loop panicked".to_string())
                }),
                Err(e) => SessionEnd::Failed(format!("could not start event loop: {e}")),
            }
        });

        let killed = self.drain();

        info!("saving data");
        let saved = match self.persister.save_blocking() {
            Ok(count) => {
                info!(records = count, "saved coverage");
                Some(count)
            }
            Err(e) => {
                error!(error = %e, "final save failed");
                None
            }
        };
        self.transition(SessionState::Saved);

        metrics::record_session(started.elapsed().as_secs_f64());
        self.transition(SessionState::Closed);

        SessionOutcome {
            end,
            saved,
            killed,
            event_sets: self.event_sets,
        }
    }

    fn transition(&mut self, next: SessionState) {
        info!(from = ?self.state, to = ?next, "session state");
        self.state = next;
    }

    fn run_events(&mut self) -> SessionEnd {
        self.transition(SessionState::Running);
        match self.event_loop() {
            Ok(end) => {
                info!(%end, "event loop finished");
                end
            }
            Err(SessionError::Debug(DebugError::Disconnected)) => {
                info!("vm disconnected");
                SessionEnd::Disconnected
            }
            Err(e) => {
                error!(error = %e, "event loop failed");
                write_error_artifact(&self.config.error_path, &e);
                SessionEnd::Failed(e.to_string())
            }
        }
    }

    fn event_loop(&mut self) -> Result<SessionEnd, SessionError> {
        self.start()?;

        loop {
            let set = self.debuggee.next_event_set()?;
            self.event_sets += 1;
            metrics::record_event_set();
            trace!(events = set.events.len(), policy = ?set.suspend_policy, "event set");

            for event in set.events {
                if self.dispatch(event)? {
                    return Ok(SessionEnd::Disconnected);
                }
            }

            if set.suspend_policy != SuspendPolicy::None {
                self.resume()?;
            }
            if self.debuggee.process().is_some_and(|p| p.has_exited()) {
                info!("debuggee has exited");
                return Ok(SessionEnd::Exited);
            }
            if self
                .config
                .save_interval
                .is_some_and(|n| n > 0 && self.event_sets % n == 0)
            {
                // Fire and forget; the final save is the one that is waited on.
                drop(self.persister.save());
            }
        }
    }

    /// Observe events, run the invoke target if configured, and let the
    /// debuggee run.
    fn start(&mut self) -> Result<(), SessionError> {
        self.debuggee.enable_events(&SESSION_EVENTS)?;
        let assembly_load = self.debuggee.create_assembly_load_request()?;
        self.debuggee.set_request_enabled(assembly_load, true)?;
        let entry = self.debuggee.create_method_entry_request()?;

        if let Some(invoke) = self.config.invoke.clone() {
            self.debuggee.suspend()?;
            self.debuggee.set_request_enabled(entry, true)?;
            self.entry_request = Some(entry);
            self.invoke(&invoke)?;
        }

        self.resume()
    }

    fn invoke(&mut self, target: &InvokeTarget) -> Result<(), SessionError> {
        let ty = self
            .debuggee
            .find_type(&target.type_name)?
            .ok_or_else(|| DebugError::TypeNotFound(target.type_name.clone()))?;
        let thread = self
            .debuggee
            .threads()?
            .into_iter()
            .find(|t| t.name == target.thread)
            .ok_or_else(|| DebugError::ThreadNotFound(target.thread.clone()))?;

        info!(
            method = %format!("{}.{}", target.type_name, target.method),
            thread = %target.thread,
            "invoking"
        );
        self.debuggee.begin_invoke(thread.id, &ty, &target.method)?;
        Ok(())
    }

    /// Resume the debuggee. A debuggee that is already running (typical
    /// right after attaching) is not an error.
    fn resume(&mut self) -> Result<(), SessionError> {
        match self.debuggee.resume() {
            Ok(()) => Ok(()),
            Err(DebugError::AlreadyRunning) => {
                debug!("debuggee already running");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Route one event to its handler. Returns true on disconnect.
    fn dispatch(&mut self, event: Event) -> Result<bool, SessionError> {
        match event {
            Event::Breakpoint {
                request,
                method,
                location,
            } => self.on_breakpoint(request, &method, location)?,
            Event::MethodEntry { request, method } => self.on_method_entry(request, &method)?,
            Event::AssemblyLoad(assembly) => {
                self.discovery
                    .on_assembly_load(self.debuggee.as_mut(), &self.matcher, &assembly)?;
            }
            Event::TypeLoad(ty) => {
                self.discovery
                    .on_type_load(self.debuggee.as_mut(), &self.matcher, &ty)?;
            }
            Event::VmDisconnect => return Ok(true),
            Event::VmStart | Event::VmDeath => trace!(?event, "ignored"),
        }
        Ok(false)
    }

    fn on_breakpoint(
        &mut self,
        request: RequestId,
        method: &MethodRef,
        location: Location,
    ) -> Result<(), SessionError> {
        if self.config.terminator.as_deref() == Some(method.full_name.as_str()) {
            info!(method = %method.full_name, "terminator reached");
            self.terminate()?;
        }

        let Some(binding) = self.discovery.binding(request).copied() else {
            trace!(%request, method = %method.full_name, "breakpoint without binding");
            return Ok(());
        };
        let outcome = self
            .records
            .lock()
            .record_hit(binding.slot, binding.location.line);
        trace!(method = %method.full_name, line = location.line, ?outcome, "hit");
        metrics::record_hit(outcome);

        if self.config.hit_mode == HitMode::FirstHit {
            self.debuggee.set_request_enabled(request, false)?;
        }
        Ok(())
    }

    fn on_method_entry(
        &mut self,
        request: RequestId,
        method: &MethodRef,
    ) -> Result<(), SessionError> {
        debug!(method = %method.full_name, "call");
        if self.records.lock().record_entry(method.token) {
            metrics::record_entry();
        }
        // Entry events are only wanted while the invoke target starts.
        if let Some(entry) = self.entry_request.take() {
            debug!(%request, "disabling method entry events");
            self.debuggee.set_request_enabled(entry, false)?;
        }
        Ok(())
    }

    /// End the session from the debuggee side: exit a launched process,
    /// detach from an attached one.
    fn terminate(&mut self) -> Result<(), SessionError> {
        match self.origin {
            SessionOrigin::Launched { .. } => self.debuggee.exit(0)?,
            SessionOrigin::Attached => self.debuggee.detach()?,
        }
        Ok(())
    }

    /// Give a launched debuggee the grace period, then kill it. Returns
    /// true if it had to be killed.
    fn drain(&mut self) -> bool {
        self.transition(SessionState::Draining);
        let timeout = self.config.drain_timeout;
        let Some(process) = self.debuggee.process() else {
            return false;
        };
        if process.has_exited() || process.wait_for_exit(timeout) {
            return false;
        }

        warn!(timeout_secs = timeout.as_secs(), "vm still running, kill now");
        if let Err(e) = process.kill() {
            error!(error = %e, "could not kill debuggee");
        }
        true
    }
}

/// Write the error artifact, replacing any previous one.
fn write_error_artifact(path: &Path, err: &(impl fmt::Display + fmt::Debug)) {
    let contents = format!("{err}\n\n{err:?}\n");
    match fs::write(path, contents) {
        Ok(()) => info!(path = %path.display(), "wrote error artifact"),
        Err(e) => error!(error = %e, path = %path.display(), "could not write error artifact"),
    }
}
