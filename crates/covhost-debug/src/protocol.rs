//! The debug-protocol surface consumed by the coverage session.

use std::net::SocketAddr;
use std::time::Duration;

use crate::{
    AssemblyMirror, EventKind, EventSet, Location, MethodMirror, RequestId, Result, ThreadId,
    ThreadInfo, TypeMirror,
};

/// A live debugging session with one debuggee.
///
/// All calls are made from the session's event-loop thread.
pub trait Debuggee: Send {
    /// Enable session-wide delivery of the given event kinds.
    fn enable_events(&mut self, kinds: &[EventKind]) -> Result<()>;

    /// Create a disabled assembly-load request.
    fn create_assembly_load_request(&mut self) -> Result<RequestId>;

    /// Create a disabled method-entry request.
    fn create_method_entry_request(&mut self) -> Result<RequestId>;

    /// Create a disabled breakpoint request at `location`.
    fn create_breakpoint_request(&mut self, location: &Location) -> Result<RequestId>;

    /// Enable or disable an event request.
    fn set_request_enabled(&mut self, request: RequestId, enabled: bool) -> Result<()>;

    /// Suspend every thread of the debuggee.
    fn suspend(&mut self) -> Result<()>;

    /// Resume the debuggee. Fails with `AlreadyRunning` if it is not suspended.
    fn resume(&mut self) -> Result<()>;

    /// Block until the next batch of events arrives.
    fn next_event_set(&mut self) -> Result<EventSet>;

    /// Threads currently alive in the debuggee.
    fn threads(&mut self) -> Result<Vec<ThreadInfo>>;

    /// Look up a loaded type by full name across all assemblies.
    fn find_type(&mut self, full_name: &str) -> Result<Option<TypeMirror>>;

    /// Look up a type by full name inside one assembly.
    fn assembly_type(
        &mut self,
        assembly: &AssemblyMirror,
        full_name: &str,
    ) -> Result<Option<TypeMirror>>;

    /// Methods declared directly on `ty`, with debug information.
    fn type_methods(&mut self, ty: &TypeMirror) -> Result<Vec<MethodMirror>>;

    /// Start invoking a static, parameterless method on `thread` without
    /// waiting for it to return.
    fn begin_invoke(&mut self, thread: ThreadId, ty: &TypeMirror, method: &str) -> Result<()>;

    /// Ask the debuggee process to exit with `code`.
    fn exit(&mut self, code: i32) -> Result<()>;

    /// Detach, leaving the debuggee running.
    fn detach(&mut self) -> Result<()>;

    /// The debuggee process, if this session launched it.
    fn process(&mut self) -> Option<&mut dyn TargetProcess>;
}

/// A debuggee process owned by the session.
pub trait TargetProcess {
    fn has_exited(&mut self) -> bool;

    /// Wait up to `timeout` for the process to exit. Returns true if it did.
    fn wait_for_exit(&mut self, timeout: Duration) -> bool;

    /// Forcibly terminate the process.
    fn kill(&mut self) -> Result<()>;
}

/// Opens debugging sessions.
pub trait Transport {
    /// Launch `args` under the debugger, suspended at startup.
    fn launch(&self, args: &[String]) -> Result<Box<dyn Debuggee>>;

    /// Attach to a debuggee listening on `endpoint`.
    fn connect(&self, endpoint: SocketAddr) -> Result<Box<dyn Debuggee>>;
}
