//! Whole-session scenarios against a scripted debuggee.

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use covhost::report::{render_report, write_report};
use covhost::{
    CoverHost, HitMode, InvokeTarget, MethodToken, SessionConfig, SessionEnd, SessionOrigin,
    SessionState,
};
use covhost_debug::script::{
    Journal, Script, ScriptAssembly, ScriptBatch, ScriptEvent, ScriptMethod, ScriptType,
    ScriptedDebuggee, ScriptedMetadata,
};
use covhost_debug::{SuspendPolicy, ThreadId, ThreadInfo, TypeId};
use covhost_store::{JsonStore, MemoryStore};
use parking_lot::Mutex;
use tempfile::TempDir;

const BAR: MethodToken = MethodToken(0x0600_0001);
const BAZ: MethodToken = MethodToken(0x0600_0002);
const QUIT: MethodToken = MethodToken(0x0600_0003);

fn method(token: MethodToken, name: &str, lines: &[u32]) -> ScriptMethod {
    ScriptMethod {
        token,
        name: name.to_string(),
        source_file: "/src/Foo.cs".to_string(),
        lines: lines.to_vec(),
    }
}

fn my_lib() -> ScriptAssembly {
    ScriptAssembly {
        full_name: "MyLib, Version=1.0.0.0, Culture=neutral".to_string(),
        name: "MyLib".to_string(),
        location: PathBuf::from("/app/MyLib.dll"),
        in_memory: false,
        malformed: false,
        types: vec![
            ScriptType {
                id: TypeId(1),
                full_name: "Foo".to_string(),
                display_name: None,
                methods: vec![
                    method(BAR, "Bar", &[10, 11, 12]),
                    method(QUIT, "Quit", &[40]),
                ],
            },
            ScriptType {
                id: TypeId(2),
                full_name: "Util.Helpers".to_string(),
                display_name: None,
                methods: vec![method(BAZ, "Baz", &[20, 21])],
            },
        ],
    }
}

fn batch(events: Vec<ScriptEvent>) -> ScriptBatch {
    ScriptBatch {
        suspend: SuspendPolicy::All,
        events,
    }
}

fn load() -> ScriptBatch {
    batch(vec![ScriptEvent::AssemblyLoad {
        assembly: "MyLib".to_string(),
    }])
}

fn hit(method: MethodToken, line: u32) -> ScriptEvent {
    ScriptEvent::Hit { method, line }
}

fn script(batches: Vec<ScriptBatch>) -> Script {
    Script {
        launch: Some(vec!["mono".to_string(), "app.exe".to_string()]),
        threads: vec![ThreadInfo {
            id: ThreadId(1),
            name: "Main".to_string(),
        }],
        assemblies: vec![my_lib()],
        batches,
        ..Script::default()
    }
}

struct Session {
    host: CoverHost,
    journal: Arc<Mutex<Journal>>,
    store: Arc<MemoryStore>,
}

fn launched(script: Script, config: SessionConfig) -> Session {
    let metadata = Box::new(ScriptedMetadata::new(&script));
    let command_line = script.launch.clone().unwrap_or_default();
    let vm = ScriptedDebuggee::launched(script);
    open(vm, metadata, SessionOrigin::Launched { command_line }, config)
}

fn attached(script: Script, config: SessionConfig) -> Session {
    let metadata = Box::new(ScriptedMetadata::new(&script));
    let vm = ScriptedDebuggee::attached(script);
    open(vm, metadata, SessionOrigin::Attached, config)
}

fn open(
    vm: ScriptedDebuggee,
    metadata: Box<ScriptedMetadata>,
    origin: SessionOrigin,
    config: SessionConfig,
) -> Session {
    let journal = vm.journal();
    let store = Arc::new(MemoryStore::new());
    let mut host = CoverHost::new(Box::new(vm), metadata, store.clone(), origin);
    let errors = host.configure(config);
    assert!(errors.is_empty(), "unexpected configuration errors: {errors:?}");
    Session {
        host,
        journal,
        store,
    }
}

fn foo_config() -> SessionConfig {
    SessionConfig::new().with_pattern("^Foo$")
}

#[test]
fn test_foo_bar_scenario() {
    let mut s = launched(
        script(vec![
            load(),
            batch(vec![hit(BAR, 10)]),
            batch(vec![hit(BAR, 11), hit(BAR, 10)]),
            batch(vec![hit(BAR, 10)]),
        ]),
        foo_config(),
    );

    let outcome = s.host.run();
    assert_eq!(outcome.end, SessionEnd::Exited);
    assert_eq!(outcome.saved, Some(2));
    assert!(outcome.is_success());
    assert_eq!(s.host.state(), SessionState::Closed);

    let records = s.host.records();
    let bar = records.iter().find(|r| r.token == BAR).unwrap();
    let hits: Vec<_> = bar.hit_counts().collect();
    assert_eq!(hits, vec![(10, 3), (11, 1), (12, 0)]);
    assert_eq!(bar.call_count(), 3);

    // Helpers does not match ^Foo$.
    assert!(records.iter().all(|r| r.token != BAZ));

    let stored = s.store.document();
    let stored_bar = stored.records().iter().find(|r| r.token == BAR).unwrap();
    assert_eq!(stored_bar, bar);
    assert_eq!(s.store.flushes(), 1);
}

#[test]
fn test_whole_assembly_directive() {
    let mut s = launched(
        script(vec![load(), batch(vec![hit(BAZ, 21)])]),
        SessionConfig::new().with_pattern("assembly:MyLib"),
    );
    s.host.run();

    let records = s.host.records();
    assert_eq!(records.len(), 3);
    let baz = records.iter().find(|r| r.token == BAZ).unwrap();
    assert_eq!(baz.hits(21), Some(1));
    assert_eq!(baz.call_count(), 0);
    assert_eq!(s.host.breakpoint_count(), 6);
    assert_eq!(s.store.meta("match:001").as_deref(), Some("assembly:MyLib"));
}

#[test]
fn test_disconnect_mid_run_still_saves() {
    let mut s = attached(
        script(vec![
            load(),
            batch(vec![hit(BAR, 10)]),
            batch(vec![ScriptEvent::VmDisconnect]),
            batch(vec![hit(BAR, 11)]),
        ]),
        foo_config(),
    );

    let outcome = s.host.run();
    assert_eq!(outcome.end, SessionEnd::Disconnected);
    assert!(outcome.is_success());
    assert!(!outcome.killed);

    let journal = s.journal.lock();
    // Attached debuggees are already running.
    assert!(journal.resume_failures >= 1);
    drop(journal);

    assert_eq!(s.store.flushes(), 1);
    let report = render_report(&s.host.records());
    assert!(report.contains("/src/Foo.cs:0010 1"));
    assert!(report.contains("/src/Foo.cs:0011 0"));
}

#[test]
fn test_repeated_load_events_instrument_once() {
    let mut s = launched(
        script(vec![
            load(),
            load(),
            batch(vec![ScriptEvent::TypeLoad {
                type_name: "Foo".to_string(),
            }]),
            load(),
        ]),
        foo_config(),
    );
    s.host.run();

    assert_eq!(s.host.records().len(), 2);
    assert_eq!(s.host.breakpoint_count(), 4);
    assert_eq!(s.journal.lock().breakpoints_created, 4);
}

#[test]
fn test_type_load_covers_unscannable_assembly() {
    let mut script = script(vec![
        load(),
        batch(vec![ScriptEvent::TypeLoad {
            type_name: "Foo".to_string(),
        }]),
        batch(vec![hit(BAR, 12)]),
    ]);
    script.assemblies[0].malformed = true;

    let mut s = launched(script, foo_config());
    let outcome = s.host.run();
    assert!(outcome.is_success());

    let records = s.host.records();
    let bar = records.iter().find(|r| r.token == BAR).unwrap();
    assert_eq!(bar.hits(12), Some(1));
}

#[test]
fn test_first_hit_mode_disables_breakpoints() {
    let mut s = launched(
        script(vec![
            load(),
            batch(vec![hit(BAR, 10)]),
            batch(vec![hit(BAR, 10)]),
            batch(vec![hit(BAR, 11)]),
            batch(vec![hit(BAR, 10), hit(BAR, 11)]),
        ]),
        foo_config().with_hit_mode(HitMode::FirstHit),
    );
    s.host.run();

    let records = s.host.records();
    let bar = records.iter().find(|r| r.token == BAR).unwrap();
    assert_eq!(bar.hits(10), Some(1));
    assert_eq!(bar.hits(11), Some(1));
    assert_eq!(bar.call_count(), 1);
    assert_eq!(s.journal.lock().disabled_requests.len(), 2);
}

#[test]
fn test_unexpected_error_writes_artifact() {
    let dir = TempDir::new().unwrap();
    let artifact = dir.path().join("covhost.error");
    fs::write(&artifact, "stale").unwrap();

    let mut s = launched(
        script(vec![
            load(),
            batch(vec![hit(BAR, 10)]),
            batch(vec![ScriptEvent::Fail {
                message: "corrupt packet".to_string(),
            }]),
        ]),
        foo_config().with_error_path(&artifact),
    );

    let outcome = s.host.run();
    assert!(matches!(
        &outcome.end,
        SessionEnd::Failed(reason) if reason.contains("corrupt packet")
    ));
    assert!(!outcome.is_success());

    let contents = fs::read_to_string(&artifact).unwrap();
    assert!(contents.contains("corrupt packet"));
    assert!(!contents.contains("stale"));

    // Coverage collected before the failure is still saved.
    assert_eq!(s.store.flushes(), 1);
    let stored = s.store.document();
    assert_eq!(stored.records().iter().find(|r| r.token == BAR).unwrap().hits(10), Some(1));
}

#[test]
fn test_hanging_debuggee_is_killed() {
    let mut script = script(vec![load(), batch(vec![hit(BAR, 10)])]);
    script.hang_on_exit = true;

    let mut s = launched(script, foo_config().with_drain_timeout(Duration::from_millis(10)));
    let outcome = s.host.run();

    assert_eq!(outcome.end, SessionEnd::Disconnected);
    assert!(outcome.killed);
    assert!(s.journal.lock().killed);
    assert_eq!(outcome.saved, Some(2));
}

#[test]
fn test_terminator_exits_launched_debuggee() {
    let mut s = launched(
        script(vec![
            load(),
            batch(vec![hit(BAR, 10)]),
            batch(vec![hit(QUIT, 40)]),
            batch(vec![hit(BAR, 11)]),
        ]),
        foo_config().with_terminator("Foo:Quit ()"),
    );

    let outcome = s.host.run();
    assert_eq!(outcome.end, SessionEnd::Exited);
    assert_eq!(s.journal.lock().exit_code, Some(0));

    let records = s.host.records();
    let quit = records.iter().find(|r| r.token == QUIT).unwrap();
    assert_eq!(quit.hits(40), Some(1));
    let bar = records.iter().find(|r| r.token == BAR).unwrap();
    assert_eq!(bar.hits(11), Some(0));
}

#[test]
fn test_terminator_detaches_from_attached_debuggee() {
    let mut s = attached(
        script(vec![load(), batch(vec![hit(QUIT, 40)]), batch(vec![hit(BAR, 10)])]),
        foo_config().with_terminator("Foo:Quit ()"),
    );

    let outcome = s.host.run();
    assert_eq!(outcome.end, SessionEnd::Disconnected);
    let journal = s.journal.lock();
    assert!(journal.detached);
    assert_eq!(journal.exit_code, None);
    assert!(!journal.killed);
}

#[test]
fn test_invoke_entry_disables_entry_events() {
    let mut s = launched(
        script(vec![
            load(),
            batch(vec![ScriptEvent::Enter { method: BAR }]),
            batch(vec![ScriptEvent::Enter { method: BAR }]),
        ]),
        foo_config().with_invoke(InvokeTarget::parse("Foo.Bar", "Main").unwrap()),
    );

    let outcome = s.host.run();
    assert!(outcome.is_success());

    let journal = s.journal.lock();
    assert_eq!(journal.invocations.len(), 1);
    assert_eq!(journal.invocations[0].method, "Bar");
    assert_eq!(journal.disabled_requests.len(), 1);
    drop(journal);

    // Bar has tracked lines, so only a first-line hit counts its calls.
    let records = s.host.records();
    let bar = records.iter().find(|r| r.token == BAR).unwrap();
    assert_eq!(bar.call_count(), 0);
}

#[test]
fn test_invoked_method_counts_one_call_per_entry() {
    let mut s = launched(
        script(vec![
            load(),
            batch(vec![ScriptEvent::Enter { method: BAR }]),
            batch(vec![hit(BAR, 10)]),
            batch(vec![hit(BAR, 11)]),
        ]),
        foo_config().with_invoke(InvokeTarget::parse("Foo.Bar", "Main").unwrap()),
    );
    assert!(s.host.run().is_success());

    let records = s.host.records();
    let bar = records.iter().find(|r| r.token == BAR).unwrap();
    assert_eq!(bar.hits(10), Some(1));
    assert_eq!(bar.hits(11), Some(1));
    assert_eq!(bar.call_count(), 1);
}

#[test]
fn test_invoke_on_unknown_thread_fails_session() {
    let dir = TempDir::new().unwrap();
    let artifact = dir.path().join("covhost.error");
    let mut s = launched(
        script(vec![load()]),
        foo_config()
            .with_invoke(InvokeTarget::parse("Foo.Bar", "Worker").unwrap())
            .with_error_path(&artifact),
    );

    let outcome = s.host.run();
    assert!(matches!(outcome.end, SessionEnd::Failed(_)));
    assert!(artifact.exists());
    assert_eq!(outcome.saved, Some(0));
    assert!(s.journal.lock().invocations.is_empty());
}

#[test]
fn test_periodic_saves() {
    let mut s = launched(
        script(vec![
            load(),
            batch(vec![hit(BAR, 10)]),
            batch(vec![hit(BAR, 11)]),
            batch(vec![hit(BAR, 12)]),
        ]),
        foo_config().with_save_interval(2),
    );
    s.host.run();

    // Event sets 2 and 4 trigger background saves that nobody waits on.
    let deadline = Instant::now() + Duration::from_secs(5);
    while s.store.flushes() < 3 && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(5));
    }
    assert_eq!(s.store.flushes(), 3);
}

#[test]
fn test_json_store_session_and_report() {
    let dir = TempDir::new().unwrap();
    let store_dir = dir.path().join("store");
    let script = script(vec![load(), batch(vec![hit(BAR, 10), hit(BAR, 12)])]);

    let store = Arc::new(JsonStore::open(&store_dir).unwrap());
    let metadata = Box::new(ScriptedMetadata::new(&script));
    let mut host = CoverHost::launch(
        &script,
        &["mono".to_string(), "app.exe".to_string()],
        metadata,
        store,
    )
    .unwrap();
    host.configure(foo_config());
    assert!(host.run().is_success());

    let document = JsonStore::load(&store_dir).unwrap();
    assert_eq!(document.meta("commandline"), Some("mono app.exe"));
    assert_eq!(document.meta("match:000"), Some("^Foo$"));
    assert!(document.meta("started").is_some());

    let report_path = dir.path().join("coverage.txt");
    write_report(&report_path, document.records()).unwrap();
    assert_eq!(
        fs::read_to_string(&report_path).unwrap(),
        "Foo:Bar (MyLib, Version=1.0.0.0, Culture=neutral) calls=1\n\
         /src/Foo.cs:0010 1\n\
         /src/Foo.cs:0011 0\n\
         /src/Foo.cs:0012 1\n\
         Foo:Quit (MyLib, Version=1.0.0.0, Culture=neutral) calls=0\n\
         /src/Foo.cs:0040 0\n"
    );
    assert_eq!(render_report(&host.records()), render_report(document.records()));
}

#[test]
fn test_store_holds_only_latest_session() {
    let dir = TempDir::new().unwrap();
    let store_dir = dir.path().join("store");

    let mut last_report = String::new();
    for hits in [5, 1] {
        let script = script(vec![load(), batch(vec![hit(BAR, 10); hits])]);
        let store = Arc::new(JsonStore::open(&store_dir).unwrap());
        let metadata = Box::new(ScriptedMetadata::new(&script));
        let command_line = script.launch.clone().unwrap_or_default();
        let mut host = CoverHost::launch(&script, &command_line, metadata, store).unwrap();
        host.configure(foo_config());
        assert!(host.run().is_success());
        last_report = render_report(&host.records());
    }

    let document = JsonStore::load(&store_dir).unwrap();
    let bar = document.records().iter().find(|r| r.token == BAR).unwrap();
    assert_eq!(bar.hits(10), Some(1));
    assert_eq!(render_report(document.records()), last_report);
}
