//! Type discovery and breakpoint placement.
//!
//! Types reach instrumentation through two paths. When an assembly loads,
//! its image is scanned without executing it and every matching declared
//! type is instrumented ahead of time. When the debuggee loads a type on
//! its own, the type-load event catches it, which covers images that could
//! not be scanned. Both paths end in [`Discovery::instrument_type`], which
//! runs at most once per type.

use std::collections::BTreeMap;
use std::sync::Arc;

use covhost_debug::{
    AssemblyMirror, Debuggee, Location, MetadataReader, RequestId, TypeId, TypeMirror,
};
use covhost_model::{
    CoverageRecord, CoverageRecords, MethodToken, RecordSlot, strip_generic_parameters,
};
use covhost_store::CoverageStore;
use parking_lot::Mutex;
use rustc_hash::{FxHashMap, FxHashSet};
use tracing::{debug, info, trace, warn};

use crate::SessionError;
use crate::matcher::PatternMatcher;
use crate::metrics::{self, SkipReason};

/// One breakpoint request and the record line it counts.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BreakpointBinding {
    pub request: RequestId,
    pub location: Location,
    pub slot: RecordSlot,
}

/// Discovery state of a session. Owned by the event-loop thread; only the
/// record index is shared.
pub struct Discovery {
    metadata: Box<dyn MetadataReader>,
    store: Arc<dyn CoverageStore>,
    records: Arc<Mutex<CoverageRecords>>,
    assemblies: FxHashSet<String>,
    types: FxHashSet<TypeId>,
    methods: FxHashSet<MethodToken>,
    bindings: FxHashMap<RequestId, BreakpointBinding>,
}

impl Discovery {
    pub fn new(
        metadata: Box<dyn MetadataReader>,
        store: Arc<dyn CoverageStore>,
        records: Arc<Mutex<CoverageRecords>>,
    ) -> Self {
        Self {
            metadata,
            store,
            records,
            assemblies: FxHashSet::default(),
            types: FxHashSet::default(),
            methods: FxHashSet::default(),
            bindings: FxHashMap::default(),
        }
    }

    /// Scan a loaded assembly and instrument its matching types.
    ///
    /// Each assembly is processed once, identified by its full name. It is
    /// marked processed before the scan, so a missing or unreadable image
    /// is never retried.
    pub fn on_assembly_load(
        &mut self,
        vm: &mut dyn Debuggee,
        matcher: &PatternMatcher,
        assembly: &AssemblyMirror,
    ) -> Result<(), SessionError> {
        if !self.assemblies.insert(assembly.full_name.clone()) {
            return Ok(());
        }
        let location = &assembly.location;
        debug!(assembly = %assembly.full_name, path = %location.display(), "load assembly");

        if location.as_os_str().is_empty() || !self.metadata.exists(location) {
            debug!(
                assembly = %assembly.full_name,
                path = %location.display(),
                "assembly image missing"
            );
            metrics::record_assembly_skipped(SkipReason::Missing);
            return Ok(());
        }

        let declared = match self.metadata.declared_types(location) {
            Ok(declared) => declared,
            Err(e) => {
                warn!(error = %e, path = %location.display(), "could not load types");
                metrics::record_assembly_skipped(SkipReason::Unreadable);
                return Ok(());
            }
        };
        metrics::record_assembly_scanned();

        let whole = matcher.is_whole_assembly(&assembly.name);
        for declared_type in declared {
            if !whole && !matcher.matches_type(&declared_type.full_name) {
                continue;
            }
            debug!(type_name = %declared_type.full_name, "matched type");
            match vm.assembly_type(assembly, &declared_type.full_name)? {
                Some(ty) => {
                    self.instrument_type(vm, matcher, &ty)?;
                }
                None => {
                    let type_name = &declared_type.full_name;
                    trace!(%type_name, "type not visible to the debuggee");
                }
            }
        }
        Ok(())
    }

    /// Handle a type loaded by the debuggee. Returns true if the type
    /// matched a pattern or a whole-assembly directive.
    pub fn on_type_load(
        &mut self,
        vm: &mut dyn Debuggee,
        matcher: &PatternMatcher,
        ty: &TypeMirror,
    ) -> Result<bool, SessionError> {
        trace!(type_name = %ty.full_name, "type load");
        if !matcher.matches_type(&ty.full_name) && !matcher.is_whole_assembly(&ty.assembly.name) {
            return Ok(false);
        }
        self.instrument_type(vm, matcher, ty)?;
        Ok(true)
    }

    /// Create records and breakpoints for every method declared on `ty`.
    ///
    /// Returns the number of breakpoints created; zero when the type was
    /// already instrumented.
    pub fn instrument_type(
        &mut self,
        vm: &mut dyn Debuggee,
        matcher: &PatternMatcher,
        ty: &TypeMirror,
    ) -> Result<usize, SessionError> {
        self.on_assembly_load(vm, matcher, &ty.assembly)?;
        if !self.types.insert(ty.id) {
            return Ok(0);
        }
        info!(type_name = %ty.full_name, "instrumenting type");

        let mut created = 0;
        for method in vm.type_methods(ty)? {
            let record = CoverageRecord::new(
                method.token,
                strip_generic_parameters(&method.declaring_type),
                method.assembly.as_str(),
                method.name.as_str(),
                method.source_file.as_str(),
                method.line_numbers.iter().copied(),
            );
            let (slot, inserted) = self.records.lock().insert(record.clone());
            if inserted {
                debug!(method = %method.full_name, lines = record.lines().len(), "adding method");
                self.store.register_method(&record)?;
            }

            if !self.methods.insert(method.token) {
                continue;
            }
            // One breakpoint per line, at its lowest offset.
            let mut by_line: BTreeMap<u32, Location> = BTreeMap::new();
            for location in &method.locations {
                by_line
                    .entry(location.line)
                    .and_modify(|l| {
                        if location.il_offset < l.il_offset {
                            *l = *location;
                        }
                    })
                    .or_insert(*location);
            }

            let count = by_line.len();
            for location in by_line.into_values() {
                let request = vm.create_breakpoint_request(&location)?;
                vm.set_request_enabled(request, true)?;
                self.bindings.insert(
                    request,
                    BreakpointBinding {
                        request,
                        location,
                        slot,
                    },
                );
            }
            trace!(method = %method.full_name, breakpoints = count, "placed breakpoints");
            metrics::record_instrumented(count);
            created += count;
        }
        Ok(created)
    }

    /// Resolve a breakpoint request to its binding.
    #[must_use]
    pub fn binding(&self, request: RequestId) -> Option<&BreakpointBinding> {
        self.bindings.get(&request)
    }

    #[must_use]
    pub fn breakpoint_count(&self) -> usize {
        self.bindings.len()
    }

    #[must_use]
    pub fn assembly_count(&self) -> usize {
        self.assemblies.len()
    }

    #[must_use]
    pub fn type_count(&self) -> usize {
        self.types.len()
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use covhost_debug::script::{
        Script, ScriptAssembly, ScriptMethod, ScriptType, ScriptedDebuggee, ScriptedMetadata,
    };
    use covhost_store::MemoryStore;

    use super::*;

    fn script(in_memory: bool) -> Script {
        Script {
            launch: Some(vec!["app.exe".to_string()]),
            assemblies: vec![ScriptAssembly {
                full_name: "MyLib, Version=1.0.0.0".to_string(),
                name: "MyLib".to_string(),
                location: PathBuf::from("/app/MyLib.dll"),
                in_memory,
                malformed: false,
                types: vec![
                    ScriptType {
                        id: TypeId(7),
                        full_name: "Foo".to_string(),
                        display_name: Some("Foo[System.Int32]".to_string()),
                        methods: vec![ScriptMethod {
                            token: MethodToken(1),
                            name: "Bar".to_string(),
                            source_file: "Foo.cs".to_string(),
                            // Line 11 spans two locations.
                            lines: vec![10, 11, 11, 12],
                        }],
                    },
                    ScriptType {
                        id: TypeId(8),
                        full_name: "Other".to_string(),
                        display_name: None,
                        methods: vec![ScriptMethod {
                            token: MethodToken(2),
                            name: "Run".to_string(),
                            source_file: "Other.cs".to_string(),
                            lines: vec![5],
                        }],
                    },
                ],
            }],
            ..Script::default()
        }
    }

    struct Fixture {
        vm: ScriptedDebuggee,
        discovery: Discovery,
        records: Arc<Mutex<CoverageRecords>>,
        store: Arc<MemoryStore>,
        assembly: AssemblyMirror,
    }

    fn fixture(in_memory: bool) -> Fixture {
        let script = script(in_memory);
        let metadata = Box::new(ScriptedMetadata::new(&script));
        let store = Arc::new(MemoryStore::new());
        let records = Arc::new(Mutex::new(CoverageRecords::new()));
        let discovery = Discovery::new(metadata, store.clone(), Arc::clone(&records));
        let mut vm = ScriptedDebuggee::launched(script);
        let assembly = vm.find_type("Foo").unwrap().unwrap().assembly;
        Fixture {
            vm,
            discovery,
            records,
            store,
            assembly,
        }
    }

    fn matcher(patterns: &[&str]) -> PatternMatcher {
        let patterns: Vec<String> = patterns.iter().map(ToString::to_string).collect();
        PatternMatcher::from_patterns(&patterns, &MemoryStore::new()).0
    }

    #[test]
    fn test_assembly_scan_instruments_matching_types() {
        let mut f = fixture(false);
        let matcher = matcher(&["^Foo$"]);
        f.discovery
            .on_assembly_load(&mut f.vm, &matcher, &f.assembly)
            .unwrap();

        let records = f.records.lock();
        assert_eq!(records.len(), 1);
        let record = records.get_by_token(MethodToken(1)).unwrap();
        assert_eq!(record.class_name, "Foo");
        assert_eq!(record.lines(), &[10, 11, 12]);
        assert_eq!(f.discovery.breakpoint_count(), 3);
        assert_eq!(f.store.document().records().len(), 1);
    }

    #[test]
    fn test_whole_assembly_directive() {
        let mut f = fixture(false);
        let matcher = matcher(&["assembly:MyLib"]);
        f.discovery
            .on_assembly_load(&mut f.vm, &matcher, &f.assembly)
            .unwrap();
        assert_eq!(f.records.lock().len(), 2);
        assert_eq!(f.discovery.type_count(), 2);
        assert_eq!(f.discovery.breakpoint_count(), 4);
    }

    #[test]
    fn test_discovery_is_idempotent() {
        let mut f = fixture(false);
        let matcher = matcher(&["^Foo$"]);
        let ty = f.vm.find_type("Foo").unwrap().unwrap();
        for _ in 0..2 {
            f.discovery
                .on_assembly_load(&mut f.vm, &matcher, &f.assembly)
                .unwrap();
            assert!(f.discovery.on_type_load(&mut f.vm, &matcher, &ty).unwrap());
        }
        assert_eq!(f.discovery.instrument_type(&mut f.vm, &matcher, &ty).unwrap(), 0);
        assert_eq!(f.records.lock().len(), 1);
        assert_eq!(f.discovery.breakpoint_count(), 3);
        assert_eq!(f.vm.journal().lock().breakpoints_created, 3);
        assert_eq!(f.discovery.assembly_count(), 1);
    }

    #[test]
    fn test_missing_image_falls_back_to_type_load() {
        let mut f = fixture(true);
        let matcher = matcher(&["^Foo$"]);
        f.discovery
            .on_assembly_load(&mut f.vm, &matcher, &f.assembly)
            .unwrap();
        assert_eq!(f.records.lock().len(), 0);

        let ty = f.vm.find_type("Foo").unwrap().unwrap();
        assert!(f.discovery.on_type_load(&mut f.vm, &matcher, &ty).unwrap());
        assert_eq!(f.records.lock().len(), 1);

        let other = f.vm.find_type("Other").unwrap().unwrap();
        assert!(!f.discovery.on_type_load(&mut f.vm, &matcher, &other).unwrap());
    }

    #[test]
    fn test_binding_resolves_line() {
        let mut f = fixture(false);
        let matcher = matcher(&["^Foo$"]);
        let ty = f.vm.find_type("Foo").unwrap().unwrap();
        f.discovery.instrument_type(&mut f.vm, &matcher, &ty).unwrap();

        let slot = f.records.lock().slot(MethodToken(1)).unwrap();
        let mut lines: Vec<u32> = (1..=3)
            .filter_map(|id| f.discovery.binding(RequestId(id)))
            .inspect(|b| assert_eq!(b.slot, slot))
            .map(|b| b.location.line)
            .collect();
        lines.sort_unstable();
        assert_eq!(lines, vec![10, 11, 12]);
    }
}
