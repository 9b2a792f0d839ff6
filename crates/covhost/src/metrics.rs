//! Session metrics using metrics-rs.
//!
//! The engine records through the `metrics` facade; the CLI installs
//! [`CliRecorder`] to print a summary when the session is over.

use std::fmt::Write as _;
use std::sync::Arc;

use covhost_model::HitOutcome;
use metrics::{
    Counter, Gauge, Histogram, Key, KeyName, Metadata, Recorder, SharedString, Unit, counter,
    describe_counter, describe_gauge, describe_histogram, gauge, histogram,
};
use parking_lot::RwLock;
use rustc_hash::FxHashMap;

/// Why an assembly was not scanned for types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// No image on disk (generated in memory).
    Missing,
    /// The image could not be read.
    Unreadable,
}

impl SkipReason {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Missing => "missing",
            Self::Unreadable => "unreadable",
        }
    }
}

/// Register metric descriptions. Call once at startup.
pub fn init() {
    describe_counter!(
        "covhost_breakpoint_hits_total",
        Unit::Count,
        "Breakpoint hits counted on tracked lines"
    );
    describe_counter!(
        "covhost_method_calls_total",
        Unit::Count,
        "Method calls counted, from first-line hits and entry events"
    );
    describe_counter!(
        "covhost_methods_instrumented_total",
        Unit::Count,
        "Methods given a coverage record"
    );
    describe_counter!(
        "covhost_breakpoints_total",
        Unit::Count,
        "Breakpoint requests created"
    );
    describe_counter!(
        "covhost_assemblies_scanned_total",
        Unit::Count,
        "Assemblies whose metadata was scanned for types"
    );
    describe_counter!(
        "covhost_assemblies_skipped_total",
        Unit::Count,
        "Assemblies that could not be scanned"
    );
    describe_counter!(
        "covhost_event_sets_total",
        Unit::Count,
        "Event sets received from the debuggee"
    );
    describe_counter!("covhost_saves_total", Unit::Count, "Completed saves");

    describe_gauge!(
        "covhost_records",
        Unit::Count,
        "Coverage records in the last save"
    );
    describe_gauge!(
        "covhost_session_seconds",
        Unit::Seconds,
        "Session wall-clock time"
    );

    describe_histogram!(
        "covhost_save_duration_seconds",
        Unit::Seconds,
        "Save duration distribution"
    );
}

/// Record the effect of one breakpoint hit.
pub fn record_hit(outcome: HitOutcome) {
    match outcome {
        HitOutcome::Untracked => {}
        HitOutcome::Line => counter!("covhost_breakpoint_hits_total").increment(1),
        HitOutcome::Entry => {
            counter!("covhost_breakpoint_hits_total").increment(1);
            counter!("covhost_method_calls_total").increment(1);
        }
    }
}

/// Record a call counted from a method-entry event.
pub fn record_entry() {
    counter!("covhost_method_calls_total").increment(1);
}

/// Record a newly instrumented method and its breakpoints.
pub fn record_instrumented(breakpoints: usize) {
    counter!("covhost_methods_instrumented_total").increment(1);
    counter!("covhost_breakpoints_total").increment(breakpoints as u64);
}

pub fn record_assembly_scanned() {
    counter!("covhost_assemblies_scanned_total").increment(1);
}

pub fn record_assembly_skipped(reason: SkipReason) {
    let labels = [("reason", reason.as_str())];
    counter!("covhost_assemblies_skipped_total", &labels).increment(1);
}

pub fn record_event_set() {
    counter!("covhost_event_sets_total").increment(1);
}

/// Record a completed save.
#[allow(clippy::cast_precision_loss)]
pub fn record_save(records: usize, secs: f64) {
    counter!("covhost_saves_total").increment(1);
    gauge!("covhost_records").set(records as f64);
    histogram!("covhost_save_duration_seconds").record(secs);
}

pub fn record_session(secs: f64) {
    gauge!("covhost_session_seconds").set(secs);
}

// ============================================================================
// Summary recorder
// ============================================================================

/// Current value of one metric series.
#[derive(Clone, Debug, PartialEq)]
enum Series {
    Counter(u64),
    Gauge(f64),
    Samples(Vec<f64>),
}

struct Description {
    seconds: bool,
    text: String,
}

/// Series and descriptions shared by the recorder and its handle.
#[derive(Default)]
struct Registry {
    series: RwLock<FxHashMap<String, Series>>,
    descriptions: RwLock<FxHashMap<String, Description>>,
}

impl Registry {
    fn describe(&self, key: &KeyName, unit: Option<Unit>, description: &SharedString) {
        let text: &str = description;
        self.descriptions.write().insert(
            key.as_str().to_string(),
            Description {
                seconds: matches!(unit, Some(Unit::Seconds)),
                text: text.to_string(),
            },
        );
    }
}

/// Handle for one series key. Counters, gauges and histograms all share it;
/// the first update fixes the kind of the series.
struct SeriesHandle {
    key: String,
    registry: Arc<Registry>,
}

impl SeriesHandle {
    fn update(&self, init: impl FnOnce() -> Series, apply: impl FnOnce(&mut Series)) {
        let mut series = self.registry.series.write();
        apply(series.entry(self.key.clone()).or_insert_with(init));
    }

    fn update_gauge(&self, apply: impl FnOnce(&mut f64)) {
        self.update(
            || Series::Gauge(0.0),
            |s| {
                if let Series::Gauge(v) = s {
                    apply(v);
                }
            },
        );
    }
}

impl metrics::CounterFn for SeriesHandle {
    fn increment(&self, value: u64) {
        self.update(
            || Series::Counter(0),
            |s| {
                if let Series::Counter(n) = s {
                    *n += value;
                }
            },
        );
    }

    fn absolute(&self, value: u64) {
        self.update(
            || Series::Counter(0),
            |s| {
                if let Series::Counter(n) = s {
                    *n = (*n).max(value);
                }
            },
        );
    }
}

impl metrics::GaugeFn for SeriesHandle {
    fn increment(&self, value: f64) {
        self.update_gauge(|v| *v += value);
    }

    fn decrement(&self, value: f64) {
        self.update_gauge(|v| *v -= value);
    }

    fn set(&self, value: f64) {
        self.update_gauge(|v| *v = value);
    }
}

impl metrics::HistogramFn for SeriesHandle {
    fn record(&self, value: f64) {
        self.update(
            || Series::Samples(Vec::new()),
            |s| {
                if let Series::Samples(samples) = s {
                    samples.push(value);
                }
            },
        );
    }
}

/// Recorder keeping session metrics in memory for a summary at exit.
#[derive(Default)]
pub struct CliRecorder {
    registry: Arc<Registry>,
}

impl CliRecorder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn handle(&self) -> CliRecorderHandle {
        CliRecorderHandle {
            registry: Arc::clone(&self.registry),
        }
    }

    /// Install this recorder as the global metrics recorder.
    ///
    /// Returns `None` if a recorder is already installed.
    #[must_use]
    pub fn install(self) -> Option<CliRecorderHandle> {
        let handle = self.handle();
        metrics::set_global_recorder(self).ok()?;
        Some(handle)
    }

    fn series(&self, key: &Key) -> Arc<SeriesHandle> {
        Arc::new(SeriesHandle {
            key: series_name(key),
            registry: Arc::clone(&self.registry),
        })
    }
}

/// `name` or `name{label=value,...}`.
fn series_name(key: &Key) -> String {
    let labels: Vec<String> = key
        .labels()
        .map(|l| format!("{}={}", l.key(), l.value()))
        .collect();
    if labels.is_empty() {
        key.name().to_string()
    } else {
        format!("{}{{{}}}", key.name(), labels.join(","))
    }
}

impl Recorder for CliRecorder {
    fn describe_counter(&self, key: KeyName, unit: Option<Unit>, description: SharedString) {
        self.registry.describe(&key, unit, &description);
    }

    fn describe_gauge(&self, key: KeyName, unit: Option<Unit>, description: SharedString) {
        self.registry.describe(&key, unit, &description);
    }

    fn describe_histogram(&self, key: KeyName, unit: Option<Unit>, description: SharedString) {
        self.registry.describe(&key, unit, &description);
    }

    fn register_counter(&self, key: &Key, _metadata: &Metadata<'_>) -> Counter {
        Counter::from_arc(self.series(key))
    }

    fn register_gauge(&self, key: &Key, _metadata: &Metadata<'_>) -> Gauge {
        Gauge::from_arc(self.series(key))
    }

    fn register_histogram(&self, key: &Key, _metadata: &Metadata<'_>) -> Histogram {
        Histogram::from_arc(self.series(key))
    }
}

/// Access to metrics recorded by an installed [`CliRecorder`].
pub struct CliRecorderHandle {
    registry: Arc<Registry>,
}

impl CliRecorderHandle {
    #[must_use]
    pub fn get_counter(&self, key: &str) -> Option<u64> {
        match self.registry.series.read().get(key)? {
            Series::Counter(n) => Some(*n),
            _ => None,
        }
    }

    #[must_use]
    pub fn get_gauge(&self, key: &str) -> Option<f64> {
        match self.registry.series.read().get(key)? {
            Series::Gauge(v) => Some(*v),
            _ => None,
        }
    }

    /// One line per series, sorted by key, with its description.
    #[must_use]
    pub fn summary(&self) -> String {
        let series = self.registry.series.read();
        if series.is_empty() {
            return "No metrics collected.\n".to_string();
        }
        let descriptions = self.registry.descriptions.read();

        let mut entries: Vec<_> = series.iter().collect();
        entries.sort_by(|a, b| a.0.cmp(b.0));
        let width = entries.iter().map(|(k, _)| k.len()).max().unwrap_or(0);

        let mut out = String::from("\n## Session metrics\n\n");
        for (key, value) in entries {
            let name = key.split('{').next().unwrap_or(key);
            let description = descriptions.get(name);
            let unit = if description.is_some_and(|d| d.seconds) { "s" } else { "" };
            let value = match value {
                Series::Counter(n) => n.to_string(),
                Series::Gauge(v) => format!("{v:.3}{unit}"),
                Series::Samples(samples) => sample_stats(samples, unit),
            };
            let text = description.map_or("", |d| d.text.as_str());
            let _ = writeln!(out, "  {key:<width$}  {value:<24}  {text}");
        }
        out
    }

    pub fn print_summary(&self) {
        print!("{}", self.summary());
    }
}

#[allow(clippy::cast_precision_loss)]
fn sample_stats(samples: &[f64], unit: &str) -> String {
    if samples.is_empty() {
        return "n=0".to_string();
    }
    let max = samples.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let mean = samples.iter().sum::<f64>() / samples.len() as f64;
    format!("n={} mean={mean:.3}{unit} max={max:.3}{unit}", samples.len())
}
