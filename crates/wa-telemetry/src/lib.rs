//! wa-telemetry
//!
//! Structured logging setup and send-pipeline metrics for the campaign
//! core. `init_tracing` is called once, at process start, by `wa-daemon`
//! and `wa-cli`; everything downstream (the scheduler loop, the gateway,
//! the quota ledger) just uses `tracing`'s macros with `campaign_id`,
//! `account_id`, and `recipient_index` fields already in scope.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use tracing::info;
use tracing_subscriber::EnvFilter;

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialise the global `tracing` subscriber.
///
/// `debug` selects both verbosity and format: pretty, human-readable output
/// at `debug` level when `true` (local development), compact JSON lines at
/// `info` level otherwise (production — one record per line, safe to ship
/// to a log aggregator).
///
/// # Panics
///
/// Panics if a global subscriber has already been installed; callers
/// should invoke this exactly once, at process start.
pub fn init_tracing(debug: bool) {
    let filter = if debug {
        EnvFilter::new("wa=debug,wa_runtime=debug,wa_daemon=debug,wa_cli=debug")
    } else {
        EnvFilter::new("wa=info")
    };

    let subscriber = tracing_subscriber::fmt().with_env_filter(filter);
    if debug {
        subscriber.pretty().init();
    } else {
        subscriber.json().init();
    }
}

// ---------------------------------------------------------------------------
// SendMetrics
// ---------------------------------------------------------------------------

/// Metrics captured for a single recipient send, whether from a campaign or
/// a one-off scheduled message.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SendMetrics {
    /// `true` if a campaign dispatched this send (as opposed to a one-off
    /// scheduled message).
    pub from_campaign: bool,
    /// Wall-clock duration of the whole attempt (including retries), in
    /// milliseconds.
    pub duration_ms: u64,
    /// Total gateway attempts made (1 + retries).
    pub attempts: u32,
    /// Number of distinct `|`-separated variation blocks in the template.
    pub blocks_count: u64,
    /// Number of `{{variable}}` placeholders substituted.
    pub variables_applied: u64,
    /// `true` if the send ultimately succeeded.
    pub succeeded: bool,
}

// ---------------------------------------------------------------------------
// MetricsSummary
// ---------------------------------------------------------------------------

/// Aggregated statistics across multiple recorded sends.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MetricsSummary {
    /// Number of sends recorded.
    pub count: usize,
    /// Mean duration in milliseconds.
    pub mean_duration_ms: f64,
    /// Median (p50) duration in milliseconds.
    pub p50_duration_ms: f64,
    /// 99th-percentile duration in milliseconds.
    pub p99_duration_ms: f64,
    /// Total gateway attempts across all sends (first tries plus retries).
    pub total_attempts: u64,
    /// Success rate (succeeded / total).
    pub success_rate: f64,
    /// Counts split by origin (`"campaign"` / `"scheduled"`), deterministic
    /// ordering.
    pub origin_counts: BTreeMap<String, usize>,
}

impl Default for MetricsSummary {
    fn default() -> Self {
        Self {
            count: 0,
            mean_duration_ms: 0.0,
            p50_duration_ms: 0.0,
            p99_duration_ms: 0.0,
            total_attempts: 0,
            success_rate: 0.0,
            origin_counts: BTreeMap::new(),
        }
    }
}

/// Compute a percentile value from a **sorted** slice.
fn percentile(sorted: &[u64], pct: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    if sorted.len() == 1 {
        return sorted[0] as f64;
    }
    let rank = pct / 100.0 * (sorted.len() - 1) as f64;
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;
    let frac = rank - lower as f64;
    sorted[lower] as f64 * (1.0 - frac) + sorted[upper] as f64 * frac
}

// ---------------------------------------------------------------------------
// MetricsCollector
// ---------------------------------------------------------------------------

/// Thread-safe in-memory collector for [`SendMetrics`].
///
/// Wrap in an `Arc` to share across the campaign scheduler's tasks (the
/// inner storage is already behind a `Mutex`).
#[derive(Debug, Clone)]
pub struct MetricsCollector {
    inner: Arc<Mutex<Vec<SendMetrics>>>,
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsCollector {
    /// Create a new, empty collector.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Record one completed send.
    pub fn record(&self, metrics: SendMetrics) {
        let mut data = self.inner.lock().expect("metrics lock poisoned");
        data.push(metrics);
    }

    /// Return all recorded sends.
    #[must_use]
    pub fn sends(&self) -> Vec<SendMetrics> {
        let data = self.inner.lock().expect("metrics lock poisoned");
        data.clone()
    }

    /// Number of sends recorded so far.
    #[must_use]
    pub fn len(&self) -> usize {
        let data = self.inner.lock().expect("metrics lock poisoned");
        data.len()
    }

    /// Whether the collector has no recorded sends.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Compute an aggregated summary of all recorded sends.
    #[must_use]
    pub fn summary(&self) -> MetricsSummary {
        let data = self.inner.lock().expect("metrics lock poisoned");
        if data.is_empty() {
            return MetricsSummary::default();
        }

        let count = data.len();
        let mut durations: Vec<u64> = data.iter().map(|m| m.duration_ms).collect();
        durations.sort_unstable();

        let total_duration: u64 = durations.iter().sum();
        let mean_duration_ms = total_duration as f64 / count as f64;
        let p50_duration_ms = percentile(&durations, 50.0);
        let p99_duration_ms = percentile(&durations, 99.0);

        let total_attempts: u64 = data.iter().map(|m| u64::from(m.attempts)).sum();
        let succeeded: u64 = data.iter().filter(|m| m.succeeded).count() as u64;
        let success_rate = succeeded as f64 / count as f64;

        let mut origin_counts: BTreeMap<String, usize> = BTreeMap::new();
        for m in data.iter() {
            let key = if m.from_campaign { "campaign" } else { "scheduled" };
            *origin_counts.entry(key.to_string()).or_insert(0) += 1;
        }

        MetricsSummary {
            count,
            mean_duration_ms,
            p50_duration_ms,
            p99_duration_ms,
            total_attempts,
            success_rate,
            origin_counts,
        }
    }

    /// Clear all recorded sends.
    pub fn clear(&self) {
        let mut data = self.inner.lock().expect("metrics lock poisoned");
        data.clear();
    }
}

// ---------------------------------------------------------------------------
// TelemetrySpan
// ---------------------------------------------------------------------------

/// A structured span for ad-hoc tracing integration, for call sites that
/// want to emit a single structured record without threading a full
/// `tracing::span!` through.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetrySpan {
    /// Span name / operation.
    pub name: String,
    /// Arbitrary key-value attributes (deterministic ordering).
    pub attributes: BTreeMap<String, String>,
}

impl TelemetrySpan {
    /// Create a new span with the given name.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            attributes: BTreeMap::new(),
        }
    }

    /// Insert an attribute.
    #[must_use]
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// Emit the span via `tracing::info!`.
    pub fn emit(&self) {
        info!(span_name = %self.name, attributes = ?self.attributes, "telemetry_span");
    }
}

// ---------------------------------------------------------------------------
// TelemetryExporter
// ---------------------------------------------------------------------------

/// Trait for exporting a collected [`MetricsSummary`] somewhere (stdout,
/// a file, a push gateway).
pub trait TelemetryExporter: Send + Sync {
    /// Export the given summary. Returns the serialized output on success.
    fn export(&self, summary: &MetricsSummary) -> Result<String, String>;
}

/// Exports metrics as pretty-printed JSON to a string.
#[derive(Debug, Default)]
pub struct JsonExporter;

impl TelemetryExporter for JsonExporter {
    fn export(&self, summary: &MetricsSummary) -> Result<String, String> {
        serde_json::to_string_pretty(summary).map_err(|e| e.to_string())
    }
}
