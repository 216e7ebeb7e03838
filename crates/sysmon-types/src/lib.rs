#![deny(
    trivial_numeric_casts,
    missing_docs,
    unsafe_code,
    unstable_features,
    unused_import_braces,
    unused_qualifications,
    unused_extern_crates,
    unused_results
)]
#![warn(rust_2021_compatibility, unreachable_pub)]

//! Core data model for the sysmon pipeline: the `Sample` read once per tick
//! by the platform sampler, the `Event`s and `ModelRecord`s persisted by the
//! store, and the two injectable interfaces (`PlatformAdapter`, `Notifier`)
//! through which the core talks to the outside world.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// One observation at time `ts` (integer seconds, UTC) for host `host`.
///
/// All percentages are real in `[0, 100]`; rates are non-negative reals.
/// Immutable once created; inserted by the batch writer, pruned by the
/// store after the retention window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Sample {
    /// Timestamp in integer seconds, UTC.
    pub ts: i64,
    /// Host identifier.
    pub host: String,
    /// CPU utilisation percent, averaged since the prior tick.
    pub cpu_pct: f64,
    /// Memory utilisation percent.
    pub mem_pct: f64,
    /// Disk read rate in bytes per second.
    pub disk_read_bps: f64,
    /// Disk write rate in bytes per second.
    pub disk_write_bps: f64,
    /// Network upload rate in bytes per second.
    pub net_up_bps: f64,
    /// Network download rate in bytes per second.
    pub net_down_bps: f64,
    /// Swap utilisation percent.
    pub swap_pct: f64,
    /// Number of running processes.
    pub proc_count: u32,
    /// CPU temperature in degrees Celsius, absent on platforms without
    /// sensor access.
    pub cpu_temp: Option<f64>,
}

impl Sample {
    /// Names of the fixed metric columns of a `Sample`, in the order used
    /// by the store schema and by feature construction. `cpu_temp` is
    /// listed last since it is the only optional column.
    pub const METRIC_COLUMNS: [&'static str; 8] = [
        "cpu_pct",
        "mem_pct",
        "disk_read_bps",
        "disk_write_bps",
        "net_up_bps",
        "net_down_bps",
        "swap_pct",
        "proc_count",
        // note: cpu_temp is handled separately as it is nullable.
    ];

    /// Returns this sample's metric values in `METRIC_COLUMNS` order,
    /// followed by `cpu_temp` (NaN when absent — callers that build dense
    /// feature matrices impute it via the scaler's training-time median).
    pub fn metric_values(&self) -> [f64; 9] {
        [
            self.cpu_pct,
            self.mem_pct,
            self.disk_read_bps,
            self.disk_write_bps,
            self.net_up_bps,
            self.net_down_bps,
            self.swap_pct,
            self.proc_count as f64,
            self.cpu_temp.unwrap_or(f64::NAN),
        ]
    }

    /// I/O metric columns for which the feature builder additionally
    /// computes a burstiness ratio (spec §3).
    pub const IO_METRIC_COLUMNS: [&'static str; 4] =
        ["disk_read_bps", "disk_write_bps", "net_up_bps", "net_down_bps"];
}

/// Raw, platform-specific counters read once per tick by a `PlatformAdapter`
/// (spec §6.2). Byte counters are cumulative (monotonically increasing);
/// the rate deriver turns them into the per-second rates carried by
/// `Sample`.
#[derive(Debug, Clone, Default)]
pub struct RawCounters {
    /// CPU utilisation percent, averaged since the previous read.
    pub cpu_pct: Option<f64>,
    /// Memory utilisation percent.
    pub mem_pct: Option<f64>,
    /// Swap utilisation percent.
    pub swap_pct: Option<f64>,
    /// Number of running processes.
    pub proc_count: Option<u32>,
    /// Cumulative bytes read from disk since boot.
    pub disk_read_bytes: Option<u64>,
    /// Cumulative bytes written to disk since boot.
    pub disk_write_bytes: Option<u64>,
    /// Cumulative bytes sent over the network since boot.
    pub net_up_bytes: Option<u64>,
    /// Cumulative bytes received over the network since boot.
    pub net_down_bytes: Option<u64>,
    /// CPU temperature in degrees Celsius, when a sensor is available.
    pub cpu_temp: Option<f64>,
}

/// The injectable platform interface (spec §6.2). Each supported OS
/// provides one implementation; the core does not depend on any specific
/// platform.
pub trait PlatformAdapter: Send {
    /// Reads the current counters. `now` is the wall-clock second the read
    /// was requested for, used by adapters that need to align samples.
    fn read_counters(&mut self, now: i64) -> Result<RawCounters, SamplerError>;
}

/// Failure reading OS counters (spec §4.A, §7). A full failure (no counter
/// at all could be read) is reported this way and the tick is dropped;
/// a partial failure (a single counter unavailable) is not an error — the
/// corresponding `RawCounters` field is simply `None`.
#[derive(thiserror::Error, Debug, Clone)]
#[non_exhaustive]
pub enum SamplerError {
    /// No counter could be read at all.
    #[error("platform sampler failed to read any counter: {reason}")]
    Unavailable {
        /// Human-readable reason, as reported by the OS layer.
        reason: String,
    },
}

/// The algorithm family used by a `ModelRecord`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelAlgo {
    /// Isolation-forest anomaly detector.
    IsolationForest,
    /// Linear least-squares forecaster.
    LinearRegressor,
    /// Gradient-boosted regression tree forecaster.
    GradientBoost,
}

/// A trained model persisted by the model store (spec §3, §4.J).
/// At most one record per `name`; replaced atomically on retrain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelRecord {
    /// Primary key.
    pub name: String,
    /// Algorithm family.
    pub algo: ModelAlgo,
    /// Semver model version. Loaders reject blobs whose major version
    /// differs from what the current binary supports.
    pub version: String,
    /// Training timestamp, integer seconds.
    pub trained_at: i64,
    /// Arbitrary structured training metadata (scaler parameters, feature
    /// column names, calibrated threshold, contamination used, ...),
    /// stored as a JSON document.
    pub meta: serde_json::Value,
    /// Opaque serialised model bytes.
    pub blob: Vec<u8>,
}

/// The kind of an `Event`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    /// An isolation-forest anomaly.
    Anomaly,
    /// A forecast time-to-threshold breach.
    ForecastBreach,
    /// A plain threshold crossing.
    Threshold,
}

impl EventType {
    /// The string stored in the `events.type` column.
    pub fn as_str(self) -> &'static str {
        match self {
            EventType::Anomaly => "anomaly",
            EventType::ForecastBreach => "forecast_breach",
            EventType::Threshold => "threshold",
        }
    }

    /// Parses the string stored in the `events.type` column.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "anomaly" => Some(EventType::Anomaly),
            "forecast_breach" => Some(EventType::ForecastBreach),
            "threshold" => Some(EventType::Threshold),
            _ => None,
        }
    }
}

/// An anomaly or forecast occurrence (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// Auto-assigned primary key; `None` until inserted.
    pub id: Option<i64>,
    /// Timestamp in integer seconds, UTC.
    pub ts: i64,
    /// Event kind.
    pub r#type: EventType,
    /// Anomaly score or forecast breach ETA in seconds, when applicable.
    pub score: Option<f64>,
    /// Ordered, deduplicated set of metric names implicated by this event.
    pub metric_tags: Vec<String>,
    /// Free-text explanation, capped at 512 characters.
    pub explanation: String,
}

/// Maximum length of `Event::explanation` (spec §3).
pub const EVENT_EXPLANATION_MAX_LEN: usize = 512;

impl Event {
    /// Serialises `metric_tags` as the delimited string stored in the
    /// `events.metric_tags` column.
    pub fn metric_tags_column(&self) -> String {
        self.metric_tags.join(",")
    }

    /// Parses the delimited string stored in the `events.metric_tags`
    /// column back into an ordered set of metric names.
    pub fn parse_metric_tags(column: &str) -> Vec<String> {
        if column.is_empty() {
            Vec::new()
        } else {
            column.split(',').map(str::to_string).collect()
        }
    }

    /// Truncates `explanation` to `EVENT_EXPLANATION_MAX_LEN` characters,
    /// as required by spec §3.
    pub fn truncate_explanation(mut explanation: String) -> String {
        if explanation.chars().count() > EVENT_EXPLANATION_MAX_LEN {
            explanation = explanation.chars().take(EVENT_EXPLANATION_MAX_LEN).collect();
        }
        explanation
    }
}

/// Severity of a `Notification` (spec §6.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// Informational, no action required.
    Info,
    /// Worth attention soon.
    Warning,
    /// Needs immediate attention.
    Critical,
}

/// A notification handed to the external notifier by the rule engine
/// (spec §4.I, §6.3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    /// Severity of the notification.
    pub severity: Severity,
    /// Short title.
    pub title: String,
    /// Longer free-text body.
    pub body: String,
    /// The event, if any, that triggered this notification.
    pub source_event_id: Option<i64>,
}

/// The injectable notifier interface (spec §6.3). The core treats delivery
/// as fire-and-forget: failures are logged by the caller and never affect
/// ingestion.
pub trait Notifier: Send {
    /// Delivers a notification. Implementations should not block for long;
    /// the rule engine calls this synchronously from the maintenance
    /// thread.
    fn notify(&mut self, notification: Notification);
}

/// A `Notifier` that only records notifications in memory, for tests and
/// for callers that want to poll rather than push.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    /// All notifications delivered so far, in delivery order.
    pub delivered: Vec<Notification>,
}

impl Notifier for RecordingNotifier {
    fn notify(&mut self, notification: Notification) {
        self.delivered.push(notification);
    }
}

/// Tags attached to a log line or a metric, used sparingly by the
/// maintenance thread when it reports counters (e.g. ingress drop count)
/// that do not otherwise have a natural home.
pub type Tags = HashMap<String, String>;
