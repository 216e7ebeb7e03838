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

//! The configuration surface described in spec §6.4: one struct per
//! section, defaults matching the spec table exactly, validation, and
//! environment-variable overrides (`SYSMON_<SECTION>_<KEY>`).
//!
//! Reading a config file from disk and wiring a CLI are out of scope (spec
//! §1) and belong to an external caller; this crate only defines the typed
//! shape those callers deserialize into and validate before constructing
//! the rest of the pipeline.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use validator::Validate;

/// All the errors that can occur while validating or reloading a `Config`.
#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// A config value failed validation.
    #[error("invalid configuration (reason: {message}, section: {section}, key: {key})")]
    Invalid {
        /// The section the invalid key belongs to.
        section: String,
        /// The invalid key.
        key: String,
        /// Human-readable reason.
        message: String,
    },

    /// An environment override could not be parsed as the expected type.
    #[error("invalid environment override {var} (reason: {message})")]
    InvalidOverride {
        /// The environment variable name.
        var: String,
        /// Human-readable reason.
        message: String,
    },
}

/// `sampling` section (spec §6.4).
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct SamplingConfig {
    /// Tick cadence in seconds.
    #[validate(range(min = 0.01, max = 3600.0))]
    #[serde(default = "default_rate_seconds")]
    pub rate_seconds: f64,
    /// Writer batch target.
    #[validate(range(min = 1, max = 100_000))]
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Ingress queue capacity.
    #[validate(range(min = 1, max = 10_000_000))]
    #[serde(default = "default_max_queue_size")]
    pub max_queue_size: usize,
}

fn default_rate_seconds() -> f64 {
    1.0
}
fn default_batch_size() -> usize {
    100
}
fn default_max_queue_size() -> usize {
    10_000
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            rate_seconds: default_rate_seconds(),
            batch_size: default_batch_size(),
            max_queue_size: default_max_queue_size(),
        }
    }
}

/// `storage` section (spec §6.4).
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct StorageConfig {
    /// Path to the store file.
    #[serde(default = "default_db_path")]
    pub db_path: String,
    /// Prune horizon, in days.
    #[validate(range(min = 1, max = 3650))]
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,
    /// WAL auto-checkpoint interval, in pages.
    #[validate(range(min = 1, max = 1_000_000))]
    #[serde(default = "default_wal_checkpoint_interval")]
    pub wal_checkpoint_interval: u32,
}

fn default_db_path() -> String {
    "sysmon.db".to_string()
}
fn default_retention_days() -> u32 {
    30
}
fn default_wal_checkpoint_interval() -> u32 {
    1000
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            retention_days: default_retention_days(),
            wal_checkpoint_interval: default_wal_checkpoint_interval(),
        }
    }
}

/// `anomaly` section (spec §6.4).
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct AnomalyConfig {
    /// Assumed anomaly fraction in the baseline.
    #[validate(range(min = 0.0, max = 0.5))]
    #[serde(default = "default_contamination")]
    pub contamination: f64,
    /// Isolation-forest tree count.
    #[validate(range(min = 1, max = 10_000))]
    #[serde(default = "default_n_estimators")]
    pub n_estimators: usize,
    /// Per-tree sample size.
    #[validate(range(min = 8, max = 1_000_000))]
    #[serde(default = "default_max_samples")]
    pub max_samples: usize,
    /// Baseline training window, in days.
    #[validate(range(min = 1, max = 3650))]
    #[serde(default = "default_baseline_window_days")]
    pub baseline_window_days: u32,
    /// Calibration target false-positive rate.
    #[validate(range(min = 0.0, max = 1.0))]
    #[serde(default = "default_target_fpr")]
    pub target_fpr: f64,
}

fn default_contamination() -> f64 {
    0.05
}
fn default_n_estimators() -> usize {
    100
}
fn default_max_samples() -> usize {
    256
}
fn default_baseline_window_days() -> u32 {
    7
}
fn default_target_fpr() -> f64 {
    0.05
}

impl Default for AnomalyConfig {
    fn default() -> Self {
        Self {
            contamination: default_contamination(),
            n_estimators: default_n_estimators(),
            max_samples: default_max_samples(),
            baseline_window_days: default_baseline_window_days(),
            target_fpr: default_target_fpr(),
        }
    }
}

/// Supported forecasting algorithms (spec §6.4 `forecast.algo`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ForecastAlgo {
    /// Linear least-squares regression.
    Linear,
    /// Gradient-boosted regression trees.
    Gbrt,
}

impl Default for ForecastAlgo {
    fn default() -> Self {
        ForecastAlgo::Linear
    }
}

/// `forecast` section (spec §6.4).
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ForecastConfig {
    /// Forecast horizon, in hours.
    #[validate(range(min = 1, max = 8760))]
    #[serde(default = "default_horizon_hours")]
    pub horizon_hours: u32,
    /// Forecasting algorithm.
    #[serde(default)]
    pub algo: ForecastAlgo,
}

fn default_horizon_hours() -> u32 {
    72
}

impl Default for ForecastConfig {
    fn default() -> Self {
        Self {
            horizon_hours: default_horizon_hours(),
            algo: ForecastAlgo::default(),
        }
    }
}

/// `thresholds` section (spec §6.4).
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ThresholdsConfig {
    /// CPU breach threshold, percent.
    #[validate(range(min = 0.0, max = 100.0))]
    #[serde(default = "default_cpu_pct")]
    pub cpu_pct: f64,
    /// Memory breach threshold, percent.
    #[validate(range(min = 0.0, max = 100.0))]
    #[serde(default = "default_mem_pct")]
    pub mem_pct: f64,
    /// Disk usage breach threshold, percent.
    #[validate(range(min = 0.0, max = 100.0))]
    #[serde(default = "default_disk_pct")]
    pub disk_pct: f64,
    /// Swap breach threshold, percent.
    #[validate(range(min = 0.0, max = 100.0))]
    #[serde(default = "default_swap_pct")]
    pub swap_pct: f64,
}

fn default_cpu_pct() -> f64 {
    90.0
}
fn default_mem_pct() -> f64 {
    90.0
}
fn default_disk_pct() -> f64 {
    85.0
}
fn default_swap_pct() -> f64 {
    80.0
}

impl Default for ThresholdsConfig {
    fn default() -> Self {
        Self {
            cpu_pct: default_cpu_pct(),
            mem_pct: default_mem_pct(),
            disk_pct: default_disk_pct(),
            swap_pct: default_swap_pct(),
        }
    }
}

/// `features` section (spec §6.4).
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct FeaturesConfig {
    /// Short rolling window, in ticks.
    #[validate(range(min = 2, max = 100_000))]
    #[serde(default = "default_short_window")]
    pub short_window: usize,
    /// Long rolling window, in ticks.
    #[validate(range(min = 2, max = 1_000_000))]
    #[serde(default = "default_long_window")]
    pub long_window: usize,
}

fn default_short_window() -> usize {
    5
}
fn default_long_window() -> usize {
    30
}

impl Default for FeaturesConfig {
    fn default() -> Self {
        Self {
            short_window: default_short_window(),
            long_window: default_long_window(),
        }
    }
}

/// `rules` section (spec §6.4).
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct RulesConfig {
    /// Per-rule cooldown, in seconds.
    #[validate(range(min = 0, max = 86_400))]
    #[serde(default = "default_cooldown_seconds")]
    pub cooldown_seconds: u64,
}

fn default_cooldown_seconds() -> u64 {
    300
}

impl Default for RulesConfig {
    fn default() -> Self {
        Self {
            cooldown_seconds: default_cooldown_seconds(),
        }
    }
}

/// The full configuration surface (spec §6.4). All other options are
/// rejected by a caller's deserializer (`#[serde(deny_unknown_fields)]` is
/// deliberately not set here, since that choice belongs to whichever
/// out-of-scope format loader deserializes this type; the loader is
/// expected to reject unrecognised top-level keys before handing a
/// `Config` to this crate).
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
pub struct Config {
    /// `sampling` section.
    #[validate]
    #[serde(default)]
    pub sampling: SamplingConfig,
    /// `storage` section.
    #[validate]
    #[serde(default)]
    pub storage: StorageConfig,
    /// `anomaly` section.
    #[validate]
    #[serde(default)]
    pub anomaly: AnomalyConfig,
    /// `forecast` section.
    #[validate]
    #[serde(default)]
    pub forecast: ForecastConfig,
    /// `thresholds` section.
    #[validate]
    #[serde(default)]
    pub thresholds: ThresholdsConfig,
    /// `features` section.
    #[validate]
    #[serde(default)]
    pub features: FeaturesConfig,
    /// `rules` section.
    #[validate]
    #[serde(default)]
    pub rules: RulesConfig,
}

impl Config {
    /// Validates every section, converting the first `validator` failure
    /// into our structured `Error`.
    pub fn validate_sections(&self) -> Result<(), Error> {
        self.validate().map_err(|errors| {
            let (section, key, message) = errors
                .field_errors()
                .iter()
                .next()
                .map(|(key, errs)| {
                    (
                        "config".to_string(),
                        key.to_string(),
                        errs.first()
                            .map(|e| e.to_string())
                            .unwrap_or_else(|| "invalid value".to_string()),
                    )
                })
                .unwrap_or_else(|| ("config".to_string(), "unknown".to_string(), errors.to_string()));
            Error::Invalid { section, key, message }
        })
    }

    /// Applies environment overrides following `SYSMON_<SECTION>_<KEY>`,
    /// taking precedence over whatever was loaded from file (spec §6.4).
    /// `env` is the caller's view of the environment (a plain map, so this
    /// can be tested without touching the process environment).
    pub fn apply_env_overrides(&mut self, env: &HashMap<String, String>) -> Result<(), Error> {
        for (var, value) in env {
            let Some(rest) = var.strip_prefix("SYSMON_") else {
                continue;
            };
            let Some((section, key)) = rest.split_once('_') else {
                continue;
            };
            self.apply_override(&section.to_lowercase(), &key.to_lowercase(), value, var)?;
        }
        Ok(())
    }

    fn apply_override(&mut self, section: &str, key: &str, value: &str, var: &str) -> Result<(), Error> {
        match (section, key) {
            ("sampling", "rate_seconds") => self.sampling.rate_seconds = parse(var, value)?,
            ("sampling", "batch_size") => self.sampling.batch_size = parse(var, value)?,
            ("sampling", "max_queue_size") => self.sampling.max_queue_size = parse(var, value)?,
            ("storage", "db_path") => self.storage.db_path = value.to_string(),
            ("storage", "retention_days") => self.storage.retention_days = parse(var, value)?,
            ("storage", "wal_checkpoint_interval") => self.storage.wal_checkpoint_interval = parse(var, value)?,
            ("anomaly", "contamination") => self.anomaly.contamination = parse(var, value)?,
            ("anomaly", "n_estimators") => self.anomaly.n_estimators = parse(var, value)?,
            ("anomaly", "max_samples") => self.anomaly.max_samples = parse(var, value)?,
            ("anomaly", "baseline_window_days") => self.anomaly.baseline_window_days = parse(var, value)?,
            ("anomaly", "target_fpr") => self.anomaly.target_fpr = parse(var, value)?,
            ("forecast", "horizon_hours") => self.forecast.horizon_hours = parse(var, value)?,
            ("forecast", "algo") => {
                self.forecast.algo = match value {
                    "linear" => ForecastAlgo::Linear,
                    "gbrt" => ForecastAlgo::Gbrt,
                    other => {
                        return Err(Error::InvalidOverride {
                            var: var.to_string(),
                            message: format!("unknown forecast algo '{other}'"),
                        })
                    }
                }
            }
            ("thresholds", "cpu_pct") => self.thresholds.cpu_pct = parse(var, value)?,
            ("thresholds", "mem_pct") => self.thresholds.mem_pct = parse(var, value)?,
            ("thresholds", "disk_pct") => self.thresholds.disk_pct = parse(var, value)?,
            ("thresholds", "swap_pct") => self.thresholds.swap_pct = parse(var, value)?,
            ("features", "short_window") => self.features.short_window = parse(var, value)?,
            ("features", "long_window") => self.features.long_window = parse(var, value)?,
            ("rules", "cooldown_seconds") => self.rules.cooldown_seconds = parse(var, value)?,
            _ => {
                // Unrecognised SYSMON_* var: not our section/key to own, ignored.
            }
        }
        Ok(())
    }

    /// Applies only the fields spec §9(a) names as safely reloadable at
    /// runtime without restarting the agent: thresholds, rule cooldown,
    /// and forecast horizon. Everything else (cadence, db path, feature
    /// windows, model params) is left untouched on `self`.
    pub fn apply_reloadable(&mut self, new: &Config) {
        self.thresholds = new.thresholds.clone();
        self.rules.cooldown_seconds = new.rules.cooldown_seconds;
        self.forecast.horizon_hours = new.forecast.horizon_hours;
    }
}

fn parse<T: std::str::FromStr>(var: &str, value: &str) -> Result<T, Error> {
    value.parse().map_err(|_| Error::InvalidOverride {
        var: var.to_string(),
        message: format!("could not parse '{value}'"),
    })
}
