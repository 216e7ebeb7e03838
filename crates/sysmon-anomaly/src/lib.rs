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

//! The anomaly detector (spec §4.G): isolation-forest training with
//! false-positive-rate calibration, scoring, and top-K z-score
//! explanation extraction.

mod forest;

use forest::IsolationForest;
use sysmon_features::{Scaler, Windows};
use sysmon_types::{Event, EventType, ModelAlgo, ModelRecord, Sample};

const MODEL_NAME: &str = "anomaly";
const MODEL_MAJOR_VERSION: &str = "1";
const TOP_K: usize = 3;
const VALIDATION_FRACTION: f64 = 0.2;

/// Errors raised while training or running the anomaly detector.
#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// Fewer than 1,000 rows in the baseline training window.
    #[error("need at least {required} baseline samples to train, got {got}")]
    NotEnoughData {
        /// Minimum number of baseline rows required.
        required: usize,
        /// Number of baseline rows actually supplied.
        got: usize,
    },

    /// Feature construction over the baseline failed.
    #[error(transparent)]
    Features(#[from] sysmon_features::Error),

    /// Calibration could not produce a usable threshold (e.g. an empty
    /// validation split).
    #[error("threshold calibration failed: {reason}")]
    CalibrationFailed {
        /// Human-readable reason calibration could not proceed.
        reason: String,
    },

    /// `detect` was called but no model has been trained yet.
    #[error("no trained anomaly model is available")]
    ModelNotTrained,

    /// A loaded model's feature columns do not match what `build` would
    /// produce now (a config change invalidated it).
    #[error("stored anomaly model's feature columns no longer match")]
    ModelStale,

    /// The serialised model blob could not be decoded.
    #[error("failed to decode anomaly model blob: {0}")]
    Corrupt(String),
}

/// A trained anomaly detector: the forest, its scaler, and the calibrated
/// decision threshold.
pub struct AnomalyDetector {
    forest: IsolationForest,
    scaler: Scaler,
    threshold: f64,
    windows: Windows,
}

/// Config knobs controlling training (mirrors `sysmon_config::AnomalyConfig`,
/// kept crate-local so this crate does not depend on `sysmon-config`).
#[derive(Debug, Clone, Copy)]
pub struct TrainConfig {
    /// Isolation-forest tree count.
    pub n_estimators: usize,
    /// Per-tree sample size.
    pub max_samples: usize,
    /// Calibration target false-positive rate.
    pub target_fpr: f64,
    /// Feature window sizes.
    pub windows: Windows,
    /// Seed driving forest construction, for reproducibility.
    pub seed: u64,
}

impl AnomalyDetector {
    /// Runs the full training protocol (spec §4.G): checks the baseline
    /// has at least 1,000 rows, builds features, fits the scaler and
    /// forest on an 80% split, scores the held-out 20%, and calibrates
    /// the threshold to `target_fpr`. Returns the fitted detector and the
    /// `ModelRecord` ready to persist.
    pub fn train(baseline: &[Sample], config: TrainConfig) -> Result<(Self, ModelRecord), Error> {
        const MIN_BASELINE_ROWS: usize = 1000;
        if baseline.len() < MIN_BASELINE_ROWS {
            return Err(Error::NotEnoughData {
                required: MIN_BASELINE_ROWS,
                got: baseline.len(),
            });
        }

        let features = sysmon_features::build(baseline, config.windows)?;
        let split = ((features.rows.len() as f64) * (1.0 - VALIDATION_FRACTION)) as usize;
        let split = split.max(1).min(features.rows.len() - 1);
        let (train_rows, validation_rows) = features.rows.split_at(split);

        let scaler = Scaler::fit(&features.columns, train_rows);
        let train_scaled: Vec<Vec<f64>> = train_rows.iter().map(|r| scaler.transform(r)).collect();
        let forest = IsolationForest::fit(&train_scaled, config.n_estimators, config.max_samples, config.seed);

        if validation_rows.is_empty() {
            return Err(Error::CalibrationFailed {
                reason: "empty validation split".to_string(),
            });
        }
        let validation_scaled: Vec<Vec<f64>> = validation_rows.iter().map(|r| scaler.transform(r)).collect();
        let mut validation_scores = forest.score_all(&validation_scaled);
        validation_scores.sort_by(|a, b| a.partial_cmp(b).unwrap());

        let quantile_index = (((1.0 - config.target_fpr) * validation_scores.len() as f64).floor() as usize)
            .min(validation_scores.len() - 1);
        let threshold = validation_scores[quantile_index];

        let detector = AnomalyDetector {
            forest,
            scaler: scaler.clone(),
            threshold,
            windows: config.windows,
        };

        let record = ModelRecord {
            name: MODEL_NAME.to_string(),
            algo: ModelAlgo::IsolationForest,
            version: format!("{MODEL_MAJOR_VERSION}.0.0"),
            trained_at: baseline.last().map(|s| s.ts).unwrap_or(0),
            meta: serde_json::json!({
                "columns": features.columns,
                "threshold": threshold,
                "n_estimators": config.n_estimators,
                "max_samples": config.max_samples,
                "target_fpr": config.target_fpr,
                "short_window": config.windows.short,
                "long_window": config.windows.long,
            }),
            blob: detector.serialize()?,
        };

        Ok((detector, record))
    }

    /// Reconstructs a detector from a persisted `ModelRecord`. Rejects
    /// records whose major version this binary does not support.
    pub fn load(record: &ModelRecord, windows: Windows) -> Result<Self, Error> {
        let found_major = record.version.split('.').next().unwrap_or("0");
        if found_major != MODEL_MAJOR_VERSION {
            return Err(Error::Corrupt(format!(
                "unsupported anomaly model version {}",
                record.version
            )));
        }
        let (forest, scaler): (IsolationForest, Scaler) =
            serde_json::from_slice(&record.blob).map_err(|e| Error::Corrupt(e.to_string()))?;
        let threshold = record
            .meta
            .get("threshold")
            .and_then(|v| v.as_f64())
            .ok_or_else(|| Error::Corrupt("missing threshold in model metadata".to_string()))?;
        Ok(Self { forest, scaler, threshold, windows })
    }

    fn serialize(&self) -> Result<Vec<u8>, Error> {
        serde_json::to_vec(&(&self.forest, &self.scaler)).map_err(|e| Error::Corrupt(e.to_string()))
    }

    /// Scores `samples` and emits an `anomaly` Event for every row whose
    /// score exceeds the calibrated threshold, with a top-K z-score
    /// explanation (spec §4.G).
    pub fn detect(&self, samples: &[Sample]) -> Result<Vec<Event>, Error> {
        let features = sysmon_features::build(samples, self.windows)?;
        if features.columns != self.scaler.columns {
            return Err(Error::ModelStale);
        }

        let mut events = Vec::new();
        for (row, &ts) in features.rows.iter().zip(&features.timestamps) {
            let scaled = self.scaler.transform(row);
            let score = self.forest.score(&scaled);
            if score <= self.threshold {
                continue;
            }

            let z_scores = self.scaler.z_scores(row);
            let mut indexed: Vec<(usize, f64)> = z_scores.iter().copied().enumerate().collect();
            indexed.sort_by(|a, b| b.1.abs().partial_cmp(&a.1.abs()).unwrap());

            let mut metric_tags = Vec::new();
            let mut parts = Vec::new();
            for &(idx, z) in indexed.iter().take(TOP_K) {
                let column = &features.columns[idx];
                let base_metric = base_metric_name(column);
                if !metric_tags.contains(&base_metric.to_string()) {
                    metric_tags.push(base_metric.to_string());
                }
                parts.push(format!("metric={base_metric} zscore={z:+.2}"));
            }

            events.push(Event {
                id: None,
                ts,
                r#type: EventType::Anomaly,
                score: Some(score),
                metric_tags,
                explanation: Event::truncate_explanation(parts.join(", ")),
            });
        }
        Ok(events)
    }
}

fn base_metric_name(column: &str) -> &str {
    for metric in Sample::METRIC_COLUMNS.iter().chain(std::iter::once(&"cpu_temp")) {
        if column.starts_with(metric) {
            return metric;
        }
    }
    column
}
