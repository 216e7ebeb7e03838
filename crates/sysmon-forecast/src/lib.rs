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

//! The forecaster (spec §4.H): one regressor per target metric, trained
//! on the monitored history, producing a time-to-threshold estimate with
//! a residual-based confidence band.

mod regressor;

use std::collections::HashMap;

use regressor::Regressor;
use serde::{Deserialize, Serialize};
use sysmon_types::{Event, EventType, ModelAlgo, ModelRecord, Sample};

const MODEL_NAME: &str = "forecast";
const MODEL_MAJOR_VERSION: &str = "1";
const VALIDATION_FRACTION: f64 = 0.2;
const GBRT_ROUNDS: usize = 50;
const GBRT_LEARNING_RATE: f64 = 0.1;

/// Errors raised while training or running the forecaster.
#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// Fewer samples than needed to hold out a validation split.
    #[error("need at least {required} samples to train a forecast model, got {got}")]
    InsufficientData {
        /// Minimum number of samples required.
        required: usize,
        /// Number of samples actually supplied.
        got: usize,
    },
    /// The serialised model blob could not be decoded, or its major
    /// version is unsupported.
    #[error("failed to decode forecast model blob: {0}")]
    Corrupt(String),
}

/// The regression family to fit (spec §6.4 `forecast.algo`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Algo {
    /// Closed-form least-squares trend.
    Linear,
    /// Boosted-stump ensemble.
    Gbrt,
}

/// Training configuration for the forecaster.
#[derive(Debug, Clone, Copy)]
pub struct TrainConfig {
    /// Regression family.
    pub algo: Algo,
    /// Sample cadence, in seconds, used to convert per-tick rates to
    /// per-second slopes.
    pub cadence_seconds: f64,
    /// Forecast horizon, in seconds; an `eta` beyond this is reported as
    /// infinite.
    pub horizon_seconds: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct MetricModel {
    regressor: Regressor,
    residual_p5: f64,
    residual_p95: f64,
}

/// A trained forecaster: one model per monitored metric.
pub struct Forecaster {
    models: HashMap<String, MetricModel>,
    cadence_seconds: f64,
    horizon_seconds: f64,
}

/// One metric's forecast result (spec §4.H).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Forecast {
    /// Point-estimate time to breach, in seconds, or `None` for "never
    /// within the horizon".
    pub eta_seconds: Option<f64>,
    /// Earliest plausible breach time (lower confidence bound on `eta`).
    pub lo_eta_seconds: Option<f64>,
    /// Latest plausible breach time (upper confidence bound on `eta`).
    pub hi_eta_seconds: Option<f64>,
}

impl Forecaster {
    /// Fits one regressor per column of `Sample::METRIC_COLUMNS` against
    /// `samples`, holding out the last `VALIDATION_FRACTION` for residual
    /// estimation, and returns the fitted forecaster plus a `ModelRecord`
    /// ready to persist.
    pub fn train(samples: &[Sample], config: TrainConfig) -> Result<(Self, ModelRecord), Error> {
        const MIN_ROWS: usize = 50;
        if samples.len() < MIN_ROWS {
            return Err(Error::InsufficientData { required: MIN_ROWS, got: samples.len() });
        }

        let split = ((samples.len() as f64) * (1.0 - VALIDATION_FRACTION)) as usize;
        let split = split.max(2).min(samples.len() - 1);

        let mut models = HashMap::new();
        for (idx, &column) in Sample::METRIC_COLUMNS.iter().enumerate() {
            let all_values: Vec<f64> = samples.iter().map(|s| s.metric_values()[idx]).collect();
            let model = fit_metric_model(&all_values, split, config);
            let _ = models.insert(column.to_string(), model);
        }

        let forecaster = Forecaster {
            models,
            cadence_seconds: config.cadence_seconds,
            horizon_seconds: config.horizon_seconds,
        };

        let blob = serde_json::to_vec(&forecaster.models).map_err(|e| Error::Corrupt(e.to_string()))?;
        let record = ModelRecord {
            name: MODEL_NAME.to_string(),
            algo: match config.algo {
                Algo::Linear => ModelAlgo::LinearRegressor,
                Algo::Gbrt => ModelAlgo::GradientBoost,
            },
            version: format!("{MODEL_MAJOR_VERSION}.0.0"),
            trained_at: samples.last().map(|s| s.ts).unwrap_or(0),
            meta: serde_json::json!({
                "metrics": Sample::METRIC_COLUMNS,
                "cadence_seconds": config.cadence_seconds,
                "horizon_seconds": config.horizon_seconds,
            }),
            blob,
        };

        Ok((forecaster, record))
    }

    /// Reconstructs a forecaster from a persisted `ModelRecord`.
    pub fn load(record: &ModelRecord, cadence_seconds: f64, horizon_seconds: f64) -> Result<Self, Error> {
        let found_major = record.version.split('.').next().unwrap_or("0");
        if found_major != MODEL_MAJOR_VERSION {
            return Err(Error::Corrupt(format!("unsupported forecast model version {}", record.version)));
        }
        let models: HashMap<String, MetricModel> =
            serde_json::from_slice(&record.blob).map_err(|e| Error::Corrupt(e.to_string()))?;
        Ok(Self { models, cadence_seconds, horizon_seconds })
    }

    /// Projects each monitored metric forward from `current` and returns
    /// the ETA (and confidence band) until it would cross the
    /// corresponding entry in `thresholds`. Metrics this forecaster was
    /// not trained on, or for which no threshold is supplied, are
    /// omitted from the result.
    pub fn forecast(&self, current: &Sample, thresholds: &HashMap<String, f64>) -> HashMap<String, Forecast> {
        let current_values: HashMap<&str, f64> = Sample::METRIC_COLUMNS
            .iter()
            .zip(current.metric_values())
            .map(|(&name, value)| (name, value))
            .collect();

        let mut out = HashMap::new();
        for (metric, &threshold) in thresholds {
            let Some(model) = self.models.get(metric) else { continue };
            let Some(&current_value) = current_values.get(metric.as_str()) else { continue };

            let slope = match &model.regressor {
                Regressor::Linear { slope_per_second, .. } => *slope_per_second,
                gbrt @ Regressor::Gbrt { .. } => {
                    let row = [current_value];
                    gbrt.slope_per_second(&row, self.cadence_seconds)
                }
            };

            let eta = eta_for(current_value, slope, threshold, self.horizon_seconds);
            // The upper-residual scenario rises faster, so it breaches
            // sooner (the lower bound on eta); the lower-residual
            // scenario breaches later, or never (the upper bound).
            let faster = eta_for(current_value + model.residual_p95, slope, threshold, self.horizon_seconds);
            let slower = eta_for(current_value + model.residual_p5, slope, threshold, self.horizon_seconds);

            let lo_eta = match (faster, slower) {
                (Some(a), Some(b)) => Some(a.min(b)),
                (Some(a), None) | (None, Some(a)) => Some(a),
                (None, None) => None,
            };
            let hi_eta = match (faster, slower) {
                (Some(a), Some(b)) => Some(a.max(b)),
                _ => None,
            };

            let _ = out.insert(
                metric.clone(),
                Forecast {
                    eta_seconds: eta,
                    lo_eta_seconds: lo_eta,
                    hi_eta_seconds: hi_eta,
                },
            );
        }
        out
    }

    /// Emits a `forecast_breach` Event for every metric whose upper
    /// confidence bound on `eta` (the faster-breach scenario, surfacing
    /// risk early) is at most `rule_min_eta` seconds away (spec §4.H,
    /// §4.I). Display uses the point estimate; alerting uses this bound.
    pub fn breach_events(&self, ts: i64, forecasts: &HashMap<String, Forecast>, rule_min_eta: f64) -> Vec<Event> {
        forecasts
            .iter()
            .filter_map(|(metric, forecast)| {
                let eta = forecast.lo_eta_seconds?;
                if eta > rule_min_eta {
                    return None;
                }
                Some(Event {
                    id: None,
                    ts,
                    r#type: EventType::ForecastBreach,
                    score: Some(eta),
                    metric_tags: vec![metric.clone()],
                    explanation: Event::truncate_explanation(format!("metric={metric} eta={eta:.0}s")),
                })
            })
            .collect()
    }
}

/// Seconds until `current_value + slope * t` first reaches `threshold`,
/// or `None` if it never does within `horizon_seconds` (either the slope
/// is non-positive and the threshold is above the current value, or the
/// crossing falls beyond the horizon).
fn eta_for(current_value: f64, slope: f64, threshold: f64, horizon_seconds: f64) -> Option<f64> {
    if current_value >= threshold {
        return Some(0.0);
    }
    if slope <= 0.0 {
        return None;
    }
    let eta = (threshold - current_value) / slope;
    if eta > horizon_seconds {
        None
    } else {
        Some(eta)
    }
}

fn fit_metric_model(values: &[f64], split: usize, config: TrainConfig) -> MetricModel {
    let (train_values, validation_values) = values.split_at(split);

    let regressor = match config.algo {
        Algo::Linear => {
            let times: Vec<f64> = (0..train_values.len()).map(|i| i as f64 * config.cadence_seconds).collect();
            Regressor::fit_linear(&times, train_values)
        }
        Algo::Gbrt => {
            let rows: Vec<Vec<f64>> = train_values[..train_values.len() - 1].iter().map(|&v| vec![v]).collect();
            let rates: Vec<f64> = train_values.windows(2).map(|w| w[1] - w[0]).collect();
            Regressor::fit_gbrt(&rows, &rates, GBRT_ROUNDS, GBRT_LEARNING_RATE)
        }
    };

    let mut residuals: Vec<f64> = Vec::with_capacity(validation_values.len());
    let mut anchor = *train_values.last().unwrap();
    for (offset, &actual) in validation_values.iter().enumerate() {
        let predicted = match &regressor {
            Regressor::Linear { intercept, slope_per_second } => {
                let t = (train_values.len() + offset) as f64 * config.cadence_seconds;
                intercept + slope_per_second * t
            }
            Regressor::Gbrt { .. } => anchor + regressor.predict_rate(&[anchor]),
        };
        residuals.push(actual - predicted);
        anchor = actual;
    }
    residuals.sort_by(|a, b| a.partial_cmp(b).unwrap());

    let percentile = |p: f64| -> f64 {
        if residuals.is_empty() {
            return 0.0;
        }
        let idx = ((p * residuals.len() as f64).floor() as usize).min(residuals.len() - 1);
        residuals[idx]
    };

    MetricModel {
        regressor,
        residual_p5: percentile(0.05),
        residual_p95: percentile(0.95),
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn sample(ts: i64, mem: f64) -> Sample {
        Sample {
            ts,
            host: "h1".into(),
            cpu_pct: 10.0,
            mem_pct: mem,
            disk_read_bps: 0.0,
            disk_write_bps: 0.0,
            net_up_bps: 0.0,
            net_down_bps: 0.0,
            swap_pct: 0.0,
            proc_count: 100,
            cpu_temp: None,
        }
    }

    #[test]
    fn linear_forecast_of_a_rising_memory_trend_matches_the_expected_window() {
        // slope = 1%/min starting at 50%, cadence 1s.
        let samples: Vec<_> = (0..3000).map(|i| sample(i, 50.0 + (i as f64) / 60.0)).collect();
        let (forecaster, _) = Forecaster::train(
            &samples,
            TrainConfig {
                algo: Algo::Linear,
                cadence_seconds: 1.0,
                horizon_seconds: 3600.0 * 24.0,
            },
        )
        .unwrap();

        let mut thresholds = HashMap::new();
        let _ = thresholds.insert("mem_pct".to_string(), 90.0);
        let last = samples.last().unwrap();
        let forecasts = forecaster.forecast(last, &thresholds);
        let forecast = forecasts.get("mem_pct").unwrap();
        let eta = forecast.eta_seconds.expect("should breach within the horizon");
        assert!((2400.0..=2520.0).contains(&eta), "eta {eta} out of expected range");
    }

    #[test]
    fn a_flat_metric_never_breaches_and_reports_no_eta() {
        let samples: Vec<_> = (0..100).map(|i| sample(i, 50.0)).collect();
        let (forecaster, _) = Forecaster::train(
            &samples,
            TrainConfig { algo: Algo::Linear, cadence_seconds: 1.0, horizon_seconds: 1000.0 },
        )
        .unwrap();
        let mut thresholds = HashMap::new();
        let _ = thresholds.insert("mem_pct".to_string(), 90.0);
        let forecasts = forecaster.forecast(samples.last().unwrap(), &thresholds);
        assert_eq!(forecasts.get("mem_pct").unwrap().eta_seconds, None);
    }

    #[test]
    fn breach_events_are_emitted_only_when_eta_is_within_the_rule_minimum() {
        let samples: Vec<_> = (0..3000).map(|i| sample(i, 50.0 + (i as f64) / 60.0)).collect();
        let (forecaster, _) = Forecaster::train(
            &samples,
            TrainConfig { algo: Algo::Linear, cadence_seconds: 1.0, horizon_seconds: 100_000.0 },
        )
        .unwrap();
        let mut thresholds = HashMap::new();
        let _ = thresholds.insert("mem_pct".to_string(), 90.0);
        let forecasts = forecaster.forecast(samples.last().unwrap(), &thresholds);
        let events = forecaster.breach_events(3000, &forecasts, 10_000.0);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].r#type, EventType::ForecastBreach);
    }

    #[test]
    fn breach_events_gate_on_the_upper_confidence_bound_not_the_point_estimate() {
        let mut samples: Vec<_> = (0..3000).map(|i| sample(i, 50.0 + (i as f64) / 60.0)).collect();
        // Bump a slice of the held-out validation rows well above trend so
        // residual_p95 and residual_p5 diverge: eta_seconds (point
        // estimate, driven by residual_p5's near-zero value) stays far
        // out, while lo_eta_seconds (driven by residual_p95) comes in
        // much sooner.
        let mut i = 2400;
        while i < 2980 {
            samples[i].mem_pct += 40.0;
            i += 10;
        }

        let (forecaster, _) = Forecaster::train(
            &samples,
            TrainConfig { algo: Algo::Linear, cadence_seconds: 1.0, horizon_seconds: 100_000.0 },
        )
        .unwrap();
        let mut thresholds = HashMap::new();
        let _ = thresholds.insert("mem_pct".to_string(), 150.0);
        let forecasts = forecaster.forecast(samples.last().unwrap(), &thresholds);
        let forecast = *forecasts.get("mem_pct").unwrap();

        let eta = forecast.eta_seconds.expect("should breach within the horizon");
        let lo_eta = forecast.lo_eta_seconds.expect("should breach within the horizon");
        assert!(lo_eta < eta, "lo_eta {lo_eta} should be well below the point estimate {eta}");

        let rule_min_eta = 1000.0;
        assert!(lo_eta <= rule_min_eta, "lo_eta {lo_eta} should be within the rule minimum");
        assert!(eta > rule_min_eta, "point estimate {eta} should be outside the rule minimum");

        let events = forecaster.breach_events(3000, &forecasts, rule_min_eta);
        assert_eq!(events.len(), 1, "gating on lo_eta_seconds should fire; gating on eta_seconds would not");
        assert_eq!(events[0].score, Some(lo_eta));
    }
}
