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

//! The feature builder (spec §4.F): deterministic, pure, allocation-light
//! construction of a dense feature matrix from a contiguous run of
//! `Sample`s, plus the `Scaler` persisted alongside a trained model.

mod scaler;

pub use scaler::Scaler;
use sysmon_types::Sample;

/// Errors raised while building features.
#[derive(thiserror::Error, Debug, Clone)]
#[non_exhaustive]
pub enum Error {
    /// Fewer than `long_window + 5` samples were supplied.
    #[error("need at least {required} samples to build features, got {got}")]
    InsufficientData {
        /// Minimum number of samples required.
        required: usize,
        /// Number of samples actually supplied.
        got: usize,
    },
}

const LAGS: [usize; 5] = [1, 2, 3, 4, 5];
const EMA_ALPHAS: [f64; 2] = [0.1, 0.3];
const BURSTINESS_EPSILON: f64 = 1e-9;

/// The window sizes driving feature construction (spec §3: `W_s`, `W_l`).
#[derive(Debug, Clone, Copy)]
pub struct Windows {
    /// Short rolling window, in ticks.
    pub short: usize,
    /// Long rolling window, in ticks.
    pub long: usize,
}

impl Default for Windows {
    fn default() -> Self {
        Self { short: 5, long: 30 }
    }
}

/// The output of `build`: a dense row-major feature matrix, the column
/// names in the stable order the matrix was built with, and the
/// timestamp each row corresponds to.
#[derive(Debug, Clone)]
pub struct FeatureSet {
    /// Row-major feature matrix: `rows.len()` rows, each `columns.len()`
    /// wide.
    pub rows: Vec<Vec<f64>>,
    /// Column names, in the order values appear within each row.
    pub columns: Vec<String>,
    /// The `ts` of the sample each row was computed for.
    pub timestamps: Vec<i64>,
}

fn metric_names() -> [&'static str; 9] {
    [
        "cpu_pct",
        "mem_pct",
        "disk_read_bps",
        "disk_write_bps",
        "net_up_bps",
        "net_down_bps",
        "swap_pct",
        "proc_count",
        "cpu_temp",
    ]
}

fn is_io_metric(name: &str) -> bool {
    Sample::IO_METRIC_COLUMNS.contains(&name)
}

fn column_names(windows: Windows) -> Vec<String> {
    let mut columns = Vec::new();
    for metric in metric_names() {
        for lag in LAGS {
            columns.push(format!("{metric}_lag{lag}"));
        }
        columns.push(format!("{metric}_mean_w{}", windows.short));
        columns.push(format!("{metric}_std_w{}", windows.short));
        columns.push(format!("{metric}_mean_w{}", windows.long));
        columns.push(format!("{metric}_std_w{}", windows.long));
        for alpha in EMA_ALPHAS {
            columns.push(format!("{metric}_ema_{alpha}"));
        }
        columns.push(format!("{metric}_slope_w{}", windows.long));
        if is_io_metric(metric) {
            columns.push(format!("{metric}_burst"));
        }
    }
    columns
}

fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

fn std_dev(values: &[f64], m: f64) -> f64 {
    let variance = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / values.len() as f64;
    variance.sqrt()
}

fn ema(values: &[f64], alpha: f64) -> f64 {
    let mut acc = values[0];
    for &v in &values[1..] {
        acc = alpha * v + (1.0 - alpha) * acc;
    }
    acc
}

/// Least-squares slope of `values` against the index `0..values.len()`.
fn slope(values: &[f64]) -> f64 {
    let n = values.len() as f64;
    let xs: Vec<f64> = (0..values.len()).map(|i| i as f64).collect();
    let x_mean = mean(&xs);
    let y_mean = mean(values);
    let mut cov = 0.0;
    let mut var_x = 0.0;
    for (x, y) in xs.iter().zip(values) {
        cov += (x - x_mean) * (y - y_mean);
        var_x += (x - x_mean).powi(2);
    }
    if var_x == 0.0 {
        return 0.0;
    }
    let _ = n;
    cov / var_x
}

/// Builds a dense feature matrix from `samples` using window sizes
/// `windows` (spec §4.F). `samples` must be in ascending `ts` order and
/// contiguous (one tick apart); this is the caller's responsibility —
/// the builder performs no gap detection, consistent with it being
/// "pure, allocation-light, no I/O" per the design notes.
pub fn build(samples: &[Sample], windows: Windows) -> Result<FeatureSet, Error> {
    let required = windows.long + 5;
    if samples.len() < required {
        return Err(Error::InsufficientData {
            required,
            got: samples.len(),
        });
    }

    let metric_matrix: Vec<[f64; 9]> = samples.iter().map(Sample::metric_values).collect();
    let columns = column_names(windows);
    let first_valid = windows.long - 1;

    let mut rows = Vec::with_capacity(samples.len() - first_valid);
    let mut timestamps = Vec::with_capacity(samples.len() - first_valid);

    for i in first_valid..samples.len() {
        let mut row = Vec::with_capacity(columns.len());
        for (metric_idx, metric) in metric_names().into_iter().enumerate() {
            let series = |start: usize, end_inclusive: usize| -> Vec<f64> {
                (start..=end_inclusive).map(|j| metric_matrix[j][metric_idx]).collect()
            };

            for lag in LAGS {
                row.push(metric_matrix[i - lag][metric_idx]);
            }

            let short_window = series(i + 1 - windows.short, i);
            let long_window = series(i + 1 - windows.long, i);

            let short_mean = mean(&short_window);
            row.push(short_mean);
            row.push(std_dev(&short_window, short_mean));

            let long_mean = mean(&long_window);
            row.push(long_mean);
            row.push(std_dev(&long_window, long_mean));

            for alpha in EMA_ALPHAS {
                row.push(ema(&long_window, alpha));
            }

            row.push(slope(&long_window));

            if is_io_metric(metric) {
                let short_max = short_window.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
                row.push(short_max / (long_mean + BURSTINESS_EPSILON));
            }
        }
        rows.push(row);
        timestamps.push(samples[i].ts);
    }

    Ok(FeatureSet { rows, columns, timestamps })
}

#[cfg(test)]
mod test {
    use super::*;

    fn sample(ts: i64, cpu: f64) -> Sample {
        Sample {
            ts,
            host: "h1".into(),
            cpu_pct: cpu,
            mem_pct: 50.0,
            disk_read_bps: 100.0,
            disk_write_bps: 100.0,
            net_up_bps: 100.0,
            net_down_bps: 100.0,
            swap_pct: 0.0,
            proc_count: 200,
            cpu_temp: Some(60.0),
        }
    }

    #[test]
    fn rejects_inputs_shorter_than_long_window_plus_five() {
        let samples: Vec<_> = (0..20).map(|i| sample(i, i as f64)).collect();
        let err = build(&samples, Windows { short: 5, long: 30 }).unwrap_err();
        assert!(matches!(err, Error::InsufficientData { required: 35, got: 20 }));
    }

    #[test]
    fn build_is_deterministic_for_identical_input() {
        let samples: Vec<_> = (0..40).map(|i| sample(i, (i % 7) as f64)).collect();
        let windows = Windows { short: 5, long: 30 };
        let a = build(&samples, windows).unwrap();
        let b = build(&samples, windows).unwrap();
        assert_eq!(a.rows, b.rows);
        assert_eq!(a.columns, b.columns);
        assert_eq!(a.timestamps, b.timestamps);
    }

    #[test]
    fn output_row_count_matches_the_usable_window_count() {
        let samples: Vec<_> = (0..40).map(|i| sample(i, i as f64)).collect();
        let windows = Windows { short: 5, long: 30 };
        let features = build(&samples, windows).unwrap();
        assert_eq!(features.rows.len(), 40 - (windows.long - 1));
        assert_eq!(features.timestamps.first().copied(), Some(29));
        assert_eq!(features.timestamps.last().copied(), Some(39));
    }

    #[test]
    fn burstiness_columns_exist_only_for_io_metrics() {
        let windows = Windows { short: 5, long: 30 };
        let columns = column_names(windows);
        assert!(columns.contains(&"disk_read_bps_burst".to_string()));
        assert!(!columns.contains(&"cpu_pct_burst".to_string()));
    }

    #[test]
    fn a_constant_series_has_zero_slope_and_zero_std() {
        let samples: Vec<_> = (0..40).map(|i| sample(i, 42.0)).collect();
        let windows = Windows { short: 5, long: 30 };
        let features = build(&samples, windows).unwrap();
        let cpu_slope_idx = features.columns.iter().position(|c| c == "cpu_pct_slope_w30").unwrap();
        assert_eq!(features.rows[0][cpu_slope_idx], 0.0);
        let cpu_std_idx = features.columns.iter().position(|c| c == "cpu_pct_std_w30").unwrap();
        assert_eq!(features.rows[0][cpu_std_idx], 0.0);
    }
}
