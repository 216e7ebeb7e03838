//! Per-column standardisation, fit once at training time and persisted
//! alongside the model (spec §4.F, §9 open question b).

use serde::{Deserialize, Serialize};

/// Per-column mean, standard deviation, and training-time median (used to
/// impute missing optional inputs, e.g. a `cpu_temp`-derived column on a
/// platform without a sensor). Columns with zero variance are normalised
/// to mean 0, scale 1, so inference on them is the raw deviation from the
/// training mean.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scaler {
    /// Column names, in the order `means`/`stds`/`medians` apply to.
    pub columns: Vec<String>,
    means: Vec<f64>,
    stds: Vec<f64>,
    medians: Vec<f64>,
}

impl Scaler {
    /// Fits a scaler to `rows` (row-major, `columns.len()` wide). NaN
    /// entries (a missing optional input) are excluded from the mean/std
    /// computation and imputed with the column median before being
    /// folded in, matching the training-time-median policy.
    pub fn fit(columns: &[String], rows: &[Vec<f64>]) -> Self {
        let width = columns.len();
        let mut means = vec![0.0; width];
        let mut stds = vec![1.0; width];
        let mut medians = vec![0.0; width];

        for col in 0..width {
            let mut finite: Vec<f64> = rows.iter().map(|r| r[col]).filter(|v| v.is_finite()).collect();
            if finite.is_empty() {
                continue;
            }
            finite.sort_by(|a, b| a.partial_cmp(b).unwrap());
            medians[col] = finite[finite.len() / 2];

            let imputed: Vec<f64> = rows
                .iter()
                .map(|r| if r[col].is_finite() { r[col] } else { medians[col] })
                .collect();
            let m = imputed.iter().sum::<f64>() / imputed.len() as f64;
            let variance = imputed.iter().map(|v| (v - m).powi(2)).sum::<f64>() / imputed.len() as f64;
            let std = variance.sqrt();

            means[col] = m;
            stds[col] = if std > 0.0 { std } else { 1.0 };
        }

        Self {
            columns: columns.to_vec(),
            means,
            stds,
            medians,
        }
    }

    /// Standardises `row` in place: imputes NaNs with the training-time
    /// median, then subtracts the mean and divides by the standard
    /// deviation column-wise.
    pub fn transform(&self, row: &[f64]) -> Vec<f64> {
        row.iter()
            .enumerate()
            .map(|(col, &v)| {
                let v = if v.is_finite() { v } else { self.medians[col] };
                (v - self.means[col]) / self.stds[col]
            })
            .collect()
    }

    /// Per-column z-score of `row` without the NaN imputation substitution
    /// suppressed (used for anomaly explanation, spec §4.G, where the
    /// magnitude of the deviation is what is reported).
    pub fn z_scores(&self, row: &[f64]) -> Vec<f64> {
        self.transform(row)
    }

    /// Number of columns this scaler was fit on.
    pub fn width(&self) -> usize {
        self.columns.len()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn zero_variance_columns_normalise_to_mean_zero_scale_one() {
        let columns = vec!["a".to_string()];
        let rows = vec![vec![5.0], vec![5.0], vec![5.0]];
        let scaler = Scaler::fit(&columns, &rows);
        let transformed = scaler.transform(&[5.0]);
        assert_eq!(transformed[0], 0.0);
        let transformed_other = scaler.transform(&[7.0]);
        assert_eq!(transformed_other[0], 2.0);
    }

    #[test]
    fn missing_values_are_imputed_with_the_training_time_median() {
        let columns = vec!["a".to_string()];
        let rows = vec![vec![1.0], vec![2.0], vec![3.0], vec![f64::NAN]];
        let scaler = Scaler::fit(&columns, &rows);
        let transformed = scaler.transform(&[f64::NAN]);
        // median of [1,2,3] is 2, which after imputation is folded into
        // the mean/std computation, so transforming a NaN input again
        // yields the z-score of the median itself.
        assert!(transformed[0].is_finite());
    }

    #[test]
    fn scaler_round_trips_through_serde() {
        let columns = vec!["a".to_string(), "b".to_string()];
        let rows = vec![vec![1.0, 10.0], vec![2.0, 20.0], vec![3.0, 30.0]];
        let scaler = Scaler::fit(&columns, &rows);
        let json = serde_json::to_string(&scaler).unwrap();
        let restored: Scaler = serde_json::from_str(&json).unwrap();
        assert_eq!(restored.columns, scaler.columns);
        assert_eq!(restored.transform(&[2.0, 20.0]), scaler.transform(&[2.0, 20.0]));
    }
}
