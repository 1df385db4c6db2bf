//! Regression quality metrics and the composite selection score.

use crate::errors::{CostError, Result};
use crate::outliers::median;
use serde::{Deserialize, Serialize};

/// Scores of one candidate's out-of-fold predictions, rounded to 3 decimals.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegressionMetrics {
    pub r2: f64,
    pub mae: f64,
    pub rmse: f64,
    /// Mean absolute percentage error, in percent
    pub mape: f64,
    pub median_ae: f64,
    pub max_error: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rmsle: Option<f64>,
}

fn round3(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}

impl RegressionMetrics {
    /// Compute all metrics; `include_rmsle` adds the log-scale error used for
    /// targets that grow exponentially.
    pub fn compute(y_true: &[f64], y_pred: &[f64], include_rmsle: bool) -> Result<Self> {
        if y_true.is_empty() || y_true.len() != y_pred.len() {
            return Err(CostError::InvalidInput(format!(
                "metrics need matching non-empty series, got {} and {}",
                y_true.len(),
                y_pred.len()
            )));
        }
        if y_pred.iter().any(|v| !v.is_finite()) {
            return Err(CostError::Numerical("non-finite predictions".to_string()));
        }

        let n = y_true.len() as f64;
        let errors: Vec<f64> = y_true.iter().zip(y_pred).map(|(t, p)| t - p).collect();
        let abs: Vec<f64> = errors.iter().map(|e| e.abs()).collect();

        let mean = y_true.iter().sum::<f64>() / n;
        let ss_res: f64 = errors.iter().map(|e| e * e).sum();
        let ss_tot: f64 = y_true.iter().map(|t| (t - mean).powi(2)).sum();
        let r2 = if ss_tot > 0.0 {
            1.0 - ss_res / ss_tot
        } else if ss_res == 0.0 {
            1.0
        } else {
            0.0
        };

        let mape = y_true
            .iter()
            .zip(&abs)
            .map(|(t, e)| e / t.abs().max(f64::EPSILON))
            .sum::<f64>()
            / n
            * 100.0;

        let rmsle = include_rmsle.then(|| {
            let sum: f64 = y_true
                .iter()
                .zip(y_pred)
                .map(|(t, p)| (p.max(0.0).ln_1p() - t.max(0.0).ln_1p()).powi(2))
                .sum();
            round3((sum / n).sqrt())
        });

        Ok(Self {
            r2: round3(r2),
            mae: round3(abs.iter().sum::<f64>() / n),
            rmse: round3((ss_res / n).sqrt()),
            mape: round3(mape),
            median_ae: round3(median(&abs)),
            max_error: round3(abs.iter().cloned().fold(0.0, f64::max)),
            rmsle,
        })
    }

    /// `r2_weight · R² − mape_weight · MAPE/100`
    pub fn composite_score(&self, r2_weight: f64, mape_weight: f64) -> f64 {
        r2_weight * self.r2 - mape_weight * (self.mape / 100.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn perfect_fit() {
        let m = RegressionMetrics::compute(&[1.0, 2.0, 3.0], &[1.0, 2.0, 3.0], true).unwrap();
        assert_eq!(m.r2, 1.0);
        assert_eq!(m.mae, 0.0);
        assert_eq!(m.mape, 0.0);
        assert_eq!(m.rmsle, Some(0.0));
    }

    #[test]
    fn known_values() {
        let m = RegressionMetrics::compute(&[100.0, 200.0], &[110.0, 180.0], false).unwrap();
        assert_eq!(m.mae, 15.0);
        assert_eq!(m.max_error, 20.0);
        assert_eq!(m.mape, 10.0);
        assert_eq!(m.rmse, round3((250.0f64).sqrt()));
        assert_eq!(m.r2, 0.9);
        assert_eq!(m.median_ae, 15.0);
        assert!(m.rmsle.is_none());
    }

    #[test]
    fn composite_prefers_lower_percentage_error() {
        let fit_heavy = RegressionMetrics {
            r2: 0.95,
            mae: 0.0,
            rmse: 0.0,
            mape: 30.0,
            median_ae: 0.0,
            max_error: 0.0,
            rmsle: None,
        };
        let precise = RegressionMetrics {
            r2: 0.80,
            mape: 10.0,
            ..fit_heavy.clone()
        };
        assert!(precise.composite_score(0.35, 0.65) > fit_heavy.composite_score(0.35, 0.65));
    }

    #[test]
    fn rejects_mismatched_lengths() {
        assert!(RegressionMetrics::compute(&[1.0], &[], false).is_err());
    }
}
