//! Regression families and the scaled pipeline that wraps them.

pub mod kernel;
pub mod linear;
mod scaler;

pub use scaler::StandardScaler;

use crate::errors::{CostError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Candidate model families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelFamily {
    Linear,
    Ridge,
    BayesianRidge,
    ElasticNet,
    Svr,
    GaussianProcess,
}

impl fmt::Display for ModelFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ModelFamily::Linear => "Linear Regression",
            ModelFamily::Ridge => "Ridge",
            ModelFamily::BayesianRidge => "Bayesian Ridge",
            ModelFamily::ElasticNet => "ElasticNet",
            ModelFamily::Svr => "SVR",
            ModelFamily::GaussianProcess => "Gaussian Process",
        };
        f.write_str(name)
    }
}

/// RBF kernel width.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KernelGamma {
    /// `1 / (n_features * var(X))`
    Scale,
    /// `1 / n_features`
    Auto,
    Value(f64),
}

/// One point of a hyperparameter grid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "family", rename_all = "snake_case")]
pub enum ModelSpec {
    Linear,
    Ridge {
        alpha: f64,
    },
    BayesianRidge {
        alpha_1: f64,
        alpha_2: f64,
        lambda_1: f64,
        lambda_2: f64,
    },
    ElasticNet {
        alpha: f64,
        l1_ratio: f64,
        max_iter: usize,
    },
    Svr {
        c: f64,
        epsilon: f64,
        gamma: KernelGamma,
    },
    GaussianProcess {
        constant_bounds: (f64, f64),
        length_scale_bounds: (f64, f64),
    },
}

impl ModelSpec {
    pub fn family(&self) -> ModelFamily {
        match self {
            ModelSpec::Linear => ModelFamily::Linear,
            ModelSpec::Ridge { .. } => ModelFamily::Ridge,
            ModelSpec::BayesianRidge { .. } => ModelFamily::BayesianRidge,
            ModelSpec::ElasticNet { .. } => ModelFamily::ElasticNet,
            ModelSpec::Svr { .. } => ModelFamily::Svr,
            ModelSpec::GaussianProcess { .. } => ModelFamily::GaussianProcess,
        }
    }

    /// Fit on raw (already scaled, if desired) features.
    pub fn fit(&self, x: &[Vec<f64>], y: &[f64]) -> Result<FittedRegressor> {
        match *self {
            ModelSpec::Linear => linear::fit_ols(x, y),
            ModelSpec::Ridge { alpha } => linear::fit_ridge(x, y, alpha),
            ModelSpec::BayesianRidge {
                alpha_1,
                alpha_2,
                lambda_1,
                lambda_2,
            } => linear::fit_bayesian_ridge(x, y, alpha_1, alpha_2, lambda_1, lambda_2),
            ModelSpec::ElasticNet {
                alpha,
                l1_ratio,
                max_iter,
            } => linear::fit_elastic_net(x, y, alpha, l1_ratio, max_iter),
            ModelSpec::Svr { c, epsilon, gamma } => kernel::fit_svr(x, y, c, epsilon, gamma),
            ModelSpec::GaussianProcess {
                constant_bounds,
                length_scale_bounds,
            } => kernel::fit_gaussian_process(x, y, constant_bounds, length_scale_bounds),
        }
    }
}

/// Learned parameters of a single regressor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FittedRegressor {
    Linear {
        coefficients: Vec<f64>,
        intercept: f64,
    },
    /// `intercept + Σ dual_coef_i · amplitude · exp(-gamma · |x - support_i|²)`
    Kernel {
        support: Vec<Vec<f64>>,
        dual_coef: Vec<f64>,
        gamma: f64,
        amplitude: f64,
        intercept: f64,
    },
}

impl FittedRegressor {
    pub fn predict_row(&self, row: &[f64]) -> f64 {
        match self {
            FittedRegressor::Linear {
                coefficients,
                intercept,
            } => intercept + coefficients.iter().zip(row).map(|(c, v)| c * v).sum::<f64>(),
            FittedRegressor::Kernel {
                support,
                dual_coef,
                gamma,
                amplitude,
                intercept,
            } => {
                let acc: f64 = support
                    .iter()
                    .zip(dual_coef)
                    .map(|(s, a)| {
                        let d: f64 = s.iter().zip(row).map(|(p, q)| (p - q).powi(2)).sum();
                        a * amplitude * (-gamma * d).exp()
                    })
                    .sum();
                acc + intercept
            }
        }
    }

    pub fn input_width(&self) -> Option<usize> {
        match self {
            FittedRegressor::Linear { coefficients, .. } => Some(coefficients.len()),
            FittedRegressor::Kernel { support, .. } => support.first().map(|s| s.len()),
        }
    }
}

/// Optional standardization followed by a fitted regressor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pipeline {
    pub spec: ModelSpec,
    pub scaler: Option<StandardScaler>,
    pub regressor: FittedRegressor,
}

impl Pipeline {
    pub fn fit(spec: &ModelSpec, scaled: bool, x: &[Vec<f64>], y: &[f64]) -> Result<Self> {
        let scaler = scaled.then(|| StandardScaler::fit(x));
        let regressor = match &scaler {
            Some(s) => spec.fit(&s.transform(x), y)?,
            None => spec.fit(x, y)?,
        };
        Ok(Self {
            spec: spec.clone(),
            scaler,
            regressor,
        })
    }

    pub fn family(&self) -> ModelFamily {
        self.spec.family()
    }

    pub fn predict_row(&self, row: &[f64]) -> Result<f64> {
        if let Some(width) = self.regressor.input_width() {
            if width != row.len() {
                return Err(CostError::InvalidInput(format!(
                    "model expects {} features, got {}",
                    width,
                    row.len()
                )));
            }
        }
        let value = match &self.scaler {
            Some(s) => self.regressor.predict_row(&s.transform_row(row)),
            None => self.regressor.predict_row(row),
        };
        if value.is_finite() {
            Ok(value)
        } else {
            Err(CostError::Numerical("non-finite prediction".to_string()))
        }
    }

    pub fn predict(&self, rows: &[Vec<f64>]) -> Result<Vec<f64>> {
        rows.iter().map(|r| self.predict_row(r)).collect()
    }
}
