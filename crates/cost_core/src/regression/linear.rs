//! Linear families: ordinary least squares, ridge, Bayesian ridge and
//! elastic net. All fit an intercept by centering the design matrix.

use super::FittedRegressor;
use crate::errors::{CostError, Result};
use nalgebra::{DMatrix, DVector};
use tracing::debug;

const BAYES_MAX_ITER: usize = 300;
const BAYES_TOL: f64 = 1e-3;
const ENET_TOL: f64 = 1e-4;

pub(crate) struct Centered {
    pub x: DMatrix<f64>,
    pub y: DVector<f64>,
    pub x_mean: DVector<f64>,
    pub y_mean: f64,
}

pub(crate) fn center(x: &[Vec<f64>], y: &[f64]) -> Result<Centered> {
    let n = x.len();
    if n == 0 || n != y.len() {
        return Err(CostError::InvalidInput(format!(
            "expected matching non-empty inputs, got {} rows and {} targets",
            n,
            y.len()
        )));
    }
    let p = x[0].len();
    if x.iter().any(|r| r.len() != p) {
        return Err(CostError::InvalidInput("ragged feature rows".to_string()));
    }

    let mut m = DMatrix::from_fn(n, p, |i, j| x[i][j]);
    let x_mean = DVector::from_fn(p, |j, _| m.column(j).mean());
    for j in 0..p {
        let mu = x_mean[j];
        m.column_mut(j).add_scalar_mut(-mu);
    }
    let y_mean = y.iter().sum::<f64>() / n as f64;
    let yc = DVector::from_iterator(n, y.iter().map(|v| v - y_mean));

    Ok(Centered {
        x: m,
        y: yc,
        x_mean,
        y_mean,
    })
}

fn finish(c: &Centered, coef: DVector<f64>) -> Result<FittedRegressor> {
    let intercept = c.y_mean - c.x_mean.dot(&coef);
    if !intercept.is_finite() || coef.iter().any(|v| !v.is_finite()) {
        return Err(CostError::Numerical("non-finite coefficients".to_string()));
    }
    Ok(FittedRegressor::Linear {
        coefficients: coef.iter().copied().collect(),
        intercept,
    })
}

/// Minimum-norm least squares via SVD.
pub fn fit_ols(x: &[Vec<f64>], y: &[f64]) -> Result<FittedRegressor> {
    let c = center(x, y)?;
    let svd = c.x.clone().svd(true, true);
    for tol in [1e-10, 1e-8, 1e-6] {
        if let Ok(coef) = svd.solve(&c.y, tol) {
            if coef.iter().all(|v| v.is_finite()) {
                return finish(&c, coef);
            }
        }
    }
    Err(CostError::Numerical("least squares system is ill-conditioned".to_string()))
}

/// L2-penalized least squares.
pub fn fit_ridge(x: &[Vec<f64>], y: &[f64], alpha: f64) -> Result<FittedRegressor> {
    let c = center(x, y)?;
    let p = c.x.ncols();
    let gram = c.x.transpose() * &c.x + DMatrix::identity(p, p) * alpha;
    let rhs = c.x.transpose() * &c.y;
    let coef = match gram.clone().cholesky() {
        Some(chol) => chol.solve(&rhs),
        None => gram
            .lu()
            .solve(&rhs)
            .ok_or_else(|| CostError::Numerical("ridge system is singular".to_string()))?,
    };
    finish(&c, coef)
}

/// Evidence-maximizing Bayesian ridge with Gamma priors on both precisions.
pub fn fit_bayesian_ridge(
    x: &[Vec<f64>],
    y: &[f64],
    alpha_1: f64,
    alpha_2: f64,
    lambda_1: f64,
    lambda_2: f64,
) -> Result<FittedRegressor> {
    let c = center(x, y)?;
    let n = c.x.nrows() as f64;
    let p = c.x.ncols();

    let eig = (c.x.transpose() * &c.x).symmetric_eigen();
    let eigvals: Vec<f64> = eig.eigenvalues.iter().map(|v| v.max(0.0)).collect();
    let vectors = eig.eigenvectors;
    let projected = vectors.transpose() * (c.x.transpose() * &c.y);

    let solve = |alpha: f64, lambda: f64| -> DVector<f64> {
        let shrunk = DVector::from_fn(p, |j, _| projected[j] / (eigvals[j] + lambda / alpha));
        &vectors * shrunk
    };

    let mut alpha = 1.0 / (c.y.norm_squared() / n + f64::EPSILON);
    let mut lambda = 1.0;
    let mut coef_old: Option<DVector<f64>> = None;

    for iter in 0..BAYES_MAX_ITER {
        let coef = solve(alpha, lambda);
        let rmse = (&c.y - &c.x * &coef).norm_squared();
        let gamma: f64 = eigvals
            .iter()
            .map(|d| alpha * d / (lambda + alpha * d))
            .sum();
        lambda = (gamma + 2.0 * lambda_1) / (coef.norm_squared() + 2.0 * lambda_2);
        alpha = (n - gamma + 2.0 * alpha_1) / (rmse + 2.0 * alpha_2);

        if !alpha.is_finite() || !lambda.is_finite() {
            return Err(CostError::Numerical("Bayesian ridge precision diverged".to_string()));
        }
        if let Some(prev) = &coef_old {
            if (prev - &coef).abs().sum() < BAYES_TOL {
                debug!(iterations = iter + 1, "Bayesian ridge converged");
                break;
            }
        }
        coef_old = Some(coef);
    }

    finish(&c, solve(alpha, lambda))
}

/// Coordinate-descent elastic net.
pub fn fit_elastic_net(
    x: &[Vec<f64>],
    y: &[f64],
    alpha: f64,
    l1_ratio: f64,
    max_iter: usize,
) -> Result<FittedRegressor> {
    let c = center(x, y)?;
    let n = c.x.nrows() as f64;
    let p = c.x.ncols();
    let l1 = alpha * l1_ratio * n;
    let l2 = alpha * (1.0 - l1_ratio) * n;

    let norms: Vec<f64> = (0..p).map(|j| c.x.column(j).norm_squared()).collect();
    let mut coef = DVector::zeros(p);
    let mut resid = c.y.clone();

    for _ in 0..max_iter {
        let mut max_step: f64 = 0.0;
        let mut max_coef: f64 = 0.0;
        for j in 0..p {
            if norms[j] == 0.0 {
                continue;
            }
            let old = coef[j];
            let rho = c.x.column(j).dot(&resid) + norms[j] * old;
            let new = soft_threshold(rho, l1) / (norms[j] + l2);
            if new != old {
                resid -= c.x.column(j) * (new - old);
                coef[j] = new;
            }
            max_step = max_step.max((new - old).abs());
            max_coef = max_coef.max(new.abs());
        }
        if max_coef == 0.0 || max_step / max_coef < ENET_TOL {
            break;
        }
    }

    finish(&c, coef)
}

pub(crate) fn soft_threshold(value: f64, threshold: f64) -> f64 {
    if value > threshold {
        value - threshold
    } else if value < -threshold {
        value + threshold
    } else {
        0.0
    }
}
