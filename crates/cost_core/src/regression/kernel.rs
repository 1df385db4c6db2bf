//! RBF-kernel families: epsilon-SVR and Gaussian-process regression.

use super::{FittedRegressor, KernelGamma};
use crate::errors::{CostError, Result};
use nalgebra::{DMatrix, DVector};
use tracing::debug;

const SVR_MAX_SWEEPS: usize = 1_000;
const SVR_TOL: f64 = 1e-5;
/// Diagonal noise added to the GP covariance.
const GP_NOISE: f64 = 1e-10;
const GP_GRID_POINTS: usize = 7;
const GP_MIN_STEP: f64 = 1e-3;

fn squared_distances(x: &[Vec<f64>]) -> DMatrix<f64> {
    let n = x.len();
    DMatrix::from_fn(n, n, |i, j| {
        x[i].iter().zip(&x[j]).map(|(a, b)| (a - b).powi(2)).sum()
    })
}

/// Resolve a gamma setting against the training design.
pub fn resolve_gamma(gamma: KernelGamma, x: &[Vec<f64>]) -> f64 {
    let p = x.first().map_or(1, |r| r.len()).max(1) as f64;
    match gamma {
        KernelGamma::Value(g) => g,
        KernelGamma::Auto => 1.0 / p,
        KernelGamma::Scale => {
            let values: Vec<f64> = x.iter().flatten().copied().collect();
            let count = values.len().max(1) as f64;
            let mean = values.iter().sum::<f64>() / count;
            let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / count;
            if var > 0.0 {
                1.0 / (p * var)
            } else {
                1.0
            }
        }
    }
}

/// Epsilon-insensitive support vector regression solved by dual coordinate
/// descent. The bias is folded into the kernel as a constant feature so each
/// coordinate step only has to respect the box constraint.
pub fn fit_svr(x: &[Vec<f64>], y: &[f64], c: f64, epsilon: f64, gamma: KernelGamma) -> Result<FittedRegressor> {
    let n = x.len();
    if n == 0 || n != y.len() {
        return Err(CostError::InvalidInput("SVR needs matching non-empty inputs".to_string()));
    }
    let gamma = resolve_gamma(gamma, x);
    let kernel = squared_distances(x).map(|d| (-gamma * d).exp() + 1.0);

    let mut beta = vec![0.0; n];
    let mut output = vec![0.0; n];
    let mut sweeps = 0;
    for sweep in 0..SVR_MAX_SWEEPS {
        sweeps = sweep + 1;
        let mut max_delta: f64 = 0.0;
        for i in 0..n {
            let diag = kernel[(i, i)];
            let linear = output[i] - y[i] - diag * beta[i];
            let new = (-super::linear::soft_threshold(linear, epsilon) / diag).clamp(-c, c);
            let delta = new - beta[i];
            if delta != 0.0 {
                for (k, out) in output.iter_mut().enumerate() {
                    *out += kernel[(k, i)] * delta;
                }
                beta[i] = new;
                max_delta = max_delta.max(delta.abs());
            }
        }
        if max_delta < SVR_TOL {
            break;
        }
    }
    debug!(sweeps, support = beta.iter().filter(|b| **b != 0.0).count(), "SVR solved");

    if beta.iter().any(|b| !b.is_finite()) {
        return Err(CostError::Numerical("SVR dual diverged".to_string()));
    }
    let intercept = beta.iter().sum();
    Ok(FittedRegressor::Kernel {
        support: x.to_vec(),
        dual_coef: beta,
        gamma,
        amplitude: 1.0,
        intercept,
    })
}

struct GpFit {
    log_marginal_likelihood: f64,
    alpha: DVector<f64>,
}

fn gp_evidence(sq: &DMatrix<f64>, y: &DVector<f64>, amplitude: f64, length: f64) -> Option<GpFit> {
    let n = y.len();
    let gamma = 1.0 / (2.0 * length * length);
    let mut cov = sq.map(|d| amplitude * (-gamma * d).exp());
    for i in 0..n {
        cov[(i, i)] += GP_NOISE;
    }

    let mut jitter = 0.0;
    let chol = loop {
        let mut attempt = cov.clone();
        if jitter > 0.0 {
            for i in 0..n {
                attempt[(i, i)] += jitter;
            }
        }
        if let Some(chol) = attempt.cholesky() {
            break chol;
        }
        jitter = if jitter == 0.0 { 1e-8 * amplitude.max(1.0) } else { jitter * 100.0 };
        if jitter > 1e-2 * amplitude.max(1.0) {
            return None;
        }
    };

    let alpha = chol.solve(y);
    let log_det: f64 = chol.l().diagonal().iter().map(|v| v.ln()).sum();
    let lml = -0.5 * y.dot(&alpha) - log_det - 0.5 * n as f64 * (2.0 * std::f64::consts::PI).ln();
    lml.is_finite().then_some(GpFit {
        log_marginal_likelihood: lml,
        alpha,
    })
}

/// Gaussian process with a constant × RBF kernel, hyperparameters chosen by
/// maximizing the log marginal likelihood inside the given bounds.
pub fn fit_gaussian_process(
    x: &[Vec<f64>],
    y: &[f64],
    constant_bounds: (f64, f64),
    length_scale_bounds: (f64, f64),
) -> Result<FittedRegressor> {
    let n = x.len();
    if n == 0 || n != y.len() {
        return Err(CostError::InvalidInput("GP needs matching non-empty inputs".to_string()));
    }
    let sq = squared_distances(x);
    let yv = DVector::from_column_slice(y);
    let lo = [constant_bounds.0.ln(), length_scale_bounds.0.ln()];
    let hi = [constant_bounds.1.ln(), length_scale_bounds.1.ln()];
    let clamp = |theta: [f64; 2]| [theta[0].clamp(lo[0], hi[0]), theta[1].clamp(lo[1], hi[1])];
    let score = |theta: [f64; 2]| {
        gp_evidence(&sq, &yv, theta[0].exp(), theta[1].exp())
            .map_or(f64::NEG_INFINITY, |fit| fit.log_marginal_likelihood)
    };

    // coarse log-spaced grid, then compass search around the best point
    let mut best = clamp([0.0, 0.0]);
    let mut best_score = score(best);
    for a in 0..GP_GRID_POINTS {
        for b in 0..GP_GRID_POINTS {
            let t = |d: usize, k: usize| lo[d] + (hi[d] - lo[d]) * k as f64 / (GP_GRID_POINTS - 1) as f64;
            let theta = [t(0, a), t(1, b)];
            let s = score(theta);
            if s > best_score {
                best = theta;
                best_score = s;
            }
        }
    }
    if !best_score.is_finite() {
        return Err(CostError::Numerical("GP covariance is never positive definite".to_string()));
    }

    let mut step = [
        (hi[0] - lo[0]) / (GP_GRID_POINTS - 1) as f64 / 2.0,
        (hi[1] - lo[1]) / (GP_GRID_POINTS - 1) as f64 / 2.0,
    ];
    while step[0].max(step[1]) > GP_MIN_STEP {
        let mut improved = false;
        for d in 0..2 {
            for sign in [1.0, -1.0] {
                let mut theta = best;
                theta[d] += sign * step[d];
                let theta = clamp(theta);
                let s = score(theta);
                if s > best_score {
                    best = theta;
                    best_score = s;
                    improved = true;
                }
            }
        }
        if !improved {
            step = [step[0] / 2.0, step[1] / 2.0];
        }
    }

    let (amplitude, length) = (best[0].exp(), best[1].exp());
    let fit = gp_evidence(&sq, &yv, amplitude, length)
        .ok_or_else(|| CostError::Numerical("GP refit failed".to_string()))?;
    debug!(amplitude, length, lml = fit.log_marginal_likelihood, "GP hyperparameters selected");

    Ok(FittedRegressor::Kernel {
        support: x.to_vec(),
        dual_coef: fit.alpha.iter().copied().collect(),
        gamma: 1.0 / (2.0 * length * length),
        amplitude,
        intercept: 0.0,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn curve() -> (Vec<Vec<f64>>, Vec<f64>) {
        let x: Vec<Vec<f64>> = (0..10).map(|i| vec![i as f64 / 3.0 - 1.5]).collect();
        let y: Vec<f64> = x.iter().map(|r| r[0].sin()).collect();
        (x, y)
    }

    #[test]
    fn svr_stays_within_tube_on_training_points() {
        let (x, y) = curve();
        let model = fit_svr(&x, &y, 100.0, 0.01, KernelGamma::Value(10.0)).unwrap();
        for (row, target) in x.iter().zip(&y) {
            assert!((model.predict_row(row) - target).abs() < 0.05);
        }
    }

    #[test]
    fn gamma_resolution() {
        let x = vec![vec![0.0, 0.0], vec![2.0, 2.0]];
        assert_eq!(resolve_gamma(KernelGamma::Auto, &x), 0.5);
        assert_eq!(resolve_gamma(KernelGamma::Scale, &x), 0.5);
        assert_eq!(resolve_gamma(KernelGamma::Value(0.1), &x), 0.1);
        assert_eq!(resolve_gamma(KernelGamma::Scale, &[vec![1.0], vec![1.0]]), 1.0);
    }

    #[test]
    fn gaussian_process_interpolates_training_data() {
        let (x, y) = curve();
        let model = fit_gaussian_process(&x, &y, (1e-3, 1e6), (1e-6, 1e3)).unwrap();
        for (row, target) in x.iter().zip(&y) {
            assert!((model.predict_row(row) - target).abs() < 1e-2);
        }
    }
}
