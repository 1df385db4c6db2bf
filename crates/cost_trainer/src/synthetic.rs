//! Synthetic interpolation for categories with very few real samples.

use rand::{rngs::StdRng, Rng, SeedableRng};

/// Exponents applied to the two predictor ratios when scaling a synthetic target.
const RATIO_EXPONENTS: [f64; 2] = [0.6, 0.4];

/// Draw from Beta(2, 2): the median of three independent uniforms.
fn beta_2_2(rng: &mut StdRng) -> f64 {
    let mut u = [rng.gen::<f64>(), rng.gen::<f64>(), rng.gen::<f64>()];
    u.sort_by(f64::total_cmp);
    u[1]
}

/// Generate `count` synthetic rows from real two-predictor samples.
///
/// Each row mixes two distinct real samples with a Beta(2, 2) weight and
/// jitters every predictor by ±1%. Its target is the first sample's target
/// scaled by `ratio_1^0.6 · ratio_2^0.4` (ratios of the new predictors to the
/// first sample's) with another ±1% jitter. Returns no rows when fewer than
/// two real samples exist.
pub fn interpolate(x: &[[f64; 2]], y: &[f64], count: usize, seed: u64) -> (Vec<[f64; 2]>, Vec<f64>) {
    let n = x.len().min(y.len());
    if n < 2 {
        return (Vec::new(), Vec::new());
    }

    let mut rng = StdRng::seed_from_u64(seed);
    let mut xs = Vec::with_capacity(count);
    let mut ys = Vec::with_capacity(count);
    for _ in 0..count {
        let first = rng.gen_range(0..n);
        let mut second = rng.gen_range(0..n - 1);
        if second >= first {
            second += 1;
        }

        let alpha = beta_2_2(&mut rng);
        let mut row = [0.0; 2];
        let mut target = y[first];
        for k in 0..2 {
            row[k] = (alpha * x[first][k] + (1.0 - alpha) * x[second][k]) * rng.gen_range(0.99..1.01);
            let ratio = if x[first][k] != 0.0 { row[k] / x[first][k] } else { 1.0 };
            target *= ratio.powf(RATIO_EXPONENTS[k]);
        }
        target *= rng.gen_range(0.99..1.01);

        xs.push(row);
        ys.push(target);
    }
    (xs, ys)
}
