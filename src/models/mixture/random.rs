//! Random-variate primitives driven by one explicit seeded generator.
//!
//! Every draw in a chain flows through the `StdRng` passed in, so a chain is a
//! pure function of its seed.

use faer::Mat;
use num_traits::ToPrimitive;
use rand::RngExt;
use rand::rngs::StdRng;

use super::types::MixtureError;
use crate::utils::{cholesky_lower, usize_to_f64};

/// Uniform draw on `[0, 1)`.
pub fn sample_uniform(rng: &mut StdRng) -> f64 {
    rng.random::<f64>()
}

/// Standard normal draw via Box–Muller.
pub fn sample_standard_normal(rng: &mut StdRng) -> f64 {
    let u1 = (1.0_f64 - rng.random::<f64>()).max(f64::MIN_POSITIVE);
    let u2 = rng.random::<f64>();
    (-2.0_f64 * u1.ln()).sqrt() * (std::f64::consts::TAU * u2).cos()
}

/// `Normal(mean, sd)` draw.
pub fn sample_normal(rng: &mut StdRng, mean: f64, sd: f64) -> f64 {
    sd.mul_add(sample_standard_normal(rng), mean)
}

/// `Gamma(shape, rate)` draw with mean `shape / rate`.
///
/// Returns `NaN` for non-positive parameters.
pub fn sample_gamma(rng: &mut StdRng, shape: f64, rate: f64) -> f64 {
    if !(rate > 0.0 && rate.is_finite()) {
        return f64::NAN;
    }
    sample_gamma_scaled(rng, shape, 1.0 / rate)
}

// Marsaglia–Tsang; shapes below one are boosted and corrected by `u^(1/shape)`.
fn sample_gamma_scaled(rng: &mut StdRng, shape: f64, scale: f64) -> f64 {
    if !(shape > 0.0 && scale > 0.0) {
        return f64::NAN;
    }

    if shape < 1.0 {
        let u = (1.0_f64 - rng.random::<f64>()).max(f64::MIN_POSITIVE);
        return sample_gamma_scaled(rng, shape + 1.0, scale) * u.powf(1.0 / shape);
    }

    let shape_minus_third = shape - (1.0 / 3.0);
    let coeff = (1.0 / (9.0 * shape_minus_third)).sqrt();
    loop {
        let standard_normal = sample_standard_normal(rng);
        let one_plus_coeff_noise = coeff.mul_add(standard_normal, 1.0);
        if one_plus_coeff_noise <= 0.0 {
            continue;
        }
        let cubic_term = one_plus_coeff_noise * one_plus_coeff_noise * one_plus_coeff_noise;
        let uniform = rng.random::<f64>();
        if uniform
            < (0.0331 * standard_normal * standard_normal * standard_normal)
                .mul_add(-standard_normal, 1.0)
        {
            return scale * shape_minus_third * cubic_term;
        }
        if uniform.ln()
            < (0.5 * standard_normal).mul_add(
                standard_normal,
                shape_minus_third * (1.0 - cubic_term + cubic_term.ln()),
            )
        {
            return scale * shape_minus_third * cubic_term;
        }
    }
}

/// `Dirichlet(alpha)` draw by normalising independent `Gamma(alpha_k, 1)` draws.
///
/// When every gamma draw underflows to zero the uniform vector is returned.
pub fn sample_dirichlet(rng: &mut StdRng, alpha: &[f64]) -> Vec<f64> {
    let mut draws = alpha
        .iter()
        .map(|&concentration| sample_gamma(rng, concentration, 1.0))
        .collect::<Vec<_>>();
    normalize_in_place(&mut draws);
    draws
}

/// Multivariate normal draw `mean + L z` with `L Lᵗ = covariance`.
///
/// # Errors
///
/// Returns `MixtureError::Decomposition` if `covariance` is not positive definite.
pub fn sample_multivariate_normal(
    rng: &mut StdRng,
    mean: &[f64],
    covariance: &Mat<f64>,
) -> Result<Vec<f64>, MixtureError> {
    let lower = cholesky_lower(covariance).ok_or(MixtureError::Decomposition)?;
    let noise = (0..mean.len())
        .map(|_| sample_standard_normal(rng))
        .collect::<Vec<_>>();
    Ok(mean
        .iter()
        .enumerate()
        .map(|(row, &center)| {
            center
                + (0..=row)
                    .map(|col| lower[(row, col)] * noise[col])
                    .sum::<f64>()
        })
        .collect())
}

/// Inverse-CDF categorical draw over indices `0..weights.len()`.
///
/// `weights` need not be normalised. A zero or non-finite total falls back to
/// the uniform distribution. When the running sum never reaches the uniform
/// because of rounding, the last index with positive weight is returned.
pub fn sample_categorical(rng: &mut StdRng, weights: &[f64]) -> usize {
    let len = weights.len();
    if len == 0 {
        return 0;
    }
    let total = weights.iter().sum::<f64>();
    let uniform = rng.random::<f64>();
    if !(total > 0.0 && total.is_finite()) {
        let scaled = (uniform * usize_to_f64(len)).floor();
        return scaled.to_usize().unwrap_or(0).min(len - 1);
    }

    let target = uniform * total;
    let mut cumulative = 0.0;
    for (idx, &weight) in weights.iter().enumerate() {
        cumulative += weight;
        if target < cumulative {
            return idx;
        }
    }
    weights.iter().rposition(|&weight| weight > 0.0).unwrap_or(len - 1)
}

/// Scale `values` to sum to one; a zero or non-finite total yields the uniform vector.
pub fn normalize_in_place(values: &mut [f64]) {
    let total = values.iter().sum::<f64>();
    if total > 0.0 && total.is_finite() {
        for value in values.iter_mut() {
            *value /= total;
        }
    } else if !values.is_empty() {
        let uniform = 1.0 / usize_to_f64(values.len());
        values.fill(uniform);
    }
}
