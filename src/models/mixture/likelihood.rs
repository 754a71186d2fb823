//! Normal density, distribution, and survival functions on the log-time scale.

use statrs::function::erf::erfc;

use super::priors::{LIKELIHOOD_FLOOR, SURVIVAL_FLOOR};

const INV_SQRT_TAU: f64 = 0.398_942_280_401_432_7;

/// Standard normal density.
#[must_use]
pub fn standard_normal_pdf(z: f64) -> f64 {
    INV_SQRT_TAU * (-0.5 * z * z).exp()
}

/// Standard normal distribution function `Phi(z)`.
#[must_use]
pub fn standard_normal_cdf(z: f64) -> f64 {
    0.5 * erfc(-z / std::f64::consts::SQRT_2)
}

/// Standard normal survival function `1 - Phi(z)`, accurate in the upper tail.
#[must_use]
pub fn standard_normal_sf(z: f64) -> f64 {
    0.5 * erfc(z / std::f64::consts::SQRT_2)
}

/// `Normal(mean, sd)` density at `value`.
#[must_use]
pub fn normal_pdf(value: f64, mean: f64, sd: f64) -> f64 {
    standard_normal_pdf((value - mean) / sd) / sd
}

/// Probability that a `Normal(mean, sd)` variate exceeds `value`.
#[must_use]
pub fn survival_probability(value: f64, mean: f64, sd: f64) -> f64 {
    standard_normal_sf((value - mean) / sd)
}

/// Inverse Mills ratio `pdf(alpha) / S(alpha)`.
///
/// The survival function is floored at `1e-4` when `Phi(alpha)` rounds to one.
#[must_use]
pub fn inverse_mills_ratio(alpha: f64) -> f64 {
    let survival = if standard_normal_cdf(alpha) >= 1.0 {
        SURVIVAL_FLOOR
    } else {
        standard_normal_sf(alpha)
    };
    standard_normal_pdf(alpha) / survival
}

/// `E[Y | Y > threshold]` for `Y ~ Normal(mean, sd)`.
#[must_use]
pub fn truncated_normal_mean(threshold: f64, mean: f64, sd: f64) -> f64 {
    let alpha = (threshold - mean) / sd;
    sd.mul_add(inverse_mills_ratio(alpha), mean)
}

/// `Var[Y | Y > threshold] / sd²` for `Y ~ Normal(mean, sd)`: `1 + alpha·lambda - lambda²`.
#[must_use]
pub fn truncated_variance_factor(alpha: f64) -> f64 {
    let lambda = inverse_mills_ratio(alpha);
    alpha.mul_add(lambda, 1.0) - lambda * lambda
}

/// Per-component likelihood term: density for an event, survival for a censored record.
#[must_use]
pub fn component_likelihood(value: f64, mean: f64, sd: f64, observed: bool) -> f64 {
    if observed {
        normal_pdf(value, mean, sd)
    } else {
        survival_probability(value, mean, sd)
    }
}

/// `weight × component_likelihood`, with an exact zero replaced by `1e-5`.
#[must_use]
pub fn floored_weighted_likelihood(
    weight: f64,
    value: f64,
    mean: f64,
    sd: f64,
    observed: bool,
) -> f64 {
    let term = weight * component_likelihood(value, mean, sd, observed);
    if term == 0.0 { LIKELIHOOD_FLOOR } else { term }
}

/// Log-likelihood of one record given precision `phi` and residual `value - mean`:
/// `0.5 ln(phi) - phi/2 · r²` for events, `ln S(sqrt(phi)·r)` for censored records.
///
/// The event branch omits the `-0.5 ln(2 pi)` constant.
#[must_use]
pub fn log_record_likelihood(residual: f64, phi: f64, observed: bool) -> f64 {
    if observed {
        (-0.5 * phi * residual).mul_add(residual, 0.5 * phi.ln())
    } else {
        standard_normal_sf(phi.sqrt() * residual).ln()
    }
}
