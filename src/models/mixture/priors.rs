//! Prior specifications, numeric safety thresholds, and log-density helpers
//! for the lognormal mixture.

use statrs::function::gamma::ln_gamma;

/// Maximum rejection-sampling attempts for one censored outcome draw.
pub const AUGMENTATION_ATTEMPT_LIMIT: usize = 10_000;
/// Multiplier applied to the censoring value when rejection sampling gives up.
pub const AUGMENTATION_FALLBACK_FACTOR: f64 = 1.01;
/// Floor for the normal survival function in the truncated-normal moments.
pub const SURVIVAL_FLOOR: f64 = 1.0e-4;
/// Substitute for a per-component likelihood term that evaluates to zero.
pub const LIKELIHOOD_FLOOR: f64 = 1.0e-5;
/// EM precision estimates above this value are treated as degenerate.
pub const PRECISION_CEILING: f64 = 1.0e5;
/// Members a repaired component is filled up to.
pub const MIN_COMPONENT_MEMBERS: usize = 5;
/// Maximum reassignment draws per empty component.
pub const REPAIR_ATTEMPT_LIMIT: usize = 10_000;

/// Hyperparameters for the mixture prior set and for random initial values.
#[derive(Debug, Clone, Copy)]
pub struct MixturePriorConfig {
    /// Pseudo-count added to group counts for the `eta` update when censored
    /// outcomes are augmented.
    pub eta_concentration_augmented: f64,
    /// Pseudo-count added to group counts for the `eta` update on the
    /// adaptive Metropolis path.
    pub eta_concentration_adaptive: f64,
    /// Shape of the Gamma(shape, rate) prior on each precision `phi_g`.
    pub phi_shape: f64,
    /// Rate of the Gamma(shape, rate) prior on each precision `phi_g`.
    pub phi_rate: f64,
    /// Variance for the Normal(0, variance·I) prior on `beta_g`.
    pub beta_variance: f64,
    /// Shape and rate of the Gamma draw for initial precisions in the sampler.
    pub init_phi_shape: f64,
    pub init_phi_rate: f64,
    /// Standard deviation of the Normal(0, sd²·I) draw for initial sampler coefficients.
    pub init_beta_sd: f64,
    /// Shape and rate of the Gamma draw for initial EM precisions.
    pub em_init_phi_shape: f64,
    pub em_init_phi_rate: f64,
    /// Standard deviation of the Normal(0, sd) draw for initial EM coefficients.
    pub em_init_beta_sd: f64,
    /// Shape and rate of the Gamma redraw used when an EM precision degenerates.
    pub fallback_phi_shape: f64,
    pub fallback_phi_rate: f64,
}

impl Default for MixturePriorConfig {
    fn default() -> Self {
        Self {
            eta_concentration_augmented: 150.0,
            eta_concentration_adaptive: 1.5,
            phi_shape: 0.01,
            phi_rate: 0.01,
            beta_variance: 1_000.0,
            init_phi_shape: 0.5,
            init_phi_rate: 0.5,
            init_beta_sd: 20.0,
            em_init_phi_shape: 0.1,
            em_init_phi_rate: 0.1,
            em_init_beta_sd: 20.0,
            fallback_phi_shape: 0.5,
            fallback_phi_rate: 0.5,
        }
    }
}

impl MixturePriorConfig {
    /// Whether all prior hyperparameters are numerically valid.
    #[must_use]
    pub fn is_valid(self) -> bool {
        let positive = |value: f64| value > 0.0 && value.is_finite();
        positive(self.eta_concentration_augmented)
            && positive(self.eta_concentration_adaptive)
            && positive(self.phi_shape)
            && positive(self.phi_rate)
            && positive(self.beta_variance)
            && positive(self.init_phi_shape)
            && positive(self.init_phi_rate)
            && positive(self.init_beta_sd)
            && positive(self.em_init_phi_shape)
            && positive(self.em_init_phi_rate)
            && positive(self.em_init_beta_sd)
            && positive(self.fallback_phi_shape)
            && positive(self.fallback_phi_rate)
    }

    /// Dirichlet pseudo-count for the `eta` update on the selected path.
    #[must_use]
    pub const fn eta_concentration(self, data_augmentation: bool) -> f64 {
        if data_augmentation {
            self.eta_concentration_augmented
        } else {
            self.eta_concentration_adaptive
        }
    }
}

/// Log-density for `Gamma(shape, rate)`.
#[must_use]
pub fn log_gamma_density(value: f64, shape: f64, rate: f64) -> f64 {
    if !(value > 0.0 && shape > 0.0 && rate > 0.0) {
        return f64::NEG_INFINITY;
    }
    shape.mul_add(rate.ln(), -ln_gamma(shape)) + (shape - 1.0).mul_add(value.ln(), -rate * value)
}

/// Log-density for `Normal(0, variance)`.
#[must_use]
pub fn log_zero_mean_normal_density(value: f64, variance: f64) -> f64 {
    if variance <= 0.0 {
        return f64::NEG_INFINITY;
    }
    -0.5 * (std::f64::consts::TAU.ln() + variance.ln() + value * value / variance)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn prior_defaults_are_valid() {
        assert!(MixturePriorConfig::default().is_valid());
    }

    #[test]
    fn eta_concentration_depends_on_path() {
        let priors = MixturePriorConfig::default();
        assert_relative_eq!(priors.eta_concentration(true), 150.0);
        assert_relative_eq!(priors.eta_concentration(false), 1.5);
    }

    #[test]
    fn non_positive_hyperparameter_is_invalid() {
        let priors = MixturePriorConfig {
            phi_rate: 0.0,
            ..MixturePriorConfig::default()
        };
        assert!(!priors.is_valid());
    }

    #[test]
    fn gamma_density_matches_exponential_case() {
        // Gamma(1, 2) is Exponential(2): log(2) - 2x.
        assert_relative_eq!(
            log_gamma_density(0.75, 1.0, 2.0),
            2.0f64.ln() - 1.5,
            epsilon = 1.0e-12
        );
        assert!(log_gamma_density(0.0, 1.0, 1.0).is_infinite());
    }

    #[test]
    fn zero_mean_normal_density_at_origin() {
        assert_relative_eq!(
            log_zero_mean_normal_density(0.0, 1.0),
            -0.5 * std::f64::consts::TAU.ln(),
            epsilon = 1.0e-12
        );
    }
}
