//! Adaptive random-walk Metropolis updates used when censored outcomes are not
//! augmented and the censored likelihood is evaluated directly.

use faer::Mat;
use rand::rngs::StdRng;

use crate::inference::{ProposalStats, RobbinsMonro};
use crate::models::matrix_ops::select_rows;
use crate::utils::{scaled_identity, usize_to_f64};

use super::input::component_rows;
use super::likelihood::log_record_likelihood;
use super::priors::{MixturePriorConfig, log_gamma_density, log_zero_mean_normal_density};
use super::random::{sample_dirichlet, sample_multivariate_normal, sample_normal, sample_uniform};
use super::types::{MixtureAcceptanceRates, MixtureError, MixtureParameters};

/// Per-component proposal scales and adaptation rates, persisted across iterations.
///
/// The `log(phi)` scale is a normal standard deviation; the `beta` scale is the
/// common variance of an isotropic normal proposal.
#[derive(Debug, Clone)]
pub struct AdaptiveProposalState {
    pub phi_scale: Vec<f64>,
    pub phi_rate: Vec<f64>,
    pub beta_scale: Vec<f64>,
    pub beta_rate: Vec<f64>,
    phi_stats: ProposalStats,
    beta_stats: ProposalStats,
}

impl AdaptiveProposalState {
    #[must_use]
    pub fn new(components: usize, initial_scale: f64) -> Self {
        Self {
            phi_scale: vec![initial_scale; components],
            phi_rate: vec![1.0; components],
            beta_scale: vec![initial_scale; components],
            beta_rate: vec![1.0; components],
            phi_stats: ProposalStats::default(),
            beta_stats: ProposalStats::default(),
        }
    }

    /// Acceptance rates pooled over components since construction.
    #[must_use]
    pub fn acceptance_rates(&self) -> MixtureAcceptanceRates {
        MixtureAcceptanceRates {
            phi: self.phi_stats.acceptance_rate(),
            beta: self.beta_stats.acceptance_rate(),
        }
    }
}

/// Rows of one component with their design, outcome, and event flags.
struct ComponentData {
    design: Mat<f64>,
    outcome: Vec<f64>,
    observed: Vec<bool>,
}

impl ComponentData {
    fn gather(
        design_matrix: &Mat<f64>,
        outcome: &[f64],
        event_indicator: &[u8],
        rows: &[usize],
    ) -> Self {
        Self {
            design: select_rows(design_matrix, rows),
            outcome: rows.iter().map(|&row| outcome[row]).collect(),
            observed: rows.iter().map(|&row| event_indicator[row] == 1).collect(),
        }
    }

    fn residuals(&self, coefficients: &[f64]) -> Vec<f64> {
        self.outcome
            .iter()
            .enumerate()
            .map(|(idx, &value)| {
                let fitted = coefficients
                    .iter()
                    .enumerate()
                    .map(|(col, coef)| self.design[(idx, col)] * coef)
                    .sum::<f64>();
                value - fitted
            })
            .collect()
    }

    fn log_likelihood(&self, residuals: &[f64], phi: f64) -> f64 {
        residuals
            .iter()
            .zip(&self.observed)
            .map(|(&residual, &observed)| log_record_likelihood(residual, phi, observed))
            .sum()
    }
}

// The uniform is drawn for every decision so the generator stream does not
// depend on the sign of `log_acceptance`.
fn accept(log_acceptance: f64, rng: &mut StdRng) -> bool {
    sample_uniform(rng).ln() < log_acceptance
}

/// Draw `eta` from its Dirichlet conditional, then one adaptive Metropolis
/// step on `log(phi_g)` and one on `beta_g` for every component.
///
/// `iteration` is the chain's iteration index and drives the Robbins–Monro rate.
///
/// # Errors
///
/// Returns `MixtureError` if a `beta` proposal cannot be drawn.
#[allow(clippy::too_many_arguments)]
pub fn update_adaptive(
    rng: &mut StdRng,
    design_matrix: &Mat<f64>,
    outcome: &[f64],
    event_indicator: &[u8],
    groups: &[usize],
    counts: &[usize],
    parameters: &mut MixtureParameters,
    state: &mut AdaptiveProposalState,
    controller: RobbinsMonro,
    priors: MixturePriorConfig,
    iteration: usize,
) -> Result<(), MixtureError> {
    let concentration = priors.eta_concentration(false);
    let alpha = counts
        .iter()
        .map(|&count| usize_to_f64(count) + concentration)
        .collect::<Vec<_>>();
    parameters.eta = sample_dirichlet(rng, &alpha);

    for g in 0..parameters.components() {
        let rows = component_rows(groups, g);
        let data = ComponentData::gather(design_matrix, outcome, event_indicator, &rows);
        let current_beta = parameters.coefficients(g);
        let residuals = data.residuals(&current_beta);

        let phi = update_precision(
            rng,
            &data,
            &residuals,
            parameters.phi[g],
            state,
            g,
            controller,
            priors,
            iteration,
        );
        parameters.phi[g] = phi;

        let beta = update_coefficients(
            rng,
            &data,
            &residuals,
            current_beta,
            phi,
            state,
            g,
            controller,
            priors,
            iteration,
        )?;
        for (col, value) in beta.into_iter().enumerate() {
            parameters.beta[(g, col)] = value;
        }
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn update_precision(
    rng: &mut StdRng,
    data: &ComponentData,
    residuals: &[f64],
    current: f64,
    state: &mut AdaptiveProposalState,
    g: usize,
    controller: RobbinsMonro,
    priors: MixturePriorConfig,
    iteration: usize,
) -> f64 {
    let psi = current.ln();
    let proposed_psi = sample_normal(rng, psi, state.phi_scale[g]);
    let proposed = proposed_psi.exp();

    let target = |phi: f64| {
        log_gamma_density(phi, priors.phi_shape, priors.phi_rate)
            + data.log_likelihood(residuals, phi)
    };
    // `proposed_psi - psi` is the Jacobian of the log transform.
    let log_acceptance = target(proposed) - target(current) + proposed_psi - psi;
    let accepted = accept(log_acceptance, rng);
    state.phi_stats.record(accepted);

    let (scale, rate) = controller.adapt(state.phi_scale[g], accepted, iteration);
    state.phi_scale[g] = scale;
    state.phi_rate[g] = rate;

    if accepted { proposed } else { current }
}

#[allow(clippy::too_many_arguments)]
fn update_coefficients(
    rng: &mut StdRng,
    data: &ComponentData,
    current_residuals: &[f64],
    current: Vec<f64>,
    phi: f64,
    state: &mut AdaptiveProposalState,
    g: usize,
    controller: RobbinsMonro,
    priors: MixturePriorConfig,
    iteration: usize,
) -> Result<Vec<f64>, MixtureError> {
    let covariance = scaled_identity(current.len(), state.beta_scale[g]);
    let proposed = sample_multivariate_normal(rng, &current, &covariance)?;
    let proposed_residuals = data.residuals(&proposed);

    let log_prior = |beta: &[f64]| {
        beta.iter()
            .map(|&value| log_zero_mean_normal_density(value, priors.beta_variance))
            .sum::<f64>()
    };
    let log_acceptance = log_prior(&proposed) + data.log_likelihood(&proposed_residuals, phi)
        - log_prior(&current)
        - data.log_likelihood(current_residuals, phi);
    let accepted = accept(log_acceptance, rng);
    state.beta_stats.record(accepted);

    let (scale, rate) = controller.adapt(state.beta_scale[g], accepted, iteration);
    state.beta_scale[g] = scale;
    state.beta_rate[g] = rate;

    Ok(if accepted { proposed } else { current })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use rand::SeedableRng;

    fn component_fixture(n: usize) -> (Mat<f64>, Vec<f64>, Vec<u8>) {
        let design = Mat::from_fn(n, 1, |_, _| 1.0);
        let outcome = (0..n)
            .map(|i| 1.0 + 0.3 * (usize_to_f64(i % 5) - 2.0) / 2.0)
            .collect::<Vec<_>>();
        let indicators = (0..n).map(|i| u8::from(i % 6 != 0)).collect::<Vec<_>>();
        (design, outcome, indicators)
    }

    #[test]
    fn adaptive_chain_moves_toward_data() {
        let mut rng = StdRng::seed_from_u64(31);
        let (design, outcome, indicators) = component_fixture(120);
        let groups = vec![0; 120];
        let counts = vec![120];
        let mut params = MixtureParameters {
            eta: vec![1.0],
            beta: Mat::from_fn(1, 1, |_, _| -3.0),
            phi: vec![0.5],
        };
        let mut state = AdaptiveProposalState::new(1, 1.0);
        for iteration in 0..1_500 {
            update_adaptive(
                &mut rng,
                &design,
                &outcome,
                &indicators,
                &groups,
                &counts,
                &mut params,
                &mut state,
                RobbinsMonro::default(),
                MixturePriorConfig::default(),
                iteration,
            )
            .expect("update should succeed");
        }
        assert_relative_eq!(params.eta[0], 1.0);
        assert_relative_eq!(params.beta[(0, 0)], 1.0, epsilon = 0.25);
        assert!(params.phi[0] > 5.0);
        let rates = state.acceptance_rates();
        assert!(rates.phi > 0.05 && rates.phi < 0.95);
        assert!(rates.beta > 0.05 && rates.beta < 0.95);
    }

    #[test]
    fn adaptation_rate_follows_iteration_index() {
        let mut rng = StdRng::seed_from_u64(2);
        let (design, outcome, indicators) = component_fixture(12);
        let groups = vec![0; 12];
        let mut params = MixtureParameters {
            eta: vec![1.0],
            beta: Mat::from_fn(1, 1, |_, _| 1.0),
            phi: vec![1.0],
        };
        let mut state = AdaptiveProposalState::new(1, 1.0);
        update_adaptive(
            &mut rng,
            &design,
            &outcome,
            &indicators,
            &groups,
            &[12],
            &mut params,
            &mut state,
            RobbinsMonro::default(),
            MixturePriorConfig::default(),
            3,
        )
        .expect("update should succeed");
        assert_relative_eq!(state.phi_rate[0], 4.0f64.powf(-0.55), epsilon = 1.0e-12);
        assert_relative_eq!(state.beta_rate[0], 4.0f64.powf(-0.55), epsilon = 1.0e-12);
        let rate = state.phi_rate[0];
        let grown = (rate * 0.56).exp();
        let shrunk = (-rate * 0.44).exp();
        assert!(
            (state.phi_scale[0] - grown).abs() < 1.0e-12
                || (state.phi_scale[0] - shrunk).abs() < 1.0e-12
        );
    }

    #[test]
    fn empty_component_samples_from_prior() {
        let mut rng = StdRng::seed_from_u64(6);
        let (design, outcome, indicators) = component_fixture(10);
        let mut params = MixtureParameters {
            eta: vec![0.5, 0.5],
            beta: Mat::<f64>::zeros(2, 1),
            phi: vec![1.0, 1.0],
        };
        let mut state = AdaptiveProposalState::new(2, 1.0);
        update_adaptive(
            &mut rng,
            &design,
            &outcome,
            &indicators,
            &[0; 10],
            &[10, 0],
            &mut params,
            &mut state,
            RobbinsMonro::default(),
            MixturePriorConfig::default(),
            0,
        )
        .expect("update should succeed");
        assert!(params.phi[1] > 0.0 && params.phi[1].is_finite());
        assert!(params.beta[(1, 0)].is_finite());
    }
}
