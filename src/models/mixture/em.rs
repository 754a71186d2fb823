//! Expectation-maximization for the censored lognormal mixture.
//!
//! Censored outcomes are imputed by their truncated-normal expectation before
//! each E-step; the M-step solves a weighted least-squares problem per
//! component and corrects the precision for the variance lost to imputation.
//! The fit is used directly (`fit_em_input`) or to warm-start a Gibbs chain.

use faer::Mat;
use rand::SeedableRng;
use rand::rngs::StdRng;
use tracing::{debug, info};

use crate::input::SurvivalInput;
use crate::models::matrix_ops::{dot_rows, weighted_xtx, weighted_xtz};
use crate::utils::{constant_vector, regularize_symmetric, solve_linear_system, usize_to_f64};

use super::augment::expected_outcomes;
use super::groups::component_means;
use super::input::{PreparedSurvival, prepare_input};
use super::likelihood::{
    component_likelihood, floored_weighted_likelihood, normal_pdf, truncated_variance_factor,
};
use super::priors::{MixturePriorConfig, PRECISION_CEILING};
use super::random::{sample_dirichlet, sample_gamma, sample_normal};
use super::types::{
    EmEstimate, EmOptions, EmOutput, EmOutputKind, EmTrace, MixtureError, MixtureParameters,
};

const EM_PROGRESS_INTERVAL: usize = 20;

/// Final state of one EM run.
#[derive(Debug, Clone)]
pub(crate) struct EmRun {
    pub parameters: MixtureParameters,
    pub responsibilities: Mat<f64>,
    pub trace: Mat<f64>,
    pub log_likelihood: f64,
}

/// Fit the mixture by EM and return either the trace or the final estimate.
///
/// # Errors
///
/// Returns `MixtureError` if input or options are invalid.
pub fn fit_em_input(
    input: &SurvivalInput,
    options: EmOptions,
    kind: EmOutputKind,
) -> Result<EmOutput, MixtureError> {
    fit_em_input_with_priors(input, options, MixturePriorConfig::default(), kind)
}

/// [`fit_em_input`] with explicit initial-value and fallback priors.
///
/// # Errors
///
/// Returns `MixtureError` if input, options, or priors are invalid.
pub fn fit_em_input_with_priors(
    input: &SurvivalInput,
    options: EmOptions,
    priors: MixturePriorConfig,
    kind: EmOutputKind,
) -> Result<EmOutput, MixtureError> {
    options.validate()?;
    if !priors.is_valid() {
        return Err(MixtureError::InvalidPriorConfig);
    }
    let prepared = prepare_input(input)?;
    let mut rng = StdRng::seed_from_u64(options.seed);
    let run = run_em(&mut rng, &prepared, options, priors);

    Ok(match kind {
        EmOutputKind::Trace => EmOutput::Trace(EmTrace {
            draws: run.trace,
            log_likelihood: run.log_likelihood,
        }),
        EmOutputKind::Estimate => {
            let means = component_means(prepared.design_matrix(), &run.parameters.beta);
            let expected_outcome = expected_outcomes(
                &prepared.log_times,
                prepared.event_indicator(),
                &means,
                &run.parameters.sd(),
                &run.responsibilities,
            );
            EmOutput::Estimate(EmEstimate {
                parameters: run.parameters,
                responsibilities: run.responsibilities,
                expected_outcome,
                log_likelihood: run.log_likelihood,
            })
        }
    })
}

/// Run EM for `options.iterations` iterations; iteration 0 draws starting values.
pub(crate) fn run_em(
    rng: &mut StdRng,
    prepared: &PreparedSurvival<'_>,
    options: EmOptions,
    priors: MixturePriorConfig,
) -> EmRun {
    let components = options.components;
    let covariates = prepared.n_covariates();
    let mut trace = Mat::<f64>::zeros(options.iterations, components * (covariates + 2));

    let (mut parameters, mut responsibilities) = if options.better_initial_values {
        best_restart(rng, prepared, options, priors)
    } else {
        let parameters = initial_parameters(rng, components, covariates, priors);
        let means = component_means(prepared.design_matrix(), &parameters.beta);
        let responsibilities = compute_responsibilities(&prepared.log_times, &means, &parameters);
        (parameters, responsibilities)
    };
    write_trace_row(&mut trace, 0, &parameters);

    for iter in 1..options.iterations {
        em_iteration(rng, prepared, &mut parameters, &mut responsibilities, priors);
        write_trace_row(&mut trace, iter, &parameters);

        if options.show_output && (iter + 1).is_multiple_of(EM_PROGRESS_INTERVAL) {
            info!(
                iteration = iter + 1,
                total = options.iterations,
                "EM iteration"
            );
        }
    }

    let means = component_means(prepared.design_matrix(), &parameters.beta);
    let final_weights = compute_responsibilities(&prepared.log_times, &means, &parameters);
    let log_likelihood = em_log_likelihood(
        &prepared.log_times,
        prepared.event_indicator(),
        &means,
        &parameters,
        &final_weights,
    );

    EmRun {
        parameters,
        responsibilities,
        trace,
        log_likelihood,
    }
}

fn best_restart(
    rng: &mut StdRng,
    prepared: &PreparedSurvival<'_>,
    options: EmOptions,
    priors: MixturePriorConfig,
) -> (MixtureParameters, Mat<f64>) {
    let restart_options = EmOptions {
        iterations: options.restart_iterations,
        better_initial_values: false,
        show_output: false,
        ..options
    };

    let mut best: Option<EmRun> = None;
    for _ in 0..options.restarts {
        let candidate = run_em(rng, prepared, restart_options, priors);
        match &best {
            None => {
                if options.show_output {
                    info!(log_likelihood = candidate.log_likelihood, "initial EM log-likelihood");
                }
                best = Some(candidate);
            }
            Some(current) if candidate.log_likelihood > current.log_likelihood => {
                if options.show_output {
                    info!(
                        previous = current.log_likelihood,
                        new = candidate.log_likelihood,
                        "EM restart improved the maximum"
                    );
                }
                best = Some(candidate);
            }
            Some(_) => {}
        }
    }
    if options.show_output {
        info!("starting EM with better initial values");
    }

    match best {
        Some(run) => (run.parameters, run.responsibilities),
        // `restarts` is validated to be positive; this arm only guards direct callers.
        None => {
            let parameters =
                initial_parameters(rng, options.components, prepared.n_covariates(), priors);
            let means = component_means(prepared.design_matrix(), &parameters.beta);
            let responsibilities =
                compute_responsibilities(&prepared.log_times, &means, &parameters);
            (parameters, responsibilities)
        }
    }
}

/// Random EM starting values: Dirichlet weights with a shared random
/// concentration, Gamma precisions, and independent normal coefficients.
pub(crate) fn initial_parameters(
    rng: &mut StdRng,
    components: usize,
    covariates: usize,
    priors: MixturePriorConfig,
) -> MixtureParameters {
    let concentration = sample_gamma(rng, 1.0, 1.0);
    let eta = sample_dirichlet(rng, &constant_vector(concentration, components));
    let mut phi = vec![0.0; components];
    let mut beta = Mat::<f64>::zeros(components, covariates);
    for (g, precision) in phi.iter_mut().enumerate() {
        *precision = sample_gamma(rng, priors.em_init_phi_shape, priors.em_init_phi_rate);
        for col in 0..covariates {
            beta[(g, col)] = sample_normal(rng, 0.0, priors.em_init_beta_sd);
        }
    }
    MixtureParameters { eta, beta, phi }
}

/// One E-step on the imputed outcome followed by the M-step.
pub(crate) fn em_iteration(
    rng: &mut StdRng,
    prepared: &PreparedSurvival<'_>,
    parameters: &mut MixtureParameters,
    responsibilities: &mut Mat<f64>,
    priors: MixturePriorConfig,
) {
    let means = component_means(prepared.design_matrix(), &parameters.beta);
    let sd = parameters.sd();
    let expected = expected_outcomes(
        &prepared.log_times,
        prepared.event_indicator(),
        &means,
        &sd,
        responsibilities,
    );
    *responsibilities = compute_responsibilities(&expected, &means, parameters);
    maximization_step(rng, prepared, parameters, responsibilities, &expected, &sd, priors);
}

/// `N × G` responsibilities `eta_g · pdf(y_i) / sum_h eta_h · pdf(y_i)`.
///
/// Rows whose weights sum to zero are set to `1/G`.
#[must_use]
pub fn compute_responsibilities(
    outcome: &[f64],
    means: &Mat<f64>,
    parameters: &MixtureParameters,
) -> Mat<f64> {
    let components = parameters.components();
    let sd = parameters.sd();
    let uniform = 1.0 / usize_to_f64(components);
    let mut out = Mat::<f64>::zeros(outcome.len(), components);
    for (row, &value) in outcome.iter().enumerate() {
        let mut total = 0.0;
        for g in 0..components {
            let weight = parameters.eta[g] * normal_pdf(value, means[(row, g)], sd[g]);
            out[(row, g)] = weight;
            total += weight;
        }
        for g in 0..components {
            out[(row, g)] = if total > 0.0 {
                out[(row, g)] / total
            } else {
                uniform
            };
        }
    }
    out
}

/// Responsibility-weighted log-likelihood used to rank EM restarts.
///
/// Each term is `W_ig · ln(eta_g · f_g(y_i))` with `f_g` the density for
/// events and the survival function for censored records; a zero product is
/// replaced by `1e-5` before taking the log.
#[must_use]
pub fn em_log_likelihood(
    outcome: &[f64],
    event_indicator: &[u8],
    means: &Mat<f64>,
    parameters: &MixtureParameters,
    responsibilities: &Mat<f64>,
) -> f64 {
    let sd = parameters.sd();
    let mut total = 0.0;
    for (row, (&value, &indicator)) in outcome.iter().zip(event_indicator).enumerate() {
        for g in 0..parameters.components() {
            let term = floored_weighted_likelihood(
                parameters.eta[g],
                value,
                means[(row, g)],
                sd[g],
                indicator == 1,
            );
            total += responsibilities[(row, g)] * term.ln();
        }
    }
    total
}

/// Marginal mixture log-likelihood `sum_i ln sum_g eta_g · f_g(y_i)`.
#[must_use]
pub fn mixture_log_likelihood(
    outcome: &[f64],
    event_indicator: &[u8],
    means: &Mat<f64>,
    parameters: &MixtureParameters,
) -> f64 {
    let sd = parameters.sd();
    outcome
        .iter()
        .zip(event_indicator)
        .enumerate()
        .map(|(row, (&value, &indicator))| {
            (0..parameters.components())
                .map(|g| {
                    parameters.eta[g]
                        * component_likelihood(
                            value,
                            means[(row, g)],
                            sd[g],
                            indicator == 1,
                        )
                })
                .sum::<f64>()
                .ln()
        })
        .sum()
}

fn maximization_step(
    rng: &mut StdRng,
    prepared: &PreparedSurvival<'_>,
    parameters: &mut MixtureParameters,
    responsibilities: &Mat<f64>,
    expected: &[f64],
    previous_sd: &[f64],
    priors: MixturePriorConfig,
) {
    let design = prepared.design_matrix();
    let n = prepared.n_observations();
    let components = parameters.components();

    let column_weights = (0..components)
        .map(|g| {
            (0..n)
                .map(|row| responsibilities[(row, g)])
                .collect::<Vec<_>>()
        })
        .collect::<Vec<_>>();

    for (g, weights) in column_weights.iter().enumerate() {
        parameters.eta[g] = weights.iter().sum::<f64>() / usize_to_f64(n);
    }
    if parameters.eta.iter().any(|eta| *eta == 0.0) {
        parameters.eta = sample_dirichlet(rng, &constant_vector(1.0, components));
        debug!("EM weights redrawn after an empty component");
    }

    for (g, weights) in column_weights.iter().enumerate() {
        let weight_total = weights.iter().sum::<f64>();
        let (system, _) = regularize_symmetric(&weighted_xtx(design, weights));
        let rhs = weighted_xtz(design, weights, expected);
        match solve_linear_system(&system, &rhs) {
            Ok(solution) => {
                for col in 0..design.ncols() {
                    parameters.beta[(g, col)] = solution[(col, 0)];
                }
            }
            Err(err) => debug!(component = g, error = %err, "EM coefficient solve failed"),
        }

        let mut quant = weights
            .iter()
            .zip(expected)
            .enumerate()
            .map(|(row, (&weight, &value))| {
                let residual = value - dot_rows(design, row, &parameters.beta, g);
                weight * residual * residual
            })
            .sum::<f64>();
        let previous_variance = previous_sd[g] * previous_sd[g];
        for &row in &prepared.censored_rows {
            let alpha = (prepared.log_times[row] - dot_rows(design, row, &parameters.beta, g))
                / previous_sd[g];
            quant += weights[row] * previous_variance * truncated_variance_factor(alpha);
        }

        parameters.phi[g] = if quant == 0.0 {
            sample_gamma(rng, priors.fallback_phi_shape, priors.fallback_phi_rate)
        } else {
            weight_total / quant
        };
        let phi = parameters.phi[g];
        if phi > PRECISION_CEILING || !(phi > 0.0 && phi.is_finite()) {
            parameters.phi[g] =
                sample_gamma(rng, priors.fallback_phi_shape, priors.fallback_phi_rate);
            debug!(component = g, phi, "EM precision redrawn");
        }
    }
}

fn write_trace_row(trace: &mut Mat<f64>, iter: usize, parameters: &MixtureParameters) {
    let covariates = parameters.beta.ncols();
    let stride = covariates + 2;
    for g in 0..parameters.components() {
        let base = g * stride;
        trace[(iter, base)] = parameters.eta[g];
        for col in 0..covariates {
            trace[(iter, base + 1 + col)] = parameters.beta[(g, col)];
        }
        trace[(iter, base + covariates + 1)] = parameters.phi[g];
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn idx_to_f64(idx: usize) -> f64 {
        usize_to_f64(idx)
    }

    // Two well-separated regression lines, every record observed.
    fn separated_input(n: usize) -> SurvivalInput {
        let design = Mat::from_fn(n, 2, |i, j| {
            if j == 0 {
                1.0
            } else {
                idx_to_f64(i % 10) / 10.0
            }
        });
        let times = Mat::from_fn(n, 1, |i, _| {
            let x = idx_to_f64(i % 10) / 10.0;
            let jitter = (idx_to_f64(i % 7) - 3.0) * 0.05;
            let log_time = if i % 2 == 0 {
                0.5 * x + jitter
            } else {
                4.0 - x + jitter
            };
            log_time.exp()
        });
        SurvivalInput::new(design, times, vec![1; n])
    }

    fn starting_parameters() -> MixtureParameters {
        MixtureParameters {
            eta: vec![0.4, 0.6],
            beta: Mat::from_fn(2, 2, |g, j| match (g, j) {
                (0, 0) => 0.5,
                (1, 0) => 3.0,
                _ => 0.0,
            }),
            phi: vec![1.0, 1.0],
        }
    }

    #[test]
    fn responsibilities_rows_sum_to_one() {
        let params = starting_parameters();
        let means = Mat::from_fn(3, 2, |_, g| if g == 0 { 0.0 } else { 3.0 });
        let w = compute_responsibilities(&[0.1, 2.9, 1.0e4], &means, &params);
        for row in 0..3 {
            assert_relative_eq!(w[(row, 0)] + w[(row, 1)], 1.0, epsilon = 1.0e-12);
        }
        assert!(w[(0, 0)] > 0.9);
        assert!(w[(1, 1)] > 0.9);
        assert_relative_eq!(w[(2, 0)], 0.5);
    }

    #[test]
    fn em_iterations_do_not_decrease_uncensored_likelihood() {
        let input = separated_input(80);
        let prepared = prepare_input(&input).expect("valid input");
        let mut rng = StdRng::seed_from_u64(7);
        let mut params = starting_parameters();
        let means = component_means(prepared.design_matrix(), &params.beta);
        let mut w = compute_responsibilities(&prepared.log_times, &means, &params);
        let mut previous = mixture_log_likelihood(
            &prepared.log_times,
            prepared.event_indicator(),
            &means,
            &params,
        );
        for _ in 0..25 {
            em_iteration(
                &mut rng,
                &prepared,
                &mut params,
                &mut w,
                MixturePriorConfig::default(),
            );
            let means = component_means(prepared.design_matrix(), &params.beta);
            let current = mixture_log_likelihood(
                &prepared.log_times,
                prepared.event_indicator(),
                &means,
                &params,
            );
            assert!(current >= previous - 1.0e-8, "{current} < {previous}");
            previous = current;
        }
        assert_relative_eq!(params.eta.iter().sum::<f64>(), 1.0, epsilon = 1.0e-12);
    }

    #[test]
    fn em_recovers_separated_components() {
        let input = separated_input(120);
        let options = EmOptions {
            iterations: 100,
            better_initial_values: true,
            restarts: 5,
            restart_iterations: 30,
            seed: 3,
            ..EmOptions::default()
        };
        let output =
            fit_em_input(&input, options, EmOutputKind::Estimate).expect("EM should succeed");
        let EmOutput::Estimate(estimate) = output else {
            panic!("estimate requested");
        };
        let mut intercepts = [
            estimate.parameters.beta[(0, 0)],
            estimate.parameters.beta[(1, 0)],
        ];
        intercepts.sort_by(f64::total_cmp);
        assert_relative_eq!(intercepts[0], 0.0, epsilon = 0.3);
        assert_relative_eq!(intercepts[1], 4.0, epsilon = 0.3);
        assert_relative_eq!(estimate.parameters.eta[0], 0.5, epsilon = 0.1);
        assert_eq!(estimate.expected_outcome.len(), 120);
    }

    #[test]
    fn trace_rows_follow_weight_coefficient_precision_layout() {
        let input = separated_input(40);
        let options = EmOptions {
            iterations: 5,
            seed: 11,
            ..EmOptions::default()
        };
        let EmOutput::Trace(trace) =
            fit_em_input(&input, options, EmOutputKind::Trace).expect("EM should succeed")
        else {
            panic!("trace requested");
        };
        assert_eq!(trace.draws.nrows(), 5);
        assert_eq!(trace.draws.ncols(), 8);
        for iter in 0..5 {
            assert_relative_eq!(
                trace.draws[(iter, 0)] + trace.draws[(iter, 4)],
                1.0,
                epsilon = 1.0e-12
            );
            assert!(trace.draws[(iter, 3)] > 0.0);
            assert!(trace.draws[(iter, 7)] > 0.0);
        }
        assert!(trace.log_likelihood.is_finite());
    }

    #[test]
    fn em_is_deterministic_per_seed() {
        let input = separated_input(40);
        let options = EmOptions {
            iterations: 10,
            seed: 5,
            ..EmOptions::default()
        };
        let first = fit_em_input(&input, options, EmOutputKind::Trace).expect("EM");
        let second = fit_em_input(&input, options, EmOutputKind::Trace).expect("EM");
        match (first, second) {
            (EmOutput::Trace(a), EmOutput::Trace(b)) => {
                for row in 0..a.draws.nrows() {
                    for col in 0..a.draws.ncols() {
                        assert_eq!(a.draws[(row, col)].to_bits(), b.draws[(row, col)].to_bits());
                    }
                }
                assert_eq!(a.log_likelihood.to_bits(), b.log_likelihood.to_bits());
            }
            _ => panic!("trace requested"),
        }
    }

    #[test]
    fn censored_records_raise_expected_outcome() {
        let mut input = separated_input(40);
        for row in (0..40).step_by(4) {
            input.event_indicator[row] = 0;
        }
        let options = EmOptions {
            iterations: 20,
            seed: 9,
            ..EmOptions::default()
        };
        let EmOutput::Estimate(estimate) =
            fit_em_input(&input, options, EmOutputKind::Estimate).expect("EM")
        else {
            panic!("estimate requested");
        };
        for row in (0..40).step_by(4) {
            assert!(estimate.expected_outcome[row] > input.times[(row, 0)].ln());
        }
        assert_relative_eq!(
            estimate.expected_outcome[1],
            input.times[(1, 0)].ln(),
            epsilon = 1.0e-12
        );
    }

    #[test]
    fn invalid_restart_budget_is_rejected() {
        let input = separated_input(10);
        let options = EmOptions {
            better_initial_values: true,
            restarts: 0,
            ..EmOptions::default()
        };
        let err = fit_em_input(&input, options, EmOutputKind::Trace).expect_err("should fail");
        assert!(matches!(err, MixtureError::InvalidEmRestarts));
    }
}
