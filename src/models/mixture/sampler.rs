//! Chain driver and multi-chain runner for the lognormal mixture sampler.
//!
//! A chain is seeded once, optionally warm-started by EM, and then alternates
//! group sampling, empty-component repair and a parameter update for
//! `iterations` steps. Conjugate updates run when censored outcomes are
//! augmented; adaptive Metropolis updates run otherwise.

use std::time::Duration;

use faer::Mat;
use rand::SeedableRng;
use rand::rngs::StdRng;
use tracing::info;

use crate::inference::{AbortSignal, NeverAbort};
use crate::input::SurvivalInput;
use crate::utils::{constant_vector, scaled_identity};

use super::adaptive::{AdaptiveProposalState, update_adaptive};
use super::augment::augment_censored_outcomes;
use super::conjugate::update_conjugate;
use super::em::run_em;
use super::groups::{
    component_means, group_counts, hard_assignments, repair_empty_components, sample_groups,
    sample_initial_groups,
};
use super::input::{PreparedSurvival, prepare_input};
use super::priors::MixturePriorConfig;
use super::random::{sample_dirichlet, sample_gamma, sample_multivariate_normal};
use super::types::{
    ChainDiagnostics, ChainTrace, EmOptions, MixtureChains, MixtureError, MixtureParameters,
    MixtureSamplerConfig, MultiChainOptions,
};

/// Run one chain with the given seed.
///
/// # Errors
///
/// Returns `MixtureError` if input or configuration are invalid or the chain fails.
pub fn fit_mixture_chain_input(
    input: &SurvivalInput,
    config: MixtureSamplerConfig,
    seed: u64,
) -> Result<ChainTrace, MixtureError> {
    fit_mixture_chain_input_with_abort(input, config, seed, &NeverAbort)
}

/// [`fit_mixture_chain_input`] polling `abort` between iterations.
///
/// # Errors
///
/// Returns `MixtureError::Cancelled` if `abort` fires, or any validation or
/// sampling error.
pub fn fit_mixture_chain_input_with_abort(
    input: &SurvivalInput,
    config: MixtureSamplerConfig,
    seed: u64,
    abort: &dyn AbortSignal,
) -> Result<ChainTrace, MixtureError> {
    config.validate()?;
    let prepared = prepare_input(input)?;
    run_chain(&prepared, config, 0, seed, abort)
}

/// Run `multi_chain.chains` independent chains in parallel.
///
/// Chain `i` uses `multi_chain.seeds[i]` and is identical to
/// [`fit_mixture_chain_input`] with that seed.
///
/// # Errors
///
/// Returns `MixtureError` if input or configuration are invalid or any chain fails.
pub fn fit_mixture_input(
    input: &SurvivalInput,
    config: MixtureSamplerConfig,
    multi_chain: &MultiChainOptions,
) -> Result<MixtureChains, MixtureError> {
    fit_mixture_input_with_abort(input, config, multi_chain, &NeverAbort)
}

/// [`fit_mixture_input`] with a shared cancellation signal.
///
/// # Errors
///
/// Returns the error of the lowest-indexed failing chain, `Cancelled` if
/// `abort` fires, or `ChainPanicked` if a worker thread panics.
pub fn fit_mixture_input_with_abort(
    input: &SurvivalInput,
    config: MixtureSamplerConfig,
    multi_chain: &MultiChainOptions,
    abort: &dyn AbortSignal,
) -> Result<MixtureChains, MixtureError> {
    config.validate()?;
    multi_chain.validate()?;
    let prepared = prepare_input(input)?;

    let chains = multi_chain.chains;
    let threads = std::thread::available_parallelism()
        .map_or(1, std::num::NonZeroUsize::get)
        .min(chains);
    let chunk_size = chains.div_ceil(threads).max(1);

    let prepared_ref = &prepared;
    let seeds = multi_chain.seeds.as_slice();
    let stagger = multi_chain.stagger;
    let mut chain_results = (0..chains)
        .map(|_| None)
        .collect::<Vec<Option<Result<ChainTrace, MixtureError>>>>();

    std::thread::scope(|scope| {
        let mut handles = Vec::with_capacity(threads);
        for chunk_start in (0..chains).step_by(chunk_size) {
            let chunk_end = (chunk_start + chunk_size).min(chains);
            handles.push((
                chunk_start,
                scope.spawn(move || {
                    (chunk_start..chunk_end)
                        .map(|chain_index| {
                            wait_for_start(stagger, chain_index);
                            run_chain(
                                prepared_ref,
                                config,
                                chain_index,
                                seeds[chain_index],
                                abort,
                            )
                        })
                        .collect::<Vec<_>>()
                }),
            ));
        }

        // A panicked worker leaves its slots empty; they surface as `ChainPanicked`.
        for (chunk_start, handle) in handles {
            if let Ok(results) = handle.join() {
                for (offset, result) in results.into_iter().enumerate() {
                    chain_results[chunk_start + offset] = Some(result);
                }
            }
        }
    });

    let mut traces = Vec::with_capacity(chains);
    for (chain, result) in chain_results.into_iter().enumerate() {
        traces.push(result.ok_or(MixtureError::ChainPanicked { chain })??);
    }

    Ok(MixtureChains {
        components: config.fit_options.components,
        covariates: prepared.n_covariates(),
        chains: traces,
    })
}

fn wait_for_start(stagger: Duration, chain_index: usize) {
    if stagger.is_zero() || chain_index == 0 {
        return;
    }
    let factor = u32::try_from(chain_index).unwrap_or(u32::MAX);
    std::thread::sleep(stagger.checked_mul(factor).unwrap_or(stagger));
}

/// Column labels of a chain trace: `beta_g_j`, `phi_g`, `eta_g` per component.
#[must_use]
pub fn trace_column_labels(components: usize, covariates: usize) -> Vec<String> {
    let mut labels = Vec::with_capacity(components * (covariates + 2));
    for g in 0..components {
        labels.extend((0..covariates).map(|j| format!("beta_{g}_{j}")));
        labels.push(format!("phi_{g}"));
        labels.push(format!("eta_{g}"));
    }
    labels
}

/// Column labels of an EM trace: `eta_g`, `beta_g_j`, `phi_g` per component.
#[must_use]
pub fn em_trace_column_labels(components: usize, covariates: usize) -> Vec<String> {
    let mut labels = Vec::with_capacity(components * (covariates + 2));
    for g in 0..components {
        labels.push(format!("eta_{g}"));
        labels.extend((0..covariates).map(|j| format!("beta_{g}_{j}")));
        labels.push(format!("phi_{g}"));
    }
    labels
}

/// Starting point of a chain.
struct ChainStart {
    parameters: MixtureParameters,
    groups: Vec<usize>,
}

fn initial_state(
    rng: &mut StdRng,
    prepared: &PreparedSurvival<'_>,
    config: MixtureSamplerConfig,
    seed: u64,
) -> Result<ChainStart, MixtureError> {
    let options = config.fit_options;
    let priors = config.prior_config;

    if options.em_iterations > 0 {
        let run = run_em(rng, prepared, EmOptions::warm_start(options, seed), priors);
        let groups = hard_assignments(&run.responsibilities);
        return Ok(ChainStart {
            parameters: run.parameters,
            groups,
        });
    }

    if options.show_output {
        info!("skipping EM warm start");
    }
    let parameters = prior_draw(rng, options.components, prepared.n_covariates(), priors)?;
    let groups = sample_initial_groups(rng, &parameters.eta, prepared.n_observations());
    Ok(ChainStart { parameters, groups })
}

fn prior_draw(
    rng: &mut StdRng,
    components: usize,
    covariates: usize,
    priors: MixturePriorConfig,
) -> Result<MixtureParameters, MixtureError> {
    let eta = sample_dirichlet(rng, &constant_vector(1.0, components));
    let zero_mean = vec![0.0; covariates];
    let covariance = scaled_identity(covariates, priors.init_beta_sd * priors.init_beta_sd);
    let mut phi = vec![0.0; components];
    let mut beta = Mat::<f64>::zeros(components, covariates);
    for (g, precision) in phi.iter_mut().enumerate() {
        *precision = sample_gamma(rng, priors.init_phi_shape, priors.init_phi_rate);
        let draw = sample_multivariate_normal(rng, &zero_mean, &covariance)?;
        for (col, value) in draw.into_iter().enumerate() {
            beta[(g, col)] = value;
        }
    }
    Ok(MixtureParameters { eta, beta, phi })
}

fn write_trace_row(trace: &mut Mat<f64>, iter: usize, parameters: &MixtureParameters) {
    let covariates = parameters.beta.ncols();
    let stride = covariates + 2;
    for g in 0..parameters.components() {
        let base = g * stride;
        for col in 0..covariates {
            trace[(iter, base + col)] = parameters.beta[(g, col)];
        }
        trace[(iter, base + covariates)] = parameters.phi[g];
        trace[(iter, base + covariates + 1)] = parameters.eta[g];
    }
}

#[allow(clippy::too_many_lines)]
fn run_chain(
    prepared: &PreparedSurvival<'_>,
    config: MixtureSamplerConfig,
    chain: usize,
    seed: u64,
    abort: &dyn AbortSignal,
) -> Result<ChainTrace, MixtureError> {
    let options = config.fit_options;
    let priors = config.prior_config;
    let controller = config.adaptive_tuning.controller;
    let components = options.components;
    let covariates = prepared.n_covariates();
    let design_matrix = prepared.design_matrix();
    let event_indicator = prepared.event_indicator();

    let mut rng = StdRng::seed_from_u64(seed);
    let ChainStart {
        mut parameters,
        mut groups,
    } = initial_state(&mut rng, prepared, config, seed)?;

    let mut trace = Mat::<f64>::zeros(options.iterations, options.trace_columns(covariates));
    let mut proposal_state =
        AdaptiveProposalState::new(components, config.adaptive_tuning.initial_proposal_scale);
    let mut working_outcome = prepared.log_times.clone();
    let mut diagnostics = ChainDiagnostics {
        seed,
        ..ChainDiagnostics::default()
    };
    let progress_interval = options.iterations.div_ceil(10).max(1);

    for iter in 0..options.iterations {
        if abort.is_aborted() {
            return Err(MixtureError::Cancelled {
                chain,
                completed: iter,
            });
        }

        let means = component_means(design_matrix, &parameters.beta);
        let sd = parameters.sd();

        if options.data_augmentation {
            diagnostics.augmentation_fallbacks += augment_censored_outcomes(
                &mut rng,
                &prepared.log_times,
                event_indicator,
                &means,
                &groups,
                &sd,
                &mut working_outcome,
            );
        }

        groups = sample_groups(
            &mut rng,
            &working_outcome,
            event_indicator,
            &means,
            &parameters,
            options.data_augmentation,
        );
        let mut counts = group_counts(&groups, components);
        let repair = repair_empty_components(&mut rng, &mut groups, &mut counts);
        diagnostics.repaired_components += repair.repaired;

        if options.data_augmentation {
            diagnostics.skipped_beta_updates += update_conjugate(
                &mut rng,
                design_matrix,
                &working_outcome,
                &groups,
                &counts,
                &mut parameters,
                priors,
            )?;
        } else {
            update_adaptive(
                &mut rng,
                design_matrix,
                &working_outcome,
                event_indicator,
                &groups,
                &counts,
                &mut parameters,
                &mut proposal_state,
                controller,
                priors,
                iter,
            )?;
        }

        write_trace_row(&mut trace, iter, &parameters);
        diagnostics.iterations_completed = iter + 1;

        if options.show_output && (iter + 1).is_multiple_of(progress_interval) {
            info!(
                chain = chain + 1,
                iteration = iter + 1,
                total = options.iterations,
                "MCMC progress"
            );
        }
    }

    if options.show_output {
        info!(chain = chain + 1, "chain finished sampling");
    }

    if !options.data_augmentation {
        diagnostics.acceptance_rates = Some(proposal_state.acceptance_rates());
        diagnostics.final_proposal_scales =
            Some((proposal_state.phi_scale, proposal_state.beta_scale));
    }

    Ok(ChainTrace {
        draws: trace,
        diagnostics,
    })
}
