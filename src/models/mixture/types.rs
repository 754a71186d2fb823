//! Core public types for the lognormal mixture module.

use std::time::Duration;

use faer::Mat;
use thiserror::Error;

use super::priors::MixturePriorConfig;
use crate::inference::{InferenceError, RobbinsMonro};
use crate::input::InputError;

/// Errors returned by mixture configuration, validation, and fitting.
#[derive(Debug, Error)]
pub enum MixtureError {
    #[error(transparent)]
    InvalidInput(#[from] InputError),
    #[error(transparent)]
    InvalidProposalTuning(#[from] InferenceError),
    #[error("iterations must be positive")]
    InvalidIterations,
    #[error("mixture must have at least one component; found {0}")]
    InvalidComponentCount(usize),
    #[error("EM restarts and restart iterations must be positive when better initial values are requested")]
    InvalidEmRestarts,
    #[error("multi-chain workflows require at least {min} chains; found {found}")]
    InvalidChainCount { min: usize, found: usize },
    #[error("seed count ({seeds}) must match chain count ({chains})")]
    SeedCountMismatch { chains: usize, seeds: usize },
    #[error("invalid mixture prior configuration")]
    InvalidPriorConfig,
    #[error("covariance matrix is not positive definite")]
    Decomposition,
    #[error("linear solve failed")]
    SolveFailed,
    #[error("chain {chain} cancelled after {completed} iterations")]
    Cancelled { chain: usize, completed: usize },
    #[error("chain {chain} worker panicked")]
    ChainPanicked { chain: usize },
}

/// Sampler configuration for a single lognormal mixture chain.
#[derive(Debug, Clone, Copy)]
pub struct MixtureFitOptions {
    /// Total MCMC iterations (`Niter`).
    pub iterations: usize,
    /// EM iterations used for warm-starting; `0` disables the warm start.
    pub em_iterations: usize,
    /// Number of mixture components (`G`).
    pub components: usize,
    /// Augment censored outcomes (conjugate updates) instead of evaluating the
    /// censored likelihood directly (adaptive Metropolis updates).
    pub data_augmentation: bool,
    /// Run a multi-start EM search before the warm-start EM.
    pub better_initial_values: bool,
    /// Number of EM restarts compared by log-likelihood (`N_em`).
    pub em_restarts: usize,
    /// Iterations of each EM restart (`Niter_em`).
    pub em_restart_iterations: usize,
    /// Emit progress through `tracing`.
    pub show_output: bool,
}

impl Default for MixtureFitOptions {
    fn default() -> Self {
        Self {
            iterations: 1_000,
            em_iterations: 150,
            components: 2,
            data_augmentation: false,
            better_initial_values: false,
            em_restarts: 10,
            em_restart_iterations: 50,
            show_output: false,
        }
    }
}

impl MixtureFitOptions {
    /// # Errors
    ///
    /// Returns `MixtureError` if options are internally inconsistent.
    pub const fn validate(self) -> Result<(), MixtureError> {
        if self.iterations == 0 {
            return Err(MixtureError::InvalidIterations);
        }
        if self.components == 0 {
            return Err(MixtureError::InvalidComponentCount(self.components));
        }
        if self.em_iterations > 0
            && self.better_initial_values
            && (self.em_restarts == 0 || self.em_restart_iterations == 0)
        {
            return Err(MixtureError::InvalidEmRestarts);
        }
        Ok(())
    }

    /// Number of trace columns `G * (k + 2)` for `covariates` design columns.
    #[must_use]
    pub const fn trace_columns(self, covariates: usize) -> usize {
        self.components * (covariates + 2)
    }
}

/// Configuration for a standalone EM fit.
#[derive(Debug, Clone, Copy)]
pub struct EmOptions {
    /// EM iterations (`Niter`); iteration 0 draws the starting values.
    pub iterations: usize,
    pub components: usize,
    pub better_initial_values: bool,
    pub restarts: usize,
    pub restart_iterations: usize,
    pub seed: u64,
    pub show_output: bool,
}

impl Default for EmOptions {
    fn default() -> Self {
        Self {
            iterations: 200,
            components: 2,
            better_initial_values: false,
            restarts: 10,
            restart_iterations: 50,
            seed: 42,
            show_output: false,
        }
    }
}

impl EmOptions {
    /// EM settings used to warm-start a chain seeded with `seed`.
    #[must_use]
    pub const fn warm_start(fit_options: MixtureFitOptions, seed: u64) -> Self {
        Self {
            iterations: fit_options.em_iterations,
            components: fit_options.components,
            better_initial_values: fit_options.better_initial_values,
            restarts: fit_options.em_restarts,
            restart_iterations: fit_options.em_restart_iterations,
            seed,
            show_output: false,
        }
    }

    /// # Errors
    ///
    /// Returns `MixtureError` if options are internally inconsistent.
    pub const fn validate(self) -> Result<(), MixtureError> {
        if self.iterations == 0 {
            return Err(MixtureError::InvalidIterations);
        }
        if self.components == 0 {
            return Err(MixtureError::InvalidComponentCount(self.components));
        }
        if self.better_initial_values && (self.restarts == 0 || self.restart_iterations == 0) {
            return Err(MixtureError::InvalidEmRestarts);
        }
        Ok(())
    }
}

/// Which EM result shape to return.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EmOutputKind {
    /// Per-iteration trace and final log-likelihood.
    #[default]
    Trace,
    /// Final parameters, responsibilities, and expected outcomes.
    Estimate,
}

/// Proposal controls for the adaptive Metropolis path.
#[derive(Debug, Clone, Copy)]
pub struct AdaptiveTuning {
    /// Starting proposal scale for every component's `log(phi)` and `beta` blocks.
    pub initial_proposal_scale: f64,
    /// Step-size controller shared by all adaptive blocks.
    pub controller: RobbinsMonro,
}

impl Default for AdaptiveTuning {
    fn default() -> Self {
        Self {
            initial_proposal_scale: 1.0,
            controller: RobbinsMonro::default(),
        }
    }
}

impl AdaptiveTuning {
    /// # Errors
    ///
    /// Returns `InferenceError` if the scale or controller settings are invalid.
    pub fn validate(self) -> Result<(), InferenceError> {
        if !(self.initial_proposal_scale > 0.0 && self.initial_proposal_scale.is_finite()) {
            return Err(InferenceError::InvalidInitialScale(
                self.initial_proposal_scale,
            ));
        }
        self.controller.validate()
    }
}

/// Full sampler configuration for mixture fitting.
#[derive(Debug, Clone, Copy, Default)]
pub struct MixtureSamplerConfig {
    pub fit_options: MixtureFitOptions,
    pub prior_config: MixturePriorConfig,
    pub adaptive_tuning: AdaptiveTuning,
}

impl MixtureSamplerConfig {
    /// # Errors
    ///
    /// Returns `MixtureError` if any configuration block is invalid.
    pub fn validate(self) -> Result<(), MixtureError> {
        self.fit_options.validate()?;
        if !self.prior_config.is_valid() {
            return Err(MixtureError::InvalidPriorConfig);
        }
        self.adaptive_tuning.validate()?;
        Ok(())
    }
}

/// Configuration for running multiple independent chains.
#[derive(Debug, Clone)]
pub struct MultiChainOptions {
    /// Number of independent chains to run.
    pub chains: usize,
    /// One seed per chain; chain `i` is fully determined by `seeds[i]`.
    pub seeds: Vec<u64>,
    /// Chain `i` sleeps `i * stagger` before starting. Has no effect on results.
    pub stagger: Duration,
}

impl MultiChainOptions {
    /// Explicit per-chain seeds.
    #[must_use]
    pub fn with_seeds(seeds: Vec<u64>) -> Self {
        Self {
            chains: seeds.len(),
            seeds,
            stagger: Duration::ZERO,
        }
    }

    /// Chain `i` uses `base_seed + i * seed_stride` with wrapping arithmetic.
    #[must_use]
    pub fn from_stride(base_seed: u64, seed_stride: u64, chains: usize) -> Self {
        let seeds = (0..chains)
            .map(|chain_index| {
                let index_u64 = u64::try_from(chain_index).unwrap_or(u64::MAX);
                base_seed.wrapping_add(index_u64.wrapping_mul(seed_stride))
            })
            .collect();
        Self {
            chains,
            seeds,
            stagger: Duration::ZERO,
        }
    }

    #[must_use]
    pub const fn with_stagger(mut self, stagger: Duration) -> Self {
        self.stagger = stagger;
        self
    }

    /// # Errors
    ///
    /// Returns `MixtureError` if there are no chains or seeds do not match chains.
    pub const fn validate(&self) -> Result<(), MixtureError> {
        if self.chains == 0 {
            return Err(MixtureError::InvalidChainCount {
                min: 1,
                found: self.chains,
            });
        }
        if self.seeds.len() != self.chains {
            return Err(MixtureError::SeedCountMismatch {
                chains: self.chains,
                seeds: self.seeds.len(),
            });
        }
        Ok(())
    }
}

/// Mixture parameters for `G` components over `k` covariates.
#[derive(Debug, Clone)]
pub struct MixtureParameters {
    /// Mixing weights on the simplex, length `G`.
    pub eta: Vec<f64>,
    /// `G × k` coefficients; row `g` is component `g`'s regression vector.
    pub beta: Mat<f64>,
    /// Positive precisions, length `G`.
    pub phi: Vec<f64>,
}

impl MixtureParameters {
    #[must_use]
    pub fn components(&self) -> usize {
        self.eta.len()
    }

    /// Component standard deviations `1 / sqrt(phi_g)`.
    #[must_use]
    pub fn sd(&self) -> Vec<f64> {
        self.phi.iter().map(|phi| 1.0 / phi.sqrt()).collect()
    }

    /// Coefficients of component `g` as a vector.
    #[must_use]
    pub fn coefficients(&self, g: usize) -> Vec<f64> {
        (0..self.beta.ncols()).map(|col| self.beta[(g, col)]).collect()
    }
}

/// EM trace: one row per iteration with (weight, coefficients, precision) per component.
#[derive(Debug, Clone)]
pub struct EmTrace {
    pub draws: Mat<f64>,
    pub log_likelihood: f64,
}

/// Final EM state.
#[derive(Debug, Clone)]
pub struct EmEstimate {
    pub parameters: MixtureParameters,
    /// `N × G` responsibilities from the last E-step.
    pub responsibilities: Mat<f64>,
    /// Log-time outcome with censored records replaced by their conditional expectation.
    pub expected_outcome: Vec<f64>,
    pub log_likelihood: f64,
}

/// Result of a standalone EM fit.
#[derive(Debug, Clone)]
pub enum EmOutput {
    Trace(EmTrace),
    Estimate(EmEstimate),
}

impl EmOutput {
    #[must_use]
    pub const fn log_likelihood(&self) -> f64 {
        match self {
            Self::Trace(trace) => trace.log_likelihood,
            Self::Estimate(estimate) => estimate.log_likelihood,
        }
    }
}

/// Acceptance rates of the adaptive Metropolis blocks, pooled over components.
#[derive(Debug, Clone, Copy, Default)]
pub struct MixtureAcceptanceRates {
    pub phi: f64,
    pub beta: f64,
}

/// Per-chain sampler diagnostics.
#[derive(Debug, Clone, Default)]
pub struct ChainDiagnostics {
    pub seed: u64,
    pub iterations_completed: usize,
    /// Present only on the adaptive (non-augmented) path.
    pub acceptance_rates: Option<MixtureAcceptanceRates>,
    /// Final per-component proposal scales `(phi, beta)` on the adaptive path.
    pub final_proposal_scales: Option<(Vec<f64>, Vec<f64>)>,
    /// Censored draws that hit the rejection-sampling cap and used the fallback value.
    pub augmentation_fallbacks: usize,
    /// Number of empty-component repairs performed.
    pub repaired_components: usize,
    /// Conjugate `beta` updates skipped because the posterior precision was singular.
    pub skipped_beta_updates: usize,
}

/// Iteration trace for one chain.
#[derive(Debug, Clone)]
pub struct ChainTrace {
    /// `Niter × G·(k+2)` matrix; per component: coefficients, precision, weight.
    pub draws: Mat<f64>,
    pub diagnostics: ChainDiagnostics,
}

/// Stacked traces of every chain: iteration × column × chain.
#[derive(Debug, Clone)]
pub struct MixtureChains {
    pub components: usize,
    pub covariates: usize,
    pub chains: Vec<ChainTrace>,
}

impl MixtureChains {
    /// `(iterations, columns, chains)`.
    #[must_use]
    pub fn dims(&self) -> (usize, usize, usize) {
        let iterations = self.chains.first().map_or(0, |chain| chain.draws.nrows());
        (
            iterations,
            self.components * (self.covariates + 2),
            self.chains.len(),
        )
    }

    /// Value at `(iteration, column, chain)`.
    #[must_use]
    pub fn value(&self, iteration: usize, column: usize, chain: usize) -> f64 {
        self.chains[chain].draws[(iteration, column)]
    }

    /// One column of one chain as a vector over iterations.
    #[must_use]
    pub fn column(&self, chain: usize, column: usize) -> Vec<f64> {
        let draws = &self.chains[chain].draws;
        (0..draws.nrows()).map(|row| draws[(row, column)]).collect()
    }

    /// Mixture weights `eta` recorded at `iteration` of `chain`.
    #[must_use]
    pub fn component_weights(&self, chain: usize, iteration: usize) -> Vec<f64> {
        let stride = self.covariates + 2;
        (0..self.components)
            .map(|g| self.value(iteration, g * stride + stride - 1, chain))
            .collect()
    }
}
