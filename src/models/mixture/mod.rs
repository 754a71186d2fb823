//! Lognormal mixture regression for right-censored survival times.
//!
//! `log(t_i)` follows a `G`-component normal mixture whose component means are
//! linear in the covariates. Fitting is by EM or by MCMC; chains are optionally
//! warm-started by EM and run in parallel with independent seeds.

pub mod adaptive;
pub mod augment;
pub mod conjugate;
pub mod em;
pub mod groups;
pub(crate) mod input;
pub mod likelihood;
pub mod priors;
pub mod random;
pub mod sampler;
pub mod types;

pub use adaptive::{AdaptiveProposalState, update_adaptive};
pub use augment::{TailDraw, augment_censored_outcomes, expected_outcomes, sample_above};
pub use conjugate::update_conjugate;
pub use em::{
    compute_responsibilities, em_log_likelihood, fit_em_input, fit_em_input_with_priors,
    mixture_log_likelihood,
};
pub use groups::{
    RepairOutcome, component_means, group_counts, hard_assignments, membership_probabilities,
    repair_empty_components, sample_groups,
};
pub use priors::MixturePriorConfig;
pub use sampler::{
    em_trace_column_labels, fit_mixture_chain_input, fit_mixture_chain_input_with_abort,
    fit_mixture_input, fit_mixture_input_with_abort, trace_column_labels,
};
pub use types::{
    AdaptiveTuning, ChainDiagnostics, ChainTrace, EmEstimate, EmOptions, EmOutput, EmOutputKind,
    EmTrace, MixtureAcceptanceRates, MixtureChains, MixtureError, MixtureFitOptions,
    MixtureParameters, MixtureSamplerConfig, MultiChainOptions,
};
