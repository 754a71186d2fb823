#![forbid(unsafe_code)]

//! # `lognormal_mixture`
//!
//! Bayesian and EM fitting of lognormal mixture regressions for right-censored
//! survival times.
//!
//! The log survival time of each record follows a finite mixture of normal
//! regressions. Censored records enter either through data augmentation with
//! conjugate Gibbs updates, or directly through the survival function with
//! adaptive random-walk Metropolis updates. Chains are seeded per chain and run
//! in parallel; every result is reproducible from its seed.

pub mod inference;
pub mod input;
pub mod models;
pub mod utils;

pub use inference::{
    AbortSignal, AtomicAbortSignal, InferenceError, NeverAbort, ProposalStats, RobbinsMonro,
};
pub use input::{InputError, SurvivalInput};
pub mod matrix_ops {
    pub use crate::models::matrix_ops::*;
}

pub use models::mixture::{
    AdaptiveTuning, ChainDiagnostics, ChainTrace, EmEstimate, EmOptions, EmOutput, EmOutputKind,
    EmTrace, MixtureAcceptanceRates, MixtureChains, MixtureError, MixtureFitOptions,
    MixtureParameters, MixturePriorConfig, MixtureSamplerConfig, MultiChainOptions,
    em_trace_column_labels, fit_em_input, fit_em_input_with_priors, fit_mixture_chain_input,
    fit_mixture_chain_input_with_abort, fit_mixture_input, fit_mixture_input_with_abort,
    mixture_log_likelihood, trace_column_labels,
};
