//! # Models
//!
//! Lognormal mixture regression for right-censored survival outcomes, fitted
//! by EM or by Gibbs / adaptive Metropolis sampling.

pub mod matrix_ops;
pub mod mixture;
