//! Reusable inference and MCMC utility types.
//!
//! Acceptance bookkeeping, the Robbins–Monro proposal-scale controller used by
//! the adaptive Metropolis blocks, and abort signals polled between iterations.

use std::sync::atomic::{AtomicBool, Ordering};

use thiserror::Error;

use crate::utils::usize_to_f64;

/// Errors for generic adaptive-MCMC tuning.
#[derive(Debug, Error, Clone, Copy, PartialEq)]
pub enum InferenceError {
    #[error("target acceptance rate ({0}) must lie strictly between 0 and 1")]
    InvalidTargetAcceptance(f64),
    #[error("adaptation decay exponent ({0}) must lie in (0.5, 1]")]
    InvalidDecayExponent(f64),
    #[error("initial proposal scale ({0}) must be positive and finite")]
    InvalidInitialScale(f64),
}

/// Proposal counters for a single Metropolis-Hastings block.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProposalStats {
    pub proposed: usize,
    pub accepted: usize,
}

impl ProposalStats {
    /// Record one proposal and whether it was accepted.
    pub const fn record(&mut self, accepted: bool) {
        self.proposed += 1;
        if accepted {
            self.accepted += 1;
        }
    }

    /// Acceptance rate in `[0, 1]`, or `0` if no proposals were made.
    #[must_use]
    pub fn acceptance_rate(self) -> f64 {
        if self.proposed == 0 {
            0.0
        } else {
            usize_to_f64(self.accepted) / usize_to_f64(self.proposed)
        }
    }
}

/// Robbins–Monro controller driving a random-walk scale toward a target
/// acceptance rate.
///
/// After each decision at iteration `t` the step size is
/// `gamma_t = (t + 1)^(-decay_exponent)` and the scale is updated on the log
/// scale: `scale <- exp(ln(scale) + gamma_t * (accepted - target))`.
#[derive(Debug, Clone, Copy)]
pub struct RobbinsMonro {
    pub target_acceptance: f64,
    pub decay_exponent: f64,
}

impl Default for RobbinsMonro {
    fn default() -> Self {
        Self {
            target_acceptance: 0.44,
            decay_exponent: 0.55,
        }
    }
}

impl RobbinsMonro {
    /// # Errors
    ///
    /// Returns `InferenceError` if the target or decay exponent is out of range.
    pub fn validate(self) -> Result<(), InferenceError> {
        if !(self.target_acceptance > 0.0 && self.target_acceptance < 1.0) {
            return Err(InferenceError::InvalidTargetAcceptance(
                self.target_acceptance,
            ));
        }
        if !(self.decay_exponent > 0.5 && self.decay_exponent <= 1.0) {
            return Err(InferenceError::InvalidDecayExponent(self.decay_exponent));
        }
        Ok(())
    }

    /// Adaptation rate at chain iteration `iteration`.
    #[must_use]
    pub fn rate(self, iteration: usize) -> f64 {
        (usize_to_f64(iteration) + 1.0).powf(-self.decay_exponent)
    }

    /// Returns `(new_scale, rate)` after one accept/reject decision.
    #[must_use]
    pub fn adapt(self, scale: f64, accepted: bool, iteration: usize) -> (f64, f64) {
        let rate = self.rate(iteration);
        let outcome = if accepted { 1.0 } else { 0.0 };
        let updated = rate.mul_add(outcome - self.target_acceptance, scale.ln()).exp();
        (updated, rate)
    }
}

/// External cancellation check polled between sampler iterations.
pub trait AbortSignal: Sync {
    /// Whether the run should stop at the next iteration boundary.
    fn is_aborted(&self) -> bool;
    /// Request cancellation.
    fn abort(&self);
    /// Clear a previous cancellation request.
    fn reset(&self);
}

/// A signal that never fires.
#[derive(Debug, Default, Clone, Copy)]
pub struct NeverAbort;

impl AbortSignal for NeverAbort {
    fn is_aborted(&self) -> bool {
        false
    }

    fn abort(&self) {}

    fn reset(&self) {}
}

/// A signal that is triggered by setting an atomic boolean.
#[derive(Debug, Default)]
pub struct AtomicAbortSignal {
    abort: AtomicBool,
}

impl AtomicAbortSignal {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            abort: AtomicBool::new(false),
        }
    }
}

impl AbortSignal for AtomicAbortSignal {
    fn is_aborted(&self) -> bool {
        self.abort.load(Ordering::SeqCst)
    }

    fn abort(&self) {
        self.abort.store(true, Ordering::SeqCst);
    }

    fn reset(&self) {
        self.abort.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn proposal_stats_tracks_acceptance() {
        let mut stats = ProposalStats::default();
        stats.record(true);
        stats.record(false);
        assert!((stats.acceptance_rate() - 0.5).abs() < 1.0e-12);
    }

    #[test]
    fn robbins_monro_first_step_uses_unit_rate() {
        let controller = RobbinsMonro::default();
        let (scale, rate) = controller.adapt(1.0, true, 0);
        assert_relative_eq!(rate, 1.0);
        assert_relative_eq!(scale, 0.56f64.exp(), epsilon = 1.0e-12);
        let (shrunk, _) = controller.adapt(1.0, false, 0);
        assert_relative_eq!(shrunk, (-0.44f64).exp(), epsilon = 1.0e-12);
    }

    #[test]
    fn robbins_monro_rate_decays() {
        let controller = RobbinsMonro::default();
        assert!(controller.rate(100) < controller.rate(10));
        assert_relative_eq!(controller.rate(3), 4.0f64.powf(-0.55), epsilon = 1.0e-12);
    }

    #[test]
    fn robbins_monro_validation_rejects_bad_target() {
        let controller = RobbinsMonro {
            target_acceptance: 1.5,
            ..RobbinsMonro::default()
        };
        assert_eq!(
            controller.validate(),
            Err(InferenceError::InvalidTargetAcceptance(1.5))
        );
    }

    #[test]
    fn atomic_abort_signal_round_trips() {
        let signal = AtomicAbortSignal::new();
        assert!(!signal.is_aborted());
        signal.abort();
        assert!(signal.is_aborted());
        signal.reset();
        assert!(!signal.is_aborted());
    }
}
