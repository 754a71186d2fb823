//! Censored-outcome augmentation for the Gibbs sampler and the EM engine.

use faer::Mat;
use rand::rngs::StdRng;
use tracing::debug;

use super::likelihood::truncated_normal_mean;
use super::priors::{AUGMENTATION_ATTEMPT_LIMIT, AUGMENTATION_FALLBACK_FACTOR};
use super::random::sample_normal;

/// Result of one truncated draw above a censoring value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TailDraw {
    /// A draw strictly above the censoring value.
    Accepted { value: f64, attempts: usize },
    /// Rejection sampling hit its cap; `value` is `1.01 ×` the censoring value.
    ///
    /// This is an approximation and is not guaranteed to exceed the censoring
    /// value (it lies below it for negative log-times).
    Fallback { value: f64 },
}

impl TailDraw {
    #[must_use]
    pub const fn value(self) -> f64 {
        match self {
            Self::Accepted { value, .. } | Self::Fallback { value } => value,
        }
    }

    #[must_use]
    pub const fn is_fallback(self) -> bool {
        matches!(self, Self::Fallback { .. })
    }
}

/// Rejection-sample `Normal(mean, sd)` conditioned on exceeding `threshold`.
pub fn sample_above(rng: &mut StdRng, threshold: f64, mean: f64, sd: f64) -> TailDraw {
    for attempt in 1..=AUGMENTATION_ATTEMPT_LIMIT {
        let draw = sample_normal(rng, mean, sd);
        if draw > threshold {
            return TailDraw::Accepted {
                value: draw,
                attempts: attempt,
            };
        }
    }
    TailDraw::Fallback {
        value: AUGMENTATION_FALLBACK_FACTOR * threshold,
    }
}

/// Gibbs augmentation: observed records keep `y`, censored records are drawn
/// above `y` under their current component. Writes into `out` and returns the
/// number of fallback draws.
pub fn augment_censored_outcomes(
    rng: &mut StdRng,
    outcome: &[f64],
    event_indicator: &[u8],
    means: &Mat<f64>,
    groups: &[usize],
    sd: &[f64],
    out: &mut [f64],
) -> usize {
    let mut fallbacks = 0;
    for (row, ((&value, &indicator), slot)) in outcome
        .iter()
        .zip(event_indicator)
        .zip(out.iter_mut())
        .enumerate()
    {
        if indicator == 1 {
            *slot = value;
            continue;
        }
        let g = groups[row];
        let draw = sample_above(rng, value, means[(row, g)], sd[g]);
        if draw.is_fallback() {
            fallbacks += 1;
            debug!(row, censoring_value = value, "censored draw fell back");
        }
        *slot = draw.value();
    }
    fallbacks
}

/// EM augmentation: censored records are replaced by the
/// responsibility-weighted truncated-normal expectation over all components.
#[must_use]
pub fn expected_outcomes(
    outcome: &[f64],
    event_indicator: &[u8],
    means: &Mat<f64>,
    sd: &[f64],
    responsibilities: &Mat<f64>,
) -> Vec<f64> {
    outcome
        .iter()
        .zip(event_indicator)
        .enumerate()
        .map(|(row, (&value, &indicator))| {
            if indicator == 1 {
                return value;
            }
            (0..sd.len())
                .map(|g| {
                    responsibilities[(row, g)]
                        * truncated_normal_mean(value, means[(row, g)], sd[g])
                })
                .sum()
        })
        .collect()
}
