//! Latent component assignment, group counts, and empty-component repair.

use faer::Mat;
use rand::RngExt;
use rand::rngs::StdRng;
use tracing::{debug, warn};

use super::likelihood::{normal_pdf, survival_probability};
use super::priors::{MIN_COMPONENT_MEMBERS, REPAIR_ATTEMPT_LIMIT};
use super::random::{normalize_in_place, sample_categorical};
use super::types::MixtureParameters;
use crate::models::matrix_ops::dot_rows;

/// `N × G` matrix of linear predictors `x_i · beta_g`.
#[must_use]
pub fn component_means(design_matrix: &Mat<f64>, beta: &Mat<f64>) -> Mat<f64> {
    Mat::from_fn(design_matrix.nrows(), beta.nrows(), |row, g| {
        dot_rows(design_matrix, row, beta, g)
    })
}

/// Unnormalised membership weights of record `row` into `out`.
///
/// Censored records use the survival function unless `density_only` is set,
/// which is the case whenever censored outcomes have been augmented.
#[allow(clippy::too_many_arguments)]
pub fn membership_weights_into(
    out: &mut [f64],
    value: f64,
    means: &Mat<f64>,
    row: usize,
    params: &MixtureParameters,
    sd: &[f64],
    observed: bool,
    density_only: bool,
) {
    for (g, weight) in out.iter_mut().enumerate() {
        let mean = means[(row, g)];
        let kernel = if observed || density_only {
            normal_pdf(value, mean, sd[g])
        } else {
            survival_probability(value, mean, sd[g])
        };
        *weight = params.eta[g] * kernel;
    }
}

/// Normalised membership probabilities of record `row`; a zero total gives
/// the uniform vector.
#[must_use]
pub fn membership_probabilities(
    value: f64,
    means: &Mat<f64>,
    row: usize,
    params: &MixtureParameters,
    observed: bool,
    density_only: bool,
) -> Vec<f64> {
    let sd = params.sd();
    let mut weights = vec![0.0; params.components()];
    membership_weights_into(
        &mut weights,
        value,
        means,
        row,
        params,
        &sd,
        observed,
        density_only,
    );
    normalize_in_place(&mut weights);
    weights
}

/// Draw a component label for every record.
///
/// `outcome` holds the working outcome (augmented when `density_only` is set).
pub fn sample_groups(
    rng: &mut StdRng,
    outcome: &[f64],
    event_indicator: &[u8],
    means: &Mat<f64>,
    params: &MixtureParameters,
    density_only: bool,
) -> Vec<usize> {
    let sd = params.sd();
    let mut weights = vec![0.0; params.components()];
    outcome
        .iter()
        .zip(event_indicator)
        .enumerate()
        .map(|(row, (&value, &indicator))| {
            membership_weights_into(
                &mut weights,
                value,
                means,
                row,
                params,
                &sd,
                indicator == 1,
                density_only,
            );
            sample_categorical(rng, &weights)
        })
        .collect()
}

/// Member counts per component; sums to `groups.len()`.
#[must_use]
pub fn group_counts(groups: &[usize], components: usize) -> Vec<usize> {
    let mut counts = vec![0; components];
    for &g in groups {
        counts[g] += 1;
    }
    counts
}

/// Outcome of an empty-component repair pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RepairOutcome {
    /// Components that were empty on entry.
    pub repaired: usize,
    /// Components that did not reach the member target within the attempt budget.
    pub exhausted: usize,
}

/// Refill every empty component with records drawn uniformly from components
/// holding more than [`MIN_COMPONENT_MEMBERS`] members.
///
/// Each empty component stops once it holds [`MIN_COMPONENT_MEMBERS`] members
/// or after [`REPAIR_ATTEMPT_LIMIT`] draws. `counts` is kept in step with
/// `groups` after every reassignment.
pub fn repair_empty_components(
    rng: &mut StdRng,
    groups: &mut [usize],
    counts: &mut [usize],
) -> RepairOutcome {
    let mut outcome = RepairOutcome::default();
    if groups.is_empty() {
        return outcome;
    }
    for g in 0..counts.len() {
        if counts[g] != 0 {
            continue;
        }
        outcome.repaired += 1;
        let mut attempts = 0;
        while counts[g] < MIN_COMPONENT_MEMBERS && attempts < REPAIR_ATTEMPT_LIMIT {
            attempts += 1;
            let row = rng.random_range(0..groups.len());
            let donor = groups[row];
            if counts[donor] > MIN_COMPONENT_MEMBERS {
                counts[donor] -= 1;
                groups[row] = g;
                counts[g] += 1;
            }
        }
        if counts[g] < MIN_COMPONENT_MEMBERS {
            outcome.exhausted += 1;
            warn!(
                component = g,
                members = counts[g],
                "empty component repair exhausted its attempt budget"
            );
        } else {
            debug!(component = g, attempts, "repaired empty component");
        }
    }
    outcome
}

/// Row-wise argmax of a responsibility matrix; ties resolve to the lowest index.
#[must_use]
pub fn hard_assignments(responsibilities: &Mat<f64>) -> Vec<usize> {
    (0..responsibilities.nrows())
        .map(|row| {
            let mut best = 0;
            for g in 1..responsibilities.ncols() {
                if responsibilities[(row, g)] > responsibilities[(row, best)] {
                    best = g;
                }
            }
            best
        })
        .collect()
}

/// Independent labels drawn from the mixing weights.
pub fn sample_initial_groups(rng: &mut StdRng, eta: &[f64], observations: usize) -> Vec<usize> {
    (0..observations)
        .map(|_| sample_categorical(rng, eta))
        .collect()
}
