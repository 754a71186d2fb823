//! Input preprocessing helpers for the lognormal mixture.

use faer::Mat;

use crate::input::SurvivalInput;

use super::types::MixtureError;

/// Prepared input view reused by the EM engine and the sampler.
#[derive(Debug, Clone)]
pub(crate) struct PreparedSurvival<'a> {
    pub input: &'a SurvivalInput,
    /// Working outcome `y = ln t`.
    pub log_times: Vec<f64>,
    pub censored_rows: Vec<usize>,
}

impl PreparedSurvival<'_> {
    #[must_use]
    pub(crate) const fn design_matrix(&self) -> &Mat<f64> {
        &self.input.design_matrix
    }

    #[must_use]
    pub(crate) fn event_indicator(&self) -> &[u8] {
        &self.input.event_indicator
    }

    #[must_use]
    pub(crate) fn n_observations(&self) -> usize {
        self.log_times.len()
    }

    #[must_use]
    pub(crate) fn n_covariates(&self) -> usize {
        self.input.design_matrix.ncols()
    }
}

/// # Errors
///
/// Returns `MixtureError` if the survival input is invalid.
pub(crate) fn prepare_input(input: &SurvivalInput) -> Result<PreparedSurvival<'_>, MixtureError> {
    input.validate()?;

    let log_times = (0..input.times.nrows())
        .map(|row| input.times[(row, 0)].ln())
        .collect();
    let censored_rows = input
        .event_indicator
        .iter()
        .enumerate()
        .filter_map(|(row, &indicator)| (indicator == 0).then_some(row))
        .collect();

    Ok(PreparedSurvival {
        input,
        log_times,
        censored_rows,
    })
}

/// Rows currently assigned to component `g`.
#[must_use]
pub(crate) fn component_rows(groups: &[usize], g: usize) -> Vec<usize> {
    groups
        .iter()
        .enumerate()
        .filter_map(|(row, &label)| (label == g).then_some(row))
        .collect()
}
