//! # Model inputs
//!
//! Defines a light-weight container for right-censored survival data:
//! a design matrix, positive outcome times, and event indicators
//! (`1` = event observed, `0` = right-censored).
//!
//! # Examples
//!
//! ```
//! use faer::Mat;
//! use lognormal_mixture::SurvivalInput;
//!
//! fn idx_to_f64(idx: usize) -> f64 {
//!     f64::from(u32::try_from(idx).unwrap_or(u32::MAX))
//! }
//!
//! let design_matrix = Mat::from_fn(3, 2, |i, j| if j == 0 { 1.0 } else { idx_to_f64(i) });
//! let times = Mat::from_fn(3, 1, |i, _| 1.0 + idx_to_f64(i));
//! let input = SurvivalInput::new(design_matrix, times, vec![1, 0, 1]);
//!
//! assert!(input.validate().is_ok());
//! assert_eq!(input.censored_count(), 1);
//! ```
//!
//! ```
//! use faer::Mat;
//! use lognormal_mixture::SurvivalInput;
//!
//! let design_matrix = Mat::from_fn(2, 1, |_, _| 1.0);
//! let times = Mat::from_fn(2, 1, |i, _| if i == 0 { 0.0 } else { 1.0 });
//! let input = SurvivalInput::new(design_matrix, times, vec![1, 1]);
//!
//! assert!(input.validate().is_err());
//! ```

use faer::Mat;
use thiserror::Error;

/// Errors returned when validating survival inputs.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum InputError {
    #[error("input must contain at least one observation")]
    EmptyInput,
    #[error("design matrix must have at least one column")]
    EmptyDesign,
    #[error("outcome times must be a single column matrix")]
    InvalidOutcomeShape,
    #[error("design matrix rows ({rows}) must match outcome rows ({len})")]
    DimensionMismatch { rows: usize, len: usize },
    #[error("event indicator length ({indicators}) must match outcome rows ({rows})")]
    IndicatorLengthMismatch { indicators: usize, rows: usize },
    #[error("design matrix contains non-finite values")]
    NonFiniteDesign,
    #[error("outcome times contain non-finite values")]
    NonFiniteOutcome,
    #[error("outcome time at row {row} is not strictly positive")]
    NonPositiveTime { row: usize },
    #[error("event indicator at row {row} is {value}; expected 0 or 1")]
    InvalidIndicator { row: usize, value: u8 },
}

#[derive(Debug, Clone)]
pub struct SurvivalInput {
    pub design_matrix: Mat<f64>,
    pub times: Mat<f64>,
    pub event_indicator: Vec<u8>,
}

impl SurvivalInput {
    #[must_use]
    pub const fn new(design_matrix: Mat<f64>, times: Mat<f64>, event_indicator: Vec<u8>) -> Self {
        Self {
            design_matrix,
            times,
            event_indicator,
        }
    }

    #[must_use]
    pub const fn design_matrix(&self) -> &Mat<f64> {
        &self.design_matrix
    }

    #[must_use]
    pub const fn times(&self) -> &Mat<f64> {
        &self.times
    }

    #[must_use]
    pub fn event_indicator(&self) -> &[u8] {
        &self.event_indicator
    }

    #[must_use]
    pub fn n_observations(&self) -> usize {
        self.times.nrows()
    }

    #[must_use]
    pub fn n_covariates(&self) -> usize {
        self.design_matrix.ncols()
    }

    /// Number of right-censored records (`event_indicator == 0`).
    #[must_use]
    pub fn censored_count(&self) -> usize {
        self.event_indicator.iter().filter(|&&d| d == 0).count()
    }

    /// Validate shapes and values.
    ///
    /// # Errors
    ///
    /// Returns `InputError` if inputs are malformed.
    pub fn validate(&self) -> Result<(), InputError> {
        if self.design_matrix.ncols() == 0 {
            return Err(InputError::EmptyDesign);
        }
        if self.times.ncols() != 1 {
            return Err(InputError::InvalidOutcomeShape);
        }
        if self.times.nrows() == 0 {
            return Err(InputError::EmptyInput);
        }
        if self.design_matrix.nrows() != self.times.nrows() {
            return Err(InputError::DimensionMismatch {
                rows: self.design_matrix.nrows(),
                len: self.times.nrows(),
            });
        }
        if self.event_indicator.len() != self.times.nrows() {
            return Err(InputError::IndicatorLengthMismatch {
                indicators: self.event_indicator.len(),
                rows: self.times.nrows(),
            });
        }
        if !matrix_is_finite(&self.design_matrix) {
            return Err(InputError::NonFiniteDesign);
        }
        if !matrix_is_finite(&self.times) {
            return Err(InputError::NonFiniteOutcome);
        }
        if let Some(row) = (0..self.times.nrows()).find(|&i| self.times[(i, 0)] <= 0.0) {
            return Err(InputError::NonPositiveTime { row });
        }
        if let Some((row, &value)) = self
            .event_indicator
            .iter()
            .enumerate()
            .find(|(_, value)| **value > 1)
        {
            return Err(InputError::InvalidIndicator { row, value });
        }
        Ok(())
    }
}

fn matrix_is_finite(matrix: &Mat<f64>) -> bool {
    for i in 0..matrix.nrows() {
        for j in 0..matrix.ncols() {
            if !matrix[(i, j)].is_finite() {
                return false;
            }
        }
    }
    true
}
