/////////////////////////////////////////////////////////////////////////////////////////////\
//
// Shared linear algebra utilities for the mixture engines.
//
/////////////////////////////////////////////////////////////////////////////////////////////

//! # Utilities
//!
//! Small dense linear-algebra helpers on faer matrices: symmetrization,
//! determinant-based conditioning guards, solves, inverses, a lower Cholesky
//! factor, and constant constructors.

use faer::Mat;
use faer::prelude::Solve;

use crate::models::mixture::MixtureError;

/// Determinant below which a symmetric system matrix is treated as ill-conditioned.
pub const ILL_CONDITIONED_DETERMINANT: f64 = 1.0e-10;
/// Diagonal jitter added to ill-conditioned system matrices.
pub const DIAGONAL_JITTER: f64 = 1.0e-8;

/// Symmetric part `(A + Aᵗ) / 2` of a square matrix.
#[must_use]
pub fn symmetrize(matrix: &Mat<f64>) -> Mat<f64> {
    Mat::from_fn(matrix.nrows(), matrix.ncols(), |row, col| {
        0.5 * (matrix[(row, col)] + matrix[(col, row)])
    })
}

/// Symmetrize `matrix` and add [`DIAGONAL_JITTER`] to its diagonal when the
/// determinant of the symmetric part falls below [`ILL_CONDITIONED_DETERMINANT`].
///
/// Returns the symmetric (possibly regularized) matrix and whether jitter was added.
#[must_use]
pub fn regularize_symmetric(matrix: &Mat<f64>) -> (Mat<f64>, bool) {
    let mut symmetric = symmetrize(matrix);
    let jittered = symmetric.determinant() < ILL_CONDITIONED_DETERMINANT;
    if jittered {
        for idx in 0..symmetric.nrows() {
            symmetric[(idx, idx)] += DIAGONAL_JITTER;
        }
    }
    (symmetric, jittered)
}

/// # Errors
///
/// Returns `MixtureError::SolveFailed` if the solve produces non-finite values.
pub fn solve_linear_system(a: &Mat<f64>, b: &Mat<f64>) -> Result<Mat<f64>, MixtureError> {
    let rhs = b.clone();
    let lu = a.full_piv_lu();
    let solution = lu.solve(rhs);
    if !matrix_is_finite(&solution) {
        return Err(MixtureError::SolveFailed);
    }
    Ok(solution)
}

/// Inverse of a square matrix, column by column through [`solve_linear_system`].
///
/// # Errors
///
/// Returns `MixtureError::SolveFailed` if any column solve is non-finite.
pub fn matrix_inverse(matrix: &Mat<f64>) -> Result<Mat<f64>, MixtureError> {
    let dim = matrix.ncols();
    let mut inverse = Mat::<f64>::zeros(dim, dim);

    for col in 0..dim {
        let basis = Mat::from_fn(dim, 1, |row, _| if row == col { 1.0 } else { 0.0 });
        let solution = solve_linear_system(matrix, &basis)?;
        for row in 0..dim {
            inverse[(row, col)] = solution[(row, 0)];
        }
    }

    Ok(inverse)
}

/// Lower Cholesky factor `L` with `L Lᵗ = matrix`, or `None` when the matrix is
/// not numerically positive definite.
#[must_use]
pub fn cholesky_lower(matrix: &Mat<f64>) -> Option<Mat<f64>> {
    let dim = matrix.ncols();
    if matrix.nrows() != dim {
        return None;
    }
    let mut lower = Mat::<f64>::zeros(dim, dim);
    for row in 0..dim {
        for col in 0..=row {
            let mut sum = matrix[(row, col)];
            for k in 0..col {
                sum -= lower[(row, k)] * lower[(col, k)];
            }
            if row == col {
                if sum.is_nan() || sum <= 0.0 {
                    return None;
                }
                lower[(row, col)] = sum.sqrt();
            } else {
                let denom = lower[(col, col)];
                if denom <= 0.0 {
                    return None;
                }
                lower[(row, col)] = sum / denom;
            }
        }
    }
    Some(lower)
}

/// Vector holding `value` repeated `len` times.
#[must_use]
pub fn constant_vector(value: f64, len: usize) -> Vec<f64> {
    vec![value; len]
}

/// Diagonal matrix with `value` on every diagonal entry.
#[must_use]
pub fn scaled_identity(dim: usize, value: f64) -> Mat<f64> {
    Mat::from_fn(dim, dim, |row, col| if row == col { value } else { 0.0 })
}

#[must_use]
pub fn matrix_is_finite(matrix: &Mat<f64>) -> bool {
    for i in 0..matrix.nrows() {
        for j in 0..matrix.ncols() {
            if !matrix[(i, j)].is_finite() {
                return false;
            }
        }
    }
    true
}

pub(crate) fn usize_to_f64(value: usize) -> f64 {
    f64::from(u32::try_from(value).unwrap_or(u32::MAX))
}
