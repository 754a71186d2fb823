use faer::Mat;

#[must_use]
pub fn select_rows(matrix: &Mat<f64>, indices: &[usize]) -> Mat<f64> {
    Mat::from_fn(indices.len(), matrix.ncols(), |i, j| matrix[(indices[i], j)])
}

/// `Xᵗ · diag(w) · X` without materializing the `n × n` diagonal.
#[must_use]
pub fn weighted_xtx(x: &Mat<f64>, weights: &[f64]) -> Mat<f64> {
    let p = x.ncols();
    let mut out = Mat::<f64>::zeros(p, p);
    for (row, &weight) in weights.iter().enumerate().take(x.nrows()) {
        if weight == 0.0 {
            continue;
        }
        for j in 0..p {
            let xj = weight * x[(row, j)];
            for k in j..p {
                out[(j, k)] += xj * x[(row, k)];
            }
        }
    }
    for j in 0..p {
        for k in 0..j {
            out[(j, k)] = out[(k, j)];
        }
    }
    out
}

/// `Xᵗ · diag(w) · z`.
#[must_use]
pub fn weighted_xtz(x: &Mat<f64>, weights: &[f64], response: &[f64]) -> Mat<f64> {
    let p = x.ncols();
    let mut out = Mat::<f64>::zeros(p, 1);
    for (row, (&weight, &value)) in weights.iter().zip(response).enumerate().take(x.nrows()) {
        let scaled = weight * value;
        for j in 0..p {
            out[(j, 0)] += x[(row, j)] * scaled;
        }
    }
    out
}

/// Inner product of row `row` of `matrix` with row `coef_row` of `coefficients`.
#[must_use]
pub fn dot_rows(matrix: &Mat<f64>, row: usize, coefficients: &Mat<f64>, coef_row: usize) -> f64 {
    (0..matrix.ncols())
        .map(|col| matrix[(row, col)] * coefficients[(coef_row, col)])
        .sum()
}
