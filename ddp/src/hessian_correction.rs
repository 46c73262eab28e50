//! Corrections that turn an indefinite Hessian into a positive definite one.

use nalgebra::SymmetricEigen;
use serde::{Deserialize, Serialize};

use crate::linear_algebra::symmetrize;
use crate::{Matrix, Scalar};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// Adds `min_eigenvalue` to the diagonal, regardless of the spectrum.
    DiagonalShift,
    /// Modified Cholesky factorization clamping the pivots.
    CholeskyModification,
    /// Clamps the eigenvalues from below.
    EigenvalueModification,
    /// Uniform diagonal shift bounded by the Gershgorin discs.
    GershgorinModification,
}

/// Applies `strategy` to `matrix` in place so its spectrum lies above
/// `min_eigenvalue` (approximately for the Cholesky and Gershgorin variants).
pub fn shift_hessian(strategy: Strategy, matrix: &mut Matrix, min_eigenvalue: Scalar) {
    if matrix.is_empty() {
        return;
    }
    match strategy {
        Strategy::DiagonalShift => {
            for i in 0..matrix.nrows() {
                matrix[(i, i)] += min_eigenvalue;
            }
        }
        Strategy::CholeskyModification => make_psd_cholesky(matrix, min_eigenvalue),
        Strategy::EigenvalueModification => make_psd_eigenvalue(matrix, min_eigenvalue),
        Strategy::GershgorinModification => make_psd_gershgorin(matrix, min_eigenvalue),
    }
}

/// Returns a corrected copy of `matrix`.
pub fn shifted(strategy: Strategy, matrix: &Matrix, min_eigenvalue: Scalar) -> Matrix {
    let mut corrected = matrix.clone();
    shift_hessian(strategy, &mut corrected, min_eigenvalue);
    corrected
}

fn make_psd_eigenvalue(matrix: &mut Matrix, min_eigenvalue: Scalar) {
    let eigen = SymmetricEigen::new(symmetrize(matrix));
    let clamped = eigen.eigenvalues.map(|l| l.max(min_eigenvalue));
    let v = &eigen.eigenvectors;
    *matrix = v * Matrix::from_diagonal(&clamped) * v.transpose();
}

fn make_psd_cholesky(matrix: &mut Matrix, min_eigenvalue: Scalar) {
    let a = symmetrize(matrix);
    let n = a.nrows();
    let mut l = Matrix::zeros(n, n);
    let min_pivot = min_eigenvalue.max(Scalar::EPSILON);

    for j in 0..n {
        let mut pivot = a[(j, j)];
        for k in 0..j {
            pivot -= l[(j, k)] * l[(j, k)];
        }
        // clamp instead of failing on a non-positive pivot
        let pivot = pivot.max(min_pivot);
        l[(j, j)] = pivot.sqrt();

        for i in (j + 1)..n {
            let mut value = a[(i, j)];
            for k in 0..j {
                value -= l[(i, k)] * l[(j, k)];
            }
            l[(i, j)] = value / l[(j, j)];
        }
    }
    *matrix = &l * l.transpose();
}

fn make_psd_gershgorin(matrix: &mut Matrix, min_eigenvalue: Scalar) {
    let a = symmetrize(matrix);
    let n = a.nrows();
    let mut shift: Scalar = 0.0;
    for i in 0..n {
        let radius: Scalar = (0..n).filter(|&j| j != i).map(|j| a[(i, j)].abs()).sum();
        shift = shift.max(min_eigenvalue - (a[(i, i)] - radius));
    }
    *matrix = a;
    if shift > 0.0 {
        for i in 0..n {
            matrix[(i, i)] += shift;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model_data::min_eigenvalue;
    use approx::assert_abs_diff_eq;

    fn indefinite() -> Matrix {
        Matrix::from_row_slice(2, 2, &[1.0, 2.0, 2.0, -1.0])
    }

    #[test]
    fn test_eigenvalue_modification_clamps() {
        let corrected = shifted(Strategy::EigenvalueModification, &indefinite(), 0.1);
        assert_abs_diff_eq!(min_eigenvalue(&corrected), 0.1, epsilon = 1e-12);
    }

    #[test]
    fn test_eigenvalue_modification_keeps_pd_matrix() {
        let pd = Matrix::from_row_slice(2, 2, &[3.0, 1.0, 1.0, 2.0]);
        let corrected = shifted(Strategy::EigenvalueModification, &pd, 1e-3);
        assert_abs_diff_eq!(corrected, pd, epsilon = 1e-12);
    }

    #[test]
    fn test_cholesky_modification_is_pd() {
        let corrected = shifted(Strategy::CholeskyModification, &indefinite(), 1e-3);
        assert!(min_eigenvalue(&corrected) > 0.0);
        assert!(corrected.clone().cholesky().is_some());

        let pd = Matrix::from_row_slice(2, 2, &[3.0, 1.0, 1.0, 2.0]);
        assert_abs_diff_eq!(shifted(Strategy::CholeskyModification, &pd, 1e-3), pd, epsilon = 1e-12);
    }

    #[test]
    fn test_gershgorin_modification_bounds_spectrum() {
        let corrected = shifted(Strategy::GershgorinModification, &indefinite(), 0.5);
        assert!(min_eigenvalue(&corrected) >= 0.5 - 1e-12);
    }

    #[test]
    fn test_diagonal_shift() {
        let corrected = shifted(Strategy::DiagonalShift, &Matrix::identity(2, 2), 0.25);
        assert_abs_diff_eq!(corrected, Matrix::identity(2, 2) * 1.25, epsilon = 1e-12);
    }
}
