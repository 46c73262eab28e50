//! Factorizations used by the constraint projection.

use nalgebra::SymmetricEigen;

use crate::{Matrix, Scalar};

const RANK_TOLERANCE: Scalar = 1e-9;

/// Returns `U` with `U Uᵀ = H⁻¹` for a positive definite `H`.
///
/// `H = L Lᵀ` gives `U = L⁻ᵀ`, so `Uᵀ H U = I`. `None` when the Cholesky
/// factorization fails.
pub fn inverse_factor(h: &Matrix) -> Option<Matrix> {
    let n = h.nrows();
    if n == 0 {
        return Some(Matrix::zeros(0, 0));
    }
    let chol = h.clone().cholesky()?;
    let l_inv = chol.l().solve_lower_triangular(&Matrix::identity(n, n))?;
    Some(l_inv.transpose())
}

/// Decomposition of the input space for active constraints `D u + ... = 0`.
#[derive(Debug, Clone, PartialEq)]
pub struct ConstraintProjection {
    /// Right pseudo-inverse of `D` in the metric of the Hessian: `U (D U)⁺`.
    pub range: Matrix,
    /// Basis of the null space of `D`, normalized so `Quᵀ H Qu = I`.
    pub null: Matrix,
    /// Numerical rank of `D`.
    pub rank: usize,
}

/// Splits the input space along the rows of `d`.
///
/// `u_factor` is the output of [`inverse_factor`] for the input Hessian.
/// Without constraint rows the null space basis is `u_factor` itself.
pub fn constraint_projection(d: &Matrix, u_factor: &Matrix) -> ConstraintProjection {
    let input_dim = u_factor.nrows();
    if d.nrows() == 0 {
        return ConstraintProjection {
            range: Matrix::zeros(input_dim, 0),
            null: u_factor.clone(),
            rank: 0,
        };
    }

    let du = d * u_factor;
    let svd = du.clone().svd(true, true);
    let max_sv = svd.singular_values.max();
    let tol = RANK_TOLERANCE * max_sv.max(1.0);
    let rank = svd.rank(tol);

    let du_pinv = svd
        .clone()
        .pseudo_inverse(tol)
        .unwrap_or_else(|_| Matrix::zeros(input_dim, d.nrows()));
    let range = u_factor * du_pinv;

    // Rows of Vᵀ with non-negligible singular values span the row space.
    let mut row_basis = Matrix::zeros(input_dim, rank);
    if let Some(v_t) = &svd.v_t {
        let mut col = 0;
        for (i, sv) in svd.singular_values.iter().enumerate() {
            if *sv > tol && col < rank {
                row_basis.set_column(col, &v_t.row(i).transpose());
                col += 1;
            }
        }
    }
    let complement = Matrix::identity(input_dim, input_dim) - &row_basis * row_basis.transpose();
    let null_basis = orthonormal_range(&complement, input_dim - rank);

    ConstraintProjection {
        range,
        null: u_factor * null_basis,
        rank,
    }
}

/// Orthonormal basis of the range of a symmetric projector with `dim` unit
/// eigenvalues.
fn orthonormal_range(projector: &Matrix, dim: usize) -> Matrix {
    let n = projector.nrows();
    let eigen = SymmetricEigen::new(projector.clone());
    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&a, &b| eigen.eigenvalues[b].total_cmp(&eigen.eigenvalues[a]));

    let mut basis = Matrix::zeros(n, dim);
    for (col, &i) in order.iter().take(dim).enumerate() {
        basis.set_column(col, &eigen.eigenvectors.column(i));
    }
    basis
}

/// Idempotent projector `Qu Quᵀ H` onto the constraint null space.
pub fn null_space_projector(null_basis: &Matrix, hessian: &Matrix) -> Matrix {
    null_basis * null_basis.transpose() * hessian
}

/// `(M + Mᵀ) / 2`
pub fn symmetrize(m: &Matrix) -> Matrix {
    (m + m.transpose()) * 0.5
}
