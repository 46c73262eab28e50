//! Null-space projection of the state-input equality constraints.
//!
//! With active constraints `Cm x + Dm u + Ev = 0` the input is split as
//!
//! ```text
//! u = -ΔC x - ΔE + Qu v,    ΔC = Dm† Cm,   ΔE = Dm† Ev
//! ```
//!
//! where `Dm† = U (Dm U)⁺` is a right pseudo-inverse and `Qu` a basis of the
//! null space of `Dm`, both in the metric of the Hamiltonian Hessian `H`
//! (`Uᵀ H U = I`, `Quᵀ H Qu = I`). Dynamics and cost are rewritten in the
//! free input `v`.

use tracing::warn;

use crate::approximation::VectorFunctionLinearApproximation;
use crate::error::{Checked, NumericalIssue};
use crate::hessian_correction::{shifted, Strategy};
use crate::linear_algebra::{constraint_projection, inverse_factor, symmetrize};
use crate::model_data::{min_eigenvalue, ModelData};
use crate::search_strategy::HessianCorrectionPolicy;
use crate::{Matrix, Scalar, Vector};

/// Per-sample terms that keep the Riccati recursion well-posed.
#[derive(Debug, Clone, PartialEq)]
pub struct RiccatiModification {
    pub time: Scalar,
    /// Corrected Hamiltonian Hessian used as the projection metric.
    pub hamiltonian_hessian: Matrix,
    /// `Dm†`, maps constraint violations to the input correction.
    pub constraint_range_projector: Matrix,
    /// `Qu`, basis of the constraint null space.
    pub constraint_null_projector: Matrix,
    pub delta_qm: Matrix,
    pub delta_gm: Matrix,
    pub delta_gv: Vector,
}

impl RiccatiModification {
    /// No constraints, no correction, identity metric.
    pub fn identity(time: Scalar, state_dim: usize, input_dim: usize) -> Self {
        Self {
            time,
            hamiltonian_hessian: Matrix::identity(input_dim, input_dim),
            constraint_range_projector: Matrix::zeros(input_dim, 0),
            constraint_null_projector: Matrix::identity(input_dim, input_dim),
            delta_qm: Matrix::zeros(state_dim, state_dim),
            delta_gm: Matrix::zeros(input_dim, state_dim),
            delta_gv: Vector::zeros(input_dim),
        }
    }
}

/// Projects `model` onto the null space of its state-input equality
/// constraints and computes the Riccati modification.
///
/// `hamiltonian_hessian` is the (already corrected) Hessian of the
/// Hamiltonian with respect to the input. The projected record has an
/// identity input Hessian and its `state_input_eq_constr` holds `ΔE` and `ΔC`.
pub fn compute_projection_and_riccati_modification(
    model: &ModelData,
    hamiltonian_hessian: &Matrix,
    policy: &dyn HessianCorrectionPolicy,
) -> Checked<(ModelData, RiccatiModification)> {
    let time = model.time;
    let input_dim = model.input_dim;
    let mut issues = Vec::new();

    let (hessian, u_factor) = match inverse_factor(hamiltonian_hessian) {
        Some(u) => (hamiltonian_hessian.clone(), u),
        None => {
            let min_eig = min_eigenvalue(hamiltonian_hessian);
            let issue = NumericalIssue::NotPositiveDefinite {
                what: "Hamiltonian Hessian",
                time,
                min_eigenvalue: min_eig,
            };
            warn!(time, "{issue}\nHm: {hamiltonian_hessian}");
            issues.push(issue);
            fallback_factor(hamiltonian_hessian)
        }
    };

    let constraint = &model.state_input_eq_constr;
    let projection = constraint_projection(&constraint.dfdu, &u_factor);
    if projection.rank < constraint.rows() {
        let issue = NumericalIssue::RankDeficientConstraints {
            time,
            rank: projection.rank,
            rows: constraint.rows(),
        };
        warn!(time, "{issue}\nDm: {}", constraint.dfdu);
        issues.push(issue);
    }

    let qu = projection.null;
    let (delta_c, delta_e) = if constraint.rows() > 0 {
        (&projection.range * &constraint.dfdx, &projection.range * &constraint.f)
    } else {
        (Matrix::zeros(input_dim, model.state_dim), Vector::zeros(input_dim))
    };

    let projected = project_model(model, &hessian, &qu, &delta_c, &delta_e);
    let correction = policy.compute_riccati_modification(&projected);

    let modification = RiccatiModification {
        time,
        hamiltonian_hessian: hessian,
        constraint_range_projector: projection.range,
        constraint_null_projector: qu,
        delta_qm: correction.delta_qm,
        delta_gm: correction.delta_gm,
        delta_gv: correction.delta_gv,
    };
    Checked::with_issues((projected, modification), issues)
}

/// Replaces a Hessian that failed the Cholesky factorization.
fn fallback_factor(hessian: &Matrix) -> (Matrix, Matrix) {
    let n = hessian.nrows();
    if hessian.iter().all(|v| v.is_finite()) {
        let repaired = shifted(Strategy::EigenvalueModification, hessian, 1e-6);
        if let Some(u) = inverse_factor(&repaired) {
            return (repaired, u);
        }
    }
    (Matrix::identity(n, n), Matrix::identity(n, n))
}

fn project_model(model: &ModelData, hessian: &Matrix, qu: &Matrix, delta_c: &Matrix, delta_e: &Vector) -> ModelData {
    let cost = &model.cost;
    let dynamics = &model.dynamics;
    let (qm, qv, rm, rv, pm) = (&cost.dfdxx, &cost.dfdx, &cost.dfduu, &cost.dfdu, &cost.dfdux);
    let (am, bm) = (&dynamics.dfdx, &dynamics.dfdu);

    let rm_delta_e = rm * delta_e;
    let rm_delta_c = rm * delta_c;

    let mut projected = ModelData::new(model.time, model.state_dim, qu.ncols());
    projected.dynamics_covariance = model.dynamics_covariance.clone();
    projected.state_eq_constr = model.state_eq_constr.clone();
    projected.ineq_constr = model.ineq_constr.clone();

    projected.dynamics.dfdx = am - bm * delta_c;
    projected.dynamics.dfdu = bm * qu;
    projected.dynamics.f = -(bm * delta_e);

    let c = &mut projected.cost;
    c.f = cost.f - rv.dot(delta_e) + 0.5 * delta_e.dot(&rm_delta_e);
    c.dfdx = qv - delta_c.transpose() * rv + delta_c.transpose() * &rm_delta_e - pm.transpose() * delta_e;
    c.dfdxx = symmetrize(
        &(qm + delta_c.transpose() * &rm_delta_c - delta_c.transpose() * pm - pm.transpose() * delta_c),
    );
    c.dfdu = qu.transpose() * (rv - &rm_delta_e);
    c.dfduu = symmetrize(&(qu.transpose() * hessian * qu));
    c.dfdux = qu.transpose() * (pm - &rm_delta_c);

    projected.state_input_eq_constr = VectorFunctionLinearApproximation {
        f: delta_e.clone(),
        dfdx: delta_c.clone(),
        dfdu: Matrix::zeros(model.input_dim, 0),
    };
    projected
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::linear_algebra::null_space_projector;
    use crate::search_strategy::LineSearch;
    use crate::settings::LineSearchSettings;
    use approx::assert_abs_diff_eq;

    fn model() -> ModelData {
        let mut data = ModelData::new(0.3, 2, 3);
        data.dynamics.dfdx = Matrix::from_row_slice(2, 2, &[0.0, 1.0, -1.0, 0.0]);
        data.dynamics.dfdu = Matrix::from_row_slice(2, 3, &[1.0, 0.0, 0.5, 0.0, 1.0, 0.0]);
        data.cost.f = 1.0;
        data.cost.dfdx = Vector::from_vec(vec![0.1, -0.2]);
        data.cost.dfdu = Vector::from_vec(vec![0.3, 0.0, -0.1]);
        data.cost.dfdxx = Matrix::identity(2, 2);
        data.cost.dfduu = Matrix::from_row_slice(3, 3, &[2.0, 0.2, 0.0, 0.2, 1.0, 0.0, 0.0, 0.0, 1.5]);
        data.cost.dfdux = Matrix::from_row_slice(3, 2, &[0.1, 0.0, 0.0, 0.1, 0.0, 0.0]);
        data.state_input_eq_constr = VectorFunctionLinearApproximation {
            f: Vector::from_vec(vec![0.5]),
            dfdx: Matrix::from_row_slice(1, 2, &[1.0, -1.0]),
            dfdu: Matrix::from_row_slice(1, 3, &[1.0, 1.0, 0.0]),
        };
        data
    }

    fn line_search() -> LineSearch {
        LineSearch::new(LineSearchSettings::default())
    }

    #[test]
    fn test_projection_satisfies_constraint() {
        let data = model();
        let ls = line_search();
        let h = ls.augment_hamiltonian_hessian(&data, &data.cost.dfduu);
        let checked = compute_projection_and_riccati_modification(&data, &h, &ls);
        assert!(!checked.is_degraded());
        let (projected, modification) = checked.value;

        let d = &data.state_input_eq_constr.dfdu;
        let qu = &modification.constraint_null_projector;
        assert_eq!(qu.shape(), (3, 2));
        assert_abs_diff_eq!(d * qu, Matrix::zeros(1, 2), epsilon = 1e-10);
        assert_abs_diff_eq!(projected.cost.dfduu, Matrix::identity(2, 2), epsilon = 1e-10);

        let projector = null_space_projector(qu, &modification.hamiltonian_hessian);
        assert_abs_diff_eq!(&projector * &projector, projector.clone(), epsilon = 1e-10);

        // u = -ΔC x - ΔE + Qu v satisfies the constraint for any x and v
        let x = Vector::from_vec(vec![0.7, -1.3]);
        let v = Vector::from_vec(vec![2.0, -0.4]);
        let u = -(&projected.state_input_eq_constr.dfdx * &x) - &projected.state_input_eq_constr.f + qu * &v;
        let c = &data.state_input_eq_constr;
        let residual = &c.dfdx * &x + d * &u + &c.f;
        assert_abs_diff_eq!(residual, Vector::zeros(1), epsilon = 1e-10);
    }

    #[test]
    fn test_projected_cost_matches_substitution() {
        let data = model();
        let ls = line_search();
        let h = data.cost.dfduu.clone();
        let (projected, modification) = compute_projection_and_riccati_modification(&data, &h, &ls).value;
        let qu = &modification.constraint_null_projector;

        let x = Vector::from_vec(vec![0.2, 0.9]);
        let v = Vector::from_vec(vec![-0.5, 0.25]);
        let u = -(&projected.state_input_eq_constr.dfdx * &x) - &projected.state_input_eq_constr.f + qu * &v;

        // with H = Rm the projected input Hessian is exactly QuᵀRmQu
        let original = data.cost.evaluate(&x, &u);
        let reduced = projected.cost.evaluate(&x, &v);
        assert_abs_diff_eq!(original, reduced, epsilon = 1e-10);

        let flow = &data.dynamics.dfdx * &x + &data.dynamics.dfdu * &u;
        let reduced_flow = &projected.dynamics.dfdx * &x + &projected.dynamics.dfdu * &v + &projected.dynamics.f;
        assert_abs_diff_eq!(flow, reduced_flow, epsilon = 1e-10);
    }

    #[test]
    fn test_unconstrained_sample_keeps_full_input() {
        let mut data = model();
        data.state_input_eq_constr = VectorFunctionLinearApproximation::zero(0, 2, 3);
        let ls = line_search();
        let h = ls.augment_hamiltonian_hessian(&data, &data.cost.dfduu);
        let (projected, modification) = compute_projection_and_riccati_modification(&data, &h, &ls).value;
        assert_eq!(modification.constraint_null_projector.shape(), (3, 3));
        assert_eq!(modification.constraint_range_projector.shape(), (3, 0));
        assert_eq!(projected.input_dim, 3);
        assert_abs_diff_eq!(projected.dynamics.dfdx, data.dynamics.dfdx, epsilon = 1e-12);
        assert_abs_diff_eq!(projected.cost.dfdxx, data.cost.dfdxx, epsilon = 1e-12);
    }

    #[test]
    fn test_rank_deficiency_is_reported() {
        let mut data = model();
        data.state_input_eq_constr = VectorFunctionLinearApproximation {
            f: Vector::zeros(2),
            dfdx: Matrix::zeros(2, 2),
            dfdu: Matrix::from_row_slice(2, 3, &[1.0, 0.0, 0.0, 2.0, 0.0, 0.0]),
        };
        let ls = line_search();
        let checked = compute_projection_and_riccati_modification(&data, &data.cost.dfduu, &ls);
        assert!(matches!(
            checked.issues.as_slice(),
            [NumericalIssue::RankDeficientConstraints { rank: 1, rows: 2, .. }]
        ));
    }

    #[test]
    fn test_indefinite_hessian_is_reported_and_repaired() {
        let data = model();
        let ls = line_search();
        let h = -Matrix::identity(3, 3);
        let checked = compute_projection_and_riccati_modification(&data, &h, &ls);
        assert!(checked.is_degraded());
        let (_, modification) = checked.value;
        assert!(min_eigenvalue(&modification.hamiltonian_hessian) > 0.0);
    }
}
