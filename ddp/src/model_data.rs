use nalgebra::SymmetricEigen;

use crate::approximation::{
    ScalarFunctionQuadraticApproximation, VectorFunctionLinearApproximation,
    VectorFunctionQuadraticApproximation,
};
use crate::error::NumericalIssue;
use crate::{Matrix, Scalar};

const SYMMETRY_TOLERANCE: Scalar = 1e-6;
const EIGENVALUE_TOLERANCE: Scalar = -1e-9;

/// LQ model of the optimal control problem at one time sample.
///
/// The same record holds projected data after constraint elimination. In
/// that case `dynamics` and `cost` live in the reduced input space, and
/// `state_input_eq_constr` holds the particular solution: `f` is the
/// feedforward `Dm† Ev` and `dfdx` the feedback `Dm† Cm`.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelData {
    pub time: Scalar,
    pub state_dim: usize,
    pub input_dim: usize,

    pub dynamics: VectorFunctionLinearApproximation,
    pub dynamics_covariance: Matrix,

    pub cost: ScalarFunctionQuadraticApproximation,

    pub state_input_eq_constr: VectorFunctionLinearApproximation,
    pub state_eq_constr: VectorFunctionLinearApproximation,
    pub ineq_constr: VectorFunctionQuadraticApproximation,
}

impl ModelData {
    pub fn new(time: Scalar, state_dim: usize, input_dim: usize) -> Self {
        Self {
            time,
            state_dim,
            input_dim,
            dynamics: VectorFunctionLinearApproximation::zero(state_dim, state_dim, input_dim),
            dynamics_covariance: Matrix::zeros(state_dim, state_dim),
            cost: ScalarFunctionQuadraticApproximation::zero(state_dim, input_dim),
            state_input_eq_constr: VectorFunctionLinearApproximation::zero(0, state_dim, input_dim),
            state_eq_constr: VectorFunctionLinearApproximation::zero(0, state_dim, input_dim),
            ineq_constr: VectorFunctionQuadraticApproximation::zero(0, state_dim, input_dim),
        }
    }

    /// Sanity checks of the dynamics derivatives.
    pub fn check_dynamics_properties(&self) -> Result<(), NumericalIssue> {
        check_finite("dynamics flow map", self.time, self.dynamics.f.iter())?;
        check_finite("dynamics state derivative", self.time, self.dynamics.dfdx.iter())?;
        check_finite("dynamics input derivative", self.time, self.dynamics.dfdu.iter())?;
        check_finite("dynamics covariance", self.time, self.dynamics_covariance.iter())
    }

    /// Sanity checks of the cost derivatives.
    pub fn check_cost_properties(&self) -> Result<(), NumericalIssue> {
        let cost = &self.cost;
        check_finite("intermediate cost", self.time, std::iter::once(&cost.f))?;
        check_finite("cost state derivative", self.time, cost.dfdx.iter())?;
        check_finite("cost input derivative", self.time, cost.dfdu.iter())?;
        check_finite("cost state second derivative", self.time, cost.dfdxx.iter())?;
        check_finite("cost input second derivative", self.time, cost.dfduu.iter())?;
        check_finite("cost input-state derivative", self.time, cost.dfdux.iter())?;

        check_symmetric("cost state second derivative", self.time, &cost.dfdxx)?;
        check_symmetric("cost input second derivative", self.time, &cost.dfduu)?;

        let min_q = min_eigenvalue(&cost.dfdxx);
        if min_q < EIGENVALUE_TOLERANCE {
            return Err(NumericalIssue::NotPositiveSemiDefinite {
                what: "cost state second derivative",
                time: self.time,
                min_eigenvalue: min_q,
            });
        }
        if self.input_dim > 0 {
            let min_r = min_eigenvalue(&cost.dfduu);
            if min_r <= 0.0 {
                return Err(NumericalIssue::NotPositiveDefinite {
                    what: "cost input second derivative",
                    time: self.time,
                    min_eigenvalue: min_r,
                });
            }
        }
        Ok(())
    }

    /// Sanity checks of the constraint derivatives.
    pub fn check_constraint_properties(&self) -> Result<(), NumericalIssue> {
        let se = &self.state_input_eq_constr;
        check_finite("state-input equality constraint", self.time, se.f.iter())?;
        check_finite("state-input equality constraint state derivative", self.time, se.dfdx.iter())?;
        check_finite("state-input equality constraint input derivative", self.time, se.dfdu.iter())?;

        let s = &self.state_eq_constr;
        check_finite("state-only equality constraint", self.time, s.f.iter())?;
        check_finite("state-only equality constraint state derivative", self.time, s.dfdx.iter())?;

        let ineq = &self.ineq_constr;
        check_finite("inequality constraint", self.time, ineq.f.iter())?;
        check_finite("inequality constraint state derivative", self.time, ineq.dfdx.iter())?;
        check_finite("inequality constraint input derivative", self.time, ineq.dfdu.iter())
    }
}

fn check_finite<'a>(
    what: &'static str,
    time: Scalar,
    mut values: impl Iterator<Item = &'a Scalar>,
) -> Result<(), NumericalIssue> {
    if values.all(|v| v.is_finite()) {
        Ok(())
    } else {
        Err(NumericalIssue::NonFinite { what, time })
    }
}

fn check_symmetric(what: &'static str, time: Scalar, m: &Matrix) -> Result<(), NumericalIssue> {
    let scale = m.amax().max(1.0);
    if (m - m.transpose()).amax() > SYMMETRY_TOLERANCE * scale {
        Err(NumericalIssue::NotSymmetric { what, time })
    } else {
        Ok(())
    }
}

/// Smallest eigenvalue of the symmetric part of `m`, `+∞` when empty.
pub fn min_eigenvalue(m: &Matrix) -> Scalar {
    if m.is_empty() {
        return Scalar::INFINITY;
    }
    let sym = (m + m.transpose()) * 0.5;
    SymmetricEigen::new(sym).eigenvalues.min()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn well_posed() -> ModelData {
        let mut data = ModelData::new(0.5, 2, 1);
        data.cost.dfdxx = Matrix::identity(2, 2);
        data.cost.dfduu = Matrix::identity(1, 1);
        data
    }

    #[test]
    fn test_well_posed_passes() {
        let data = well_posed();
        assert!(data.check_dynamics_properties().is_ok());
        assert!(data.check_cost_properties().is_ok());
        assert!(data.check_constraint_properties().is_ok());
    }

    #[test]
    fn test_nan_dynamics_reported() {
        let mut data = well_posed();
        data.dynamics.dfdu[(1, 0)] = Scalar::NAN;
        assert_eq!(
            data.check_dynamics_properties(),
            Err(NumericalIssue::NonFinite {
                what: "dynamics input derivative",
                time: 0.5
            })
        );
    }

    #[test]
    fn test_asymmetric_hessian_reported() {
        let mut data = well_posed();
        data.cost.dfdxx[(0, 1)] = 1.0;
        assert!(matches!(
            data.check_cost_properties(),
            Err(NumericalIssue::NotSymmetric { .. })
        ));
    }

    #[test]
    fn test_singular_input_hessian_reported() {
        let mut data = well_posed();
        data.cost.dfduu[(0, 0)] = 0.0;
        assert!(matches!(
            data.check_cost_properties(),
            Err(NumericalIssue::NotPositiveDefinite { .. })
        ));
    }
}
