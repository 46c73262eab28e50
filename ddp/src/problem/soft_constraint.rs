//! Constraints relaxed into cost terms through a penalty function.

use crate::approximation::{
    ScalarFunctionQuadraticApproximation, VectorFunctionLinearApproximation,
    VectorFunctionQuadraticApproximation,
};
use crate::problem::constraint::{StateConstraint, StateInputConstraint};
use crate::problem::cost::{StateCost, StateInputCost};
use crate::problem::target::TargetTrajectories;
use crate::{Matrix, Scalar, Vector};

/// Scalar penalty `p(h)` applied per constraint row.
pub trait PenaltyFunction: Send + Sync {
    fn value(&self, h: Scalar) -> Scalar;
    fn derivative(&self, h: Scalar) -> Scalar;
    fn second_derivative(&self, h: Scalar) -> Scalar;
}

/// Log barrier for `h ≥ 0`, continued quadratically below `delta`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RelaxedBarrierPenalty {
    pub mu: Scalar,
    pub delta: Scalar,
}

impl PenaltyFunction for RelaxedBarrierPenalty {
    fn value(&self, h: Scalar) -> Scalar {
        if h > self.delta {
            -self.mu * h.ln()
        } else {
            let r = (h - 2.0 * self.delta) / self.delta;
            self.mu * (-self.delta.ln() + 0.5 * r * r - 0.5)
        }
    }

    fn derivative(&self, h: Scalar) -> Scalar {
        if h > self.delta {
            -self.mu / h
        } else {
            self.mu * (h - 2.0 * self.delta) / (self.delta * self.delta)
        }
    }

    fn second_derivative(&self, h: Scalar) -> Scalar {
        if h > self.delta {
            self.mu / (h * h)
        } else {
            self.mu / (self.delta * self.delta)
        }
    }
}

/// `½ scale h²`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QuadraticPenalty {
    pub scale: Scalar,
}

impl PenaltyFunction for QuadraticPenalty {
    fn value(&self, h: Scalar) -> Scalar {
        0.5 * self.scale * h * h
    }

    fn derivative(&self, h: Scalar) -> Scalar {
        self.scale * h
    }

    fn second_derivative(&self, _h: Scalar) -> Scalar {
        self.scale
    }
}

/// Sum of per-row penalties, with derivatives through the chain rule.
pub struct SoftConstraintPenalty {
    penalty: Box<dyn PenaltyFunction>,
}

impl SoftConstraintPenalty {
    pub fn new(penalty: Box<dyn PenaltyFunction>) -> Self {
        Self { penalty }
    }

    pub fn value(&self, h: &Vector) -> Scalar {
        h.iter().map(|&hi| self.penalty.value(hi)).sum()
    }

    fn derivatives(&self, h: &Vector) -> (Scalar, Vector, Vector) {
        let value = self.value(h);
        let first = h.map(|hi| self.penalty.derivative(hi));
        let second = h.map(|hi| self.penalty.second_derivative(hi));
        (value, first, second)
    }

    /// Gauss-Newton approximation from a linearized constraint.
    pub fn quadratic_approximation(&self, h: &VectorFunctionLinearApproximation) -> ScalarFunctionQuadraticApproximation {
        let (f, first, second) = self.derivatives(&h.f);
        let c = &h.dfdx;
        let d = &h.dfdu;
        let weighted_c = Matrix::from_diagonal(&second) * c;
        let weighted_d = Matrix::from_diagonal(&second) * d;
        ScalarFunctionQuadraticApproximation {
            f,
            dfdx: c.transpose() * &first,
            dfdu: d.transpose() * &first,
            dfdxx: c.transpose() * &weighted_c,
            dfduu: d.transpose() * &weighted_d,
            dfdux: d.transpose() * &weighted_c,
        }
    }

    /// Adds the constraint curvature weighted by the penalty slope.
    pub fn quadratic_approximation_with_curvature(
        &self,
        h: &VectorFunctionQuadraticApproximation,
    ) -> ScalarFunctionQuadraticApproximation {
        let mut approx = self.quadratic_approximation(&h.linear_part());
        for (i, hi) in h.f.iter().enumerate() {
            let slope = self.penalty.derivative(*hi);
            approx.dfdxx += &h.dfdxx[i] * slope;
            approx.dfduu += &h.dfduu[i] * slope;
            approx.dfdux += &h.dfdux[i] * slope;
        }
        approx
    }
}

/// State-input constraint enforced through a penalty cost.
pub struct StateInputSoftConstraint {
    constraint: Box<dyn StateInputConstraint>,
    penalty: SoftConstraintPenalty,
}

impl StateInputSoftConstraint {
    pub fn new(constraint: Box<dyn StateInputConstraint>, penalty: SoftConstraintPenalty) -> Self {
        Self { constraint, penalty }
    }
}

impl StateInputCost for StateInputSoftConstraint {
    fn value(&self, time: Scalar, state: &Vector, input: &Vector, _target: &TargetTrajectories) -> Scalar {
        if !self.constraint.is_active(time) {
            return 0.0;
        }
        self.penalty.value(&self.constraint.value(time, state, input))
    }

    fn quadratic_approximation(
        &self,
        time: Scalar,
        state: &Vector,
        input: &Vector,
        _target: &TargetTrajectories,
    ) -> ScalarFunctionQuadraticApproximation {
        if !self.constraint.is_active(time) {
            return ScalarFunctionQuadraticApproximation::zero(state.len(), input.len());
        }
        let h = self.constraint.linear_approximation(time, state, input);
        self.penalty.quadratic_approximation(&h)
    }
}

/// State-only constraint enforced through a penalty cost.
pub struct StateSoftConstraint {
    constraint: Box<dyn StateConstraint>,
    penalty: SoftConstraintPenalty,
}

impl StateSoftConstraint {
    pub fn new(constraint: Box<dyn StateConstraint>, penalty: SoftConstraintPenalty) -> Self {
        Self { constraint, penalty }
    }
}

impl StateCost for StateSoftConstraint {
    fn value(&self, time: Scalar, state: &Vector, _target: &TargetTrajectories) -> Scalar {
        if !self.constraint.is_active(time) {
            return 0.0;
        }
        self.penalty.value(&self.constraint.value(time, state))
    }

    fn quadratic_approximation(
        &self,
        time: Scalar,
        state: &Vector,
        _target: &TargetTrajectories,
    ) -> ScalarFunctionQuadraticApproximation {
        if !self.constraint.is_active(time) {
            return ScalarFunctionQuadraticApproximation::zero(state.len(), 0);
        }
        let h = self.constraint.linear_approximation(time, state);
        self.penalty.quadratic_approximation(&h)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::problem::constraint::LinearStateInputConstraint;
    use approx::assert_relative_eq;

    #[test]
    fn test_relaxed_barrier_is_continuous_at_delta() {
        let p = RelaxedBarrierPenalty { mu: 0.5, delta: 0.1 };
        let eps = 1e-9;
        assert_relative_eq!(p.value(0.1 - eps), p.value(0.1 + eps), epsilon = 1e-6);
        assert_relative_eq!(p.derivative(0.1 - eps), p.derivative(0.1 + eps), epsilon = 1e-5);
        assert_relative_eq!(p.second_derivative(0.1), p.second_derivative(0.1 + eps), epsilon = 1e-3);
    }

    #[test]
    fn test_relaxed_barrier_derivatives_match_finite_differences() {
        let p = RelaxedBarrierPenalty { mu: 0.5, delta: 0.1 };
        let step = 1e-6;
        for h in [-1.0, 0.05, 0.5, 2.0] {
            let fd = (p.value(h + step) - p.value(h - step)) / (2.0 * step);
            assert_relative_eq!(p.derivative(h), fd, epsilon = 1e-5);
        }
    }

    #[test]
    fn test_soft_constraint_gauss_newton() {
        let constraint = LinearStateInputConstraint::new(
            Vector::from_vec(vec![1.0]),
            Matrix::from_row_slice(1, 2, &[1.0, 0.0]),
            Matrix::from_row_slice(1, 1, &[2.0]),
        );
        let soft = StateInputSoftConstraint::new(
            Box::new(constraint),
            SoftConstraintPenalty::new(Box::new(QuadraticPenalty { scale: 2.0 })),
        );
        let target = TargetTrajectories::constant(Vector::zeros(2), Vector::zeros(1));
        let x = Vector::from_vec(vec![1.0, 5.0]);
        let u = Vector::from_vec(vec![0.5]);

        // h = 1 + 1 + 1 = 3
        assert_relative_eq!(soft.value(0.0, &x, &u, &target), 9.0);
        let approx = soft.quadratic_approximation(0.0, &x, &u, &target);
        assert_relative_eq!(approx.f, 9.0);
        assert_relative_eq!(approx.dfdx, Vector::from_vec(vec![6.0, 0.0]));
        assert_relative_eq!(approx.dfdu[0], 12.0);
        assert_relative_eq!(approx.dfduu[(0, 0)], 8.0);
        assert_relative_eq!(approx.dfdux[(0, 0)], 4.0);
    }
}
