//! Linear and quadratic approximations of functions at one time sample.

use std::ops::AddAssign;

use crate::{Matrix, Scalar, Vector};

/// `f(x, u) ≈ f + dfdx δx + dfdu δu` for a vector valued function.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorFunctionLinearApproximation {
    pub f: Vector,
    pub dfdx: Matrix,
    pub dfdu: Matrix,
}

impl VectorFunctionLinearApproximation {
    pub fn zero(rows: usize, state_dim: usize, input_dim: usize) -> Self {
        Self {
            f: Vector::zeros(rows),
            dfdx: Matrix::zeros(rows, state_dim),
            dfdu: Matrix::zeros(rows, input_dim),
        }
    }

    pub fn rows(&self) -> usize {
        self.f.len()
    }

    /// Stacks the rows of `other` below the rows of `self`.
    pub fn stack(&self, other: &Self) -> Self {
        let rows = self.rows() + other.rows();
        let mut f = Vector::zeros(rows);
        f.rows_mut(0, self.rows()).copy_from(&self.f);
        f.rows_mut(self.rows(), other.rows()).copy_from(&other.f);

        let mut dfdx = Matrix::zeros(rows, self.dfdx.ncols());
        dfdx.rows_mut(0, self.rows()).copy_from(&self.dfdx);
        dfdx.rows_mut(self.rows(), other.rows()).copy_from(&other.dfdx);

        let mut dfdu = Matrix::zeros(rows, self.dfdu.ncols());
        dfdu.rows_mut(0, self.rows()).copy_from(&self.dfdu);
        dfdu.rows_mut(self.rows(), other.rows()).copy_from(&other.dfdu);

        Self { f, dfdx, dfdu }
    }
}

impl AddAssign<&VectorFunctionLinearApproximation> for VectorFunctionLinearApproximation {
    fn add_assign(&mut self, rhs: &VectorFunctionLinearApproximation) {
        self.f += &rhs.f;
        self.dfdx += &rhs.dfdx;
        self.dfdu += &rhs.dfdu;
    }
}

/// Per-row quadratic approximation of a vector valued function.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorFunctionQuadraticApproximation {
    pub f: Vector,
    pub dfdx: Matrix,
    pub dfdu: Matrix,
    pub dfdxx: Vec<Matrix>,
    pub dfduu: Vec<Matrix>,
    pub dfdux: Vec<Matrix>,
}

impl VectorFunctionQuadraticApproximation {
    pub fn zero(rows: usize, state_dim: usize, input_dim: usize) -> Self {
        Self {
            f: Vector::zeros(rows),
            dfdx: Matrix::zeros(rows, state_dim),
            dfdu: Matrix::zeros(rows, input_dim),
            dfdxx: vec![Matrix::zeros(state_dim, state_dim); rows],
            dfduu: vec![Matrix::zeros(input_dim, input_dim); rows],
            dfdux: vec![Matrix::zeros(input_dim, state_dim); rows],
        }
    }

    pub fn rows(&self) -> usize {
        self.f.len()
    }

    /// Drops the second order terms.
    pub fn linear_part(&self) -> VectorFunctionLinearApproximation {
        VectorFunctionLinearApproximation {
            f: self.f.clone(),
            dfdx: self.dfdx.clone(),
            dfdu: self.dfdu.clone(),
        }
    }
}

/// Second order Taylor expansion of a scalar function.
#[derive(Debug, Clone, PartialEq)]
pub struct ScalarFunctionQuadraticApproximation {
    pub f: Scalar,
    pub dfdx: Vector,
    pub dfdu: Vector,
    pub dfdxx: Matrix,
    pub dfduu: Matrix,
    pub dfdux: Matrix,
}

impl ScalarFunctionQuadraticApproximation {
    pub fn zero(state_dim: usize, input_dim: usize) -> Self {
        Self {
            f: 0.0,
            dfdx: Vector::zeros(state_dim),
            dfdu: Vector::zeros(input_dim),
            dfdxx: Matrix::zeros(state_dim, state_dim),
            dfduu: Matrix::zeros(input_dim, input_dim),
            dfdux: Matrix::zeros(input_dim, state_dim),
        }
    }

    /// Evaluates the quadratic model at the deviation `(dx, du)`.
    pub fn evaluate(&self, dx: &Vector, du: &Vector) -> Scalar {
        self.f
            + self.dfdx.dot(dx)
            + self.dfdu.dot(du)
            + 0.5 * dx.dot(&(&self.dfdxx * dx))
            + 0.5 * du.dot(&(&self.dfduu * du))
            + du.dot(&(&self.dfdux * dx))
    }

    /// Multiplies every term by `factor`.
    pub fn scale(&mut self, factor: Scalar) {
        self.f *= factor;
        self.dfdx *= factor;
        self.dfdu *= factor;
        self.dfdxx *= factor;
        self.dfduu *= factor;
        self.dfdux *= factor;
    }

    /// Adds `½ μ ‖h‖²` for a linearized state-only constraint `h`.
    pub fn add_quadratic_penalty(&mut self, constraint: &VectorFunctionLinearApproximation, mu: Scalar) {
        if constraint.rows() == 0 {
            return;
        }
        let h = &constraint.f;
        let c = &constraint.dfdx;
        self.f += 0.5 * mu * h.norm_squared();
        self.dfdx += c.transpose() * h * mu;
        self.dfdxx += c.transpose() * c * mu;
    }
}

impl AddAssign<&ScalarFunctionQuadraticApproximation> for ScalarFunctionQuadraticApproximation {
    fn add_assign(&mut self, rhs: &ScalarFunctionQuadraticApproximation) {
        self.f += rhs.f;
        self.dfdx += &rhs.dfdx;
        self.dfdu += &rhs.dfdu;
        self.dfdxx += &rhs.dfdxx;
        self.dfduu += &rhs.dfduu;
        self.dfdux += &rhs.dfdux;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_stack() {
        let mut a = VectorFunctionLinearApproximation::zero(1, 2, 1);
        a.f[0] = 1.0;
        let mut b = VectorFunctionLinearApproximation::zero(2, 2, 1);
        b.dfdx[(1, 1)] = 3.0;
        let s = a.stack(&b);
        assert_eq!(s.rows(), 3);
        assert_eq!(s.f[0], 1.0);
        assert_eq!(s.dfdx[(2, 1)], 3.0);
    }

    #[test]
    fn test_quadratic_penalty() {
        let mut cost = ScalarFunctionQuadraticApproximation::zero(2, 1);
        let mut h = VectorFunctionLinearApproximation::zero(1, 2, 1);
        h.f[0] = 2.0;
        h.dfdx[(0, 0)] = 1.0;
        cost.add_quadratic_penalty(&h, 3.0);
        assert_relative_eq!(cost.f, 6.0);
        assert_relative_eq!(cost.dfdx[0], 6.0);
        assert_relative_eq!(cost.dfdxx[(0, 0)], 3.0);
        assert_relative_eq!(cost.dfdxx[(1, 1)], 0.0);
    }

    #[test]
    fn test_evaluate_and_accumulate() {
        let mut cost = ScalarFunctionQuadraticApproximation::zero(1, 1);
        cost.dfdxx[(0, 0)] = 2.0;
        cost.dfdux[(0, 0)] = 1.0;
        let other = cost.clone();
        cost += &other;
        let dx = Vector::from_element(1, 1.0);
        let du = Vector::from_element(1, 2.0);
        // 0.5 * 4 * 1 + 2 * 2 * 1
        assert_relative_eq!(cost.evaluate(&dx, &du), 6.0);
    }
}
