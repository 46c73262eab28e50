use crate::approximation::VectorFunctionLinearApproximation;
use crate::{Matrix, Scalar, Vector};

/// Continuous flow map `ẋ = f(t, x, u)` with a jump map `x⁺ = g(t, x⁻, u)`
/// applied at events.
pub trait SystemDynamics: Send + Sync {
    fn state_dim(&self) -> usize;
    fn input_dim(&self) -> usize;

    fn flow_map(&self, time: Scalar, state: &Vector, input: &Vector) -> Vector;

    fn linear_approximation(
        &self,
        time: Scalar,
        state: &Vector,
        input: &Vector,
    ) -> VectorFunctionLinearApproximation;

    /// Identity unless overridden.
    fn jump_map(&self, _time: Scalar, state: &Vector, _input: &Vector) -> Vector {
        state.clone()
    }

    fn jump_map_linear_approximation(
        &self,
        time: Scalar,
        state: &Vector,
        input: &Vector,
    ) -> VectorFunctionLinearApproximation {
        let n = self.state_dim();
        VectorFunctionLinearApproximation {
            f: self.jump_map(time, state, input),
            dfdx: Matrix::identity(n, n),
            dfdu: Matrix::zeros(n, self.input_dim()),
        }
    }

    /// Covariance of the additive process noise, used by the risk-sensitive
    /// backward pass.
    fn dynamics_covariance(&self, _time: Scalar, _state: &Vector, _input: &Vector) -> Matrix {
        let n = self.state_dim();
        Matrix::zeros(n, n)
    }
}

/// `ẋ = A x + B u`, `x⁺ = G x + H u`
#[derive(Debug, Clone, PartialEq)]
pub struct LinearSystemDynamics {
    a: Matrix,
    b: Matrix,
    g: Matrix,
    h: Matrix,
    covariance: Matrix,
}

impl LinearSystemDynamics {
    /// Linear system with an identity jump map.
    pub fn new(a: Matrix, b: Matrix) -> Self {
        let n = a.nrows();
        let m = b.ncols();
        Self {
            a,
            b,
            g: Matrix::identity(n, n),
            h: Matrix::zeros(n, m),
            covariance: Matrix::zeros(n, n),
        }
    }

    pub fn with_jump_map(mut self, g: Matrix, h: Matrix) -> Self {
        self.g = g;
        self.h = h;
        self
    }

    pub fn with_covariance(mut self, covariance: Matrix) -> Self {
        self.covariance = covariance;
        self
    }
}

impl SystemDynamics for LinearSystemDynamics {
    fn state_dim(&self) -> usize {
        self.a.nrows()
    }

    fn input_dim(&self) -> usize {
        self.b.ncols()
    }

    fn flow_map(&self, _time: Scalar, state: &Vector, input: &Vector) -> Vector {
        &self.a * state + &self.b * input
    }

    fn linear_approximation(
        &self,
        time: Scalar,
        state: &Vector,
        input: &Vector,
    ) -> VectorFunctionLinearApproximation {
        VectorFunctionLinearApproximation {
            f: self.flow_map(time, state, input),
            dfdx: self.a.clone(),
            dfdu: self.b.clone(),
        }
    }

    fn jump_map(&self, _time: Scalar, state: &Vector, input: &Vector) -> Vector {
        &self.g * state + &self.h * input
    }

    fn jump_map_linear_approximation(
        &self,
        time: Scalar,
        state: &Vector,
        input: &Vector,
    ) -> VectorFunctionLinearApproximation {
        VectorFunctionLinearApproximation {
            f: self.jump_map(time, state, input),
            dfdx: self.g.clone(),
            dfdu: self.h.clone(),
        }
    }

    fn dynamics_covariance(&self, _time: Scalar, _state: &Vector, _input: &Vector) -> Matrix {
        self.covariance.clone()
    }
}
