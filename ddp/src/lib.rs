//! Differential dynamic programming for continuous-time optimal control.
//!
//! The crate solves
//!
//! ```text
//! min  Φ(x(T)) + Σ ψ(x(tₑ⁻)) + ∫ L(t, x, u) dt
//! s.t. ẋ = f(t, x, u),   x(tₑ⁺) = g(x(tₑ⁻)),   h(t, x, u) = 0
//! ```
//!
//! with SLQ (continuous Riccati ODE) or ILQR (discrete Riccati recursion).
//! Each iteration runs:
//!
//! 1. a parallel sweep building a [`ModelData`] record per time sample,
//! 2. null-space projection of the state-input equality constraints and a
//!    Hessian-corrected Riccati modification per sample,
//! 3. the backward Riccati pass per time partition,
//! 4. feedback/feedforward gain synthesis,
//! 5. a forward rollout with line search on the feedforward step.

pub mod approximation;
pub mod approximator;
pub mod autodiff;
pub mod controller;
pub mod error;
pub mod hessian_correction;
pub mod integrator;
pub mod interpolation;
pub mod linear_algebra;
pub mod model_data;
pub mod performance;
pub mod problem;
pub mod riccati;
pub mod rollout;
pub mod search_strategy;
pub mod settings;
pub mod solver;
pub mod thread_pool;

use nalgebra::{DMatrix, DVector};

pub type Scalar = f64;
pub type Vector = DVector<Scalar>;
pub type Matrix = DMatrix<Scalar>;

pub use approximation::{
    ScalarFunctionQuadraticApproximation, VectorFunctionLinearApproximation,
    VectorFunctionQuadraticApproximation,
};
pub use approximator::LinearQuadraticApproximator;
pub use controller::LinearController;
pub use solver::{DdpCore, GaussNewtonDdp, Ilqr, PrimalSolution, Slq, ValueFunctionTrajectory};
pub use error::{Checked, DdpError, DdpResult, IntegrationError, NumericalIssue};
pub use model_data::ModelData;
pub use performance::PerformanceIndex;
pub use problem::{ModeSchedule, OptimalControlProblem, TargetTrajectories};
pub use riccati::{ContinuousTimeRiccatiEquations, RiccatiModification};
pub use settings::{Algorithm, IntegratorType, LineSearchSettings, RolloutSettings, Settings};
pub use thread_pool::ThreadPool;
