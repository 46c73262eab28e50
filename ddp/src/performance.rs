use std::fmt;

use crate::Scalar;

/// Cost and constraint violation of one rollout.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PerformanceIndex {
    /// `total_cost + ½ μ (sum of constraint errors)`, the line search criterion.
    pub merit: Scalar,
    /// Intermediate, pre-jump and final costs.
    pub total_cost: Scalar,
    /// ∫ ‖h(x)‖² dt of the state-only equality constraints.
    pub state_eq_constraint_ise: Scalar,
    /// Σ ‖h(x)‖² of the pre-jump and final state-only equality constraints.
    pub state_eq_final_constraint_sse: Scalar,
    /// ∫ ‖g(x, u)‖² dt of the state-input equality constraints.
    pub state_input_eq_constraint_ise: Scalar,
    /// ∫ ‖min(c(x, u), 0)‖² dt of the inequality constraints.
    pub inequality_constraint_ise: Scalar,
}

impl PerformanceIndex {
    /// Recomputes `merit` for the penalty coefficient `mu`.
    pub fn update_merit(&mut self, mu: Scalar) {
        self.merit = self.total_cost
            + 0.5
                * mu
                * (self.state_eq_constraint_ise
                    + self.state_eq_final_constraint_sse
                    + self.state_input_eq_constraint_ise
                    + self.inequality_constraint_ise);
    }
}

impl fmt::Display for PerformanceIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "merit: {:.6e}, cost: {:.6e}, state-input eq ISE: {:.3e}, state eq ISE: {:.3e}, state eq final SSE: {:.3e}, ineq ISE: {:.3e}",
            self.merit,
            self.total_cost,
            self.state_input_eq_constraint_ise,
            self.state_eq_constraint_ise,
            self.state_eq_final_constraint_sse,
            self.inequality_constraint_ise,
        )
    }
}

/// Trapezoidal rule over a sampled trajectory. Zero-length intervals
/// (repeated event times) contribute nothing.
pub fn trapezoidal_integral(times: &[Scalar], values: &[Scalar]) -> Scalar {
    times
        .windows(2)
        .zip(values.windows(2))
        .map(|(t, v)| 0.5 * (t[1] - t[0]) * (v[0] + v[1]))
        .sum()
}
