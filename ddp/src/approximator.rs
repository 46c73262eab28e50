use std::sync::Arc;

use tracing::warn;

use crate::approximation::ScalarFunctionQuadraticApproximation;
use crate::error::{Checked, DdpError, DdpResult, NumericalIssue};
use crate::model_data::{min_eigenvalue, ModelData};
use crate::problem::cost::add_state_cost;
use crate::problem::OptimalControlProblem;
use crate::{Scalar, Vector};

/// Builds the LQ model of the problem at one time sample.
///
/// Cheap to clone; solvers keep one per worker.
#[derive(Clone)]
pub struct LinearQuadraticApproximator {
    problem: Arc<OptimalControlProblem>,
    check_numerical_characteristics: bool,
}

impl LinearQuadraticApproximator {
    pub fn new(problem: Arc<OptimalControlProblem>, check_numerical_characteristics: bool) -> Self {
        Self {
            problem,
            check_numerical_characteristics,
        }
    }

    pub fn problem(&self) -> &OptimalControlProblem {
        &self.problem
    }

    /// Dynamics, constraints and cost.
    pub fn approximate_lq_problem(&self, time: Scalar, state: &Vector, input: &Vector) -> DdpResult<Checked<ModelData>> {
        let mut data = ModelData::new(time, state.len(), input.len());
        let mut issues = Vec::new();
        self.approximate_dynamics(time, state, input, &mut data, &mut issues);
        self.approximate_constraints(time, state, input, &mut data, &mut issues)?;
        self.approximate_cost(time, state, input, &mut data, &mut issues);
        Ok(Checked::with_issues(data, issues))
    }

    /// Dynamics and cost, hard constraints left out.
    pub fn approximate_unconstrained_lq_problem(
        &self,
        time: Scalar,
        state: &Vector,
        input: &Vector,
    ) -> DdpResult<Checked<ModelData>> {
        let mut data = ModelData::new(time, state.len(), input.len());
        let mut issues = Vec::new();
        self.approximate_dynamics(time, state, input, &mut data, &mut issues);
        self.approximate_cost(time, state, input, &mut data, &mut issues);
        Ok(Checked::with_issues(data, issues))
    }

    /// Jump map, pre-jump state-only constraints and pre-jump cost.
    pub fn approximate_lq_problem_at_event_time(
        &self,
        time: Scalar,
        state: &Vector,
        input: &Vector,
    ) -> DdpResult<Checked<ModelData>> {
        let problem = &self.problem;
        let target = &problem.target_trajectories;
        let mut data = ModelData::new(time, state.len(), input.len());

        data.dynamics = problem.dynamics.jump_map_linear_approximation(time, state, input);
        data.state_eq_constr = problem.pre_jump_equality_constraint.linear_approximation(time, state);
        data.cost = ScalarFunctionQuadraticApproximation::zero(state.len(), input.len());
        add_state_cost(&mut data.cost, &problem.pre_jump_cost.quadratic_approximation(time, state, target));

        let mut issues = Vec::new();
        if self.check_numerical_characteristics {
            if let Err(issue) = data.check_dynamics_properties() {
                warn!(time, state = ?state.as_slice(), "{issue}\nG: {}", data.dynamics.dfdx);
                issues.push(issue);
            }
        }
        Ok(Checked::with_issues(data, issues))
    }

    /// Final state-only constraints and final cost.
    pub fn approximate_lq_problem_at_final_time(&self, time: Scalar, state: &Vector) -> DdpResult<Checked<ModelData>> {
        let problem = &self.problem;
        let input_dim = problem.input_dim();
        let mut data = ModelData::new(time, state.len(), input_dim);

        data.state_eq_constr = problem.final_equality_constraint.linear_approximation(time, state);
        data.cost = ScalarFunctionQuadraticApproximation::zero(state.len(), input_dim);
        add_state_cost(
            &mut data.cost,
            &problem.final_cost.quadratic_approximation(time, state, &problem.target_trajectories),
        );
        Ok(Checked::clean(data))
    }

    fn approximate_dynamics(
        &self,
        time: Scalar,
        state: &Vector,
        input: &Vector,
        data: &mut ModelData,
        issues: &mut Vec<NumericalIssue>,
    ) {
        let dynamics = &self.problem.dynamics;
        data.dynamics = dynamics.linear_approximation(time, state, input);
        data.dynamics_covariance = dynamics.dynamics_covariance(time, state, input);

        if self.check_numerical_characteristics {
            if let Err(issue) = data.check_dynamics_properties() {
                warn!(
                    time,
                    state = ?state.as_slice(),
                    input = ?input.as_slice(),
                    "{issue}\nAm: {}\nBm: {}",
                    data.dynamics.dfdx,
                    data.dynamics.dfdu,
                );
                issues.push(issue);
            }
        }
    }

    fn approximate_constraints(
        &self,
        time: Scalar,
        state: &Vector,
        input: &Vector,
        data: &mut ModelData,
        issues: &mut Vec<NumericalIssue>,
    ) -> DdpResult<()> {
        let problem = &self.problem;

        data.state_input_eq_constr = problem.equality_constraint.linear_approximation(time, state, input);
        if data.state_input_eq_constr.rows() > input.len() {
            return Err(DdpError::TooManyConstraints {
                kind: "state-input",
                active: data.state_input_eq_constr.rows(),
                input_dim: input.len(),
            });
        }

        data.state_eq_constr = problem.state_equality_constraint.linear_approximation(time, state);
        if data.state_eq_constr.rows() > input.len() {
            return Err(DdpError::TooManyConstraints {
                kind: "state-only",
                active: data.state_eq_constr.rows(),
                input_dim: input.len(),
            });
        }

        data.ineq_constr = problem.inequality_constraint.quadratic_approximation(time, state, input);

        if self.check_numerical_characteristics {
            if let Err(issue) = data.check_constraint_properties() {
                warn!(
                    time,
                    state = ?state.as_slice(),
                    input = ?input.as_slice(),
                    "{issue}\nEv: {}\nCm: {}\nDm: {}\nHv: {}\nFm: {}",
                    data.state_input_eq_constr.f.transpose(),
                    data.state_input_eq_constr.dfdx,
                    data.state_input_eq_constr.dfdu,
                    data.state_eq_constr.f.transpose(),
                    data.state_eq_constr.dfdx,
                );
                issues.push(issue);
            }
        }
        Ok(())
    }

    fn approximate_cost(
        &self,
        time: Scalar,
        state: &Vector,
        input: &Vector,
        data: &mut ModelData,
        issues: &mut Vec<NumericalIssue>,
    ) {
        let problem = &self.problem;
        let target = &problem.target_trajectories;

        data.cost = problem.cost.quadratic_approximation(time, state, input, target);
        add_state_cost(&mut data.cost, &problem.state_cost.quadratic_approximation(time, state, target));

        if self.check_numerical_characteristics {
            if let Err(issue) = data.check_cost_properties() {
                let cost = &data.cost;
                warn!(
                    time,
                    state = ?state.as_slice(),
                    input = ?input.as_slice(),
                    q = cost.f,
                    min_eigenvalue_qm = min_eigenvalue(&cost.dfdxx),
                    min_eigenvalue_rm = min_eigenvalue(&cost.dfduu),
                    "{issue}\nQv: {}\nQm: {}\nRv: {}\nRm: {}\nPm: {}",
                    cost.dfdx.transpose(),
                    cost.dfdxx,
                    cost.dfdu.transpose(),
                    cost.dfduu,
                    cost.dfdux,
                );
                issues.push(issue);
            }
        }
    }
}
