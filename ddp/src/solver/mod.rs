//! Gauss-Newton DDP iteration shared by SLQ and ILQR.
//!
//! [`DdpCore`] owns everything that does not depend on how the backward pass
//! is discretized: partitions, nominal rollouts, the LQ sweep, penalties,
//! performance evaluation and the line search. The algorithms plug in
//! through [`GaussNewtonDdp::backward_pass`].

mod ilqr;
mod slq;

use std::sync::Arc;

use tracing::{debug, info};

use crate::approximation::{ScalarFunctionQuadraticApproximation, VectorFunctionQuadraticApproximation};
use crate::approximator::LinearQuadraticApproximator;
use crate::controller::LinearController;
use crate::error::{Checked, DdpError, DdpResult};
use crate::model_data::ModelData;
use crate::performance::{trapezoidal_integral, PerformanceIndex};
use crate::problem::{ModeSchedule, OptimalControlProblem};
use crate::riccati::RiccatiModification;
use crate::rollout::{uniform_grid, RolloutTrajectory, TimeTriggeredRollout};
use crate::search_strategy::LineSearch;
use crate::settings::{Algorithm, Settings};
use crate::thread_pool::ThreadPool;
use crate::{Matrix, Scalar, Vector};

pub use ilqr::Ilqr;
pub use slq::Slq;

const PARTITION_TIME_TOLERANCE: Scalar = 1e-9;

/// Optimized trajectories over the whole horizon.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PrimalSolution {
    pub time_trajectory: Vec<Scalar>,
    pub state_trajectory: Vec<Vector>,
    pub input_trajectory: Vec<Vector>,
    pub post_event_indices: Vec<usize>,
    /// One controller per partition.
    pub controllers: Vec<LinearController>,
}

/// `(Sm, Sv, s)` sampled over one partition.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ValueFunctionTrajectory {
    pub time_trajectory: Vec<Scalar>,
    pub sm: Vec<Matrix>,
    pub sv: Vec<Vector>,
    pub s: Vec<Scalar>,
    pub post_event_indices: Vec<usize>,
}

impl ValueFunctionTrajectory {
    pub fn len(&self) -> usize {
        self.time_trajectory.len()
    }

    pub fn is_empty(&self) -> bool {
        self.time_trajectory.is_empty()
    }

    /// Value function at the first sample.
    pub fn start(&self) -> Option<(Matrix, Vector, Scalar)> {
        Some((self.sm.first()?.clone(), self.sv.first()?.clone(), *self.s.first()?))
    }
}

/// Per-partition iteration data.
#[derive(Debug, Clone)]
pub(crate) struct PartitionData {
    pub(crate) start: Scalar,
    pub(crate) end: Scalar,
    pub(crate) event_times: Vec<Scalar>,
    pub(crate) nominal: RolloutTrajectory,
    /// Controller that produced `nominal`.
    pub(crate) controller: LinearController,
    /// Output of the last backward pass, stepped by the line search.
    pub(crate) controller_update: LinearController,
    pub(crate) model_data: Vec<ModelData>,
    pub(crate) event_model_data: Vec<ModelData>,
    pub(crate) projected_model_data: Vec<ModelData>,
    pub(crate) riccati_modifications: Vec<RiccatiModification>,
    pub(crate) value_function: ValueFunctionTrajectory,
}

impl PartitionData {
    fn new(start: Scalar, end: Scalar, event_times: Vec<Scalar>, controller: LinearController) -> Self {
        Self {
            start,
            end,
            event_times,
            nominal: RolloutTrajectory::default(),
            controller_update: controller.clone(),
            controller,
            model_data: Vec::new(),
            event_model_data: Vec::new(),
            projected_model_data: Vec::new(),
            riccati_modifications: Vec::new(),
            value_function: ValueFunctionTrajectory::default(),
        }
    }
}

/// State shared by the DDP variants.
pub struct DdpCore {
    pub(crate) settings: Settings,
    pub(crate) problem: Arc<OptimalControlProblem>,
    pub(crate) thread_pool: ThreadPool,
    pub(crate) approximators: Vec<LinearQuadraticApproximator>,
    pub(crate) line_search: LineSearch,
    pub(crate) rollout: TimeTriggeredRollout,
    pub(crate) mode_schedule: ModeSchedule,

    pub(crate) init_state: Vector,
    pub(crate) partitions: Vec<PartitionData>,
    pub(crate) final_model: ModelData,

    pub(crate) penalty: Scalar,
    pub(crate) performance: PerformanceIndex,
    pub(crate) performance_history: Vec<PerformanceIndex>,
    pub(crate) num_iterations: usize,
    pub(crate) num_numerical_issues: usize,
}

impl DdpCore {
    /// Validates `settings` and builds one approximator per worker.
    pub fn new(settings: Settings, problem: Arc<OptimalControlProblem>, instantiated: Algorithm) -> DdpResult<Self> {
        if settings.algorithm != instantiated {
            return Err(DdpError::AlgorithmMismatch {
                configured: settings.algorithm,
                instantiated,
            });
        }
        settings.validate()?;

        let thread_pool = ThreadPool::new(settings.n_threads)?;
        let approximators = (0..thread_pool.num_workers())
            .map(|_| LinearQuadraticApproximator::new(Arc::clone(&problem), settings.check_numerical_stability))
            .collect();
        let state_dim = problem.state_dim();
        let input_dim = problem.input_dim();

        Ok(Self {
            line_search: LineSearch::new(settings.line_search.clone()),
            rollout: TimeTriggeredRollout::new(settings.rollout.clone()),
            mode_schedule: ModeSchedule::default(),
            init_state: Vector::zeros(state_dim),
            partitions: Vec::new(),
            final_model: ModelData::new(0.0, state_dim, input_dim),
            penalty: settings.constraint_penalty_initial_value,
            performance: PerformanceIndex::default(),
            performance_history: Vec::new(),
            num_iterations: 0,
            num_numerical_issues: 0,
            thread_pool,
            approximators,
            problem,
            settings,
        })
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn problem(&self) -> &OptimalControlProblem {
        &self.problem
    }

    pub fn num_partitions(&self) -> usize {
        self.partitions.len()
    }

    pub fn value_function(&self, partition: usize) -> Option<&ValueFunctionTrajectory> {
        self.partitions.get(partition).map(|p| &p.value_function)
    }

    pub fn model_data(&self, partition: usize) -> Option<&[ModelData]> {
        self.partitions.get(partition).map(|p| p.model_data.as_slice())
    }

    /// Splits the horizon, builds the operating-input controllers and runs
    /// the first rollout.
    pub(crate) fn initialize(
        &mut self,
        init_time: Scalar,
        init_state: &Vector,
        final_time: Scalar,
        partitioning_times: &[Scalar],
    ) -> DdpResult<()> {
        if !(init_time < final_time) {
            return Err(DdpError::InvalidPartitioning(format!(
                "initial time {init_time} must precede final time {final_time}"
            )));
        }
        let state_dim = self.problem.state_dim();
        if init_state.len() != state_dim {
            return Err(DdpError::DimensionMismatch {
                what: "initial state",
                expected: state_dim,
                actual: init_state.len(),
            });
        }
        let input_dim = self.problem.input_dim();
        let target = &self.problem.target_trajectories;
        if target.desired_input(init_time).len() != input_dim {
            return Err(DdpError::DimensionMismatch {
                what: "target input",
                expected: input_dim,
                actual: target.desired_input(init_time).len(),
            });
        }

        let bounds = partition_bounds(init_time, final_time, partitioning_times);
        for &boundary in &bounds[1..bounds.len() - 1] {
            if let Some(event) = self
                .mode_schedule
                .event_times()
                .iter()
                .find(|&&e| (e - boundary).abs() <= PARTITION_TIME_TOLERANCE)
            {
                return Err(DdpError::InvalidPartitioning(format!(
                    "event at {event} [sec] coincides with a partition boundary"
                )));
            }
        }

        self.partitions = bounds
            .windows(2)
            .map(|w| {
                let times = uniform_grid(w[0], w[1], self.settings.rollout.time_step);
                let inputs = times.iter().map(|&t| target.desired_input(t)).collect();
                let controller = LinearController::feedforward(times, inputs, state_dim);
                PartitionData::new(w[0], w[1], self.mode_schedule.events_in(w[0], w[1]), controller)
            })
            .collect();
        self.init_state = init_state.clone();
        self.final_model = ModelData::new(final_time, state_dim, input_dim);
        self.penalty = self.settings.constraint_penalty_initial_value;
        self.num_iterations = 0;
        self.num_numerical_issues = 0;

        let controllers: Vec<LinearController> = self.partitions.iter().map(|p| p.controller.clone()).collect();
        let trajectories = self.rollout_partitions(&controllers)?;
        for (partition, trajectory) in self.partitions.iter_mut().zip(trajectories) {
            partition.nominal = trajectory;
        }
        self.performance = self.evaluate_performance(self.partitions.iter().map(|p| &p.nominal));
        self.performance_history = vec![self.performance.clone()];

        debug!(
            partitions = self.partitions.len(),
            events = self.mode_schedule.event_times().len(),
            "initial rollout: {}",
            self.performance
        );
        Ok(())
    }

    /// Converts degraded results into errors when escalation is enabled.
    pub(crate) fn accept_checked<T>(&self, checked: Checked<T>, num_issues: &mut usize) -> DdpResult<T> {
        *num_issues += checked.issues.len();
        if self.settings.escalate_numerical_issues {
            checked.escalate()
        } else {
            Ok(checked.value)
        }
    }

    /// LQ model at every nominal sample of `partition` and at its events,
    /// computed by the worker pool, with the constraint penalties added.
    pub fn approximate_intermediate_lq(&mut self, partition: usize) -> DdpResult<usize> {
        let data = &self.partitions[partition];
        let nominal = &data.nominal;
        let approximators = &self.approximators;
        let results = self.thread_pool.sweep(nominal.len(), |worker, k| {
            approximators[worker].approximate_lq_problem(
                nominal.time_trajectory[k],
                &nominal.state_trajectory[k],
                &nominal.input_trajectory[k],
            )
        })?;

        let mut num_issues = 0;
        let mut model_data = Vec::with_capacity(results.len());
        for checked in results {
            let mut model = self.accept_checked(checked, &mut num_issues)?;
            add_constraint_penalties(&mut model, self.penalty);
            model_data.push(model);
        }

        let mut event_model_data = Vec::with_capacity(nominal.post_event_indices.len());
        for &post in &nominal.post_event_indices {
            let pre = post - 1;
            let checked = self.approximators[0].approximate_lq_problem_at_event_time(
                nominal.time_trajectory[pre],
                &nominal.state_trajectory[pre],
                &nominal.input_trajectory[pre],
            )?;
            let mut event = self.accept_checked(checked, &mut num_issues)?;
            event.cost.add_quadratic_penalty(&event.state_eq_constr, self.penalty);
            event_model_data.push(event);
        }

        let data = &mut self.partitions[partition];
        data.model_data = model_data;
        data.event_model_data = event_model_data;
        Ok(num_issues)
    }

    /// Final cost and final constraint penalty at the end of the horizon.
    pub(crate) fn approximate_final_lq(&mut self) -> DdpResult<usize> {
        let Some((time, state)) = self
            .partitions
            .last()
            .and_then(|p| Some((*p.nominal.time_trajectory.last()?, p.nominal.final_state()?.clone())))
        else {
            return Ok(0);
        };
        let checked = self.approximators[0].approximate_lq_problem_at_final_time(time, &state)?;
        let mut num_issues = 0;
        let mut final_model = self.accept_checked(checked, &mut num_issues)?;
        final_model.cost.add_quadratic_penalty(&final_model.state_eq_constr, self.penalty);
        self.final_model = final_model;
        Ok(num_issues)
    }

    /// Closed-loop rollout of all partitions, chaining the state across
    /// partition boundaries.
    pub(crate) fn rollout_partitions(&self, controllers: &[LinearController]) -> DdpResult<Vec<RolloutTrajectory>> {
        let dynamics = self.problem.dynamics.as_ref();
        let mut state = self.init_state.clone();
        let mut trajectories = Vec::with_capacity(self.partitions.len());
        for (partition, controller) in self.partitions.iter().zip(controllers) {
            let trajectory = self.rollout.run(
                dynamics,
                controller,
                partition.start,
                &state,
                partition.end,
                &partition.event_times,
            )?;
            if let Some(final_state) = trajectory.final_state() {
                state = final_state.clone();
            }
            trajectories.push(trajectory);
        }
        Ok(trajectories)
    }

    /// Cost and constraint violation of a set of partition rollouts.
    pub(crate) fn evaluate_performance<'a>(
        &self,
        trajectories: impl IntoIterator<Item = &'a RolloutTrajectory>,
    ) -> PerformanceIndex {
        let problem = &self.problem;
        let target = &problem.target_trajectories;
        let mut index = PerformanceIndex::default();
        let mut last: Option<&RolloutTrajectory> = None;

        for trajectory in trajectories {
            let n = trajectory.len();
            let mut cost = Vec::with_capacity(n);
            let mut state_input_eq = Vec::with_capacity(n);
            let mut state_eq = Vec::with_capacity(n);
            let mut inequality = Vec::with_capacity(n);

            for k in 0..n {
                let t = trajectory.time_trajectory[k];
                let x = &trajectory.state_trajectory[k];
                let u = &trajectory.input_trajectory[k];
                cost.push(problem.cost.value(t, x, u, target) + problem.state_cost.value(t, x, target));
                state_input_eq.push(problem.equality_constraint.value(t, x, u).norm_squared());
                state_eq.push(problem.state_equality_constraint.value(t, x).norm_squared());
                inequality.push(
                    problem
                        .inequality_constraint
                        .value(t, x, u)
                        .iter()
                        .map(|c| c.min(0.0).powi(2))
                        .sum::<Scalar>(),
                );
            }

            let times = &trajectory.time_trajectory;
            index.total_cost += trapezoidal_integral(times, &cost);
            index.state_input_eq_constraint_ise += trapezoidal_integral(times, &state_input_eq);
            index.state_eq_constraint_ise += trapezoidal_integral(times, &state_eq);
            index.inequality_constraint_ise += trapezoidal_integral(times, &inequality);

            for &post in &trajectory.post_event_indices {
                let t = trajectory.time_trajectory[post - 1];
                let x = &trajectory.state_trajectory[post - 1];
                index.total_cost += problem.pre_jump_cost.value(t, x, target);
                index.state_eq_final_constraint_sse += problem.pre_jump_equality_constraint.value(t, x).norm_squared();
            }
            last = Some(trajectory);
        }

        if let Some((t, x)) = last.and_then(|tr| Some((*tr.time_trajectory.last()?, tr.final_state()?))) {
            index.total_cost += problem.final_cost.value(t, x, target);
            index.state_eq_final_constraint_sse += problem.final_equality_constraint.value(t, x).norm_squared();
        }

        index.update_merit(self.penalty);
        index
    }

    /// Backtracks on the feedforward step of the new controllers. Returns
    /// whether a step was accepted.
    pub(crate) fn apply_line_search(&mut self) -> bool {
        let baseline = self.performance.clone();
        for alpha in self.line_search.step_lengths() {
            let controllers: Vec<LinearController> = self
                .partitions
                .iter()
                .map(|p| p.controller_update.with_step_length(alpha))
                .collect();
            let trajectories = match self.rollout_partitions(&controllers) {
                Ok(trajectories) => trajectories,
                Err(err) => {
                    debug!(alpha, "rollout failed, step rejected: {err}");
                    continue;
                }
            };
            let performance = self.evaluate_performance(&trajectories);
            debug!(alpha, merit = performance.merit, "line search candidate");

            if self.line_search.accepts(&baseline, &performance) {
                for ((partition, controller), trajectory) in
                    self.partitions.iter_mut().zip(controllers).zip(trajectories)
                {
                    partition.controller = controller;
                    partition.nominal = trajectory;
                }
                self.performance = performance;
                return true;
            }
        }
        false
    }

    /// Line search, penalty update and convergence check. Returns `true`
    /// once the iteration loop should stop.
    pub(crate) fn finish_iteration(&mut self, num_issues: usize) -> bool {
        self.num_iterations += 1;
        self.num_numerical_issues = num_issues;

        let previous_merit = self.performance.merit;
        let accepted = self.apply_line_search();
        let merit_change = (self.performance.merit - previous_merit).abs();

        let iteration = self.num_iterations;
        if self.settings.display_info {
            info!(iteration, accepted, num_issues, "{}", self.performance);
        } else {
            debug!(iteration, accepted, num_issues, "{}", self.performance);
        }

        self.penalty *= self.settings.constraint_penalty_increase_rate;
        self.performance.update_merit(self.penalty);
        self.performance_history.push(self.performance.clone());

        let constraints_satisfied =
            self.performance.state_input_eq_constraint_ise <= self.settings.constraint_tolerance;
        let converged = !accepted || (merit_change <= self.settings.min_rel_cost && constraints_satisfied);
        if converged || iteration >= self.settings.max_num_iterations {
            info!(
                iterations = iteration,
                converged,
                "DDP finished: {}",
                self.performance
            );
            return true;
        }
        false
    }

    /// Partition trajectories joined into one, dropping the duplicated
    /// sample at each partition boundary.
    pub fn primal_solution(&self) -> PrimalSolution {
        let mut solution = PrimalSolution::default();
        for partition in &self.partitions {
            let nominal = &partition.nominal;
            let skip = usize::from(!solution.time_trajectory.is_empty() && !nominal.is_empty());
            let offset = solution.time_trajectory.len();
            solution
                .post_event_indices
                .extend(nominal.post_event_indices.iter().map(|&p| offset + p - skip));
            solution.time_trajectory.extend_from_slice(&nominal.time_trajectory[skip..]);
            solution.state_trajectory.extend_from_slice(&nominal.state_trajectory[skip..]);
            solution.input_trajectory.extend_from_slice(&nominal.input_trajectory[skip..]);
            solution.controllers.push(partition.controller.clone());
        }
        solution
    }
}

/// `[t0, interior partitioning times..., tf]` without zero-length intervals.
pub(crate) fn partition_bounds(init_time: Scalar, final_time: Scalar, partitioning_times: &[Scalar]) -> Vec<Scalar> {
    let mut interior: Vec<Scalar> = partitioning_times
        .iter()
        .copied()
        .filter(|&t| t > init_time + PARTITION_TIME_TOLERANCE && t < final_time - PARTITION_TIME_TOLERANCE)
        .collect();
    interior.sort_by(|a, b| a.total_cmp(b));

    let mut bounds = Vec::with_capacity(interior.len() + 2);
    bounds.push(init_time);
    bounds.extend(interior);
    bounds.push(final_time);
    bounds.dedup_by(|later, earlier| (*later - *earlier).abs() <= PARTITION_TIME_TOLERANCE);
    bounds
}

/// `½ μ ‖h‖²` for the state-only equality constraints and `½ μ ‖min(c, 0)‖²`
/// (Gauss-Newton) for the inequality constraints.
pub(crate) fn add_constraint_penalties(model: &mut ModelData, mu: Scalar) {
    model.cost.add_quadratic_penalty(&model.state_eq_constr, mu);
    add_inequality_penalty(&mut model.cost, &model.ineq_constr, mu);
}

fn add_inequality_penalty(
    cost: &mut ScalarFunctionQuadraticApproximation,
    constraint: &VectorFunctionQuadraticApproximation,
    mu: Scalar,
) {
    for i in 0..constraint.rows() {
        let c = constraint.f[i];
        if c >= 0.0 {
            continue;
        }
        let cx = constraint.dfdx.row(i).transpose();
        let cu = constraint.dfdu.row(i).transpose();
        cost.f += 0.5 * mu * c * c;
        cost.dfdx += &cx * (mu * c);
        cost.dfdu += &cu * (mu * c);
        cost.dfdxx += &cx * cx.transpose() * mu;
        cost.dfduu += &cu * cu.transpose() * mu;
        cost.dfdux += &cu * cx.transpose() * mu;
    }
}

/// A DDP variant: the shared iteration plus an algorithm-specific backward
/// pass.
pub trait GaussNewtonDdp {
    fn core(&self) -> &DdpCore;

    fn core_mut(&mut self) -> &mut DdpCore;

    /// Projection, value function and controller update for every
    /// partition. Returns the number of numerical issues found.
    fn backward_pass(&mut self) -> DdpResult<usize>;

    /// Optimizes over `[init_time, final_time]`. The backward pass is split
    /// at `partitioning_times`.
    fn run(
        &mut self,
        init_time: Scalar,
        init_state: &Vector,
        final_time: Scalar,
        partitioning_times: &[Scalar],
    ) -> DdpResult<()> {
        self.core_mut()
            .initialize(init_time, init_state, final_time, partitioning_times)?;
        loop {
            let core = self.core_mut();
            let mut num_issues = 0;
            for partition in 0..core.num_partitions() {
                num_issues += core.approximate_intermediate_lq(partition)?;
            }
            num_issues += core.approximate_final_lq()?;
            num_issues += self.backward_pass()?;
            if self.core_mut().finish_iteration(num_issues) {
                return Ok(());
            }
        }
    }

    fn primal_solution(&self) -> PrimalSolution {
        self.core().primal_solution()
    }

    fn performance_index(&self) -> &PerformanceIndex {
        &self.core().performance
    }

    fn performance_index_history(&self) -> &[PerformanceIndex] {
        &self.core().performance_history
    }

    fn num_iterations(&self) -> usize {
        self.core().num_iterations
    }

    /// Numerical issues reported during the last iteration.
    fn num_numerical_issues(&self) -> usize {
        self.core().num_numerical_issues
    }

    /// Events used by the next call to [`GaussNewtonDdp::run`].
    fn set_mode_schedule(&mut self, mode_schedule: ModeSchedule) {
        self.core_mut().mode_schedule = mode_schedule;
    }
}
