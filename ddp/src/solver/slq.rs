//! Sequential linear quadratic: the backward pass integrates the continuous
//! Riccati equations.

use std::ops::Range;
use std::sync::Arc;

use tracing::debug;

use crate::controller::{compute_controller_sample, GainSynthesisData, LinearController};
use crate::error::{DdpError, DdpResult};
use crate::integrator::{new_integrator, Integrator, Observer, OdeSystem};
use crate::problem::OptimalControlProblem;
use crate::riccati::{compute_projection_and_riccati_modification, ContinuousTimeRiccatiEquations, RiccatiPartitionData};
use crate::rollout::{event_segments, RolloutTrajectory};
use crate::search_strategy::HessianCorrectionPolicy;
use crate::settings::{Algorithm, IntegratorType, Settings};
use crate::solver::{DdpCore, GaussNewtonDdp, ValueFunctionTrajectory};
use crate::{Matrix, Scalar, Vector};

/// SLQ solver.
///
/// ```no_run
/// # use std::sync::Arc;
/// # use ddp::{GaussNewtonDdp, OptimalControlProblem, Settings, Slq, Vector};
/// # fn solve(problem: OptimalControlProblem) -> ddp::DdpResult<()> {
/// let mut slq = Slq::new(Settings::default(), Arc::new(problem))?;
/// slq.run(0.0, &Vector::from_vec(vec![1.0, 0.0]), 10.0, &[0.0, 5.0, 10.0])?;
/// println!("{}", slq.performance_index());
/// # Ok(())
/// # }
/// ```
pub struct Slq {
    core: DdpCore,
    integrator_stock: Vec<Box<dyn Integrator>>,
}

impl Slq {
    pub fn new(settings: Settings, problem: Arc<OptimalControlProblem>) -> DdpResult<Self> {
        let integrator_type = settings.backward_pass_integrator_type;
        if integrator_type == IntegratorType::Euler {
            return Err(DdpError::UnsupportedIntegrator(integrator_type));
        }
        let core = DdpCore::new(settings, problem, Algorithm::Slq)?;
        let integrator_stock = (0..core.thread_pool.num_workers())
            .map(|_| new_integrator(integrator_type))
            .collect();
        Ok(Self { core, integrator_stock })
    }

    /// Integrates every partition backwards from the terminal value,
    /// handing the value at each partition start to the partition before
    /// it. Returns the cost-to-go at the start of the horizon.
    pub fn solve_sequential_riccati_equations(
        &mut self,
        sm_final: &Matrix,
        sv_final: &Vector,
        s_final: Scalar,
    ) -> DdpResult<Scalar> {
        let (mut sm, mut sv, mut s) = (sm_final.clone(), sv_final.clone(), s_final);
        for partition in (0..self.core.partitions.len()).rev() {
            let value_function = self.riccati_equations_worker(0, partition, &sm, &sv, s)?;
            if let Some(start) = value_function.start() {
                (sm, sv, s) = start;
            }
            self.core.partitions[partition].value_function = value_function;
        }
        Ok(s)
    }

    /// Integrates all partitions concurrently, each from its own terminal
    /// value `(Sm, Sv, s)`.
    pub fn solve_riccati_equations_parallel(&mut self, finals: &[(Matrix, Vector, Scalar)]) -> DdpResult<()> {
        if finals.len() != self.core.partitions.len() {
            return Err(DdpError::DimensionMismatch {
                what: "partition final values",
                expected: self.core.partitions.len(),
                actual: finals.len(),
            });
        }
        let value_functions = self.core.thread_pool.sweep(finals.len(), |worker, partition| {
            let (sm, sv, s) = &finals[partition];
            self.riccati_equations_worker(worker, partition, sm, sv, *s)
        })?;
        for (partition, value_function) in self.core.partitions.iter_mut().zip(value_functions) {
            partition.value_function = value_function;
        }
        Ok(())
    }

    /// Value function of one partition, integrated on the worker's own
    /// integrator and equations instance.
    pub fn riccati_equations_worker(
        &self,
        worker: usize,
        partition: usize,
        sm_final: &Matrix,
        sv_final: &Vector,
        s_final: Scalar,
    ) -> DdpResult<ValueFunctionTrajectory> {
        let data = &self.core.partitions[partition];
        let nominal = &data.nominal;
        if nominal.is_empty() {
            return Ok(ValueFunctionTrajectory::default());
        }

        let settings = &self.core.settings;
        let mut equations = ContinuousTimeRiccatiEquations::new(
            RiccatiPartitionData {
                time_trajectory: &nominal.time_trajectory,
                projected_model_data: &data.projected_model_data,
                post_event_indices: &nominal.post_event_indices,
                event_model_data: &data.event_model_data,
                riccati_modifications: &data.riccati_modifications,
            },
            settings.pre_compute_riccati_terms,
            settings.risk_sensitive_coeff,
        );
        let integrator = self.integrator_stock[worker % self.integrator_stock.len()].as_ref();
        let final_value = ContinuousTimeRiccatiEquations::convert_to_vector(sm_final, sv_final, s_final);

        let (time_trajectory, packed, post_event_indices) = if settings.use_nominal_time_for_backward_pass {
            let packed = integrate_nominal_time(
                integrator,
                &mut equations,
                nominal,
                final_value,
                settings,
                self.max_num_steps(nominal),
            )?;
            (nominal.time_trajectory.clone(), packed, nominal.post_event_indices.clone())
        } else {
            self.integrate_riccati_equation_adaptive_time(integrator, &mut equations, nominal, final_value)?
        };
        debug!(
            partition,
            samples = time_trajectory.len(),
            function_calls = equations.num_function_calls(),
            "Riccati equations integrated"
        );

        let mut value_function = ValueFunctionTrajectory {
            time_trajectory,
            post_event_indices,
            ..ValueFunctionTrajectory::default()
        };
        for value in &packed {
            let (sm, sv, s) = ContinuousTimeRiccatiEquations::convert_to_matrix(value);
            value_function.sm.push(sm);
            value_function.sv.push(sv);
            value_function.s.push(s);
        }
        Ok(value_function)
    }

    /// Integrates with step size control. The output grid is chosen by the
    /// integrator; event times stay exact switching points.
    fn integrate_riccati_equation_adaptive_time(
        &self,
        integrator: &dyn Integrator,
        equations: &mut ContinuousTimeRiccatiEquations<'_>,
        nominal: &RolloutTrajectory,
        final_value: Vector,
    ) -> DdpResult<(Vec<Scalar>, Vec<Vector>, Vec<usize>)> {
        let settings = &self.core.settings;
        let max_num_steps = self.max_num_steps(nominal);
        let mut normalized_times: Vec<Scalar> = Vec::new();
        let mut normalized_values: Vec<Vector> = Vec::new();
        let mut normalized_post_event_indices = Vec::new();
        let mut initial = final_value;

        for (j, segment) in nominal.segments().into_iter().enumerate().rev() {
            if segment.is_empty() {
                continue;
            }
            let begin = -nominal.time_trajectory[segment.end - 1];
            let end = -nominal.time_trajectory[segment.start];

            equations.set_active_segment(segment);
            let mut observer = Observer::new();
            let last = if end > begin {
                integrator.integrate_adaptive(
                    equations,
                    &mut observer,
                    &initial,
                    begin,
                    end,
                    settings.min_time_step,
                    settings.abs_tol_ode,
                    settings.rel_tol_ode,
                    max_num_steps,
                )?
            } else {
                observer.observe(begin, &initial);
                initial.clone()
            };
            let (times, values) = observer.into_parts();
            normalized_times.extend(times);
            normalized_values.extend(values);

            if j > 0 {
                normalized_post_event_indices.push(normalized_values.len());
                initial = equations.compute_jump_map(end, &last)?;
            }
        }

        // the first sample of each later (normalized) segment holds the
        // pre-jump value, so the post-event sample is the one before it
        let total = normalized_values.len();
        let time_trajectory = normalized_times.iter().rev().map(|tau| -tau).collect();
        normalized_values.reverse();
        let post_event_indices = normalized_post_event_indices
            .iter()
            .rev()
            .map(|&index| total - index)
            .collect();
        Ok((time_trajectory, normalized_values, post_event_indices))
    }

    fn max_num_steps(&self, nominal: &RolloutTrajectory) -> usize {
        let duration = match (nominal.time_trajectory.first(), nominal.time_trajectory.last()) {
            (Some(first), Some(last)) => last - first,
            _ => 0.0,
        };
        (self.core.settings.max_num_steps_per_second as Scalar * duration.max(1.0)) as usize
    }

    /// Null-space projection and Riccati modification at every nominal
    /// sample of `partition`, using the input Hessian of the cost as the
    /// Hamiltonian Hessian.
    fn compute_projections(&mut self, partition: usize) -> DdpResult<usize> {
        let core = &self.core;
        let model_data = &core.partitions[partition].model_data;
        let policy = &core.line_search;
        let results = core.thread_pool.sweep(model_data.len(), |_, k| {
            let model = &model_data[k];
            let hessian = policy.augment_hamiltonian_hessian(model, &model.cost.dfduu);
            Ok(compute_projection_and_riccati_modification(model, &hessian, policy))
        })?;

        let mut num_issues = 0;
        let mut projected_model_data = Vec::with_capacity(results.len());
        let mut riccati_modifications = Vec::with_capacity(results.len());
        for checked in results {
            let (projected, modification) = core.accept_checked(checked, &mut num_issues)?;
            projected_model_data.push(projected);
            riccati_modifications.push(modification);
        }

        let data = &mut self.core.partitions[partition];
        data.projected_model_data = projected_model_data;
        data.riccati_modifications = riccati_modifications;
        Ok(num_issues)
    }

    /// Feedback and feedforward at every value function sample.
    fn compute_controller(&mut self, partition: usize) -> DdpResult<usize> {
        let core = &self.core;
        let data = &core.partitions[partition];
        let value_function = &data.value_function;
        if value_function.is_empty() {
            return Ok(0);
        }

        // value function segment j covers the same interval as nominal segment j.
        // Holds because events on partition boundaries are rejected at initialization.
        let nominal_segments = data.nominal.segments();
        debug_assert_eq!(
            value_function.post_event_indices.len() + 1,
            nominal_segments.len(),
            "value function and nominal trajectory disagree on the events of partition {partition}"
        );
        let mut nominal_segment_of: Vec<Range<usize>> = Vec::with_capacity(value_function.len());
        for (segment, nominal_segment) in event_segments(&value_function.post_event_indices, value_function.len())
            .into_iter()
            .zip(&nominal_segments)
        {
            nominal_segment_of.extend(segment.map(|_| nominal_segment.clone()));
        }
        if nominal_segment_of.len() != value_function.len() {
            return Err(DdpError::DimensionMismatch {
                what: "value function event segments",
                expected: value_function.len(),
                actual: nominal_segment_of.len(),
            });
        }

        let synthesis = GainSynthesisData {
            time_trajectory: &data.nominal.time_trajectory,
            state_trajectory: &data.nominal.state_trajectory,
            input_trajectory: &data.nominal.input_trajectory,
            projected_model_data: &data.projected_model_data,
            riccati_modifications: &data.riccati_modifications,
        };
        let samples = core.thread_pool.sweep(value_function.len(), |_, k| {
            Ok(compute_controller_sample(
                &synthesis,
                nominal_segment_of[k].clone(),
                value_function.time_trajectory[k],
                &value_function.sm[k],
                &value_function.sv[k],
            ))
        })?;

        let mut num_issues = 0;
        let mut gains = Vec::with_capacity(samples.len());
        let mut biases = Vec::with_capacity(samples.len());
        let mut delta_biases = Vec::with_capacity(samples.len());
        for checked in samples {
            let sample = core.accept_checked(checked, &mut num_issues)?;
            gains.push(sample.gain);
            biases.push(sample.bias);
            delta_biases.push(sample.delta_bias);
        }
        let controller = LinearController::new(value_function.time_trajectory.clone(), gains, biases, delta_biases)?;

        self.core.partitions[partition].controller_update = controller;
        Ok(num_issues)
    }
}

/// Right-hand side split into inter-event segments with a jump map between
/// them.
pub(crate) trait SegmentedOdeSystem: OdeSystem {
    fn set_active_segment(&mut self, segment: Range<usize>);
    fn compute_jump_map(&self, tau: Scalar, value: &Vector) -> DdpResult<Vector>;
}

impl SegmentedOdeSystem for ContinuousTimeRiccatiEquations<'_> {
    fn set_active_segment(&mut self, segment: Range<usize>) {
        ContinuousTimeRiccatiEquations::set_active_segment(self, segment);
    }

    fn compute_jump_map(&self, tau: Scalar, value: &Vector) -> DdpResult<Vector> {
        ContinuousTimeRiccatiEquations::compute_jump_map(self, tau, value)
    }
}

/// Integrates on the reversed nominal grid, one inter-event segment at a
/// time. Returns one value per nominal sample, in forward order.
pub(crate) fn integrate_nominal_time<S: SegmentedOdeSystem>(
    integrator: &dyn Integrator,
    system: &mut S,
    nominal: &RolloutTrajectory,
    final_value: Vector,
    settings: &Settings,
    max_num_steps: usize,
) -> DdpResult<Vec<Vector>> {
    let segments = nominal.segments();
    let mut normalized_values: Vec<Vector> = Vec::with_capacity(nominal.len());
    let mut initial = final_value;

    for (j, segment) in segments.iter().enumerate().rev() {
        let normalized_times: Vec<Scalar> = segment
            .clone()
            .rev()
            .map(|k| -nominal.time_trajectory[k])
            .collect();
        let Some(&segment_begin) = normalized_times.last() else {
            continue;
        };

        system.set_active_segment(segment.clone());
        let mut observer = Observer::new();
        let last = integrator.integrate_times(
            &mut *system,
            &mut observer,
            &initial,
            &normalized_times,
            settings.min_time_step,
            settings.abs_tol_ode,
            settings.rel_tol_ode,
            max_num_steps,
        )?;
        let (_, values) = observer.into_parts();
        normalized_values.extend(values);

        if j > 0 {
            initial = system.compute_jump_map(segment_begin, &last)?;
        }
    }

    if normalized_values.len() != nominal.len() {
        return Err(DdpError::TrajectorySizeMismatch {
            expected: nominal.len(),
            actual: normalized_values.len(),
        });
    }
    normalized_values.reverse();
    Ok(normalized_values)
}

impl GaussNewtonDdp for Slq {
    fn core(&self) -> &DdpCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut DdpCore {
        &mut self.core
    }

    fn backward_pass(&mut self) -> DdpResult<usize> {
        let mut num_issues = 0;
        for partition in 0..self.core.partitions.len() {
            num_issues += self.compute_projections(partition)?;
        }

        let final_cost = &self.core.final_model.cost;
        let (sm, sv, s) = (final_cost.dfdxx.clone(), final_cost.dfdx.clone(), final_cost.f);
        let cost_to_go = self.solve_sequential_riccati_equations(&sm, &sv, s)?;
        debug!(cost_to_go, "backward pass finished");

        for partition in 0..self.core.partitions.len() {
            num_issues += self.compute_controller(partition)?;
        }
        Ok(num_issues)
    }
}
