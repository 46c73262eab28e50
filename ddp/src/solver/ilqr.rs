//! Iterative LQR: the backward pass runs the discrete Riccati recursion on
//! the Euler-discretized LQ model.

use std::sync::Arc;

use crate::controller::{check_controller_sample, ControllerSample, LinearController};
use crate::error::{Checked, DdpResult};
use crate::model_data::ModelData;
use crate::problem::OptimalControlProblem;
use crate::riccati::discrete::{discretize, hamiltonian_hessian, riccati_step};
use crate::riccati::{compute_projection_and_riccati_modification, jump_value_function, RiccatiModification};
use crate::search_strategy::HessianCorrectionPolicy;
use crate::settings::{Algorithm, Settings};
use crate::solver::{DdpCore, GaussNewtonDdp, ValueFunctionTrajectory};
use crate::{Matrix, Scalar, Vector};

/// ILQR solver.
pub struct Ilqr {
    core: DdpCore,
}

impl Ilqr {
    pub fn new(settings: Settings, problem: Arc<OptimalControlProblem>) -> DdpResult<Self> {
        Ok(Self {
            core: DdpCore::new(settings, problem, Algorithm::Ilqr)?,
        })
    }

    /// Backward recursion over one partition from the terminal value
    /// `(Sm, Sv, s)`.
    ///
    /// The pre-event sample takes the value through the jump map and reuses
    /// the gains of the post-event sample; the last sample reuses the gains
    /// of the one before it.
    fn solve_partition(&mut self, partition: usize, sm_final: &Matrix, sv_final: &Vector, s_final: Scalar) -> DdpResult<usize> {
        let core = &self.core;
        let data = &core.partitions[partition];
        let nominal = &data.nominal;
        let n = nominal.len();
        if n == 0 {
            return Ok(0);
        }
        let policy = &core.line_search;
        let state_dim = core.problem.state_dim();
        let input_dim = core.problem.input_dim();

        let mut sm = vec![sm_final.clone(); n];
        let mut sv = vec![sv_final.clone(); n];
        let mut s = vec![s_final; n];
        let mut samples: Vec<Option<(ModelData, RiccatiModification, ControllerSample)>> = vec![None; n];
        let mut num_issues = 0;

        for k in (0..n - 1).rev() {
            let time = nominal.time_trajectory[k];
            let state = &nominal.state_trajectory[k];
            let input = &nominal.input_trajectory[k];

            if let Ok(event) = nominal.post_event_indices.binary_search(&(k + 1)) {
                let (sm_pre, sv_pre, s_pre) = jump_value_function(&data.event_model_data[event], &sm[k + 1], &sv[k + 1], s[k + 1]);
                sm[k] = sm_pre;
                sv[k] = sv_pre;
                s[k] = s_pre;
                samples[k] = samples[k + 1]
                    .as_ref()
                    .map(|(projected, modification, sample)| {
                        (projected.clone(), modification.clone(), rebias(sample, state, input))
                    });
                continue;
            }

            let dt = nominal.time_trajectory[k + 1] - time;
            let discrete = discretize(&data.model_data[k], dt);
            let hessian = policy.augment_hamiltonian_hessian(&discrete, &hamiltonian_hessian(&discrete, &sm[k + 1]));
            let checked = compute_projection_and_riccati_modification(&discrete, &hessian, policy);
            let (projected, modification) = core.accept_checked(checked, &mut num_issues)?;

            let step = riccati_step(&projected, &modification, &sm[k + 1], &sv[k + 1], s[k + 1]);
            let qu = &modification.constraint_null_projector;
            let gain = -&projected.state_input_eq_constr.dfdx - qu * &step.gm;
            let delta_bias = -&projected.state_input_eq_constr.f - qu * &step.gv;
            let bias = input - &gain * state;
            let sample = ControllerSample { gain, bias, delta_bias };
            let issues = check_controller_sample(time, &sample);
            let sample = core.accept_checked(Checked::with_issues(sample, issues), &mut num_issues)?;

            sm[k] = step.sm;
            sv[k] = step.sv;
            s[k] = step.s;
            samples[k] = Some((projected, modification, sample));
        }

        let last = n - 1;
        samples[last] = last
            .checked_sub(1)
            .and_then(|k| samples[k].as_ref())
            .map(|(projected, modification, sample)| {
                (
                    projected.clone(),
                    modification.clone(),
                    rebias(sample, &nominal.state_trajectory[last], &nominal.input_trajectory[last]),
                )
            });

        let mut projected_model_data = Vec::with_capacity(n);
        let mut riccati_modifications = Vec::with_capacity(n);
        let mut gains = Vec::with_capacity(n);
        let mut biases = Vec::with_capacity(n);
        let mut delta_biases = Vec::with_capacity(n);
        for (k, entry) in samples.into_iter().enumerate() {
            match entry {
                Some((projected, modification, sample)) => {
                    projected_model_data.push(projected);
                    riccati_modifications.push(modification);
                    gains.push(sample.gain);
                    biases.push(sample.bias);
                    delta_biases.push(sample.delta_bias);
                }
                // single-sample partition: hold the nominal input
                None => {
                    projected_model_data.push(data.model_data[k].clone());
                    riccati_modifications.push(RiccatiModification::identity(data.model_data[k].time, state_dim, input_dim));
                    gains.push(Matrix::zeros(input_dim, state_dim));
                    biases.push(nominal.input_trajectory[k].clone());
                    delta_biases.push(Vector::zeros(input_dim));
                }
            }
        }

        let value_function = ValueFunctionTrajectory {
            time_trajectory: nominal.time_trajectory.clone(),
            sm,
            sv,
            s,
            post_event_indices: nominal.post_event_indices.clone(),
        };
        let controller = LinearController::new(nominal.time_trajectory.clone(), gains, biases, delta_biases)?;

        let data = &mut self.core.partitions[partition];
        data.projected_model_data = projected_model_data;
        data.riccati_modifications = riccati_modifications;
        data.value_function = value_function;
        data.controller_update = controller;
        Ok(num_issues)
    }
}

/// Same gains around another nominal sample.
fn rebias(sample: &ControllerSample, state: &Vector, input: &Vector) -> ControllerSample {
    ControllerSample {
        bias: input - &sample.gain * state,
        gain: sample.gain.clone(),
        delta_bias: sample.delta_bias.clone(),
    }
}

impl GaussNewtonDdp for Ilqr {
    fn core(&self) -> &DdpCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut DdpCore {
        &mut self.core
    }

    fn backward_pass(&mut self) -> DdpResult<usize> {
        let final_cost = &self.core.final_model.cost;
        let (mut sm, mut sv, mut s) = (final_cost.dfdxx.clone(), final_cost.dfdx.clone(), final_cost.f);
        let mut num_issues = 0;
        for partition in (0..self.core.partitions.len()).rev() {
            num_issues += self.solve_partition(partition, &sm, &sv, s)?;
            if let Some(start) = self.core.partitions[partition].value_function.start() {
                (sm, sv, s) = start;
            }
        }
        Ok(num_issues)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hessian_correction::Strategy;
    use crate::problem::{LinearSystemDynamics, QuadraticStateInputCost, TargetTrajectories};
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_scalar_regulator() {
        // ẋ = u, cost ½(x² + u²): the stationary gain is -1
        let dynamics = LinearSystemDynamics::new(Matrix::zeros(1, 1), Matrix::identity(1, 1));
        let target = TargetTrajectories::constant(Vector::zeros(1), Vector::zeros(1));
        let mut problem = OptimalControlProblem::new(Box::new(dynamics), target);
        problem
            .cost
            .add("quadratic", Box::new(QuadraticStateInputCost::new(Matrix::identity(1, 1), Matrix::identity(1, 1))))
            .unwrap();

        let mut settings = Settings {
            algorithm: Algorithm::Ilqr,
            ..Settings::default()
        };
        settings.line_search.hessian_correction_strategy = Strategy::EigenvalueModification;
        let mut ilqr = Ilqr::new(settings, Arc::new(problem)).unwrap();
        ilqr.run(0.0, &Vector::from_element(1, 1.0), 10.0, &[]).unwrap();

        let solution = ilqr.primal_solution();
        let gain = solution.controllers[0].gain_array[0][(0, 0)];
        assert_abs_diff_eq!(gain, -1.0, epsilon = 1e-2);
        // optimal cost ½ x0² P with P = 1
        assert_abs_diff_eq!(ilqr.performance_index().total_cost, 0.5, epsilon = 1e-2);
        assert!(ilqr.num_iterations() >= 1);
    }
}
