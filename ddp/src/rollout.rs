//! Closed-loop forward simulation.

use tracing::trace;

use crate::controller::LinearController;
use crate::error::{DdpError, DdpResult};
use crate::integrator::{new_integrator, Integrator, Observer};
use crate::problem::SystemDynamics;
use crate::settings::RolloutSettings;
use crate::{Scalar, Vector};

/// Sampled state-input trajectory of one partition.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RolloutTrajectory {
    pub time_trajectory: Vec<Scalar>,
    pub state_trajectory: Vec<Vector>,
    pub input_trajectory: Vec<Vector>,
    /// Index of the first sample after each event. The sample before it has
    /// the same time and holds the pre-jump state.
    pub post_event_indices: Vec<usize>,
}

impl RolloutTrajectory {
    pub fn len(&self) -> usize {
        self.time_trajectory.len()
    }

    pub fn is_empty(&self) -> bool {
        self.time_trajectory.is_empty()
    }

    pub fn final_state(&self) -> Option<&Vector> {
        self.state_trajectory.last()
    }

    /// Ranges of samples between consecutive events.
    pub fn segments(&self) -> Vec<std::ops::Range<usize>> {
        event_segments(&self.post_event_indices, self.len())
    }
}

/// Splits `0..len` at the post-event indices.
pub fn event_segments(post_event_indices: &[usize], len: usize) -> Vec<std::ops::Range<usize>> {
    let mut bounds = Vec::with_capacity(post_event_indices.len() + 2);
    bounds.push(0);
    bounds.extend_from_slice(post_event_indices);
    bounds.push(len);
    bounds.windows(2).map(|w| w[0]..w[1]).collect()
}

/// Integrates the closed loop on a uniform time grid and applies the jump
/// map at the given event times.
pub struct TimeTriggeredRollout {
    settings: RolloutSettings,
    integrator: Box<dyn Integrator>,
}

impl TimeTriggeredRollout {
    pub fn new(settings: RolloutSettings) -> Self {
        Self {
            integrator: new_integrator(settings.integrator_type),
            settings,
        }
    }

    pub fn settings(&self) -> &RolloutSettings {
        &self.settings
    }

    /// `event_times` must lie strictly inside `(init_time, final_time)`.
    pub fn run(
        &self,
        dynamics: &dyn SystemDynamics,
        controller: &LinearController,
        init_time: Scalar,
        init_state: &Vector,
        final_time: Scalar,
        event_times: &[Scalar],
    ) -> DdpResult<RolloutTrajectory> {
        if controller.is_empty() {
            return Err(DdpError::DimensionMismatch {
                what: "rollout controller",
                expected: 1,
                actual: 0,
            });
        }

        let mut switching_times = Vec::with_capacity(event_times.len() + 2);
        switching_times.push(init_time);
        switching_times.extend(event_times.iter().copied().filter(|&t| t > init_time && t < final_time));
        switching_times.push(final_time);

        let mut trajectory = RolloutTrajectory::default();
        let mut state = init_state.clone();
        let num_intervals = switching_times.len() - 1;

        for (i, window) in switching_times.windows(2).enumerate() {
            let (begin, end) = (window[0], window[1]);
            let times = uniform_grid(begin, end, self.settings.time_step);
            let max_num_steps =
                (self.settings.max_num_steps_per_second as Scalar * (end - begin).max(1.0)) as usize;

            let mut closed_loop = |t: Scalar, x: &Vector| dynamics.flow_map(t, x, &controller.compute_input(t, x));
            let mut observer = Observer::new();
            self.integrator.integrate_times(
                &mut closed_loop,
                &mut observer,
                &state,
                &times,
                self.settings.time_step,
                self.settings.abs_tol_ode,
                self.settings.rel_tol_ode,
                max_num_steps,
            )?;

            let (observed_times, observed_states) = observer.into_parts();
            for (t, x) in observed_times.into_iter().zip(observed_states) {
                trajectory.input_trajectory.push(controller.compute_input(t, &x));
                trajectory.time_trajectory.push(t);
                trajectory.state_trajectory.push(x);
            }

            if let (Some(pre_state), Some(pre_input)) =
                (trajectory.state_trajectory.last(), trajectory.input_trajectory.last())
            {
                state = if i + 1 < num_intervals {
                    trace!(time = end, "applying jump map");
                    trajectory.post_event_indices.push(trajectory.time_trajectory.len());
                    dynamics.jump_map(end, pre_state, pre_input)
                } else {
                    pre_state.clone()
                };
            }
        }
        Ok(trajectory)
    }
}

/// `begin, begin + dt, ..., end`, with the last interval shortened.
pub fn uniform_grid(begin: Scalar, end: Scalar, dt: Scalar) -> Vec<Scalar> {
    let n = ((end - begin) / dt).ceil().max(1.0) as usize;
    let mut times: Vec<Scalar> = (0..n).map(|k| begin + k as Scalar * dt).collect();
    // drop a sample that would sit within rounding of the end
    if let Some(&last) = times.last() {
        if n > 1 && end - last < 1e-9 * dt {
            times.pop();
        }
    }
    times.push(end);
    times
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::problem::LinearSystemDynamics;
    use crate::Matrix;
    use approx::assert_abs_diff_eq;

    fn zero_input_controller() -> LinearController {
        LinearController::feedforward(vec![0.0, 1.0], vec![Vector::zeros(1); 2], 1)
    }

    #[test]
    fn test_uniform_grid() {
        let grid = uniform_grid(0.0, 1.0, 0.3);
        assert_eq!(grid.len(), 5);
        assert_abs_diff_eq!(grid[3], 0.9, epsilon = 1e-12);
        assert_eq!(*grid.last().unwrap(), 1.0);
        assert_eq!(uniform_grid(0.0, 1.0, 0.25).len(), 5);
    }

    #[test]
    fn test_rollout_without_events() {
        let dynamics = LinearSystemDynamics::new(Matrix::from_element(1, 1, -1.0), Matrix::zeros(1, 1));
        let rollout = TimeTriggeredRollout::new(RolloutSettings::default());
        let trajectory = rollout
            .run(&dynamics, &zero_input_controller(), 0.0, &Vector::from_element(1, 1.0), 1.0, &[])
            .unwrap();
        assert_eq!(trajectory.len(), 101);
        assert!(trajectory.post_event_indices.is_empty());
        assert_abs_diff_eq!(trajectory.final_state().unwrap()[0], (-1.0_f64).exp(), epsilon = 1e-8);
        assert_eq!(trajectory.segments(), vec![0..101]);
    }

    #[test]
    fn test_rollout_applies_jump_map() {
        let dynamics = LinearSystemDynamics::new(Matrix::zeros(1, 1), Matrix::zeros(1, 1))
            .with_jump_map(Matrix::from_element(1, 1, 2.0), Matrix::zeros(1, 1));
        let rollout = TimeTriggeredRollout::new(RolloutSettings {
            time_step: 0.1,
            ..RolloutSettings::default()
        });
        let trajectory = rollout
            .run(&dynamics, &zero_input_controller(), 0.0, &Vector::from_element(1, 1.0), 1.0, &[0.5])
            .unwrap();

        assert_eq!(trajectory.post_event_indices.len(), 1);
        let p = trajectory.post_event_indices[0];
        assert_eq!(trajectory.time_trajectory[p - 1], 0.5);
        assert_eq!(trajectory.time_trajectory[p], 0.5);
        assert_abs_diff_eq!(trajectory.state_trajectory[p - 1][0], 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(trajectory.state_trajectory[p][0], 2.0, epsilon = 1e-12);
        assert_eq!(trajectory.segments(), vec![0..p, p..trajectory.len()]);
    }
}
