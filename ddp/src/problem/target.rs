use crate::error::{DdpError, DdpResult};
use crate::interpolation::interpolate_at;
use crate::{Scalar, Vector};

/// Reference states and inputs the cost terms track.
#[derive(Debug, Clone, PartialEq)]
pub struct TargetTrajectories {
    time_trajectory: Vec<Scalar>,
    state_trajectory: Vec<Vector>,
    input_trajectory: Vec<Vector>,
}

impl TargetTrajectories {
    pub fn new(
        time_trajectory: Vec<Scalar>,
        state_trajectory: Vec<Vector>,
        input_trajectory: Vec<Vector>,
    ) -> DdpResult<Self> {
        if time_trajectory.is_empty() {
            return Err(DdpError::DimensionMismatch {
                what: "target time trajectory",
                expected: 1,
                actual: 0,
            });
        }
        for (what, len) in [
            ("target state trajectory", state_trajectory.len()),
            ("target input trajectory", input_trajectory.len()),
        ] {
            if len != time_trajectory.len() {
                return Err(DdpError::DimensionMismatch {
                    what,
                    expected: time_trajectory.len(),
                    actual: len,
                });
            }
        }
        Ok(Self {
            time_trajectory,
            state_trajectory,
            input_trajectory,
        })
    }

    /// A single set point held over the whole horizon.
    pub fn constant(state: Vector, input: Vector) -> Self {
        Self {
            time_trajectory: vec![0.0],
            state_trajectory: vec![state],
            input_trajectory: vec![input],
        }
    }

    pub fn desired_state(&self, time: Scalar) -> Vector {
        interpolate_at(time, &self.time_trajectory, &self.state_trajectory)
    }

    pub fn desired_input(&self, time: Scalar) -> Vector {
        interpolate_at(time, &self.time_trajectory, &self.input_trajectory)
    }

    pub fn time_trajectory(&self) -> &[Scalar] {
        &self.time_trajectory
    }
}
