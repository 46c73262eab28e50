//! Time-varying affine feedback law and its synthesis from the value function.

use std::ops::Range;

use tracing::warn;

use crate::error::{Checked, DdpError, DdpResult, NumericalIssue};
use crate::interpolation::{interpolate, time_segment, time_segment_in};
use crate::model_data::ModelData;
use crate::riccati::RiccatiModification;
use crate::{Matrix, Scalar, Vector};

/// `u(t, x) = bias(t) + K(t) x`, with a feedforward increment `delta_bias`
/// scaled by the line search.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LinearController {
    pub time_stamps: Vec<Scalar>,
    pub gain_array: Vec<Matrix>,
    pub bias_array: Vec<Vector>,
    pub delta_bias_array: Vec<Vector>,
}

impl LinearController {
    pub fn new(
        time_stamps: Vec<Scalar>,
        gain_array: Vec<Matrix>,
        bias_array: Vec<Vector>,
        delta_bias_array: Vec<Vector>,
    ) -> DdpResult<Self> {
        let expected = time_stamps.len();
        for (what, actual) in [
            ("controller gain array", gain_array.len()),
            ("controller bias array", bias_array.len()),
            ("controller delta bias array", delta_bias_array.len()),
        ] {
            if actual != expected {
                return Err(DdpError::DimensionMismatch { what, expected, actual });
            }
        }
        Ok(Self {
            time_stamps,
            gain_array,
            bias_array,
            delta_bias_array,
        })
    }

    /// Open-loop controller replaying `inputs`.
    pub fn feedforward(time_stamps: Vec<Scalar>, inputs: Vec<Vector>, state_dim: usize) -> Self {
        let gain_array = inputs.iter().map(|u| Matrix::zeros(u.len(), state_dim)).collect();
        let delta_bias_array = inputs.iter().map(|u| Vector::zeros(u.len())).collect();
        Self {
            time_stamps,
            gain_array,
            bias_array: inputs,
            delta_bias_array,
        }
    }

    pub fn len(&self) -> usize {
        self.time_stamps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.time_stamps.is_empty()
    }

    /// # Panics
    /// If the controller is empty.
    pub fn compute_input(&self, time: Scalar, state: &Vector) -> Vector {
        let ia = time_segment(time, &self.time_stamps);
        let gain: Matrix = interpolate(ia, &self.gain_array, |k| k);
        let bias: Vector = interpolate(ia, &self.bias_array, |b| b);
        bias + gain * state
    }

    /// Controller with the feedforward step `alpha` folded into the bias.
    pub fn with_step_length(&self, alpha: Scalar) -> Self {
        let bias_array = self
            .bias_array
            .iter()
            .zip(&self.delta_bias_array)
            .map(|(bias, delta)| bias + delta * alpha)
            .collect();
        Self {
            time_stamps: self.time_stamps.clone(),
            gain_array: self.gain_array.clone(),
            bias_array,
            delta_bias_array: self.delta_bias_array.clone(),
        }
    }
}

/// One sample of the synthesized controller.
#[derive(Debug, Clone, PartialEq)]
pub struct ControllerSample {
    pub gain: Matrix,
    pub bias: Vector,
    pub delta_bias: Vector,
}

/// Nominal trajectory and backward pass data of one partition, read by the
/// gain synthesis.
#[derive(Debug, Clone, Copy)]
pub struct GainSynthesisData<'a> {
    pub time_trajectory: &'a [Scalar],
    pub state_trajectory: &'a [Vector],
    pub input_trajectory: &'a [Vector],
    pub projected_model_data: &'a [ModelData],
    pub riccati_modifications: &'a [RiccatiModification],
}

/// Feedback and feedforward at `time` from the value function `(sm, sv)`.
///
/// `segment` is the range of nominal samples between the surrounding events.
///
/// ```text
/// K     = -ΔC + Qu (-(Pm' + ΔGm) - B'ᵀ Sm)
/// bias  = u_nom - K x_nom
/// δbias = -ΔE + Qu (-(Rv' + ΔGv) - B'ᵀ Sv)
/// ```
pub fn compute_controller_sample(
    data: &GainSynthesisData<'_>,
    segment: Range<usize>,
    time: Scalar,
    sm: &Matrix,
    sv: &Vector,
) -> Checked<ControllerSample> {
    let ia = time_segment_in(time, data.time_trajectory, segment);
    let nominal_state: Vector = interpolate(ia, data.state_trajectory, |x| x);
    let nominal_input: Vector = interpolate(ia, data.input_trajectory, |u| u);

    let projected = data.projected_model_data;
    let modifications = data.riccati_modifications;
    let bm: Matrix = interpolate(ia, projected, |d| &d.dynamics.dfdu);
    let pm: Matrix = interpolate(ia, projected, |d| &d.cost.dfdux);
    let rv: Vector = interpolate(ia, projected, |d| &d.cost.dfdu);
    let delta_e: Vector = interpolate(ia, projected, |d| &d.state_input_eq_constr.f);
    let delta_c: Matrix = interpolate(ia, projected, |d| &d.state_input_eq_constr.dfdx);
    let qu: Matrix = interpolate(ia, modifications, |m| &m.constraint_null_projector);
    let delta_gm: Matrix = interpolate(ia, modifications, |m| &m.delta_gm);
    let delta_gv: Vector = interpolate(ia, modifications, |m| &m.delta_gv);

    let projected_km = -(pm + delta_gm) - bm.transpose() * sm;
    let projected_lv = -(rv + delta_gv) - bm.transpose() * sv;

    let gain = -delta_c + &qu * projected_km;
    let bias = &nominal_input - &gain * &nominal_state;
    let delta_bias = -delta_e + &qu * projected_lv;

    let sample = ControllerSample { gain, bias, delta_bias };
    let issues = check_controller_sample(time, &sample);
    Checked::with_issues(sample, issues)
}

/// Feedback gain and feedforward must be finite.
pub fn check_controller_sample(time: Scalar, sample: &ControllerSample) -> Vec<NumericalIssue> {
    let mut issues = Vec::new();
    if !sample.gain.iter().all(|v| v.is_finite()) {
        let issue = NumericalIssue::UnstableFeedbackGain { time };
        warn!(time, "{issue}");
        issues.push(issue);
    }
    if !sample.delta_bias.iter().all(|v| v.is_finite()) {
        let issue = NumericalIssue::UnstableFeedforward { time };
        warn!(time, "{issue}");
        issues.push(issue);
    }
    issues
}
