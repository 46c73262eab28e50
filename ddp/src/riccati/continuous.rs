//! Continuous-time Riccati equations of SLQ.
//!
//! Integrated in normalized time `τ = -t`, so the backward pass is a
//! forward integration. With the projected data (primed) and the Riccati
//! modification:
//!
//! ```text
//! Gm = Pm' + ΔGm + B'ᵀ Sm
//! Gv = Rv' + ΔGv + B'ᵀ Sv
//! dSm/dτ = Qm' + ΔQm + A'ᵀ Sm + Sm A' - Gmᵀ Gm  [+ θ Sm Σ Sm]
//! dSv/dτ = Qv' + A'ᵀ Sv + Sm f' - Gmᵀ Gv          [+ θ Sm Σ Sv]
//! ds/dτ  = q' + Svᵀ f' - ½ Gvᵀ Gv                 [+ ½ θ Svᵀ Σ Sv + ½ tr(Σ Sm)]
//! ```
//!
//! The bracketed terms appear for a non-zero risk sensitivity `θ`.

use std::ops::Range;

use crate::error::{DdpError, DdpResult};
use crate::integrator::OdeSystem;
use crate::interpolation::{interpolate, time_segment_in, IndexAlpha};
use crate::linear_algebra::symmetrize;
use crate::model_data::ModelData;
use crate::riccati::{jump_value_function, RiccatiModification};
use crate::{Matrix, Scalar, Vector};

const EVENT_TIME_TOLERANCE: Scalar = 1e-9;

/// Data of one partition the equations are evaluated on.
#[derive(Debug, Clone, Copy)]
pub struct RiccatiPartitionData<'a> {
    pub time_trajectory: &'a [Scalar],
    pub projected_model_data: &'a [ModelData],
    /// Index of the first sample after each event.
    pub post_event_indices: &'a [usize],
    /// Jump map and pre-jump cost approximation, one per event.
    pub event_model_data: &'a [ModelData],
    pub riccati_modifications: &'a [RiccatiModification],
}

/// Coefficients of the right-hand side at one sample.
#[derive(Debug, Clone)]
struct RiccatiTerms {
    q: Scalar,
    qv: Vector,
    qm: Matrix,
    am: Matrix,
    bm: Matrix,
    f: Vector,
    pm: Matrix,
    rv: Vector,
    covariance: Matrix,
}

impl RiccatiTerms {
    fn new(projected: &ModelData, modification: &RiccatiModification) -> Self {
        Self {
            q: projected.cost.f,
            qv: projected.cost.dfdx.clone(),
            qm: &projected.cost.dfdxx + &modification.delta_qm,
            am: projected.dynamics.dfdx.clone(),
            bm: projected.dynamics.dfdu.clone(),
            f: projected.dynamics.f.clone(),
            pm: &projected.cost.dfdux + &modification.delta_gm,
            rv: &projected.cost.dfdu + &modification.delta_gv,
            covariance: projected.dynamics_covariance.clone(),
        }
    }

    fn interpolated(ia: IndexAlpha, terms: &[RiccatiTerms]) -> Self {
        Self {
            q: interpolate(ia, terms, |t| &t.q),
            qv: interpolate(ia, terms, |t| &t.qv),
            qm: interpolate(ia, terms, |t| &t.qm),
            am: interpolate(ia, terms, |t| &t.am),
            bm: interpolate(ia, terms, |t| &t.bm),
            f: interpolate(ia, terms, |t| &t.f),
            pm: interpolate(ia, terms, |t| &t.pm),
            rv: interpolate(ia, terms, |t| &t.rv),
            covariance: interpolate(ia, terms, |t| &t.covariance),
        }
    }

    /// Interpolates the raw records and assembles the terms afterwards.
    fn from_raw(ia: IndexAlpha, projected: &[ModelData], modifications: &[RiccatiModification]) -> Self {
        let delta_qm: Matrix = interpolate(ia, modifications, |m| &m.delta_qm);
        let delta_gm: Matrix = interpolate(ia, modifications, |m| &m.delta_gm);
        let delta_gv: Vector = interpolate(ia, modifications, |m| &m.delta_gv);
        let qm: Matrix = interpolate(ia, projected, |d| &d.cost.dfdxx);
        let pm: Matrix = interpolate(ia, projected, |d| &d.cost.dfdux);
        let rv: Vector = interpolate(ia, projected, |d| &d.cost.dfdu);
        Self {
            q: interpolate(ia, projected, |d| &d.cost.f),
            qv: interpolate(ia, projected, |d| &d.cost.dfdx),
            qm: qm + delta_qm,
            am: interpolate(ia, projected, |d| &d.dynamics.dfdx),
            bm: interpolate(ia, projected, |d| &d.dynamics.dfdu),
            f: interpolate(ia, projected, |d| &d.dynamics.f),
            // the bracketing samples may differ in reduced input dimension
            pm: if pm.shape() == delta_gm.shape() { pm + delta_gm } else { pm },
            rv: if rv.len() == delta_gv.len() { rv + delta_gv } else { rv },
            covariance: interpolate(ia, projected, |d| &d.dynamics_covariance),
        }
    }
}

/// Right-hand side and jump map of the Riccati equations for one partition.
///
/// Configured once at construction; every worker owns its own instance.
pub struct ContinuousTimeRiccatiEquations<'a> {
    data: RiccatiPartitionData<'a>,
    risk_sensitive_coeff: Scalar,
    precomputed: Option<Vec<RiccatiTerms>>,
    segment: Range<usize>,
    num_function_calls: usize,
}

impl<'a> ContinuousTimeRiccatiEquations<'a> {
    /// With `pre_compute_riccati_terms` the per-sample coefficients are
    /// assembled once here instead of at every evaluation.
    pub fn new(data: RiccatiPartitionData<'a>, pre_compute_riccati_terms: bool, risk_sensitive_coeff: Scalar) -> Self {
        let precomputed = pre_compute_riccati_terms.then(|| {
            data.projected_model_data
                .iter()
                .zip(data.riccati_modifications)
                .map(|(projected, modification)| RiccatiTerms::new(projected, modification))
                .collect()
        });
        Self {
            segment: 0..data.time_trajectory.len(),
            data,
            risk_sensitive_coeff,
            precomputed,
            num_function_calls: 0,
        }
    }

    pub fn is_risk_sensitive(&self) -> bool {
        self.risk_sensitive_coeff != 0.0
    }

    pub fn num_function_calls(&self) -> usize {
        self.num_function_calls
    }

    /// Restricts interpolation to the samples of one inter-event segment, so
    /// queries at an event time pick the correct side of the jump.
    pub fn set_active_segment(&mut self, segment: Range<usize>) {
        self.segment = segment;
    }

    /// Packs `(Sm, Sv, s)`: the upper triangle of `Sm` column by column,
    /// then `Sv`, then `s`.
    pub fn convert_to_vector(sm: &Matrix, sv: &Vector, s: Scalar) -> Vector {
        let n = sv.len();
        let mut packed = Vector::zeros(packed_len(n));
        let mut k = 0;
        for j in 0..n {
            for i in 0..=j {
                packed[k] = sm[(i, j)];
                k += 1;
            }
        }
        packed.rows_mut(k, n).copy_from(sv);
        packed[k + n] = s;
        packed
    }

    /// Inverse of [`Self::convert_to_vector`].
    pub fn convert_to_matrix(packed: &Vector) -> (Matrix, Vector, Scalar) {
        let n = state_dim_from_packed_len(packed.len());
        let mut sm = Matrix::zeros(n, n);
        let mut k = 0;
        for j in 0..n {
            for i in 0..=j {
                sm[(i, j)] = packed[k];
                sm[(j, i)] = packed[k];
                k += 1;
            }
        }
        let sv = packed.rows(k, n).into_owned();
        (sm, sv, packed[k + n])
    }

    /// Time derivative of the packed value function at normalized time `tau`.
    pub fn compute_flow_map(&mut self, tau: Scalar, packed: &Vector) -> Vector {
        self.num_function_calls += 1;
        let terms = self.terms_at(-tau);
        let (sm, sv, _) = Self::convert_to_matrix(packed);

        let bm_t = terms.bm.transpose();
        let gm = &terms.pm + &bm_t * &sm;
        let gv = &terms.rv + &bm_t * &sv;
        let gm_t = gm.transpose();

        let mut dsm = &terms.qm + terms.am.transpose() * &sm + &sm * &terms.am - &gm_t * &gm;
        let mut dsv = &terms.qv + terms.am.transpose() * &sv + &sm * &terms.f - &gm_t * &gv;
        let mut ds = terms.q + sv.dot(&terms.f) - 0.5 * gv.dot(&gv);

        if self.is_risk_sensitive() {
            let theta = self.risk_sensitive_coeff;
            let sigma_sm = &terms.covariance * &sm;
            let sigma_sv = &terms.covariance * &sv;
            dsm += &sm * &sigma_sm * theta;
            dsv += &sm * &sigma_sv * theta;
            ds += 0.5 * theta * sv.dot(&sigma_sv) + 0.5 * sigma_sm.trace();
        }

        Self::convert_to_vector(&symmetrize(&dsm), &dsv, ds)
    }

    /// Maps the value function from just after the event at normalized time
    /// `tau` to just before it.
    ///
    /// ```text
    /// Sm⁻ = Qmₑ + Gᵀ Sm G,   Sv⁻ = Qvₑ + Gᵀ Sv,   s⁻ = qₑ + s
    /// ```
    pub fn compute_jump_map(&self, tau: Scalar, packed: &Vector) -> DdpResult<Vector> {
        let time = -tau;
        let event = self
            .data
            .post_event_indices
            .iter()
            .position(|&index| {
                let event_time = self.data.time_trajectory[index];
                (event_time - time).abs() <= EVENT_TIME_TOLERANCE * time.abs().max(1.0)
            })
            .ok_or(DdpError::UnknownEvent { time })?;
        let jump = self
            .data
            .event_model_data
            .get(event)
            .ok_or(DdpError::UnknownEvent { time })?;

        let (sm, sv, s) = Self::convert_to_matrix(packed);
        let (sm_pre, sv_pre, s_pre) = jump_value_function(jump, &sm, &sv, s);
        Ok(Self::convert_to_vector(&sm_pre, &sv_pre, s_pre))
    }

    fn terms_at(&self, time: Scalar) -> RiccatiTerms {
        let ia = time_segment_in(time, self.data.time_trajectory, self.segment.clone());
        match &self.precomputed {
            Some(terms) => RiccatiTerms::interpolated(ia, terms),
            None => RiccatiTerms::from_raw(ia, self.data.projected_model_data, self.data.riccati_modifications),
        }
    }
}

impl OdeSystem for ContinuousTimeRiccatiEquations<'_> {
    fn derivative(&mut self, time: Scalar, state: &Vector) -> Vector {
        self.compute_flow_map(time, state)
    }
}

/// Length of the packed value function for state dimension `n`.
pub fn packed_len(n: usize) -> usize {
    n * (n + 1) / 2 + n + 1
}

fn state_dim_from_packed_len(len: usize) -> usize {
    let mut n = 0;
    while packed_len(n) < len {
        n += 1;
    }
    n
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn modification(n: usize, m: usize) -> RiccatiModification {
        RiccatiModification::identity(0.0, n, m)
    }

    /// Scalar integrator `ẋ = u` with cost `½(q x² + u²)`.
    fn scalar_problem(time: Scalar, q: Scalar) -> ModelData {
        let mut data = ModelData::new(time, 1, 1);
        data.dynamics.dfdu = Matrix::identity(1, 1);
        data.cost.dfdxx = Matrix::from_element(1, 1, q);
        data.cost.dfduu = Matrix::identity(1, 1);
        data
    }

    #[test]
    fn test_pack_round_trip() {
        let sm = Matrix::from_row_slice(3, 3, &[1.0, 2.0, 3.0, 2.0, 4.0, 5.0, 3.0, 5.0, 6.0]);
        let sv = Vector::from_vec(vec![7.0, 8.0, 9.0]);
        let packed = ContinuousTimeRiccatiEquations::convert_to_vector(&sm, &sv, 10.0);
        assert_eq!(packed.len(), packed_len(3));
        assert_eq!(packed.as_slice(), &[1.0, 2.0, 4.0, 3.0, 5.0, 6.0, 7.0, 8.0, 9.0, 10.0]);

        let (sm2, sv2, s2) = ContinuousTimeRiccatiEquations::convert_to_matrix(&packed);
        assert_eq!(sm2, sm);
        assert_eq!(sv2, sv);
        assert_eq!(s2, 10.0);
        assert_eq!(ContinuousTimeRiccatiEquations::convert_to_vector(&sm2, &sv2, s2), packed);
    }

    #[test]
    fn test_flow_map_scalar_problem() {
        let times = [0.0, 1.0];
        let projected = [scalar_problem(0.0, 2.0), scalar_problem(1.0, 2.0)];
        let modifications = [modification(1, 1), modification(1, 1)];
        let data = RiccatiPartitionData {
            time_trajectory: &times,
            projected_model_data: &projected,
            post_event_indices: &[],
            event_model_data: &[],
            riccati_modifications: &modifications,
        };

        for pre_compute in [true, false] {
            let mut equations = ContinuousTimeRiccatiEquations::new(data, pre_compute, 0.0);
            let packed = ContinuousTimeRiccatiEquations::convert_to_vector(
                &Matrix::from_element(1, 1, 3.0),
                &Vector::from_element(1, 0.5),
                1.0,
            );
            let derivative = equations.compute_flow_map(-0.5, &packed);
            // dSm = q - Sm², dSv = -Sm Sv, ds = -½ Sv²
            assert_abs_diff_eq!(derivative[0], 2.0 - 9.0, epsilon = 1e-12);
            assert_abs_diff_eq!(derivative[1], -1.5, epsilon = 1e-12);
            assert_abs_diff_eq!(derivative[2], -0.125, epsilon = 1e-12);
            assert_eq!(equations.num_function_calls(), 1);
        }
    }

    #[test]
    fn test_risk_sensitive_term() {
        let times = [0.0];
        let mut sample = scalar_problem(0.0, 0.0);
        sample.dynamics.dfdu = Matrix::zeros(1, 1);
        sample.dynamics_covariance = Matrix::from_element(1, 1, 2.0);
        let projected = [sample];
        let modifications = [modification(1, 1)];
        let data = RiccatiPartitionData {
            time_trajectory: &times,
            projected_model_data: &projected,
            post_event_indices: &[],
            event_model_data: &[],
            riccati_modifications: &modifications,
        };
        let mut equations = ContinuousTimeRiccatiEquations::new(data, true, 0.5);
        let packed = ContinuousTimeRiccatiEquations::convert_to_vector(
            &Matrix::from_element(1, 1, 1.0),
            &Vector::from_element(1, 2.0),
            0.0,
        );
        let derivative = equations.compute_flow_map(0.0, &packed);
        // θ Sm Σ Sm = 1, θ Sm Σ Sv = 2, ½θ SvΣSv + ½ tr(ΣSm) = 2 + 1
        assert_abs_diff_eq!(derivative[0], 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(derivative[1], 2.0, epsilon = 1e-12);
        assert_abs_diff_eq!(derivative[2], 3.0, epsilon = 1e-12);
    }

    #[test]
    fn test_jump_map() {
        let times = [0.0, 0.5, 0.5, 1.0];
        let projected: Vec<ModelData> = times.iter().map(|&t| scalar_problem(t, 1.0)).collect();
        let modifications = vec![modification(1, 1); 4];
        let mut event = ModelData::new(0.5, 1, 1);
        event.dynamics.dfdx = Matrix::from_element(1, 1, 2.0);
        event.cost.f = 0.25;
        event.cost.dfdx = Vector::from_element(1, 1.0);
        event.cost.dfdxx = Matrix::from_element(1, 1, 3.0);
        let events = [event];
        let data = RiccatiPartitionData {
            time_trajectory: &times,
            projected_model_data: &projected,
            post_event_indices: &[2],
            event_model_data: &events,
            riccati_modifications: &modifications,
        };
        let equations = ContinuousTimeRiccatiEquations::new(data, false, 0.0);
        let packed = ContinuousTimeRiccatiEquations::convert_to_vector(
            &Matrix::from_element(1, 1, 1.0),
            &Vector::from_element(1, 1.0),
            1.0,
        );
        let pre = equations.compute_jump_map(-0.5, &packed).unwrap();
        assert_abs_diff_eq!(pre, Vector::from_vec(vec![3.0 + 4.0, 1.0 + 2.0, 1.25]), epsilon = 1e-12);

        assert!(matches!(
            equations.compute_jump_map(-0.7, &packed),
            Err(DdpError::UnknownEvent { .. })
        ));
    }
}
