//! Discrete-time Riccati recursion of ILQR.
//!
//! One step maps the value function at `k + 1` to `k` for a sample that was
//! discretized with forward Euler and projected with the Hamiltonian Hessian
//! `R + Bᵀ Sm B`:
//!
//! ```text
//! Gm = Pm' + ΔGm + B'ᵀ Sm A'
//! Gv = Rv' + ΔGv + B'ᵀ (Sv + Sm f')
//! Sm⁻ = Qm' + ΔQm + A'ᵀ Sm A' - Gmᵀ Gm
//! Sv⁻ = Qv' + A'ᵀ (Sv + Sm f') - Gmᵀ Gv
//! s⁻  = s + q' + f'ᵀ Sv + ½ f'ᵀ Sm f' - ½ Gvᵀ Gv
//! ```

use crate::linear_algebra::symmetrize;
use crate::model_data::ModelData;
use crate::riccati::RiccatiModification;
use crate::{Matrix, Scalar, Vector};

/// Value function and reduced-input gains at one sample.
#[derive(Debug, Clone, PartialEq)]
pub struct DiscreteRiccatiStep {
    pub sm: Matrix,
    pub sv: Vector,
    pub s: Scalar,
    /// Feedback of the free input, `v = -Gm δx - Gv`.
    pub gm: Matrix,
    pub gv: Vector,
}

/// Euler discretization of a continuous sample over `dt`.
///
/// `A ← I + A dt`, `B ← B dt`, `f ← f dt`, cost scaled by `dt`. Constraints
/// are left untouched.
pub fn discretize(model: &ModelData, dt: Scalar) -> ModelData {
    let n = model.state_dim;
    let mut discrete = model.clone();
    discrete.dynamics.dfdx = Matrix::identity(n, n) + &model.dynamics.dfdx * dt;
    discrete.dynamics.dfdu = &model.dynamics.dfdu * dt;
    discrete.dynamics.f = &model.dynamics.f * dt;
    discrete.dynamics_covariance = &model.dynamics_covariance * dt;
    discrete.cost.scale(dt);
    discrete
}

/// Hessian of the discrete Hamiltonian with respect to the input.
pub fn hamiltonian_hessian(discrete: &ModelData, sm_next: &Matrix) -> Matrix {
    let bm = &discrete.dynamics.dfdu;
    symmetrize(&(&discrete.cost.dfduu + bm.transpose() * sm_next * bm))
}

/// One backward step on the projected sample.
pub fn riccati_step(
    projected: &ModelData,
    modification: &RiccatiModification,
    sm_next: &Matrix,
    sv_next: &Vector,
    s_next: Scalar,
) -> DiscreteRiccatiStep {
    let cost = &projected.cost;
    let am = &projected.dynamics.dfdx;
    let bm = &projected.dynamics.dfdu;
    let f = &projected.dynamics.f;

    let sv_plus = sv_next + sm_next * f;
    let sm_am = sm_next * am;
    let bm_t = bm.transpose();

    let gm = &cost.dfdux + &modification.delta_gm + &bm_t * &sm_am;
    let gv = &cost.dfdu + &modification.delta_gv + &bm_t * &sv_plus;
    let gm_t = gm.transpose();

    let sm = &cost.dfdxx + &modification.delta_qm + am.transpose() * &sm_am - &gm_t * &gm;
    let sv = &cost.dfdx + am.transpose() * &sv_plus - &gm_t * &gv;
    let s = s_next + cost.f + f.dot(sv_next) + 0.5 * f.dot(&(sm_next * f)) - 0.5 * gv.dot(&gv);

    DiscreteRiccatiStep {
        sm: symmetrize(&sm),
        sv,
        s,
        gm,
        gv,
    }
}
