//! Backward pass building blocks: constraint projection, the continuous
//! Riccati ODE of SLQ and the discrete recursion of ILQR.

mod continuous;
pub mod discrete;
mod projection;

use crate::linear_algebra::symmetrize;
use crate::model_data::ModelData;
use crate::{Matrix, Scalar, Vector};

pub use continuous::{packed_len, ContinuousTimeRiccatiEquations, RiccatiPartitionData};
pub use discrete::DiscreteRiccatiStep;
pub use projection::{compute_projection_and_riccati_modification, RiccatiModification};

/// Value function just before an event, given its value just after.
///
/// `event` holds the jump map derivative `G` and the pre-jump cost.
pub fn jump_value_function(event: &ModelData, sm: &Matrix, sv: &Vector, s: Scalar) -> (Matrix, Vector, Scalar) {
    let g = &event.dynamics.dfdx;
    let sm_pre = &event.cost.dfdxx + g.transpose() * sm * g;
    let sv_pre = &event.cost.dfdx + g.transpose() * sv;
    (symmetrize(&sm_pre), sv_pre, event.cost.f + s)
}
