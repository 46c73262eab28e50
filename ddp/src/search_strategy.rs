//! Step acceptance and Hessian correction policy.

use crate::hessian_correction::{shift_hessian, shifted};
use crate::linear_algebra::symmetrize;
use crate::model_data::ModelData;
use crate::performance::PerformanceIndex;
use crate::settings::LineSearchSettings;
use crate::{Matrix, Scalar, Vector};

/// Terms added to the Riccati equations so the recursion stays well-posed.
#[derive(Debug, Clone, PartialEq)]
pub struct RiccatiCorrection {
    pub delta_qm: Matrix,
    pub delta_gv: Vector,
    pub delta_gm: Matrix,
}

/// Supplies the Hessian corrections used by the backward pass.
pub trait HessianCorrectionPolicy: Send + Sync {
    /// Positive definite replacement for the Hamiltonian Hessian `hessian`.
    fn augment_hamiltonian_hessian(&self, model: &ModelData, hessian: &Matrix) -> Matrix;

    /// Correction for `projected`, whose input Hessian is normalized to identity.
    fn compute_riccati_modification(&self, projected: &ModelData) -> RiccatiCorrection;
}

/// Backtracking line search on the feedforward step.
#[derive(Debug, Clone)]
pub struct LineSearch {
    settings: LineSearchSettings,
}

impl LineSearch {
    pub fn new(settings: LineSearchSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &LineSearchSettings {
        &self.settings
    }

    /// Candidate step lengths from `max_step_length` down to
    /// `min_step_length`, each the previous one times the contraction rate.
    pub fn step_lengths(&self) -> Vec<Scalar> {
        let mut steps = Vec::new();
        let mut alpha = self.settings.max_step_length;
        while alpha >= self.settings.min_step_length * (1.0 - 1e-9) {
            steps.push(alpha);
            alpha *= self.settings.contraction_rate;
        }
        steps
    }

    /// A step is accepted only if it strictly decreases the merit.
    pub fn accepts(&self, baseline: &PerformanceIndex, candidate: &PerformanceIndex) -> bool {
        candidate.merit.is_finite() && candidate.merit < baseline.merit
    }
}

impl HessianCorrectionPolicy for LineSearch {
    fn augment_hamiltonian_hessian(&self, _model: &ModelData, hessian: &Matrix) -> Matrix {
        shifted(
            self.settings.hessian_correction_strategy,
            &symmetrize(hessian),
            self.settings.hessian_correction_multiple,
        )
    }

    fn compute_riccati_modification(&self, projected: &ModelData) -> RiccatiCorrection {
        let qm = &projected.cost.dfdxx;
        let pm = &projected.cost.dfdux;

        // Schur complement of the projected cost Hessian
        let schur = symmetrize(&(qm - pm.transpose() * pm));
        let mut delta_qm = schur.clone();
        shift_hessian(
            self.settings.hessian_correction_strategy,
            &mut delta_qm,
            self.settings.hessian_correction_multiple,
        );
        delta_qm -= schur;

        RiccatiCorrection {
            delta_qm,
            delta_gv: Vector::zeros(pm.nrows()),
            delta_gm: Matrix::zeros(pm.nrows(), pm.ncols()),
        }
    }
}
