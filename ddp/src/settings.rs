use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{DdpError, DdpResult};
use crate::hessian_correction::Strategy;
use crate::Scalar;

/// DDP flavour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Algorithm {
    Slq,
    Ilqr,
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Algorithm::Slq => write!(f, "SLQ"),
            Algorithm::Ilqr => write!(f, "ILQR"),
        }
    }
}

/// ODE integration scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntegratorType {
    Euler,
    RungeKutta4,
    Ode45,
}

impl fmt::Display for IntegratorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IntegratorType::Euler => write!(f, "euler"),
            IntegratorType::RungeKutta4 => write!(f, "runge_kutta_4"),
            IntegratorType::Ode45 => write!(f, "ode45"),
        }
    }
}

/// Forward rollout configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RolloutSettings {
    pub integrator_type: IntegratorType,
    pub time_step: Scalar,                 // output grid spacing [sec]
    pub abs_tol_ode: Scalar,
    pub rel_tol_ode: Scalar,
    pub max_num_steps_per_second: usize,
}

impl Default for RolloutSettings {
    fn default() -> Self {
        Self {
            integrator_type: IntegratorType::RungeKutta4,
            time_step: 1e-2,
            abs_tol_ode: 1e-9,
            rel_tol_ode: 1e-6,
            max_num_steps_per_second: 10_000,
        }
    }
}

/// Line search and Hessian correction configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LineSearchSettings {
    pub min_step_length: Scalar,
    pub max_step_length: Scalar,
    pub contraction_rate: Scalar,
    pub hessian_correction_strategy: Strategy,
    pub hessian_correction_multiple: Scalar, // minimum eigenvalue after correction
}

impl Default for LineSearchSettings {
    fn default() -> Self {
        Self {
            min_step_length: 0.01,
            max_step_length: 1.0,
            contraction_rate: 0.5,
            hessian_correction_strategy: Strategy::DiagonalShift,
            hessian_correction_multiple: 1e-3,
        }
    }
}

/// Solver configuration.
///
/// Every field has a default, so a TOML document only needs to list the
/// values it changes:
///
/// ```toml
/// algorithm = "slq"
/// n_threads = 3
/// use_nominal_time_for_backward_pass = true
///
/// [line_search]
/// hessian_correction_strategy = "cholesky_modification"
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub algorithm: Algorithm,
    pub n_threads: usize, // 0 runs everything on the calling thread
    pub display_info: bool,

    pub max_num_iterations: usize,
    pub min_rel_cost: Scalar,
    pub constraint_tolerance: Scalar,
    pub constraint_penalty_initial_value: Scalar,
    pub constraint_penalty_increase_rate: Scalar,

    pub backward_pass_integrator_type: IntegratorType,
    pub use_nominal_time_for_backward_pass: bool,
    pub min_time_step: Scalar,
    pub abs_tol_ode: Scalar,
    pub rel_tol_ode: Scalar,
    pub max_num_steps_per_second: usize,

    pub check_numerical_stability: bool,
    pub escalate_numerical_issues: bool,
    pub pre_compute_riccati_terms: bool,
    pub risk_sensitive_coeff: Scalar,

    pub line_search: LineSearchSettings,
    pub rollout: RolloutSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            algorithm: Algorithm::Slq,
            n_threads: 0,
            display_info: false,
            max_num_iterations: 150,
            min_rel_cost: 1e-3,
            constraint_tolerance: 1e-5,
            constraint_penalty_initial_value: 2.0,
            constraint_penalty_increase_rate: 1.5,
            backward_pass_integrator_type: IntegratorType::Ode45,
            use_nominal_time_for_backward_pass: false,
            min_time_step: 1e-3,
            abs_tol_ode: 1e-9,
            rel_tol_ode: 1e-7,
            max_num_steps_per_second: 10_000,
            check_numerical_stability: true,
            escalate_numerical_issues: false,
            pre_compute_riccati_terms: true,
            risk_sensitive_coeff: 0.0,
            line_search: LineSearchSettings::default(),
            rollout: RolloutSettings::default(),
        }
    }
}

impl Settings {
    /// Parses settings from a TOML document.
    pub fn from_toml_str(source: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(source)
    }

    /// Loads and validates settings from a TOML file.
    pub fn from_file(path: impl AsRef<std::path::Path>) -> DdpResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let settings: Self = toml::from_str(&content)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Range checks that serde cannot express.
    pub fn validate(&self) -> DdpResult<()> {
        fn positive(field: &'static str, value: Scalar) -> DdpResult<()> {
            if value > 0.0 && value.is_finite() {
                Ok(())
            } else {
                Err(DdpError::InvalidSettings {
                    field,
                    message: format!("must be positive and finite, got {value}"),
                })
            }
        }

        if self.max_num_iterations == 0 {
            return Err(DdpError::InvalidSettings {
                field: "max_num_iterations",
                message: "must be at least 1".into(),
            });
        }
        positive("min_rel_cost", self.min_rel_cost)?;
        positive("constraint_tolerance", self.constraint_tolerance)?;
        positive("constraint_penalty_initial_value", self.constraint_penalty_initial_value)?;
        if self.constraint_penalty_increase_rate < 1.0 {
            return Err(DdpError::InvalidSettings {
                field: "constraint_penalty_increase_rate",
                message: format!("must be at least 1, got {}", self.constraint_penalty_increase_rate),
            });
        }
        positive("min_time_step", self.min_time_step)?;
        positive("abs_tol_ode", self.abs_tol_ode)?;
        positive("rel_tol_ode", self.rel_tol_ode)?;
        if self.max_num_steps_per_second == 0 {
            return Err(DdpError::InvalidSettings {
                field: "max_num_steps_per_second",
                message: "must be at least 1".into(),
            });
        }
        if !self.risk_sensitive_coeff.is_finite() {
            return Err(DdpError::InvalidSettings {
                field: "risk_sensitive_coeff",
                message: "must be finite".into(),
            });
        }

        let ls = &self.line_search;
        positive("line_search.min_step_length", ls.min_step_length)?;
        if ls.max_step_length < ls.min_step_length {
            return Err(DdpError::InvalidSettings {
                field: "line_search.max_step_length",
                message: format!(
                    "must not be smaller than min_step_length ({} < {})",
                    ls.max_step_length, ls.min_step_length
                ),
            });
        }
        if !(ls.contraction_rate > 0.0 && ls.contraction_rate < 1.0) {
            return Err(DdpError::InvalidSettings {
                field: "line_search.contraction_rate",
                message: format!("must lie in (0, 1), got {}", ls.contraction_rate),
            });
        }
        if !(ls.hessian_correction_multiple >= 0.0) {
            return Err(DdpError::InvalidSettings {
                field: "line_search.hessian_correction_multiple",
                message: format!("must be non-negative, got {}", ls.hessian_correction_multiple),
            });
        }

        positive("rollout.time_step", self.rollout.time_step)?;
        positive("rollout.abs_tol_ode", self.rollout.abs_tol_ode)?;
        positive("rollout.rel_tol_ode", self.rollout.rel_tol_ode)?;
        if self.rollout.max_num_steps_per_second == 0 {
            return Err(DdpError::InvalidSettings {
                field: "rollout.max_num_steps_per_second",
                message: "must be at least 1".into(),
            });
        }
        Ok(())
    }
}
