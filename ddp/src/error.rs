//! Error types for the solver.
//!
//! Two classes of failure exist:
//!
//! - [`DdpError`] is fatal. It unwinds to the orchestrator through `Result`
//!   and the iteration that produced it is discarded.
//! - [`NumericalIssue`] is a degraded result. It is logged with context and
//!   travels next to the value in [`Checked`], so the caller sees it without
//!   the solve being aborted.

use thiserror::Error;

use crate::settings::{Algorithm, IntegratorType};
use crate::Scalar;

/// Result type for solver operations.
pub type DdpResult<T> = Result<T, DdpError>;

/// Fatal solver errors.
#[derive(Debug, Error)]
pub enum DdpError {
    /// The backward pass does not support the configured integrator.
    #[error("unsupported Riccati equation integrator type: {0}")]
    UnsupportedIntegrator(IntegratorType),

    /// The settings select a different algorithm than the one instantiated.
    #[error("settings select the {configured} algorithm while {instantiated} is instantiated")]
    AlgorithmMismatch {
        /// Algorithm named in the settings.
        configured: Algorithm,
        /// Algorithm that was constructed.
        instantiated: Algorithm,
    },

    /// A settings value is out of range.
    #[error("invalid value for {field}: {message}")]
    InvalidSettings {
        /// Offending field.
        field: &'static str,
        /// What is wrong with it.
        message: String,
    },

    /// More active equality constraints than inputs.
    #[error(
        "number of active {kind} equality constraints ({active}) should be less-equal to the input dimension ({input_dim})"
    )]
    TooManyConstraints {
        /// `"state-input"` or `"state-only"`.
        kind: &'static str,
        /// Number of active rows.
        active: usize,
        /// Input dimension.
        input_dim: usize,
    },

    /// Internal consistency check of the fixed-time Riccati integration.
    #[error("Riccati trajectory has {actual} samples, expected {expected}")]
    TrajectorySizeMismatch {
        /// Size of the nominal time grid.
        expected: usize,
        /// Number of integrated samples.
        actual: usize,
    },

    /// A parallel sweep left a sample unevaluated.
    #[error("sample {index} was not evaluated by the parallel sweep")]
    MissingSample {
        /// Time index of the missing sample.
        index: usize,
    },

    /// Input data has the wrong shape.
    #[error("dimension mismatch for {what}: expected {expected}, got {actual}")]
    DimensionMismatch {
        /// What was checked.
        what: &'static str,
        /// Expected size.
        expected: usize,
        /// Actual size.
        actual: usize,
    },

    /// A term with the same name is already registered.
    #[error("term `{0}` already exists")]
    DuplicateTerm(String),

    /// Partitioning times do not describe a usable horizon.
    #[error("invalid time partitioning: {0}")]
    InvalidPartitioning(String),

    /// The jump map was requested at a time without an event.
    #[error("no event is recorded at time {time} [sec]")]
    UnknownEvent {
        /// Requested time.
        time: Scalar,
    },

    /// ODE integration failed.
    #[error(transparent)]
    Integration(#[from] IntegrationError),

    /// A numerical issue escalated to a hard failure.
    #[error("numerical instability: {0}")]
    NumericalInstability(#[from] NumericalIssue),

    /// A settings file could not be read.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A settings file is not valid TOML for [`crate::Settings`].
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    /// The worker pool could not be created.
    #[error("failed to build the thread pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}

/// ODE integration failures.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum IntegrationError {
    /// The step budget was exhausted before reaching the end time.
    #[error("maximum number of integration steps ({max_steps}) exceeded at time {time}")]
    MaxStepsExceeded {
        /// Step budget.
        max_steps: usize,
        /// Time reached.
        time: Scalar,
    },

    /// The adaptive step size collapsed.
    #[error("step size underflow ({step:e}) at time {time}")]
    StepSizeUnderflow {
        /// Rejected step size.
        step: Scalar,
        /// Time reached.
        time: Scalar,
    },

    /// The integrated state became NaN or infinite.
    #[error("non-finite state at time {time}")]
    NonFinite {
        /// Time reached.
        time: Scalar,
    },
}

/// Degraded numerical results that are reported but do not stop the solve.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum NumericalIssue {
    /// A matrix or vector contains NaN or infinite entries.
    #[error("{what} is not finite at time {time} [sec]")]
    NonFinite {
        /// Name of the offending quantity.
        what: &'static str,
        /// Sample time.
        time: Scalar,
    },

    /// A Hessian block is not symmetric.
    #[error("{what} is not symmetric at time {time} [sec]")]
    NotSymmetric {
        /// Name of the offending matrix.
        what: &'static str,
        /// Sample time.
        time: Scalar,
    },

    /// A Hessian block has a negative eigenvalue.
    #[error("{what} is not positive semi-definite at time {time} [sec] (min eigenvalue {min_eigenvalue:e})")]
    NotPositiveSemiDefinite {
        /// Name of the offending matrix.
        what: &'static str,
        /// Sample time.
        time: Scalar,
        /// Smallest eigenvalue.
        min_eigenvalue: Scalar,
    },

    /// An input Hessian is not positive definite.
    #[error("{what} is not positive definite at time {time} [sec] (min eigenvalue {min_eigenvalue:e})")]
    NotPositiveDefinite {
        /// Name of the offending matrix.
        what: &'static str,
        /// Sample time.
        time: Scalar,
        /// Smallest eigenvalue.
        min_eigenvalue: Scalar,
    },

    /// The constraint input-Jacobian lost rank.
    #[error("state-input equality constraints are rank deficient at time {time} [sec] (rank {rank} < {rows})")]
    RankDeficientConstraints {
        /// Sample time.
        time: Scalar,
        /// Numerical rank of the input Jacobian.
        rank: usize,
        /// Number of active constraint rows.
        rows: usize,
    },

    /// The feedback gain is not finite.
    #[error("feedback gains are unstable at time {time} [sec]")]
    UnstableFeedbackGain {
        /// Sample time.
        time: Scalar,
    },

    /// The feedforward correction is not finite.
    #[error("feedforward control is unstable at time {time} [sec]")]
    UnstableFeedforward {
        /// Sample time.
        time: Scalar,
    },
}

/// A value together with the numerical issues found while computing it.
#[derive(Debug, Clone, PartialEq)]
pub struct Checked<T> {
    /// The computed value. It is usable even when issues were found.
    pub value: T,
    /// Issues detected while computing `value`.
    pub issues: Vec<NumericalIssue>,
}

impl<T> Checked<T> {
    /// A value without issues.
    pub fn clean(value: T) -> Self {
        Self {
            value,
            issues: Vec::new(),
        }
    }

    /// A value with the given issues.
    pub fn with_issues(value: T, issues: Vec<NumericalIssue>) -> Self {
        Self { value, issues }
    }

    /// Whether any issue was found.
    pub fn is_degraded(&self) -> bool {
        !self.issues.is_empty()
    }

    /// Converts the first issue into a hard failure.
    pub fn escalate(self) -> DdpResult<T> {
        match self.issues.into_iter().next() {
            Some(issue) => Err(DdpError::NumericalInstability(issue)),
            None => Ok(self.value),
        }
    }

    /// Splits the value from its issues.
    pub fn into_parts(self) -> (T, Vec<NumericalIssue>) {
        (self.value, self.issues)
    }

    /// Maps the value, keeping the issues.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Checked<U> {
        Checked {
            value: f(self.value),
            issues: self.issues,
        }
    }
}
