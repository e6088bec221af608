//! Error types for the numerical solvers (§7).

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// The inner Poisson/Delta* solve failed (singular operator).
    #[error("inner linear solve failed: {0}")]
    LinearSolveFailed(String),

    /// A matrix/vector dimension mismatch inside the solver.
    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// The static GS Newton-Krylov solve exceeded `max_iter`.
    #[error("GS solve did not converge after {iterations} iterations (relative residual {relative_residual:.3e})")]
    GsNonConverged {
        iterations: usize,
        relative_residual: f64,
    },

    /// The outer evolutive fixed-point loop did not reach tolerance.
    #[error(
        "stepper did not converge (current residual {current_residual:.3e}, GS residual {gs_residual:.3e})"
    )]
    StepperNonConverged {
        current_residual: f64,
        gs_residual: f64,
    },

    /// `automatic_timestep` was requested but the linearised system has no
    /// unstable mode.
    #[error("no unstable mode found; supply dt_step manually")]
    NoInstabilityFound,

    /// Propagated from `freegs-core`.
    #[error("core error: {0}")]
    Core(#[from] freegs_core::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
