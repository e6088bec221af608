//! Error types for the grid, machine and equilibrium state layer.

use thiserror::Error;

/// Errors raised while building or mutating the machine/equilibrium model.
#[derive(Debug, Error)]
pub enum Error {
    /// A required machine description field or path was absent at construction.
    #[error("machine specification missing: {0}")]
    MachineSpecMissing(String),

    /// The assembled mutual-inductance matrix was not positive definite.
    #[error("inductance matrix is singular or not positive definite: {0}")]
    SingularInductance(String),

    /// A grid or matrix dimension did not match what was expected.
    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// Critical-point bootstrapping (`adjust_psi_plasma`) failed after exhausting
    /// every rescaling strategy.
    #[error("could not introduce both an O-point and an X-point by rescaling psi_plasma")]
    CriticalPointBootstrapFailed,

    /// No O-point or X-point could be found in the current flux map.
    #[error("no critical point found in the domain")]
    NoCriticalPoint,

    /// A persisted snapshot's active-coil name set disagreed with the live
    /// machine. Non-fatal: `Equilibrium::load_snapshot` logs this and falls
    /// back to the equilibrium's existing coil currents (§7, §10.3).
    #[error("snapshot active-coil set disagrees with machine: {0}")]
    IncompatibleInitialEquilibrium(String),
}

/// Result type for `freegs-core` operations.
pub type Result<T> = std::result::Result<T, Error>;
