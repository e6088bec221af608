//! Grid, Green's function, machine model, limiter handling and equilibrium
//! state for the free-boundary Grad-Shafranov engine.
//!
//! This crate owns the data model; the numerical solvers that operate on it
//! live in `freegs-solver`.

pub mod equilibrium;
pub mod error;
pub mod greens;
pub mod grid;
pub mod limiter;
pub mod machine;
pub mod profile;

pub use equilibrium::{Equilibrium, EquilibriumSnapshot};
pub use error::{Error, Result};
pub use grid::Grid;
pub use limiter::{core_mask_limiter, LimiterHandler, Polygon};
pub use machine::{Conductor, ConductorKind, Filament, Machine};
pub use profile::{CriticalPoint, CriticalPoints, FiestaTopeol, Lao85, PoloidalBetaIp, PressureAxisIp, Profile};
