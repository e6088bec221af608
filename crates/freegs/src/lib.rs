//! Facade crate re-exporting the free-boundary Grad-Shafranov data model
//! (`freegs-core`) and numerical solvers (`freegs-solver`) as a single
//! dependency for downstream users.

pub use freegs_core::{
    core_mask_limiter, equilibrium, error as core_error, greens, grid, limiter, machine, profile,
    Conductor, ConductorKind, CriticalPoint, CriticalPoints, Equilibrium, EquilibriumSnapshot,
    Filament, FiestaTopeol, Grid, Lao85, LimiterHandler, Machine, PoloidalBetaIp, Polygon,
    PressureAxisIp, Profile,
};

pub use freegs_solver::{
    automatic_timestep, box_blur, build_d_iy_di, error as solver_error, growth_rate, nlstepper,
    solve_j1, solve_static, GsConfig, GsReport, ImplicitEulerStepper, ModalBasis, NkConfig,
    NkOutcome, NkSolver, PoissonSolver, StepReport, StepperConfig,
};
