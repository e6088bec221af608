//! Numerical solvers for the free-boundary Grad-Shafranov engine: the
//! generic Newton-Krylov core, the inner Poisson solve, the static GS fixed
//! point, the modal circuit reduction, and the evolutive timestepper built
//! on top of them.

pub mod error;
pub mod euler;
pub mod gs;
pub mod jacobian;
pub mod modal;
pub mod nk;
pub mod poisson;
pub mod simplified;
pub mod stepper;

pub use error::{Error, Result};
pub use euler::ImplicitEulerStepper;
pub use gs::{solve_static, GsConfig, GsReport};
pub use jacobian::{automatic_timestep, build_d_iy_di, growth_rate};
pub use modal::ModalBasis;
pub use nk::{NkConfig, NkOutcome, NkSolver};
pub use poisson::PoissonSolver;
pub use simplified::{box_blur, solve_j1};
pub use stepper::{nlstepper, StepReport, StepperConfig};
