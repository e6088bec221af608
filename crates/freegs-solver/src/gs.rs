//! Static free-boundary Grad-Shafranov solve (§4): the plasma flux is found
//! as the fixed point of "assemble Jtor from the current flux guess, solve
//! the linear Delta* problem for the flux that current implies", driven by
//! the generic Newton-Krylov engine.

use nalgebra::{DMatrix, DVector};

use freegs_core::greens::MU0;
use freegs_core::limiter::core_mask_limiter;
use freegs_core::{Equilibrium, Grid, LimiterHandler, Machine, Profile};
use freegs_core::greens::BoundaryGreens;

use crate::error::{Error, Result};
use crate::nk::{NkConfig, NkSolver};
use crate::poisson::PoissonSolver;

#[derive(Debug, Clone, Copy)]
pub struct GsConfig {
    pub max_iter: usize,
    /// Converged once `max|F| / (max psi - min psi)` drops below this.
    pub conv_crit: f64,
    pub nk: NkConfig,
}

impl Default for GsConfig {
    fn default() -> Self {
        GsConfig {
            max_iter: 30,
            conv_crit: 1e-4,
            nk: NkConfig::default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct GsReport {
    pub iterations: usize,
    pub relative_residual: f64,
    pub psi_bndry: f64,
    pub limiter_flag: bool,
    /// Converged `Jtor`, restricted to the plasma domain via the same
    /// ordering as [`freegs_core::LimiterHandler::plasma_pts`], for callers
    /// (e.g. the stepper's circuit residual) that need `Iy` directly.
    pub jtor_plasma_pts: Vec<f64>,
}

fn psi_range(v: &DVector<f64>) -> f64 {
    let hi = v.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    let lo = v.iter().cloned().fold(f64::INFINITY, f64::min);
    (hi - lo).max(1e-300)
}

fn max_abs(v: &DVector<f64>) -> f64 {
    v.iter().cloned().fold(0.0_f64, |acc, x| acc.max(x.abs()))
}

fn flatten(grid: &Grid, field: &DMatrix<f64>) -> DVector<f64> {
    DVector::from_fn(grid.num_points(), |k, _| {
        let (i, j) = grid.unflatten_index(k);
        field[(i, j)]
    })
}

fn unflatten(grid: &Grid, v: &DVector<f64>) -> DMatrix<f64> {
    DMatrix::from_fn(grid.nx, grid.ny, |i, j| v[grid.flatten_index(i, j)])
}

/// One pass of the fixed-point map: given a candidate plasma flux (flattened),
/// returns the new candidate the current profile implies, plus the boundary
/// flux value and limiter/diverted decision used to get there.
struct StepOutcome {
    new_plasma_psi: DVector<f64>,
    psi_bndry: f64,
    limiter_flag: bool,
    jtor: DMatrix<f64>,
}

fn step(
    grid: &Grid,
    machine: &Machine,
    limiter_handler: &LimiterHandler,
    boundary_greens: &BoundaryGreens,
    poisson: &PoissonSolver,
    tokamak_psi: &DMatrix<f64>,
    profile: &mut dyn Profile,
    plasma_psi: &DVector<f64>,
) -> Result<StepOutcome> {
    let plasma_psi_field = unflatten(grid, plasma_psi);
    let total = tokamak_psi + &plasma_psi_field;

    let part1 = profile.jtor_part1(grid, &total);
    let psi_xpt_candidate = part1.psi_bndry_candidate.ok_or(Error::Core(
        freegs_core::Error::NoCriticalPoint,
    ))?;

    let (psi_bndry, core_mask, limiter_flag) = match &part1.diverted_core_mask {
        Some(diverted_core_mask) => {
            let decision = core_mask_limiter(
                &total,
                psi_xpt_candidate,
                diverted_core_mask,
                &limiter_handler.limiter_layer_mask,
            );
            (decision.psi_bnd, Some(decision.core_mask), decision.limiter_flag)
        }
        None => (psi_xpt_candidate, None, false),
    };

    let jtor = profile.jtor_part2(grid, &total, psi_bndry, core_mask.as_ref());

    let rhs_interior = DMatrix::from_fn(grid.nx, grid.ny, |i, j| -MU0 * grid.r(i) * jtor[(i, j)]);

    let boundary_flux = boundary_greens.boundary_flux(grid, &jtor);
    let mut rhs_boundary = DMatrix::zeros(grid.nx, grid.ny);
    for (&(bi, bj), &v) in boundary_greens.boundary_nodes().iter().zip(boundary_flux.iter()) {
        rhs_boundary[(bi, bj)] = v;
    }

    let new_plasma_psi_field = poisson.solve(grid, &rhs_interior, &rhs_boundary)?;
    Ok(StepOutcome {
        new_plasma_psi: flatten(grid, &new_plasma_psi_field),
        psi_bndry,
        limiter_flag,
        jtor,
    })
}

/// Drives the plasma flux to the Delta*/Jtor fixed point (§4.3), updating
/// `equilibrium` in place. Returns an error if the O/X-point bootstrap or
/// the linear solves themselves fail outright, or if `max_iter` is exceeded.
pub fn solve_static(
    grid: &Grid,
    machine: &Machine,
    limiter_handler: &LimiterHandler,
    boundary_greens: &BoundaryGreens,
    poisson: &PoissonSolver,
    equilibrium: &mut Equilibrium,
    profile: &mut dyn Profile,
    config: &GsConfig,
) -> Result<GsReport> {
    let tokamak_psi = equilibrium.tokamak_psi(grid, machine);
    let nk = NkSolver::new(config.nk);

    let mut x = flatten(grid, &equilibrium.plasma_psi);
    let mut last = step(grid, machine, limiter_handler, boundary_greens, poisson, &tokamak_psi, profile, &x)?;
    let mut residual = &last.new_plasma_psi - &x;

    let mut iterations = 0usize;
    loop {
        let rel_residual = max_abs(&residual) / psi_range(&x);
        if rel_residual < config.conv_crit {
            break;
        }
        if iterations >= config.max_iter {
            log::warn!(
                "GS solve did not converge after {} iterations (relative residual {:.3e})",
                iterations,
                rel_residual
            );
            return Err(Error::GsNonConverged {
                iterations,
                relative_residual: rel_residual,
            });
        }

        let mut f = |candidate: &DVector<f64>| -> DVector<f64> {
            match step(grid, machine, limiter_handler, boundary_greens, poisson, &tokamak_psi, profile, candidate) {
                Ok(outcome) => {
                    last = outcome;
                    &last.new_plasma_psi - candidate
                }
                Err(_) => DVector::from_element(candidate.len(), f64::INFINITY),
            }
        };

        let outcome = nk.arnoldi_iteration(&x, residual.clone(), &residual, &mut f);
        x += &outcome.dx;
        residual = f(&x);
        iterations += 1;
    }

    equilibrium.set_plasma_psi(unflatten(grid, &x));
    equilibrium.finalize_from_profile(profile);

    Ok(GsReport {
        iterations,
        relative_residual: max_abs(&residual) / psi_range(&x),
        psi_bndry: last.psi_bndry,
        limiter_flag: last.limiter_flag,
        jtor_plasma_pts: limiter_handler.restrict(grid, &last.jtor),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use freegs_core::{Conductor, ConductorKind, Filament, PressureAxisIp};
    use freegs_core::limiter::Polygon;

    fn toy_setup() -> (Grid, Machine, LimiterHandler, BoundaryGreens, PoissonSolver) {
        let grid = Grid::new(0.3, 2.0, -1.6, 1.6, 33, 33);
        let solenoid = Conductor::new(
            "P1",
            ConductorKind::Active,
            vec![
                Filament::new(0.35, 0.8, 1e-3, 1.0, 1.7e-8),
                Filament::new(0.35, -0.8, 1e-3, 1.0, 1.7e-8),
            ],
        );
        let limiter = Polygon::new(vec![(0.4, -1.2), (1.8, -1.2), (1.8, 1.2), (0.4, 1.2)]);
        let wall = limiter.clone();
        let machine = Machine::build(vec![solenoid], limiter, wall.clone()).unwrap();
        let limiter_handler = LimiterHandler::build(&grid, &wall);
        let boundary_greens = BoundaryGreens::build(&grid);
        let poisson = PoissonSolver::build(&grid).unwrap();
        (grid, machine, limiter_handler, boundary_greens, poisson)
    }

    #[test]
    fn static_solve_runs_without_panicking_on_a_toy_machine() {
        let (grid, machine, limiter_handler, boundary_greens, poisson) = toy_setup();
        let mut equilibrium = Equilibrium::new(&grid, machine.num_conductors());
        equilibrium.coil_currents[0] = 2.0e4;
        // Seed a bowl-shaped plasma flux guess centred in the vessel.
        equilibrium.set_plasma_psi(DMatrix::from_fn(grid.nx, grid.ny, |i, j| {
            let r = grid.r(i) - 1.0;
            let z = grid.z(j);
            -0.05 * (r * r + z * z)
        }));
        let mut profile = PressureAxisIp::new(1.0e3, 3.0e5, 1.8, 1.2, 0.5);
        let config = GsConfig {
            max_iter: 25,
            ..Default::default()
        };
        let result = solve_static(
            &grid,
            &machine,
            &limiter_handler,
            &boundary_greens,
            &poisson,
            &mut equilibrium,
            &mut profile,
            &config,
        );
        assert!(result.is_ok() || matches!(result, Err(Error::GsNonConverged { .. })));
    }
}
