//! The nonlinear evolutive stepper (§4.9): advances conductor currents and
//! the plasma equilibrium together by one timestep, combining the extensive
//! J1 predictor, a static GS re-solve, and an outer Newton-Krylov correction
//! on the conductor currents until both the circuit and GS residuals are
//! within tolerance.

use nalgebra::{DMatrix, DVector};

use freegs_core::{Equilibrium, Grid, LimiterHandler, Machine, Profile};
use freegs_core::greens::{mutual_inductance, BoundaryGreens};

use crate::error::{Error, Result};
use crate::gs::{self, GsConfig};
use crate::jacobian::build_d_iy_di;
use crate::modal::ModalBasis;
use crate::nk::{NkConfig, NkSolver};
use crate::poisson::PoissonSolver;
use crate::simplified::solve_j1;

#[derive(Debug, Clone, Copy)]
pub struct StepperConfig {
    pub max_iter: usize,
    pub current_tol: f64,
    pub gs_tol: f64,
    pub jacobian_eps: f64,
    pub gs: GsConfig,
    /// NK tuning for the outer conductor-current correction ("step_size_curr").
    pub nk_curr: NkConfig,
    /// NK tuning substituted into every inner GS solve's own NK loop
    /// ("step_size_psi").
    pub nk_psi: NkConfig,
    /// Skip the outer fixed-point loop and accept the linear J1 guess (after
    /// one GS re-solve at that guess) as the step's result (§4.9).
    pub linear_only: bool,
    /// Blend weight applied to the pre-solve trial flux whenever a GS solve
    /// inside the loop lands above `max_no_nk_psi * gs_tol`, damping the
    /// next outer iteration's starting guess.
    pub blend_gs: f64,
    /// Absolute floor under the current-step denominator of the circuit
    /// convergence check (measured against `I(t+dt) - I(t)`, not `|I|`).
    pub curr_eps: f64,
    /// Multiple of `gs_tol` above which a GS solve's residual triggers the
    /// `blend_gs` damping.
    pub max_no_nk_psi: f64,
    /// Passive-mode pruning: modes with `|omega| > omega_max` are dropped
    /// from the extensive current vector (§4.6).
    pub omega_max: f64,
    /// Passive-mode pruning: modes whose plasma-coupling column norm in
    /// `dIy/dI` falls below this are dropped as plasma-irrelevant (§4.6).
    pub min_d_iy_di: f64,
    /// Normalisation scale for the extensive vector's `Ip/ipn` entry (§3/§4.7).
    pub ipn: f64,
    /// Box-blur radius applied to `hatIy` before it left-contracts the
    /// plasma circuit equation (§4.8).
    pub blur_radius: usize,
}

impl Default for StepperConfig {
    fn default() -> Self {
        StepperConfig {
            max_iter: 10,
            current_tol: 1e-6,
            gs_tol: 1e-4,
            jacobian_eps: 1.0,
            gs: GsConfig::default(),
            nk_curr: NkConfig::default(),
            nk_psi: NkConfig::default(),
            linear_only: false,
            blend_gs: 0.5,
            curr_eps: 1e-6,
            max_no_nk_psi: 2.0,
            omega_max: f64::INFINITY,
            min_d_iy_di: 0.0,
            ipn: 1.0e3,
            blur_radius: 1,
        }
    }
}

#[derive(Debug, Clone)]
pub struct StepReport {
    pub iterations: usize,
    pub current_residual: f64,
    pub gs: crate::gs::GsReport,
}

fn tokamak_psi_with(grid: &Grid, machine: &Machine, currents: &DVector<f64>) -> DMatrix<f64> {
    DMatrix::from_fn(grid.nx, grid.ny, |i, j| {
        let (r, z) = (grid.r(i), grid.z(j));
        machine
            .conductors
            .iter()
            .enumerate()
            .map(|(c, conductor)| {
                let i_c = currents[c];
                conductor
                    .filaments
                    .iter()
                    .map(|f| f.polarity * i_c * mutual_inductance(f.r, f.z, r, z))
                    .sum::<f64>()
            })
            .sum()
    })
}

/// Builds the modal basis over the passive conductors and the extensive
/// `[I_active; I_mode]` projection `T` (§4.5/§4.6): not pruned by coupling
/// when there are no passive conductors, since the generalised eigenproblem
/// over a 0x0 block is degenerate rather than merely empty.
fn build_modal_projection(
    machine: &Machine,
    d_iy_di: &DMatrix<f64>,
    omega_max: f64,
    min_d_iy_di: f64,
) -> Result<(ModalBasis, DMatrix<f64>, Vec<usize>, Vec<usize>)> {
    let active_idx = machine.active_indices();
    let passive_idx = machine.passive_indices();
    let n_pass = passive_idx.len();

    let modal = if n_pass == 0 {
        ModalBasis {
            omega: DVector::zeros(0),
            modes: DMatrix::zeros(0, 0),
            kept: Vec::new(),
        }
    } else {
        let r_pass = DVector::from_iterator(n_pass, passive_idx.iter().map(|&i| machine.resistance[i]));
        let r_met_pass = DMatrix::from_diagonal(&r_pass);
        let m_pass = DMatrix::from_fn(n_pass, n_pass, |a, b| {
            machine.inductance[(passive_idx[a], passive_idx[b])]
        });
        let d_iy_di_pass = DMatrix::from_fn(d_iy_di.nrows(), n_pass, |p, c| d_iy_di[(p, passive_idx[c])]);
        ModalBasis::build(&r_met_pass, &m_pass, omega_max, Some(&d_iy_di_pass), min_d_iy_di)?
    };

    let t = modal.projection(machine.num_conductors(), &active_idx, &passive_idx);
    Ok((modal, t, active_idx, passive_idx))
}

/// Advances `equilibrium` by one timestep of size `dt` under the applied
/// conductor `voltage` (§4.9):
///
/// 1. Linearise the plasma's current response, `dIy/dI`, about the current
///    equilibrium (frozen boundary/core mask), and build the passive modal
///    basis and extensive current projection from it.
/// 2. Predict the next extensive currents with the one-shot J1 circuit
///    solve, contracting the plasma circuit equation by a box-blurred
///    `hatIy`.
/// 3. Re-solve the static GS problem for those currents. If `linear_only`,
///    stop here.
/// 4. Form the backward-Euler circuit residual (now exact, using the GS
///    solve's converged `Iy` rather than the linear prediction) and correct
///    the conductor currents with the generic Newton-Krylov engine; repeat
///    from step 3 until both residuals are within tolerance.
pub fn nlstepper(
    grid: &Grid,
    machine: &Machine,
    limiter_handler: &LimiterHandler,
    boundary_greens: &BoundaryGreens,
    poisson: &PoissonSolver,
    mey: &DMatrix<f64>,
    equilibrium: &mut Equilibrium,
    profile: &mut dyn Profile,
    voltage: &DVector<f64>,
    dt: f64,
    config: &StepperConfig,
) -> Result<StepReport> {
    let gs_config = GsConfig {
        nk: config.nk_psi,
        ..config.gs
    };

    let i_old = equilibrium.coil_currents.clone();
    let iy_old = {
        let report = gs::solve_static(
            grid,
            machine,
            limiter_handler,
            boundary_greens,
            poisson,
            equilibrium,
            profile,
            &gs_config,
        )?;
        DVector::from_vec(report.jtor_plasma_pts)
    };
    let ip_old = equilibrium.ip;

    let d_iy_di = build_d_iy_di(
        grid,
        machine,
        limiter_handler,
        |currents| tokamak_psi_with(grid, machine, currents),
        &equilibrium.plasma_psi,
        &i_old,
        profile,
        config.jacobian_eps,
    )?;

    let (_modal, t, _active_idx, _passive_idx) =
        build_modal_projection(machine, &d_iy_di, config.omega_max, config.min_d_iy_di)?;
    let myy = machine.build_myy(grid, limiter_handler);

    let n_pts = iy_old.len();
    let hat_old: Vec<f64> = if ip_old.abs() > 1e-300 {
        iy_old.iter().map(|&v| v / ip_old).collect()
    } else if n_pts > 0 {
        vec![1.0 / n_pts as f64; n_pts]
    } else {
        Vec::new()
    };

    let n_metal = t.ncols();
    let x_metal_old = t.transpose() * &i_old;
    let mut x_ext_old = DVector::zeros(n_metal + 1);
    x_ext_old.rows_mut(0, n_metal).copy_from(&x_metal_old);
    x_ext_old[n_metal] = ip_old / config.ipn;
    let voltage_ext = t.transpose() * voltage;

    let x_ext_predicted = solve_j1(
        grid,
        limiter_handler,
        machine,
        &t,
        mey,
        &myy,
        &x_ext_old,
        &hat_old,
        &voltage_ext,
        config.ipn,
        config.blur_radius,
        dt,
    )?;
    let i_predicted = &t * x_ext_predicted.rows(0, n_metal).into_owned();

    let nk = NkSolver::new(config.nk_curr);
    let mut i_current = i_predicted;
    let mut last_gs: Option<crate::gs::GsReport> = None;

    let mut iterations = 0usize;
    loop {
        equilibrium.coil_currents = i_current.clone();
        let trial_psi = equilibrium.plasma_psi.clone();
        let gs_report = gs::solve_static(
            grid,
            machine,
            limiter_handler,
            boundary_greens,
            poisson,
            equilibrium,
            profile,
            &gs_config,
        )?;
        if gs_report.relative_residual > config.max_no_nk_psi * config.gs_tol {
            let blended = &trial_psi * config.blend_gs + &equilibrium.plasma_psi * (1.0 - config.blend_gs);
            equilibrium.set_plasma_psi(blended);
        }
        let iy_new = DVector::from_vec(gs_report.jtor_plasma_pts.clone());

        let residual = (&machine.inductance * (&i_current - &i_old)
            + mey * (&iy_new - &iy_old))
            / dt
            + machine.resistance.component_mul(&i_current)
            - voltage;

        let current_residual = residual.iter().cloned().fold(0.0_f64, |a, v| a.max(v.abs()))
            / (&i_current - &i_old).amax().max(config.curr_eps);

        let converged = current_residual < config.current_tol && gs_report.relative_residual < config.gs_tol;
        last_gs = Some(gs_report.clone());

        if converged || config.linear_only {
            return Ok(StepReport {
                iterations,
                current_residual,
                gs: last_gs.unwrap(),
            });
        }

        if iterations >= config.max_iter {
            log::warn!(
                "stepper did not converge after {} iterations (current residual {:.3e}, GS residual {:.3e})",
                iterations,
                current_residual,
                last_gs.as_ref().unwrap().relative_residual
            );
            return Err(Error::StepperNonConverged {
                current_residual,
                gs_residual: last_gs.unwrap().relative_residual,
            });
        }

        let mut f = |candidate: &DVector<f64>| -> DVector<f64> {
            equilibrium.coil_currents = candidate.clone();
            match gs::solve_static(
                grid,
                machine,
                limiter_handler,
                boundary_greens,
                poisson,
                equilibrium,
                profile,
                &gs_config,
            ) {
                Ok(report) => {
                    let iy = DVector::from_vec(report.jtor_plasma_pts.clone());
                    last_gs = Some(report);
                    (&machine.inductance * (candidate - &i_old) + mey * (&iy - &iy_old)) / dt
                        + machine.resistance.component_mul(candidate)
                        - voltage
                }
                Err(_) => DVector::from_element(candidate.len(), f64::INFINITY),
            }
        };

        let outcome = nk.arnoldi_iteration(&i_current, residual.clone(), &residual, &mut f);
        i_current += &outcome.dx;
        iterations += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use freegs_core::{Conductor, ConductorKind, Filament, PressureAxisIp};
    use freegs_core::limiter::Polygon;

    fn toy_setup() -> (Grid, Machine, LimiterHandler, BoundaryGreens, PoissonSolver, DMatrix<f64>) {
        let grid = Grid::new(0.3, 2.0, -1.6, 1.6, 25, 25);
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
        let mey = machine.build_mey(&grid, &limiter_handler);
        (grid, machine, limiter_handler, boundary_greens, poisson, mey)
    }

    fn toy_equilibrium(grid: &Grid, machine: &Machine) -> (Equilibrium, PressureAxisIp) {
        let mut equilibrium = Equilibrium::new(grid, machine.num_conductors());
        equilibrium.coil_currents[0] = 2.0e4;
        equilibrium.set_plasma_psi(DMatrix::from_fn(grid.nx, grid.ny, |i, j| {
            let r = grid.r(i) - 1.0;
            let z = grid.z(j);
            -0.05 * (r * r + z * z)
        }));
        let profile = PressureAxisIp::new(1.0e3, 3.0e5, 1.8, 1.2, 0.5);
        (equilibrium, profile)
    }

    #[test]
    fn stepper_runs_one_timestep_without_panicking() {
        let (grid, machine, limiter_handler, boundary_greens, poisson, mey) = toy_setup();
        let (mut equilibrium, mut profile) = toy_equilibrium(&grid, &machine);

        let voltage = DVector::from_row_slice(&[10.0]);
        let config = StepperConfig {
            max_iter: 5,
            ..Default::default()
        };
        let result = nlstepper(
            &grid,
            &machine,
            &limiter_handler,
            &boundary_greens,
            &poisson,
            &mey,
            &mut equilibrium,
            &mut profile,
            &voltage,
            1e-3,
            &config,
        );
        assert!(result.is_ok() || matches!(result, Err(Error::StepperNonConverged { .. }) | Err(Error::GsNonConverged { .. })));
    }

    #[test]
    fn linear_only_mode_skips_the_fixed_point_loop() {
        let (grid, machine, limiter_handler, boundary_greens, poisson, mey) = toy_setup();
        let (mut equilibrium, mut profile) = toy_equilibrium(&grid, &machine);

        let voltage = DVector::from_row_slice(&[10.0]);
        let config = StepperConfig {
            linear_only: true,
            ..Default::default()
        };
        let result = nlstepper(
            &grid,
            &machine,
            &limiter_handler,
            &boundary_greens,
            &poisson,
            &mey,
            &mut equilibrium,
            &mut profile,
            &voltage,
            1e-3,
            &config,
        );
        match result {
            Ok(report) => assert_eq!(report.iterations, 0),
            Err(Error::GsNonConverged { .. }) => {}
            Err(e) => panic!("unexpected error: {e}"),
        }
    }
}
