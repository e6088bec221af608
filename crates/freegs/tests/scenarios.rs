//! Integration tests exercising the public facade end to end on small,
//! hand-verifiable scenarios. Full physical GS convergence on a realistic
//! machine is not asserted here — that needs a tuned profile and mesh far
//! beyond what can be hand-checked without running the solver.

use nalgebra::{DMatrix, DVector};

use freegs::{
    solve_static, Conductor, ConductorKind, Equilibrium, Filament, Grid, GsConfig, LimiterHandler,
    Machine, NkConfig, NkSolver, Polygon, PressureAxisIp,
};
use freegs_core::greens::BoundaryGreens;
use freegs_solver::PoissonSolver;

fn toy_machine() -> (Grid, Machine, LimiterHandler, BoundaryGreens, PoissonSolver) {
    let grid = Grid::new(0.3, 2.0, -1.6, 1.6, 33, 33);
    let solenoid = Conductor::new(
        "P1",
        ConductorKind::Active,
        vec![
            Filament::new(0.35, 0.8, 1e-3, 1.0, 1.7e-8),
            Filament::new(0.35, -0.8, 1e-3, 1.0, 1.7e-8),
        ],
    );
    let vessel = Conductor::new(
        "passive_0",
        ConductorKind::Passive,
        vec![Filament::new(1.6, 0.0, 2e-4, 1.0, 7.0e-7)],
    );
    let limiter = Polygon::new(vec![(0.4, -1.2), (1.8, -1.2), (1.8, 1.2), (0.4, 1.2)]);
    let wall = limiter.clone();
    let machine = Machine::build(vec![solenoid, vessel], limiter, wall.clone()).unwrap();
    let limiter_handler = LimiterHandler::build(&grid, &wall);
    let boundary_greens = BoundaryGreens::build(&grid);
    let poisson = PoissonSolver::build(&grid).unwrap();
    (grid, machine, limiter_handler, boundary_greens, poisson)
}

#[test]
fn machine_inductance_matrix_is_symmetric_and_positive_definite() {
    let (_, machine, _, _, _) = toy_machine();
    let m = &machine.inductance;
    let asym = (m - m.transpose()).iter().cloned().fold(0.0_f64, |a, v| a.max(v.abs()));
    assert!(asym <= 1e-8 * m.iter().cloned().fold(0.0_f64, |a, v| a.max(v.abs())));
    assert!(m.clone().cholesky().is_some());
}

#[test]
fn active_and_passive_conductors_partition_correctly() {
    let (_, machine, _, _, _) = toy_machine();
    assert_eq!(machine.active_indices(), vec![0]);
    assert_eq!(machine.passive_indices(), vec![1]);
}

#[test]
fn static_gs_solve_either_converges_or_reports_non_convergence_cleanly() {
    let (grid, machine, limiter_handler, boundary_greens, poisson) = toy_machine();
    let mut equilibrium = Equilibrium::new(&grid, machine.num_conductors());
    equilibrium.coil_currents[0] = 2.2e4;
    equilibrium.set_plasma_psi(DMatrix::from_fn(grid.nx, grid.ny, |i, j| {
        let r = grid.r(i) - 1.0;
        let z = grid.z(j);
        -0.05 * (r * r + z * z)
    }));
    let mut profile = PressureAxisIp::new(1.0e3, 3.0e5, 1.8, 1.2, 0.5);

    let outcome = solve_static(
        &grid,
        &machine,
        &limiter_handler,
        &boundary_greens,
        &poisson,
        &mut equilibrium,
        &mut profile,
        &GsConfig::default(),
    );

    match outcome {
        Ok(report) => assert!(report.relative_residual < GsConfig::default().conv_crit),
        Err(freegs_solver::Error::GsNonConverged { .. }) => {}
        Err(e) => panic!("unexpected solver error: {e}"),
    }
}

#[test]
fn newton_krylov_engine_converges_on_a_synthetic_linear_system() {
    let a = DMatrix::from_row_slice(4, 4, &[
        6.0, 1.0, 0.0, 0.0,
        1.0, 5.0, 1.0, 0.0,
        0.0, 1.0, 4.0, 1.0,
        0.0, 0.0, 1.0, 3.0,
    ]);
    let b = DVector::from_row_slice(&[1.0, -2.0, 0.5, 3.0]);
    let f = |x: &DVector<f64>| &a * x - &b;

    let solver = NkSolver::new(NkConfig {
        n_k: 4,
        conv_crit: 1e-8,
        ..Default::default()
    });

    let mut x = DVector::zeros(4);
    let mut residual = f(&x);
    for _ in 0..30 {
        if residual.norm() < 1e-10 {
            break;
        }
        let outcome = solver.arnoldi_iteration(&x, residual.clone(), &residual, &f);
        x += &outcome.dx;
        residual = f(&x);
    }

    let exact = a.clone().lu().solve(&b).unwrap();
    assert!((x - exact).norm() < 1e-4);
}
