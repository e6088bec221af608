//! Benchmarks for the static GS solve on a small synthetic machine.

use criterion::{criterion_group, criterion_main, black_box, BenchmarkId, Criterion};
use nalgebra::DMatrix;

use freegs_core::limiter::Polygon;
use freegs_core::{Conductor, ConductorKind, Equilibrium, Filament, Grid, LimiterHandler, Machine, PressureAxisIp};
use freegs_core::greens::BoundaryGreens;
use freegs_solver::{solve_static, GsConfig, PoissonSolver};

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
    let limiter = Polygon::new(vec![(0.4, -1.2), (1.8, -1.2), (1.8, 1.2), (0.4, 1.2)]);
    let wall = limiter.clone();
    let machine = Machine::build(vec![solenoid], limiter, wall.clone()).unwrap();
    let limiter_handler = LimiterHandler::build(&grid, &wall);
    let boundary_greens = BoundaryGreens::build(&grid);
    let poisson = PoissonSolver::build(&grid).unwrap();
    (grid, machine, limiter_handler, boundary_greens, poisson)
}

fn bench_static_solve(c: &mut Criterion) {
    let mut group = c.benchmark_group("static_gs_solve");
    let (grid, machine, limiter_handler, boundary_greens, poisson) = toy_machine();

    group.bench_with_input(BenchmarkId::from_parameter(grid.nx), &grid.nx, |bencher, _| {
        bencher.iter(|| {
            let mut equilibrium = Equilibrium::new(&grid, machine.num_conductors());
            equilibrium.coil_currents[0] = 2.0e4;
            equilibrium.set_plasma_psi(DMatrix::from_fn(grid.nx, grid.ny, |i, j| {
                let r = grid.r(i) - 1.0;
                let z = grid.z(j);
                -0.05 * (r * r + z * z)
            }));
            let mut profile = PressureAxisIp::new(1.0e3, 3.0e5, 1.8, 1.2, 0.5);
            let _ = solve_static(
                black_box(&grid),
                black_box(&machine),
                black_box(&limiter_handler),
                black_box(&boundary_greens),
                black_box(&poisson),
                &mut equilibrium,
                &mut profile,
                &GsConfig::default(),
            );
        });
    });

    group.finish();
}

criterion_group!(benches, bench_static_solve);
criterion_main!(benches);
