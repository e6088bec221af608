//! Command-line scenario runner for the free-boundary GS / evolutive engine.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use nalgebra::{DMatrix, DVector};

use freegs_core::greens::BoundaryGreens;
use freegs_core::limiter::Polygon;
use freegs_core::{Conductor, ConductorKind, Equilibrium, Filament, Grid, LimiterHandler, Machine, PressureAxisIp};
use freegs_solver::{nlstepper, solve_static, GsConfig, PoissonSolver, StepperConfig};

#[derive(Parser)]
#[command(name = "freegs-rs", about = "Free-boundary Grad-Shafranov scenario runner")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Radial/vertical grid resolution (nx = ny).
    #[arg(long, default_value_t = 65, global = true)]
    resolution: usize,
}

#[derive(Subcommand)]
enum Command {
    /// Solve a single static free-boundary equilibrium.
    Solve {
        #[arg(long, default_value_t = 2.0e4)]
        solenoid_current: f64,
    },
    /// Run the evolutive stepper for a fixed number of timesteps.
    Evolve {
        #[arg(long, default_value_t = 2.0e4)]
        solenoid_current: f64,
        #[arg(long, default_value_t = 10)]
        steps: usize,
        #[arg(long, default_value_t = 1.0e-3)]
        dt: f64,
        #[arg(long, default_value_t = 0.0)]
        voltage: f64,
    },
    /// Load a persisted equilibrium snapshot and report its critical points.
    Inspect { snapshot: PathBuf },
}

fn toy_machine() -> Result<(Grid, Machine, LimiterHandler, BoundaryGreens, PoissonSolver)> {
    let grid = Grid::new(0.3, 2.0, -1.6, 1.6, 65, 65);
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
    let machine = Machine::build(vec![solenoid], limiter, wall.clone())
        .context("failed to assemble machine")?;
    let limiter_handler = LimiterHandler::build(&grid, &wall);
    let boundary_greens = BoundaryGreens::build(&grid);
    let poisson = PoissonSolver::build(&grid).context("failed to factorise Delta* operator")?;
    Ok((grid, machine, limiter_handler, boundary_greens, poisson))
}

fn seed_plasma_psi(grid: &Grid) -> DMatrix<f64> {
    DMatrix::from_fn(grid.nx, grid.ny, |i, j| {
        let r = grid.r(i) - 1.0;
        let z = grid.z(j);
        -0.05 * (r * r + z * z)
    })
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    match cli.command {
        Command::Solve { solenoid_current } => {
            let (grid, machine, limiter_handler, boundary_greens, poisson) = toy_machine()?;
            let mut equilibrium = Equilibrium::new(&grid, machine.num_conductors());
            equilibrium.coil_currents[0] = solenoid_current;
            equilibrium.set_plasma_psi(seed_plasma_psi(&grid));
            let mut profile = PressureAxisIp::new(1.0e3, 3.0e5, 1.8, 1.2, 0.5);

            let report = solve_static(
                &grid,
                &machine,
                &limiter_handler,
                &boundary_greens,
                &poisson,
                &mut equilibrium,
                &mut profile,
                &GsConfig::default(),
            )
            .map_err(|e| anyhow::anyhow!("GS solve failed: {e}"))?;

            println!("Static equilibrium converged");
            println!("  iterations          : {}", report.iterations);
            println!("  relative residual   : {:.3e}", report.relative_residual);
            println!("  boundary flux        : {:.6}", report.psi_bndry);
            println!("  limiter-bound        : {}", report.limiter_flag);
            println!("  plasma current (Ip)  : {:.6e} A", equilibrium.ip);
        }
        Command::Evolve {
            solenoid_current,
            steps,
            dt,
            voltage,
        } => {
            let (grid, machine, limiter_handler, boundary_greens, poisson) = toy_machine()?;
            let mey = machine.build_mey(&grid, &limiter_handler);
            let mut equilibrium = Equilibrium::new(&grid, machine.num_conductors());
            equilibrium.coil_currents[0] = solenoid_current;
            equilibrium.set_plasma_psi(seed_plasma_psi(&grid));
            let mut profile = PressureAxisIp::new(1.0e3, 3.0e5, 1.8, 1.2, 0.5);
            let voltages = DVector::from_element(machine.num_conductors(), voltage);
            let config = StepperConfig::default();

            for step in 0..steps {
                let report = nlstepper(
                    &grid,
                    &machine,
                    &limiter_handler,
                    &boundary_greens,
                    &poisson,
                    &mey,
                    &mut equilibrium,
                    &mut profile,
                    &voltages,
                    dt,
                    &config,
                )
                .map_err(|e| anyhow::anyhow!("stepper failed at step {step}: {e}"))?;

                println!(
                    "step {:>4}  Ip = {:>12.6e} A  current residual = {:.3e}  GS iters = {}",
                    step, equilibrium.ip, report.current_residual, report.gs.iterations
                );
            }
        }
        Command::Inspect { snapshot } => {
            let data = std::fs::read_to_string(&snapshot)
                .with_context(|| format!("failed to read {}", snapshot.display()))?;
            let snap: freegs_core::EquilibriumSnapshot =
                serde_json::from_str(&data).context("failed to parse snapshot JSON")?;
            println!("Loaded snapshot from {}", snapshot.display());
            println!("  coils              : {}", snap.coil_currents.len());
            println!(
                "  grid bounds        : R in [{:.3}, {:.3}], Z in [{:.3}, {:.3}]",
                snap.r_min, snap.r_max, snap.z_min, snap.z_max
            );
        }
    }

    Ok(())
}
