//! The "J1" one-shot circuit predictor (§4.8): a single linear implicit-Euler
//! step of the extensive circuit equation (metal conductors plus the
//! contracted plasma scalar equation), using a frozen normalised plasma
//! current shape (`hatIy = Jtor / Ip`), smoothed by `box_blur`, as the
//! left-contraction kernel `hatIy_left` that turns the plasma's
//! distributed circuit equation into one scalar row.

use nalgebra::{DMatrix, DVector};

use freegs_core::{Grid, LimiterHandler, Machine};

use crate::error::{Error, Result};

/// Separable box blur (replicate-edge boundary) of radius `radius`, applied
/// to the normalised plasma current shape (`hatIy = Jtor / Ip`) before it
/// enters the circuit equation, smoothing the grid-scale noise a raw
/// finite-difference `Jtor` carries (§4.8).
pub fn box_blur(field: &DMatrix<f64>, radius: usize) -> DMatrix<f64> {
    if radius == 0 {
        return field.clone();
    }
    let (nx, ny) = field.shape();
    let clamp = |v: isize, n: usize| v.clamp(0, n as isize - 1) as usize;

    let mut horiz = DMatrix::zeros(nx, ny);
    for j in 0..ny {
        for i in 0..nx {
            let mut sum = 0.0;
            let mut count = 0.0;
            for di in -(radius as isize)..=(radius as isize) {
                sum += field[(clamp(i as isize + di, nx), j)];
                count += 1.0;
            }
            horiz[(i, j)] = sum / count;
        }
    }

    let mut out = DMatrix::zeros(nx, ny);
    for j in 0..ny {
        for i in 0..nx {
            let mut sum = 0.0;
            let mut count = 0.0;
            for dj in -(radius as isize)..=(radius as isize) {
                sum += horiz[(i, clamp(j as isize + dj, ny))];
                count += 1.0;
            }
            out[(i, j)] = sum / count;
        }
    }
    out
}

/// One linear implicit-Euler step of the extensive circuit equation (§4.8):
/// the metal conductors' `M dI/dt + R I = V`, plus one extra row from
/// contracting the plasma's own distributed circuit equation
/// `Iy^T (Myy dIy/dt + Mey^T dI/dt) = 0` from the left by a box-blurred
/// `hatIy`, giving a single `(n_metal+1) x (n_metal+1)` linear system for
/// the metal currents (in the caller's `t`-projected coordinates) and the
/// plasma current together. `hatIy` is assumed frozen over the step — the
/// usual "J1" simplification for a one-shot predictor, ahead of the actual
/// GS re-solve that recovers the true `Iy` shape at `t+dt`.
///
/// `t` projects extensive metal coordinates (active currents plus kept
/// passive modal coordinates) into the full conductor space, so
/// `machine.inductance`/`resistance`/`mey` don't need to be pre-reduced by
/// the caller. Returns the extensive state `[x_metal_new; Ip_new/ipn]`.
#[allow(clippy::too_many_arguments)]
pub fn solve_j1(
    grid: &Grid,
    limiter_handler: &LimiterHandler,
    machine: &Machine,
    t: &DMatrix<f64>,
    mey: &DMatrix<f64>,
    myy: &DMatrix<f64>,
    x_ext_old: &DVector<f64>,
    hat_iy: &[f64],
    voltage_ext: &DVector<f64>,
    ipn: f64,
    blur_radius: usize,
    dt: f64,
) -> Result<DVector<f64>> {
    let n_metal = t.ncols();
    if x_ext_old.len() != n_metal + 1 || voltage_ext.len() != n_metal {
        return Err(Error::DimensionMismatch {
            expected: n_metal + 1,
            actual: x_ext_old.len(),
        });
    }

    let hat_field = limiter_handler.expand(grid, hat_iy);
    let hat_left = DVector::from_vec(limiter_handler.restrict(grid, &box_blur(&hat_field, blur_radius)));

    let m_ext = t.transpose() * &machine.inductance * t;
    let r_ext = t.transpose() * DMatrix::from_diagonal(&machine.resistance) * t;
    let mey_ext = t.transpose() * mey;

    let x_metal_old = x_ext_old.rows(0, n_metal).into_owned();
    let ip_old = x_ext_old[n_metal] * ipn;

    // Both rows are scaled so the unknown tied to the extensive vector's last
    // entry is always `s = Ip/ipn`, not `Ip` itself.
    let mey_hat = &mey_ext * &hat_left;
    let myy_hat_left = (hat_left.transpose() * myy * &hat_left)[(0, 0)];

    let mut a = DMatrix::zeros(n_metal + 1, n_metal + 1);
    let mut b = DVector::zeros(n_metal + 1);

    a.view_mut((0, 0), (n_metal, n_metal))
        .copy_from(&(&m_ext / dt + &r_ext));
    for row in 0..n_metal {
        a[(row, n_metal)] = mey_hat[row] * ipn / dt;
    }
    let b_metal = voltage_ext + (&m_ext / dt) * &x_metal_old + (&mey_hat / dt) * ip_old;
    b.rows_mut(0, n_metal).copy_from(&b_metal);

    let plasma_row = mey_hat.transpose() / (dt * ipn);
    for col in 0..n_metal {
        a[(n_metal, col)] = plasma_row[(0, col)];
    }
    a[(n_metal, n_metal)] = myy_hat_left / dt;
    b[n_metal] = (plasma_row * &x_metal_old)[(0, 0)] + myy_hat_left / dt * (ip_old / ipn);

    let decomp = a
        .lu()
        .solve(&b)
        .ok_or_else(|| Error::LinearSolveFailed("extensive J1 system is singular".into()))?;
    Ok(decomp)
}

#[cfg(test)]
mod tests {
    use super::*;
    use freegs_core::{Conductor, ConductorKind, Filament};
    use freegs_core::limiter::Polygon;

    #[test]
    fn solve_j1_advances_a_single_resistive_circuit_toward_its_driven_current() {
        let grid = Grid::new(0.3, 2.0, -1.6, 1.6, 17, 17);
        let solenoid = Conductor::new(
            "P1",
            ConductorKind::Active,
            vec![Filament::new(0.35, 0.0, 1e-3, 1.0, 1.7e-8)],
        );
        let limiter = Polygon::new(vec![(0.4, -1.2), (1.8, -1.2), (1.8, 1.2), (0.4, 1.2)]);
        let wall = limiter.clone();
        let machine = Machine::build(vec![solenoid], limiter, wall.clone()).unwrap();
        let limiter_handler = LimiterHandler::build(&grid, &wall);
        let mey = machine.build_mey(&grid, &limiter_handler);
        let myy = machine.build_myy(&grid, &limiter_handler);

        let t = DMatrix::identity(1, 1);
        let n_pts = limiter_handler.plasma_pts.len();
        let hat_iy = vec![1.0 / n_pts as f64; n_pts];

        let x_ext_old = DVector::from_row_slice(&[0.0, 0.0]);
        let voltage_ext = DVector::from_row_slice(&[10.0]);

        let result = solve_j1(
            &grid,
            &limiter_handler,
            &machine,
            &t,
            &mey,
            &myy,
            &x_ext_old,
            &hat_iy,
            &voltage_ext,
            1.0e3,
            1,
            1e-3,
        )
        .unwrap();

        assert!(result[0] > 0.0);
        assert!(result[0].is_finite());
        assert!(result[1].is_finite());
    }

    #[test]
    fn box_blur_preserves_a_constant_field() {
        let field = DMatrix::from_element(9, 9, 3.0);
        let blurred = box_blur(&field, 2);
        assert!((blurred[(4, 4)] - 3.0).abs() < 1e-12);
    }

    #[test]
    fn box_blur_smooths_a_single_spike() {
        let mut field = DMatrix::zeros(9, 9);
        field[(4, 4)] = 9.0;
        let blurred = box_blur(&field, 1);
        assert!(blurred[(4, 4)] < 9.0);
        assert!(blurred[(3, 4)] > 0.0);
    }
}
