//! Linearisation of the plasma response to conductor currents (§4.7): the
//! `dIy/dI` sensitivity matrix, the resulting effective circuit used for the
//! vertical-instability growth-rate estimate, and `automatic_timestep`.

use nalgebra::{Complex, DMatrix, DVector};

use freegs_core::limiter::core_mask_limiter;
use freegs_core::{Grid, LimiterHandler, Machine, Profile};

use crate::error::{Error, Result};

/// `dIy/dI`, the derivative of the plasma current density (restricted to the
/// plasma domain) with respect to each conductor current, evaluated around
/// the current equilibrium with the boundary flux and core mask frozen at
/// their converged values (the "stage 2 only" finite difference: stage 1,
/// the critical-point/boundary decision, runs once on the baseline).
pub fn build_d_iy_di(
    grid: &Grid,
    machine: &Machine,
    limiter_handler: &LimiterHandler,
    tokamak_psi_for: impl Fn(&DVector<f64>) -> DMatrix<f64>,
    plasma_psi: &DMatrix<f64>,
    coil_currents: &DVector<f64>,
    profile: &mut dyn Profile,
    eps: f64,
) -> Result<DMatrix<f64>> {
    let total_baseline = tokamak_psi_for(coil_currents) + plasma_psi;
    let part1 = profile.jtor_part1(grid, &total_baseline);
    let psi_xpt_candidate = part1
        .psi_bndry_candidate
        .ok_or(Error::Core(freegs_core::Error::NoCriticalPoint))?;

    let (psi_bndry, core_mask) = match &part1.diverted_core_mask {
        Some(diverted_core_mask) => {
            let decision = core_mask_limiter(
                &total_baseline,
                psi_xpt_candidate,
                diverted_core_mask,
                &limiter_handler.limiter_layer_mask,
            );
            (decision.psi_bnd, Some(decision.core_mask))
        }
        None => (psi_xpt_candidate, None),
    };

    let jtor_baseline = profile.jtor_part2(grid, &total_baseline, psi_bndry, core_mask.as_ref());
    let restricted_baseline = limiter_handler.restrict(grid, &jtor_baseline);

    let n_cond = coil_currents.len();
    let n_pts = restricted_baseline.len();
    let mut d_iy_di = DMatrix::zeros(n_pts, n_cond);

    for c in 0..n_cond {
        let mut perturbed_currents = coil_currents.clone();
        perturbed_currents[c] += eps;
        let total_pert = tokamak_psi_for(&perturbed_currents) + plasma_psi;
        let jtor_pert = profile.jtor_part2(grid, &total_pert, psi_bndry, core_mask.as_ref());
        let restricted_pert = limiter_handler.restrict(grid, &jtor_pert);
        for p in 0..n_pts {
            d_iy_di[(p, c)] = (restricted_pert[p] - restricted_baseline[p]) / eps;
        }
    }

    Ok(d_iy_di)
}

/// Fastest-growing eigenvalue of the linearised circuit `-M_eff^-1 R`, where
/// `M_eff = M + Mey dIy/dI` accounts for the flux the plasma's induced
/// current response feeds back into each conductor (§4.7). A positive real
/// part indicates a growing (unstable) mode.
pub fn growth_rate(machine: &Machine, mey: &DMatrix<f64>, d_iy_di: &DMatrix<f64>) -> Result<f64> {
    let n = machine.num_conductors();
    let m_eff = &machine.inductance + mey * d_iy_di;
    let m_eff_inv = m_eff
        .try_inverse()
        .ok_or_else(|| Error::LinearSolveFailed("effective inductance matrix is singular".into()))?;
    let r_diag = DMatrix::from_diagonal(&machine.resistance);
    let a = -(m_eff_inv * r_diag);

    let eigenvalues: DVector<Complex<f64>> = a.complex_eigenvalues();
    let max_growth = (0..n)
        .map(|k| eigenvalues[k].re)
        .fold(f64::NEG_INFINITY, f64::max);
    Ok(max_growth)
}

/// Picks a stable implicit-Euler timestep from the fastest unstable growth
/// rate, `dt = safety_factor / growth_rate` (§4.7/§10.6's
/// `automatic_timestep`). Returns [`Error::NoInstabilityFound`] if the
/// linearised system has no growing mode, matching the source's behaviour
/// of requiring the caller to supply `dt_step` manually in that case.
pub fn automatic_timestep(growth_rate: f64, safety_factor: f64) -> Result<f64> {
    if growth_rate <= 0.0 {
        return Err(Error::NoInstabilityFound);
    }
    Ok(safety_factor / growth_rate)
}

#[cfg(test)]
mod tests {
    use super::*;
    use freegs_core::{Conductor, ConductorKind, Filament};
    use freegs_core::limiter::Polygon;

    #[test]
    fn automatic_timestep_scales_inversely_with_growth_rate() {
        assert!((automatic_timestep(10.0, 0.5).unwrap() - 0.05).abs() < 1e-12);
        assert!(matches!(automatic_timestep(-1.0, 0.5), Err(Error::NoInstabilityFound)));
    }

    #[test]
    fn growth_rate_is_negative_for_a_purely_resistive_decoupled_circuit() {
        let solenoid = Conductor::new(
            "P1",
            ConductorKind::Active,
            vec![Filament::new(0.35, 0.8, 1e-3, 1.0, 1.7e-8)],
        );
        let limiter = Polygon::new(vec![(0.2, -1.0), (1.8, -1.0), (1.8, 1.0), (0.2, 1.0)]);
        let wall = limiter.clone();
        let machine = Machine::build(vec![solenoid], limiter, wall).unwrap();
        let mey = DMatrix::zeros(1, 0);
        let d_iy_di = DMatrix::zeros(0, 1);
        let rate = growth_rate(&machine, &mey, &d_iy_di).unwrap();
        assert!(rate < 0.0);
    }
}
