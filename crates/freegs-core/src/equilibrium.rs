//! Equilibrium state: coil currents, plasma flux, critical points, and
//! snapshot persistence (§3, §6, §7).

use std::collections::HashMap;

use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::greens::mutual_inductance;
use crate::grid::Grid;
use crate::machine::{ConductorKind, Machine};
use crate::profile::{find_critical, CriticalPoints, Profile};

/// An equilibrium snapshot as persisted by an external caller (§6): named
/// coil currents plus the plasma flux field. Passive entries (name prefix
/// `passive`) are ignored when validating against a live machine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EquilibriumSnapshot {
    pub coil_currents: HashMap<String, f64>,
    pub plasma_psi: Vec<Vec<f64>>,
    pub r_min: f64,
    pub r_max: f64,
    pub z_min: f64,
    pub z_max: f64,
}

/// The durable equilibrium state. Mutated only by the GS solver and by the
/// stepper's commit phase (§5).
pub struct Equilibrium {
    pub coil_currents: DVector<f64>,
    pub plasma_psi: DMatrix<f64>,
    pub ip: f64,
    pub critical: Option<CriticalPoints>,
    pub limiter_flag: bool,
    /// Set whenever `plasma_psi` is mutated; cleared by whoever recomputes
    /// the derived caches that depend on it (§9: replaces the source's
    /// lazy-spline invalidation check with an explicit flag).
    psi_dirty: bool,
}

impl Equilibrium {
    pub fn new(grid: &Grid, n_conductors: usize) -> Self {
        Equilibrium {
            coil_currents: DVector::zeros(n_conductors),
            plasma_psi: DMatrix::zeros(grid.nx, grid.ny),
            ip: 0.0,
            critical: None,
            limiter_flag: false,
            psi_dirty: true,
        }
    }

    pub fn set_plasma_psi(&mut self, psi: DMatrix<f64>) {
        self.plasma_psi = psi;
        self.psi_dirty = true;
    }

    pub fn is_psi_dirty(&self) -> bool {
        self.psi_dirty
    }

    pub fn clear_psi_dirty(&mut self) {
        self.psi_dirty = false;
    }

    /// Flux produced by the metal currents alone, evaluated at every grid
    /// node via the Green's-function sum (the "tokamak psi" of §4.3).
    pub fn tokamak_psi(&self, grid: &Grid, machine: &Machine) -> DMatrix<f64> {
        DMatrix::from_fn(grid.nx, grid.ny, |i, j| {
            let (r, z) = (grid.r(i), grid.z(j));
            machine
                .conductors
                .iter()
                .enumerate()
                .map(|(c, conductor)| {
                    let i_c = self.coil_currents[c];
                    conductor
                        .filaments
                        .iter()
                        .map(|f| f.polarity * i_c * mutual_inductance(f.r, f.z, r, z))
                        .sum::<f64>()
                })
                .sum()
        })
    }

    /// Bootstraps a viable plasma flux guess by rescaling `plasma_psi` until
    /// both an O-point and an X-point appear in `tokamak_psi + plasma_psi`,
    /// per §7/§10.6's three-stage heuristic (scale up, then scale down, then
    /// exponentiate).
    pub fn adjust_psi_plasma(&mut self, grid: &Grid, tokamak_psi: &DMatrix<f64>) -> Result<()> {
        let mut n_up = 0;
        let mut found_opt = false;
        while n_up < 10 && !found_opt {
            let total = tokamak_psi + &self.plasma_psi;
            let critical = find_critical(grid, &total, None);
            if !critical.opt.is_empty() {
                found_opt = true;
                self.critical = Some(critical);
            } else {
                self.plasma_psi *= 1.5;
                n_up += 1;
            }
        }
        if !found_opt {
            return Err(Error::CriticalPointBootstrapFailed);
        }
        if self.critical.as_ref().map(|c| !c.xpt.is_empty()).unwrap_or(false) {
            self.psi_dirty = true;
            return Ok(());
        }

        // Stage 2: scale down toward an X-point.
        let n_down_max = (n_up as f64 + (1.5_f64).ln() - (1.1_f64).ln()).floor().max(0.0) as u32;
        let mut n_down = 0;
        let mut candidate = self.plasma_psi.clone();
        let mut found_xpt = false;
        while n_down < n_down_max && !found_xpt {
            candidate /= 1.1;
            n_down += 1;
            let total = tokamak_psi + &candidate;
            let critical = find_critical(grid, &total, None);
            if !critical.opt.is_empty() && !critical.xpt.is_empty() {
                found_xpt = true;
                self.critical = Some(critical);
            }
        }
        if found_xpt {
            self.plasma_psi = candidate;
            self.psi_dirty = true;
            return Ok(());
        }

        // Stage 3: exponentiate a psi_max-normalised copy.
        let psi_max = self.plasma_psi.amax();
        if psi_max.abs() < 1e-300 {
            return Err(Error::CriticalPointBootstrapFailed);
        }
        let e_plasma_psi = self.plasma_psi.map(|v| v / psi_max);
        for n_exp in 1..=10 {
            let n_plasma_psi = e_plasma_psi.map(|v| psi_max * v.powf(n_exp as f64 * 1.25));
            let total = tokamak_psi + &n_plasma_psi;
            let critical = find_critical(grid, &total, None);
            if !critical.opt.is_empty() && !critical.xpt.is_empty() {
                self.plasma_psi = n_plasma_psi;
                self.critical = Some(critical);
                self.psi_dirty = true;
                return Ok(());
            }
        }
        Err(Error::CriticalPointBootstrapFailed)
    }

    /// Loads a persisted snapshot, validating the active coil name set and
    /// resampling `plasma_psi` onto `grid` (bicubic) with the stabilising
    /// factor-of-2 rescale, per §6.
    pub fn load_snapshot(
        &mut self,
        grid: &Grid,
        machine: &Machine,
        snapshot: &EquilibriumSnapshot,
    ) -> Result<()> {
        let active_in_machine: Vec<&str> = machine
            .conductors
            .iter()
            .filter(|c| c.kind == ConductorKind::Active)
            .map(|c| c.name.as_str())
            .collect();
        let active_in_snapshot: Vec<&str> = snapshot
            .coil_currents
            .keys()
            .filter(|name| !name.starts_with("passive"))
            .map(|s| s.as_str())
            .collect();

        let mut sorted_machine = active_in_machine.clone();
        sorted_machine.sort_unstable();
        let mut sorted_snapshot = active_in_snapshot.clone();
        sorted_snapshot.sort_unstable();

        if sorted_machine != sorted_snapshot {
            log::warn!(
                "{}; keeping existing coil currents",
                Error::IncompatibleInitialEquilibrium(format!(
                    "snapshot {:?} vs machine {:?}",
                    sorted_snapshot, sorted_machine
                ))
            );
        } else {
            for (name, &idx) in &machine.index_by_name {
                if let Some(&current) = snapshot.coil_currents.get(name) {
                    self.coil_currents[idx] = current;
                }
            }
        }

        let src_nx = snapshot.plasma_psi.len();
        let src_ny = if src_nx > 0 { snapshot.plasma_psi[0].len() } else { 0 };
        let src = DMatrix::from_fn(src_nx, src_ny, |i, j| snapshot.plasma_psi[i][j]);

        let resampled = if (src_nx, src_ny) == (grid.nx, grid.ny) {
            src
        } else {
            bicubic_resample(
                &src,
                snapshot.r_min,
                snapshot.r_max,
                snapshot.z_min,
                snapshot.z_max,
                grid,
            )
        };

        // Factor of 2: moves the initialisation away from a fragile GS-exact
        // solution (§6).
        self.set_plasma_psi(resampled * 2.0);
        Ok(())
    }

    pub fn save_snapshot(&self, grid: &Grid, machine: &Machine) -> EquilibriumSnapshot {
        let mut coil_currents = HashMap::new();
        for (name, &idx) in &machine.index_by_name {
            coil_currents.insert(name.clone(), self.coil_currents[idx]);
        }
        let plasma_psi = (0..grid.nx)
            .map(|i| (0..grid.ny).map(|j| self.plasma_psi[(i, j)]).collect())
            .collect();
        EquilibriumSnapshot {
            coil_currents,
            plasma_psi,
            r_min: grid.r_min,
            r_max: grid.r_max,
            z_min: grid.z_min,
            z_max: grid.z_max,
        }
    }

    /// Recomputes `ip` and the critical points from the supplied profile's
    /// last `jtor` evaluation; called after a converged GS solve.
    pub fn finalize_from_profile(&mut self, profile: &dyn Profile) {
        self.ip = profile.plasma_current();
        self.critical = profile.critical_points().cloned();
    }
}

fn catmull_rom(p0: f64, p1: f64, p2: f64, p3: f64, t: f64) -> f64 {
    let t2 = t * t;
    let t3 = t2 * t;
    0.5 * ((2.0 * p1)
        + (-p0 + p2) * t
        + (2.0 * p0 - 5.0 * p1 + 4.0 * p2 - p3) * t2
        + (-p0 + 3.0 * p1 - 3.0 * p2 + p3) * t3)
}

/// Bicubic (Catmull-Rom) resample of a uniform source grid onto the
/// destination `Grid`, used to rehydrate a persisted snapshot at a
/// different resolution (§6).
fn bicubic_resample(
    src: &DMatrix<f64>,
    r_min: f64,
    r_max: f64,
    z_min: f64,
    z_max: f64,
    dst: &Grid,
) -> DMatrix<f64> {
    let (src_nx, src_ny) = src.shape();
    let dr = (r_max - r_min) / (src_nx as f64 - 1.0);
    let dz = (z_max - z_min) / (src_ny as f64 - 1.0);

    let clamp_idx = |k: isize, n: usize| -> usize { k.clamp(0, n as isize - 1) as usize };

    DMatrix::from_fn(dst.nx, dst.ny, |i, j| {
        let fr = ((dst.r(i) - r_min) / dr).clamp(0.0, (src_nx - 1) as f64);
        let fz = ((dst.z(j) - z_min) / dz).clamp(0.0, (src_ny - 1) as f64);
        let i0 = fr.floor() as isize;
        let j0 = fz.floor() as isize;
        let tr = fr - i0 as f64;
        let tz = fz - j0 as f64;

        let mut rows = [0.0_f64; 4];
        for (dj, row) in rows.iter_mut().enumerate() {
            let jj = clamp_idx(j0 - 1 + dj as isize, src_ny);
            let p0 = src[(clamp_idx(i0 - 1, src_nx), jj)];
            let p1 = src[(clamp_idx(i0, src_nx), jj)];
            let p2 = src[(clamp_idx(i0 + 1, src_nx), jj)];
            let p3 = src[(clamp_idx(i0 + 2, src_nx), jj)];
            *row = catmull_rom(p0, p1, p2, p3, tr);
        }
        catmull_rom(rows[0], rows[1], rows[2], rows[3], tz)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resample_is_identity_on_matching_grid() {
        let grid = Grid::new(0.1, 2.0, -2.2, 2.2, 9, 9);
        let src = DMatrix::from_fn(9, 9, |i, j| (i * 9 + j) as f64);
        let out = bicubic_resample(&src, 0.1, 2.0, -2.2, 2.2, &grid);
        for i in 0..9 {
            for j in 0..9 {
                assert!((out[(i, j)] - src[(i, j)]).abs() < 1e-8);
            }
        }
    }

    #[test]
    fn resample_upsamples_smoothly() {
        let grid = Grid::new(0.1, 2.0, -2.2, 2.2, 17, 17);
        let src = DMatrix::from_fn(5, 5, |i, _j| i as f64);
        let out = bicubic_resample(&src, 0.1, 2.0, -2.2, 2.2, &grid);
        assert!(out[(0, 0)] < out[(16, 0)]);
    }
}
