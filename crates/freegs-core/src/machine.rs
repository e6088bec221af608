//! Conductors, circuits and the machine's inductance/resistance matrices (§3).

use indexmap::IndexMap;
use nalgebra::{DMatrix, DVector};

use crate::error::{Error, Result};
use crate::greens::{self, mutual_inductance};
use crate::grid::Grid;
use crate::limiter::LimiterHandler;

/// A single circular current filament contributing to a conductor's current.
#[derive(Debug, Clone, Copy)]
pub struct Filament {
    pub r: f64,
    pub z: f64,
    pub area: f64,
    /// Signed turn multiplier: the filament carries `polarity * I_conductor`.
    pub polarity: f64,
    /// Resistivity of the filament material, Ω·m.
    pub resistivity: f64,
}

impl Filament {
    pub fn new(r: f64, z: f64, area: f64, polarity: f64, resistivity: f64) -> Self {
        Filament {
            r,
            z,
            area,
            polarity,
            resistivity,
        }
    }

    /// Lumped resistance of this filament, `rho * 2*pi*R / area`.
    pub fn resistance(&self) -> f64 {
        self.resistivity * 2.0 * std::f64::consts::PI * self.r / self.area
    }

    /// Self-inductance of this filament's circular ring (§3).
    pub fn self_inductance(&self) -> f64 {
        greens::self_inductance(self.r, self.area)
    }
}

/// Whether a conductor is externally driven (active) or carries induced
/// current only (passive).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConductorKind {
    Active,
    Passive,
}

/// A named conductor: either an active circuit or a passive structure,
/// carrying a single extensive current shared by all of its filaments
/// (§3: "passive filaments may be grouped into a passive structure sharing
/// a single current").
#[derive(Debug, Clone)]
pub struct Conductor {
    pub name: String,
    pub kind: ConductorKind,
    pub filaments: Vec<Filament>,
}

impl Conductor {
    pub fn new(name: impl Into<String>, kind: ConductorKind, filaments: Vec<Filament>) -> Self {
        Conductor {
            name: name.into(),
            kind,
            filaments,
        }
    }

    /// Lumped resistance of the conductor: filaments in parallel, each
    /// carrying `polarity * I`, so the conductor resistance is the harmonic
    /// combination weighted by turn count. For the common case of a single
    /// filament per turn with equal polarity magnitude this reduces to the
    /// sum of per-turn resistances divided by the number of turns squared.
    pub fn resistance(&self) -> f64 {
        if self.filaments.is_empty() {
            return 0.0;
        }
        let n_turns: f64 = self.filaments.iter().map(|f| f.polarity.abs()).sum();
        if n_turns < 1e-12 {
            return 0.0;
        }
        let sum_r: f64 = self.filaments.iter().map(|f| f.resistance()).sum();
        sum_r / (n_turns * n_turns)
    }
}

/// The assembled machine: conductor list plus the matrices derived from it.
pub struct Machine {
    pub conductors: Vec<Conductor>,
    pub limiter: crate::limiter::Polygon,
    pub wall: crate::limiter::Polygon,
    /// name -> index into `conductors`, for named lookups (active-coil
    /// voltage vectors, snapshot validation).
    pub index_by_name: IndexMap<String, usize>,
    /// Mutual-inductance matrix among all conductors, H.
    pub inductance: DMatrix<f64>,
    /// Per-conductor lumped resistance, Ω.
    pub resistance: DVector<f64>,
}

impl Machine {
    pub fn build(
        conductors: Vec<Conductor>,
        limiter: crate::limiter::Polygon,
        wall: crate::limiter::Polygon,
    ) -> Result<Self> {
        if conductors.is_empty() {
            return Err(Error::MachineSpecMissing("conductor list is empty".into()));
        }
        let mut index_by_name = IndexMap::new();
        for (k, c) in conductors.iter().enumerate() {
            if index_by_name.insert(c.name.clone(), k).is_some() {
                return Err(Error::MachineSpecMissing(format!(
                    "duplicate conductor name {:?}",
                    c.name
                )));
            }
        }

        let n = conductors.len();
        let mut inductance = DMatrix::zeros(n, n);
        for a in 0..n {
            for b in a..n {
                let mut m_ab = 0.0;
                for fa in &conductors[a].filaments {
                    for fb in &conductors[b].filaments {
                        if a == b && std::ptr::eq(fa, fb) {
                            // mutual_inductance diverges for coincident filaments;
                            // use the finite-radius self-inductance instead.
                            m_ab += fa.polarity * fa.polarity * fa.self_inductance();
                            continue;
                        }
                        m_ab += fa.polarity
                            * fb.polarity
                            * mutual_inductance(fa.r, fa.z, fb.r, fb.z);
                    }
                }
                inductance[(a, b)] = m_ab;
                inductance[(b, a)] = m_ab;
            }
        }

        if !is_positive_definite(&inductance) {
            return Err(Error::SingularInductance(
                "mutual-inductance matrix is not positive definite".into(),
            ));
        }

        let resistance = DVector::from_fn(n, |k, _| conductors[k].resistance());

        Ok(Machine {
            conductors,
            limiter,
            wall,
            index_by_name,
            inductance,
            resistance,
        })
    }

    pub fn num_conductors(&self) -> usize {
        self.conductors.len()
    }

    pub fn active_indices(&self) -> Vec<usize> {
        self.conductors
            .iter()
            .enumerate()
            .filter(|(_, c)| c.kind == ConductorKind::Active)
            .map(|(k, _)| k)
            .collect()
    }

    pub fn passive_indices(&self) -> Vec<usize> {
        self.conductors
            .iter()
            .enumerate()
            .filter(|(_, c)| c.kind == ConductorKind::Passive)
            .map(|(k, _)| k)
            .collect()
    }

    /// Passive (vessel) conductor currents extracted from a full current
    /// vector, in conductor order.
    pub fn get_vessel_currents(&self, coil_currents: &DVector<f64>) -> DVector<f64> {
        let idx = self.passive_indices();
        DVector::from_iterator(idx.len(), idx.iter().map(|&i| coil_currents[i]))
    }

    /// Unconditionally replaces the per-conductor resistance vector, e.g.
    /// after an external update to the plasma/vessel resistivity model.
    /// Callers must rebuild any cache derived from `resistance` (modal
    /// basis, implicit-Euler operator, linearisation Jacobian) afterwards.
    pub fn reset_plasma_resistivity(&mut self, new_resistance: DVector<f64>) {
        self.resistance = new_resistance;
    }

    /// Replaces `resistance` with `candidate` only if the relative change
    /// (max-norm, against the current max resistance) exceeds `threshold`.
    /// Returns whether the replacement happened, so the caller knows
    /// whether dependent caches need rebuilding.
    pub fn check_and_change_plasma_resistivity(&mut self, candidate: DVector<f64>, threshold: f64) -> bool {
        let denom = self.resistance.amax().max(1e-300);
        let rel_change = (&candidate - &self.resistance).amax() / denom;
        if rel_change > threshold {
            self.resistance = candidate;
            true
        } else {
            false
        }
    }

    /// Plasma-metal coupling matrix `Mey` (n_cond x n_plasma_pts): mutual
    /// inductance between each conductor and each plasma-domain grid point,
    /// treated as a unit-area toroidal filament (§3).
    pub fn build_mey(&self, grid: &Grid, limiter_handler: &LimiterHandler) -> DMatrix<f64> {
        let n_cond = self.num_conductors();
        let n_pts = limiter_handler.plasma_pts.len();
        let dv = grid.area_element();
        DMatrix::from_fn(n_cond, n_pts, |c, p| {
            let k = limiter_handler.plasma_pts[p];
            let (i, j) = grid.unflatten_index(k);
            let (rp, zp) = (grid.r(i), grid.z(j));
            self.conductors[c]
                .filaments
                .iter()
                .map(|f| f.polarity * mutual_inductance(f.r, f.z, rp, zp) * dv)
                .sum()
        })
    }

    /// Plasma self-inductance matrix `Myy` (n_pts x n_pts): mutual
    /// inductance between every pair of plasma-domain grid points, each
    /// treated as a toroidal filament of cross-sectional area `dv`, with the
    /// coincident-point (diagonal) divergence replaced by the finite-radius
    /// self-inductance (§4.8).
    pub fn build_myy(&self, grid: &Grid, limiter_handler: &LimiterHandler) -> DMatrix<f64> {
        let n_pts = limiter_handler.plasma_pts.len();
        let dv = grid.area_element();
        let points: Vec<(f64, f64)> = limiter_handler
            .plasma_pts
            .iter()
            .map(|&k| {
                let (i, j) = grid.unflatten_index(k);
                (grid.r(i), grid.z(j))
            })
            .collect();

        let mut myy = DMatrix::zeros(n_pts, n_pts);
        for a in 0..n_pts {
            for b in a..n_pts {
                let (ra, za) = points[a];
                let m_ab = if a == b {
                    greens::self_inductance(ra, dv)
                } else {
                    let (rb, zb) = points[b];
                    mutual_inductance(ra, za, rb, zb) * dv * dv
                };
                myy[(a, b)] = m_ab;
                myy[(b, a)] = m_ab;
            }
        }
        myy
    }
}

fn is_positive_definite(m: &DMatrix<f64>) -> bool {
    m.clone().cholesky().is_some()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::limiter::Polygon;

    fn toy_machine() -> Machine {
        let solenoid = Conductor::new(
            "Solenoid",
            ConductorKind::Active,
            vec![
                Filament::new(0.3, 0.5, 1e-4, 1.0, 1.7e-8),
                Filament::new(0.3, -0.5, 1e-4, 1.0, 1.7e-8),
            ],
        );
        let vessel = Conductor::new(
            "passive_0",
            ConductorKind::Passive,
            vec![Filament::new(1.5, 0.0, 2e-4, 1.0, 7.0e-7)],
        );
        let limiter = Polygon::new(vec![(0.2, -1.0), (1.8, -1.0), (1.8, 1.0), (0.2, 1.0)]);
        let wall = limiter.clone();
        Machine::build(vec![solenoid, vessel], limiter, wall).unwrap()
    }

    #[test]
    fn inductance_matrix_is_symmetric() {
        let machine = toy_machine();
        let m = &machine.inductance;
        let asym = (m - m.transpose()).amax();
        assert!(asym <= 1e-10 * m.amax());
    }

    #[test]
    fn active_and_passive_indices_partition_conductors() {
        let machine = toy_machine();
        assert_eq!(machine.active_indices(), vec![0]);
        assert_eq!(machine.passive_indices(), vec![1]);
    }

    #[test]
    fn get_vessel_currents_extracts_only_passive_entries() {
        let machine = toy_machine();
        let currents = DVector::from_row_slice(&[1.0e4, 37.5]);
        assert_eq!(machine.get_vessel_currents(&currents), DVector::from_row_slice(&[37.5]));
    }

    #[test]
    fn check_and_change_plasma_resistivity_respects_threshold() {
        let mut machine = toy_machine();
        let original = machine.resistance.clone();

        let tiny_change = &original * 1.0001;
        assert!(!machine.check_and_change_plasma_resistivity(tiny_change, 0.01));
        assert_eq!(machine.resistance, original);

        let big_change = &original * 2.0;
        assert!(machine.check_and_change_plasma_resistivity(big_change.clone(), 0.01));
        assert_eq!(machine.resistance, big_change);
    }

    #[test]
    fn reset_plasma_resistivity_replaces_unconditionally() {
        let mut machine = toy_machine();
        let replacement = DVector::from_row_slice(&[9.0e-8, 5.0e-7]);
        machine.reset_plasma_resistivity(replacement.clone());
        assert_eq!(machine.resistance, replacement);
    }
}
