//! Axisymmetric vacuum Green's function and free-boundary closure.
//!
//! The mutual flux between two coaxial circular filaments is a classical
//! result in terms of complete elliptic integrals of the first and second
//! kind; see e.g. Jackson, *Classical Electrodynamics*, §5.5.

use std::f64::consts::PI;

use nalgebra::DMatrix;

use crate::grid::Grid;

/// Vacuum permeability, in H/m.
pub const MU0: f64 = 4.0 * PI * 1e-7;

/// Complete elliptic integral of the first kind, `K(m)`, via the
/// arithmetic-geometric mean (Abramowitz & Stegun 17.6).
fn ellip_k(m: f64) -> f64 {
    let mut a = 1.0_f64;
    let mut b = (1.0 - m).sqrt();
    for _ in 0..32 {
        let a_next = 0.5 * (a + b);
        let b_next = (a * b).sqrt();
        if (a_next - a).abs() < 1e-15 {
            a = a_next;
            break;
        }
        a = a_next;
        b = b_next;
    }
    PI / (2.0 * a)
}

/// Complete elliptic integral of the second kind, `E(m)`, via the same
/// AGM recursion, accumulating the Legendre sum of squared differences.
fn ellip_e(m: f64) -> f64 {
    let mut a = 1.0_f64;
    let mut b = (1.0 - m).sqrt();
    let mut c = m.sqrt();
    let mut sum = 0.5 * c * c;
    let mut pow2 = 1.0_f64;
    for _ in 0..32 {
        let a_next = 0.5 * (a + b);
        let b_next = (a * b).sqrt();
        let c_next = 0.5 * (a - b);
        pow2 *= 2.0;
        sum += pow2 * c_next * c_next;
        a = a_next;
        b = b_next;
        c = c_next;
        if c.abs() < 1e-15 {
            break;
        }
    }
    let k = ellip_k(m);
    k * (1.0 - sum)
}

/// Mutual flux per unit current between a filament at `(r_src, z_src)` and an
/// observation point at `(r, z)`, i.e. the axisymmetric vacuum Green's
/// function `G(R, Z; R', Z')`.
///
/// Returns zero for a coincident point (the self-term diverges and is
/// handled separately by callers that need the diagonal of the Green's
/// matrix, per §4.1's instruction to zero the diagonal self-entry).
pub fn greens(r: f64, z: f64, r_src: f64, z_src: f64) -> f64 {
    let denom = (r + r_src).powi(2) + (z - z_src).powi(2);
    if denom < 1e-300 {
        return 0.0;
    }
    let k2 = 4.0 * r * r_src / denom;
    if !(0.0..1.0).contains(&k2) {
        return 0.0;
    }
    let k = k2.sqrt();
    if k < 1e-12 {
        return 0.0;
    }
    (MU0 / (2.0 * PI)) * (r * r_src).sqrt() * ((2.0 - k2) * ellip_k(k2) - 2.0 * ellip_e(k2)) / k
}

/// Mutual inductance between two circular filaments, `M_ij = 2*pi*G(i,j)`.
pub fn mutual_inductance(r1: f64, z1: f64, r2: f64, z2: f64) -> f64 {
    2.0 * PI * greens(r1, z1, r2, z2)
}

/// Self-inductance of a single circular filament/ring of major radius `r`
/// and cross-sectional `area`, via the standard thin-ring approximation for
/// a uniform current distribution, `L = mu0*R*(ln(8R/a) - 2 + 0.25)`, with
/// minor radius `a = sqrt(area/pi)`. `mutual_inductance` diverges for
/// coincident filaments, so same-filament diagonal terms use this instead.
pub fn self_inductance(r: f64, area: f64) -> f64 {
    let minor_radius = (area / PI).sqrt();
    MU0 * r * ((8.0 * r / minor_radius).ln() - 2.0 + 0.25)
}

/// Precomputed Green's-function responses from every grid node to every
/// boundary node of the computational rectangle, used to close the free
/// boundary Poisson solve with Dirichlet data (§4.1).
pub struct BoundaryGreens {
    boundary_nodes: Vec<(usize, usize)>,
    /// `rows[b]` holds `G(R_b,Z_b; R_ij,Z_ij) * dRdZ` for every interior node,
    /// flattened in the grid's native `(i,j)` flattening order, self-entry zeroed.
    rows: Vec<Vec<f64>>,
}

impl BoundaryGreens {
    pub fn build(grid: &Grid) -> Self {
        let boundary_nodes = grid.boundary_indices();
        let dv = grid.area_element();
        let rows = boundary_nodes
            .iter()
            .map(|&(bi, bj)| {
                let rb = grid.r(bi);
                let zb = grid.z(bj);
                (0..grid.num_points())
                    .map(|k| {
                        let (i, j) = grid.unflatten_index(k);
                        if i == bi && j == bj {
                            0.0
                        } else {
                            greens(rb, zb, grid.r(i), grid.z(j)) * dv
                        }
                    })
                    .collect()
            })
            .collect();
        BoundaryGreens {
            boundary_nodes,
            rows,
        }
    }

    pub fn boundary_nodes(&self) -> &[(usize, usize)] {
        &self.boundary_nodes
    }

    /// Boundary flux due to the plasma current density field `j_tor`,
    /// `psi_b = sum_ij G_b,ij * J_tor(i,j)` (§4.1).
    pub fn boundary_flux(&self, grid: &Grid, j_tor: &DMatrix<f64>) -> Vec<f64> {
        self.rows
            .iter()
            .map(|row| {
                row.iter()
                    .enumerate()
                    .map(|(k, g)| {
                        let (i, j) = grid.unflatten_index(k);
                        g * j_tor[(i, j)]
                    })
                    .sum()
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mutual_inductance_is_symmetric() {
        let m12 = mutual_inductance(1.0, 0.2, 1.4, -0.3);
        let m21 = mutual_inductance(1.4, -0.3, 1.0, 0.2);
        assert!((m12 - m21).abs() < 1e-12 * m12.abs().max(1.0));
    }

    #[test]
    fn greens_decreases_with_separation() {
        let near = greens(1.0, 0.0, 1.0, 0.01);
        let far = greens(1.0, 0.0, 1.0, 1.0);
        assert!(near > far);
    }

    #[test]
    fn self_inductance_is_positive_and_grows_with_major_radius() {
        let small = self_inductance(0.3, 1e-3);
        let large = self_inductance(1.2, 1e-3);
        assert!(small > 0.0);
        assert!(large > small);
    }

    #[test]
    fn boundary_greens_row_count_matches_perimeter() {
        let grid = Grid::new(0.1, 2.0, -2.2, 2.2, 9, 7);
        let bg = BoundaryGreens::build(&grid);
        assert_eq!(bg.boundary_nodes().len(), 2 * grid.nx + 2 * grid.ny - 4);
    }
}
