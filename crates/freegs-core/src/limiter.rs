//! Limiter polygon handling: inside/outside masking, the plasma-domain
//! reduction, and the diverted-vs-limited boundary decision (§4.4).

use nalgebra::DMatrix;
use std::collections::VecDeque;

use crate::grid::Grid;

/// A simple closed polygon given by its vertices, used for the limiter and
/// wall contours.
#[derive(Debug, Clone)]
pub struct Polygon {
    pub vertices: Vec<(f64, f64)>,
}

impl Polygon {
    pub fn new(vertices: Vec<(f64, f64)>) -> Self {
        Polygon { vertices }
    }

    /// Even-odd rule point-in-polygon test.
    pub fn contains(&self, r: f64, z: f64) -> bool {
        let n = self.vertices.len();
        let mut inside = false;
        let mut j = n - 1;
        for i in 0..n {
            let (ri, zi) = self.vertices[i];
            let (rj, zj) = self.vertices[j];
            if ((zi > z) != (zj > z)) && (r < (rj - ri) * (z - zi) / (zj - zi) + ri) {
                inside = !inside;
            }
            j = i;
        }
        inside
    }
}

/// Precomputed masks and index lists for restricting field operations to the
/// interior of the limiter contour.
pub struct LimiterHandler {
    pub mask_inside_limiter: DMatrix<bool>,
    /// Linear (flattened, grid-native) indices of points inside the limiter.
    pub plasma_pts: Vec<usize>,
    /// One-cell dilation of `mask_inside_limiter`, used by `core_mask_limiter`
    /// to probe limiter contact (§10.6, `make_layer_mask`).
    pub limiter_layer_mask: DMatrix<bool>,
}

impl LimiterHandler {
    pub fn build(grid: &Grid, limiter: &Polygon) -> Self {
        let mask_inside_limiter =
            DMatrix::from_fn(grid.nx, grid.ny, |i, j| limiter.contains(grid.r(i), grid.z(j)));
        let plasma_pts = (0..grid.num_points())
            .filter(|&k| {
                let (i, j) = grid.unflatten_index(k);
                mask_inside_limiter[(i, j)]
            })
            .collect();
        let limiter_layer_mask = make_layer_mask(&mask_inside_limiter);
        LimiterHandler {
            mask_inside_limiter,
            plasma_pts,
            limiter_layer_mask,
        }
    }

    /// Restrict a full 2-D field to the 1-D plasma-domain vector.
    pub fn restrict(&self, grid: &Grid, field: &DMatrix<f64>) -> Vec<f64> {
        self.plasma_pts
            .iter()
            .map(|&k| {
                let (i, j) = grid.unflatten_index(k);
                field[(i, j)]
            })
            .collect()
    }

    /// Scatter a 1-D plasma-domain vector back into a full 2-D field, zero
    /// outside the limiter.
    pub fn expand(&self, grid: &Grid, reduced: &[f64]) -> DMatrix<f64> {
        let mut field = DMatrix::zeros(grid.nx, grid.ny);
        for (&k, &v) in self.plasma_pts.iter().zip(reduced.iter()) {
            let (i, j) = grid.unflatten_index(k);
            field[(i, j)] = v;
        }
        field
    }
}

/// One-cell 4-connected dilation of `mask_inside`: true for points outside
/// the core that are adjacent to a point inside it (§10.6).
pub fn make_layer_mask(mask_inside: &DMatrix<bool>) -> DMatrix<bool> {
    let (nx, ny) = mask_inside.shape();
    DMatrix::from_fn(nx, ny, |i, j| {
        if mask_inside[(i, j)] {
            return false;
        }
        let neighbours = [
            (i.wrapping_sub(1), j),
            (i + 1, j),
            (i, j.wrapping_sub(1)),
            (i, j + 1),
        ];
        neighbours
            .iter()
            .any(|&(ni, nj)| ni < nx && nj < ny && mask_inside[(ni, nj)])
    })
}

/// Outcome of the diverted-vs-limited boundary decision.
pub struct BoundaryDecision {
    pub psi_bnd: f64,
    pub core_mask: DMatrix<bool>,
    pub limiter_flag: bool,
}

/// Decide whether the plasma boundary is set by an X-point (diverted) or by
/// limiter contact, per §4.4.
///
/// `psi` is the total flux field, `psi_xpt_candidate` the flux value at the
/// most plasma-facing X-point found by the profile collaborator,
/// `diverted_core_mask` the provisional last-closed-flux-surface core (e.g.
/// `jtor > 0`), and `limiter_layer_mask` the ring of cells just outside the
/// limiter contour.
pub fn core_mask_limiter(
    psi: &DMatrix<f64>,
    psi_xpt_candidate: f64,
    diverted_core_mask: &DMatrix<bool>,
    limiter_layer_mask: &DMatrix<bool>,
) -> BoundaryDecision {
    let (nx, ny) = psi.shape();

    let touches_layer = (0..nx)
        .flat_map(|i| (0..ny).map(move |j| (i, j)))
        .any(|(i, j)| diverted_core_mask[(i, j)] && limiter_layer_mask[(i, j)]);

    if !touches_layer {
        return BoundaryDecision {
            psi_bnd: psi_xpt_candidate,
            core_mask: diverted_core_mask.clone(),
            limiter_flag: false,
        };
    }

    // Limiter contact: find the maximum psi on the limiter layer, then flood
    // fill the connected region of {psi >= psi_layer_max} reachable from it.
    let mut psi_layer_max = f64::NEG_INFINITY;
    let mut seed = None;
    for i in 0..nx {
        for j in 0..ny {
            if limiter_layer_mask[(i, j)] && psi[(i, j)] > psi_layer_max {
                psi_layer_max = psi[(i, j)];
                seed = Some((i, j));
            }
        }
    }

    let mut core_mask = DMatrix::from_element(nx, ny, false);
    if let Some(start) = seed {
        let mut visited = DMatrix::from_element(nx, ny, false);
        let mut queue = VecDeque::new();
        queue.push_back(start);
        visited[start] = true;
        while let Some((i, j)) = queue.pop_front() {
            if psi[(i, j)] < psi_layer_max {
                continue;
            }
            core_mask[(i, j)] = true;
            let neighbours = [
                (i.wrapping_sub(1), j),
                (i + 1, j),
                (i, j.wrapping_sub(1)),
                (i, j + 1),
            ];
            for &(ni, nj) in &neighbours {
                if ni < nx && nj < ny && !visited[(ni, nj)] && psi[(ni, nj)] >= psi_layer_max {
                    visited[(ni, nj)] = true;
                    queue.push_back((ni, nj));
                }
            }
        }
    }

    BoundaryDecision {
        psi_bnd: psi_layer_max,
        core_mask,
        limiter_flag: true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square_limiter() -> Polygon {
        Polygon::new(vec![(0.2, -1.0), (1.8, -1.0), (1.8, 1.0), (0.2, 1.0)])
    }

    #[test]
    fn mask_is_inside_square() {
        let grid = Grid::new(0.1, 2.0, -2.2, 2.2, 21, 21);
        let handler = LimiterHandler::build(&grid, &square_limiter());
        // the grid center should be inside
        let (ci, cj) = (grid.nx / 2, grid.ny / 2);
        assert!(handler.mask_inside_limiter[(ci, cj)]);
        assert!(!handler.mask_inside_limiter[(0, 0)]);
    }

    #[test]
    fn layer_mask_is_disjoint_from_core() {
        let grid = Grid::new(0.1, 2.0, -2.2, 2.2, 21, 21);
        let handler = LimiterHandler::build(&grid, &square_limiter());
        for i in 0..grid.nx {
            for j in 0..grid.ny {
                assert!(!(handler.mask_inside_limiter[(i, j)] && handler.limiter_layer_mask[(i, j)]));
            }
        }
    }

    #[test]
    fn diverted_when_core_does_not_touch_layer() {
        let grid = Grid::new(0.1, 2.0, -2.2, 2.2, 21, 21);
        let handler = LimiterHandler::build(&grid, &square_limiter());
        let psi = DMatrix::from_element(grid.nx, grid.ny, 1.0);
        let core = DMatrix::from_fn(grid.nx, grid.ny, |i, j| i == grid.nx / 2 && j == grid.ny / 2);
        let decision = core_mask_limiter(&psi, 0.5, &core, &handler.limiter_layer_mask);
        assert!(!decision.limiter_flag);
        assert_eq!(decision.psi_bnd, 0.5);
    }
}
