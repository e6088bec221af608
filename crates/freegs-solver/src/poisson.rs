//! Inner linear solver for the Grad-Shafranov elliptic operator (§4.2):
//! `Delta* psi = -mu0 R Jtor` with prescribed Dirichlet boundary values.
//!
//! The discretised `Delta*` operator depends only on the grid, so its
//! triplet assembly is done once in [`PoissonSolver::build`] and reused
//! for every right-hand side, mirroring `solve_sparse`'s triplet/faer-LU
//! idiom in the reference circuit solver's linear-algebra layer.

use faer::prelude::*;
use faer::sparse::{SparseColMat, Triplet};
use nalgebra::DMatrix;

use freegs_core::Grid;

use crate::error::{Error, Result};

/// The finite-difference `Delta*` operator on a fixed grid, stored as
/// triplets so a fresh sparse LU factorisation can be cheaply rebuilt for
/// each right-hand side. Interior rows hold the standard second-order
/// `Delta*` stencil; boundary rows are the identity (Dirichlet closure).
pub struct PoissonSolver {
    nx: usize,
    ny: usize,
    triplets: Vec<Triplet<usize, usize, f64>>,
}

impl PoissonSolver {
    pub fn build(grid: &Grid) -> Result<Self> {
        let (nx, ny) = (grid.nx, grid.ny);
        let dr = grid.dr;
        let dz = grid.dz;
        let n = nx * ny;
        let mut triplets = Vec::with_capacity(5 * n);

        let idx = |i: usize, j: usize| j * nx + i;

        for j in 0..ny {
            for i in 0..nx {
                let row = idx(i, j);
                if grid.is_boundary(i, j) {
                    triplets.push(Triplet::new(row, row, 1.0));
                    continue;
                }
                let r = grid.r(i);
                let c_e = 1.0 / (dr * dr) - 1.0 / (2.0 * r * dr);
                let c_w = 1.0 / (dr * dr) + 1.0 / (2.0 * r * dr);
                let c_n = 1.0 / (dz * dz);
                let c_s = 1.0 / (dz * dz);
                let c_c = -(2.0 / (dr * dr) + 2.0 / (dz * dz));

                triplets.push(Triplet::new(row, idx(i + 1, j), c_e));
                triplets.push(Triplet::new(row, idx(i - 1, j), c_w));
                triplets.push(Triplet::new(row, idx(i, j + 1), c_n));
                triplets.push(Triplet::new(row, idx(i, j - 1), c_s));
                triplets.push(Triplet::new(row, row, c_c));
            }
        }

        // Fail fast if the operator cannot even be factorised once; every
        // later `solve` call reuses these triplets unchanged.
        let _ = SparseColMat::<usize, f64>::try_new_from_triplets(n, n, &triplets)
            .map_err(|_| Error::LinearSolveFailed("failed to assemble Delta* operator".into()))?
            .sp_lu()
            .map_err(|_| Error::LinearSolveFailed("Delta* operator is singular".into()))?;

        Ok(PoissonSolver { nx, ny, triplets })
    }

    /// Solves `Delta* psi = rhs_interior` with `rhs_boundary[i,j]` imposed as
    /// Dirichlet data on the outer rectangle (§4.1-4.2). `rhs_interior` is
    /// `-mu0 R Jtor`; `rhs_boundary` is consulted only at boundary nodes.
    pub fn solve(
        &self,
        grid: &Grid,
        rhs_interior: &DMatrix<f64>,
        rhs_boundary: &DMatrix<f64>,
    ) -> Result<DMatrix<f64>> {
        let n = self.nx * self.ny;
        let sparse = SparseColMat::<usize, f64>::try_new_from_triplets(n, n, &self.triplets)
            .map_err(|_| Error::LinearSolveFailed("failed to assemble Delta* operator".into()))?;
        let lu = sparse
            .sp_lu()
            .map_err(|_| Error::LinearSolveFailed("Delta* operator is singular".into()))?;

        let mut rhs = Col::<f64>::zeros(n);
        for j in 0..self.ny {
            for i in 0..self.nx {
                let row = j * self.nx + i;
                rhs[row] = if grid.is_boundary(i, j) {
                    rhs_boundary[(i, j)]
                } else {
                    rhs_interior[(i, j)]
                };
            }
        }

        let sol = lu.solve(&rhs);
        Ok(DMatrix::from_fn(self.nx, self.ny, |i, j| sol[j * self.nx + i]))
    }
}
