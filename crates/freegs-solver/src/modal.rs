//! Passive-structure modal reduction (§4.6): diagonalises the metal circuit
//! equation in the generalised eigenbasis of the resistance and inductance
//! matrices, then prunes modes that decay too fast or couple too weakly to
//! the plasma to matter for the timescales the stepper cares about.

use nalgebra::{DMatrix, DVector};

use crate::error::{Error, Result};

pub struct ModalBasis {
    /// Eigenvalues of the generalised problem `R_met P = M P diag(omega)`,
    /// ascending.
    pub omega: DVector<f64>,
    /// Columns are the (unpruned) eigenvectors, `M`-orthonormal.
    pub modes: DMatrix<f64>,
    /// Indices into `omega`/`modes` that survive pruning, ascending `omega`.
    pub kept: Vec<usize>,
}

impl ModalBasis {
    /// Solves `R_met P = M P diag(omega)` via the Cholesky-whitening trick
    /// (`M = L L^T`, then eigendecompose the symmetric `L^-1 R_met L^-T`),
    /// then discards modes with `|omega| > omega_max` and, if `d_iy_di` is
    /// supplied, modes whose plasma-coupling column norm falls below
    /// `coupling_floor` (§4.6's two-stage pruning).
    pub fn build(
        r_met: &DMatrix<f64>,
        m: &DMatrix<f64>,
        omega_max: f64,
        d_iy_di: Option<&DMatrix<f64>>,
        coupling_floor: f64,
    ) -> Result<Self> {
        let n = m.nrows();
        if r_met.nrows() != n || r_met.ncols() != n || m.ncols() != n {
            return Err(Error::DimensionMismatch {
                expected: n,
                actual: r_met.nrows().max(r_met.ncols()).max(m.ncols()),
            });
        }

        let chol = m.clone().cholesky().ok_or_else(|| {
            Error::LinearSolveFailed("inductance matrix is not positive definite".into())
        })?;
        let l = chol.l();
        let l_inv = l
            .clone()
            .try_inverse()
            .ok_or_else(|| Error::LinearSolveFailed("failed to invert Cholesky factor".into()))?;

        // symmetrised whitened operator: L^-1 R_met L^-T
        let c = &l_inv * r_met * l_inv.transpose();
        let c_sym = (&c + c.transpose()) * 0.5;
        let eigen = c_sym.symmetric_eigen();

        // P = L^-T * eigenvectors, so that P is M-orthonormal.
        let modes = l_inv.transpose() * &eigen.eigenvectors;
        let omega = eigen.eigenvalues;

        let mut order: Vec<usize> = (0..n).collect();
        order.sort_by(|&a, &b| omega[a].partial_cmp(&omega[b]).unwrap());

        let mut kept = Vec::new();
        for &idx in &order {
            if omega[idx].abs() > omega_max {
                continue;
            }
            if let Some(d) = d_iy_di {
                let col = modes.column(idx);
                let coupling = (d * col).norm();
                if coupling < coupling_floor {
                    continue;
                }
            }
            kept.push(idx);
        }

        Ok(ModalBasis { omega, modes, kept })
    }

    pub fn num_kept(&self) -> usize {
        self.kept.len()
    }

    /// Projects a full-space vector onto the kept modal coordinates.
    pub fn reduce(&self, full: &DVector<f64>) -> DVector<f64> {
        DVector::from_fn(self.kept.len(), |k, _| self.modes.column(self.kept[k]).dot(full))
    }

    /// Expands modal coordinates back to the full conductor space.
    pub fn expand(&self, reduced: &DVector<f64>) -> DVector<f64> {
        let n = self.modes.nrows();
        let mut out = DVector::zeros(n);
        for (k, &idx) in self.kept.iter().enumerate() {
            out += self.modes.column(idx) * reduced[k];
        }
        out
    }

    /// Named alias for [`ModalBasis::expand`] at the reporting boundary:
    /// recovers per-conductor vessel currents from modal current
    /// coordinates.
    pub fn vessel_currents(&self, modal_currents: &DVector<f64>) -> DVector<f64> {
        self.expand(modal_currents)
    }

    /// Builds the extensive-metal-coordinate projection `T` (§3/§4.7):
    /// `n_cond x (active_indices.len() + num_kept())`, mapping
    /// `[I_active; I_mode]` to full conductor-space currents. Active columns
    /// are unit vectors at `active_indices`; modal columns are this basis's
    /// kept eigenvectors scattered into the passive rows named by
    /// `passive_indices` (the same order the basis was built in), zero
    /// elsewhere. `T^T * i_full` recovers `[I_active; reduce(i_passive)]`
    /// exactly, since the modal columns are zero outside `passive_indices`.
    pub fn projection(&self, n_cond: usize, active_indices: &[usize], passive_indices: &[usize]) -> DMatrix<f64> {
        let n_ext = active_indices.len() + self.num_kept();
        let mut t = DMatrix::zeros(n_cond, n_ext);
        for (col, &row) in active_indices.iter().enumerate() {
            t[(row, col)] = 1.0;
        }
        for (col, &mode_idx) in self.kept.iter().enumerate() {
            for (local_row, &full_row) in passive_indices.iter().enumerate() {
                t[(full_row, active_indices.len() + col)] = self.modes[(local_row, mode_idx)];
            }
        }
        t
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn diagonalizes_a_decoupled_two_circuit_system() {
        let r = DMatrix::from_row_slice(2, 2, &[2.0, 0.0, 0.0, 8.0]);
        let m = DMatrix::identity(2, 2);
        let basis = ModalBasis::build(&r, &m, f64::INFINITY, None, 0.0).unwrap();
        let mut sorted = basis.omega.iter().cloned().collect::<Vec<_>>();
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());
        assert!((sorted[0] - 2.0).abs() < 1e-10);
        assert!((sorted[1] - 8.0).abs() < 1e-10);
    }

    #[test]
    fn omega_max_prunes_fast_modes() {
        let r = DMatrix::from_row_slice(2, 2, &[2.0, 0.0, 0.0, 800.0]);
        let m = DMatrix::identity(2, 2);
        let basis = ModalBasis::build(&r, &m, 10.0, None, 0.0).unwrap();
        assert_eq!(basis.num_kept(), 1);
    }

    #[test]
    fn projection_recovers_active_currents_and_reduced_modal_coordinates() {
        let r = DMatrix::from_row_slice(2, 2, &[2.0, 0.0, 0.0, 8.0]);
        let m = DMatrix::identity(2, 2);
        let basis = ModalBasis::build(&r, &m, f64::INFINITY, None, 0.0).unwrap();

        // conductor order: [active_0, passive_0, passive_1]
        let active_indices = vec![0];
        let passive_indices = vec![1, 2];
        let t = basis.projection(3, &active_indices, &passive_indices);
        assert_eq!(t.shape(), (3, 1 + basis.num_kept()));

        let i_full = DVector::from_row_slice(&[5.0, 0.3, -0.7]);
        let x_ext = t.transpose() * &i_full;
        assert!((x_ext[0] - 5.0).abs() < 1e-12);

        let i_passive = DVector::from_row_slice(&[0.3, -0.7]);
        let expected_modal = basis.reduce(&i_passive);
        for k in 0..basis.num_kept() {
            assert!((x_ext[1 + k] - expected_modal[k]).abs() < 1e-10);
        }
    }
}
