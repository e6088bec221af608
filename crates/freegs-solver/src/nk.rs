//! Generic Arnoldi-based Newton-Krylov engine (§4.3, §2's "NK engine"),
//! reused by the static GS solver and both evolutive-loop root problems.

use nalgebra::{DMatrix, DVector};

/// Tuning knobs for one call to [`NkSolver::arnoldi_iteration`].
#[derive(Debug, Clone, Copy)]
pub struct NkConfig {
    /// Maximum number of Krylov basis directions to probe.
    pub n_k: usize,
    /// Stop adding directions once the unexplained-residual fraction falls
    /// below this threshold.
    pub conv_crit: f64,
    /// Base finite-difference step size.
    pub grad_eps: f64,
    /// Absolute clip applied to each least-squares coefficient.
    pub clip: f64,
    /// Exponent in the `(k+1)^scaling_with_n` step-size decay.
    pub scaling_with_n: f64,
}

impl Default for NkConfig {
    fn default() -> Self {
        NkConfig {
            n_k: 8,
            conv_crit: 0.15,
            grad_eps: 0.5,
            clip: 10.0,
            scaling_with_n: 1.2,
        }
    }
}

/// Result of one Arnoldi/Newton-Krylov correction: the step `dx` to apply
/// and the least-squares coefficients that produced it.
pub struct NkOutcome {
    pub dx: DVector<f64>,
    pub coeffs: DVector<f64>,
    pub basis_size: usize,
}

/// A generic, stateless Newton-Krylov engine operating on flat vectors. The
/// caller supplies the root function `F` via a closure; the engine never
/// assumes anything about what `x` represents (plasma flux, extensive
/// currents, ...).
pub struct NkSolver {
    config: NkConfig,
}

impl NkSolver {
    pub fn new(config: NkConfig) -> Self {
        NkSolver { config }
    }

    pub fn config(&self) -> &NkConfig {
        &self.config
    }

    /// Builds a Krylov basis by finite-difference probing around `x`,
    /// starting the search direction at `vec_direction` (typically the
    /// residual itself), and returns the correction `dx` from the
    /// clipped least-squares fit (§4.3 step 2-3).
    pub fn arnoldi_iteration(
        &self,
        x: &DVector<f64>,
        mut vec_direction: DVector<f64>,
        residual: &DVector<f64>,
        mut f: impl FnMut(&DVector<f64>) -> DVector<f64>,
    ) -> NkOutcome {
        let n = x.len();
        let n_k = self.config.n_k;
        let n_x = x.norm();
        let n_res = residual.norm();

        let mut q = DMatrix::zeros(n, n_k);
        let mut qn = DMatrix::zeros(n, n_k);
        let mut g = DMatrix::zeros(n, n_k);

        let mut n_it = 0usize;
        let mut keep_going = true;

        while keep_going && n_it < n_k {
            let dir_norm = vec_direction.norm().max(1e-300);
            let grad_coeff = self.config.grad_eps * n_x / dir_norm * n_res
                / (n_it as f64 + 1.0).powf(self.config.scaling_with_n);

            let candidate_dx = &vec_direction * grad_coeff;
            let probed = f(&(x + &candidate_dx));
            let candidate_usable = &probed - residual;

            q.set_column(n_it, &candidate_dx);
            let col_norm = candidate_dx.norm().max(1e-300);
            qn.set_column(n_it, &(&candidate_dx / col_norm));
            g.set_column(n_it, &candidate_usable);

            n_it += 1;

            // Orthogonalise the next search direction against the basis so far.
            let qn_slice = qn.columns(0, n_it);
            let projections = qn_slice.transpose() * &candidate_usable;
            let mut next_dir = candidate_usable.clone();
            for k in 0..n_it {
                next_dir -= qn_slice.column(k) * projections[k];
            }
            vec_direction = next_dir;

            let g_slice = g.columns(0, n_it).into_owned();
            let q_slice = q.columns(0, n_it).into_owned();
            let outcome = Self::least_squares_step(&g_slice, &q_slice, residual, self.config.clip);
            let explained = &g_slice * &outcome.coeffs;
            let rel_unexplained = (&explained + residual).norm() / n_res.max(1e-300);
            keep_going = rel_unexplained > self.config.conv_crit;
        }

        let g_slice = g.columns(0, n_it).into_owned();
        let q_slice = q.columns(0, n_it).into_owned();
        Self::least_squares_step(&g_slice, &q_slice, residual, self.config.clip)
    }

    /// Solves `min ||G c + residual||^2` via the normal equations, clips
    /// `c` to `[-clip, clip]`, and returns the associated step in `x`-space
    /// `dx = Q c` (§4.3 step 3).
    fn least_squares_step(
        g: &DMatrix<f64>,
        q: &DMatrix<f64>,
        residual: &DVector<f64>,
        clip: f64,
    ) -> NkOutcome {
        let gtg = g.transpose() * g;
        let rhs = g.transpose() * (-residual);
        let mut coeffs = match gtg.clone().cholesky() {
            Some(chol) => chol.solve(&rhs),
            None => gtg
                .pseudo_inverse(1e-12)
                .map(|pinv| pinv * rhs)
                .unwrap_or_else(|_| DVector::zeros(g.ncols())),
        };
        coeffs.iter_mut().for_each(|c| *c = c.clamp(-clip, clip));
        let dx = q * &coeffs;
        NkOutcome {
            dx,
            coeffs,
            basis_size: g.ncols(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn converges_on_a_linear_root_problem() {
        // F(x) = A x - b, solved by Newton-Krylov even though F is already linear.
        let a = DMatrix::from_row_slice(3, 3, &[4.0, 1.0, 0.0, 1.0, 3.0, 1.0, 0.0, 1.0, 2.0]);
        let b = DVector::from_row_slice(&[1.0, 2.0, 3.0]);
        let f = |x: &DVector<f64>| &a * x - &b;

        let solver = NkSolver::new(NkConfig {
            n_k: 3,
            conv_crit: 1e-6,
            ..Default::default()
        });

        let mut x = DVector::zeros(3);
        let mut residual = f(&x);
        for _ in 0..20 {
            if residual.norm() < 1e-9 {
                break;
            }
            let outcome = solver.arnoldi_iteration(&x, residual.clone(), &residual, &f);
            x += &outcome.dx;
            residual = f(&x);
        }

        let exact = a.clone().lu().solve(&b).unwrap();
        assert!((x - exact).norm() < 1e-4);
    }
}
