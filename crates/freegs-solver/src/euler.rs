//! Implicit (backward) Euler integration of the metal circuit equation
//! (§4.5): `M dI/dt + R I = V - M_ey dIy/dt`, discretised as
//! `(M + dt R) I_{n+1} = M I_n + dt * rhs_{n+1}`.

use nalgebra::{DMatrix, DVector};

use crate::error::{Error, Result};

/// Backward-Euler step of the metal circuit equation. `(M + dt R)` is
/// refactorised on every call via nalgebra's dense LU, matching the
/// reference solver's `a.clone().lu().solve(b)` idiom; conductor counts in
/// this domain are small enough that caching the factorisation buys little.
pub struct ImplicitEulerStepper {
    m: DMatrix<f64>,
    r: DMatrix<f64>,
    dt: f64,
}

impl ImplicitEulerStepper {
    pub fn new(m: DMatrix<f64>, r: DMatrix<f64>, dt: f64) -> Result<Self> {
        let n = m.nrows();
        if m.ncols() != n || r.nrows() != n || r.ncols() != n {
            return Err(Error::DimensionMismatch {
                expected: n,
                actual: r.nrows().max(r.ncols()),
            });
        }
        Ok(ImplicitEulerStepper { m, r, dt })
    }

    pub fn dt(&self) -> f64 {
        self.dt
    }

    pub fn set_dt(&mut self, dt: f64) {
        self.dt = dt;
    }

    /// Advances `x_old` by one step of size `self.dt()` given the explicit
    /// forcing term `rhs` (already evaluated at `t + dt`).
    pub fn step(&self, x_old: &DVector<f64>, rhs: &DVector<f64>) -> Result<DVector<f64>> {
        let a = &self.m + &self.r * self.dt;
        let b = &self.m * x_old + rhs * self.dt;
        a.lu()
            .solve(&b)
            .ok_or_else(|| Error::LinearSolveFailed("(M + dt*R) is singular".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decays_toward_the_steady_state_of_a_single_rc_circuit() {
        let m = DMatrix::from_row_slice(1, 1, &[1.0]);
        let r = DMatrix::from_row_slice(1, 1, &[1.0]);
        let stepper = ImplicitEulerStepper::new(m, r, 0.01).unwrap();
        let mut x = DVector::from_row_slice(&[0.0]);
        let rhs = DVector::from_row_slice(&[5.0]);
        for _ in 0..2000 {
            x = stepper.step(&x, &rhs).unwrap();
        }
        assert!((x[0] - 5.0).abs() < 1e-2);
    }

    #[test]
    fn rejects_mismatched_dimensions() {
        let m = DMatrix::identity(2, 2);
        let r = DMatrix::identity(3, 3);
        assert!(ImplicitEulerStepper::new(m, r, 0.1).is_err());
    }
}
