//! Finite-difference Jacobians.

use diffract_core::Real;
use nalgebra::{DMatrix, DVector};

/// Central-difference Jacobian of `f` at `x`.
///
/// The step for parameter `j` is `√ε · max(|x_j|, 1)`.
pub fn central_difference<F>(f: F, x: &DVector<Real>) -> DMatrix<Real>
where
    F: Fn(&DVector<Real>) -> DVector<Real>,
{
    let n = x.len();
    let m = f(x).len();
    let mut jac = DMatrix::zeros(m, n);
    let mut probe = x.clone();
    for j in 0..n {
        let h = Real::EPSILON.sqrt() * x[j].abs().max(1.0);
        probe[j] = x[j] + h;
        let plus = f(&probe);
        probe[j] = x[j] - h;
        let minus = f(&probe);
        probe[j] = x[j];
        jac.set_column(j, &((plus - minus) / (2.0 * h)));
    }
    jac
}
