//! Parameter covariance from the Jacobian at a least-squares solution.
//!
//! `JᵀJ` is assembled from the column-pivoted QR factor (`J·P = Q·R`, so
//! `JᵀJ = (R·Pᵀ)ᵀ(R·Pᵀ)`), fixed rows/columns are dropped, and the inverse is
//! scaled by the reduced chi-square `‖r‖² / (m − n_free)`.

use anyhow::{ensure, Result};
use diffract_core::Real;
use nalgebra::{DMatrix, DVector};

/// `JᵀJ` reconstructed from the column-pivoted QR factorization of `J`.
pub fn jacobian_normal_matrix(jacobian: &DMatrix<Real>) -> DMatrix<Real> {
    let qr = jacobian.clone().col_piv_qr();
    let mut rpt = qr.r();
    qr.p().inv_permute_columns(&mut rpt);
    rpt.transpose() * rpt
}

/// Covariance of the free parameters, in the order of the Jacobian columns.
///
/// `fixed[i]` marks columns held constant during the fit; their rows and
/// columns are zero in the returned `n × n` matrix.
pub fn parameter_covariance(
    jacobian: &DMatrix<Real>,
    residuals: &DVector<Real>,
    fixed: &[bool],
) -> Result<DMatrix<Real>> {
    let (m, n) = jacobian.shape();
    ensure!(
        fixed.len() == n,
        "fixed mask has {} entries for {n} parameters",
        fixed.len()
    );
    ensure!(
        residuals.len() == m,
        "{} residuals for a {m}-row Jacobian",
        residuals.len()
    );
    let n_free = fixed.iter().filter(|f| !**f).count();
    ensure!(
        m > n_free,
        "{m} residuals cannot determine {n_free} free parameters"
    );

    let mut jtj = jacobian_normal_matrix(jacobian);
    for i in (0..n).rev().filter(|&i| fixed[i]) {
        jtj = jtj.remove_row(i).remove_column(i);
    }

    let inverse = jtj
        .try_inverse()
        .ok_or_else(|| anyhow::anyhow!("normal matrix is singular"))?;
    let mse = residuals.norm_squared() / (m - n_free) as Real;
    let reduced = (&inverse + inverse.transpose()) * (0.5 * mse);

    let free: Vec<usize> = (0..n).filter(|&i| !fixed[i]).collect();
    Ok(expand_covariance(&reduced, &free, n))
}

/// Embed a covariance over `indices` into an `n × n` matrix, zero elsewhere.
pub fn expand_covariance(reduced: &DMatrix<Real>, indices: &[usize], n: usize) -> DMatrix<Real> {
    let mut full = DMatrix::zeros(n, n);
    for (a, &i) in indices.iter().enumerate() {
        for (b, &j) in indices.iter().enumerate() {
            full[(i, j)] = reduced[(a, b)];
        }
    }
    full
}
