//! Linear constraints on the metric character imposed by a Niggli form.
//!
//! With the character ordered `(A, B, C, D, E, F) = (g00, g11, g22, g12, g02, g01)`
//! a constraint is a `k × 6` matrix `C` with `C · ch = 0`. Refinement moves only
//! inside the kernel of `C`.

use nalgebra::{DMatrix, DVector, SymmetricEigen};
use serde::{Deserialize, Serialize};

use crate::{Mat6, Real, Vec6};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NiggliConstraint {
    name: String,
    /// Niggli form number (1..=44).
    number: u8,
    matrix: DMatrix<Real>,
}

impl NiggliConstraint {
    pub fn new(name: impl Into<String>, number: u8, rows: &[[Real; 6]]) -> Self {
        let matrix = DMatrix::from_fn(rows.len(), 6, |i, j| rows[i][j]);
        Self {
            name: name.into(),
            number,
            matrix,
        }
    }

    /// Triclinic: every character component is free.
    pub fn unconstrained() -> Self {
        Self::new("aP", 44, &[])
    }

    /// A = B = C, D = E = F = 0.
    pub fn cubic_p() -> Self {
        Self::new(
            "cP",
            3,
            &[
                [1.0, -1.0, 0.0, 0.0, 0.0, 0.0],
                [0.0, 1.0, -1.0, 0.0, 0.0, 0.0],
                [0.0, 0.0, 0.0, 1.0, 0.0, 0.0],
                [0.0, 0.0, 0.0, 0.0, 1.0, 0.0],
                [0.0, 0.0, 0.0, 0.0, 0.0, 1.0],
            ],
        )
    }

    /// A = B, D = E = F = 0.
    pub fn tetragonal_p() -> Self {
        Self::new(
            "tP",
            11,
            &[
                [1.0, -1.0, 0.0, 0.0, 0.0, 0.0],
                [0.0, 0.0, 0.0, 1.0, 0.0, 0.0],
                [0.0, 0.0, 0.0, 0.0, 1.0, 0.0],
                [0.0, 0.0, 0.0, 0.0, 0.0, 1.0],
            ],
        )
    }

    /// D = E = F = 0.
    pub fn orthorhombic_p() -> Self {
        Self::new(
            "oP",
            32,
            &[
                [0.0, 0.0, 0.0, 1.0, 0.0, 0.0],
                [0.0, 0.0, 0.0, 0.0, 1.0, 0.0],
                [0.0, 0.0, 0.0, 0.0, 0.0, 1.0],
            ],
        )
    }

    /// A = B, D = E = 0, F = −A/2.
    pub fn hexagonal_p() -> Self {
        Self::new(
            "hP",
            12,
            &[
                [1.0, -1.0, 0.0, 0.0, 0.0, 0.0],
                [0.0, 0.0, 0.0, 1.0, 0.0, 0.0],
                [0.0, 0.0, 0.0, 0.0, 1.0, 0.0],
                [1.0, 0.0, 0.0, 0.0, 0.0, 2.0],
            ],
        )
    }

    /// Unique axis b: D = F = 0.
    pub fn monoclinic_p() -> Self {
        Self::new(
            "mP",
            34,
            &[
                [0.0, 0.0, 0.0, 1.0, 0.0, 0.0],
                [0.0, 0.0, 0.0, 0.0, 0.0, 1.0],
            ],
        )
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn number(&self) -> u8 {
        self.number
    }

    pub fn matrix(&self) -> &DMatrix<Real> {
        &self.matrix
    }

    pub fn n_constraints(&self) -> usize {
        self.matrix.nrows()
    }

    pub fn is_unconstrained(&self) -> bool {
        self.matrix.nrows() == 0
    }

    /// Orthonormal basis of the kernel of `C`, one column per free coordinate.
    ///
    /// Uses the eigen-decomposition of `CᵀC`; eigenvalues below a relative
    /// threshold span the kernel.
    pub fn kernel(&self) -> DMatrix<Real> {
        if self.is_unconstrained() {
            return DMatrix::identity(6, 6);
        }
        let ctc = self.matrix.transpose() * &self.matrix;
        let ctc = Mat6::from_fn(|i, j| ctc[(i, j)]);
        let eigen = SymmetricEigen::new(ctc);
        let max = eigen.eigenvalues.amax().max(1.0);
        let columns: Vec<_> = (0..6)
            .filter(|&i| eigen.eigenvalues[i].abs() <= 1e-10 * max)
            .map(|i| eigen.eigenvectors.column(i).into_owned())
            .collect();
        DMatrix::from_fn(6, columns.len(), |i, j| columns[j][i])
    }

    /// `C · ch`; zero when the character satisfies the constraint.
    pub fn residuals(&self, ch: &Vec6) -> DVector<Real> {
        &self.matrix * DVector::from_column_slice(ch.as_slice())
    }
}
