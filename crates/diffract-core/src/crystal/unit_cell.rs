//! Direct/reciprocal lattice of a crystal in the sample frame.
//!
//! Conventions: the direct basis `A` holds the cell vectors `a, b, c` as
//! columns; the reciprocal basis (`UB`) is `A⁻ᵀ` without a 2π factor, so a
//! reflection `h` sits at `q = UB · h` and `h = Aᵀ · q`. The metric character is
//! the six independent entries of `G = AᵀA` ordered
//! `(g00, g11, g22, g12, g02, g01)`.

use serde::{Deserialize, Serialize};

use crate::{GeometryError, Mat3, Mat6, MillerIndex, Quat, Real, Vec3, Vec6};

/// Metric tensor entries together with the conventional cell parameters
/// (angles in radians).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct UnitCellCharacter {
    pub g00: Real,
    pub g11: Real,
    pub g22: Real,
    pub g12: Real,
    pub g02: Real,
    pub g01: Real,
    pub a: Real,
    pub b: Real,
    pub c: Real,
    pub alpha: Real,
    pub beta: Real,
    pub gamma: Real,
}

impl UnitCellCharacter {
    /// Character from the six metric entries `(g00, g11, g22, g12, g02, g01)`.
    ///
    /// Cosines are clamped to `[-1, 1]` so slightly inconsistent metrics still
    /// produce finite angles.
    pub fn from_metric(ch: &Vec6) -> Result<Self, GeometryError> {
        let (g00, g11, g22) = (ch[0], ch[1], ch[2]);
        if !(g00 > 0.0 && g11 > 0.0 && g22 > 0.0) {
            return Err(GeometryError::InvalidCell(format!(
                "metric diagonal must be positive, got ({g00}, {g11}, {g22})"
            )));
        }
        Ok(Self::from_metric_unchecked(ch))
    }

    fn from_metric_unchecked(ch: &Vec6) -> Self {
        let (g00, g11, g22, g12, g02, g01) = (ch[0], ch[1], ch[2], ch[3], ch[4], ch[5]);
        let (a, b, c) = (g00.sqrt(), g11.sqrt(), g22.sqrt());
        let angle = |g: Real, p: Real, q: Real| (g / (p * q)).clamp(-1.0, 1.0).acos();
        Self {
            g00,
            g11,
            g22,
            g12,
            g02,
            g01,
            a,
            b,
            c,
            alpha: angle(g12, b, c),
            beta: angle(g02, a, c),
            gamma: angle(g01, a, b),
        }
    }

    pub fn metric_vector(&self) -> Vec6 {
        Vec6::new(self.g00, self.g11, self.g22, self.g12, self.g02, self.g01)
    }

    /// Jacobian of `(a, b, c, α, β, γ)` with respect to the metric character.
    fn parameter_jacobian(&self) -> Mat6 {
        let mut j = Mat6::zeros();
        j[(0, 0)] = 0.5 / self.a;
        j[(1, 1)] = 0.5 / self.b;
        j[(2, 2)] = 0.5 / self.c;

        // angle θ = acos(g / (p q)) with p² = gp, q² = gq
        let mut angle_row = |row: usize, theta: Real, g_col: usize, p: (usize, Real), q: (usize, Real)| {
            let (sin, cos) = theta.sin_cos();
            if sin.abs() < Real::EPSILON {
                return;
            }
            j[(row, g_col)] = -1.0 / (sin * p.1 * q.1);
            j[(row, p.0)] = cos / (2.0 * p.1 * p.1 * sin);
            j[(row, q.0)] = cos / (2.0 * q.1 * q.1 * sin);
        };
        angle_row(3, self.alpha, 3, (1, self.b), (2, self.c));
        angle_row(4, self.beta, 4, (0, self.a), (2, self.c));
        angle_row(5, self.gamma, 5, (0, self.a), (1, self.b));
        j
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitCell {
    basis: Mat3,
    reciprocal: Mat3,
    character_covariance: Option<Mat6>,
}

/// Upper-triangular direct basis with `a ∥ x` and `b` in the xy plane.
fn standard_basis(
    a: Real,
    b: Real,
    c: Real,
    alpha: Real,
    beta: Real,
    gamma: Real,
) -> Result<Mat3, GeometryError> {
    if !(a > 0.0 && b > 0.0 && c > 0.0) {
        return Err(GeometryError::InvalidCell(format!(
            "cell lengths must be positive, got ({a}, {b}, {c})"
        )));
    }
    let (ca, cb, cg) = (alpha.cos(), beta.cos(), gamma.cos());
    let sg = gamma.sin();
    if sg.abs() < Real::EPSILON {
        return Err(GeometryError::InvalidCell("gamma must not be 0 or 180°".into()));
    }
    let cy = (ca - cb * cg) / sg;
    let cz2 = 1.0 - cb * cb - cy * cy;
    if !(cz2 > 0.0) {
        return Err(GeometryError::InvalidCell(format!(
            "angles ({alpha}, {beta}, {gamma}) do not form a cell"
        )));
    }
    Ok(Mat3::new(
        a,
        b * cg,
        c * cb,
        0.0,
        b * sg,
        c * cy,
        0.0,
        0.0,
        c * cz2.sqrt(),
    ))
}

impl UnitCell {
    /// Cell from the direct basis (columns `a, b, c`); the basis must be right-handed.
    pub fn from_basis(basis: Mat3) -> Result<Self, GeometryError> {
        let det = basis.determinant();
        if !(det > Real::EPSILON) {
            return Err(GeometryError::InvalidCell(format!(
                "direct basis must be right-handed and non-singular (det = {det})"
            )));
        }
        let reciprocal = basis
            .try_inverse()
            .ok_or_else(|| GeometryError::InvalidCell("singular direct basis".into()))?
            .transpose();
        Ok(Self {
            basis,
            reciprocal,
            character_covariance: None,
        })
    }

    /// Cell from conventional parameters (angles in radians) in the standard orientation.
    pub fn from_parameters(
        a: Real,
        b: Real,
        c: Real,
        alpha: Real,
        beta: Real,
        gamma: Real,
    ) -> Result<Self, GeometryError> {
        Self::from_basis(standard_basis(a, b, c, alpha, beta, gamma)?)
    }

    /// Cell with metric character `ch`, rotated by `orientation` from the standard setting.
    pub fn from_character(ch: &Vec6, orientation: &Quat) -> Result<Self, GeometryError> {
        let p = UnitCellCharacter::from_metric(ch)?;
        let a0 = standard_basis(p.a, p.b, p.c, p.alpha, p.beta, p.gamma)?;
        Self::from_basis(orientation.to_rotation_matrix().into_inner() * a0)
    }

    /// Cell whose reciprocal basis is `ub`.
    pub fn from_ub(ub: &Mat3) -> Result<Self, GeometryError> {
        let basis = ub
            .try_inverse()
            .ok_or_else(|| GeometryError::InvalidCell("singular UB matrix".into()))?
            .transpose();
        Self::from_basis(basis)
    }

    pub fn basis(&self) -> &Mat3 {
        &self.basis
    }

    pub fn reciprocal_basis(&self) -> &Mat3 {
        &self.reciprocal
    }

    /// `UB` matrix mapping Miller indices to sample-frame `q`.
    pub fn ub(&self) -> &Mat3 {
        &self.reciprocal
    }

    pub fn metric(&self) -> Mat3 {
        self.basis.transpose() * self.basis
    }

    pub fn metric_vector(&self) -> Vec6 {
        let g = self.metric();
        Vec6::new(g[(0, 0)], g[(1, 1)], g[(2, 2)], g[(1, 2)], g[(0, 2)], g[(0, 1)])
    }

    pub fn character(&self) -> UnitCellCharacter {
        // a non-singular basis always has a positive metric diagonal
        UnitCellCharacter::from_metric_unchecked(&self.metric_vector())
    }

    /// Rotation `U` taking the standard setting to this cell (`A = U · A₀`).
    pub fn orientation(&self) -> Quat {
        let qr = self.basis.qr();
        let mut q = qr.q();
        let r = qr.r();
        for i in 0..3 {
            if r[(i, i)] < 0.0 {
                q.column_mut(i).neg_mut();
            }
        }
        Quat::from_matrix(&q)
    }

    pub fn volume(&self) -> Real {
        self.basis.determinant()
    }

    /// Fractional Miller indices of a sample-frame `q`.
    pub fn index(&self, q: &Vec3) -> MillerIndex {
        self.basis.transpose() * q
    }

    /// Sample-frame `q` of a reflection.
    pub fn from_index(&self, hkl: &MillerIndex) -> Vec3 {
        self.reciprocal * hkl
    }

    /// Store the covariance of the metric character (ordered like [`Self::metric_vector`]).
    pub fn set_parameter_covariance(&mut self, covariance: Mat6) {
        self.character_covariance = Some(covariance);
    }

    pub fn parameter_covariance(&self) -> Option<&Mat6> {
        self.character_covariance.as_ref()
    }

    /// Standard deviations of every character field, by first-order propagation
    /// of the stored covariance. `None` until a covariance has been set.
    pub fn character_sigmas(&self) -> Option<UnitCellCharacter> {
        let cov = self.character_covariance.as_ref()?;
        let character = self.character();
        let j = character.parameter_jacobian();
        let param_cov = j * cov * j.transpose();
        let sigma = |v: Real| v.max(0.0).sqrt();
        Some(UnitCellCharacter {
            g00: sigma(cov[(0, 0)]),
            g11: sigma(cov[(1, 1)]),
            g22: sigma(cov[(2, 2)]),
            g12: sigma(cov[(3, 3)]),
            g02: sigma(cov[(4, 4)]),
            g01: sigma(cov[(5, 5)]),
            a: sigma(param_cov[(0, 0)]),
            b: sigma(param_cov[(1, 1)]),
            c: sigma(param_cov[(2, 2)]),
            alpha: sigma(param_cov[(3, 3)]),
            beta: sigma(param_cov[(4, 4)]),
            gamma: sigma(param_cov[(5, 5)]),
        })
    }
}
