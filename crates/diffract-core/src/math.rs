//! Linear algebra type aliases and small homogeneous-transform helpers.

use nalgebra::{Matrix3, Matrix4, Matrix6, UnitQuaternion, Vector3, Vector6};

/// Scalar type used throughout the library (currently `f64`).
pub type Real = f64;

/// 3D vector with [`Real`] components.
pub type Vec3 = Vector3<Real>;
/// 3×3 matrix with [`Real`] entries.
pub type Mat3 = Matrix3<Real>;
/// 4×4 homogeneous transform with [`Real`] entries.
pub type Mat4 = Matrix4<Real>;
/// Unit quaternion used for orientations.
pub type Quat = UnitQuaternion<Real>;
/// Six-component vector (lattice metric character).
pub type Vec6 = Vector6<Real>;
/// 6×6 matrix (covariance of the lattice metric character).
pub type Mat6 = Matrix6<Real>;
/// Miller indices `(h, k, l)` stored as reals so they can enter matrix products directly.
pub type MillerIndex = Vector3<Real>;

/// Rotation block `R` of a homogeneous transform `[R | t]`.
pub fn rotation_part(m: &Mat4) -> Mat3 {
    m.fixed_view::<3, 3>(0, 0).into_owned()
}

/// Translation column `t` of a homogeneous transform `[R | t]`.
pub fn translation_part(m: &Mat4) -> Vec3 {
    m.fixed_view::<3, 1>(0, 3).into_owned()
}

/// Build `[R | t]` from its blocks.
pub fn affine_from_parts(rotation: &Mat3, translation: &Vec3) -> Mat4 {
    let mut m = Mat4::identity();
    m.fixed_view_mut::<3, 3>(0, 0).copy_from(rotation);
    m.fixed_view_mut::<3, 1>(0, 3).copy_from(translation);
    m
}

/// Apply a homogeneous transform to a point (`w = 1`).
pub fn transform_point(m: &Mat4, p: &Vec3) -> Vec3 {
    rotation_part(m) * p + translation_part(m)
}

/// Closed-form inverse of a rigid transform: `[Rᵗ | −Rᵗ t]`.
///
/// Only valid when the rotation block is orthonormal, which holds for every
/// transform produced by an axis chain.
pub fn inverse_affine(m: &Mat4) -> Mat4 {
    let rt = rotation_part(m).transpose();
    let t = translation_part(m);
    affine_from_parts(&rt, &(-(rt * t)))
}

/// Quaternion of the rotation block of a homogeneous transform.
pub fn quaternion_from_affine(m: &Mat4) -> Quat {
    Quat::from_matrix(&rotation_part(m))
}
