//! Single rotation/translation degrees of freedom.

use std::sync::atomic::{AtomicU32, Ordering};

use nalgebra::Unit;
use serde::{Deserialize, Serialize};

use crate::{affine_from_parts, GeometryError, Mat3, Mat4, Real, Vec3};

static NEXT_AXIS_ID: AtomicU32 = AtomicU32::new(1);

fn next_axis_id() -> u32 {
    NEXT_AXIS_ID.fetch_add(1, Ordering::Relaxed)
}

/// Handedness of a rotation axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RotationSense {
    /// Right-handed rotation about the axis direction.
    #[default]
    CounterClockwise,
    /// Left-handed rotation; the axis value is negated.
    Clockwise,
}

/// Closed set of axis variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AxisKind {
    Rotation { sense: RotationSense },
    Translation,
}

/// One motor of a goniometer.
///
/// `physical` axes are backed by per-frame metadata and consume one entry of
/// the values vector passed to [`crate::Gonio::affine_matrix`]; non-physical
/// axes are frozen at zero.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Axis {
    #[serde(skip, default = "next_axis_id")]
    id: u32,
    label: String,
    kind: AxisKind,
    direction: Vec3,
    physical: bool,
    offset: Real,
    offset_fixed: bool,
}

fn unit_direction(label: &str, direction: Vec3) -> Result<Vec3, GeometryError> {
    let norm = direction.norm();
    if !(norm > Real::EPSILON) || !norm.is_finite() {
        return Err(GeometryError::ZeroDirection {
            label: label.to_string(),
        });
    }
    Ok(direction / norm)
}

impl Axis {
    fn new(label: impl Into<String>, kind: AxisKind, direction: Vec3) -> Result<Self, GeometryError> {
        let label = label.into();
        let direction = unit_direction(&label, direction)?;
        Ok(Self {
            id: next_axis_id(),
            label,
            kind,
            direction,
            physical: true,
            offset: 0.0,
            offset_fixed: false,
        })
    }

    /// Rotation axis about `direction` (normalized on construction).
    pub fn rotation(
        label: impl Into<String>,
        direction: Vec3,
        sense: RotationSense,
    ) -> Result<Self, GeometryError> {
        Self::new(label, AxisKind::Rotation { sense }, direction)
    }

    /// Translation axis along `direction` (normalized on construction).
    pub fn translation(label: impl Into<String>, direction: Vec3) -> Result<Self, GeometryError> {
        Self::new(label, AxisKind::Translation, direction)
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn kind(&self) -> AxisKind {
        self.kind
    }

    pub fn is_rotation(&self) -> bool {
        matches!(self.kind, AxisKind::Rotation { .. })
    }

    /// Unit direction of the axis.
    pub fn direction(&self) -> &Vec3 {
        &self.direction
    }

    /// Replace the direction; zero vectors are rejected and the axis is left unchanged.
    pub fn set_direction(&mut self, direction: Vec3) -> Result<(), GeometryError> {
        self.direction = unit_direction(&self.label, direction)?;
        Ok(())
    }

    pub fn is_physical(&self) -> bool {
        self.physical
    }

    pub fn set_physical(&mut self, physical: bool) {
        self.physical = physical;
    }

    /// Calibrated offset seeded into new component states.
    pub fn offset(&self) -> Real {
        self.offset
    }

    pub fn set_offset(&mut self, offset: Real) {
        self.offset = offset;
    }

    pub fn is_offset_fixed(&self) -> bool {
        self.offset_fixed
    }

    pub fn set_offset_fixed(&mut self, fixed: bool) {
        self.offset_fixed = fixed;
    }

    /// Homogeneous transform of this axis at `value` (radians or length units).
    pub fn affine_matrix(&self, value: Real) -> Mat4 {
        match self.kind {
            AxisKind::Rotation { sense } => {
                let angle = match sense {
                    RotationSense::CounterClockwise => value,
                    RotationSense::Clockwise => -value,
                };
                let rot = nalgebra::Rotation3::from_axis_angle(
                    &Unit::new_unchecked(self.direction),
                    angle,
                );
                affine_from_parts(rot.matrix(), &Vec3::zeros())
            }
            AxisKind::Translation => affine_from_parts(&Mat3::identity(), &(self.direction * value)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{rotation_part, transform_point};
    use std::f64::consts::FRAC_PI_2;

    #[test]
    fn zero_direction_is_rejected() {
        let err = Axis::rotation("omega", Vec3::zeros(), RotationSense::CounterClockwise)
            .unwrap_err();
        assert!(matches!(err, GeometryError::ZeroDirection { .. }));

        let mut axis = Axis::translation("x", Vec3::x()).unwrap();
        assert!(axis.set_direction(Vec3::zeros()).is_err());
        assert_eq!(axis.direction(), &Vec3::x());
    }

    #[test]
    fn direction_is_normalized() {
        let axis = Axis::translation("dz", Vec3::new(0.0, 0.0, 4.0)).unwrap();
        assert!((axis.direction().norm() - 1.0).abs() < 1e-15);
    }

    #[test]
    fn clockwise_rotation_negates_angle() {
        let ccw = Axis::rotation("a", Vec3::z(), RotationSense::CounterClockwise).unwrap();
        let cw = Axis::rotation("b", Vec3::z(), RotationSense::Clockwise).unwrap();

        let p = Vec3::x();
        let p_ccw = transform_point(&ccw.affine_matrix(FRAC_PI_2), &p);
        let p_cw = transform_point(&cw.affine_matrix(FRAC_PI_2), &p);
        assert!((p_ccw - Vec3::y()).norm() < 1e-12);
        assert!((p_cw + Vec3::y()).norm() < 1e-12);
    }

    #[test]
    fn translation_moves_along_direction() {
        let axis = Axis::translation("x", Vec3::new(2.0, 0.0, 0.0)).unwrap();
        let m = axis.affine_matrix(0.25);
        assert_eq!(rotation_part(&m), Mat3::identity());
        assert!((transform_point(&m, &Vec3::zeros()) - Vec3::new(0.25, 0.0, 0.0)).norm() < 1e-15);
    }

    #[test]
    fn ids_are_unique() {
        let a = Axis::translation("x", Vec3::x()).unwrap();
        let b = Axis::translation("x", Vec3::x()).unwrap();
        assert_ne!(a.id(), b.id());
    }
}
