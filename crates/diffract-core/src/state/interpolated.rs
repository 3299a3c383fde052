//! Instrument state at a fractional frame index.

use crate::{GeometryError, InstrumentState, Mat3, Quat, Real, Vec3};

fn slerp(what: &str, a: &Quat, b: &Quat, t: Real) -> Result<Quat, GeometryError> {
    a.try_slerp(b, t, 1e-12).ok_or_else(|| {
        GeometryError::StateMismatch(format!("{what} orientations cannot be interpolated"))
    })
}

fn lerp(a: &Vec3, b: &Vec3, t: Real) -> Vec3 {
    a * (1.0 - t) + b * t
}

/// State between two adjacent frames plus the effective sample rotation
/// between them.
#[derive(Debug, Clone)]
pub struct InterpolatedState {
    state: InstrumentState,
    /// Unit rotation axis in the lab frame (zero when the sample does not move).
    axis: Vec3,
    /// Rotation angle per frame about `axis`.
    step_size: Real,
}

impl InterpolatedState {
    /// Interpolate between `s1` (at `t = 0`) and `s2` (at `t = 1`).
    ///
    /// `t` is clamped to `[0, 1]`. The two states must come from the same
    /// diffractometer and have structurally compatible component states.
    pub fn new(s1: &InstrumentState, s2: &InstrumentState, t: Real) -> Result<Self, GeometryError> {
        if s1.diffractometer != s2.diffractometer {
            return Err(GeometryError::DiffractometerMismatch);
        }
        let t = t.clamp(0.0, 1.0);

        let detector_state = s1.detector_state.interpolate(&s2.detector_state, t)?;
        let sample_state = s1.sample_state.interpolate(&s2.sample_state, t)?;
        let source_state = s1.source_state.interpolate(&s2.source_state, t)?;

        let ni = lerp(&s1.ni, &s2.ni, t);
        let ni_norm = ni.norm();
        if !(ni_norm > Real::EPSILON) {
            return Err(GeometryError::ZeroDirection {
                label: "interpolated beam".to_string(),
            });
        }

        let state = InstrumentState {
            diffractometer: s1.diffractometer,
            detector_geometry: s1.detector_geometry,
            detector_state,
            sample_state,
            source_state,
            detector_orientation: slerp(
                "detector",
                &s1.detector_orientation,
                &s2.detector_orientation,
                t,
            )?,
            detector_position_offset: lerp(
                &s1.detector_position_offset,
                &s2.detector_position_offset,
                t,
            ),
            sample_orientation: slerp(
                "sample",
                &s1.sample_orientation,
                &s2.sample_orientation,
                t,
            )?,
            sample_orientation_offset: slerp(
                "sample offset",
                &s1.sample_orientation_offset,
                &s2.sample_orientation_offset,
                t,
            )?,
            sample_position: lerp(&s1.sample_position, &s2.sample_position, t),
            ni: ni / ni_norm,
            wavelength: (1.0 - t) * s1.wavelength + t * s2.wavelength,
            refined: s1.refined && s2.refined,
        };

        let rotation = s2.sample_rotation() * s1.sample_rotation().inverse();
        let (axis, step_size) = match rotation.axis_angle() {
            Some((axis, angle)) => (axis.into_inner(), angle),
            None => (Vec3::zeros(), 0.0),
        };

        Ok(Self {
            state,
            axis,
            step_size,
        })
    }

    pub fn state(&self) -> &InstrumentState {
        &self.state
    }

    pub fn into_state(self) -> InstrumentState {
        self.state
    }

    pub fn axis(&self) -> &Vec3 {
        &self.axis
    }

    pub fn step_size(&self) -> Real {
        self.step_size
    }

    pub fn kf_lab(&self, px: Real, py: Real) -> Vec3 {
        self.state.kf_lab(px, py)
    }

    pub fn sample_q(&self, px: Real, py: Real) -> Vec3 {
        self.state.sample_q(px, py)
    }

    /// Jacobian of `(px, py, frame) → sample_q`.
    ///
    /// Column 2 is `−step · (axis × Q)` with the rotation axis and `Q` both in
    /// the sample frame.
    pub fn jacobian_q(&self, px: Real, py: Real) -> Mat3 {
        let to_sample = self.state.sample_orientation_matrix().transpose();
        let mut jac = to_sample * self.state.kf_lab_jacobian(px, py);

        let q = self.sample_q(px, py);
        let axis = to_sample * self.axis;
        let dq_dframe = -self.step_size * axis.cross(&q);
        jac.set_column(2, &dq_dframe);
        jac
    }

    /// Lorentz factor `‖kf‖ / |kf · (axis × Q)|` of a rotation scan.
    ///
    /// Infinite when the sample does not rotate or the reflection moves
    /// parallel to the Ewald sphere.
    pub fn lorentz_factor(&self, px: Real, py: Real) -> Real {
        let kf = self.state.kf_lab(px, py);
        let q = kf - self.state.ki();
        let denominator = kf.dot(&self.axis.cross(&q)).abs();
        if denominator < Real::EPSILON * kf.norm_squared() {
            return Real::INFINITY;
        }
        kf.norm() / denominator
    }
}
