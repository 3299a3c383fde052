use serde::{Deserialize, Serialize};

use crate::{ComponentState, DetectorGeometry, DiffractometerId, Mat3, Quat, Real, Vec3};

/// Complete instrument configuration for one acquired frame.
///
/// Built by [`crate::Diffractometer::state`] / [`crate::Diffractometer::compute_state`].
/// The derived geometry fields are public so refinement code can adjust the
/// per-frame quantities (`ni`, `sample_orientation_offset`, `refined`)
/// directly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstrumentState {
    pub(crate) diffractometer: DiffractometerId,
    pub(crate) detector_geometry: DetectorGeometry,
    pub(crate) detector_state: ComponentState,
    pub(crate) sample_state: ComponentState,
    pub(crate) source_state: ComponentState,
    /// Rotation of the detector gonio.
    pub detector_orientation: Quat,
    /// Translation of the detector gonio.
    pub detector_position_offset: Vec3,
    /// Rotation of the sample gonio.
    pub sample_orientation: Quat,
    /// Per-frame correction applied on top of `sample_orientation`.
    pub sample_orientation_offset: Quat,
    pub sample_position: Vec3,
    /// Incident beam direction (unit length).
    pub ni: Vec3,
    pub wavelength: Real,
    /// Whether this frame took part in a refinement and may be used for
    /// goniometer offset calibration.
    pub refined: bool,
}

impl InstrumentState {
    pub fn diffractometer_id(&self) -> DiffractometerId {
        self.diffractometer
    }

    pub fn detector_geometry(&self) -> &DetectorGeometry {
        &self.detector_geometry
    }

    pub fn detector_state(&self) -> &ComponentState {
        &self.detector_state
    }

    pub fn sample_state(&self) -> &ComponentState {
        &self.sample_state
    }

    pub fn source_state(&self) -> &ComponentState {
        &self.source_state
    }

    pub fn detector_orientation_matrix(&self) -> Mat3 {
        self.detector_orientation.to_rotation_matrix().into_inner()
    }

    /// Total sample rotation `offset · orientation`.
    pub fn sample_rotation(&self) -> Quat {
        self.sample_orientation_offset * self.sample_orientation
    }

    /// Matrix of [`Self::sample_rotation`], mapping sample coordinates to lab coordinates.
    pub fn sample_orientation_matrix(&self) -> Mat3 {
        self.sample_rotation().to_rotation_matrix().into_inner()
    }

    /// Incident wavevector `ni / λ` (no 2π).
    pub fn ki(&self) -> Vec3 {
        self.ni.normalize() / self.wavelength
    }

    /// Lab-frame position of a detector pixel.
    pub fn pixel_lab_position(&self, px: Real, py: Real) -> Vec3 {
        self.detector_orientation * self.detector_geometry.pixel_position(px, py)
            + self.detector_position_offset
    }

    /// Scattered wavevector in the lab frame for a detector pixel.
    pub fn kf_lab(&self, px: Real, py: Real) -> Vec3 {
        let p = self.pixel_lab_position(px, py) - self.sample_position;
        p.normalize() / self.wavelength
    }

    /// Scattering vector `kf − ki` expressed in the sample frame.
    pub fn sample_q(&self, px: Real, py: Real) -> Vec3 {
        let q_lab = self.kf_lab(px, py) - self.ki();
        self.sample_orientation_matrix().transpose() * q_lab
    }

    /// Jacobian of [`Self::kf_lab`] with respect to `(px, py)`; third column zero.
    pub(crate) fn kf_lab_jacobian(&self, px: Real, py: Real) -> Mat3 {
        let p = self.pixel_lab_position(px, py) - self.sample_position;
        let norm = p.norm();
        let unit = p / norm;
        let projector = (Mat3::identity() - unit * unit.transpose()) / (norm * self.wavelength);
        projector
            * self.detector_orientation_matrix()
            * self.detector_geometry.jacobian(px, py)
    }
}
