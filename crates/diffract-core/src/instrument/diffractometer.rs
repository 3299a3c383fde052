//! The assembled instrument and the conversion of per-frame axis values into
//! [`InstrumentState`]s.

use std::sync::atomic::{AtomicU64, Ordering};

use log::debug;
use serde::{Deserialize, Deserializer, Serialize};

use crate::{
    quaternion_from_affine, rotation_part, translation_part, Component, ComponentRole,
    ComponentState, Detector, GeometryError, InstrumentState, Mat4, Quat, Real, Source,
};

static NEXT_DIFFRACTOMETER_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of a diffractometer, used to reject mixing states of different instruments.
///
/// The id is persisted with the instrument and its states. Deserializing an id
/// advances the process counter past it, so instruments created afterwards
/// never reuse a loaded id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct DiffractometerId(u64);

impl DiffractometerId {
    fn next() -> Self {
        Self(NEXT_DIFFRACTOMETER_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl<'de> Deserialize<'de> for DiffractometerId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = u64::deserialize(deserializer)?;
        NEXT_DIFFRACTOMETER_ID.fetch_max(raw.saturating_add(1), Ordering::Relaxed);
        Ok(Self(raw))
    }
}

/// A detector, a sample and a source sharing one [`DiffractometerId`].
///
/// Cloning yields a new instrument with a fresh id: states built by the
/// original are rejected by the clone.
#[derive(Debug, Serialize, Deserialize)]
pub struct Diffractometer {
    id: DiffractometerId,
    name: String,
    detector: Detector,
    sample: Component,
    source: Source,
}

impl Clone for Diffractometer {
    fn clone(&self) -> Self {
        Self {
            id: DiffractometerId::next(),
            name: self.name.clone(),
            detector: self.detector.clone(),
            sample: self.sample.clone(),
            source: self.source.clone(),
        }
    }
}

fn gonio_transform(component: &Component, values: &[Real]) -> Result<Mat4, GeometryError> {
    match component.gonio() {
        Some(gonio) => gonio.affine_matrix(values),
        None if values.is_empty() => Ok(Mat4::identity()),
        None => Err(GeometryError::ValueCount {
            gonio: format!("{} (no gonio)", component.name()),
            expected: 0,
            got: values.len(),
        }),
    }
}

fn check_role(state: &ComponentState, role: ComponentRole) -> Result<(), GeometryError> {
    if state.role() != role {
        return Err(GeometryError::StateMismatch(format!(
            "expected a {role:?} state, got {:?}",
            state.role()
        )));
    }
    Ok(())
}

impl Diffractometer {
    /// Assemble an instrument. The sample component must have the sample role.
    pub fn new(
        name: impl Into<String>,
        detector: Detector,
        sample: Component,
        source: Source,
    ) -> Result<Self, GeometryError> {
        if sample.role() != ComponentRole::Sample {
            return Err(GeometryError::StateMismatch(format!(
                "component {} is not a sample",
                sample.name()
            )));
        }
        detector.geometry().validate()?;
        Ok(Self {
            id: DiffractometerId::next(),
            name: name.into(),
            detector,
            sample,
            source,
        })
    }

    pub fn id(&self) -> DiffractometerId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn detector(&self) -> &Detector {
        &self.detector
    }

    pub fn detector_mut(&mut self) -> &mut Detector {
        &mut self.detector
    }

    pub fn sample(&self) -> &Component {
        &self.sample
    }

    pub fn sample_mut(&mut self) -> &mut Component {
        &mut self.sample
    }

    pub fn source(&self) -> &Source {
        &self.source
    }

    pub fn source_mut(&mut self) -> &mut Source {
        &mut self.source
    }

    /// Build the instrument state of one frame from raw metadata values.
    ///
    /// Axis offsets currently stored on the goniometers are copied into the
    /// component states.
    pub fn state(
        &self,
        detector_raw: Vec<Real>,
        sample_raw: Vec<Real>,
        source_raw: Vec<Real>,
    ) -> Result<InstrumentState, GeometryError> {
        let detector_state = self.detector.component().create_state(detector_raw)?;
        let sample_state = self.sample.create_state(sample_raw)?;
        let source_state = self.source.component().create_state(source_raw)?;
        let wavelength = self.source.effective_wavelength();
        self.compute_state(detector_state, sample_state, source_state, wavelength)
    }

    /// Derive the full geometry of a frame from its component states.
    pub fn compute_state(
        &self,
        detector_state: ComponentState,
        sample_state: ComponentState,
        source_state: ComponentState,
        wavelength: Real,
    ) -> Result<InstrumentState, GeometryError> {
        check_role(&detector_state, ComponentRole::Detector)?;
        check_role(&sample_state, ComponentRole::Sample)?;
        check_role(&source_state, ComponentRole::Source)?;
        if !(wavelength > 0.0) {
            return Err(GeometryError::InvalidWavelength(wavelength));
        }

        let detector_values = detector_state.values();
        let detector_tf = gonio_transform(self.detector.component(), &detector_values)?;

        let sample_values = sample_state.values();
        let sample_tf = gonio_transform(&self.sample, &sample_values)?;
        let sample_position = self.sample.position(&sample_values)?;

        let source_tf = gonio_transform(self.source.component(), &source_state.values())?;
        let ni = (rotation_part(&source_tf) * self.source.beam_direction()).normalize();

        Ok(InstrumentState {
            diffractometer: self.id,
            detector_geometry: *self.detector.geometry(),
            detector_state,
            sample_state,
            source_state,
            detector_orientation: quaternion_from_affine(&detector_tf),
            detector_position_offset: translation_part(&detector_tf),
            sample_orientation: quaternion_from_affine(&sample_tf),
            sample_orientation_offset: Quat::identity(),
            sample_position,
            ni,
            wavelength,
            refined: false,
        })
    }

    /// Recompute `state` with extra offset corrections on the sample and detector
    /// axes and on the wavelength.
    ///
    /// Per-frame quantities that are not driven by the goniometers (beam
    /// direction, sample orientation offset, refined flag) are carried over.
    pub fn state_with_offsets(
        &self,
        state: &InstrumentState,
        wavelength_delta: Real,
        sample_delta: &[Real],
        detector_delta: &[Real],
    ) -> Result<InstrumentState, GeometryError> {
        if state.diffractometer != self.id {
            return Err(GeometryError::DiffractometerMismatch);
        }
        let detector_state = state.detector_state.with_extra_offsets(detector_delta)?;
        let sample_state = state.sample_state.with_extra_offsets(sample_delta)?;
        let mut updated = self.compute_state(
            detector_state,
            sample_state,
            state.source_state.clone(),
            state.wavelength + wavelength_delta,
        )?;
        updated.ni = state.ni;
        updated.sample_orientation_offset = state.sample_orientation_offset;
        updated.refined = state.refined;
        Ok(updated)
    }

    /// Push refined offsets back into the goniometer axes and the source.
    ///
    /// The corrections are added to the offsets already stored on the axes.
    pub fn apply_offsets(
        &mut self,
        wavelength_delta: Real,
        sample_delta: &[Real],
        detector_delta: &[Real],
    ) -> Result<(), GeometryError> {
        add_axis_offsets(&mut self.sample, sample_delta)?;
        add_axis_offsets(self.detector.component_mut(), detector_delta)?;
        let offset = self.source.wavelength_offset() + wavelength_delta;
        self.source.set_wavelength_offset(offset);
        debug!(
            "{}: applied offsets (wavelength {:+.3e}, sample {:?}, detector {:?})",
            self.name, wavelength_delta, sample_delta, detector_delta
        );
        Ok(())
    }
}

fn add_axis_offsets(component: &mut Component, delta: &[Real]) -> Result<(), GeometryError> {
    let expected = component.n_physical_axes();
    if delta.len() != expected {
        return Err(GeometryError::ValueCount {
            gonio: component.name().to_string(),
            expected,
            got: delta.len(),
        });
    }
    if let Some(gonio) = component.gonio_mut() {
        let current = gonio.physical_offsets();
        for (i, (offset, d)) in current.iter().zip(delta).enumerate() {
            gonio.set_physical_offset(i, offset + d)?;
        }
    }
    Ok(())
}
