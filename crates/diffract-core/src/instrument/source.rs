use serde::{Deserialize, Serialize};

use crate::{Component, ComponentRole, GeometryError, Real, Vec3};

/// Monochromatic source. The beam travels along +y unless configured otherwise.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Source {
    component: Component,
    wavelength: Real,
    wavelength_offset: Real,
    offset_fixed: bool,
    beam_direction: Vec3,
}

impl Source {
    pub fn new(name: impl Into<String>, wavelength: Real) -> Result<Self, GeometryError> {
        if !(wavelength > 0.0) {
            return Err(GeometryError::InvalidWavelength(wavelength));
        }
        Ok(Self {
            component: Component::new(name, ComponentRole::Source)
                .with_rest_position(Vec3::new(0.0, -1.0, 0.0)),
            wavelength,
            wavelength_offset: 0.0,
            offset_fixed: true,
            beam_direction: Vec3::y(),
        })
    }

    pub fn with_beam_direction(mut self, direction: Vec3) -> Result<Self, GeometryError> {
        let norm = direction.norm();
        if !(norm > Real::EPSILON) {
            return Err(GeometryError::ZeroDirection {
                label: format!("{} beam", self.component.name()),
            });
        }
        self.beam_direction = direction / norm;
        Ok(self)
    }

    pub fn component(&self) -> &Component {
        &self.component
    }

    pub fn component_mut(&mut self) -> &mut Component {
        &mut self.component
    }

    /// Nominal wavelength.
    pub fn wavelength(&self) -> Real {
        self.wavelength
    }

    pub fn wavelength_offset(&self) -> Real {
        self.wavelength_offset
    }

    pub fn set_wavelength_offset(&mut self, offset: Real) {
        self.wavelength_offset = offset;
    }

    pub fn is_offset_fixed(&self) -> bool {
        self.offset_fixed
    }

    pub fn set_offset_fixed(&mut self, fixed: bool) {
        self.offset_fixed = fixed;
    }

    /// Nominal wavelength plus calibrated offset.
    pub fn effective_wavelength(&self) -> Real {
        self.wavelength + self.wavelength_offset
    }

    /// Unit incident-beam direction in the lab frame.
    pub fn beam_direction(&self) -> &Vec3 {
        &self.beam_direction
    }
}
