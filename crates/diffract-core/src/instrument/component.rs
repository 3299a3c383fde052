use serde::{Deserialize, Serialize};

use crate::{ComponentState, GeometryError, Gonio, Real, Vec3};

/// Which part of the instrument a component (or component state) describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComponentRole {
    Detector,
    Sample,
    Source,
}

/// A physical instrument part with an optional goniometer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Component {
    name: String,
    role: ComponentRole,
    gonio: Option<Gonio>,
    /// Position when every axis value is zero.
    rest_position: Vec3,
}

impl Component {
    pub fn new(name: impl Into<String>, role: ComponentRole) -> Self {
        Self {
            name: name.into(),
            role,
            gonio: None,
            rest_position: Vec3::zeros(),
        }
    }

    pub fn with_gonio(mut self, gonio: Gonio) -> Self {
        self.gonio = Some(gonio);
        self
    }

    pub fn with_rest_position(mut self, position: Vec3) -> Self {
        self.rest_position = position;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn role(&self) -> ComponentRole {
        self.role
    }

    pub fn gonio(&self) -> Option<&Gonio> {
        self.gonio.as_ref()
    }

    pub fn gonio_mut(&mut self) -> Option<&mut Gonio> {
        self.gonio.as_mut()
    }

    pub fn set_gonio(&mut self, gonio: Option<Gonio>) {
        self.gonio = gonio;
    }

    pub fn rest_position(&self) -> &Vec3 {
        &self.rest_position
    }

    pub fn set_rest_position(&mut self, position: Vec3) {
        self.rest_position = position;
    }

    /// Number of values a state of this component carries.
    pub fn n_physical_axes(&self) -> usize {
        self.gonio.as_ref().map_or(0, Gonio::n_physical_axes)
    }

    /// Position of the component for the given physical axis values.
    pub fn position(&self, values: &[Real]) -> Result<Vec3, GeometryError> {
        match &self.gonio {
            Some(gonio) => gonio.transform(&self.rest_position, values),
            None if values.is_empty() => Ok(self.rest_position),
            None => Err(GeometryError::ValueCount {
                gonio: format!("{} (no gonio)", self.name),
                expected: 0,
                got: values.len(),
            }),
        }
    }

    /// Snapshot one frame of raw metadata values.
    ///
    /// The state offsets start from the calibrated offsets currently stored on
    /// the physical axes.
    pub fn create_state(&self, raw_values: Vec<Real>) -> Result<ComponentState, GeometryError> {
        let expected = self.n_physical_axes();
        if raw_values.len() != expected {
            return Err(GeometryError::ValueCount {
                gonio: self.name.clone(),
                expected,
                got: raw_values.len(),
            });
        }
        let offsets = self
            .gonio
            .as_ref()
            .map(Gonio::physical_offsets)
            .unwrap_or_default();
        ComponentState::new(self.role, raw_values, offsets)
    }
}
