//! Detector pixel geometry.
//!
//! Pixel coordinates `(px, py)` are column/row positions. In the detector rest
//! frame the beam travels along +y and the detector centre sits at
//! `(0, distance, 0)`; +z is up.

use serde::{Deserialize, Serialize};

use crate::{Component, ComponentRole, GeometryError, Gonio, Mat3, Real, Vec3};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DetectorShape {
    /// Planar detector perpendicular to the beam.
    Flat { width: Real },
    /// Cylindrical detector centred on the sample, axis along z.
    Cylindrical { angular_width: Real },
}

/// Pixel layout of a detector. Cheap to copy into every instrument state.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DetectorGeometry {
    pub shape: DetectorShape,
    /// Sample-to-detector distance.
    pub distance: Real,
    pub height: Real,
    pub n_rows: u32,
    pub n_cols: u32,
    #[serde(default)]
    pub min_row: Real,
    #[serde(default)]
    pub min_col: Real,
}

impl DetectorGeometry {
    pub fn flat(
        distance: Real,
        width: Real,
        height: Real,
        n_cols: u32,
        n_rows: u32,
    ) -> Result<Self, GeometryError> {
        let geometry = Self {
            shape: DetectorShape::Flat { width },
            distance,
            height,
            n_rows,
            n_cols,
            min_row: 0.0,
            min_col: 0.0,
        };
        geometry.validate()?;
        Ok(geometry)
    }

    pub fn cylindrical(
        distance: Real,
        angular_width: Real,
        height: Real,
        n_cols: u32,
        n_rows: u32,
    ) -> Result<Self, GeometryError> {
        let geometry = Self {
            shape: DetectorShape::Cylindrical { angular_width },
            distance,
            height,
            n_rows,
            n_cols,
            min_row: 0.0,
            min_col: 0.0,
        };
        geometry.validate()?;
        Ok(geometry)
    }

    pub fn validate(&self) -> Result<(), GeometryError> {
        if self.n_rows < 2 || self.n_cols < 2 {
            return Err(GeometryError::InvalidDetector(format!(
                "need at least 2 rows and columns, got {}x{}",
                self.n_rows, self.n_cols
            )));
        }
        if !(self.distance > 0.0) {
            return Err(GeometryError::InvalidDetector(
                "distance must be > 0".to_string(),
            ));
        }
        let width_ok = match self.shape {
            DetectorShape::Flat { width } => width > 0.0,
            DetectorShape::Cylindrical { angular_width } => angular_width > 0.0,
        };
        if !width_ok || !(self.height > 0.0) {
            return Err(GeometryError::InvalidDetector(
                "width and height must be > 0".to_string(),
            ));
        }
        Ok(())
    }

    /// Width in length units (arc length for cylindrical detectors).
    pub fn width(&self) -> Real {
        match self.shape {
            DetectorShape::Flat { width } => width,
            DetectorShape::Cylindrical { angular_width } => angular_width * self.distance,
        }
    }

    pub fn has_pixel(&self, px: Real, py: Real) -> bool {
        let dx = px - self.min_col;
        let dy = py - self.min_row;
        dx >= 0.0 && dx < self.n_cols as Real && dy >= 0.0 && dy < self.n_rows as Real
    }

    fn col_fraction(&self, px: Real) -> Real {
        (px - self.min_col) / (self.n_cols as Real - 1.0) - 0.5
    }

    fn row_fraction(&self, py: Real) -> Real {
        (py - self.min_row) / (self.n_rows as Real - 1.0) - 0.5
    }

    /// Position of a pixel in the detector rest frame.
    pub fn pixel_position(&self, px: Real, py: Real) -> Vec3 {
        let z = self.row_fraction(py) * self.height;
        match self.shape {
            DetectorShape::Flat { width } => {
                Vec3::new(self.col_fraction(px) * width, self.distance, z)
            }
            DetectorShape::Cylindrical { angular_width } => {
                let gamma = self.col_fraction(px) * angular_width;
                Vec3::new(
                    self.distance * gamma.sin(),
                    self.distance * gamma.cos(),
                    z,
                )
            }
        }
    }

    /// Pixel hit by a ray leaving the rest-frame origin along `direction`.
    ///
    /// `None` when the ray misses the detector.
    pub fn pixel_from_direction(&self, direction: &Vec3) -> Option<(Real, Real)> {
        let (col_fraction, z) = match self.shape {
            DetectorShape::Flat { width } => {
                if direction.y <= 0.0 {
                    return None;
                }
                let scale = self.distance / direction.y;
                (direction.x * scale / width, direction.z * scale)
            }
            DetectorShape::Cylindrical { angular_width } => {
                let radial = direction.x.hypot(direction.y);
                if radial <= 0.0 {
                    return None;
                }
                let gamma = direction.x.atan2(direction.y);
                (gamma / angular_width, direction.z * self.distance / radial)
            }
        };
        let px = (col_fraction + 0.5) * (self.n_cols as Real - 1.0) + self.min_col;
        let py = (z / self.height + 0.5) * (self.n_rows as Real - 1.0) + self.min_row;
        self.has_pixel(px, py).then_some((px, py))
    }

    /// Jacobian of [`Self::pixel_position`]; columns are `∂/∂px`, `∂/∂py` and zero.
    pub fn jacobian(&self, px: Real, _py: Real) -> Mat3 {
        let mut j = Mat3::zeros();
        j[(2, 1)] = self.height / (self.n_rows as Real - 1.0);
        match self.shape {
            DetectorShape::Flat { width } => {
                j[(0, 0)] = width / (self.n_cols as Real - 1.0);
            }
            DetectorShape::Cylindrical { angular_width } => {
                let gamma = self.col_fraction(px) * angular_width;
                let dgamma = angular_width / (self.n_cols as Real - 1.0);
                j[(0, 0)] = self.distance * gamma.cos() * dgamma;
                j[(1, 0)] = -self.distance * gamma.sin() * dgamma;
            }
        }
        j
    }
}

/// Detector component: a goniometer-mounted pixel array.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Detector {
    component: Component,
    geometry: DetectorGeometry,
}

impl Detector {
    pub fn new(name: impl Into<String>, geometry: DetectorGeometry) -> Self {
        let component = Component::new(name, ComponentRole::Detector)
            .with_rest_position(Vec3::new(0.0, geometry.distance, 0.0));
        Self {
            component,
            geometry,
        }
    }

    pub fn with_gonio(mut self, gonio: Gonio) -> Self {
        self.component.set_gonio(Some(gonio));
        self
    }

    pub fn component(&self) -> &Component {
        &self.component
    }

    pub fn component_mut(&mut self) -> &mut Component {
        &mut self.component
    }

    pub fn geometry(&self) -> &DetectorGeometry {
        &self.geometry
    }

    pub fn gonio(&self) -> Option<&Gonio> {
        self.component.gonio()
    }

    pub fn gonio_mut(&mut self) -> Option<&mut Gonio> {
        self.component.gonio_mut()
    }
}
