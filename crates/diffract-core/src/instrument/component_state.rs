use serde::{Deserialize, Serialize};

use crate::{ComponentRole, GeometryError, Real};

/// Axis values of one component for one frame.
///
/// The effective (refined) value of every physical axis is `raw + offset`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentState {
    role: ComponentRole,
    raw: Vec<Real>,
    offsets: Vec<Real>,
}

impl ComponentState {
    pub fn new(
        role: ComponentRole,
        raw: Vec<Real>,
        offsets: Vec<Real>,
    ) -> Result<Self, GeometryError> {
        if raw.len() != offsets.len() {
            return Err(GeometryError::StateMismatch(format!(
                "{} raw values but {} offsets",
                raw.len(),
                offsets.len()
            )));
        }
        Ok(Self { role, raw, offsets })
    }

    /// State with all offsets at zero.
    pub fn from_raw(role: ComponentRole, raw: Vec<Real>) -> Self {
        let offsets = vec![0.0; raw.len()];
        Self { role, raw, offsets }
    }

    pub fn role(&self) -> ComponentRole {
        self.role
    }

    pub fn n_values(&self) -> usize {
        self.raw.len()
    }

    pub fn raw_values(&self) -> &[Real] {
        &self.raw
    }

    pub fn offsets(&self) -> &[Real] {
        &self.offsets
    }

    /// Refined values `raw + offset`.
    pub fn values(&self) -> Vec<Real> {
        self.raw
            .iter()
            .zip(&self.offsets)
            .map(|(r, o)| r + o)
            .collect()
    }

    /// Copy of this state with `delta` added to the offsets.
    pub fn with_extra_offsets(&self, delta: &[Real]) -> Result<Self, GeometryError> {
        if delta.len() != self.offsets.len() {
            return Err(GeometryError::StateMismatch(format!(
                "{} offset corrections for {} axes",
                delta.len(),
                self.offsets.len()
            )));
        }
        let offsets = self.offsets.iter().zip(delta).map(|(o, d)| o + d).collect();
        Ok(Self {
            role: self.role,
            raw: self.raw.clone(),
            offsets,
        })
    }

    /// Add `delta` to the offsets in place.
    pub fn add_offsets(&mut self, delta: &[Real]) -> Result<(), GeometryError> {
        *self = self.with_extra_offsets(delta)?;
        Ok(())
    }

    /// Component-wise linear interpolation of raw values and offsets.
    ///
    /// `t` is clamped to `[0, 1]`; the endpoints return exact copies of the
    /// bracketing states. Interpolating a state with itself returns the state
    /// unchanged for any `t`.
    pub fn interpolate(&self, other: &Self, t: Real) -> Result<Self, GeometryError> {
        if self.role != other.role {
            return Err(GeometryError::StateMismatch(format!(
                "cannot interpolate {:?} state with {:?} state",
                self.role, other.role
            )));
        }
        if self.raw.len() != other.raw.len() {
            return Err(GeometryError::StateMismatch(format!(
                "cannot interpolate states with {} and {} values",
                self.raw.len(),
                other.raw.len()
            )));
        }
        let t = t.clamp(0.0, 1.0);
        if t >= 1.0 {
            return Ok(other.clone());
        }
        let lerp = |a: &[Real], b: &[Real]| -> Vec<Real> {
            a.iter().zip(b).map(|(x, y)| x + t * (y - x)).collect()
        };
        Ok(Self {
            role: self.role,
            raw: lerp(&self.raw, &other.raw),
            offsets: lerp(&self.offsets, &other.offsets),
        })
    }
}
