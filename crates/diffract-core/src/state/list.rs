use serde::{Deserialize, Serialize};

use crate::{GeometryError, InstrumentState, InterpolatedState, Real};

/// Ordered per-frame states of one scan.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InstrumentStateList {
    states: Vec<InstrumentState>,
}

impl InstrumentStateList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_states(
        states: impl IntoIterator<Item = InstrumentState>,
    ) -> Result<Self, GeometryError> {
        let mut list = Self::new();
        for state in states {
            list.push(state)?;
        }
        Ok(list)
    }

    /// Append the state of the next frame. All states must share one diffractometer.
    pub fn push(&mut self, state: InstrumentState) -> Result<(), GeometryError> {
        if let Some(first) = self.states.first() {
            if first.diffractometer_id() != state.diffractometer_id() {
                return Err(GeometryError::DiffractometerMismatch);
            }
        }
        self.states.push(state);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    pub fn get(&self, frame: usize) -> Option<&InstrumentState> {
        self.states.get(frame)
    }

    pub fn get_mut(&mut self, frame: usize) -> Option<&mut InstrumentState> {
        self.states.get_mut(frame)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, InstrumentState> {
        self.states.iter()
    }

    pub fn iter_mut(&mut self) -> std::slice::IterMut<'_, InstrumentState> {
        self.states.iter_mut()
    }

    pub fn as_slice(&self) -> &[InstrumentState] {
        &self.states
    }

    pub fn n_refined(&self) -> usize {
        self.states.iter().filter(|s| s.refined).count()
    }

    /// Bracketing frame indices and fractional parameter for `frame`.
    ///
    /// Returns `(index, next, t)` with `next = min(index + 1, N − 1)`.
    pub fn bracket(&self, frame: Real) -> Result<(usize, usize, Real), GeometryError> {
        let max = self.states.len() as Real - 1.0;
        if self.states.is_empty() || !frame.is_finite() || frame < 0.0 || frame > max {
            return Err(GeometryError::FrameOutOfRange { frame, max });
        }
        let index = frame.floor() as usize;
        let next = (index + 1).min(self.states.len() - 1);
        Ok((index, next, frame - index as Real))
    }

    /// State at a fractional frame index.
    pub fn interpolate(&self, frame: Real) -> Result<InterpolatedState, GeometryError> {
        let (index, next, t) = self.bracket(frame)?;
        InterpolatedState::new(&self.states[index], &self.states[next], t)
    }
}

impl<'a> IntoIterator for &'a InstrumentStateList {
    type Item = &'a InstrumentState;
    type IntoIter = std::slice::Iter<'a, InstrumentState>;

    fn into_iter(self) -> Self::IntoIter {
        self.states.iter()
    }
}
