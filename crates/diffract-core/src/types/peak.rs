use serde::{Deserialize, Serialize};

use crate::{GeometryError, InstrumentStateList, InterpolatedState, MillerIndex, Real};

/// An observed Bragg peak.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Peak {
    /// Detector column.
    pub px: Real,
    /// Detector row.
    pub py: Real,
    /// Fractional frame index of the peak centre.
    pub frame: Real,
    /// Integer Miller indices once the peak has been indexed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hkl: Option<MillerIndex>,
    /// Whether the peak may be used for refinement.
    #[serde(default = "default_selected")]
    pub selected: bool,
}

fn default_selected() -> bool {
    true
}

impl Peak {
    pub fn new(px: Real, py: Real, frame: Real) -> Self {
        Self {
            px,
            py,
            frame,
            hkl: None,
            selected: true,
        }
    }

    pub fn with_hkl(mut self, hkl: MillerIndex) -> Self {
        self.hkl = Some(hkl);
        self
    }

    pub fn is_indexed(&self) -> bool {
        self.hkl.is_some()
    }

    /// Selected and indexed: usable by lattice refinement.
    pub fn is_refinable(&self) -> bool {
        self.selected && self.is_indexed()
    }

    /// Instrument state at the peak's frame.
    pub fn state(&self, states: &InstrumentStateList) -> Result<InterpolatedState, GeometryError> {
        states.interpolate(self.frame)
    }
}
