use serde::{Deserialize, Serialize};

use crate::InstrumentStateList;

/// States of one scan, as handed over by the data reader.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataSet {
    pub name: String,
    pub states: InstrumentStateList,
}

impl DataSet {
    pub fn new(name: impl Into<String>, states: InstrumentStateList) -> Self {
        Self {
            name: name.into(),
            states,
        }
    }

    pub fn n_frames(&self) -> usize {
        self.states.len()
    }

    /// Number of frames flagged as refined.
    pub fn n_refined_states(&self) -> usize {
        self.states.n_refined()
    }
}
