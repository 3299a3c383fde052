//! Observation containers exchanged with readers and peak finders.

mod dataset;
mod peak;

pub use dataset::DataSet;
pub use peak::Peak;
