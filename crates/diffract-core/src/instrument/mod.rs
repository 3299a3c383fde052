//! Instrument description: axes, goniometers, components and the diffractometer.

mod axis;
mod component;
mod component_state;
mod detector;
mod diffractometer;
mod gonio;
mod source;

pub use axis::{Axis, AxisKind, RotationSense};
pub use component::{Component, ComponentRole};
pub use component_state::ComponentState;
pub use detector::{Detector, DetectorGeometry, DetectorShape};
pub use diffractometer::{Diffractometer, DiffractometerId};
pub use gonio::Gonio;
pub use source::Source;
