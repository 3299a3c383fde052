//! Geometry core for single-crystal diffractometers.
//!
//! This crate contains:
//! - linear algebra aliases and rigid-transform helpers (`Real`, `Vec3`, `Mat4`, ...),
//! - axes and goniometers composed into homogeneous transforms ([`Axis`], [`Gonio`]),
//! - instrument components and their per-frame states ([`Component`], [`ComponentState`]),
//! - detector pixel geometry and the assembled [`Diffractometer`],
//! - per-frame [`InstrumentState`]s with continuous interpolation ([`InterpolatedState`]),
//! - unit cells and Niggli-form constraints ([`UnitCell`], [`NiggliConstraint`]).
//!
//! Frame conventions: the beam travels along +y, +z is up, and the sample sits
//! at the origin of the lab frame. Wavevectors carry no 2π factor.
//!
//! Pixel to reciprocal space:
//! `q_sample = R_sampleᵀ · (normalize(R_det · p(px, py) + t_det − s) / λ − ni / λ)`

/// Serializable instrument description.
pub mod config;
/// Crystal lattice and constraints.
pub mod crystal;
mod error;
/// Axes, goniometers, components and the diffractometer.
pub mod instrument;
/// Linear algebra type aliases and helpers.
pub mod math;
/// Per-frame and interpolated instrument states.
pub mod state;
/// Deterministic synthetic instruments and peak tables.
pub mod synthetic;
/// Peaks and data sets.
pub mod types;

pub use config::*;
pub use crystal::*;
pub use error::GeometryError;
pub use instrument::*;
pub use math::*;
pub use state::*;
pub use types::*;
