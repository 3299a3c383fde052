//! Deterministic synthetic instruments and peak tables for tests and demos.
//!
//! # Example
//!
//! ```no_run
//! use diffract_core::synthetic::{four_circle, predict_peaks, RotationScan};
//! use diffract_core::UnitCell;
//!
//! let diffractometer = four_circle(1.0).unwrap();
//! let states = RotationScan::default().states(&diffractometer).unwrap();
//! let cell = UnitCell::from_parameters(6.0, 7.0, 8.0, 1.5708, 1.5708, 1.5708).unwrap();
//! let peaks = predict_peaks(&states, &cell, 3).unwrap();
//! assert!(!peaks.is_empty());
//! ```

mod four_circle;
pub mod noise;

pub use four_circle::{four_circle, predict_peaks, RotationScan};
pub use noise::UniformNoise;
