//! High-level entry crate for diffractometer geometry and refinement.
//!
//! [`core`] holds the instrument model: goniometers, detector pixel geometry,
//! per-frame states with interpolation and unit cells. [`optim`] holds the
//! least-squares refinements built on it.
//!
//! ```no_run
//! use diffract::prelude::*;
//! use diffract::core::synthetic::{four_circle, predict_peaks, RotationScan};
//!
//! # fn main() -> anyhow::Result<()> {
//! let diffractometer = four_circle(1.0)?;
//! let states = RotationScan::default().states(&diffractometer)?;
//! let cell = UnitCell::from_parameters(6.0, 7.0, 8.0, 1.5708, 1.5708, 1.5708)?;
//! let peaks = predict_peaks(&states, &cell, 4)?;
//!
//! let template = UBSolution::for_diffractometer(cell, &diffractometer);
//! let mut minimizer = LatticeMinimizer::new(template, &diffractometer, &states);
//! minimizer.add_peaks(peaks);
//! let outcome = minimizer.run(&LmBackend, &SolveOptions::default())?;
//! if let Some(solution) = outcome.solution {
//!     println!("{solution}");
//! }
//! # Ok(())
//! # }
//! ```

pub use nalgebra;

/// Instrument geometry, states, crystal lattice.
pub mod core {
    pub use diffract_core::*;
}

/// Least-squares problems, backends and refinement drivers.
pub mod optim {
    pub use diffract_optim::*;
}

/// Convenient re-exports for common use cases.
pub mod prelude {
    pub use crate::core::{
        DataSet, Diffractometer, DiffractometerConfig, Gonio, InstrumentState,
        InstrumentStateList, InterpolatedState, NiggliConstraint, Peak, Real, UnitCell, Vec3,
    };
    pub use crate::optim::{
        fit_detector_gonio_offsets, fit_sample_gonio_offsets, GonioFitOptions, GonioFitOutcome,
        LatticeFitOutcome, LatticeMinimizer, LmBackend, RefineFlags, SolveOptions, UBSolution,
    };
}
