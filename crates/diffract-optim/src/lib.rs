//! Least-squares refinement of UB matrices and instrument offsets.
//!
//! The crate is split into a small generic layer ([`NllsProblem`],
//! [`NllsSolverBackend`], [`LmBackend`], [`covariance`]) and the
//! diffractometer problems built on it:
//! - [`gonio_fit`]: detector/sample goniometer offsets from refined frames,
//! - [`ub_solution`]: packing of orientation, lattice and offset parameters,
//! - [`lattice`]: UB refinement against indexed peaks.

mod backend_lm;
pub mod covariance;
pub mod gonio_fit;
pub mod lattice;
mod numdiff;
mod traits;
pub mod ub_solution;

pub use backend_lm::LmBackend;
pub use gonio_fit::{
    fit_detector_gonio_offsets, fit_sample_gonio_offsets, GonioFitOptions, GonioFitOutcome,
};
pub use lattice::{LatticeFitOutcome, LatticeFunctor, LatticeMinimizer};
pub use numdiff::central_difference;
pub use traits::{NllsProblem, NllsSolverBackend, SolveOptions, SolveReport};
pub use ub_solution::{RefineFlags, UBSolution};
