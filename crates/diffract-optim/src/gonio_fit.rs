//! Goniometer offset calibration from refined frames.
//!
//! Both fits only look at frames whose state is flagged `refined`, i.e.
//! frames whose orientation has already been adjusted against indexed peaks.
//! The detector fit compares the stored beam direction with the detector
//! gonio's image of `ŷ`; the sample fit compares the stored sample orientation
//! with the gonio rotation at `raw + offsets`.

use anyhow::{ensure, Result};
use diffract_core::{rotation_part, DataSet, Gonio, Mat3, Real, Vec3};
use log::{info, warn};
use nalgebra::DVector;
use serde::{Deserialize, Serialize};

use crate::{NllsProblem, NllsSolverBackend, SolveOptions};

/// Residual used when the gonio cannot evaluate a trial value vector.
const INVALID_RESIDUAL: Real = 1e3;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GonioFitOptions {
    /// Iteration budget handed to the optimizer.
    pub n_iterations: usize,
    /// Shared x/f/g tolerance.
    pub tolerance: Real,
}

impl Default for GonioFitOptions {
    fn default() -> Self {
        Self {
            n_iterations: 1000,
            tolerance: 1e-10,
        }
    }
}

impl GonioFitOptions {
    fn solve_options(&self) -> SolveOptions {
        SolveOptions::default()
            .with_tolerance(self.tolerance)
            .with_max_iters(self.n_iterations)
    }
}

/// Result of a gonio offset fit, one offset per physical axis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GonioFitOutcome {
    pub success: bool,
    pub offsets: Vec<Real>,
    /// `0.5 · ‖f‖` after every residual evaluation.
    pub cost_function: Vec<Real>,
}

impl GonioFitOutcome {
    fn no_op(n_axes: usize) -> Self {
        Self {
            success: false,
            offsets: vec![0.0; n_axes],
            cost_function: Vec::new(),
        }
    }
}

fn n_refined_states(datasets: &[DataSet]) -> usize {
    datasets.iter().map(DataSet::n_refined_states).sum()
}

struct DetectorOffsetProblem<'a> {
    gonio: &'a Gonio,
    beam_directions: Vec<Vec3>,
}

impl NllsProblem for DetectorOffsetProblem<'_> {
    fn num_params(&self) -> usize {
        self.gonio.n_physical_axes()
    }

    fn num_residuals(&self) -> usize {
        self.beam_directions.len()
    }

    fn residuals(&self, x: &DVector<Real>) -> DVector<Real> {
        let Ok(tf) = self.gonio.affine_matrix(x.as_slice()) else {
            return DVector::from_element(self.num_residuals(), INVALID_RESIDUAL);
        };
        let y = rotation_part(&tf) * Vec3::y();
        DVector::from_iterator(
            self.num_residuals(),
            self.beam_directions.iter().map(|n| (n.dot(&y) - 1.0).abs()),
        )
    }
}

struct SampleOffsetProblem<'a> {
    gonio: &'a Gonio,
    raw_values: Vec<Vec<Real>>,
    orientations: Vec<Mat3>,
}

impl NllsProblem for SampleOffsetProblem<'_> {
    fn num_params(&self) -> usize {
        self.gonio.n_physical_axes()
    }

    fn num_residuals(&self) -> usize {
        self.orientations.len()
    }

    fn residuals(&self, x: &DVector<Real>) -> DVector<Real> {
        let residual = |raw: &Vec<Real>, orientation: &Mat3| {
            let values: Vec<Real> = raw.iter().zip(x.iter()).map(|(r, o)| r + o).collect();
            match self.gonio.affine_matrix(&values) {
                Ok(tf) => (rotation_part(&tf) - orientation).norm(),
                Err(_) => INVALID_RESIDUAL,
            }
        };
        DVector::from_iterator(
            self.num_residuals(),
            self.raw_values
                .iter()
                .zip(&self.orientations)
                .map(|(raw, orientation)| residual(raw, orientation)),
        )
    }
}

fn run_fit<B, P>(
    backend: &B,
    problem: &P,
    options: &GonioFitOptions,
    what: &str,
) -> GonioFitOutcome
where
    B: NllsSolverBackend,
    P: NllsProblem,
{
    let x0 = DVector::zeros(problem.num_params());
    let (x, report) = backend.solve(problem, x0, &options.solve_options());
    if !report.converged {
        warn!("failed to fit {what} offsets: {}", report.termination);
    } else {
        info!(
            "{what} offsets fitted in {} evaluations: {:?}",
            report.iterations,
            x.as_slice()
        );
    }
    GonioFitOutcome {
        success: report.converged,
        offsets: x.iter().copied().collect(),
        cost_function: report.cost_trace,
    }
}

/// Fit offsets of the detector gonio so that it maps `ŷ` onto the beam
/// direction of every refined frame.
///
/// The residual of a frame is `|n̂ · R(x) ŷ − 1|`. An empty data list or fewer
/// refined frames than physical axes gives a zero-offset, unsuccessful outcome.
pub fn fit_detector_gonio_offsets<B: NllsSolverBackend>(
    backend: &B,
    gonio: &Gonio,
    datasets: &[DataSet],
    options: &GonioFitOptions,
) -> Result<GonioFitOutcome> {
    let n_axes = gonio.n_physical_axes();
    if datasets.is_empty() {
        info!("no data provided, detector offsets set to zero");
        return Ok(GonioFitOutcome::no_op(n_axes));
    }
    let n_selected = n_refined_states(datasets);
    if n_selected < n_axes {
        info!(
            "{n_selected} refined states for {n_axes} detector axes, offsets set to zero"
        );
        return Ok(GonioFitOutcome::no_op(n_axes));
    }

    let beam_directions = datasets
        .iter()
        .flat_map(|data| data.states.iter())
        .filter(|state| state.refined)
        .map(|state| state.ni.normalize())
        .collect();
    let problem = DetectorOffsetProblem {
        gonio,
        beam_directions,
    };
    Ok(run_fit(backend, &problem, options, "detector"))
}

/// Fit offsets of the sample gonio so that `R(raw + x)` reproduces the sample
/// orientation of every refined frame (Frobenius norm per frame).
///
/// Raw values come from each state's sample component state; a frame whose
/// value count does not match the gonio is a configuration error.
pub fn fit_sample_gonio_offsets<B: NllsSolverBackend>(
    backend: &B,
    gonio: &Gonio,
    datasets: &[DataSet],
    options: &GonioFitOptions,
) -> Result<GonioFitOutcome> {
    let n_axes = gonio.n_physical_axes();
    if datasets.is_empty() {
        info!("no data provided, sample offsets set to zero");
        return Ok(GonioFitOutcome::no_op(n_axes));
    }
    let n_selected = n_refined_states(datasets);
    if n_selected < n_axes {
        info!("{n_selected} refined states for {n_axes} sample axes, offsets set to zero");
        return Ok(GonioFitOutcome::no_op(n_axes));
    }

    let mut raw_values = Vec::with_capacity(n_selected);
    let mut orientations = Vec::with_capacity(n_selected);
    for data in datasets {
        for (frame, state) in data.states.iter().enumerate() {
            if !state.refined {
                continue;
            }
            let raw = state.sample_state().raw_values();
            ensure!(
                raw.len() == n_axes,
                "gonio {} has {n_axes} physical axes but frame {frame} of {} stores {} values",
                gonio.label(),
                data.name,
                raw.len()
            );
            raw_values.push(raw.to_vec());
            orientations.push(state.sample_orientation_matrix());
        }
    }
    let problem = SampleOffsetProblem {
        gonio,
        raw_values,
        orientations,
    };
    Ok(run_fit(backend, &problem, options, "sample"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::LmBackend;
    use diffract_core::{InstrumentStateList, RotationSense};

    #[test]
    fn empty_data_is_a_no_op() {
        let mut gonio = Gonio::new("sample");
        gonio
            .add_rotation("omega", Vec3::z(), RotationSense::CounterClockwise)
            .unwrap();
        gonio
            .add_rotation("phi", Vec3::x(), RotationSense::CounterClockwise)
            .unwrap();

        let options = GonioFitOptions::default();
        for outcome in [
            fit_detector_gonio_offsets(&LmBackend, &gonio, &[], &options).unwrap(),
            fit_sample_gonio_offsets(&LmBackend, &gonio, &[], &options).unwrap(),
        ] {
            assert!(!outcome.success);
            assert_eq!(outcome.offsets, vec![0.0, 0.0]);
            assert!(outcome.cost_function.is_empty());
        }
    }

    #[test]
    fn too_few_refined_states_is_a_no_op() {
        let mut gonio = Gonio::new("detector");
        gonio
            .add_rotation("2theta", Vec3::z(), RotationSense::CounterClockwise)
            .unwrap();
        let data = DataSet::new("unrefined", InstrumentStateList::new());

        let outcome =
            fit_detector_gonio_offsets(&LmBackend, &gonio, &[data], &GonioFitOptions::default())
                .unwrap();
        assert!(!outcome.success);
        assert_eq!(outcome.offsets, vec![0.0]);
        assert!(outcome.cost_function.is_empty());
    }

    #[test]
    fn options_deserialize_with_defaults() {
        let options: GonioFitOptions = serde_json::from_str(r#"{"tolerance": 1e-8}"#).unwrap();
        assert_eq!(options.n_iterations, 1000);
        assert_eq!(options.tolerance, 1e-8);
    }
}
