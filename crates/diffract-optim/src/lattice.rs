//! Full UB refinement against indexed peaks.
//!
//! For every refinable peak the residual is `q_obs − UB · h` (three rows),
//! where `q_obs` is the sample-frame scattering vector of the peak pixel in
//! the interpolated state of its frame, recomputed with the trial instrument
//! offsets.

use std::collections::BTreeMap;

use anyhow::{ensure, Result};
use diffract_core::{
    Diffractometer, InstrumentState, InstrumentStateList, InterpolatedState, MillerIndex, Peak,
    Real,
};
use log::{debug, info, warn};
use nalgebra::DVector;

use crate::{
    covariance::parameter_covariance, NllsProblem, NllsSolverBackend, SolveOptions, UBSolution,
};

/// Residual reported for parameter vectors that do not describe a valid cell.
const INVALID_RESIDUAL: Real = 1e3;

/// A refinable peak resolved against the frame list.
#[derive(Debug, Clone, Copy)]
struct Observation {
    px: Real,
    py: Real,
    hkl: MillerIndex,
    frame: usize,
    next: usize,
    t: Real,
}

/// Residual function of a UB refinement over the optimizer vector of a
/// template [`UBSolution`].
///
/// Constants overwrite their entries; a constraint `(idx, target, factor)` sets
/// `x[idx] = factor · x[target]` before the solution is unpacked.
pub struct LatticeFunctor<'a> {
    template: &'a UBSolution,
    diffractometer: &'a Diffractometer,
    states: &'a InstrumentStateList,
    observations: Vec<Observation>,
    constants: BTreeMap<usize, Real>,
    constraints: BTreeMap<usize, (usize, Real)>,
}

impl<'a> LatticeFunctor<'a> {
    /// Refinable peaks of `peaks` become observations; the others are skipped.
    pub fn new(
        template: &'a UBSolution,
        diffractometer: &'a Diffractometer,
        states: &'a InstrumentStateList,
        peaks: &[Peak],
    ) -> Result<Self> {
        let mut observations = Vec::with_capacity(peaks.len());
        for peak in peaks.iter().filter(|p| p.is_refinable()) {
            let Some(hkl) = peak.hkl else { continue };
            let (frame, next, t) = states.bracket(peak.frame)?;
            observations.push(Observation {
                px: peak.px,
                py: peak.py,
                hkl,
                frame,
                next,
                t,
            });
        }
        if let Some(state) = states.get(0) {
            ensure!(
                state.diffractometer_id() == diffractometer.id(),
                "states were not built by {}",
                diffractometer.name()
            );
        }
        Ok(Self {
            template,
            diffractometer,
            states,
            observations,
            constants: BTreeMap::new(),
            constraints: BTreeMap::new(),
        })
    }

    pub fn with_constants(mut self, constants: BTreeMap<usize, Real>) -> Self {
        self.constants = constants;
        self
    }

    pub fn with_constraints(mut self, constraints: BTreeMap<usize, (usize, Real)>) -> Self {
        self.constraints = constraints;
        self
    }

    pub fn n_observations(&self) -> usize {
        self.observations.len()
    }

    /// Entries of the optimizer vector not moved by the optimizer.
    pub fn fixed_mask(&self) -> Vec<bool> {
        let mut mask = vec![false; self.num_params()];
        for &idx in self.constants.keys().chain(self.constraints.keys()) {
            if let Some(m) = mask.get_mut(idx) {
                *m = true;
            }
        }
        mask
    }

    /// `x` with constants and constraints enforced.
    pub fn effective(&self, x: &DVector<Real>) -> DVector<Real> {
        let mut x = x.clone();
        for (&idx, &value) in &self.constants {
            if idx < x.len() {
                x[idx] = value;
            }
        }
        for (&idx, &(target, factor)) in &self.constraints {
            if idx < x.len() && target < x.len() {
                x[idx] = factor * x[target];
            }
        }
        x
    }

    /// Solution described by the optimizer vector `x`.
    pub fn solution(&self, x: &DVector<Real>) -> Result<UBSolution> {
        self.template.unzip(&self.effective(x))
    }

    fn evaluate(&self, x: &DVector<Real>) -> Result<DVector<Real>> {
        let solution = self.solution(x)?;
        let ub = solution.ub()?;

        let mut trial: BTreeMap<usize, InstrumentState> = BTreeMap::new();
        let mut residuals = DVector::zeros(self.num_residuals());
        for (i, obs) in self.observations.iter().enumerate() {
            for frame in [obs.frame, obs.next] {
                if !trial.contains_key(&frame) {
                    let state = self.states.get(frame).ok_or_else(|| {
                        anyhow::anyhow!("frame {frame} missing from the state list")
                    })?;
                    trial.insert(frame, solution.trial_state(self.diffractometer, state)?);
                }
            }
            let interpolated = InterpolatedState::new(&trial[&obs.frame], &trial[&obs.next], obs.t)?;
            let q = interpolated.sample_q(obs.px, obs.py);
            residuals
                .fixed_rows_mut::<3>(3 * i)
                .copy_from(&(q - ub * obs.hkl));
        }
        Ok(residuals)
    }
}

impl NllsProblem for LatticeFunctor<'_> {
    fn num_params(&self) -> usize {
        self.template.inputs()
    }

    fn num_residuals(&self) -> usize {
        3 * self.observations.len()
    }

    fn residuals(&self, x: &DVector<Real>) -> DVector<Real> {
        match self.evaluate(x) {
            Ok(r) => r,
            Err(err) => {
                debug!("lattice residuals: {err:#}");
                DVector::from_element(self.num_residuals(), INVALID_RESIDUAL)
            }
        }
    }
}

/// Outcome of [`LatticeMinimizer::run`].
#[derive(Debug, Clone)]
pub struct LatticeFitOutcome {
    pub success: bool,
    /// Final optimizer vector (constants and constraints applied).
    pub offsets: Vec<Real>,
    /// `0.5 · ‖f‖` after every residual evaluation.
    pub cost_function: Vec<Real>,
    /// Refined solution; carries the covariance when the fit converged.
    pub solution: Option<UBSolution>,
}

/// Drives a [`LatticeFunctor`] with a least-squares backend.
///
/// Parameter indices refer to the optimizer vector of the template solution
/// (see [`UBSolution::zip`]).
pub struct LatticeMinimizer<'a> {
    template: UBSolution,
    diffractometer: &'a Diffractometer,
    states: &'a InstrumentStateList,
    peaks: Vec<Peak>,
    start: BTreeMap<usize, Real>,
    constants: BTreeMap<usize, Real>,
    constraints: BTreeMap<usize, (usize, Real)>,
}

impl<'a> LatticeMinimizer<'a> {
    pub fn new(
        template: UBSolution,
        diffractometer: &'a Diffractometer,
        states: &'a InstrumentStateList,
    ) -> Self {
        Self {
            template,
            diffractometer,
            states,
            peaks: Vec::new(),
            start: BTreeMap::new(),
            constants: BTreeMap::new(),
            constraints: BTreeMap::new(),
        }
    }

    pub fn template(&self) -> &UBSolution {
        &self.template
    }

    pub fn add_peak(&mut self, peak: Peak) {
        self.peaks.push(peak);
    }

    pub fn add_peaks(&mut self, peaks: impl IntoIterator<Item = Peak>) {
        self.peaks.extend(peaks);
    }

    pub fn clear_peaks(&mut self) {
        self.peaks.clear();
    }

    pub fn n_peaks(&self) -> usize {
        self.peaks.len()
    }

    /// Start the optimizer at `value` for entry `idx`; out-of-range indices
    /// are ignored.
    pub fn set_starting_value(&mut self, idx: usize, value: Real) {
        if idx >= self.template.inputs() {
            return;
        }
        self.start.insert(idx, value);
    }

    pub fn unset_starting_value(&mut self, idx: usize) {
        self.start.remove(&idx);
    }

    /// Hold entry `idx` at `value`.
    pub fn set_constant(&mut self, idx: usize, value: Real) {
        self.constants.insert(idx, value);
    }

    /// Tie entry `idx` to `factor · x[target]`.
    pub fn set_constraint(&mut self, idx: usize, target: usize, factor: Real) {
        self.constraints.insert(idx, (target, factor));
    }

    fn starting_point(&self) -> DVector<Real> {
        let mut x = self.template.zip();
        for (&idx, &value) in &self.start {
            x[idx] = value;
        }
        x
    }

    /// Run the refinement.
    ///
    /// Fewer residual rows than free parameters (including no peaks at all)
    /// yields an unsuccessful outcome with zero offsets and no trace. Indices
    /// of constants or constraints outside the optimizer vector are an error.
    pub fn run<B: NllsSolverBackend>(
        &self,
        backend: &B,
        options: &SolveOptions,
    ) -> Result<LatticeFitOutcome> {
        let n_inputs = self.template.inputs();
        for (&idx, &(target, _)) in &self.constraints {
            ensure!(
                idx < n_inputs && target < n_inputs,
                "constraint {idx} -> {target} outside {n_inputs} parameters"
            );
            ensure!(idx != target, "parameter {idx} constrained to itself");
        }
        if let Some(&idx) = self.constants.keys().find(|&&idx| idx >= n_inputs) {
            anyhow::bail!("constant {idx} outside {n_inputs} parameters");
        }

        let functor = LatticeFunctor::new(&self.template, self.diffractometer, self.states, &self.peaks)?
            .with_constants(self.constants.clone())
            .with_constraints(self.constraints.clone());

        let n_free = functor.fixed_mask().iter().filter(|fixed| !**fixed).count();
        if functor.n_observations() == 0 || functor.num_residuals() < n_free {
            info!(
                "{} refinable peaks for {n_free} free parameters, UB refinement skipped",
                functor.n_observations()
            );
            return Ok(LatticeFitOutcome {
                success: false,
                offsets: vec![0.0; n_inputs],
                cost_function: Vec::new(),
                solution: None,
            });
        }

        let x0 = functor.effective(&self.starting_point());
        let (x, report) = backend.solve(&functor, x0, options);
        let x = functor.effective(&x);

        let mut solution = match functor.solution(&x) {
            Ok(solution) => Some(solution),
            Err(err) => {
                warn!("UB refinement ended on an invalid solution: {err:#}");
                None
            }
        };

        if report.converged {
            info!(
                "UB refinement converged after {} evaluations ({})",
                report.iterations, report.termination
            );
            if let Some(solution) = solution.as_mut() {
                let jacobian = functor.jacobian(&x);
                let residuals = functor.residuals(&x);
                if let Err(err) = parameter_covariance(&jacobian, &residuals, &functor.fixed_mask())
                    .and_then(|cov| solution.set_covariance(&cov))
                {
                    warn!("no covariance for the UB solution: {err:#}");
                }
            }
        } else {
            warn!("UB refinement failed: {}", report.termination);
        }

        Ok(LatticeFitOutcome {
            success: report.converged,
            offsets: x.iter().copied().collect(),
            cost_function: report.cost_trace,
            solution,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::LmBackend;
    use diffract_core::synthetic::{four_circle, predict_peaks, RotationScan};
    use diffract_core::UnitCell;
    use std::f64::consts::FRAC_PI_2;

    fn cell() -> UnitCell {
        UnitCell::from_parameters(6.0, 7.0, 8.0, FRAC_PI_2, FRAC_PI_2, FRAC_PI_2).unwrap()
    }

    #[test]
    fn residuals_vanish_at_the_true_cell() {
        let diffractometer = four_circle(1.0).unwrap();
        let states = RotationScan::default().states(&diffractometer).unwrap();
        let peaks = predict_peaks(&states, &cell(), 4).unwrap();

        let template = UBSolution::new(cell(), 3, 1);
        let functor = LatticeFunctor::new(&template, &diffractometer, &states, &peaks).unwrap();
        assert_eq!(functor.num_residuals(), 3 * peaks.len());
        let r = functor.residuals(&template.zip());
        assert!(r.amax() < 1e-8, "max residual {}", r.amax());
    }

    #[test]
    fn constants_and_constraints_are_enforced() {
        let diffractometer = four_circle(1.0).unwrap();
        let states = RotationScan::default().states(&diffractometer).unwrap();
        let template = UBSolution::new(cell(), 3, 1);
        let functor = LatticeFunctor::new(&template, &diffractometer, &states, &[])
            .unwrap()
            .with_constants(BTreeMap::from([(0, 0.5)]))
            .with_constraints(BTreeMap::from([(4, (3, 2.0))]));

        let x = DVector::from_element(template.inputs(), 1.0);
        let e = functor.effective(&x);
        assert_eq!(e[0], 0.5);
        assert_eq!(e[4], 2.0);
        assert_eq!(functor.fixed_mask().iter().filter(|f| **f).count(), 2);
    }

    #[test]
    fn no_peaks_is_a_no_op() {
        let diffractometer = four_circle(1.0).unwrap();
        let states = RotationScan::default().states(&diffractometer).unwrap();
        let minimizer = LatticeMinimizer::new(UBSolution::new(cell(), 3, 1), &diffractometer, &states);

        let outcome = minimizer.run(&LmBackend, &SolveOptions::default()).unwrap();
        assert!(!outcome.success);
        assert_eq!(outcome.offsets, vec![0.0; 9]);
        assert!(outcome.cost_function.is_empty());
        assert!(outcome.solution.is_none());
    }

    #[test]
    fn held_lattice_needs_only_orientation_peaks() {
        let diffractometer = four_circle(1.0).unwrap();
        let states = RotationScan::default().states(&diffractometer).unwrap();
        let peaks = predict_peaks(&states, &cell(), 4).unwrap();
        let first = peaks[0].clone();
        let h1 = first.hkl.unwrap();
        let second = peaks
            .iter()
            .find(|p| p.hkl.unwrap().cross(&h1).norm() > 0.5)
            .unwrap()
            .clone();

        let template = UBSolution::new(cell(), 3, 1);
        let truth = template.zip();
        let mut minimizer = LatticeMinimizer::new(template, &diffractometer, &states);
        minimizer.add_peaks([first, second]);
        for idx in 3..9 {
            minimizer.set_constant(idx, truth[idx]);
        }
        minimizer.set_starting_value(0, 2e-3);
        minimizer.set_starting_value(2, -1e-3);

        // six residuals for nine inputs, three of them free
        let outcome = minimizer.run(&LmBackend, &SolveOptions::default()).unwrap();
        assert!(!outcome.cost_function.is_empty());
        for idx in 0..3 {
            assert!(outcome.offsets[idx].abs() < 1e-6, "{:?}", outcome.offsets);
        }
        for idx in 3..9 {
            assert_eq!(outcome.offsets[idx], truth[idx]);
        }
    }

    #[test]
    fn out_of_range_constraint_is_an_error() {
        let diffractometer = four_circle(1.0).unwrap();
        let states = RotationScan::default().states(&diffractometer).unwrap();
        let mut minimizer =
            LatticeMinimizer::new(UBSolution::new(cell(), 3, 1), &diffractometer, &states);
        minimizer.set_constraint(20, 0, 1.0);
        assert!(minimizer.run(&LmBackend, &SolveOptions::default()).is_err());
    }

    #[test]
    fn starting_values_outside_the_vector_are_ignored() {
        let diffractometer = four_circle(1.0).unwrap();
        let states = RotationScan::default().states(&diffractometer).unwrap();
        let mut minimizer =
            LatticeMinimizer::new(UBSolution::new(cell(), 3, 1), &diffractometer, &states);
        minimizer.set_starting_value(100, 1.0);
        minimizer.set_starting_value(0, 0.01);
        assert_eq!(minimizer.starting_point()[0], 0.01);
        minimizer.unset_starting_value(0);
        assert_eq!(minimizer.starting_point()[0], 0.0);
    }
}
