//! Packing of UB-matrix and instrument-offset parameters for refinement.
//!
//! Full parameter layout:
//!
//! | block       | size | meaning                                           |
//! |-------------|------|---------------------------------------------------|
//! | orientation | 3    | rotation vector applied on top of the cell's `U`  |
//! | lattice     | k    | coordinates of the metric character in `ker(C)`   |
//! | wavelength  | 1    | wavelength offset                                 |
//! | sample      | N    | sample gonio offsets (physical axes)              |
//! | detector    | M    | detector gonio offsets (physical axes)            |
//!
//! `k = 6` without a Niggli constraint. The optimizer sees only the entries
//! whose [`RefineFlags`] are set, in layout order (`zip`/`unzip`).

use std::fmt;

use anyhow::{ensure, Result};
use diffract_core::{
    Diffractometer, GeometryError, Gonio, InstrumentState, InstrumentStateList, Mat3, Mat6,
    NiggliConstraint, Quat, Real, UnitCell, UnitCellCharacter, Vec3, Vec6,
};
use log::debug;
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

use crate::covariance::expand_covariance;

/// Which parameter blocks take part in a refinement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefineFlags {
    pub orientation: bool,
    pub lattice: bool,
    pub wavelength: bool,
    pub sample_axes: Vec<bool>,
    pub detector_axes: Vec<bool>,
}

impl RefineFlags {
    /// Orientation and lattice free, every instrument offset fixed.
    pub fn ub_only(n_sample_axes: usize, n_detector_axes: usize) -> Self {
        Self {
            orientation: true,
            lattice: true,
            wavelength: false,
            sample_axes: vec![false; n_sample_axes],
            detector_axes: vec![false; n_detector_axes],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UBSolution {
    cell: UnitCell,
    constraint: NiggliConstraint,
    kernel: DMatrix<Real>,
    u_offset: Vec3,
    lattice: DVector<Real>,
    wavelength_offset: Real,
    sample_offsets: Vec<Real>,
    detector_offsets: Vec<Real>,
    flags: RefineFlags,
    covariance: Option<DMatrix<Real>>,
}

impl UBSolution {
    /// Unconstrained solution starting at `cell` with zero instrument offsets.
    pub fn new(cell: UnitCell, n_sample_axes: usize, n_detector_axes: usize) -> Self {
        let constraint = NiggliConstraint::unconstrained();
        let kernel = constraint.kernel();
        let lattice = project(&kernel, &cell.metric_vector());
        Self {
            cell,
            constraint,
            kernel,
            u_offset: Vec3::zeros(),
            lattice,
            wavelength_offset: 0.0,
            sample_offsets: vec![0.0; n_sample_axes],
            detector_offsets: vec![0.0; n_detector_axes],
            flags: RefineFlags::ub_only(n_sample_axes, n_detector_axes),
            covariance: None,
        }
    }

    /// Sized after the physical axes of `diffractometer`; instrument offsets
    /// are refined unless marked fixed on the axes or the source.
    pub fn for_diffractometer(cell: UnitCell, diffractometer: &Diffractometer) -> Self {
        let free_axes = |gonio: Option<&Gonio>| -> Vec<bool> {
            gonio
                .map(|g| g.physical_axes().map(|a| !a.is_offset_fixed()).collect())
                .unwrap_or_default()
        };
        let sample_axes = free_axes(diffractometer.sample().gonio());
        let detector_axes = free_axes(diffractometer.detector().gonio());
        let mut solution = Self::new(cell, sample_axes.len(), detector_axes.len());
        solution.flags = RefineFlags {
            orientation: true,
            lattice: true,
            wavelength: !diffractometer.source().is_offset_fixed(),
            sample_axes,
            detector_axes,
        };
        solution
    }

    /// Restrict the metric character to `ker(constraint)`; the current
    /// character is projected onto the kernel.
    pub fn with_niggli_constraint(mut self, constraint: NiggliConstraint) -> Result<Self> {
        let kernel = constraint.kernel();
        ensure!(
            kernel.ncols() > 0,
            "Niggli form {} leaves no free lattice parameter",
            constraint.number()
        );
        let character = self.character();
        self.lattice = project(&kernel, &character);
        self.kernel = kernel;
        self.constraint = constraint;
        self.covariance = None;
        let projected = self.character();
        ensure!(
            projected[0] > 0.0 && projected[1] > 0.0 && projected[2] > 0.0,
            "cell does not project onto Niggli form {}",
            self.constraint.number()
        );
        Ok(self)
    }

    pub fn flags(&self) -> &RefineFlags {
        &self.flags
    }

    pub fn set_flags(&mut self, flags: RefineFlags) -> Result<()> {
        ensure!(
            flags.sample_axes.len() == self.sample_offsets.len()
                && flags.detector_axes.len() == self.detector_offsets.len(),
            "flags for {}/{} axes, solution has {}/{}",
            flags.sample_axes.len(),
            flags.detector_axes.len(),
            self.sample_offsets.len(),
            self.detector_offsets.len()
        );
        self.flags = flags;
        Ok(())
    }

    pub fn constraint(&self) -> &NiggliConstraint {
        &self.constraint
    }

    pub fn n_lattice_parameters(&self) -> usize {
        self.kernel.ncols()
    }

    /// Length of the full parameter layout.
    pub fn n_parameters(&self) -> usize {
        3 + self.n_lattice_parameters()
            + 1
            + self.sample_offsets.len()
            + self.detector_offsets.len()
    }

    /// `true` for every entry of the full layout held fixed.
    pub fn fixed_mask(&self) -> Vec<bool> {
        let f = &self.flags;
        let mut mask = Vec::with_capacity(self.n_parameters());
        mask.extend(std::iter::repeat(!f.orientation).take(3));
        mask.extend(std::iter::repeat(!f.lattice).take(self.n_lattice_parameters()));
        mask.push(!f.wavelength);
        mask.extend(f.sample_axes.iter().map(|free| !free));
        mask.extend(f.detector_axes.iter().map(|free| !free));
        mask
    }

    /// Number of optimizer inputs (free parameters).
    pub fn inputs(&self) -> usize {
        self.fixed_mask().iter().filter(|fixed| !**fixed).count()
    }

    fn free_indices(&self) -> Vec<usize> {
        self.fixed_mask()
            .iter()
            .enumerate()
            .filter(|(_, fixed)| !**fixed)
            .map(|(i, _)| i)
            .collect()
    }

    /// Every parameter in layout order.
    pub fn parameters(&self) -> DVector<Real> {
        let mut values = Vec::with_capacity(self.n_parameters());
        values.extend(self.u_offset.iter());
        values.extend(self.lattice.iter());
        values.push(self.wavelength_offset);
        values.extend(&self.sample_offsets);
        values.extend(&self.detector_offsets);
        DVector::from_vec(values)
    }

    fn set_parameters(&mut self, p: &DVector<Real>) {
        let k = self.n_lattice_parameters();
        let n_sample = self.sample_offsets.len();
        self.u_offset = p.fixed_rows::<3>(0).into_owned();
        self.lattice = p.rows(3, k).into_owned();
        self.wavelength_offset = p[3 + k];
        let sample_start = 4 + k;
        self.sample_offsets = p.rows(sample_start, n_sample).iter().copied().collect();
        let detector_start = sample_start + n_sample;
        self.detector_offsets = p
            .rows(detector_start, self.detector_offsets.len())
            .iter()
            .copied()
            .collect();
    }

    /// Free parameters, in layout order.
    pub fn zip(&self) -> DVector<Real> {
        let p = self.parameters();
        let free = self.free_indices();
        DVector::from_iterator(free.len(), free.iter().map(|&i| p[i]))
    }

    /// Solution with the free parameters replaced by `x`.
    ///
    /// Fixed parameters keep their current values; any stored covariance is
    /// dropped.
    pub fn unzip(&self, x: &DVector<Real>) -> Result<Self> {
        let free = self.free_indices();
        ensure!(
            x.len() == free.len(),
            "expected {} free parameters, got {}",
            free.len(),
            x.len()
        );
        let mut p = self.parameters();
        for (value, &i) in x.iter().zip(&free) {
            p[i] = *value;
        }
        let mut solution = self.clone();
        solution.set_parameters(&p);
        solution.covariance = None;
        Ok(solution)
    }

    /// Metric character `K · p`.
    pub fn character(&self) -> Vec6 {
        let ch = &self.kernel * &self.lattice;
        Vec6::from_iterator(ch.iter().copied())
    }

    /// `C · ch`; zero up to rounding for any solution.
    pub fn niggli_constraints(&self) -> DVector<Real> {
        self.constraint.residuals(&self.character())
    }

    pub fn orientation(&self) -> Quat {
        Quat::from_scaled_axis(self.u_offset) * self.cell.orientation()
    }

    /// Refined cell. Carries the character covariance when one is known.
    pub fn unit_cell(&self) -> Result<UnitCell, GeometryError> {
        let mut cell = UnitCell::from_character(&self.character(), &self.orientation())?;
        if let Some(cov) = self.character_covariance() {
            cell.set_parameter_covariance(cov);
        }
        Ok(cell)
    }

    pub fn ub(&self) -> Result<Mat3, GeometryError> {
        Ok(*self.unit_cell()?.ub())
    }

    pub fn wavelength_offset(&self) -> Real {
        self.wavelength_offset
    }

    pub fn sample_offsets(&self) -> &[Real] {
        &self.sample_offsets
    }

    pub fn detector_offsets(&self) -> &[Real] {
        &self.detector_offsets
    }

    /// Wavelength, sample and detector offsets as one vector.
    pub fn instrument_offsets(&self) -> Vec<Real> {
        std::iter::once(self.wavelength_offset)
            .chain(self.sample_offsets.iter().copied())
            .chain(self.detector_offsets.iter().copied())
            .collect()
    }

    /// Store the covariance of the free parameters (`inputs × inputs`);
    /// fixed parameters get zero rows and columns.
    pub fn set_covariance(&mut self, free_covariance: &DMatrix<Real>) -> Result<()> {
        let free = self.free_indices();
        ensure!(
            free_covariance.shape() == (free.len(), free.len()),
            "covariance is {:?}, expected {n}x{n}",
            free_covariance.shape(),
            n = free.len()
        );
        self.covariance = Some(expand_covariance(
            free_covariance,
            &free,
            self.n_parameters(),
        ));
        Ok(())
    }

    /// Covariance over the full layout.
    pub fn covariance(&self) -> Option<&DMatrix<Real>> {
        self.covariance.as_ref()
    }

    /// Standard errors over the full layout; zero for fixed parameters.
    pub fn sigmas(&self) -> Option<DVector<Real>> {
        let cov = self.covariance.as_ref()?;
        Some(cov.diagonal().map(|v| v.max(0.0).sqrt()))
    }

    /// Covariance of the metric character, `K · Σ_lattice · Kᵀ`.
    pub fn character_covariance(&self) -> Option<Mat6> {
        let cov = self.covariance.as_ref()?;
        let k = self.n_lattice_parameters();
        let block = cov.view((3, 3), (k, k));
        let full = &self.kernel * block * self.kernel.transpose();
        Some(Mat6::from_fn(|i, j| full[(i, j)]))
    }

    /// State of one frame as seen with this solution's instrument offsets.
    pub fn trial_state(
        &self,
        diffractometer: &Diffractometer,
        state: &InstrumentState,
    ) -> Result<InstrumentState, GeometryError> {
        diffractometer.state_with_offsets(
            state,
            self.wavelength_offset,
            &self.sample_offsets,
            &self.detector_offsets,
        )
    }

    /// Push the refined offsets into the instrument and replace `cell`.
    pub fn apply(&self, diffractometer: &mut Diffractometer, cell: &mut UnitCell) -> Result<()> {
        let refined = self.unit_cell()?;
        diffractometer.apply_offsets(
            self.wavelength_offset,
            &self.sample_offsets,
            &self.detector_offsets,
        )?;
        *cell = refined;
        debug!("applied UB solution to {}", diffractometer.name());
        Ok(())
    }

    /// Recompute every state with the refined offsets and mark it refined.
    ///
    /// The offsets are added to those carried by each state's component
    /// states, so this does not depend on whether [`Self::apply`] already ran.
    pub fn apply_to_states(
        &self,
        diffractometer: &Diffractometer,
        states: &mut InstrumentStateList,
    ) -> Result<()> {
        for state in states.iter_mut() {
            let mut updated = self.trial_state(diffractometer, state)?;
            updated.refined = true;
            *state = updated;
        }
        Ok(())
    }
}

fn project(kernel: &DMatrix<Real>, character: &Vec6) -> DVector<Real> {
    kernel.transpose() * DVector::from_column_slice(character.as_slice())
}

impl fmt::Display for UBSolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sigmas = self.sigmas();
        let sigma = |i: usize| sigmas.as_ref().map_or(0.0, |s| s[i]);
        let k = self.n_lattice_parameters();

        match self.unit_cell() {
            Ok(cell) => {
                let c = cell.character();
                let s = cell.character_sigmas();
                let e = |pick: fn(&UnitCellCharacter) -> Real| {
                    s.as_ref().map_or(0.0, pick)
                };
                writeln!(
                    f,
                    "Niggli form {} ({})",
                    self.constraint.number(),
                    self.constraint.name()
                )?;
                writeln!(
                    f,
                    "a = {:.5}({:.5}) b = {:.5}({:.5}) c = {:.5}({:.5})",
                    c.a,
                    e(|p| p.a),
                    c.b,
                    e(|p| p.b),
                    c.c,
                    e(|p| p.c)
                )?;
                writeln!(
                    f,
                    "alpha = {:.4}({:.4}) beta = {:.4}({:.4}) gamma = {:.4}({:.4})",
                    c.alpha.to_degrees(),
                    e(|p| p.alpha).to_degrees(),
                    c.beta.to_degrees(),
                    e(|p| p.beta).to_degrees(),
                    c.gamma.to_degrees(),
                    e(|p| p.gamma).to_degrees()
                )?;
            }
            Err(err) => writeln!(f, "invalid cell: {err}")?,
        }

        writeln!(
            f,
            "wavelength offset: {:.6e}({:.2e})",
            self.wavelength_offset,
            sigma(3 + k)
        )?;
        let sample_start = 4 + k;
        for (i, offset) in self.sample_offsets.iter().enumerate() {
            writeln!(
                f,
                "sample axis {i}: {offset:.6e}({:.2e})",
                sigma(sample_start + i)
            )?;
        }
        let detector_start = sample_start + self.sample_offsets.len();
        for (i, offset) in self.detector_offsets.iter().enumerate() {
            writeln!(
                f,
                "detector axis {i}: {offset:.6e}({:.2e})",
                sigma(detector_start + i)
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::{FRAC_PI_2, PI};

    fn monoclinic() -> UnitCell {
        UnitCell::from_parameters(5.0, 6.0, 7.0, FRAC_PI_2, 1.7, FRAC_PI_2).unwrap()
    }

    #[test]
    fn new_solution_reproduces_the_cell() {
        let cell = monoclinic();
        let solution = UBSolution::new(cell.clone(), 3, 1);
        assert_eq!(solution.n_parameters(), 3 + 6 + 1 + 3 + 1);
        assert_eq!(solution.inputs(), 9);
        assert!((solution.ub().unwrap() - cell.ub()).norm() < 1e-12);
    }

    #[test]
    fn zip_unzip_round_trip() {
        let mut solution = UBSolution::new(monoclinic(), 3, 1);
        let mut flags = solution.flags().clone();
        flags.wavelength = true;
        flags.detector_axes[0] = true;
        solution.set_flags(flags).unwrap();
        assert_eq!(solution.inputs(), 11);

        let mut x = solution.zip();
        x[0] += 0.01;
        x[4] += 0.3;
        x[9] = 1e-3;
        x[10] = -2e-3;
        let moved = solution.unzip(&x).unwrap();
        assert!((moved.zip() - &x).norm() < 1e-15);
        assert_eq!(moved.wavelength_offset(), 1e-3);
        assert_eq!(moved.detector_offsets(), &[-2e-3]);
        assert_eq!(moved.sample_offsets(), &[0.0, 0.0, 0.0]);

        let again = moved.unzip(&moved.zip()).unwrap();
        let g1 = moved.unit_cell().unwrap().metric();
        let g2 = again.unit_cell().unwrap().metric();
        assert!((g1 - g2).norm() < 1e-12);
    }

    #[test]
    fn unzip_rejects_wrong_length() {
        let solution = UBSolution::new(monoclinic(), 0, 0);
        assert!(solution.unzip(&DVector::zeros(4)).is_err());
    }

    #[test]
    fn niggli_constraint_projects_the_character() {
        let cell = UnitCell::from_parameters(5.0, 6.0, 7.0, FRAC_PI_2, 1.7, 1.58).unwrap();
        let solution = UBSolution::new(cell, 0, 0)
            .with_niggli_constraint(NiggliConstraint::monoclinic_p())
            .unwrap();
        assert_eq!(solution.n_lattice_parameters(), 4);
        assert_eq!(solution.inputs(), 7);
        assert!(solution.niggli_constraints().norm() < 1e-12);

        let mut x = solution.zip();
        x[3] += 0.5;
        let moved = solution.unzip(&x).unwrap();
        assert!(moved.niggli_constraints().norm() < 1e-12);
        let gamma = moved.unit_cell().unwrap().character().gamma;
        assert!((gamma - FRAC_PI_2).abs() < 1e-12);
    }

    #[test]
    fn constrained_round_trip_keeps_the_metric() {
        let hexagonal =
            UnitCell::from_parameters(5.0, 5.0, 8.0, FRAC_PI_2, FRAC_PI_2, 2.0 * PI / 3.0).unwrap();
        let cases = [
            (monoclinic(), NiggliConstraint::monoclinic_p()),
            (hexagonal, NiggliConstraint::hexagonal_p()),
        ];
        for (cell, constraint) in cases {
            let solution = UBSolution::new(cell.clone(), 2, 1)
                .with_niggli_constraint(constraint)
                .unwrap();
            let g = solution.unit_cell().unwrap().metric();
            assert!((g - cell.metric()).norm() < 1e-10);

            let again = solution.unzip(&solution.zip()).unwrap();
            assert!((again.unit_cell().unwrap().metric() - g).norm() < 1e-10);

            let mut x = solution.zip();
            x[0] += 0.02;
            x[3] *= 1.01;
            let moved = solution.unzip(&x).unwrap();
            let g_moved = moved.unit_cell().unwrap().metric();
            let g_back = moved.unzip(&moved.zip()).unwrap().unit_cell().unwrap().metric();
            assert!((g_back - g_moved).norm() < 1e-10);
            assert!(moved.niggli_constraints().norm() < 1e-10);
        }
    }

    #[test]
    fn covariance_expands_over_fixed_parameters() {
        let mut solution = UBSolution::new(monoclinic(), 1, 0);
        let n = solution.inputs();
        let free_cov = DMatrix::from_fn(n, n, |i, j| if i == j { (i + 1) as Real } else { 0.0 });
        solution.set_covariance(&free_cov).unwrap();

        let sigmas = solution.sigmas().unwrap();
        assert_eq!(sigmas.len(), solution.n_parameters());
        assert!((sigmas[0] - 1.0).abs() < 1e-15);
        assert!((sigmas[8] - 3.0).abs() < 1e-15);
        assert_eq!(sigmas[9], 0.0);
        assert_eq!(sigmas[10], 0.0);

        let cell = solution.unit_cell().unwrap();
        let cov = cell.parameter_covariance().unwrap();
        assert!((cov[(0, 0)] - 4.0).abs() < 1e-12);
        assert!((cov[(5, 5)] - 9.0).abs() < 1e-12);
    }

    #[test]
    fn display_lists_offsets() {
        let solution = UBSolution::new(monoclinic(), 2, 1);
        let text = solution.to_string();
        assert!(text.contains("Niggli form 44"));
        assert!(text.contains("sample axis 1"));
        assert!(text.contains("detector axis 0"));
    }
}
