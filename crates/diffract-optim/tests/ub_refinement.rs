//! UB refinement against synthetic four-circle peak tables.

use diffract_core::synthetic::{four_circle, predict_peaks, RotationScan, UniformNoise};
use diffract_core::{Diffractometer, NiggliConstraint, Peak, Quat, Real, UnitCell, Vec3, Vec6};
use diffract_optim::{LatticeMinimizer, LmBackend, SolveOptions, UBSolution};
use nalgebra::SymmetricEigen;

const DETECTOR_OFFSET: Real = 0.003;

fn orientation() -> Quat {
    Quat::from_euler_angles(0.1, -0.2, 0.3)
}

fn cell(a: Real, b: Real, c: Real, orientation: &Quat) -> UnitCell {
    let ch = Vec6::new(a * a, b * b, c * c, 0.0, 0.0, 0.0);
    UnitCell::from_character(&ch, orientation).unwrap()
}

fn shifted_instrument(detector_offset: Real) -> Diffractometer {
    let mut diffractometer = four_circle(1.0).unwrap();
    diffractometer
        .detector_mut()
        .gonio_mut()
        .unwrap()
        .set_physical_offset(0, detector_offset)
        .unwrap();
    diffractometer
}

fn perturbed_orientation() -> Quat {
    Quat::from_scaled_axis(Vec3::new(0.002, -0.001, 0.0015)) * orientation()
}

#[test]
fn refines_ub_and_detector_offset() {
    let truth = shifted_instrument(DETECTOR_OFFSET);
    let scan = RotationScan::default();
    let true_cell = cell(6.0, 7.0, 8.0, &orientation());
    let peaks = predict_peaks(&scan.states(&truth).unwrap(), &true_cell, 4).unwrap();
    assert!(peaks.len() > 10, "only {} peaks", peaks.len());

    let nominal = four_circle(1.0).unwrap();
    let states = scan.states(&nominal).unwrap();
    let start = cell(6.03, 6.98, 8.05, &perturbed_orientation());

    let mut template = UBSolution::new(start, 3, 1);
    let mut flags = template.flags().clone();
    flags.detector_axes[0] = true;
    template.set_flags(flags).unwrap();

    let mut minimizer = LatticeMinimizer::new(template, &nominal, &states);
    minimizer.add_peaks(peaks);
    let outcome = minimizer.run(&LmBackend, &SolveOptions::default()).unwrap();

    assert!(outcome.success);
    let solution = outcome.solution.unwrap();
    assert!(
        (solution.detector_offsets()[0] - DETECTOR_OFFSET).abs() < 1e-7,
        "detector offset {}",
        solution.detector_offsets()[0]
    );
    let ub = solution.ub().unwrap();
    assert!((ub - true_cell.ub()).norm() < 1e-8);
    let fitted = solution.unit_cell().unwrap().character();
    assert!((fitted.a - 6.0).abs() < 1e-6);
    assert!((fitted.b - 7.0).abs() < 1e-6);
    assert!((fitted.c - 8.0).abs() < 1e-6);
    assert!(outcome.cost_function.len() > 1);
}

#[test]
fn covariance_is_symmetric_psd_with_zero_fixed_entries() {
    let truth = four_circle(1.0).unwrap();
    let scan = RotationScan::default();
    let true_cell = cell(6.0, 7.0, 8.0, &orientation());
    let noise = UniformNoise::new(7, 0.05);
    let peaks: Vec<Peak> = predict_peaks(&scan.states(&truth).unwrap(), &true_cell, 4)
        .unwrap()
        .into_iter()
        .enumerate()
        .map(|(i, mut peak)| {
            peak.px = noise.apply(i, 0, peak.px);
            peak.py = noise.apply(i, 1, peak.py);
            peak
        })
        .collect();

    let states = scan.states(&truth).unwrap();
    let mut template = UBSolution::new(cell(6.02, 7.01, 7.98, &perturbed_orientation()), 3, 1);
    let mut flags = template.flags().clone();
    flags.detector_axes[0] = true;
    template.set_flags(flags).unwrap();
    // optimizer vector: orientation 0..3, lattice 3..9, detector 9
    assert_eq!(template.inputs(), 10);

    let mut minimizer = LatticeMinimizer::new(template, &truth, &states);
    minimizer.add_peaks(peaks);
    minimizer.set_constant(9, 0.0);
    let outcome = minimizer.run(&LmBackend, &SolveOptions::default()).unwrap();
    assert!(outcome.success);

    let solution = outcome.solution.unwrap();
    let cov = solution.covariance().unwrap().clone();
    let n = solution.n_parameters();
    assert_eq!(cov.shape(), (n, n));
    assert!((&cov - cov.transpose()).amax() == 0.0);

    let eigen = SymmetricEigen::new(cov.clone());
    let scale = eigen.eigenvalues.amax();
    assert!(scale > 0.0);
    assert!(eigen.eigenvalues.iter().all(|&l| l >= -1e-12 * scale));

    // wavelength and sample axes fixed by flags, detector axis held constant
    for i in 9..n {
        assert_eq!(cov[(i, i)], 0.0, "parameter {i}");
    }
    for i in 0..9 {
        assert!(cov[(i, i)] > 0.0, "parameter {i}");
    }
    assert_eq!(solution.detector_offsets()[0], 0.0);

    let sigmas = solution.unit_cell().unwrap().character_sigmas().unwrap();
    assert!(sigmas.a > 0.0 && sigmas.a < 1e-2);
}

#[test]
fn cubic_constraint_holds_at_the_solution() {
    let truth = four_circle(1.0).unwrap();
    let scan = RotationScan::default();
    let true_cell = cell(6.0, 6.0, 6.0, &orientation());
    let peaks = predict_peaks(&scan.states(&truth).unwrap(), &true_cell, 4).unwrap();
    let states = scan.states(&truth).unwrap();

    let template = UBSolution::new(cell(6.02, 5.98, 6.01, &perturbed_orientation()), 3, 1)
        .with_niggli_constraint(NiggliConstraint::cubic_p())
        .unwrap();
    assert_eq!(template.inputs(), 4);

    let mut minimizer = LatticeMinimizer::new(template, &truth, &states);
    minimizer.add_peaks(peaks);
    let outcome = minimizer.run(&LmBackend, &SolveOptions::default()).unwrap();
    assert!(outcome.success);

    let solution = outcome.solution.unwrap();
    assert!(solution.niggli_constraints().norm() < 1e-10);
    let fitted = solution.unit_cell().unwrap().character();
    for length in [fitted.a, fitted.b, fitted.c] {
        assert!((length - 6.0).abs() < 1e-6, "{fitted:?}");
    }
    assert!((solution.ub().unwrap() - true_cell.ub()).norm() < 1e-8);
}

#[test]
fn applying_the_solution_updates_instrument_and_states() {
    let truth = shifted_instrument(DETECTOR_OFFSET);
    let scan = RotationScan::default();
    let true_cell = cell(6.0, 7.0, 8.0, &orientation());
    let peaks = predict_peaks(&scan.states(&truth).unwrap(), &true_cell, 4).unwrap();

    let mut nominal = four_circle(1.0).unwrap();
    let mut states = scan.states(&nominal).unwrap();
    let mut template = UBSolution::new(cell(6.0, 7.0, 8.0, &orientation()), 3, 1);
    let mut flags = template.flags().clone();
    flags.detector_axes[0] = true;
    template.set_flags(flags).unwrap();

    let outcome = {
        let mut minimizer = LatticeMinimizer::new(template, &nominal, &states);
        minimizer.add_peaks(peaks.iter().cloned());
        minimizer.run(&LmBackend, &SolveOptions::default()).unwrap()
    };
    let solution = outcome.solution.unwrap();

    solution.apply_to_states(&nominal, &mut states).unwrap();
    assert!(states.iter().all(|s| s.refined));

    let mut refined_cell = cell(1.0, 1.0, 1.0, &Quat::identity());
    solution.apply(&mut nominal, &mut refined_cell).unwrap();
    let offset = nominal.detector().gonio().unwrap().physical_offsets()[0];
    assert!((offset - DETECTOR_OFFSET).abs() < 1e-7);

    let rebuilt = scan.states(&nominal).unwrap();
    for peak in &peaks {
        let expected = refined_cell.from_index(&peak.hkl.unwrap());
        let from_states = peak.state(&states).unwrap().sample_q(peak.px, peak.py);
        let from_rebuilt = peak.state(&rebuilt).unwrap().sample_q(peak.px, peak.py);
        assert!((from_states - expected).norm() < 1e-7);
        assert!((from_rebuilt - expected).norm() < 1e-7);
    }
}
