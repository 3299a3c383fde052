//! Goniometer offset calibration on synthetic four-circle scans.

use diffract_core::synthetic::{four_circle, RotationScan};
use diffract_core::{rotation_part, DataSet, Real, Vec3};
use diffract_optim::{
    fit_detector_gonio_offsets, fit_sample_gonio_offsets, GonioFitOptions, LmBackend,
};

#[test]
fn detector_offset_is_recovered_from_beam_directions() {
    let diffractometer = four_circle(1.0).unwrap();
    let gonio = diffractometer.detector().gonio().unwrap().clone();
    let delta: Real = 0.01;
    let beam = rotation_part(&gonio.affine_matrix(&[delta]).unwrap()) * Vec3::y();

    let mut states = RotationScan::default().states(&diffractometer).unwrap();
    for state in states.iter_mut() {
        state.ni = beam;
        state.refined = true;
    }
    let data = DataSet::new("scan", states);

    let outcome =
        fit_detector_gonio_offsets(&LmBackend, &gonio, &[data], &GonioFitOptions::default())
            .unwrap();
    assert_eq!(outcome.offsets.len(), 1);
    assert!(
        (outcome.offsets[0] - delta).abs() < 1e-6,
        "offset {} vs {delta}",
        outcome.offsets[0]
    );
    assert!(!outcome.cost_function.is_empty());
    let last = *outcome.cost_function.last().unwrap();
    assert!(last < outcome.cost_function[0]);
}

#[test]
fn detector_fit_ignores_unrefined_frames() {
    let diffractometer = four_circle(1.0).unwrap();
    let gonio = diffractometer.detector().gonio().unwrap().clone();
    let delta: Real = -0.02;
    let beam = rotation_part(&gonio.affine_matrix(&[delta]).unwrap()) * Vec3::y();

    let mut refined = RotationScan::default().states(&diffractometer).unwrap();
    for (i, state) in refined.iter_mut().enumerate() {
        state.ni = beam;
        state.refined = i % 3 == 0;
    }
    let mut unrefined = RotationScan::default().states(&diffractometer).unwrap();
    for state in unrefined.iter_mut() {
        state.ni = Vec3::x();
    }
    let datasets = [DataSet::new("a", refined), DataSet::new("b", unrefined)];

    let outcome =
        fit_detector_gonio_offsets(&LmBackend, &gonio, &datasets, &GonioFitOptions::default())
            .unwrap();
    assert!((outcome.offsets[0] - delta).abs() < 1e-6);
}

#[test]
fn sample_offsets_are_recovered_from_refined_orientations() {
    let delta = [0.002, -0.003, 0.004];
    let mut shifted = four_circle(1.0).unwrap();
    let gonio = shifted.sample_mut().gonio_mut().unwrap();
    for (i, d) in delta.iter().enumerate() {
        gonio.set_physical_offset(i, *d).unwrap();
    }

    let mut states = RotationScan::default().states(&shifted).unwrap();
    for state in states.iter_mut() {
        state.refined = true;
    }
    let data = DataSet::new("scan", states);

    // the nominal gonio knows nothing about the offsets
    let nominal = four_circle(1.0).unwrap();
    let gonio = nominal.sample().gonio().unwrap();
    let outcome =
        fit_sample_gonio_offsets(&LmBackend, gonio, &[data], &GonioFitOptions::default()).unwrap();

    assert_eq!(outcome.offsets.len(), 3);
    for (fitted, expected) in outcome.offsets.iter().zip(delta) {
        assert!(
            (fitted - expected).abs() < 1e-6,
            "offsets {:?} vs {delta:?}",
            outcome.offsets
        );
    }
    assert!(!outcome.cost_function.is_empty());
}

#[test]
fn sample_fit_without_refined_frames_is_a_no_op() {
    let diffractometer = four_circle(1.0).unwrap();
    let states = RotationScan::default().states(&diffractometer).unwrap();
    let data = DataSet::new("scan", states);
    let gonio = diffractometer.sample().gonio().unwrap();

    let outcome =
        fit_sample_gonio_offsets(&LmBackend, gonio, &[data], &GonioFitOptions::default()).unwrap();
    assert!(!outcome.success);
    assert_eq!(outcome.offsets, vec![0.0; 3]);
    assert!(outcome.cost_function.is_empty());
}
