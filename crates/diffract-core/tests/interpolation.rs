use diffract_core::synthetic::{four_circle, RotationScan};
use diffract_core::{GeometryError, InstrumentStateList, InterpolatedState, Mat3, Real, Vec3};

fn scan() -> InstrumentStateList {
    let diffractometer = four_circle(1.5).unwrap();
    RotationScan {
        n_frames: 20,
        ..RotationScan::default()
    }
    .states(&diffractometer)
    .unwrap()
}

#[test]
fn endpoints_reproduce_bracketing_states() {
    let states = scan();
    let (s1, s2) = (states.get(4).unwrap(), states.get(5).unwrap());

    let at_start = InterpolatedState::new(s1, s2, 0.0).unwrap();
    let at_end = InterpolatedState::new(s1, s2, 1.0).unwrap();

    for (interpolated, reference) in [(at_start.state(), s1), (at_end.state(), s2)] {
        assert!(
            (interpolated.sample_orientation_matrix() - reference.sample_orientation_matrix())
                .norm()
                < 1e-14
        );
        assert!(
            (interpolated.detector_orientation_matrix()
                - reference.detector_orientation_matrix())
            .norm()
                < 1e-14
        );
        assert_eq!(interpolated.sample_position, reference.sample_position);
        assert_eq!(interpolated.wavelength, reference.wavelength);
        assert!((interpolated.ni - reference.ni).norm() < 1e-15);
        assert_eq!(
            interpolated.sample_state().values(),
            reference.sample_state().values()
        );
    }
}

#[test]
fn auxiliary_rotation_is_the_omega_step() {
    let states = scan();
    let interpolated = states.interpolate(7.25).unwrap();
    assert!((interpolated.step_size() - 0.01).abs() < 1e-12);
    assert!((interpolated.axis() - Vec3::z()).norm() < 1e-9);
}

#[test]
fn frame_outside_scan_is_rejected() {
    let states = scan();
    assert!(states.interpolate(19.0).is_ok());
    assert!(states.interpolate(0.0).is_ok());
    assert!(matches!(
        states.interpolate(19.5).unwrap_err(),
        GeometryError::FrameOutOfRange { .. }
    ));
    assert!(states.interpolate(-0.1).is_err());
    assert!(states.interpolate(Real::NAN).is_err());
    assert!(InstrumentStateList::new().interpolate(0.0).is_err());
}

#[test]
fn states_of_different_instruments_do_not_mix() {
    let a = scan();
    let b = scan();
    let err = InterpolatedState::new(a.get(0).unwrap(), b.get(1).unwrap(), 0.5).unwrap_err();
    assert_eq!(err, GeometryError::DiffractometerMismatch);

    let mut list = InstrumentStateList::new();
    list.push(a.get(0).unwrap().clone()).unwrap();
    assert!(list.push(b.get(0).unwrap().clone()).is_err());
}

#[test]
fn jacobian_q_matches_finite_differences() {
    let states = scan();
    let (px, py, frame) = (83.0, 120.5, 10.5);
    let interpolated = states.interpolate(frame).unwrap();
    let analytic = interpolated.jacobian_q(px, py);

    let h = 1e-4;
    let d_px = (interpolated.sample_q(px + h, py) - interpolated.sample_q(px - h, py)) / (2.0 * h);
    let d_py = (interpolated.sample_q(px, py + h) - interpolated.sample_q(px, py - h)) / (2.0 * h);
    let d_frame = (states.interpolate(frame + h).unwrap().sample_q(px, py)
        - states.interpolate(frame - h).unwrap().sample_q(px, py))
        / (2.0 * h);
    let numeric = Mat3::from_columns(&[d_px, d_py, d_frame]);

    assert!(
        (analytic - numeric).norm() < 1e-8,
        "analytic {analytic} vs numeric {numeric}"
    );
}

#[test]
fn lorentz_factor_formula() {
    let states = scan();
    let interpolated = states.interpolate(3.5).unwrap();
    let state = interpolated.state();
    let (px, py) = (150.0, 90.0);

    let kf = state.kf_lab(px, py);
    let q = kf - state.ki();
    let expected = kf.norm() / kf.dot(&interpolated.axis().cross(&q)).abs();
    let lorentz = interpolated.lorentz_factor(px, py);
    assert!(lorentz.is_finite() && lorentz > 0.0);
    assert!((lorentz - expected).abs() < 1e-12 * expected);

    let s = states.get(3).unwrap();
    let stationary = InterpolatedState::new(s, s, 0.5).unwrap();
    assert_eq!(stationary.step_size(), 0.0);
    assert!(stationary.lorentz_factor(px, py).is_infinite());
}

#[test]
fn half_turn_between_frames_keeps_both_endpoints() {
    let diffractometer = four_circle(1.0).unwrap();
    let s1 = diffractometer.state(vec![0.3], vec![0.0; 3], vec![]).unwrap();
    let s2 = diffractometer
        .state(vec![0.3], vec![std::f64::consts::PI, 0.0, 0.0], vec![])
        .unwrap();

    let at_start = InterpolatedState::new(&s1, &s2, 0.0).unwrap();
    let at_end = InterpolatedState::new(&s1, &s2, 1.0).unwrap();
    assert!(
        (at_start.state().sample_orientation_matrix() - s1.sample_orientation_matrix()).norm()
            < 1e-12
    );
    assert!(
        (at_end.state().sample_orientation_matrix() - s2.sample_orientation_matrix()).norm()
            < 1e-12
    );
    assert!((at_end.step_size() - std::f64::consts::PI).abs() < 1e-9);
}
