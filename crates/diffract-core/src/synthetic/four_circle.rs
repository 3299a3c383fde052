//! A four-circle diffractometer and rotation scans for synthetic experiments.

use crate::{
    Component, ComponentRole, Detector, DetectorGeometry, Diffractometer, GeometryError, Gonio,
    InstrumentStateList, MillerIndex, Peak, Real, RotationSense, Source, UnitCell, Vec3,
};

/// Flat 200×200 detector on a 2θ arm (about +z) and an ω-χ-φ sample goniometer.
pub fn four_circle(wavelength: Real) -> Result<Diffractometer, GeometryError> {
    let mut detector_gonio = Gonio::new("detector");
    detector_gonio.add_rotation("2theta", Vec3::z(), RotationSense::CounterClockwise)?;
    let geometry = DetectorGeometry::flat(0.5, 0.6, 0.6, 200, 200)?;
    let detector = Detector::new("flat", geometry).with_gonio(detector_gonio);

    let mut sample_gonio = Gonio::new("sample");
    sample_gonio.add_rotation("omega", Vec3::z(), RotationSense::CounterClockwise)?;
    sample_gonio.add_rotation("chi", Vec3::y(), RotationSense::CounterClockwise)?;
    sample_gonio.add_rotation("phi", Vec3::z(), RotationSense::CounterClockwise)?;
    let sample = Component::new("sample", ComponentRole::Sample).with_gonio(sample_gonio);

    let source = Source::new("monochromator", wavelength)?;
    Diffractometer::new("four-circle", detector, sample, source)
}

/// ω scan at fixed 2θ, χ and φ.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RotationScan {
    pub two_theta: Real,
    pub chi: Real,
    pub phi: Real,
    pub omega_start: Real,
    pub omega_step: Real,
    pub n_frames: usize,
}

impl Default for RotationScan {
    fn default() -> Self {
        Self {
            two_theta: 0.6,
            chi: 0.3,
            phi: 0.1,
            omega_start: 0.0,
            omega_step: 0.01,
            n_frames: 60,
        }
    }
}

impl RotationScan {
    pub fn omega(&self, frame: usize) -> Real {
        self.omega_start + frame as Real * self.omega_step
    }

    /// One state per frame, built from raw axis values on `diffractometer`.
    pub fn states(&self, diffractometer: &Diffractometer) -> Result<InstrumentStateList, GeometryError> {
        let states = (0..self.n_frames)
            .map(|i| {
                diffractometer.state(
                    vec![self.two_theta],
                    vec![self.omega(i), self.chi, self.phi],
                    vec![],
                )
            })
            .collect::<Result<Vec<_>, _>>()?;
        InstrumentStateList::from_states(states)
    }
}

/// Ewald-sphere distance `|R q + ki|² − |ki|²` of a sample-frame `q` at `frame`.
fn ewald_offset(states: &InstrumentStateList, q: &Vec3, frame: Real) -> Result<Real, GeometryError> {
    let interpolated = states.interpolate(frame)?;
    let state = interpolated.state();
    let ki = state.ki();
    let kf = state.sample_orientation_matrix() * q + ki;
    Ok(kf.norm_squared() - ki.norm_squared())
}

/// Peaks of every reflection `|h|, |k|, |l| ≤ max_index` crossing the Ewald
/// sphere during the scan and landing on the detector.
///
/// Assumes the sample sits at the origin and the detector gonio only rotates.
pub fn predict_peaks(
    states: &InstrumentStateList,
    cell: &UnitCell,
    max_index: i32,
) -> Result<Vec<Peak>, GeometryError> {
    let mut peaks = Vec::new();
    if states.len() < 2 {
        return Ok(peaks);
    }
    for h in -max_index..=max_index {
        for k in -max_index..=max_index {
            for l in -max_index..=max_index {
                if h == 0 && k == 0 && l == 0 {
                    continue;
                }
                let hkl = MillerIndex::new(h as Real, k as Real, l as Real);
                let q = cell.from_index(&hkl);
                predict_reflection(states, &q, &hkl, &mut peaks)?;
            }
        }
    }
    Ok(peaks)
}

fn predict_reflection(
    states: &InstrumentStateList,
    q: &Vec3,
    hkl: &MillerIndex,
    peaks: &mut Vec<Peak>,
) -> Result<(), GeometryError> {
    let mut previous = ewald_offset(states, q, 0.0)?;
    for i in 1..states.len() {
        let current = ewald_offset(states, q, i as Real)?;
        if previous * current < 0.0 {
            let (mut lo, mut hi) = ((i - 1) as Real, i as Real);
            let mut lo_value = previous;
            for _ in 0..60 {
                let mid = 0.5 * (lo + hi);
                let value = ewald_offset(states, q, mid)?;
                if value * lo_value <= 0.0 {
                    hi = mid;
                } else {
                    lo = mid;
                    lo_value = value;
                }
            }
            let frame = 0.5 * (lo + hi);
            let interpolated = states.interpolate(frame)?;
            let state = interpolated.state();
            let kf = state.sample_orientation_matrix() * q + state.ki();
            let direction = state.detector_orientation.inverse() * kf;
            if let Some((px, py)) = state.detector_geometry().pixel_from_direction(&direction) {
                peaks.push(Peak::new(px, py, frame).with_hkl(*hkl));
            }
        }
        previous = current;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::FRAC_PI_2;

    #[test]
    fn predicted_peaks_lie_on_the_lattice() {
        let diffractometer = four_circle(1.0).unwrap();
        let states = RotationScan::default().states(&diffractometer).unwrap();
        let cell = UnitCell::from_parameters(6.0, 7.0, 8.0, FRAC_PI_2, FRAC_PI_2, FRAC_PI_2)
            .unwrap();
        let peaks = predict_peaks(&states, &cell, 4).unwrap();
        assert!(peaks.len() > 10, "only {} peaks predicted", peaks.len());

        for peak in &peaks {
            let q = peak.state(&states).unwrap().sample_q(peak.px, peak.py);
            let expected = cell.from_index(&peak.hkl.unwrap());
            assert!(
                (q - expected).norm() < 1e-8,
                "peak {:?} misplaced by {}",
                peak.hkl,
                (q - expected).norm()
            );
        }
    }
}
