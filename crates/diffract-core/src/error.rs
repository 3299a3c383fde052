use thiserror::Error;

/// Configuration and domain errors raised by the geometry layer.
///
/// All of these are recoverable by the caller: they signal that an instrument
/// was described inconsistently, never that the process is in a bad state.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum GeometryError {
    #[error("axis {label}: direction vector must be non-zero")]
    ZeroDirection { label: String },
    #[error("gonio {gonio}: expected {expected} physical axis values, got {got}")]
    ValueCount {
        gonio: String,
        expected: usize,
        got: usize,
    },
    #[error("component state mismatch: {0}")]
    StateMismatch(String),
    #[error("instrument states belong to different diffractometers")]
    DiffractometerMismatch,
    #[error("frame {frame} outside valid range [0, {max}]")]
    FrameOutOfRange { frame: f64, max: f64 },
    #[error("gonio {gonio}: no axis {key}")]
    UnknownAxis { gonio: String, key: String },
    #[error("invalid detector geometry: {0}")]
    InvalidDetector(String),
    #[error("wavelength must be > 0, got {0}")]
    InvalidWavelength(f64),
    #[error("invalid unit cell: {0}")]
    InvalidCell(String),
}
