//! Serializable instrument description.
//!
//! Instrument definition files are owned by the I/O layer; this module only
//! fixes their shape and turns them into live objects with `build()`.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::{
    Axis, Component, ComponentRole, Detector, DetectorGeometry, Diffractometer, Gonio, Real,
    RotationSense, Source, Vec3,
};

fn physical_default() -> bool {
    true
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AxisConfig {
    Rotation {
        label: String,
        direction: [Real; 3],
        #[serde(default)]
        sense: RotationSense,
        #[serde(default = "physical_default")]
        physical: bool,
        #[serde(default)]
        offset: Real,
    },
    Translation {
        label: String,
        direction: [Real; 3],
        #[serde(default = "physical_default")]
        physical: bool,
        #[serde(default)]
        offset: Real,
    },
}

impl AxisConfig {
    pub fn build(&self) -> Result<Axis> {
        let (mut axis, physical, offset) = match self {
            AxisConfig::Rotation {
                label,
                direction,
                sense,
                physical,
                offset,
            } => (
                Axis::rotation(label.as_str(), Vec3::from(*direction), *sense)?,
                *physical,
                *offset,
            ),
            AxisConfig::Translation {
                label,
                direction,
                physical,
                offset,
            } => (
                Axis::translation(label.as_str(), Vec3::from(*direction))?,
                *physical,
                *offset,
            ),
        };
        axis.set_physical(physical);
        axis.set_offset(offset);
        Ok(axis)
    }
}

/// Axes listed outer-to-inner.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GonioConfig {
    pub label: String,
    pub axes: Vec<AxisConfig>,
}

impl GonioConfig {
    pub fn build(&self) -> Result<Gonio> {
        let mut gonio = Gonio::new(self.label.as_str());
        for (i, axis) in self.axes.iter().enumerate() {
            let axis = axis
                .build()
                .with_context(|| format!("gonio {}: axis #{i}", self.label))?;
            gonio.add_axis(axis);
        }
        Ok(gonio)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DetectorConfig {
    Flat {
        name: String,
        distance: Real,
        width: Real,
        height: Real,
        n_cols: u32,
        n_rows: u32,
        #[serde(default)]
        gonio: Option<GonioConfig>,
    },
    Cylindrical {
        name: String,
        distance: Real,
        angular_width: Real,
        height: Real,
        n_cols: u32,
        n_rows: u32,
        #[serde(default)]
        gonio: Option<GonioConfig>,
    },
}

impl DetectorConfig {
    pub fn build(&self) -> Result<Detector> {
        let (name, geometry, gonio) = match self {
            DetectorConfig::Flat {
                name,
                distance,
                width,
                height,
                n_cols,
                n_rows,
                gonio,
            } => (
                name,
                DetectorGeometry::flat(*distance, *width, *height, *n_cols, *n_rows)?,
                gonio,
            ),
            DetectorConfig::Cylindrical {
                name,
                distance,
                angular_width,
                height,
                n_cols,
                n_rows,
                gonio,
            } => (
                name,
                DetectorGeometry::cylindrical(*distance, *angular_width, *height, *n_cols, *n_rows)?,
                gonio,
            ),
        };
        let mut detector = Detector::new(name.as_str(), geometry);
        if let Some(gonio) = gonio {
            detector = detector.with_gonio(gonio.build()?);
        }
        Ok(detector)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SampleConfig {
    pub name: String,
    #[serde(default)]
    pub gonio: Option<GonioConfig>,
}

impl SampleConfig {
    pub fn build(&self) -> Result<Component> {
        let mut sample = Component::new(self.name.as_str(), ComponentRole::Sample);
        if let Some(gonio) = &self.gonio {
            sample.set_gonio(Some(gonio.build()?));
        }
        Ok(sample)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SourceConfig {
    pub name: String,
    pub wavelength: Real,
    #[serde(default)]
    pub wavelength_offset: Real,
    #[serde(default)]
    pub beam_direction: Option<[Real; 3]>,
    #[serde(default)]
    pub gonio: Option<GonioConfig>,
}

impl SourceConfig {
    pub fn build(&self) -> Result<Source> {
        let mut source = Source::new(self.name.as_str(), self.wavelength)?;
        if let Some(direction) = self.beam_direction {
            source = source.with_beam_direction(Vec3::from(direction))?;
        }
        source.set_wavelength_offset(self.wavelength_offset);
        if let Some(gonio) = &self.gonio {
            source.component_mut().set_gonio(Some(gonio.build()?));
        }
        Ok(source)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DiffractometerConfig {
    pub name: String,
    pub detector: DetectorConfig,
    pub sample: SampleConfig,
    pub source: SourceConfig,
}

impl DiffractometerConfig {
    pub fn build(&self) -> Result<Diffractometer> {
        let detector = self.detector.build().context("detector")?;
        let sample = self.sample.build().context("sample")?;
        let source = self.source.build().context("source")?;
        Ok(Diffractometer::new(
            self.name.as_str(),
            detector,
            sample,
            source,
        )?)
    }
}
