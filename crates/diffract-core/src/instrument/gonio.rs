//! Goniometers: ordered chains of axes composed into one rigid-body transform.
//!
//! Axes are stored outer-to-inner. For a chain `a, b, c` the axis `b` rides on
//! the `a` shaft and `c` on the `b` shaft, so a point `v` attached to the
//! moving component ends up at `T_a · T_b · T_c · v`.

use serde::{Deserialize, Serialize};

use crate::{inverse_affine, transform_point, Axis, GeometryError, Mat4, Real, RotationSense, Vec3};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Gonio {
    label: String,
    axes: Vec<Axis>,
}

impl Gonio {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            axes: Vec::new(),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Append an axis as the new innermost stage of the chain.
    pub fn add_axis(&mut self, axis: Axis) -> &mut Axis {
        self.axes.push(axis);
        let last = self.axes.len() - 1;
        &mut self.axes[last]
    }

    pub fn add_rotation(
        &mut self,
        label: impl Into<String>,
        direction: Vec3,
        sense: RotationSense,
    ) -> Result<&mut Axis, GeometryError> {
        let axis = Axis::rotation(label, direction, sense)?;
        Ok(self.add_axis(axis))
    }

    pub fn add_translation(
        &mut self,
        label: impl Into<String>,
        direction: Vec3,
    ) -> Result<&mut Axis, GeometryError> {
        let axis = Axis::translation(label, direction)?;
        Ok(self.add_axis(axis))
    }

    pub fn axes(&self) -> &[Axis] {
        &self.axes
    }

    pub fn axis(&self, index: usize) -> Result<&Axis, GeometryError> {
        self.axes.get(index).ok_or_else(|| self.unknown(index))
    }

    pub fn axis_mut(&mut self, index: usize) -> Result<&mut Axis, GeometryError> {
        let err = self.unknown(index);
        self.axes.get_mut(index).ok_or(err)
    }

    pub fn axis_by_label(&self, label: &str) -> Result<&Axis, GeometryError> {
        self.axes
            .iter()
            .find(|a| a.label() == label)
            .ok_or_else(|| self.unknown(label))
    }

    pub fn axis_by_id(&self, id: u32) -> Result<&Axis, GeometryError> {
        self.axes
            .iter()
            .find(|a| a.id() == id)
            .ok_or_else(|| self.unknown(format!("id {id}")))
    }

    pub fn has_axis(&self, label: &str) -> bool {
        self.axes.iter().any(|a| a.label() == label)
    }

    pub fn has_physical_axis(&self, label: &str) -> bool {
        self.axes
            .iter()
            .any(|a| a.label() == label && a.is_physical())
    }

    pub fn n_axes(&self) -> usize {
        self.axes.len()
    }

    pub fn n_physical_axes(&self) -> usize {
        self.physical_axes().count()
    }

    pub fn physical_axes(&self) -> impl Iterator<Item = &Axis> {
        self.axes.iter().filter(|a| a.is_physical())
    }

    pub fn physical_axis_names(&self) -> Vec<String> {
        self.physical_axes().map(|a| a.label().to_string()).collect()
    }

    pub fn physical_axis_ids(&self) -> Vec<u32> {
        self.physical_axes().map(Axis::id).collect()
    }

    /// Offsets of the physical axes in declaration order.
    pub fn physical_offsets(&self) -> Vec<Real> {
        self.physical_axes().map(Axis::offset).collect()
    }

    /// Set the offset of the `index`-th physical axis.
    pub fn set_physical_offset(&mut self, index: usize, offset: Real) -> Result<(), GeometryError> {
        let err = self.unknown(format!("physical #{index}"));
        let axis = self
            .axes
            .iter_mut()
            .filter(|a| a.is_physical())
            .nth(index)
            .ok_or(err)?;
        axis.set_offset(offset);
        Ok(())
    }

    pub fn reset_offsets(&mut self) {
        for axis in &mut self.axes {
            axis.set_offset(0.0);
        }
    }

    /// Composed transform for one value per physical axis.
    ///
    /// Iterates from the innermost axis outwards and left-multiplies, so the
    /// result is `T_outer · … · T_inner`. Non-physical axes contribute `T(0)`.
    pub fn affine_matrix(&self, values: &[Real]) -> Result<Mat4, GeometryError> {
        let expected = self.n_physical_axes();
        if values.len() != expected {
            return Err(GeometryError::ValueCount {
                gonio: self.label.clone(),
                expected,
                got: values.len(),
            });
        }

        let mut result = Mat4::identity();
        let mut value_iter = values.iter().rev();
        for axis in self.axes.iter().rev() {
            let value = if axis.is_physical() {
                // counts match, so the iterator cannot run dry here
                value_iter.next().copied().unwrap_or(0.0)
            } else {
                0.0
            };
            result = axis.affine_matrix(value) * result;
        }
        Ok(result)
    }

    pub fn inverse_affine_matrix(&self, values: &[Real]) -> Result<Mat4, GeometryError> {
        Ok(inverse_affine(&self.affine_matrix(values)?))
    }

    pub fn transform(&self, point: &Vec3, values: &[Real]) -> Result<Vec3, GeometryError> {
        Ok(transform_point(&self.affine_matrix(values)?, point))
    }

    pub fn transform_inverse(&self, point: &Vec3, values: &[Real]) -> Result<Vec3, GeometryError> {
        Ok(transform_point(&self.inverse_affine_matrix(values)?, point))
    }

    fn unknown(&self, key: impl ToString) -> GeometryError {
        GeometryError::UnknownAxis {
            gonio: self.label.clone(),
            key: key.to_string(),
        }
    }
}
