//! Crystal lattice description and Niggli-form constraints.

mod niggli;
mod unit_cell;

pub use niggli::NiggliConstraint;
pub use unit_cell::{UnitCell, UnitCellCharacter};
