//! Per-frame instrument states and continuous interpolation between them.

mod instrument_state;
mod interpolated;
mod list;

pub use instrument_state::InstrumentState;
pub use interpolated::InterpolatedState;
pub use list::InstrumentStateList;
