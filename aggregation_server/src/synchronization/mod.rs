mod barrier;
mod gate;

pub use barrier::{Arrival, RoundBarrier};
pub use gate::{AckOutcome, GateErr, ReleaseGate};
