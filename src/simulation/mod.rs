//! # Plant Simulation
//!
//! The electro-thermal truth side of the simulator:
//!
//! - **cell**: single-cell equivalent-circuit model with hysteresis,
//!   temperature dependence and aging
//! - **pack**: 16 series cells with manufacturing variation and neighbour
//!   thermal coupling
//! - **profile**: current-vs-time command sources
//! - **ocv**: OCV-SOC lookup tables
//!
//! Everything here is deterministic given the seeded generator handed to
//! pack construction; the measurement layer in [`crate::afe`] is the only
//! other consumer of randomness.

pub mod cell;
pub mod ocv;
pub mod pack;
pub mod profile;

pub use cell::{CellModel, CellOverride, CellParameters, CellState, Direction, StepError};
pub use ocv::{open_circuit_voltage, OcvCurve};
pub use pack::{ImbalanceStats, PackConfig, PackSimulator, NUM_CELLS};
pub use profile::{
    ConstantProfile, CurrentProfile, DynamicProfile, PulseProfile, Segment, SegmentedProfile,
};
