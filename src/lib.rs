//! # BMS Pack Simulator
//!
//! Software-in-the-loop stand-in for a 16S LiFePO4 battery pack and its
//! measurement front end, used to exercise battery-management firmware
//! without physical cells.
//!
//! The pipeline per simulation tick:
//!
//! ```text
//! current profile -> pack model -> AFE front end -> measurement frame
//! ```
//!
//! - [`simulation`] holds the physical truth: the per-cell equivalent
//!   circuit model, the 16-cell series pack with thermal coupling, and the
//!   current profiles.
//! - [`afe`] emulates the measurement path: calibration error, noise,
//!   quantization and scheduled fault injection.
//! - [`runner`] owns the tick loop and hands frames to consumers through a
//!   bounded, rate-limited queue.
//!
//! Wire encoding, transport and scenario file handling live outside this
//! crate; it produces frames in SI units and stops there.

pub mod afe;
pub mod config;
pub mod runner;
pub mod simulation;
pub mod telemetry;

pub use afe::{AfeFrontEnd, FaultSchedule, MeasurementFrame};
pub use config::Config;
pub use runner::{FrameSink, RunSummary, Simulation};
pub use simulation::{CurrentProfile, PackSimulator};
