//! # Measurement Front End
//!
//! Emulation of the AFE measurement path: calibration error, Gaussian
//! noise, ADC quantization and scheduled fault injection, turning true pack
//! state into [`MeasurementFrame`]s for downstream encoders.

pub mod faults;
pub mod frame;
pub mod frontend;

pub use faults::{Channel, FaultKind, FaultSchedule, FaultWindow};
pub use frame::{
    MeasurementFrame, FLAG_CURRENT_SENSOR, FLAG_NTC_CELL_SENSOR, FLAG_NTC_PCB_SENSOR,
};
pub use frontend::{
    AdcConfig, AfeConfig, AfeFrontEnd, CalibrationConfig, NoiseConfig, NTC_FAULT_SENTINEL_C,
    OPEN_WIRE_VALUE,
};
