//! # Measurement Frame
//!
//! One snapshot of every observable channel after calibration error, noise,
//! quantization and fault overlay. Values are SI quantities; scaling to wire
//! units and framing with a checksum is the transport encoder's job, not
//! ours.

use serde::{Deserialize, Serialize};

use crate::simulation::NUM_CELLS;

// Status-flag bit layout, mirroring what the AFE silicon reports.
pub const FLAG_NTC_CELL_SENSOR: u32 = 1 << 16;
pub const FLAG_NTC_PCB_SENSOR: u32 = 1 << 17;
pub const FLAG_CURRENT_SENSOR: u32 = 1 << 30;

/// Snapshot of all observable channels at one sampling tick. Produced fresh
/// each tick and handed to the frame consumer exactly once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeasurementFrame {
    pub sim_time_s: f64,
    pub pack_current_a: f64,
    pub pack_voltage_v: f64,
    pub temp_cell_c: f64,
    pub temp_pcb_c: f64,
    pub cell_voltages_v: [f64; NUM_CELLS],
    /// Fault bits: 0-15 open wire per cell, 16 cell NTC, 17 PCB NTC,
    /// 30 current sensor.
    pub status_flags: u32,
}

impl MeasurementFrame {
    pub fn has_faults(&self) -> bool {
        self.status_flags != 0
    }

    pub fn open_wire_on_cell(&self, index: usize) -> bool {
        index < NUM_CELLS && self.status_flags & (1 << index) != 0
    }

    /// Indices of cells flagged as open-wire.
    pub fn open_wire_cells(&self) -> impl Iterator<Item = usize> + '_ {
        (0..NUM_CELLS).filter(|i| self.status_flags & (1 << i) != 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blank_frame() -> MeasurementFrame {
        MeasurementFrame {
            sim_time_s: 0.0,
            pack_current_a: 0.0,
            pack_voltage_v: 52.8,
            temp_cell_c: 25.0,
            temp_pcb_c: 30.0,
            cell_voltages_v: [3.3; NUM_CELLS],
            status_flags: 0,
        }
    }

    #[test]
    fn test_flag_helpers() {
        let mut frame = blank_frame();
        assert!(!frame.has_faults());
        assert_eq!(frame.open_wire_cells().count(), 0);

        frame.status_flags = (1 << 2) | (1 << 9) | FLAG_CURRENT_SENSOR;
        assert!(frame.has_faults());
        assert!(frame.open_wire_on_cell(2));
        assert!(frame.open_wire_on_cell(9));
        assert!(!frame.open_wire_on_cell(3));
        assert_eq!(frame.open_wire_cells().collect::<Vec<_>>(), vec![2, 9]);
    }

    #[test]
    fn test_serializes_round_trip() {
        let frame = blank_frame();
        let json = serde_json::to_string(&frame).unwrap();
        let back: MeasurementFrame = serde_json::from_str(&json).unwrap();
        assert_eq!(frame, back);
    }
}
