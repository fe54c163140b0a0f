//! # Fault Schedule
//!
//! Scheduled measurement faults as data: a read-only list of (time window,
//! channel, kind) entries the front end consults once per channel per tick.
//! Keeping the fault logic here keeps the sampling pipeline free of
//! fault-specific branching.
//!
//! Faults are intentional and never errors: a matched entry overlays the
//! affected channel with a fault-specific value and the frame stays
//! well-formed.

use serde::{Deserialize, Serialize};

use crate::config::ConfigError;
use crate::simulation::NUM_CELLS;

/// An observable channel of the front end.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    PackCurrent,
    PackVoltage,
    CellTemp,
    PcbTemp,
    /// Per-cell voltage tap, 0-based index.
    CellVoltage(usize),
}

impl Channel {
    pub fn is_temperature(&self) -> bool {
        matches!(self, Channel::CellTemp | Channel::PcbTemp)
    }
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Channel::PackCurrent => write!(f, "pack_current"),
            Channel::PackVoltage => write!(f, "pack_voltage"),
            Channel::CellTemp => write!(f, "cell_temp"),
            Channel::PcbTemp => write!(f, "pcb_temp"),
            Channel::CellVoltage(i) => write!(f, "cell_voltage[{i}]"),
        }
    }
}

/// What a matched fault does to its channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultKind {
    /// Broken sense wire: the channel reads a fixed extreme value (0).
    OpenWire,
    /// Converter stuck: the channel holds the last successfully sampled
    /// value.
    StuckAdc,
    /// Broken or shorted NTC: the channel reads an out-of-range sentinel.
    NtcFault,
}

impl std::fmt::Display for FaultKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FaultKind::OpenWire => write!(f, "open_wire"),
            FaultKind::StuckAdc => write!(f, "stuck_adc"),
            FaultKind::NtcFault => write!(f, "ntc_fault"),
        }
    }
}

/// One scheduled fault: active over the closed window `[start_s, end_s]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FaultWindow {
    pub start_s: f64,
    pub end_s: f64,
    pub channel: Channel,
    pub kind: FaultKind,
}

impl FaultWindow {
    pub fn is_active_at(&self, t_s: f64) -> bool {
        (self.start_s..=self.end_s).contains(&t_s)
    }
}

/// Validated, read-only fault schedule.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FaultSchedule {
    entries: Vec<FaultWindow>,
}

impl FaultSchedule {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn new(mut entries: Vec<FaultWindow>) -> Result<Self, ConfigError> {
        entries.sort_by(|a, b| a.start_s.total_cmp(&b.start_s));
        for entry in &entries {
            let well_formed = entry.start_s.is_finite()
                && entry.end_s.is_finite()
                && entry.start_s >= 0.0
                && entry.end_s >= entry.start_s;
            if !well_formed {
                return Err(ConfigError::MalformedFaultWindow {
                    start_s: entry.start_s,
                    end_s: entry.end_s,
                });
            }
            if let Channel::CellVoltage(index) = entry.channel {
                if index >= NUM_CELLS {
                    return Err(ConfigError::FaultCellIndex(index));
                }
            }
            // An NTC can only fail on a temperature channel, and a wire can
            // only break on an electrical one.
            let compatible = match entry.kind {
                FaultKind::NtcFault => entry.channel.is_temperature(),
                FaultKind::OpenWire => !entry.channel.is_temperature(),
                FaultKind::StuckAdc => true,
            };
            if !compatible {
                return Err(ConfigError::IncompatibleFault {
                    kind: entry.kind.to_string(),
                    channel: entry.channel.to_string(),
                });
            }
        }
        Ok(Self { entries })
    }

    pub fn entries(&self) -> &[FaultWindow] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// First entry active on `channel` at `t_s`, if any. Entries are sorted
    /// by start time, so earlier-starting faults win overlaps.
    pub fn active_fault(&self, channel: Channel, t_s: f64) -> Option<FaultKind> {
        self.entries
            .iter()
            .find(|e| e.channel == channel && e.is_active_at(t_s))
            .map(|e| e.kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn window(start: f64, end: f64, channel: Channel, kind: FaultKind) -> FaultWindow {
        FaultWindow {
            start_s: start,
            end_s: end,
            channel,
            kind,
        }
    }

    #[test]
    fn test_schedule_lookup_by_time_and_channel() {
        let schedule = FaultSchedule::new(vec![
            window(10.0, 20.0, Channel::CellVoltage(6), FaultKind::OpenWire),
            window(30.0, 40.0, Channel::CellTemp, FaultKind::NtcFault),
        ])
        .unwrap();

        assert_eq!(
            schedule.active_fault(Channel::CellVoltage(6), 10.0),
            Some(FaultKind::OpenWire)
        );
        assert_eq!(
            schedule.active_fault(Channel::CellVoltage(6), 20.0),
            Some(FaultKind::OpenWire)
        );
        assert_eq!(schedule.active_fault(Channel::CellVoltage(6), 20.1), None);
        assert_eq!(schedule.active_fault(Channel::CellVoltage(5), 15.0), None);
        assert_eq!(
            schedule.active_fault(Channel::CellTemp, 35.0),
            Some(FaultKind::NtcFault)
        );
        assert_eq!(schedule.active_fault(Channel::CellTemp, 15.0), None);
    }

    #[test]
    fn test_earlier_entry_wins_overlap() {
        let schedule = FaultSchedule::new(vec![
            window(5.0, 50.0, Channel::PackVoltage, FaultKind::StuckAdc),
            window(0.0, 100.0, Channel::PackVoltage, FaultKind::OpenWire),
        ])
        .unwrap();
        assert_eq!(
            schedule.active_fault(Channel::PackVoltage, 10.0),
            Some(FaultKind::OpenWire)
        );
    }

    #[rstest]
    #[case(20.0, 10.0)] // end before start
    #[case(-1.0, 10.0)] // negative start
    #[case(0.0, f64::INFINITY)] // non-finite end
    fn test_rejects_malformed_window(#[case] start: f64, #[case] end: f64) {
        let result = FaultSchedule::new(vec![window(
            start,
            end,
            Channel::PackCurrent,
            FaultKind::OpenWire,
        )]);
        assert!(matches!(
            result,
            Err(ConfigError::MalformedFaultWindow { .. })
        ));
    }

    #[test]
    fn test_rejects_incompatible_kind_and_cell_index() {
        let result = FaultSchedule::new(vec![window(
            0.0,
            1.0,
            Channel::PackVoltage,
            FaultKind::NtcFault,
        )]);
        assert!(matches!(result, Err(ConfigError::IncompatibleFault { .. })));

        let result = FaultSchedule::new(vec![window(
            0.0,
            1.0,
            Channel::CellVoltage(16),
            FaultKind::OpenWire,
        )]);
        assert!(matches!(result, Err(ConfigError::FaultCellIndex(16))));

        let result = FaultSchedule::new(vec![window(
            0.0,
            1.0,
            Channel::CellTemp,
            FaultKind::OpenWire,
        )]);
        assert!(matches!(result, Err(ConfigError::IncompatibleFault { .. })));
    }

    #[test]
    fn test_yaml_entries_deserialize() {
        let doc = r#"
- { start_s: 10.0, end_s: 20.0, channel: { cell_voltage: 6 }, kind: open_wire }
- { start_s: 0.0, end_s: 5.0, channel: cell_temp, kind: ntc_fault }
"#;
        let entries: Vec<FaultWindow> = serde_yaml::from_str(doc).unwrap();
        let schedule = FaultSchedule::new(entries).unwrap();
        assert_eq!(schedule.entries().len(), 2);
        assert_eq!(
            schedule.active_fault(Channel::CellVoltage(6), 15.0),
            Some(FaultKind::OpenWire)
        );
    }
}
