//! # Configuration
//!
//! Layered configuration: `config/default.toml` first, then `BMS__`-prefixed
//! environment variables (`BMS__RUNNER__DT_S=0.1` overrides
//! `[runner] dt_s`). Everything is validated before the simulation is
//! allowed to start; stepping never sees a malformed value.

use anyhow::Result;
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::afe::{AfeConfig, FaultSchedule, FaultWindow};
use crate::simulation::{
    ConstantProfile, CurrentProfile, PackConfig, PulseProfile, Segment, SegmentedProfile,
};

/// Construction-time failures. Any of these prevents simulation start.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cell capacity must be positive, got {0} Ah")]
    InvalidCapacity(f64),
    #[error("initial SOC must be within 0..=1, got {0}")]
    InvalidInitialSoc(f64),
    #[error("variation sigma must be non-negative and below 1, got {0}")]
    InvalidSigma(f64),
    #[error("safety current limit must be positive, got {0} A")]
    InvalidCurrentLimit(f64),
    #[error("pulse period must be positive, got {0} s")]
    InvalidPeriod(f64),
    #[error("pulse duty cycle must be within 0..=1, got {0}")]
    InvalidDutyCycle(f64),
    #[error("segment {index} is malformed (start {start_s} s, end {end_s} s)")]
    MalformedSegment {
        index: usize,
        start_s: f64,
        end_s: f64,
    },
    #[error("segments {first} and {second} overlap at {at_s} s")]
    OverlappingSegments {
        first: usize,
        second: usize,
        at_s: f64,
    },
    #[error("scenario document rejected: {0}")]
    Scenario(String),
    #[error("fault window is malformed (start {start_s} s, end {end_s} s)")]
    MalformedFaultWindow { start_s: f64, end_s: f64 },
    #[error("fault cell index {0} out of range (pack has 16 cells)")]
    FaultCellIndex(usize),
    #[error("fault kind {kind} cannot target channel {channel}")]
    IncompatibleFault { kind: String, channel: String },
    #[error("noise sigma must be non-negative, got {0}")]
    InvalidNoiseSigma(f64),
    #[error("ADC bit depth must be within 1..=24, got {0}")]
    InvalidBitDepth(u32),
    #[error("ADC full-scale range is empty ({min}..{max})")]
    InvalidAdcRange { min: f64, max: f64 },
    #[error("tick interval must be positive, got {0} s")]
    InvalidTickInterval(f64),
    #[error("simulation duration must be non-negative, got {0} s")]
    InvalidDuration(f64),
    #[error("frame rate must be positive, got {0} Hz")]
    InvalidFrameRate(f64),
    #[error("frame queue capacity must be positive")]
    InvalidQueueCapacity,
}

/// Tick loop and frame hand-off settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    /// Simulation timestep (s).
    pub dt_s: f64,
    /// Total simulated duration (s).
    pub duration_s: f64,
    /// Producer-side frame rate limit (frames/s of simulated time).
    pub frame_rate_hz: f64,
    /// Bounded frame queue depth; lagging consumers lose the oldest frames.
    pub queue_capacity: usize,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            dt_s: 1.0,
            duration_s: 3600.0,
            frame_rate_hz: 1.0,
            queue_capacity: 64,
        }
    }
}

impl RunnerConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.dt_s > 0.0) {
            return Err(ConfigError::InvalidTickInterval(self.dt_s));
        }
        if !(self.duration_s >= 0.0) {
            return Err(ConfigError::InvalidDuration(self.duration_s));
        }
        if !(self.frame_rate_hz > 0.0) {
            return Err(ConfigError::InvalidFrameRate(self.frame_rate_hz));
        }
        if self.queue_capacity == 0 {
            return Err(ConfigError::InvalidQueueCapacity);
        }
        Ok(())
    }
}

/// Which current profile drives the run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProfileConfig {
    Constant {
        current_a: f64,
    },
    Pulse {
        high_a: f64,
        low_a: f64,
        period_s: f64,
        duty_cycle: f64,
        #[serde(default)]
        phase_s: f64,
    },
    Segments {
        segments: Vec<Segment>,
    },
}

impl Default for ProfileConfig {
    fn default() -> Self {
        ProfileConfig::Constant { current_a: 0.0 }
    }
}

impl ProfileConfig {
    /// Build the profile, validating as we go.
    pub fn build(&self) -> Result<Box<dyn CurrentProfile>, ConfigError> {
        match self {
            ProfileConfig::Constant { current_a } => {
                Ok(Box::new(ConstantProfile::new(*current_a)))
            }
            ProfileConfig::Pulse {
                high_a,
                low_a,
                period_s,
                duty_cycle,
                phase_s,
            } => Ok(Box::new(
                PulseProfile::new(*high_a, *low_a, *period_s, *duty_cycle)?.with_phase(*phase_s),
            )),
            ProfileConfig::Segments { segments } => {
                Ok(Box::new(SegmentedProfile::new(segments.clone())?))
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Master seed; pack variation and AFE randomness derive from it.
    pub seed: u64,
    pub pack: PackConfig,
    pub afe: AfeConfig,
    pub runner: RunnerConfig,
    pub profile: ProfileConfig,
    pub faults: Vec<FaultWindow>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            seed: 42,
            pack: PackConfig::default(),
            afe: AfeConfig::default(),
            runner: RunnerConfig::default(),
            profile: ProfileConfig::default(),
            faults: Vec::new(),
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let figment = Figment::new()
            .merge(Toml::file("config/default.toml"))
            .merge(Env::prefixed("BMS__").split("__"));
        Ok(figment.extract()?)
    }

    /// Parse from an inline TOML document; scenario runners and tests feed
    /// configs this way.
    pub fn from_toml_str(doc: &str) -> Result<Self> {
        Ok(Figment::new().merge(Toml::string(doc)).extract()?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.pack.validate()?;
        self.afe.validate()?;
        self.runner.validate()?;
        // Building the profile and schedule exercises their validation; the
        // results are discarded here and rebuilt by the runner.
        self.profile.build()?;
        FaultSchedule::new(self.faults.clone())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        config.validate().unwrap();
        assert_relative_eq!(config.pack.cell_capacity_ah, 100.0);
        assert_relative_eq!(config.runner.dt_s, 1.0);
    }

    #[test]
    fn test_partial_toml_overrides_defaults() {
        let config = Config::from_toml_str(
            r#"
seed = 7

[pack]
cell_capacity_ah = 80.0
initial_soc = 0.3

[runner]
dt_s = 0.1

[profile]
kind = "pulse"
high_a = 40.0
low_a = -5.0
period_s = 60.0
duty_cycle = 0.5
"#,
        )
        .unwrap();
        config.validate().unwrap();

        assert_eq!(config.seed, 7);
        assert_relative_eq!(config.pack.cell_capacity_ah, 80.0);
        assert_relative_eq!(config.pack.ambient_temp_c, 25.0); // untouched default
        assert_relative_eq!(config.runner.dt_s, 0.1);
        assert!(matches!(config.profile, ProfileConfig::Pulse { .. }));
    }

    #[test]
    fn test_fault_entries_from_toml() {
        let config = Config::from_toml_str(
            r#"
[[faults]]
start_s = 10.0
end_s = 20.0
kind = "open_wire"
[faults.channel]
cell_voltage = 6
"#,
        )
        .unwrap();
        assert_eq!(config.faults.len(), 1);
        config.validate().unwrap();
    }

    #[test]
    fn test_invalid_values_fail_validation() {
        let mut config = Config::default();
        config.pack.cell_capacity_ah = -1.0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidCapacity(_))
        ));

        let mut config = Config::default();
        config.runner.dt_s = 0.0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidTickInterval(_))
        ));

        let mut config = Config::default();
        config.profile = ProfileConfig::Pulse {
            high_a: 1.0,
            low_a: 0.0,
            period_s: 10.0,
            duty_cycle: 2.0,
            phase_s: 0.0,
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidDutyCycle(_))
        ));
    }
}
