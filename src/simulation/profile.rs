//! # Current Profiles
//!
//! A profile maps elapsed simulated time to the pack current command. Every
//! implementation is a pure function of `t`, so re-querying the same instant
//! is idempotent and a run can be restarted from any tick boundary.
//!
//! Sign convention: positive current charges the pack.

use serde::{Deserialize, Serialize};

use crate::config::ConfigError;

/// Current command as a function of elapsed time (s → A).
pub trait CurrentProfile: Send + Sync {
    fn current_at(&self, t_s: f64) -> f64;
}

/// Fixed current, optionally limited to a duration (0 A afterwards).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConstantProfile {
    pub current_a: f64,
    pub duration_s: Option<f64>,
}

impl ConstantProfile {
    pub fn new(current_a: f64) -> Self {
        Self {
            current_a,
            duration_s: None,
        }
    }

    pub fn with_duration(current_a: f64, duration_s: f64) -> Self {
        Self {
            current_a,
            duration_s: Some(duration_s),
        }
    }
}

impl CurrentProfile for ConstantProfile {
    fn current_at(&self, t_s: f64) -> f64 {
        match self.duration_s {
            Some(d) if t_s > d => 0.0,
            _ => self.current_a,
        }
    }
}

/// Square wave between two amplitudes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PulseProfile {
    pub high_a: f64,
    pub low_a: f64,
    pub period_s: f64,
    pub duty_cycle: f64,
    pub phase_s: f64,
    pub duration_s: Option<f64>,
}

impl PulseProfile {
    pub fn new(
        high_a: f64,
        low_a: f64,
        period_s: f64,
        duty_cycle: f64,
    ) -> Result<Self, ConfigError> {
        if !(period_s > 0.0) {
            return Err(ConfigError::InvalidPeriod(period_s));
        }
        if !(0.0..=1.0).contains(&duty_cycle) {
            return Err(ConfigError::InvalidDutyCycle(duty_cycle));
        }
        Ok(Self {
            high_a,
            low_a,
            period_s,
            duty_cycle,
            phase_s: 0.0,
            duration_s: None,
        })
    }

    pub fn with_phase(mut self, phase_s: f64) -> Self {
        self.phase_s = phase_s;
        self
    }
}

impl CurrentProfile for PulseProfile {
    fn current_at(&self, t_s: f64) -> f64 {
        if let Some(d) = self.duration_s {
            if t_s > d {
                return 0.0;
            }
        }
        let in_period = (t_s + self.phase_s).rem_euclid(self.period_s);
        if in_period < self.period_s * self.duty_cycle {
            self.high_a
        } else {
            self.low_a
        }
    }
}

/// One scenario segment: a half-open time range `[start_s, end_s)` with a
/// constant current.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    pub start_s: f64,
    pub end_s: f64,
    pub current_a: f64,
}

/// Piecewise-constant profile from an externally supplied segment list.
/// Malformed or overlapping segments are rejected at construction; stepping
/// never sees them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SegmentedProfile {
    segments: Vec<Segment>,
}

impl SegmentedProfile {
    pub fn new(mut segments: Vec<Segment>) -> Result<Self, ConfigError> {
        segments.sort_by(|a, b| a.start_s.total_cmp(&b.start_s));

        for (index, seg) in segments.iter().enumerate() {
            let well_formed = seg.start_s.is_finite()
                && seg.end_s.is_finite()
                && seg.current_a.is_finite()
                && seg.start_s >= 0.0
                && seg.end_s > seg.start_s;
            if !well_formed {
                return Err(ConfigError::MalformedSegment {
                    index,
                    start_s: seg.start_s,
                    end_s: seg.end_s,
                });
            }
        }
        for (index, pair) in segments.windows(2).enumerate() {
            if pair[0].end_s > pair[1].start_s {
                return Err(ConfigError::OverlappingSegments {
                    first: index,
                    second: index + 1,
                    at_s: pair[1].start_s,
                });
            }
        }

        Ok(Self { segments })
    }

    /// Parse a YAML document of the form `segments: [{start_s, end_s,
    /// current_a}, ...]`.
    pub fn from_yaml(doc: &str) -> Result<Self, ConfigError> {
        #[derive(Deserialize)]
        struct Doc {
            segments: Vec<Segment>,
        }
        let doc: Doc =
            serde_yaml::from_str(doc).map_err(|e| ConfigError::Scenario(e.to_string()))?;
        Self::new(doc.segments)
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }
}

impl CurrentProfile for SegmentedProfile {
    fn current_at(&self, t_s: f64) -> f64 {
        // Last segment starting at or before t; gaps and times past the end
        // fall through to 0 A.
        let idx = self.segments.partition_point(|s| s.start_s <= t_s);
        if idx == 0 {
            return 0.0;
        }
        let seg = &self.segments[idx - 1];
        if t_s < seg.end_s {
            seg.current_a
        } else {
            0.0
        }
    }
}

/// Wraps an externally supplied function for scenarios that cannot be
/// expressed as flat segments.
pub struct DynamicProfile {
    f: Box<dyn Fn(f64) -> f64 + Send + Sync>,
}

impl DynamicProfile {
    pub fn new(f: impl Fn(f64) -> f64 + Send + Sync + 'static) -> Self {
        Self { f: Box::new(f) }
    }
}

impl CurrentProfile for DynamicProfile {
    fn current_at(&self, t_s: f64) -> f64 {
        (self.f)(t_s)
    }
}
