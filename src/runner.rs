//! # Simulation Runner
//!
//! The synchronous tick loop wiring the pieces together:
//!
//! ```text
//! current = profile.current_at(t)
//! pack.step(current, dt)
//! frame = frontend.sample(&pack, t)
//! sink.publish(frame)
//! ```
//!
//! Frames leave through a bounded broadcast queue. Publishing never blocks:
//! a consumer that falls behind loses the oldest frames and is told how many
//! it missed. The producer additionally rate-limits by simulated time, so a
//! 10 ms physics tick can still feed a 1 Hz telemetry link.

use rand::rngs::StdRng;
use rand::SeedableRng;
use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::afe::{AfeFrontEnd, FaultSchedule, MeasurementFrame};
use crate::config::{Config, ConfigError};
use crate::simulation::{CurrentProfile, PackSimulator, StepError};

/// Bounded, rate-limited, drop-oldest frame queue between the physics loop
/// and its consumers.
pub struct FrameSink {
    tx: broadcast::Sender<MeasurementFrame>,
    min_interval_s: f64,
    last_published_s: Option<f64>,
    published: u64,
    rate_limited: u64,
}

impl FrameSink {
    pub fn new(queue_capacity: usize, frame_rate_hz: f64) -> Self {
        let (tx, _) = broadcast::channel(queue_capacity.max(1));
        Self {
            tx,
            min_interval_s: 1.0 / frame_rate_hz,
            last_published_s: None,
            published: 0,
            rate_limited: 0,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<MeasurementFrame> {
        self.tx.subscribe()
    }

    /// Offer a frame. Returns whether it was actually put on the queue;
    /// frames arriving faster than the rate limit are skipped. A send with
    /// no consumers is fine, delivery is fire-and-forget.
    pub fn publish(&mut self, frame: &MeasurementFrame) -> bool {
        if let Some(last) = self.last_published_s {
            // Small slack so dt sequences that sum to the interval with
            // rounding error still publish.
            if frame.sim_time_s - last < self.min_interval_s - 1e-9 {
                self.rate_limited += 1;
                return false;
            }
        }
        self.last_published_s = Some(frame.sim_time_s);
        self.published += 1;
        let _ = self.tx.send(frame.clone());
        true
    }

    pub fn published(&self) -> u64 {
        self.published
    }

    pub fn rate_limited(&self) -> u64 {
        self.rate_limited
    }
}

/// Aggregate figures reported at the end of a run.
#[derive(Debug, Clone, Copy)]
pub struct RunSummary {
    pub ticks: u64,
    pub frames_published: u64,
    pub pack_soc_mean: f64,
    pub pack_soc_min: f64,
    pub pack_voltage_v: f64,
    pub soc_clamp_events: u32,
}

/// Complete simulation pipeline: profile, pack, front end and frame sink.
pub struct Simulation {
    pack: PackSimulator,
    frontend: AfeFrontEnd,
    profile: Box<dyn CurrentProfile>,
    sink: FrameSink,
    dt_s: f64,
    time_s: f64,
    ticks: u64,
}

impl Simulation {
    /// Build the whole pipeline from a validated config. The master seed
    /// fans out exactly as `seed` for pack variation and `seed + 1` for the
    /// front end, so a run is reproducible from the one number.
    pub fn build(config: &Config) -> Result<Self, ConfigError> {
        config.validate()?;

        let mut pack_rng = StdRng::seed_from_u64(config.seed);
        let pack = PackSimulator::new(config.pack.clone(), &mut pack_rng)?;

        let schedule = FaultSchedule::new(config.faults.clone())?;
        let afe_rng = StdRng::seed_from_u64(config.seed.wrapping_add(1));
        let frontend = AfeFrontEnd::new(config.afe, schedule, afe_rng)?;

        let profile = config.profile.build()?;
        let sink = FrameSink::new(config.runner.queue_capacity, config.runner.frame_rate_hz);

        Ok(Self {
            pack,
            frontend,
            profile,
            sink,
            dt_s: config.runner.dt_s,
            time_s: 0.0,
            ticks: 0,
        })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<MeasurementFrame> {
        self.sink.subscribe()
    }

    pub fn pack(&self) -> &PackSimulator {
        &self.pack
    }

    pub fn time_s(&self) -> f64 {
        self.time_s
    }

    /// One synchronous tick. Errors leave the pack untouched; the caller
    /// decides whether to abort or adjust and retry.
    pub fn tick(&mut self) -> Result<MeasurementFrame, StepError> {
        let current_a = self.profile.current_at(self.time_s);
        self.pack.step(current_a, self.dt_s)?;
        let frame = self.frontend.sample(&self.pack, self.time_s);
        self.sink.publish(&frame);
        self.time_s += self.dt_s;
        self.ticks += 1;
        Ok(frame)
    }

    /// Tick until `duration_s` of simulated time has elapsed.
    pub fn run(&mut self, duration_s: f64) -> Result<RunSummary, StepError> {
        let total_ticks = (duration_s / self.dt_s).ceil() as u64;
        let progress_stride = (total_ticks / 10).max(1);

        info!(total_ticks, dt_s = self.dt_s, "starting simulation run");
        for n in 0..total_ticks {
            self.tick()?;
            if n % progress_stride == 0 {
                debug!(
                    tick = n,
                    sim_time_s = self.time_s,
                    soc_mean = self.pack.pack_soc_mean(),
                    pack_voltage_v = self.pack.pack_voltage_v(),
                    "progress"
                );
            }
        }

        let summary = self.summary();
        info!(
            ticks = summary.ticks,
            frames = summary.frames_published,
            soc_mean = summary.pack_soc_mean,
            "run complete"
        );
        Ok(summary)
    }

    pub fn summary(&self) -> RunSummary {
        RunSummary {
            ticks: self.ticks,
            frames_published: self.sink.published(),
            pack_soc_mean: self.pack.pack_soc_mean(),
            pack_soc_min: self.pack.pack_soc_min(),
            pack_voltage_v: self.pack.pack_voltage_v(),
            soc_clamp_events: self.pack.soc_clamp_events(),
        }
    }
}
