//! # LiFePO4 Cell Equivalent Circuit Model
//!
//! Single-cell electro-thermal model:
//!
//! - OCV(SOC, T, direction) with charge/discharge hysteresis
//! - series resistance R0 as a function of SOC, temperature and aging
//! - 2RC network (fast R1-C1, slow R2-C2) for transient response,
//!   discretized exactly: `v' = v*exp(-dt/tau) + I*R*(1 - exp(-dt/tau))`
//! - lumped thermal mass with Joule self-heating and convective loss
//! - cycle aging (Ah throughput) and calendar aging (Arrhenius)
//!
//! Sign convention throughout: positive current charges the cell.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::ocv::{open_circuit_voltage, OcvCurve};

/// Stepping errors. Construction problems are [`crate::config::ConfigError`].
#[derive(Debug, Error)]
pub enum StepError {
    #[error("timestep must be positive, got {0} s")]
    NonPositiveTimestep(f64),
    #[error("pack current {current_a} A exceeds safety limit of {limit_a} A")]
    CurrentLimitExceeded { current_a: f64, limit_a: f64 },
    #[error("cell index {0} out of range (pack has 16 cells)")]
    CellIndexOutOfRange(usize),
}

// 2RC network. Fast branch tau = 2 s, slow branch tau = 5 s.
const R1_OHM: f64 = 1.0e-3;
const C1_F: f64 = 2000.0;
const R2_OHM: f64 = 0.5e-3;
const C2_F: f64 = 10_000.0;

// Base series resistance at 50% SOC, 25 °C.
const R0_BASE_OHM: f64 = 0.5e-3;

/// Effective capacity gains +0.5 % per °C above 25 °C.
const CAPACITY_TEMP_COEFF: f64 = 0.005;

// Aging model constants.
const CYCLE_FADE_RATE: f64 = 1.0e-4;
const CYCLE_RESISTANCE_RATE: f64 = 1.0e-3;
const CALENDAR_ACTIVATION_ENERGY_J_PER_MOL: f64 = 30_000.0;
const GAS_CONSTANT_J_PER_MOL_K: f64 = 8.314;
const CALENDAR_BASE_RATE_PER_HOUR: f64 = 1.0e-9;
const CALENDAR_SOC_EXPONENT: f64 = 0.5;
const MAX_CYCLE_FADE: f64 = 0.5;
const MAX_CALENDAR_FADE: f64 = 0.3;

// Lumped thermal model for a 100 Ah prismatic cell.
const THERMAL_MASS_J_PER_C: f64 = 100.0;
const THERMAL_RESISTANCE_C_PER_W: f64 = 2.0;
const TEMP_MIN_C: f64 = -40.0;
const TEMP_MAX_C: f64 = 85.0;

/// Chemistry floor; the model never reports below this.
const MIN_TERMINAL_VOLTAGE_V: f64 = 2.5;

// Direction detection: moving-average filter plus debounce so that noise
// around 0 A cannot flip the hysteresis curve every tick.
const DIRECTION_THRESHOLD_A: f64 = 0.05;
const DIRECTION_AVG_ALPHA: f64 = 0.2;
const DIRECTION_DEBOUNCE_TICKS: u8 = 3;

/// Charge/discharge/rest state used for OCV hysteresis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    Charging,
    Discharging,
    Resting,
}

/// Small state machine over a short-window current average. Transitions only
/// after the candidate state has persisted for a few ticks.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct DirectionFilter {
    state: Direction,
    last_active: Option<Direction>,
    avg_current_a: f64,
    pending: Direction,
    pending_ticks: u8,
}

impl DirectionFilter {
    fn new() -> Self {
        Self {
            state: Direction::Resting,
            last_active: None,
            avg_current_a: 0.0,
            pending: Direction::Resting,
            pending_ticks: 0,
        }
    }

    fn update(&mut self, current_a: f64) -> Direction {
        self.avg_current_a += DIRECTION_AVG_ALPHA * (current_a - self.avg_current_a);

        let candidate = if self.avg_current_a > DIRECTION_THRESHOLD_A {
            Direction::Charging
        } else if self.avg_current_a < -DIRECTION_THRESHOLD_A {
            Direction::Discharging
        } else {
            Direction::Resting
        };

        if candidate == self.state {
            self.pending_ticks = 0;
        } else if candidate == self.pending {
            self.pending_ticks += 1;
            if self.pending_ticks >= DIRECTION_DEBOUNCE_TICKS {
                self.state = candidate;
                self.pending_ticks = 0;
            }
        } else {
            self.pending = candidate;
            self.pending_ticks = 1;
        }

        if self.state != Direction::Resting {
            self.last_active = Some(self.state);
        }
        self.state
    }

    fn ocv_curve(&self) -> OcvCurve {
        match self.state {
            Direction::Charging => OcvCurve::Charge,
            Direction::Discharging => OcvCurve::Discharge,
            Direction::Resting => match self.last_active {
                Some(Direction::Charging) => OcvCurve::Charge,
                Some(Direction::Discharging) => OcvCurve::Discharge,
                _ => OcvCurve::Average,
            },
        }
    }
}

/// Immutable per-cell manufacturing variation, drawn once at pack
/// construction and fixed for the cell's lifetime.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CellParameters {
    /// Multiplier on nominal capacity (1.0 = nominal).
    pub capacity_scale: f64,
    /// Additive offset on the initial SOC fraction.
    pub soc_offset: f64,
    /// Multiplier on the series resistance (1.0 = nominal).
    pub resistance_scale: f64,
}

impl Default for CellParameters {
    fn default() -> Self {
        Self {
            capacity_scale: 1.0,
            soc_offset: 0.0,
            resistance_scale: 1.0,
        }
    }
}

/// Measurement-side override for fault injection. Applied to the *reported*
/// view only; the true physical state keeps evolving underneath so that
/// aging and thermal behaviour stay untouched.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct CellOverride {
    /// Force the reported core temperature.
    pub forced_temperature_c: Option<f64>,
    /// Force the reported terminal voltage.
    pub forced_voltage_v: Option<f64>,
    /// Simulate a broken interconnect: reported voltage collapses to 0 V.
    pub disconnected: bool,
}

impl CellOverride {
    pub fn is_clear(&self) -> bool {
        self.forced_temperature_c.is_none() && self.forced_voltage_v.is_none() && !self.disconnected
    }
}

/// Snapshot of a cell's true physical state.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CellState {
    pub soc: f64,
    pub terminal_voltage_v: f64,
    pub v_rc1_v: f64,
    pub v_rc2_v: f64,
    pub temperature_c: f64,
    pub throughput_ah: f64,
    pub elapsed_hours: f64,
    pub direction: Direction,
}

/// Single-cell electro-thermal model.
#[derive(Debug, Clone)]
pub struct CellModel {
    params: CellParameters,
    capacity_nominal_ah: f64,

    soc: f64,
    v_rc1: f64,
    v_rc2: f64,
    temperature_c: f64,
    terminal_voltage_v: f64,
    direction: DirectionFilter,

    // Aging bookkeeping. Fade factors are monotone: capacity_fade only ever
    // falls, resistance_aging only ever rises.
    throughput_ah: f64,
    elapsed_hours: f64,
    hours_at_last_aging: f64,
    storage_soc: f64,
    storage_temp_c: f64,
    capacity_fade: f64,
    resistance_aging: f64,

    soc_clamp_events: u32,
    override_state: CellOverride,
}

impl CellModel {
    /// `capacity_ah` is the nominal datasheet capacity; the effective value
    /// is scaled by `params.capacity_scale` and aging.
    pub fn new(capacity_ah: f64, initial_soc: f64, temperature_c: f64, params: CellParameters) -> Self {
        let soc = (initial_soc + params.soc_offset).clamp(0.0, 1.0);
        let mut cell = Self {
            params,
            capacity_nominal_ah: capacity_ah,
            soc,
            v_rc1: 0.0,
            v_rc2: 0.0,
            temperature_c,
            terminal_voltage_v: 0.0,
            direction: DirectionFilter::new(),
            throughput_ah: 0.0,
            elapsed_hours: 0.0,
            hours_at_last_aging: 0.0,
            storage_soc: soc,
            storage_temp_c: temperature_c,
            capacity_fade: 1.0,
            resistance_aging: 1.0,
            soc_clamp_events: 0,
            override_state: CellOverride::default(),
        };
        cell.terminal_voltage_v =
            open_circuit_voltage(cell.soc, cell.temperature_c, cell.direction.ocv_curve());
        cell
    }

    pub fn state(&self) -> CellState {
        CellState {
            soc: self.soc,
            terminal_voltage_v: self.terminal_voltage_v,
            v_rc1_v: self.v_rc1,
            v_rc2_v: self.v_rc2,
            temperature_c: self.temperature_c,
            throughput_ah: self.throughput_ah,
            elapsed_hours: self.elapsed_hours,
            direction: self.direction.state,
        }
    }

    pub fn soc(&self) -> f64 {
        self.soc
    }

    pub fn temperature_c(&self) -> f64 {
        self.temperature_c
    }

    pub fn terminal_voltage_v(&self) -> f64 {
        self.terminal_voltage_v
    }

    pub fn soc_clamp_events(&self) -> u32 {
        self.soc_clamp_events
    }

    /// Reported temperature after fault overrides.
    pub fn reported_temperature_c(&self) -> f64 {
        self.override_state
            .forced_temperature_c
            .unwrap_or(self.temperature_c)
    }

    /// Reported terminal voltage after fault overrides.
    pub fn reported_voltage_v(&self) -> f64 {
        if self.override_state.disconnected {
            return 0.0;
        }
        self.override_state
            .forced_voltage_v
            .unwrap_or(self.terminal_voltage_v)
    }

    pub fn set_override(&mut self, override_state: CellOverride) {
        self.override_state = override_state;
    }

    pub fn override_state(&self) -> CellOverride {
        self.override_state
    }

    /// Effective capacity in Ah at the present temperature and aging state.
    pub fn effective_capacity_ah(&self) -> f64 {
        let temp_factor = 1.0 + CAPACITY_TEMP_COEFF * (self.temperature_c - 25.0);
        (self.capacity_nominal_ah * self.params.capacity_scale * self.capacity_fade * temp_factor)
            .max(1e-6)
    }

    /// Series resistance R0 in ohms at the given SOC and temperature.
    /// LFP shape: ~1.4x at 0% SOC, 1.0x at 50%, ~0.75x at 100%; resistance
    /// drops 0.5 %/°C with temperature, floored at half the 25 °C value.
    pub fn internal_resistance_ohm(&self, soc: f64, temperature_c: f64) -> f64 {
        let soc = soc.clamp(0.0, 1.0);
        let soc_multiplier = if soc <= 0.5 {
            1.4 - soc * 0.8
        } else {
            1.0 - (soc - 0.5) * 0.5
        };
        let temp_factor = (1.0 - 0.005 * (temperature_c - 25.0)).max(0.5);
        R0_BASE_OHM * soc_multiplier * temp_factor * self.params.resistance_scale * self.resistance_aging
    }

    /// OCV at the cell's present state, honouring hysteresis direction.
    pub fn open_circuit_voltage_v(&self) -> f64 {
        open_circuit_voltage(self.soc, self.temperature_c, self.direction.ocv_curve())
    }

    /// Advance the cell by one timestep.
    ///
    /// `ambient_c` is the effective ambient this cell sees; the pack folds
    /// neighbor thermal coupling into it. Positive current charges.
    pub fn step(&mut self, current_a: f64, ambient_c: f64, dt_s: f64) -> Result<(), StepError> {
        if dt_s <= 0.0 {
            return Err(StepError::NonPositiveTimestep(dt_s));
        }

        // Thermal balance first, with the resistance at the pre-step
        // operating point: Joule heating I^2*R0 against convective loss.
        let r0 = self.internal_resistance_ohm(self.soc, self.temperature_c);
        let heat_w = current_a * current_a * r0;
        let loss_w = (self.temperature_c - ambient_c) / THERMAL_RESISTANCE_C_PER_W;
        self.temperature_c += (heat_w - loss_w) * dt_s / THERMAL_MASS_J_PER_C;
        self.temperature_c = self.temperature_c.clamp(TEMP_MIN_C, TEMP_MAX_C);

        // Coulomb counting against the temperature- and aging-corrected
        // capacity. Clamp excursions are counted, not silently dropped.
        let dt_h = dt_s / 3600.0;
        let capacity_ah = self.effective_capacity_ah();
        let unclamped = self.soc + current_a * dt_h / capacity_ah;
        self.soc = unclamped.clamp(0.0, 1.0);
        if unclamped != self.soc {
            self.soc_clamp_events = self.soc_clamp_events.saturating_add(1);
        }
        self.throughput_ah += current_a.abs() * dt_h;

        let direction = self.direction.update(current_a);

        // Polarization transients. At high C-rate the effective branch
        // resistances shrink (reduced polarization); below 1C they are the
        // nominal values.
        let c_rate = current_a.abs() / self.capacity_nominal_ah.max(1e-9);
        let rc_scale = if c_rate <= 1.0 {
            1.0
        } else {
            (1.0 / (1.0 + 0.15 * (c_rate - 1.0))).max(0.3)
        };
        let r1 = R1_OHM * rc_scale;
        let r2 = R2_OHM * rc_scale;
        self.v_rc1 = rc_branch(self.v_rc1, current_a, r1, C1_F, dt_s);
        self.v_rc2 = rc_branch(self.v_rc2, current_a, r2, C2_F, dt_s);

        // Terminal voltage. With charge-positive current the ohmic and
        // polarization terms add during charge and subtract during
        // discharge.
        let ocv = open_circuit_voltage(self.soc, self.temperature_c, self.direction.ocv_curve());
        let r0 = self.internal_resistance_ohm(self.soc, self.temperature_c);
        self.terminal_voltage_v =
            (ocv + current_a * r0 + self.v_rc1 + self.v_rc2).max(MIN_TERMINAL_VOLTAGE_V);

        // Calendar-aging bookkeeping: storage SOC is only meaningful at
        // rest, temperature matters always.
        self.elapsed_hours += dt_h;
        if direction == Direction::Resting {
            self.storage_soc = self.soc;
        }
        self.storage_temp_c = self.temperature_c;
        if self.elapsed_hours - self.hours_at_last_aging >= 1.0 {
            self.apply_aging();
        }

        Ok(())
    }

    /// Recompute the aging factors from throughput and elapsed time.
    /// Invoked once per simulated hour. Fade is monotone by construction.
    fn apply_aging(&mut self) {
        self.hours_at_last_aging = self.elapsed_hours;

        // Cycle aging: equivalent full cycles from Ah throughput (one cycle
        // = one full charge plus one full discharge).
        let nominal = self.capacity_nominal_ah * self.params.capacity_scale;
        let equivalent_cycles = self.throughput_ah / (2.0 * nominal.max(1e-9));
        let cycle_fade = (1.0 - CYCLE_FADE_RATE * equivalent_cycles.sqrt()).max(MAX_CYCLE_FADE);

        // Calendar aging: Arrhenius in temperature, faster at SOC extremes.
        let temp_k = self.storage_temp_c + 273.15;
        let arrhenius =
            (-CALENDAR_ACTIVATION_ENERGY_J_PER_MOL / (GAS_CONSTANT_J_PER_MOL_K * temp_k)).exp();
        let s = self.storage_soc.clamp(0.0, 1.0);
        let soc_factor =
            (s.powf(CALENDAR_SOC_EXPONENT) + (1.0 - s).powf(CALENDAR_SOC_EXPONENT)) / 2.0;
        let calendar_fade = 1.0
            - (CALENDAR_BASE_RATE_PER_HOUR * arrhenius * soc_factor * self.elapsed_hours)
                .min(MAX_CALENDAR_FADE);

        let fade = (cycle_fade * calendar_fade).max(MAX_CYCLE_FADE);
        self.capacity_fade = self.capacity_fade.min(fade);

        let resistance = 1.0 + CYCLE_RESISTANCE_RATE * equivalent_cycles;
        self.resistance_aging = self.resistance_aging.max(resistance);
    }

    /// Precondition the aging state, e.g. to start a run with a used pack.
    pub fn set_aging(&mut self, equivalent_cycles: f64, calendar_hours: f64) {
        let nominal = self.capacity_nominal_ah * self.params.capacity_scale;
        self.throughput_ah = equivalent_cycles.max(0.0) * 2.0 * nominal;
        self.elapsed_hours = self.elapsed_hours.max(calendar_hours.max(0.0));
        self.apply_aging();
    }

    /// Reset dynamic state, keeping parameters and aging. Used by test
    /// harnesses between scenarios.
    pub fn reset(&mut self, soc: Option<f64>, temperature_c: Option<f64>) {
        if let Some(soc) = soc {
            self.soc = soc.clamp(0.0, 1.0);
        }
        if let Some(temp) = temperature_c {
            self.temperature_c = temp;
        }
        self.v_rc1 = 0.0;
        self.v_rc2 = 0.0;
        self.direction = DirectionFilter::new();
        self.override_state = CellOverride::default();
        self.terminal_voltage_v =
            open_circuit_voltage(self.soc, self.temperature_c, self.direction.ocv_curve());
    }
}

/// Exact discretization of `dV/dt = -V/(R*C) + I/C`.
fn rc_branch(v: f64, current_a: f64, r: f64, c: f64, dt_s: f64) -> f64 {
    let tau = r * c;
    if tau <= 0.0 {
        return 0.0;
    }
    let decay = (-dt_s / tau).exp();
    v * decay + current_a * r * (1.0 - decay)
}
