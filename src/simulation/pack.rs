//! # 16S Battery Pack Model
//!
//! Composes 16 series cells with per-cell manufacturing variation and
//! nearest-neighbour thermal coupling. The series topology means every cell
//! carries the same current; the pack voltage is the sum of the cell
//! terminal voltages.
//!
//! Coupling is evaluated against the temperatures from the *previous* tick
//! (explicit scheme), so the per-cell update order never changes the result.

use itertools::Itertools;
use rand::rngs::StdRng;
use rand::Rng;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};

use super::cell::{CellModel, CellOverride, CellParameters, StepError};
use crate::config::ConfigError;

/// Fixed series string length.
pub const NUM_CELLS: usize = 16;

/// Capacity variation draws are clipped to this band, matching how tightly
/// production packs are binned.
const CAPACITY_SCALE_MIN: f64 = 0.98;
const CAPACITY_SCALE_MAX: f64 = 1.02;

/// Pack construction parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PackConfig {
    /// Nominal per-cell capacity (Ah).
    pub cell_capacity_ah: f64,
    /// Initial SOC fraction applied to every cell before variation.
    pub initial_soc: f64,
    /// Ambient temperature (°C).
    pub ambient_temp_c: f64,
    /// Capacity mismatch sigma, percent of nominal.
    pub capacity_sigma_pct: f64,
    /// Initial SOC variation sigma, percentage points.
    pub soc_sigma_pct: f64,
    /// Resistance variation half-range, fraction (0.025 = ±2.5 %).
    pub resistance_variation: f64,
    /// Neighbour thermal coupling coefficient (°C of effective-ambient shift
    /// per °C of neighbour temperature difference).
    pub thermal_coupling: f64,
    /// Stepping rejects currents beyond this magnitude (A).
    pub safety_current_limit_a: f64,
}

impl Default for PackConfig {
    fn default() -> Self {
        Self {
            cell_capacity_ah: 100.0,
            initial_soc: 0.5,
            ambient_temp_c: 25.0,
            capacity_sigma_pct: 0.4,
            soc_sigma_pct: 0.25,
            resistance_variation: 0.025,
            thermal_coupling: 0.1,
            safety_current_limit_a: 600.0,
        }
    }
}

impl PackConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.cell_capacity_ah > 0.0) {
            return Err(ConfigError::InvalidCapacity(self.cell_capacity_ah));
        }
        if !(0.0..=1.0).contains(&self.initial_soc) {
            return Err(ConfigError::InvalidInitialSoc(self.initial_soc));
        }
        for sigma in [self.capacity_sigma_pct, self.soc_sigma_pct] {
            if !(sigma >= 0.0) {
                return Err(ConfigError::InvalidSigma(sigma));
            }
        }
        if !(0.0..1.0).contains(&self.resistance_variation) {
            return Err(ConfigError::InvalidSigma(self.resistance_variation));
        }
        if !(self.safety_current_limit_a > 0.0) {
            return Err(ConfigError::InvalidCurrentLimit(self.safety_current_limit_a));
        }
        Ok(())
    }
}

/// Spread statistics across the string, the quantities a balancer watches.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ImbalanceStats {
    pub min_voltage_v: f64,
    pub max_voltage_v: f64,
    pub voltage_delta_v: f64,
    pub min_soc: f64,
    pub max_soc: f64,
    pub soc_delta: f64,
}

/// 16-cell series pack simulator.
pub struct PackSimulator {
    config: PackConfig,
    cells: Vec<CellModel>,
    pack_current_a: f64,
}

impl PackSimulator {
    /// Draws per-cell parameters from the configured distributions using the
    /// caller's seeded generator, so identical seeds give identical packs.
    pub fn new(config: PackConfig, rng: &mut StdRng) -> Result<Self, ConfigError> {
        config.validate()?;

        let capacity_dist = Normal::new(1.0, config.capacity_sigma_pct / 100.0)
            .map_err(|_| ConfigError::InvalidSigma(config.capacity_sigma_pct))?;
        let soc_dist = Normal::new(0.0, config.soc_sigma_pct / 100.0)
            .map_err(|_| ConfigError::InvalidSigma(config.soc_sigma_pct))?;

        let cells = (0..NUM_CELLS)
            .map(|_| {
                let params = CellParameters {
                    capacity_scale: capacity_dist
                        .sample(rng)
                        .clamp(CAPACITY_SCALE_MIN, CAPACITY_SCALE_MAX),
                    soc_offset: soc_dist.sample(rng),
                    resistance_scale: rng.gen_range(
                        1.0 - config.resistance_variation..=1.0 + config.resistance_variation,
                    ),
                };
                CellModel::new(
                    config.cell_capacity_ah,
                    config.initial_soc,
                    config.ambient_temp_c,
                    params,
                )
            })
            .collect();

        Ok(Self {
            config,
            cells,
            pack_current_a: 0.0,
        })
    }

    /// Advance every cell by one timestep under the shared series current.
    pub fn step(&mut self, pack_current_a: f64, dt_s: f64) -> Result<(), StepError> {
        if dt_s <= 0.0 {
            return Err(StepError::NonPositiveTimestep(dt_s));
        }
        if pack_current_a.abs() > self.config.safety_current_limit_a {
            return Err(StepError::CurrentLimitExceeded {
                current_a: pack_current_a,
                limit_a: self.config.safety_current_limit_a,
            });
        }

        self.pack_current_a = pack_current_a;

        // Snapshot temperatures before any cell moves; coupling terms only
        // ever read this snapshot.
        let temps: Vec<f64> = self.cells.iter().map(|c| c.temperature_c()).collect();

        for (i, cell) in self.cells.iter_mut().enumerate() {
            let mut coupling_c = 0.0;
            if i > 0 {
                coupling_c += self.config.thermal_coupling * (temps[i - 1] - temps[i]);
            }
            if i + 1 < NUM_CELLS {
                coupling_c += self.config.thermal_coupling * (temps[i + 1] - temps[i]);
            }
            cell.step(pack_current_a, self.config.ambient_temp_c + coupling_c, dt_s)?;
        }
        Ok(())
    }

    pub fn set_ambient_temp(&mut self, temp_c: f64) {
        self.config.ambient_temp_c = temp_c;
    }

    pub fn ambient_temp_c(&self) -> f64 {
        self.config.ambient_temp_c
    }

    /// Series current applied at the last step (A, charge-positive).
    pub fn pack_current_a(&self) -> f64 {
        self.pack_current_a
    }

    /// Sum of reported cell voltages (V). Fault overrides are visible here,
    /// exactly as a pack-level tap would see them.
    pub fn pack_voltage_v(&self) -> f64 {
        self.cells.iter().map(|c| c.reported_voltage_v()).sum()
    }

    /// Mean of cell SOCs.
    pub fn pack_soc_mean(&self) -> f64 {
        self.cells.iter().map(|c| c.soc()).sum::<f64>() / NUM_CELLS as f64
    }

    /// Weakest-cell SOC, the figure a protection layer cares about.
    pub fn pack_soc_min(&self) -> f64 {
        self.cells
            .iter()
            .map(|c| c.soc())
            .fold(f64::INFINITY, f64::min)
    }

    pub fn cell_voltages_v(&self) -> [f64; NUM_CELLS] {
        let mut out = [0.0; NUM_CELLS];
        for (slot, cell) in out.iter_mut().zip(&self.cells) {
            *slot = cell.reported_voltage_v();
        }
        out
    }

    pub fn cell_temperatures_c(&self) -> [f64; NUM_CELLS] {
        let mut out = [0.0; NUM_CELLS];
        for (slot, cell) in out.iter_mut().zip(&self.cells) {
            *slot = cell.reported_temperature_c();
        }
        out
    }

    pub fn cell_socs(&self) -> [f64; NUM_CELLS] {
        let mut out = [0.0; NUM_CELLS];
        for (slot, cell) in out.iter_mut().zip(&self.cells) {
            *slot = cell.soc();
        }
        out
    }

    pub fn cells(&self) -> &[CellModel] {
        &self.cells
    }

    /// Total SOC clamp events across the string since construction.
    pub fn soc_clamp_events(&self) -> u32 {
        self.cells.iter().map(|c| c.soc_clamp_events()).sum()
    }

    pub fn imbalance(&self) -> ImbalanceStats {
        let (min_v, max_v) = self
            .cells
            .iter()
            .map(|c| c.reported_voltage_v())
            .minmax()
            .into_option()
            .unwrap_or((0.0, 0.0));
        let (min_soc, max_soc) = self
            .cells
            .iter()
            .map(|c| c.soc())
            .minmax()
            .into_option()
            .unwrap_or((0.0, 0.0));
        ImbalanceStats {
            min_voltage_v: min_v,
            max_voltage_v: max_v,
            voltage_delta_v: max_v - min_v,
            min_soc,
            max_soc,
            soc_delta: max_soc - min_soc,
        }
    }

    /// Fault injection: force one cell's reported temperature.
    pub fn force_cell_temperature(
        &mut self,
        index: usize,
        temperature_c: Option<f64>,
    ) -> Result<(), StepError> {
        let cell = self
            .cells
            .get_mut(index)
            .ok_or(StepError::CellIndexOutOfRange(index))?;
        let mut ov = cell.override_state();
        ov.forced_temperature_c = temperature_c;
        cell.set_override(ov);
        Ok(())
    }

    /// Fault injection: force one cell's reported voltage.
    pub fn force_cell_voltage(
        &mut self,
        index: usize,
        voltage_v: Option<f64>,
    ) -> Result<(), StepError> {
        let cell = self
            .cells
            .get_mut(index)
            .ok_or(StepError::CellIndexOutOfRange(index))?;
        let mut ov = cell.override_state();
        ov.forced_voltage_v = voltage_v;
        cell.set_override(ov);
        Ok(())
    }

    /// Fault injection: simulate a broken cell interconnect.
    pub fn disconnect_cell(&mut self, index: usize, disconnected: bool) -> Result<(), StepError> {
        let cell = self
            .cells
            .get_mut(index)
            .ok_or(StepError::CellIndexOutOfRange(index))?;
        let mut ov = cell.override_state();
        ov.disconnected = disconnected;
        cell.set_override(ov);
        Ok(())
    }

    pub fn clear_overrides(&mut self) {
        for cell in &mut self.cells {
            cell.set_override(CellOverride::default());
        }
    }

    /// Precondition aging on every cell.
    pub fn set_aging(&mut self, equivalent_cycles: f64, calendar_hours: f64) {
        for cell in &mut self.cells {
            cell.set_aging(equivalent_cycles, calendar_hours);
        }
    }

    /// Reset one cell's dynamic state; test harness hook.
    pub fn reset_cell(
        &mut self,
        index: usize,
        soc: Option<f64>,
        temperature_c: Option<f64>,
    ) -> Result<(), StepError> {
        let cell = self
            .cells
            .get_mut(index)
            .ok_or(StepError::CellIndexOutOfRange(index))?;
        cell.reset(soc, temperature_c);
        Ok(())
    }

    /// Reset the whole string to a uniform state.
    pub fn reset(&mut self, soc: Option<f64>, temperature_c: Option<f64>) {
        for cell in &mut self.cells {
            cell.reset(soc, temperature_c);
        }
        self.pack_current_a = 0.0;
    }
}
