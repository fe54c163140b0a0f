//! # AFE Front End
//!
//! Turns the pack's true physical state into the noisy, quantized channel
//! readings a measurement IC would report. Per channel, in order:
//! calibration gain error, calibration offset error, additive Gaussian
//! noise, ADC quantization with saturation, then the scheduled fault
//! overlay.
//!
//! Determinism contract: calibration errors are drawn once at construction;
//! noise is drawn exactly once per channel per `sample` call, in the fixed
//! order current, pack voltage, cell temp, PCB temp, cells 1..16. Two front
//! ends built from the same seed replay bit-identically.

use rand::rngs::StdRng;
use rand::Rng;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};

use super::faults::{Channel, FaultKind, FaultSchedule};
use super::frame::{
    MeasurementFrame, FLAG_CURRENT_SENSOR, FLAG_NTC_CELL_SENSOR, FLAG_NTC_PCB_SENSOR,
};
use crate::config::ConfigError;
use crate::simulation::{PackSimulator, NUM_CELLS};

/// Out-of-range code an NTC fault pushes onto a temperature channel.
pub const NTC_FAULT_SENTINEL_C: f64 = -3276.8;

/// Fixed extreme value for a broken sense wire.
pub const OPEN_WIRE_VALUE: f64 = 0.0;

/// Additive Gaussian noise sigmas per channel class.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct NoiseConfig {
    pub voltage_sigma_v: f64,
    pub current_sigma_a: f64,
    pub temp_sigma_c: f64,
}

impl Default for NoiseConfig {
    fn default() -> Self {
        Self {
            voltage_sigma_v: 2.0e-3,
            current_sigma_a: 0.05,
            temp_sigma_c: 0.5,
        }
    }
}

/// Half-ranges the per-channel calibration errors are drawn from.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationConfig {
    /// Voltage gain error, fraction (0.001 = ±0.1 %).
    pub voltage_gain_error: f64,
    pub voltage_offset_v: f64,
    pub current_gain_error: f64,
    pub current_offset_a: f64,
    pub temp_offset_c: f64,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            voltage_gain_error: 0.001,
            voltage_offset_v: 5.0e-3,
            current_gain_error: 0.002,
            current_offset_a: 0.01,
            temp_offset_c: 1.0,
        }
    }
}

/// ADC bit depths and full-scale ranges per channel class.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct AdcConfig {
    pub voltage_bits: u32,
    pub cell_voltage_min_v: f64,
    pub cell_voltage_max_v: f64,
    pub current_bits: u32,
    pub current_min_a: f64,
    pub current_max_a: f64,
    pub temp_bits: u32,
    pub temp_min_c: f64,
    pub temp_max_c: f64,
}

impl Default for AdcConfig {
    fn default() -> Self {
        Self {
            // 16-bit over 0..6.5535 V is a 0.1 mV LSB.
            voltage_bits: 16,
            cell_voltage_min_v: 0.0,
            cell_voltage_max_v: 6.5535,
            current_bits: 16,
            current_min_a: -750.0,
            current_max_a: 750.0,
            // 12-bit over -55..149.75 °C is a 0.05 °C LSB.
            temp_bits: 12,
            temp_min_c: -55.0,
            temp_max_c: 149.75,
        }
    }
}

/// Complete front-end configuration.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct AfeConfig {
    pub noise: NoiseConfig,
    pub calibration: CalibrationConfig,
    pub adc: AdcConfig,
    /// Electronics self-heating above ambient seen by the PCB sensor (°C).
    pub pcb_rise_c: f64,
}

impl Default for AfeConfig {
    fn default() -> Self {
        Self {
            noise: NoiseConfig::default(),
            calibration: CalibrationConfig::default(),
            adc: AdcConfig::default(),
            pcb_rise_c: 5.0,
        }
    }
}

impl AfeConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        for sigma in [
            self.noise.voltage_sigma_v,
            self.noise.current_sigma_a,
            self.noise.temp_sigma_c,
        ] {
            if !(sigma >= 0.0) {
                return Err(ConfigError::InvalidNoiseSigma(sigma));
            }
        }
        for (bits, min, max) in [
            (
                self.adc.voltage_bits,
                self.adc.cell_voltage_min_v,
                self.adc.cell_voltage_max_v,
            ),
            (
                self.adc.current_bits,
                self.adc.current_min_a,
                self.adc.current_max_a,
            ),
            (self.adc.temp_bits, self.adc.temp_min_c, self.adc.temp_max_c),
        ] {
            if !(1..=24).contains(&bits) {
                return Err(ConfigError::InvalidBitDepth(bits));
            }
            if !(max > min) {
                return Err(ConfigError::InvalidAdcRange { min, max });
            }
        }
        Ok(())
    }
}

/// Round-to-nearest quantizer with saturation at the range boundaries.
#[derive(Debug, Clone, Copy)]
struct Quantizer {
    min: f64,
    lsb: f64,
    levels: f64,
}

impl Quantizer {
    fn new(bits: u32, min: f64, max: f64) -> Self {
        let levels = ((1u64 << bits) - 1) as f64;
        Self {
            min,
            lsb: (max - min) / levels,
            levels,
        }
    }

    /// Returns the quantized value and whether the input saturated.
    fn quantize(&self, value: f64) -> (f64, bool) {
        let code = ((value - self.min) / self.lsb).round();
        let clamped = code.clamp(0.0, self.levels);
        (self.min + clamped * self.lsb, code != clamped)
    }
}

#[derive(Debug, Clone, Copy)]
struct GainOffset {
    gain: f64,
    offset: f64,
}

/// Last successfully sampled value per channel, the hold source for
/// stuck-ADC faults.
#[derive(Debug, Clone, Copy, Default)]
struct HeldReadings {
    pack_current: Option<f64>,
    pack_voltage: Option<f64>,
    cell_temp: Option<f64>,
    pcb_temp: Option<f64>,
    cells: [Option<f64>; NUM_CELLS],
}

impl HeldReadings {
    fn get(&self, channel: Channel) -> Option<f64> {
        match channel {
            Channel::PackCurrent => self.pack_current,
            Channel::PackVoltage => self.pack_voltage,
            Channel::CellTemp => self.cell_temp,
            Channel::PcbTemp => self.pcb_temp,
            Channel::CellVoltage(i) => self.cells[i],
        }
    }

    fn set(&mut self, channel: Channel, value: f64) {
        match channel {
            Channel::PackCurrent => self.pack_current = Some(value),
            Channel::PackVoltage => self.pack_voltage = Some(value),
            Channel::CellTemp => self.cell_temp = Some(value),
            Channel::PcbTemp => self.pcb_temp = Some(value),
            Channel::CellVoltage(i) => self.cells[i] = Some(value),
        }
    }
}

/// Measurement front end: true pack state in, measurement frames out.
pub struct AfeFrontEnd {
    schedule: FaultSchedule,
    rng: StdRng,

    voltage_noise: Normal<f64>,
    current_noise: Normal<f64>,
    temp_noise: Normal<f64>,

    cell_quantizer: Quantizer,
    pack_quantizer: Quantizer,
    current_quantizer: Quantizer,
    temp_quantizer: Quantizer,

    current_cal: GainOffset,
    pack_voltage_cal: GainOffset,
    cell_temp_offset_c: f64,
    pcb_temp_offset_c: f64,
    cell_cals: [GainOffset; NUM_CELLS],

    pcb_rise_c: f64,
    held: HeldReadings,
    saturation_events: u64,
}

impl AfeFrontEnd {
    /// Calibration errors are drawn here, once, from `rng`; the same seed
    /// reproduces the same part-to-part spread.
    pub fn new(
        config: AfeConfig,
        schedule: FaultSchedule,
        mut rng: StdRng,
    ) -> Result<Self, ConfigError> {
        config.validate()?;

        let cal = &config.calibration;
        let current_cal = GainOffset {
            gain: sample_gain(&mut rng, cal.current_gain_error),
            offset: sample_offset(&mut rng, cal.current_offset_a),
        };
        let pack_voltage_cal = GainOffset {
            gain: sample_gain(&mut rng, cal.voltage_gain_error),
            offset: sample_offset(&mut rng, cal.voltage_offset_v),
        };
        let cell_temp_offset_c = sample_offset(&mut rng, cal.temp_offset_c);
        let pcb_temp_offset_c = sample_offset(&mut rng, cal.temp_offset_c);
        let mut cell_cals = [GainOffset {
            gain: 1.0,
            offset: 0.0,
        }; NUM_CELLS];
        for slot in &mut cell_cals {
            *slot = GainOffset {
                gain: sample_gain(&mut rng, cal.voltage_gain_error),
                offset: sample_offset(&mut rng, cal.voltage_offset_v),
            };
        }

        let adc = &config.adc;
        Ok(Self {
            schedule,
            voltage_noise: Normal::new(0.0, config.noise.voltage_sigma_v)
                .map_err(|_| ConfigError::InvalidNoiseSigma(config.noise.voltage_sigma_v))?,
            current_noise: Normal::new(0.0, config.noise.current_sigma_a)
                .map_err(|_| ConfigError::InvalidNoiseSigma(config.noise.current_sigma_a))?,
            temp_noise: Normal::new(0.0, config.noise.temp_sigma_c)
                .map_err(|_| ConfigError::InvalidNoiseSigma(config.noise.temp_sigma_c))?,
            cell_quantizer: Quantizer::new(
                adc.voltage_bits,
                adc.cell_voltage_min_v,
                adc.cell_voltage_max_v,
            ),
            // The pack tap spans the whole string, so its full-scale range
            // is the cell range times the cell count.
            pack_quantizer: Quantizer::new(
                adc.voltage_bits,
                adc.cell_voltage_min_v * NUM_CELLS as f64,
                adc.cell_voltage_max_v * NUM_CELLS as f64,
            ),
            current_quantizer: Quantizer::new(adc.current_bits, adc.current_min_a, adc.current_max_a),
            temp_quantizer: Quantizer::new(adc.temp_bits, adc.temp_min_c, adc.temp_max_c),
            current_cal,
            pack_voltage_cal,
            cell_temp_offset_c,
            pcb_temp_offset_c,
            cell_cals,
            pcb_rise_c: config.pcb_rise_c,
            held: HeldReadings::default(),
            saturation_events: 0,
            rng,
        })
    }

    /// Quantizer saturation events since construction; observable so tests
    /// can tell saturation from silent data loss.
    pub fn saturation_events(&self) -> u64 {
        self.saturation_events
    }

    /// Sample every channel into a fresh frame.
    pub fn sample(&mut self, pack: &PackSimulator, sim_time_s: f64) -> MeasurementFrame {
        let mut flags = 0u32;

        // Physical truth for each channel.
        let true_current = pack.pack_current_a();
        let true_pack_v = pack.pack_voltage_v();
        // Single pack NTC, mounted mid-string.
        let true_cell_temp = pack.cell_temperatures_c()[NUM_CELLS / 2 - 1];
        let true_pcb_temp = pack.ambient_temp_c() + self.pcb_rise_c;
        let true_cells = pack.cell_voltages_v();

        // Pipeline per channel, in the fixed replay order.
        let noise = self.current_noise;
        let current = self.measure(true_current, self.current_cal, noise, self.current_quantizer);
        let noise = self.voltage_noise;
        let pack_v = self.measure(true_pack_v, self.pack_voltage_cal, noise, self.pack_quantizer);
        let cell_temp_cal = GainOffset {
            gain: 1.0,
            offset: self.cell_temp_offset_c,
        };
        let noise = self.temp_noise;
        let cell_temp = self.measure(true_cell_temp, cell_temp_cal, noise, self.temp_quantizer);
        let pcb_temp_cal = GainOffset {
            gain: 1.0,
            offset: self.pcb_temp_offset_c,
        };
        let pcb_temp = self.measure(true_pcb_temp, pcb_temp_cal, noise, self.temp_quantizer);
        let mut cells = [0.0; NUM_CELLS];
        for (i, slot) in cells.iter_mut().enumerate() {
            let noise = self.voltage_noise;
            *slot = self.measure(true_cells[i], self.cell_cals[i], noise, self.cell_quantizer);
        }

        // Fault overlay, after quantization, one schedule consult per
        // channel.
        let current = self.overlay(Channel::PackCurrent, sim_time_s, current, &mut flags);
        let pack_v = self.overlay(Channel::PackVoltage, sim_time_s, pack_v, &mut flags);
        let cell_temp = self.overlay(Channel::CellTemp, sim_time_s, cell_temp, &mut flags);
        let pcb_temp = self.overlay(Channel::PcbTemp, sim_time_s, pcb_temp, &mut flags);
        for (i, slot) in cells.iter_mut().enumerate() {
            *slot = self.overlay(Channel::CellVoltage(i), sim_time_s, *slot, &mut flags);
        }

        MeasurementFrame {
            sim_time_s,
            pack_current_a: current,
            pack_voltage_v: pack_v,
            temp_cell_c: cell_temp,
            temp_pcb_c: pcb_temp,
            cell_voltages_v: cells,
            status_flags: flags,
        }
    }

    /// Calibration, noise, quantization. One RNG draw per call.
    fn measure(
        &mut self,
        true_value: f64,
        cal: GainOffset,
        noise: Normal<f64>,
        quantizer: Quantizer,
    ) -> f64 {
        let distorted = true_value * cal.gain + cal.offset + noise.sample(&mut self.rng);
        let (quantized, saturated) = quantizer.quantize(distorted);
        if saturated {
            self.saturation_events += 1;
        }
        quantized
    }

    fn overlay(&mut self, channel: Channel, t_s: f64, measured: f64, flags: &mut u32) -> f64 {
        match self.schedule.active_fault(channel, t_s) {
            None => {
                self.held.set(channel, measured);
                measured
            }
            Some(FaultKind::OpenWire) => {
                match channel {
                    Channel::CellVoltage(i) => *flags |= 1 << i,
                    Channel::PackCurrent => *flags |= FLAG_CURRENT_SENSOR,
                    _ => {}
                }
                OPEN_WIRE_VALUE
            }
            Some(FaultKind::StuckAdc) => {
                // Hold the last good reading; if the fault hits on the very
                // first sample there is nothing to hold yet, so freeze the
                // present one.
                self.held.get(channel).unwrap_or_else(|| {
                    self.held.set(channel, measured);
                    measured
                })
            }
            Some(FaultKind::NtcFault) => {
                match channel {
                    Channel::CellTemp => *flags |= FLAG_NTC_CELL_SENSOR,
                    Channel::PcbTemp => *flags |= FLAG_NTC_PCB_SENSOR,
                    _ => {}
                }
                NTC_FAULT_SENTINEL_C
            }
        }
    }
}

fn sample_gain(rng: &mut StdRng, half_range: f64) -> f64 {
    rng.gen_range(1.0 - half_range..=1.0 + half_range)
}

fn sample_offset(rng: &mut StdRng, half_range: f64) -> f64 {
    rng.gen_range(-half_range..=half_range)
}
