//! Bosch BME680/BME688 gas, temperature, humidity and pressure sensor
//!
//! The driver runs the device in forced mode (one field per trigger) or
//! parallel mode (the device cycles through a heater profile and keeps the
//! last three fields). Either way a poll cycle is one mode write, one wait
//! for the computed measurement duration, and one burst read of the field
//! registers.

pub mod calibration;

use embassy_time::{Duration, Instant};
use embedded_hal::delay::DelayNs;
use embedded_hal::i2c::I2c;
use heapless::Vec;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use self::calibration::{
    COEFF_LEN, COEFF1_ADDR, COEFF1_LEN, COEFF2_ADDR, COEFF2_LEN, COEFF3_ADDR, Calibration,
};
use super::{
    Outcome, PollTimer, PolledSensor, SensorError, SensorReadings, SensorState, to_milli,
};
use crate::bus::{BusError, RegisterDevice};

pub const BME68X_ADDRESS_LOW: u8 = 0x76;
pub const BME68X_ADDRESS_HIGH: u8 = 0x77;

const REG_FIELD0: u8 = 0x1D;
const REG_RES_HEAT0: u8 = 0x5A;
const REG_GAS_WAIT0: u8 = 0x64;
const REG_GAS_WAIT_SHARED: u8 = 0x6E;
const REG_CTRL_GAS_0: u8 = 0x70;
const REG_CTRL_GAS_1: u8 = 0x71;
const REG_CTRL_HUM: u8 = 0x72;
const REG_CTRL_MEAS: u8 = 0x74;
const REG_CONFIG: u8 = 0x75;
const REG_CHIP_ID: u8 = 0xD0;
const REG_SOFT_RESET: u8 = 0xE0;
const REG_VARIANT_ID: u8 = 0xF0;

const CHIP_ID: u8 = 0x61;
const SOFT_RESET_CMD: u8 = 0xB6;
const SOFT_RESET_MS: u32 = 10;

const HEATER_OFF: u8 = 0x08;
const RUN_GAS_LOW: u8 = 0x10;
const RUN_GAS_HIGH: u8 = 0x20;

/// Bytes per field; fields 0..=2 are contiguous from 0x1D.
pub const FIELD_LENGTH: usize = 17;
pub const FIELD_COUNT: usize = 3;

pub const STATUS_NEW_DATA: u8 = 0x80;
pub const STATUS_GAS_VALID: u8 = 0x20;
pub const STATUS_HEAT_STABLE: u8 = 0x10;
const GAS_INDEX_MASK: u8 = 0x0F;

/// Longest heater profile the device accepts.
pub const MAX_HEATER_STEPS: usize = 10;

/// Measurement cycles per oversampling setting.
const OVERSAMPLING_CYCLES: [u32; 6] = [0, 1, 2, 4, 8, 16];
const CYCLE_US: u32 = 1963;
/// Temperature/pressure/humidity switching (4) plus gas measurement (5).
const SWITCHING_US: u32 = 477 * 9;
const WAKE_UP_US: u32 = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Oversampling {
    Skip = 0,
    X1 = 1,
    X2 = 2,
    X4 = 3,
    X8 = 4,
    X16 = 5,
}

impl Oversampling {
    const fn cycles(self) -> u32 {
        OVERSAMPLING_CYCLES[self as usize]
    }
}

/// IIR filter coefficient.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Filter {
    Off = 0,
    Size1 = 1,
    Size3 = 2,
    Size7 = 3,
    Size15 = 4,
    Size31 = 5,
    Size63 = 6,
    Size127 = 7,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OperatingMode {
    Forced,
    Parallel,
}

impl OperatingMode {
    const fn mode_bits(self) -> u8 {
        match self {
            Self::Forced => 0x01,
            Self::Parallel => 0x02,
        }
    }

    const fn field_count(self) -> usize {
        match self {
            Self::Forced => 1,
            Self::Parallel => FIELD_COUNT,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeaterStep {
    pub temperature_c: u16,
    /// Milliseconds in forced mode, multiples of the shared duration in
    /// parallel mode.
    pub duration: u16,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeaterConfig {
    pub enabled: bool,
    /// Forced mode uses the first step only.
    pub steps: Vec<HeaterStep, MAX_HEATER_STEPS>,
    /// Parallel mode only.
    pub shared_duration_ms: u16,
}

impl HeaterConfig {
    pub fn is_active(&self) -> bool {
        self.enabled && !self.steps.is_empty()
    }
}

impl Default for HeaterConfig {
    fn default() -> Self {
        let mut steps = Vec::new();
        let _ = steps.push(HeaterStep {
            temperature_c: 320,
            duration: 100,
        });
        Self {
            enabled: true,
            steps,
            shared_duration_ms: 140,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bme68xSettings {
    pub temperature_oversampling: Oversampling,
    pub pressure_oversampling: Oversampling,
    pub humidity_oversampling: Oversampling,
    pub filter: Filter,
    pub mode: OperatingMode,
    pub heater: HeaterConfig,
    /// Used for the heater resistance calculation.
    pub ambient_temperature_c: i8,
}

impl Default for Bme68xSettings {
    fn default() -> Self {
        Self {
            temperature_oversampling: Oversampling::X8,
            pressure_oversampling: Oversampling::X4,
            humidity_oversampling: Oversampling::X2,
            filter: Filter::Off,
            mode: OperatingMode::Forced,
            heater: HeaterConfig::default(),
            ambient_temperature_c: 25,
        }
    }
}

impl Bme68xSettings {
    /// Time from the mode write until the data is in the field registers.
    pub fn measurement_duration_us(&self) -> u32 {
        let cycles = self.temperature_oversampling.cycles()
            + self.pressure_oversampling.cycles()
            + self.humidity_oversampling.cycles();

        let mut duration = cycles * CYCLE_US + SWITCHING_US;
        if self.mode == OperatingMode::Forced {
            duration += WAKE_UP_US;
        }
        duration
    }

    /// Total wait after a trigger, heater time included.
    pub fn conversion_time(&self) -> Duration {
        let mut wait = Duration::from_micros(u64::from(self.measurement_duration_us()));
        if self.heater.is_active() {
            let heater_ms = match self.mode {
                OperatingMode::Forced => self.heater.steps.first().map_or(0, |s| s.duration),
                OperatingMode::Parallel => self.heater.shared_duration_ms,
            };
            wait += Duration::from_millis(u64::from(heater_ms));
        }
        wait
    }

    /// Status bits a field must carry to be accepted in parallel mode.
    pub fn valid_mask(&self) -> u8 {
        if self.heater.is_active() {
            STATUS_NEW_DATA | STATUS_GAS_VALID | STATUS_HEAT_STABLE
        } else {
            STATUS_NEW_DATA
        }
    }

    fn ctrl_meas(&self, mode_bits: u8) -> u8 {
        ((self.temperature_oversampling as u8) << 5)
            | ((self.pressure_oversampling as u8) << 2)
            | mode_bits
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Variant {
    /// BME680
    GasLow,
    /// BME688
    GasHigh,
}

impl Variant {
    const fn from_id(id: u8) -> Self {
        if id == 0 { Self::GasLow } else { Self::GasHigh }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bme68xReading {
    pub temperature_c: f32,
    pub humidity_percent: f32,
    pub pressure_pa: f32,
    pub gas_resistance_ohms: u32,
    /// Heater step that produced the gas measurement.
    pub gas_index: u8,
    pub gas_valid: bool,
}

impl SensorReadings<4> for Bme68xReading {
    fn to_array(self) -> [i32; 4] {
        [
            to_milli(self.temperature_c),
            to_milli(self.humidity_percent),
            to_milli(self.pressure_pa),
            i32::try_from(self.gas_resistance_ohms).unwrap_or(i32::MAX),
        ]
    }
}

/// One field's raw ADC values and status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawField {
    pub status: u8,
    pub gas_index: u8,
    pub pressure_adc: u32,
    pub temperature_adc: u32,
    pub humidity_adc: u16,
    pub gas_adc: u16,
    pub gas_range: u8,
}

impl RawField {
    pub fn parse(bytes: &[u8], variant: Variant) -> Self {
        let adc20 = |msb: u8, lsb: u8, xlsb: u8| {
            (u32::from(msb) << 12) | (u32::from(lsb) << 4) | (u32::from(xlsb) >> 4)
        };
        // The gas ADC lives in different registers per variant
        let (gas_msb, gas_lsb) = match variant {
            Variant::GasLow => (bytes[13], bytes[14]),
            Variant::GasHigh => (bytes[15], bytes[16]),
        };

        Self {
            status: (bytes[0] & STATUS_NEW_DATA)
                | (gas_lsb & (STATUS_GAS_VALID | STATUS_HEAT_STABLE)),
            gas_index: bytes[0] & GAS_INDEX_MASK,
            pressure_adc: adc20(bytes[2], bytes[3], bytes[4]),
            temperature_adc: adc20(bytes[5], bytes[6], bytes[7]),
            humidity_adc: u16::from_be_bytes([bytes[8], bytes[9]]),
            gas_adc: (u16::from(gas_msb) << 2) | (u16::from(gas_lsb) >> 6),
            gas_range: gas_lsb & 0x0F,
        }
    }

    pub const fn has(&self, mask: u8) -> bool {
        self.status & mask == mask
    }
}

/// Non-blocking BME68x driver.
pub struct Bme68x<I> {
    device: RegisterDevice<I>,
    settings: Bme68xSettings,
    calibration: Calibration,
    variant: Variant,
    conversion_time: Duration,
    state: SensorState<Bme68xStage>,
    timer: PollTimer,
    latest: Option<Bme68xReading>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bme68xStage {
    Measurement,
}

impl<I: I2c> Bme68x<I> {
    pub fn new(i2c: I, address: u8, interval: Duration, settings: Bme68xSettings) -> Self {
        let conversion_time = settings.conversion_time();
        Self {
            device: RegisterDevice::new(i2c, address),
            settings,
            calibration: Calibration::default(),
            variant: Variant::GasLow,
            conversion_time,
            state: SensorState::Idle,
            timer: PollTimer::new(interval),
            latest: None,
        }
    }

    /// Reset, identify, load calibration and write the measurement settings.
    pub fn init(&mut self, delay: &mut impl DelayNs, now: Instant) -> Result<(), SensorError> {
        self.device
            .write_register(REG_SOFT_RESET, SOFT_RESET_CMD)
            .map_err(|e| e.during(Self::NAME, "soft reset"))?;
        delay.delay_ms(SOFT_RESET_MS);

        let chip_id = self
            .device
            .read_byte(REG_CHIP_ID)
            .map_err(|e| e.during(Self::NAME, "read chip id"))?;
        if chip_id != CHIP_ID {
            return Err(SensorError::UnexpectedChipId {
                sensor: Self::NAME,
                expected: CHIP_ID,
                found: chip_id,
            });
        }

        let variant_id = self
            .device
            .read_byte(REG_VARIANT_ID)
            .map_err(|e| e.during(Self::NAME, "read variant id"))?;
        self.variant = Variant::from_id(variant_id);

        self.calibration = self
            .read_calibration()
            .map_err(|e| e.during(Self::NAME, "read calibration"))?;

        self.configure()
            .map_err(|e| e.during(Self::NAME, "write configuration"))?;

        self.timer.begin_cycle(now);
        self.state = SensorState::WaitingForInterval;
        info!(
            "BME68x: {:?} ready in {:?} mode, {} ms per measurement",
            self.variant,
            self.settings.mode,
            self.conversion_time.as_millis()
        );
        Ok(())
    }

    pub fn variant(&self) -> Variant {
        self.variant
    }

    pub fn settings(&self) -> &Bme68xSettings {
        &self.settings
    }

    pub fn calibration(&self) -> &Calibration {
        &self.calibration
    }

    pub fn release(self) -> I {
        self.device.release()
    }

    fn read_calibration(&mut self) -> Result<Calibration, BusError> {
        let mut coefficients = [0u8; COEFF_LEN];
        let (first, rest) = coefficients.split_at_mut(COEFF1_LEN);
        let (second, third) = rest.split_at_mut(COEFF2_LEN);

        self.device.read_register(COEFF1_ADDR, first)?;
        self.device.read_register(COEFF2_ADDR, second)?;
        self.device.read_register(COEFF3_ADDR, third)?;

        Ok(Calibration::from_coefficients(&coefficients))
    }

    fn configure(&mut self) -> Result<(), BusError> {
        let settings = &self.settings;

        self.device
            .write_register(REG_CTRL_HUM, settings.humidity_oversampling as u8)?;
        self.device
            .write_register(REG_CONFIG, (settings.filter as u8) << 2)?;
        // Sleep until the first trigger
        self.device
            .write_register(REG_CTRL_MEAS, settings.ctrl_meas(0))?;

        if !settings.heater.is_active() {
            self.device.write_register(REG_CTRL_GAS_0, HEATER_OFF)?;
            return self.device.write_register(REG_CTRL_GAS_1, 0);
        }

        let ambient = settings.ambient_temperature_c;
        let steps = match settings.mode {
            OperatingMode::Forced => &settings.heater.steps[..1],
            OperatingMode::Parallel => &settings.heater.steps[..],
        };
        for (i, step) in steps.iter().enumerate() {
            let offset = i as u8;
            let resistance = self.calibration.heater_resistance(step.temperature_c, ambient);
            let wait = match settings.mode {
                OperatingMode::Forced => calibration::gas_wait(step.duration),
                OperatingMode::Parallel => step.duration.min(u16::from(u8::MAX)) as u8,
            };
            self.device.write_register(REG_RES_HEAT0 + offset, resistance)?;
            self.device.write_register(REG_GAS_WAIT0 + offset, wait)?;
        }

        let nb_conv = match settings.mode {
            OperatingMode::Forced => 0,
            OperatingMode::Parallel => {
                self.device.write_register(
                    REG_GAS_WAIT_SHARED,
                    calibration::shared_heater_duration(settings.heater.shared_duration_ms),
                )?;
                steps.len() as u8
            }
        };
        let run_gas = match self.variant {
            Variant::GasLow => RUN_GAS_LOW,
            Variant::GasHigh => RUN_GAS_HIGH,
        };

        self.device.write_register(REG_CTRL_GAS_0, 0)?;
        self.device
            .write_register(REG_CTRL_GAS_1, run_gas | (nb_conv & 0x0F))
    }

    fn read_fields(&mut self) -> Result<Outcome<Bme68xReading>, SensorError> {
        let count = self.settings.mode.field_count();
        let mut buffer = [0u8; FIELD_LENGTH * FIELD_COUNT];
        let buffer = &mut buffer[..FIELD_LENGTH * count];
        self.device
            .read_register(REG_FIELD0, buffer)
            .map_err(|e| e.during(Self::NAME, "read fields"))?;

        let mask = match self.settings.mode {
            OperatingMode::Forced => STATUS_NEW_DATA,
            OperatingMode::Parallel => self.settings.valid_mask(),
        };

        // Array order; the last valid field wins
        let mut newest = None;
        for bytes in buffer.chunks_exact(FIELD_LENGTH) {
            let field = RawField::parse(bytes, self.variant);
            if field.has(mask) {
                newest = Some(self.compensate(&field));
            } else {
                debug!("BME68x: skipping field with status 0x{:02X}", field.status);
            }
        }

        Ok(newest.map_or(Outcome::NoNewData, Outcome::Fresh))
    }

    fn compensate(&self, field: &RawField) -> Bme68xReading {
        let cal = &self.calibration;
        let (temperature_c, t_fine) = cal.temperature(field.temperature_adc);

        let gas_resistance_ohms = if self.settings.heater.is_active() {
            let ohms = match self.variant {
                Variant::GasLow => cal.gas_resistance_low(field.gas_adc, field.gas_range),
                Variant::GasHigh => cal.gas_resistance_high(field.gas_adc, field.gas_range),
            };
            ohms as u32
        } else {
            0
        };

        Bme68xReading {
            temperature_c,
            humidity_percent: cal.humidity(field.humidity_adc, t_fine),
            pressure_pa: cal.pressure(field.pressure_adc, t_fine),
            gas_resistance_ohms,
            gas_index: field.gas_index,
            gas_valid: field.has(STATUS_GAS_VALID | STATUS_HEAT_STABLE),
        }
    }
}

impl<I: I2c> PolledSensor for Bme68x<I> {
    type Stage = Bme68xStage;
    type Reading = Bme68xReading;

    const NAME: &'static str = "BME68x";

    fn update(&mut self, now: Instant) {
        match self.state {
            SensorState::Idle => {}
            SensorState::WaitingForInterval => {
                if !self.timer.interval_elapsed(now) {
                    return;
                }
                self.timer.begin_cycle(now);

                let ctrl_meas = self.settings.ctrl_meas(self.settings.mode.mode_bits());
                match self.device.write_register(REG_CTRL_MEAS, ctrl_meas) {
                    Ok(()) => {
                        self.state = SensorState::WaitingForConversion(Bme68xStage::Measurement);
                    }
                    Err(e) => warn!(
                        "{}; retrying next interval",
                        e.during(Self::NAME, "trigger measurement")
                    ),
                }
            }
            SensorState::WaitingForConversion(_) => {
                if !self.timer.waited(now, self.conversion_time) {
                    return;
                }
                match self.read_fields() {
                    Ok(Outcome::Fresh(reading)) => {
                        debug!(
                            "BME68x: {:.2} C, {:.2} %RH, {:.0} Pa, {} ohm",
                            reading.temperature_c,
                            reading.humidity_percent,
                            reading.pressure_pa,
                            reading.gas_resistance_ohms
                        );
                        self.latest = Some(reading);
                        self.timer.record_success(now);
                    }
                    Ok(Outcome::NoNewData) => debug!("BME68x: no new data"),
                    Err(e) => warn!("{}; retrying next interval", e),
                }
                self.state = SensorState::WaitingForInterval;
            }
        }
    }

    fn state(&self) -> SensorState<Bme68xStage> {
        self.state
    }

    fn latest(&self) -> Option<Bme68xReading> {
        self.latest
    }

    fn last_success(&self) -> Option<Instant> {
        self.timer.last_success()
    }
}
