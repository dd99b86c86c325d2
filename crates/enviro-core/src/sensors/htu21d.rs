use embassy_time::{Duration, Instant};
use embedded_hal::delay::DelayNs;
use embedded_hal::i2c::I2c;
use log::{debug, info, warn};

use super::{
    PollTimer, PolledSensor, SensorError, SensorReadings, SensorState, to_milli,
};
use crate::bus::RegisterDevice;

pub const HTU21D_ADDRESS: u8 = 0x40;

const CMD_TEMPERATURE_NO_HOLD: u8 = 0xF3;
const CMD_HUMIDITY_NO_HOLD: u8 = 0xF5;
const CMD_SOFT_RESET: u8 = 0xFE;

/// Datasheet maximum for a 14-bit temperature conversion.
pub const TEMPERATURE_CONVERSION: Duration = Duration::from_millis(50);
/// Datasheet maximum for a 12-bit humidity conversion.
pub const HUMIDITY_CONVERSION: Duration = Duration::from_millis(16);

const SOFT_RESET_MS: u32 = 15;

/// The two low bits of every measurement carry status, not data.
const STATUS_BITS: u16 = 0x0003;

const CRC_POLYNOMIAL: u8 = 0x31;

/// Typed readings from the HTU21D.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Htu21dReading {
    pub temperature_c: f32,
    pub humidity_percent: f32,
}

impl SensorReadings<2> for Htu21dReading {
    fn to_array(self) -> [i32; 2] {
        [to_milli(self.temperature_c), to_milli(self.humidity_percent)]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Htu21dStage {
    Temperature,
    Humidity,
}

impl Htu21dStage {
    const fn command(self) -> u8 {
        match self {
            Self::Temperature => CMD_TEMPERATURE_NO_HOLD,
            Self::Humidity => CMD_HUMIDITY_NO_HOLD,
        }
    }

    pub const fn conversion_time(self) -> Duration {
        match self {
            Self::Temperature => TEMPERATURE_CONVERSION,
            Self::Humidity => HUMIDITY_CONVERSION,
        }
    }

    const fn trigger_operation(self) -> &'static str {
        match self {
            Self::Temperature => "trigger temperature measurement",
            Self::Humidity => "trigger humidity measurement",
        }
    }

    const fn read_operation(self) -> &'static str {
        match self {
            Self::Temperature => "read temperature",
            Self::Humidity => "read humidity",
        }
    }
}

/// `T = -46.85 + 175.72 * raw / 2^16`, status bits cleared first.
pub fn temperature_from_raw(raw: u16) -> f32 {
    let raw = raw & !STATUS_BITS;
    -46.85 + 175.72 * (raw as f32 / 65536.0)
}

/// `RH = -6 + 125 * raw / 2^16`, clamped to the physical range.
///
/// Raw values near the ends of the range convert to slightly below 0 % or
/// above 100 %; the datasheet treats both as saturation.
pub fn humidity_from_raw(raw: u16) -> f32 {
    let raw = raw & !STATUS_BITS;
    (-6.0 + 125.0 * (raw as f32 / 65536.0)).clamp(0.0, 100.0)
}

/// CRC-8 over the measurement bytes, polynomial x^8 + x^5 + x^4 + 1.
pub fn crc8(data: &[u8]) -> u8 {
    let mut crc = 0u8;
    for &byte in data {
        crc ^= byte;
        for _ in 0..8 {
            crc = if crc & 0x80 != 0 {
                (crc << 1) ^ CRC_POLYNOMIAL
            } else {
                crc << 1
            };
        }
    }
    crc
}

/// Non-blocking HTU21D driver.
///
/// One cycle measures temperature, then humidity, and only stores a reading
/// once both halves arrived intact.
pub struct Htu21d<I> {
    device: RegisterDevice<I>,
    state: SensorState<Htu21dStage>,
    timer: PollTimer,
    pending_temperature: Option<f32>,
    latest: Option<Htu21dReading>,
}

impl<I: I2c> Htu21d<I> {
    pub fn new(i2c: I, interval: Duration) -> Self {
        Self {
            device: RegisterDevice::new(i2c, HTU21D_ADDRESS),
            state: SensorState::Idle,
            timer: PollTimer::new(interval),
            pending_temperature: None,
            latest: None,
        }
    }

    /// Soft-reset the sensor and start polling.
    ///
    /// The first measurement starts one interval after `now`.
    pub fn init(&mut self, delay: &mut impl DelayNs, now: Instant) -> Result<(), SensorError> {
        self.device
            .write(&[CMD_SOFT_RESET])
            .map_err(|e| e.during(Self::NAME, "soft reset"))?;
        delay.delay_ms(SOFT_RESET_MS);

        self.timer.begin_cycle(now);
        self.state = SensorState::WaitingForInterval;
        info!("HTU21D: ready, polling every {} ms", self.timer.interval().as_millis());
        Ok(())
    }

    pub fn temperature(&self) -> Option<f32> {
        self.latest.map(|r| r.temperature_c)
    }

    pub fn humidity(&self) -> Option<f32> {
        self.latest.map(|r| r.humidity_percent)
    }

    pub fn release(self) -> I {
        self.device.release()
    }

    fn trigger(&mut self, stage: Htu21dStage, now: Instant) {
        match self.device.write(&[stage.command()]) {
            Ok(()) => {
                self.timer.enter_state(now);
                self.state = SensorState::WaitingForConversion(stage);
                debug!("HTU21D: {:?} conversion started", stage);
            }
            Err(e) => self.abandon(e.during(Self::NAME, stage.trigger_operation())),
        }
    }

    fn read_stage(&mut self, stage: Htu21dStage) -> Result<u16, SensorError> {
        let mut data = [0u8; 3];
        self.device
            .read(&mut data)
            .map_err(|e| e.during(Self::NAME, stage.read_operation()))?;

        if crc8(&data[..2]) != data[2] {
            return Err(SensorError::Checksum {
                sensor: Self::NAME,
                operation: stage.read_operation(),
            });
        }

        Ok(u16::from_be_bytes([data[0], data[1]]))
    }

    fn abandon(&mut self, error: SensorError) {
        warn!("{}; retrying next interval", error);
        self.pending_temperature = None;
        self.state = SensorState::WaitingForInterval;
    }
}

impl<I: I2c> PolledSensor for Htu21d<I> {
    type Stage = Htu21dStage;
    type Reading = Htu21dReading;

    const NAME: &'static str = "HTU21D";

    fn update(&mut self, now: Instant) {
        match self.state {
            SensorState::Idle => {}
            SensorState::WaitingForInterval => {
                if self.timer.interval_elapsed(now) {
                    self.timer.begin_cycle(now);
                    self.pending_temperature = None;
                    self.trigger(Htu21dStage::Temperature, now);
                }
            }
            SensorState::WaitingForConversion(stage) => {
                if !self.timer.waited(now, stage.conversion_time()) {
                    return;
                }

                let raw = match self.read_stage(stage) {
                    Ok(raw) => raw,
                    Err(e) => return self.abandon(e),
                };

                match stage {
                    Htu21dStage::Temperature => {
                        self.pending_temperature = Some(temperature_from_raw(raw));
                        self.trigger(Htu21dStage::Humidity, now);
                    }
                    Htu21dStage::Humidity => {
                        if let Some(temperature_c) = self.pending_temperature.take() {
                            let reading = Htu21dReading {
                                temperature_c,
                                humidity_percent: humidity_from_raw(raw),
                            };
                            debug!(
                                "HTU21D: {:.2} C, {:.2} %RH",
                                reading.temperature_c, reading.humidity_percent
                            );
                            self.latest = Some(reading);
                            self.timer.record_success(now);
                        }
                        self.state = SensorState::WaitingForInterval;
                    }
                }
            }
        }
    }

    fn state(&self) -> SensorState<Htu21dStage> {
        self.state
    }

    fn latest(&self) -> Option<Htu21dReading> {
        self.latest
    }

    fn last_success(&self) -> Option<Instant> {
        self.timer.last_success()
    }
}
