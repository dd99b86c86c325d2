use embassy_time::{Duration, Instant};
use embedded_hal::delay::DelayNs;
use embedded_hal::i2c::I2c;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use super::{Outcome, PollTimer, PolledSensor, SensorError, SensorReadings, SensorState};
use crate::bus::RegisterDevice;

pub const CCS811_ADDRESS: u8 = 0x5A;
pub const CCS811_ADDRESS_ALT: u8 = 0x5B;

const REG_MEAS_MODE: u8 = 0x01;
const REG_ALG_RESULT_DATA: u8 = 0x02;
const REG_ENV_DATA: u8 = 0x05;
const REG_BASELINE: u8 = 0x11;
const REG_HW_ID: u8 = 0x20;
const CMD_APP_START: u8 = 0xF4;

const HW_ID: u8 = 0x81;

const STATUS_ERROR: u8 = 0x01;
const STATUS_DATA_READY: u8 = 0x08;

/// The result registers are latched; no conversion time is needed between
/// setting the pointer and reading.
pub const RESULT_WAIT: Duration = Duration::from_millis(0);

const APP_START_MS: u32 = 1;

/// Measurement drive mode (MEAS_MODE bits 6:4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DriveMode {
    Idle = 0,
    #[default]
    ConstantPower1s = 1,
    Pulse10s = 2,
    LowPower60s = 3,
    ConstantPower250ms = 4,
}

impl DriveMode {
    pub const fn meas_mode(self) -> u8 {
        (self as u8) << 4
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ccs811Reading {
    pub eco2_ppm: u16,
    pub tvoc_ppb: u16,
}

impl SensorReadings<2> for Ccs811Reading {
    fn to_array(self) -> [i32; 2] {
        [
            i32::from(self.eco2_ppm) * 1000,
            i32::from(self.tvoc_ppb) * 1000,
        ]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ccs811Stage {
    AlgorithmResult,
}

/// ENV_DATA payload: humidity then `temperature + 25`, both in 1/512 units.
pub fn encode_environment(temperature_c: f32, humidity_percent: f32) -> [u8; 4] {
    let humidity = scale_512(humidity_percent.clamp(0.0, 100.0));
    let temperature = scale_512((temperature_c + 25.0).max(0.0));

    let [h_msb, h_lsb] = humidity.to_be_bytes();
    let [t_msb, t_lsb] = temperature.to_be_bytes();
    [h_msb, h_lsb, t_msb, t_lsb]
}

fn scale_512(value: f32) -> u16 {
    let scaled = value * 512.0 + 0.5;
    if scaled >= u16::MAX as f32 {
        u16::MAX
    } else {
        scaled as u16
    }
}

/// Non-blocking CCS811 driver.
pub struct Ccs811<I> {
    device: RegisterDevice<I>,
    drive_mode: DriveMode,
    state: SensorState<Ccs811Stage>,
    timer: PollTimer,
    pending_environment: Option<[u8; 4]>,
    latest: Option<Ccs811Reading>,
}

impl<I: I2c> Ccs811<I> {
    pub fn new(i2c: I, address: u8, interval: Duration, drive_mode: DriveMode) -> Self {
        Self {
            device: RegisterDevice::new(i2c, address),
            drive_mode,
            state: SensorState::Idle,
            timer: PollTimer::new(interval),
            pending_environment: None,
            latest: None,
        }
    }

    /// Check the hardware id, start the application firmware and set the
    /// drive mode.
    pub fn init(&mut self, delay: &mut impl DelayNs, now: Instant) -> Result<(), SensorError> {
        let hw_id = self
            .device
            .read_byte(REG_HW_ID)
            .map_err(|e| e.during(Self::NAME, "read hardware id"))?;
        if hw_id != HW_ID {
            return Err(SensorError::UnexpectedChipId {
                sensor: Self::NAME,
                expected: HW_ID,
                found: hw_id,
            });
        }

        self.device
            .write(&[CMD_APP_START])
            .map_err(|e| e.during(Self::NAME, "start application"))?;
        delay.delay_ms(APP_START_MS);

        self.device
            .write_register(REG_MEAS_MODE, self.drive_mode.meas_mode())
            .map_err(|e| e.during(Self::NAME, "set measurement mode"))?;

        self.timer.begin_cycle(now);
        self.state = SensorState::WaitingForInterval;
        info!("CCS811: ready, drive mode {:?}", self.drive_mode);
        Ok(())
    }

    /// Queue temperature and humidity for the next command phase.
    pub fn set_environment(&mut self, temperature_c: f32, humidity_percent: f32) {
        self.pending_environment = Some(encode_environment(temperature_c, humidity_percent));
    }

    /// Read the current algorithm baseline.
    ///
    /// Moves the register pointer, so an in-flight cycle is dropped.
    pub fn read_baseline(&mut self) -> Result<u16, SensorError> {
        self.ensure_initialized()?;
        self.interrupt_cycle();

        let mut data = [0u8; 2];
        self.device
            .read_register(REG_BASELINE, &mut data)
            .map_err(|e| e.during(Self::NAME, "read baseline"))?;
        Ok(u16::from_be_bytes(data))
    }

    /// Restore a baseline saved by [`Self::read_baseline`].
    pub fn write_baseline(&mut self, baseline: u16) -> Result<(), SensorError> {
        self.ensure_initialized()?;
        self.interrupt_cycle();

        self.device
            .write_block(REG_BASELINE, &baseline.to_be_bytes())
            .map_err(|e| e.during(Self::NAME, "write baseline"))?;
        debug!("CCS811: baseline 0x{:04X} restored", baseline);
        Ok(())
    }

    pub fn eco2(&self) -> Option<u16> {
        self.latest.map(|r| r.eco2_ppm)
    }

    pub fn tvoc(&self) -> Option<u16> {
        self.latest.map(|r| r.tvoc_ppb)
    }

    pub fn release(self) -> I {
        self.device.release()
    }

    fn ensure_initialized(&self) -> Result<(), SensorError> {
        match self.state {
            SensorState::Idle => Err(SensorError::NotInitialized { sensor: Self::NAME }),
            _ => Ok(()),
        }
    }

    fn interrupt_cycle(&mut self) {
        if let SensorState::WaitingForConversion(_) = self.state {
            debug!("CCS811: cycle interrupted by baseline access");
            self.state = SensorState::WaitingForInterval;
        }
    }

    fn trigger(&mut self, now: Instant) -> Result<(), SensorError> {
        if let Some(environment) = self.pending_environment {
            self.device
                .write_block(REG_ENV_DATA, &environment)
                .map_err(|e| e.during(Self::NAME, "write environment data"))?;
            self.pending_environment = None;
        }

        self.device
            .write(&[REG_ALG_RESULT_DATA])
            .map_err(|e| e.during(Self::NAME, "select result register"))?;
        self.timer.enter_state(now);
        Ok(())
    }

    fn read_result(&mut self) -> Result<Outcome<Ccs811Reading>, SensorError> {
        let mut data = [0u8; 8];
        self.device
            .read(&mut data)
            .map_err(|e| e.during(Self::NAME, "read algorithm result"))?;

        let status = data[4];
        if status & STATUS_ERROR != 0 {
            return Err(SensorError::Device {
                sensor: Self::NAME,
                code: data[5],
            });
        }
        if status & STATUS_DATA_READY == 0 {
            return Ok(Outcome::NoNewData);
        }

        Ok(Outcome::Fresh(Ccs811Reading {
            eco2_ppm: u16::from_be_bytes([data[0], data[1]]),
            tvoc_ppb: u16::from_be_bytes([data[2], data[3]]),
        }))
    }
}

impl<I: I2c> PolledSensor for Ccs811<I> {
    type Stage = Ccs811Stage;
    type Reading = Ccs811Reading;

    const NAME: &'static str = "CCS811";

    fn update(&mut self, now: Instant) {
        match self.state {
            SensorState::Idle => {}
            SensorState::WaitingForInterval => {
                if !self.timer.interval_elapsed(now) {
                    return;
                }
                self.timer.begin_cycle(now);
                match self.trigger(now) {
                    Ok(()) => {
                        self.state = SensorState::WaitingForConversion(Ccs811Stage::AlgorithmResult)
                    }
                    Err(e) => warn!("{}; retrying next interval", e),
                }
            }
            SensorState::WaitingForConversion(_) => {
                if !self.timer.waited(now, RESULT_WAIT) {
                    return;
                }
                match self.read_result() {
                    Ok(Outcome::Fresh(reading)) => {
                        debug!(
                            "CCS811: eCO2 {} ppm, TVOC {} ppb",
                            reading.eco2_ppm, reading.tvoc_ppb
                        );
                        self.latest = Some(reading);
                        self.timer.record_success(now);
                    }
                    Ok(Outcome::NoNewData) => debug!("CCS811: no new data"),
                    Err(e) => warn!("{}; retrying next interval", e),
                }
                self.state = SensorState::WaitingForInterval;
            }
        }
    }

    fn state(&self) -> SensorState<Ccs811Stage> {
        self.state
    }

    fn latest(&self) -> Option<Ccs811Reading> {
        self.latest
    }

    fn last_success(&self) -> Option<Instant> {
        self.timer.last_success()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{Ccs811Model, NoDelay, SimBus};

    fn ms(value: u64) -> Instant {
        Instant::from_millis(value)
    }

    fn sensor_with(model: Ccs811Model) -> Ccs811<SimBus> {
        Ccs811::new(
            SimBus::new().with_ccs811(model),
            CCS811_ADDRESS,
            Duration::from_millis(1000),
            DriveMode::ConstantPower1s,
        )
    }

    fn ready_sensor(model: Ccs811Model) -> Ccs811<SimBus> {
        let mut sensor = sensor_with(model);
        sensor.init(&mut NoDelay, ms(0)).unwrap();
        sensor
    }

    fn model(sensor: &mut Ccs811<SimBus>) -> &mut Ccs811Model {
        sensor.device.bus_mut().ccs811_mut().unwrap()
    }

    #[test]
    fn test_init_starts_app_and_sets_drive_mode() {
        let mut sensor = ready_sensor(Ccs811Model::default());

        assert_eq!(sensor.state(), SensorState::WaitingForInterval);
        assert!(model(&mut sensor).app_started());
        assert_eq!(model(&mut sensor).meas_mode(), 0x10);
    }

    #[test]
    fn test_init_rejects_unknown_hardware_id() {
        let mut sensor = sensor_with(Ccs811Model::default().with_hw_id(0x55));

        let error = sensor.init(&mut NoDelay, ms(0)).unwrap_err();

        assert_eq!(
            error,
            SensorError::UnexpectedChipId {
                sensor: "CCS811",
                expected: 0x81,
                found: 0x55,
            }
        );
        assert_eq!(sensor.state(), SensorState::Idle);
    }

    #[test]
    fn test_cycle_reads_result() {
        let mut sensor = ready_sensor(Ccs811Model::default());
        model(&mut sensor).publish(612, 35);

        sensor.update(ms(999));
        assert_eq!(sensor.state(), SensorState::WaitingForInterval);

        sensor.update(ms(1000));
        assert_eq!(
            sensor.state(),
            SensorState::WaitingForConversion(Ccs811Stage::AlgorithmResult)
        );

        sensor.update(ms(1010));
        assert_eq!(sensor.state(), SensorState::WaitingForInterval);
        assert_eq!(
            sensor.latest(),
            Some(Ccs811Reading {
                eco2_ppm: 612,
                tvoc_ppb: 35
            })
        );
        assert_eq!(sensor.last_success(), Some(ms(1010)));
    }

    #[test]
    fn test_data_not_ready_keeps_previous_reading() {
        let mut sensor = ready_sensor(Ccs811Model::default());
        model(&mut sensor).publish(450, 10);
        sensor.update(ms(1000));
        sensor.update(ms(1010));

        // The result registers were consumed; nothing new published
        sensor.update(ms(2000));
        sensor.update(ms(2010));

        assert_eq!(sensor.state(), SensorState::WaitingForInterval);
        assert_eq!(sensor.eco2(), Some(450));
        assert_eq!(sensor.last_success(), Some(ms(1010)));
    }

    #[test]
    fn test_device_error_abandons_cycle() {
        let mut sensor = ready_sensor(Ccs811Model::default());
        model(&mut sensor).publish(450, 10);
        model(&mut sensor).raise_error(0x02);

        sensor.update(ms(1000));
        sensor.update(ms(1010));

        assert_eq!(sensor.state(), SensorState::WaitingForInterval);
        assert_eq!(sensor.latest(), None);
    }

    #[test]
    fn test_trigger_failure_stays_waiting_for_interval() {
        let mut sensor = ready_sensor(Ccs811Model::default());
        model(&mut sensor).publish(450, 10);
        sensor.device.bus_mut().fail_next(CCS811_ADDRESS);

        sensor.update(ms(1000));

        assert_eq!(sensor.state(), SensorState::WaitingForInterval);
        sensor.update(ms(1500));
        assert_eq!(sensor.state(), SensorState::WaitingForInterval);
    }

    #[test]
    fn test_environment_is_written_once_in_command_phase() {
        let mut sensor = ready_sensor(Ccs811Model::default());
        sensor.set_environment(25.0, 50.0);

        assert_eq!(model(&mut sensor).environment(), None);
        sensor.update(ms(1000));
        assert_eq!(model(&mut sensor).environment(), Some([0x64, 0x00, 0x64, 0x00]));
        assert_eq!(sensor.pending_environment, None);
    }

    #[test]
    fn test_environment_encoding() {
        assert_eq!(encode_environment(25.0, 48.5), [0x61, 0x00, 0x64, 0x00]);
        assert_eq!(encode_environment(-40.0, -3.0), [0x00, 0x00, 0x00, 0x00]);
    }

    #[test]
    fn test_baseline_round_trip() {
        let mut sensor = ready_sensor(Ccs811Model::default());

        sensor.write_baseline(0x847B).unwrap();

        assert_eq!(model(&mut sensor).baseline(), 0x847B);
        assert_eq!(sensor.read_baseline(), Ok(0x847B));
    }

    #[test]
    fn test_baseline_access_interrupts_cycle() {
        let mut sensor = ready_sensor(Ccs811Model::default());
        model(&mut sensor).publish(450, 10);
        sensor.update(ms(1000));

        sensor.read_baseline().unwrap();

        assert_eq!(sensor.state(), SensorState::WaitingForInterval);
        assert_eq!(sensor.latest(), None);
    }

    #[test]
    fn test_baseline_requires_init() {
        let mut sensor = sensor_with(Ccs811Model::default());

        assert_eq!(
            sensor.read_baseline(),
            Err(SensorError::NotInitialized { sensor: "CCS811" })
        );
    }

    #[test]
    fn test_drive_mode_register_values() {
        assert_eq!(DriveMode::Idle.meas_mode(), 0x00);
        assert_eq!(DriveMode::ConstantPower1s.meas_mode(), 0x10);
        assert_eq!(DriveMode::ConstantPower250ms.meas_mode(), 0x40);
    }

    #[test]
    fn test_result_read_failure_keeps_previous_reading() {
        let mut sensor = ready_sensor(Ccs811Model::default());
        model(&mut sensor).publish(450, 10);
        sensor.update(ms(1000));
        sensor.update(ms(1010));

        model(&mut sensor).publish(700, 60);
        sensor.update(ms(2000));
        sensor.device.bus_mut().fail_next(CCS811_ADDRESS);
        sensor.update(ms(2010));

        assert_eq!(sensor.state(), SensorState::WaitingForInterval);
        assert_eq!(sensor.eco2(), Some(450));
        assert_eq!(sensor.last_success(), Some(ms(1010)));

        // The unread result is picked up by the next cycle
        sensor.update(ms(3000));
        sensor.update(ms(3010));
        assert_eq!(sensor.eco2(), Some(700));
    }

    #[test]
    fn test_alternate_address() {
        let mut sensor = Ccs811::new(
            SimBus::new().with_ccs811(Ccs811Model::default().with_address(CCS811_ADDRESS_ALT)),
            CCS811_ADDRESS_ALT,
            Duration::from_millis(1000),
            DriveMode::ConstantPower1s,
        );
        sensor.init(&mut NoDelay, ms(0)).unwrap();
        model(&mut sensor).publish(530, 22);

        sensor.update(ms(1000));
        sensor.update(ms(1010));

        assert_eq!(sensor.tvoc(), Some(22));
    }
}
