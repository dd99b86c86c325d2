//! Sensor management and state

use core::cell::RefCell;

use embassy_time::Instant;
use embedded_hal::delay::DelayNs;
use embedded_hal::i2c::I2c;
use embedded_hal_bus::i2c::RefCellDevice;
use log::{error, info};

use crate::config::SensorsConfig;
use crate::metrics::{AirQuality, IaqParams};
use crate::sensors::{
    Bme68x, Bme68xReading, Bme68xSlot, Ccs811, Ccs811Reading, Ccs811Slot, Htu21d,
    Htu21dReading, Htu21dSlot, IaqSlot, MAX_VALUES, Monotonic, PolledSensor, SensorError,
};
use crate::storage::BaselineRecord;

/// Latest reading of every sensor at one point in time.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Snapshot {
    pub htu21d: Option<Htu21dReading>,
    pub ccs811: Option<Ccs811Reading>,
    pub bme68x: Option<Bme68xReading>,
    pub air_quality: Option<AirQuality>,
}

/// Container for all sensor instances
///
/// Owns one driver per enabled sensor and steps them in a fixed order
/// (HTU21D, CCS811, BME68x) from the firmware's housekeeping tick. Each
/// driver holds its own handle to the shared bus; since the drivers run one
/// after another, only one transaction is ever in flight.
///
/// Sensors compiled out via their `sensor-*` feature, or disabled in the
/// config, are never constructed and their readings stay `None`.
pub struct SensorsState<I> {
    htu21d: Option<Htu21d<I>>,
    ccs811: Option<Ccs811<I>>,
    bme68x: Option<Bme68x<I>>,
    environment_compensation: bool,
    compensated_from: Option<Instant>,
    iaq: IaqParams,
}

impl<'a, B: I2c> SensorsState<RefCellDevice<'a, B>> {
    /// Build the drivers on one bus shared through a `RefCell`.
    pub fn on_shared_bus(bus: &'a RefCell<B>, config: &SensorsConfig) -> Self {
        Self::new(config, || RefCellDevice::new(bus))
    }
}

impl<I: I2c> SensorsState<I> {
    /// Create the enabled drivers, taking one bus handle for each.
    pub fn new(config: &SensorsConfig, mut bus: impl FnMut() -> I) -> Self {
        let htu21d = (cfg!(feature = "sensor-htu21d") && config.htu21d.enabled)
            .then(|| Htu21d::new(bus(), config.htu21d.interval()));
        let ccs811 = (cfg!(feature = "sensor-ccs811") && config.ccs811.enabled).then(|| {
            Ccs811::new(
                bus(),
                config.ccs811.address,
                config.ccs811.interval(),
                config.ccs811.drive_mode,
            )
        });
        let bme68x = (cfg!(feature = "sensor-bme68x") && config.bme68x.enabled).then(|| {
            Bme68x::new(
                bus(),
                config.bme68x.address,
                config.bme68x.interval(),
                config.bme68x.settings.clone(),
            )
        });

        Self {
            htu21d,
            ccs811,
            bme68x,
            environment_compensation: config.ccs811.environment_compensation,
            compensated_from: None,
            iaq: config.iaq,
        }
    }

    /// Initialize every sensor.
    ///
    /// A sensor that fails stays idle while the others carry on; the first
    /// failure is returned so the host can report it.
    pub fn init(&mut self, delay: &mut impl DelayNs, now: Instant) -> Result<(), SensorError> {
        let mut first_error = None;
        let mut record = |result: Result<(), SensorError>| {
            if let Err(e) = result {
                error!("Sensor init failed: {}", e);
                first_error.get_or_insert(e);
            }
        };

        if let Some(sensor) = self.htu21d.as_mut() {
            record(sensor.init(delay, now));
        }
        if let Some(sensor) = self.ccs811.as_mut() {
            record(sensor.init(delay, now));
        }
        if let Some(sensor) = self.bme68x.as_mut() {
            record(sensor.init(delay, now));
        }

        match first_error {
            Some(e) => Err(e),
            None => {
                info!("All enabled sensors initialized");
                Ok(())
            }
        }
    }

    /// Step every sensor once.
    pub fn poll(&mut self, now: Instant) {
        if let Some(sensor) = self.htu21d.as_mut() {
            sensor.update(now);
        }
        self.feed_environment();
        if let Some(sensor) = self.ccs811.as_mut() {
            sensor.update(now);
        }
        if let Some(sensor) = self.bme68x.as_mut() {
            sensor.update(now);
        }
    }

    /// Read the clock and step every sensor once.
    pub fn tick(&mut self, clock: &impl Monotonic) {
        self.poll(clock.now());
    }

    /// Hand a fresh HTU21D reading to the CCS811, once per reading.
    fn feed_environment(&mut self) {
        if !self.environment_compensation {
            return;
        }
        let (Some(htu), Some(ccs)) = (self.htu21d.as_ref(), self.ccs811.as_mut()) else {
            return;
        };
        let (Some(reading), Some(at)) = (htu.latest(), htu.last_success()) else {
            return;
        };
        if self.compensated_from != Some(at) {
            ccs.set_environment(reading.temperature_c, reading.humidity_percent);
            self.compensated_from = Some(at);
        }
    }

    pub fn htu21d(&self) -> Option<Htu21dReading> {
        self.htu21d.as_ref().and_then(|sensor| sensor.latest())
    }

    pub fn ccs811(&self) -> Option<Ccs811Reading> {
        self.ccs811.as_ref().and_then(|sensor| sensor.latest())
    }

    pub fn bme68x(&self) -> Option<Bme68xReading> {
        self.bme68x.as_ref().and_then(|sensor| sensor.latest())
    }

    /// Air quality from the latest BME68x reading with valid gas data.
    pub fn air_quality(&self) -> Option<AirQuality> {
        self.bme68x()
            .filter(|r| r.gas_valid)
            .map(|r| AirQuality::assess(&self.iaq, r.gas_resistance_ohms, r.humidity_percent as i32))
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            htu21d: self.htu21d(),
            ccs811: self.ccs811(),
            bme68x: self.bme68x(),
            air_quality: self.air_quality(),
        }
    }

    /// All readings at their fixed indices (milli-units, gas in ohms); missing
    /// ones stay 0.
    pub fn values(&self) -> [i32; MAX_VALUES] {
        let mut values = [0_i32; MAX_VALUES];
        if let Some(reading) = self.htu21d() {
            Htu21dSlot::store(reading, &mut values);
        }
        if let Some(reading) = self.ccs811() {
            Ccs811Slot::store(reading, &mut values);
        }
        if let Some(reading) = self.bme68x() {
            Bme68xSlot::store(reading, &mut values);
        }
        if let Some(quality) = self.air_quality() {
            IaqSlot::store(quality, &mut values);
        }
        values
    }

    /// Current CCS811 baseline, ready to persist. `None` without a CCS811.
    pub fn ccs811_baseline(&mut self) -> Result<Option<BaselineRecord>, SensorError> {
        match self.ccs811.as_mut() {
            Some(sensor) => Ok(Some(BaselineRecord::new(sensor.read_baseline()?))),
            None => Ok(None),
        }
    }

    /// Write a persisted baseline back to the CCS811, if there is one.
    pub fn restore_ccs811_baseline(&mut self, record: &BaselineRecord) -> Result<(), SensorError> {
        match self.ccs811.as_mut() {
            Some(sensor) => sensor.write_baseline(record.baseline),
            None => Ok(()),
        }
    }
}
