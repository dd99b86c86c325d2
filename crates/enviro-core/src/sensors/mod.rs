pub mod bme68x;
pub mod ccs811;
pub mod htu21d;
mod schedule;

use embassy_time::Instant;
use embedded_hal::i2c::ErrorKind;
use thiserror_no_std::Error;

pub use bme68x::{Bme68x, Bme68xReading};
pub use ccs811::{Ccs811, Ccs811Reading};
pub use htu21d::{Htu21d, Htu21dReading};
pub use schedule::{Monotonic, PollTimer, SystemMonotonic};

/// Maximum number of sensor values in a flattened sample.
pub const MAX_VALUES: usize = 10;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorError {
    #[error("{sensor}: I2C transaction failed during {operation} ({kind:?})")]
    Bus {
        sensor: &'static str,
        operation: &'static str,
        kind: ErrorKind,
    },
    #[error("{sensor}: checksum mismatch on {operation}")]
    Checksum {
        sensor: &'static str,
        operation: &'static str,
    },
    #[error("{sensor}: unexpected chip id {found}, expected {expected}")]
    UnexpectedChipId {
        sensor: &'static str,
        expected: u8,
        found: u8,
    },
    #[error("{sensor}: device reported error code {code}")]
    Device { sensor: &'static str, code: u8 },
    #[error("{sensor}: driver used before init")]
    NotInitialized { sensor: &'static str },
}

/// Where a sensor's acquisition cycle is parked between ticks.
///
/// Sending the trigger and reading the result are not resting states: they
/// happen inside the `update()` call that leaves `WaitingForInterval` or
/// `WaitingForConversion`, and any bus failure there lands the machine back
/// in `WaitingForInterval` before the call returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorState<S> {
    /// Not initialized; `update()` does nothing.
    Idle,
    /// Waiting for the poll interval to elapse.
    WaitingForInterval,
    /// A trigger for stage `S` is out; waiting for its conversion time.
    WaitingForConversion(S),
}

/// Result of a data phase that reached the device.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Outcome<T> {
    /// A new reading replaces the stored snapshot.
    Fresh(T),
    /// The device has nothing new yet; the stored snapshot stays.
    NoNewData,
}

/// A sensor driven one step at a time by the polling aggregator.
pub trait PolledSensor {
    /// Conversion stage the machine may be waiting on.
    type Stage: Copy + core::fmt::Debug;
    /// Snapshot stored after each successful cycle.
    type Reading: Copy;

    const NAME: &'static str;

    /// Advance the acquisition cycle by one step. Never blocks.
    fn update(&mut self, now: Instant);

    fn state(&self) -> SensorState<Self::Stage>;

    /// Latest snapshot, `None` until the first successful cycle.
    fn latest(&self) -> Option<Self::Reading>;

    /// Time of the last successful cycle.
    fn last_success(&self) -> Option<Instant>;
}

/// Trait for sensor reading data structures.
/// Provides compile-time guarantees about the number of values and their conversion to arrays.
pub trait SensorReadings<const COUNT: usize> {
    /// Convert the readings into milli-unit values; gas resistance stays in ohms.
    fn to_array(self) -> [i32; COUNT];
}

/// Where a reading with `COUNT` values lives in the flattened sample.
pub struct Slot<const START: usize, const COUNT: usize>;

impl<const START: usize, const COUNT: usize> Slot<START, COUNT> {
    /// Write the readings at this slot's indices.
    pub fn store<R: SensorReadings<COUNT>>(readings: R, values: &mut [i32; MAX_VALUES]) {
        values[START..START + COUNT].copy_from_slice(&readings.to_array());
    }

    pub const fn start_index() -> usize {
        START
    }

    pub const fn value_count() -> usize {
        COUNT
    }

    /// Absolute index of a value within this slot.
    pub const fn reading_index(offset: usize) -> usize {
        START + offset
    }
}

pub mod indices {
    use super::Slot;

    // Slots must not overlap; each reading type owns its range and nothing
    // checks this except the test below.
    pub type Htu21dSlot = Slot<0, 2>;
    pub type Ccs811Slot = Slot<2, 2>;
    pub type Bme68xSlot = Slot<4, 4>;
    pub type IaqSlot = Slot<8, 1>;

    pub const TEMPERATURE: usize = Htu21dSlot::reading_index(0);
    pub const HUMIDITY: usize = Htu21dSlot::reading_index(1);
    pub const CO2: usize = Ccs811Slot::reading_index(0);
    pub const TVOC: usize = Ccs811Slot::reading_index(1);
    pub const BME_TEMPERATURE: usize = Bme68xSlot::reading_index(0);
    pub const BME_HUMIDITY: usize = Bme68xSlot::reading_index(1);
    pub const PRESSURE: usize = Bme68xSlot::reading_index(2);
    /// Whole ohms, saturating at `i32::MAX`.
    pub const GAS_RESISTANCE: usize = Bme68xSlot::reading_index(3);
    pub const IAQ: usize = IaqSlot::reading_index(0);
}

pub use indices::*;

/// Scale an engineering value to milli-units for the values array.
pub(crate) fn to_milli(value: f32) -> i32 {
    (value * 1000.0) as i32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slots_do_not_overlap() {
        let ranges = [
            (Htu21dSlot::start_index(), Htu21dSlot::value_count()),
            (Ccs811Slot::start_index(), Ccs811Slot::value_count()),
            (Bme68xSlot::start_index(), Bme68xSlot::value_count()),
            (IaqSlot::start_index(), IaqSlot::value_count()),
        ];

        for window in ranges.windows(2) {
            let (start, count) = window[0];
            assert_eq!(start + count, window[1].0);
        }
        let (last_start, last_count) = ranges[ranges.len() - 1];
        assert!(last_start + last_count <= MAX_VALUES);
    }

    #[test]
    fn test_slot_store_writes_its_range_only() {
        struct Pair;
        impl SensorReadings<2> for Pair {
            fn to_array(self) -> [i32; 2] {
                [7, 9]
            }
        }

        let mut values = [0; MAX_VALUES];
        Ccs811Slot::store(Pair, &mut values);

        assert_eq!(values[CO2], 7);
        assert_eq!(values[TVOC], 9);
        assert_eq!(values.iter().filter(|v| **v != 0).count(), 2);
    }
}
