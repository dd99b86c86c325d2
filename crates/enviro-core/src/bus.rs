//! Register-style I2C transactions
//!
//! Every sensor driver talks to its device through a [`RegisterDevice`].
//! Each method is exactly one bus transaction and is attempted once. NACKs,
//! arbitration loss and peripheral timeouts all collapse into a single
//! [`BusError`]; the caller decides what happens to its cycle.
//!
//! The per-call timeout belongs to the host I2C peripheral configuration
//! (the HAL's I2C `Config`), not to this module.

use embedded_hal::i2c::{Error as _, ErrorKind, I2c, SevenBitAddress};

use crate::sensors::SensorError;

/// Largest payload [`RegisterDevice::write_block`] accepts after the register byte.
pub const MAX_BLOCK_PAYLOAD: usize = 8;

/// A failed I2C transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BusError {
    pub address: SevenBitAddress,
    pub kind: ErrorKind,
}

impl BusError {
    /// Attach sensor and operation context for logging.
    pub fn during(self, sensor: &'static str, operation: &'static str) -> SensorError {
        SensorError::Bus {
            sensor,
            operation,
            kind: self.kind,
        }
    }
}

impl core::fmt::Display for BusError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "I2C 0x{:02X}: {:?}", self.address, self.kind)
    }
}

/// One device on an I2C bus, addressed by its 7-bit address.
pub struct RegisterDevice<I> {
    i2c: I,
    address: SevenBitAddress,
}

impl<I: I2c> RegisterDevice<I> {
    pub const fn new(i2c: I, address: SevenBitAddress) -> Self {
        Self { i2c, address }
    }

    pub const fn address(&self) -> SevenBitAddress {
        self.address
    }

    /// Write raw bytes (a command, or a register pointer followed by data).
    pub fn write(&mut self, bytes: &[u8]) -> Result<(), BusError> {
        let address = self.address;
        self.i2c
            .write(address, bytes)
            .map_err(|e| BusError { address, kind: e.kind() })
    }

    /// Read `buffer.len()` bytes without addressing a register first.
    pub fn read(&mut self, buffer: &mut [u8]) -> Result<(), BusError> {
        let address = self.address;
        self.i2c
            .read(address, buffer)
            .map_err(|e| BusError { address, kind: e.kind() })
    }

    /// Write `register`, then read `buffer.len()` bytes in the same transaction.
    pub fn read_register(&mut self, register: u8, buffer: &mut [u8]) -> Result<(), BusError> {
        let address = self.address;
        self.i2c
            .write_read(address, &[register], buffer)
            .map_err(|e| BusError { address, kind: e.kind() })
    }

    pub fn read_byte(&mut self, register: u8) -> Result<u8, BusError> {
        let mut buffer = [0u8; 1];
        self.read_register(register, &mut buffer)?;
        Ok(buffer[0])
    }

    pub fn write_register(&mut self, register: u8, value: u8) -> Result<(), BusError> {
        self.write(&[register, value])
    }

    /// Write `register` followed by up to [`MAX_BLOCK_PAYLOAD`] bytes.
    pub fn write_block(&mut self, register: u8, payload: &[u8]) -> Result<(), BusError> {
        let mut frame: heapless::Vec<u8, { MAX_BLOCK_PAYLOAD + 1 }> = heapless::Vec::new();
        if frame.push(register).is_err() || frame.extend_from_slice(payload).is_err() {
            return Err(BusError {
                address: self.address,
                kind: ErrorKind::Other,
            });
        }
        self.write(&frame)
    }

    /// Give the bus handle back.
    pub fn release(self) -> I {
        self.i2c
    }

    #[cfg(test)]
    pub(crate) fn bus_mut(&mut self) -> &mut I {
        &mut self.i2c
    }
}
