//! Register-level sensor models on a simulated I2C bus
//!
//! Used by the unit tests and, behind the `sim` feature, by the desktop
//! simulator. Each model answers at its datasheet address and keeps just
//! enough register state to drive the real drivers through full cycles.

use embedded_hal::delay::DelayNs;
use embedded_hal::i2c::{self, ErrorKind, ErrorType, I2c, NoAcknowledgeSource, Operation};
use heapless::Vec;

use crate::sensors::bme68x::calibration::{
    COEFF_LEN, COEFF1_ADDR, COEFF1_LEN, COEFF2_ADDR, COEFF2_LEN, COEFF3_ADDR,
};
use crate::sensors::bme68x::{BME68X_ADDRESS_LOW, FIELD_COUNT, FIELD_LENGTH};
use crate::sensors::ccs811::CCS811_ADDRESS;
use crate::sensors::htu21d::{HTU21D_ADDRESS, crc8};

/// Delay that returns immediately.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoDelay;

impl DelayNs for NoDelay {
    fn delay_ns(&mut self, _ns: u32) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimError(pub ErrorKind);

impl i2c::Error for SimError {
    fn kind(&self) -> ErrorKind {
        self.0
    }
}

const NACK: SimError = SimError(ErrorKind::NoAcknowledge(NoAcknowledgeSource::Address));

trait SimDevice {
    fn write(&mut self, bytes: &[u8]);
    fn read(&mut self, buffer: &mut [u8]);
}

/// A simulated bus with up to one of each sensor attached.
#[derive(Debug, Default)]
pub struct SimBus {
    htu21d: Option<Htu21dModel>,
    ccs811: Option<Ccs811Model>,
    bme68x: Option<Bme68xModel>,
    pending_failures: Vec<u8, 8>,
    offline: Vec<u8, 4>,
    transactions: usize,
}

impl SimBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_htu21d(mut self, model: Htu21dModel) -> Self {
        self.htu21d = Some(model);
        self
    }

    pub fn with_ccs811(mut self, model: Ccs811Model) -> Self {
        self.ccs811 = Some(model);
        self
    }

    pub fn with_bme68x(mut self, model: Bme68xModel) -> Self {
        self.bme68x = Some(model);
        self
    }

    pub fn htu21d_mut(&mut self) -> Option<&mut Htu21dModel> {
        self.htu21d.as_mut()
    }

    pub fn ccs811_mut(&mut self) -> Option<&mut Ccs811Model> {
        self.ccs811.as_mut()
    }

    pub fn bme68x_mut(&mut self) -> Option<&mut Bme68xModel> {
        self.bme68x.as_mut()
    }

    /// NACK the next transaction addressed to `address`, once.
    pub fn fail_next(&mut self, address: u8) {
        let _ = self.pending_failures.push(address);
    }

    /// NACK every transaction to `address` until brought back online.
    pub fn set_offline(&mut self, address: u8, offline: bool) {
        self.offline.retain(|a| *a != address);
        if offline {
            let _ = self.offline.push(address);
        }
    }

    /// Transactions attempted so far, failed ones included.
    pub fn transactions(&self) -> usize {
        self.transactions
    }

    fn device(&mut self, address: u8) -> Option<&mut dyn SimDevice> {
        if address == HTU21D_ADDRESS {
            if let Some(model) = self.htu21d.as_mut() {
                return Some(model);
            }
        }
        if let Some(model) = self.ccs811.as_mut().filter(|m| m.address == address) {
            return Some(model);
        }
        match self.bme68x.as_mut() {
            Some(model) if model.address == address => Some(model),
            _ => None,
        }
    }
}

impl ErrorType for SimBus {
    type Error = SimError;
}

impl I2c for SimBus {
    fn transaction(
        &mut self,
        address: u8,
        operations: &mut [Operation<'_>],
    ) -> Result<(), Self::Error> {
        self.transactions += 1;

        if let Some(pos) = self.pending_failures.iter().position(|a| *a == address) {
            self.pending_failures.swap_remove(pos);
            return Err(NACK);
        }
        if self.offline.contains(&address) {
            return Err(NACK);
        }

        let device = self.device(address).ok_or(NACK)?;
        for operation in operations {
            match operation {
                Operation::Write(bytes) => device.write(bytes),
                Operation::Read(buffer) => device.read(buffer),
            }
        }
        Ok(())
    }
}

// ============================================================================
// HTU21D
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Htu21dCommand {
    Temperature,
    Humidity,
}

#[derive(Debug, Clone)]
pub struct Htu21dModel {
    temperature_raw: u16,
    humidity_raw: u16,
    pending: Option<Htu21dCommand>,
    corrupt_crc: bool,
    resets: u32,
}

impl Default for Htu21dModel {
    fn default() -> Self {
        let mut model = Self {
            temperature_raw: 0,
            humidity_raw: 0,
            pending: None,
            corrupt_crc: false,
            resets: 0,
        };
        model.set_temperature(21.0);
        model.set_humidity(45.0);
        model
    }
}

impl Htu21dModel {
    pub fn set_temperature(&mut self, celsius: f32) {
        let raw = (celsius + 46.85) / 175.72 * 65536.0;
        self.temperature_raw = (raw as u16) & !0x0003;
    }

    pub fn set_humidity(&mut self, percent: f32) {
        let raw = (percent + 6.0) / 125.0 * 65536.0;
        // Status bit 1 marks a humidity result
        self.humidity_raw = ((raw as u16) & !0x0003) | 0x0002;
    }

    /// Flip the checksum byte of every response.
    pub fn corrupt_crc(&mut self, corrupt: bool) {
        self.corrupt_crc = corrupt;
    }

    pub fn resets(&self) -> u32 {
        self.resets
    }
}

impl SimDevice for Htu21dModel {
    fn write(&mut self, bytes: &[u8]) {
        match bytes.first() {
            Some(0xF3) => self.pending = Some(Htu21dCommand::Temperature),
            Some(0xF5) => self.pending = Some(Htu21dCommand::Humidity),
            Some(0xFE) => {
                self.pending = None;
                self.resets += 1;
            }
            _ => {}
        }
    }

    fn read(&mut self, buffer: &mut [u8]) {
        let raw = match self.pending.take() {
            Some(Htu21dCommand::Temperature) => self.temperature_raw,
            Some(Htu21dCommand::Humidity) => self.humidity_raw,
            None => 0xFFFF,
        };
        let [msb, lsb] = raw.to_be_bytes();
        let mut crc = crc8(&[msb, lsb]);
        if self.corrupt_crc {
            crc = !crc;
        }
        for (dst, src) in buffer.iter_mut().zip([msb, lsb, crc]) {
            *dst = src;
        }
    }
}

// ============================================================================
// CCS811
// ============================================================================

#[derive(Debug, Clone)]
pub struct Ccs811Model {
    address: u8,
    hw_id: u8,
    pointer: u8,
    app_started: bool,
    meas_mode: u8,
    eco2: u16,
    tvoc: u16,
    data_ready: bool,
    error_id: u8,
    baseline: u16,
    environment: Option<[u8; 4]>,
}

impl Default for Ccs811Model {
    fn default() -> Self {
        Self {
            address: CCS811_ADDRESS,
            hw_id: 0x81,
            pointer: 0,
            app_started: false,
            meas_mode: 0,
            eco2: 400,
            tvoc: 0,
            data_ready: false,
            error_id: 0,
            baseline: 0,
            environment: None,
        }
    }
}

impl Ccs811Model {
    /// Answer at the ADDR-high address instead of the default.
    pub fn with_address(mut self, address: u8) -> Self {
        self.address = address;
        self
    }

    pub fn with_hw_id(mut self, hw_id: u8) -> Self {
        self.hw_id = hw_id;
        self
    }

    /// Make a new result available; cleared by the next result read.
    pub fn publish(&mut self, eco2: u16, tvoc: u16) {
        self.eco2 = eco2;
        self.tvoc = tvoc;
        self.data_ready = true;
    }

    /// Set ERROR_ID; zero clears the error.
    pub fn raise_error(&mut self, error_id: u8) {
        self.error_id = error_id;
    }

    pub fn app_started(&self) -> bool {
        self.app_started
    }

    pub fn meas_mode(&self) -> u8 {
        self.meas_mode
    }

    pub fn environment(&self) -> Option<[u8; 4]> {
        self.environment
    }

    pub fn baseline(&self) -> u16 {
        self.baseline
    }

    fn status(&self) -> u8 {
        let mut status = 0x10;
        if self.app_started {
            status |= 0x80;
        }
        if self.data_ready {
            status |= 0x08;
        }
        if self.error_id != 0 {
            status |= 0x01;
        }
        status
    }
}

impl SimDevice for Ccs811Model {
    fn write(&mut self, bytes: &[u8]) {
        let Some((&register, payload)) = bytes.split_first() else {
            return;
        };
        self.pointer = register;

        match (register, payload) {
            (0xF4, _) => self.app_started = true,
            (0x01, [mode, ..]) => self.meas_mode = *mode,
            (0x05, [h_msb, h_lsb, t_msb, t_lsb, ..]) => {
                self.environment = Some([*h_msb, *h_lsb, *t_msb, *t_lsb]);
            }
            (0x11, [msb, lsb, ..]) => self.baseline = u16::from_be_bytes([*msb, *lsb]),
            _ => {}
        }
    }

    fn read(&mut self, buffer: &mut [u8]) {
        let mut data = [0u8; 8];
        match self.pointer {
            0x00 => data[0] = self.status(),
            0x01 => data[0] = self.meas_mode,
            0x02 => {
                data[..2].copy_from_slice(&self.eco2.to_be_bytes());
                data[2..4].copy_from_slice(&self.tvoc.to_be_bytes());
                data[4] = self.status();
                data[5] = self.error_id;
                self.data_ready = false;
            }
            0x11 => data[..2].copy_from_slice(&self.baseline.to_be_bytes()),
            0x20 => data[0] = self.hw_id,
            0xE0 => data[0] = self.error_id,
            _ => {}
        }
        for (dst, src) in buffer.iter_mut().zip(data) {
            *dst = src;
        }
    }
}

// ============================================================================
// BME68x
// ============================================================================

const BME_REG_FIELD0: usize = 0x1D;
const BME_REG_CTRL_MEAS: u8 = 0x74;
const BME_REG_SOFT_RESET: u8 = 0xE0;
const BME_REG_CHIP_ID: usize = 0xD0;
const BME_REG_VARIANT_ID: usize = 0xF0;

/// Raw contents of one field, latched on the next mode write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimField {
    pub new_data: bool,
    pub gas_valid: bool,
    pub heat_stable: bool,
    pub gas_index: u8,
    pub temperature_adc: u32,
    pub pressure_adc: u32,
    pub humidity_adc: u16,
    pub gas_adc: u16,
    pub gas_range: u8,
}

impl SimField {
    /// About 26.8 C, 38 %RH, 1009 hPa and 248 kOhm with typical trimming.
    pub const fn valid() -> Self {
        Self {
            new_data: true,
            gas_valid: true,
            heat_stable: true,
            gas_index: 0,
            temperature_adc: 500_000,
            pressure_adc: 350_000,
            humidity_adc: 20_000,
            gas_adc: 512,
            gas_range: 5,
        }
    }

    fn encode(&self, variant_high: bool, out: &mut [u8]) {
        let adc20 = |adc: u32| [(adc >> 12) as u8, (adc >> 4) as u8, ((adc << 4) & 0xF0) as u8];

        out[0] = (if self.new_data { 0x80 } else { 0 }) | (self.gas_index & 0x0F);
        out[2..5].copy_from_slice(&adc20(self.pressure_adc));
        out[5..8].copy_from_slice(&adc20(self.temperature_adc));
        out[8..10].copy_from_slice(&self.humidity_adc.to_be_bytes());

        let mut gas_lsb = ((self.gas_adc & 0x03) as u8) << 6 | (self.gas_range & 0x0F);
        if self.gas_valid {
            gas_lsb |= 0x20;
        }
        if self.heat_stable {
            gas_lsb |= 0x10;
        }
        let gas = [(self.gas_adc >> 2) as u8, gas_lsb];
        if variant_high {
            out[15..17].copy_from_slice(&gas);
        } else {
            out[13..15].copy_from_slice(&gas);
        }
    }
}

/// Trimming coefficients in register order, close to a real part's.
pub fn typical_bme68x_coefficients() -> [u8; COEFF_LEN] {
    let mut c = [0u8; COEFF_LEN];
    let mut put = |idx: usize, value: [u8; 2]| c[idx..idx + 2].copy_from_slice(&value);

    put(0, 26453i16.to_le_bytes());
    put(4, 36243u16.to_le_bytes());
    put(6, (-10430i16).to_le_bytes());
    put(10, 6945i16.to_le_bytes());
    put(12, (-120i16).to_le_bytes());
    put(18, (-2617i16).to_le_bytes());
    put(20, (-4039i16).to_le_bytes());
    put(31, 25949u16.to_le_bytes());
    put(33, (-5969i16).to_le_bytes());

    c[2] = 3;
    c[8] = 88;
    c[14] = 15;
    c[15] = 30;
    c[22] = 30;
    // H2 = 0x3F9, H1 = 0x30A
    c[23] = 0x3F;
    c[24] = 0x9A;
    c[25] = 0x30;
    c[26] = 0;
    c[27] = 45;
    c[28] = 20;
    c[29] = 120;
    c[30] = -100i8 as u8;
    c[35] = -30i8 as u8;
    c[36] = 18;
    c[37] = 44;
    c[39] = 0x10;
    c
}

#[derive(Debug, Clone)]
pub struct Bme68xModel {
    address: u8,
    registers: [u8; 256],
    pointer: u8,
    staged: Vec<SimField, FIELD_COUNT>,
    last_mode: u8,
}

impl Default for Bme68xModel {
    fn default() -> Self {
        let mut registers = [0u8; 256];
        registers[BME_REG_CHIP_ID] = 0x61;

        let c = typical_bme68x_coefficients();
        let (first, rest) = c.split_at(COEFF1_LEN);
        let (second, third) = rest.split_at(COEFF2_LEN);
        for (addr, block) in [(COEFF1_ADDR, first), (COEFF2_ADDR, second), (COEFF3_ADDR, third)] {
            let start = usize::from(addr);
            registers[start..start + block.len()].copy_from_slice(block);
        }

        Self {
            address: BME68X_ADDRESS_LOW,
            registers,
            pointer: 0,
            staged: Vec::new(),
            last_mode: 0,
        }
    }
}

impl Bme68xModel {
    pub fn with_address(mut self, address: u8) -> Self {
        self.address = address;
        self
    }

    /// 0 for the low gas range part (BME680), 1 for the high (BME688).
    pub fn with_variant(mut self, variant_id: u8) -> Self {
        self.registers[BME_REG_VARIANT_ID] = variant_id;
        self
    }

    pub fn with_chip_id(mut self, chip_id: u8) -> Self {
        self.registers[BME_REG_CHIP_ID] = chip_id;
        self
    }

    pub fn register(&self, register: u8) -> u8 {
        self.registers[usize::from(register)]
    }

    /// Mode bits of the last write that started a measurement.
    pub fn last_mode(&self) -> u8 {
        self.last_mode
    }

    /// Fields produced by the next measurement. Unset slots come back
    /// without the new-data bit.
    pub fn stage_fields(&mut self, fields: &[SimField]) {
        self.staged.clear();
        for field in fields.iter().take(FIELD_COUNT) {
            let _ = self.staged.push(*field);
        }
    }

    fn write_register(&mut self, register: u8, value: u8) {
        if register == BME_REG_SOFT_RESET && value == 0xB6 {
            self.registers[0x5A..=0x75].fill(0);
            return;
        }
        self.registers[usize::from(register)] = value;
        if register == BME_REG_CTRL_MEAS && value & 0x03 != 0 {
            self.measure(value & 0x03);
        }
    }

    fn measure(&mut self, mode: u8) {
        self.last_mode = mode;
        let variant_high = self.registers[BME_REG_VARIANT_ID] != 0;
        for slot in 0..FIELD_COUNT {
            let start = BME_REG_FIELD0 + slot * FIELD_LENGTH;
            let out = &mut self.registers[start..start + FIELD_LENGTH];
            match self.staged.get(slot) {
                Some(field) => field.encode(variant_high, out),
                None => out[0] &= !0x80,
            }
        }
        self.staged.clear();

        // Forced mode drops back to sleep
        if mode == 0x01 {
            self.registers[usize::from(BME_REG_CTRL_MEAS)] &= !0x03;
        }
    }
}

impl SimDevice for Bme68xModel {
    fn write(&mut self, bytes: &[u8]) {
        match bytes {
            [register] => self.pointer = *register,
            _ => {
                for pair in bytes.chunks_exact(2) {
                    self.write_register(pair[0], pair[1]);
                }
            }
        }
    }

    fn read(&mut self, buffer: &mut [u8]) {
        for (i, byte) in buffer.iter_mut().enumerate() {
            *byte = self.registers[usize::from(self.pointer.wrapping_add(i as u8))];
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_address_nacks() {
        let mut bus = SimBus::new();

        assert_eq!(bus.write(0x10, &[0x00]), Err(NACK));
        assert_eq!(bus.transactions(), 1);
    }

    #[test]
    fn test_offline_device_nacks_until_restored() {
        let mut bus = SimBus::new().with_htu21d(Htu21dModel::default());
        bus.set_offline(HTU21D_ADDRESS, true);

        assert!(bus.write(HTU21D_ADDRESS, &[0xF3]).is_err());
        assert!(bus.write(HTU21D_ADDRESS, &[0xF3]).is_err());

        bus.set_offline(HTU21D_ADDRESS, false);
        assert!(bus.write(HTU21D_ADDRESS, &[0xF3]).is_ok());
    }

    #[test]
    fn test_htu21d_model_answers_with_valid_crc() {
        let mut bus = SimBus::new().with_htu21d(Htu21dModel::default());
        let mut data = [0u8; 3];

        bus.write(HTU21D_ADDRESS, &[0xF5]).unwrap();
        bus.read(HTU21D_ADDRESS, &mut data).unwrap();

        assert_eq!(crc8(&data[..2]), data[2]);
        assert_eq!(data[1] & 0x02, 0x02);
    }

    #[test]
    fn test_bme68x_model_auto_increments_reads() {
        let mut bus = SimBus::new().with_bme68x(Bme68xModel::default());
        let mut data = [0u8; 2];

        bus.write_read(BME68X_ADDRESS_LOW, &[COEFF1_ADDR], &mut data)
            .unwrap();

        assert_eq!(i16::from_le_bytes(data), 26453);
    }
}
