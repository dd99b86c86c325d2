//! Factory trimming coefficients and the floating-point compensation formulas.

/// First coefficient block, 0x8A..=0xA0.
pub const COEFF1_ADDR: u8 = 0x8A;
pub const COEFF1_LEN: usize = 23;
/// Second coefficient block, 0xE1..=0xEE.
pub const COEFF2_ADDR: u8 = 0xE1;
pub const COEFF2_LEN: usize = 14;
/// Heater trimming, 0x00..=0x04.
pub const COEFF3_ADDR: u8 = 0x00;
pub const COEFF3_LEN: usize = 5;
pub const COEFF_LEN: usize = COEFF1_LEN + COEFF2_LEN + COEFF3_LEN;

// Offsets into the concatenated coefficient blocks
const IDX_T2: usize = 0;
const IDX_T3: usize = 2;
const IDX_P1: usize = 4;
const IDX_P2: usize = 6;
const IDX_P3: usize = 8;
const IDX_P4: usize = 10;
const IDX_P5: usize = 12;
const IDX_P7: usize = 14;
const IDX_P6: usize = 15;
const IDX_P8: usize = 18;
const IDX_P9: usize = 20;
const IDX_P10: usize = 22;
const IDX_H2_MSB: usize = 23;
const IDX_H1_H2_LSB: usize = 24;
const IDX_H1_MSB: usize = 25;
const IDX_H3: usize = 26;
const IDX_H4: usize = 27;
const IDX_H5: usize = 28;
const IDX_H6: usize = 29;
const IDX_H7: usize = 30;
const IDX_T1: usize = 31;
const IDX_GH2: usize = 33;
const IDX_GH1: usize = 35;
const IDX_GH3: usize = 36;
const IDX_RES_HEAT_VAL: usize = 37;
const IDX_RES_HEAT_RANGE: usize = 39;
const IDX_RANGE_SW_ERR: usize = 41;

/// Heater set-points above this are clamped.
const MAX_HEATER_TEMPERATURE_C: u16 = 400;

const GAS_RANGE_K1: [f32; 16] = [
    0.0, 0.0, 0.0, 0.0, 0.0, -1.0, 0.0, -0.8, 0.0, 0.0, -0.2, -0.5, 0.0, -1.0, 0.0, 0.0,
];
const GAS_RANGE_K2: [f32; 16] = [
    0.0, 0.0, 0.0, 0.0, 0.1, 0.7, 0.0, -0.8, -0.1, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0,
];

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Calibration {
    pub par_t1: u16,
    pub par_t2: i16,
    pub par_t3: i8,
    pub par_p1: u16,
    pub par_p2: i16,
    pub par_p3: i8,
    pub par_p4: i16,
    pub par_p5: i16,
    pub par_p6: i8,
    pub par_p7: i8,
    pub par_p8: i16,
    pub par_p9: i16,
    pub par_p10: u8,
    pub par_h1: u16,
    pub par_h2: u16,
    pub par_h3: i8,
    pub par_h4: i8,
    pub par_h5: i8,
    pub par_h6: u8,
    pub par_h7: i8,
    pub par_gh1: i8,
    pub par_gh2: i16,
    pub par_gh3: i8,
    pub res_heat_val: i8,
    pub res_heat_range: u8,
    pub range_sw_err: i8,
}

fn u16_at(c: &[u8; COEFF_LEN], idx: usize) -> u16 {
    u16::from_le_bytes([c[idx], c[idx + 1]])
}

fn i16_at(c: &[u8; COEFF_LEN], idx: usize) -> i16 {
    i16::from_le_bytes([c[idx], c[idx + 1]])
}

impl Calibration {
    /// Decode the three coefficient blocks, concatenated in address order.
    pub fn from_coefficients(c: &[u8; COEFF_LEN]) -> Self {
        Self {
            par_t1: u16_at(c, IDX_T1),
            par_t2: i16_at(c, IDX_T2),
            par_t3: c[IDX_T3] as i8,
            par_p1: u16_at(c, IDX_P1),
            par_p2: i16_at(c, IDX_P2),
            par_p3: c[IDX_P3] as i8,
            par_p4: i16_at(c, IDX_P4),
            par_p5: i16_at(c, IDX_P5),
            par_p6: c[IDX_P6] as i8,
            par_p7: c[IDX_P7] as i8,
            par_p8: i16_at(c, IDX_P8),
            par_p9: i16_at(c, IDX_P9),
            par_p10: c[IDX_P10],
            // H1 and H2 share a nibble-split byte
            par_h1: (u16::from(c[IDX_H1_MSB]) << 4) | u16::from(c[IDX_H1_H2_LSB] & 0x0F),
            par_h2: (u16::from(c[IDX_H2_MSB]) << 4) | u16::from(c[IDX_H1_H2_LSB] >> 4),
            par_h3: c[IDX_H3] as i8,
            par_h4: c[IDX_H4] as i8,
            par_h5: c[IDX_H5] as i8,
            par_h6: c[IDX_H6],
            par_h7: c[IDX_H7] as i8,
            par_gh1: c[IDX_GH1] as i8,
            par_gh2: i16_at(c, IDX_GH2),
            par_gh3: c[IDX_GH3] as i8,
            res_heat_val: c[IDX_RES_HEAT_VAL] as i8,
            res_heat_range: (c[IDX_RES_HEAT_RANGE] & 0x30) >> 4,
            range_sw_err: ((c[IDX_RANGE_SW_ERR] & 0xF0) as i8) / 16,
        }
    }

    /// Compensated temperature in °C and the `t_fine` carried into the
    /// pressure and humidity formulas.
    pub fn temperature(&self, adc: u32) -> (f32, f32) {
        let adc = adc as f32;
        let t1 = f32::from(self.par_t1);

        let var1 = (adc / 16384.0 - t1 / 1024.0) * f32::from(self.par_t2);
        let delta = adc / 131072.0 - t1 / 8192.0;
        let var2 = delta * delta * (f32::from(self.par_t3) * 16.0);
        let t_fine = var1 + var2;

        (t_fine / 5120.0, t_fine)
    }

    /// Compensated pressure in Pa.
    pub fn pressure(&self, adc: u32, t_fine: f32) -> f32 {
        let mut var1 = t_fine / 2.0 - 64000.0;
        let mut var2 = var1 * var1 * (f32::from(self.par_p6) / 131072.0);
        var2 += var1 * f32::from(self.par_p5) * 2.0;
        var2 = var2 / 4.0 + f32::from(self.par_p4) * 65536.0;
        var1 = (f32::from(self.par_p3) * var1 * var1 / 16384.0 + f32::from(self.par_p2) * var1)
            / 524288.0;
        var1 = (1.0 + var1 / 32768.0) * f32::from(self.par_p1);

        // Uncalibrated part, nothing to divide by
        if var1 as i32 == 0 {
            return 0.0;
        }

        let mut pressure = 1048576.0 - adc as f32;
        pressure = (pressure - var2 / 4096.0) * 6250.0 / var1;
        let var1 = f32::from(self.par_p9) * pressure * pressure / 2147483648.0;
        let var2 = pressure * (f32::from(self.par_p8) / 32768.0);
        let scaled = pressure / 256.0;
        let var3 = scaled * scaled * scaled * (f32::from(self.par_p10) / 131072.0);

        pressure + (var1 + var2 + var3 + f32::from(self.par_p7) * 128.0) / 16.0
    }

    /// Compensated relative humidity in %, clamped to [0, 100].
    pub fn humidity(&self, adc: u16, t_fine: f32) -> f32 {
        let temp_comp = t_fine / 5120.0;

        let var1 = f32::from(adc)
            - (f32::from(self.par_h1) * 16.0 + f32::from(self.par_h3) / 2.0 * temp_comp);
        let var2 = var1
            * (f32::from(self.par_h2) / 262144.0
                * (1.0
                    + f32::from(self.par_h4) / 16384.0 * temp_comp
                    + f32::from(self.par_h5) / 1048576.0 * temp_comp * temp_comp));
        let var3 = f32::from(self.par_h6) / 16384.0;
        let var4 = f32::from(self.par_h7) / 2097152.0;

        (var2 + (var3 + var4 * temp_comp) * var2 * var2).clamp(0.0, 100.0)
    }

    /// Gas resistance in Ω for the low-range variant (BME680).
    pub fn gas_resistance_low(&self, adc: u16, range: u8) -> f32 {
        let range = usize::from(range & 0x0F);
        let var1 = 1340.0 + 5.0 * f32::from(self.range_sw_err);
        let var2 = var1 * (1.0 + GAS_RANGE_K1[range] / 100.0);
        let var3 = 1.0 + GAS_RANGE_K2[range] / 100.0;
        let range_factor = (1u32 << range) as f32;

        1.0 / (var3 * 0.000000125 * range_factor * ((f32::from(adc) - 512.0) / var2 + 1.0))
    }

    /// Gas resistance in Ω for the high-range variant (BME688).
    pub fn gas_resistance_high(&self, adc: u16, range: u8) -> f32 {
        let var1 = (262144u32 >> (range & 0x0F)) as f32;
        let var2 = ((i32::from(adc) - 512) * 3 + 4096) as f32;

        1000000.0 * var1 / var2
    }

    /// RES_HEAT_x register value for a heater set-point.
    pub fn heater_resistance(&self, target_c: u16, ambient_c: i8) -> u8 {
        let target = f32::from(target_c.min(MAX_HEATER_TEMPERATURE_C));

        let var1 = f32::from(self.par_gh1) / 16.0 + 49.0;
        let var2 = f32::from(self.par_gh2) / 32768.0 * 0.0005 + 0.00235;
        let var3 = f32::from(self.par_gh3) / 1024.0;
        let var4 = var1 * (1.0 + var2 * target);
        let var5 = var4 + var3 * f32::from(ambient_c);

        // Float-to-int casts saturate, which is what the register wants
        (3.4 * (var5
            * (4.0 / (4.0 + f32::from(self.res_heat_range)))
            * (1.0 / (1.0 + f32::from(self.res_heat_val) * 0.002))
            - 25.0)) as u8
    }
}

/// GAS_WAIT_x encoding for forced mode: 6-bit mantissa, 2-bit ×4 exponent.
pub fn gas_wait(duration_ms: u16) -> u8 {
    if duration_ms >= 0x0FC0 {
        return 0xFF;
    }
    encode_wait(u32::from(duration_ms))
}

/// GAS_WAIT_SHARED encoding for parallel mode, in 0.477 ms steps.
pub fn shared_heater_duration(duration_ms: u16) -> u8 {
    if duration_ms >= 0x0783 {
        return 0xFF;
    }
    encode_wait(u32::from(duration_ms) * 1000 / 477)
}

fn encode_wait(mut duration: u32) -> u8 {
    let mut factor = 0u8;
    while duration > 0x3F {
        duration /= 4;
        factor += 1;
    }
    duration as u8 + factor * 64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::typical_bme68x_coefficients;

    fn typical() -> Calibration {
        Calibration::from_coefficients(&typical_bme68x_coefficients())
    }

    #[test]
    fn test_coefficient_decoding() {
        let cal = typical();

        assert_eq!(cal.par_t1, 25949);
        assert_eq!(cal.par_t2, 26453);
        assert_eq!(cal.par_p2, -10430);
        assert_eq!(cal.par_p8, -2617);
        assert_eq!(cal.par_h1, 778);
        assert_eq!(cal.par_h2, 1017);
        assert_eq!(cal.par_h7, -100);
        assert_eq!(cal.par_gh2, -5969);
        assert_eq!(cal.res_heat_range, 1);
        assert_eq!(cal.range_sw_err, 0);
    }

    #[test]
    fn test_range_switching_error_is_signed() {
        let mut coefficients = typical_bme68x_coefficients();
        coefficients[IDX_RANGE_SW_ERR] = 0xF0;

        assert_eq!(Calibration::from_coefficients(&coefficients).range_sw_err, -1);
    }

    #[test]
    fn test_compensation_with_typical_trimming() {
        let cal = typical();

        let (temperature, t_fine) = cal.temperature(500_000);
        let pressure = cal.pressure(350_000, t_fine);
        let humidity = cal.humidity(20_000, t_fine);

        assert!((temperature - 26.75).abs() < 0.01, "got {temperature}");
        assert!((pressure - 100_886.0).abs() < 10.0, "got {pressure}");
        assert!((humidity - 37.99).abs() < 0.05, "got {humidity}");
    }

    #[test]
    fn test_humidity_is_clamped() {
        let cal = typical();
        let (_, t_fine) = cal.temperature(500_000);

        assert_eq!(cal.humidity(60_000, t_fine), 100.0);
        assert_eq!(cal.humidity(0, t_fine), 0.0);
    }

    #[test]
    fn test_gas_resistance_variants() {
        let cal = typical();

        let low = cal.gas_resistance_low(512, 5);
        assert!((low - 248_262.0).abs() < 50.0, "got {low}");
        assert_eq!(cal.gas_resistance_high(512, 5), 2_000_000.0);
    }

    #[test]
    fn test_heater_resistance() {
        let cal = typical();

        assert_eq!(cal.heater_resistance(320, 25), 119);
        assert_eq!(cal.heater_resistance(200, 25), 87);
        // Clamped at 400 C
        assert_eq!(cal.heater_resistance(450, 25), cal.heater_resistance(400, 25));
    }

    #[test]
    fn test_wait_encodings() {
        assert_eq!(gas_wait(63), 63);
        assert_eq!(gas_wait(64), 80);
        assert_eq!(gas_wait(100), 89);
        assert_eq!(gas_wait(4000), 254);
        assert_eq!(gas_wait(0x0FC0), 0xFF);

        assert_eq!(shared_heater_duration(140), 146);
        assert_eq!(shared_heater_duration(10), 20);
        assert_eq!(shared_heater_duration(0x0783), 0xFF);
    }
}
