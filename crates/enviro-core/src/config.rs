use embassy_time::Duration;
use serde::{Deserialize, Serialize};
use thiserror_no_std::Error;

use crate::metrics::IaqParams;
use crate::sensors::bme68x::{BME68X_ADDRESS_LOW, Bme68xSettings};
use crate::sensors::ccs811::{CCS811_ADDRESS, DriveMode};

/// Default time between two poll cycles of one sensor.
pub const DEFAULT_INTERVAL_MS: u32 = 1000;
/// The BME68x heater needs longer between cycles to settle.
pub const DEFAULT_BME68X_INTERVAL_MS: u32 = 3000;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Config decode failed: {0}")]
    Decode(postcard::Error),
    #[error("Config encode failed: {0}")]
    Encode(postcard::Error),
}

/// Sensor configuration, stored by the host as a postcard blob.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct SensorsConfig {
    pub htu21d: Htu21dConfig,
    pub ccs811: Ccs811Config,
    pub bme68x: Bme68xConfig,
    pub iaq: IaqParams,
}

impl SensorsConfig {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ConfigError> {
        postcard::from_bytes(bytes).map_err(ConfigError::Decode)
    }

    /// Serialize into `buffer`, returning the used prefix.
    pub fn to_slice<'a>(&self, buffer: &'a mut [u8]) -> Result<&'a mut [u8], ConfigError> {
        postcard::to_slice(self, buffer).map_err(ConfigError::Encode)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct Htu21dConfig {
    pub enabled: bool,
    pub interval_ms: u32,
}

impl Default for Htu21dConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_ms: DEFAULT_INTERVAL_MS,
        }
    }
}

impl Htu21dConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(u64::from(self.interval_ms))
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ccs811Config {
    pub enabled: bool,
    pub address: u8,
    pub interval_ms: u32,
    pub drive_mode: DriveMode,
    /// Feed HTU21D readings into the CCS811's ENV_DATA register.
    pub environment_compensation: bool,
}

impl Default for Ccs811Config {
    fn default() -> Self {
        Self {
            enabled: true,
            address: CCS811_ADDRESS,
            interval_ms: DEFAULT_INTERVAL_MS,
            drive_mode: DriveMode::ConstantPower1s,
            environment_compensation: true,
        }
    }
}

impl Ccs811Config {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(u64::from(self.interval_ms))
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Bme68xConfig {
    pub enabled: bool,
    pub address: u8,
    pub interval_ms: u32,
    pub settings: Bme68xSettings,
}

impl Default for Bme68xConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            address: BME68X_ADDRESS_LOW,
            interval_ms: DEFAULT_BME68X_INTERVAL_MS,
            settings: Bme68xSettings::default(),
        }
    }
}

impl Bme68xConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(u64::from(self.interval_ms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sensors::bme68x::OperatingMode;

    #[test]
    fn test_config_survives_postcard() {
        let mut config = SensorsConfig::default();
        config.ccs811.enabled = false;
        config.bme68x.settings.mode = OperatingMode::Parallel;
        config.iaq.reference_humidity = 45.0;

        let mut buffer = [0u8; 128];
        let bytes = config.to_slice(&mut buffer).unwrap();

        assert_eq!(SensorsConfig::from_bytes(bytes).unwrap(), config);
    }

    #[test]
    fn test_truncated_blob_is_rejected() {
        let mut buffer = [0u8; 128];
        let len = SensorsConfig::default().to_slice(&mut buffer).unwrap().len();

        assert!(matches!(
            SensorsConfig::from_bytes(&buffer[..len / 2]),
            Err(ConfigError::Decode(_))
        ));
    }

    #[test]
    fn test_small_buffer_is_an_encode_error() {
        let mut buffer = [0u8; 4];

        assert!(matches!(
            SensorsConfig::default().to_slice(&mut buffer),
            Err(ConfigError::Encode(_))
        ));
    }

    #[test]
    fn test_defaults() {
        let config = SensorsConfig::default();

        assert_eq!(config.htu21d.interval(), Duration::from_millis(1000));
        assert_eq!(config.ccs811.address, 0x5A);
        assert_eq!(config.bme68x.address, 0x76);
        assert_eq!(config.bme68x.interval(), Duration::from_millis(3000));
    }
}
