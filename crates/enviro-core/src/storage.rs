//! Persisted CCS811 baseline
//!
//! The CCS811 relearns its baseline slowly after every power cycle. The
//! firmware saves the register value now and then and restores it at boot;
//! the EEPROM itself belongs to the host, which only sees the bytes.

use serde::{Deserialize, Serialize};
use thiserror_no_std::Error;

pub const BASELINE_RECORD_VERSION: u8 = 1;

/// Upper bound on an encoded [`BaselineRecord`].
pub const BASELINE_RECORD_MAX_LEN: usize = 8;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Baseline record decode failed: {0}")]
    Decode(postcard::Error),
    #[error("Baseline record encode failed: {0}")]
    Encode(postcard::Error),
    #[error("Unsupported baseline record version {found}")]
    UnsupportedVersion { found: u8 },
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct BaselineRecord {
    pub version: u8,
    pub baseline: u16,
}

impl BaselineRecord {
    pub const fn new(baseline: u16) -> Self {
        Self {
            version: BASELINE_RECORD_VERSION,
            baseline,
        }
    }

    pub fn encode<'a>(&self, buffer: &'a mut [u8]) -> Result<&'a mut [u8], StorageError> {
        postcard::to_slice(self, buffer).map_err(StorageError::Encode)
    }

    /// Decode a record, rejecting ones written by a different layout.
    pub fn decode(bytes: &[u8]) -> Result<Self, StorageError> {
        let record: Self = postcard::from_bytes(bytes).map_err(StorageError::Decode)?;
        if record.version != BASELINE_RECORD_VERSION {
            return Err(StorageError::UnsupportedVersion {
                found: record.version,
            });
        }
        Ok(record)
    }
}
