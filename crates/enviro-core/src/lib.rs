//! Hardware-independent sensor core for the Elora keyboard
//!
//! This crate contains the platform-agnostic half of the keyboard's
//! environmental sensing: register-level drivers for the HTU21D, CCS811 and
//! BME68x, the non-blocking polling state machine they share, the polling
//! aggregator the firmware drives once per scheduler tick, the air-quality
//! index calculation, and the OLED line formatting.
//!
//! It is `#![no_std]` and never blocks outside of `init`, so it can be called
//! straight from the firmware's housekeeping hook as well as from desktop
//! hosts (for the simulator and tests).

#![no_std]

pub mod bus;
pub mod config;
pub mod display;
pub mod metrics;
pub mod sensors;
pub mod sensors_state;
pub mod storage;

#[cfg(any(test, feature = "sim"))]
pub mod sim;
