//! Barometric telemetry station
//!
//! Reads a BMP180 over I2C, derives altitude from a pressure baseline captured
//! at boot and streams one line per reading to a TCP host, reconnecting forever.
//!
//! Everything outside `hardware` and `network` is hardware independent and is
//! unit tested on the host.

#![cfg_attr(not(test), no_std)]

#[cfg(target_arch = "xtensa")]
extern crate alloc;

pub mod bmp180;
pub mod config;
pub mod logic;
pub mod model;
pub mod receiver;
pub mod sensor;
pub mod traits;

#[cfg(target_arch = "xtensa")]
pub mod hardware;
#[cfg(target_arch = "xtensa")]
pub mod network;
