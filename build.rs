//! Bakes the device configuration into the firmware.
//!
//! Values come from the process environment or an optional `.env` file next to
//! `Cargo.toml`. Anything missing falls back to the defaults below so host
//! builds and tests always have a complete set.

use std::env;

const SETTINGS: &[(&str, &str)] = &[
    ("BAROCAST_DEVICE_ID", "0"),
    ("BAROCAST_HOST", "192.168.1.100"),
    ("BAROCAST_PORT", "8080"),
    ("BAROCAST_IP", "192.168.1.50"),
    ("BAROCAST_GATEWAY", "192.168.1.1"),
    ("BAROCAST_SUBNET", "255.255.255.0"),
    ("WIFI_SSID", ""),
    ("WIFI_PASSWORD", ""),
];

fn main() {
    println!("cargo:rerun-if-changed=.env");

    if let Err(e) = dotenvy::dotenv() {
        if !e.not_found() {
            println!("cargo:warning=failed to load .env: {e}");
        }
    }

    for (key, default) in SETTINGS {
        println!("cargo:rerun-if-env-changed={key}");
        let value = env::var(key).unwrap_or_else(|_| (*default).to_string());
        println!("cargo:rustc-env={key}={value}");
    }
}
