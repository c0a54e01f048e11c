//! Device configuration
//!
//! All values are baked in at build time by `build.rs` and parsed once at
//! start-up with [`Config::load`].

use core::fmt;
use core::fmt::Write;

use thiserror_no_std::Error;

/// Wait after a refused connect before trying again.
pub const CONNECT_RETRY_MS: u32 = 500;
/// Pause between two acquisition cycles while connected.
pub const CYCLE_MS: u32 = 500;
/// Pause after a lost connection has been closed, before reconnecting.
pub const RECONNECT_MS: u32 = 1_000;
/// Wait between failed baseline pressure reads at start-up.
pub const BASELINE_RETRY_MS: u32 = 500;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid IPv4 address for {0}")]
    Address(&'static str),
    #[error("invalid subnet mask")]
    SubnetMask,
    #[error("invalid port")]
    Port,
    #[error("invalid device id")]
    DeviceId,
}

/// IPv4 address and port of the telemetry host
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Endpoint {
    pub address: [u8; 4],
    pub port: u16,
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d] = self.address;
        write!(f, "{}.{}.{}.{}:{}", a, b, c, d, self.port)
    }
}

/// Wi-Fi station settings with a static address
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NetworkConfig {
    pub ssid: &'static str,
    pub password: &'static str,
    pub address: [u8; 4],
    pub gateway: [u8; 4],
    pub prefix_len: u8,
}

/// Fixed delays of the telemetry loop, in milliseconds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timing {
    pub connect_retry_ms: u32,
    pub cycle_ms: u32,
    pub reconnect_ms: u32,
    pub baseline_retry_ms: u32,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            connect_retry_ms: CONNECT_RETRY_MS,
            cycle_ms: CYCLE_MS,
            reconnect_ms: RECONNECT_MS,
            baseline_retry_ms: BASELINE_RETRY_MS,
        }
    }
}

/// Unparsed settings, as exported by the build script
#[derive(Debug, Clone, Copy)]
pub struct RawConfig {
    pub device_id: &'static str,
    pub host: &'static str,
    pub port: &'static str,
    pub ssid: &'static str,
    pub password: &'static str,
    pub address: &'static str,
    pub gateway: &'static str,
    pub subnet: &'static str,
}

impl RawConfig {
    pub const fn from_build_env() -> Self {
        Self {
            device_id: env!("BAROCAST_DEVICE_ID"),
            host: env!("BAROCAST_HOST"),
            port: env!("BAROCAST_PORT"),
            ssid: env!("WIFI_SSID"),
            password: env!("WIFI_PASSWORD"),
            address: env!("BAROCAST_IP"),
            gateway: env!("BAROCAST_GATEWAY"),
            subnet: env!("BAROCAST_SUBNET"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
    pub device_id: u32,
    pub endpoint: Endpoint,
    pub network: NetworkConfig,
    pub timing: Timing,
}

impl Config {
    /// Parse the configuration baked into this build
    pub fn load() -> Result<Self, ConfigError> {
        Self::parse(&RawConfig::from_build_env())
    }

    pub fn parse(raw: &RawConfig) -> Result<Self, ConfigError> {
        let device_id = raw
            .device_id
            .trim()
            .parse()
            .map_err(|_| ConfigError::DeviceId)?;
        let port = raw.port.trim().parse().map_err(|_| ConfigError::Port)?;
        if port == 0 {
            return Err(ConfigError::Port);
        }

        Ok(Self {
            device_id,
            endpoint: Endpoint {
                address: parse_ipv4(raw.host).ok_or(ConfigError::Address("host"))?,
                port,
            },
            network: NetworkConfig {
                ssid: raw.ssid,
                password: raw.password,
                address: parse_ipv4(raw.address).ok_or(ConfigError::Address("address"))?,
                gateway: parse_ipv4(raw.gateway).ok_or(ConfigError::Address("gateway"))?,
                prefix_len: prefix_len(
                    parse_ipv4(raw.subnet).ok_or(ConfigError::Address("subnet"))?,
                )?,
            },
            timing: Timing::default(),
        })
    }

    /// Name the device announces itself under, `iot-device-<id>`
    pub fn hostname(&self) -> heapless::String<32> {
        device_name(self.device_id)
    }
}

/// Name a device goes by on the network and in the receiver's logs
pub fn device_name(device_id: u32) -> heapless::String<32> {
    let mut name = heapless::String::new();
    let _ = write!(name, "iot-device-{}", device_id);
    name
}

/// Parse a dotted-quad IPv4 address
pub fn parse_ipv4(text: &str) -> Option<[u8; 4]> {
    let mut octets = [0u8; 4];
    let mut parts = text.trim().split('.');

    for octet in octets.iter_mut() {
        let part = parts.next()?;
        if part.is_empty() || part.len() > 3 || !part.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        *octet = part.parse().ok()?;
    }

    if parts.next().is_some() {
        return None;
    }
    Some(octets)
}

/// Convert a subnet mask such as `255.255.255.0` into its prefix length
pub fn prefix_len(mask: [u8; 4]) -> Result<u8, ConfigError> {
    let bits = u32::from_be_bytes(mask);
    let len = bits.leading_ones();

    // Ones must be contiguous from the top
    if bits.checked_shl(len).unwrap_or(0) != 0 {
        return Err(ConfigError::SubnetMask);
    }
    Ok(len as u8)
}
