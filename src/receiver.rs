//! Receiving side of the telemetry stream
//!
//! [`LineDecoder`] frames the byte stream on CRLF, [`parse_packet`] validates one
//! line and [`Receiver`] ties both together for a single client connection,
//! naming the client after the first device id it reports.

use log::{debug, warn};
use thiserror_no_std::Error;

use crate::config::device_name;
use crate::model::{Measurement, Reading};

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameError {
    #[error("line exceeds the receive buffer")]
    Overflow,
    #[error("line is not valid UTF-8")]
    Utf8,
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketError {
    #[error("packet is not a {{...}} map")]
    Malformed,
    #[error("packets must carry 'time' and 'device'")]
    MissingKeys,
    #[error("unknown key in packet")]
    UnknownKey,
    #[error("value is not a number")]
    InvalidValue,
}

/// Accumulates bytes until a CRLF and hands out the line before it
pub struct LineDecoder<const N: usize> {
    buffer: heapless::Vec<u8, N>,
}

impl<const N: usize> LineDecoder<N> {
    pub fn new() -> Self {
        Self {
            buffer: heapless::Vec::new(),
        }
    }

    /// Feed one byte; returns the completed line once its CRLF arrives
    ///
    /// On overflow the partial line is discarded.
    pub fn push(&mut self, byte: u8) -> Result<Option<heapless::String<N>>, FrameError> {
        if self.buffer.push(byte).is_err() {
            self.buffer.clear();
            return Err(FrameError::Overflow);
        }
        if !self.buffer.ends_with(b"\r\n") {
            return Ok(None);
        }

        self.buffer.truncate(self.buffer.len() - 2);
        let line = core::mem::take(&mut self.buffer);
        heapless::String::from_utf8(line)
            .map(Some)
            .map_err(|_| FrameError::Utf8)
    }
}

impl<const N: usize> Default for LineDecoder<N> {
    fn default() -> Self {
        Self::new()
    }
}

/// Where a packet's `time` comes from
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TimeSource {
    /// The device uptime, converted to seconds
    Device,
    /// The receiver's own clock in seconds; device uptime moves to `device_time`
    Host(f64),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Packet {
    pub device: u32,
    /// Seconds
    pub time: f64,
    /// Device uptime in seconds, set when `time` comes from the host
    pub device_time: Option<f64>,
    pub reading: Option<Reading>,
}

/// Parse one `{'time':<ms>,'device':<id>,'<key>':<value>}` line
pub fn parse_packet(line: &str, source: TimeSource) -> Result<Packet, PacketError> {
    let body = line
        .trim()
        .strip_prefix('{')
        .and_then(|rest| rest.strip_suffix('}'))
        .ok_or(PacketError::Malformed)?;

    let mut time_ms = None;
    let mut device = None;
    let mut reading = None;

    for field in body.split(',').filter(|f| !f.trim().is_empty()) {
        let (key, value) = field.split_once(':').ok_or(PacketError::Malformed)?;
        let key = unquote(key.trim());
        let value = value.trim();

        match key {
            "time" => time_ms = Some(value.parse::<u64>().map_err(|_| PacketError::InvalidValue)?),
            "device" => device = Some(value.parse::<u32>().map_err(|_| PacketError::InvalidValue)?),
            _ => {
                let measurement = Measurement::from_key(key).ok_or(PacketError::UnknownKey)?;
                let value = value.parse::<f64>().map_err(|_| PacketError::InvalidValue)?;
                reading = Some(Reading::new(measurement, value));
            }
        }
    }

    let (Some(time_ms), Some(device)) = (time_ms, device) else {
        return Err(PacketError::MissingKeys);
    };
    let device_seconds = time_ms as f64 / 1000.0;

    let (time, device_time) = match source {
        TimeSource::Device => (device_seconds, None),
        TimeSource::Host(now) => (now, Some(device_seconds)),
    };

    Ok(Packet {
        device,
        time,
        device_time,
        reading,
    })
}

fn unquote(key: &str) -> &str {
    key.strip_prefix('\'')
        .and_then(|k| k.strip_suffix('\''))
        .or_else(|| key.strip_prefix('"').and_then(|k| k.strip_suffix('"')))
        .unwrap_or(key)
}

/// Per-connection receiver state
pub struct Receiver<const N: usize> {
    decoder: LineDecoder<N>,
    source: TimeSource,
    name: Option<heapless::String<32>>,
}

impl<const N: usize> Receiver<N> {
    pub fn new(source: TimeSource) -> Self {
        Self {
            decoder: LineDecoder::new(),
            source,
            name: None,
        }
    }

    /// `iot-device-<id>` once a valid packet has been seen
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn set_host_time(&mut self, now: f64) {
        if let TimeSource::Host(_) = self.source {
            self.source = TimeSource::Host(now);
        }
    }

    /// Feed one received byte; yields a packet when a valid line completes
    ///
    /// Bad lines are logged and dropped, the stream carries on.
    pub fn push(&mut self, byte: u8) -> Option<Packet> {
        let line = match self.decoder.push(byte) {
            Ok(Some(line)) => line,
            Ok(None) => return None,
            Err(e) => {
                warn!("Frame error: {}", e);
                return None;
            }
        };

        match parse_packet(&line, self.source) {
            Ok(packet) => {
                if self.name.is_none() {
                    self.name = Some(device_name(packet.device));
                }
                debug!("{:?}", packet);
                Some(packet)
            }
            Err(e) => {
                warn!("Parse error: {}: {}", e, line.as_str());
                None
            }
        }
    }
}
