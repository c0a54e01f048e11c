//! Hardware abstraction traits

use core::fmt::Debug;
use core::future::Future;

use crate::config::Endpoint;
use crate::model::Oversampling;

/// Trait for barometers with a start/wait/fetch conversion protocol
///
/// Every `start_*` call returns how many milliseconds the conversion takes.
/// The caller must wait at least that long before the matching `fetch_*`.
pub trait Barometer {
    type Error: Debug;

    /// Start a temperature conversion, returning the wait in milliseconds
    fn start_temperature(&mut self) -> Result<u8, Self::Error>;

    /// Fetch the converted temperature in degrees Celsius
    fn fetch_temperature(&mut self) -> Result<f64, Self::Error>;

    /// Start a pressure conversion, returning the wait in milliseconds
    fn start_pressure(&mut self, oversampling: Oversampling) -> Result<u8, Self::Error>;

    /// Fetch the converted pressure in mbar, compensated with `temperature`
    fn fetch_pressure(&mut self, temperature: f64) -> Result<f64, Self::Error>;
}

/// Trait for the outbound telemetry connection
pub trait Link {
    type Error: Debug;

    /// Open the connection to `endpoint`
    fn connect(&mut self, endpoint: Endpoint) -> impl Future<Output = Result<(), Self::Error>>;

    /// Liveness check: whether the transport still considers itself open
    fn is_connected(&self) -> bool;

    /// Write all of `bytes`
    fn send(&mut self, bytes: &[u8]) -> impl Future<Output = Result<(), Self::Error>>;

    /// Tear the connection down so `connect` can be called again
    fn close(&mut self) -> impl Future<Output = ()>;
}

/// Trait for a monotonic clock started at boot
pub trait Uptime {
    fn millis(&self) -> u64;
}
