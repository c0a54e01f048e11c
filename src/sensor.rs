//! Sensor reader
//!
//! Drives the start/wait/fetch protocol of a [`Barometer`]. Waits use the
//! duration the device reports for each conversion.

use embedded_hal_async::delay::DelayNs;
use log::error;
use thiserror_no_std::Error;

use crate::model::Oversampling;
use crate::traits::Barometer;

/// Oversampling used for every pressure conversion
pub const PRESSURE_OVERSAMPLING: Oversampling = Oversampling::Ultra;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorError {
    #[error("error starting temperature measurement")]
    TemperatureStart,
    #[error("error retrieving temperature measurement")]
    TemperatureRead,
    #[error("error starting pressure measurement")]
    PressureStart,
    #[error("error retrieving pressure measurement")]
    PressureRead,
}

/// Altitude in meters relative to `baseline`, both pressures in the same unit
pub fn altitude(pressure: f64, baseline: f64) -> f64 {
    44330.0 * (1.0 - libm::pow(pressure / baseline, 1.0 / 5.255))
}

pub struct SensorReader<B> {
    sensor: B,
}

impl<B: Barometer> SensorReader<B> {
    pub fn new(sensor: B) -> Self {
        Self { sensor }
    }

    #[cfg(test)]
    pub(crate) fn sensor_mut(&mut self) -> &mut B {
        &mut self.sensor
    }

    /// Read the temperature in degrees Celsius
    pub async fn read_temperature<D: DelayNs>(
        &mut self,
        delay: &mut D,
    ) -> Result<f64, SensorError> {
        let wait_ms = self.sensor.start_temperature().map_err(|e| {
            error!("Failed to start temperature conversion: {:?}", e);
            SensorError::TemperatureStart
        })?;

        delay.delay_ms(wait_ms as u32).await;

        self.sensor.fetch_temperature().map_err(|e| {
            error!("Failed to fetch temperature: {:?}", e);
            SensorError::TemperatureRead
        })
    }

    /// Read the pressure in mbar
    ///
    /// Compensation needs a fresh temperature, so this runs a full temperature
    /// conversion first.
    pub async fn read_pressure<D: DelayNs>(&mut self, delay: &mut D) -> Result<f64, SensorError> {
        let temperature = self.read_temperature(delay).await?;

        let wait_ms = self
            .sensor
            .start_pressure(PRESSURE_OVERSAMPLING)
            .map_err(|e| {
                error!("Failed to start pressure conversion: {:?}", e);
                SensorError::PressureStart
            })?;

        delay.delay_ms(wait_ms as u32).await;

        self.sensor.fetch_pressure(temperature).map_err(|e| {
            error!("Failed to fetch pressure: {:?}", e);
            SensorError::PressureRead
        })
    }
}
