use embassy_time::Instant;
use esp_hal::gpio::AnyPin;
use esp_hal::{
    i2c::master::{Config as I2cConfig, ConfigError, I2c},
    peripherals::I2C0,
    time::Rate,
};

use crate::bmp180::Bmp180;
use crate::traits::Uptime;

const SENSOR_BUS_KHZ: u32 = 100;

pub type SensorBus<'a> = I2c<'a, esp_hal::Blocking>;

/// Bring up the I2C bus the BMP180 hangs off
pub fn sensor_bus<'a, SDA, SCL>(
    i2c_periph: I2C0<'a>,
    sda: SDA,
    scl: SCL,
) -> Result<SensorBus<'a>, ConfigError>
where
    SDA: Into<AnyPin<'a>>,
    SCL: Into<AnyPin<'a>>,
{
    let i2c = I2c::new(
        i2c_periph,
        I2cConfig::default().with_frequency(Rate::from_khz(SENSOR_BUS_KHZ)),
    )?
    .with_sda(sda.into())
    .with_scl(scl.into());

    Ok(i2c)
}

/// Log every address that acknowledges on the bus
pub fn scan(i2c: &mut SensorBus<'_>) {
    esp_println::println!("I2C scan start");
    for addr in 0x03..=0x77 {
        if i2c.write(addr, &[]).is_ok() {
            esp_println::println!("Found device at 0x{:02X}", addr);
        }
    }
    esp_println::println!("I2C scan done");
}

pub type BoardBarometer<'a> = Bmp180<SensorBus<'a>>;

/// Milliseconds since boot from the embassy time driver
#[derive(Debug, Clone, Copy, Default)]
pub struct BoardUptime;

impl Uptime for BoardUptime {
    fn millis(&self) -> u64 {
        Instant::now().as_millis()
    }
}
