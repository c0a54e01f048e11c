//! Bosch BMP180 barometer driver
//!
//! Works over any blocking `embedded_hal` I2C bus. Compensation uses the
//! floating point polynomial form of the datasheet algorithm, so temperature
//! read separately can be fed back into the pressure calculation.

use embedded_hal::i2c::I2c;
use log::{debug, info};
use thiserror_no_std::Error;

use crate::model::Oversampling;
use crate::traits::Barometer;

pub const ADDRESS: u8 = 0x77;
pub const CHIP_ID: u8 = 0x55;

const REG_CALIBRATION: u8 = 0xAA;
const REG_CHIP_ID: u8 = 0xD0;
const REG_CONTROL: u8 = 0xF4;
const REG_RESULT: u8 = 0xF6;

const CMD_TEMPERATURE: u8 = 0x2E;
const CMD_PRESSURE: u8 = 0x34;

const TEMPERATURE_WAIT_MS: u8 = 5;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bmp180Error<E> {
    #[error("I2C bus error: {0:?}")]
    I2c(E),
    #[error("unexpected chip id 0x{0:02X}")]
    ChipId(u8),
    #[error("sensor not initialized")]
    NotCalibrated,
}

/// Raw calibration words, in register order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CalibrationData {
    pub ac1: i16,
    pub ac2: i16,
    pub ac3: i16,
    pub ac4: u16,
    pub ac5: u16,
    pub ac6: u16,
    pub b1: i16,
    pub b2: i16,
    pub mb: i16,
    pub mc: i16,
    pub md: i16,
}

impl CalibrationData {
    pub fn from_bytes(data: &[u8; 22]) -> Self {
        let word = |i: usize| [data[i * 2], data[i * 2 + 1]];

        Self {
            ac1: i16::from_be_bytes(word(0)),
            ac2: i16::from_be_bytes(word(1)),
            ac3: i16::from_be_bytes(word(2)),
            ac4: u16::from_be_bytes(word(3)),
            ac5: u16::from_be_bytes(word(4)),
            ac6: u16::from_be_bytes(word(5)),
            b1: i16::from_be_bytes(word(6)),
            b2: i16::from_be_bytes(word(7)),
            mb: i16::from_be_bytes(word(8)),
            mc: i16::from_be_bytes(word(9)),
            md: i16::from_be_bytes(word(10)),
        }
    }
}

/// Polynomial coefficients derived once from [`CalibrationData`]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Compensation {
    c5: f64,
    c6: f64,
    mc: f64,
    md: f64,
    x0: f64,
    x1: f64,
    x2: f64,
    y0: f64,
    y1: f64,
    y2: f64,
    p0: f64,
    p1: f64,
    p2: f64,
}

impl Compensation {
    pub fn new(cal: &CalibrationData) -> Self {
        let c3 = 160.0 * libm::pow(2.0, -15.0) * cal.ac3 as f64;
        let c4 = libm::pow(10.0, -3.0) * libm::pow(2.0, -15.0) * cal.ac4 as f64;
        let b1 = libm::pow(160.0, 2.0) * libm::pow(2.0, -30.0) * cal.b1 as f64;

        Self {
            c5: (libm::pow(2.0, -15.0) / 160.0) * cal.ac5 as f64,
            c6: cal.ac6 as f64,
            mc: (libm::pow(2.0, 11.0) / libm::pow(160.0, 2.0)) * cal.mc as f64,
            md: cal.md as f64 / 160.0,
            x0: cal.ac1 as f64,
            x1: 160.0 * libm::pow(2.0, -13.0) * cal.ac2 as f64,
            x2: libm::pow(160.0, 2.0) * libm::pow(2.0, -25.0) * cal.b2 as f64,
            y0: c4 * libm::pow(2.0, 15.0),
            y1: c4 * c3,
            y2: c4 * b1,
            p0: (3791.0 - 8.0) / 1600.0,
            p1: 1.0 - 7357.0 * libm::pow(2.0, -20.0),
            p2: 3038.0 * 100.0 * libm::pow(2.0, -36.0),
        }
    }

    /// Degrees Celsius from the raw 16-bit temperature word
    pub fn temperature(&self, raw: [u8; 2]) -> f64 {
        let tu = u16::from_be_bytes(raw) as f64;
        let a = self.c5 * (tu - self.c6);
        a + (self.mc / (a + self.md))
    }

    /// mbar from the raw 24-bit pressure result and a temperature in Celsius
    pub fn pressure(&self, raw: [u8; 3], temperature: f64) -> f64 {
        let pu = (raw[0] as f64 * 256.0) + raw[1] as f64 + (raw[2] as f64 / 256.0);
        let s = temperature - 25.0;
        let x = (self.x2 * s * s) + (self.x1 * s) + self.x0;
        let y = (self.y2 * s * s) + (self.y1 * s) + self.y0;
        let z = (pu - x) / y;
        (self.p2 * z * z) + (self.p1 * z) + self.p0
    }
}

/// Conversion time in milliseconds for each oversampling setting
pub const fn pressure_wait_ms(oversampling: Oversampling) -> u8 {
    match oversampling {
        Oversampling::UltraLowPower => 5,
        Oversampling::Standard => 8,
        Oversampling::High => 14,
        Oversampling::Ultra => 26,
    }
}

pub struct Bmp180<I> {
    i2c: I,
    address: u8,
    compensation: Option<Compensation>,
}

impl<I: I2c> Bmp180<I> {
    pub fn new(i2c: I) -> Self {
        Self {
            i2c,
            address: ADDRESS,
            compensation: None,
        }
    }

    pub fn read_chip_id(&mut self) -> Result<u8, Bmp180Error<I::Error>> {
        let mut id = [0u8; 1];
        self.i2c
            .write_read(self.address, &[REG_CHIP_ID], &mut id)
            .map_err(Bmp180Error::I2c)?;
        Ok(id[0])
    }

    /// Verify the chip and load its calibration block
    pub fn init(&mut self) -> Result<(), Bmp180Error<I::Error>> {
        let chip_id = self.read_chip_id()?;
        info!("[BMP180] Chip ID: 0x{:02X}", chip_id);
        if chip_id != CHIP_ID {
            return Err(Bmp180Error::ChipId(chip_id));
        }

        let mut data = [0u8; 22];
        self.i2c
            .write_read(self.address, &[REG_CALIBRATION], &mut data)
            .map_err(Bmp180Error::I2c)?;

        let calibration = CalibrationData::from_bytes(&data);
        debug!("[BMP180] Calibration: {:?}", calibration);

        self.compensation = Some(Compensation::new(&calibration));
        info!("[BMP180] Initialized - ready to measure");
        Ok(())
    }

    fn compensation(&self) -> Result<Compensation, Bmp180Error<I::Error>> {
        self.compensation.ok_or(Bmp180Error::NotCalibrated)
    }

    fn command(&mut self, command: u8) -> Result<(), Bmp180Error<I::Error>> {
        self.i2c
            .write(self.address, &[REG_CONTROL, command])
            .map_err(Bmp180Error::I2c)
    }
}

impl<I: I2c> Barometer for Bmp180<I> {
    type Error = Bmp180Error<I::Error>;

    fn start_temperature(&mut self) -> Result<u8, Self::Error> {
        self.compensation()?;
        self.command(CMD_TEMPERATURE)?;
        Ok(TEMPERATURE_WAIT_MS)
    }

    fn fetch_temperature(&mut self) -> Result<f64, Self::Error> {
        let compensation = self.compensation()?;
        let mut raw = [0u8; 2];
        self.i2c
            .write_read(self.address, &[REG_RESULT], &mut raw)
            .map_err(Bmp180Error::I2c)?;
        Ok(compensation.temperature(raw))
    }

    fn start_pressure(&mut self, oversampling: Oversampling) -> Result<u8, Self::Error> {
        self.compensation()?;
        self.command(CMD_PRESSURE + (oversampling.bits() << 6))?;
        Ok(pressure_wait_ms(oversampling))
    }

    fn fetch_pressure(&mut self, temperature: f64) -> Result<f64, Self::Error> {
        let compensation = self.compensation()?;
        let mut raw = [0u8; 3];
        self.i2c
            .write_read(self.address, &[REG_RESULT], &mut raw)
            .map_err(Bmp180Error::I2c)?;
        Ok(compensation.pressure(raw, temperature))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use embedded_hal::i2c::{ErrorKind, ErrorType, Operation};
    use std::vec::Vec;

    // Datasheet example: AC1=408 AC2=-72 AC3=-14383 AC4=32741 AC5=32757
    // AC6=23153 B1=6190 B2=4 MB=-32768 MC=-8711 MD=2868
    const DATASHEET_CALIBRATION: [u8; 22] = [
        0x01, 0x98, 0xFF, 0xB8, 0xC7, 0xD1, 0x7F, 0xE5, 0x7F, 0xF5, 0x5A, 0x71, 0x18, 0x2E, 0x00,
        0x04, 0x80, 0x00, 0xDD, 0xF9, 0x0B, 0x34,
    ];

    /// Register-level fake of the chip
    struct FakeBus {
        chip_id: u8,
        result: [u8; 3],
        writes: Vec<Vec<u8>>,
        fail: bool,
    }

    impl FakeBus {
        fn new() -> Self {
            Self {
                chip_id: CHIP_ID,
                result: [0; 3],
                writes: Vec::new(),
                fail: false,
            }
        }
    }

    impl ErrorType for FakeBus {
        type Error = ErrorKind;
    }

    impl I2c for FakeBus {
        fn transaction(
            &mut self,
            address: u8,
            operations: &mut [Operation<'_>],
        ) -> Result<(), Self::Error> {
            assert_eq!(address, ADDRESS);
            if self.fail {
                return Err(ErrorKind::Other);
            }

            let mut register = None;
            for op in operations.iter_mut() {
                match op {
                    Operation::Write(bytes) => {
                        register = bytes.first().copied();
                        self.writes.push(bytes.to_vec());
                    }
                    Operation::Read(buf) => {
                        let source: &[u8] = match register {
                            Some(REG_CHIP_ID) => core::slice::from_ref(&self.chip_id),
                            Some(REG_CALIBRATION) => &DATASHEET_CALIBRATION,
                            Some(REG_RESULT) => &self.result,
                            _ => panic!("unexpected register read"),
                        };
                        buf.copy_from_slice(&source[..buf.len()]);
                    }
                }
            }
            Ok(())
        }
    }

    fn datasheet_compensation() -> Compensation {
        Compensation::new(&CalibrationData::from_bytes(&DATASHEET_CALIBRATION))
    }

    #[test]
    fn test_calibration_parsing() {
        let cal = CalibrationData::from_bytes(&DATASHEET_CALIBRATION);
        assert_eq!(cal.ac1, 408);
        assert_eq!(cal.ac2, -72);
        assert_eq!(cal.ac3, -14383);
        assert_eq!(cal.ac4, 32741);
        assert_eq!(cal.ac5, 32757);
        assert_eq!(cal.ac6, 23153);
        assert_eq!(cal.b1, 6190);
        assert_eq!(cal.b2, 4);
        assert_eq!(cal.mb, -32768);
        assert_eq!(cal.mc, -8711);
        assert_eq!(cal.md, 2868);
    }

    #[test]
    fn test_datasheet_temperature() {
        // UT = 27898
        let t = datasheet_compensation().temperature(27898u16.to_be_bytes());
        assert!((t - 15.0).abs() < 0.01, "got {}", t);
    }

    #[test]
    fn test_datasheet_pressure() {
        // UP = 23843 at oversampling 0
        let comp = datasheet_compensation();
        let t = comp.temperature(27898u16.to_be_bytes());
        let p = comp.pressure([0x5D, 0x23, 0x00], t);
        assert!((p - 699.63).abs() < 0.05, "got {}", p);
    }

    #[test]
    fn test_init_rejects_wrong_chip() {
        let mut bus = FakeBus::new();
        bus.chip_id = 0x58;
        let mut sensor = Bmp180::new(bus);
        assert_eq!(sensor.init(), Err(Bmp180Error::ChipId(0x58)));
    }

    #[test]
    fn test_use_before_init_fails() {
        let mut sensor = Bmp180::new(FakeBus::new());
        assert_eq!(sensor.start_temperature(), Err(Bmp180Error::NotCalibrated));
        assert_eq!(
            sensor.fetch_pressure(20.0),
            Err(Bmp180Error::NotCalibrated)
        );
    }

    #[test]
    fn test_bus_error_is_reported() {
        let mut bus = FakeBus::new();
        bus.fail = true;
        let mut sensor = Bmp180::new(bus);
        assert_eq!(sensor.init(), Err(Bmp180Error::I2c(ErrorKind::Other)));
    }

    #[test]
    fn test_conversion_commands_and_waits() {
        let mut sensor = Bmp180::new(FakeBus::new());
        sensor.init().unwrap();

        assert_eq!(sensor.start_temperature(), Ok(5));
        assert_eq!(sensor.start_pressure(Oversampling::UltraLowPower), Ok(5));
        assert_eq!(sensor.start_pressure(Oversampling::Ultra), Ok(26));

        let writes = &sensor.i2c.writes;
        assert!(writes.contains(&vec![REG_CONTROL, 0x2E]));
        assert!(writes.contains(&vec![REG_CONTROL, 0x34]));
        assert!(writes.contains(&vec![REG_CONTROL, 0xF4]));
    }

    #[test]
    fn test_fetch_uses_result_register() {
        let mut bus = FakeBus::new();
        bus.result = [0x6C, 0xFA, 0x00];
        let mut sensor = Bmp180::new(bus);
        sensor.init().unwrap();

        let t = sensor.fetch_temperature().unwrap();
        assert!((t - 15.0).abs() < 0.01);

        sensor.i2c.result = [0x5D, 0x23, 0x00];
        let p = sensor.fetch_pressure(t).unwrap();
        assert!((p - 699.63).abs() < 0.05);
    }
}
