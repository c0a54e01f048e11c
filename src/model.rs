// Model of the data streamed by this app

/// The quantity a reading carries, which is also its JSON key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Measurement {
    Pressure,
    Altitude,
    Temperature,
}

impl Measurement {
    pub const fn key(self) -> &'static str {
        match self {
            Measurement::Pressure => "pressure",
            Measurement::Altitude => "altitude",
            Measurement::Temperature => "temperature",
        }
    }

    pub fn from_key(key: &str) -> Option<Self> {
        match key {
            "pressure" => Some(Measurement::Pressure),
            "altitude" => Some(Measurement::Altitude),
            "temperature" => Some(Measurement::Temperature),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Reading {
    pub measurement: Measurement,
    pub value: f64,
}

impl Reading {
    pub const fn new(measurement: Measurement, value: f64) -> Self {
        Self { measurement, value }
    }
}

/// BMP180 pressure oversampling setting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Oversampling {
    UltraLowPower = 0,
    Standard = 1,
    High = 2,
    Ultra = 3,
}

impl Oversampling {
    pub const fn bits(self) -> u8 {
        self as u8
    }
}
