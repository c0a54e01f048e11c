//! Business logic layer (hardware-independent)
//!
//! [`Station`] owns the sensor, the baseline and the telemetry link, and runs
//! the connect / stream / reconnect loop.

use core::fmt::Write;

use embedded_hal_async::delay::DelayNs;
use log::{info, warn};
use thiserror_no_std::Error;

use crate::config::{Config, Endpoint, Timing};
use crate::model::{Measurement, Reading};
use crate::sensor::{SensorReader, altitude};
use crate::traits::{Barometer, Link, Uptime};

/// Terminates every line on the wire
pub const LINE_TERMINATOR: &str = "\r\n";

pub type Line = heapless::String<96>;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormatError {
    #[error("reading does not fit the line buffer")]
    Overflow,
}

/// Format one reading as `{'time':<ms>,'device':<id>,'<key>':<value>}`
///
/// Values are rendered with two decimals.
pub fn format_reading(
    time_ms: u64,
    device_id: u32,
    reading: Reading,
) -> Result<Line, FormatError> {
    let mut buffer = Line::new();
    write!(
        buffer,
        "{{'time':{},'device':{},'{}':{:.2}}}",
        time_ms,
        device_id,
        reading.measurement.key(),
        reading.value
    )
    .map_err(|_| FormatError::Overflow)?;
    Ok(buffer)
}

/// Outcome of one pass of the outer loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Attempt {
    /// The connect call failed
    Refused,
    /// A session ran for `cycles` full cycles before the link dropped
    Dropped { cycles: u32 },
}

/// Long-lived context of the telemetry station
pub struct Station<B, D, L, U> {
    reader: SensorReader<B>,
    delay: D,
    link: L,
    clock: U,
    baseline: f64,
    device_id: u32,
    endpoint: Endpoint,
    timing: Timing,
}

impl<B, D, L, U> Station<B, D, L, U>
where
    B: Barometer,
    D: DelayNs,
    L: Link,
    U: Uptime,
{
    /// Capture the baseline pressure and build the station
    ///
    /// Keeps reading until one pressure read succeeds; the station cannot exist
    /// without a valid baseline.
    pub async fn start(
        mut reader: SensorReader<B>,
        mut delay: D,
        link: L,
        clock: U,
        config: &Config,
    ) -> Self {
        let baseline = loop {
            match reader.read_pressure(&mut delay).await {
                Ok(pressure) => break pressure,
                Err(e) => {
                    warn!("Baseline pressure read failed: {}", e);
                    delay.delay_ms(config.timing.baseline_retry_ms).await;
                }
            }
        };
        info!("Baseline pressure: {:.2} mbar", baseline);

        Self {
            reader,
            delay,
            link,
            clock,
            baseline,
            device_id: config.device_id,
            endpoint: config.endpoint,
            timing: config.timing,
        }
    }

    #[cfg(test)]
    pub(crate) fn baseline(&self) -> f64 {
        self.baseline
    }

    #[cfg(test)]
    pub(crate) fn link(&self) -> &L {
        &self.link
    }

    /// Run forever
    pub async fn run(&mut self) -> ! {
        loop {
            self.attempt().await;
        }
    }

    /// One pass of the outer loop: connect, stream while alive, tear down
    pub async fn attempt(&mut self) -> Attempt {
        info!("Attempting connection to host@{}", self.endpoint);

        if let Err(e) = self.link.connect(self.endpoint).await {
            warn!("Attempt failed: {:?}", e);
            self.delay.delay_ms(self.timing.connect_retry_ms).await;
            return Attempt::Refused;
        }

        info!("Connection successful on the host@{}", self.endpoint);

        let mut cycles = 0;
        while self.link.is_connected() {
            if let Err(e) = self.cycle().await {
                warn!("Write failed: {:?}", e);
                break;
            }
            cycles += 1;
            self.delay.delay_ms(self.timing.cycle_ms).await;
        }

        warn!("Lost connection to the host");
        self.link.close().await;
        self.delay.delay_ms(self.timing.reconnect_ms).await;

        Attempt::Dropped { cycles }
    }

    /// Read, format and send pressure, altitude and temperature
    ///
    /// A failed sensor step only drops its own messages; a failed write ends
    /// the cycle with the link error.
    async fn cycle(&mut self) -> Result<(), L::Error> {
        match self.reader.read_pressure(&mut self.delay).await {
            Ok(pressure) => {
                self.send(Reading::new(Measurement::Pressure, pressure))
                    .await?;
                let altitude = altitude(pressure, self.baseline);
                self.send(Reading::new(Measurement::Altitude, altitude))
                    .await?;
            }
            Err(e) => warn!("Skipping pressure and altitude: {}", e),
        }

        match self.reader.read_temperature(&mut self.delay).await {
            Ok(temperature) => {
                self.send(Reading::new(Measurement::Temperature, temperature))
                    .await?;
            }
            Err(e) => warn!("Skipping temperature: {}", e),
        }

        Ok(())
    }

    async fn send(&mut self, reading: Reading) -> Result<(), L::Error> {
        let mut line = match format_reading(self.clock.millis(), self.device_id, reading) {
            Ok(line) => line,
            Err(e) => {
                warn!("Dropping {}: {}", reading.measurement.key(), e);
                return Ok(());
            }
        };
        if line.push_str(LINE_TERMINATOR).is_err() {
            warn!("Dropping {}: {}", reading.measurement.key(), FormatError::Overflow);
            return Ok(());
        }

        self.link.send(line.as_bytes()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{NetworkConfig, Timing};
    use crate::sensor::mock::*;
    use core::cell::Cell;
    use embassy_futures::block_on;
    use std::string::String;
    use std::vec::Vec;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    struct LinkDown;

    /// Link fake: connect outcomes are scripted, liveness holds for a fixed
    /// number of checks per session.
    struct FakeLink {
        connects: Vec<Endpoint>,
        refusals: u32,
        alive_checks: u32,
        checks_left: Cell<u32>,
        fail_write_at: Option<usize>,
        sent: Vec<String>,
        closes: u32,
    }

    impl FakeLink {
        fn new() -> Self {
            Self {
                connects: Vec::new(),
                refusals: 0,
                alive_checks: 0,
                checks_left: Cell::new(0),
                fail_write_at: None,
                sent: Vec::new(),
                closes: 0,
            }
        }
    }

    impl Link for FakeLink {
        type Error = LinkDown;

        async fn connect(&mut self, endpoint: Endpoint) -> Result<(), LinkDown> {
            self.connects.push(endpoint);
            if self.refusals > 0 {
                self.refusals -= 1;
                return Err(LinkDown);
            }
            self.checks_left.set(self.alive_checks);
            Ok(())
        }

        fn is_connected(&self) -> bool {
            let left = self.checks_left.get();
            if left == 0 {
                return false;
            }
            self.checks_left.set(left - 1);
            true
        }

        async fn send(&mut self, bytes: &[u8]) -> Result<(), LinkDown> {
            if self.fail_write_at == Some(self.sent.len()) {
                return Err(LinkDown);
            }
            self.sent.push(String::from_utf8(bytes.to_vec()).unwrap());
            Ok(())
        }

        async fn close(&mut self) {
            self.closes += 1;
        }
    }

    /// Clock that advances one millisecond per query
    struct TickingClock(Cell<u64>);

    impl Uptime for TickingClock {
        fn millis(&self) -> u64 {
            let now = self.0.get();
            self.0.set(now + 1);
            now
        }
    }

    fn config() -> Config {
        Config {
            device_id: 3,
            endpoint: Endpoint {
                address: [10, 0, 0, 2],
                port: 5000,
            },
            network: NetworkConfig {
                ssid: "",
                password: "",
                address: [10, 0, 0, 50],
                gateway: [10, 0, 0, 1],
                prefix_len: 24,
            },
            timing: Timing {
                connect_retry_ms: 500,
                cycle_ms: 600,
                reconnect_ms: 1_000,
                baseline_retry_ms: 700,
            },
        }
    }

    type TestStation = Station<ScriptedBarometer, RecordingDelay, FakeLink, TickingClock>;

    fn station_with(
        configure: impl FnOnce(&mut ScriptedBarometer, &mut FakeLink),
    ) -> (EventLog, TestStation) {
        let log = new_log();
        let mut sensor = ScriptedBarometer::new(log.clone());
        let mut link = FakeLink::new();
        configure(&mut sensor, &mut link);

        let station = block_on(Station::start(
            SensorReader::new(sensor),
            RecordingDelay { log: log.clone() },
            link,
            TickingClock(Cell::new(0)),
            &config(),
        ));
        log.borrow_mut().clear();
        (log, station)
    }

    fn waits(log: &EventLog) -> Vec<u32> {
        log.borrow()
            .iter()
            .filter_map(|e| match e {
                Event::Wait(ms) => Some(*ms),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_format_reading_exact() {
        let line = format_reading(12345, 0, Reading::new(Measurement::Pressure, 1013.25)).unwrap();
        assert_eq!(line.as_str(), "{'time':12345,'device':0,'pressure':1013.25}");
    }

    #[test]
    fn test_format_reading_two_decimals() {
        let line = format_reading(7, 12, Reading::new(Measurement::Altitude, -3.0)).unwrap();
        assert_eq!(line.as_str(), "{'time':7,'device':12,'altitude':-3.00}");

        let line =
            format_reading(0, 1, Reading::new(Measurement::Temperature, 21.456)).unwrap();
        assert_eq!(line.as_str(), "{'time':0,'device':1,'temperature':21.46}");
    }

    #[test]
    fn test_format_reading_fits_extremes() {
        let line = format_reading(
            u64::MAX,
            u32::MAX,
            Reading::new(Measurement::Temperature, -99999999.99),
        );
        assert!(line.is_ok());
    }

    #[test]
    fn test_connect_retries_until_success() {
        let (log, mut station) = station_with(|_, link| {
            link.refusals = 2;
            link.alive_checks = 0;
        });

        assert_eq!(block_on(station.attempt()), Attempt::Refused);
        assert_eq!(waits(&log), vec![500]);
        assert_eq!(block_on(station.attempt()), Attempt::Refused);
        assert_eq!(waits(&log), vec![500, 500]);
        assert_eq!(block_on(station.attempt()), Attempt::Dropped { cycles: 0 });
        assert_eq!(waits(&log), vec![500, 500, 1_000]);

        let link = station.link();
        assert_eq!(link.connects.len(), 3);
        assert!(link.connects.iter().all(|e| *e == config().endpoint));
        assert_eq!(link.closes, 1);
    }

    #[test]
    fn test_sends_three_lines_per_cycle_until_drop() {
        const N: u32 = 4;
        let (_log, mut station) = station_with(|_, link| link.alive_checks = N);

        assert_eq!(block_on(station.attempt()), Attempt::Dropped { cycles: N });

        let link = station.link();
        assert_eq!(link.sent.len(), 3 * N as usize);
        assert_eq!(link.closes, 1);

        for chunk in link.sent.chunks(3) {
            assert!(chunk[0].contains("'pressure':"));
            assert!(chunk[1].contains("'altitude':"));
            assert!(chunk[2].contains("'temperature':"));
        }
        assert!(link.sent.iter().all(|l| l.ends_with("}\r\n")));
        assert!(link.sent.iter().all(|l| l.contains("'device':3,")));

        // Reconnects after the drop
        block_on(station.attempt());
        assert_eq!(station.link().connects.len(), 2);
    }

    #[test]
    fn test_session_delays() {
        let (log, mut station) = station_with(|_, link| link.alive_checks = 2);

        block_on(station.attempt());

        // Each cycle: temperature + pressure conversion, temperature conversion,
        // cycle pause. Then the reconnect pause.
        assert_eq!(waits(&log), vec![5, 26, 5, 600, 5, 26, 5, 600, 1_000]);
    }

    #[test]
    fn test_write_failure_ends_session() {
        let (_log, mut station) = station_with(|_, link| {
            link.alive_checks = 10;
            link.fail_write_at = Some(4);
        });

        assert_eq!(block_on(station.attempt()), Attempt::Dropped { cycles: 1 });
        assert_eq!(station.link().sent.len(), 4);
        assert_eq!(station.link().closes, 1);
    }

    #[test]
    fn test_baseline_is_first_successful_read() {
        let log = new_log();
        let mut sensor = ScriptedBarometer::new(log.clone());
        sensor.pressures.extend([Err(FakeError), Ok(1000.0), Ok(990.0)]);
        let mut link = FakeLink::new();
        link.alive_checks = 1;

        let mut station = block_on(Station::start(
            SensorReader::new(sensor),
            RecordingDelay { log: log.clone() },
            link,
            TickingClock(Cell::new(0)),
            &config(),
        ));

        // One failed read, one baseline retry wait
        assert!(waits(&log).contains(&700));
        assert_eq!(station.baseline(), 1000.0);

        block_on(station.attempt());
        assert_eq!(station.baseline(), 1000.0);

        let expected = format!("'altitude':{:.2}}}", altitude(990.0, 1000.0));
        let sent = &station.link().sent;
        assert!(sent[0].contains("'pressure':990.00}"));
        assert!(sent[1].contains(&expected), "{}", sent[1]);
    }

    #[test]
    fn test_failed_pressure_skips_pressure_and_altitude() {
        let (log, mut station) = station_with(|_, link| link.alive_checks = 2);
        station
            .reader
            .sensor_mut()
            .pressures
            .push_back(Err(FakeError));

        assert_eq!(block_on(station.attempt()), Attempt::Dropped { cycles: 2 });

        let sent = &station.link().sent;
        assert_eq!(sent.len(), 4);
        assert!(sent[0].contains("'temperature':"));
        assert!(sent[1].contains("'pressure':"));
        assert!(sent[2].contains("'altitude':"));
        assert!(sent[3].contains("'temperature':"));

        // The failed cycle still pauses before the next one
        assert_eq!(waits(&log), vec![5, 26, 5, 600, 5, 26, 5, 600, 1_000]);
    }

    #[test]
    fn test_failed_temperature_skips_temperature_only() {
        let (_log, mut station) = station_with(|_, link| link.alive_checks = 1);
        // read_pressure consumes the first temperature result
        station
            .reader
            .sensor_mut()
            .temperatures
            .extend([Ok(20.0), Err(FakeError)]);

        block_on(station.attempt());

        let sent = &station.link().sent;
        assert_eq!(sent.len(), 2);
        assert!(sent[0].contains("'pressure':"));
        assert!(sent[1].contains("'altitude':"));
    }

    #[test]
    fn test_time_is_taken_at_send() {
        let (_log, mut station) = station_with(|_, link| link.alive_checks = 1);

        block_on(station.attempt());

        let sent = &station.link().sent;
        assert!(sent[0].starts_with("{'time':0,"));
        assert!(sent[1].starts_with("{'time':1,"));
        assert!(sent[2].starts_with("{'time':2,"));
    }
}
