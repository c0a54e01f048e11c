#![no_std]
#![no_main]

use embassy_executor::Spawner;
use embassy_time::{Delay, Duration, Timer};
use esp_backtrace as _;
use esp_hal::timer::timg::TimerGroup;

use barocast::{
    bmp180::{self, Bmp180},
    hardware,
    logic::format_reading,
    model::{Measurement, Reading},
    sensor::{SensorReader, altitude},
};

esp_bootloader_esp_idf::esp_app_desc!();

// Test result tracking
struct TestResults {
    passed: u32,
    failed: u32,
    total: u32,
}

impl TestResults {
    fn new() -> Self {
        Self {
            passed: 0,
            failed: 0,
            total: 0,
        }
    }

    fn assert(&mut self, condition: bool, test_name: &str) {
        self.total += 1;
        if condition {
            self.passed += 1;
            esp_println::println!("  ✓ {}", test_name);
        } else {
            self.failed += 1;
            esp_println::println!("  ✗ {} FAILED", test_name);
        }
    }

    fn assert_eq<T: PartialEq + core::fmt::Debug>(&mut self, left: T, right: T, test_name: &str) {
        self.total += 1;
        if left == right {
            self.passed += 1;
            esp_println::println!("  ✓ {}", test_name);
        } else {
            self.failed += 1;
            esp_println::println!("  ✗ {} FAILED: {:?} != {:?}", test_name, left, right);
        }
    }

    fn print_summary(&self) {
        esp_println::println!("\n==========================================");
        esp_println::println!("Test Summary:");
        esp_println::println!("  Total:  {}", self.total);
        esp_println::println!("  Passed: {}", self.passed);
        esp_println::println!("  Failed: {}", self.failed);
        if self.failed == 0 {
            esp_println::println!("\n✓ ALL TESTS PASSED!");
        } else {
            esp_println::println!("\n✗ SOME TESTS FAILED");
        }
        esp_println::println!("==========================================");
    }
}

fn test_formatting(results: &mut TestResults) {
    esp_println::println!("\n[TEST] Line formatting");

    match format_reading(12345, 0, Reading::new(Measurement::Pressure, 1013.25)) {
        Ok(line) => results.assert_eq(
            line.as_str(),
            "{'time':12345,'device':0,'pressure':1013.25}",
            "pressure line matches wire format",
        ),
        Err(_) => results.assert(false, "pressure line fits buffer"),
    }

    results.assert(
        altitude(1013.25, 1013.25).abs() < 1e-6,
        "altitude at baseline is zero",
    );
    results.assert(
        altitude(1000.0, 1013.25) > altitude(1010.0, 1013.25),
        "altitude falls as pressure rises",
    );
}

async fn test_bmp180_sensor<SDA, SCL>(
    results: &mut TestResults,
    i2c0: esp_hal::peripherals::I2C0<'static>,
    sda: SDA,
    scl: SCL,
) where
    SDA: Into<esp_hal::gpio::AnyPin<'static>>,
    SCL: Into<esp_hal::gpio::AnyPin<'static>>,
{
    esp_println::println!("\n[TEST] BMP180 Sensor Tests");

    let mut i2c = match hardware::sensor_bus(i2c0, sda, scl) {
        Ok(i2c) => i2c,
        Err(e) => {
            esp_println::println!("  Failed to configure I2C: {:?}", e);
            results.assert(false, "I2C bus configured");
            return;
        }
    };

    esp_println::println!("  Running I2C scan...");
    hardware::scan(&mut i2c);
    results.assert(true, "I2C scan completed");

    let mut bmp180 = Bmp180::new(i2c);

    match bmp180.read_chip_id() {
        Ok(chip_id) => {
            esp_println::println!("    Chip ID: 0x{:02X}", chip_id);
            results.assert_eq(chip_id, bmp180::CHIP_ID, "BMP180 chip ID is 0x55");
        }
        Err(e) => {
            esp_println::println!("    Failed to read chip ID: {}", e);
            results.assert(false, "read chip ID");
        }
    }

    if let Err(e) = bmp180.init() {
        esp_println::println!("  Failed to initialize BMP180: {}", e);
        results.assert(false, "BMP180 initialization");
        return;
    }
    results.assert(true, "BMP180 initialization");

    let mut reader = SensorReader::new(bmp180);
    let mut delay = Delay;

    esp_println::println!("  Reading pressure and temperature (5 samples)...");
    let mut pressures = heapless::Vec::<f64, 5>::new();
    let mut temps = heapless::Vec::<f64, 5>::new();
    for i in 0..5 {
        Timer::after(Duration::from_millis(100)).await;
        match reader.read_pressure(&mut delay).await {
            Ok(p) => {
                esp_println::println!("    Sample {}: {:.2} mbar", i + 1, p);
                let _ = pressures.push(p);
            }
            Err(e) => esp_println::println!("    Failed to read pressure: {}", e),
        }
        match reader.read_temperature(&mut delay).await {
            Ok(t) => {
                esp_println::println!("    Sample {}: {:.2}°C", i + 1, t);
                let _ = temps.push(t);
            }
            Err(e) => esp_println::println!("    Failed to read temperature: {}", e),
        }
    }

    results.assert_eq(pressures.len(), 5, "collected 5 pressure samples");
    results.assert_eq(temps.len(), 5, "collected 5 temperature samples");

    for p in pressures.iter() {
        results.assert(*p > 300.0 && *p < 1100.0, "pressure in valid range");
    }
    for t in temps.iter() {
        results.assert(*t > -40.0 && *t < 85.0, "temperature in valid range");
    }

    if let (Some(first), Some(last)) = (pressures.first(), pressures.last()) {
        // Half a second on a desk should not move more than ~1 m
        results.assert(
            altitude(*last, *first).abs() < 1.0,
            "relative altitude stable (within 1 m)",
        );
    }
}

#[esp_rtos::main]
async fn main(_spawner: Spawner) {
    esp_println::logger::init_logger_from_env();
    let peripherals = esp_hal::init(esp_hal::Config::default());

    esp_println::println!("\n==========================================");
    esp_println::println!("=== Hardware Unit Test Runner ===");
    esp_println::println!("==========================================");

    let mut results = TestResults::new();

    // Run tests that don't need hardware
    test_formatting(&mut results);

    // Extract the peripherals we need before initializing RTOS timer
    let i2c0 = peripherals.I2C0;
    let gpio8 = peripherals.GPIO8;
    let gpio9 = peripherals.GPIO9;

    // Initialize RTOS timer for embassy (this consumes TIMG0)
    let timg0 = TimerGroup::new(peripherals.TIMG0);
    esp_rtos::start(timg0.timer0);

    // Run hardware tests
    test_bmp180_sensor(&mut results, i2c0, gpio8, gpio9).await;

    results.print_summary();

    esp_println::println!("\nTest run complete. Looping...");
    loop {
        Timer::after(Duration::from_secs(1)).await;
    }
}
