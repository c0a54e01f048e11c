#![no_std]
#![no_main]

use embassy_executor::Spawner;
use embassy_time::{Delay, Duration, Timer};
use esp_backtrace as _;
use esp_hal::timer::timg::TimerGroup;
use log::{error, info};
use static_cell::StaticCell;

use barocast::{
    bmp180::Bmp180,
    config::Config,
    hardware::{self, BoardUptime},
    logic::Station,
    network::{self, TcpLink},
    sensor::SensorReader,
};

const SOCKET_BUFFER_SIZE: usize = 1024;

esp_bootloader_esp_idf::esp_app_desc!();

/// Park the device after a start-up failure
async fn halt() -> ! {
    loop {
        Timer::after(Duration::from_secs(1)).await;
    }
}

#[esp_rtos::main]
async fn main(spawner: Spawner) {
    esp_println::logger::init_logger_from_env();
    let peripherals = esp_hal::init(esp_hal::Config::default());

    esp_alloc::heap_allocator!(#[esp_hal::ram(reclaimed)] size: 73744);

    esp_println::println!("=== Barocast ===");

    // Initialize RTOS timer for embassy
    let timg0 = TimerGroup::new(peripherals.TIMG0);
    esp_rtos::start(timg0.timer0);

    let config = match Config::load() {
        Ok(config) => config,
        Err(e) => {
            error!("Invalid configuration: {}", e);
            halt().await
        }
    };
    info!("Device {} ({})", config.device_id, config.hostname());

    let stack = match network::start(spawner, peripherals.WIFI, config.network) {
        Ok(stack) => stack,
        Err(e) => {
            error!("Network start failed: {}", e);
            halt().await
        }
    };
    network::wait_until_up(stack, &config.network).await;

    // Initialize BMP180 sensor
    let i2c = match hardware::sensor_bus(peripherals.I2C0, peripherals.GPIO8, peripherals.GPIO9) {
        Ok(i2c) => i2c,
        Err(e) => {
            error!("I2C bus setup failed: {:?}", e);
            halt().await
        }
    };
    let mut bmp180 = Bmp180::new(i2c);
    if let Err(e) = bmp180.init() {
        error!("BMP180 init failed: {}", e);
        halt().await
    }

    static RX_BUFFER: StaticCell<[u8; SOCKET_BUFFER_SIZE]> = StaticCell::new();
    static TX_BUFFER: StaticCell<[u8; SOCKET_BUFFER_SIZE]> = StaticCell::new();
    let link = TcpLink::new(
        stack,
        RX_BUFFER.init([0; SOCKET_BUFFER_SIZE]),
        TX_BUFFER.init([0; SOCKET_BUFFER_SIZE]),
    );

    let mut station = Station::start(
        SensorReader::new(bmp180),
        Delay,
        link,
        BoardUptime,
        &config,
    )
    .await;

    station.run().await
}
