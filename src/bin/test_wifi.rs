//! Wi-Fi and telemetry host smoke test
//!
//! Associates with the configured network, opens one connection to the
//! telemetry host and sends a single fixed reading.

#![no_std]
#![no_main]

use embassy_executor::Spawner;
use embassy_time::{Duration, Instant, Timer};
use esp_backtrace as _;
use esp_hal::timer::timg::TimerGroup;
use static_cell::StaticCell;

use barocast::{
    config::Config,
    logic::{LINE_TERMINATOR, format_reading},
    model::{Measurement, Reading},
    network::{self, TcpLink},
    traits::Link,
};

esp_bootloader_esp_idf::esp_app_desc!();

const SOCKET_BUFFER_SIZE: usize = 1024;

#[esp_rtos::main]
async fn main(spawner: Spawner) {
    esp_println::logger::init_logger_from_env();
    let peripherals = esp_hal::init(esp_hal::Config::default());

    esp_alloc::heap_allocator!(#[esp_hal::ram(reclaimed)] size: 73744);

    let timg0 = TimerGroup::new(peripherals.TIMG0);
    esp_rtos::start(timg0.timer0);

    esp_println::println!("=== Wi-Fi Test ===");

    let config = match Config::load() {
        Ok(config) => config,
        Err(e) => {
            esp_println::println!("[ERROR] Invalid configuration: {}", e);
            idle().await
        }
    };

    let stack = match network::start(spawner, peripherals.WIFI, config.network) {
        Ok(stack) => stack,
        Err(e) => {
            esp_println::println!("[ERROR] {}", e);
            idle().await
        }
    };

    let started = Instant::now();
    network::wait_until_up(stack, &config.network).await;
    esp_println::println!(
        "[WIFI] Up after {} ms",
        (Instant::now() - started).as_millis()
    );

    static RX_BUFFER: StaticCell<[u8; SOCKET_BUFFER_SIZE]> = StaticCell::new();
    static TX_BUFFER: StaticCell<[u8; SOCKET_BUFFER_SIZE]> = StaticCell::new();
    let mut link = TcpLink::new(
        stack,
        RX_BUFFER.init([0; SOCKET_BUFFER_SIZE]),
        TX_BUFFER.init([0; SOCKET_BUFFER_SIZE]),
    );

    esp_println::println!("[TCP] Connecting to {}", config.endpoint);
    match link.connect(config.endpoint).await {
        Ok(()) => {
            esp_println::println!("[TCP] Connected: {}", link.is_connected());

            let reading = Reading::new(Measurement::Pressure, 1013.25);
            if let Ok(mut line) =
                format_reading(Instant::now().as_millis(), config.device_id, reading)
            {
                let _ = line.push_str(LINE_TERMINATOR);
                match link.send(line.as_bytes()).await {
                    Ok(()) => esp_println::println!("[TCP] Sent {}", line.trim_end()),
                    Err(e) => esp_println::println!("[TCP] Send failed: {}", e),
                }
            }
            link.close().await;
        }
        Err(e) => esp_println::println!("[TCP] {}", e),
    }

    idle().await
}

async fn idle() -> ! {
    loop {
        esp_println::println!("[HEARTBEAT] Wi-Fi test done");
        Timer::after(Duration::from_secs(5)).await;
    }
}
