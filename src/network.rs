//! Wi-Fi station bring-up and the TCP telemetry link

use embassy_executor::Spawner;
use embassy_net::{
    IpAddress, IpEndpoint, Ipv4Address, Ipv4Cidr, Runner, Stack, StackResources,
    StaticConfigV4,
    tcp::{self, ConnectError, State, TcpSocket},
};
use embassy_time::{Duration, Timer};
use esp_hal::{peripherals::WIFI, rng::Rng};
use esp_radio::{
    Controller,
    wifi::{ClientConfig, ModeConfig, WifiController, WifiDevice, WifiEvent, WifiStaState},
};
use log::{error, info, warn};
use static_cell::StaticCell;
use thiserror_no_std::Error;

use crate::config::{Endpoint, NetworkConfig};
use crate::traits::Link;

const ASSOCIATION_POLL_MS: u64 = 500;
const REASSOCIATE_DELAY_MS: u64 = 5_000;
const SOCKET_TIMEOUT_SECS: u64 = 10;
const KEEP_ALIVE_SECS: u64 = 5;

#[derive(Error, Debug)]
pub enum NetworkError {
    #[error("radio init failed")]
    Radio,
    #[error("failed to spawn {0} task")]
    Spawn(&'static str),
}

/// Start the radio, the Wi-Fi station task and the network stack
pub fn start(
    spawner: Spawner,
    wifi: WIFI<'static>,
    config: NetworkConfig,
) -> Result<Stack<'static>, NetworkError> {
    static RADIO: StaticCell<Controller<'static>> = StaticCell::new();
    static RESOURCES: StaticCell<StackResources<3>> = StaticCell::new();

    let radio = esp_radio::init().map_err(|e| {
        error!("Failed to initialize radio: {:?}", e);
        NetworkError::Radio
    })?;
    let radio = RADIO.init(radio);

    let (controller, interfaces) =
        esp_radio::wifi::new(radio, wifi, Default::default()).map_err(|e| {
            error!("Failed to initialize Wi-Fi controller: {:?}", e);
            NetworkError::Radio
        })?;

    let net_config = embassy_net::Config::ipv4_static(StaticConfigV4 {
        address: Ipv4Cidr::new(Ipv4Address::from(config.address), config.prefix_len),
        gateway: Some(Ipv4Address::from(config.gateway)),
        dns_servers: Default::default(),
    });

    let rng = Rng::new();
    let seed = (rng.random() as u64) << 32 | rng.random() as u64;

    let (stack, runner) = embassy_net::new(
        interfaces.sta,
        net_config,
        RESOURCES.init(StackResources::<3>::new()),
        seed,
    );

    spawner
        .spawn(connection(controller, config))
        .map_err(|_| NetworkError::Spawn("wifi connection"))?;
    spawner
        .spawn(net_task(runner))
        .map_err(|_| NetworkError::Spawn("network"))?;

    Ok(stack)
}

/// Block until the station is associated and the address is configured
pub async fn wait_until_up(stack: Stack<'_>, config: &NetworkConfig) {
    info!("Connecting to the Wifi with ssid '{}'", config.ssid);
    while !stack.is_link_up() {
        Timer::after(Duration::from_millis(ASSOCIATION_POLL_MS)).await;
    }
    stack.wait_config_up().await;

    info!("Connected to the Wifi with ssid '{}'", config.ssid);
    if let Some(v4) = stack.config_v4() {
        info!("Device IP address: {}", v4.address);
    }
}

#[embassy_executor::task]
async fn connection(mut controller: WifiController<'static>, config: NetworkConfig) {
    loop {
        if esp_radio::wifi::sta_state() == WifiStaState::Connected {
            controller.wait_for_event(WifiEvent::StaDisconnected).await;
            warn!("Wifi association lost");
            Timer::after(Duration::from_millis(REASSOCIATE_DELAY_MS)).await;
        }

        if !matches!(controller.is_started(), Ok(true)) {
            let client_config = ModeConfig::Client(
                ClientConfig::default()
                    .with_ssid(config.ssid.into())
                    .with_password(config.password.into()),
            );
            if let Err(e) = controller.set_config(&client_config) {
                error!("Failed to configure Wi-Fi: {:?}", e);
                Timer::after(Duration::from_millis(REASSOCIATE_DELAY_MS)).await;
                continue;
            }
            if let Err(e) = controller.start_async().await {
                error!("Failed to start Wi-Fi: {:?}", e);
                Timer::after(Duration::from_millis(REASSOCIATE_DELAY_MS)).await;
                continue;
            }
            info!("Wifi started");
        }

        match controller.connect_async().await {
            Ok(_) => info!("Wifi associated"),
            Err(e) => {
                warn!("Failed to connect to Wifi: {:?}", e);
                Timer::after(Duration::from_millis(REASSOCIATE_DELAY_MS)).await;
            }
        }
    }
}

#[embassy_executor::task]
async fn net_task(mut runner: Runner<'static, WifiDevice<'static>>) -> ! {
    runner.run().await
}

#[derive(Error, Debug)]
pub enum LinkError {
    #[error("connect failed: {0:?}")]
    Connect(ConnectError),
    #[error("write failed: {0:?}")]
    Write(tcp::Error),
    #[error("connection closed")]
    Closed,
}

/// Telemetry link over a single embassy-net TCP socket
pub struct TcpLink<'a> {
    socket: TcpSocket<'a>,
}

impl<'a> TcpLink<'a> {
    pub fn new(stack: Stack<'a>, rx_buffer: &'a mut [u8], tx_buffer: &'a mut [u8]) -> Self {
        let mut socket = TcpSocket::new(stack, rx_buffer, tx_buffer);
        socket.set_timeout(Some(Duration::from_secs(SOCKET_TIMEOUT_SECS)));
        socket.set_keep_alive(Some(Duration::from_secs(KEEP_ALIVE_SECS)));
        Self { socket }
    }
}

impl Link for TcpLink<'_> {
    type Error = LinkError;

    async fn connect(&mut self, endpoint: Endpoint) -> Result<(), LinkError> {
        let [a, b, c, d] = endpoint.address;
        let remote = IpEndpoint::new(IpAddress::v4(a, b, c, d), endpoint.port);
        self.socket.connect(remote).await.map_err(LinkError::Connect)
    }

    fn is_connected(&self) -> bool {
        self.socket.state() == State::Established
    }

    async fn send(&mut self, mut bytes: &[u8]) -> Result<(), LinkError> {
        while !bytes.is_empty() {
            match self.socket.write(bytes).await {
                Ok(0) => return Err(LinkError::Closed),
                Ok(n) => bytes = &bytes[n..],
                Err(e) => return Err(LinkError::Write(e)),
            }
        }
        self.socket.flush().await.map_err(LinkError::Write)
    }

    async fn close(&mut self) {
        self.socket.close();
        self.socket.abort();
        let _ = self.socket.flush().await;
    }
}
