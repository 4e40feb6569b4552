use std::time::Duration;

use thiserror::Error;

/// Failures raised by the serial and BLE transports.
///
/// Response timeouts are not errors; they surface as a `ResponseOutcome`.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("could not open {target}: {reason}")]
    Open { target: String, reason: String },
    #[error("connection to {address} failed: {reason}")]
    ConnectFailed { address: String, reason: String },
    #[error("transport is not connected")]
    NotConnected,
    #[error("cancelled")]
    Cancelled,
    #[error("characteristic {0} not found on device")]
    CharacteristicMissing(uuid::Uuid),
    #[error("serial I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("bluetooth error: {0}")]
    Ble(#[from] btleplug::Error),
}

pub type Result<T> = std::result::Result<T, TransportError>;

/// Parameters used to open a serial port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerialSettings {
    pub port: String,
    pub baud: u32,
    pub read_timeout: Duration,
}

impl SerialSettings {
    pub fn new(port: impl Into<String>, baud: u32) -> Self {
        SerialSettings {
            port: port.into(),
            baud,
            read_timeout: Duration::from_secs(1),
        }
    }
}

/// Byte-oriented serial channel, polled without blocking.
pub trait SerialLink {
    /// Whether the port is still open
    fn is_open(&self) -> bool;
    /// Write all bytes in one call
    fn write_all(&mut self, bytes: &[u8]) -> Result<()>;
    /// Number of bytes waiting in the receive buffer
    fn bytes_available(&mut self) -> Result<usize>;
    /// Drain whatever is currently buffered
    fn read_available(&mut self) -> Result<Vec<u8>>;
    /// Release the port; further calls report `NotConnected`
    fn close(&mut self);
}

/// Opens serial links.
pub trait SerialConnector {
    type Link: SerialLink;

    fn open(&self, settings: &SerialSettings) -> Result<Self::Link>;
}

/// One device seen during BLE discovery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanEntry {
    pub name: Option<String>,
    pub address: String,
}

impl ScanEntry {
    pub fn new(name: Option<&str>, address: &str) -> Self {
        ScanEntry {
            name: name.map(str::to_owned),
            address: address.to_owned(),
        }
    }
}

impl std::fmt::Display for ScanEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} - {}", self.name.as_deref().unwrap_or("None"), self.address)
    }
}

/// BLE radio: discovery and connection
pub trait BleCentral {
    type Link: BleLink;

    /// Scan for `duration` and report every device seen
    async fn discover(&self, duration: Duration) -> Result<Vec<ScanEntry>>;
    /// Connect to the device with the given address, once
    async fn connect(&self, address: &str) -> Result<Self::Link>;
}

/// Connected BLE peripheral
pub trait BleLink {
    async fn is_connected(&self) -> bool;
    /// Write a value to a GATT characteristic
    async fn write_characteristic(&self, char: uuid::Uuid, bytes: &[u8]) -> Result<()>;
    async fn disconnect(&self) -> Result<()>;
}
