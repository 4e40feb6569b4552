use crate::response::{CollectSettings, ResponseOutcome, collect};
use crate::transport::{BleLink, Result, SerialLink, TransportError};

use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info};

/// Text commands understood by the buzzer firmware and the bridge module.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Command {
    Hello,
    Beep,
    BeepOn,
    BeepOff,
    /// Query the bridge module name; does not change device state
    AtNameQuery,
    AtVersion,
}

impl Command {
    /// Commands handled by the buzzer sketch itself
    pub const BUZZER: [Command; 4] = [Command::Beep, Command::BeepOn, Command::BeepOff, Command::Hello];

    pub fn as_str(self) -> &'static str {
        match self {
            Command::Hello => "HELLO",
            Command::Beep => "BEEP",
            Command::BeepOn => "BEEP_ON",
            Command::BeepOff => "BEEP_OFF",
            Command::AtNameQuery => "AT+NAME?",
            Command::AtVersion => "AT+VERSION",
        }
    }

    /// Bytes put on the wire, newline terminated
    pub fn wire_bytes(self) -> Vec<u8> {
        let mut bytes = self.as_str().as_bytes().to_vec();
        bytes.push(b'\n');
        bytes
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown command `{0}`, expected one of HELLO, BEEP, BEEP_ON, BEEP_OFF, AT+NAME?, AT+VERSION")]
pub struct UnknownCommand(pub String);

impl FromStr for Command {
    type Err = UnknownCommand;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "HELLO" => Ok(Command::Hello),
            "BEEP" => Ok(Command::Beep),
            "BEEP_ON" => Ok(Command::BeepOn),
            "BEEP_OFF" => Ok(Command::BeepOff),
            "AT+NAME?" => Ok(Command::AtNameQuery),
            "AT+VERSION" => Ok(Command::AtVersion),
            _ => Err(UnknownCommand(s.trim().to_owned())),
        }
    }
}

/// Delay after a BLE write before the exchange is considered done.
pub const BLE_SETTLE: Duration = Duration::from_millis(500);

/// Acknowledgement of a fire-and-settle exchange.
///
/// The write went out and the settle delay passed; nothing is known about
/// whether the peer acted on it.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct Settled {
    pub command: Command,
}

impl fmt::Display for Settled {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} sent (unconfirmed)", self.command)
    }
}

/// Sentinel-confirmed exchange: write `command` and wait for the reply.
pub fn send_confirmed<L: SerialLink + ?Sized>(
    link: &mut L,
    command: Command,
    window: &CollectSettings,
) -> Result<ResponseOutcome> {
    if !link.is_open() {
        error!("{} attempted on a closed serial link", command);
        return Err(TransportError::NotConnected);
    }
    link.write_all(&command.wire_bytes())?;
    info!("sent {}", command);
    let outcome = collect(link, window)?;
    info!("{} -> {:?}", command, outcome);
    Ok(outcome)
}

/// Fire-and-settle exchange: write `command` to the serial characteristic and wait `settle`.
pub async fn send_settled<L: BleLink>(link: &L, command: Command, settle: Duration) -> Result<Settled> {
    if !link.is_connected().await {
        error!("{} attempted on a disconnected peripheral", command);
        return Err(TransportError::NotConnected);
    }
    link.write_characteristic(hm10_uuids::SERIAL, &command.wire_bytes()).await?;
    info!("sent {}", command);
    tokio::time::sleep(settle).await;
    Ok(Settled { command })
}

/// HM-10 style serial bridge service & characteristic UUIDs
#[allow(dead_code)]
pub mod hm10_uuids {
    use uuid::Uuid;
    /// Serial bridge service (16 bit UUID 0xFFE0)
    pub const SERVICE: Uuid = Uuid::from_u128(0x0000FFE0_0000_1000_8000_00805F9B34FB);
    /// Read/write/notify serial characteristic (16 bit UUID 0xFFE1)
    pub const SERIAL: Uuid = Uuid::from_u128(0x0000FFE1_0000_1000_8000_00805F9B34FB);
}
