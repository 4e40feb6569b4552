//! Command handlers behind the CLI.

use crate::exchange::{BLE_SETTLE, Command, send_confirmed, send_settled};
use crate::resolver::{BleDeviceResolver, ResolveError};
use crate::response::{CollectSettings, ResponseOutcome};
use crate::transport::{BleCentral, ScanEntry, SerialConnector, SerialLink, SerialSettings, TransportError};

use anyhow::{Context, Result};
use std::io::Write;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::warn;

#[derive(Debug, Clone)]
pub struct SerialSendTimings {
    /// The board resets when the port opens
    pub boot_wait: Duration,
    pub reply_window: Duration,
}

impl Default for SerialSendTimings {
    fn default() -> Self {
        SerialSendTimings {
            boot_wait: Duration::from_secs(2),
            reply_window: Duration::from_secs(10),
        }
    }
}

/// Open the port, send one command, print the reply and close.
pub fn serial_send<C: SerialConnector>(
    connector: &C,
    settings: &SerialSettings,
    command: Command,
    timings: &SerialSendTimings,
) -> Result<ResponseOutcome> {
    let mut link = connector
        .open(settings)
        .with_context(|| format!("Failed to open serial port {}", settings.port))?;
    println!("Connected on {} ({} baud)", settings.port, settings.baud);
    std::thread::sleep(timings.boot_wait);

    let window = CollectSettings::new(timings.reply_window);
    let outcome = send_confirmed(&mut link, command, &window);
    link.close();
    let outcome = outcome.with_context(|| format!("Failed to send {}", command))?;

    println!("Sent command: {}", command);
    match &outcome {
        ResponseOutcome::Empty => println!("No response received within {} seconds", timings.reply_window.as_secs()),
        outcome => println!("Received: {:?}", outcome.text()),
    }
    Ok(outcome)
}

fn print_scan(entries: &[ScanEntry]) {
    for entry in entries {
        println!("  {}", entry);
    }
}

pub async fn ble_scan<C: BleCentral>(resolver: &BleDeviceResolver<'_, C>) -> Result<Vec<ScanEntry>> {
    let entries = resolver.scan().await?;
    println!("Found {} devices:", entries.len());
    print_scan(&entries);
    Ok(entries)
}

/// Resolve the target; on a miss, show everything that was seen instead.
async fn resolve_or_list<C: BleCentral>(resolver: &BleDeviceResolver<'_, C>, name: &str) -> Result<ScanEntry> {
    match resolver.resolve(name).await {
        Ok(device) => {
            println!("Found target device: {}", device);
            Ok(device)
        }
        Err(ResolveError::NotFound { fragment, scanned }) => {
            println!("Device '{}' not found", fragment);
            println!("Available devices:");
            print_scan(&scanned);
            anyhow::bail!("no device matching `{}`", fragment)
        }
        Err(e) => Err(e.into()),
    }
}

pub async fn ble_send<C: BleCentral>(resolver: &BleDeviceResolver<'_, C>, name: &str, command: Command) -> Result<()> {
    anyhow::ensure!(
        Command::BUZZER.contains(&command),
        "{} is a serial AT query; over BLE use HELLO, BEEP, BEEP_ON or BEEP_OFF",
        command
    );
    let device = resolve_or_list(resolver, name).await?;
    resolver
        .with_device(&device, async |link| {
            let settled = send_settled(link, command, BLE_SETTLE).await?;
            println!("{}", settled);
            Ok::<(), anyhow::Error>(())
        })
        .await
}

#[derive(Debug, Clone)]
pub struct QuickTestTimings {
    /// Wait after connecting before the first write
    pub stabilize: Duration,
    pub between: Duration,
    pub settle: Duration,
}

impl Default for QuickTestTimings {
    fn default() -> Self {
        QuickTestTimings {
            stabilize: Duration::from_secs(1),
            between: Duration::from_secs(2),
            settle: BLE_SETTLE,
        }
    }
}

/// HELLO, BEEP and BEEP_ON in turn, then BEEP_OFF.
pub async fn ble_quick_test<C: BleCentral>(
    resolver: &BleDeviceResolver<'_, C>,
    name: &str,
    timings: &QuickTestTimings,
) -> Result<()> {
    println!("BLE Buzzer Quick Test");
    println!("{}", "=".repeat(30));
    let device = resolve_or_list(resolver, name).await?;
    resolver
        .with_device(&device, async |link| {
            println!("Connected to {}", device);
            tokio::time::sleep(timings.stabilize).await;
            for command in [Command::Hello, Command::Beep, Command::BeepOn] {
                println!("\nTesting: {}", command);
                println!("{}", send_settled(link, command, timings.settle).await?);
                tokio::time::sleep(timings.between).await;
            }
            println!("\nStopping continuous tone...");
            println!("{}", send_settled(link, Command::BeepOff, timings.settle).await?);
            Ok::<(), anyhow::Error>(())
        })
        .await
}

const INTERACTIVE_HELP: &str = "\
BLE Buzzer Control Commands:
BEEP - Play musical sequence
BEEP_ON - Continuous tone
BEEP_OFF - Stop tone
HELLO - Test connection
QUIT - Exit";

/// Lines typed on stdin.
///
/// Read on a plain thread: a blocking read there does not hold up runtime
/// shutdown the way a pending `tokio::io::stdin` read does.
pub fn stdin_lines() -> mpsc::Receiver<String> {
    let (tx, rx) = mpsc::channel(16);
    std::thread::spawn(move || {
        for line in std::io::stdin().lines() {
            match line {
                Ok(line) => {
                    if tx.blocking_send(line).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    warn!("stdin read failed: {}", e);
                    break;
                }
            }
        }
    });
    rx
}

/// Send buzzer commands taken from `input` until QUIT, end of input or Ctrl-C.
pub async fn ble_interactive<C: BleCentral>(
    resolver: &BleDeviceResolver<'_, C>,
    name: &str,
    mut input: mpsc::Receiver<String>,
    settle: Duration,
) -> Result<()> {
    let device = resolve_or_list(resolver, name).await?;
    let result = resolver
        .with_device(&device, async |link| {
            println!("\n{}\n", INTERACTIVE_HELP);
            loop {
                print!("Enter command: ");
                std::io::stdout().flush()?;
                let Some(line) = input.recv().await else {
                    println!();
                    break;
                };
                let line = line.trim();
                if line.eq_ignore_ascii_case("QUIT") {
                    break;
                }
                match line.parse::<Command>() {
                    Ok(command) if Command::BUZZER.contains(&command) => {
                        println!("{}", send_settled(link, command, settle).await?);
                    }
                    _ => println!("Unknown command. Try: BEEP, BEEP_ON, BEEP_OFF, HELLO, QUIT"),
                }
            }
            Ok::<(), anyhow::Error>(())
        })
        .await;
    match result {
        Err(e) if matches!(e.downcast_ref::<TransportError>(), Some(TransportError::Cancelled)) => {
            println!();
            Ok(())
        }
        other => other,
    }
}
