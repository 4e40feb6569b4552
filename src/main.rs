mod console;
mod diagnostic;
mod exchange;
mod logging;
#[cfg(test)]
mod mock;
mod resolver;
mod response;
mod transport;
mod transport_btleplug;
mod transport_serialport;

use anyhow::Context;
use clap::{Parser, Subcommand};
use exchange::Command;
use std::time::Duration;

#[cfg(windows)]
const DEFAULT_PORT: &str = "COM6";
#[cfg(not(windows))]
const DEFAULT_PORT: &str = "/dev/ttyACM0";

/// Diagnose and drive a Bluetooth buzzer over USB serial or BLE
#[derive(clap::Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Increase log verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Args)]
struct SerialArgs {
    /// Serial port the Arduino is attached to
    #[arg(short, long, default_value = DEFAULT_PORT)]
    port: String,
    /// Baud rate
    #[arg(short, long, default_value_t = 9600)]
    baud: u32,
}

impl SerialArgs {
    fn settings(&self) -> transport::SerialSettings {
        transport::SerialSettings::new(&self.port, self.baud)
    }
}

#[derive(clap::Args)]
struct BleArgs {
    /// Target device name fragment
    #[arg(short, long, default_value = resolver::DEFAULT_TARGET)]
    name: String,
    /// Discovery duration in seconds
    #[arg(long, default_value_t = 5)]
    scan_secs: u64,
}

#[derive(Subcommand)]
enum Commands {
    /// Step-by-step HC-06 hardware diagnostic over USB serial
    Diagnose {
        #[command(flatten)]
        serial: SerialArgs,
    },
    /// Send one command over USB serial and print the reply
    Send {
        #[command(flatten)]
        serial: SerialArgs,
        /// HELLO, BEEP, BEEP_ON, BEEP_OFF, AT+NAME? or AT+VERSION
        command: Command,
    },
    /// Talk to the buzzer over Bluetooth Low Energy
    Ble {
        #[command(flatten)]
        ble: BleArgs,
        #[command(subcommand)]
        action: BleAction,
    },
}

#[derive(Subcommand)]
enum BleAction {
    /// List every device found during discovery
    Scan,
    /// Send one buzzer command (AT queries are serial only)
    Send {
        /// HELLO, BEEP, BEEP_ON or BEEP_OFF
        command: Command,
    },
    /// Run HELLO, BEEP, BEEP_ON then BEEP_OFF
    Test,
    /// Read commands from stdin until QUIT
    Interactive,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    logging::init(args.verbose);

    match args.command {
        Commands::Diagnose { serial } => {
            let settings = serial.settings();
            let report = tokio::task::spawn_blocking(move || {
                let procedure = diagnostic::DiagnosticProcedure::standard(diagnostic::DiagnosticTimings::default());
                procedure.run(&transport_serialport::SerialConnectorSerialport, &settings)
            })
            .await?;
            println!("{}", report);
            std::process::exit(report.exit_code());
        }
        Commands::Send { serial, command } => {
            let settings = serial.settings();
            tokio::task::spawn_blocking(move || {
                console::serial_send(
                    &transport_serialport::SerialConnectorSerialport,
                    &settings,
                    command,
                    &console::SerialSendTimings::default(),
                )
            })
            .await??;
            Ok(())
        }
        Commands::Ble { ble, action } => {
            let central = transport_btleplug::BleCentralBtleplug::new()
                .await
                .context("Bluetooth is not available")?;
            let resolver = resolver::BleDeviceResolver::new(&central, Duration::from_secs(ble.scan_secs));
            match action {
                BleAction::Scan => console::ble_scan(&resolver).await.map(|_| ()),
                BleAction::Send { command } => console::ble_send(&resolver, &ble.name, command).await,
                BleAction::Test => {
                    console::ble_quick_test(&resolver, &ble.name, &console::QuickTestTimings::default()).await
                }
                BleAction::Interactive => {
                    let input = console::stdin_lines();
                    console::ble_interactive(&resolver, &ble.name, input, exchange::BLE_SETTLE).await
                }
            }
        }
    }
}
