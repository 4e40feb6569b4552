use crate::transport::{BleCentral, BleLink, Result, ScanEntry, TransportError};

use btleplug::api::{
    Central, CentralEvent, CharPropFlags, Characteristic, Manager as _, Peripheral as _, PeripheralProperties,
    ScanFilter, WriteType,
};
use btleplug::platform::{Adapter, Peripheral};
use futures::stream::StreamExt;
use indicatif::ProgressBar;
use std::time::Duration;
use tracing::{debug, info, warn};

pub struct BleCentralBtleplug {
    adapter: Adapter,
}

impl BleCentralBtleplug {
    pub async fn new() -> Result<Self> {
        let manager = btleplug::platform::Manager::new().await?;
        let adapters = manager.adapters().await?;
        if let Some(adapter) = adapters.into_iter().next() {
            Ok(BleCentralBtleplug { adapter })
        } else {
            Err(TransportError::Open {
                target: "bluetooth".into(),
                reason: "no Bluetooth adapter found".into(),
            })
        }
    }

    fn format_peripheral_properties(properties: &PeripheralProperties) -> String {
        let name = properties.local_name.as_deref().unwrap_or("None");
        let addr = properties.address;
        let rssi = properties.rssi.unwrap_or(-99);
        format!("rssi: {}, address: {}, name: {}", rssi, addr, name)
    }

    /// Follow discovery events until the scan window closes, reporting progress on `pb`.
    async fn watch_events(&self, duration: Duration, pb: &ProgressBar) -> Result<()> {
        let mut events = self.adapter.events().await?;
        let watch = async {
            while let Some(event) = events.next().await {
                if let CentralEvent::DeviceDiscovered(id) = event {
                    let peripheral = self.adapter.peripheral(&id).await?;
                    if let Some(properties) = peripheral.properties().await? {
                        let line = Self::format_peripheral_properties(&properties);
                        debug!("discovered {}", line);
                        pb.set_message(line);
                    }
                }
            }
            Ok::<(), TransportError>(())
        };
        match tokio::time::timeout(duration, watch).await {
            Ok(result) => result,
            Err(_elapsed) => Ok(()),
        }
    }

    async fn find_by_address(&self, address: &str) -> Result<Option<Peripheral>> {
        for peripheral in self.adapter.peripherals().await? {
            if peripheral.address().to_string().eq_ignore_ascii_case(address) {
                return Ok(Some(peripheral));
            }
        }
        Ok(None)
    }
}

impl BleCentral for BleCentralBtleplug {
    type Link = BleLinkBtleplug;

    async fn discover(&self, duration: Duration) -> Result<Vec<ScanEntry>> {
        let pb = ProgressBar::new_spinner();
        pb.enable_steady_tick(Duration::from_millis(64));
        pb.println(format!("Scanning for {} s...", duration.as_secs_f32()));

        self.adapter.start_scan(ScanFilter::default()).await?;
        let watched = self.watch_events(duration, &pb).await;
        self.adapter.stop_scan().await?;
        pb.finish_and_clear();
        watched?;

        let mut entries = Vec::new();
        for peripheral in self.adapter.peripherals().await? {
            let name = peripheral.properties().await?.and_then(|props| props.local_name);
            entries.push(ScanEntry::new(name.as_deref(), &peripheral.address().to_string()));
        }
        info!("discovery finished, {} devices", entries.len());
        Ok(entries)
    }

    async fn connect(&self, address: &str) -> Result<Self::Link> {
        let connect_failed = |reason: String| TransportError::ConnectFailed {
            address: address.to_owned(),
            reason,
        };
        let peripheral = self
            .find_by_address(address)
            .await?
            .ok_or_else(|| connect_failed("device is no longer known to the adapter".into()))?;

        let pb = ProgressBar::new_spinner();
        pb.enable_steady_tick(Duration::from_millis(64));
        pb.set_message(format!("Connecting to {}...", address));
        let connected = async {
            peripheral.connect().await?;
            peripheral.discover_services().await?;
            Ok::<(), btleplug::Error>(())
        }
        .await;
        pb.finish_and_clear();
        connected.map_err(|e| connect_failed(e.to_string()))?;

        info!("connected to {}", address);
        Ok(BleLinkBtleplug { peripheral })
    }
}

pub struct BleLinkBtleplug {
    peripheral: Peripheral,
}

impl BleLinkBtleplug {
    fn characteristic(&self, uuid: uuid::Uuid) -> Result<Characteristic> {
        self.peripheral
            .characteristics()
            .into_iter()
            .find(|char| char.uuid == uuid)
            .ok_or(TransportError::CharacteristicMissing(uuid))
    }
}

impl BleLink for BleLinkBtleplug {
    async fn is_connected(&self) -> bool {
        self.peripheral.is_connected().await.unwrap_or(false)
    }

    async fn write_characteristic(&self, char: uuid::Uuid, bytes: &[u8]) -> Result<()> {
        let char = self.characteristic(char)?;
        let write_type = if char.properties.contains(CharPropFlags::WRITE_WITHOUT_RESPONSE) {
            WriteType::WithoutResponse
        } else {
            WriteType::WithResponse
        };
        self.peripheral.write(&char, bytes, write_type).await?;
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        if let Err(e) = self.peripheral.disconnect().await {
            warn!("disconnect failed: {}", e);
            return Err(e.into());
        }
        info!("disconnected from {}", self.peripheral.address());
        Ok(())
    }
}
