//! BLE target selection by fuzzy name match.

use crate::transport::{BleCentral, BleLink, ScanEntry, TransportError};

use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Name the buzzer sketch advertises, matched in addition to the caller's fragment.
pub const KNOWN_ALIAS: &str = "Space-Man-Buzzer";

pub const DEFAULT_TARGET: &str = "Arduino-Buzzer";

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("no device matching `{fragment}` among {} scanned", scanned.len())]
    NotFound { fragment: String, scanned: Vec<ScanEntry> },
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Whether an advertised name selects the target.
///
/// Unnamed devices never match. Matching is a case-insensitive substring test
/// against `KNOWN_ALIAS` and, when non-empty, `fragment`.
pub fn name_matches(name: Option<&str>, fragment: &str) -> bool {
    let Some(name) = name else {
        return false;
    };
    let name = name.to_lowercase();
    if name.contains(&KNOWN_ALIAS.to_lowercase()) {
        return true;
    }
    let fragment = fragment.trim();
    !fragment.is_empty() && name.contains(&fragment.to_lowercase())
}

/// First entry whose name matches, in scan order.
pub fn select<'a>(entries: &'a [ScanEntry], fragment: &str) -> Option<&'a ScanEntry> {
    entries.iter().find(|entry| name_matches(entry.name.as_deref(), fragment))
}

pub struct BleDeviceResolver<'a, C: BleCentral> {
    central: &'a C,
    scan_duration: Duration,
}

impl<'a, C: BleCentral> BleDeviceResolver<'a, C> {
    pub fn new(central: &'a C, scan_duration: Duration) -> Self {
        BleDeviceResolver { central, scan_duration }
    }

    /// Every device seen during one discovery window, unfiltered
    pub async fn scan(&self) -> Result<Vec<ScanEntry>, TransportError> {
        let entries = self.central.discover(self.scan_duration).await?;
        for entry in &entries {
            debug!("found: {}", entry);
        }
        Ok(entries)
    }

    /// Scan once and pick the first device matching `fragment` or the known alias.
    pub async fn resolve(&self, fragment: &str) -> Result<ScanEntry, ResolveError> {
        info!("scanning for BLE device: {}", fragment);
        let scanned = self.scan().await?;
        match select(&scanned, fragment) {
            Some(entry) => {
                info!("found target device: {}", entry);
                Ok(entry.clone())
            }
            None => Err(ResolveError::NotFound {
                fragment: fragment.to_owned(),
                scanned,
            }),
        }
    }

    /// Single connection attempt, no retry.
    pub async fn connect(&self, device: &ScanEntry) -> Result<C::Link, TransportError> {
        self.central.connect(&device.address).await.map_err(|e| match e {
            TransportError::ConnectFailed { .. } => e,
            other => TransportError::ConnectFailed {
                address: device.address.clone(),
                reason: other.to_string(),
            },
        })
    }

    /// Connect, run `f`, and disconnect whatever `f` returned, Ctrl-C included.
    pub async fn with_device<T, E, F>(&self, device: &ScanEntry, f: F) -> Result<T, E>
    where
        E: From<TransportError>,
        F: AsyncFnOnce(&C::Link) -> Result<T, E>,
    {
        self.with_device_until(device, ctrl_c_pressed(), f).await
    }

    /// Like `with_device`, abandoning `f` with `Cancelled` once `cancel` completes.
    pub async fn with_device_until<T, E, F, X>(&self, device: &ScanEntry, cancel: X, f: F) -> Result<T, E>
    where
        E: From<TransportError>,
        F: AsyncFnOnce(&C::Link) -> Result<T, E>,
        X: Future<Output = ()>,
    {
        let link = self.connect(device).await?;
        let result = tokio::select! {
            biased;
            result = f(&link) => result,
            () = cancel => {
                warn!("cancelled, releasing {}", device.address);
                Err(TransportError::Cancelled.into())
            }
        };
        if let Err(e) = link.disconnect().await {
            warn!("failed to disconnect from {}: {}", device.address, e);
        }
        result
    }
}

async fn ctrl_c_pressed() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("cannot listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
}
