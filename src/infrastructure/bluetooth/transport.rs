//! BLE Transport Abstraction
//!
//! Wraps the platform BLE stack behind narrow traits so the scanner and the
//! connection manager never touch `btleplug` types directly. The production
//! implementation is backed by a `btleplug` adapter; tests substitute a
//! scripted transport.

use crate::error::{Result, WatchError};
use async_trait::async_trait;
use btleplug::api::{Central, CentralEvent, Manager as _, Peripheral as _, ScanFilter, WriteType};
use btleplug::platform::{Adapter, Manager, Peripheral};
use futures::StreamExt;
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

/// A single advertisement observation.
#[derive(Debug, Clone)]
pub struct Advertisement {
    pub device_id: String,
    pub name: Option<String>,
    pub rssi: Option<i16>,
    /// Service UUIDs carried in the advertisement, possibly empty on
    /// platforms that filter at the radio level.
    pub services: Vec<Uuid>,
}

/// Asynchronous events delivered by the adapter.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    Advertisement(Advertisement),
    /// The peripheral dropped the link without a local `disconnect()` call.
    Disconnected { device_id: String },
}

/// Adapter-level operations consumed by the scanner and connection manager.
#[async_trait]
pub trait WatchTransport: Send + Sync {
    /// Subscribe to adapter events. Each call yields an independent stream.
    async fn events(&self) -> Result<mpsc::UnboundedReceiver<TransportEvent>>;

    /// Start an active scan restricted to the given service UUID.
    async fn start_scan(&self, service_filter: Uuid) -> Result<()>;

    /// Stop an in-progress scan.
    async fn stop_scan(&self) -> Result<()>;

    /// Establish a link to a previously discovered peripheral.
    async fn open_link(&self, device_id: &str) -> Result<Box<dyn PeripheralLink>>;
}

/// Operations against one connected peripheral.
#[async_trait]
pub trait PeripheralLink: Send + Sync {
    fn device_id(&self) -> String;

    /// Advertised local name, if the peripheral exposes one.
    async fn local_name(&self) -> Option<String>;

    /// Run GATT discovery and return the peripheral's service table.
    async fn discover_services(&self) -> Result<Vec<Uuid>>;

    /// Write-with-response to a service/characteristic pair.
    async fn write_characteristic(
        &self,
        service: Uuid,
        characteristic: Uuid,
        payload: &[u8],
    ) -> Result<()>;

    /// Tear down the link.
    async fn close(&self) -> Result<()>;
}

/// Production transport backed by the first available btleplug adapter.
pub struct BtleplugTransport {
    adapter: Adapter,
}

impl BtleplugTransport {
    /// Bind to the platform's first Bluetooth adapter.
    pub async fn new() -> Result<Self> {
        let manager = Manager::new()
            .await
            .map_err(|e| WatchError::BluetoothUnavailable(e.to_string()))?;
        let adapter = manager
            .adapters()
            .await
            .map_err(|e| WatchError::BluetoothUnavailable(e.to_string()))?
            .into_iter()
            .next()
            .ok_or_else(|| {
                WatchError::BluetoothUnavailable("no bluetooth adapter found".to_string())
            })?;
        Ok(Self { adapter })
    }
}

#[async_trait]
impl WatchTransport for BtleplugTransport {
    async fn events(&self) -> Result<mpsc::UnboundedReceiver<TransportEvent>> {
        let mut stream = self
            .adapter
            .events()
            .await
            .map_err(|e| WatchError::BluetoothUnavailable(e.to_string()))?;

        let adapter = self.adapter.clone();
        let (tx, rx) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            while let Some(event) = stream.next().await {
                let mapped = match event {
                    CentralEvent::DeviceDiscovered(id) | CentralEvent::DeviceUpdated(id) => {
                        let Ok(peripheral) = adapter.peripheral(&id).await else {
                            continue;
                        };
                        let Ok(Some(props)) = peripheral.properties().await else {
                            continue;
                        };
                        TransportEvent::Advertisement(Advertisement {
                            device_id: id.to_string(),
                            name: props.local_name,
                            rssi: props.rssi,
                            services: props.services,
                        })
                    }
                    CentralEvent::DeviceDisconnected(id) => TransportEvent::Disconnected {
                        device_id: id.to_string(),
                    },
                    _ => continue,
                };
                if tx.send(mapped).is_err() {
                    // Subscriber gone
                    break;
                }
            }
        });

        Ok(rx)
    }

    async fn start_scan(&self, service_filter: Uuid) -> Result<()> {
        debug!("Starting adapter scan, filter: {}", service_filter);
        self.adapter
            .start_scan(ScanFilter {
                services: vec![service_filter],
            })
            .await
            .map_err(|e| WatchError::BluetoothUnavailable(e.to_string()))
    }

    async fn stop_scan(&self) -> Result<()> {
        self.adapter
            .stop_scan()
            .await
            .map_err(|e| WatchError::BluetoothUnavailable(e.to_string()))
    }

    async fn open_link(&self, device_id: &str) -> Result<Box<dyn PeripheralLink>> {
        let peripherals = self
            .adapter
            .peripherals()
            .await
            .map_err(|e| WatchError::ConnectionFailed(e.to_string()))?;

        let peripheral = peripherals
            .into_iter()
            .find(|p| p.id().to_string() == device_id)
            .ok_or_else(|| WatchError::DeviceNotFound(device_id.to_string()))?;

        peripheral.connect().await.map_err(map_connect_error)?;

        Ok(Box::new(BtleplugLink { peripheral }))
    }
}

/// Connected peripheral handle over a btleplug [`Peripheral`].
struct BtleplugLink {
    peripheral: Peripheral,
}

#[async_trait]
impl PeripheralLink for BtleplugLink {
    fn device_id(&self) -> String {
        self.peripheral.id().to_string()
    }

    async fn local_name(&self) -> Option<String> {
        self.peripheral
            .properties()
            .await
            .ok()
            .flatten()
            .and_then(|props| props.local_name)
    }

    async fn discover_services(&self) -> Result<Vec<Uuid>> {
        self.peripheral
            .discover_services()
            .await
            .map_err(|e| WatchError::ConnectionFailed(e.to_string()))?;
        Ok(self
            .peripheral
            .services()
            .into_iter()
            .map(|s| s.uuid)
            .collect())
    }

    async fn write_characteristic(
        &self,
        service: Uuid,
        characteristic: Uuid,
        payload: &[u8],
    ) -> Result<()> {
        let target = self
            .peripheral
            .characteristics()
            .into_iter()
            .find(|c| c.uuid == characteristic && c.service_uuid == service)
            .ok_or_else(|| {
                WatchError::ConnectionFailed(format!(
                    "characteristic {} not found under service {}",
                    characteristic, service
                ))
            })?;

        self.peripheral
            .write(&target, payload, WriteType::WithResponse)
            .await
            .map_err(|e| WatchError::ConnectionFailed(e.to_string()))
    }

    async fn close(&self) -> Result<()> {
        self.peripheral
            .disconnect()
            .await
            .map_err(|e| WatchError::DisconnectError(e.to_string()))
    }
}

fn map_connect_error(err: btleplug::Error) -> WatchError {
    match err {
        btleplug::Error::PermissionDenied => WatchError::BluetoothUnavailable(err.to_string()),
        btleplug::Error::DeviceNotFound => WatchError::DeviceNotFound(err.to_string()),
        btleplug::Error::TimedOut(duration) => WatchError::ConnectionTimeout(duration),
        other => WatchError::ConnectionFailed(other.to_string()),
    }
}
