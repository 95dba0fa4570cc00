//! BLE Connection Module
//!
//! Drives the connect sub-steps against the transport: open the link, run
//! GATT discovery, derive device metadata. Also hosts the time-sync write
//! that runs once per successful connection and on the periodic schedule.

use crate::domain::models::{ConnectedDeviceInfo, DeviceCapabilities};
use crate::error::{Result, WatchError};
use crate::infrastructure::bluetooth::protocol::{
    TimeSyncPayload, BATTERY_SERVICE_UUID, CURRENT_TIME_CHAR_UUID, CURRENT_TIME_SERVICE_UUID,
    DEVICE_INFORMATION_SERVICE_UUID,
};
use crate::infrastructure::bluetooth::transport::{PeripheralLink, WatchTransport};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};
use uuid::Uuid;

/// Configuration for connection behavior
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Upper bound on the whole connect sequence (link + discovery). The
    /// platform stack imposes no bound of its own, so one is enforced here.
    pub connect_timeout: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(20),
        }
    }
}

/// Result of a successful connection
pub struct ConnectionResult {
    pub link: Box<dyn PeripheralLink>,
    pub info: ConnectedDeviceInfo,
}

/// BLE connection handler
pub struct WatchConnector {
    transport: Arc<dyn WatchTransport>,
    config: ConnectionConfig,
}

impl WatchConnector {
    pub fn new(transport: Arc<dyn WatchTransport>, config: ConnectionConfig) -> Self {
        Self { transport, config }
    }

    /// Connect to a device by identifier.
    ///
    /// Fails with `ConnectionTimeout` when the sequence exceeds its bound,
    /// `ConnectionFailed` (or `DeviceNotFound`) on any sub-step error.
    pub async fn connect(&self, device_id: &str) -> Result<ConnectionResult> {
        info!("Connecting to device: {}", device_id);
        tokio::time::timeout(self.config.connect_timeout, self.connect_inner(device_id))
            .await
            .map_err(|_| WatchError::ConnectionTimeout(self.config.connect_timeout))?
    }

    async fn connect_inner(&self, device_id: &str) -> Result<ConnectionResult> {
        // Step 1: Establish the link
        let link = self.transport.open_link(device_id).await?;

        // Step 2: GATT discovery; a dangling link is closed on failure
        let services = match link.discover_services().await {
            Ok(services) => services,
            Err(e) => {
                let _ = link.close().await;
                return Err(e);
            }
        };
        debug!("Discovered {} services", services.len());

        // Step 3: Device metadata
        let name = link
            .local_name()
            .await
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| "Watch".to_string());
        let info = ConnectedDeviceInfo {
            id: link.device_id(),
            name,
            capabilities: capabilities_from_services(&services),
        };
        info!("Device connected: {:?}", info.name);

        Ok(ConnectionResult { link, info })
    }
}

/// Derive capability flags from the discovered service table.
pub fn capabilities_from_services(services: &[Uuid]) -> DeviceCapabilities {
    DeviceCapabilities {
        current_time: services.contains(&CURRENT_TIME_SERVICE_UUID),
        battery: services.contains(&BATTERY_SERVICE_UUID),
        device_information: services.contains(&DEVICE_INFORMATION_SERVICE_UUID),
    }
}

/// Push the current local wall-clock time to the watch.
///
/// Builds a fresh payload, performs a write-with-response to the Current
/// Time characteristic. Any failure is reported as `SyncFailed`; the caller
/// treats it as non-fatal to the connection.
pub async fn sync_time_to_watch(link: &dyn PeripheralLink) -> Result<()> {
    let payload = TimeSyncPayload::now();
    debug!("Writing time-sync payload: {:02X?}", payload.to_bytes());

    link.write_characteristic(
        CURRENT_TIME_SERVICE_UUID,
        CURRENT_TIME_CHAR_UUID,
        &payload.to_bytes(),
    )
    .await
    .map_err(|e| WatchError::SyncFailed(e.to_string()))?;

    info!("Time synced to watch");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capabilities_from_service_table() {
        let caps = capabilities_from_services(&[CURRENT_TIME_SERVICE_UUID, BATTERY_SERVICE_UUID]);
        assert!(caps.current_time);
        assert!(caps.battery);
        assert!(!caps.device_information);
    }

    #[test]
    fn test_empty_service_table_has_no_capabilities() {
        assert_eq!(capabilities_from_services(&[]), DeviceCapabilities::default());
    }
}
