use anyhow::Context;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::info;
use uuid::Uuid;
use watchlink::domain::settings::{Settings, SettingsService};
use watchlink::infrastructure::bluetooth::connection::ConnectionConfig;
use watchlink::infrastructure::logging;
use watchlink::{BtleplugTransport, ServiceConfig, WatchService};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let mut settings = SettingsService::new()?;
    let _logging_guard = logging::init_logger(&settings.get().log_settings)?;
    info!("Starting watchlink");

    let config = service_config(settings.get())?;
    let sync_interval = Duration::from_secs(settings.get().sync_interval_secs);
    let periodic_sync = settings.get().periodic_sync_enabled;

    let transport = Arc::new(BtleplugTransport::new().await?);
    let service = WatchService::new(transport, config);

    let _subscription = service.on_connection_change(|connected| {
        if connected {
            info!("Watch connected");
        } else {
            info!("Watch disconnected");
        }
    });

    // Target from the command line, falling back to the last device used
    let target = std::env::args()
        .nth(1)
        .or_else(|| settings.get().last_connected_device.clone());

    let device_id = match target {
        Some(id) => id,
        None => {
            info!("Scanning for watches...");
            let found = Arc::new(Mutex::new(Vec::new()));
            let sink = Arc::clone(&found);
            service
                .scan_for_devices(move |devices| {
                    for device in &devices {
                        info!("  {} ({} dBm) {}", device.name, device.rssi, device.id);
                    }
                    *sink.lock().expect("scan results poisoned") = devices;
                })
                .await?;

            let devices = found.lock().expect("scan results poisoned");
            devices
                .first()
                .context("no watch found during scan")?
                .id
                .clone()
        }
    };

    service.connect_to_device(&device_id).await?;
    settings.record_connected_device(&device_id)?;
    if periodic_sync {
        service.enable_periodic_sync(sync_interval);
    }

    info!("Link up, press Ctrl-C to exit");
    tokio::signal::ctrl_c().await?;

    service.disconnect().await?;
    Ok(())
}

fn service_config(settings: &Settings) -> anyhow::Result<ServiceConfig> {
    let service_filter = Uuid::parse_str(&settings.ble_service_uuid)
        .context("invalid ble_service_uuid in settings")?;
    Ok(ServiceConfig {
        service_filter,
        scan_window: Duration::from_secs(settings.scan_window_secs),
        connection: ConnectionConfig {
            connect_timeout: Duration::from_secs(settings.connect_timeout_secs),
        },
    })
}
