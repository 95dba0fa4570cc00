//! BLE Scanner Module
//!
//! Windowed discovery of nearby watches. Advertisements are de-duplicated
//! by device id, ranked by descending signal strength, and reported to the
//! caller as the full accumulated list on every accepted advertisement.

use crate::domain::models::DiscoveredDevice;
use crate::error::Result;
use crate::infrastructure::bluetooth::transport::{Advertisement, TransportEvent, WatchTransport};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use uuid::Uuid;

/// Hard upper bound on a scan window.
pub const DEFAULT_SCAN_WINDOW: Duration = Duration::from_secs(10);

/// Callback receiving the accumulated, ranked device list.
pub type ScanUpdateFn = Arc<dyn Fn(Vec<DiscoveredDevice>) + Send + Sync>;

/// Accumulates advertisements for one scan window.
#[derive(Default)]
pub(crate) struct ScanAccumulator {
    devices: HashMap<String, DiscoveredDevice>,
}

impl ScanAccumulator {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Fold one advertisement into the set. Returns the ranked list when
    /// the advertisement was accepted, `None` when it was filtered out.
    pub(crate) fn observe(
        &mut self,
        ad: &Advertisement,
        service_filter: Uuid,
    ) -> Option<Vec<DiscoveredDevice>> {
        // Unranked without a signal strength reading
        let rssi = ad.rssi?;

        // Some platforms filter at the radio and omit service UUIDs from
        // the event; an explicit mismatch is still rejected here.
        if !ad.services.is_empty() && !ad.services.contains(&service_filter) {
            return None;
        }

        let name = ad
            .name
            .clone()
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| "Unknown".to_string());

        self.devices.insert(
            ad.device_id.clone(),
            DiscoveredDevice {
                id: ad.device_id.clone(),
                name,
                rssi,
            },
        );

        Some(self.ranked())
    }

    /// Strongest signal first; id as a deterministic tie-break.
    fn ranked(&self) -> Vec<DiscoveredDevice> {
        let mut list: Vec<DiscoveredDevice> = self.devices.values().cloned().collect();
        list.sort_by(|a, b| b.rssi.cmp(&a.rssi).then_with(|| a.id.cmp(&b.id)));
        list
    }
}

/// BLE scanner driving one bounded discovery window at a time.
pub struct DeviceScanner {
    transport: Arc<dyn WatchTransport>,
    window: Duration,
    task: Option<JoinHandle<()>>,
}

impl DeviceScanner {
    pub fn new(transport: Arc<dyn WatchTransport>, window: Duration) -> Self {
        Self {
            transport,
            window,
            task: None,
        }
    }

    /// Start a scan window, restarting and clearing accumulated results if
    /// one is already active. `on_update` fires on every accepted
    /// advertisement; `on_finished` fires once when the window closes.
    ///
    /// Fails with `BluetoothUnavailable` when the radio is off or access
    /// is denied.
    pub async fn start(
        &mut self,
        service_filter: Uuid,
        on_update: ScanUpdateFn,
        on_finished: impl FnOnce() + Send + 'static,
    ) -> Result<()> {
        self.stop().await;

        let mut events = self.transport.events().await?;
        self.transport.start_scan(service_filter).await?;
        info!("Starting BLE scan for service UUID: {}", service_filter);

        let transport = Arc::clone(&self.transport);
        let window = self.window;

        self.task = Some(tokio::spawn(async move {
            let mut accumulated = ScanAccumulator::new();
            let deadline = tokio::time::sleep(window);
            tokio::pin!(deadline);

            loop {
                tokio::select! {
                    _ = &mut deadline => break,
                    event = events.recv() => match event {
                        Some(TransportEvent::Advertisement(ad)) => {
                            if let Some(list) = accumulated.observe(&ad, service_filter) {
                                on_update(list);
                            }
                        }
                        Some(TransportEvent::Disconnected { .. }) => {}
                        None => break,
                    }
                }
            }

            if let Err(e) = transport.stop_scan().await {
                warn!("Failed to stop scan at window end: {}", e);
            }
            info!("Scan window ended");
            on_finished();
        }));

        Ok(())
    }

    /// Abort an in-progress window. The last reported list stays valid on
    /// the consumer side.
    pub async fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            // A window that already closed stopped the radio itself
            if task.is_finished() {
                return;
            }
            task.abort();
            if let Err(e) = self.transport.stop_scan().await {
                warn!("Failed to stop scan: {}", e);
            }
            info!("Stopping BLE scan...");
        }
    }

    pub fn is_scanning(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }
}

impl Drop for DeviceScanner {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::WatchError;
    use crate::infrastructure::bluetooth::protocol::CURRENT_TIME_SERVICE_UUID;
    use crate::infrastructure::bluetooth::transport::PeripheralLink;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tokio::sync::mpsc;

    fn ad(id: &str, name: Option<&str>, rssi: Option<i16>) -> Advertisement {
        Advertisement {
            device_id: id.to_string(),
            name: name.map(str::to_string),
            rssi,
            services: vec![CURRENT_TIME_SERVICE_UUID],
        }
    }

    #[test]
    fn test_devices_ranked_by_descending_rssi() {
        let mut acc = ScanAccumulator::new();
        acc.observe(&ad("a", Some("Watch A"), Some(-80)), CURRENT_TIME_SERVICE_UUID);
        acc.observe(&ad("b", Some("Watch B"), Some(-40)), CURRENT_TIME_SERVICE_UUID);
        let list = acc
            .observe(&ad("c", Some("Watch C"), Some(-60)), CURRENT_TIME_SERVICE_UUID)
            .unwrap();

        let rssis: Vec<i16> = list.iter().map(|d| d.rssi).collect();
        assert_eq!(rssis, vec![-40, -60, -80]);
    }

    #[test]
    fn test_repeated_advertisements_deduplicate() {
        let mut acc = ScanAccumulator::new();
        acc.observe(&ad("a", Some("Watch"), Some(-70)), CURRENT_TIME_SERVICE_UUID);
        let list = acc
            .observe(&ad("a", Some("Watch"), Some(-50)), CURRENT_TIME_SERVICE_UUID)
            .unwrap();

        assert_eq!(list.len(), 1);
        assert_eq!(list[0].rssi, -50);
    }

    #[test]
    fn test_advertisement_without_rssi_is_skipped() {
        let mut acc = ScanAccumulator::new();
        assert!(acc
            .observe(&ad("a", Some("Watch"), None), CURRENT_TIME_SERVICE_UUID)
            .is_none());
    }

    #[test]
    fn test_foreign_service_is_filtered_out() {
        let mut acc = ScanAccumulator::new();
        let mut foreign = ad("a", Some("Other"), Some(-50));
        foreign.services = vec![Uuid::nil()];
        assert!(acc.observe(&foreign, CURRENT_TIME_SERVICE_UUID).is_none());
    }

    #[test]
    fn test_missing_name_reported_as_unknown() {
        let mut acc = ScanAccumulator::new();
        let list = acc
            .observe(&ad("a", None, Some(-50)), CURRENT_TIME_SERVICE_UUID)
            .unwrap();
        assert_eq!(list[0].name, "Unknown");
    }

    #[derive(Default)]
    struct StubTransport {
        senders: Mutex<Vec<mpsc::UnboundedSender<TransportEvent>>>,
        stop_calls: AtomicUsize,
    }

    #[async_trait]
    impl WatchTransport for StubTransport {
        async fn events(&self) -> Result<mpsc::UnboundedReceiver<TransportEvent>> {
            let (tx, rx) = mpsc::unbounded_channel();
            self.senders.lock().unwrap().push(tx);
            Ok(rx)
        }

        async fn start_scan(&self, _service_filter: Uuid) -> Result<()> {
            Ok(())
        }

        async fn stop_scan(&self) -> Result<()> {
            self.stop_calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn open_link(&self, device_id: &str) -> Result<Box<dyn PeripheralLink>> {
            Err(WatchError::DeviceNotFound(device_id.to_string()))
        }
    }

    #[tokio::test]
    async fn test_stop_after_window_end_is_a_noop() {
        let transport = Arc::new(StubTransport::default());
        let mut scanner = DeviceScanner::new(
            Arc::clone(&transport) as Arc<dyn WatchTransport>,
            Duration::from_millis(10),
        );

        let finished = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&finished);
        scanner
            .start(CURRENT_TIME_SERVICE_UUID, Arc::new(|_| {}), move || {
                flag.store(true, Ordering::SeqCst);
            })
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(finished.load(Ordering::SeqCst));
        assert!(!scanner.is_scanning());

        // The window already stopped the radio once on its way out
        scanner.stop().await;
        assert_eq!(transport.stop_calls.load(Ordering::SeqCst), 1);
    }
}
