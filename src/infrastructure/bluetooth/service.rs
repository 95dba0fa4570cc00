//! Watch Service Module
//!
//! Main service coordinating scanning, connection lifecycle, and time sync
//! for the watch link. All state transitions are serialized through a
//! single actor task: public calls and transport callbacks enter the same
//! command channel, so a `disconnect()` can never race an in-flight connect
//! callback into an inconsistent state.

use crate::domain::models::{ConnectedDeviceInfo, ConnectionState, DiscoveredDevice};
use crate::error::{Result, WatchError};
use crate::infrastructure::bluetooth::connection::{
    sync_time_to_watch, ConnectionConfig, ConnectionResult, WatchConnector,
};
use crate::infrastructure::bluetooth::notifier::{ConnectionChangeNotifier, Subscription};
use crate::infrastructure::bluetooth::protocol::CURRENT_TIME_SERVICE_UUID;
use crate::infrastructure::bluetooth::scanner::{DeviceScanner, ScanUpdateFn, DEFAULT_SCAN_WINDOW};
use crate::infrastructure::bluetooth::transport::{PeripheralLink, TransportEvent, WatchTransport};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{info, warn};
use uuid::Uuid;

/// Default interval between periodic time syncs.
pub const DEFAULT_SYNC_INTERVAL: Duration = Duration::from_secs(3600);

/// Service configuration, derived from persisted settings by the caller.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Service UUID the scan is restricted to.
    pub service_filter: Uuid,
    /// Length of one scan window.
    pub scan_window: Duration,
    /// Connect-sequence behavior.
    pub connection: ConnectionConfig,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            service_filter: CURRENT_TIME_SERVICE_UUID,
            scan_window: DEFAULT_SCAN_WINDOW,
            connection: ConnectionConfig::default(),
        }
    }
}

/// Point-in-time view of the connection. State and device metadata live in
/// one snapshot and are swapped together, so observers can never see them
/// disagree.
#[derive(Debug, Clone, Default)]
pub struct StatusSnapshot {
    pub state: ConnectionState,
    pub device: Option<ConnectedDeviceInfo>,
}

enum Command {
    Scan {
        on_update: ScanUpdateFn,
        reply: oneshot::Sender<Result<()>>,
    },
    Connect {
        device_id: String,
        reply: oneshot::Sender<Result<()>>,
    },
    Disconnect {
        reply: oneshot::Sender<Result<()>>,
    },
    SyncNow {
        reply: oneshot::Sender<Result<()>>,
    },
    EnablePeriodicSync {
        interval: Duration,
    },
    DisablePeriodicSync,
    // Internal messages
    ScanFinished {
        generation: u64,
    },
    ConnectFinished {
        generation: u64,
        result: Result<ConnectionResult>,
    },
    SyncTick,
    LinkDropped {
        device_id: String,
    },
    Shutdown,
}

/// Main watch service - public API for the application.
///
/// Owns the single active connection. Construct once at application
/// start-up and pass down to callers; queries are cheap and side-effect
/// free from any state.
pub struct WatchService {
    command_tx: mpsc::UnboundedSender<Command>,
    status_rx: watch::Receiver<StatusSnapshot>,
    notifier: Arc<ConnectionChangeNotifier>,
}

impl WatchService {
    /// Spawn the service actor on the current tokio runtime.
    pub fn new(transport: Arc<dyn WatchTransport>, config: ServiceConfig) -> Self {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = watch::channel(StatusSnapshot::default());
        let notifier = Arc::new(ConnectionChangeNotifier::new());

        let actor = ServiceActor {
            scanner: DeviceScanner::new(Arc::clone(&transport), config.scan_window),
            transport,
            config,
            command_tx: command_tx.clone(),
            status_tx,
            notifier: Arc::clone(&notifier),
            state: ConnectionState::Disconnected,
            link: None,
            device: None,
            pending_scan: None,
            pending_connect: None,
            sync_interval: None,
            sync_ticker: None,
            generation: 0,
        };
        tokio::spawn(actor.run(command_rx));

        Self {
            command_tx,
            status_rx,
            notifier,
        }
    }

    /// Scan for nearby watches. `on_update` receives the accumulated,
    /// ranked device list on every accepted advertisement. Resolves when
    /// the scan window closes; fails fast with `BluetoothUnavailable`.
    pub async fn scan_for_devices(
        &self,
        on_update: impl Fn(Vec<DiscoveredDevice>) + Send + Sync + 'static,
    ) -> Result<()> {
        self.request(|reply| Command::Scan {
            on_update: Arc::new(on_update),
            reply,
        })
        .await
    }

    /// Connect to a previously discovered device and push the current time
    /// to it. Rejected with `ConnectionBusy` while another connection is
    /// pending or established.
    pub async fn connect_to_device(&self, device_id: &str) -> Result<()> {
        self.request(|reply| Command::Connect {
            device_id: device_id.to_string(),
            reply,
        })
        .await
    }

    /// Tear down the active connection, or abort a pending attempt.
    /// Calling while already disconnected is a no-op.
    pub async fn disconnect(&self) -> Result<()> {
        self.request(|reply| Command::Disconnect { reply }).await
    }

    /// Push the current time to the watch now.
    pub async fn sync_time_to_watch(&self) -> Result<()> {
        self.request(|reply| Command::SyncNow { reply }).await
    }

    /// Schedule periodic time syncs while connected. Enabling again
    /// replaces the existing schedule.
    pub fn enable_periodic_sync(&self, interval: Duration) {
        let _ = self.command_tx.send(Command::EnablePeriodicSync { interval });
    }

    pub fn disable_periodic_sync(&self) {
        let _ = self.command_tx.send(Command::DisablePeriodicSync);
    }

    /// True while a device is connected.
    pub fn connection_status(&self) -> bool {
        self.status_rx.borrow().state == ConnectionState::Connected
    }

    /// Metadata of the connected device, `None` in every other state.
    pub fn device_info(&self) -> Option<ConnectedDeviceInfo> {
        self.status_rx.borrow().device.clone()
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.status_rx.borrow().state
    }

    /// Register a listener fired on every transition into or out of the
    /// connected state. The returned handle unsubscribes exactly that
    /// listener; dropping it without unsubscribing keeps the listener
    /// registered for the service's lifetime.
    pub fn on_connection_change(&self, listener: impl Fn(bool) + Send + Sync + 'static) -> Subscription {
        self.notifier.subscribe(listener)
    }

    async fn request(&self, make: impl FnOnce(oneshot::Sender<Result<()>>) -> Command) -> Result<()> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.command_tx
            .send(make(reply_tx))
            .map_err(|_| WatchError::ConnectionFailed("watch service stopped".to_string()))?;
        reply_rx
            .await
            .map_err(|_| WatchError::ConnectionFailed("watch service stopped".to_string()))?
    }
}

impl Drop for WatchService {
    fn drop(&mut self) {
        let _ = self.command_tx.send(Command::Shutdown);
    }
}

struct PendingScan {
    generation: u64,
    reply: oneshot::Sender<Result<()>>,
}

struct PendingConnect {
    generation: u64,
    task: JoinHandle<()>,
    reply: oneshot::Sender<Result<()>>,
}

struct ServiceActor {
    transport: Arc<dyn WatchTransport>,
    config: ServiceConfig,
    command_tx: mpsc::UnboundedSender<Command>,
    status_tx: watch::Sender<StatusSnapshot>,
    notifier: Arc<ConnectionChangeNotifier>,
    scanner: DeviceScanner,
    state: ConnectionState,
    link: Option<Arc<dyn PeripheralLink>>,
    device: Option<ConnectedDeviceInfo>,
    pending_scan: Option<PendingScan>,
    pending_connect: Option<PendingConnect>,
    sync_interval: Option<Duration>,
    sync_ticker: Option<JoinHandle<()>>,
    generation: u64,
}

impl ServiceActor {
    async fn run(mut self, mut command_rx: mpsc::UnboundedReceiver<Command>) {
        self.spawn_event_forwarder().await;

        while let Some(command) = command_rx.recv().await {
            if self.handle(command).await {
                break;
            }
        }

        self.scanner.stop().await;
        if let Some(pending) = self.pending_connect.take() {
            pending.task.abort();
        }
        if let Some(ticker) = self.sync_ticker.take() {
            ticker.abort();
        }
        if let Some(link) = self.link.take() {
            let _ = link.close().await;
        }
        info!("Watch service stopped");
    }

    /// Forward unsolicited transport disconnects into the command channel
    /// so they are observed on the same logical sequence as user calls.
    async fn spawn_event_forwarder(&self) {
        match self.transport.events().await {
            Ok(mut events) => {
                let command_tx = self.command_tx.clone();
                tokio::spawn(async move {
                    while let Some(event) = events.recv().await {
                        if let TransportEvent::Disconnected { device_id } = event {
                            if command_tx.send(Command::LinkDropped { device_id }).is_err() {
                                break;
                            }
                        }
                    }
                });
            }
            Err(e) => warn!("Transport events unavailable, unsolicited disconnects undetected: {}", e),
        }
    }

    /// Returns `true` on shutdown.
    async fn handle(&mut self, command: Command) -> bool {
        match command {
            Command::Scan { on_update, reply } => self.handle_scan(on_update, reply).await,
            Command::ScanFinished { generation } => self.handle_scan_finished(generation),
            Command::Connect { device_id, reply } => self.handle_connect(device_id, reply).await,
            Command::ConnectFinished { generation, result } => {
                self.handle_connect_finished(generation, result)
            }
            Command::Disconnect { reply } => self.handle_disconnect(reply).await,
            Command::SyncNow { reply } => self.handle_sync_now(reply),
            Command::SyncTick => self.handle_sync_tick(),
            Command::EnablePeriodicSync { interval } => {
                self.sync_interval = Some(interval);
                if self.state == ConnectionState::Connected {
                    self.start_sync_ticker(interval);
                }
            }
            Command::DisablePeriodicSync => {
                self.sync_interval = None;
                self.stop_sync_ticker();
            }
            Command::LinkDropped { device_id } => self.handle_link_dropped(device_id),
            Command::Shutdown => return true,
        }
        false
    }

    async fn handle_scan(&mut self, on_update: ScanUpdateFn, reply: oneshot::Sender<Result<()>>) {
        if matches!(
            self.state,
            ConnectionState::Connecting | ConnectionState::Connected
        ) {
            let _ = reply.send(Err(WatchError::ConnectionBusy));
            return;
        }

        self.generation += 1;
        let generation = self.generation;
        let command_tx = self.command_tx.clone();
        let on_finished = move || {
            let _ = command_tx.send(Command::ScanFinished { generation });
        };

        match self
            .scanner
            .start(self.config.service_filter, on_update, on_finished)
            .await
        {
            Ok(()) => {
                // A restarted window supersedes the previous caller
                if let Some(superseded) = self.pending_scan.take() {
                    let _ = superseded.reply.send(Ok(()));
                }
                self.pending_scan = Some(PendingScan { generation, reply });
                self.publish(ConnectionState::Scanning, None);
            }
            Err(e) => {
                // A restarted window that failed to start also ended the
                // previous one
                if let Some(superseded) = self.pending_scan.take() {
                    let _ = superseded.reply.send(Ok(()));
                }
                if self.state == ConnectionState::Scanning {
                    self.publish(ConnectionState::Disconnected, None);
                }
                let _ = reply.send(Err(e));
            }
        }
    }

    fn handle_scan_finished(&mut self, generation: u64) {
        if let Some(pending) = self.pending_scan.take() {
            if pending.generation == generation {
                let _ = pending.reply.send(Ok(()));
            } else {
                // Stale window
                self.pending_scan = Some(pending);
                return;
            }
        }
        if self.state == ConnectionState::Scanning {
            self.publish(ConnectionState::Disconnected, None);
        }
    }

    async fn handle_connect(&mut self, device_id: String, reply: oneshot::Sender<Result<()>>) {
        // At most one in-flight connection attempt; reject, never queue
        if matches!(
            self.state,
            ConnectionState::Connecting | ConnectionState::Connected
        ) {
            let _ = reply.send(Err(WatchError::ConnectionBusy));
            return;
        }

        if self.state == ConnectionState::Scanning {
            self.scanner.stop().await;
            if let Some(pending) = self.pending_scan.take() {
                let _ = pending.reply.send(Ok(()));
            }
        }

        self.generation += 1;
        let generation = self.generation;
        self.publish(ConnectionState::Connecting, None);

        let connector = WatchConnector::new(
            Arc::clone(&self.transport),
            self.config.connection.clone(),
        );
        let command_tx = self.command_tx.clone();
        let task = tokio::spawn(async move {
            let result = connector.connect(&device_id).await;
            let _ = command_tx.send(Command::ConnectFinished { generation, result });
        });

        self.pending_connect = Some(PendingConnect {
            generation,
            task,
            reply,
        });
    }

    fn handle_connect_finished(&mut self, generation: u64, result: Result<ConnectionResult>) {
        let Some(pending) = self.pending_connect.take() else {
            // Attempt was aborted; release a link that raced the abort
            if let Ok(result) = result {
                tokio::spawn(async move {
                    let _ = result.link.close().await;
                });
            }
            return;
        };
        if pending.generation != generation {
            self.pending_connect = Some(pending);
            if let Ok(result) = result {
                tokio::spawn(async move {
                    let _ = result.link.close().await;
                });
            }
            return;
        }

        match result {
            Ok(ConnectionResult { link, info }) => {
                let link: Arc<dyn PeripheralLink> = Arc::from(link);
                self.link = Some(Arc::clone(&link));
                self.publish(ConnectionState::Connected, Some(info));
                self.notifier.notify(true);
                let _ = pending.reply.send(Ok(()));

                // Best-effort initial sync; failure never reverts the state
                tokio::spawn(async move {
                    if let Err(e) = sync_time_to_watch(link.as_ref()).await {
                        warn!("Initial time sync failed: {}", e);
                    }
                });

                if let Some(interval) = self.sync_interval {
                    self.start_sync_ticker(interval);
                }
            }
            Err(e) => {
                warn!("Connection failed: {}", e);
                self.publish(ConnectionState::Disconnected, None);
                let _ = pending.reply.send(Err(e));
            }
        }
    }

    async fn handle_disconnect(&mut self, reply: oneshot::Sender<Result<()>>) {
        match self.state {
            ConnectionState::Connected => {
                self.stop_sync_ticker();
                if let Some(link) = self.link.take() {
                    if let Err(e) = link.close().await {
                        // Teardown error; state is forced regardless
                        warn!("{}", WatchError::DisconnectError(e.to_string()));
                    }
                }
                self.publish(ConnectionState::Disconnected, None);
                info!("Disconnected from device");
                self.notifier.notify(false);
                let _ = reply.send(Ok(()));
            }
            ConnectionState::Connecting => {
                if let Some(pending) = self.pending_connect.take() {
                    pending.task.abort();
                    let _ = pending.reply.send(Err(WatchError::ConnectionFailed(
                        "connection attempt aborted".to_string(),
                    )));
                }
                self.publish(ConnectionState::Disconnected, None);
                info!("Connection attempt aborted");
                let _ = reply.send(Ok(()));
            }
            // No-op from any other state, and no notification
            ConnectionState::Scanning | ConnectionState::Disconnected => {
                let _ = reply.send(Ok(()));
            }
        }
    }

    fn handle_sync_now(&mut self, reply: oneshot::Sender<Result<()>>) {
        match (&self.state, &self.link) {
            (ConnectionState::Connected, Some(link)) => {
                let link = Arc::clone(link);
                tokio::spawn(async move {
                    let result = sync_time_to_watch(link.as_ref()).await;
                    if let Err(e) = &result {
                        warn!("Time sync failed: {}", e);
                    }
                    let _ = reply.send(result);
                });
            }
            _ => {
                let _ = reply.send(Err(WatchError::SyncFailed("not connected".to_string())));
            }
        }
    }

    fn handle_sync_tick(&mut self) {
        if self.state != ConnectionState::Connected {
            return;
        }
        if let Some(link) = &self.link {
            let link = Arc::clone(link);
            tokio::spawn(async move {
                if let Err(e) = sync_time_to_watch(link.as_ref()).await {
                    warn!("Periodic time sync failed: {}", e);
                }
            });
        }
    }

    fn handle_link_dropped(&mut self, device_id: String) {
        let matches_current = self
            .device
            .as_ref()
            .is_some_and(|device| device.id == device_id);
        if self.state != ConnectionState::Connected || !matches_current {
            return;
        }

        warn!("Device {} dropped the link", device_id);
        self.stop_sync_ticker();
        self.link = None;
        self.publish(ConnectionState::Disconnected, None);
        self.notifier.notify(false);
    }

    fn start_sync_ticker(&mut self, interval: Duration) {
        self.stop_sync_ticker();
        let command_tx = self.command_tx.clone();
        self.sync_ticker = Some(tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                if command_tx.send(Command::SyncTick).is_err() {
                    break;
                }
            }
        }));
    }

    fn stop_sync_ticker(&mut self) {
        if let Some(ticker) = self.sync_ticker.take() {
            ticker.abort();
        }
    }

    /// Swap state and device metadata in one atomic snapshot.
    fn publish(&mut self, state: ConnectionState, device: Option<ConnectedDeviceInfo>) {
        self.state = state;
        self.device = device.clone();
        self.status_tx.send_replace(StatusSnapshot { state, device });
    }
}
