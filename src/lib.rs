//! watchlink - BLE link and time-sync core for a wearable companion app.
//!
//! Pairs the host application with a watch over Bluetooth Low Energy,
//! maintains the single active connection, and pushes wall-clock time to
//! the device through the standard Current Time Service.
//!
//! The entry point is [`WatchService`]: construct one at application
//! start-up with a transport (usually [`BtleplugTransport`]) and pass it
//! down to callers. UI layers consume it through the scan/connect/
//! disconnect calls, the status queries, and the connection-change
//! subscription.

pub mod domain;
pub mod error;
pub mod infrastructure;

pub use domain::models::{ConnectedDeviceInfo, ConnectionState, DiscoveredDevice};
pub use error::{Result, WatchError};
pub use infrastructure::bluetooth::service::{ServiceConfig, WatchService};
pub use infrastructure::bluetooth::transport::BtleplugTransport;
