//! Error taxonomy for the watch link subsystem.
//!
//! Scan and connect errors reject the operation that requested them.
//! Mid-session drops are surfaced through the connection-change notifier,
//! never as errors. Sync and teardown errors are logged and must not leave
//! the connection state inconsistent with the device metadata.

use std::time::Duration;
use thiserror::Error;

/// Errors produced by the watch link subsystem.
#[derive(Debug, Error)]
pub enum WatchError {
    /// The platform radio is off, missing, or access was denied.
    #[error("bluetooth unavailable: {0}")]
    BluetoothUnavailable(String),

    /// The selected device is no longer visible to the adapter.
    #[error("device not found: {0}")]
    DeviceNotFound(String),

    /// A transport or discovery step failed during connect. Recoverable;
    /// the caller may retry.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// The connect attempt exceeded its bound.
    #[error("connection attempt timed out after {0:?}")]
    ConnectionTimeout(Duration),

    /// A connect attempt was issued while another connection was pending
    /// or established. Rejected synchronously, existing state untouched.
    #[error("a connection is already pending or established")]
    ConnectionBusy,

    /// The time-sync write failed. Never fatal to the connection.
    #[error("time sync failed: {0}")]
    SyncFailed(String),

    /// Link teardown reported an error. The state is forced to
    /// disconnected regardless.
    #[error("disconnect error: {0}")]
    DisconnectError(String),
}

pub type Result<T> = std::result::Result<T, WatchError>;
