//! Bluetooth Module
//!
//! Provides BLE communication with the watch.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                      WatchService                        │
//! │  (actor-backed coordinator - public API for callers)     │
//! └───────┬───────────┬───────────┬────────────┬────────────┘
//!         │           │           │            │
//!         ▼           ▼           ▼            ▼
//! ┌───────────┐ ┌────────────┐ ┌──────────┐ ┌──────────┐
//! │  Scanner  │ │ Connection │ │ Protocol │ │ Notifier │
//! │           │ │            │ │          │ │          │
//! │ - windowed│ │ - link +   │ │ - CTS    │ │ - change │
//! │   ranking │ │   discovery│ │   payload│ │   fan-out│
//! └─────┬─────┘ └─────┬──────┘ └──────────┘ └──────────┘
//!       │             │
//!       ▼             ▼
//! ┌─────────────────────────┐
//! │  Transport (btleplug)   │
//! └─────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`protocol`] - Current Time Service constants and payload codec
//! - [`transport`] - platform BLE stack behind narrow traits
//! - [`scanner`] - windowed BLE device discovery
//! - [`connection`] - connect sub-steps and the time-sync write
//! - [`notifier`] - connection-change subscription registry
//! - [`service`] - main actor-backed coordinator

pub mod connection;
pub mod notifier;
pub mod protocol;
pub mod scanner;
pub mod service;
pub mod transport;

// Re-export main service for convenience
pub use service::WatchService;
