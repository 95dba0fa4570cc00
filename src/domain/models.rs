//! Core domain types shared across the watch link subsystem.

/// A peripheral observed during a scan window.
///
/// Transient: rebuilt from scratch on every scan, never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredDevice {
    /// Opaque platform identifier, stable for the lifetime of the adapter.
    pub id: String,
    /// Advertised local name, "Unknown" when the advertisement omits it.
    pub name: String,
    /// Signal strength in dBm.
    pub rssi: i16,
}

/// Lifecycle state of the single watch connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Scanning,
    Connecting,
    Connected,
}

/// Capability flags derived from the peripheral's service table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DeviceCapabilities {
    /// Exposes the Current Time Service (time sync target).
    pub current_time: bool,
    /// Exposes the standard Battery Service.
    pub battery: bool,
    /// Exposes the Device Information Service.
    pub device_information: bool,
}

/// Metadata for the currently connected device.
///
/// Present if and only if the connection state is `Connected`; cleared
/// atomically with the transition back to `Disconnected`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectedDeviceInfo {
    pub id: String,
    pub name: String,
    pub capabilities: DeviceCapabilities,
}
