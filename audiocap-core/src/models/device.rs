use serde::{Deserialize, Serialize};

/// Coarse classification reported by the device collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceKind {
    Physical,
    Aggregate,
    Virtual,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Connected,
    Disconnected,
}

/// An auxiliary input device as reported by enumeration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceDescriptor {
    pub id: String,
    pub name: String,
    pub kind: DeviceKind,
    pub connection_state: ConnectionState,
    pub manufacturer: Option<String>,
    pub channel_count: u16,
    pub sample_rate: u32,
}

impl DeviceDescriptor {
    /// A connected, physical, mono 48 kHz device.
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            kind: DeviceKind::Physical,
            connection_state: ConnectionState::Connected,
            manufacturer: None,
            channel_count: 1,
            sample_rate: 48_000,
        }
    }

    pub fn with_kind(mut self, kind: DeviceKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_manufacturer(mut self, manufacturer: impl Into<String>) -> Self {
        self.manufacturer = Some(manufacturer.into());
        self
    }

    pub fn with_format(mut self, channel_count: u16, sample_rate: u32) -> Self {
        self.channel_count = channel_count;
        self.sample_rate = sample_rate;
        self
    }

    pub fn disconnected(mut self) -> Self {
        self.connection_state = ConnectionState::Disconnected;
        self
    }

    pub fn is_connected(&self) -> bool {
        self.connection_state == ConnectionState::Connected
    }
}

/// A device together with the output channel (1-based) it feeds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssignedDevice {
    pub device: DeviceDescriptor,
    pub channel: u16,
}

/// Lifecycle notification forwarded by the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceEvent {
    Connected(DeviceDescriptor),
    Disconnected(String),
}
