//! Device availability types for status consumers.
//!
//! These are the serialisable view of the polling coordinator's
//! availability tracking, suitable for diagnostics export and for
//! presentation layers that do not link the full client.

use serde::{Deserialize, Serialize};

/// Device availability status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DeviceStatus {
    /// Device is responding normally.
    Online,
    /// Device is not responding.
    Offline,
    /// Device is responding but with errors.
    Degraded,
    /// Device status is unknown (never polled).
    #[default]
    Unknown,
}

impl std::fmt::Display for DeviceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeviceStatus::Online => write!(f, "online"),
            DeviceStatus::Offline => write!(f, "offline"),
            DeviceStatus::Degraded => write!(f, "degraded"),
            DeviceStatus::Unknown => write!(f, "unknown"),
        }
    }
}

/// Device liveness information.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceLiveness {
    /// Device identifier.
    pub device: String,
    /// Current status.
    pub status: DeviceStatus,
    /// Whether consumers should treat the device as available.
    pub available: bool,
    /// Last successful poll timestamp (millis since epoch), 0 if never.
    pub last_seen: i64,
    /// Consecutive failures count.
    pub consecutive_failures: u32,
    /// Last error message.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}
