// ── Device domain types ──

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use super::call::CallState;

/// Canonical device type, normalized from the controller's type string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
#[non_exhaustive]
pub enum DeviceType {
    DoorStation,
    Intercom,
    #[strum(to_string = "operator", serialize = "master_station")]
    Operator,
    Speaker,
    Other,
}

/// Whether the controller can currently reach the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[strum(serialize_all = "snake_case")]
pub enum Reachability {
    Reachable,
    Unreachable,
    Unknown,
}

/// The canonical Device record.
///
/// Identity is the network `address`; `dirno` is the routing key used for
/// lookups, call projection and GPIO association.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    pub address: String,
    pub dirno: String,
    pub name: Option<String>,
    pub location: Option<String>,
    pub device_type: DeviceType,
    pub reachability: Reachability,
    pub call_state: CallState,
    pub updated_at: DateTime<Utc>,
}

impl Device {
    /// Display label: name when known, directory number otherwise.
    pub fn label(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.dirno)
    }

    pub fn is_busy(&self) -> bool {
        self.call_state.is_active()
    }
}
