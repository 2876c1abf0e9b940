// ── Wire elements ──
//
// Payloads as the remote controller pushes and returns them. Field values
// are kept as the controller spells them; normalization into domain types
// happens in doorlink-core.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A device (re-)announcing its presence and attributes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationElement {
    /// Network address, e.g. `"10.0.0.5"`.
    pub ip: String,

    /// Directory number the device answers on.
    pub dirno: String,

    #[serde(default)]
    pub name: Option<String>,

    #[serde(default)]
    pub location: Option<String>,

    /// Controller device-type string, e.g. `"door_station"`.
    #[serde(default)]
    pub device_type: Option<String>,

    /// Registration state, e.g. `"registered"`, `"unregistered"`.
    #[serde(default)]
    pub state: Option<String>,
}

/// A call-state change pushed by the controller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallElement {
    pub call_id: String,

    /// Caller directory number.
    pub from_dirno: String,

    /// Originally dialled directory number.
    pub to_dirno: String,

    /// Directory number currently being called. Diverges from `to_dirno`
    /// once the call has been forwarded.
    #[serde(default)]
    pub to_dirno_current: Option<String>,

    #[serde(default)]
    pub call_type: Option<String>,

    #[serde(default)]
    pub reason: Option<String>,

    #[serde(default)]
    pub priority: Option<u32>,

    #[serde(default)]
    pub queue_position: Option<u32>,

    #[serde(default)]
    pub start_time: Option<DateTime<Utc>>,

    /// Call state, e.g. `"ringing"`, `"in_call"`, `"ended"`.
    pub state: String,
}

/// One GPIO line as reported by a device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GpioElement {
    pub id: String,

    /// `"input"` or `"output"`.
    pub direction: String,

    /// Backend state string, e.g. `"high"`, `"active"`, `"0"`.
    pub state: String,

    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

/// A call group configured on the controller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupElement {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub members: Vec<String>,
}

/// Request to drive a GPIO output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GpioOutputRequest {
    pub id: String,
    pub active: bool,
    /// Self-reset after this long. `None` holds the level.
    #[serde(default)]
    pub duration: Option<Duration>,
}

/// Completion signal of an asynchronous remote command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandCompletion {
    pub success: bool,
    /// Free-text completion or failure description.
    pub text: String,
}

/// Everything a transport delivers unsolicited.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushEvent {
    Registration(RegistrationElement),
    Call(CallElement),
    Gpio { dirno: String, element: GpioElement },
    Connection(bool),
    Log(String),
}
