// ── GPIO domain types ──

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Display, EnumString,
)]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum GpioDirection {
    #[strum(to_string = "input", serialize = "in")]
    Input,
    #[strum(to_string = "output", serialize = "out")]
    Output,
}

/// Logical level of a GPIO line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[strum(serialize_all = "snake_case")]
pub enum GpioState {
    Unknown,
    Inactive,
    Active,
}

impl GpioState {
    /// Interpret a backend state string.
    pub fn from_raw(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "active" | "high" | "on" | "1" | "true" => Self::Active,
            "inactive" | "low" | "off" | "0" | "false" => Self::Inactive,
            _ => Self::Unknown,
        }
    }
}

/// One input or output line, identified by `(direction, id)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GpioPoint {
    pub id: String,
    pub direction: GpioDirection,
    pub state: GpioState,
    pub updated_at: DateTime<Utc>,
    /// State string exactly as the backend reported it.
    pub raw_state: String,
}

/// A GPIO transition on a device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GpioEvent {
    pub dirno: String,
    pub point: GpioPoint,
}
