// ── Call domain types ──

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Call state of a call, and of a device participating in one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum CallState {
    Init,
    Forwarding,
    Queued,
    Ringing,
    #[strum(to_string = "in_call", serialize = "incall", serialize = "connected")]
    InCall,
    Ended,
    Reachable,
    Fault,
}

impl CallState {
    /// States in which a device is occupied by a call.
    pub fn is_active(self) -> bool {
        matches!(
            self,
            Self::Init | Self::Forwarding | Self::Queued | Self::Ringing | Self::InCall
        )
    }

    /// State a device takes when this call state is projected onto it.
    ///
    /// An ended call returns the device to idle instead of leaving it "ended".
    pub fn projected(self) -> Self {
        match self {
            Self::Ended => Self::Reachable,
            other => other,
        }
    }
}

/// A call as pushed by the controller.
///
/// Transient: the registry consumes it to update device records and the
/// active-call list; call history belongs to whoever listens on the bus.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallElement {
    pub call_id: String,
    pub from_dirno: String,
    pub to_dirno: String,
    pub to_dirno_current: Option<String>,
    pub call_type: Option<String>,
    pub reason: Option<String>,
    pub priority: Option<u32>,
    pub queue_position: Option<u32>,
    pub started_at: Option<DateTime<Utc>>,
    pub state: CallState,
}

impl CallElement {
    /// Directory numbers this call touches: current callee, original
    /// callee, caller. Empty and repeated numbers are skipped.
    pub fn participants(&self) -> Vec<&str> {
        let mut out: Vec<&str> = Vec::with_capacity(3);
        let roles = [
            self.to_dirno_current.as_deref(),
            Some(self.to_dirno.as_str()),
            Some(self.from_dirno.as_str()),
        ];
        for dirno in roles.into_iter().flatten() {
            if !dirno.is_empty() && !out.contains(&dirno) {
                out.push(dirno);
            }
        }
        out
    }
}
