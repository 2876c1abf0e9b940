// ── Core error types ──
//
// Failures surfaced by doorlink-core. Consumers never see transport
// error shapes directly: the `From<doorlink_api::Error>` impl folds them
// into this taxonomy.

use thiserror::Error;

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Connection errors ────────────────────────────────────────────
    #[error("No active transport session")]
    TransportUnavailable,

    #[error("Reconnect budget of {max_attempts} attempts exhausted; manual reconnect required")]
    ReconnectBudgetExhausted { max_attempts: u32 },

    // ── Command errors ───────────────────────────────────────────────
    #[error("{operation} timed out after {attempts} completion polls")]
    CommandTimeout {
        operation: &'static str,
        attempts: u32,
    },

    #[error("{operation} failed: {message}")]
    CommandFailed {
        operation: &'static str,
        message: String,
    },

    #[error("{operation} cancelled")]
    Cancelled { operation: &'static str },

    // ── Data errors ──────────────────────────────────────────────────
    #[error("Device not found: {identifier}")]
    DeviceNotFound { identifier: String },

    // ── Transport errors (wrapped, not exposed raw) ──────────────────
    #[error("Transport error: {message}")]
    Api { message: String },

    // ── Internal errors ──────────────────────────────────────────────
    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoreError {
    /// Returns `true` for failures a caller may reasonably retry.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::TransportUnavailable | Self::CommandTimeout { .. } | Self::Api { .. }
        )
    }
}

// ── Conversion from transport-layer errors ───────────────────────────

impl From<doorlink_api::Error> for CoreError {
    fn from(err: doorlink_api::Error) -> Self {
        match err {
            doorlink_api::Error::NotConnected | doorlink_api::Error::Closed => {
                CoreError::TransportUnavailable
            }
            doorlink_api::Error::Rejected { message } => CoreError::CommandFailed {
                operation: "request",
                message,
            },
            doorlink_api::Error::Rpc { operation, message } => {
                CoreError::CommandFailed { operation, message }
            }
            other @ (doorlink_api::Error::SessionStart { .. }
            | doorlink_api::Error::Payload(_)
            | doorlink_api::Error::Unsupported(_)) => CoreError::Api {
                message: other.to_string(),
            },
        }
    }
}
