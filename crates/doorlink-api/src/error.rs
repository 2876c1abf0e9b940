use thiserror::Error;

/// Top-level error type for the `doorlink-api` crate.
///
/// Covers every failure a transport implementation can report:
/// session lifecycle, remote procedure calls, and push delivery.
/// `doorlink-core` maps these into its own error taxonomy.
#[derive(Debug, Error)]
pub enum Error {
    // ── Session ─────────────────────────────────────────────────────
    /// A command or query was issued while no session is active.
    #[error("Transport is not connected")]
    NotConnected,

    /// The underlying session could not be started.
    #[error("Session start failed: {reason}")]
    SessionStart { reason: String },

    /// The session was closed while a request was in flight.
    #[error("Session closed")]
    Closed,

    // ── Remote calls ────────────────────────────────────────────────
    /// A remote procedure call failed before a completion was produced.
    #[error("Remote call {operation} failed: {message}")]
    Rpc {
        operation: &'static str,
        message: String,
    },

    /// The remote controller refused the request.
    #[error("Request rejected by controller: {message}")]
    Rejected { message: String },

    // ── Data ────────────────────────────────────────────────────────
    /// A pushed or pulled payload could not be decoded.
    #[error("Malformed payload: {0}")]
    Payload(#[from] serde_json::Error),

    // ── Capability ──────────────────────────────────────────────────
    /// The transport does not implement this operation.
    #[error("Unsupported operation: {0}")]
    Unsupported(&'static str),
}

impl Error {
    /// Returns `true` if the session is gone and a restart may resolve it.
    pub fn is_disconnect(&self) -> bool {
        matches!(self, Self::NotConnected | Self::Closed)
    }

    /// Returns `true` if this is a transient error worth retrying.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::NotConnected | Self::Closed | Self::SessionStart { .. } | Self::Rpc { .. } => {
                true
            }
            Self::Rejected { .. } | Self::Payload(_) | Self::Unsupported(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disconnect_errors_are_transient() {
        assert!(Error::NotConnected.is_disconnect());
        assert!(Error::Closed.is_transient());
        assert!(!Error::Rejected { message: "no".into() }.is_transient());
    }

    #[test]
    fn unsupported_is_not_a_disconnect() {
        let err = Error::Unsupported("tone test");
        assert!(!err.is_disconnect());
        assert_eq!(err.to_string(), "Unsupported operation: tone test");
    }
}
