//! CLI error types with miette diagnostics.
//!
//! Maps `CoreError` and `ConfigError` into user-facing errors with help text.

use miette::Diagnostic;
use thiserror::Error;

use doorlink_config::ConfigError;
use doorlink_core::CoreError;

/// Process exit codes.
pub mod exit_code {
    pub const GENERAL: i32 = 1;
    pub const USAGE: i32 = 2;
    pub const AUTH: i32 = 3;
    pub const NOT_FOUND: i32 = 4;
    pub const CONNECTION: i32 = 7;
    pub const TIMEOUT: i32 = 8;
}

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    // ── Connection ───────────────────────────────────────────────────
    #[error("Controller session unavailable: {message}")]
    #[diagnostic(
        code(doorlink::connection_failed),
        help("Check that the controller is running and reachable, then retry with -v for details.")
    )]
    ConnectionFailed { message: String },

    #[error("Gave up reconnecting after {attempts} attempts")]
    #[diagnostic(
        code(doorlink::reconnect_exhausted),
        help("Raise `reconnect_attempts` in your profile or investigate the controller link.")
    )]
    ReconnectExhausted { attempts: u32 },

    // ── Authentication ───────────────────────────────────────────────
    #[error("No credentials configured for profile '{profile}'")]
    #[diagnostic(
        code(doorlink::no_credentials),
        help(
            "Store a password with: doorlink config set-password --profile {profile}\n\
             Or set DOORLINK_USERNAME and DOORLINK_PASSWORD."
        )
    )]
    NoCredentials { profile: String },

    // ── Resources ────────────────────────────────────────────────────
    #[error("{resource_type} '{identifier}' not found")]
    #[diagnostic(code(doorlink::not_found))]
    NotFound {
        resource_type: String,
        identifier: String,
    },

    // ── Commands ─────────────────────────────────────────────────────
    #[error("{operation} did not complete in time")]
    #[diagnostic(
        code(doorlink::timeout),
        help("Increase `command_poll_attempts` or check controller responsiveness.")
    )]
    Timeout { operation: String },

    #[error("{operation} failed: {message}")]
    #[diagnostic(code(doorlink::command_failed))]
    CommandFailed { operation: String, message: String },

    // ── Configuration ────────────────────────────────────────────────
    #[error("Invalid value for {field}: {reason}")]
    #[diagnostic(code(doorlink::validation))]
    Validation { field: String, reason: String },

    #[error("Profile '{name}' not found in configuration")]
    #[diagnostic(
        code(doorlink::profile_not_found),
        help("Available profiles: {available}")
    )]
    ProfileNotFound { name: String, available: String },

    #[error("Could not load configuration: {message}")]
    #[diagnostic(code(doorlink::config))]
    Config { message: String },

    // ── Internal / IO ────────────────────────────────────────────────
    #[error("Internal error: {0}")]
    #[diagnostic(code(doorlink::internal))]
    Internal(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Could not encode event: {0}")]
    #[diagnostic(code(doorlink::json))]
    Json(#[from] serde_json::Error),
}

impl CliError {
    /// Map this error to an exit code for process termination.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::ConnectionFailed { .. } | Self::ReconnectExhausted { .. } => exit_code::CONNECTION,
            Self::NoCredentials { .. } => exit_code::AUTH,
            Self::NotFound { .. } | Self::ProfileNotFound { .. } => exit_code::NOT_FOUND,
            Self::Timeout { .. } => exit_code::TIMEOUT,
            Self::Validation { .. } => exit_code::USAGE,
            _ => exit_code::GENERAL,
        }
    }
}

// ── CoreError → CliError mapping ─────────────────────────────────────

impl From<CoreError> for CliError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::TransportUnavailable => CliError::ConnectionFailed {
                message: "no active transport session".into(),
            },
            CoreError::Api { message } => CliError::ConnectionFailed { message },
            CoreError::ReconnectBudgetExhausted { max_attempts } => CliError::ReconnectExhausted {
                attempts: max_attempts,
            },
            CoreError::CommandTimeout { operation, .. } => CliError::Timeout {
                operation: operation.into(),
            },
            CoreError::CommandFailed { operation, message } => CliError::CommandFailed {
                operation: operation.into(),
                message,
            },
            CoreError::Cancelled { operation } => CliError::CommandFailed {
                operation: operation.into(),
                message: "cancelled".into(),
            },
            CoreError::DeviceNotFound { identifier } => CliError::NotFound {
                resource_type: "device".into(),
                identifier,
            },
            CoreError::Internal(message) => CliError::Internal(message),
        }
    }
}

// ── ConfigError → CliError mapping ───────────────────────────────────

impl From<ConfigError> for CliError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::Validation { field, reason } => CliError::Validation { field, reason },
            ConfigError::UnknownProfile { name } => CliError::ProfileNotFound {
                name,
                available: String::new(),
            },
            ConfigError::NoCredentials { profile } => CliError::NoCredentials { profile },
            ConfigError::Io(e) => CliError::Io(e),
            other @ (ConfigError::Serialization(_) | ConfigError::Figment(_)) => CliError::Config {
                message: other.to_string(),
            },
        }
    }
}
