// ── Runtime connection configuration ──
//
// These types describe *how* to reach the remote controller and how hard
// to try. They carry credential data and tuning, but never touch disk.
// doorlink-config (or any other caller) builds a `ControllerConfig` and
// hands it in.

use std::time::Duration;

use secrecy::SecretString;

/// Credentials presented to the controller realm.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub username: String,
    pub password: SecretString,
}

/// Bounded automatic reconnection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Restart attempts permitted before manual intervention is required.
    pub max_attempts: u32,

    /// Delay before the first restart attempt. Default: 1s.
    pub initial_delay: Duration,

    /// Upper bound on backoff delay. Default: 30s.
    pub max_delay: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl ReconnectPolicy {
    /// Exponential backoff with jitter for the given zero-based attempt.
    ///
    /// `delay = min(initial * 2^attempt, max) * (1 +- 0.25)`, falling back
    /// to `max_delay` when that is not representable as a `Duration`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt.min(16)).unwrap_or(16);
        let base = self.initial_delay.as_secs_f64() * 2.0_f64.powi(exponent);
        let capped = base.min(self.max_delay.as_secs_f64());

        // Deterministic jitter seeded from the attempt number.
        let jitter_factor = 1.0 + 0.25 * (f64::from(attempt) * 7.3).sin();
        Duration::try_from_secs_f64((capped * jitter_factor).max(0.0)).unwrap_or(self.max_delay)
    }
}

/// How long a command waits for its completion signal.
///
/// The wait is `interval * max_attempts` (300ms with defaults).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandPollConfig {
    pub interval: Duration,
    pub max_attempts: u32,
}

impl Default for CommandPollConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(10),
            max_attempts: 30,
        }
    }
}

/// Configuration for one controller link.
///
/// Built by the caller and passed to the core -- the core never reads
/// config files.
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Controller host name or address.
    pub server: String,
    pub port: u16,
    pub realm: String,
    pub credentials: Credentials,
    /// Directory number of the local operator.
    pub operator_dirno: String,
    pub reconnect: ReconnectPolicy,
    pub command_poll: CommandPollConfig,
    /// Delay before retrying a failed bulk refresh. Zero disables the retry.
    pub refresh_retry_interval: Duration,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            server: "127.0.0.1".into(),
            port: 8080,
            realm: "default".into(),
            credentials: Credentials {
                username: "operator".into(),
                password: SecretString::from(String::new()),
            },
            operator_dirno: String::new(),
            reconnect: ReconnectPolicy::default(),
            command_poll: CommandPollConfig::default(),
            refresh_retry_interval: Duration::from_secs(5),
        }
    }
}
