//! Shared configuration for doorlink tools.
//!
//! TOML profiles, credential resolution (env + keyring + plaintext),
//! and translation to `doorlink_core::ControllerConfig`. The core never
//! reads configuration itself; callers load a profile here and hand the
//! result in.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use doorlink_core::{CommandPollConfig, ControllerConfig, Credentials, ReconnectPolicy};

const KEYRING_SERVICE: &str = "doorlink";
const ENV_PREFIX: &str = "DOORLINK_";

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("profile '{name}' not found")]
    UnknownProfile { name: String },

    #[error("no credentials configured for profile '{profile}'")]
    NoCredentials { profile: String },

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level TOML configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// Default profile name.
    pub default_profile: Option<String>,

    /// Values used when a profile leaves them out.
    #[serde(default)]
    pub defaults: Defaults,

    /// Named controller profiles.
    #[serde(default)]
    pub profiles: HashMap<String, Profile>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_profile: Some("default".into()),
            defaults: Defaults::default(),
            profiles: HashMap::new(),
        }
    }
}

impl Config {
    /// Look up `name`, or the default profile when `name` is `None`.
    pub fn profile<'a>(&'a self, name: Option<&'a str>) -> Result<(&'a str, &'a Profile), ConfigError> {
        let name = name
            .or(self.default_profile.as_deref())
            .unwrap_or("default");
        self.profiles
            .get(name)
            .map(|p| (name, p))
            .ok_or_else(|| ConfigError::UnknownProfile { name: name.into() })
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Defaults {
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_realm")]
    pub realm: String,

    #[serde(default = "default_reconnect_attempts")]
    pub reconnect_attempts: u32,

    #[serde(default = "default_command_poll_ms")]
    pub command_poll_ms: u64,

    #[serde(default = "default_command_poll_attempts")]
    pub command_poll_attempts: u32,

    /// Seconds before a failed device refresh is retried; 0 disables.
    #[serde(default = "default_refresh_retry_secs")]
    pub refresh_retry_secs: u64,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            port: default_port(),
            realm: default_realm(),
            reconnect_attempts: default_reconnect_attempts(),
            command_poll_ms: default_command_poll_ms(),
            command_poll_attempts: default_command_poll_attempts(),
            refresh_retry_secs: default_refresh_retry_secs(),
        }
    }
}

fn default_port() -> u16 {
    8080
}
fn default_realm() -> String {
    "default".into()
}
fn default_reconnect_attempts() -> u32 {
    5
}
fn default_command_poll_ms() -> u64 {
    10
}
fn default_command_poll_attempts() -> u32 {
    30
}
fn default_refresh_retry_secs() -> u64 {
    5
}

/// A named controller profile.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Profile {
    /// Controller host name or address.
    pub server: String,

    pub port: Option<u16>,

    pub realm: Option<String>,

    pub username: Option<String>,

    /// Password (plaintext -- prefer keyring or env var).
    pub password: Option<String>,

    /// Environment variable name containing the password.
    pub password_env: Option<String>,

    /// Directory number of the operator station using this profile.
    pub operator_dirno: Option<String>,

    pub reconnect_attempts: Option<u32>,

    pub command_poll_ms: Option<u64>,

    pub command_poll_attempts: Option<u32>,
}

impl Profile {
    /// Copy with the plaintext password masked, for display.
    pub fn redacted(&self) -> Self {
        Self {
            password: self.password.as_ref().map(|_| "********".into()),
            ..self.clone()
        }
    }
}

// ── Config file path ────────────────────────────────────────────────

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    ProjectDirs::from("org", "doorlink", "doorlink").map_or_else(
        || {
            let mut p = dirs_fallback();
            p.push("config.toml");
            p
        },
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

fn dirs_fallback() -> PathBuf {
    let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
    p.push(".config");
    p.push("doorlink");
    p
}

// ── Config loading ──────────────────────────────────────────────────

/// Load the full Config from the canonical file + environment.
pub fn load_config() -> Result<Config, ConfigError> {
    load_config_from(&config_path())
}

/// Load from `path` + environment. A missing file yields the defaults.
///
/// Environment keys nest with a double underscore:
/// `DOORLINK_DEFAULTS__RECONNECT_ATTEMPTS=8`.
pub fn load_config_from(path: &Path) -> Result<Config, ConfigError> {
    debug!(path = %path.display(), "loading config");
    let figment = Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed(ENV_PREFIX).split("__"));

    let config: Config = figment.extract()?;
    Ok(config)
}

/// Load config, returning a default if it can't be read.
pub fn load_config_or_default() -> Config {
    load_config().unwrap_or_default()
}

// ── Config saving ───────────────────────────────────────────────────

/// Serialize config to TOML and write to the canonical config path.
pub fn save_config(cfg: &Config) -> Result<(), ConfigError> {
    save_config_to(cfg, &config_path())
}

pub fn save_config_to(cfg: &Config, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let toml_str = toml::to_string_pretty(cfg)?;
    std::fs::write(path, toml_str)?;
    Ok(())
}

// ── Credential resolution ───────────────────────────────────────────

/// Where secrets may come from besides the config file.
pub trait SecretSource {
    fn env(&self, key: &str) -> Option<String>;
    fn keyring(&self, profile_name: &str) -> Option<String>;
}

/// Process environment and the platform keyring.
pub struct SystemSecrets;

impl SecretSource for SystemSecrets {
    fn env(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }

    fn keyring(&self, profile_name: &str) -> Option<String> {
        keyring::Entry::new(KEYRING_SERVICE, &format!("{profile_name}/password"))
            .ok()?
            .get_password()
            .ok()
    }
}

/// Resolve username and password for `profile`.
///
/// Password order: the profile's `password_env` variable, then
/// `DOORLINK_PASSWORD`, then the keyring, then plaintext.
pub fn resolve_credentials(
    profile: &Profile,
    profile_name: &str,
    secrets: &dyn SecretSource,
) -> Result<Credentials, ConfigError> {
    let no_credentials = || ConfigError::NoCredentials {
        profile: profile_name.into(),
    };

    let username = profile
        .username
        .clone()
        .or_else(|| secrets.env("DOORLINK_USERNAME"))
        .ok_or_else(no_credentials)?;

    let password = profile
        .password_env
        .as_deref()
        .and_then(|name| secrets.env(name))
        .or_else(|| secrets.env("DOORLINK_PASSWORD"))
        .or_else(|| secrets.keyring(profile_name))
        .or_else(|| profile.password.clone())
        .ok_or_else(no_credentials)?;

    Ok(Credentials {
        username,
        password: SecretString::from(password),
    })
}

/// Build a `ControllerConfig` from a profile, falling back to
/// `defaults` for anything the profile leaves out.
pub fn profile_to_controller_config(
    profile: &Profile,
    profile_name: &str,
    defaults: &Defaults,
    secrets: &dyn SecretSource,
) -> Result<ControllerConfig, ConfigError> {
    let server = profile.server.trim();
    if server.is_empty() {
        return Err(ConfigError::Validation {
            field: "server".into(),
            reason: "must not be empty".into(),
        });
    }

    let port = profile.port.unwrap_or(defaults.port);
    if port == 0 {
        return Err(ConfigError::Validation {
            field: "port".into(),
            reason: "must be between 1 and 65535".into(),
        });
    }

    let poll_attempts = profile
        .command_poll_attempts
        .unwrap_or(defaults.command_poll_attempts);
    if poll_attempts == 0 {
        return Err(ConfigError::Validation {
            field: "command_poll_attempts".into(),
            reason: "must be at least 1".into(),
        });
    }

    let credentials = resolve_credentials(profile, profile_name, secrets)?;

    Ok(ControllerConfig {
        server: server.to_owned(),
        port,
        realm: profile
            .realm
            .clone()
            .unwrap_or_else(|| defaults.realm.clone()),
        credentials,
        operator_dirno: profile.operator_dirno.clone().unwrap_or_default(),
        reconnect: ReconnectPolicy {
            max_attempts: profile
                .reconnect_attempts
                .unwrap_or(defaults.reconnect_attempts),
            ..ReconnectPolicy::default()
        },
        command_poll: CommandPollConfig {
            interval: Duration::from_millis(
                profile.command_poll_ms.unwrap_or(defaults.command_poll_ms),
            ),
            max_attempts: poll_attempts,
        },
        refresh_retry_interval: Duration::from_secs(defaults.refresh_retry_secs),
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use secrecy::ExposeSecret;

    #[derive(Default)]
    struct FakeSecrets {
        env: HashMap<String, String>,
        keyring: Option<String>,
    }

    impl SecretSource for FakeSecrets {
        fn env(&self, key: &str) -> Option<String> {
            self.env.get(key).cloned()
        }

        fn keyring(&self, _profile_name: &str) -> Option<String> {
            self.keyring.clone()
        }
    }

    fn profile() -> Profile {
        Profile {
            server: "intercom.local".into(),
            port: None,
            realm: None,
            username: Some("operator".into()),
            password: Some("plain".into()),
            password_env: None,
            operator_dirno: Some("900".into()),
            reconnect_attempts: None,
            command_poll_ms: None,
            command_poll_attempts: None,
        }
    }

    #[test]
    fn missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config_from(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.default_profile.as_deref(), Some("default"));
        assert_eq!(config.defaults.command_poll_attempts, 30);
        assert!(config.profiles.is_empty());
    }

    #[test]
    fn file_profiles_are_loaded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
default_profile = "site-a"

[defaults]
reconnect_attempts = 8

[profiles.site-a]
server = "10.1.0.2"
port = 8443
username = "desk"
operator_dirno = "901"
"#,
        )
        .unwrap();

        let config = load_config_from(&path).unwrap();
        let (name, profile) = config.profile(None).unwrap();
        assert_eq!(name, "site-a");
        assert_eq!(profile.port, Some(8443));
        assert_eq!(config.defaults.reconnect_attempts, 8);
        assert_eq!(config.defaults.command_poll_ms, 10);
    }

    #[test]
    fn save_then_load_keeps_profiles() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let mut config = Config::default();
        config.profiles.insert("default".into(), profile());

        save_config_to(&config, &path).unwrap();
        let loaded = load_config_from(&path).unwrap();
        assert_eq!(loaded.profiles["default"].server, "intercom.local");
    }

    #[test]
    fn unknown_profile_is_an_error() {
        let config = Config::default();
        assert!(matches!(
            config.profile(Some("nope")),
            Err(ConfigError::UnknownProfile { .. })
        ));
    }

    #[test]
    fn password_env_wins_over_keyring_and_plaintext() {
        let mut p = profile();
        p.password_env = Some("SITE_PW".into());
        let secrets = FakeSecrets {
            env: HashMap::from([("SITE_PW".to_string(), "from-env".to_string())]),
            keyring: Some("from-keyring".into()),
        };

        let creds = resolve_credentials(&p, "default", &secrets).unwrap();
        assert_eq!(creds.password.expose_secret(), "from-env");
    }

    #[test]
    fn keyring_wins_over_plaintext() {
        let secrets = FakeSecrets {
            keyring: Some("from-keyring".into()),
            ..FakeSecrets::default()
        };
        let creds = resolve_credentials(&profile(), "default", &secrets).unwrap();
        assert_eq!(creds.password.expose_secret(), "from-keyring");
    }

    #[test]
    fn missing_password_is_no_credentials() {
        let mut p = profile();
        p.password = None;
        assert!(matches!(
            resolve_credentials(&p, "default", &FakeSecrets::default()),
            Err(ConfigError::NoCredentials { .. })
        ));
    }

    #[test]
    fn profile_translates_with_defaults() {
        let mut p = profile();
        p.command_poll_ms = Some(25);
        let config =
            profile_to_controller_config(&p, "default", &Defaults::default(), &FakeSecrets::default())
                .unwrap();

        assert_eq!(config.server, "intercom.local");
        assert_eq!(config.port, 8080);
        assert_eq!(config.operator_dirno, "900");
        assert_eq!(config.reconnect.max_attempts, 5);
        assert_eq!(config.command_poll.interval, Duration::from_millis(25));
        assert_eq!(config.command_poll.max_attempts, 30);
    }

    #[test]
    fn empty_server_is_rejected() {
        let mut p = profile();
        p.server = "  ".into();
        let err =
            profile_to_controller_config(&p, "default", &Defaults::default(), &FakeSecrets::default())
                .unwrap_err();
        assert!(matches!(err, ConfigError::Validation { ref field, .. } if field == "server"));
    }

    #[test]
    fn redaction_masks_password() {
        assert_eq!(profile().redacted().password.as_deref(), Some("********"));
    }
}
