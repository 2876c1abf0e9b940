//! Config subcommand handlers.

use std::io::BufRead;

use doorlink_config::{Config, ConfigError, config_path, load_config, save_config};

use crate::cli::{ConfigArgs, ConfigCommand, GlobalOpts};
use crate::error::CliError;

const KEYRING_SERVICE: &str = "doorlink";

// ── Helpers ─────────────────────────────────────────────────────────

/// Profile names, sorted, for help text and listings.
fn profile_names(cfg: &Config) -> Vec<&str> {
    let mut names: Vec<&str> = cfg.profiles.keys().map(String::as_str).collect();
    names.sort_unstable();
    names
}

fn active_profile_name<'a>(global: &'a GlobalOpts, cfg: &'a Config) -> &'a str {
    global
        .profile
        .as_deref()
        .or(cfg.default_profile.as_deref())
        .unwrap_or("default")
}

fn unknown_profile(cfg: &Config, name: &str) -> CliError {
    CliError::ProfileNotFound {
        name: name.into(),
        available: match profile_names(cfg).join(", ") {
            list if list.is_empty() => "(none)".into(),
            list => list,
        },
    }
}

fn keyring_err(e: &keyring::Error) -> CliError {
    CliError::Validation {
        field: "keyring".into(),
        reason: format!("failed to store password: {e}"),
    }
}

// ── Handler ─────────────────────────────────────────────────────────

pub fn handle(args: ConfigArgs, global: &GlobalOpts) -> Result<(), CliError> {
    match args.command {
        ConfigCommand::Path => {
            println!("{}", config_path().display());
            Ok(())
        }

        ConfigCommand::Show => {
            let cfg = load_config()?;
            let (name, profile) = match cfg.profile(global.profile.as_deref()) {
                Ok(found) => found,
                Err(ConfigError::UnknownProfile { name }) => return Err(unknown_profile(&cfg, &name)),
                Err(e) => return Err(e.into()),
            };
            let body = toml::to_string_pretty(&profile.redacted()).map_err(ConfigError::from)?;
            println!("[profiles.{name}]");
            print!("{body}");
            Ok(())
        }

        ConfigCommand::Profiles => {
            let cfg = load_config()?;
            let default = cfg.default_profile.as_deref();
            for name in profile_names(&cfg) {
                let marker = if Some(name) == default { "*" } else { " " };
                println!("{marker} {name}");
            }
            Ok(())
        }

        ConfigCommand::Use { name } => {
            let mut cfg = load_config()?;
            if !cfg.profiles.contains_key(&name) {
                return Err(unknown_profile(&cfg, &name));
            }
            cfg.default_profile = Some(name.clone());
            save_config(&cfg)?;
            eprintln!("Default profile set to '{name}'");
            Ok(())
        }

        ConfigCommand::SetPassword => {
            let cfg = load_config()?;
            let name = active_profile_name(global, &cfg).to_owned();
            if !cfg.profiles.contains_key(&name) {
                return Err(unknown_profile(&cfg, &name));
            }

            let mut line = String::new();
            std::io::stdin().lock().read_line(&mut line)?;
            let password = line.trim_end_matches(['\r', '\n']);
            if password.is_empty() {
                return Err(CliError::Validation {
                    field: "password".into(),
                    reason: "must not be empty".into(),
                });
            }

            keyring::Entry::new(KEYRING_SERVICE, &format!("{name}/password"))
                .and_then(|entry| entry.set_password(password))
                .map_err(|e| keyring_err(&e))?;
            eprintln!("Password for '{name}' stored in system keyring");
            Ok(())
        }
    }
}
