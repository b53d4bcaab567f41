//! Configuration loading.
//!
//! Loads daemon configuration from `./sensord.toml` (or
//! `$SENSORD_CONFIG_PATH`). Environment variables override file values;
//! file values override defaults.
//!
//! Precedence: env vars > config file > defaults.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

/// Top-level sensord configuration loaded from TOML.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SensordConfig {
    /// Daemon socket and logging settings (`[daemon]`).
    pub daemon: DaemonConfig,
    /// External authority endpoint settings (`[authority]`).
    pub authority: AuthorityConfig,
}

/// Daemon settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    /// Path of the Unix socket the IPC server listens on.
    pub socket_path: String,
    /// Default log level filter when `RUST_LOG` is unset.
    pub log_level: String,
    /// Directory for rotated JSON log files.
    pub logs_dir: String,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            socket_path: "/run/sensord/sensord.sock".to_owned(),
            log_level: "info".to_owned(),
            logs_dir: "/var/log/sensord".to_owned(),
        }
    }
}

/// Authority endpoint settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AuthorityConfig {
    /// Unix socket of the external authorization authority.
    pub socket_path: String,
    /// Seconds allowed for one authorization round-trip.
    pub timeout_secs: u64,
    /// Action id checked for device registration.
    pub register_action: String,
}

impl Default for AuthorityConfig {
    fn default() -> Self {
        Self {
            socket_path: "/run/authorityd/authorityd.sock".to_owned(),
            timeout_secs: 25,
            register_action: "dev.sensord.manager.register".to_owned(),
        }
    }
}

impl AuthorityConfig {
    /// The round-trip bound as a [`Duration`].
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl SensordConfig {
    /// Load configuration with precedence: env vars > TOML file > defaults.
    ///
    /// Config file path: `$SENSORD_CONFIG_PATH` or `./sensord.toml`. A
    /// missing file is not an error; defaults apply.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load() -> Result<Self> {
        let mut config = Self::load_from_file()?;
        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Load from the TOML file only, no env overrides.
    fn load_from_file() -> Result<Self> {
        let path = Self::config_path_with(|key| std::env::var(key).ok());
        match std::fs::read_to_string(&path) {
            Ok(contents) => {
                tracing::info!(path = %path.display(), "loading config from file");
                let config: SensordConfig =
                    toml::from_str(&contents).context("failed to parse config TOML")?;
                Ok(config)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!("no config file found, using defaults");
                Ok(Self::default())
            }
            Err(e) => Err(anyhow::anyhow!(
                "failed to read config file {}: {e}",
                path.display()
            )),
        }
    }

    /// Resolve the config path using a custom env resolver (for testing).
    fn config_path_with(env: impl Fn(&str) -> Option<String>) -> PathBuf {
        env("SENSORD_CONFIG_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("sensord.toml"))
    }

    /// Apply environment variable overrides (env > config > defaults).
    ///
    /// Takes a resolver function for testability.
    fn apply_overrides(&mut self, env: impl Fn(&str) -> Option<String>) {
        if let Some(v) = env("SENSORD_SOCKET_PATH") {
            self.daemon.socket_path = v;
        }
        if let Some(v) = env("SENSORD_LOG_LEVEL") {
            self.daemon.log_level = v;
        }
        if let Some(v) = env("SENSORD_LOGS_DIR") {
            self.daemon.logs_dir = v;
        }
        if let Some(v) = env("SENSORD_AUTHORITY_SOCKET") {
            self.authority.socket_path = v;
        }
        if let Some(v) = env("SENSORD_AUTHORITY_TIMEOUT_SECS") {
            match v.parse() {
                Ok(n) => self.authority.timeout_secs = n,
                Err(_) => tracing::warn!(
                    var = "SENSORD_AUTHORITY_TIMEOUT_SECS",
                    value = %v,
                    "ignoring invalid env override"
                ),
            }
        }
        if let Some(v) = env("SENSORD_REGISTER_ACTION") {
            self.authority.register_action = v;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = SensordConfig::default();
        assert_eq!(config.daemon.socket_path, "/run/sensord/sensord.sock");
        assert_eq!(config.authority.timeout_secs, 25);
        assert_eq!(
            config.authority.register_action,
            "dev.sensord.manager.register"
        );
    }

    #[test]
    fn toml_file_overrides_defaults() {
        let parsed: SensordConfig = toml::from_str(
            r#"
            [daemon]
            socket_path = "/tmp/test.sock"

            [authority]
            timeout_secs = 3
            "#,
        )
        .expect("parse config");

        assert_eq!(parsed.daemon.socket_path, "/tmp/test.sock");
        assert_eq!(parsed.authority.timeout_secs, 3);
        // Untouched sections keep their defaults.
        assert_eq!(parsed.daemon.log_level, "info");
        assert_eq!(
            parsed.authority.register_action,
            "dev.sensord.manager.register"
        );
    }

    #[test]
    fn env_overrides_beat_file_values() {
        let mut config = SensordConfig::default();
        config.apply_overrides(|key| match key {
            "SENSORD_SOCKET_PATH" => Some("/tmp/env.sock".to_owned()),
            "SENSORD_AUTHORITY_TIMEOUT_SECS" => Some("7".to_owned()),
            "SENSORD_REGISTER_ACTION" => Some("test.register".to_owned()),
            _ => None,
        });

        assert_eq!(config.daemon.socket_path, "/tmp/env.sock");
        assert_eq!(config.authority.timeout(), Duration::from_secs(7));
        assert_eq!(config.authority.register_action, "test.register");
    }

    #[test]
    fn invalid_numeric_override_is_ignored() {
        let mut config = SensordConfig::default();
        config.apply_overrides(|key| match key {
            "SENSORD_AUTHORITY_TIMEOUT_SECS" => Some("not-a-number".to_owned()),
            _ => None,
        });
        assert_eq!(config.authority.timeout_secs, 25);
    }

    #[test]
    fn config_path_honours_env_var() {
        let path = SensordConfig::config_path_with(|key| match key {
            "SENSORD_CONFIG_PATH" => Some("/etc/sensord/sensord.toml".to_owned()),
            _ => None,
        });
        assert_eq!(path, PathBuf::from("/etc/sensord/sensord.toml"));

        let fallback = SensordConfig::config_path_with(|_| None);
        assert_eq!(fallback, PathBuf::from("sensord.toml"));
    }
}
