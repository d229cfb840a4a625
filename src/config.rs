//! Application settings.
//!
//! Read from an optional YAML file, then overridden by environment variables.
//! A missing file is not an error; the defaults describe a local setup with
//! authentication enabled.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::ConfigError;
use crate::pipeline::PipelineOptions;

/// Config file used when no path is given
pub const DEFAULT_CONFIG_PATH: &str = "config/config.yaml";

/// HTTP server settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerSettings {
    /// Socket address to listen on
    #[serde(default = "default_bind")]
    pub bind: String,

    /// Largest accepted upload, in bytes
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            max_upload_bytes: default_max_upload_bytes(),
        }
    }
}

/// Authentication settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthSettings {
    /// When false every visitor gets an anonymous session
    #[serde(default = "default_true")]
    pub required: bool,

    /// JSON file holding registered users
    #[serde(default = "default_users_file")]
    pub users_file: PathBuf,

    #[serde(default = "default_cookie_name")]
    pub cookie_name: String,

    /// Session lifetime
    #[serde(default = "default_expiry_days")]
    pub expiry_days: u32,
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            required: true,
            users_file: default_users_file(),
            cookie_name: default_cookie_name(),
            expiry_days: default_expiry_days(),
        }
    }
}

/// Logging settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingSettings {
    /// `error`, `warn`, `info`, `debug` or `trace`
    #[serde(default = "default_level")]
    pub level: String,

    /// Also append log lines to this file
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<PathBuf>,

    /// Debug mode: forces `debug` level and verbose pipeline logging
    #[serde(default)]
    pub debug: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: default_level(),
            file: None,
            debug: false,
        }
    }
}

/// All settings of the application
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub server: ServerSettings,

    #[serde(default)]
    pub auth: AuthSettings,

    #[serde(default)]
    pub logging: LoggingSettings,
}

fn default_bind() -> String {
    "127.0.0.1:8000".to_string()
}

fn default_max_upload_bytes() -> usize {
    10 * 1024 * 1024
}

fn default_true() -> bool {
    true
}

fn default_users_file() -> PathBuf {
    PathBuf::from("config/users.json")
}

fn default_cookie_name() -> String {
    "finance_session".to_string()
}

fn default_expiry_days() -> u32 {
    30
}

fn default_level() -> String {
    "info".to_string()
}

/// `true`/`1`/`yes`/`on` in any case; anything else is false
fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_lowercase().as_str(),
        "true" | "1" | "yes" | "on"
    )
}

impl Settings {
    /// Load settings from `path`, or defaults when the file doesn't exist
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            log::debug!("Config file {} not found, using defaults", path.display());
            return Ok(Settings::default());
        }

        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;

        serde_yaml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    /// Apply `DEBUG`, `AUTH_REQUIRED`, `LOG_LEVEL` and `BIND_ADDR` from the
    /// process environment
    pub fn apply_env(&mut self) {
        self.apply_env_from(|key| std::env::var(key).ok());
    }

    /// Same as [`Settings::apply_env`] with a custom variable lookup
    pub fn apply_env_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(value) = lookup("DEBUG") {
            self.logging.debug = parse_flag(&value);
        }
        if let Some(value) = lookup("AUTH_REQUIRED") {
            self.auth.required = parse_flag(&value);
        }
        if let Some(value) = lookup("LOG_LEVEL") {
            self.logging.level = value.trim().to_lowercase();
        }
        if let Some(value) = lookup("BIND_ADDR") {
            self.server.bind = value.trim().to_string();
        }
    }

    /// Effective log level once debug mode is taken into account
    pub fn log_level(&self) -> log::LevelFilter {
        if self.logging.debug {
            return log::LevelFilter::Debug;
        }
        self.logging
            .level
            .parse()
            .unwrap_or(log::LevelFilter::Info)
    }

    pub fn pipeline_options(&self) -> PipelineOptions {
        PipelineOptions {
            debug: self.logging.debug,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    #[test]
    fn missing_file_gives_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let settings = Settings::load(&temp_dir.path().join("absent.yaml")).unwrap();
        assert_eq!(settings, Settings::default());
        assert!(settings.auth.required);
        assert_eq!(settings.server.max_upload_bytes, 10 * 1024 * 1024);
    }

    #[test]
    fn partial_yaml_keeps_other_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.yaml");
        std::fs::write(
            &path,
            "auth:\n  required: false\n  cookie_name: sid\nlogging:\n  level: warn\n",
        )
        .unwrap();

        let settings = Settings::load(&path).unwrap();
        assert!(!settings.auth.required);
        assert_eq!(settings.auth.cookie_name, "sid");
        assert_eq!(settings.auth.expiry_days, 30);
        assert_eq!(settings.log_level(), log::LevelFilter::Warn);
        assert_eq!(settings.server.bind, "127.0.0.1:8000");
    }

    #[test]
    fn invalid_yaml_is_a_parse_error() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.yaml");
        std::fs::write(&path, "server: [not, a, map").unwrap();

        assert!(matches!(Settings::load(&path), Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn environment_overrides_file_values() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("DEBUG", "True"),
            ("AUTH_REQUIRED", "false"),
            ("BIND_ADDR", "0.0.0.0:9000"),
        ]);
        let mut settings = Settings::default();
        settings.apply_env_from(|key| env.get(key).map(|v| v.to_string()));

        assert!(settings.logging.debug);
        assert!(!settings.auth.required);
        assert_eq!(settings.server.bind, "0.0.0.0:9000");
        assert_eq!(settings.log_level(), log::LevelFilter::Debug);
        assert!(settings.pipeline_options().debug);
    }
}
