//! Configuration management for termwin.
//!
//! This module provides:
//! - TOML configuration file loading from `~/.termwin/config.toml`
//! - Session policy (what happens when the last reference to a window dies)
//! - Logging and demo settings for the `termwin` binary
//!
//! # Configuration File
//!
//! ```toml
//! [log]
//! level = "debug"
//! file = "termwin.log"
//!
//! [session]
//! # "retain" keeps unreferenced windows open until closed explicitly,
//! # "close-on-last-release" closes them when the last reference dies
//! release_policy = "retain"
//! keypad = true
//!
//! [demo]
//! title = "termwin"
//! border = true
//! ```

use std::fs;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Main configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Logging settings
    pub log: LogConfig,
    /// Window session settings
    pub session: SessionConfig,
    /// Demo program settings
    pub demo: DemoConfig,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Filter directive, e.g. "info" or "termwin=trace"
    pub level: String,
    /// Log file name, relative to the config directory
    pub file: Option<String>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: Some("termwin.log".to_string()),
        }
    }
}

/// What happens when the last reference to an open window is released
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReleasePolicy {
    /// Keep the window open until it is closed explicitly
    #[default]
    Retain,
    /// Close the window (and its subwindows); the root window is exempt
    CloseOnLastRelease,
}

/// Session configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub release_policy: ReleasePolicy,
    /// Enable keypad mode on the root window at init
    pub keypad: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            release_policy: ReleasePolicy::Retain,
            keypad: true,
        }
    }
}

/// Demo configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DemoConfig {
    pub title: String,
    pub border: bool,
}

impl Default for DemoConfig {
    fn default() -> Self {
        Self {
            title: "termwin".to_string(),
            border: true,
        }
    }
}

impl Config {
    /// Load configuration from file
    pub fn load() -> Self {
        if let Some(path) = Self::get_config_path() {
            if path.exists() {
                if let Ok(content) = fs::read_to_string(&path) {
                    if let Ok(config) = Self::from_toml_str(&content) {
                        return config;
                    }
                }
            }
        }
        Self::default()
    }

    /// Parse configuration from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Directory holding the config and log files
    pub fn config_dir() -> Option<PathBuf> {
        let dir = home_dir()?.join(".termwin");
        if !dir.exists() {
            let _ = fs::create_dir_all(&dir);
        }
        Some(dir)
    }

    /// Get config file path
    fn get_config_path() -> Option<PathBuf> {
        Self::config_dir().map(|dir| dir.join("config.toml"))
    }

    /// Resolved log file path, if logging to a file is enabled
    pub fn log_path(&self) -> Option<PathBuf> {
        let file = self.log.file.as_ref()?;
        Some(match Self::config_dir() {
            Some(dir) => dir.join(file),
            None => PathBuf::from(file),
        })
    }
}

fn home_dir() -> Option<PathBuf> {
    std::env::var_os("USERPROFILE")
        .or_else(|| std::env::var_os("HOME"))
        .map(PathBuf::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.session.release_policy, ReleasePolicy::Retain);
        assert!(config.session.keypad);
        assert_eq!(config.log.level, "info");
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let config = Config::from_toml_str(
            r#"
            [session]
            release_policy = "close-on-last-release"
            "#,
        )
        .unwrap();
        assert_eq!(config.session.release_policy, ReleasePolicy::CloseOnLastRelease);
        assert!(config.session.keypad);
        assert_eq!(config.demo.title, "termwin");
    }

    #[test]
    fn test_unknown_policy_is_an_error() {
        assert!(Config::from_toml_str("[session]\nrelease_policy = \"sometimes\"\n").is_err());
    }

    #[test]
    fn test_round_trip_through_toml() {
        let mut config = Config::default();
        config.log.level = "termwin=trace".to_string();
        config.log.file = None;
        let text = toml::to_string_pretty(&config).unwrap();
        let parsed = Config::from_toml_str(&text).unwrap();
        assert_eq!(parsed.log.level, "termwin=trace");
        assert!(parsed.log.file.is_none());
    }
}
