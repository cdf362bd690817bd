//! Configuration for solterm.
//!
//! Settings are read from `~/.solterm/config.toml`. Every key is optional,
//! command line options take precedence, and a file that cannot be parsed
//! is reported and replaced by the defaults:
//!
//! ```toml
//! # Default username for authentication
//! user = "admin"
//!
//! # Redirection port of the controller
//! port = 16994
//!
//! # Print session progress on stderr
//! verbose = true
//!
//! # Keepalive interval advertised to the controller (1-65535 ms).
//! # Four intervals without traffic end the session.
//! heartbeat_interval_ms = 5000
//!
//! # Default log filter when RUST_LOG is unset
//! log_level = "info"
//! ```

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::protocol::DEFAULT_HEARTBEAT_INTERVAL_MS;
use crate::core::DEFAULT_USERNAME;
use crate::net::DEFAULT_PORT;

/// Main configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Username when `-u` is not given
    pub user: String,
    /// Port when none is given on the command line
    pub port: u16,
    /// Diagnostics on stderr
    pub verbose: bool,
    /// Keepalive interval in milliseconds
    pub heartbeat_interval_ms: u64,
    /// Log filter directive
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            user: DEFAULT_USERNAME.to_string(),
            port: DEFAULT_PORT,
            verbose: true,
            heartbeat_interval_ms: u64::from(DEFAULT_HEARTBEAT_INTERVAL_MS),
            log_level: "info".to_string(),
        }
    }
}

/// Why the config file could not be used.
#[derive(Error, Debug)]
pub enum LoadError {
    #[error("cannot read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("malformed {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

impl Config {
    /// Load configuration from `~/.solterm/config.toml`.
    ///
    /// A missing file yields the defaults.
    pub fn load() -> Result<Self, LoadError> {
        match Self::get_config_path() {
            Some(path) => Self::load_from(&path),
            None => Ok(Self::default()),
        }
    }

    pub fn load_from(path: &Path) -> Result<Self, LoadError> {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(source) => {
                return Err(LoadError::Read {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };
        Self::parse(&content).map_err(|source| LoadError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn parse(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Directory holding the config file and the log.
    pub fn dir() -> Option<PathBuf> {
        home_dir().map(|home| home.join(".solterm"))
    }

    /// Get config file path
    fn get_config_path() -> Option<PathBuf> {
        Self::dir().map(|dir| dir.join("config.toml"))
    }
}

// Get home directory
fn home_dir() -> Option<PathBuf> {
    std::env::var_os("HOME")
        .or_else(|| std::env::var_os("USERPROFILE"))
        .map(PathBuf::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_empty_file_is_default() {
        assert_eq!(Config::parse("").unwrap(), Config::default());
    }

    #[test]
    fn test_partial_file_keeps_other_defaults() {
        let config = Config::parse("user = \"ops\"\nheartbeat_interval_ms = 2000\n").unwrap();
        assert_eq!(
            config,
            Config {
                user: "ops".to_string(),
                heartbeat_interval_ms: 2000,
                ..Config::default()
            }
        );
    }

    #[test]
    fn test_malformed_file_rejected() {
        assert!(Config::parse("port = \"not a number\"").is_err());
        assert!(Config::parse("port = 70000").is_err());
    }

    #[test]
    fn test_load_from_file() {
        let dir = std::env::temp_dir().join(format!("solterm-config-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();

        let good = dir.join("good.toml");
        fs::write(&good, "port = 16995\nverbose = false\n").unwrap();
        let config = Config::load_from(&good).unwrap();
        assert_eq!(config.port, 16995);
        assert!(!config.verbose);

        let bad = dir.join("bad.toml");
        fs::write(&bad, "verbose = maybe").unwrap();
        let err = Config::load_from(&bad).unwrap_err();
        assert!(matches!(err, LoadError::Parse { .. }));
        assert!(err.to_string().contains("bad.toml"));

        assert_eq!(Config::load_from(&dir.join("missing.toml")).unwrap(), Config::default());
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_round_trips_through_toml() {
        let config = Config {
            log_level: "solterm=trace".to_string(),
            ..Config::default()
        };
        let text = toml::to_string_pretty(&config).unwrap();
        assert_eq!(Config::parse(&text).unwrap(), config);
    }
}
