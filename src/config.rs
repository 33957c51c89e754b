//! Client configuration.
//!
//! Resolution order, later sources overriding earlier ones:
//! 1. Built-in defaults (`localhost:3002`, 30 second timeout)
//! 2. A JSON file: `$VCTRLD_CONFIG`, else `<config_dir>/vctrld-client/config.json`
//! 3. Environment variables `VCTRLD_HOST`, `VCTRLD_PORT`, `VCTRLD_TIMEOUT_SECS`
//!
//! A timeout of `0` disables the operation timeout.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Port vcontrold listens on by default.
pub const DEFAULT_PORT: u16 = 3002;

/// Default operation timeout in seconds.
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Environment variable naming an explicit config file.
pub const CONFIG_PATH_ENV: &str = "VCTRLD_CONFIG";

const HOST_ENV: &str = "VCTRLD_HOST";
const PORT_ENV: &str = "VCTRLD_PORT";
const TIMEOUT_ENV: &str = "VCTRLD_TIMEOUT_SECS";

/// Where to find vcontrold and how long to wait for it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Host name or address of the daemon.
    pub host: String,
    /// TCP port of the daemon.
    pub port: u16,
    /// Per-operation timeout in seconds; `0` waits indefinitely.
    pub timeout_secs: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: DEFAULT_PORT,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }
}

impl ClientConfig {
    /// Load configuration from the default file location and environment.
    ///
    /// A missing default file is not an error; a missing file named by
    /// `$VCTRLD_CONFIG` is.
    ///
    /// # Errors
    ///
    /// Returns an error if a config file cannot be read or parsed, or if an
    /// environment override is not a valid number.
    pub fn load() -> Result<Self> {
        let mut config = match std::env::var_os(CONFIG_PATH_ENV) {
            Some(path) => Self::from_file(Path::new(&path))?,
            None => match default_config_path() {
                Some(path) if path.exists() => Self::from_file(&path)?,
                _ => Self::default(),
            },
        };

        config.apply_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Read a JSON config file. Missing fields take their defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or is not valid JSON.
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;

        serde_json::from_str(&contents)
            .with_context(|| format!("Invalid config file {}", path.display()))
    }

    /// Apply overrides from a variable lookup (the environment, in `load`).
    ///
    /// # Errors
    ///
    /// Returns an error if the port or timeout is not a valid number.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup(HOST_ENV) {
            self.host = host;
        }

        if let Some(port) = lookup(PORT_ENV) {
            self.port = port
                .trim()
                .parse()
                .with_context(|| format!("Invalid {} value: {}", PORT_ENV, port))?;
        }

        if let Some(secs) = lookup(TIMEOUT_ENV) {
            self.timeout_secs = secs
                .trim()
                .parse()
                .with_context(|| format!("Invalid {} value: {}", TIMEOUT_ENV, secs))?;
        }

        Ok(())
    }

    /// The operation timeout, or `None` when disabled.
    pub fn timeout(&self) -> Option<Duration> {
        match self.timeout_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }
}

/// Resolve the default config file path.
///
/// `$XDG_CONFIG_HOME/vctrld-client/config.json` on Linux,
/// `~/Library/Application Support/vctrld-client/config.json` on macOS.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("vctrld-client").join("config.json"))
}
