//! Publish configuration.
//!
//! Values come from an optional YAML file, then environment variables,
//! then command-line flags (applied by the caller).

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{PublishError, Result};

/// Conventional manifest file name looked up in the working directory.
pub const DEFAULT_MANIFEST_FILE: &str = "hoist.yaml";

/// Conventional configuration file name.
pub const DEFAULT_CONFIG_FILE: &str = "hoist-config.yaml";

/// Directory the builder writes `bundle.json` into.
pub const DEFAULT_OUTPUT_DIR: &str = ".cnab";

/// Publish configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PublishConfig {
    /// Explicit manifest path (falls back to `./hoist.yaml`)
    pub manifest_file: Option<PathBuf>,

    /// Treat the bundle tag's registry as insecure (plain HTTP / self-signed)
    pub insecure_registry: bool,

    /// TCP connect timeout for registry requests, in seconds
    pub connect_timeout_secs: Option<u64>,

    /// Read timeout for registry requests, in seconds
    pub read_timeout_secs: Option<u64>,

    /// Where the generated bundle descriptor is written
    pub output_dir: PathBuf,

    /// Credential file override (defaults to `~/.hoist/auth.json`)
    pub credentials_path: Option<PathBuf>,
}

impl Default for PublishConfig {
    fn default() -> Self {
        Self {
            manifest_file: None,
            insecure_registry: false,
            connect_timeout_secs: None,
            read_timeout_secs: None,
            output_dir: PathBuf::from(DEFAULT_OUTPUT_DIR),
            credentials_path: None,
        }
    }
}

impl PublishConfig {
    /// Load configuration from a YAML file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path).map_err(|e| PublishError::Config {
            message: format!("Failed to read config file {}: {}", path.display(), e),
            hint: None,
        })?;
        let config: PublishConfig = serde_yaml::from_str(&data)?;
        Ok(config)
    }

    /// Load configuration from `path`, or from `./hoist-config.yaml` when present,
    /// or fall back to defaults. Environment overrides are applied afterwards.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(p) => Self::from_file(p)?,
            None => {
                let default = Path::new(DEFAULT_CONFIG_FILE);
                if default.exists() {
                    Self::from_file(default)?
                } else {
                    Self::default()
                }
            }
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Apply `HOIST_*` environment overrides using the given lookup.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(v) = lookup("HOIST_INSECURE_REGISTRY") {
            self.insecure_registry = parse_bool("HOIST_INSECURE_REGISTRY", &v)?;
        }
        if let Some(v) = lookup("HOIST_CONNECT_TIMEOUT") {
            self.connect_timeout_secs = Some(parse_secs("HOIST_CONNECT_TIMEOUT", &v)?);
        }
        if let Some(v) = lookup("HOIST_READ_TIMEOUT") {
            self.read_timeout_secs = Some(parse_secs("HOIST_READ_TIMEOUT", &v)?);
        }
        Ok(())
    }

    pub fn connect_timeout(&self) -> Option<Duration> {
        self.connect_timeout_secs.map(Duration::from_secs)
    }

    pub fn read_timeout(&self) -> Option<Duration> {
        self.read_timeout_secs.map(Duration::from_secs)
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        other => Err(PublishError::Config {
            message: format!("{} must be a boolean, got '{}'", key, other),
            hint: None,
        }),
    }
}

fn parse_secs(key: &str, value: &str) -> Result<u64> {
    value.trim().parse().map_err(|_| PublishError::Config {
        message: format!("{} must be a number of seconds, got '{}'", key, value),
        hint: None,
    })
}
