//! Registry credentials.
//!
//! Credentials live in a Docker-style `auths` file at `~/.hoist/auth.json`,
//! with `user:password` base64-encoded per registry. Writes are atomic
//! (write tmp, rename).

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use hoist_core::error::{PublishError, Result};
use serde::{Deserialize, Serialize};

use super::registry::RegistryAuth;

/// Resolves authentication for a registry domain.
///
/// The pipeline asks once per registry operation and never stores or logs
/// what it gets back.
pub trait CredentialProvider: Send + Sync {
    fn resolve(&self, registry: &str) -> Result<RegistryAuth>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct AuthEntry {
    auth: String,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct AuthFile {
    #[serde(default)]
    auths: BTreeMap<String, AuthEntry>,
}

/// File-backed credential store.
pub struct CredentialStore {
    path: PathBuf,
}

impl CredentialStore {
    /// Credential store at `~/.hoist/auth.json`.
    pub fn default_path() -> Result<Self> {
        let home = dirs::home_dir().ok_or_else(|| PublishError::Config {
            message: "Cannot determine home directory for credential store".to_string(),
            hint: None,
        })?;
        Ok(Self {
            path: home.join(".hoist").join("auth.json"),
        })
    }

    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Store credentials for a registry, replacing any existing entry.
    pub fn store(&self, registry: &str, username: &str, password: &str) -> Result<()> {
        let mut file = self.load()?;
        let encoded = BASE64.encode(format!("{}:{}", username, password));
        file.auths
            .insert(normalize_registry(registry), AuthEntry { auth: encoded });
        self.save(&file)
    }

    /// Credentials for a registry as `(username, password)`.
    pub fn get(&self, registry: &str) -> Result<Option<(String, String)>> {
        let file = self.load()?;
        let key = normalize_registry(registry);
        match file.auths.get(&key) {
            Some(entry) => decode_entry(&key, entry).map(Some),
            None => Ok(None),
        }
    }

    /// Remove credentials for a registry. Returns true if an entry existed.
    pub fn remove(&self, registry: &str) -> Result<bool> {
        let mut file = self.load()?;
        let removed = file.auths.remove(&normalize_registry(registry)).is_some();
        if removed {
            self.save(&file)?;
        }
        Ok(removed)
    }

    /// Registries with stored credentials, sorted.
    pub fn list_registries(&self) -> Result<Vec<String>> {
        Ok(self.load()?.auths.into_keys().collect())
    }

    fn load(&self) -> Result<AuthFile> {
        if !self.path.exists() {
            return Ok(AuthFile::default());
        }
        let data = std::fs::read_to_string(&self.path).map_err(|e| {
            PublishError::Config {
                message: format!("Failed to read credential store {}: {}", self.path.display(), e),
                hint: None,
            }
        })?;
        serde_json::from_str(&data).map_err(|e| PublishError::Config {
            message: format!("Failed to parse credential store {}: {}", self.path.display(), e),
            hint: None,
        })
    }

    fn save(&self, file: &AuthFile) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp_path = self.path.with_extension("tmp");
        std::fs::write(&tmp_path, serde_json::to_string_pretty(file)?)?;
        std::fs::rename(&tmp_path, &self.path)?;
        Ok(())
    }
}

impl CredentialProvider for CredentialStore {
    /// Stored credentials, then `REGISTRY_USERNAME`/`REGISTRY_PASSWORD`, then anonymous.
    fn resolve(&self, registry: &str) -> Result<RegistryAuth> {
        if let Some((username, password)) = self.get(registry)? {
            tracing::debug!(registry, "Using stored registry credentials");
            return Ok(RegistryAuth::basic(username, password));
        }
        Ok(RegistryAuth::from_env())
    }
}

/// Fixed credentials keyed by registry, for embedding and tests.
#[derive(Default)]
pub struct StaticCredentials {
    entries: HashMap<String, RegistryAuth>,
}

impl StaticCredentials {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, registry: &str, auth: RegistryAuth) -> Self {
        self.entries.insert(normalize_registry(registry), auth);
        self
    }
}

impl CredentialProvider for StaticCredentials {
    fn resolve(&self, registry: &str) -> Result<RegistryAuth> {
        Ok(self
            .entries
            .get(&normalize_registry(registry))
            .cloned()
            .unwrap_or_else(RegistryAuth::anonymous))
    }
}

fn decode_entry(registry: &str, entry: &AuthEntry) -> Result<(String, String)> {
    let malformed = || PublishError::Config {
        message: format!("Malformed credentials for registry {}", registry),
        hint: Some(format!("run `hoist login {}` again", registry)),
    };
    let decoded = BASE64.decode(entry.auth.trim()).map_err(|_| malformed())?;
    let decoded = String::from_utf8(decoded).map_err(|_| malformed())?;
    let (user, pass) = decoded.split_once(':').ok_or_else(malformed)?;
    Ok((user.to_string(), pass.to_string()))
}

/// Docker Hub aliases share one entry.
fn normalize_registry(registry: &str) -> String {
    let r = registry
        .trim()
        .trim_start_matches("https://")
        .trim_start_matches("http://")
        .trim_end_matches('/')
        .to_lowercase();
    match r.as_str() {
        "docker.io" | "registry-1.docker.io" | "index.docker.io" => "index.docker.io".to_string(),
        _ => r,
    }
}
