//! Registry credentials, resolved per host.
//!
//! Credentials are never looked up implicitly by the registry client; a
//! [`CredentialSource`] is handed to it at construction time.

use std::collections::HashMap;
use std::path::PathBuf;

use a3s_ocm_core::error::{OcmError, Result};
use serde::{Deserialize, Serialize};

/// Username/password pair for one registry host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

/// Resolves credentials for a registry host.
pub trait CredentialSource: Send + Sync {
    fn credentials(&self, registry: &str) -> Result<Option<Credentials>>;
}

/// No credentials for any host.
pub struct Anonymous;

impl CredentialSource for Anonymous {
    fn credentials(&self, _registry: &str) -> Result<Option<Credentials>> {
        Ok(None)
    }
}

/// In-memory credentials injected by the caller.
#[derive(Default)]
pub struct StaticCredentials {
    entries: HashMap<String, Credentials>,
}

impl StaticCredentials {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, registry: &str, credentials: Credentials) -> Self {
        self.entries.insert(normalize_registry(registry), credentials);
        self
    }
}

impl CredentialSource for StaticCredentials {
    fn credentials(&self, registry: &str) -> Result<Option<Credentials>> {
        Ok(self.entries.get(&normalize_registry(registry)).cloned())
    }
}

/// Reads `OCM_REGISTRY_USERNAME` / `OCM_REGISTRY_PASSWORD` for every host.
pub struct EnvCredentials;

impl CredentialSource for EnvCredentials {
    fn credentials(&self, _registry: &str) -> Result<Option<Credentials>> {
        match (
            std::env::var("OCM_REGISTRY_USERNAME"),
            std::env::var("OCM_REGISTRY_PASSWORD"),
        ) {
            (Ok(u), Ok(p)) => Ok(Some(Credentials::new(u, p))),
            _ => Ok(None),
        }
    }
}

/// Persistent credential file format.
#[derive(Debug, Default, Serialize, Deserialize)]
struct CredentialFile {
    registries: HashMap<String, Credentials>,
}

/// Persistent credential store for registries.
///
/// Stores credentials at `~/.a3s/ocm/credentials.json`. Lookups that miss
/// fall back to [`EnvCredentials`].
pub struct CredentialStore {
    path: PathBuf,
}

impl CredentialStore {
    /// Create a credential store at the default path.
    pub fn default_path() -> Result<Self> {
        let home = dirs::home_dir().ok_or_else(|| {
            OcmError::ConfigError("Cannot determine home directory for credential store".to_string())
        })?;
        Ok(Self {
            path: home.join(".a3s").join("ocm").join("credentials.json"),
        })
    }

    /// Create a credential store at a custom path.
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// Store credentials for a registry. Overwrites existing entry.
    pub fn store(&self, registry: &str, credentials: Credentials) -> Result<()> {
        let mut file = self.load()?;
        file.registries
            .insert(normalize_registry(registry), credentials);
        self.save(&file)
    }

    /// Get stored credentials for a registry.
    pub fn get(&self, registry: &str) -> Result<Option<Credentials>> {
        let file = self.load()?;
        Ok(file.registries.get(&normalize_registry(registry)).cloned())
    }

    /// Remove credentials for a registry. Returns true if entry existed.
    pub fn remove(&self, registry: &str) -> Result<bool> {
        let mut file = self.load()?;
        let removed = file
            .registries
            .remove(&normalize_registry(registry))
            .is_some();
        if removed {
            self.save(&file)?;
        }
        Ok(removed)
    }

    fn load(&self) -> Result<CredentialFile> {
        if !self.path.exists() {
            return Ok(CredentialFile::default());
        }
        let data = std::fs::read_to_string(&self.path).map_err(|e| {
            OcmError::AuthError(format!(
                "Failed to read credential store {}: {}",
                self.path.display(),
                e
            ))
        })?;
        serde_json::from_str(&data).map_err(|e| {
            OcmError::AuthError(format!(
                "Failed to parse credential store {}: {}",
                self.path.display(),
                e
            ))
        })
    }

    /// Write tmp, then rename.
    fn save(&self, file: &CredentialFile) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp_path = self.path.with_extension("tmp");
        std::fs::write(&tmp_path, serde_json::to_string_pretty(file)?)?;
        std::fs::rename(&tmp_path, &self.path)?;
        Ok(())
    }
}

impl CredentialSource for CredentialStore {
    fn credentials(&self, registry: &str) -> Result<Option<Credentials>> {
        match self.get(registry)? {
            Some(credentials) => Ok(Some(credentials)),
            None => EnvCredentials.credentials(registry),
        }
    }
}

/// Normalize registry names so Docker Hub aliases share one entry.
fn normalize_registry(registry: &str) -> String {
    let r = registry.trim().to_lowercase();
    if r == "docker.io" || r == "registry-1.docker.io" {
        "index.docker.io".to_string()
    } else {
        r
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_store_and_get() {
        let dir = TempDir::new().unwrap();
        let store = CredentialStore::new(dir.path().join("credentials.json"));

        store.store("ghcr.io", Credentials::new("u1", "p1")).unwrap();
        assert_eq!(
            store.get("ghcr.io").unwrap(),
            Some(Credentials::new("u1", "p1"))
        );
        assert_eq!(store.get("quay.io").unwrap(), None);
    }

    #[test]
    fn test_remove() {
        let dir = TempDir::new().unwrap();
        let store = CredentialStore::new(dir.path().join("credentials.json"));

        store.store("ghcr.io", Credentials::new("u", "p")).unwrap();
        assert!(store.remove("ghcr.io").unwrap());
        assert!(!store.remove("ghcr.io").unwrap());
    }

    #[test]
    fn test_persistence_across_instances() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("credentials.json");

        CredentialStore::new(path.clone())
            .store("localhost:5000", Credentials::new("admin", "secret"))
            .unwrap();
        let creds = CredentialStore::new(path).get("LOCALHOST:5000").unwrap();
        assert_eq!(creds, Some(Credentials::new("admin", "secret")));
    }

    #[test]
    fn test_docker_io_normalization() {
        let source = StaticCredentials::new().with("docker.io", Credentials::new("u", "p"));
        assert!(source.credentials("index.docker.io").unwrap().is_some());
        assert!(source.credentials("registry-1.docker.io").unwrap().is_some());
        assert!(source.credentials("ghcr.io").unwrap().is_none());
    }

    #[test]
    fn test_anonymous() {
        assert_eq!(Anonymous.credentials("ghcr.io").unwrap(), None);
    }
}
