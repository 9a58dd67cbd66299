//! Snapshot records describing cached artifacts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::identity::Identity;

/// One cached, content-addressed artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    /// Identity the artifact is addressed by
    pub identity: Identity,
    /// Content digest of the pushed blob (e.g., "sha256:abc123...")
    pub digest: String,
    /// Tag chosen by the snapshot tag policy
    pub tag: String,
    /// Repository the artifact lives in (`<cache>/<name>`)
    pub repository_url: String,
    /// Blob size in bytes
    #[serde(default)]
    pub size: u64,
    /// When the artifact was written
    pub created_at: DateTime<Utc>,
}

impl Snapshot {
    /// Cache repository name derived from the identity.
    pub fn cache_name(&self) -> String {
        self.identity.cache_name()
    }

    /// `repository:tag@digest` reference of the artifact.
    pub fn reference(&self) -> String {
        format!("{}:{}@{}", self.repository_url, self.tag, self.digest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reference() {
        let identity = Identity::for_resource("acme.org/web", "1.0.0", "manifests", "1.0.0");
        let snapshot = Snapshot {
            repository_url: format!("localhost:5000/{}", identity.cache_name()),
            identity,
            digest: "sha256:abc".to_string(),
            tag: "1.0.0".to_string(),
            size: 10,
            created_at: Utc::now(),
        };
        assert!(snapshot.reference().starts_with("localhost:5000/sha-"));
        assert!(snapshot.reference().ends_with(":1.0.0@sha256:abc"));
        assert_eq!(snapshot.cache_name(), snapshot.identity.cache_name());
    }

    #[test]
    fn test_serde_shape() {
        let snapshot = Snapshot {
            identity: Identity::new().with("component-name", "a"),
            digest: "sha256:abc".to_string(),
            tag: "latest".to_string(),
            repository_url: "cache/sha-1".to_string(),
            size: 0,
            created_at: Utc::now(),
        };
        let value = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(value["identity"]["component-name"], "a");
        assert_eq!(value["repositoryUrl"], "cache/sha-1");
        let back: Snapshot = serde_json::from_value(value).unwrap();
        assert_eq!(back, snapshot);
    }
}
