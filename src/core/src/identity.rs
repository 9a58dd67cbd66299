//! Canonical key/value identity used to address cache entries and snapshots.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Component name key.
pub const COMPONENT_NAME_KEY: &str = "component-name";
/// Component version key.
pub const COMPONENT_VERSION_KEY: &str = "component-version";
/// Resource name key.
pub const RESOURCE_NAME_KEY: &str = "resource-name";
/// Resource version key.
pub const RESOURCE_VERSION_KEY: &str = "resource-version";
/// Package-type-specific version key (Helm charts).
pub const HELM_CHART_VERSION_KEY: &str = "helm-chart-version";

/// Marker prefixed to every cache repository name.
pub const CACHE_NAME_PREFIX: &str = "sha-";

/// Unordered set of string key/value pairs.
///
/// Backed by a `BTreeMap`, so iteration and serialization are always in key
/// order regardless of how the identity was built.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Identity(BTreeMap<String, String>);

impl Identity {
    pub fn new() -> Self {
        Self::default()
    }

    /// Identity of a resource inside a component version.
    pub fn for_resource(
        component_name: &str,
        component_version: &str,
        resource_name: &str,
        resource_version: &str,
    ) -> Self {
        Self::new()
            .with(COMPONENT_NAME_KEY, component_name)
            .with(COMPONENT_VERSION_KEY, component_version)
            .with(RESOURCE_NAME_KEY, resource_name)
            .with(RESOURCE_VERSION_KEY, resource_version)
    }

    /// Builder-style insert.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Extend with extra identity attributes.
    pub fn extend<'a>(&mut self, extra: impl IntoIterator<Item = (&'a String, &'a String)>) {
        for (k, v) in extra {
            self.0.insert(k.clone(), v.clone());
        }
    }

    /// Hex SHA-256 over the sorted pairs, each key and value prefixed
    /// with its length.
    pub fn hash(&self) -> String {
        let mut hasher = Sha256::new();
        for (key, value) in &self.0 {
            for part in [key, value] {
                hasher.update((part.len() as u64).to_be_bytes());
                hasher.update(part.as_bytes());
            }
        }
        hex::encode(hasher.finalize())
    }

    /// Deterministic cache repository name (`sha-<hash>`).
    pub fn cache_name(&self) -> String {
        format!("{}{}", CACHE_NAME_PREFIX, self.hash())
    }

    /// Tag for the snapshot owning this identity.
    ///
    /// Prefers the package-specific version, then the resource version,
    /// then the caller-supplied fallback. Versions are encoded with
    /// [`version_to_tag`].
    pub fn snapshot_tag(&self, fallback: &str) -> String {
        self.get(HELM_CHART_VERSION_KEY)
            .or_else(|| self.get(RESOURCE_VERSION_KEY))
            .filter(|v| !v.is_empty())
            .map(version_to_tag)
            .unwrap_or_else(|| fallback.to_string())
    }
}

/// OCI tags cannot carry `+`; semver build metadata is encoded.
pub fn version_to_tag(version: &str) -> String {
    version.replace('+', ".build-")
}

pub fn tag_to_version(tag: &str) -> String {
    tag.replace(".build-", "+")
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.0.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
        write!(f, "{{{}}}", parts.join(","))
    }
}

impl From<BTreeMap<String, String>> for Identity {
    fn from(map: BTreeMap<String, String>) -> Self {
        Self(map)
    }
}

impl FromIterator<(String, String)> for Identity {
    fn from_iter<T: IntoIterator<Item = (String, String)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_name_order_independent() {
        let a = Identity::new()
            .with(COMPONENT_NAME_KEY, "acme.org/web")
            .with(COMPONENT_VERSION_KEY, "1.0.0")
            .with(RESOURCE_NAME_KEY, "manifests")
            .with(RESOURCE_VERSION_KEY, "1.0.0");
        let b = Identity::new()
            .with(RESOURCE_VERSION_KEY, "1.0.0")
            .with(RESOURCE_NAME_KEY, "manifests")
            .with(COMPONENT_VERSION_KEY, "1.0.0")
            .with(COMPONENT_NAME_KEY, "acme.org/web");
        assert_eq!(a.cache_name(), b.cache_name());
    }

    #[test]
    fn test_cache_name_from_wire_shape() {
        let built = Identity::for_resource("acme.org/web", "1.0.0", "manifests", "1.0.0");
        let parsed: Identity = serde_json::from_str(
            r#"{"resource-version":"1.0.0","component-name":"acme.org/web","resource-name":"manifests","component-version":"1.0.0"}"#,
        )
        .unwrap();
        assert_eq!(built.cache_name(), parsed.cache_name());
    }

    #[test]
    fn test_cache_name_format() {
        let name = Identity::for_resource("a", "1", "r", "1").cache_name();
        assert!(name.starts_with("sha-"));
        assert_eq!(name.len(), 4 + 64);
        assert!(name[4..].chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_cache_name_differs_by_value() {
        let a = Identity::for_resource("a", "1", "r", "1");
        let b = Identity::for_resource("a", "1", "r", "2");
        assert_ne!(a.cache_name(), b.cache_name());
    }

    #[test]
    fn test_key_value_boundaries_matter() {
        let a = Identity::new().with("ab", "c");
        let b = Identity::new().with("a", "bc");
        assert_ne!(a.cache_name(), b.cache_name());

        let a = Identity::new().with("a=b", "c");
        let b = Identity::new().with("a", "b=c");
        assert_ne!(a.cache_name(), b.cache_name());

        let a = Identity::new().with("a", "1\nb=2");
        let b = Identity::new().with("a", "1").with("b", "2");
        assert_ne!(a.cache_name(), b.cache_name());
    }

    #[test]
    fn test_snapshot_tag_encodes_build_metadata() {
        let identity = Identity::for_resource("a", "1", "chart", "1.0.0+build.1");
        assert_eq!(identity.snapshot_tag("latest"), "1.0.0.build-build.1");
        assert_eq!(tag_to_version(&identity.snapshot_tag("latest")), "1.0.0+build.1");
    }

    #[test]
    fn test_snapshot_tag_policy() {
        let identity = Identity::for_resource("a", "1", "chart", "2.0.0");
        assert_eq!(identity.snapshot_tag("latest"), "2.0.0");

        let with_chart = identity.clone().with(HELM_CHART_VERSION_KEY, "0.3.1");
        assert_eq!(with_chart.snapshot_tag("latest"), "0.3.1");

        let bare = Identity::new().with(COMPONENT_NAME_KEY, "a");
        assert_eq!(bare.snapshot_tag("opaque"), "opaque");
    }

    #[test]
    fn test_extend_with_extra_identity() {
        let mut identity = Identity::for_resource("a", "1", "r", "1");
        let mut extra = BTreeMap::new();
        extra.insert("architecture".to_string(), "arm64".to_string());
        identity.extend(&extra);
        assert_eq!(identity.get("architecture"), Some("arm64"));
        assert_eq!(identity.len(), 5);
    }

    #[test]
    fn test_display_is_sorted() {
        let identity = Identity::new().with("b", "2").with("a", "1");
        assert_eq!(identity.to_string(), "{a=1,b=2}");
    }
}
