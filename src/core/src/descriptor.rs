//! Component descriptor model (OCM schema v2).

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::access::AccessSpec;
use crate::error::{OcmError, Result};
use crate::identity::Identity;

/// Schema version written into new descriptors.
pub const SCHEMA_VERSION: &str = "v2";

/// A named, versioned package: resources plus references to other packages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentDescriptor {
    pub meta: Metadata,
    pub component: Component,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub signatures: Vec<Signature>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Metadata {
    pub schema_version: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Component {
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub provider: Value,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub repository_contexts: Vec<Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub labels: Vec<Label>,
    #[serde(default)]
    pub resources: Vec<Resource>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sources: Vec<Value>,
    #[serde(default)]
    pub component_references: Vec<ComponentReference>,
}

/// Artifact delivered with a component.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Resource {
    pub name: String,
    #[serde(default)]
    pub version: String,
    #[serde(rename = "type")]
    pub resource_type: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra_identity: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relation: Option<String>,
    pub access: AccessSpec,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub labels: Vec<Label>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub digest: Option<DigestSpec>,
}

impl Resource {
    /// Whether this resource matches `name` and every pair in `extra`.
    pub fn matches(&self, name: &str, extra: &BTreeMap<String, String>) -> bool {
        self.name == name
            && extra
                .iter()
                .all(|(k, v)| self.extra_identity.get(k) == Some(v))
    }
}

/// Reference to another component version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentReference {
    pub name: String,
    pub component_name: String,
    pub version: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra_identity: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub labels: Vec<Label>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub digest: Option<DigestSpec>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Label {
    pub name: String,
    pub value: Value,
    /// Labels marked for signing take part in the descriptor digest
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub signing: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DigestSpec {
    pub hash_algorithm: String,
    pub normalisation_algorithm: String,
    pub value: String,
}

/// Signature over the normalised descriptor digest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signature {
    pub name: String,
    pub digest: DigestSpec,
    pub signature: SignatureSpec,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignatureSpec {
    pub algorithm: String,
    pub value: String,
    pub media_type: String,
}

impl ComponentDescriptor {
    /// Create an empty descriptor for `name@version`.
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            meta: Metadata {
                schema_version: SCHEMA_VERSION.to_string(),
            },
            component: Component {
                name: name.into(),
                version: version.into(),
                provider: Value::String("a3s".to_string()),
                repository_contexts: Vec::new(),
                labels: Vec::new(),
                resources: Vec::new(),
                sources: Vec::new(),
                component_references: Vec::new(),
            },
            signatures: Vec::new(),
        }
    }

    /// Parse a descriptor from YAML (JSON is accepted as a YAML subset).
    pub fn from_yaml(data: &[u8]) -> Result<Self> {
        let descriptor: ComponentDescriptor = serde_yaml::from_slice(data).map_err(|e| {
            OcmError::ValidationError(format!("Invalid component descriptor: {}", e))
        })?;
        if descriptor.component.name.is_empty() || descriptor.component.version.is_empty() {
            return Err(OcmError::ValidationError(
                "Component descriptor without name or version".to_string(),
            ));
        }
        Ok(descriptor)
    }

    pub fn to_yaml(&self) -> Result<Vec<u8>> {
        Ok(serde_yaml::to_string(self)?.into_bytes())
    }

    pub fn name(&self) -> &str {
        &self.component.name
    }

    pub fn version(&self) -> &str {
        &self.component.version
    }

    pub fn resources(&self) -> &[Resource] {
        &self.component.resources
    }

    pub fn references(&self) -> &[ComponentReference] {
        &self.component.component_references
    }

    /// Identity of the component version itself.
    pub fn identity(&self) -> Identity {
        Identity::new()
            .with(crate::identity::COMPONENT_NAME_KEY, self.name())
            .with(crate::identity::COMPONENT_VERSION_KEY, self.version())
    }

    /// Look up a resource by name, using `extra` to disambiguate.
    ///
    /// When several resources share the name and `extra` does not single
    /// one out, the lookup fails rather than guessing.
    pub fn resource(&self, name: &str, extra: &BTreeMap<String, String>) -> Result<&Resource> {
        let matches: Vec<&Resource> = self
            .component
            .resources
            .iter()
            .filter(|r| r.matches(name, extra))
            .collect();
        match matches.as_slice() {
            [] => Err(OcmError::NotFound(format!(
                "resource '{}' in component {}:{}",
                name,
                self.name(),
                self.version()
            ))),
            [one] => Ok(one),
            _ => Err(OcmError::ValidationError(format!(
                "resource '{}' is ambiguous in component {}:{}; set extraIdentity",
                name,
                self.name(),
                self.version()
            ))),
        }
    }

    pub fn signature(&self, name: &str) -> Option<&Signature> {
        self.signatures.iter().find(|s| s.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DESCRIPTOR: &str = r#"
meta:
  schemaVersion: v2
component:
  name: acme.org/web
  version: 1.0.0
  provider: acme
  repositoryContexts:
    - type: OCIRegistry
      baseUrl: ghcr.io/acme
  resources:
    - name: web-server
      version: 1.23.0
      type: ociImage
      relation: external
      access:
        type: ociArtifact
        imageReference: nginx:1.23-3-alpine
    - name: manifests
      version: 1.0.0
      type: directory
      extraIdentity:
        flavor: plain
      access:
        type: localBlob
        localReference: sha256:aaaa
        mediaType: application/x-tar
    - name: manifests
      version: 1.0.0
      type: directory
      extraIdentity:
        flavor: tls
      access:
        type: localBlob
        localReference: sha256:bbbb
        mediaType: application/x-tar
  componentReferences:
    - name: backend
      componentName: acme.org/backend
      version: 2.1.0
"#;

    #[test]
    fn test_parse_descriptor() {
        let cd = ComponentDescriptor::from_yaml(DESCRIPTOR.as_bytes()).unwrap();
        assert_eq!(cd.name(), "acme.org/web");
        assert_eq!(cd.version(), "1.0.0");
        assert_eq!(cd.resources().len(), 3);
        assert_eq!(cd.references()[0].component_name, "acme.org/backend");
        assert!(cd.signatures.is_empty());
    }

    #[test]
    fn test_resource_lookup_by_name() {
        let cd = ComponentDescriptor::from_yaml(DESCRIPTOR.as_bytes()).unwrap();
        let res = cd.resource("web-server", &BTreeMap::new()).unwrap();
        assert_eq!(res.access, AccessSpec::oci_artifact("nginx:1.23-3-alpine"));
    }

    #[test]
    fn test_resource_lookup_disambiguates_extra_identity() {
        let cd = ComponentDescriptor::from_yaml(DESCRIPTOR.as_bytes()).unwrap();
        assert!(matches!(
            cd.resource("manifests", &BTreeMap::new()),
            Err(OcmError::ValidationError(_))
        ));

        let mut extra = BTreeMap::new();
        extra.insert("flavor".to_string(), "tls".to_string());
        let res = cd.resource("manifests", &extra).unwrap();
        assert_eq!(res.access, AccessSpec::local_blob("sha256:bbbb", "application/x-tar"));
    }

    #[test]
    fn test_resource_lookup_missing() {
        let cd = ComponentDescriptor::from_yaml(DESCRIPTOR.as_bytes()).unwrap();
        let err = cd.resource("nope", &BTreeMap::new()).unwrap_err();
        assert!(matches!(err, OcmError::NotFound(_)));
    }

    #[test]
    fn test_yaml_round_trip_preserves_descriptor() {
        let cd = ComponentDescriptor::from_yaml(DESCRIPTOR.as_bytes()).unwrap();
        let again = ComponentDescriptor::from_yaml(&cd.to_yaml().unwrap()).unwrap();
        assert_eq!(cd, again);
    }

    #[test]
    fn test_invalid_descriptor() {
        assert!(ComponentDescriptor::from_yaml(b"component: [").is_err());
        let err = ComponentDescriptor::from_yaml(
            b"meta: {schemaVersion: v2}\ncomponent: {name: '', version: ''}\n",
        )
        .unwrap_err();
        assert!(matches!(err, OcmError::ValidationError(_)));
    }

    #[test]
    fn test_identity() {
        let cd = ComponentDescriptor::new("acme.org/web", "1.0.0");
        let identity = cd.identity();
        assert_eq!(identity.get("component-name"), Some("acme.org/web"));
        assert_eq!(identity.get("component-version"), Some("1.0.0"));
    }
}
