//! Access specifications: where a resource's payload can be read from.

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

/// Access type names as they appear in component descriptors.
pub const LOCAL_BLOB: &str = "localBlob";
pub const OCI_BLOB: &str = "ociBlob";
pub const OCI_ARTIFACT: &str = "ociArtifact";

/// Blob stored alongside the component descriptor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalBlobAccess {
    /// Repository-local blob reference (a digest for OCI repositories)
    pub local_reference: String,
    pub media_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference_name: Option<String>,
    /// Equivalent access usable from outside the owning repository
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub global_access: Option<Box<AccessSpec>>,
}

/// Single blob inside an OCI repository.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OciBlobAccess {
    /// Repository reference (`registry/repo`)
    #[serde(rename = "ref")]
    pub reference: String,
    pub digest: String,
    #[serde(default)]
    pub media_type: String,
    #[serde(default)]
    pub size: u64,
}

/// Full OCI artifact addressed by image reference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OciArtifactAccess {
    pub image_reference: String,
}

/// Tagged union over the supported access types.
///
/// Unknown types are kept verbatim in [`AccessSpec::Unsupported`] so that
/// reading a descriptor never fails on them; resolving one is an error.
#[derive(Debug, Clone, PartialEq)]
pub enum AccessSpec {
    LocalBlob(LocalBlobAccess),
    OciBlob(OciBlobAccess),
    OciArtifact(OciArtifactAccess),
    Unsupported { kind: String, spec: Value },
}

impl AccessSpec {
    pub fn local_blob(local_reference: impl Into<String>, media_type: impl Into<String>) -> Self {
        AccessSpec::LocalBlob(LocalBlobAccess {
            local_reference: local_reference.into(),
            media_type: media_type.into(),
            reference_name: None,
            global_access: None,
        })
    }

    pub fn oci_artifact(image_reference: impl Into<String>) -> Self {
        AccessSpec::OciArtifact(OciArtifactAccess {
            image_reference: image_reference.into(),
        })
    }

    pub fn oci_blob(reference: impl Into<String>, digest: impl Into<String>) -> Self {
        AccessSpec::OciBlob(OciBlobAccess {
            reference: reference.into(),
            digest: digest.into(),
            media_type: String::new(),
            size: 0,
        })
    }

    /// The type name this spec was declared with.
    pub fn kind(&self) -> &str {
        match self {
            AccessSpec::LocalBlob(_) => LOCAL_BLOB,
            AccessSpec::OciBlob(_) => OCI_BLOB,
            AccessSpec::OciArtifact(_) => OCI_ARTIFACT,
            AccessSpec::Unsupported { kind, .. } => kind,
        }
    }

    fn to_value(&self) -> serde_json::Result<Value> {
        let (kind, mut value) = match self {
            AccessSpec::LocalBlob(a) => (LOCAL_BLOB, serde_json::to_value(a)?),
            AccessSpec::OciBlob(a) => (OCI_BLOB, serde_json::to_value(a)?),
            AccessSpec::OciArtifact(a) => (OCI_ARTIFACT, serde_json::to_value(a)?),
            AccessSpec::Unsupported { spec, .. } => return Ok(spec.clone()),
        };
        if let Value::Object(map) = &mut value {
            map.insert("type".to_string(), Value::String(kind.to_string()));
        }
        Ok(value)
    }
}

/// Strip the optional `/v1` suffix of versioned type names.
fn base_kind(kind: &str) -> &str {
    kind.strip_suffix("/v1").unwrap_or(kind)
}

impl Serialize for AccessSpec {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_value()
            .map_err(serde::ser::Error::custom)?
            .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for AccessSpec {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        let kind = value
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| D::Error::custom("access specification without type"))?
            .to_string();

        let spec = match base_kind(&kind) {
            LOCAL_BLOB => AccessSpec::LocalBlob(
                serde_json::from_value(value).map_err(D::Error::custom)?,
            ),
            OCI_BLOB => {
                AccessSpec::OciBlob(serde_json::from_value(value).map_err(D::Error::custom)?)
            }
            // "ociRegistry" is the legacy name of ociArtifact
            OCI_ARTIFACT | "ociRegistry" => AccessSpec::OciArtifact(
                serde_json::from_value(value).map_err(D::Error::custom)?,
            ),
            _ => AccessSpec::Unsupported { kind, spec: value },
        };
        Ok(spec)
    }
}
