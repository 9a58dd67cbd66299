//! `ConfigData` documents shipped inside components, and the substitutions
//! derived from them.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{OcmError, Result};

/// Expected `kind` of a ConfigData document.
pub const CONFIG_DATA_KIND: &str = "ConfigData";

/// Localization and configuration rules for the files of a resource.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_version: Option<String>,
    #[serde(default)]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub configuration: Option<Configuration>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub localization: Vec<LocalizationRule>,
}

impl ConfigData {
    /// Parse a ConfigData document.
    pub fn from_yaml(data: &[u8]) -> Result<Self> {
        let config: ConfigData = serde_yaml::from_slice(data)
            .map_err(|e| OcmError::ValidationError(format!("Invalid ConfigData: {}", e)))?;
        if !config.kind.is_empty() && config.kind != CONFIG_DATA_KIND {
            return Err(OcmError::ValidationError(format!(
                "Expected kind {}, got {}",
                CONFIG_DATA_KIND, config.kind
            )));
        }
        Ok(config)
    }
}

/// Templated configuration: defaults, an optional schema and rules.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Configuration {
    #[serde(default)]
    pub defaults: BTreeMap<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<Value>,
    #[serde(default)]
    pub rules: Vec<ConfigRule>,
}

/// Set `path` in `file` to the evaluated `value`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigRule {
    pub value: Value,
    pub file: String,
    pub path: String,
}

/// Rewrite image coordinates of `resource` into `file`.
///
/// Each of `registry`, `repository`, `image` and `tag` holds the document
/// path that receives the corresponding part of the resolved reference.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LocalizationRule {
    pub resource: ResourceSelector,
    pub file: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub registry: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repository: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
}

/// Selects a resource by name, extra identity and reference path.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceSelector {
    pub name: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra_identity: BTreeMap<String, String>,
    /// Dotted path of reference names leading to the owning component
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub reference_path: String,
}

impl ResourceSelector {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }
}

/// One structural patch to a YAML/JSON document in the target tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Substitution {
    pub file: String,
    pub path: String,
    pub value: Value,
}

impl Substitution {
    pub fn new(file: impl Into<String>, path: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            file: file.into(),
            path: path.into(),
            value: value.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_configuration() {
        let yaml = r#"
apiVersion: config.ocm.software/v1alpha1
kind: ConfigData
configuration:
  defaults:
    color: red
    message: Hello, world!
  schema:
    type: object
    additionalProperties: false
    properties:
      color: {type: string}
      message: {type: string}
  rules:
    - value: (( message ))
      file: configmap.yaml
      path: data.MSG
    - value: (( color ))
      file: configmap.yaml
      path: data.COLOR
"#;
        let config = ConfigData::from_yaml(yaml.as_bytes()).unwrap();
        let configuration = config.configuration.unwrap();
        assert_eq!(configuration.defaults["color"], "red");
        assert_eq!(configuration.rules.len(), 2);
        assert_eq!(configuration.rules[1].path, "data.COLOR");
        assert!(configuration.schema.is_some());
        assert!(config.localization.is_empty());
    }

    #[test]
    fn test_parse_localization() {
        let yaml = r#"
kind: ConfigData
localization:
  - resource:
      name: web-server
    file: configmap.yaml
    image: spec.template.image
  - resource:
      name: sidecar
      extraIdentity:
        arch: arm64
    file: deploy.yaml
    repository: spec.image.repository
    tag: spec.image.tag
"#;
        let config = ConfigData::from_yaml(yaml.as_bytes()).unwrap();
        assert_eq!(config.localization.len(), 2);
        assert_eq!(
            config.localization[0].image.as_deref(),
            Some("spec.template.image")
        );
        assert!(config.localization[0].tag.is_none());
        assert_eq!(config.localization[1].resource.extra_identity["arch"], "arm64");
    }

    #[test]
    fn test_wrong_kind_rejected() {
        let err = ConfigData::from_yaml(b"kind: Deployment\n").unwrap_err();
        assert!(matches!(err, OcmError::ValidationError(_)));
    }

    #[test]
    fn test_malformed_yaml_keeps_decode_error() {
        let err = ConfigData::from_yaml(b"localization: [").unwrap_err();
        assert!(err.to_string().starts_with("Validation error: Invalid ConfigData"));
    }
}
