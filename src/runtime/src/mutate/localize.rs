//! Localization mode: rewrite image coordinates from resource access.

use a3s_ocm_core::error::{OcmError, Result};
use a3s_ocm_core::{LocalizationRule, ResourceSelector, Substitution};

use crate::oci::{ImageReference, PullReference};

/// Compute the substitutions for `rules`.
///
/// `pull_reference` resolves a rule's resource selector to the pull
/// reference of that resource. Each rule emits one substitution per field
/// it names.
pub fn substitutions<F>(rules: &[LocalizationRule], mut pull_reference: F) -> Result<Vec<Substitution>>
where
    F: FnMut(&ResourceSelector) -> Result<String>,
{
    let mut out = Vec::new();
    for rule in rules {
        let reference = pull_reference(&rule.resource)?;
        let split = PullReference::split(&reference)?;

        if let Some(path) = &rule.registry {
            let registry = ImageReference::parse(&reference)?.registry;
            out.push(Substitution::new(&rule.file, path, registry));
        }
        if let Some(path) = &rule.repository {
            out.push(Substitution::new(&rule.file, path, split.name.clone()));
        }
        if let Some(path) = &rule.image {
            out.push(Substitution::new(&rule.file, path, reference.clone()));
        }
        if let Some(path) = &rule.tag {
            let version = split.version().ok_or_else(|| {
                OcmError::ValidationError(format!(
                    "Resource '{}' reference '{}' has no tag or digest",
                    rule.resource.name, reference
                ))
            })?;
            out.push(Substitution::new(&rule.file, path, version));
        }

        tracing::debug!(
            resource = %rule.resource.name,
            reference = %reference,
            file = %rule.file,
            "Localized resource"
        );
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(name: &str) -> LocalizationRule {
        LocalizationRule {
            resource: ResourceSelector::named(name),
            file: "configmap.yaml".to_string(),
            ..Default::default()
        }
    }

    fn lookup(selector: &ResourceSelector) -> Result<String> {
        match selector.name.as_str() {
            "web-server" => Ok("nginx:1.23-3-alpine".to_string()),
            "api" => Ok("localhost:5000/acme/api@sha256:abcd".to_string()),
            other => Err(OcmError::NotFound(other.to_string())),
        }
    }

    #[test]
    fn test_image_only() {
        let mut rule = rule("web-server");
        rule.image = Some("spec.template.image".to_string());
        let subs = substitutions(&[rule], lookup).unwrap();
        assert_eq!(
            subs,
            vec![Substitution::new(
                "configmap.yaml",
                "spec.template.image",
                "nginx:1.23-3-alpine"
            )]
        );
    }

    #[test]
    fn test_all_fields() {
        let mut rule = rule("web-server");
        rule.registry = Some("image.registry".to_string());
        rule.repository = Some("image.repository".to_string());
        rule.tag = Some("image.tag".to_string());
        let subs = substitutions(&[rule], lookup).unwrap();
        let values: Vec<String> = subs
            .iter()
            .map(|s| s.value.as_str().unwrap().to_string())
            .collect();
        assert_eq!(values, vec!["docker.io", "nginx", "1.23-3-alpine"]);
    }

    #[test]
    fn test_digest_as_tag() {
        let mut rule = rule("api");
        rule.repository = Some("repo".to_string());
        rule.tag = Some("tag".to_string());
        let subs = substitutions(&[rule], lookup).unwrap();
        assert_eq!(subs[0].value, "localhost:5000/acme/api");
        assert_eq!(subs[1].value, "sha256:abcd");
    }

    #[test]
    fn test_no_fields_no_substitutions() {
        assert!(substitutions(&[rule("web-server")], lookup).unwrap().is_empty());
    }

    #[test]
    fn test_missing_resource() {
        let err = substitutions(&[rule("nope")], lookup).unwrap_err();
        assert!(matches!(err, OcmError::NotFound(_)));
    }
}
