//! OCI reference parsing.
//!
//! Two views of a reference string are provided:
//! - [`PullReference`] is a purely textual split into name, tag and digest,
//!   used when rewriting image coordinates so the output matches the input.
//! - [`ImageReference`] additionally resolves the registry host and applies
//!   Docker Hub defaults, used when talking to a registry.

use std::fmt;

use a3s_ocm_core::error::{OcmError, Result};

/// Default registry when none is specified.
const DEFAULT_REGISTRY: &str = "docker.io";

/// Default tag when none is specified.
const DEFAULT_TAG: &str = "latest";

/// Textual `name[:tag][@digest]` split without defaults.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PullReference {
    /// Everything before tag and digest (e.g., "ghcr.io/acme/web", "nginx")
    pub name: String,
    pub tag: Option<String>,
    pub digest: Option<String>,
}

impl PullReference {
    /// Split a reference string.
    ///
    /// A colon only starts a tag when it follows the last `/`, so registry
    /// ports (`localhost:5000/app`) are kept in the name.
    pub fn split(reference: &str) -> Result<Self> {
        let reference = reference.trim();
        if reference.is_empty() {
            return Err(OcmError::ValidationError("Empty image reference".to_string()));
        }

        let (name_tag, digest) = match reference.rsplit_once('@') {
            Some((head, digest)) => {
                if !digest.contains(':') {
                    return Err(OcmError::ValidationError(format!(
                        "Invalid digest format in reference '{}': expected algorithm:hex",
                        reference
                    )));
                }
                (head, Some(digest.to_string()))
            }
            None => (reference, None),
        };

        let last_segment_start = name_tag.rfind('/').map(|i| i + 1).unwrap_or(0);
        let (name, tag) = match name_tag[last_segment_start..].rfind(':') {
            // A registry port is always followed by a repository, so a
            // colon in the last segment starts a tag, digits or not.
            Some(colon) => {
                let split_at = last_segment_start + colon;
                (
                    name_tag[..split_at].to_string(),
                    Some(name_tag[split_at + 1..].to_string()),
                )
            }
            None => (name_tag.to_string(), None),
        };

        if name.is_empty() {
            return Err(OcmError::ValidationError(format!(
                "Empty repository in reference '{}'",
                reference
            )));
        }
        if matches!(tag.as_deref(), Some("")) {
            return Err(OcmError::ValidationError(format!(
                "Empty tag in reference '{}'",
                reference
            )));
        }

        Ok(Self { name, tag, digest })
    }

    /// Tag if present, otherwise the digest.
    pub fn version(&self) -> Option<&str> {
        self.tag.as_deref().or(self.digest.as_deref())
    }
}

impl fmt::Display for PullReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)?;
        if let Some(tag) = &self.tag {
            write!(f, ":{}", tag)?;
        }
        if let Some(digest) = &self.digest {
            write!(f, "@{}", digest)?;
        }
        Ok(())
    }
}

/// Parsed OCI image reference with registry resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageReference {
    /// Registry hostname (e.g., "ghcr.io", "localhost:5000")
    pub registry: String,
    /// Repository path (e.g., "library/nginx", "acme/component-descriptors/acme.org/web")
    pub repository: String,
    pub tag: Option<String>,
    pub digest: Option<String>,
}

impl ImageReference {
    /// Parse an image reference string.
    ///
    /// Supports formats:
    /// - `nginx` → docker.io/library/nginx:latest
    /// - `ghcr.io/org/image:tag` → ghcr.io/org/image:tag
    /// - `localhost:5000/sha-abc@sha256:...` → digest only, no default tag
    pub fn parse(reference: &str) -> Result<Self> {
        let split = PullReference::split(reference)?;
        let (registry, repository) = split_registry_repository(&split.name)?;

        let tag = match (&split.tag, &split.digest) {
            (None, None) => Some(DEFAULT_TAG.to_string()),
            (tag, _) => tag.clone(),
        };

        Ok(Self {
            registry,
            repository,
            tag,
            digest: split.digest,
        })
    }

    /// Build a reference for `repository` under a `registry[/prefix]` base URL.
    pub fn in_repository(base_url: &str, repository: &str, tag: Option<&str>) -> Result<Self> {
        let base = base_url.trim_end_matches('/');
        let full = format!("{}/{}", base, repository.trim_start_matches('/'));
        let (registry, repository) = split_registry_repository(&full)?;
        Ok(Self {
            registry,
            repository,
            tag: tag.map(str::to_string),
            digest: None,
        })
    }

    /// Same repository, addressed by digest.
    pub fn with_digest(&self, digest: &str) -> Self {
        Self {
            registry: self.registry.clone(),
            repository: self.repository.clone(),
            tag: None,
            digest: Some(digest.to_string()),
        }
    }

    /// `registry/repository` without tag or digest.
    pub fn repository_url(&self) -> String {
        format!("{}/{}", self.registry, self.repository)
    }

    /// Get the full reference string.
    pub fn full_reference(&self) -> String {
        let mut s = self.repository_url();
        if let Some(ref tag) = self.tag {
            s.push(':');
            s.push_str(tag);
        }
        if let Some(ref digest) = self.digest {
            s.push('@');
            s.push_str(digest);
        }
        s
    }
}

impl fmt::Display for ImageReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.full_reference())
    }
}

/// Split a name into registry and repository components.
///
/// The first segment is a registry when it contains a dot or a colon, or is
/// `localhost`.
fn split_registry_repository(name: &str) -> Result<(String, String)> {
    if let Some((first, rest)) = name.split_once('/') {
        if first.contains('.') || first.contains(':') || first == "localhost" {
            if rest.is_empty() {
                return Err(OcmError::ValidationError(format!(
                    "Empty repository in reference '{}'",
                    name
                )));
            }
            return Ok((first.to_string(), rest.to_string()));
        }
    }

    let repository = if name.contains('/') {
        name.to_string()
    } else {
        format!("library/{}", name)
    };
    Ok((DEFAULT_REGISTRY.to_string(), repository))
}
