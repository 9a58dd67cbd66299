//! Resolve access specifications to pull references.

use a3s_ocm_core::access::AccessSpec;
use a3s_ocm_core::error::{OcmError, Result};

/// Pull reference (`registry/repo:tag@digest`) for an access specification.
///
/// `localBlob` has no pull location of its own and resolves through its
/// global access when one is declared.
pub fn resolve_access(access: &AccessSpec) -> Result<String> {
    match access {
        AccessSpec::OciArtifact(artifact) => {
            if artifact.image_reference.trim().is_empty() {
                return Err(OcmError::ValidationError(
                    "ociArtifact access without imageReference".to_string(),
                ));
            }
            Ok(artifact.image_reference.clone())
        }
        AccessSpec::OciBlob(blob) => {
            if blob.reference.is_empty() || blob.digest.is_empty() {
                return Err(OcmError::ValidationError(
                    "ociBlob access requires ref and digest".to_string(),
                ));
            }
            Ok(format!("{}@{}", blob.reference, blob.digest))
        }
        AccessSpec::LocalBlob(local) => match &local.global_access {
            Some(global) => resolve_access(global),
            None => Err(OcmError::UnsupportedAccess(format!(
                "localBlob {} has no global access to pull from",
                local.local_reference
            ))),
        },
        AccessSpec::Unsupported { kind, .. } => Err(OcmError::UnsupportedAccess(kind.clone())),
    }
}
