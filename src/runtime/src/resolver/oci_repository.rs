//! Component repository in an OCI registry (OCM OCI layout).
//!
//! `name@version` lives at `<url>/component-descriptors/<name>:<tag>`. The
//! manifest config names the descriptor layer, a tar holding
//! `component-descriptor.yaml`. Local blobs are further layers of the same
//! manifest, addressed by digest.

use std::io::Read;
use std::sync::Arc;

use a3s_ocm_core::error::{OcmError, Result};
use a3s_ocm_core::identity::{tag_to_version, version_to_tag};
use a3s_ocm_core::ComponentDescriptor;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::dir_repository::DESCRIPTOR_FILE;
use super::repository::{ComponentRepository, LocalBlob};
use crate::oci::{ArtifactBlob, ImageReference, RegistryClient};

pub const COMPONENT_CONFIG_MEDIA_TYPE: &str =
    "application/vnd.ocm.software.component.config.v1+json";
pub const DESCRIPTOR_TAR_MEDIA_TYPE: &str =
    "application/vnd.ocm.software.component-descriptor.v2+yaml+tar";
pub const DESCRIPTOR_YAML_MEDIA_TYPE: &str =
    "application/vnd.ocm.software.component-descriptor.v2+yaml";

const COMPONENT_PREFIX: &str = "component-descriptors";

/// Manifest config of a component version.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ComponentConfig {
    component_descriptor_layer: LayerRef,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LayerRef {
    media_type: String,
    digest: String,
    size: u64,
}

/// OCI-registry-backed component repository.
pub struct OciComponentRepository {
    url: String,
    client: Arc<RegistryClient>,
}

impl OciComponentRepository {
    /// `url` is `host[:port][/path]` without scheme.
    pub fn new(url: &str, client: Arc<RegistryClient>) -> Result<Self> {
        let url = url.trim_end_matches('/');
        if url.is_empty() || url.contains("://") {
            return Err(OcmError::ConfigError(format!(
                "Repository URL must be host[/path] without scheme: '{}'",
                url
            )));
        }
        Ok(Self {
            url: url.to_string(),
            client,
        })
    }

    fn reference(&self, name: &str, version: Option<&str>) -> Result<ImageReference> {
        let tag = version.map(version_to_tag);
        ImageReference::in_repository(
            &self.url,
            &format!("{}/{}", COMPONENT_PREFIX, name),
            tag.as_deref(),
        )
    }
}

#[async_trait]
impl ComponentRepository for OciComponentRepository {
    fn url(&self) -> &str {
        &self.url
    }

    async fn descriptor(&self, name: &str, version: &str) -> Result<ComponentDescriptor> {
        let reference = self.reference(name, Some(version))?;
        let (manifest, _) = self.client.pull_manifest(&reference).await?;

        let config_data = self.client.pull_blob(&reference, &manifest.config.digest).await?;
        let layer_digest = match serde_json::from_slice::<ComponentConfig>(&config_data) {
            Ok(config) => config.component_descriptor_layer.digest,
            Err(_) => manifest
                .layers
                .iter()
                .find(|l| {
                    l.media_type == DESCRIPTOR_TAR_MEDIA_TYPE
                        || l.media_type == DESCRIPTOR_YAML_MEDIA_TYPE
                })
                .map(|l| l.digest.clone())
                .ok_or_else(|| {
                    OcmError::ValidationError(format!(
                        "{} carries no component descriptor layer",
                        reference
                    ))
                })?,
        };

        let layer = self.client.pull_blob(&reference, &layer_digest).await?;
        let yaml = if looks_like_tar(&layer) {
            descriptor_from_tar(&layer)?
        } else {
            layer
        };

        let descriptor = ComponentDescriptor::from_yaml(&yaml)?;
        tracing::debug!(
            component = %name,
            version = %version,
            reference = %reference,
            "Fetched component descriptor"
        );
        Ok(descriptor)
    }

    async fn list_versions(&self, name: &str) -> Result<Vec<String>> {
        let reference = self.reference(name, None)?;
        let tags = self.client.list_tags(&reference).await?;
        Ok(tags.iter().map(|t| tag_to_version(t)).collect())
    }

    async fn local_blob(&self, name: &str, version: &str, local_reference: &str) -> Result<Vec<u8>> {
        let reference = self.reference(name, Some(version))?;
        self.client.pull_blob(&reference, local_reference).await
    }

    async fn put(&self, descriptor: &ComponentDescriptor, blobs: Vec<LocalBlob>) -> Result<()> {
        let reference = self.reference(descriptor.name(), Some(descriptor.version()))?;

        let layer = descriptor_tar(&descriptor.to_yaml()?)?;
        let config = ComponentConfig {
            component_descriptor_layer: LayerRef {
                media_type: DESCRIPTOR_TAR_MEDIA_TYPE.to_string(),
                digest: format!("sha256:{}", hex::encode(Sha256::digest(&layer))),
                size: layer.len() as u64,
            },
        };

        let mut layers = vec![ArtifactBlob::new(layer, DESCRIPTOR_TAR_MEDIA_TYPE)];
        layers.extend(
            blobs
                .into_iter()
                .map(|b| ArtifactBlob::new(b.data, b.media_type)),
        );

        self.client
            .push_artifact(
                &reference,
                ArtifactBlob::new(serde_json::to_vec(&config)?, COMPONENT_CONFIG_MEDIA_TYPE),
                layers,
            )
            .await?;

        tracing::debug!(
            component = %descriptor.name(),
            version = %descriptor.version(),
            reference = %reference,
            "Pushed component version"
        );
        Ok(())
    }
}

/// Tar headers carry `ustar` at offset 257.
fn looks_like_tar(data: &[u8]) -> bool {
    data.len() >= 262 && &data[257..262] == b"ustar"
}

fn descriptor_from_tar(data: &[u8]) -> Result<Vec<u8>> {
    let mut archive = tar::Archive::new(data);
    for entry in archive.entries()? {
        let mut entry = entry?;
        let is_descriptor = entry
            .path()?
            .file_name()
            .is_some_and(|n| n == DESCRIPTOR_FILE);
        if is_descriptor {
            let mut yaml = Vec::new();
            entry.read_to_end(&mut yaml)?;
            return Ok(yaml);
        }
    }
    Err(OcmError::ValidationError(format!(
        "Descriptor layer has no {}",
        DESCRIPTOR_FILE
    )))
}

fn descriptor_tar(yaml: &[u8]) -> Result<Vec<u8>> {
    let mut builder = tar::Builder::new(Vec::new());
    let mut header = tar::Header::new_gnu();
    header.set_size(yaml.len() as u64);
    header.set_mode(0o644);
    header.set_mtime(0);
    header.set_cksum();
    builder.append_data(&mut header, DESCRIPTOR_FILE, yaml)?;
    Ok(builder.into_inner()?)
}
