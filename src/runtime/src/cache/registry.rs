//! OCI-registry-backed snapshot cache.
//!
//! Every blob is pushed as the single layer of an artifact at
//! `<url>/<name>:<tag>`; the blob digest is the layer digest.

use std::sync::Arc;

use a3s_ocm_core::error::{OcmError, Result};
use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};

use super::{validate_name, BlobReader, Cache};
use crate::oci::{ArtifactBlob, ImageReference, RegistryClient};

/// Media type of the snapshot layer.
pub const SNAPSHOT_LAYER_MEDIA_TYPE: &str = "application/vnd.a3s.ocm.snapshot.layer.v1.tar+gzip";

/// Media type of the (empty) snapshot config blob.
pub const SNAPSHOT_CONFIG_MEDIA_TYPE: &str = "application/vnd.a3s.ocm.snapshot.config.v1+json";

/// Snapshot cache stored in an OCI registry.
pub struct RegistryCache {
    url: String,
    client: Arc<RegistryClient>,
}

impl RegistryCache {
    /// `url` is `host[:port][/path]` without a scheme.
    pub fn new(url: impl Into<String>, client: Arc<RegistryClient>) -> Result<Self> {
        let url = url.into().trim_end_matches('/').to_string();
        if url.is_empty() || url.contains("://") {
            return Err(OcmError::ConfigError(format!(
                "Cache URL must be host[/path] without scheme: '{}'",
                url
            )));
        }
        Ok(Self { url, client })
    }

    fn reference(&self, name: &str, tag: &str) -> Result<ImageReference> {
        validate_name("name", name)?;
        validate_name("tag", tag)?;
        ImageReference::in_repository(&self.url, name, Some(tag))
    }
}

#[async_trait]
impl Cache for RegistryCache {
    fn repository_url(&self, name: &str) -> String {
        format!("{}/{}", self.url, name)
    }

    async fn is_cached(&self, name: &str, tag: &str) -> Result<bool> {
        let reference = self.reference(name, tag)?;
        match self.client.manifest_digest(&reference).await {
            Ok(digest) => Ok(digest.is_some()),
            Err(e) => Err(to_cache_error(e)),
        }
    }

    async fn push_data(
        &self,
        mut data: BlobReader,
        name: &str,
        tag: &str,
    ) -> Result<(String, u64)> {
        let reference = self.reference(name, tag)?;

        // The distribution client uploads layers from memory.
        let mut bytes = Vec::new();
        data.read_to_end(&mut bytes).await?;
        let size = bytes.len() as u64;

        let pushed = self
            .client
            .push_artifact(
                &reference,
                ArtifactBlob::new(b"{}".to_vec(), SNAPSHOT_CONFIG_MEDIA_TYPE),
                vec![ArtifactBlob::new(bytes, SNAPSHOT_LAYER_MEDIA_TYPE)],
            )
            .await
            .map_err(to_cache_error)?;
        let digest = pushed.layer_digests.into_iter().next().ok_or_else(|| {
            OcmError::Invariant("push returned no layer digest".to_string())
        })?;

        tracing::debug!(
            reference = %reference,
            digest = %digest,
            size,
            manifest = %pushed.manifest_url,
            "Pushed snapshot blob"
        );

        Ok((digest, size))
    }

    async fn fetch_by_digest(&self, name: &str, digest: &str) -> Result<BlobReader> {
        validate_name("name", name)?;
        let reference = ImageReference::in_repository(&self.url, name, None)?.with_digest(digest);

        // Spool to an anonymous file so large blobs never sit in memory.
        let spool = tempfile::tempfile()
            .map_err(|e| OcmError::CacheError(format!("Failed to create spool file: {}", e)))?;
        let mut file = tokio::fs::File::from_std(spool);
        self.client
            .pull_blob_to(&reference, digest, &mut file)
            .await
            .map_err(to_cache_error)?;
        file.flush().await?;
        file.seek(std::io::SeekFrom::Start(0)).await?;
        Ok(Box::new(file))
    }

    async fn fetch_by_tag(&self, name: &str, tag: &str) -> Result<BlobReader> {
        let reference = self.reference(name, tag)?;
        let (manifest, _) = self
            .client
            .pull_manifest(&reference)
            .await
            .map_err(to_cache_error)?;
        let layer = manifest.layers.first().ok_or_else(|| {
            OcmError::CacheError(format!("Snapshot {} has no layers", reference))
        })?;
        self.fetch_by_digest(name, &layer.digest).await
    }

    async fn delete(&self, name: &str, tag: &str) -> Result<()> {
        let reference = self.reference(name, tag)?;
        match self.client.delete_manifest(&reference).await {
            Ok(true) => {
                tracing::debug!(reference = %reference, "Deleted snapshot manifest");
                Ok(())
            }
            Ok(false) | Err(OcmError::NotFound(_)) => {
                tracing::warn!(reference = %reference, "Snapshot already absent");
                Ok(())
            }
            Err(e) => Err(to_cache_error(e)),
        }
    }
}

/// Keep cache misses distinguishable; everything else is a cache failure.
fn to_cache_error(err: OcmError) -> OcmError {
    match err {
        OcmError::NotFound(_) | OcmError::ValidationError(_) | OcmError::CacheError(_) => err,
        other => OcmError::CacheError(other.to_string()),
    }
}
