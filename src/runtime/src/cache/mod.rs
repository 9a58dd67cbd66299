//! Content-addressable snapshot cache.
//!
//! Blobs are stored under a repository named after the owning [`Identity`]
//! (`sha-<hash>`) and tagged following the snapshot tag policy. Two backends
//! exist:
//! - [`RegistryCache`]: an OCI registry, one gzip-tar layer per blob
//! - [`DirCache`]: a local directory, with LRU pruning

pub mod dir;
pub mod registry;

use a3s_ocm_core::error::Result;
use a3s_ocm_core::{Identity, Snapshot};
use async_trait::async_trait;
use tokio::io::AsyncRead;

pub use dir::{BlobMeta, DirCache};
pub use registry::RegistryCache;

/// Streaming reader over a cached blob.
pub type BlobReader = Box<dyn AsyncRead + Send + Unpin>;

/// Tag used when an identity carries no version.
pub const FALLBACK_TAG: &str = "latest";

/// Blob store addressed by `(name, tag)` or `(name, digest)`.
///
/// Implementations must be safe to call concurrently for different names.
/// Concurrent pushes to the same `(name, tag)` are last-write-wins.
#[async_trait]
pub trait Cache: Send + Sync {
    /// Deterministic repository name for an identity.
    fn name_for(&self, identity: &Identity) -> String {
        identity.cache_name()
    }

    /// Location of the repository holding `name`.
    fn repository_url(&self, name: &str) -> String;

    /// Whether `name:tag` exists.
    async fn is_cached(&self, name: &str, tag: &str) -> Result<bool>;

    /// Store a blob under `name:tag`, returning its digest and size.
    async fn push_data(&self, data: BlobReader, name: &str, tag: &str) -> Result<(String, u64)>;

    async fn fetch_by_digest(&self, name: &str, digest: &str) -> Result<BlobReader>;

    async fn fetch_by_tag(&self, name: &str, tag: &str) -> Result<BlobReader>;

    /// Remove `name:tag`. Deleting an absent entry succeeds.
    async fn delete(&self, name: &str, tag: &str) -> Result<()>;
}

/// Push a blob for `identity` and describe it as a [`Snapshot`].
pub async fn write_snapshot(
    cache: &dyn Cache,
    identity: &Identity,
    data: BlobReader,
    fallback_tag: &str,
) -> Result<Snapshot> {
    let name = cache.name_for(identity);
    let tag = identity.snapshot_tag(fallback_tag);
    let (digest, size) = cache.push_data(data, &name, &tag).await?;

    tracing::info!(
        identity = %identity,
        name = %name,
        tag = %tag,
        digest = %digest,
        size,
        "Wrote snapshot"
    );

    Ok(Snapshot {
        identity: identity.clone(),
        digest,
        tag,
        repository_url: cache.repository_url(&name),
        size,
        created_at: chrono::Utc::now(),
    })
}

/// Stream the blob a snapshot points to.
pub async fn read_snapshot(cache: &dyn Cache, snapshot: &Snapshot) -> Result<BlobReader> {
    cache
        .fetch_by_digest(&snapshot.cache_name(), &snapshot.digest)
        .await
}

/// Garbage-collect a snapshot. Safe to repeat.
pub async fn delete_snapshot(cache: &dyn Cache, snapshot: &Snapshot) -> Result<()> {
    cache.delete(&snapshot.cache_name(), &snapshot.tag).await
}

/// Reject names that would escape a cache root or repository.
pub(crate) fn validate_name(kind: &str, value: &str) -> Result<()> {
    let valid = !value.is_empty()
        && value != "."
        && value != ".."
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if valid {
        Ok(())
    } else {
        Err(a3s_ocm_core::OcmError::ValidationError(format!(
            "Invalid cache {} '{}'",
            kind, value
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use tokio::io::AsyncReadExt;

    #[tokio::test]
    async fn test_write_and_delete_snapshot() {
        let tmp = TempDir::new().unwrap();
        let cache = DirCache::new(tmp.path()).unwrap();
        let identity = Identity::for_resource("acme.org/web", "1.0.0", "manifests", "2.0.0");

        let snapshot = write_snapshot(&cache, &identity, Box::new(&b"payload"[..]), FALLBACK_TAG)
            .await
            .unwrap();
        assert_eq!(snapshot.tag, "2.0.0");
        assert_eq!(snapshot.size, 7);
        assert!(snapshot.digest.starts_with("sha256:"));
        assert!(snapshot.repository_url.ends_with(&identity.cache_name()));

        let mut data = Vec::new();
        read_snapshot(&cache, &snapshot)
            .await
            .unwrap()
            .read_to_end(&mut data)
            .await
            .unwrap();
        assert_eq!(data, b"payload");

        delete_snapshot(&cache, &snapshot).await.unwrap();
        delete_snapshot(&cache, &snapshot).await.unwrap();
        assert!(!cache.is_cached(&snapshot.cache_name(), "2.0.0").await.unwrap());
    }

    #[tokio::test]
    async fn test_write_snapshot_with_build_metadata() {
        let tmp = TempDir::new().unwrap();
        let cache = DirCache::new(tmp.path()).unwrap();
        let identity = Identity::for_resource("acme.org/web", "1.0.0", "manifests", "1.0.0+build.1");

        let snapshot = write_snapshot(&cache, &identity, Box::new(&b"payload"[..]), FALLBACK_TAG)
            .await
            .unwrap();
        assert_eq!(snapshot.tag, "1.0.0.build-build.1");
        assert!(cache
            .is_cached(&snapshot.cache_name(), "1.0.0.build-build.1")
            .await
            .unwrap());
    }

    #[test]
    fn test_validate_name() {
        assert!(validate_name("name", "sha-abc").is_ok());
        assert!(validate_name("tag", "1.0.0-rc.1").is_ok());
        assert!(validate_name("name", "..").is_err());
        assert!(validate_name("name", "a/b").is_err());
        assert!(validate_name("tag", "").is_err());
    }
}
