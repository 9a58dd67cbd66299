//! Filesystem-backed snapshot cache.
//!
//! Layout:
//!
//! ```text
//! <root>/<name>/blobs/sha256/<hex>             blob content
//! <root>/<name>/blobs/sha256/<hex>.meta.json   size and access times
//! <root>/<name>/tags/<tag>                     digest the tag points to
//! ```

use std::path::{Path, PathBuf};

use a3s_ocm_core::error::{OcmError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use super::{validate_name, BlobReader, Cache};

const COPY_BUFFER_SIZE: usize = 64 * 1024;

/// Metadata for a cached blob.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlobMeta {
    /// Repository name the blob belongs to
    pub name: String,
    /// Blob digest (e.g., "sha256:abc123...")
    pub digest: String,
    pub size_bytes: u64,
    /// When this blob was cached (Unix timestamp)
    pub cached_at: i64,
    /// Last time this blob was read (Unix timestamp)
    pub last_accessed: i64,
}

/// Snapshot cache stored in a local directory.
pub struct DirCache {
    root: PathBuf,
}

impl DirCache {
    /// Create a cache rooted at `root`, creating the directory if needed.
    pub fn new(root: &Path) -> Result<Self> {
        std::fs::create_dir_all(root).map_err(|e| {
            OcmError::CacheError(format!(
                "Failed to create cache directory {}: {}",
                root.display(),
                e
            ))
        })?;
        Ok(Self {
            root: root.to_path_buf(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Evict least-recently-accessed blobs until the total size fits
    /// `max_bytes`. Tags pointing at evicted blobs are removed too.
    ///
    /// Returns the number of blobs evicted.
    pub fn prune(&self, max_bytes: u64) -> Result<usize> {
        let mut entries = self.list_entries()?;
        let total_size: u64 = entries.iter().map(|e| e.size_bytes).sum();
        if total_size <= max_bytes {
            return Ok(0);
        }

        entries.sort_by_key(|e| e.last_accessed);

        let mut current_size = total_size;
        let mut evicted = 0;
        for entry in &entries {
            if current_size <= max_bytes {
                break;
            }
            self.remove_tags_pointing_at(&entry.name, &entry.digest)?;
            self.remove_blob(&entry.name, &entry.digest)?;
            current_size = current_size.saturating_sub(entry.size_bytes);
            evicted += 1;

            tracing::debug!(
                name = %entry.name,
                digest = %entry.digest,
                size_bytes = entry.size_bytes,
                "Evicted cached blob"
            );
        }

        Ok(evicted)
    }

    /// Metadata of every cached blob.
    pub fn list_entries(&self) -> Result<Vec<BlobMeta>> {
        let mut entries = Vec::new();
        for repo in read_dir(&self.root)? {
            let blobs = repo.join("blobs").join("sha256");
            if !blobs.is_dir() {
                continue;
            }
            for path in read_dir(&blobs)? {
                let is_meta = path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.ends_with(".meta.json"));
                if !is_meta {
                    continue;
                }
                if let Ok(content) = std::fs::read_to_string(&path) {
                    if let Ok(meta) = serde_json::from_str::<BlobMeta>(&content) {
                        entries.push(meta);
                    }
                }
            }
        }
        Ok(entries)
    }

    /// Total size of all cached blobs in bytes.
    pub fn total_size(&self) -> Result<u64> {
        Ok(self.list_entries()?.iter().map(|e| e.size_bytes).sum())
    }

    fn repo_dir(&self, name: &str) -> Result<PathBuf> {
        validate_name("name", name)?;
        Ok(self.root.join(name))
    }

    fn tag_path(&self, name: &str, tag: &str) -> Result<PathBuf> {
        validate_name("tag", tag)?;
        Ok(self.repo_dir(name)?.join("tags").join(tag))
    }

    fn blob_path(&self, name: &str, digest: &str) -> Result<PathBuf> {
        let hex = digest
            .strip_prefix("sha256:")
            .filter(|h| !h.is_empty() && h.chars().all(|c| c.is_ascii_hexdigit()))
            .ok_or_else(|| {
                OcmError::ValidationError(format!("Unsupported digest '{}'", digest))
            })?;
        Ok(self.repo_dir(name)?.join("blobs").join("sha256").join(hex))
    }

    fn meta_path(blob: &Path) -> PathBuf {
        let mut name = blob.as_os_str().to_os_string();
        name.push(".meta.json");
        PathBuf::from(name)
    }

    fn read_tag(&self, name: &str, tag: &str) -> Result<Option<String>> {
        let path = self.tag_path(name, tag)?;
        match std::fs::read_to_string(&path) {
            Ok(digest) => Ok(Some(digest.trim().to_string())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(cache_io("read tag", &path, e)),
        }
    }

    fn touch(&self, blob: &Path) {
        let meta_path = Self::meta_path(blob);
        if let Ok(content) = std::fs::read_to_string(&meta_path) {
            if let Ok(mut meta) = serde_json::from_str::<BlobMeta>(&content) {
                meta.last_accessed = chrono::Utc::now().timestamp();
                if let Ok(json) = serde_json::to_string_pretty(&meta) {
                    let _ = std::fs::write(&meta_path, json);
                }
            }
        }
    }

    fn remove_blob(&self, name: &str, digest: &str) -> Result<()> {
        let blob = self.blob_path(name, digest)?;
        for path in [Self::meta_path(&blob), blob] {
            match std::fs::remove_file(&path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(cache_io("remove", &path, e)),
            }
        }
        Ok(())
    }

    fn remove_tags_pointing_at(&self, name: &str, digest: &str) -> Result<()> {
        let tags = self.repo_dir(name)?.join("tags");
        if !tags.is_dir() {
            return Ok(());
        }
        for path in read_dir(&tags)? {
            if std::fs::read_to_string(&path).is_ok_and(|d| d.trim() == digest) {
                std::fs::remove_file(&path).map_err(|e| cache_io("remove tag", &path, e))?;
            }
        }
        Ok(())
    }

    fn is_referenced(&self, name: &str, digest: &str) -> Result<bool> {
        let tags = self.repo_dir(name)?.join("tags");
        if !tags.is_dir() {
            return Ok(false);
        }
        Ok(read_dir(&tags)?
            .iter()
            .any(|p| std::fs::read_to_string(p).is_ok_and(|d| d.trim() == digest)))
    }
}

#[async_trait]
impl Cache for DirCache {
    fn repository_url(&self, name: &str) -> String {
        self.root.join(name).display().to_string()
    }

    async fn is_cached(&self, name: &str, tag: &str) -> Result<bool> {
        match self.read_tag(name, tag)? {
            Some(digest) => Ok(self.blob_path(name, &digest)?.is_file()),
            None => Ok(false),
        }
    }

    async fn push_data(
        &self,
        mut data: BlobReader,
        name: &str,
        tag: &str,
    ) -> Result<(String, u64)> {
        let tag_path = self.tag_path(name, tag)?;
        let blobs = self.repo_dir(name)?.join("blobs").join("sha256");
        tokio::fs::create_dir_all(&blobs)
            .await
            .map_err(|e| cache_io("create", &blobs, e))?;

        // Stream into a temporary file while hashing, then move into place.
        let tmp = tempfile::NamedTempFile::new_in(&blobs)
            .map_err(|e| cache_io("create temp blob in", &blobs, e))?;
        let mut file = tokio::fs::File::create(tmp.path())
            .await
            .map_err(|e| cache_io("open", tmp.path(), e))?;
        let mut hasher = Sha256::new();
        let mut size = 0u64;
        let mut buf = vec![0u8; COPY_BUFFER_SIZE];
        loop {
            let n = data.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
            file.write_all(&buf[..n])
                .await
                .map_err(|e| cache_io("write", tmp.path(), e))?;
            size += n as u64;
        }
        file.flush().await?;
        drop(file);

        let digest = format!("sha256:{}", hex::encode(hasher.finalize()));
        let blob = self.blob_path(name, &digest)?;
        tmp.persist(&blob)
            .map_err(|e| cache_io("persist", &blob, e.error))?;

        let now = chrono::Utc::now().timestamp();
        let meta = BlobMeta {
            name: name.to_string(),
            digest: digest.clone(),
            size_bytes: size,
            cached_at: now,
            last_accessed: now,
        };
        let meta_path = Self::meta_path(&blob);
        std::fs::write(&meta_path, serde_json::to_string_pretty(&meta)?)
            .map_err(|e| cache_io("write metadata", &meta_path, e))?;

        let tags = self.repo_dir(name)?.join("tags");
        std::fs::create_dir_all(&tags).map_err(|e| cache_io("create", &tags, e))?;
        let tag_tmp = tempfile::NamedTempFile::new_in(&tags)
            .map_err(|e| cache_io("create temp tag in", &tags, e))?;
        std::fs::write(tag_tmp.path(), &digest)
            .map_err(|e| cache_io("write tag", tag_tmp.path(), e))?;
        tag_tmp
            .persist(&tag_path)
            .map_err(|e| cache_io("write tag", &tag_path, e.error))?;

        tracing::debug!(
            name = %name,
            tag = %tag,
            digest = %digest,
            size,
            "Cached blob"
        );

        Ok((digest, size))
    }

    async fn fetch_by_digest(&self, name: &str, digest: &str) -> Result<BlobReader> {
        let blob = self.blob_path(name, digest)?;
        let file = match tokio::fs::File::open(&blob).await {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(OcmError::NotFound(format!("cached blob {}@{}", name, digest)));
            }
            Err(e) => return Err(cache_io("open", &blob, e)),
        };
        self.touch(&blob);
        Ok(Box::new(file))
    }

    async fn fetch_by_tag(&self, name: &str, tag: &str) -> Result<BlobReader> {
        let digest = self
            .read_tag(name, tag)?
            .ok_or_else(|| OcmError::NotFound(format!("cached blob {}:{}", name, tag)))?;
        self.fetch_by_digest(name, &digest).await
    }

    async fn delete(&self, name: &str, tag: &str) -> Result<()> {
        let Some(digest) = self.read_tag(name, tag)? else {
            tracing::warn!(name = %name, tag = %tag, "Cache entry already absent");
            return Ok(());
        };

        let tag_path = self.tag_path(name, tag)?;
        match std::fs::remove_file(&tag_path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(cache_io("remove tag", &tag_path, e)),
        }
        if !self.is_referenced(name, &digest)? {
            self.remove_blob(name, &digest)?;
        }

        tracing::debug!(name = %name, tag = %tag, digest = %digest, "Deleted cache entry");
        Ok(())
    }
}

fn read_dir(path: &Path) -> Result<Vec<PathBuf>> {
    let mut paths = Vec::new();
    for entry in std::fs::read_dir(path).map_err(|e| cache_io("read", path, e))? {
        let entry = entry
            .map_err(|e| OcmError::CacheError(format!("Failed to read directory entry: {}", e)))?;
        paths.push(entry.path());
    }
    Ok(paths)
}

fn cache_io(action: &str, path: &Path, e: std::io::Error) -> OcmError {
    OcmError::CacheError(format!("Failed to {} {}: {}", action, path.display(), e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn push(cache: &DirCache, name: &str, tag: &str, data: &'static [u8]) -> String {
        cache
            .push_data(Box::new(data), name, tag)
            .await
            .unwrap()
            .0
    }

    async fn read_all(reader: BlobReader) -> Vec<u8> {
        let mut reader = reader;
        let mut data = Vec::new();
        reader.read_to_end(&mut data).await.unwrap();
        data
    }

    #[tokio::test]
    async fn test_concurrent_pushes_to_sibling_tags() {
        let tmp = TempDir::new().unwrap();
        let cache = DirCache::new(tmp.path()).unwrap();

        let (first, second) = tokio::join!(
            push(&cache, "sha-1", "1.0.0", b"first release"),
            push(&cache, "sha-1", "1.0.1", b"second release"),
        );
        assert_ne!(first, second);
        assert_eq!(
            read_all(cache.fetch_by_tag("sha-1", "1.0.0").await.unwrap()).await,
            b"first release"
        );
        assert_eq!(
            read_all(cache.fetch_by_tag("sha-1", "1.0.1").await.unwrap()).await,
            b"second release"
        );

        let mut tags: Vec<String> = std::fs::read_dir(tmp.path().join("sha-1").join("tags"))
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        tags.sort();
        assert_eq!(tags, ["1.0.0", "1.0.1"]);
    }

    #[test]
    fn test_new_creates_directory() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("cache");
        assert!(!root.exists());
        DirCache::new(&root).unwrap();
        assert!(root.is_dir());
    }

    #[tokio::test]
    async fn test_push_returns_content_digest() {
        let tmp = TempDir::new().unwrap();
        let cache = DirCache::new(tmp.path()).unwrap();

        let (digest, size) = cache
            .push_data(Box::new(&b"hello"[..]), "sha-1", "v1")
            .await
            .unwrap();
        assert_eq!(
            digest,
            format!("sha256:{}", hex::encode(Sha256::digest(b"hello")))
        );
        assert_eq!(size, 5);
        assert!(cache.is_cached("sha-1", "v1").await.unwrap());
        assert!(!cache.is_cached("sha-1", "v2").await.unwrap());
    }

    #[tokio::test]
    async fn test_fetch_by_tag_and_digest() {
        let tmp = TempDir::new().unwrap();
        let cache = DirCache::new(tmp.path()).unwrap();
        let digest = push(&cache, "sha-1", "v1", b"content").await;

        let by_tag = read_all(cache.fetch_by_tag("sha-1", "v1").await.unwrap()).await;
        let by_digest = read_all(cache.fetch_by_digest("sha-1", &digest).await.unwrap()).await;
        assert_eq!(by_tag, b"content");
        assert_eq!(by_digest, b"content");
    }

    #[tokio::test]
    async fn test_fetch_missing_is_not_found() {
        let tmp = TempDir::new().unwrap();
        let cache = DirCache::new(tmp.path()).unwrap();
        assert!(matches!(
            cache.fetch_by_tag("sha-1", "v1").await,
            Err(OcmError::NotFound(_))
        ));
        assert!(matches!(
            cache
                .fetch_by_digest("sha-1", &format!("sha256:{}", "0".repeat(64)))
                .await,
            Err(OcmError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_push_overwrites_tag() {
        let tmp = TempDir::new().unwrap();
        let cache = DirCache::new(tmp.path()).unwrap();
        push(&cache, "sha-1", "v1", b"first").await;
        push(&cache, "sha-1", "v1", b"second").await;

        let data = read_all(cache.fetch_by_tag("sha-1", "v1").await.unwrap()).await;
        assert_eq!(data, b"second");
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let tmp = TempDir::new().unwrap();
        let cache = DirCache::new(tmp.path()).unwrap();
        let digest = push(&cache, "sha-1", "v1", b"data").await;

        cache.delete("sha-1", "v1").await.unwrap();
        cache.delete("sha-1", "v1").await.unwrap();
        cache.delete("sha-never", "v1").await.unwrap();

        assert!(!cache.is_cached("sha-1", "v1").await.unwrap());
        assert!(cache.fetch_by_digest("sha-1", &digest).await.is_err());
    }

    #[tokio::test]
    async fn test_delete_keeps_blob_shared_by_other_tag() {
        let tmp = TempDir::new().unwrap();
        let cache = DirCache::new(tmp.path()).unwrap();
        let digest = push(&cache, "sha-1", "v1", b"shared").await;
        push(&cache, "sha-1", "latest", b"shared").await;

        cache.delete("sha-1", "v1").await.unwrap();
        assert!(cache.is_cached("sha-1", "latest").await.unwrap());
        assert!(cache.fetch_by_digest("sha-1", &digest).await.is_ok());
    }

    #[tokio::test]
    async fn test_rejects_path_escape() {
        let tmp = TempDir::new().unwrap();
        let cache = DirCache::new(tmp.path()).unwrap();
        let result = cache.push_data(Box::new(&b"x"[..]), "../evil", "v1").await;
        assert!(matches!(result, Err(OcmError::ValidationError(_))));
    }

    #[tokio::test]
    async fn test_list_entries_and_total_size() {
        let tmp = TempDir::new().unwrap();
        let cache = DirCache::new(tmp.path()).unwrap();
        assert_eq!(cache.total_size().unwrap(), 0);

        push(&cache, "sha-1", "v1", b"aaa").await;
        push(&cache, "sha-2", "v1", b"bbbb").await;

        let entries = cache.list_entries().unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(cache.total_size().unwrap(), 7);
    }

    #[tokio::test]
    async fn test_prune_under_limit() {
        let tmp = TempDir::new().unwrap();
        let cache = DirCache::new(tmp.path()).unwrap();
        push(&cache, "sha-1", "v1", b"tiny").await;

        assert_eq!(cache.prune(1024).unwrap(), 0);
        assert!(cache.is_cached("sha-1", "v1").await.unwrap());
    }

    #[tokio::test]
    async fn test_prune_evicts_least_recently_accessed() {
        let tmp = TempDir::new().unwrap();
        let cache = DirCache::new(tmp.path()).unwrap();
        push(&cache, "sha-old", "v1", b"0123456789").await;
        push(&cache, "sha-new", "v1", b"0123456789").await;

        // Make the first entry look stale.
        let old = cache.list_entries().unwrap().into_iter().find(|e| e.name == "sha-old").unwrap();
        let blob = cache.blob_path("sha-old", &old.digest).unwrap();
        let mut meta = old.clone();
        meta.last_accessed = 0;
        std::fs::write(
            DirCache::meta_path(&blob),
            serde_json::to_string(&meta).unwrap(),
        )
        .unwrap();

        assert_eq!(cache.prune(10).unwrap(), 1);
        assert!(!cache.is_cached("sha-old", "v1").await.unwrap());
        assert!(cache.is_cached("sha-new", "v1").await.unwrap());
    }

    #[tokio::test]
    async fn test_prune_zero_limit_evicts_everything() {
        let tmp = TempDir::new().unwrap();
        let cache = DirCache::new(tmp.path()).unwrap();
        push(&cache, "sha-1", "v1", b"a").await;
        push(&cache, "sha-2", "v1", b"b").await;

        assert_eq!(cache.prune(0).unwrap(), 2);
        assert!(cache.list_entries().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_list_entries_skips_invalid_metadata() {
        let tmp = TempDir::new().unwrap();
        let cache = DirCache::new(tmp.path()).unwrap();
        push(&cache, "sha-1", "v1", b"data").await;
        std::fs::write(
            tmp.path().join("sha-1/blobs/sha256/bogus.meta.json"),
            "not json",
        )
        .unwrap();

        assert_eq!(cache.list_entries().unwrap().len(), 1);
    }
}
