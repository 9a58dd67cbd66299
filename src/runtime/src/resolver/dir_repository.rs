//! Component repository in a local transport directory.
//!
//! ```text
//! <root>/<component name>/<version>/component-descriptor.yaml
//! <root>/blobs/sha256.<hex>
//! ```

use std::path::{Component as PathComponent, Path, PathBuf};

use a3s_ocm_core::error::{OcmError, Result};
use a3s_ocm_core::ComponentDescriptor;
use async_trait::async_trait;

use super::repository::{ComponentRepository, LocalBlob};

pub const DESCRIPTOR_FILE: &str = "component-descriptor.yaml";
const BLOBS_DIR: &str = "blobs";

/// Filesystem-backed component repository.
pub struct DirComponentRepository {
    root: PathBuf,
    url: String,
}

impl DirComponentRepository {
    pub fn new(root: PathBuf) -> Self {
        let url = root.display().to_string();
        Self { root, url }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn component_dir(&self, name: &str) -> Result<PathBuf> {
        let relative = safe_relative("component name", name)?;
        if relative.starts_with(BLOBS_DIR) {
            return Err(OcmError::ValidationError(format!(
                "Component name '{}' collides with the blob directory",
                name
            )));
        }
        Ok(self.root.join(relative))
    }

    fn descriptor_path(&self, name: &str, version: &str) -> Result<PathBuf> {
        let version = safe_relative("version", version)?;
        if version.components().count() != 1 {
            return Err(OcmError::ValidationError(format!(
                "Invalid version '{}'",
                version.display()
            )));
        }
        Ok(self.component_dir(name)?.join(version).join(DESCRIPTOR_FILE))
    }

    fn blob_path(&self, local_reference: &str) -> Result<PathBuf> {
        let file = local_reference.replace(':', ".");
        if file.is_empty() || file.contains('/') || file.contains('\\') || file.starts_with('.') {
            return Err(OcmError::ValidationError(format!(
                "Invalid local blob reference '{}'",
                local_reference
            )));
        }
        Ok(self.root.join(BLOBS_DIR).join(file))
    }
}

#[async_trait]
impl ComponentRepository for DirComponentRepository {
    fn url(&self) -> &str {
        &self.url
    }

    async fn descriptor(&self, name: &str, version: &str) -> Result<ComponentDescriptor> {
        let path = self.descriptor_path(name, version)?;
        let data = match tokio::fs::read(&path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(OcmError::NotFound(format!(
                    "component {}:{} in {}",
                    name, version, self.url
                )));
            }
            Err(e) => return Err(e.into()),
        };
        ComponentDescriptor::from_yaml(&data)
    }

    async fn list_versions(&self, name: &str) -> Result<Vec<String>> {
        let dir = self.component_dir(name)?;
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(OcmError::NotFound(format!(
                    "component {} in {}",
                    name, self.url
                )));
            }
            Err(e) => return Err(e.into()),
        };

        let mut versions = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if entry.path().join(DESCRIPTOR_FILE).is_file() {
                if let Some(version) = entry.file_name().to_str() {
                    versions.push(version.to_string());
                }
            }
        }
        versions.sort();
        Ok(versions)
    }

    async fn local_blob(&self, name: &str, version: &str, local_reference: &str) -> Result<Vec<u8>> {
        let path = self.blob_path(local_reference)?;
        match tokio::fs::read(&path).await {
            Ok(data) => Ok(data),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(OcmError::NotFound(format!(
                "local blob {} of {}:{}",
                local_reference, name, version
            ))),
            Err(e) => Err(e.into()),
        }
    }

    async fn put(&self, descriptor: &ComponentDescriptor, blobs: Vec<LocalBlob>) -> Result<()> {
        let blob_dir = self.root.join(BLOBS_DIR);
        tokio::fs::create_dir_all(&blob_dir).await?;
        for blob in &blobs {
            let path = self.blob_path(&blob.local_reference)?;
            tokio::fs::write(&path, &blob.data).await?;
        }

        let path = self.descriptor_path(descriptor.name(), descriptor.version())?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = path.with_extension("yaml.tmp");
        tokio::fs::write(&tmp, descriptor.to_yaml()?).await?;
        tokio::fs::rename(&tmp, &path).await?;

        tracing::debug!(
            component = %descriptor.name(),
            version = %descriptor.version(),
            blobs = blobs.len(),
            root = %self.root.display(),
            "Stored component version"
        );
        Ok(())
    }
}

/// Relative path without `..`, root or prefix components.
fn safe_relative(what: &str, value: &str) -> Result<PathBuf> {
    let path = Path::new(value);
    let valid = !value.is_empty()
        && path
            .components()
            .all(|c| matches!(c, PathComponent::Normal(_)));
    if valid {
        Ok(path.to_path_buf())
    } else {
        Err(OcmError::ValidationError(format!(
            "Invalid {} '{}'",
            what, value
        )))
    }
}
