//! Component repository abstraction and artifact fetching.

use std::path::PathBuf;
use std::sync::Arc;

use a3s_ocm_core::access::AccessSpec;
use a3s_ocm_core::error::{OcmError, Result};
use a3s_ocm_core::ComponentDescriptor;
use async_trait::async_trait;

use super::dir_repository::DirComponentRepository;
use super::oci_repository::OciComponentRepository;
use crate::oci::{ImageReference, RegistryClient};

/// Blob stored next to a component descriptor.
#[derive(Debug, Clone)]
pub struct LocalBlob {
    /// Reference the descriptor uses for the blob (its digest)
    pub local_reference: String,
    pub media_type: String,
    pub data: Vec<u8>,
}

/// A store of component versions.
#[async_trait]
pub trait ComponentRepository: Send + Sync {
    /// URL the repository was opened with.
    fn url(&self) -> &str;

    /// Fetch the descriptor of `name@version`.
    ///
    /// A version that does not exist (yet) is `OcmError::NotFound`.
    async fn descriptor(&self, name: &str, version: &str) -> Result<ComponentDescriptor>;

    /// All versions stored for `name`, in no particular order.
    async fn list_versions(&self, name: &str) -> Result<Vec<String>>;

    /// Read a `localBlob` of `name@version`.
    async fn local_blob(&self, name: &str, version: &str, local_reference: &str) -> Result<Vec<u8>>;

    /// Store a descriptor with its local blobs, replacing an existing version.
    async fn put(&self, descriptor: &ComponentDescriptor, blobs: Vec<LocalBlob>) -> Result<()>;

    /// Whether `name@version` exists.
    async fn contains(&self, name: &str, version: &str) -> Result<bool> {
        match self.descriptor(name, version).await {
            Ok(_) => Ok(true),
            Err(OcmError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }
}

/// Opens repositories by URL.
pub trait RepositoryProvider: Send + Sync {
    fn open(&self, url: &str) -> Result<Arc<dyn ComponentRepository>>;
}

/// Opens transport directories for local paths and OCI repositories for
/// everything else.
pub struct DefaultRepositoryProvider {
    client: Arc<RegistryClient>,
}

impl DefaultRepositoryProvider {
    pub fn new(client: Arc<RegistryClient>) -> Self {
        Self { client }
    }
}

impl RepositoryProvider for DefaultRepositoryProvider {
    fn open(&self, url: &str) -> Result<Arc<dyn ComponentRepository>> {
        if is_local_path(url) {
            Ok(Arc::new(DirComponentRepository::new(PathBuf::from(url))))
        } else {
            Ok(Arc::new(OciComponentRepository::new(
                url,
                self.client.clone(),
            )?))
        }
    }
}

pub(crate) fn is_local_path(url: &str) -> bool {
    url.starts_with('/') || url.starts_with("./") || url.starts_with("../")
}

/// Reads resource payloads that live outside a component repository.
#[async_trait]
pub trait ArtifactFetcher: Send + Sync {
    async fn fetch_artifact(&self, access: &AccessSpec) -> Result<Vec<u8>>;
}

#[async_trait]
impl ArtifactFetcher for RegistryClient {
    async fn fetch_artifact(&self, access: &AccessSpec) -> Result<Vec<u8>> {
        match access {
            AccessSpec::OciArtifact(artifact) => {
                let reference = ImageReference::parse(&artifact.image_reference)?;
                tracing::debug!(reference = %reference, "Fetching artifact");
                self.pull_first_layer(&reference).await
            }
            AccessSpec::OciBlob(blob) => {
                let reference = ImageReference::parse(&blob.reference)?;
                tracing::debug!(reference = %reference, digest = %blob.digest, "Fetching blob");
                self.pull_blob(&reference, &blob.digest).await
            }
            AccessSpec::LocalBlob(local) => match &local.global_access {
                Some(global) => self.fetch_artifact(global).await,
                None => Err(OcmError::UnsupportedAccess(format!(
                    "localBlob {} outside its repository",
                    local.local_reference
                ))),
            },
            AccessSpec::Unsupported { kind, .. } => Err(OcmError::UnsupportedAccess(kind.clone())),
        }
    }
}
