//! Component and reference resolution.
//!
//! The [`Resolver`] fetches component versions from repositories, checks
//! their signatures, selects versions under semver constraints, copies them
//! between repositories and expands their references into a mirrored
//! [`ReferenceTree`].

pub mod access;
pub mod dir_repository;
pub mod oci_repository;
pub mod repository;
pub mod signing;
pub mod tree;
pub mod version;

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::Arc;

use a3s_ocm_core::access::AccessSpec;
use a3s_ocm_core::error::{OcmError, Result};
use a3s_ocm_core::{ComponentDescriptor, Identity, Resource, ResourceSelector, Snapshot};
use sha2::{Digest, Sha256};
use tokio_util::sync::CancellationToken;

use crate::cache::{write_snapshot, Cache, FALLBACK_TAG};

pub use access::resolve_access;
pub use dir_repository::DirComponentRepository;
pub use oci_repository::OciComponentRepository;
pub use repository::{
    ArtifactFetcher, ComponentRepository, DefaultRepositoryProvider, LocalBlob, RepositoryProvider,
};
pub use tree::{DescriptorStore, ReferenceNode, ReferenceTree};
pub use version::Constraint;

/// Handle on a fetched component version.
#[derive(Clone)]
pub struct ComponentVersion {
    pub repository_url: String,
    pub descriptor: Arc<ComponentDescriptor>,
    repository: Arc<dyn ComponentRepository>,
}

impl ComponentVersion {
    pub fn new(descriptor: ComponentDescriptor, repository: Arc<dyn ComponentRepository>) -> Self {
        Self {
            repository_url: repository.url().to_string(),
            descriptor: Arc::new(descriptor),
            repository,
        }
    }

    pub fn name(&self) -> &str {
        self.descriptor.name()
    }

    pub fn version(&self) -> &str {
        self.descriptor.version()
    }

    pub fn repository(&self) -> &Arc<dyn ComponentRepository> {
        &self.repository
    }
}

impl std::fmt::Debug for ComponentVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComponentVersion")
            .field("repository_url", &self.repository_url)
            .field("name", &self.name())
            .field("version", &self.version())
            .finish()
    }
}

/// A component version with its references expanded.
#[derive(Debug, Clone)]
pub struct ResolvedComponent {
    pub component: ComponentVersion,
    pub tree: ReferenceTree,
    /// Whether signatures were requested and all verified
    pub verified: bool,
}

/// A resource located inside a resolved component.
#[derive(Debug, Clone)]
pub struct ResolvedResource {
    /// Descriptor that declares the resource
    pub owner: Arc<ComponentDescriptor>,
    pub resource: Resource,
    /// Pull location, when the access has one
    pub pull_reference: Option<String>,
}

impl ResolvedResource {
    /// Cache identity: component and resource coordinates plus the
    /// resource's extra identity.
    pub fn identity(&self) -> Identity {
        let version = if self.resource.version.is_empty() {
            FALLBACK_TAG
        } else {
            &self.resource.version
        };
        let mut identity = Identity::for_resource(
            self.owner.name(),
            self.owner.version(),
            &self.resource.name,
            version,
        );
        identity.extend(&self.resource.extra_identity);
        identity
    }
}

/// Public key to check a named signature with.
#[derive(Debug, Clone)]
pub struct SignatureKey {
    pub name: String,
    /// PEM encoded RSA public key
    pub public_key: String,
}

/// Which version of a component to resolve.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VersionSelector {
    Exact(String),
    /// Highest version satisfying a semver constraint
    Constraint(String),
}

/// Parameters of [`Resolver::resolve_component_version`].
#[derive(Debug, Clone)]
pub struct ResolveRequest {
    pub repository_url: String,
    pub name: String,
    pub version: VersionSelector,
    /// Signatures that must verify; empty skips verification
    pub signatures: Vec<SignatureKey>,
    /// Copy the component (and its references) here before resolving
    pub destination_url: Option<String>,
}

/// Resolver options.
#[derive(Debug, Clone)]
pub struct ResolverOptions {
    pub max_reference_depth: usize,
}

impl Default for ResolverOptions {
    fn default() -> Self {
        Self {
            max_reference_depth: a3s_ocm_core::config::DEFAULT_MAX_REFERENCE_DEPTH,
        }
    }
}

/// Resolves component versions and their reference graphs.
pub struct Resolver {
    repositories: Arc<dyn RepositoryProvider>,
    fetcher: Arc<dyn ArtifactFetcher>,
    store: Arc<DescriptorStore>,
    options: ResolverOptions,
}

impl Resolver {
    pub fn new(
        repositories: Arc<dyn RepositoryProvider>,
        fetcher: Arc<dyn ArtifactFetcher>,
        options: ResolverOptions,
    ) -> Self {
        Self {
            repositories,
            fetcher,
            store: Arc::new(DescriptorStore::new()),
            options,
        }
    }

    /// Mirrored descriptors.
    pub fn store(&self) -> &Arc<DescriptorStore> {
        &self.store
    }

    /// Fetch `name@version` from the repository at `repository_url`.
    pub async fn get_component_version(
        &self,
        repository_url: &str,
        name: &str,
        version: &str,
    ) -> Result<ComponentVersion> {
        let repository = self.repositories.open(repository_url)?;
        let descriptor = repository.descriptor(name, version).await?;
        tracing::info!(
            component = %name,
            version = %version,
            repository = %repository_url,
            "Fetched component version"
        );
        Ok(ComponentVersion::new(descriptor, repository))
    }

    /// Highest listed version of `name` satisfying `constraint`.
    pub async fn get_latest_valid_component_version(
        &self,
        repository_url: &str,
        name: &str,
        constraint: &str,
    ) -> Result<String> {
        let constraint = Constraint::parse(constraint)?;
        let repository = self.repositories.open(repository_url)?;
        let versions = repository.list_versions(name).await?;
        let latest = version::latest_matching(&versions, &constraint)?;
        tracing::debug!(
            component = %name,
            constraint = %constraint.as_str(),
            version = %latest,
            candidates = versions.len(),
            "Selected component version"
        );
        Ok(latest)
    }

    /// Check every requested signature.
    ///
    /// Returns `false` as soon as one does not verify.
    pub fn verify_component(&self, cv: &ComponentVersion, signatures: &[SignatureKey]) -> Result<bool> {
        for key in signatures {
            if !signing::verify(&cv.descriptor, &key.name, &key.public_key)? {
                tracing::warn!(
                    component = %cv.name(),
                    version = %cv.version(),
                    signature = %key.name,
                    "Signature did not verify"
                );
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Copy `source` and every component it references into the repository
    /// at `destination_url`.
    ///
    /// Versions already present at the destination are left as they are, so
    /// re-running a completed transfer is a no-op.
    pub async fn transfer_component(
        &self,
        source: &ComponentVersion,
        destination_url: &str,
        cancel: &CancellationToken,
    ) -> Result<ComponentVersion> {
        let destination = self.repositories.open(destination_url)?;

        let mut queue: VecDeque<Arc<ComponentDescriptor>> = VecDeque::new();
        let mut seen: HashSet<(String, String)> = HashSet::new();
        queue.push_back(source.descriptor.clone());
        seen.insert((source.name().to_string(), source.version().to_string()));

        let mut copied = 0usize;
        while let Some(descriptor) = queue.pop_front() {
            check_cancelled(cancel)?;

            for reference in descriptor.references() {
                let key = (reference.component_name.clone(), reference.version.clone());
                if seen.insert(key) {
                    let child = source
                        .repository
                        .descriptor(&reference.component_name, &reference.version)
                        .await?;
                    queue.push_back(Arc::new(child));
                }
            }

            if destination
                .contains(descriptor.name(), descriptor.version())
                .await?
            {
                tracing::debug!(
                    component = %descriptor.name(),
                    version = %descriptor.version(),
                    "Already present at destination"
                );
                continue;
            }

            let mut blobs = Vec::new();
            for resource in descriptor.resources() {
                if let AccessSpec::LocalBlob(local) = &resource.access {
                    let data = source
                        .repository
                        .local_blob(descriptor.name(), descriptor.version(), &local.local_reference)
                        .await?;
                    blobs.push(LocalBlob {
                        local_reference: local.local_reference.clone(),
                        media_type: local.media_type.clone(),
                        data,
                    });
                }
            }
            destination.put(&descriptor, blobs).await?;
            copied += 1;
        }

        tracing::info!(
            component = %source.name(),
            version = %source.version(),
            destination = %destination_url,
            copied,
            "Transferred component"
        );

        Ok(ComponentVersion {
            repository_url: destination.url().to_string(),
            descriptor: source.descriptor.clone(),
            repository: destination,
        })
    }

    /// Expand the references of `cv` into a tree of mirrored descriptors.
    ///
    /// Every distinct component version is fetched once. A reference cycle
    /// or a chain longer than the configured depth is a validation error.
    pub async fn resolve_references(
        &self,
        cv: &ComponentVersion,
        cancel: &CancellationToken,
    ) -> Result<ReferenceTree> {
        let mut graph: HashMap<(String, String), Arc<ComponentDescriptor>> = HashMap::new();
        graph.insert(
            (cv.name().to_string(), cv.version().to_string()),
            cv.descriptor.clone(),
        );

        let mut queue: VecDeque<(String, String)> = cv
            .descriptor
            .references()
            .iter()
            .map(|r| (r.component_name.clone(), r.version.clone()))
            .collect();
        while let Some(key) = queue.pop_front() {
            if graph.contains_key(&key) {
                continue;
            }
            check_cancelled(cancel)?;
            let descriptor = cv.repository.descriptor(&key.0, &key.1).await?;
            tracing::debug!(component = %key.0, version = %key.1, "Fetched referenced component");
            queue.extend(
                descriptor
                    .references()
                    .iter()
                    .map(|r| (r.component_name.clone(), r.version.clone())),
            );
            graph.insert(key, Arc::new(descriptor));
        }

        let root = self.store.insert(cv.descriptor.clone(), &BTreeMap::new());
        let mut ancestors = vec![(cv.name().to_string(), cv.version().to_string())];
        let references = self.build_nodes(&cv.descriptor, &graph, &mut ancestors)?;
        let tree = ReferenceTree { root, references };

        tracing::info!(
            component = %cv.name(),
            version = %cv.version(),
            components = graph.len(),
            depth = tree.depth(),
            "Resolved references"
        );
        Ok(tree)
    }

    fn build_nodes(
        &self,
        parent: &ComponentDescriptor,
        graph: &HashMap<(String, String), Arc<ComponentDescriptor>>,
        ancestors: &mut Vec<(String, String)>,
    ) -> Result<Vec<ReferenceNode>> {
        let mut nodes = Vec::new();
        for reference in parent.references() {
            let key = (reference.component_name.clone(), reference.version.clone());
            if ancestors.contains(&key) {
                let mut chain: Vec<String> =
                    ancestors.iter().map(|(n, v)| format!("{}:{}", n, v)).collect();
                chain.push(format!("{}:{}", key.0, key.1));
                return Err(OcmError::ValidationError(format!(
                    "Reference cycle: {}",
                    chain.join(" -> ")
                )));
            }
            if ancestors.len() > self.options.max_reference_depth {
                return Err(OcmError::ValidationError(format!(
                    "Reference chain below {}:{} exceeds maximum depth {}",
                    parent.name(),
                    parent.version(),
                    self.options.max_reference_depth
                )));
            }

            let descriptor = graph.get(&key).ok_or_else(|| {
                OcmError::Invariant(format!("{}:{} missing from resolved graph", key.0, key.1))
            })?;
            let record = self.store.insert(descriptor.clone(), &reference.extra_identity);

            ancestors.push(key);
            let children = self.build_nodes(descriptor, graph, ancestors)?;
            ancestors.pop();

            nodes.push(ReferenceNode {
                name: reference.name.clone(),
                component_name: reference.component_name.clone(),
                version: reference.version.clone(),
                extra_identity: reference.extra_identity.clone(),
                record,
                references: children,
            });
        }
        Ok(nodes)
    }

    /// Descriptor at a dotted reference path; the empty path is the root.
    ///
    /// `Ok(None)` when no node matches.
    pub fn get_component_descriptor(
        &self,
        tree: &ReferenceTree,
        path: &str,
    ) -> Result<Option<Arc<ComponentDescriptor>>> {
        let Some(record) = tree.find(path) else {
            return Ok(None);
        };
        self.store.get(record).map(Some).ok_or_else(|| {
            OcmError::Invariant(format!("reference tree points at unknown record {}", record))
        })
    }

    /// Locate a resource in the component at `selector.reference_path`.
    pub fn get_resource(
        &self,
        resolved: &ResolvedComponent,
        selector: &ResourceSelector,
    ) -> Result<ResolvedResource> {
        let owner = self
            .get_component_descriptor(&resolved.tree, &selector.reference_path)?
            .ok_or_else(|| {
                OcmError::NotFound(format!(
                    "reference path '{}' under {}:{}",
                    selector.reference_path,
                    resolved.component.name(),
                    resolved.component.version()
                ))
            })?;
        let resource = owner
            .resource(&selector.name, &selector.extra_identity)?
            .clone();
        let pull_reference = resolve_access(&resource.access).ok();
        Ok(ResolvedResource {
            owner,
            resource,
            pull_reference,
        })
    }

    /// Read the payload of a resource.
    pub async fn fetch_resource_data(
        &self,
        resolved: &ResolvedComponent,
        resource: &ResolvedResource,
    ) -> Result<Vec<u8>> {
        let data = match &resource.resource.access {
            AccessSpec::LocalBlob(local) => {
                resolved
                    .component
                    .repository
                    .local_blob(
                        resource.owner.name(),
                        resource.owner.version(),
                        &local.local_reference,
                    )
                    .await?
            }
            access => self.fetcher.fetch_artifact(access).await?,
        };
        if data.is_empty() {
            return Err(OcmError::ValidationError(format!(
                "resource '{}' of {}:{} has no data",
                resource.resource.name,
                resource.owner.name(),
                resource.owner.version()
            )));
        }
        tracing::debug!(
            resource = %resource.resource.name,
            component = %resource.owner.name(),
            size = data.len(),
            "Fetched resource data"
        );
        Ok(data)
    }

    /// Fetch a resource and store it in the cache under its identity.
    ///
    /// The push is skipped when the identity's tag is already cached.
    pub async fn cache_resource(
        &self,
        cache: &dyn Cache,
        resolved: &ResolvedComponent,
        selector: &ResourceSelector,
    ) -> Result<Snapshot> {
        let resource = self.get_resource(resolved, selector)?;
        let identity = resource.identity();
        let data = self.fetch_resource_data(resolved, &resource).await?;

        let name = cache.name_for(&identity);
        let tag = identity.snapshot_tag(FALLBACK_TAG);
        if cache.is_cached(&name, &tag).await? {
            tracing::debug!(identity = %identity, tag = %tag, "Resource already cached");
            return Ok(Snapshot {
                digest: format!("sha256:{}", hex::encode(Sha256::digest(&data))),
                size: data.len() as u64,
                tag,
                repository_url: cache.repository_url(&name),
                identity,
                created_at: chrono::Utc::now(),
            });
        }

        write_snapshot(cache, &identity, Box::new(std::io::Cursor::new(data)), FALLBACK_TAG).await
    }

    /// Select, fetch, verify, optionally transfer, and resolve the
    /// references of a component version.
    pub async fn resolve_component_version(
        &self,
        request: &ResolveRequest,
        cancel: &CancellationToken,
    ) -> Result<ResolvedComponent> {
        tokio::select! {
            _ = cancel.cancelled() => Err(OcmError::Cancelled),
            result = self.resolve_inner(request, cancel) => result,
        }
    }

    async fn resolve_inner(
        &self,
        request: &ResolveRequest,
        cancel: &CancellationToken,
    ) -> Result<ResolvedComponent> {
        let version = match &request.version {
            VersionSelector::Exact(version) => version.clone(),
            VersionSelector::Constraint(constraint) => {
                self.get_latest_valid_component_version(
                    &request.repository_url,
                    &request.name,
                    constraint,
                )
                .await?
            }
        };

        let mut cv = self
            .get_component_version(&request.repository_url, &request.name, &version)
            .await?;

        let verified = !request.signatures.is_empty();
        if verified && !self.verify_component(&cv, &request.signatures)? {
            return Err(OcmError::ValidationError(format!(
                "Component {}:{} failed signature verification",
                cv.name(),
                cv.version()
            )));
        }

        if let Some(destination) = &request.destination_url {
            cv = self.transfer_component(&cv, destination, cancel).await?;
        }

        let tree = self.resolve_references(&cv, cancel).await?;
        Ok(ResolvedComponent {
            component: cv,
            tree,
            verified,
        })
    }
}

fn check_cancelled(cancel: &CancellationToken) -> Result<()> {
    if cancel.is_cancelled() {
        Err(OcmError::Cancelled)
    } else {
        Ok(())
    }
}
