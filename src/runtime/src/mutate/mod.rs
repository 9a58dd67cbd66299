//! Localization and configuration of packaged file trees.
//!
//! A mutation reads a source artifact (a cached snapshot or a live resource),
//! reads the ConfigData resource that governs it, computes substitutions,
//! applies them to an extracted copy of the source, and caches the
//! repackaged tree as a new snapshot.
//!
//! ```text
//! Start → FetchSource → FetchConfig → ComputeSubstitutions
//!       → ApplySubstitutions → RepackageAndCache → Done
//! ```
//!
//! Every state may end in `Failed`. Errors carry the [`Stage`] they came
//! from.

pub mod archive;
pub mod configure;
pub mod evaluator;
pub mod localize;
pub mod patch;
pub mod substitute;

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use a3s_ocm_core::error::{ErrorKind, OcmError, Result, Stage};
use a3s_ocm_core::{ComponentDescriptor, ConfigData, Identity, ResourceSelector, Snapshot, Substitution};
use serde_json::Value;
use tempfile::TempDir;
use tokio::io::AsyncReadExt;
use tokio_util::sync::CancellationToken;

use crate::cache::{read_snapshot, write_snapshot, Cache, FALLBACK_TAG};
use crate::resolver::{resolve_access, ResolvedComponent, ResolvedResource, Resolver};

pub use evaluator::{CascadeEvaluator, Evaluator};
pub use patch::{DirPatchSource, PatchSource, PatchSpec};

/// Identity key recording which transform produced a snapshot.
pub const MUTATION_KEY: &str = "mutation";

/// Progress of one mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationState {
    Start,
    FetchSource,
    FetchConfig,
    ComputeSubstitutions,
    ApplySubstitutions,
    RepackageAndCache,
    Done,
    Failed(ErrorKind),
}

impl fmt::Display for MutationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MutationState::Start => write!(f, "start"),
            MutationState::FetchSource => write!(f, "fetch-source"),
            MutationState::FetchConfig => write!(f, "fetch-config"),
            MutationState::ComputeSubstitutions => write!(f, "compute-substitutions"),
            MutationState::ApplySubstitutions => write!(f, "apply-substitutions"),
            MutationState::RepackageAndCache => write!(f, "repackage-and-cache"),
            MutationState::Done => write!(f, "done"),
            MutationState::Failed(kind) => write!(f, "failed({:?})", kind),
        }
    }
}

/// A resource inside a resolved component.
#[derive(Debug, Clone)]
pub struct ResourceRef {
    pub component: Arc<ResolvedComponent>,
    pub selector: ResourceSelector,
}

impl ResourceRef {
    pub fn new(component: Arc<ResolvedComponent>, selector: ResourceSelector) -> Self {
        Self {
            component,
            selector,
        }
    }
}

/// Where the artifact to mutate comes from. Exactly one must be set.
#[derive(Debug, Clone, Default)]
pub struct SourceSpec {
    pub snapshot: Option<Snapshot>,
    pub resource: Option<ResourceRef>,
}

impl SourceSpec {
    pub fn snapshot(snapshot: Snapshot) -> Self {
        Self {
            snapshot: Some(snapshot),
            resource: None,
        }
    }

    pub fn resource(resource: ResourceRef) -> Self {
        Self {
            snapshot: None,
            resource: Some(resource),
        }
    }
}

/// Parameters of [`MutationEngine::mutate`].
#[derive(Debug, Clone)]
pub struct MutationRequest {
    pub source: SourceSpec,
    /// The ConfigData resource
    pub config: ResourceRef,
    /// Caller overrides; presence selects configuration mode
    pub values: Option<BTreeMap<String, Value>>,
    pub patch: Option<PatchSpec>,
    /// Extra identity attributes merged into the output identity
    pub output_identity_hint: BTreeMap<String, String>,
}

/// Result of a successful mutation.
#[derive(Debug, Clone)]
pub struct MutationOutcome {
    pub snapshot: Snapshot,
    pub substitutions: Vec<Substitution>,
}

/// Fetched source bytes and the identity they are addressed by.
struct Source {
    data: Vec<u8>,
    identity: Identity,
}

/// Runs mutations against a cache with an injected resolver and evaluator.
pub struct MutationEngine {
    cache: Arc<dyn Cache>,
    resolver: Arc<Resolver>,
    evaluator: Arc<dyn Evaluator>,
    work_dir: PathBuf,
}

impl MutationEngine {
    pub fn new(
        cache: Arc<dyn Cache>,
        resolver: Arc<Resolver>,
        evaluator: Arc<dyn Evaluator>,
        work_dir: PathBuf,
    ) -> Self {
        Self {
            cache,
            resolver,
            evaluator,
            work_dir,
        }
    }

    /// Run one mutation to completion.
    ///
    /// Cancellation aborts at the next suspension point; the working
    /// directory is removed on every exit path.
    pub async fn mutate(
        &self,
        request: &MutationRequest,
        cancel: &CancellationToken,
    ) -> Result<MutationOutcome> {
        let mut state = MutationState::Start;
        let result = tokio::select! {
            _ = cancel.cancelled() => Err(OcmError::Cancelled),
            result = self.run(request, &mut state) => result,
        };
        match &result {
            Ok(outcome) => {
                transition(&mut state, MutationState::Done);
                tracing::info!(
                    digest = %outcome.snapshot.digest,
                    tag = %outcome.snapshot.tag,
                    substitutions = outcome.substitutions.len(),
                    "Mutation complete"
                );
            }
            Err(e) => {
                let failed_in = state;
                transition(&mut state, MutationState::Failed(e.kind()));
                tracing::warn!(state = %failed_in, error = %e, "Mutation failed");
            }
        }
        result
    }

    async fn run(
        &self,
        request: &MutationRequest,
        state: &mut MutationState,
    ) -> Result<MutationOutcome> {
        validate_source(&request.source)?;

        transition(state, MutationState::FetchSource);
        let source = self
            .fetch_source(&request.source)
            .await
            .map_err(|e| e.at(Stage::FetchSource))?;

        transition(state, MutationState::FetchConfig);
        let (config_resource, config) = self
            .fetch_config(&request.config)
            .await
            .map_err(|e| e.at(Stage::FetchConfig))?;

        transition(state, MutationState::ComputeSubstitutions);
        let substitutions = self
            .compute_substitutions(request, &config_resource, &config)
            .map_err(|e| e.at(Stage::ComputeSubstitutions))?;

        transition(state, MutationState::ApplySubstitutions);
        let workspace = tempfile::Builder::new()
            .prefix("ocm-mutate-")
            .tempdir_in(&self.work_dir)
            .map(Arc::new)
            .map_err(|e| OcmError::from(e).at(Stage::Apply))?;
        self.apply(&workspace, &source.data, &substitutions, request.patch.as_ref())
            .await
            .map_err(|e| e.at(Stage::Apply))?;

        transition(state, MutationState::RepackageAndCache);
        let mode = if request.values.is_some() {
            "configuration"
        } else {
            "localization"
        };
        let mut identity = source.identity;
        identity.insert(MUTATION_KEY, mode);
        identity.extend(&request.output_identity_hint);
        let snapshot = self
            .repackage(workspace, &identity)
            .await
            .map_err(|e| e.at(Stage::Repackage))?;

        Ok(MutationOutcome {
            snapshot,
            substitutions,
        })
    }

    async fn fetch_source(&self, spec: &SourceSpec) -> Result<Source> {
        let source = match (&spec.snapshot, &spec.resource) {
            (Some(snapshot), _) => {
                let mut reader = read_snapshot(self.cache.as_ref(), snapshot).await?;
                let mut data = Vec::new();
                reader.read_to_end(&mut data).await?;
                Source {
                    data,
                    identity: snapshot.identity.clone(),
                }
            }
            (None, Some(reference)) => {
                let resource = self
                    .resolver
                    .get_resource(&reference.component, &reference.selector)?;
                let data = self
                    .resolver
                    .fetch_resource_data(&reference.component, &resource)
                    .await?;
                Source {
                    identity: resource.identity(),
                    data,
                }
            }
            (None, None) => return Err(missing_source()),
        };
        if source.data.is_empty() {
            return Err(OcmError::ValidationError("Source artifact is empty".to_string()));
        }
        tracing::debug!(identity = %source.identity, size = source.data.len(), "Fetched source");
        Ok(source)
    }

    async fn fetch_config(&self, reference: &ResourceRef) -> Result<(ResolvedResource, ConfigData)> {
        let resource = self
            .resolver
            .get_resource(&reference.component, &reference.selector)?;
        let data = self
            .resolver
            .fetch_resource_data(&reference.component, &resource)
            .await?;
        let config = ConfigData::from_yaml(&data)?;
        tracing::debug!(
            resource = %resource.resource.name,
            localization = config.localization.len(),
            configuration = config.configuration.is_some(),
            "Fetched ConfigData"
        );
        Ok((resource, config))
    }

    fn compute_substitutions(
        &self,
        request: &MutationRequest,
        config_resource: &ResolvedResource,
        config: &ConfigData,
    ) -> Result<Vec<Substitution>> {
        match &request.values {
            Some(values) => {
                let configuration = config.configuration.as_ref().ok_or_else(|| {
                    OcmError::ValidationError(
                        "Values were supplied but ConfigData has no configuration section"
                            .to_string(),
                    )
                })?;
                configure::substitutions(configuration, values, self.evaluator.as_ref())
            }
            None => {
                let owner = &config_resource.owner;
                let component = &request.config.component;
                localize::substitutions(&config.localization, |selector| {
                    self.localization_reference(component, owner, selector)
                })
            }
        }
    }

    /// Pull reference of a localization target.
    ///
    /// Without a reference path the resource is looked up in the component
    /// that ships the ConfigData.
    fn localization_reference(
        &self,
        component: &ResolvedComponent,
        owner: &ComponentDescriptor,
        selector: &ResourceSelector,
    ) -> Result<String> {
        if selector.reference_path.is_empty() {
            let resource = owner.resource(&selector.name, &selector.extra_identity)?;
            return resolve_access(&resource.access);
        }
        let resolved = self.resolver.get_resource(component, selector)?;
        resolve_access(&resolved.resource.access)
    }

    async fn apply(
        &self,
        workspace: &Arc<TempDir>,
        data: &[u8],
        substitutions: &[Substitution],
        patch: Option<&PatchSpec>,
    ) -> Result<()> {
        let patch_doc = match patch {
            Some(spec) => Some((spec.target.clone(), spec.source.fetch(&spec.path).await?)),
            None => None,
        };

        // Blocking tasks hold the directory, so it outlives a dropped future.
        let workspace = workspace.clone();
        let data = data.to_vec();
        let substitutions = substitutions.to_vec();
        blocking(move || {
            let root = workspace.path();
            archive::unpack(&data, root)?;
            substitute::apply(root, &substitutions)?;
            if let Some((target, doc)) = patch_doc {
                patch::apply(root, &target, &doc)?;
            }
            Ok(())
        })
        .await
    }

    async fn repackage(&self, workspace: Arc<TempDir>, identity: &Identity) -> Result<Snapshot> {
        let packed = blocking(move || archive::pack(workspace.path())).await?;
        write_snapshot(
            self.cache.as_ref(),
            identity,
            Box::new(std::io::Cursor::new(packed)),
            FALLBACK_TAG,
        )
        .await
    }
}

fn transition(state: &mut MutationState, next: MutationState) {
    tracing::debug!(from = %state, to = %next, "Mutation state");
    *state = next;
}

fn validate_source(spec: &SourceSpec) -> Result<()> {
    match (&spec.snapshot, &spec.resource) {
        (Some(_), Some(_)) => Err(OcmError::ValidationError(
            "Source must be either a snapshot or a resource, not both".to_string(),
        )),
        (None, None) => Err(missing_source()),
        _ => Ok(()),
    }
}

fn missing_source() -> OcmError {
    OcmError::ValidationError("Source must be a snapshot or a resource".to_string())
}

async fn blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| OcmError::Other(format!("Filesystem task failed: {}", e)))?
}
