//! A3S OCM Runtime - resolver, snapshot cache and mutation engine.
//!
//! This module provides the runtime side of A3S OCM: OCI registry access,
//! component repositories, reference resolution, the content-addressable
//! snapshot cache, and the localization/configuration mutation engine.

#![allow(clippy::result_large_err)]

pub mod cache;
pub mod mutate;
pub mod oci;
pub mod resolver;

// Re-export common types
pub use cache::{delete_snapshot, read_snapshot, write_snapshot, BlobReader, Cache, DirCache, RegistryCache};
pub use mutate::{
    CascadeEvaluator, DirPatchSource, Evaluator, MutationEngine, MutationOutcome, MutationRequest,
    MutationState, PatchSource, PatchSpec, ResourceRef, SourceSpec,
};
pub use oci::{CredentialSource, CredentialStore, Credentials, ImageReference, PullReference, RegistryClient};
pub use resolver::signing::{sign as sign_component, verify as verify_signature};
pub use resolver::{
    resolve_access, ComponentRepository, ComponentVersion, DefaultRepositoryProvider,
    DirComponentRepository, OciComponentRepository, ReferenceTree, RepositoryProvider,
    ResolveRequest, ResolvedComponent, ResolvedResource, Resolver, ResolverOptions, SignatureKey,
    VersionSelector,
};

/// Cancellation signal accepted by long-running operations.
pub use tokio_util::sync::CancellationToken;

/// A3S OCM Runtime version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
