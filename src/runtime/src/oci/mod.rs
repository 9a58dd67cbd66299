//! OCI registry plumbing.
//!
//! - [`reference`]: textual and registry-aware reference parsing
//! - [`credentials`]: per-host credential sources
//! - [`registry`]: push/pull/list/delete against a distribution API

pub mod credentials;
pub mod reference;
pub mod registry;

pub use credentials::{
    Anonymous, CredentialSource, CredentialStore, Credentials, EnvCredentials, StaticCredentials,
};
pub use reference::{ImageReference, PullReference};
pub use registry::{ArtifactBlob, PushedArtifact, RegistryClient};
