//! A3S OCM Core - Foundational Types and Abstractions
//!
//! This module provides the data model shared by the resolver, the snapshot
//! cache and the mutation engine: identities, component descriptors, access
//! specifications, ConfigData documents, snapshots, configuration and errors.

pub mod access;
pub mod config;
pub mod config_data;
pub mod descriptor;
pub mod error;
pub mod identity;
pub mod snapshot;

// Re-export commonly used types
pub use access::AccessSpec;
pub use config::{CacheConfig, LogLevel, OcmConfig, ResolverConfig};
pub use config_data::{ConfigData, ConfigRule, Configuration, LocalizationRule, ResourceSelector, Substitution};
pub use descriptor::{ComponentDescriptor, ComponentReference, Resource};
pub use error::{ErrorKind, OcmError, Result, Stage};
pub use identity::Identity;
pub use snapshot::Snapshot;

/// A3S OCM version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
