use std::fmt;

use thiserror::Error;

/// Pipeline stage a mutation failure originated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    FetchSource,
    FetchConfig,
    ComputeSubstitutions,
    Apply,
    Repackage,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::FetchSource => "fetch-source",
            Stage::FetchConfig => "fetch-config",
            Stage::ComputeSubstitutions => "compute-substitutions",
            Stage::Apply => "apply",
            Stage::Repackage => "repackage",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Coarse classification used by callers to pick a retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Dependency not available yet. Retry later.
    NotFound,
    /// Access specification, credential or transport problem. Retry later.
    Access,
    /// Bad input. Terminal until the input changes.
    Validation,
    /// Backing cache registry failure. Retry later.
    Cache,
    /// The caller cancelled the operation.
    Cancelled,
    /// Bug or local environment failure.
    Internal,
}

/// A3S OCM error types
#[derive(Error, Debug)]
pub enum OcmError {
    /// Component, resource or blob does not exist (yet)
    #[error("Not found: {0}")]
    NotFound(String),

    /// Access specification variant this runtime cannot handle
    #[error("Unsupported access type: {0}")]
    UnsupportedAccess(String),

    /// Container registry error
    #[error("Registry error: {registry} - {message}")]
    RegistryError { registry: String, message: String },

    /// Credential lookup or authentication failure
    #[error("Authentication error: {0}")]
    AuthError(String),

    /// Input rejected (malformed documents, schema violations, missing files)
    #[error("Validation error: {0}")]
    ValidationError(String),

    /// Template placeholder referencing an undefined name
    #[error("Unresolved reference '{reference}' at path '{path}' in file '{file}'")]
    UnresolvedReference {
        reference: String,
        file: String,
        path: String,
    },

    /// Snapshot cache push/fetch/delete failure
    #[error("Cache error: {0}")]
    CacheError(String),

    /// Failure wrapped with the pipeline stage that produced it
    #[error("{stage}: {source}")]
    Stage {
        stage: Stage,
        #[source]
        source: Box<OcmError>,
    },

    /// Operation cancelled by the caller
    #[error("Operation cancelled")]
    Cancelled,

    /// Timeout error
    #[error("Timeout: {0}")]
    TimeoutError(String),

    /// I/O error
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Internal invariant violated
    #[error("Invariant violated: {0}")]
    Invariant(String),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl OcmError {
    /// Classify the error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            OcmError::NotFound(_) => ErrorKind::NotFound,
            OcmError::UnsupportedAccess(_)
            | OcmError::RegistryError { .. }
            | OcmError::AuthError(_)
            | OcmError::TimeoutError(_) => ErrorKind::Access,
            OcmError::ValidationError(_)
            | OcmError::UnresolvedReference { .. }
            | OcmError::SerializationError(_) => ErrorKind::Validation,
            OcmError::CacheError(_) => ErrorKind::Cache,
            OcmError::Stage { source, .. } => source.kind(),
            OcmError::Cancelled => ErrorKind::Cancelled,
            OcmError::IoError(_)
            | OcmError::ConfigError(_)
            | OcmError::Invariant(_)
            | OcmError::Other(_) => ErrorKind::Internal,
        }
    }

    /// Whether the caller should back off and re-invoke the operation.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::NotFound | ErrorKind::Access | ErrorKind::Cache
        )
    }

    /// Wrap the error with the pipeline stage it came from.
    ///
    /// Already-wrapped errors keep their original stage.
    pub fn at(self, stage: Stage) -> Self {
        match self {
            OcmError::Stage { .. } => self,
            other => OcmError::Stage {
                stage,
                source: Box::new(other),
            },
        }
    }

    /// The stage this error was wrapped with, if any.
    pub fn stage(&self) -> Option<Stage> {
        match self {
            OcmError::Stage { stage, .. } => Some(*stage),
            _ => None,
        }
    }

    /// Strip stage wrapping.
    pub fn root(&self) -> &OcmError {
        match self {
            OcmError::Stage { source, .. } => source.root(),
            other => other,
        }
    }
}

impl From<serde_json::Error> for OcmError {
    fn from(err: serde_json::Error) -> Self {
        OcmError::SerializationError(err.to_string())
    }
}

impl From<serde_yaml::Error> for OcmError {
    fn from(err: serde_yaml::Error) -> Self {
        OcmError::SerializationError(err.to_string())
    }
}

/// Result type alias for A3S OCM operations
pub type Result<T> = std::result::Result<T, OcmError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_is_retryable() {
        let error = OcmError::NotFound("component acme.org/web:1.0.0".to_string());
        assert_eq!(error.kind(), ErrorKind::NotFound);
        assert!(error.is_retryable());
    }

    #[test]
    fn test_access_errors_are_retryable() {
        let unsupported = OcmError::UnsupportedAccess("s3".to_string());
        assert_eq!(unsupported.kind(), ErrorKind::Access);
        assert!(unsupported.is_retryable());
        assert_eq!(unsupported.to_string(), "Unsupported access type: s3");

        let registry = OcmError::RegistryError {
            registry: "ghcr.io".to_string(),
            message: "connection refused".to_string(),
        };
        assert_eq!(registry.kind(), ErrorKind::Access);
        assert_eq!(
            registry.to_string(),
            "Registry error: ghcr.io - connection refused"
        );
    }

    #[test]
    fn test_validation_is_terminal() {
        let error = OcmError::ValidationError("schema violation".to_string());
        assert_eq!(error.kind(), ErrorKind::Validation);
        assert!(!error.is_retryable());
    }

    #[test]
    fn test_cache_error_is_retryable() {
        let error = OcmError::CacheError("push failed".to_string());
        assert_eq!(error.kind(), ErrorKind::Cache);
        assert!(error.is_retryable());
    }

    #[test]
    fn test_unresolved_reference_display() {
        let error = OcmError::UnresolvedReference {
            reference: "nope".to_string(),
            file: "configmap.yaml".to_string(),
            path: "data.MSG".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Unresolved reference 'nope' at path 'data.MSG' in file 'configmap.yaml'"
        );
        assert_eq!(error.kind(), ErrorKind::Validation);
    }

    #[test]
    fn test_stage_wrapping_keeps_kind() {
        let error = OcmError::NotFound("config data".to_string()).at(Stage::FetchConfig);
        assert_eq!(error.kind(), ErrorKind::NotFound);
        assert_eq!(error.stage(), Some(Stage::FetchConfig));
        assert_eq!(error.to_string(), "fetch-config: Not found: config data");
    }

    #[test]
    fn test_stage_wrapping_is_not_nested() {
        let error = OcmError::ValidationError("bad tar".to_string())
            .at(Stage::Apply)
            .at(Stage::Repackage);
        assert_eq!(error.stage(), Some(Stage::Apply));
        assert!(matches!(error.root(), OcmError::ValidationError(_)));
    }

    #[test]
    fn test_io_error_conversion() {
        let io_error = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let error: OcmError = io_error.into();
        assert!(matches!(error, OcmError::IoError(_)));
        assert_eq!(error.kind(), ErrorKind::Internal);
    }

    #[test]
    fn test_serde_yaml_error_conversion() {
        let result: std::result::Result<serde_yaml::Value, _> =
            serde_yaml::from_str("invalid: yaml: content:");
        let error: OcmError = result.unwrap_err().into();
        assert!(matches!(error, OcmError::SerializationError(_)));
        assert_eq!(error.kind(), ErrorKind::Validation);
    }

    #[test]
    fn test_serde_json_error_conversion() {
        let result: std::result::Result<serde_json::Value, _> = serde_json::from_str("{ bad }");
        let error: OcmError = result.unwrap_err().into();
        assert!(matches!(error, OcmError::SerializationError(_)));
    }

    #[test]
    fn test_cancelled_is_not_retryable() {
        assert_eq!(OcmError::Cancelled.kind(), ErrorKind::Cancelled);
        assert!(!OcmError::Cancelled.is_retryable());
    }
}
