use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{OcmError, Result};

/// Default bound on reference chain length.
pub const DEFAULT_MAX_REFERENCE_DEPTH: usize = 32;

/// Default deadline for a single operation in seconds.
pub const DEFAULT_OPERATION_TIMEOUT_SECS: u64 = 600;

/// Runtime configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OcmConfig {
    /// Snapshot cache settings
    pub cache: CacheConfig,

    /// Resolver settings
    pub resolver: ResolverConfig,

    /// Parent directory for ephemeral extraction directories
    pub work_dir: PathBuf,

    /// Deadline for one operation (0 = unlimited)
    pub operation_timeout_secs: u64,

    /// Log level
    pub log_level: LogLevel,
}

impl Default for OcmConfig {
    fn default() -> Self {
        Self {
            cache: CacheConfig::default(),
            resolver: ResolverConfig::default(),
            work_dir: std::env::temp_dir(),
            operation_timeout_secs: DEFAULT_OPERATION_TIMEOUT_SECS,
            log_level: LogLevel::Warn,
        }
    }
}

impl OcmConfig {
    /// Load configuration from a YAML file.
    ///
    /// Missing fields fall back to their defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path).map_err(|e| {
            OcmError::ConfigError(format!("Failed to read {}: {}", path.display(), e))
        })?;
        let config: OcmConfig = serde_yaml::from_str(&data).map_err(|e| {
            OcmError::ConfigError(format!("Failed to parse {}: {}", path.display(), e))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the runtime cannot operate with.
    pub fn validate(&self) -> Result<()> {
        if self.resolver.max_reference_depth == 0 {
            return Err(OcmError::ConfigError(
                "resolver.max_reference_depth must be greater than zero".to_string(),
            ));
        }
        if self.cache.url.trim().is_empty() && self.cache.local_dir.is_none() {
            return Err(OcmError::ConfigError(
                "cache.url or cache.local_dir must be set".to_string(),
            ));
        }
        if self.cache.url.contains("://") {
            return Err(OcmError::ConfigError(format!(
                "cache.url must not contain a scheme: {}",
                self.cache.url
            )));
        }
        Ok(())
    }

    /// Operation deadline, `None` when unlimited.
    pub fn operation_timeout(&self) -> Option<std::time::Duration> {
        match self.operation_timeout_secs {
            0 => None,
            secs => Some(std::time::Duration::from_secs(secs)),
        }
    }
}

/// Snapshot cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Registry host and optional path prefix, without scheme
    pub url: String,

    /// Use plain HTTP towards the cache registry
    pub insecure: bool,

    /// Filesystem-backed cache used instead of a registry
    pub local_dir: Option<PathBuf>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            url: "localhost:5000".to_string(),
            insecure: true,
            local_dir: None,
        }
    }
}

/// Resolver configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolverConfig {
    /// Maximum reference chain length
    pub max_reference_depth: usize,

    /// Transfer target repository
    pub destination_url: Option<String>,

    /// Use plain HTTP towards component registries
    pub insecure: bool,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            max_reference_depth: DEFAULT_MAX_REFERENCE_DEPTH,
            destination_url: None,
            insecure: false,
        }
    }
}

/// Log level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl From<LogLevel> for tracing::Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Error => tracing::Level::ERROR,
        }
    }
}

impl std::str::FromStr for LogLevel {
    type Err = OcmError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "error" => Ok(LogLevel::Error),
            other => Err(OcmError::ConfigError(format!("Unknown log level: {}", other))),
        }
    }
}
