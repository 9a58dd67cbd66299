//! Collaborators a command works with, built from the loaded configuration.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use a3s_ocm_core::{OcmConfig, OcmError};
use a3s_ocm_runtime::{
    Cache, CancellationToken, CascadeEvaluator, CredentialStore, DefaultRepositoryProvider,
    DirCache, MutationEngine, RegistryCache, RegistryClient, Resolver, ResolverOptions,
};

/// Configuration file looked up when `--config` is not given.
pub const CONFIG_FILE: &str = "config.yaml";

/// Return the default configuration path (~/.a3s/ocm/config.yaml).
pub fn default_config_path() -> PathBuf {
    dirs::home_dir()
        .map(|h| h.join(".a3s"))
        .unwrap_or_else(|| PathBuf::from(".a3s"))
        .join("ocm")
        .join(CONFIG_FILE)
}

/// Load the configuration at `path`.
///
/// Without a path the default location is used when it exists, and the
/// built-in defaults otherwise.
pub fn load_config(path: Option<&Path>) -> Result<OcmConfig, OcmError> {
    match path {
        Some(path) => OcmConfig::load(path),
        None => {
            let path = default_config_path();
            if path.exists() {
                OcmConfig::load(&path)
            } else {
                Ok(OcmConfig::default())
            }
        }
    }
}

pub struct Context {
    pub config: OcmConfig,
}

impl Context {
    pub fn new(config: OcmConfig) -> Self {
        Self { config }
    }

    pub fn load(path: Option<&Path>) -> Result<Self, OcmError> {
        Ok(Self::new(load_config(path)?))
    }

    pub fn registry_client(&self, insecure: bool) -> Result<Arc<RegistryClient>, OcmError> {
        let credentials = Arc::new(CredentialStore::default_path()?);
        Ok(Arc::new(RegistryClient::new(credentials, insecure)))
    }

    pub fn resolver(&self) -> Result<Arc<Resolver>, OcmError> {
        let client = self.registry_client(self.config.resolver.insecure)?;
        Ok(Arc::new(Resolver::new(
            Arc::new(DefaultRepositoryProvider::new(client.clone())),
            client,
            ResolverOptions {
                max_reference_depth: self.config.resolver.max_reference_depth,
            },
        )))
    }

    /// The filesystem cache, when `cache.local_dir` is configured.
    pub fn dir_cache(&self) -> Result<Option<DirCache>, OcmError> {
        self.config
            .cache
            .local_dir
            .as_deref()
            .map(DirCache::new)
            .transpose()
    }

    /// The snapshot cache: the local directory if configured, the registry
    /// at `cache.url` otherwise.
    pub fn cache(&self) -> Result<Arc<dyn Cache>, OcmError> {
        if let Some(cache) = self.dir_cache()? {
            return Ok(Arc::new(cache));
        }
        let client = self.registry_client(self.config.cache.insecure)?;
        Ok(Arc::new(RegistryCache::new(
            self.config.cache.url.clone(),
            client,
        )?))
    }

    pub fn engine(&self, resolver: Arc<Resolver>, cache: Arc<dyn Cache>) -> MutationEngine {
        MutationEngine::new(
            cache,
            resolver,
            Arc::new(CascadeEvaluator::new()),
            self.config.work_dir.clone(),
        )
    }

    /// Run one operation under the configured deadline.
    ///
    /// Ctrl-C and an expired deadline both cancel the token handed to `op`.
    pub async fn run<T, F, Fut>(&self, op: F) -> Result<T, OcmError>
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = Result<T, OcmError>>,
    {
        let cancel = CancellationToken::new();
        let interrupt = {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    tracing::warn!("Interrupted, cancelling");
                    cancel.cancel();
                }
            })
        };

        let operation = op(cancel.clone());
        let result = match self.config.operation_timeout() {
            Some(limit) => match tokio::time::timeout(limit, operation).await {
                Ok(result) => result,
                Err(_) => {
                    cancel.cancel();
                    Err(OcmError::TimeoutError(format!(
                        "operation exceeded {}s",
                        limit.as_secs()
                    )))
                }
            },
            None => operation.await,
        };

        interrupt.abort();
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_load_explicit_config() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("config.yaml");
        std::fs::write(
            &path,
            "cache:\n  local_dir: /var/cache/ocm\nresolver:\n  max_reference_depth: 4\n",
        )
        .unwrap();

        let config = load_config(Some(&path)).unwrap();
        assert_eq!(config.resolver.max_reference_depth, 4);
        assert_eq!(
            config.cache.local_dir.as_deref(),
            Some(Path::new("/var/cache/ocm"))
        );
    }

    #[test]
    fn test_load_missing_config_fails() {
        let tmp = TempDir::new().unwrap();
        assert!(load_config(Some(&tmp.path().join("none.yaml"))).is_err());
    }

    #[test]
    fn test_default_config_path() {
        let path = default_config_path();
        assert!(path.ends_with(".a3s/ocm/config.yaml"));
    }

    #[test]
    fn test_dir_cache_selected() {
        let tmp = TempDir::new().unwrap();
        let mut config = OcmConfig::default();
        config.cache.local_dir = Some(tmp.path().to_path_buf());
        let ctx = Context::new(config);
        assert!(ctx.dir_cache().unwrap().is_some());

        assert!(Context::new(OcmConfig::default())
            .dir_cache()
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_run_returns_result() {
        let ctx = Context::new(OcmConfig::default());
        let value = ctx.run(|_cancel| async { Ok(7) }).await.unwrap();
        assert_eq!(value, 7);
    }

    #[tokio::test]
    async fn test_run_times_out_and_cancels() {
        let mut config = OcmConfig::default();
        config.operation_timeout_secs = 1;
        let ctx = Context::new(config);

        let (tx, rx) = tokio::sync::oneshot::channel();
        let result: Result<(), OcmError> = ctx
            .run(|cancel| async move {
                let _ = tx.send(cancel.clone());
                tokio::time::sleep(std::time::Duration::from_secs(30)).await;
                Ok(())
            })
            .await;

        assert!(matches!(result, Err(OcmError::TimeoutError(_))));
        assert!(rx.await.unwrap().is_cancelled());
    }
}
