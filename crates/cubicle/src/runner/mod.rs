//! Code runner for Cubicle
//!
//! Provides the high-level API for executing code in throwaway containers.

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::Semaphore;
use tracing::{debug, instrument};

pub use crate::runner::locks::ImageLocks;

mod execute;
mod locks;

use crate::config::Config;
use crate::docker::{DockerError, Images, Transport};
use crate::error::ErrorKind;
use crate::registry::{LanguageStore, StoreError};
use crate::runner::execute::Job;
use crate::types::{ExecutionResult, Language};

/// Errors that occur during execution
#[derive(Debug, Error)]
pub enum ExecuteError {
    #[error("{language} version {version} is not installed")]
    Unsupported { language: String, version: String },

    #[error("execution timed out after {seconds}s")]
    Timeout { seconds: f64 },

    #[error("runner is shutting down")]
    Closed,

    #[error("execution task failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error(transparent)]
    Runtime(#[from] DockerError),

    #[error("language catalog unavailable: {0}")]
    Catalog(#[from] StoreError),
}

impl ExecuteError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ExecuteError::Unsupported { .. } => ErrorKind::Unsupported,
            ExecuteError::Runtime(e) => e.kind(),
            ExecuteError::Closed => ErrorKind::RuntimeUnavailable,
            ExecuteError::Timeout { .. } | ExecuteError::Join(_) | ExecuteError::Catalog(_) => {
                ErrorKind::RuntimeInternal
            }
        }
    }
}

/// High-level runner for code execution
///
/// Cloning is cheap; clones share the transport, the image locks and the
/// concurrency limit.
#[derive(Debug, Clone)]
pub struct Runner {
    config: Arc<Config>,
    transport: Arc<dyn Transport>,
    locks: ImageLocks,
    permits: Option<Arc<Semaphore>>,
    catalog: Option<Arc<dyn LanguageStore>>,
}

impl Runner {
    /// Create a runner talking to the socket named in `config`
    pub fn new(config: Config) -> Self {
        let transport = config.transport();
        Self::with_transport(config, transport)
    }

    /// Create a runner over an existing transport
    pub fn with_transport(config: Config, transport: Arc<dyn Transport>) -> Self {
        let permits = config
            .max_concurrent_executions
            .map(|n| Arc::new(Semaphore::new(n)));
        Self {
            config: Arc::new(config),
            transport,
            locks: ImageLocks::new(),
            permits,
            catalog: None,
        }
    }

    /// Check every execution against `catalog` once its image lock is held
    ///
    /// Without a catalog the caller's [`Language`] is trusted as given, so a
    /// version deleted after the caller looked it up would be pulled again.
    pub fn with_catalog(mut self, catalog: Arc<dyn LanguageStore>) -> Self {
        self.catalog = Some(catalog);
        self
    }

    /// Create a new runner with default configuration
    pub fn with_defaults() -> Self {
        Self::new(Config::default())
    }

    /// Get the configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn transport(&self) -> Arc<dyn Transport> {
        Arc::clone(&self.transport)
    }

    /// Image manager sharing this runner's transport
    pub fn images(&self) -> Images {
        Images::new(self.transport())
    }

    /// Locks shared with whoever installs and removes images
    pub fn locks(&self) -> &ImageLocks {
        &self.locks
    }

    /// Free execution slots, or `None` when unbounded
    pub fn available_slots(&self) -> Option<usize> {
        self.permits.as_ref().map(|s| s.available_permits())
    }

    /// Run `code` with `version` of `language`
    ///
    /// Fails with [`ExecuteError::Unsupported`] before touching the runtime
    /// if the version is not installed. The container is removed on every
    /// path, including when the returned future is dropped.
    #[instrument(skip(self, language, code), fields(language = %language.name, code_len = code.len()))]
    pub async fn execute(
        &self,
        language: &Language,
        version: &str,
        code: &str,
    ) -> Result<ExecutionResult, ExecuteError> {
        if !language.has_version(version) {
            return Err(ExecuteError::Unsupported {
                language: language.name.clone(),
                version: version.to_owned(),
            });
        }

        let permit = match &self.permits {
            Some(semaphore) => Some(
                Arc::clone(semaphore)
                    .acquire_owned()
                    .await
                    .map_err(|_| ExecuteError::Closed)?,
            ),
            None => None,
        };
        let image_guard = self.locks.read(&language.name, version).await;

        let current;
        let language = match &self.catalog {
            Some(catalog) => {
                current = catalog
                    .find(&language.name)
                    .await?
                    .filter(|l| l.has_version(version))
                    .ok_or_else(|| ExecuteError::Unsupported {
                        language: language.name.clone(),
                        version: version.to_owned(),
                    })?;
                &current
            }
            None => language,
        };

        let job = Job {
            transport: self.transport(),
            image: language.image(version),
            cmd: language.cmd.clone(),
            code: code.to_owned(),
            source_name: self.config.source_name.clone(),
            source_dir: self.config.source_dir.clone(),
            timeout: self.config.timeout(),
            pull_missing: self.config.pull_missing_images,
        };

        debug!("dispatching execution");
        let handle = tokio::spawn(async move {
            let _permit = permit;
            let _image_guard = image_guard;
            job.run().await
        });
        handle.await?
    }
}
