//! Language registry
//!
//! Catalog of languages, their installed versions and the command each one
//! runs. Version changes install or remove the backing image before the
//! catalog is touched, under the exclusive image lock of that pair.

use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

pub use crate::registry::store::{InMemoryStore, LanguageStore, StoreError};

mod store;

use crate::docker::{DockerError, Images};
use crate::error::ErrorKind;
use crate::runner::{ImageLocks, Runner};
use crate::types::{ImageRef, Language, LanguageDefinition};

/// Errors that occur while managing languages
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("language '{0}' not found")]
    NotFound(String),

    #[error("language '{0}' already exists")]
    AlreadyExists(String),

    #[error("{language} version {version} already exists")]
    VersionAlreadyExists { language: String, version: String },

    #[error("{language} version {version} not found")]
    VersionNotFound { language: String, version: String },

    #[error("invalid language definition: {0}")]
    InvalidDefinition(String),

    #[error("could not remove every image of '{name}': {}", failures.join("; "))]
    ImagesNotRemoved { name: String, failures: Vec<String> },

    #[error(transparent)]
    Image(#[from] DockerError),

    #[error(transparent)]
    Store(StoreError),
}

impl From<StoreError> for RegistryError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Duplicate(name) => RegistryError::AlreadyExists(name),
            StoreError::Missing(name) => RegistryError::NotFound(name),
            other => RegistryError::Store(other),
        }
    }
}

impl RegistryError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            RegistryError::NotFound(_) | RegistryError::VersionNotFound { .. } => {
                ErrorKind::NotFound
            }
            RegistryError::AlreadyExists(_)
            | RegistryError::VersionAlreadyExists { .. }
            | RegistryError::ImagesNotRemoved { .. } => ErrorKind::Conflict,
            RegistryError::InvalidDefinition(_) => ErrorKind::Invalid,
            RegistryError::Image(e) => e.kind(),
            RegistryError::Store(_) => ErrorKind::RuntimeInternal,
        }
    }
}

/// Outcome of registering a language
///
/// Registration succeeds even when some versions fail to install; those are
/// listed in `errors` as `"<version>: <reason>"`.
#[derive(Debug, Clone, Serialize)]
pub struct NewLanguage {
    pub language: Language,
    pub errors: Vec<String>,
}

/// Manages the language catalog and the images behind it
#[derive(Debug, Clone)]
pub struct LanguageRegistry {
    store: Arc<dyn LanguageStore>,
    images: Images,
    locks: ImageLocks,
}

impl LanguageRegistry {
    pub fn new(store: Arc<dyn LanguageStore>, images: Images, locks: ImageLocks) -> Self {
        Self {
            store,
            images,
            locks,
        }
    }

    /// Registry sharing the runner's transport and image locks
    pub fn for_runner(store: Arc<dyn LanguageStore>, runner: &Runner) -> Self {
        Self::new(store, runner.images(), runner.locks().clone())
    }

    /// Look up a language
    pub async fn get(&self, name: &str) -> Result<Language, RegistryError> {
        self.store
            .find(name)
            .await?
            .ok_or_else(|| RegistryError::NotFound(name.to_owned()))
    }

    /// Every language, sorted by name
    pub async fn list(&self) -> Result<Vec<Language>, RegistryError> {
        Ok(self.store.list().await?)
    }

    /// Register a language and install each listed version
    ///
    /// Versions are pulled one at a time. The stored version set holds only
    /// the ones that installed.
    #[instrument(skip(self, def), fields(language = %def.name))]
    pub async fn new_language(&self, def: LanguageDefinition) -> Result<NewLanguage, RegistryError> {
        validate_definition(&def)?;
        if self.store.find(&def.name).await?.is_some() {
            return Err(RegistryError::AlreadyExists(def.name));
        }

        let mut installed = Vec::new();
        let mut errors = Vec::new();
        for version in def.distinct_versions() {
            if !ImageRef::is_valid_tag(&version) {
                errors.push(format!("{version}: invalid image tag"));
                continue;
            }
            let _guard = self.locks.write(&def.name, &version).await;
            match self.images.pull(&ImageRef::new(&def.name, &version)).await {
                Ok(()) => installed.push(version),
                Err(e) => {
                    warn!(%version, error = %e, "version not installed");
                    errors.push(format!("{version}: {e}"));
                }
            }
        }
        self.locks.prune();

        let language = Language::new(def.name, installed, def.cmd);
        self.store.insert(language.clone()).await?;
        info!(
            versions = language.versions.len(),
            failed = errors.len(),
            "language registered"
        );
        Ok(NewLanguage { language, errors })
    }

    /// Store a language without installing anything
    ///
    /// Images are pulled on first execution instead.
    pub async fn seed(&self, def: LanguageDefinition) -> Result<Language, RegistryError> {
        validate_definition(&def)?;
        if let Some(version) = def.versions.iter().find(|v| !ImageRef::is_valid_tag(v)) {
            return Err(RegistryError::InvalidDefinition(format!(
                "invalid version '{version}'"
            )));
        }
        let language = Language::new(def.name, def.versions, def.cmd);
        self.store.insert(language.clone()).await?;
        debug!(language = %language.name, "language seeded");
        Ok(language)
    }

    /// Install one more version
    #[instrument(skip(self))]
    pub async fn new_version(&self, name: &str, version: &str) -> Result<Language, RegistryError> {
        let language = self.get(name).await?;
        if language.has_version(version) {
            return Err(version_exists(name, version));
        }
        if !ImageRef::is_valid_tag(version) {
            return Err(RegistryError::InvalidDefinition(format!(
                "invalid version '{version}'"
            )));
        }

        let installed = {
            let _guard = self.locks.write(name, version).await;
            self.install(&language, version).await
        };
        self.locks.prune();
        installed?;

        info!("version installed");
        self.get(name).await
    }

    async fn install(&self, language: &Language, version: &str) -> Result<(), RegistryError> {
        self.images.pull(&language.image(version)).await?;
        if !self.store.add_version(&language.name, version).await? {
            return Err(version_exists(&language.name, version));
        }
        Ok(())
    }

    /// Replace the command a language runs
    #[instrument(skip(self))]
    pub async fn update_cmd(&self, name: &str, cmd: Vec<String>) -> Result<Language, RegistryError> {
        if cmd.is_empty() {
            return Err(RegistryError::InvalidDefinition("cmd is empty".to_owned()));
        }
        self.get(name).await?;
        self.store.set_cmd(name, cmd).await?;
        self.get(name).await
    }

    /// Remove one version and its image
    ///
    /// The image goes first; if that fails the catalog is unchanged.
    #[instrument(skip(self))]
    pub async fn delete_version(&self, name: &str, version: &str) -> Result<Language, RegistryError> {
        self.version_of(name, version).await?;

        let guard = self.locks.write(name, version).await;
        // A concurrent delete may have finished while this one waited
        let language = self.version_of(name, version).await?;
        self.images.remove(&language.image(version)).await?;
        if !self.store.remove_version(name, version).await? {
            return Err(version_missing(name, version));
        }
        drop(guard);
        self.locks.prune();

        info!("version removed");
        self.get(name).await
    }

    /// The language, provided it lists `version`
    async fn version_of(&self, name: &str, version: &str) -> Result<Language, RegistryError> {
        let language = self.get(name).await?;
        if language.has_version(version) {
            Ok(language)
        } else {
            Err(version_missing(name, version))
        }
    }

    /// Remove every image of a language, then the language itself
    ///
    /// Each version's image removal is attempted. Versions whose image is
    /// gone are dropped from the record; if any removal failed the record is
    /// kept and [`RegistryError::ImagesNotRemoved`] lists the failures.
    #[instrument(skip(self))]
    pub async fn delete_language(&self, name: &str) -> Result<(), RegistryError> {
        let language = self.get(name).await?;

        let mut failures = Vec::new();
        for version in &language.versions {
            let _guard = self.locks.write(name, version).await;
            // Skip versions a concurrent delete already took care of
            if !self.get(name).await?.has_version(version) {
                continue;
            }
            match self.images.remove(&language.image(version)).await {
                Ok(()) => {
                    self.store.remove_version(name, version).await?;
                }
                Err(e) => {
                    warn!(%version, error = %e, "image not removed");
                    failures.push(format!("{version}: {e}"));
                }
            }
        }
        self.locks.prune();

        if !failures.is_empty() {
            return Err(RegistryError::ImagesNotRemoved {
                name: name.to_owned(),
                failures,
            });
        }

        if !self.store.delete(name).await? {
            return Err(RegistryError::NotFound(name.to_owned()));
        }
        info!("language deleted");
        Ok(())
    }
}

fn version_missing(name: &str, version: &str) -> RegistryError {
    RegistryError::VersionNotFound {
        language: name.to_owned(),
        version: version.to_owned(),
    }
}

fn version_exists(name: &str, version: &str) -> RegistryError {
    RegistryError::VersionAlreadyExists {
        language: name.to_owned(),
        version: version.to_owned(),
    }
}

fn validate_definition(def: &LanguageDefinition) -> Result<(), RegistryError> {
    if !ImageRef::is_valid_name(&def.name) {
        return Err(RegistryError::InvalidDefinition(format!(
            "'{}' is not a valid image name",
            def.name
        )));
    }
    if def.cmd.is_empty() {
        return Err(RegistryError::InvalidDefinition("cmd is empty".to_owned()));
    }
    Ok(())
}
