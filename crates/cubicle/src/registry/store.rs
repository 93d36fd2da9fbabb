//! Persistence seam for the language catalog

use std::collections::BTreeMap;
use std::fmt::Debug;

use async_trait::async_trait;
use chrono::Utc;
use thiserror::Error;
use tokio::sync::RwLock;

use crate::types::Language;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("language '{0}' already stored")]
    Duplicate(String),

    #[error("language '{0}' not stored")]
    Missing(String),

    #[error("store backend failed: {0}")]
    Backend(String),
}

/// Document store holding languages, unique by name
///
/// Every method is a single atomic step; callers order the steps.
#[async_trait]
pub trait LanguageStore: Debug + Send + Sync {
    async fn find(&self, name: &str) -> Result<Option<Language>, StoreError>;

    /// Every language, sorted by name
    async fn list(&self) -> Result<Vec<Language>, StoreError>;

    /// Store a new language; fails with [`StoreError::Duplicate`] if the
    /// name is taken
    async fn insert(&self, language: Language) -> Result<(), StoreError>;

    /// Append `version` if absent and bump `updated`. Returns whether it was
    /// added.
    async fn add_version(&self, name: &str, version: &str) -> Result<bool, StoreError>;

    /// Drop `version` if present and bump `updated`. Returns whether it was
    /// removed.
    async fn remove_version(&self, name: &str, version: &str) -> Result<bool, StoreError>;

    /// Replace the argv template and bump `updated`
    async fn set_cmd(&self, name: &str, cmd: Vec<String>) -> Result<(), StoreError>;

    /// Returns whether a record was deleted
    async fn delete(&self, name: &str) -> Result<bool, StoreError>;
}

/// Process-local store
#[derive(Debug, Default)]
pub struct InMemoryStore {
    languages: RwLock<BTreeMap<String, Language>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LanguageStore for InMemoryStore {
    async fn find(&self, name: &str) -> Result<Option<Language>, StoreError> {
        Ok(self.languages.read().await.get(name).cloned())
    }

    async fn list(&self) -> Result<Vec<Language>, StoreError> {
        Ok(self.languages.read().await.values().cloned().collect())
    }

    async fn insert(&self, language: Language) -> Result<(), StoreError> {
        let mut languages = self.languages.write().await;
        if languages.contains_key(&language.name) {
            return Err(StoreError::Duplicate(language.name));
        }
        languages.insert(language.name.clone(), language);
        Ok(())
    }

    async fn add_version(&self, name: &str, version: &str) -> Result<bool, StoreError> {
        let mut languages = self.languages.write().await;
        let language = languages
            .get_mut(name)
            .ok_or_else(|| StoreError::Missing(name.to_owned()))?;
        if language.has_version(version) {
            return Ok(false);
        }
        language.versions.push(version.to_owned());
        language.updated = Utc::now();
        Ok(true)
    }

    async fn remove_version(&self, name: &str, version: &str) -> Result<bool, StoreError> {
        let mut languages = self.languages.write().await;
        let language = languages
            .get_mut(name)
            .ok_or_else(|| StoreError::Missing(name.to_owned()))?;
        let before = language.versions.len();
        language.versions.retain(|v| v != version);
        let removed = language.versions.len() != before;
        if removed {
            language.updated = Utc::now();
        }
        Ok(removed)
    }

    async fn set_cmd(&self, name: &str, cmd: Vec<String>) -> Result<(), StoreError> {
        let mut languages = self.languages.write().await;
        let language = languages
            .get_mut(name)
            .ok_or_else(|| StoreError::Missing(name.to_owned()))?;
        language.cmd = cmd;
        language.updated = Utc::now();
        Ok(())
    }

    async fn delete(&self, name: &str) -> Result<bool, StoreError> {
        Ok(self.languages.write().await.remove(name).is_some())
    }
}
