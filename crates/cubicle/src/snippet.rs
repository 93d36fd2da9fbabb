//! Saved code snippets
//!
//! A snippet is a piece of code a user ran, stored with the result of running
//! it. Only the owner can see or change a snippet; anyone else gets
//! [`SnippetError::NotFound`].

use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::error::ErrorKind;
use crate::registry::{LanguageRegistry, RegistryError, StoreError};
use crate::runner::{ExecuteError, Runner};
use crate::types::ExecutionResult;

/// Shortest code accepted
pub const MIN_CODE_LEN: usize = 3;

/// Page size used when the caller does not pick one
pub const DEFAULT_PER_PAGE: usize = 5;

#[derive(Debug, Error)]
pub enum SnippetError {
    #[error("snippet {0} not found")]
    NotFound(Uuid),

    #[error("code must be at least {MIN_CODE_LEN} characters")]
    InvalidCode,

    #[error(transparent)]
    Language(#[from] RegistryError),

    #[error(transparent)]
    Execute(#[from] ExecuteError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl SnippetError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SnippetError::NotFound(_) => ErrorKind::NotFound,
            SnippetError::InvalidCode => ErrorKind::Invalid,
            SnippetError::Language(e) => e.kind(),
            SnippetError::Execute(e) => e.kind(),
            SnippetError::Store(_) => ErrorKind::RuntimeInternal,
        }
    }
}

/// A stored run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snippet {
    pub id: Uuid,
    pub owner: String,
    pub language: String,
    pub version: String,
    pub code: String,
    pub result: ExecutionResult,
    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
}

/// Fields to change on a snippet; `None` keeps the current value
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SnippetPatch {
    pub language: Option<String>,
    pub version: Option<String>,
    pub code: Option<String>,
}

impl SnippetPatch {
    fn is_empty(&self) -> bool {
        self.language.is_none() && self.version.is_none() && self.code.is_none()
    }
}

/// Persistence seam for snippets
#[async_trait]
pub trait SnippetStore: Debug + Send + Sync {
    async fn insert(&self, snippet: Snippet) -> Result<(), StoreError>;

    async fn find(&self, id: Uuid) -> Result<Option<Snippet>, StoreError>;

    /// Snippets of `owner`, oldest first, skipping `skip` and returning at
    /// most `limit`
    async fn by_owner(
        &self,
        owner: &str,
        skip: usize,
        limit: usize,
    ) -> Result<Vec<Snippet>, StoreError>;

    /// Overwrite an existing snippet
    async fn replace(&self, snippet: Snippet) -> Result<(), StoreError>;

    async fn delete(&self, id: Uuid) -> Result<bool, StoreError>;
}

/// Process-local snippet store
#[derive(Debug, Default)]
pub struct InMemorySnippetStore {
    snippets: RwLock<HashMap<Uuid, Snippet>>,
}

impl InMemorySnippetStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SnippetStore for InMemorySnippetStore {
    async fn insert(&self, snippet: Snippet) -> Result<(), StoreError> {
        let mut snippets = self.snippets.write().await;
        if snippets.contains_key(&snippet.id) {
            return Err(StoreError::Duplicate(snippet.id.to_string()));
        }
        snippets.insert(snippet.id, snippet);
        Ok(())
    }

    async fn find(&self, id: Uuid) -> Result<Option<Snippet>, StoreError> {
        Ok(self.snippets.read().await.get(&id).cloned())
    }

    async fn by_owner(
        &self,
        owner: &str,
        skip: usize,
        limit: usize,
    ) -> Result<Vec<Snippet>, StoreError> {
        let snippets = self.snippets.read().await;
        let mut owned: Vec<_> = snippets.values().filter(|s| s.owner == owner).collect();
        owned.sort_by(|a, b| a.created.cmp(&b.created).then(a.id.cmp(&b.id)));
        Ok(owned.into_iter().skip(skip).take(limit).cloned().collect())
    }

    async fn replace(&self, snippet: Snippet) -> Result<(), StoreError> {
        let mut snippets = self.snippets.write().await;
        match snippets.get_mut(&snippet.id) {
            Some(stored) => {
                *stored = snippet;
                Ok(())
            }
            None => Err(StoreError::Missing(snippet.id.to_string())),
        }
    }

    async fn delete(&self, id: Uuid) -> Result<bool, StoreError> {
        Ok(self.snippets.write().await.remove(&id).is_some())
    }
}

/// Runs code on behalf of users and keeps the results
#[derive(Debug, Clone)]
pub struct Snippets {
    store: Arc<dyn SnippetStore>,
    registry: LanguageRegistry,
    runner: Runner,
}

impl Snippets {
    pub fn new(store: Arc<dyn SnippetStore>, registry: LanguageRegistry, runner: Runner) -> Self {
        Self {
            store,
            registry,
            runner,
        }
    }

    async fn run(
        &self,
        language: &str,
        version: &str,
        code: &str,
    ) -> Result<ExecutionResult, SnippetError> {
        if code.chars().count() < MIN_CODE_LEN {
            return Err(SnippetError::InvalidCode);
        }
        let language = self.registry.get(language).await?;
        Ok(self.runner.execute(&language, version, code).await?)
    }

    /// Run `code` and store it with its result
    #[instrument(skip(self, code), fields(code_len = code.len()))]
    pub async fn create(
        &self,
        owner: &str,
        language: &str,
        version: &str,
        code: &str,
    ) -> Result<Snippet, SnippetError> {
        let result = self.run(language, version, code).await?;

        let now = Utc::now();
        let snippet = Snippet {
            id: Uuid::new_v4(),
            owner: owner.to_owned(),
            language: language.to_owned(),
            version: version.to_owned(),
            code: code.to_owned(),
            result,
            created: now,
            updated: now,
        };
        self.store.insert(snippet.clone()).await?;
        debug!(id = %snippet.id, "snippet stored");
        Ok(snippet)
    }

    /// One page of `owner`'s snippets, oldest first; pages start at 0
    pub async fn list(
        &self,
        owner: &str,
        page: usize,
        per_page: Option<usize>,
    ) -> Result<Vec<Snippet>, SnippetError> {
        let per_page = per_page.unwrap_or(DEFAULT_PER_PAGE);
        let skip = page.saturating_mul(per_page);
        Ok(self.store.by_owner(owner, skip, per_page).await?)
    }

    pub async fn get(&self, id: Uuid, owner: &str) -> Result<Snippet, SnippetError> {
        match self.store.find(id).await? {
            Some(snippet) if snippet.owner == owner => Ok(snippet),
            _ => Err(SnippetError::NotFound(id)),
        }
    }

    /// Apply `patch`, running the code again if anything it depends on changed
    #[instrument(skip(self, patch))]
    pub async fn update(
        &self,
        id: Uuid,
        owner: &str,
        patch: SnippetPatch,
    ) -> Result<Snippet, SnippetError> {
        let mut snippet = self.get(id, owner).await?;
        if patch.is_empty() {
            return Ok(snippet);
        }

        let language = patch.language.unwrap_or_else(|| snippet.language.clone());
        let version = patch.version.unwrap_or_else(|| snippet.version.clone());
        let code = patch.code.unwrap_or_else(|| snippet.code.clone());

        let changed =
            language != snippet.language || version != snippet.version || code != snippet.code;
        if !changed {
            return Ok(snippet);
        }

        snippet.result = self.run(&language, &version, &code).await?;
        snippet.language = language;
        snippet.version = version;
        snippet.code = code;
        snippet.updated = Utc::now();

        self.store.replace(snippet.clone()).await?;
        debug!("snippet updated");
        Ok(snippet)
    }

    pub async fn delete(&self, id: Uuid, owner: &str) -> Result<(), SnippetError> {
        self.get(id, owner).await?;
        if !self.store.delete(id).await? {
            return Err(SnippetError::NotFound(id));
        }
        Ok(())
    }
}
