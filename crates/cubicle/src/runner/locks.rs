//! Per-image reader/writer locks
//!
//! Executions hold the read side of their (language, version) pair while the
//! container runs. Installing or removing that image takes the write side, so
//! an image is never removed out from under a running program.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::{OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock};
use tracing::debug;

type Key = (String, String);

/// Shared table of image locks; clones refer to the same table
#[derive(Debug, Clone, Default)]
pub struct ImageLocks {
    inner: Arc<Mutex<HashMap<Key, Arc<RwLock<()>>>>>,
}

impl ImageLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_for(&self, language: &str, version: &str) -> Arc<RwLock<()>> {
        let mut table = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        table
            .entry((language.to_owned(), version.to_owned()))
            .or_default()
            .clone()
    }

    /// Share the image with other executions
    pub async fn read(&self, language: &str, version: &str) -> OwnedRwLockReadGuard<()> {
        self.lock_for(language, version).read_owned().await
    }

    /// Take the image exclusively, waiting for running executions to finish
    pub async fn write(&self, language: &str, version: &str) -> OwnedRwLockWriteGuard<()> {
        let guard = self.lock_for(language, version).write_owned().await;
        debug!(language, version, "image lock acquired");
        guard
    }

    /// Drop table entries nobody holds
    pub fn prune(&self) {
        let mut table = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        table.retain(|_, lock| Arc::strong_count(lock) > 1);
    }

    /// Number of pairs currently tracked
    pub fn len(&self) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
