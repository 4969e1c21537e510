// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Synchronous fallback backend for Keystash.
//
// Wraps a purely synchronous string key-value store behind the asynchronous
// `StorageBackend` contract. Every call completes without suspending. Values
// cross the boundary as JSON text: serialized on write, parsed on read, and a
// stored payload that no longer parses surfaces as a `Deserialization` error
// instead of a panic.
//
// Keys can be namespaced with a prefix so several logical stores share one
// synchronous store without collisions; with prefix `p` the physical key of
// `k` is `p_k`, and `keys`, `len` and `clear` only see that namespace.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use crate::backend::StorageBackend;
use crate::error::{Operation, StorageError, StorageResult};

/// A failure reported by a synchronous key-value store.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct SyncStoreError(pub String);

/// A synchronous string key-value store.
pub trait SyncKeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, SyncStoreError>;
    fn set(&self, key: &str, value: &str) -> Result<(), SyncStoreError>;
    fn remove(&self, key: &str) -> Result<(), SyncStoreError>;
    fn clear(&self) -> Result<(), SyncStoreError>;
    /// Every physical key currently stored.
    fn keys(&self) -> Result<Vec<String>, SyncStoreError>;
}

/// [`StorageBackend`] over a [`SyncKeyValueStore`].
///
/// # Example
///
/// ```rust
/// use keystash_storage::{FallbackBackend, MemoryKeyValueStore, StorageBackend};
///
/// # tokio_test::block_on(async {
/// let backend = FallbackBackend::new(MemoryKeyValueStore::new()).with_prefix("app");
/// backend.set_item("theme", serde_json::json!("dark")).await.unwrap();
/// assert_eq!(backend.keys().await.unwrap(), vec!["theme".to_string()]);
/// # });
/// ```
#[derive(Clone)]
pub struct FallbackBackend {
    store: Arc<dyn SyncKeyValueStore>,
    prefix: Option<String>,
}

impl FallbackBackend {
    /// Wrap `store` with no key prefix.
    pub fn new(store: impl SyncKeyValueStore + 'static) -> Self {
        Self::from_shared(Arc::new(store))
    }

    /// Wrap a store that may be shared with other backends.
    pub fn from_shared(store: Arc<dyn SyncKeyValueStore>) -> Self {
        Self {
            store,
            prefix: None,
        }
    }

    /// Namespace every key with `prefix`. An empty prefix means none.
    pub fn with_prefix(mut self, prefix: &str) -> Self {
        self.prefix = (!prefix.is_empty()).then(|| format!("{prefix}_"));
        self
    }

    fn physical_key(&self, key: &str) -> String {
        match &self.prefix {
            Some(prefix) => format!("{prefix}{key}"),
            None => key.to_string(),
        }
    }

    fn logical_key(&self, physical: String) -> Option<String> {
        match &self.prefix {
            Some(prefix) => physical.strip_prefix(prefix.as_str()).map(str::to_string),
            None => Some(physical),
        }
    }

    fn fail(operation: Operation) -> impl Fn(SyncStoreError) -> StorageError {
        move |err| StorageError::Fallback {
            operation,
            message: err.0,
        }
    }

    pub(crate) fn get_now(&self, key: &str) -> StorageResult<Option<Value>> {
        let raw = self
            .store
            .get(&self.physical_key(key))
            .map_err(Self::fail(Operation::Get))?;
        match raw {
            Some(text) => serde_json::from_str(&text)
                .map(Some)
                .map_err(|err| StorageError::Deserialization {
                    key: key.to_string(),
                    message: err.to_string(),
                }),
            None => Ok(None),
        }
    }

    pub(crate) fn set_now(&self, key: &str, value: &Value) -> StorageResult<()> {
        if value.is_null() {
            return Ok(());
        }
        let text = serde_json::to_string(value)
            .map_err(|err| StorageError::Serialization(err.to_string()))?;
        self.store
            .set(&self.physical_key(key), &text)
            .map_err(Self::fail(Operation::Set))
    }

    pub(crate) fn remove_now(&self, key: &str) -> StorageResult<()> {
        self.store
            .remove(&self.physical_key(key))
            .map_err(Self::fail(Operation::Remove))
    }

    pub(crate) fn clear_now(&self) -> StorageResult<()> {
        if self.prefix.is_none() {
            return self.store.clear().map_err(Self::fail(Operation::Clear));
        }
        // Only this namespace is cleared; other prefixes share the store.
        for key in self.keys_now_for(Operation::Clear)? {
            self.store
                .remove(&self.physical_key(&key))
                .map_err(Self::fail(Operation::Clear))?;
        }
        Ok(())
    }

    pub(crate) fn keys_now(&self) -> StorageResult<Vec<String>> {
        self.keys_now_for(Operation::Keys)
    }

    fn keys_now_for(&self, operation: Operation) -> StorageResult<Vec<String>> {
        let physical = self.store.keys().map_err(Self::fail(operation))?;
        Ok(physical
            .into_iter()
            .filter_map(|key| self.logical_key(key))
            .collect())
    }

    pub(crate) fn has_now(&self, key: &str) -> StorageResult<bool> {
        self.store
            .get(&self.physical_key(key))
            .map(|raw| raw.is_some())
            .map_err(Self::fail(Operation::Has))
    }

    pub(crate) fn len_now(&self) -> StorageResult<usize> {
        self.keys_now_for(Operation::Len).map(|keys| keys.len())
    }
}

impl std::fmt::Debug for FallbackBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FallbackBackend")
            .field("prefix", &self.prefix)
            .finish()
    }
}

#[async_trait]
impl StorageBackend for FallbackBackend {
    async fn get_item(&self, key: &str) -> Result<Option<Value>, StorageError> {
        self.get_now(key)
    }

    async fn set_item(&self, key: &str, value: Value) -> Result<(), StorageError> {
        self.set_now(key, &value)
    }

    async fn remove_item(&self, key: &str) -> Result<(), StorageError> {
        self.remove_now(key)
    }

    async fn clear(&self) -> Result<(), StorageError> {
        self.clear_now()
    }

    async fn keys(&self) -> Result<Vec<String>, StorageError> {
        self.keys_now()
    }

    async fn has(&self, key: &str) -> Result<bool, StorageError> {
        self.has_now(key)
    }

    async fn len(&self) -> Result<usize, StorageError> {
        self.len_now()
    }

    fn name(&self) -> &str {
        "fallback"
    }
}
