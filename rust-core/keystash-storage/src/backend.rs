// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Core storage backend trait for Keystash.
//
// Defines the `StorageBackend` contract that the embedded-database backend
// and the synchronous fallback both satisfy. Values are JSON documents; keys
// are strings unique within one logical store.

use async_trait::async_trait;
use serde_json::Value;

use crate::error::StorageError;

/// A pluggable asynchronous key-value storage backend.
///
/// Every method settles exactly once with either a value or a failure.
/// Absence of a key is never an error: [`get_item`](Self::get_item) returns
/// `Ok(None)` and [`has`](Self::has) returns `Ok(false)`.
///
/// Implementations must be safe to share across threads and tokio tasks.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Retrieve the value stored under `key`, or `None` if absent.
    async fn get_item(&self, key: &str) -> Result<Option<Value>, StorageError>;

    /// Store `value` under `key`, replacing any previous value atomically.
    ///
    /// Storing `Value::Null` is a successful no-op: nothing is written and an
    /// existing entry is left untouched.
    async fn set_item(&self, key: &str, value: Value) -> Result<(), StorageError>;

    /// Delete `key`. Succeeds whether or not the key existed.
    async fn remove_item(&self, key: &str) -> Result<(), StorageError>;

    /// Delete every entry of this store.
    async fn clear(&self) -> Result<(), StorageError>;

    /// All keys currently stored, read from one consistent snapshot.
    async fn keys(&self) -> Result<Vec<String>, StorageError>;

    /// Check whether `key` exists without retrieving its value.
    async fn has(&self, key: &str) -> Result<bool, StorageError>;

    /// Number of entries currently stored.
    async fn len(&self) -> Result<usize, StorageError>;

    /// A human-readable name for this backend, used in logging.
    fn name(&self) -> &str;
}
