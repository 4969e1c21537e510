// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Application-facing storage facade.
//
// `StorageService` is what application code talks to. It converts between
// typed values and JSON at the boundary, optionally validates what it reads
// against a caller-supplied schema, and offers fire-and-forget variants of
// the write operations for callers that do not want to wait on them.

use std::future::Future;
use std::sync::Arc;

use futures::FutureExt;
use keystash_storage::engine::EmbeddedEngine;
use keystash_storage::{
    EmbeddedDatabaseBackend, Operation, StorageBackend, StorageConfig, StorageError,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::{ServiceError, ServiceResult};
use crate::schema::JsonSchemaValidator;
use crate::validation::{SchemaValidator, ValidationAdapter};

/// Per-read options.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ItemOptions {
    /// JSON schema the stored value must satisfy. Absent values are never
    /// validated.
    pub schema: Option<Value>,
}

impl ItemOptions {
    pub fn with_schema(schema: Value) -> Self {
        Self {
            schema: Some(schema),
        }
    }
}

/// Typed key-value storage with read-time schema validation.
///
/// # Example
///
/// ```rust
/// use keystash_service::{ItemOptions, StorageService};
/// use keystash_storage::engine::memory::MemoryEngine;
/// use keystash_storage::StorageConfig;
/// use serde_json::json;
///
/// # tokio_test::block_on(async {
/// let service = StorageService::embedded(MemoryEngine::new(), StorageConfig::default());
/// service.set_item("count", &3u32).await.unwrap();
///
/// let options = ItemOptions::with_schema(json!({"type": "integer", "minimum": 0}));
/// let count: Option<u32> = service.get_item_with("count", &options).await.unwrap();
/// assert_eq!(count, Some(3));
/// # });
/// ```
#[derive(Clone)]
pub struct StorageService {
    backend: Arc<dyn StorageBackend>,
    validation: ValidationAdapter,
}

impl StorageService {
    /// Serve from `backend`, validating with [`JsonSchemaValidator`].
    pub fn new(backend: Arc<dyn StorageBackend>) -> Self {
        Self::with_validator(backend, Arc::new(JsonSchemaValidator))
    }

    /// Serve from `backend`, validating with `validator`.
    pub fn with_validator(
        backend: Arc<dyn StorageBackend>,
        validator: Arc<dyn SchemaValidator>,
    ) -> Self {
        Self {
            backend,
            validation: ValidationAdapter::new(validator),
        }
    }

    /// Serve from an [`EmbeddedDatabaseBackend`] over `engine`.
    ///
    /// Must be called inside a Tokio runtime.
    pub fn embedded<E: EmbeddedEngine>(engine: E, config: StorageConfig) -> Self {
        Self::new(Arc::new(EmbeddedDatabaseBackend::new(engine, config)))
    }

    /// The backend this service delegates to.
    pub fn backend(&self) -> &Arc<dyn StorageBackend> {
        &self.backend
    }

    /// Read `key` as a `T`, or `None` if absent.
    pub async fn get_item<T: DeserializeOwned>(&self, key: &str) -> ServiceResult<Option<T>> {
        self.get_item_with(key, &ItemOptions::default()).await
    }

    /// Read `key` as a `T`, validating the stored value against
    /// `options.schema` when one is given.
    pub async fn get_item_with<T: DeserializeOwned>(
        &self,
        key: &str,
        options: &ItemOptions,
    ) -> ServiceResult<Option<T>> {
        let Some(value) = self.backend.get_item(key).await? else {
            return Ok(None);
        };
        if let Some(schema) = &options.schema {
            self.validation.check(key, &value, schema)?;
        }
        serde_json::from_value(value)
            .map(Some)
            .map_err(|err| {
                StorageError::Deserialization {
                    key: key.to_string(),
                    message: err.to_string(),
                }
                .into()
            })
    }

    /// Store `value` under `key`. A value that serializes to `null` (such as
    /// `None`) is a successful no-op.
    pub async fn set_item<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> ServiceResult<()> {
        let value = to_json(value)?;
        self.backend.set_item(key, value).await?;
        Ok(())
    }

    pub async fn remove_item(&self, key: &str) -> ServiceResult<()> {
        self.backend.remove_item(key).await?;
        Ok(())
    }

    pub async fn clear(&self) -> ServiceResult<()> {
        self.backend.clear().await?;
        Ok(())
    }

    pub async fn keys(&self) -> ServiceResult<Vec<String>> {
        Ok(self.backend.keys().await?)
    }

    pub async fn has(&self, key: &str) -> ServiceResult<bool> {
        Ok(self.backend.has(key).await?)
    }

    pub async fn len(&self) -> ServiceResult<usize> {
        Ok(self.backend.len().await?)
    }

    pub async fn is_empty(&self) -> ServiceResult<bool> {
        Ok(self.len().await? == 0)
    }

    /// Fire-and-forget [`set_item`](Self::set_item). The write is issued
    /// before this returns; failures are logged and never surfaced.
    pub fn set_item_subscribe<T: Serialize + ?Sized>(&self, key: &str, value: &T) {
        let value = match to_json(value) {
            Ok(value) => value,
            Err(err) => {
                warn!(key = %key, error = %err, "Dropping unserializable fire-and-forget write");
                return;
            }
        };
        let backend = Arc::clone(&self.backend);
        let owned = key.to_string();
        detach(Operation::Set, key, async move {
            backend.set_item(&owned, value).await
        });
    }

    /// Fire-and-forget [`remove_item`](Self::remove_item).
    pub fn remove_item_subscribe(&self, key: &str) {
        let backend = Arc::clone(&self.backend);
        let owned = key.to_string();
        detach(Operation::Remove, key, async move {
            backend.remove_item(&owned).await
        });
    }

    /// Fire-and-forget [`clear`](Self::clear).
    pub fn clear_subscribe(&self) {
        let backend = Arc::clone(&self.backend);
        detach(Operation::Clear, "*", async move { backend.clear().await });
    }
}

impl std::fmt::Debug for StorageService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageService")
            .field("backend", &self.backend.name())
            .finish_non_exhaustive()
    }
}

fn to_json<T: Serialize + ?Sized>(value: &T) -> ServiceResult<Value> {
    serde_json::to_value(value).map_err(|err| ServiceError::Serialization(err.to_string()))
}

/// Poll `work` once so the operation is issued now, then let it finish in
/// the background.
fn detach<F>(operation: Operation, key: &str, work: F)
where
    F: Future<Output = Result<(), StorageError>> + Send + 'static,
{
    let mut work = Box::pin(work);
    if let Some(result) = (&mut work).now_or_never() {
        report(operation, key, result);
        return;
    }
    let key = key.to_string();
    match tokio::runtime::Handle::try_current() {
        Ok(runtime) => {
            runtime.spawn(async move { report(operation, &key, work.await) });
        }
        Err(_) => {
            // Already issued; only its outcome goes unobserved.
            debug!(operation = %operation, key = %key, "No runtime to await fire-and-forget result");
        }
    }
}

fn report(operation: Operation, key: &str, result: Result<(), StorageError>) {
    if let Err(err) = result {
        warn!(operation = %operation, key = %key, error = %err, "Fire-and-forget storage operation failed");
    }
}
