// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// In-memory embedded engine for Keystash.
//
// Databases live in process memory, keyed by name, each holding a set of
// object stores backed by sorted `BTreeMap`s. Every connection owns one worker
// thread that serves its transactions strictly in creation order. Read-write
// transactions operate on a staged copy that replaces the store on commit, so
// an aborted transaction leaves no trace.
//
// The engine can be configured to refuse opening, to lack bulk key
// enumeration, or to invalidate its open connections, which lets callers
// exercise every path of the primary backend without a real database.

use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use serde_json::Value;
use tokio::sync::mpsc;
use tracing::debug;

use super::{
    serve_transaction, EmbeddedEngine, EngineConnection, ObjectStoreAccess, OpenRequest,
    PendingRequest, SchemaUpgrade, Transaction, TransactionMode, TransactionOutcome,
    TransactionReceiver, UpgradeHandler,
};
use crate::error::{EngineError, EngineErrorKind};

type Entries = BTreeMap<String, Value>;

#[derive(Debug, Default)]
struct MemoryDatabase {
    version: u32,
    stores: BTreeMap<String, Entries>,
}

type SharedDatabase = Arc<Mutex<MemoryDatabase>>;

fn lock(database: &SharedDatabase) -> MutexGuard<'_, MemoryDatabase> {
    database
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// An embedded engine whose databases live in process memory.
///
/// Clones share the same databases.
///
/// # Example
///
/// ```rust
/// use keystash_storage::engine::memory::MemoryEngine;
/// use keystash_storage::{EmbeddedDatabaseBackend, StorageBackend, StorageConfig};
///
/// # tokio_test::block_on(async {
/// let backend = EmbeddedDatabaseBackend::new(MemoryEngine::new(), StorageConfig::default());
/// backend.set_item("hello", serde_json::json!("world")).await.unwrap();
/// assert_eq!(
///     backend.get_item("hello").await.unwrap(),
///     Some(serde_json::json!("world"))
/// );
/// # });
/// ```
#[derive(Debug, Clone)]
pub struct MemoryEngine {
    databases: Arc<Mutex<HashMap<String, SharedDatabase>>>,
    bulk_keys: bool,
    refusal: Option<String>,
    invalidated: Arc<AtomicBool>,
}

impl MemoryEngine {
    /// Create an engine with no databases.
    pub fn new() -> Self {
        Self {
            databases: Arc::new(Mutex::new(HashMap::new())),
            bulk_keys: true,
            refusal: None,
            invalidated: Arc::new(AtomicBool::new(false)),
        }
    }

    /// An engine that refuses every open synchronously with `reason`.
    pub fn unavailable(reason: &str) -> Self {
        Self {
            refusal: Some(reason.to_string()),
            ..Self::new()
        }
    }

    /// Disable `get_all_keys`, forcing key enumeration through cursors.
    pub fn without_bulk_keys(mut self) -> Self {
        self.bulk_keys = false;
        self
    }

    /// Make every connection opened by this engine unusable: creating a
    /// transaction on them fails with `InvalidState` from now on.
    pub fn invalidate_connections(&self) {
        self.invalidated.store(true, Ordering::SeqCst);
    }

    /// Stored schema version of `database`, if it exists.
    pub fn database_version(&self, database: &str) -> Option<u32> {
        let databases = self
            .databases
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        databases.get(database).map(|db| lock(db).version)
    }

    fn database(&self, name: &str) -> SharedDatabase {
        let mut databases = self
            .databases
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        Arc::clone(databases.entry(name.to_string()).or_default())
    }
}

impl Default for MemoryEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl EmbeddedEngine for MemoryEngine {
    fn name(&self) -> &str {
        "memory"
    }

    fn open(
        &self,
        database: &str,
        version: u32,
        upgrade: UpgradeHandler,
    ) -> Result<OpenRequest, EngineError> {
        if let Some(reason) = &self.refusal {
            return Err(EngineError::unavailable(reason.clone()));
        }

        let shared = self.database(database);
        let (responder, pending) = PendingRequest::channel();
        let (queue_tx, mut queue_rx) = mpsc::unbounded_channel::<TransactionReceiver>();
        let name = database.to_string();
        let bulk_keys = self.bulk_keys;
        let invalidated = Arc::clone(&self.invalidated);

        std::thread::Builder::new()
            .name(format!("keystash-memory-{name}"))
            .spawn(move || {
                let stores = match open_database(&shared, version, upgrade) {
                    Ok(stores) => stores,
                    Err(err) => {
                        responder.fail(err);
                        return;
                    }
                };
                let connection: Arc<dyn EngineConnection> = Arc::new(MemoryConnection {
                    database: name.clone(),
                    version,
                    stores,
                    queue: queue_tx,
                    bulk_keys,
                    invalidated,
                });
                responder.succeed(connection);

                while let Some(mut receiver) = queue_rx.blocking_recv() {
                    run_transaction(&shared, &mut receiver, bulk_keys);
                }
                debug!(database = %name, "memory engine worker stopped");
            })
            .map_err(|e| EngineError::internal(format!("failed to spawn engine worker: {e}")))?;

        Ok(pending)
    }
}

/// Apply the open/upgrade sequence; returns the store names on success.
fn open_database(
    shared: &SharedDatabase,
    version: u32,
    upgrade: UpgradeHandler,
) -> Result<Vec<String>, EngineError> {
    let mut db = lock(shared);
    if version < db.version {
        return Err(EngineError::new(
            EngineErrorKind::Internal,
            format!(
                "requested version {version} is lower than the stored version {}",
                db.version
            ),
        ));
    }
    if version > db.version {
        let mut staged = MemoryUpgrade {
            old_version: db.version,
            stores: db.stores.clone(),
        };
        upgrade(&mut staged)?;
        db.stores = staged.stores;
        db.version = version;
    }
    Ok(db.stores.keys().cloned().collect())
}

fn run_transaction(shared: &SharedDatabase, receiver: &mut TransactionReceiver, bulk_keys: bool) {
    let mut db = lock(shared);
    let Some(entries) = db.stores.get_mut(receiver.store()) else {
        let missing = format!("object store '{}' does not exist", receiver.store());
        while let Some(request) = receiver.blocking_next() {
            request.fail(EngineError::new(EngineErrorKind::NotFound, missing.clone()));
        }
        return;
    };

    match receiver.mode() {
        TransactionMode::ReadOnly => {
            let mut access = MemoryAccess { entries, bulk_keys };
            finish(serve_transaction(receiver, &mut access));
        }
        TransactionMode::ReadWrite => {
            let mut staged = entries.clone();
            let mut access = MemoryAccess {
                entries: &mut staged,
                bulk_keys,
            };
            let outcome = serve_transaction(receiver, &mut access);
            if matches!(outcome, TransactionOutcome::Commit(_)) {
                *entries = staged;
            }
            finish(outcome);
        }
    }
}

fn finish(outcome: TransactionOutcome) {
    match outcome {
        TransactionOutcome::Commit(Some(responder)) => responder.succeed(()),
        TransactionOutcome::Abort(err, Some(responder)) => responder.fail(err),
        TransactionOutcome::Commit(None) | TransactionOutcome::Abort(_, None) => {}
    }
}

struct MemoryUpgrade {
    old_version: u32,
    stores: BTreeMap<String, Entries>,
}

impl SchemaUpgrade for MemoryUpgrade {
    fn old_version(&self) -> u32 {
        self.old_version
    }

    fn object_store_names(&self) -> Vec<String> {
        self.stores.keys().cloned().collect()
    }

    fn create_object_store(&mut self, name: &str) -> Result<(), EngineError> {
        if self.stores.contains_key(name) {
            return Err(EngineError::new(
                EngineErrorKind::Constraint,
                format!("object store '{name}' already exists"),
            ));
        }
        self.stores.insert(name.to_string(), Entries::new());
        Ok(())
    }
}

struct MemoryAccess<'a> {
    entries: &'a mut Entries,
    bulk_keys: bool,
}

impl ObjectStoreAccess for MemoryAccess<'_> {
    fn get(&mut self, key: &str) -> Result<Option<Value>, EngineError> {
        Ok(self.entries.get(key).cloned())
    }

    fn contains(&mut self, key: &str) -> Result<bool, EngineError> {
        Ok(self.entries.contains_key(key))
    }

    fn put(&mut self, key: &str, value: &Value) -> Result<(), EngineError> {
        self.entries.insert(key.to_string(), value.clone());
        Ok(())
    }

    fn delete(&mut self, key: &str) -> Result<(), EngineError> {
        self.entries.remove(key);
        Ok(())
    }

    fn clear(&mut self) -> Result<(), EngineError> {
        self.entries.clear();
        Ok(())
    }

    fn count(&mut self) -> Result<usize, EngineError> {
        Ok(self.entries.len())
    }

    fn keys(&mut self) -> Result<Vec<String>, EngineError> {
        if !self.bulk_keys {
            return Err(EngineError::internal("get_all_keys is not supported"));
        }
        Ok(self.entries.keys().cloned().collect())
    }

    fn key_after(&mut self, after: Option<&str>) -> Result<Option<String>, EngineError> {
        let lower = match after {
            Some(key) => Bound::Excluded(key),
            None => Bound::Unbounded,
        };
        Ok(self
            .entries
            .range::<str, _>((lower, Bound::Unbounded))
            .next()
            .map(|(key, _)| key.clone()))
    }
}

/// Connection to an in-memory database.
#[derive(Debug)]
struct MemoryConnection {
    database: String,
    version: u32,
    stores: Vec<String>,
    queue: mpsc::UnboundedSender<TransactionReceiver>,
    bulk_keys: bool,
    invalidated: Arc<AtomicBool>,
}

impl EngineConnection for MemoryConnection {
    fn database(&self) -> &str {
        &self.database
    }

    fn version(&self) -> u32 {
        self.version
    }

    fn object_store_names(&self) -> Vec<String> {
        self.stores.clone()
    }

    fn transaction(&self, store: &str, mode: TransactionMode) -> Result<Transaction, EngineError> {
        if self.invalidated.load(Ordering::SeqCst) {
            return Err(EngineError::invalid_state(format!(
                "connection to '{}' is closing",
                self.database
            )));
        }
        if !self.stores.iter().any(|name| name == store) {
            return Err(EngineError::new(
                EngineErrorKind::NotFound,
                format!("object store '{store}' does not exist"),
            ));
        }
        let (transaction, receiver) = Transaction::new(store, mode);
        self.queue
            .send(receiver)
            .map_err(|_| EngineError::invalid_state("engine worker has stopped"))?;
        Ok(transaction)
    }

    fn supports_get_all_keys(&self) -> bool {
        self.bulk_keys
    }
}
