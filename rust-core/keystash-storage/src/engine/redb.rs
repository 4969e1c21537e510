// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// redb-backed embedded engine for Keystash.
//
// Uses redb (pure Rust, B-tree, ACID, single-file database) as the persistent
// engine behind the primary backend.
//
// # Design
//
// - One redb file per database: `{data_dir}/{database}.redb`.
// - One redb table per object store, named `store:{name}`. Values are the
//   JSON encoding of the stored document.
// - `keystash:meta` records the schema version; `keystash:stores` lists the
//   object stores created by upgrades.
// - Each connection owns a worker thread that serves transactions in creation
//   order: read-only transactions map to redb read transactions, read-write
//   ones to a single redb write transaction committed on `commit`.

use std::fmt;
use std::ops::Bound;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use redb::{
    Database, ReadableDatabase, ReadableTable, Table, TableDefinition, WriteTransaction,
};
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::{
    serve_transaction, EmbeddedEngine, EngineConnection, ObjectStoreAccess, OpenRequest,
    PendingRequest, SchemaUpgrade, Transaction, TransactionMode, TransactionOutcome,
    TransactionReceiver, UpgradeHandler,
};
use crate::config::StorageConfig;
use crate::error::{EngineError, EngineErrorKind};

const META_TABLE: TableDefinition<&str, u64> = TableDefinition::new("keystash:meta");
const STORES_TABLE: TableDefinition<&str, u64> = TableDefinition::new("keystash:stores");
const VERSION_KEY: &str = "version";

type EntryTable<'a> = TableDefinition<'a, &'static str, &'static [u8]>;

fn table_name(store: &str) -> String {
    format!("store:{store}")
}

fn internal<E: fmt::Display>(context: &str) -> impl Fn(E) -> EngineError + '_ {
    move |e| EngineError::internal(format!("{context}: {e}"))
}

/// A persistent embedded engine powered by redb.
///
/// # Example
///
/// ```rust,no_run
/// use keystash_storage::engine::redb::RedbEngine;
/// use keystash_storage::{EmbeddedDatabaseBackend, StorageBackend, StorageConfig};
///
/// # tokio_test::block_on(async {
/// let engine = RedbEngine::new("/tmp/keystash");
/// let backend = EmbeddedDatabaseBackend::new(engine, StorageConfig::default());
/// backend.set_item("hello", serde_json::json!("world")).await.unwrap();
/// # });
/// ```
#[derive(Debug, Clone)]
pub struct RedbEngine {
    data_dir: PathBuf,
}

impl RedbEngine {
    /// Create an engine storing its database files under `data_dir`.
    pub fn new(data_dir: impl AsRef<Path>) -> Self {
        Self {
            data_dir: data_dir.as_ref().to_path_buf(),
        }
    }

    /// Create an engine under `config.data_dir`.
    ///
    /// Fails with `Unavailable` when no data directory is configured.
    pub fn from_config(config: &StorageConfig) -> Result<Self, EngineError> {
        config
            .data_dir
            .as_deref()
            .map(Self::new)
            .ok_or_else(|| EngineError::unavailable("no data_dir configured for the redb engine"))
    }

    /// Directory holding the database files.
    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Path of the file backing `database`.
    pub fn database_path(&self, database: &str) -> PathBuf {
        self.data_dir.join(format!("{database}.redb"))
    }
}

impl EmbeddedEngine for RedbEngine {
    fn name(&self) -> &str {
        "redb"
    }

    fn open(
        &self,
        database: &str,
        version: u32,
        upgrade: UpgradeHandler,
    ) -> Result<OpenRequest, EngineError> {
        std::fs::create_dir_all(&self.data_dir).map_err(|e| {
            EngineError::unavailable(format!(
                "cannot create data directory {}: {e}",
                self.data_dir.display()
            ))
        })?;

        let path = self.database_path(database);
        let name = database.to_string();
        let (responder, pending) = PendingRequest::channel();
        let (queue_tx, mut queue_rx) = mpsc::unbounded_channel::<TransactionReceiver>();

        std::thread::Builder::new()
            .name(format!("keystash-redb-{name}"))
            .spawn(move || {
                let (db, stores) = match open_database(&path, version, upgrade) {
                    Ok(opened) => opened,
                    Err(err) => {
                        responder.fail(err);
                        return;
                    }
                };
                debug!(path = %path.display(), version, "opened redb database");

                let connection: Arc<dyn EngineConnection> = Arc::new(RedbConnection {
                    database: name.clone(),
                    version,
                    stores,
                    queue: queue_tx,
                });
                responder.succeed(connection);

                while let Some(mut receiver) = queue_rx.blocking_recv() {
                    run_transaction(&db, &mut receiver);
                }
                debug!(database = %name, "redb engine worker stopped");
            })
            .map_err(|e| EngineError::internal(format!("failed to spawn engine worker: {e}")))?;

        Ok(pending)
    }
}

/// Create or open the database file and run the upgrade if needed.
fn open_database(
    path: &Path,
    version: u32,
    upgrade: UpgradeHandler,
) -> Result<(Database, Vec<String>), EngineError> {
    let db = Database::create(path).map_err(|e| {
        EngineError::unavailable(format!("failed to open redb at {}: {e}", path.display()))
    })?;

    let txn = db
        .begin_write()
        .map_err(internal("write txn"))?;
    let old_version = read_version(&txn)?;

    if version < old_version {
        abort_or_warn(txn);
        return Err(EngineError::new(
            EngineErrorKind::Internal,
            format!("requested version {version} is lower than the stored version {old_version}"),
        ));
    }

    if version > old_version {
        let mut schema = RedbUpgrade {
            txn: &txn,
            old_version,
            stores: read_store_names(&txn)?,
        };
        if let Err(err) = upgrade(&mut schema) {
            abort_or_warn(txn);
            return Err(err);
        }
        let stores = schema.stores;
        {
            let mut meta = txn
                .open_table(META_TABLE)
                .map_err(internal("open meta table"))?;
            meta.insert(VERSION_KEY, u64::from(version))
                .map_err(internal("write version"))?;
        }
        txn.commit()
            .map_err(internal("commit upgrade"))?;
        return Ok((db, stores));
    }

    let stores = read_store_names(&txn)?;
    txn.abort().map_err(internal("abort"))?;
    Ok((db, stores))
}

fn abort_or_warn(txn: WriteTransaction) {
    if let Err(err) = txn.abort() {
        warn!(error = %err, "redb transaction abort failed");
    }
}

fn read_version(txn: &WriteTransaction) -> Result<u32, EngineError> {
    let meta = txn
        .open_table(META_TABLE)
        .map_err(internal("open meta table"))?;
    let stored = meta
        .get(VERSION_KEY)
        .map_err(internal("read version"))?
        .map(|guard| guard.value())
        .unwrap_or(0);
    u32::try_from(stored)
        .map_err(|_| EngineError::new(EngineErrorKind::Data, "stored version out of range"))
}

fn read_store_names(txn: &WriteTransaction) -> Result<Vec<String>, EngineError> {
    let stores = txn
        .open_table(STORES_TABLE)
        .map_err(internal("open stores table"))?;
    let mut names = Vec::new();
    for entry in stores
        .iter()
        .map_err(internal("list stores"))?
    {
        let (name, _) = entry.map_err(internal("list stores"))?;
        names.push(name.value().to_string());
    }
    Ok(names)
}

struct RedbUpgrade<'a> {
    txn: &'a WriteTransaction,
    old_version: u32,
    stores: Vec<String>,
}

impl SchemaUpgrade for RedbUpgrade<'_> {
    fn old_version(&self) -> u32 {
        self.old_version
    }

    fn object_store_names(&self) -> Vec<String> {
        self.stores.clone()
    }

    fn create_object_store(&mut self, name: &str) -> Result<(), EngineError> {
        if self.has_object_store(name) {
            return Err(EngineError::new(
                EngineErrorKind::Constraint,
                format!("object store '{name}' already exists"),
            ));
        }
        let table = table_name(name);
        self.txn
            .open_table(EntryTable::new(&table))
            .map_err(internal("create object store"))?;
        let mut stores = self
            .txn
            .open_table(STORES_TABLE)
            .map_err(internal("open stores table"))?;
        stores
            .insert(name, u64::from(self.old_version))
            .map_err(internal("record object store"))?;
        self.stores.push(name.to_string());
        Ok(())
    }
}

fn run_transaction(db: &Database, receiver: &mut TransactionReceiver) {
    let table = table_name(receiver.store());
    let definition = EntryTable::new(&table);
    let started = match receiver.mode() {
        TransactionMode::ReadOnly => run_read(db, definition, receiver),
        TransactionMode::ReadWrite => run_write(db, definition, receiver),
    };
    if let Err(err) = started {
        warn!(store = receiver.store(), error = %err, "redb transaction could not start");
        while let Some(request) = receiver.blocking_next() {
            request.fail(err.clone());
        }
    }
}

fn run_read(
    db: &Database,
    definition: EntryTable<'_>,
    receiver: &mut TransactionReceiver,
) -> Result<(), EngineError> {
    let txn = db
        .begin_read()
        .map_err(internal("read txn"))?;
    let table = txn
        .open_table(definition)
        .map_err(internal("open table"))?;
    let mut access = ReadAccess { table };
    match serve_transaction(receiver, &mut access) {
        TransactionOutcome::Commit(Some(responder)) => responder.succeed(()),
        TransactionOutcome::Abort(err, Some(responder)) => responder.fail(err),
        _ => {}
    }
    Ok(())
}

fn run_write(
    db: &Database,
    definition: EntryTable<'_>,
    receiver: &mut TransactionReceiver,
) -> Result<(), EngineError> {
    let txn = db
        .begin_write()
        .map_err(internal("write txn"))?;
    let outcome = {
        let table = txn
            .open_table(definition)
            .map_err(internal("open table"))?;
        let mut access = WriteAccess { table };
        serve_transaction(receiver, &mut access)
    };

    match outcome {
        TransactionOutcome::Commit(responder) => {
            let committed = txn.commit().map_err(internal("commit"));
            match responder {
                Some(responder) => responder.settle(committed),
                None => {
                    if let Err(err) = committed {
                        warn!(error = %err, "auto-commit of redb transaction failed");
                    }
                }
            }
        }
        TransactionOutcome::Abort(err, responder) => {
            if let Err(abort_err) = txn.abort() {
                warn!(error = %abort_err, "redb transaction abort failed");
            }
            if let Some(responder) = responder {
                responder.fail(err);
            }
        }
    }
    Ok(())
}

fn encode(value: &Value) -> Result<Vec<u8>, EngineError> {
    serde_json::to_vec(value)
        .map_err(|e| EngineError::new(EngineErrorKind::Data, format!("encode value: {e}")))
}

fn decode(key: &str, bytes: &[u8]) -> Result<Value, EngineError> {
    serde_json::from_slice(bytes).map_err(|e| {
        EngineError::new(EngineErrorKind::Data, format!("decode value for '{key}': {e}"))
    })
}

fn table_get<T>(table: &T, key: &str) -> Result<Option<Value>, EngineError>
where
    T: ReadableTable<&'static str, &'static [u8]>,
{
    match table.get(key).map_err(internal("get"))? {
        Some(guard) => decode(key, guard.value()).map(Some),
        None => Ok(None),
    }
}

fn table_contains<T>(table: &T, key: &str) -> Result<bool, EngineError>
where
    T: ReadableTable<&'static str, &'static [u8]>,
{
    Ok(table
        .get(key)
        .map_err(internal("get key"))?
        .is_some())
}

fn table_count<T>(table: &T) -> Result<usize, EngineError>
where
    T: ReadableTable<&'static str, &'static [u8]>,
{
    let len = table.len().map_err(internal("count"))?;
    usize::try_from(len).map_err(|_| EngineError::internal("entry count exceeds usize"))
}

fn table_keys<T>(table: &T) -> Result<Vec<String>, EngineError>
where
    T: ReadableTable<&'static str, &'static [u8]>,
{
    let mut keys = Vec::new();
    for entry in table.iter().map_err(internal("iterate"))? {
        let (key, _) = entry.map_err(internal("iterate"))?;
        keys.push(key.value().to_string());
    }
    Ok(keys)
}

fn table_key_after<T>(table: &T, after: Option<&str>) -> Result<Option<String>, EngineError>
where
    T: ReadableTable<&'static str, &'static [u8]>,
{
    let lower = match after {
        Some(key) => Bound::Excluded(key),
        None => Bound::Unbounded,
    };
    let mut range = table
        .range::<&str>((lower, Bound::Unbounded))
        .map_err(internal("cursor"))?;
    match range.next() {
        Some(entry) => {
            let (key, _) = entry.map_err(internal("cursor"))?;
            Ok(Some(key.value().to_string()))
        }
        None => Ok(None),
    }
}

struct ReadAccess<T> {
    table: T,
}

impl<T> ObjectStoreAccess for ReadAccess<T>
where
    T: ReadableTable<&'static str, &'static [u8]>,
{
    fn get(&mut self, key: &str) -> Result<Option<Value>, EngineError> {
        table_get(&self.table, key)
    }

    fn contains(&mut self, key: &str) -> Result<bool, EngineError> {
        table_contains(&self.table, key)
    }

    fn put(&mut self, _key: &str, _value: &Value) -> Result<(), EngineError> {
        Err(read_only())
    }

    fn delete(&mut self, _key: &str) -> Result<(), EngineError> {
        Err(read_only())
    }

    fn clear(&mut self) -> Result<(), EngineError> {
        Err(read_only())
    }

    fn count(&mut self) -> Result<usize, EngineError> {
        table_count(&self.table)
    }

    fn keys(&mut self) -> Result<Vec<String>, EngineError> {
        table_keys(&self.table)
    }

    fn key_after(&mut self, after: Option<&str>) -> Result<Option<String>, EngineError> {
        table_key_after(&self.table, after)
    }
}

fn read_only() -> EngineError {
    EngineError::new(EngineErrorKind::ReadOnly, "read-only transaction")
}

struct WriteAccess<'txn> {
    table: Table<'txn, &'static str, &'static [u8]>,
}

impl ObjectStoreAccess for WriteAccess<'_> {
    fn get(&mut self, key: &str) -> Result<Option<Value>, EngineError> {
        table_get(&self.table, key)
    }

    fn contains(&mut self, key: &str) -> Result<bool, EngineError> {
        table_contains(&self.table, key)
    }

    fn put(&mut self, key: &str, value: &Value) -> Result<(), EngineError> {
        let bytes = encode(value)?;
        self.table
            .insert(key, bytes.as_slice())
            .map_err(internal("insert"))?;
        Ok(())
    }

    fn delete(&mut self, key: &str) -> Result<(), EngineError> {
        self.table
            .remove(key)
            .map_err(internal("remove"))?;
        Ok(())
    }

    fn clear(&mut self) -> Result<(), EngineError> {
        for key in table_keys(&self.table)? {
            self.table
                .remove(key.as_str())
                .map_err(internal("clear"))?;
        }
        Ok(())
    }

    fn count(&mut self) -> Result<usize, EngineError> {
        table_count(&self.table)
    }

    fn keys(&mut self) -> Result<Vec<String>, EngineError> {
        table_keys(&self.table)
    }

    fn key_after(&mut self, after: Option<&str>) -> Result<Option<String>, EngineError> {
        table_key_after(&self.table, after)
    }
}

/// Connection to a redb database file.
#[derive(Debug)]
struct RedbConnection {
    database: String,
    version: u32,
    stores: Vec<String>,
    queue: mpsc::UnboundedSender<TransactionReceiver>,
}

impl EngineConnection for RedbConnection {
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
        if !self.stores.iter().any(|name| name == store) {
            return Err(EngineError::new(
                EngineErrorKind::NotFound,
                format!("object store '{store}' does not exist"),
            ));
        }
        let (transaction, receiver) = Transaction::new(store, mode);
        self.queue
            .send(receiver)
            .map_err(|_| EngineError::invalid_state("redb worker has stopped"))?;
        Ok(transaction)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn create_store_upgrade() -> UpgradeHandler {
        Box::new(|upgrade: &mut dyn SchemaUpgrade| {
            if !upgrade.has_object_store("entries") {
                upgrade.create_object_store("entries")?;
            }
            Ok(())
        })
    }

    async fn open(engine: &RedbEngine) -> Arc<dyn EngineConnection> {
        engine
            .open("test", 1, create_store_upgrade())
            .unwrap()
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_basic_requests() {
        let dir = tempdir().unwrap();
        let engine = RedbEngine::new(dir.path());
        let connection = open(&engine).await;

        let txn = connection
            .transaction("entries", TransactionMode::ReadWrite)
            .unwrap();
        txn.add("a", serde_json::json!({"n": 1})).await.unwrap();
        txn.put("b", serde_json::json!([1, 2])).await.unwrap();
        txn.put("a", serde_json::json!({"n": 2})).await.unwrap();
        txn.commit().await.unwrap();

        let txn = connection
            .transaction("entries", TransactionMode::ReadOnly)
            .unwrap();
        assert_eq!(
            txn.get("a").await.unwrap(),
            Some(serde_json::json!({"n": 2}))
        );
        assert_eq!(txn.get_key("b").await.unwrap(), Some("b".to_string()));
        assert_eq!(txn.get_key("zz").await.unwrap(), None);
        assert_eq!(txn.count().await.unwrap(), 2);
        assert_eq!(
            txn.get_all_keys().await.unwrap(),
            vec!["a".to_string(), "b".to_string()]
        );
    }

    #[tokio::test]
    async fn test_cursor_and_clear() {
        let dir = tempdir().unwrap();
        let engine = RedbEngine::new(dir.path());
        let connection = open(&engine).await;

        let txn = connection
            .transaction("entries", TransactionMode::ReadWrite)
            .unwrap();
        for key in ["x", "y", "z"] {
            txn.put(key, Value::Bool(true)).await.unwrap();
        }
        let mut cursor = txn.open_cursor();
        let mut seen = Vec::new();
        while let Some(key) = cursor.next_key().await.unwrap() {
            seen.push(key);
        }
        assert_eq!(seen, vec!["x", "y", "z"]);
        txn.clear().await.unwrap();
        assert_eq!(txn.count().await.unwrap(), 0);
        txn.commit().await.unwrap();
    }

    /// Open `test`, retrying while a dropped connection still holds the file.
    async fn open_when_released(
        engine: &RedbEngine,
        version: u32,
        upgrade: fn() -> UpgradeHandler,
    ) -> Result<Arc<dyn EngineConnection>, EngineError> {
        for _ in 0..50 {
            match engine.open("test", version, upgrade()).unwrap().await {
                Err(err) if err.kind == EngineErrorKind::Unavailable => {
                    tokio::time::sleep(std::time::Duration::from_millis(10)).await
                }
                result => return result,
            }
        }
        panic!("database file was never released");
    }

    async fn reopen(engine: &RedbEngine, version: u32) -> Arc<dyn EngineConnection> {
        open_when_released(engine, version, create_store_upgrade)
            .await
            .unwrap()
    }

    fn failing_upgrade() -> UpgradeHandler {
        Box::new(|upgrade: &mut dyn SchemaUpgrade| {
            upgrade.create_object_store("extra")?;
            Err(EngineError::internal("upgrade refused"))
        })
    }

    #[tokio::test]
    async fn test_persistence_across_reopen() {
        let dir = tempdir().unwrap();
        let engine = RedbEngine::new(dir.path());

        {
            let connection = open(&engine).await;
            let txn = connection
                .transaction("entries", TransactionMode::ReadWrite)
                .unwrap();
            txn.put("persistent-key", Value::from("persistent-value"))
                .await
                .unwrap();
            txn.commit().await.unwrap();
        }

        // The worker releases the file once the connection is dropped.
        let connection = reopen(&engine, 1).await;
        let txn = connection
            .transaction("entries", TransactionMode::ReadOnly)
            .unwrap();
        assert_eq!(
            txn.get("persistent-key").await.unwrap(),
            Some(Value::from("persistent-value"))
        );
    }

    #[tokio::test]
    async fn test_failed_write_rolls_back() {
        let dir = tempdir().unwrap();
        let engine = RedbEngine::new(dir.path());
        let connection = open(&engine).await;

        let txn = connection
            .transaction("entries", TransactionMode::ReadWrite)
            .unwrap();
        txn.put("k", Value::from(1)).await.unwrap();
        txn.commit().await.unwrap();

        let txn = connection
            .transaction("entries", TransactionMode::ReadWrite)
            .unwrap();
        txn.put("other", Value::from(2)).await.unwrap();
        assert!(txn.add("k", Value::from(3)).await.is_err());
        assert!(txn.commit().await.is_err());

        let txn = connection
            .transaction("entries", TransactionMode::ReadOnly)
            .unwrap();
        assert_eq!(txn.get("other").await.unwrap(), None);
        assert_eq!(txn.get("k").await.unwrap(), Some(Value::from(1)));
    }

    #[tokio::test]
    async fn test_failed_upgrade_and_downgrade_leave_database_intact() {
        let dir = tempdir().unwrap();
        let engine = RedbEngine::new(dir.path());
        {
            let connection = open(&engine).await;
            let txn = connection
                .transaction("entries", TransactionMode::ReadWrite)
                .unwrap();
            txn.put("k", Value::from(1)).await.unwrap();
            txn.commit().await.unwrap();
        }

        let err = open_when_released(&engine, 2, failing_upgrade)
            .await
            .unwrap_err();
        assert_eq!(err.message, "upgrade refused");

        // The stored version is still 1, so the original open succeeds and
        // sees neither the aborted store nor lost data.
        let connection = reopen(&engine, 1).await;
        assert!(connection.transaction("extra", TransactionMode::ReadOnly).is_err());
        let txn = connection
            .transaction("entries", TransactionMode::ReadOnly)
            .unwrap();
        assert_eq!(txn.get("k").await.unwrap(), Some(Value::from(1)));
        drop(txn);
        drop(connection);

        let err = open_when_released(&engine, 0, create_store_upgrade)
            .await
            .unwrap_err();
        assert_eq!(err.kind, EngineErrorKind::Internal);
        assert!(err.message.contains("lower than the stored version"));
    }

    #[test]
    fn test_from_config_uses_data_dir() {
        let dir = tempdir().unwrap();
        let config = StorageConfig {
            data_dir: Some(dir.path().to_path_buf()),
            ..StorageConfig::default()
        };
        let engine = RedbEngine::from_config(&config).unwrap();
        assert_eq!(engine.data_dir(), dir.path());
        assert_eq!(engine.database_path("keystash"), dir.path().join("keystash.redb"));

        let err = RedbEngine::from_config(&StorageConfig::default()).unwrap_err();
        assert_eq!(err.kind, EngineErrorKind::Unavailable);
    }

    #[test]
    fn test_unusable_data_dir_refuses_synchronously() {
        let dir = tempdir().unwrap();
        let blocker = dir.path().join("not-a-dir");
        std::fs::write(&blocker, b"file").unwrap();
        let engine = RedbEngine::new(blocker.join("nested"));
        let err = engine.open("test", 1, create_store_upgrade()).unwrap_err();
        assert_eq!(err.kind, EngineErrorKind::Unavailable);
    }
}
