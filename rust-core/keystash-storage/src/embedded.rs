// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Embedded database backend for Keystash.
//
// Implements `StorageBackend` over an `EmbeddedEngine`. The backend owns a
// single driver task which opens the connection once, then drains an ordered
// command queue, issuing one engine transaction per operation without waiting
// for the previous one to finish. Engines serve a connection's transactions
// in creation order, so operations take effect in the order they were issued
// and the last issued write to a key wins.
//
// # Connection lifecycle
//
//   Opening ──open ok──▶ Primary
//      │                    │ connection reports InvalidState
//      ▼                    ▼
//   Fallback ◀──────────────┘        (or Unavailable with no fallback)
//
// Fallback is entered when the engine refuses to open, the open request
// fails, the schema upgrade fails, or the object store is missing after open.
// The switch is permanent for this backend instance.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info, warn};

use crate::backend::StorageBackend;
use crate::config::StorageConfig;
use crate::engine::{
    EmbeddedEngine, EngineConnection, SchemaUpgrade, Transaction, TransactionMode, UpgradeHandler,
};
use crate::error::{EngineError, EngineErrorKind, Operation, StorageError, StorageResult};
use crate::fallback::FallbackBackend;
use crate::memory::MemoryKeyValueStore;

/// Which store an [`EmbeddedDatabaseBackend`] is currently serving from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendMode {
    /// The connection is still being opened; operations are queued.
    Opening,
    /// Operations run against the embedded engine.
    Primary,
    /// Operations run against the synchronous fallback backend.
    Fallback,
    /// The engine failed and no fallback was configured.
    Unavailable,
}

type Reply<T> = oneshot::Sender<StorageResult<T>>;

/// One queued operation, carrying the channel its result is sent on.
enum Command {
    Get { key: String, reply: Reply<Option<Value>> },
    Set { key: String, value: Value, reply: Reply<()> },
    Remove { key: String, reply: Reply<()> },
    Clear { reply: Reply<()> },
    Keys { reply: Reply<Vec<String>> },
    Has { key: String, reply: Reply<bool> },
    Len { reply: Reply<usize> },
}

impl Command {
    fn operation(&self) -> Operation {
        match self {
            Command::Get { .. } => Operation::Get,
            Command::Set { .. } => Operation::Set,
            Command::Remove { .. } => Operation::Remove,
            Command::Clear { .. } => Operation::Clear,
            Command::Keys { .. } => Operation::Keys,
            Command::Has { .. } => Operation::Has,
            Command::Len { .. } => Operation::Len,
        }
    }

    fn transaction_mode(&self) -> TransactionMode {
        if self.operation().is_write() {
            TransactionMode::ReadWrite
        } else {
            TransactionMode::ReadOnly
        }
    }

    fn fail(self, err: StorageError) {
        match self {
            Command::Get { reply, .. } => respond(reply, Err(err)),
            Command::Set { reply, .. } => respond(reply, Err(err)),
            Command::Remove { reply, .. } => respond(reply, Err(err)),
            Command::Clear { reply } => respond(reply, Err(err)),
            Command::Keys { reply } => respond(reply, Err(err)),
            Command::Has { reply, .. } => respond(reply, Err(err)),
            Command::Len { reply } => respond(reply, Err(err)),
        }
    }

    fn run_fallback(self, fallback: &FallbackBackend) {
        match self {
            Command::Get { key, reply } => respond(reply, fallback.get_now(&key)),
            Command::Set { key, value, reply } => respond(reply, fallback.set_now(&key, &value)),
            Command::Remove { key, reply } => respond(reply, fallback.remove_now(&key)),
            Command::Clear { reply } => respond(reply, fallback.clear_now()),
            Command::Keys { reply } => respond(reply, fallback.keys_now()),
            Command::Has { key, reply } => respond(reply, fallback.has_now(&key)),
            Command::Len { reply } => respond(reply, fallback.len_now()),
        }
    }

    /// Issue this command's first request on `txn` now, and finish it on a
    /// spawned task so the driver can move on to the next command.
    fn issue(self, txn: Transaction, get_all_keys: bool) {
        match self {
            Command::Get { key, reply } => {
                let pending = txn.get(&key);
                settle(Operation::Get, reply, async move {
                    let value = pending.await;
                    drop(txn);
                    value
                });
            }
            Command::Has { key, reply } => {
                let pending = txn.get_key(&key);
                settle(Operation::Has, reply, async move {
                    let found = pending.await;
                    drop(txn);
                    found.map(|key| key.is_some())
                });
            }
            Command::Len { reply } => {
                let pending = txn.count();
                settle(Operation::Len, reply, async move {
                    let count = pending.await;
                    drop(txn);
                    count
                });
            }
            Command::Set { key, value, reply } => {
                let existing = txn.get_key(&key);
                settle(Operation::Set, reply, async move {
                    if existing.await?.is_some() {
                        txn.put(&key, value).await?;
                    } else {
                        txn.add(&key, value).await?;
                    }
                    txn.commit().await
                });
            }
            Command::Remove { key, reply } => {
                let pending = txn.delete(&key);
                settle(Operation::Remove, reply, async move {
                    pending.await?;
                    txn.commit().await
                });
            }
            Command::Clear { reply } => {
                let pending = txn.clear();
                settle(Operation::Clear, reply, async move {
                    pending.await?;
                    txn.commit().await
                });
            }
            Command::Keys { reply } if get_all_keys => {
                let pending = txn.get_all_keys();
                settle(Operation::Keys, reply, async move {
                    let keys = pending.await;
                    drop(txn);
                    keys
                });
            }
            Command::Keys { reply } => {
                settle(Operation::Keys, reply, async move {
                    let mut keys = Vec::new();
                    let mut cursor = txn.open_cursor();
                    while let Some(key) = cursor.next_key().await? {
                        keys.push(key);
                    }
                    Ok(keys)
                });
            }
        }
    }
}

fn respond<T>(reply: Reply<T>, result: StorageResult<T>) {
    // A caller that stopped waiting simply never sees the result.
    let _ = reply.send(result);
}

/// Await `work` on its own task and deliver the outcome to `reply`.
fn settle<T, F>(operation: Operation, reply: Reply<T>, work: F)
where
    T: Send + 'static,
    F: Future<Output = Result<T, EngineError>> + Send + 'static,
{
    tokio::spawn(async move {
        let result = work.await.map_err(|err| {
            debug!(operation = %operation, error = %err, "Engine request failed");
            StorageError::transaction(operation, err)
        });
        respond(reply, result);
    });
}

/// [`StorageBackend`] over an [`EmbeddedEngine`], with a transparent switch
/// to a [`FallbackBackend`] when the engine cannot be used.
///
/// Construction spawns the driver task, so it must happen inside a Tokio
/// runtime. Clones share the same connection and command queue.
#[derive(Debug, Clone)]
pub struct EmbeddedDatabaseBackend {
    database: String,
    commands: mpsc::UnboundedSender<Command>,
    mode: watch::Receiver<BackendMode>,
}

impl std::fmt::Debug for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Command({})", self.operation())
    }
}

impl EmbeddedDatabaseBackend {
    /// Open `engine` with the names from `config`, falling back to an
    /// in-memory synchronous store (prefixed with `config.fallback_prefix`).
    pub fn new<E: EmbeddedEngine>(engine: E, config: StorageConfig) -> Self {
        let mut fallback = FallbackBackend::new(MemoryKeyValueStore::new());
        if let Some(prefix) = &config.fallback_prefix {
            fallback = fallback.with_prefix(prefix);
        }
        Self::spawn(engine, config, Some(fallback))
    }

    /// Open `engine`, falling back to `fallback` when it cannot be used.
    pub fn with_fallback<E: EmbeddedEngine>(
        engine: E,
        config: StorageConfig,
        fallback: FallbackBackend,
    ) -> Self {
        Self::spawn(engine, config, Some(fallback))
    }

    /// Open `engine` with no fallback. If the engine cannot be used every
    /// operation fails with [`StorageError::Connection`].
    pub fn without_fallback<E: EmbeddedEngine>(engine: E, config: StorageConfig) -> Self {
        Self::spawn(engine, config, None)
    }

    fn spawn<E: EmbeddedEngine>(
        engine: E,
        config: StorageConfig,
        fallback: Option<FallbackBackend>,
    ) -> Self {
        let (commands, queue) = mpsc::unbounded_channel();
        let (mode_tx, mode) = watch::channel(BackendMode::Opening);
        let database = config.database_name.clone();

        tokio::spawn(async move {
            let route = match connect(&engine, &config).await {
                Ok(connection) => {
                    info!(
                        engine = engine.name(),
                        database = %config.database_name,
                        version = connection.version(),
                        "Embedded database opened"
                    );
                    mode_tx.send_replace(BackendMode::Primary);
                    Route::Primary(connection)
                }
                Err(err) => Route::Opening(err),
            };
            let mut driver = Driver {
                database: config.database_name,
                store: config.store_name,
                fallback,
                mode: mode_tx,
                route,
            };
            if let Route::Opening(err) = &driver.route {
                let err = err.clone();
                driver.degrade(Operation::Open, &err);
            }
            driver.run(queue).await;
        });

        Self {
            database,
            commands,
            mode,
        }
    }

    /// The mode the backend is currently serving from.
    pub fn mode(&self) -> BackendMode {
        *self.mode.borrow()
    }

    /// Wait until the connection has been resolved one way or another.
    pub async fn ready(&self) -> BackendMode {
        let mut mode = self.mode.clone();
        let resolved = match mode.wait_for(|current| *current != BackendMode::Opening).await {
            Ok(current) => Some(*current),
            Err(_) => None,
        };
        resolved.unwrap_or_else(|| *mode.borrow())
    }

    /// Name of the embedded database this backend opens.
    pub fn database(&self) -> &str {
        &self.database
    }

    /// Queue a command. Called before the first suspension point of every
    /// operation, which fixes the operation's place in the issue order.
    fn submit<T>(&self, build: impl FnOnce(Reply<T>) -> Command) -> oneshot::Receiver<StorageResult<T>> {
        let (reply, result) = oneshot::channel();
        if let Err(mpsc::error::SendError(command)) = self.commands.send(build(reply)) {
            command.fail(StorageError::Closed);
        }
        result
    }

    async fn complete<T>(result: oneshot::Receiver<StorageResult<T>>) -> StorageResult<T> {
        result.await.map_err(|_| StorageError::Closed)?
    }
}

/// Open the database and make sure the object store exists.
async fn connect<E: EmbeddedEngine>(
    engine: &E,
    config: &StorageConfig,
) -> Result<Arc<dyn EngineConnection>, EngineError> {
    let store = config.store_name.clone();
    let upgrade: UpgradeHandler = Box::new(move |schema: &mut dyn SchemaUpgrade| {
        debug!(
            store = %store,
            old_version = schema.old_version(),
            "Upgrading embedded database schema"
        );
        if !schema.has_object_store(&store) {
            schema.create_object_store(&store)?;
        }
        Ok(())
    });

    let connection = engine
        .open(&config.database_name, config.version, upgrade)?
        .await?;

    if !connection
        .object_store_names()
        .iter()
        .any(|name| name == &config.store_name)
    {
        return Err(EngineError::new(
            EngineErrorKind::NotFound,
            format!(
                "object store '{}' is missing from database '{}' at version {}",
                config.store_name,
                config.database_name,
                connection.version()
            ),
        ));
    }
    Ok(connection)
}

enum Route {
    /// Transient: the open attempt failed and the driver has yet to degrade.
    Opening(EngineError),
    Primary(Arc<dyn EngineConnection>),
    Fallback(FallbackBackend),
    Unavailable(String),
}

/// State owned by the driver task.
struct Driver {
    database: String,
    store: String,
    fallback: Option<FallbackBackend>,
    mode: watch::Sender<BackendMode>,
    route: Route,
}

impl Driver {
    async fn run(mut self, mut queue: mpsc::UnboundedReceiver<Command>) {
        while let Some(command) = queue.recv().await {
            self.dispatch(command);
        }
        debug!(database = %self.database, "Embedded backend driver stopped");
    }

    /// Leave the primary path for good. `operation` is what hit the failure.
    fn degrade(&mut self, operation: Operation, reason: &EngineError) {
        match self.fallback.take() {
            Some(fallback) => {
                warn!(
                    database = %self.database,
                    operation = %operation,
                    error = %reason,
                    "Embedded database unusable, switching to fallback storage"
                );
                self.route = Route::Fallback(fallback);
                self.mode.send_replace(BackendMode::Fallback);
            }
            None => {
                warn!(
                    database = %self.database,
                    operation = %operation,
                    error = %reason,
                    "Embedded database unusable and no fallback configured"
                );
                self.route = Route::Unavailable(format!("{operation} failed: {reason}"));
                self.mode.send_replace(BackendMode::Unavailable);
            }
        }
    }

    fn dispatch(&mut self, command: Command) {
        let rejected = match &self.route {
            Route::Primary(connection) => {
                let operation = command.operation();
                match connection.transaction(&self.store, command.transaction_mode()) {
                    Ok(txn) => {
                        debug!(operation = %operation, store = %self.store, "Issuing transaction");
                        command.issue(txn, connection.supports_get_all_keys());
                        None
                    }
                    Err(err) if err.kind == EngineErrorKind::InvalidState => {
                        Some((command, operation, err))
                    }
                    Err(err) => {
                        command.fail(StorageError::transaction(operation, err));
                        None
                    }
                }
            }
            Route::Fallback(fallback) => {
                command.run_fallback(fallback);
                None
            }
            Route::Unavailable(message) => {
                command.fail(StorageError::Connection {
                    database: self.database.clone(),
                    message: message.clone(),
                });
                None
            }
            Route::Opening(err) => Some((command, Operation::Open, err.clone())),
        };

        if let Some((command, operation, err)) = rejected {
            self.degrade(operation, &err);
            self.dispatch(command);
        }
    }
}

#[async_trait]
impl StorageBackend for EmbeddedDatabaseBackend {
    async fn get_item(&self, key: &str) -> Result<Option<Value>, StorageError> {
        let key = key.to_string();
        let result = self.submit(|reply| Command::Get { key, reply });
        Self::complete(result).await
    }

    async fn set_item(&self, key: &str, value: Value) -> Result<(), StorageError> {
        if value.is_null() {
            return Ok(());
        }
        let key = key.to_string();
        let result = self.submit(|reply| Command::Set { key, value, reply });
        Self::complete(result).await
    }

    async fn remove_item(&self, key: &str) -> Result<(), StorageError> {
        let key = key.to_string();
        let result = self.submit(|reply| Command::Remove { key, reply });
        Self::complete(result).await
    }

    async fn clear(&self) -> Result<(), StorageError> {
        let result = self.submit(|reply| Command::Clear { reply });
        Self::complete(result).await
    }

    async fn keys(&self) -> Result<Vec<String>, StorageError> {
        let result = self.submit(|reply| Command::Keys { reply });
        Self::complete(result).await
    }

    async fn has(&self, key: &str) -> Result<bool, StorageError> {
        let key = key.to_string();
        let result = self.submit(|reply| Command::Has { key, reply });
        Self::complete(result).await
    }

    async fn len(&self) -> Result<usize, StorageError> {
        let result = self.submit(|reply| Command::Len { reply });
        Self::complete(result).await
    }

    fn name(&self) -> &str {
        "embedded"
    }
}
