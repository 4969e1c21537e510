// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Embedded engine boundary.
//
// The primary backend drives an asynchronous, connection-oriented,
// transactional key-value engine. Everything the engine reports arrives as a
// one-shot request event: opening a database, every request issued on a
// transaction, and the transaction's commit.
//
// # Lifecycle
//
// 1. `EmbeddedEngine::open` either fails synchronously (the engine cannot be
//    used here at all) or returns an `OpenRequest`.
// 2. While opening, if the stored schema version is older than the requested
//    one, the engine calls the `UpgradeHandler` with a `SchemaUpgrade` so the
//    caller can create its object stores.
// 3. The open request resolves to a shared `EngineConnection`, from which
//    transactions are created. Transactions on a connection are executed in
//    the order they were created.

use std::fmt;
use std::sync::Arc;

use crate::error::EngineError;

pub mod memory;
#[cfg(feature = "redb-engine")]
pub mod redb;
mod request;
mod transaction;

pub use request::{PendingRequest, RequestEvent, Responder};
pub use transaction::{
    Cursor, Transaction, TransactionMode, TransactionReceiver, TransactionRequest,
};

pub(crate) use transaction::{serve_transaction, ObjectStoreAccess, TransactionOutcome};

/// Request that resolves to an open connection.
pub type OpenRequest = PendingRequest<Arc<dyn EngineConnection>>;

/// Callback run by the engine during the open sequence when the database's
/// stored version is older than the requested version.
pub type UpgradeHandler = Box<dyn FnOnce(&mut dyn SchemaUpgrade) -> Result<(), EngineError> + Send>;

/// Schema changes permitted while a database is being upgraded.
pub trait SchemaUpgrade {
    /// Version the database had before this upgrade (0 when newly created).
    fn old_version(&self) -> u32;

    /// Names of the object stores that currently exist.
    fn object_store_names(&self) -> Vec<String>;

    /// Create a new, empty object store.
    fn create_object_store(&mut self, name: &str) -> Result<(), EngineError>;

    /// Whether an object store with `name` exists.
    fn has_object_store(&self, name: &str) -> bool {
        self.object_store_names().iter().any(|existing| existing == name)
    }
}

/// An embedded, transactional key-value engine.
pub trait EmbeddedEngine: Send + Sync + 'static {
    /// Engine name, for logs.
    fn name(&self) -> &str;

    /// Begin opening `database` at `version`.
    ///
    /// An `Err` means the engine refused synchronously; an `Ok` request may
    /// still resolve to an error later.
    fn open(
        &self,
        database: &str,
        version: u32,
        upgrade: UpgradeHandler,
    ) -> Result<OpenRequest, EngineError>;
}

/// An established connection to one database.
pub trait EngineConnection: Send + Sync + fmt::Debug {
    /// Name of the connected database.
    fn database(&self) -> &str;

    /// Schema version the connection was opened at.
    fn version(&self) -> u32;

    /// Object stores that existed when the connection was opened.
    fn object_store_names(&self) -> Vec<String>;

    /// Start a transaction on `store`.
    ///
    /// Fails with `InvalidState` when the connection can no longer be used
    /// and with `NotFound` when the store does not exist.
    fn transaction(&self, store: &str, mode: TransactionMode) -> Result<Transaction, EngineError>;

    /// Whether transactions support [`Transaction::get_all_keys`]. When
    /// false, keys must be enumerated with a cursor.
    fn supports_get_all_keys(&self) -> bool {
        true
    }
}
