// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Storage error types for the Keystash backend abstraction.
//
// Two layers of errors live here. `EngineError` is what an embedded engine
// reports through a request's error event. `StorageError` is what callers of
// the `StorageBackend` contract observe: connection failures, per-operation
// transaction failures, and the fallback path's serialization failures.

use std::fmt;

use thiserror::Error;

/// The contract operation an error is attributed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    /// Opening the database and upgrading its schema.
    Open,
    Get,
    Set,
    Remove,
    Clear,
    Keys,
    Has,
    Len,
}

impl Operation {
    /// Stable lowercase name, used in log fields and error messages.
    pub fn as_str(self) -> &'static str {
        match self {
            Operation::Open => "open",
            Operation::Get => "get",
            Operation::Set => "set",
            Operation::Remove => "remove",
            Operation::Clear => "clear",
            Operation::Keys => "keys",
            Operation::Has => "has",
            Operation::Len => "len",
        }
    }

    /// Whether the operation mutates the store.
    pub fn is_write(self) -> bool {
        matches!(self, Operation::Set | Operation::Remove | Operation::Clear)
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classification of an engine-reported failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineErrorKind {
    /// The engine cannot be used at all in this environment.
    Unavailable,
    /// The connection exists but can no longer issue transactions.
    InvalidState,
    /// A named database or object store does not exist.
    NotFound,
    /// A write violated a key constraint (e.g. `add` on an existing key).
    Constraint,
    /// A write request was issued on a read-only transaction.
    ReadOnly,
    /// The transaction was aborted before the request could run.
    Aborted,
    /// Stored bytes could not be decoded.
    Data,
    /// Any other engine-internal failure.
    Internal,
}

/// A failure reported by an embedded engine.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind:?}: {message}")]
pub struct EngineError {
    /// What went wrong, coarsely.
    pub kind: EngineErrorKind,
    /// Engine-reported message.
    pub message: String,
}

impl EngineError {
    pub fn new(kind: EngineErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(EngineErrorKind::Unavailable, message)
    }

    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::new(EngineErrorKind::InvalidState, message)
    }

    pub fn aborted(message: impl Into<String>) -> Self {
        Self::new(EngineErrorKind::Aborted, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(EngineErrorKind::Internal, message)
    }
}

/// Errors that callers of a [`crate::StorageBackend`] can observe.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The embedded database could not be opened or upgraded, and no
    /// fallback backend was available to absorb the failure.
    #[error("connection to database '{database}' failed: {message}")]
    Connection {
        /// Name of the database that failed to open.
        database: String,
        /// Engine-reported message.
        message: String,
    },

    /// A single operation's underlying engine request failed.
    #[error("{operation} transaction failed: {message}")]
    Transaction {
        /// The operation whose request failed.
        operation: Operation,
        /// Engine-reported message.
        message: String,
    },

    /// Text stored in the fallback engine is not valid JSON.
    #[error("stored value for key '{key}' could not be deserialized: {message}")]
    Deserialization {
        /// Logical key of the corrupt entry.
        key: String,
        /// Parser message.
        message: String,
    },

    /// A value could not be converted to its stored representation.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// The synchronous fallback store itself failed.
    #[error("fallback store failed during {operation}: {message}")]
    Fallback {
        /// The operation that failed.
        operation: Operation,
        /// Store-reported message.
        message: String,
    },

    /// The backend's driver task has stopped and cannot accept operations.
    #[error("storage backend is closed")]
    Closed,
}

impl StorageError {
    /// Wrap an engine error as a transaction failure of `operation`.
    pub fn transaction(operation: Operation, err: EngineError) -> Self {
        StorageError::Transaction {
            operation,
            message: err.to_string(),
        }
    }
}

/// Convenience alias used across the crate.
pub type StorageResult<T> = Result<T, StorageError>;
