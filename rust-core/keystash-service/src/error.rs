// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Error types for the Keystash storage service.

use keystash_storage::StorageError;
use thiserror::Error;

/// Fixed message carried by every schema mismatch.
pub const VALIDATION_MESSAGE: &str = "stored item does not match the provided schema";

/// A schema that cannot be used for validation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchemaError {
    /// The schema is not a JSON object.
    #[error("schema must be a JSON object")]
    NotAnObject,

    /// The top-level schema declares no type or structural constraint.
    #[error("schema must declare at least one of 'type', 'const', 'enum', 'properties', 'required' or 'items'")]
    MissingConstraint,

    /// A keyword has a value of the wrong shape.
    #[error("invalid value for schema keyword '{keyword}': {reason}")]
    InvalidKeyword { keyword: String, reason: String },

    /// A keyword this validator does not understand.
    #[error("unsupported schema keyword '{0}'")]
    Unsupported(String),
}

/// Errors returned by [`crate::StorageService`].
#[derive(Debug, Error)]
pub enum ServiceError {
    /// The backend failed, or a stored value could not be decoded.
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// A stored value does not satisfy the schema it was read with.
    #[error("{} (key '{key}'): {detail}", VALIDATION_MESSAGE)]
    Validation { key: String, detail: String },

    /// The schema supplied with a read is malformed.
    #[error("malformed schema: {0}")]
    Schema(#[from] SchemaError),

    /// A value could not be serialized for storage.
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl ServiceError {
    /// Whether this is a schema mismatch on read.
    pub fn is_validation(&self) -> bool {
        matches!(self, ServiceError::Validation { .. })
    }
}

pub type ServiceResult<T> = Result<T, ServiceError>;
