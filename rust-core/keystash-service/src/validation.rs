// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Validator boundary.
//
// The service never interprets schemas itself. It hands the stored value and
// the caller's schema to a `SchemaValidator` and turns the verdict into either
// success or a `ServiceError::Validation` carrying the fixed message.

use std::sync::Arc;

use serde_json::Value;
use tracing::debug;

use crate::error::{SchemaError, ServiceError, ServiceResult};

/// Verdict of validating one value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Validation {
    Valid,
    /// The value does not conform; the string says where and why.
    Invalid(String),
}

impl Validation {
    pub fn is_valid(&self) -> bool {
        matches!(self, Validation::Valid)
    }
}

/// Checks JSON values against JSON schemas.
pub trait SchemaValidator: Send + Sync {
    /// Validate `value` against `schema`.
    ///
    /// An `Err` means the schema itself is unusable, which callers must be
    /// able to tell apart from a value that simply does not conform.
    fn validate(&self, value: &Value, schema: &Value) -> Result<Validation, SchemaError>;
}

/// Adapts a [`SchemaValidator`] verdict to service results.
#[derive(Clone)]
pub struct ValidationAdapter {
    validator: Arc<dyn SchemaValidator>,
}

impl ValidationAdapter {
    pub fn new(validator: Arc<dyn SchemaValidator>) -> Self {
        Self { validator }
    }

    /// Succeed if the value stored under `key` satisfies `schema`.
    pub fn check(&self, key: &str, value: &Value, schema: &Value) -> ServiceResult<()> {
        match self.validator.validate(value, schema)? {
            Validation::Valid => Ok(()),
            Validation::Invalid(detail) => {
                debug!(key = %key, detail = %detail, "Stored item failed schema validation");
                Err(ServiceError::Validation {
                    key: key.to_string(),
                    detail,
                })
            }
        }
    }
}

impl std::fmt::Debug for ValidationAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ValidationAdapter").finish_non_exhaustive()
    }
}
