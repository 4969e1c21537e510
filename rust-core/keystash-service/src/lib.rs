// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Keystash Storage Service
//
// The application-facing layer over `keystash-storage`: a typed facade whose
// reads can be checked against a JSON schema, and whose writes can be issued
// without waiting for them.
//
// # Modules
//
// - [`service`] -- `StorageService` and `ItemOptions`.
// - [`validation`] -- The `SchemaValidator` boundary and `ValidationAdapter`.
// - [`schema`] -- `JsonSchemaValidator`, the bundled validator.
// - [`error`] -- `ServiceError` and `SchemaError`.

pub mod error;
pub mod schema;
pub mod service;
pub mod validation;

pub use error::{SchemaError, ServiceError, ServiceResult, VALIDATION_MESSAGE};
pub use schema::JsonSchemaValidator;
pub use service::{ItemOptions, StorageService};
pub use validation::{SchemaValidator, Validation, ValidationAdapter};

pub use keystash_storage as storage;
