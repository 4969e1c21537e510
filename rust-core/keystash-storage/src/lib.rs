// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Keystash Storage Backend Abstraction
//
// This crate provides the asynchronous key-value contract Keystash applications
// store their state through, and two implementations of it: one over an
// embedded transactional engine, and a synchronous fallback the first one
// switches to transparently when its engine cannot be used.
//
// # Modules
//
// - [`backend`] -- The `StorageBackend` trait defining the key-value interface.
// - [`error`] -- `StorageError` for callers and `EngineError` for engines.
// - [`engine`] -- The embedded engine boundary, with an in-memory engine and
//   (feature `redb-engine`) a persistent redb engine.
// - [`embedded`] -- `EmbeddedDatabaseBackend`, the primary backend.
// - [`fallback`] -- `FallbackBackend` over any `SyncKeyValueStore`.
// - [`memory`] -- An in-memory `SyncKeyValueStore`.
// - [`config`] -- Database, store and fallback naming.
//
// # Example
//
// ```rust
// use keystash_storage::engine::memory::MemoryEngine;
// use keystash_storage::{BackendMode, EmbeddedDatabaseBackend, StorageBackend, StorageConfig};
//
// # tokio_test::block_on(async {
// let config = StorageConfig::default().with_store_name("settings");
// let backend = EmbeddedDatabaseBackend::new(MemoryEngine::new(), config);
//
// backend.set_item("theme", serde_json::json!({"dark": true})).await.unwrap();
// assert!(backend.has("theme").await.unwrap());
// assert_eq!(backend.mode(), BackendMode::Primary);
// # });
// ```

pub mod backend;
pub mod config;
pub mod embedded;
pub mod engine;
pub mod error;
pub mod fallback;
pub mod memory;

// Re-export the most commonly used types at the crate root for convenience.
pub use backend::StorageBackend;
pub use config::StorageConfig;
pub use embedded::{BackendMode, EmbeddedDatabaseBackend};
pub use error::{EngineError, EngineErrorKind, Operation, StorageError, StorageResult};
pub use fallback::{FallbackBackend, SyncKeyValueStore, SyncStoreError};
pub use memory::MemoryKeyValueStore;

#[cfg(feature = "redb-engine")]
pub use engine::redb::RedbEngine;
