// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// In-memory synchronous key-value store for Keystash.
//
// The default store behind `FallbackBackend`: a `BTreeMap` of strings behind
// an `RwLock`, ordered so key listings are deterministic. All data lives in
// process memory and is lost on drop.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use crate::fallback::{SyncKeyValueStore, SyncStoreError};

/// A synchronous in-memory string store.
///
/// Clones share state.
#[derive(Debug, Clone, Default)]
pub struct MemoryKeyValueStore {
    data: Arc<RwLock<BTreeMap<String, String>>>,
}

impl MemoryKeyValueStore {
    /// Create a new, empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn poisoned<T>(_: T) -> SyncStoreError {
        SyncStoreError("in-memory store lock poisoned".to_string())
    }
}

impl SyncKeyValueStore for MemoryKeyValueStore {
    fn get(&self, key: &str) -> Result<Option<String>, SyncStoreError> {
        let map = self.data.read().map_err(Self::poisoned)?;
        Ok(map.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), SyncStoreError> {
        let mut map = self.data.write().map_err(Self::poisoned)?;
        map.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), SyncStoreError> {
        let mut map = self.data.write().map_err(Self::poisoned)?;
        map.remove(key);
        Ok(())
    }

    fn clear(&self) -> Result<(), SyncStoreError> {
        let mut map = self.data.write().map_err(Self::poisoned)?;
        map.clear();
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>, SyncStoreError> {
        let map = self.data.read().map_err(Self::poisoned)?;
        Ok(map.keys().cloned().collect())
    }
}
