// SPDX-License-Identifier: PMPL-1.0-or-later
//! Storage configuration.
//!
//! Defaults:
//! - database_name: "keystash"
//! - store_name: "localStorage"
//! - version: 1
//! - fallback_prefix: none
//! - data_dir: none (the redb engine needs one supplied)

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::warn;

/// Names and versions used when opening the embedded database, plus the
/// fallback store's key prefix.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Name of the embedded database.
    pub database_name: String,
    /// Name of the single object store holding all entries.
    pub store_name: String,
    /// Schema version requested when opening; bumping it re-runs the upgrade.
    pub version: u32,
    /// Prefix applied to keys in the synchronous fallback store, so several
    /// logical stores can share it. Physical keys become `{prefix}_{key}`.
    pub fallback_prefix: Option<String>,
    /// Directory for engines that persist to files; read by
    /// `RedbEngine::from_config`.
    pub data_dir: Option<PathBuf>,
}

impl StorageConfig {
    /// Defaults overridden by `KEYSTASH_*` environment variables.
    ///
    /// Recognised: `KEYSTASH_DATABASE_NAME`, `KEYSTASH_STORE_NAME`,
    /// `KEYSTASH_VERSION`, `KEYSTASH_FALLBACK_PREFIX`, `KEYSTASH_DATA_DIR`.
    /// Empty values are ignored; an unparsable version is logged and ignored.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let var = |name: &str| lookup(name).filter(|value| !value.is_empty());
        let mut config = Self::default();

        if let Some(name) = var("KEYSTASH_DATABASE_NAME") {
            config.database_name = name;
        }
        if let Some(store) = var("KEYSTASH_STORE_NAME") {
            config.store_name = store;
        }
        if let Some(version) = var("KEYSTASH_VERSION") {
            match version.parse::<u32>() {
                Ok(parsed) if parsed > 0 => config.version = parsed,
                _ => warn!(value = %version, "Ignoring invalid KEYSTASH_VERSION (expected a positive integer)"),
            }
        }
        if let Some(prefix) = var("KEYSTASH_FALLBACK_PREFIX") {
            config.fallback_prefix = Some(prefix);
        }
        if let Some(dir) = var("KEYSTASH_DATA_DIR") {
            config.data_dir = Some(PathBuf::from(dir));
        }
        config
    }

    /// Builder-style override of the database name.
    pub fn with_database_name(mut self, name: &str) -> Self {
        self.database_name = name.to_string();
        self
    }

    /// Builder-style override of the object store name.
    pub fn with_store_name(mut self, name: &str) -> Self {
        self.store_name = name.to_string();
        self
    }

    /// Builder-style override of the fallback key prefix.
    pub fn with_fallback_prefix(mut self, prefix: &str) -> Self {
        self.fallback_prefix = Some(prefix.to_string());
        self
    }

    /// Builder-style override of the data directory.
    pub fn with_data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.data_dir = Some(dir.into());
        self
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_name: "keystash".to_string(),
            store_name: "localStorage".to_string(),
            version: 1,
            fallback_prefix: None,
            data_dir: None,
        }
    }
}
