// SPDX-License-Identifier: PMPL-1.0-or-later
//! Property-based tests for the storage backends

use std::collections::BTreeMap;

use keystash_storage::engine::memory::MemoryEngine;
use keystash_storage::{
    EmbeddedDatabaseBackend, FallbackBackend, MemoryKeyValueStore, StorageBackend, StorageConfig,
};
use proptest::prelude::*;
use serde_json::Value;

/// Generate arbitrary keys
fn arb_key() -> impl Strategy<Value = String> {
    "[a-z0-9_.-]{1,16}"
}

/// Generate arbitrary non-null JSON values
fn arb_value() -> impl Strategy<Value = Value> {
    let leaf = prop_oneof![
        any::<bool>().prop_map(Value::from),
        any::<i64>().prop_map(Value::from),
        "[ -~]{0,24}".prop_map(Value::from),
    ];
    leaf.prop_recursive(3, 16, 4, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..4).prop_map(Value::from),
            prop::collection::btree_map("[a-z]{1,6}", inner, 0..4)
                .prop_map(|map| Value::Object(map.into_iter().collect())),
        ]
    })
}

#[derive(Debug, Clone)]
enum Op {
    Set(String, Value),
    Remove(String),
    Clear,
}

fn arb_ops() -> impl Strategy<Value = Vec<Op>> {
    let op = prop_oneof![
        6 => (arb_key(), arb_value()).prop_map(|(k, v)| Op::Set(k, v)),
        3 => arb_key().prop_map(Op::Remove),
        1 => Just(Op::Clear),
    ];
    prop::collection::vec(op, 1..24)
}

proptest! {
    #[test]
    fn test_set_then_get_round_trips(key in arb_key(), value in arb_value()) {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        runtime.block_on(async {
            let primary = EmbeddedDatabaseBackend::new(MemoryEngine::new(), StorageConfig::default());
            let fallback = FallbackBackend::new(MemoryKeyValueStore::new()).with_prefix("p");

            primary.set_item(&key, value.clone()).await.unwrap();
            fallback.set_item(&key, value.clone()).await.unwrap();

            prop_assert_eq!(primary.get_item(&key).await.unwrap(), Some(value.clone()));
            prop_assert_eq!(fallback.get_item(&key).await.unwrap(), Some(value));
            Ok(())
        })?;
    }

    #[test]
    fn test_unobserved_operations_match_sequential_model(ops in arb_ops()) {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        runtime.block_on(async {
            let backend = EmbeddedDatabaseBackend::new(
                MemoryEngine::new().without_bulk_keys(),
                StorageConfig::default(),
            );

            let mut model = BTreeMap::new();
            let mut pending = Vec::new();
            for op in &ops {
                match op {
                    Op::Set(key, value) => {
                        model.insert(key.clone(), value.clone());
                        pending.push(backend.set_item(key, value.clone()));
                    }
                    Op::Remove(key) => {
                        model.remove(key);
                        pending.push(backend.remove_item(key));
                    }
                    Op::Clear => {
                        model.clear();
                        pending.push(backend.clear());
                    }
                }
            }
            for result in futures::future::join_all(pending).await {
                prop_assert!(result.is_ok());
            }

            let mut keys = backend.keys().await.unwrap();
            keys.sort();
            prop_assert_eq!(keys, model.keys().cloned().collect::<Vec<_>>());
            for (key, value) in &model {
                let stored = backend.get_item(key).await.unwrap();
                prop_assert_eq!(stored.as_ref(), Some(value));
            }
            prop_assert_eq!(backend.len().await.unwrap(), model.len());
            Ok(())
        })?;
    }
}
