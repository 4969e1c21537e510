// SPDX-License-Identifier: PMPL-1.0-or-later
//! Integration tests for the Keystash storage service.
//!
//! Run with `RUST_LOG=keystash_storage=debug` to see the backend lifecycle.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use keystash_service::{
    ItemOptions, JsonSchemaValidator, SchemaError, SchemaValidator, ServiceError,
    StorageService, Validation, VALIDATION_MESSAGE,
};
use keystash_storage::engine::memory::MemoryEngine;
use keystash_storage::{
    BackendMode, EmbeddedDatabaseBackend, FallbackBackend, MemoryKeyValueStore, StorageConfig,
    StorageError, SyncKeyValueStore,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Profile {
    name: String,
    age: u32,
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn primary_service() -> StorageService {
    init_tracing();
    StorageService::embedded(MemoryEngine::new(), StorageConfig::default())
}

fn fallback_service() -> StorageService {
    init_tracing();
    StorageService::embedded(
        MemoryEngine::unavailable("embedded storage disabled"),
        StorageConfig::default(),
    )
}

fn services() -> Vec<(&'static str, StorageService)> {
    vec![("primary", primary_service()), ("fallback", fallback_service())]
}

fn profile_schema() -> Value {
    json!({
        "type": "object",
        "required": ["name", "age"],
        "properties": {
            "name": {"type": "string", "minLength": 1},
            "age": {"type": "integer", "minimum": 0}
        }
    })
}

/// Records how often it is consulted and accepts everything.
#[derive(Default)]
struct CountingValidator(AtomicUsize);

impl SchemaValidator for CountingValidator {
    fn validate(&self, _value: &Value, _schema: &Value) -> Result<Validation, SchemaError> {
        self.0.fetch_add(1, Ordering::SeqCst);
        Ok(Validation::Valid)
    }
}

// ===========================================================================
// Typed round trips
// ===========================================================================

#[tokio::test]
async fn test_absent_key_reads_none() {
    for (path, service) in services() {
        let value: Option<Profile> = service.get_item("missing").await.unwrap();
        assert_eq!(value, None, "{path}");
        assert!(!service.has("missing").await.unwrap(), "{path}");
    }
}

#[tokio::test]
async fn test_typed_round_trip_and_overwrite() {
    for (path, service) in services() {
        let ada = Profile {
            name: "Ada".to_string(),
            age: 36,
        };
        service.set_item("profile", &ada).await.unwrap();
        let read: Option<Profile> = service.get_item("profile").await.unwrap();
        assert_eq!(read, Some(ada), "{path}");

        let grace = Profile {
            name: "Grace".to_string(),
            age: 85,
        };
        service.set_item("profile", &grace).await.unwrap();
        let read: Option<Profile> = service.get_item("profile").await.unwrap();
        assert_eq!(read, Some(grace), "{path}");
        assert_eq!(service.len().await.unwrap(), 1, "{path}");
    }
}

#[tokio::test]
async fn test_none_write_is_noop() {
    for (path, service) in services() {
        service.set_item("kept", "value").await.unwrap();
        service.set_item("kept", &None::<String>).await.unwrap();
        service.set_item("never", &Value::Null).await.unwrap();

        let kept: Option<String> = service.get_item("kept").await.unwrap();
        assert_eq!(kept.as_deref(), Some("value"), "{path}");
        assert!(!service.has("never").await.unwrap(), "{path}");
    }
}

#[tokio::test]
async fn test_remove_clear_and_keys() {
    for (path, service) in services() {
        service.set_item("a", &1).await.unwrap();
        service.set_item("b", &2).await.unwrap();

        let mut keys = service.keys().await.unwrap();
        keys.sort();
        assert_eq!(keys, vec!["a", "b"], "{path}");

        service.remove_item("a").await.unwrap();
        service.remove_item("a").await.unwrap();
        assert!(!service.has("a").await.unwrap(), "{path}");

        service.clear().await.unwrap();
        service.clear().await.unwrap();
        assert!(service.is_empty().await.unwrap(), "{path}");
    }
}

#[tokio::test]
async fn test_concurrent_writes_last_issued_wins() {
    for (path, service) in services() {
        let (first, second) = tokio::join!(
            service.set_item("k", &1),
            service.set_item("k", &2),
        );
        first.unwrap();
        second.unwrap();
        let value: Option<i32> = service.get_item("k").await.unwrap();
        assert_eq!(value, Some(2), "{path}");
    }
}

#[tokio::test]
async fn test_wrong_target_type_is_deserialization_error() {
    let service = primary_service();
    service.set_item("k", "not a number").await.unwrap();

    match service.get_item::<u64>("k").await.unwrap_err() {
        ServiceError::Storage(StorageError::Deserialization { key, .. }) => assert_eq!(key, "k"),
        other => panic!("expected Deserialization, got: {other:?}"),
    }
}

#[tokio::test]
async fn test_corrupt_fallback_text_is_deserialization_error() {
    let store = Arc::new(MemoryKeyValueStore::new());
    store.set("broken", "{oops").unwrap();
    let service = StorageService::new(Arc::new(FallbackBackend::from_shared(store)));

    let err = service.get_item::<Value>("broken").await.unwrap_err();
    assert!(matches!(
        err,
        ServiceError::Storage(StorageError::Deserialization { .. })
    ));
}

// ===========================================================================
// Schema validation on read
// ===========================================================================

#[tokio::test]
async fn test_schema_pass() {
    for (path, service) in services() {
        service
            .set_item("profile", &json!({"name": "Ada", "age": 36}))
            .await
            .unwrap();
        let options = ItemOptions::with_schema(profile_schema());
        let read: Option<Profile> = service.get_item_with("profile", &options).await.unwrap();
        assert_eq!(read.map(|p| p.age), Some(36), "{path}");
    }
}

#[tokio::test]
async fn test_schema_mismatch_fails_with_fixed_message() {
    for (path, service) in services() {
        service
            .set_item("profile", &json!({"name": "Ada", "age": "old"}))
            .await
            .unwrap();
        let options = ItemOptions::with_schema(profile_schema());
        let err = service
            .get_item_with::<Value>("profile", &options)
            .await
            .unwrap_err();

        assert!(err.is_validation(), "{path}");
        assert!(err.to_string().starts_with(VALIDATION_MESSAGE), "{path}");
        match err {
            ServiceError::Validation { key, detail } => {
                assert_eq!(key, "profile");
                assert!(detail.contains("$.age"), "{path}: {detail}");
            }
            other => panic!("expected Validation, got: {other:?}"),
        }
    }
}

#[tokio::test]
async fn test_required_property_schema_without_type() {
    let schema = json!({
        "properties": {"expected": {"type": "string"}},
        "required": ["expected"]
    });
    let options = ItemOptions::with_schema(schema);

    for (path, service) in services() {
        service
            .set_item("good", &json!({"expected": "value"}))
            .await
            .unwrap();
        service
            .set_item("bad", &json!({"unexpected": "value"}))
            .await
            .unwrap();

        let good: Option<Value> = service.get_item_with("good", &options).await.unwrap();
        assert_eq!(good, Some(json!({"expected": "value"})), "{path}");

        let err = service
            .get_item_with::<Value>("bad", &options)
            .await
            .unwrap_err();
        assert!(err.is_validation(), "{path}: {err}");
        assert!(err.to_string().starts_with(VALIDATION_MESSAGE), "{path}");
    }
}

#[tokio::test]
async fn test_absent_value_is_never_validated() {
    let validator = Arc::new(CountingValidator::default());
    let backend = Arc::new(EmbeddedDatabaseBackend::new(
        MemoryEngine::new(),
        StorageConfig::default(),
    ));
    let service = StorageService::with_validator(backend, validator.clone());

    let options = ItemOptions::with_schema(json!({"type": "string"}));
    let read: Option<String> = service.get_item_with("missing", &options).await.unwrap();
    assert_eq!(read, None);
    assert_eq!(validator.0.load(Ordering::SeqCst), 0);

    service.set_item("present", "x").await.unwrap();
    let _: Option<String> = service.get_item_with("present", &options).await.unwrap();
    assert_eq!(validator.0.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_malformed_schema_is_distinguishable() {
    let service = primary_service();
    service.set_item("k", &json!({"a": 1})).await.unwrap();

    let options = ItemOptions::with_schema(json!({"minLength": 1}));
    let err = service.get_item_with::<Value>("k", &options).await.unwrap_err();
    assert!(matches!(err, ServiceError::Schema(SchemaError::MissingConstraint)));
    assert!(!err.is_validation());

    // Malformed schemas fail even when the value would be accepted.
    let options = ItemOptions::with_schema(json!({"type": "object", "required": "a"}));
    let err = service.get_item_with::<Value>("k", &options).await.unwrap_err();
    assert!(matches!(err, ServiceError::Schema(SchemaError::InvalidKeyword { .. })));
}

#[tokio::test]
async fn test_bundled_validator_accepts_matching_value() {
    let verdict = JsonSchemaValidator
        .validate(&json!("x"), &json!({"type": "string"}))
        .unwrap();
    assert!(verdict.is_valid());
}

// ===========================================================================
// Fire-and-forget
// ===========================================================================

#[tokio::test]
async fn test_subscribe_variants_issue_before_returning() {
    for (path, service) in services() {
        service.set_item_subscribe("k", &json!({"v": 1}));
        let read: Option<Value> = service.get_item("k").await.unwrap();
        assert_eq!(read, Some(json!({"v": 1})), "{path}");

        service.remove_item_subscribe("k");
        assert!(!service.has("k").await.unwrap(), "{path}");

        service.set_item_subscribe("a", &1);
        service.set_item_subscribe("b", &2);
        service.clear_subscribe();
        assert_eq!(service.len().await.unwrap(), 0, "{path}");
    }
}

#[tokio::test]
async fn test_subscribe_variants_swallow_errors() {
    init_tracing();
    let backend = Arc::new(EmbeddedDatabaseBackend::without_fallback(
        MemoryEngine::unavailable("engine disabled"),
        StorageConfig::default(),
    ));
    let service = StorageService::new(backend.clone());

    service.set_item_subscribe("k", &1);
    service.remove_item_subscribe("k");
    service.clear_subscribe();

    assert_eq!(backend.ready().await, BackendMode::Unavailable);
    // The awaited variant still reports the failure.
    assert!(matches!(
        service.set_item("k", &1).await.unwrap_err(),
        ServiceError::Storage(StorageError::Connection { .. })
    ));
}

// ===========================================================================
// Fallback transition through the facade
// ===========================================================================

#[tokio::test]
async fn test_fallback_transition_is_transparent() {
    let engine = MemoryEngine::new();
    let backend = Arc::new(EmbeddedDatabaseBackend::new(
        engine.clone(),
        StorageConfig::default(),
    ));
    let service = StorageService::new(backend.clone());

    service.set_item("before", "primary").await.unwrap();
    assert_eq!(backend.mode(), BackendMode::Primary);

    engine.invalidate_connections();
    service.set_item("after", "fallback").await.unwrap();
    let read: Option<String> = service.get_item("after").await.unwrap();
    assert_eq!(read.as_deref(), Some("fallback"));
    assert_eq!(backend.mode(), BackendMode::Fallback);
}

#[cfg(feature = "redb-engine")]
#[tokio::test]
async fn test_persistent_engine_through_service() {
    use keystash_storage::RedbEngine;

    let dir = tempfile::tempdir().unwrap();
    let service = StorageService::embedded(RedbEngine::new(dir.path()), StorageConfig::default());

    let ada = Profile {
        name: "Ada".to_string(),
        age: 36,
    };
    service.set_item("profile", &ada).await.unwrap();
    let options = ItemOptions::with_schema(profile_schema());
    let read: Option<Profile> = service.get_item_with("profile", &options).await.unwrap();
    assert_eq!(read, Some(ada));
}
