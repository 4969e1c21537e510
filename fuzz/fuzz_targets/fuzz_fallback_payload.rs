// SPDX-License-Identifier: PMPL-1.0-or-later
// Fuzz target for reading arbitrary text through the fallback backend

#![no_main]

use std::sync::Arc;

use keystash_storage::{FallbackBackend, MemoryKeyValueStore, StorageBackend, SyncKeyValueStore};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };

    let store = Arc::new(MemoryKeyValueStore::new());
    if store.set("fuzz", text).is_err() {
        return;
    }
    let backend = FallbackBackend::from_shared(store);

    // Corrupt text must come back as an error, never a panic.
    let runtime = tokio::runtime::Builder::new_current_thread()
        .build()
        .expect("runtime");
    let _ = runtime.block_on(backend.get_item("fuzz"));
});
