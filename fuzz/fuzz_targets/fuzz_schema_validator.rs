// SPDX-License-Identifier: PMPL-1.0-or-later
// Fuzz target for the JSON schema validator

#![no_main]

use keystash_service::{JsonSchemaValidator, SchemaValidator};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // Split the input into a schema half and a value half.
    let split = data.iter().position(|&b| b == 0).unwrap_or(data.len());
    let (schema, rest) = data.split_at(split);
    let value = rest.get(1..).unwrap_or_default();

    let (Ok(schema), Ok(value)) = (
        serde_json::from_slice::<serde_json::Value>(schema),
        serde_json::from_slice::<serde_json::Value>(value),
    ) else {
        return;
    };

    // Any schema either compiles or is rejected; validation never panics.
    let _ = JsonSchemaValidator.validate(&value, &schema);
});
