#![no_main]

//! Fuzz target for delivery request parsing and validation.
//!
//! Whatever the API receives is deserialized into `NewDelivery` and
//! validated. Neither step may panic, and a request that validates must
//! survive a serialize round trip unchanged.

use libfuzzer_sys::fuzz_target;
use outbound_core::NewDelivery;

fuzz_target!(|data: &[u8]| {
    let Ok(request) = serde_json::from_slice::<NewDelivery>(data) else {
        return;
    };

    if request.validate().is_err() {
        return;
    }

    let encoded = serde_json::to_vec(&request).expect("valid request serializes");
    let decoded: NewDelivery = serde_json::from_slice(&encoded).expect("round trip parses");
    assert_eq!(decoded, request);
});
