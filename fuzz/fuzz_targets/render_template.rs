#![no_main]

//! Fuzz target for template rendering.
//!
//! Arbitrary template sources must either render or fail with a template
//! error. Panics, hangs, and unbounded output are bugs: the fuel budget has
//! to stop every loop.

use libfuzzer_sys::fuzz_target;
use outbound_core::ContentFormat;
use outbound_delivery::{render::TemplateRenderer, DeliveryError};
use serde_json::json;

fuzz_target!(|data: &[u8]| {
    let Ok(template) = std::str::from_utf8(data) else {
        return;
    };

    let renderer = TemplateRenderer::with_fuel(10_000);
    let context = json!({
        "name": "<fuzz>",
        "items": [1, 2, 3],
        "nested": { "value": "x" },
    });

    for format in [ContentFormat::Text, ContentFormat::Html] {
        match renderer.render(template, &context, format) {
            Ok(output) => {
                // Output is bounded by the fuel budget.
                assert!(output.len() < 64 * 1024 * 1024);
            },
            Err(DeliveryError::TemplateError { .. }) => {},
            Err(other) => panic!("unexpected render error: {other}"),
        }
    }
});
