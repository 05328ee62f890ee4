//! Template rendering for message payloads.
//!
//! Rendering is pure: same template, context, and format always give the
//! same output. The environment is locked down: undefined variables are
//! errors, there is no template loader (so `include`/`import`/`extends`
//! fail), and a fuel budget stops runaway loops. Interpolated values are
//! always escaped for the output format.

use minijinja::{AutoEscape, Environment, UndefinedBehavior};
use outbound_core::ContentFormat;
use serde_json::Value;

use crate::error::{DeliveryError, Result};

/// Fuel granted to one render. Roughly one unit per executed instruction.
pub const DEFAULT_FUEL: u64 = 50_000;

/// Renders message templates into delivery bodies.
#[derive(Debug)]
pub struct TemplateRenderer {
    env: Environment<'static>,
}

impl TemplateRenderer {
    /// Creates a renderer with the default fuel budget.
    pub fn new() -> Self {
        Self::with_fuel(DEFAULT_FUEL)
    }

    /// Creates a renderer with a custom fuel budget.
    pub fn with_fuel(fuel: u64) -> Self {
        let mut env = Environment::new();
        env.set_undefined_behavior(UndefinedBehavior::Strict);
        env.set_fuel(Some(fuel));
        env.set_auto_escape_callback(|name| {
            if name.ends_with(".json") {
                AutoEscape::Json
            } else {
                AutoEscape::Html
            }
        });
        Self { env }
    }

    /// Renders `template` against `context`.
    ///
    /// A `null` context is treated as an empty object.
    ///
    /// # Errors
    ///
    /// Returns `DeliveryError::TemplateError` for syntax errors, undefined
    /// variables, disallowed constructs, fuel exhaustion, or a context that
    /// is not an object.
    pub fn render(&self, template: &str, context: &Value, format: ContentFormat) -> Result<String> {
        let context = match context {
            Value::Object(_) => context.clone(),
            Value::Null => Value::Object(serde_json::Map::new()),
            other => {
                return Err(DeliveryError::template(format!(
                    "context must be an object, got {}",
                    json_type(other)
                )))
            },
        };

        self.env
            .render_named_str(template_name(format), template, context)
            .map_err(|e| DeliveryError::template(e.to_string()))
    }
}

impl Default for TemplateRenderer {
    fn default() -> Self {
        Self::new()
    }
}

// Auto-escaping is chosen from the template name.
fn template_name(format: ContentFormat) -> &'static str {
    match format {
        ContentFormat::Text => "message.txt",
        ContentFormat::Html => "message.html",
        ContentFormat::Json => "message.json",
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
