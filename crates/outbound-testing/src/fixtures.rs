//! Builders for delivery requests.

use outbound_core::{ContentFormat, DeliveryKind, NewDelivery, Payload, TargetSpec};
use serde_json::{json, Map, Value};

/// Builder for [`NewDelivery`] requests with test defaults.
#[derive(Debug, Clone)]
pub struct DeliveryBuilder {
    targets: Vec<TargetSpec>,
    payload: Payload,
    metadata: Map<String, Value>,
    max_attempts: Option<u32>,
}

impl DeliveryBuilder {
    /// Webhook event with a small JSON body and no targets.
    pub fn webhook() -> Self {
        Self {
            targets: Vec::new(),
            payload: Payload::Raw {
                body: json!({ "event": "test.webhook" }).to_string(),
                content_type: "application/json".to_string(),
                event_type: Some("test.webhook".to_string()),
            },
            metadata: Map::new(),
            max_attempts: None,
        }
    }

    /// Templated message with an empty context and no targets.
    pub fn message(template: &str) -> Self {
        Self {
            targets: Vec::new(),
            payload: Payload::Template {
                template: template.to_string(),
                context: Value::Object(Map::new()),
                format: ContentFormat::Text,
            },
            metadata: Map::new(),
            max_attempts: None,
        }
    }

    /// Adds a literal URL target.
    #[must_use]
    pub fn target_url(mut self, url: impl Into<String>) -> Self {
        self.targets.push(TargetSpec::url(url));
        self
    }

    /// Adds a registry client target.
    #[must_use]
    pub fn target_client(mut self, client_id: impl Into<String>) -> Self {
        self.targets.push(TargetSpec::client(client_id));
        self
    }

    /// Adds a fully specified target.
    #[must_use]
    pub fn target(mut self, spec: TargetSpec) -> Self {
        self.targets.push(spec);
        self
    }

    /// Replaces the raw body. No effect on templated messages.
    #[must_use]
    pub fn body(mut self, new_body: impl Into<String>) -> Self {
        if let Payload::Raw { body, .. } = &mut self.payload {
            *body = new_body.into();
        }
        self
    }

    /// Replaces the template context. No effect on webhooks.
    #[must_use]
    pub fn context(mut self, new_context: Value) -> Self {
        if let Payload::Template { context, .. } = &mut self.payload {
            *context = new_context;
        }
        self
    }

    /// Sets the message format. No effect on webhooks.
    #[must_use]
    pub fn format(mut self, new_format: ContentFormat) -> Self {
        if let Payload::Template { format, .. } = &mut self.payload {
            *format = new_format;
        }
        self
    }

    /// Adds record-level metadata.
    #[must_use]
    pub fn metadata(mut self, key: &str, value: Value) -> Self {
        self.metadata.insert(key.to_string(), value);
        self
    }

    /// Overrides the attempt budget.
    #[must_use]
    pub fn max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }

    /// Builds the request.
    pub fn build(self) -> NewDelivery {
        NewDelivery {
            kind: self.payload.kind(),
            targets: self.targets,
            payload: self.payload,
            metadata: self.metadata,
            max_attempts: self.max_attempts,
        }
    }

    /// Builds the request with a mismatched kind, for validation tests.
    pub fn build_with_kind(self, kind: DeliveryKind) -> NewDelivery {
        NewDelivery { kind, ..self.build() }
    }
}
