//! Delivery records, targets, and strongly-typed identifiers.
//!
//! A [`DeliveryRecord`] is one unit of outbound work: a payload addressed to
//! one or more targets. The record carries its own lifecycle state and the
//! append-only history of per-target attempts. State transitions that must
//! happen atomically (claim, commit, requeue) are methods on the record so
//! every store implementation applies them identically under its own lock.

use std::{
    collections::{BTreeMap, HashMap},
    fmt,
};

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::error::{CoreError, Result};

/// Strongly-typed delivery identifier.
///
/// Assigned when a record is created and never changes. Wraps a UUID so it
/// cannot be confused with target identifiers or claim tokens.
///
/// # Example
///
/// ```
/// use outbound_core::models::DeliveryId;
/// let id = DeliveryId::new();
/// println!("enqueued delivery {id}");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeliveryId(pub Uuid);

impl DeliveryId {
    /// Creates a new random delivery ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for DeliveryId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for DeliveryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for DeliveryId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

/// Strongly-typed target identifier.
///
/// Identifies one destination within a record. Per-target results are keyed
/// by this value rather than by URL, so two targets may share a URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TargetId(pub Uuid);

impl TargetId {
    /// Creates a new random target ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TargetId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TargetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque token proving ownership of a claimed record.
///
/// A fresh token is minted on every claim. Commits carrying an older token
/// are rejected as stale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClaimToken(pub Uuid);

impl ClaimToken {
    /// Mints a new claim token.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ClaimToken {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ClaimToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Kind of outbound work a record represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryKind {
    /// A rendered message fanned out to subscribed clients.
    SingleMessage,
    /// A pre-built webhook body delivered verbatim.
    WebhookEvent,
}

impl DeliveryKind {
    /// Returns the wire name of this kind.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::SingleMessage => "single_message",
            Self::WebhookEvent => "webhook_event",
        }
    }
}

impl fmt::Display for DeliveryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Format of a templated message body.
///
/// Chooses the escaping mode applied while rendering and the `format` field
/// of the message envelope sent to each target.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentFormat {
    /// Plain text. Interpolated values are still HTML-escaped.
    #[default]
    Text,
    /// HTML markup.
    Html,
    /// JSON document. Interpolated values are JSON-encoded.
    Json,
}

impl ContentFormat {
    /// Returns the wire name of this format.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Html => "html",
            Self::Json => "json",
        }
    }
}

fn default_content_type() -> String {
    "application/json".to_string()
}

fn empty_context() -> Value {
    Value::Object(Map::new())
}

/// Content to deliver.
///
/// Exactly one shape is valid per [`DeliveryKind`]: webhook events carry a
/// raw body, messages carry a template and its context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Payload {
    /// Body bytes sent as-is.
    Raw {
        /// Request body
        body: String,
        /// Value of the Content-Type header
        #[serde(default = "default_content_type")]
        content_type: String,
        /// Event type forwarded in the `X-Outbound-Event-Type` header
        #[serde(default, skip_serializing_if = "Option::is_none")]
        event_type: Option<String>,
    },
    /// Template rendered once per delivery round.
    Template {
        /// Template source
        template: String,
        /// Variables available to the template
        #[serde(default = "empty_context")]
        context: Value,
        /// Output format
        #[serde(default)]
        format: ContentFormat,
    },
}

impl Payload {
    /// Returns the only record kind this payload shape is valid for.
    pub const fn kind(&self) -> DeliveryKind {
        match self {
            Self::Raw { .. } => DeliveryKind::WebhookEvent,
            Self::Template { .. } => DeliveryKind::SingleMessage,
        }
    }

    /// Returns the event type header value, if any.
    pub fn event_type(&self) -> Option<&str> {
        match self {
            Self::Raw { event_type, .. } => event_type.as_deref(),
            Self::Template { .. } => Some("message"),
        }
    }

    fn is_blank(&self) -> bool {
        match self {
            Self::Raw { body, .. } => body.trim().is_empty(),
            Self::Template { template, .. } => template.trim().is_empty(),
        }
    }

    /// SHA-256 over the stored payload.
    ///
    /// Hashes the template source rather than rendered output, so the digest
    /// is stable across rendering rounds.
    pub fn digest(&self) -> [u8; 32] {
        let mut hasher = Sha256::new();
        match self {
            Self::Raw { body, content_type, .. } => {
                hasher.update(content_type.as_bytes());
                hasher.update([0]);
                hasher.update(body.as_bytes());
            },
            Self::Template { template, context, format } => {
                hasher.update(format.as_str().as_bytes());
                hasher.update([0]);
                hasher.update(template.as_bytes());
                hasher.update([0]);
                hasher.update(context.to_string().as_bytes());
            },
        }
        hasher.finalize().into()
    }
}

/// Lifecycle state of a delivery record.
///
/// ```text
/// Pending ──claim──▶ Claimed ──commit──▶ Succeeded | PartiallyFailed
///    ▲                  │                 Failed | DeadLettered
///    └──────rearm───────┘                       │
///    ▲                                          │
///    └──────────────manual retry────────────────┘ (Failed, DeadLettered)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    /// Waiting for `next_attempt_at`.
    Pending,

    /// Leased by a worker until `next_attempt_at`.
    ///
    /// Transient. An expired lease makes the record claimable again.
    Claimed,

    /// Some targets delivered, the rest permanently rejected.
    PartiallyFailed,

    /// Every target delivered.
    Succeeded,

    /// Permanently rejected or unrenderable.
    Failed,

    /// Transient failures outlasted the attempt budget.
    DeadLettered,
}

impl DeliveryStatus {
    /// Returns the wire name of this status.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Claimed => "claimed",
            Self::PartiallyFailed => "partially_failed",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::DeadLettered => "dead_lettered",
        }
    }

    /// Returns true once no further automatic processing will happen.
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::PartiallyFailed | Self::Succeeded | Self::Failed | Self::DeadLettered)
    }

    /// Returns true if a manual retry may move this record back to pending.
    pub const fn is_retryable(self) -> bool {
        matches!(self, Self::Failed | Self::DeadLettered)
    }
}

impl fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classified result of a single dispatch to a single target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetOutcome {
    /// Target answered 2xx.
    Delivered,
    /// Target refused in a way retrying will not fix.
    RejectedPermanent,
    /// Target failed in a way a later attempt may fix.
    RejectedTransient,
}

impl TargetOutcome {
    /// Returns the wire name of this outcome.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Delivered => "delivered",
            Self::RejectedPermanent => "rejected_permanent",
            Self::RejectedTransient => "rejected_transient",
        }
    }
}

impl fmt::Display for TargetOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One dispatch to one target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetAttempt {
    /// Record attempt this dispatch belonged to (1-based).
    pub attempt_number: u32,
    /// Record generation at dispatch time. See [`DeliveryRecord::generation`].
    #[serde(default)]
    pub generation: u32,
    /// Classified outcome.
    pub outcome: TargetOutcome,
    /// HTTP status if the target responded.
    pub http_status: Option<u16>,
    /// Error description for rejections.
    pub error_detail: Option<String>,
    /// When the dispatch finished.
    pub attempted_at: DateTime<Utc>,
    /// Wall time spent on the request.
    pub duration_ms: u64,
}

/// Resolved destination within a record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Target {
    /// Target identity, stable across attempts.
    pub id: TargetId,
    /// Absolute HTTP(S) URL.
    pub url: String,
    /// Registry client this URL was resolved from, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    /// Per-target metadata merged into message envelopes.
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl Target {
    /// Creates a target for a literal URL.
    pub fn new(url: impl Into<String>) -> Self {
        Self { id: TargetId::new(), url: url.into(), client_id: None, metadata: BTreeMap::new() }
    }
}

/// Where a requested target should be delivered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Destination {
    /// Literal URL.
    Url(String),
    /// Client identifier resolved through the registry at enqueue time.
    ClientId(String),
}

/// Target as supplied by a producer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetSpec {
    /// URL or registry client.
    #[serde(flatten)]
    pub destination: Destination,
    /// Metadata carried onto the resolved target.
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl TargetSpec {
    /// Targets a literal URL.
    pub fn url(url: impl Into<String>) -> Self {
        Self { destination: Destination::Url(url.into()), metadata: BTreeMap::new() }
    }

    /// Targets a registry client.
    pub fn client(client_id: impl Into<String>) -> Self {
        Self { destination: Destination::ClientId(client_id.into()), metadata: BTreeMap::new() }
    }

    /// Adds a metadata entry.
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// Producer request to enqueue a delivery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewDelivery {
    /// Kind of work.
    pub kind: DeliveryKind,
    /// Destinations, in order.
    pub targets: Vec<TargetSpec>,
    /// Content.
    pub payload: Payload,
    /// Record-level metadata forwarded with rendered messages.
    #[serde(default)]
    pub metadata: Map<String, Value>,
    /// Overrides the configured attempt budget.
    #[serde(default)]
    pub max_attempts: Option<u32>,
}

impl NewDelivery {
    /// Checks the request shape before any target is resolved.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::InvalidInput` when the target list is empty, the
    /// payload does not match the kind, the attempt override is zero, the
    /// payload is blank, or a literal URL is not absolute HTTP(S).
    pub fn validate(&self) -> Result<()> {
        if self.targets.is_empty() {
            return Err(CoreError::invalid("at least one target is required"));
        }

        if self.payload.kind() != self.kind {
            return Err(CoreError::invalid(format!(
                "payload type does not match delivery kind {}",
                self.kind
            )));
        }

        if self.max_attempts == Some(0) {
            return Err(CoreError::invalid("max_attempts must be greater than 0"));
        }

        if self.payload.is_blank() {
            return Err(CoreError::invalid("payload content is empty"));
        }

        for spec in &self.targets {
            match &spec.destination {
                Destination::Url(url) => validate_target_url(url)?,
                Destination::ClientId(client_id) if client_id.trim().is_empty() => {
                    return Err(CoreError::invalid("client_id must not be empty"));
                },
                Destination::ClientId(_) => {},
            }
        }

        Ok(())
    }
}

/// Accepts only absolute `http`/`https` URLs with a host.
///
/// # Errors
///
/// Returns `CoreError::InvalidInput` describing why the URL was refused.
pub fn validate_target_url(url: &str) -> Result<()> {
    let parsed = reqwest::Url::parse(url)
        .map_err(|e| CoreError::invalid(format!("invalid target URL {url:?}: {e}")))?;

    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(CoreError::invalid(format!(
            "target URL {url:?} must use http or https, got {}",
            parsed.scheme()
        )));
    }

    if parsed.host_str().is_none_or(str::is_empty) {
        return Err(CoreError::invalid(format!("target URL {url:?} has no host")));
    }

    Ok(())
}

/// What happens to a claimed record once its round is committed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NextAction {
    /// Move to a terminal status.
    Finalize(DeliveryStatus),
    /// Return to pending, eligible again at the given time.
    Rearm {
        /// Earliest next claim
        next_attempt_at: DateTime<Utc>,
    },
}

/// Results of one delivery round plus the decision about what comes next.
#[derive(Debug, Clone, PartialEq)]
pub struct DeliveryCommit {
    /// New per-target attempts to append.
    pub results: Vec<(TargetId, TargetAttempt)>,
    /// Scheduling decision.
    pub action: NextAction,
    /// Summary of the round's failures, `None` when nothing failed.
    pub last_error: Option<String>,
}

/// Delivery record as held by the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryRecord {
    /// Record identity.
    pub id: DeliveryId,
    /// Kind of work.
    pub kind: DeliveryKind,
    /// Resolved destinations in insertion order.
    pub targets: Vec<Target>,
    /// Content.
    pub payload: Payload,
    /// Record-level metadata.
    #[serde(default)]
    pub metadata: Map<String, Value>,
    /// Lifecycle state.
    pub status: DeliveryStatus,
    /// Claims so far, capped at `max_attempts`.
    pub attempt_count: u32,
    /// Attempt budget.
    pub max_attempts: u32,
    /// Manual retries so far. Permanent rejections from an earlier
    /// generation no longer hold their target back.
    #[serde(default)]
    pub generation: u32,
    /// Earliest claim time, or lease expiry while claimed.
    pub next_attempt_at: DateTime<Utc>,
    /// Append-only attempt history per target.
    #[serde(default)]
    pub per_target_results: HashMap<TargetId, Vec<TargetAttempt>>,
    /// Token of the current claim.
    #[serde(default)]
    pub claim_token: Option<ClaimToken>,
    /// Failure summary of the most recent round.
    #[serde(default)]
    pub last_error: Option<String>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last mutation time.
    pub updated_at: DateTime<Utc>,
    /// When a terminal status was reached.
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
}

impl DeliveryRecord {
    /// Builds a pending record from a validated request and its resolved
    /// targets.
    pub fn new(
        request: NewDelivery,
        targets: Vec<Target>,
        default_max_attempts: u32,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: DeliveryId::new(),
            kind: request.kind,
            targets,
            payload: request.payload,
            metadata: request.metadata,
            status: DeliveryStatus::Pending,
            attempt_count: 0,
            max_attempts: request.max_attempts.unwrap_or(default_max_attempts).max(1),
            generation: 0,
            next_attempt_at: now,
            per_target_results: HashMap::new(),
            claim_token: None,
            last_error: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    /// Returns the authoritative (latest) attempt for a target.
    pub fn latest_result(&self, target_id: TargetId) -> Option<&TargetAttempt> {
        self.per_target_results.get(&target_id).and_then(|attempts| attempts.last())
    }

    /// Returns true if the target's latest attempt was delivered.
    pub fn is_delivered(&self, target_id: TargetId) -> bool {
        self.latest_result(target_id).is_some_and(|a| a.outcome == TargetOutcome::Delivered)
    }

    /// Returns true if the target will not be dispatched again in this
    /// generation: it was delivered, or permanently rejected since the last
    /// manual retry.
    pub fn is_settled(&self, target_id: TargetId) -> bool {
        self.latest_result(target_id).is_some_and(|a| match a.outcome {
            TargetOutcome::Delivered => true,
            TargetOutcome::RejectedPermanent => a.generation == self.generation,
            TargetOutcome::RejectedTransient => false,
        })
    }

    /// Targets that still need a dispatch.
    pub fn pending_targets(&self) -> impl Iterator<Item = &Target> {
        self.targets.iter().filter(|target| !self.is_settled(target.id))
    }

    /// Number of dispatches made to a target.
    pub fn dispatch_count(&self, target_id: TargetId) -> usize {
        self.per_target_results.get(&target_id).map_or(0, Vec::len)
    }

    /// Targets whose latest attempt was delivered.
    pub fn delivered_count(&self) -> usize {
        self.targets.iter().filter(|t| self.is_delivered(t.id)).count()
    }

    /// Targets whose latest attempt was a rejection.
    pub fn failed_count(&self) -> usize {
        self.targets
            .iter()
            .filter(|t| self.latest_result(t.id).is_some_and(|a| a.outcome != TargetOutcome::Delivered))
            .count()
    }

    /// SHA-256 of the stored payload.
    pub fn payload_digest(&self) -> [u8; 32] {
        self.payload.digest()
    }

    /// Returns true once no further automatic processing will happen.
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Returns true if a claim at `now` may take this record.
    ///
    /// Pending records are due at `next_attempt_at`; claimed records become
    /// claimable again once their lease (also `next_attempt_at`) expires.
    pub fn is_claimable(&self, now: DateTime<Utc>) -> bool {
        matches!(self.status, DeliveryStatus::Pending | DeliveryStatus::Claimed)
            && now >= self.next_attempt_at
    }

    /// Leases the record to a new owner.
    pub fn claim(&mut self, token: ClaimToken, lease: ChronoDuration, now: DateTime<Utc>) {
        self.status = DeliveryStatus::Claimed;
        self.claim_token = Some(token);
        self.attempt_count = self.attempt_count.saturating_add(1).min(self.max_attempts);
        self.next_attempt_at = now + lease;
        self.updated_at = now;
    }

    /// Returns true if `token` is the live claim on this record.
    pub fn holds_claim(&self, token: ClaimToken) -> bool {
        self.status == DeliveryStatus::Claimed && self.claim_token == Some(token)
    }

    /// Appends a round's results and applies its scheduling decision.
    ///
    /// The caller must have checked [`Self::holds_claim`] under the same
    /// lock.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::InvalidTransition` if a finalize action names a
    /// non-terminal status.
    pub fn apply_commit(&mut self, commit: DeliveryCommit, now: DateTime<Utc>) -> Result<()> {
        if let NextAction::Finalize(status) = commit.action {
            if !status.is_terminal() {
                return Err(CoreError::InvalidTransition { from: self.status, to: status });
            }
        }

        for (target_id, attempt) in commit.results {
            self.per_target_results.entry(target_id).or_default().push(attempt);
        }

        match commit.action {
            NextAction::Finalize(status) => {
                self.status = status;
                self.completed_at = Some(now);
            },
            NextAction::Rearm { next_attempt_at } => {
                self.status = DeliveryStatus::Pending;
                self.next_attempt_at = next_attempt_at;
            },
        }

        self.claim_token = None;
        self.last_error = commit.last_error;
        self.updated_at = now;
        Ok(())
    }

    /// Moves a failed or dead-lettered record back to pending with a fresh
    /// attempt budget. Delivered targets stay delivered.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::InvalidTransition` from any other status.
    pub fn requeue(&mut self, now: DateTime<Utc>) -> Result<()> {
        if !self.status.is_retryable() {
            return Err(CoreError::InvalidTransition {
                from: self.status,
                to: DeliveryStatus::Pending,
            });
        }

        self.status = DeliveryStatus::Pending;
        self.attempt_count = 0;
        self.generation += 1;
        self.next_attempt_at = now;
        self.claim_token = None;
        self.completed_at = None;
        self.last_error = None;
        self.updated_at = now;
        Ok(())
    }
}

/// Offset pagination request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRequest {
    /// Records to skip.
    #[serde(default)]
    pub offset: usize,
    /// Maximum records to return.
    #[serde(default = "PageRequest::default_limit")]
    pub limit: usize,
}

impl PageRequest {
    /// Largest page a caller may request.
    pub const MAX_LIMIT: usize = 500;

    const fn default_limit() -> usize {
        50
    }

    /// Creates a page request.
    pub const fn new(offset: usize, limit: usize) -> Self {
        Self { offset, limit }
    }

    /// Clamps the limit into `1..=MAX_LIMIT`.
    #[must_use]
    pub fn normalized(self) -> Self {
        Self { offset: self.offset, limit: self.limit.clamp(1, Self::MAX_LIMIT) }
    }
}

impl Default for PageRequest {
    fn default() -> Self {
        Self { offset: 0, limit: Self::default_limit() }
    }
}

/// One page of results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page<T> {
    /// Items on this page.
    pub items: Vec<T>,
    /// Total matching items.
    pub total: usize,
    /// Offset of this page.
    pub offset: usize,
    /// Offset of the next page, if any.
    pub next_offset: Option<usize>,
}

impl<T> Page<T> {
    /// Slices a fully ordered result set into a page.
    pub fn from_ordered(all: Vec<T>, request: PageRequest) -> Self {
        let request = request.normalized();
        let total = all.len();
        let items: Vec<T> = all.into_iter().skip(request.offset).take(request.limit).collect();
        let end = request.offset.saturating_add(items.len());
        let next_offset = (end < total).then_some(end);
        Self { items, total, offset: request.offset, next_offset }
    }
}
