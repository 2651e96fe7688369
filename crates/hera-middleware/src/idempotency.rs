//! Request deduplication.
//!
//! ```text
//!            begin                       complete (2xx)
//!  absent ──────────▶ in-progress ─────────────────────▶ completed
//!    ▲                    │  │                               │
//!    │   release (non-2xx)│  │ stale after timeout           │ retention
//!    └────────────────────┘  └──────▶ replaced by begin      ▼ elapsed
//!    ◀───────────────────────────────────────────────────── evicted
//! ```
//!
//! `begin` is a single atomic transition per key, so two concurrent
//! duplicates can never both start. A duplicate that arrives while the
//! original is in progress is rejected with 409; one that arrives after
//! completion receives the stored response verbatim.

use crate::context::MiddlewareContext;
use crate::error::StoreError;
use crate::types::{Request, Response};
use async_trait::async_trait;
use bytes::Bytes;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use hera_config::IdempotencyConfig;
use hera_core::{GatewayError, OperationClass, SharedClock, SystemClock};
use http::header::{HeaderName, HeaderValue, CONTENT_TYPE};
use http::StatusCode;
use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// Request headers carrying a client-supplied key, in precedence order.
pub const KEY_HEADERS: [&str; 2] = ["idempotency-key", "x-idempotency-key"];

/// Marker header on replayed responses.
pub const REPLAY_HEADER: &str = "idempotent-replay";

/// Shortest accepted client-supplied key.
pub const MIN_KEY_LENGTH: usize = 8;

/// Where an idempotency key came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum KeySource {
    /// Client-supplied header.
    Header,
    /// Derived from the request.
    Derived,
}

impl KeySource {
    /// Returns the name used in logs.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Header => "header",
            Self::Derived => "derived",
        }
    }
}

/// A stored response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedResponse {
    /// Status code.
    pub status: StatusCode,
    /// `Content-Type` of the original response.
    pub content_type: Option<HeaderValue>,
    /// Exact body bytes.
    pub body: Bytes,
}

impl CachedResponse {
    /// Captures a response.
    #[must_use]
    pub fn capture(response: &Response) -> Self {
        Self {
            status: response.status(),
            content_type: response.headers().get(CONTENT_TYPE).cloned(),
            body: response.body().clone(),
        }
    }

    /// Rebuilds the response, marked as a replay.
    #[must_use]
    pub fn to_replay(&self) -> Response {
        let mut response = http::Response::new(self.body.clone());
        *response.status_mut() = self.status;
        if let Some(content_type) = &self.content_type {
            response.headers_mut().insert(CONTENT_TYPE, content_type.clone());
        }
        response.headers_mut().insert(
            HeaderName::from_static(REPLAY_HEADER),
            HeaderValue::from_static("true"),
        );
        response
    }
}

/// Result of an atomic `begin`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BeginOutcome {
    /// A new in-progress record was created; the caller executes.
    Started,
    /// The original request is still running.
    InProgress {
        /// Age of the in-progress record.
        age_ms: u64,
    },
    /// The original request completed.
    Completed(CachedResponse),
}

/// Key-addressed idempotency record store.
#[async_trait]
pub trait IdempotencyStore: Send + Sync + 'static {
    /// Atomically creates an in-progress record unless a live one exists.
    ///
    /// In-progress records older than `stale_after_ms` and completed records
    /// past their expiry are replaced.
    async fn begin(&self, key: &str, now_ms: u64, stale_after_ms: u64)
        -> Result<BeginOutcome, StoreError>;

    /// Marks a record completed with its response.
    async fn complete(
        &self,
        key: &str,
        response: CachedResponse,
        now_ms: u64,
        expires_at_ms: u64,
    ) -> Result<(), StoreError>;

    /// Removes an in-progress record. Completed records are kept.
    async fn release(&self, key: &str) -> Result<(), StoreError>;

    /// Drops expired records, returning how many were removed.
    async fn sweep(&self, now_ms: u64) -> Result<usize, StoreError>;
}

#[derive(Debug, Clone)]
enum RecordState {
    InProgress,
    Completed(CachedResponse),
}

#[derive(Debug, Clone)]
struct IdempotencyRecord {
    state: RecordState,
    created_at_ms: u64,
    expires_at_ms: u64,
}

/// In-process record store backed by a sharded map.
#[derive(Debug, Default)]
pub struct MemoryIdempotencyStore {
    records: DashMap<String, IdempotencyRecord>,
}

impl MemoryIdempotencyStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns `true` if the store holds no records.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[async_trait]
impl IdempotencyStore for MemoryIdempotencyStore {
    async fn begin(
        &self,
        key: &str,
        now_ms: u64,
        stale_after_ms: u64,
    ) -> Result<BeginOutcome, StoreError> {
        let fresh = IdempotencyRecord {
            state: RecordState::InProgress,
            created_at_ms: now_ms,
            expires_at_ms: now_ms + stale_after_ms,
        };
        match self.records.entry(key.to_string()) {
            Entry::Vacant(slot) => {
                slot.insert(fresh);
                Ok(BeginOutcome::Started)
            }
            Entry::Occupied(mut slot) => {
                if slot.get().expires_at_ms <= now_ms {
                    slot.insert(fresh);
                    return Ok(BeginOutcome::Started);
                }
                let record = slot.get();
                Ok(match &record.state {
                    RecordState::Completed(response) => BeginOutcome::Completed(response.clone()),
                    RecordState::InProgress => BeginOutcome::InProgress {
                        age_ms: now_ms.saturating_sub(record.created_at_ms),
                    },
                })
            }
        }
    }

    async fn complete(
        &self,
        key: &str,
        response: CachedResponse,
        now_ms: u64,
        expires_at_ms: u64,
    ) -> Result<(), StoreError> {
        self.records
            .entry(key.to_string())
            .and_modify(|record| {
                record.state = RecordState::Completed(response.clone());
                record.expires_at_ms = expires_at_ms;
            })
            .or_insert_with(|| IdempotencyRecord {
                state: RecordState::Completed(response.clone()),
                created_at_ms: now_ms,
                expires_at_ms,
            });
        Ok(())
    }

    async fn release(&self, key: &str) -> Result<(), StoreError> {
        self.records
            .remove_if(key, |_, record| matches!(record.state, RecordState::InProgress));
        Ok(())
    }

    async fn sweep(&self, now_ms: u64) -> Result<usize, StoreError> {
        let before = self.records.len();
        self.records.retain(|_, record| record.expires_at_ms > now_ms);
        Ok(before.saturating_sub(self.records.len()))
    }
}

/// What the idempotency stage decided for a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdempotencyOutcome {
    /// The route does not participate.
    Exempt,
    /// First sight of the key; the handler runs.
    New {
        /// Store key.
        key: String,
        /// Key origin.
        source: KeySource,
        /// Retention once completed.
        retention: Duration,
    },
    /// Duplicate of a completed request.
    Replay {
        /// Store key.
        key: String,
        /// Key origin.
        source: KeySource,
        /// Stored response.
        response: CachedResponse,
    },
    /// The store failed; the request runs without deduplication.
    Degraded {
        /// Store key.
        key: String,
        /// Key origin.
        source: KeySource,
    },
}

impl IdempotencyOutcome {
    /// Returns the name used in logs and metrics.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Exempt => "exempt",
            Self::New { .. } => "new",
            Self::Replay { .. } => "replay",
            Self::Degraded { .. } => "degraded",
        }
    }
}

/// Derives keys and drives the record lifecycle.
pub struct IdempotencyManager {
    config: IdempotencyConfig,
    store: Arc<dyn IdempotencyStore>,
    clock: SharedClock,
}

impl std::fmt::Debug for IdempotencyManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdempotencyManager")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl IdempotencyManager {
    /// Creates a manager over `store`.
    #[must_use]
    pub fn new(
        config: IdempotencyConfig,
        store: Arc<dyn IdempotencyStore>,
        clock: SharedClock,
    ) -> Self {
        Self {
            config,
            store,
            clock,
        }
    }

    /// Creates a manager with an in-process store and the system clock.
    #[must_use]
    pub fn in_memory(config: IdempotencyConfig) -> Self {
        Self::new(
            config,
            Arc::new(MemoryIdempotencyStore::new()),
            SystemClock::shared(),
        )
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &IdempotencyConfig {
        &self.config
    }

    /// Returns the store key for a request, or `None` if the route is
    /// exempt.
    ///
    /// Keys are scoped to the bound organization and actor, so identical
    /// client keys from different tenants never collide.
    ///
    /// # Errors
    ///
    /// Returns 400 `IDEMPOTENCY_KEY_INVALID` for a malformed client key,
    /// and an internal error if the org binding is missing.
    pub fn resolve_key(
        &self,
        ctx: &MiddlewareContext,
        request: &Request,
    ) -> Result<Option<(String, KeySource)>, GatewayError> {
        if !ctx.route().participates_in_idempotency() {
            return Ok(None);
        }
        let (Some(actor), Some(org)) = (ctx.actor(), ctx.org()) else {
            return Err(GatewayError::internal(
                "idempotency requires a bound actor and organization",
            ));
        };

        let supplied = KEY_HEADERS
            .iter()
            .find_map(|name| request.headers().get(*name));
        if let Some(value) = supplied {
            let token = value
                .to_str()
                .ok()
                .filter(|t| self.is_valid_key(t))
                .ok_or_else(|| {
                    GatewayError::validation(
                        "IDEMPOTENCY_KEY_INVALID",
                        format!(
                            "Idempotency key must be {MIN_KEY_LENGTH}-{} characters of [A-Za-z0-9_-:.]",
                            self.config.max_key_length
                        ),
                    )
                })?;
            let key = format!(
                "idem:h:{}",
                digest(&[org.organization_id.as_str(), actor.id.as_str(), token])
            );
            return Ok(Some((key, KeySource::Header)));
        }

        let canonical = canonical_json(ctx.payload(), &self.config.volatile_fields);
        let body_hash = digest(&[canonical.as_str()]);
        let key = format!(
            "idem:d:{}",
            digest(&[
                org.organization_id.as_str(),
                actor.id.as_str(),
                ctx.method().as_str(),
                ctx.path(),
                body_hash.as_str(),
            ])
        );
        Ok(Some((key, KeySource::Derived)))
    }

    fn is_valid_key(&self, token: &str) -> bool {
        (MIN_KEY_LENGTH..=self.config.max_key_length).contains(&token.len())
            && token
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b':' | b'.'))
    }

    /// Starts tracking a key.
    ///
    /// # Errors
    ///
    /// Returns 409 while the original is in progress, and a 503 store error
    /// only when the store fails and `fail_open` is disabled.
    pub async fn begin(
        &self,
        key: String,
        source: KeySource,
        class: OperationClass,
    ) -> Result<IdempotencyOutcome, GatewayError> {
        let now_ms = self.clock.now_millis();
        let stale_after_ms = self.config.in_progress_timeout_secs.saturating_mul(1000);
        match self.store.begin(&key, now_ms, stale_after_ms).await {
            Ok(BeginOutcome::Started) => Ok(IdempotencyOutcome::New {
                key,
                source,
                retention: self.config.retention_for(class),
            }),
            Ok(BeginOutcome::Completed(response)) => Ok(IdempotencyOutcome::Replay {
                key,
                source,
                response,
            }),
            Ok(BeginOutcome::InProgress { .. }) => Err(GatewayError::idempotency_conflict(key)),
            Err(err) if self.config.fail_open => {
                warn!(key = %key, error = %err, "idempotency store failed, executing without deduplication");
                Ok(IdempotencyOutcome::Degraded { key, source })
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Completes or releases the record of a `New` outcome.
    ///
    /// Only 2xx responses are stored; anything else releases the key so a
    /// retry can execute.
    pub async fn finish(&self, outcome: &IdempotencyOutcome, response: &Response) {
        let IdempotencyOutcome::New { key, retention, .. } = outcome else {
            return;
        };
        let result = if response.status().is_success() {
            let now_ms = self.clock.now_millis();
            let retention_ms = u64::try_from(retention.as_millis()).unwrap_or(u64::MAX);
            self.store
                .complete(
                    key,
                    CachedResponse::capture(response),
                    now_ms,
                    now_ms.saturating_add(retention_ms),
                )
                .await
        } else {
            self.store.release(key).await
        };
        if let Err(err) = result {
            warn!(key = %key, error = %err, "failed to finalize idempotency record");
        }
    }

    /// Drops expired records.
    pub async fn sweep(&self) -> usize {
        match self.store.sweep(self.clock.now_millis()).await {
            Ok(removed) => removed,
            Err(err) => {
                warn!(error = %err, "idempotency sweep failed");
                0
            }
        }
    }
}

fn digest(parts: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part.as_bytes());
        hasher.update([0u8]);
    }
    hex::encode(hasher.finalize())
}

/// Serializes `value` with sorted object keys, dropping members named in
/// `volatile` at any depth.
#[must_use]
pub fn canonical_json(value: &Value, volatile: &[String]) -> String {
    let mut out = String::new();
    write_canonical(value, volatile, &mut out);
    out
}

fn write_canonical(value: &Value, volatile: &[String], out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map
                .keys()
                .filter(|k| !volatile.iter().any(|v| v == *k))
                .collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                let _ = write!(out, "{}:", Value::String(key.clone()));
                write_canonical(&map[key], volatile, out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, volatile, out);
            }
            out.push(']');
        }
        scalar => {
            let _ = write!(out, "{scalar}");
        }
    }
}
