//! Perimeter admission filter.
//!
//! Every request passes the filter before route resolution. The checks
//! run in a fixed order and the first failure rejects:
//!
//! | # | Check          | Rejects when                                      | Risk     | Status |
//! |---|----------------|---------------------------------------------------|----------|--------|
//! | 1 | `body_size`    | `Content-Length` over the general or upload cap   | MEDIUM   | 400    |
//! | 2 | `url_length`   | path and query longer than the URL cap            | MEDIUM   | 400    |
//! | 3 | `header_size`  | header bytes over the header cap                  | MEDIUM   | 400    |
//! | 4 | `request_rate` | hourly cap reached, or source blocked             | HIGH     | 429    |
//! | 5 | `concurrency`  | too many in-flight requests from the source       | HIGH     | 429    |
//! | 6 | `user_agent`   | missing, too short (LOW) or a known scanner       | CRITICAL | 403    |
//! | 7 | `content_type` | write body of a type outside the allow-list       | LOW      | 400    |
//! | 8 | `signature`    | body or query matches an injection signature      | CRITICAL | 403    |
//! | 9 | `reputation`   | score above threshold; the block grows up to 24 h | HIGH     | 429    |
//!
//! Checks 1 to 7 run on the request head in [`AdmissionFilter::admit`];
//! check 8 runs on the buffered body in [`AdmissionFilter::scan`]. Every
//! rejection adds one point to the source's suspicious-activity score,
//! which drives check 9.
//!
//! The filter fails closed: anything it cannot classify is rejected.
//! The only exception is a body that cannot be read as text for the
//! signature scan, which is admitted at MEDIUM risk when
//! `admission.fail_open_on_body_read` is set.

mod signatures;
mod tracking;

pub use signatures::{SignatureFamily, SignatureSet};
pub use tracking::{Block, RateRefusal, SourceTracker, TrackerLimits, TrackerSnapshot};

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use hera_config::AdmissionConfig;
use hera_core::{GatewayError, RiskLevel, SharedClock, SystemClock};
use hera_telemetry::{metrics, LogContext, StructuredLogger};
use http::header::{CONTENT_LENGTH, CONTENT_TYPE, USER_AGENT};
use http::request::Parts;
use http::Method;
use serde::Serialize;
use serde_json::json;
use tracing::debug;

const BLOCKED_CODE: &str = "SOURCE_BLOCKED";

/// One of the nine admission checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AdmissionCheck {
    /// Payload size.
    BodySize,
    /// URL length.
    UrlLength,
    /// Total header bytes.
    HeaderSize,
    /// Hourly request rate and rate blocks.
    RequestRate,
    /// In-flight requests per source.
    Concurrency,
    /// User-agent sanity.
    UserAgent,
    /// Content-type allow-list for writes.
    ContentType,
    /// Injection signatures.
    Signature,
    /// Suspicious-activity score.
    Reputation,
}

impl AdmissionCheck {
    /// All checks in evaluation order.
    pub const ALL: [Self; 9] = [
        Self::BodySize,
        Self::UrlLength,
        Self::HeaderSize,
        Self::RequestRate,
        Self::Concurrency,
        Self::UserAgent,
        Self::ContentType,
        Self::Signature,
        Self::Reputation,
    ];

    /// Returns the check name used in logs and metrics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::BodySize => "body_size",
            Self::UrlLength => "url_length",
            Self::HeaderSize => "header_size",
            Self::RequestRate => "request_rate",
            Self::Concurrency => "concurrency",
            Self::UserAgent => "user_agent",
            Self::ContentType => "content_type",
            Self::Signature => "signature",
            Self::Reputation => "reputation",
        }
    }

    const fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for AdmissionCheck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A request the filter turned away.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdmissionRejection {
    /// Failing check.
    pub check: AdmissionCheck,
    /// Risk assigned to the request.
    pub risk: RiskLevel,
    /// Machine-readable code.
    pub code: &'static str,
    /// Human-readable reason.
    pub message: String,
    /// Seconds until the source may retry.
    pub retry_after_seconds: Option<u64>,
}

impl AdmissionRejection {
    fn new(check: AdmissionCheck, risk: RiskLevel, code: &'static str, message: String) -> Self {
        Self {
            check,
            risk,
            code,
            message,
            retry_after_seconds: None,
        }
    }

    fn retry_after(mut self, seconds: u64) -> Self {
        self.retry_after_seconds = Some(seconds);
        self
    }

    /// Converts the rejection to the gateway error served to the client.
    #[must_use]
    pub fn to_error(&self) -> GatewayError {
        GatewayError::admission(
            self.code,
            self.message.clone(),
            self.risk,
            self.retry_after_seconds,
        )
    }
}

impl From<AdmissionRejection> for GatewayError {
    fn from(rejection: AdmissionRejection) -> Self {
        rejection.to_error()
    }
}

/// Proof of admission. Holds the source's in-flight slot until dropped.
///
/// A permit that is never dropped (a stalled client, a leaked task) is
/// reclaimed once the slot is older than `concurrent_release_secs`.
#[derive(Debug)]
pub struct AdmissionPermit {
    slot: Option<(Arc<SourceTracker>, String, u64)>,
    risk: RiskLevel,
}

impl AdmissionPermit {
    fn unchecked() -> Self {
        Self {
            slot: None,
            risk: RiskLevel::Low,
        }
    }

    /// Returns the risk assigned to the admitted request.
    #[must_use]
    pub fn risk(&self) -> RiskLevel {
        self.risk
    }

    fn raise_risk(&mut self, risk: RiskLevel) {
        self.risk = self.risk.max(risk);
    }
}

impl Drop for AdmissionPermit {
    fn drop(&mut self) {
        if let Some((tracker, source, slot)) = self.slot.take() {
            tracker.release_slot(&source, slot);
        }
    }
}

/// Snapshot of filter state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AdmissionStats {
    /// Sources with a tracking record.
    pub tracked_sources: usize,
    /// Sources currently blocked.
    pub blocked_sources: usize,
    /// In-flight slots held.
    pub in_flight: usize,
    /// Requests admitted.
    pub admitted: u64,
    /// Rejections by check name.
    pub rejections: BTreeMap<&'static str, u64>,
}

impl AdmissionStats {
    /// Returns the total number of rejections.
    #[must_use]
    pub fn total_rejections(&self) -> u64 {
        self.rejections.values().sum()
    }
}

/// The perimeter admission filter.
///
/// # Example
///
/// ```
/// use hera_config::AdmissionConfig;
/// use hera_server::admission::AdmissionFilter;
/// use hera_telemetry::{LogContext, LoggerConfig, StructuredLogger};
/// use std::sync::Arc;
///
/// let logger = Arc::new(StructuredLogger::new(LoggerConfig::default()));
/// let filter = AdmissionFilter::new(AdmissionConfig::default(), logger);
///
/// let (parts, _) = http::Request::get("/api/v2/entities")
///     .header("user-agent", "hera-client/1.0")
///     .body(())
///     .unwrap()
///     .into_parts();
/// let permit = filter.admit(&parts, "10.0.0.1", &LogContext::new("req-1")).unwrap();
/// assert_eq!(filter.stats().in_flight, 1);
/// drop(permit);
/// assert_eq!(filter.stats().in_flight, 0);
/// ```
pub struct AdmissionFilter {
    config: AdmissionConfig,
    tracker: Arc<SourceTracker>,
    signatures: SignatureSet,
    logger: Arc<StructuredLogger>,
    clock: SharedClock,
    admitted: AtomicU64,
    rejections: [AtomicU64; 9],
}

impl AdmissionFilter {
    /// Creates a filter on the system clock.
    #[must_use]
    pub fn new(config: AdmissionConfig, logger: Arc<StructuredLogger>) -> Self {
        Self::with_clock(config, logger, SystemClock::shared())
    }

    /// Creates a filter on the given clock.
    #[must_use]
    pub fn with_clock(
        config: AdmissionConfig,
        logger: Arc<StructuredLogger>,
        clock: SharedClock,
    ) -> Self {
        let limits = TrackerLimits {
            max_requests_per_hour: config.max_requests_per_hour,
            rate_block_ms: config.rate_block_secs * 1000,
            max_concurrent: config.max_concurrent_per_source,
            slot_release_ms: config.concurrent_release_secs * 1000,
            reputation_threshold: config.reputation_threshold,
            reputation_block_ms: config.reputation_block_secs * 1000,
            max_block_ms: config.max_block_secs * 1000,
        };
        Self {
            config,
            tracker: Arc::new(SourceTracker::new(limits)),
            signatures: SignatureSet::default_set(),
            logger,
            clock,
            admitted: AtomicU64::new(0),
            rejections: Default::default(),
        }
    }

    /// Returns the filter configuration.
    #[must_use]
    pub fn config(&self) -> &AdmissionConfig {
        &self.config
    }

    /// Runs checks 1 to 7 on the request head.
    ///
    /// # Errors
    ///
    /// Returns the first failing check. The source's score has already
    /// been raised by then.
    pub fn admit(
        &self,
        head: &Parts,
        source: &str,
        log: &LogContext,
    ) -> Result<AdmissionPermit, AdmissionRejection> {
        if !self.config.enabled {
            return Ok(AdmissionPermit::unchecked());
        }
        let now = self.clock.now_millis();

        let outcome = self
            .check_body_size(head)
            .and_then(|()| self.check_url(head))
            .and_then(|()| self.check_headers(head))
            .and_then(|()| self.check_rate(source, now));
        if let Err(rejection) = outcome {
            return Err(self.reject(source, rejection, log, now));
        }

        let permit = match self.tracker.acquire_slot(source, now) {
            Ok(slot) => AdmissionPermit {
                slot: Some((Arc::clone(&self.tracker), source.to_string(), slot)),
                risk: RiskLevel::Low,
            },
            Err(held) => {
                let rejection = AdmissionRejection::new(
                    AdmissionCheck::Concurrency,
                    RiskLevel::High,
                    "TOO_MANY_CONCURRENT_REQUESTS",
                    format!("{held} requests from this source are already in flight"),
                )
                .retry_after(1);
                return Err(self.reject(source, rejection, log, now));
            }
        };

        let outcome = self
            .check_user_agent(head)
            .and_then(|()| self.check_content_type(head))
            .and_then(|()| self.check_query(head));
        match outcome {
            Ok(()) => Ok(permit),
            Err(rejection) => Err(self.reject(source, rejection, log, now)),
        }
    }

    /// Runs check 8 on the buffered body and counts the admission.
    ///
    /// # Errors
    ///
    /// Returns a CRITICAL rejection when an injection signature matches, or
    /// when the body is not text and the filter is configured to fail
    /// closed.
    pub fn scan(
        &self,
        permit: &mut AdmissionPermit,
        body: &[u8],
        source: &str,
        log: &LogContext,
    ) -> Result<(), AdmissionRejection> {
        if !self.config.enabled {
            return Ok(());
        }
        let now = self.clock.now_millis();

        if !body.is_empty() {
            match std::str::from_utf8(body) {
                Ok(text) => {
                    if let Some(family) = self.signatures.first_match(text) {
                        let rejection = AdmissionRejection::new(
                            AdmissionCheck::Signature,
                            RiskLevel::Critical,
                            "MALICIOUS_PAYLOAD",
                            format!("request body matches a {} signature", family.as_str()),
                        );
                        return Err(self.reject(source, rejection, log, now));
                    }
                }
                Err(_) if self.config.fail_open_on_body_read => {
                    permit.raise_risk(RiskLevel::Medium);
                    self.logger.security(
                        log,
                        "admission_scan_skipped",
                        RiskLevel::Medium,
                        json!({ "source": source, "reason": "body is not text", "bytes": body.len() }),
                    );
                }
                Err(_) => {
                    let rejection = AdmissionRejection::new(
                        AdmissionCheck::Signature,
                        RiskLevel::Medium,
                        "UNSCANNABLE_PAYLOAD",
                        "request body could not be scanned".to_string(),
                    );
                    return Err(self.reject(source, rejection, log, now));
                }
            }
        }

        self.admitted.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Drops idle records and reclaims stale in-flight slots.
    ///
    /// Returns the number of records removed.
    pub fn sweep(&self) -> usize {
        let idle = Duration::from_secs(self.config.idle_retention_secs);
        self.tracker
            .sweep(self.clock.now_millis(), duration_millis(idle))
    }

    /// Returns the suspicious-activity score of a source.
    #[must_use]
    pub fn score(&self, source: &str) -> u32 {
        self.tracker.score(source)
    }

    /// Returns the active block on a source.
    #[must_use]
    pub fn block(&self, source: &str) -> Option<Block> {
        self.tracker.block(source, self.clock.now_millis())
    }

    /// Returns a snapshot of filter state.
    #[must_use]
    pub fn stats(&self) -> AdmissionStats {
        let snapshot = self.tracker.snapshot(self.clock.now_millis());
        AdmissionStats {
            tracked_sources: snapshot.tracked,
            blocked_sources: snapshot.blocked,
            in_flight: snapshot.in_flight,
            admitted: self.admitted.load(Ordering::Relaxed),
            rejections: AdmissionCheck::ALL
                .iter()
                .map(|check| {
                    (
                        check.as_str(),
                        self.rejections[check.index()].load(Ordering::Relaxed),
                    )
                })
                .filter(|(_, count)| *count > 0)
                .collect(),
        }
    }

    fn check_body_size(&self, head: &Parts) -> Result<(), AdmissionRejection> {
        let Some(length) = header_str(head, CONTENT_LENGTH.as_str()) else {
            return Ok(());
        };
        let length: u64 = length.trim().parse().map_err(|_| {
            AdmissionRejection::new(
                AdmissionCheck::BodySize,
                RiskLevel::Medium,
                "INVALID_CONTENT_LENGTH",
                "Content-Length is not a number".to_string(),
            )
        })?;

        let cap = if is_upload(head) {
            self.config.max_upload_bytes
        } else {
            self.config.max_body_bytes
        };
        if length > cap {
            return Err(AdmissionRejection::new(
                AdmissionCheck::BodySize,
                RiskLevel::Medium,
                "PAYLOAD_TOO_LARGE",
                format!("payload of {length} bytes exceeds the {cap} byte limit"),
            ));
        }
        Ok(())
    }

    fn check_url(&self, head: &Parts) -> Result<(), AdmissionRejection> {
        let length = head
            .uri
            .path_and_query()
            .map_or(0, |pq| pq.as_str().len());
        if length > self.config.max_url_bytes {
            return Err(AdmissionRejection::new(
                AdmissionCheck::UrlLength,
                RiskLevel::Medium,
                "URL_TOO_LONG",
                format!(
                    "URL of {length} bytes exceeds the {} byte limit",
                    self.config.max_url_bytes
                ),
            ));
        }
        Ok(())
    }

    fn check_headers(&self, head: &Parts) -> Result<(), AdmissionRejection> {
        // name, ": ", value, CRLF
        let size: usize = head
            .headers
            .iter()
            .map(|(name, value)| name.as_str().len() + value.len() + 4)
            .sum();
        if size > self.config.max_header_bytes {
            return Err(AdmissionRejection::new(
                AdmissionCheck::HeaderSize,
                RiskLevel::Medium,
                "HEADERS_TOO_LARGE",
                format!(
                    "headers of {size} bytes exceed the {} byte limit",
                    self.config.max_header_bytes
                ),
            ));
        }
        Ok(())
    }

    fn check_rate(&self, source: &str, now: u64) -> Result<(), AdmissionRejection> {
        self.tracker.count_request(source, now).map_err(|refusal| {
            let block = refusal.block();
            let (check, code, message) = match (refusal, block.cause) {
                (RateRefusal::Exceeded(_), _) => (
                    AdmissionCheck::RequestRate,
                    "SOURCE_RATE_EXCEEDED",
                    format!(
                        "source exceeded {} requests per hour",
                        self.config.max_requests_per_hour
                    ),
                ),
                (RateRefusal::Blocked(_), AdmissionCheck::Reputation) => (
                    AdmissionCheck::Reputation,
                    BLOCKED_CODE,
                    "source is blocked after repeated suspicious requests".to_string(),
                ),
                (RateRefusal::Blocked(_), _) => (
                    AdmissionCheck::RequestRate,
                    BLOCKED_CODE,
                    "source is blocked after exceeding its hourly request allowance".to_string(),
                ),
            };
            AdmissionRejection::new(check, RiskLevel::High, code, message)
                .retry_after(block.retry_after_secs(now))
        })
    }

    fn check_user_agent(&self, head: &Parts) -> Result<(), AdmissionRejection> {
        let agent = header_str(head, USER_AGENT.as_str()).unwrap_or("").trim();
        if agent.len() < self.config.min_user_agent_len {
            return Err(AdmissionRejection::new(
                AdmissionCheck::UserAgent,
                RiskLevel::Low,
                "INVALID_USER_AGENT",
                "User-Agent is missing or too short".to_string(),
            ));
        }

        let lowered = agent.to_ascii_lowercase();
        if let Some(tool) = self
            .config
            .blocked_user_agents
            .iter()
            .find(|tool| lowered.contains(&tool.to_ascii_lowercase()))
        {
            return Err(AdmissionRejection::new(
                AdmissionCheck::UserAgent,
                RiskLevel::Critical,
                "BLOCKED_USER_AGENT",
                format!("User-Agent identifies the `{tool}` scanner"),
            ));
        }
        Ok(())
    }

    fn check_content_type(&self, head: &Parts) -> Result<(), AdmissionRejection> {
        if !is_write(&head.method) || !declares_body(head) {
            return Ok(());
        }

        let essence = header_str(head, CONTENT_TYPE.as_str())
            .and_then(|value| value.split(';').next())
            .map(|value| value.trim().to_ascii_lowercase());
        let allowed = essence.as_deref().is_some_and(|essence| {
            self.config
                .allowed_content_types
                .iter()
                .any(|allowed| allowed.eq_ignore_ascii_case(essence))
        });
        if !allowed {
            return Err(AdmissionRejection::new(
                AdmissionCheck::ContentType,
                RiskLevel::Low,
                "UNSUPPORTED_CONTENT_TYPE",
                format!(
                    "content type `{}` is not accepted",
                    essence.unwrap_or_default()
                ),
            ));
        }
        Ok(())
    }

    fn check_query(&self, head: &Parts) -> Result<(), AdmissionRejection> {
        let Some(query) = head.uri.query() else {
            return Ok(());
        };
        match self.signatures.first_match(query) {
            Some(family) => Err(AdmissionRejection::new(
                AdmissionCheck::Signature,
                RiskLevel::Critical,
                "MALICIOUS_PAYLOAD",
                format!("query string matches a {} signature", family.as_str()),
            )),
            None => Ok(()),
        }
    }

    fn reject(
        &self,
        source: &str,
        mut rejection: AdmissionRejection,
        log: &LogContext,
        now: u64,
    ) -> AdmissionRejection {
        let score = self.tracker.penalize(source, now);
        // Scoring may have lengthened the block this rejection reports.
        if rejection.retry_after_seconds.is_some() {
            if let Some(block) = self.tracker.block(source, now) {
                rejection.retry_after_seconds = Some(block.retry_after_secs(now));
            }
        }

        self.rejections[rejection.check.index()].fetch_add(1, Ordering::Relaxed);
        metrics::record_admission_rejection(rejection.check.as_str(), rejection.risk.as_str());
        self.logger.security(
            log,
            "admission_rejected",
            rejection.risk,
            json!({
                "source": source,
                "check": rejection.check,
                "code": rejection.code,
                "reason": rejection.message,
                "score": score,
                "retry_after_seconds": rejection.retry_after_seconds,
            }),
        );
        debug!(
            source,
            check = rejection.check.as_str(),
            risk = rejection.risk.as_str(),
            score,
            "admission rejected"
        );
        rejection
    }
}

impl fmt::Debug for AdmissionFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdmissionFilter")
            .field("enabled", &self.config.enabled)
            .field("signatures", &self.signatures.len())
            .finish_non_exhaustive()
    }
}

fn header_str<'a>(head: &'a Parts, name: &str) -> Option<&'a str> {
    head.headers.get(name).and_then(|value| value.to_str().ok())
}

fn is_write(method: &Method) -> bool {
    matches!(*method, Method::POST | Method::PUT | Method::PATCH)
}

fn declares_body(head: &Parts) -> bool {
    match header_str(head, CONTENT_LENGTH.as_str()) {
        Some(length) => length.trim() != "0",
        None => head.headers.contains_key(http::header::TRANSFER_ENCODING),
    }
}

fn is_upload(head: &Parts) -> bool {
    header_str(head, CONTENT_TYPE.as_str()).is_some_and(|value| {
        let value = value.to_ascii_lowercase();
        value.starts_with("multipart/") || value.starts_with("application/octet-stream")
    })
}

fn duration_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
