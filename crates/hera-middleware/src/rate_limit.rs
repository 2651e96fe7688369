//! Tenant rate limiting.
//!
//! Counters are keyed by `(organization, budget class)`, so a tenant's
//! aggregate usage is bounded no matter how many actors it has. Two counting
//! strategies share one store interface:
//!
//! - **Fixed window**: counts reset at window boundaries aligned to the
//!   wall clock.
//! - **Sliding window**: admitted timestamps are kept and pruned against
//!   `now - window`.
//!
//! Denied requests are not counted. A store failure admits the request when
//! `fail_open` is set and marks the decision as degraded.

use crate::error::StoreError;
use async_trait::async_trait;
use dashmap::DashMap;
use hera_config::{RateLimitConfig, RateLimitStrategy};
use hera_core::{GatewayError, OperationClass, OrgContext, SharedClock, SystemClock};
use http::header::{HeaderMap, HeaderName, HeaderValue};
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::warn;

/// Rate limit header names.
pub mod headers {
    /// Budget for the window.
    pub const LIMIT: &str = "x-ratelimit-limit";
    /// Requests left in the window.
    pub const REMAINING: &str = "x-ratelimit-remaining";
    /// Unix time (seconds) at which the window resets.
    pub const RESET: &str = "x-ratelimit-reset";
}

/// Budget a request counts against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BudgetClass {
    /// READ operations.
    Read,
    /// WRITE operations.
    Write,
    /// FINANCE operations.
    Finance,
    /// Any operation by a privileged role.
    Privileged,
}

impl BudgetClass {
    /// Returns the canonical upper-case name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Read => "READ",
            Self::Write => "WRITE",
            Self::Finance => "FINANCE",
            Self::Privileged => "PRIVILEGED",
        }
    }
}

impl From<OperationClass> for BudgetClass {
    fn from(class: OperationClass) -> Self {
        match class {
            OperationClass::Read => Self::Read,
            OperationClass::Write => Self::Write,
            OperationClass::Finance => Self::Finance,
        }
    }
}

/// Counter key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RateLimitKey {
    /// Tenant.
    pub organization_id: String,
    /// Budget.
    pub class: BudgetClass,
}

/// Parameters of one counting call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowSpec {
    /// Budget for the window.
    pub limit: u32,
    /// Window length in milliseconds.
    pub window_ms: u64,
    /// Counting strategy.
    pub strategy: RateLimitStrategy,
    /// Counter lifetime beyond the window, in milliseconds.
    pub ttl_buffer_ms: u64,
}

/// Counter state after a counting call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowState {
    /// Whether the request was counted.
    pub allowed: bool,
    /// Requests counted in the current window.
    pub count: u32,
    /// Unix time (milliseconds) at which capacity frees up.
    pub reset_at_ms: u64,
}

/// Key-addressed atomic counter store.
///
/// `hit` must check and increment atomically per key.
#[async_trait]
pub trait RateLimitStore: Send + Sync + 'static {
    /// Counts a request against `key` if the window has capacity.
    async fn hit(
        &self,
        key: &RateLimitKey,
        spec: &WindowSpec,
        now_ms: u64,
    ) -> Result<WindowState, StoreError>;

    /// Drops expired counters, returning how many were removed.
    async fn sweep(&self, now_ms: u64) -> Result<usize, StoreError>;
}

#[derive(Debug)]
struct Counter {
    window_start_ms: u64,
    count: u32,
    timestamps: VecDeque<u64>,
    expires_at_ms: u64,
}

/// In-process counter store backed by a sharded map.
///
/// Each `hit` holds only the shard lock of its key.
#[derive(Debug, Default)]
pub struct MemoryRateLimitStore {
    counters: DashMap<RateLimitKey, Counter>,
}

impl MemoryRateLimitStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of live counters.
    #[must_use]
    pub fn len(&self) -> usize {
        self.counters.len()
    }

    /// Returns `true` if no counters exist.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.counters.is_empty()
    }
}

#[async_trait]
impl RateLimitStore for MemoryRateLimitStore {
    async fn hit(
        &self,
        key: &RateLimitKey,
        spec: &WindowSpec,
        now_ms: u64,
    ) -> Result<WindowState, StoreError> {
        let window_ms = spec.window_ms.max(1);
        let mut counter = self.counters.entry(key.clone()).or_insert_with(|| Counter {
            window_start_ms: now_ms - now_ms % window_ms,
            count: 0,
            timestamps: VecDeque::new(),
            expires_at_ms: 0,
        });

        let state = match spec.strategy {
            RateLimitStrategy::FixedWindow => {
                let window_start = now_ms - now_ms % window_ms;
                if counter.window_start_ms != window_start {
                    counter.window_start_ms = window_start;
                    counter.count = 0;
                }
                let allowed = counter.count < spec.limit;
                if allowed {
                    counter.count += 1;
                }
                let reset_at_ms = window_start + window_ms;
                counter.expires_at_ms = reset_at_ms + spec.ttl_buffer_ms;
                WindowState {
                    allowed,
                    count: counter.count,
                    reset_at_ms,
                }
            }
            RateLimitStrategy::SlidingWindow => {
                let cutoff = now_ms.saturating_sub(window_ms);
                while counter.timestamps.front().is_some_and(|&t| t <= cutoff) {
                    counter.timestamps.pop_front();
                }
                let allowed = counter.timestamps.len() < spec.limit as usize;
                if allowed {
                    counter.timestamps.push_back(now_ms);
                }
                let oldest = counter.timestamps.front().copied().unwrap_or(now_ms);
                let newest = counter.timestamps.back().copied().unwrap_or(now_ms);
                counter.expires_at_ms = newest + window_ms + spec.ttl_buffer_ms;
                WindowState {
                    allowed,
                    count: u32::try_from(counter.timestamps.len()).unwrap_or(u32::MAX),
                    reset_at_ms: oldest + window_ms,
                }
            }
        };
        Ok(state)
    }

    async fn sweep(&self, now_ms: u64) -> Result<usize, StoreError> {
        let before = self.counters.len();
        self.counters.retain(|_, counter| counter.expires_at_ms > now_ms);
        Ok(before.saturating_sub(self.counters.len()))
    }
}

/// Outcome of a rate-limit check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RateLimitDecision {
    /// Whether the request is admitted.
    pub allowed: bool,
    /// Budget the request counted against.
    pub class: BudgetClass,
    /// Budget for the window.
    pub limit: u32,
    /// Requests left in the window.
    pub remaining: u32,
    /// Unix time (seconds) at which the window resets.
    pub reset_at: u64,
    /// Seconds until capacity frees up, always at least 1.
    pub retry_after_seconds: u64,
    /// Admitted without counting because the store failed.
    pub degraded: bool,
}

impl RateLimitDecision {
    /// Writes `X-RateLimit-*` headers.
    pub fn apply_headers(&self, headers: &mut HeaderMap) {
        headers.insert(HeaderName::from_static(headers::LIMIT), HeaderValue::from(self.limit));
        headers.insert(
            HeaderName::from_static(headers::REMAINING),
            HeaderValue::from(self.remaining),
        );
        headers.insert(HeaderName::from_static(headers::RESET), HeaderValue::from(self.reset_at));
    }

    /// Converts a denial into the 429 error.
    #[must_use]
    pub fn to_error(&self) -> GatewayError {
        GatewayError::rate_limited(self.limit, self.reset_at, self.retry_after_seconds)
    }
}

/// Tenant rate limiter.
///
/// # Example
///
/// ```rust
/// use hera_config::RateLimitConfig;
/// use hera_core::{Membership, OperationClass, OrgContext};
/// use hera_middleware::RateLimiter;
///
/// # tokio_test::block_on(async {
/// let limiter = RateLimiter::in_memory(RateLimitConfig::default());
/// let org = OrgContext::from_membership(&Membership::new("org-A", ["member"]));
///
/// let decision = limiter.check(&org, OperationClass::Write).await.unwrap();
/// assert!(decision.allowed);
/// assert_eq!(decision.remaining, 59);
/// # });
/// ```
pub struct RateLimiter {
    config: RateLimitConfig,
    store: Arc<dyn RateLimitStore>,
    clock: SharedClock,
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl RateLimiter {
    /// Creates a limiter over `store`.
    #[must_use]
    pub fn new(config: RateLimitConfig, store: Arc<dyn RateLimitStore>, clock: SharedClock) -> Self {
        Self {
            config,
            store,
            clock,
        }
    }

    /// Creates a limiter with an in-process store and the system clock.
    #[must_use]
    pub fn in_memory(config: RateLimitConfig) -> Self {
        Self::new(
            config,
            Arc::new(MemoryRateLimitStore::new()),
            SystemClock::shared(),
        )
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// Selects the budget for a request.
    #[must_use]
    pub fn budget_class(&self, org: &OrgContext, class: OperationClass) -> BudgetClass {
        if self.config.privileged_roles.iter().any(|role| org.has_role(role)) {
            BudgetClass::Privileged
        } else {
            class.into()
        }
    }

    /// Returns the budget of a class.
    #[must_use]
    pub fn limit_for(&self, class: BudgetClass) -> u32 {
        match class {
            BudgetClass::Read => self.config.limit_for(OperationClass::Read),
            BudgetClass::Write => self.config.limit_for(OperationClass::Write),
            BudgetClass::Finance => self.config.limit_for(OperationClass::Finance),
            BudgetClass::Privileged => self.config.privileged_limit,
        }
    }

    /// Counts a request for `org` and returns the decision.
    ///
    /// # Errors
    ///
    /// Returns the store error only when the store fails and `fail_open`
    /// is disabled.
    pub async fn check(
        &self,
        org: &OrgContext,
        class: OperationClass,
    ) -> Result<RateLimitDecision, StoreError> {
        let budget = self.budget_class(org, class);
        let limit = self.limit_for(budget);
        let window_ms = self.config.window_secs.saturating_mul(1000);
        let spec = WindowSpec {
            limit,
            window_ms,
            strategy: self.config.strategy,
            ttl_buffer_ms: self.config.ttl_buffer_secs.saturating_mul(1000),
        };
        let key = RateLimitKey {
            organization_id: org.organization_id.clone(),
            class: budget,
        };
        let now_ms = self.clock.now_millis();

        match self.store.hit(&key, &spec, now_ms).await {
            Ok(state) => Ok(RateLimitDecision {
                allowed: state.allowed,
                class: budget,
                limit,
                remaining: limit.saturating_sub(state.count),
                reset_at: state.reset_at_ms.div_ceil(1000),
                retry_after_seconds: state.reset_at_ms.saturating_sub(now_ms).div_ceil(1000).max(1),
                degraded: false,
            }),
            Err(err) if self.config.fail_open => {
                warn!(
                    organization_id = %key.organization_id,
                    class = budget.as_str(),
                    error = %err,
                    "rate limit store failed, admitting request"
                );
                let reset_at_ms = now_ms + window_ms;
                Ok(RateLimitDecision {
                    allowed: true,
                    class: budget,
                    limit,
                    remaining: limit,
                    reset_at: reset_at_ms.div_ceil(1000),
                    retry_after_seconds: self.config.window_secs.max(1),
                    degraded: true,
                })
            }
            Err(err) => Err(err),
        }
    }

    /// Drops expired counters.
    pub async fn sweep(&self) -> usize {
        match self.store.sweep(self.clock.now_millis()).await {
            Ok(removed) => removed,
            Err(err) => {
                warn!(error = %err, "rate limit sweep failed");
                0
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use hera_core::{ManualClock, Membership};
    use std::time::Duration;

    /// Store whose every call fails.
    #[derive(Debug, Default)]
    pub(crate) struct FailingRateLimitStore;

    #[async_trait]
    impl RateLimitStore for FailingRateLimitStore {
        async fn hit(
            &self,
            _key: &RateLimitKey,
            _spec: &WindowSpec,
            _now_ms: u64,
        ) -> Result<WindowState, StoreError> {
            Err(StoreError::unavailable("rate_limit", "connection refused"))
        }

        async fn sweep(&self, _now_ms: u64) -> Result<usize, StoreError> {
            Err(StoreError::unavailable("rate_limit", "connection refused"))
        }
    }

    fn org(id: &str, role: &str) -> OrgContext {
        OrgContext::from_membership(&Membership::new(id, [role]))
    }

    fn limiter(config: RateLimitConfig, clock: &Arc<ManualClock>) -> (RateLimiter, Arc<MemoryRateLimitStore>) {
        let store = Arc::new(MemoryRateLimitStore::new());
        let shared: SharedClock = clock.clone();
        (RateLimiter::new(config, store.clone(), shared), store)
    }

    #[tokio::test]
    async fn test_fixed_window_budget() {
        // Aligned to a minute boundary.
        let clock = Arc::new(ManualClock::new(1_700_000_040_000));
        let (limiter, _) = limiter(RateLimitConfig::default(), &clock);
        let tenant = org("org-A", "member");

        for i in 0..60u32 {
            let decision = limiter.check(&tenant, OperationClass::Write).await.unwrap();
            assert!(decision.allowed, "request {i}");
            assert_eq!(decision.remaining, 59 - i);
        }

        let denied = limiter.check(&tenant, OperationClass::Write).await.unwrap();
        assert!(!denied.allowed);
        assert_eq!(denied.remaining, 0);
        assert_eq!(denied.limit, 60);
        assert_eq!(denied.reset_at, 1_700_000_100);
        assert_eq!(denied.retry_after_seconds, 60);

        clock.advance(Duration::from_secs(60));
        assert!(limiter.check(&tenant, OperationClass::Write).await.unwrap().allowed);
    }

    #[tokio::test]
    async fn test_counters_are_per_tenant_and_class() {
        let clock = Arc::new(ManualClock::new(0));
        let config = RateLimitConfig {
            write_limit: 1,
            ..RateLimitConfig::default()
        };
        let (limiter, store) = limiter(config, &clock);

        assert!(limiter.check(&org("org-A", "member"), OperationClass::Write).await.unwrap().allowed);
        assert!(!limiter.check(&org("org-A", "member"), OperationClass::Write).await.unwrap().allowed);
        assert!(limiter.check(&org("org-B", "member"), OperationClass::Write).await.unwrap().allowed);
        assert!(limiter.check(&org("org-A", "member"), OperationClass::Read).await.unwrap().allowed);
        assert_eq!(store.len(), 3);
    }

    #[tokio::test]
    async fn test_privileged_roles_use_privileged_budget() {
        let clock = Arc::new(ManualClock::new(0));
        let (limiter, _) = limiter(RateLimitConfig::default(), &clock);
        let admin = org("org-A", "platform_admin");

        assert_eq!(limiter.budget_class(&admin, OperationClass::Finance), BudgetClass::Privileged);
        let decision = limiter.check(&admin, OperationClass::Finance).await.unwrap();
        assert_eq!(decision.limit, 1_000);
        assert_eq!(decision.class, BudgetClass::Privileged);
    }

    #[tokio::test]
    async fn test_sliding_window_prunes_old_hits() {
        let clock = Arc::new(ManualClock::new(1_000_000));
        let config = RateLimitConfig {
            strategy: RateLimitStrategy::SlidingWindow,
            write_limit: 2,
            ..RateLimitConfig::default()
        };
        let (limiter, _) = limiter(config, &clock);
        let tenant = org("org-A", "member");

        assert!(limiter.check(&tenant, OperationClass::Write).await.unwrap().allowed);
        clock.advance(Duration::from_secs(30));
        assert!(limiter.check(&tenant, OperationClass::Write).await.unwrap().allowed);

        let denied = limiter.check(&tenant, OperationClass::Write).await.unwrap();
        assert!(!denied.allowed);
        // The first hit leaves the window 30 seconds from now.
        assert_eq!(denied.retry_after_seconds, 30);

        clock.advance(Duration::from_secs(31));
        let decision = limiter.check(&tenant, OperationClass::Write).await.unwrap();
        assert!(decision.allowed);
        assert_eq!(decision.remaining, 0);
    }

    #[tokio::test]
    async fn test_store_failure_fails_open() {
        let limiter = RateLimiter::new(
            RateLimitConfig::default(),
            Arc::new(FailingRateLimitStore),
            Arc::new(ManualClock::new(0)),
        );
        let decision = limiter.check(&org("org-A", "member"), OperationClass::Write).await.unwrap();
        assert!(decision.allowed);
        assert!(decision.degraded);
        assert_eq!(decision.remaining, 60);
    }

    #[tokio::test]
    async fn test_store_failure_fails_closed_when_configured() {
        let config = RateLimitConfig {
            fail_open: false,
            ..RateLimitConfig::default()
        };
        let limiter = RateLimiter::new(config, Arc::new(FailingRateLimitStore), Arc::new(ManualClock::new(0)));
        assert!(limiter.check(&org("org-A", "member"), OperationClass::Write).await.is_err());
    }

    #[tokio::test]
    async fn test_sweep_drops_expired_counters() {
        let clock = Arc::new(ManualClock::new(0));
        let (limiter, store) = limiter(RateLimitConfig::default(), &clock);
        limiter.check(&org("org-A", "member"), OperationClass::Read).await.unwrap();

        assert_eq!(limiter.sweep().await, 0);
        clock.advance(Duration::from_secs(200));
        assert_eq!(limiter.sweep().await, 1);
        assert!(store.is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_hits_never_exceed_budget() {
        let clock = Arc::new(ManualClock::new(0));
        let (limiter, _) = limiter(RateLimitConfig::default(), &clock);
        let limiter = Arc::new(limiter);

        let tasks: Vec<_> = (0..100)
            .map(|_| {
                let limiter = Arc::clone(&limiter);
                tokio::spawn(async move {
                    let tenant = org("org-A", "member");
                    limiter
                        .check(&tenant, OperationClass::Write)
                        .await
                        .unwrap()
                        .allowed
                })
            })
            .collect();

        let mut admitted = 0;
        for task in tasks {
            if task.await.unwrap() {
                admitted += 1;
            }
        }
        assert_eq!(admitted, 60);
    }

    #[test]
    fn test_headers() {
        let decision = RateLimitDecision {
            allowed: true,
            class: BudgetClass::Write,
            limit: 60,
            remaining: 12,
            reset_at: 1_700_000_100,
            retry_after_seconds: 20,
            degraded: false,
        };
        let mut map = HeaderMap::new();
        decision.apply_headers(&mut map);
        assert_eq!(map[headers::LIMIT], "60");
        assert_eq!(map[headers::REMAINING], "12");
        assert_eq!(map[headers::RESET], "1700000100");
    }
}
