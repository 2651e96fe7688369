//! Periodic eviction of expired state.
//!
//! One task wakes on a fixed interval and sweeps, in turn, the rate-limit
//! counters, idempotency records, admission source records, and the
//! identity cache. Each store locks one shard or entry at a time, so a
//! sweep never holds up request-path updates for more than one entry.

use std::sync::Arc;
use std::time::Duration;

use hera_middleware::{IdempotencyManager, IdentityCache, RateLimiter};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use crate::admission::AdmissionFilter;
use crate::shutdown::ShutdownSignal;

/// Entries removed by one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Expired rate-limit windows.
    pub rate_limit: usize,
    /// Expired idempotency records.
    pub idempotency: usize,
    /// Idle admission source records.
    pub admission: usize,
    /// Expired identity cache entries.
    pub identity: usize,
}

impl SweepReport {
    /// Returns the total number of removed entries.
    #[must_use]
    pub fn total(&self) -> usize {
        self.rate_limit + self.idempotency + self.admission + self.identity
    }
}

/// The sweep task.
#[derive(Debug, Clone)]
pub struct Sweeper {
    rate_limiter: Arc<RateLimiter>,
    idempotency: Arc<IdempotencyManager>,
    admission: Arc<AdmissionFilter>,
    identity_cache: Arc<IdentityCache>,
    interval: Duration,
}

impl Sweeper {
    /// Creates a sweeper over the shared stores.
    pub fn new(
        rate_limiter: Arc<RateLimiter>,
        idempotency: Arc<IdempotencyManager>,
        admission: Arc<AdmissionFilter>,
        identity_cache: Arc<IdentityCache>,
        interval: Duration,
    ) -> Self {
        Self {
            rate_limiter,
            idempotency,
            admission,
            identity_cache,
            interval,
        }
    }

    /// Sweeps every store once.
    pub async fn sweep_once(&self) -> SweepReport {
        let report = SweepReport {
            rate_limit: self.rate_limiter.sweep().await,
            idempotency: self.idempotency.sweep().await,
            admission: self.admission.sweep(),
            identity: self.identity_cache.sweep(),
        };
        debug!(
            rate_limit = report.rate_limit,
            idempotency = report.idempotency,
            admission = report.admission,
            identity = report.identity,
            "sweep finished"
        );
        report
    }

    /// Runs sweeps until `shutdown` triggers.
    pub fn spawn(self, shutdown: ShutdownSignal) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticker.tick().await;

            let stopped = shutdown.recv();
            tokio::pin!(stopped);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        self.sweep_once().await;
                    }
                    () = &mut stopped => break,
                }
            }
            info!("sweeper stopped");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hera_config::{AdmissionConfig, IdempotencyConfig, RateLimitConfig};
    use hera_core::{Actor, ManualClock, Membership, OperationClass, OrgContext, SharedClock};
    use hera_middleware::{MemoryIdempotencyStore, MemoryRateLimitStore};
    use hera_telemetry::{LogContext, LoggerConfig, StructuredLogger};

    struct Stores {
        clock: Arc<ManualClock>,
        sweeper: Sweeper,
        rate_limiter: Arc<RateLimiter>,
        admission: Arc<AdmissionFilter>,
        identity_cache: Arc<IdentityCache>,
    }

    fn stores(interval: Duration) -> Stores {
        let clock = Arc::new(ManualClock::new(1_700_000_000_000));
        let shared: SharedClock = clock.clone();
        let logger = Arc::new(StructuredLogger::new(LoggerConfig::default()));
        let rate_limiter = Arc::new(RateLimiter::new(
            RateLimitConfig::default(),
            Arc::new(MemoryRateLimitStore::new()),
            Arc::clone(&shared),
        ));
        let idempotency = Arc::new(IdempotencyManager::new(
            IdempotencyConfig::default(),
            Arc::new(MemoryIdempotencyStore::new()),
            Arc::clone(&shared),
        ));
        let admission = Arc::new(AdmissionFilter::with_clock(
            AdmissionConfig::default(),
            logger,
            Arc::clone(&shared),
        ));
        let identity_cache = Arc::new(IdentityCache::new(
            Duration::from_secs(300),
            100,
            Arc::clone(&shared),
        ));
        let sweeper = Sweeper::new(
            Arc::clone(&rate_limiter),
            idempotency,
            Arc::clone(&admission),
            Arc::clone(&identity_cache),
            interval,
        );
        Stores {
            clock,
            sweeper,
            rate_limiter,
            admission,
            identity_cache,
        }
    }

    fn org() -> OrgContext {
        OrgContext::from_membership(&Membership::new("org-A", ["member"]))
    }

    #[tokio::test]
    async fn test_sweep_once_evicts_expired_state() {
        let s = stores(Duration::from_secs(60));
        s.rate_limiter
            .check(&org(), OperationClass::Write)
            .await
            .unwrap();
        let (head, _) = http::Request::get("/")
            .header("user-agent", "hera-client/1.0")
            .body(())
            .unwrap()
            .into_parts();
        drop(s.admission.admit(&head, "10.0.0.1", &LogContext::new("r")).unwrap());
        s.identity_cache
            .insert("token", Arc::new(Actor::new("user-1", "u@example.com")));

        assert_eq!(s.sweeper.sweep_once().await.total(), 0);

        s.clock.advance(Duration::from_secs(25 * 3600));
        let report = s.sweeper.sweep_once().await;
        assert_eq!(report.rate_limit, 1);
        assert_eq!(report.admission, 1);
        assert_eq!(report.identity, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_spawned_sweeper_stops_on_shutdown() {
        let s = stores(Duration::from_secs(60));
        let shutdown = ShutdownSignal::new();
        let handle = s.sweeper.spawn(shutdown.clone());

        tokio::time::sleep(Duration::from_secs(180)).await;
        shutdown.trigger();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("sweeper should stop")
            .expect("sweeper should not panic");
    }
}
