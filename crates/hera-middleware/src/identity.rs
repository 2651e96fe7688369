//! Identity collaborator and the actor cache.
//!
//! Token verification and actor resolution are remote calls. Resolved
//! actors are cached per token for a short TTL; cache keys are SHA-256
//! digests so raw tokens never sit in memory longer than the request.

use crate::error::IdentityError;
use async_trait::async_trait;
use hera_core::{Actor, SharedClock, SystemClock};
use parking_lot::RwLock;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Identity provider used by the auth stage.
#[async_trait]
pub trait IdentityResolver: Send + Sync + 'static {
    /// Verifies a bearer token and returns its stable subject id.
    async fn verify_token(&self, token: &str) -> Result<String, IdentityError>;

    /// Resolves the actor and memberships of a verified subject.
    async fn resolve_actor(&self, subject: &str) -> Result<Actor, IdentityError>;
}

/// Resolver over a fixed token table.
///
/// # Example
///
/// ```rust
/// use hera_core::{Actor, Membership};
/// use hera_middleware::{IdentityResolver, StaticIdentityResolver};
///
/// # tokio_test::block_on(async {
/// let resolver = StaticIdentityResolver::new().with_actor(
///     "token-a",
///     Actor::new("user-1", "a@example.com").with_membership(Membership::new("org-A", ["member"])),
/// );
/// let subject = resolver.verify_token("token-a").await.unwrap();
/// assert_eq!(resolver.resolve_actor(&subject).await.unwrap().id, "user-1");
/// assert!(resolver.verify_token("other").await.is_err());
/// # });
/// ```
#[derive(Debug, Default)]
pub struct StaticIdentityResolver {
    tokens: HashMap<String, String>,
    actors: HashMap<String, Actor>,
    resolutions: AtomicU64,
}

impl StaticIdentityResolver {
    /// Creates an empty resolver.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `token` for `actor`.
    #[must_use]
    pub fn with_actor(mut self, token: impl Into<String>, actor: Actor) -> Self {
        self.tokens.insert(token.into(), actor.id.clone());
        self.actors.insert(actor.id.clone(), actor);
        self
    }

    /// Returns how many actor resolutions were served.
    #[must_use]
    pub fn resolutions(&self) -> u64 {
        self.resolutions.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl IdentityResolver for StaticIdentityResolver {
    async fn verify_token(&self, token: &str) -> Result<String, IdentityError> {
        self.tokens
            .get(token)
            .cloned()
            .ok_or_else(|| IdentityError::invalid_token("unknown token"))
    }

    async fn resolve_actor(&self, subject: &str) -> Result<Actor, IdentityError> {
        self.resolutions.fetch_add(1, Ordering::Relaxed);
        self.actors
            .get(subject)
            .cloned()
            .ok_or_else(|| IdentityError::actor_not_found(subject))
    }
}

/// Cache statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CacheStats {
    /// Lookups served from the cache.
    pub hits: u64,
    /// Lookups that missed.
    pub misses: u64,
    /// Entries evicted for capacity.
    pub evictions: u64,
    /// Live entries.
    pub entries: usize,
}

impl CacheStats {
    /// Hit ratio in `0.0..=1.0`.
    #[must_use]
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

#[derive(Debug, Clone)]
struct CacheEntry {
    actor: Arc<Actor>,
    inserted_ms: u64,
}

/// TTL cache of resolved actors, keyed by token digest.
pub struct IdentityCache {
    ttl: Duration,
    capacity: usize,
    clock: SharedClock,
    entries: RwLock<HashMap<String, CacheEntry>>,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl std::fmt::Debug for IdentityCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentityCache")
            .field("ttl", &self.ttl)
            .field("capacity", &self.capacity)
            .finish_non_exhaustive()
    }
}

impl IdentityCache {
    /// Creates a cache. A zero capacity disables caching.
    #[must_use]
    pub fn new(ttl: Duration, capacity: usize, clock: SharedClock) -> Self {
        Self {
            ttl,
            capacity,
            clock,
            entries: RwLock::new(HashMap::new()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    /// Creates a cache on the system clock.
    #[must_use]
    pub fn with_ttl(ttl: Duration, capacity: usize) -> Self {
        Self::new(ttl, capacity, SystemClock::shared())
    }

    fn digest(token: &str) -> String {
        hex::encode(Sha256::digest(token.as_bytes()))
    }

    fn ttl_ms(&self) -> u64 {
        u64::try_from(self.ttl.as_millis()).unwrap_or(u64::MAX)
    }

    /// Returns the cached actor for `token`, if fresh.
    pub fn get(&self, token: &str) -> Option<Arc<Actor>> {
        if self.capacity == 0 {
            self.misses.fetch_add(1, Ordering::Relaxed);
            return None;
        }
        let now = self.clock.now_millis();
        let key = Self::digest(token);
        let entries = self.entries.read();
        match entries.get(&key) {
            Some(entry) if now.saturating_sub(entry.inserted_ms) < self.ttl_ms() => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(Arc::clone(&entry.actor))
            }
            _ => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Caches `actor` for `token`, evicting the oldest entry when full.
    pub fn insert(&self, token: &str, actor: Arc<Actor>) {
        if self.capacity == 0 {
            return;
        }
        let now = self.clock.now_millis();
        let key = Self::digest(token);
        let mut entries = self.entries.write();

        if entries.len() >= self.capacity && !entries.contains_key(&key) {
            let ttl = self.ttl_ms();
            entries.retain(|_, e| now.saturating_sub(e.inserted_ms) < ttl);
            if entries.len() >= self.capacity {
                let oldest = entries
                    .iter()
                    .min_by_key(|(_, e)| e.inserted_ms)
                    .map(|(k, _)| k.clone());
                if let Some(oldest) = oldest {
                    entries.remove(&oldest);
                    self.evictions.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
        entries.insert(
            key,
            CacheEntry {
                actor,
                inserted_ms: now,
            },
        );
    }

    /// Drops expired entries, returning how many were removed.
    pub fn sweep(&self) -> usize {
        let now = self.clock.now_millis();
        let ttl = self.ttl_ms();
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|_, e| now.saturating_sub(e.inserted_ms) < ttl);
        before - entries.len()
    }

    /// Returns cache statistics.
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            entries: self.entries.read().len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hera_core::ManualClock;

    fn actor(id: &str) -> Arc<Actor> {
        Arc::new(Actor::new(id, format!("{id}@example.com")))
    }

    fn cache(capacity: usize) -> (IdentityCache, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(0));
        let shared: SharedClock = clock.clone();
        (IdentityCache::new(Duration::from_secs(300), capacity, shared), clock)
    }

    #[test]
    fn test_cache_hit_and_expiry() {
        let (cache, clock) = cache(10);
        assert!(cache.get("token").is_none());
        cache.insert("token", actor("user-1"));
        assert_eq!(cache.get("token").unwrap().id, "user-1");

        clock.advance(Duration::from_secs(300));
        assert!(cache.get("token").is_none());

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 2);
        assert!((stats.hit_rate() - 1.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_oldest_entry_evicted_at_capacity() {
        let (cache, clock) = cache(2);
        cache.insert("a", actor("user-a"));
        clock.advance(Duration::from_secs(1));
        cache.insert("b", actor("user-b"));
        clock.advance(Duration::from_secs(1));
        cache.insert("c", actor("user-c"));

        assert!(cache.get("a").is_none());
        assert!(cache.get("b").is_some());
        assert!(cache.get("c").is_some());
        assert_eq!(cache.stats().evictions, 1);
        assert_eq!(cache.stats().entries, 2);
    }

    #[test]
    fn test_sweep_removes_expired() {
        let (cache, clock) = cache(10);
        cache.insert("a", actor("user-a"));
        clock.advance(Duration::from_secs(200));
        cache.insert("b", actor("user-b"));
        clock.advance(Duration::from_secs(150));

        assert_eq!(cache.sweep(), 1);
        assert!(cache.get("b").is_some());
    }

    #[test]
    fn test_zero_capacity_disables_cache() {
        let (cache, _) = cache(0);
        cache.insert("a", actor("user-a"));
        assert!(cache.get("a").is_none());
        assert_eq!(cache.stats().entries, 0);
    }

    #[test]
    fn test_tokens_are_not_stored_verbatim() {
        let (cache, _) = cache(10);
        cache.insert("secret-token", actor("user-a"));
        assert!(!cache.entries.read().contains_key("secret-token"));
    }
}
