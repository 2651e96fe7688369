//! Per-source request tracking: hourly counts, in-flight slots,
//! suspicious-activity score, and blocks.
//!
//! Records live in a sharded map; every update holds only the entry's
//! shard lock for the duration of the update.

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;

use super::AdmissionCheck;

const MINUTE_MS: u64 = 60_000;
const HOUR_MINUTES: u64 = 60;

/// Limits applied by the tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackerLimits {
    /// Requests allowed per source over the trailing hour.
    pub max_requests_per_hour: u32,
    /// Block applied when the hourly cap is hit.
    pub rate_block_ms: u64,
    /// In-flight requests allowed per source.
    pub max_concurrent: u32,
    /// Age after which an unreleased slot is assumed complete.
    pub slot_release_ms: u64,
    /// Score above which reputation blocks start.
    pub reputation_threshold: u32,
    /// First reputation block; doubles with every further rejection.
    pub reputation_block_ms: u64,
    /// Ceiling for any block.
    pub max_block_ms: u64,
}

/// An active block on a source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Block {
    /// Epoch millis when the block lifts.
    pub until: u64,
    /// Check that caused the block.
    pub cause: AdmissionCheck,
}

impl Block {
    /// Seconds left on the block, at least one.
    #[must_use]
    pub fn retry_after_secs(&self, now: u64) -> u64 {
        self.until.saturating_sub(now).div_ceil(1000).max(1)
    }
}

#[derive(Debug, Default)]
struct SourceRecord {
    /// `(minute, count)` buckets, oldest first.
    minutes: VecDeque<(u64, u32)>,
    /// In-flight slot id to acquire time.
    slots: BTreeMap<u64, u64>,
    score: u32,
    block: Option<Block>,
    last_seen: u64,
}

impl SourceRecord {
    fn active_block(&mut self, now: u64) -> Option<Block> {
        match self.block {
            Some(block) if block.until > now => Some(block),
            Some(_) => {
                self.block = None;
                None
            }
            None => None,
        }
    }

    fn prune_minutes(&mut self, now: u64) {
        let current = now / MINUTE_MS;
        while let Some(&(minute, _)) = self.minutes.front() {
            if minute + HOUR_MINUTES > current {
                break;
            }
            self.minutes.pop_front();
        }
    }

    fn hourly_count(&self) -> u64 {
        self.minutes.iter().map(|&(_, count)| u64::from(count)).sum()
    }

    fn expire_slots(&mut self, now: u64, release_after: u64) -> usize {
        let before = self.slots.len();
        self.slots
            .retain(|_, acquired| now.saturating_sub(*acquired) < release_after);
        before - self.slots.len()
    }

    fn extend_block(&mut self, until: u64, cause: AdmissionCheck) {
        let extended = self.block.map_or(true, |current| until > current.until);
        if extended {
            self.block = Some(Block { until, cause });
        }
    }
}

/// Why the hourly counter refused a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateRefusal {
    /// The source was already blocked.
    Blocked(Block),
    /// This request hit the hourly cap and started a block.
    Exceeded(Block),
}

impl RateRefusal {
    /// Returns the block in force.
    #[must_use]
    pub fn block(&self) -> Block {
        match self {
            Self::Blocked(block) | Self::Exceeded(block) => *block,
        }
    }
}

/// Snapshot of tracked sources.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TrackerSnapshot {
    /// Sources with a record.
    pub tracked: usize,
    /// Sources currently blocked.
    pub blocked: usize,
    /// Slots currently held.
    pub in_flight: usize,
}

/// Sharded per-source tracking records.
#[derive(Debug)]
pub struct SourceTracker {
    records: DashMap<String, SourceRecord>,
    limits: TrackerLimits,
    next_slot: AtomicU64,
}

impl SourceTracker {
    /// Creates an empty tracker.
    #[must_use]
    pub fn new(limits: TrackerLimits) -> Self {
        Self {
            records: DashMap::new(),
            limits,
            next_slot: AtomicU64::new(1),
        }
    }

    /// Returns the configured limits.
    #[must_use]
    pub fn limits(&self) -> &TrackerLimits {
        &self.limits
    }

    /// Returns the active block on `source`, if any.
    #[must_use]
    pub fn block(&self, source: &str, now: u64) -> Option<Block> {
        self.records
            .get_mut(source)
            .and_then(|mut record| record.active_block(now))
    }

    /// Counts one request against the trailing hour.
    ///
    /// A blocked source is refused without counting. A source that already
    /// used its hourly allowance is refused and blocked.
    pub fn count_request(&self, source: &str, now: u64) -> Result<(), RateRefusal> {
        let mut record = self.records.entry(source.to_string()).or_default();
        record.last_seen = now;
        if let Some(block) = record.active_block(now) {
            return Err(RateRefusal::Blocked(block));
        }

        record.prune_minutes(now);
        if record.hourly_count() >= u64::from(self.limits.max_requests_per_hour) {
            let block = Block {
                until: now + self.limits.rate_block_ms,
                cause: AdmissionCheck::RequestRate,
            };
            record.extend_block(block.until, block.cause);
            return Err(RateRefusal::Exceeded(block));
        }

        let minute = now / MINUTE_MS;
        match record.minutes.back_mut() {
            Some((last, count)) if *last == minute => *count += 1,
            _ => record.minutes.push_back((minute, 1)),
        }
        Ok(())
    }

    /// Takes an in-flight slot, expiring slots held longer than the
    /// release window first.
    ///
    /// Returns the slot id, or the number of slots held when the source is
    /// at its limit.
    pub fn acquire_slot(&self, source: &str, now: u64) -> Result<u64, usize> {
        let mut record = self.records.entry(source.to_string()).or_default();
        record.last_seen = now;
        record.expire_slots(now, self.limits.slot_release_ms);
        if record.slots.len() >= self.limits.max_concurrent as usize {
            return Err(record.slots.len());
        }
        let slot = self.next_slot.fetch_add(1, Ordering::Relaxed);
        record.slots.insert(slot, now);
        Ok(slot)
    }

    /// Releases a slot. Releasing an already expired slot is a no-op.
    pub fn release_slot(&self, source: &str, slot: u64) {
        if let Some(mut record) = self.records.get_mut(source) {
            record.slots.remove(&slot);
        }
    }

    /// Returns the number of slots `source` holds.
    #[must_use]
    pub fn in_flight(&self, source: &str) -> usize {
        self.records.get(source).map_or(0, |record| record.slots.len())
    }

    /// Adds one to the source's suspicious-activity score.
    ///
    /// Once the score passes the reputation threshold, each further point
    /// blocks the source for `reputation_block * 2^(score - threshold - 1)`,
    /// capped at the maximum block. Returns the new score.
    pub fn penalize(&self, source: &str, now: u64) -> u32 {
        let mut record = self.records.entry(source.to_string()).or_default();
        record.last_seen = now;
        record.score = record.score.saturating_add(1);

        let limits = &self.limits;
        if record.score > limits.reputation_threshold {
            let doublings = (record.score - limits.reputation_threshold - 1).min(32);
            let duration = limits
                .reputation_block_ms
                .saturating_mul(1_u64 << doublings)
                .min(limits.max_block_ms);
            record.extend_block(now + duration, AdmissionCheck::Reputation);
        }
        record.score
    }

    /// Returns the suspicious-activity score of `source`.
    #[must_use]
    pub fn score(&self, source: &str) -> u32 {
        self.records.get(source).map_or(0, |record| record.score)
    }

    /// Expires stale slots everywhere and drops records idle longer than
    /// `idle_ms` that hold no block and no slot.
    ///
    /// Returns the number of records removed.
    pub fn sweep(&self, now: u64, idle_ms: u64) -> usize {
        let before = self.records.len();
        let release_after = self.limits.slot_release_ms;
        self.records.retain(|_, record| {
            record.expire_slots(now, release_after);
            record.prune_minutes(now);
            let blocked = record.active_block(now).is_some();
            let idle = now.saturating_sub(record.last_seen) >= idle_ms;
            blocked || !record.slots.is_empty() || !idle
        });
        before.saturating_sub(self.records.len())
    }

    /// Returns counts over all records.
    #[must_use]
    pub fn snapshot(&self, now: u64) -> TrackerSnapshot {
        let mut snapshot = TrackerSnapshot::default();
        for record in &self.records {
            snapshot.tracked += 1;
            snapshot.in_flight += record.slots.len();
            if record.block.is_some_and(|block| block.until > now) {
                snapshot.blocked += 1;
            }
        }
        snapshot
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HOUR_MS: u64 = 60 * MINUTE_MS;

    fn limits() -> TrackerLimits {
        TrackerLimits {
            max_requests_per_hour: 3,
            rate_block_ms: 15 * MINUTE_MS,
            max_concurrent: 2,
            slot_release_ms: 30_000,
            reputation_threshold: 2,
            reputation_block_ms: HOUR_MS,
            max_block_ms: 24 * HOUR_MS,
        }
    }

    #[test]
    fn test_hourly_cap_blocks_source() {
        let tracker = SourceTracker::new(limits());
        let now = 10 * HOUR_MS;
        for _ in 0..3 {
            assert!(tracker.count_request("10.0.0.1", now).is_ok());
        }
        let refusal = tracker.count_request("10.0.0.1", now).unwrap_err();
        assert!(matches!(refusal, RateRefusal::Exceeded(_)));
        assert_eq!(refusal.block().cause, AdmissionCheck::RequestRate);
        assert_eq!(refusal.block().retry_after_secs(now), 15 * 60);
        assert!(matches!(
            tracker.count_request("10.0.0.1", now + 1000),
            Err(RateRefusal::Blocked(_))
        ));

        // Other sources are unaffected.
        assert!(tracker.count_request("10.0.0.2", now).is_ok());
    }

    #[test]
    fn test_hourly_window_rolls() {
        let tracker = SourceTracker::new(TrackerLimits {
            rate_block_ms: 0,
            ..limits()
        });
        let start = 10 * HOUR_MS;
        for _ in 0..3 {
            tracker.count_request("a", start).unwrap();
        }
        assert!(tracker.count_request("a", start + 30 * MINUTE_MS).is_err());
        assert!(tracker.count_request("a", start + HOUR_MS).is_ok());
    }

    #[test]
    fn test_slots_release_on_drop_and_expiry() {
        let tracker = SourceTracker::new(limits());
        let a = tracker.acquire_slot("s", 0).unwrap();
        let _b = tracker.acquire_slot("s", 0).unwrap();
        assert_eq!(tracker.acquire_slot("s", 0), Err(2));

        tracker.release_slot("s", a);
        assert!(tracker.acquire_slot("s", 0).is_ok());

        // Unreleased slots are reclaimed after the release window.
        assert_eq!(tracker.in_flight("s"), 2);
        assert!(tracker.acquire_slot("s", 30_000).is_ok());
        assert_eq!(tracker.in_flight("s"), 1);
    }

    #[test]
    fn test_release_after_expiry_is_noop() {
        let tracker = SourceTracker::new(limits());
        let slot = tracker.acquire_slot("s", 0).unwrap();
        let _fresh = tracker.acquire_slot("s", 40_000).unwrap();
        tracker.release_slot("s", slot);
        assert_eq!(tracker.in_flight("s"), 1);
    }

    #[test]
    fn test_reputation_block_escalates_and_caps() {
        let tracker = SourceTracker::new(limits());
        assert_eq!(tracker.penalize("s", 0), 1);
        assert_eq!(tracker.penalize("s", 0), 2);
        assert!(tracker.block("s", 0).is_none());

        tracker.penalize("s", 0);
        let first = tracker.block("s", 0).unwrap();
        assert_eq!(first.cause, AdmissionCheck::Reputation);
        assert_eq!(first.until, HOUR_MS);

        tracker.penalize("s", 0);
        assert_eq!(tracker.block("s", 0).unwrap().until, 2 * HOUR_MS);

        for _ in 0..20 {
            tracker.penalize("s", 0);
        }
        assert_eq!(tracker.block("s", 0).unwrap().until, 24 * HOUR_MS);
    }

    #[test]
    fn test_block_expires() {
        let tracker = SourceTracker::new(limits());
        for _ in 0..3 {
            tracker.penalize("s", 0);
        }
        assert!(tracker.block("s", HOUR_MS - 1).is_some());
        assert!(tracker.block("s", HOUR_MS).is_none());
    }

    #[test]
    fn test_sweep_keeps_blocked_and_busy_sources() {
        let tracker = SourceTracker::new(limits());
        tracker.count_request("idle", 0).unwrap();
        for _ in 0..4 {
            tracker.penalize("blocked", 0);
        }
        tracker.acquire_slot("busy", HOUR_MS).unwrap();

        let removed = tracker.sweep(HOUR_MS, HOUR_MS);
        assert_eq!(removed, 1);
        let snapshot = tracker.snapshot(HOUR_MS);
        assert_eq!(snapshot.tracked, 2);
        assert_eq!(snapshot.in_flight, 1);
    }
}
