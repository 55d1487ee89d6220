//! Size and age based eviction for the video cache.
//!
//! Eviction runs opportunistically after each completed download rather than
//! on a timer. Expired entries are always removed; if the remaining entries
//! exceed the size budget, the oldest ones (by modification time) are removed
//! until the cache drops to the low-water mark.
//!
//! A protected key is never removed. The cache manager protects keys with a
//! download in flight and the key that was just written, so a single video
//! larger than the whole budget survives while everything else is evicted.

use std::collections::HashSet;
use std::time::{Duration, Instant, SystemTime};

use tracing::{debug, info, warn};

use crate::config::CacheConfig;
use crate::error::{Error, Result};
use crate::key::CacheKey;
use crate::store::{CacheCleanupStats, CacheEntry, CacheStore};

/// Entries selected for removal by [`EvictionPolicy::plan`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EvictionPlan {
    /// Entries past their maximum age.
    pub expired: Vec<CacheEntry>,
    /// Remaining unprotected entries, oldest first; removed in order until
    /// the cache is under the low-water mark.
    pub candidates: Vec<CacheEntry>,
    /// Total size of all entries that are not expired.
    pub live_bytes: u64,
}

/// Cache size and age limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EvictionPolicy {
    max_size_bytes: u64,
    low_water_bytes: u64,
    max_age: Duration,
}

impl EvictionPolicy {
    /// Build the policy from cache configuration.
    #[must_use]
    pub fn from_config(config: &CacheConfig) -> Self {
        Self {
            max_size_bytes: config.max_size_bytes,
            low_water_bytes: config.low_water_bytes(),
            max_age: config.max_age(),
        }
    }

    /// Maximum total size before size eviction kicks in.
    #[must_use]
    pub const fn max_size_bytes(&self) -> u64 {
        self.max_size_bytes
    }

    /// Size eviction shrinks the cache to.
    #[must_use]
    pub const fn low_water_bytes(&self) -> u64 {
        self.low_water_bytes
    }

    /// Split a directory snapshot into expired entries and size-eviction candidates.
    #[must_use]
    pub fn plan(
        &self,
        entries: Vec<CacheEntry>,
        now: SystemTime,
        protected: &HashSet<CacheKey>,
    ) -> EvictionPlan {
        let mut plan = EvictionPlan::default();
        let mut live = Vec::with_capacity(entries.len());

        for entry in entries {
            if entry.is_expired(self.max_age, now) && !protected.contains(&entry.key) {
                plan.expired.push(entry);
            } else {
                plan.live_bytes += entry.size_bytes;
                live.push(entry);
            }
        }

        if plan.live_bytes > self.max_size_bytes {
            live.retain(|e| !protected.contains(&e.key));
            live.sort_by(|a, b| {
                a.last_modified
                    .cmp(&b.last_modified)
                    .then_with(|| a.key.cmp(&b.key))
            });
            plan.candidates = live;
        }

        plan
    }

    /// Run one eviction pass over `store`.
    pub async fn run(
        &self,
        store: &CacheStore,
        protected: &HashSet<CacheKey>,
    ) -> Result<CacheCleanupStats> {
        let entries = store.list_entries().await?;
        let plan = self.plan(entries, store.now(), protected);
        Ok(self.apply(store, &plan).await)
    }

    /// Delete what `plan` selected: every expired entry, then candidates in
    /// order until the cache is at or below the low-water mark.
    ///
    /// A failed delete is logged and skipped; the pass carries on with the
    /// next candidate.
    pub async fn apply(&self, store: &CacheStore, plan: &EvictionPlan) -> CacheCleanupStats {
        let start = Instant::now();
        let mut stats = CacheCleanupStats::default();
        let mut total = plan.live_bytes;

        for entry in &plan.expired {
            if Self::remove(store, entry, &mut stats).await {
                stats.expired_entries += 1;
            } else {
                total += entry.size_bytes;
            }
        }

        if !plan.candidates.is_empty() {
            debug!(
                "Cache over budget ({} > {} bytes), shrinking to {} bytes",
                total, self.max_size_bytes, self.low_water_bytes
            );
        }

        for entry in &plan.candidates {
            if total <= self.low_water_bytes {
                break;
            }
            if Self::remove(store, entry, &mut stats).await {
                stats.space_reclaimed_entries += 1;
                total = total.saturating_sub(entry.size_bytes);
            }
        }

        if total > self.max_size_bytes {
            warn!(
                "Cache still over budget after eviction ({} > {} bytes); protected entries exceed the limit",
                total, self.max_size_bytes
            );
        }

        stats.remaining_bytes = total;
        stats.duration_ms = start.elapsed().as_millis() as u64;

        if stats.entries_removed > 0 || stats.failures > 0 {
            info!(
                "Eviction complete: {} entries removed ({} expired), {} bytes freed, {} failures in {}ms",
                stats.entries_removed,
                stats.expired_entries,
                stats.bytes_freed,
                stats.failures,
                stats.duration_ms
            );
        }

        stats
    }

    async fn remove(store: &CacheStore, entry: &CacheEntry, stats: &mut CacheCleanupStats) -> bool {
        match store.delete(&entry.key).await {
            Ok(()) => {
                stats.entries_removed += 1;
                stats.bytes_freed += entry.size_bytes;
                true
            }
            Err(e) => {
                let failure = Error::EvictionFailure {
                    path: entry.path.clone(),
                    reason: e.to_string(),
                };
                warn!("{}", failure);
                stats.failures += 1;
                false
            }
        }
    }
}
