//! Age and capacity sweeps over published cache entries.
//!
//! Both sweeps snapshot their candidates and then remove them one key at a
//! time. An entry touched after the snapshot survives. In-flight compiles
//! live outside the entry table and are never candidates. Evicting an entry
//! also drops the diagnostic lists computed from it.

use std::sync::atomic::Ordering;
use std::time::Duration;

use crate::cache::{CompilationCache, EntryKey};

/// Number of entries the capacity sweep removes from a table of `len`.
pub fn eviction_count(len: usize, high_water_mark: usize, fraction: f64) -> usize {
    if len <= high_water_mark {
        return 0;
    }
    ((len as f64 * fraction).ceil() as usize).clamp(1, len)
}

impl CompilationCache {
    /// Remove entries not accessed within `max_age`.
    pub fn sweep_expired(&self, max_age: Duration) -> usize {
        let now = self.now_millis();
        let max_age = max_age.as_millis() as u64;

        let expired: Vec<(EntryKey, u64)> = self
            .inner
            .entries
            .iter()
            .filter_map(|entry| {
                let last = entry.last_accessed();
                (now.saturating_sub(last) > max_age).then(|| (entry.key().clone(), last))
            })
            .collect();

        let removed = self.remove_untouched(expired);
        if removed > 0 {
            tracing::info!("Age sweep evicted {} cache entries", removed);
        }
        removed
    }

    /// Remove the least recently used fraction of entries once the table
    /// is above its high-water mark.
    pub fn sweep_capacity(&self) -> usize {
        let settings = self.settings();
        let count = eviction_count(
            self.inner.entries.len(),
            settings.high_water_mark,
            settings.eviction_fraction,
        );
        if count == 0 {
            return 0;
        }

        let mut candidates: Vec<(EntryKey, u64)> = self
            .inner
            .entries
            .iter()
            .map(|entry| (entry.key().clone(), entry.last_accessed()))
            .collect();
        candidates.sort_by_key(|(_, last)| *last);
        candidates.truncate(count);

        let removed = self.remove_untouched(candidates);
        tracing::info!("Capacity sweep evicted {} cache entries", removed);
        removed
    }

    pub(crate) fn enforce_capacity(&self) {
        if self.inner.entries.len() > self.settings().high_water_mark {
            self.sweep_capacity();
        }
    }

    fn remove_untouched(&self, candidates: Vec<(EntryKey, u64)>) -> usize {
        let removed = candidates
            .into_iter()
            .filter(|(key, seen)| {
                let evicted = self
                    .inner
                    .entries
                    .remove_if(key, |_, entry| entry.last_accessed() == *seen)
                    .is_some();
                if evicted {
                    self.forget_diagnostics(key);
                }
                evicted
            })
            .count();
        self.inner
            .evictions
            .fetch_add(removed as u64, Ordering::Relaxed);
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_eviction_count() {
        assert_eq!(eviction_count(10, 10, 0.25), 0);
        assert_eq!(eviction_count(11, 10, 0.25), 3);
        assert_eq!(eviction_count(2, 1, 0.01), 1);
        assert_eq!(eviction_count(4, 1, 1.0), 4);
    }
}
