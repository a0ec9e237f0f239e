use std::collections::BTreeMap;

use replay_ui_log::UiLogger;

use crate::state::StateSnapshot;

/// Default snapshot count, matching the "~64 snapshots cover the full
/// range" sizing from the design notes.
pub const DEFAULT_CAPACITY: usize = 64;

/// Ordered cache of state snapshots keyed by step id, bounded in count.
///
/// Eviction is "regular thinning" rather than LRU: the access pattern for
/// backward seeks is "anywhere in the range", so recency-based eviction
/// would leave the oldest part of the range uncovered as soon as playback
/// moves forward. Instead, on overflow we remove the snapshot whose
/// neighbours are already closest together — the one contributing least to
/// even coverage of the range — always keeping the most recent snapshot.
pub struct SnapshotCache {
    capacity: usize,
    snapshots: BTreeMap<u64, StateSnapshot>,
    debug_log: Option<UiLogger<String>>,
}

impl SnapshotCache {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            snapshots: BTreeMap::new(),
            debug_log: None,
        }
    }

    pub fn with_debug_log(mut self, logger: UiLogger<String>) -> Self {
        self.debug_log = Some(logger);
        self
    }

    pub fn insert(&mut self, snapshot: StateSnapshot) {
        if self.snapshots.len() >= self.capacity {
            self.evict_one();
        }
        self.snapshots.insert(snapshot.step_id, snapshot);
    }

    fn evict_one(&mut self) {
        let Some(&most_recent) = self.snapshots.keys().next_back() else {
            return;
        };
        let keys: Vec<u64> = self.snapshots.keys().copied().collect();
        let candidates: Vec<u64> = keys.iter().copied().filter(|&k| k != most_recent).collect();

        let evict = if candidates.is_empty() {
            most_recent
        } else {
            let mut best: Option<(u64, u64)> = None; // (gap, key)
            for &key in &candidates {
                let idx = keys.iter().position(|&k| k == key).unwrap();
                // The earliest snapshot has no real left neighbour; treat its
                // gap as unbounded so it is only evicted when every other
                // candidate is equally boundary-less (cache of size 1).
                let gap = match (idx.checked_sub(1), keys.get(idx + 1)) {
                    (Some(prev_idx), Some(&next)) => next - keys[prev_idx],
                    _ => u64::MAX,
                };
                if best.is_none_or(|(best_gap, best_key)| {
                    gap < best_gap || (gap == best_gap && key < best_key)
                }) {
                    best = Some((gap, key));
                }
            }
            best.map(|(_, key)| key).unwrap_or(most_recent)
        };

        if let Some(logger) = &self.debug_log {
            logger.log(format!("snapshot cache evicting step {evict}"));
        }
        self.snapshots.remove(&evict);
    }

    /// The greatest snapshot with `step_ts <= t`, if any.
    #[must_use]
    pub fn floor(&self, t: i64) -> Option<&StateSnapshot> {
        let hit = self
            .snapshots
            .values()
            .rev()
            .find(|snapshot| snapshot.step_ts <= t);
        if let Some(logger) = &self.debug_log {
            match hit {
                Some(s) => logger.log(format!("snapshot cache hit for t={t} at step {}", s.step_id)),
                None => logger.log(format!("snapshot cache miss for t={t}")),
            }
        }
        hit
    }

    pub fn clear(&mut self) {
        self.snapshots.clear();
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::EngineState;

    fn snap(step_id: u64) -> StateSnapshot {
        StateSnapshot {
            step_id,
            step_ts: step_id as i64 * 1_000,
            state: EngineState::for_sensors(&[1]),
        }
    }

    #[test]
    fn never_evicts_the_most_recent_snapshot() {
        let mut cache = SnapshotCache::new(2);
        cache.insert(snap(1));
        cache.insert(snap(2));
        cache.insert(snap(3));
        assert!(cache.floor(3_000).is_some());
    }

    #[test]
    fn evicts_the_densest_neighbourhood_first() {
        // steps 1, 2, 3, 100: removing 2 (gap 3-1=2) is cheaper than
        // removing 3 (gap 100-2=98), so 2 goes first.
        let mut cache = SnapshotCache::new(3);
        cache.insert(snap(1));
        cache.insert(snap(2));
        cache.insert(snap(3));
        cache.insert(snap(100));
        assert!(cache.floor(2_000).is_none() || cache.floor(2_000).unwrap().step_id != 2);
        assert_eq!(cache.len(), 3);
    }

    #[test]
    fn floor_returns_greatest_snapshot_at_or_before_t() {
        let mut cache = SnapshotCache::new(4);
        cache.insert(snap(1));
        cache.insert(snap(5));
        let hit = cache.floor(4_500).unwrap();
        assert_eq!(hit.step_id, 1);
        let hit = cache.floor(5_000).unwrap();
        assert_eq!(hit.step_id, 5);
    }

    #[test]
    fn floor_on_empty_cache_is_none() {
        let cache = SnapshotCache::new(4);
        assert!(cache.floor(1_000).is_none());
    }
}
