//! Per-key hotness tracking: access recording, stability-gated decay, and
//! the pending-migration queue (§4.E). Owned by the composite-LRU strategy
//! (§4.F slot 1), not by `Context` directly — §3 "the hot-key record is
//! owned by the strategy holding it".
//!
//! Grounded on `rtmalloc::histogram`'s "single mutex over a map of small
//! per-bucket counters" shape, generalized from size-class buckets to
//! per-key records.

use crate::clock::{coarse_clock_low16, delta16};
use crate::config::HotnessConfig;
use crate::node::NodeId;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::Instant;

/// One key's hotness state (§3 "Hot-key record").
#[derive(Clone, Debug)]
pub struct HotKeyRecord {
    pub hotness: u8,
    pub stability: u8,
    pub last_access: u16,
    pub access_count: u64,
    pub current_node: NodeId,
    pub preferred_node: NodeId,
    pub pending_migration: Option<PendingMigration>,
}

impl HotKeyRecord {
    fn new(current_node: NodeId) -> Self {
        Self {
            hotness: 0,
            stability: 0,
            last_access: coarse_clock_low16(),
            access_count: 0,
            current_node,
            preferred_node: current_node,
            pending_migration: None,
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct PendingMigration {
    pub target_node: NodeId,
    pub enqueue_time: Instant,
    pub priority: u8,
}

struct Inner {
    records: HashMap<Vec<u8>, HotKeyRecord>,
    pending: Vec<(Vec<u8>, PendingMigration)>,
    config: HotnessConfig,
    heat_updates: u64,
    migrations_triggered: u64,
    decay_operations: u64,
    dropped_timeouts: u64,
}

pub struct HotnessTracker {
    inner: Mutex<Inner>,
}

impl HotnessTracker {
    pub fn new(config: HotnessConfig) -> Self {
        Self {
            inner: Mutex::new(Inner {
                records: HashMap::new(),
                pending: Vec::new(),
                config,
                heat_updates: 0,
                migrations_triggered: 0,
                decay_operations: 0,
                dropped_timeouts: 0,
            }),
        }
    }

    pub fn config(&self) -> HotnessConfig {
        self.inner.lock().config
    }

    pub fn set_config(&self, config: HotnessConfig) {
        self.inner.lock().config = config;
    }

    /// Look up or create a hot-key record and update it on an access from
    /// `cpu_node` (§4.E `record_access`).
    pub fn record_access(&self, key: &[u8], cpu_node: NodeId) {
        let mut inner = self.inner.lock();
        inner.heat_updates += 1;
        let migrate_threshold = inner.config.migrate_threshold;

        let current_node = inner
            .records
            .get(key)
            .map(|r| r.current_node)
            .unwrap_or(cpu_node);
        let record = inner
            .records
            .entry(key.to_vec())
            .or_insert_with(|| HotKeyRecord::new(current_node));

        record.access_count = record.access_count.saturating_add(1);
        record.last_access = coarse_clock_low16();

        if record.current_node == cpu_node {
            record.hotness = record.hotness.saturating_add(1).min(7);
            record.stability = 0;
        } else {
            record.preferred_node = cpu_node;
            if record.hotness >= migrate_threshold && record.pending_migration.is_none() {
                let pending = PendingMigration {
                    target_node: cpu_node,
                    enqueue_time: Instant::now(),
                    priority: record.hotness,
                };
                record.pending_migration = Some(pending);
                inner.migrations_triggered += 1;
                let key_owned = key.to_vec();
                inner.pending.push((key_owned, pending));
            }
        }
    }

    /// Create a record for a key without recording an access (used by
    /// tests and by the admin command surface's `migrate info`, §6).
    pub fn ensure_record(&self, key: &[u8], current_node: NodeId) {
        let mut inner = self.inner.lock();
        inner
            .records
            .entry(key.to_vec())
            .or_insert_with(|| HotKeyRecord::new(current_node));
    }

    pub fn get(&self, key: &[u8]) -> Option<HotKeyRecord> {
        self.inner.lock().records.get(key).cloned()
    }

    /// §4.E `decay()`: iterate every record, apply the stability-gated
    /// decay against the current coarse clock.
    pub fn decay(&self) {
        let mut inner = self.inner.lock();
        inner.decay_operations += 1;
        let now = coarse_clock_low16();
        let decay_threshold = inner.config.decay_threshold;
        let stability_count = inner.config.stability_count;

        for record in inner.records.values_mut() {
            let delta = delta16(record.last_access, now);
            if delta > decay_threshold {
                record.stability = record.stability.saturating_add(1);
                if record.stability > stability_count && record.hotness > 0 {
                    record.hotness -= 1;
                    record.stability = 0;
                }
            } else {
                record.stability = 0;
            }
        }
    }

    /// Drain pending migrations that are past the timeout (dropped,
    /// counted) or whose target node is available (returned for dispatch
    /// to the migration engine). §4.E "Pending migration queue".
    pub fn drain_pending(&self, is_available: impl Fn(NodeId) -> bool) -> Vec<(Vec<u8>, NodeId)> {
        let mut inner = self.inner.lock();
        let timeout = std::time::Duration::from_millis(inner.config.pending_migration_timeout_ms);
        let mut dispatch = Vec::new();
        let mut remaining = Vec::new();

        for (key, pending) in std::mem::take(&mut inner.pending) {
            if pending.enqueue_time.elapsed() > timeout {
                inner.dropped_timeouts += 1;
                if let Some(record) = inner.records.get_mut(&key) {
                    record.pending_migration = None;
                }
                continue;
            }
            if is_available(pending.target_node) {
                if let Some(record) = inner.records.get_mut(&key) {
                    record.pending_migration = None;
                }
                dispatch.push((key, pending.target_node));
            } else {
                remaining.push((key, pending));
            }
        }
        inner.pending = remaining;
        dispatch
    }

    /// Called by the migration engine on successful migration (§4.D
    /// "Metadata update").
    pub fn mark_migrated(&self, key: &[u8], target_node: NodeId) {
        let mut inner = self.inner.lock();
        if let Some(record) = inner.records.get_mut(key) {
            record.current_node = target_node;
        }
    }

    pub fn heat_updates(&self) -> u64 {
        self.inner.lock().heat_updates
    }

    pub fn migrations_triggered(&self) -> u64 {
        self.inner.lock().migrations_triggered
    }

    pub fn decay_operations(&self) -> u64 {
        self.inner.lock().decay_operations
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock;

    fn tracker() -> HotnessTracker {
        HotnessTracker::new(HotnessConfig::default())
    }

    #[test]
    fn remote_access_above_threshold_enqueues_migration() {
        let t = tracker();
        t.inner.lock().records.insert(
            b"k".to_vec(),
            HotKeyRecord {
                hotness: 7,
                stability: 0,
                last_access: 0,
                access_count: 0,
                current_node: NodeId(0),
                preferred_node: NodeId(0),
                pending_migration: None,
            },
        );

        t.record_access(b"k", NodeId(1));
        let record = t.get(b"k").unwrap();
        assert_eq!(record.preferred_node, NodeId(1));
        // Remote but already max: hotness stays at 7.
        assert_eq!(record.hotness, 7);
        assert!(record.pending_migration.is_some());

        for _ in 0..4 {
            t.record_access(b"k", NodeId(1));
        }
        assert_eq!(t.migrations_triggered(), 1);
    }

    #[test]
    fn local_access_raises_hotness_and_clears_stability() {
        let t = tracker();
        t.ensure_record(b"k", NodeId(0));
        t.inner.lock().records.get_mut(b"k".as_slice()).unwrap().stability = 5;
        t.record_access(b"k", NodeId(0));
        let record = t.get(b"k").unwrap();
        assert_eq!(record.hotness, 1);
        assert_eq!(record.stability, 0);
    }

    #[test]
    fn decay_stability_gate_scenario() {
        let t = HotnessTracker::new(HotnessConfig {
            decay_threshold: 100,
            stability_count: 3,
            ..HotnessConfig::default()
        });
        t.inner.lock().records.insert(
            b"k".to_vec(),
            HotKeyRecord {
                hotness: 5,
                stability: 0,
                last_access: 0,
                access_count: 0,
                current_node: NodeId(0),
                preferred_node: NodeId(0),
                pending_migration: None,
            },
        );
        clock::advance(500);
        for _ in 0..4 {
            t.decay();
        }
        let record = t.get(b"k").unwrap();
        assert_eq!(record.hotness, 4);
    }

    #[test]
    fn recent_access_resets_stability_to_zero() {
        let t = HotnessTracker::new(HotnessConfig::default());
        t.inner.lock().records.insert(
            b"k".to_vec(),
            HotKeyRecord {
                hotness: 3,
                stability: 2,
                last_access: coarse_clock_low16(),
                access_count: 0,
                current_node: NodeId(0),
                preferred_node: NodeId(0),
                pending_migration: None,
            },
        );
        t.decay();
        let record = t.get(b"k").unwrap();
        assert_eq!(record.stability, 0);
        assert_eq!(record.hotness, 3);
    }

    #[test]
    fn drain_pending_dispatches_when_target_available() {
        let t = tracker();
        t.inner.lock().records.insert(
            b"k".to_vec(),
            HotKeyRecord {
                hotness: 7,
                stability: 0,
                last_access: 0,
                access_count: 0,
                current_node: NodeId(0),
                preferred_node: NodeId(1),
                pending_migration: None,
            },
        );
        t.record_access(b"k", NodeId(1));
        let dispatched = t.drain_pending(|_| true);
        assert_eq!(dispatched, vec![(b"k".to_vec(), NodeId(1))]);
        assert!(t.get(b"k").unwrap().pending_migration.is_none());
    }
}
