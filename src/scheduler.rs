//! Strategy slot table: named, periodically-executed strategies occupying
//! up to 16 indexed slots (§4.F).
//!
//! Grounded on `rtmalloc::transfer_cache`'s registry-of-handlers shape
//! (a fixed-size table behind one lock, each entry independently
//! enabled/disabled) generalized to user-named, factory-constructed
//! strategy instances per §4.F's factory registry. The single scheduler
//! mutex (§5 "a single mutex protects the slot table and factory registry;
//! the `execute` call itself runs outside the lock") is implemented by
//! snapshotting an `Arc`-less raw handle under the lock, then releasing it
//! before calling `execute`, exactly as specified.

use crate::allocator::NodeAllocator;
use crate::error::{NumaError, Result};
use crate::hotness::HotnessTracker;
use crate::migration::{KeyStore, MigrationEngine};
use crate::node::{NodeId, NodeSet};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::Instant;

pub const MAX_SLOTS: usize = 16;

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Debug)]
pub enum Priority {
    Low,
    Normal,
    High,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum SlotKind {
    Periodic,
    EventDriven,
    Hybrid,
}

/// Context handed to a strategy's `execute` (kept narrow: only what a
/// strategy legitimately needs, not the whole `Context`).
pub struct ExecCtx<'a> {
    pub nodes: &'a NodeSet,
    pub allocator: &'a NodeAllocator,
    pub hotness: &'a HotnessTracker,
    pub migration: &'a MigrationEngine,
    pub store: &'a mut dyn KeyStore,
    pub is_available: &'a dyn Fn(NodeId) -> bool,
}

/// One pluggable strategy instance (§9 "Model as polymorphic traits... a
/// dynamic-dispatch interface for user-registered strategies").
pub trait Strategy: Send {
    fn execute(&mut self, ctx: &mut ExecCtx) -> Result<()>;
    /// Read back a configured key's current value, if any (§4.F "Reads
    /// include live counters").
    fn get_config(&self, key: &str) -> Option<String>;
    fn set_config(&mut self, key: &str, value: &str) -> Result<()>;
}

type CreateFn = fn() -> Box<dyn Strategy>;

struct Factory {
    description: &'static str,
    kind: SlotKind,
    default_priority: Priority,
    default_interval_us: u64,
    create: CreateFn,
}

struct Slot {
    name: String,
    description: String,
    kind: SlotKind,
    priority: Priority,
    enabled: bool,
    execute_interval_us: u64,
    last_execute_time: Option<Instant>,
    execute_count: u64,
    failure_count: u64,
    total_time_us: u64,
    strategy: Box<dyn Strategy>,
}

#[derive(Clone, Debug)]
pub struct SlotStatus {
    pub id: usize,
    pub name: String,
    pub description: String,
    pub priority: Priority,
    pub enabled: bool,
    pub execute_interval_us: u64,
    pub execute_count: u64,
    pub failure_count: u64,
    pub total_time_us: u64,
}

struct Inner {
    slots: [Option<Slot>; MAX_SLOTS],
    factories: HashMap<&'static str, Factory>,
}

pub struct StrategyTable {
    inner: Mutex<Inner>,
}

impl StrategyTable {
    /// Build a table pre-registered with the two reserved factories
    /// (no-op at slot 0, composite-LRU at slot 1, §4.F "Reserved
    /// strategies"). Neither is auto-inserted; the host inserts them the
    /// same way it would any other named strategy.
    pub fn new() -> Self {
        const NONE_SLOT: Option<Slot> = None;
        let mut factories = HashMap::new();
        factories.insert(
            "noop",
            Factory {
                description: "always-ok liveness signal",
                kind: SlotKind::Periodic,
                default_priority: Priority::Low,
                default_interval_us: 1_000_000,
                create: || Box::new(NoopStrategy::default()),
            },
        );
        factories.insert(
            "composite-lru",
            Factory {
                description: "hot-key decay, pending migration drain, rebalance",
                kind: SlotKind::Periodic,
                default_priority: Priority::Normal,
                default_interval_us: 1_000_000,
                create: || Box::new(CompositeLru::default()),
            },
        );
        Self {
            inner: Mutex::new(Inner {
                slots: [NONE_SLOT; MAX_SLOTS],
                factories,
            }),
        }
    }

    /// Register a factory for a user-defined strategy name.
    pub fn register_factory(
        &self,
        name: &'static str,
        description: &'static str,
        kind: SlotKind,
        default_priority: Priority,
        default_interval_us: u64,
        create: CreateFn,
    ) {
        let mut inner = self.inner.lock();
        inner.factories.insert(
            name,
            Factory {
                description,
                kind,
                default_priority,
                default_interval_us,
                create,
            },
        );
    }

    pub fn insert(&self, slot: usize, name: &str) -> Result<()> {
        if slot >= MAX_SLOTS {
            return Err(NumaError::Invalid("slot id out of range".into()));
        }
        let mut inner = self.inner.lock();
        if inner.slots[slot].is_some() {
            return Err(NumaError::Exists);
        }
        let factory = inner
            .factories
            .get(name)
            .ok_or(NumaError::NotFound)?;
        let instance = (factory.create)();
        let new_slot = Slot {
            name: name.to_string(),
            description: factory.description.to_string(),
            kind: factory.kind,
            priority: factory.default_priority,
            enabled: true,
            execute_interval_us: factory.default_interval_us,
            last_execute_time: None,
            execute_count: 0,
            failure_count: 0,
            total_time_us: 0,
            strategy: instance,
        };
        inner.slots[slot] = Some(new_slot);
        Ok(())
    }

    pub fn remove(&self, slot: usize) -> Result<()> {
        let mut inner = self.inner.lock();
        let entry = inner.slots.get_mut(slot).ok_or(NumaError::NotFound)?;
        if entry.take().is_none() {
            return Err(NumaError::NotFound);
        }
        Ok(())
    }

    pub fn enable(&self, slot: usize) -> Result<()> {
        self.with_slot_mut(slot, |s| s.enabled = true)
    }

    pub fn disable(&self, slot: usize) -> Result<()> {
        self.with_slot_mut(slot, |s| s.enabled = false)
    }

    fn with_slot_mut(&self, slot: usize, f: impl FnOnce(&mut Slot)) -> Result<()> {
        let mut inner = self.inner.lock();
        let entry = inner
            .slots
            .get_mut(slot)
            .and_then(|s| s.as_mut())
            .ok_or(NumaError::NotFound)?;
        f(entry);
        Ok(())
    }

    pub fn configure(&self, slot: usize, key: &str, value: &str) -> Result<()> {
        let mut inner = self.inner.lock();
        let entry = inner
            .slots
            .get_mut(slot)
            .and_then(|s| s.as_mut())
            .ok_or(NumaError::NotFound)?;
        entry.strategy.set_config(key, value)
    }

    pub fn get_config(&self, slot: usize, key: &str) -> Result<Option<String>> {
        let inner = self.inner.lock();
        let entry = inner
            .slots
            .get(slot)
            .and_then(|s| s.as_ref())
            .ok_or(NumaError::NotFound)?;
        Ok(entry.strategy.get_config(key))
    }

    pub fn status(&self, slot: usize) -> Result<SlotStatus> {
        let inner = self.inner.lock();
        let entry = inner
            .slots
            .get(slot)
            .and_then(|s| s.as_ref())
            .ok_or(NumaError::NotFound)?;
        Ok(SlotStatus {
            id: slot,
            name: entry.name.clone(),
            description: entry.description.clone(),
            priority: entry.priority,
            enabled: entry.enabled,
            execute_interval_us: entry.execute_interval_us,
            execute_count: entry.execute_count,
            failure_count: entry.failure_count,
            total_time_us: entry.total_time_us,
        })
    }

    pub fn list(&self) -> Vec<SlotStatus> {
        let inner = self.inner.lock();
        (0..MAX_SLOTS)
            .filter_map(|id| {
                inner.slots[id].as_ref().map(|s| SlotStatus {
                    id,
                    name: s.name.clone(),
                    description: s.description.clone(),
                    priority: s.priority,
                    enabled: s.enabled,
                    execute_interval_us: s.execute_interval_us,
                    execute_count: s.execute_count,
                    failure_count: s.failure_count,
                    total_time_us: s.total_time_us,
                })
            })
            .collect()
    }

    /// Run one slot's `execute` regardless of its interval gate (explicit
    /// administrative trigger, §6 command surface). Interval/enabled gating
    /// is `run_all`'s job, not this one's.
    pub fn run_slot(&self, slot: usize, ctx: &mut ExecCtx) -> Result<()> {
        let handle = {
            let inner = self.inner.lock();
            inner.slots.get(slot).and_then(|s| s.as_ref()).is_some()
        };
        if !handle {
            return Err(NumaError::NotFound);
        }
        self.execute_slot(slot, ctx)
    }

    fn execute_slot(&self, slot: usize, ctx: &mut ExecCtx) -> Result<()> {
        // §5: snapshot the slot under the lock, run `execute` outside it.
        // Since `Box<dyn Strategy>` can't be cheaply cloned out, we instead
        // hold the lock only long enough to swap the strategy out, run it
        // unlocked, then swap it back in — matching "callers must not
        // remove a slot whose execute is currently running" by leaving the
        // slot present (but temporarily stripped of its strategy) for the
        // duration.
        let mut strategy = {
            let mut inner = self.inner.lock();
            let entry = inner.slots[slot].as_mut().ok_or(NumaError::NotFound)?;
            std::mem::replace(&mut entry.strategy, Box::new(TombstoneStrategy))
        };

        let started = Instant::now();
        let result = strategy.execute(ctx);
        let elapsed_us = started.elapsed().as_micros() as u64;

        let mut inner = self.inner.lock();
        if let Some(entry) = inner.slots[slot].as_mut() {
            entry.strategy = strategy;
            entry.last_execute_time = Some(started);
            entry.execute_count += 1;
            entry.total_time_us += elapsed_us;
            if result.is_err() {
                entry.failure_count += 1;
            }
        }
        result
    }

    /// §4.F "Execution": iterate priorities high to low, within a priority
    /// iterate slot ids in order, run every enabled slot whose elapsed
    /// time since `last_execute_time` has reached its interval.
    pub fn run_all(&self, ctx: &mut ExecCtx) {
        for priority in [Priority::High, Priority::Normal, Priority::Low] {
            for slot in 0..MAX_SLOTS {
                let due = {
                    let inner = self.inner.lock();
                    match inner.slots[slot].as_ref() {
                        Some(s) if s.enabled && s.priority == priority => {
                            let interval = std::time::Duration::from_micros(s.execute_interval_us);
                            match s.last_execute_time {
                                None => true,
                                Some(last) => last.elapsed() >= interval,
                            }
                        }
                        _ => false,
                    }
                };
                if due {
                    let _ = self.execute_slot(slot, ctx);
                }
            }
        }
    }
}

impl Default for StrategyTable {
    fn default() -> Self {
        Self::new()
    }
}

/// Placeholder strategy occupying a slot mid-swap in [`StrategyTable::execute_slot`];
/// never observably executed.
struct TombstoneStrategy;

impl Strategy for TombstoneStrategy {
    fn execute(&mut self, _ctx: &mut ExecCtx) -> Result<()> {
        Ok(())
    }
    fn get_config(&self, _key: &str) -> Option<String> {
        None
    }
    fn set_config(&mut self, _key: &str, _value: &str) -> Result<()> {
        Ok(())
    }
}

/// Slot 0: no-op liveness signal (§4.F "Reserved strategies").
#[derive(Default)]
struct NoopStrategy {
    runs: u64,
}

impl Strategy for NoopStrategy {
    fn execute(&mut self, _ctx: &mut ExecCtx) -> Result<()> {
        self.runs += 1;
        if self.runs % 60 == 0 {
            log::debug!("noop strategy liveness: {} executions", self.runs);
        }
        Ok(())
    }
    fn get_config(&self, key: &str) -> Option<String> {
        match key {
            "runs" => Some(self.runs.to_string()),
            _ => None,
        }
    }
    fn set_config(&mut self, _key: &str, _value: &str) -> Result<()> {
        Ok(())
    }
}

/// Slot 1: composite-LRU (§4.F "Reserved strategies" + "Configuration
/// keys"). Owns nothing of its own beyond configuration — the hot-key map
/// and pending-migration queue it reads live in the [`HotnessTracker`]
/// passed through [`ExecCtx`], since that tracker is itself the thing
/// slot-removal would otherwise orphan.
struct CompositeLru {
    decay_threshold: u32,
    stability_count: u8,
    migrate_threshold: u8,
    overload_threshold: f64,
    bandwidth_threshold: f64,
    pressure_threshold: f64,
    last_decay: Option<Instant>,
    decay_interval: std::time::Duration,
}

impl Default for CompositeLru {
    fn default() -> Self {
        let defaults = crate::config::HotnessConfig::default();
        Self {
            decay_threshold: defaults.decay_threshold,
            stability_count: defaults.stability_count,
            migrate_threshold: defaults.migrate_threshold,
            overload_threshold: defaults.overload_threshold,
            bandwidth_threshold: defaults.bandwidth_threshold,
            pressure_threshold: defaults.pressure_threshold,
            last_decay: None,
            decay_interval: std::time::Duration::from_secs(1),
        }
    }
}

impl Strategy for CompositeLru {
    fn execute(&mut self, ctx: &mut ExecCtx) -> Result<()> {
        let decay_due = match self.last_decay {
            None => true,
            Some(last) => last.elapsed() >= self.decay_interval,
        };
        if decay_due {
            ctx.hotness.set_config(crate::config::HotnessConfig {
                decay_threshold: self.decay_threshold,
                stability_count: self.stability_count,
                migrate_threshold: self.migrate_threshold,
                overload_threshold: self.overload_threshold,
                bandwidth_threshold: self.bandwidth_threshold,
                pressure_threshold: self.pressure_threshold,
                pending_migration_timeout_ms: ctx.hotness.config().pending_migration_timeout_ms,
            });
            ctx.hotness.decay();
            self.last_decay = Some(Instant::now());
        }

        let dispatch = ctx.hotness.drain_pending(ctx.is_available);
        for (key, target_node) in dispatch {
            if ctx
                .migration
                .migrate_value(ctx.store, ctx.allocator, &key, target_node)
                .is_ok()
            {
                ctx.hotness.mark_migrated(&key, target_node);
            }
        }

        if ctx.nodes.utilisation_spread() > self.overload_threshold {
            log::warn!("composite-lru: utilisation spread above overload threshold");
        }
        Ok(())
    }

    fn get_config(&self, key: &str) -> Option<String> {
        match key {
            "decay_threshold" => Some(self.decay_threshold.to_string()),
            "stability_count" => Some(self.stability_count.to_string()),
            "migrate_threshold" => Some(self.migrate_threshold.to_string()),
            "overload_threshold" => Some(self.overload_threshold.to_string()),
            "bandwidth_threshold" => Some(self.bandwidth_threshold.to_string()),
            "pressure_threshold" => Some(self.pressure_threshold.to_string()),
            _ => None,
        }
    }

    fn set_config(&mut self, key: &str, value: &str) -> Result<()> {
        let parse_u32 = |v: &str| v.parse::<u32>().map_err(|_| NumaError::Invalid(format!("not a u32: {v}")));
        let parse_u8 = |v: &str| v.parse::<u8>().map_err(|_| NumaError::Invalid(format!("not a u8: {v}")));
        let parse_f64 = |v: &str| v.parse::<f64>().map_err(|_| NumaError::Invalid(format!("not a f64: {v}")));
        match key {
            "decay_threshold" => self.decay_threshold = parse_u32(value)?,
            "stability_count" => self.stability_count = parse_u8(value)?,
            "migrate_threshold" => self.migrate_threshold = parse_u8(value)?,
            "overload_threshold" => self.overload_threshold = parse_f64(value)?,
            "bandwidth_threshold" => self.bandwidth_threshold = parse_f64(value)?,
            "pressure_threshold" => self.pressure_threshold = parse_f64(value)?,
            _ => return Err(NumaError::Invalid(format!("unknown key: {key}"))),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hotness::HotnessTracker;
    use crate::migration::MigrationEngine;
    use crate::valuekind::HostValue;

    struct EmptyStore;
    impl KeyStore for EmptyStore {
        fn get_mut(&mut self, _key: &[u8]) -> Option<&mut dyn HostValue> {
            None
        }
        fn keys(&self) -> Vec<Vec<u8>> {
            Vec::new()
        }
    }

    fn exec_ctx<'a>(
        nodes: &'a NodeSet,
        allocator: &'a NodeAllocator,
        hotness: &'a HotnessTracker,
        migration: &'a MigrationEngine,
        store: &'a mut dyn KeyStore,
        available: &'a dyn Fn(NodeId) -> bool,
    ) -> ExecCtx<'a> {
        ExecCtx { nodes, allocator, hotness, migration, store, is_available: available }
    }

    #[test]
    fn insert_then_status_reflects_configured_value() {
        let table = StrategyTable::new();
        table.insert(1, "composite-lru").unwrap();
        table.configure(1, "migrate_threshold", "7").unwrap();
        assert_eq!(table.get_config(1, "migrate_threshold").unwrap(), Some("7".to_string()));
    }

    #[test]
    fn double_insert_fails_with_exists() {
        let table = StrategyTable::new();
        table.insert(0, "noop").unwrap();
        assert_eq!(table.insert(0, "noop").unwrap_err(), NumaError::Exists);
    }

    #[test]
    fn unregistered_factory_fails_with_not_found() {
        let table = StrategyTable::new();
        assert_eq!(table.insert(2, "bogus").unwrap_err(), NumaError::NotFound);
    }

    #[test]
    fn disabled_slot_does_not_execute_but_others_do() {
        let table = StrategyTable::new();
        table.insert(0, "noop").unwrap();
        table.insert(1, "composite-lru").unwrap();
        table.disable(1).unwrap();

        let nodes = NodeSet::new(1);
        let allocator = NodeAllocator::new(1, crate::config::AllocatorConfig::default());
        let hotness = HotnessTracker::new(crate::config::HotnessConfig::default());
        let migration = MigrationEngine::new();
        let mut store = EmptyStore;
        let available = |_: NodeId| true;
        let mut ctx = exec_ctx(&nodes, &allocator, &hotness, &migration, &mut store, &available);

        table.run_all(&mut ctx);

        assert_eq!(table.status(0).unwrap().execute_count, 1);
        assert_eq!(table.status(1).unwrap().execute_count, 0);
    }

    #[test]
    fn run_slot_ignores_interval_gate() {
        let table = StrategyTable::new();
        table.insert(0, "noop").unwrap();
        let nodes = NodeSet::new(1);
        let allocator = NodeAllocator::new(1, crate::config::AllocatorConfig::default());
        let hotness = HotnessTracker::new(crate::config::HotnessConfig::default());
        let migration = MigrationEngine::new();
        let mut store = EmptyStore;
        let available = |_: NodeId| true;
        let mut ctx = exec_ctx(&nodes, &allocator, &hotness, &migration, &mut store, &available);

        table.run_slot(0, &mut ctx).unwrap();
        table.run_slot(0, &mut ctx).unwrap();
        assert_eq!(table.status(0).unwrap().execute_count, 2);
    }

    #[test]
    fn remove_then_get_not_found() {
        let table = StrategyTable::new();
        table.insert(0, "noop").unwrap();
        table.remove(0).unwrap();
        assert_eq!(table.status(0).unwrap_err(), NumaError::NotFound);
    }
}
