//! numa-kv-core: a NUMA-aware memory management core for an in-memory
//! key-value store (placement, slab/pool/direct allocation, migration, and
//! hotness-driven scheduling).
//!
//! [`Context`] is the crate's single entry point: it owns the allocator,
//! placement engine, hotness tracker, and strategy scheduler, replacing the
//! file-scope global state (`g_numa_*`) the source system used. A host
//! holds one `Arc<Context>` per store instance and passes it by reference
//! into its own allocation, access, and administrative-command paths.

pub mod allocator;
pub mod clock;
pub mod command;
pub mod config;
pub mod error;
pub mod hotness;
pub mod migration;
pub mod node;
pub mod placement;
pub mod platform;
pub mod pool;
pub mod prefix;
pub mod scheduler;
pub mod slab;
pub mod valuekind;

use allocator::NodeAllocator;
use config::{AllocatorConfig, HotnessConfig, PlacementConfig};
use hotness::HotnessTracker;
use migration::{KeyStore, MigrationEngine};
use node::{NodeId, NodeSet};
use placement::PlacementEngine;
use scheduler::{ExecCtx, StrategyTable};

/// Aggregate configuration for a new [`Context`] (§1 "ambient stack" —
/// typed config structs with `Default` impls; parsing a config file
/// remains the host's job).
#[derive(Clone, Default)]
pub struct ContextConfig {
    pub allocator: AllocatorConfig,
    pub placement: PlacementConfig,
    pub hotness: HotnessConfig,
}

/// The root object (§9 "abstract as a root context object that owns the
/// allocator, placement engine, tracker, and scheduler"). The allocator's
/// own node set (`allocator.nodes`) is the single source of truth for
/// per-node counters — `Context` does not keep a second, parallel
/// `NodeSet`, which would otherwise drift from the one the allocator
/// actually updates on every `alloc`/`free`.
pub struct Context {
    pub allocator: NodeAllocator,
    pub placement: PlacementEngine,
    pub hotness: HotnessTracker,
    pub migration: MigrationEngine,
    pub scheduler: StrategyTable,
}

impl Context {
    pub fn new(node_count: usize, config: ContextConfig) -> Self {
        let node_count = node_count.max(1);
        log::debug!("numa-kv-core: initializing context with {node_count} node(s)");
        Self {
            allocator: NodeAllocator::new(node_count, config.allocator),
            placement: PlacementEngine::new(config.placement),
            hotness: HotnessTracker::new(config.hotness),
            migration: MigrationEngine::new(),
            scheduler: StrategyTable::new(),
        }
    }

    pub fn nodes(&self) -> &NodeSet {
        &self.allocator.nodes
    }

    /// Allocate `size` bytes, letting the placement engine pick the
    /// destination node (§2 "the host store allocates values through A,
    /// destination chosen by B").
    pub fn alloc(&self, size: usize) -> *mut u8 {
        let node = self.placement.select_node(size, self.nodes());
        self.allocator.alloc(size, node)
    }

    pub fn free(&self, ptr: *mut u8) {
        self.allocator.free(ptr);
    }

    /// The store's access hook (§2 "every read/update invokes E via a hook
    /// that inspects C"). `cpu_node` is the accessing thread's current
    /// node.
    pub fn record_access(&self, key: &[u8], cpu_node: NodeId) {
        self.hotness.record_access(key, cpu_node);
    }

    /// Run every due strategy slot (§2 "F runs periodically on the store's
    /// tick"). The host drives this from its own tick loop; this crate
    /// does not spawn a ticker thread (§4.F "(added)").
    pub fn run_scheduler(&self, store: &mut dyn KeyStore, is_available: &dyn Fn(NodeId) -> bool) {
        let mut ctx = ExecCtx {
            nodes: self.nodes(),
            allocator: &self.allocator,
            hotness: &self.hotness,
            migration: &self.migration,
            store,
            is_available,
        };
        self.scheduler.run_all(&mut ctx);
    }
}
