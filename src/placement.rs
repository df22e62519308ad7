//! Placement policy engine: picks a destination node for an allocation
//! request under one of six named strategies (§4.B).
//!
//! Grounded on `rtmalloc::size_class`'s single-mutex-guarded configuration
//! pattern (a `Mutex<Inner>` wrapping everything that changes at runtime,
//! read and written under the same lock, §5 "Placement engine: a single
//! configuration mutex serialises all reads and writes to strategy/weights/
//! counters"). `interleave`/`weighted` sampling uses `rand::rngs::SmallRng`,
//! seeded per engine instance, matching this pack's convention for
//! in-process pseudorandom sampling.

use crate::config::{PlacementConfig, PlacementStrategyName};
use crate::node::{NodeId, NodeSet};
use parking_lot::Mutex;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use std::time::Instant;

struct Inner {
    config: PlacementConfig,
    round_robin_counter: usize,
    rng: SmallRng,
    last_rebalance: Option<Instant>,
}

pub struct PlacementEngine {
    inner: Mutex<Inner>,
}

impl PlacementEngine {
    pub fn new(config: PlacementConfig) -> Self {
        Self {
            inner: Mutex::new(Inner {
                config,
                round_robin_counter: 0,
                rng: SmallRng::from_entropy(),
                last_rebalance: None,
            }),
        }
    }

    pub fn config(&self) -> PlacementConfig {
        self.inner.lock().config.clone()
    }

    pub fn set_strategy(&self, strategy: PlacementStrategyName) {
        self.inner.lock().config.strategy = strategy;
    }

    pub fn set_cxl_optimised(&self, on: bool) {
        self.inner.lock().config.cxl_optimised = on;
    }

    pub fn set_balance_threshold(&self, threshold: f64) {
        self.inner.lock().config.balance_threshold = threshold;
    }

    pub fn set_weight(&self, node: NodeId, weight: u32) {
        let mut inner = self.inner.lock();
        let idx = node.index();
        if inner.config.node_weights.len() <= idx {
            inner.config.node_weights.resize(idx + 1, 100);
        }
        inner.config.node_weights[idx] = weight;
    }

    /// Select a destination node for an allocation of `size` bytes (§4.B).
    /// Single-node degradation (§6 "Environment") always returns node 0
    /// regardless of configured strategy. Selection itself has no side
    /// effect on `nodes`' counters — the allocator is the single writer of
    /// per-node `bytes_allocated`/`allocations` (§8 invariant 6); recording
    /// here too, against the same `NodeSet` the allocator updates, would
    /// double-count every allocation routed through `Context::alloc`.
    pub fn select_node(&self, size: usize, nodes: &NodeSet) -> NodeId {
        if nodes.is_single_node() {
            return NodeId(0);
        }

        let mut inner = self.inner.lock();
        let node = match inner.config.strategy {
            PlacementStrategyName::LocalFirst => NodeId(0),
            PlacementStrategyName::Interleave => {
                let idx = inner.rng.gen_range(0..nodes.len());
                NodeId(idx as i32)
            }
            PlacementStrategyName::RoundRobin => {
                let idx = inner.round_robin_counter % nodes.len();
                inner.round_robin_counter = inner.round_robin_counter.wrapping_add(1);
                NodeId(idx as i32)
            }
            PlacementStrategyName::Weighted => select_weighted(&mut inner, nodes),
            PlacementStrategyName::PressureAware => nodes.least_utilised(),
            PlacementStrategyName::CxlOptimised => {
                if size < inner.config.min_allocation_size {
                    NodeId(0)
                } else if nodes.len() > 1 {
                    NodeId(1)
                } else {
                    NodeId(0)
                }
            }
        };
        drop(inner);
        node
    }

    /// §4.B "Rebalance trigger": `(max_util - min_util) > balance_threshold`
    /// AND elapsed since last rebalance >= interval. Updates the internal
    /// rebalance clock when it returns `true`.
    pub fn should_rebalance(&self, nodes: &NodeSet) -> bool {
        let mut inner = self.inner.lock();
        if !inner.config.auto_rebalance {
            return false;
        }
        let spread = nodes.utilisation_spread();
        if spread <= inner.config.balance_threshold {
            return false;
        }
        let interval = std::time::Duration::from_millis(inner.config.rebalance_interval_ms);
        let due = match inner.last_rebalance {
            None => true,
            Some(last) => last.elapsed() >= interval,
        };
        if due {
            inner.last_rebalance = Some(Instant::now());
        }
        due
    }
}

/// Sample a node proportional to its configured weight; weight 0 excludes a
/// node. All weights zero (or no weights configured) degrades to node 0
/// (§8 "Boundary cases").
fn select_weighted(inner: &mut Inner, nodes: &NodeSet) -> NodeId {
    let weights = &inner.config.node_weights;
    let total: u64 = (0..nodes.len())
        .map(|i| weights.get(i).copied().unwrap_or(100) as u64)
        .sum();
    if total == 0 {
        return NodeId(0);
    }
    let mut pick = inner.rng.gen_range(0..total);
    for i in 0..nodes.len() {
        let w = weights.get(i).copied().unwrap_or(100) as u64;
        if pick < w {
            return NodeId(i as i32);
        }
        pick -= w;
    }
    NodeId(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PlacementConfig;

    fn engine_with(strategy: PlacementStrategyName) -> PlacementEngine {
        let mut config = PlacementConfig::default();
        config.strategy = strategy;
        PlacementEngine::new(config)
    }

    #[test]
    fn round_robin_visits_nodes_in_order() {
        let engine = engine_with(PlacementStrategyName::RoundRobin);
        let nodes = NodeSet::new(2);
        let visited: Vec<i32> = (0..10)
            .map(|_| engine.select_node(100, &nodes).0)
            .collect();
        assert_eq!(visited, vec![0, 1, 0, 1, 0, 1, 0, 1, 0, 1]);
    }

    #[test]
    fn local_first_always_node_zero() {
        let engine = engine_with(PlacementStrategyName::LocalFirst);
        let nodes = NodeSet::new(3);
        for _ in 0..5 {
            assert_eq!(engine.select_node(64, &nodes), NodeId(0));
        }
    }

    #[test]
    fn weighted_all_zero_degrades_to_node_zero() {
        let mut config = PlacementConfig::default();
        config.strategy = PlacementStrategyName::Weighted;
        config.node_weights = vec![0, 0, 0];
        let engine = PlacementEngine::new(config);
        let nodes = NodeSet::new(3);
        for _ in 0..10 {
            assert_eq!(engine.select_node(64, &nodes), NodeId(0));
        }
    }

    #[test]
    fn weighted_excludes_zero_weight_node() {
        let mut config = PlacementConfig::default();
        config.strategy = PlacementStrategyName::Weighted;
        config.node_weights = vec![0, 100];
        let engine = PlacementEngine::new(config);
        let nodes = NodeSet::new(2);
        for _ in 0..50 {
            assert_eq!(engine.select_node(64, &nodes), NodeId(1));
        }
    }

    #[test]
    fn pressure_aware_picks_least_utilised() {
        let engine = engine_with(PlacementStrategyName::PressureAware);
        let nodes = NodeSet::with_capacity(2, 10_000);
        nodes.get(NodeId(0)).unwrap().counters.bytes_allocated.store(1000, std::sync::atomic::Ordering::Relaxed);
        assert_eq!(engine.select_node(64, &nodes), NodeId(1));
    }

    #[test]
    fn cxl_optimised_small_goes_local_large_goes_remote() {
        let mut config = PlacementConfig::default();
        config.strategy = PlacementStrategyName::CxlOptimised;
        config.min_allocation_size = 64;
        let engine = PlacementEngine::new(config);
        let nodes = NodeSet::new(2);
        assert_eq!(engine.select_node(32, &nodes), NodeId(0));
        assert_eq!(engine.select_node(128, &nodes), NodeId(1));
    }

    #[test]
    fn single_node_degradation_ignores_strategy() {
        let engine = engine_with(PlacementStrategyName::RoundRobin);
        let nodes = NodeSet::new(1);
        for _ in 0..5 {
            assert_eq!(engine.select_node(64, &nodes), NodeId(0));
        }
    }

    #[test]
    fn interleave_stays_within_node_range() {
        let engine = engine_with(PlacementStrategyName::Interleave);
        let nodes = NodeSet::new(4);
        for _ in 0..50 {
            let n = engine.select_node(64, &nodes);
            assert!(n.0 >= 0 && n.0 < 4);
        }
    }

    #[test]
    fn rebalance_not_due_without_auto_rebalance() {
        let engine = engine_with(PlacementStrategyName::RoundRobin);
        let nodes = NodeSet::new(2);
        assert!(!engine.should_rebalance(&nodes));
    }
}
