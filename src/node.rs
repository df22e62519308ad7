//! The fixed, ordered node set discovered at init (§3 "Node set").

use std::sync::atomic::{AtomicU64, Ordering};

/// Identifies one memory domain (a NUMA socket or a CXL tier).
///
/// Backed by `i32` so the reserved sentinel (`NONE`, -1) used by the metadata
/// prefix's null-pointer getter contract (§4.C) fits in the same type as a
/// real id.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct NodeId(pub i32);

impl NodeId {
    /// Sentinel returned by prefix getters on a null pointer.
    pub const NONE: NodeId = NodeId(-1);

    #[inline]
    pub fn is_none(self) -> bool {
        self.0 < 0
    }

    #[inline]
    pub fn index(self) -> usize {
        debug_assert!(self.0 >= 0);
        self.0 as usize
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Running counters for one node. All relaxed: observational only, per the
/// same reasoning `rtmalloc::stats` uses for its counters — correctness
/// comes from the allocator's own locks, not from these loads.
#[derive(Default)]
pub struct NodeCounters {
    pub allocations: AtomicU64,
    pub bytes_allocated: AtomicU64,
    pub frees: AtomicU64,
}

impl NodeCounters {
    pub fn snapshot(&self) -> NodeCounterSnapshot {
        NodeCounterSnapshot {
            allocations: self.allocations.load(Ordering::Relaxed),
            bytes_allocated: self.bytes_allocated.load(Ordering::Relaxed),
            frees: self.frees.load(Ordering::Relaxed),
        }
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct NodeCounterSnapshot {
    pub allocations: u64,
    pub bytes_allocated: u64,
    pub frees: u64,
}

/// Static description plus live counters for one node.
pub struct Node {
    pub id: NodeId,
    /// Placement weight, default 100. Weight 0 excludes the node from the
    /// `weighted` strategy.
    pub weight: u32,
    /// Bytes reserved (e.g. for the host's own bookkeeping) and not counted
    /// toward this node's usable capacity.
    pub reserved_bytes: u64,
    /// Lower is faster-local; used only for informational/ranking purposes.
    pub latency_class: u32,
    /// Soft capacity used to compute utilisation; 0 means "unbounded"
    /// (utilisation always reports 0.0).
    pub capacity_bytes: u64,
    pub counters: NodeCounters,
}

impl Node {
    pub fn new(id: NodeId) -> Self {
        Self {
            id,
            weight: 100,
            reserved_bytes: 0,
            latency_class: 0,
            capacity_bytes: 0,
            counters: NodeCounters::default(),
        }
    }

    /// Fraction of capacity currently allocated, in `0.0..=1.0`. Returns 0.0
    /// for nodes with no declared capacity.
    pub fn utilisation(&self) -> f64 {
        if self.capacity_bytes == 0 {
            return 0.0;
        }
        let used = self.counters.bytes_allocated.load(Ordering::Relaxed) as f64;
        (used / self.capacity_bytes as f64).min(1.0)
    }

    pub fn record_alloc(&self, bytes: usize) {
        self.counters.allocations.fetch_add(1, Ordering::Relaxed);
        self.counters
            .bytes_allocated
            .fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn record_free(&self, bytes: usize) {
        self.counters.frees.fetch_add(1, Ordering::Relaxed);
        self.counters
            .bytes_allocated
            .fetch_sub(bytes as u64, Ordering::Relaxed);
    }
}

/// The fixed, ordered set of nodes discovered at init. Immutable shape after
/// construction (node count never changes at runtime); per-node counters and
/// weight are the only mutable parts.
pub struct NodeSet {
    nodes: Vec<Node>,
}

impl NodeSet {
    /// Build a node set of `count` nodes, ids `0..count`. `count == 0` is not
    /// meaningful; callers should pass at least 1 (single-node degradation,
    /// §6 "Environment", still models one node).
    pub fn new(count: usize) -> Self {
        let nodes = (0..count).map(|i| Node::new(NodeId(i as i32))).collect();
        Self { nodes }
    }

    /// Build a node set where every node reports `capacity_bytes`, so
    /// `utilisation()`/pressure-aware placement can discriminate between
    /// nodes from the first allocation onward. `NodeAllocator::new` uses
    /// this with the host-supplied per-node capacity; `new` above stays
    /// capacity-0 ("unbounded") for callers that only care about counts.
    pub fn with_capacity(count: usize, capacity_bytes: u64) -> Self {
        let nodes = (0..count)
            .map(|i| {
                let mut n = Node::new(NodeId(i as i32));
                n.capacity_bytes = capacity_bytes;
                n
            })
            .collect();
        Self { nodes }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn get(&self, id: NodeId) -> Option<&Node> {
        if id.is_none() {
            return None;
        }
        self.nodes.get(id.index())
    }

    pub fn iter(&self) -> impl Iterator<Item = &Node> {
        self.nodes.iter()
    }

    /// True when the platform advertises a single node — every strategy
    /// degrades to node 0 in this mode (§6).
    pub fn is_single_node(&self) -> bool {
        self.nodes.len() <= 1
    }

    /// `(max_utilisation - min_utilisation)` across all nodes.
    pub fn utilisation_spread(&self) -> f64 {
        if self.nodes.is_empty() {
            return 0.0;
        }
        let mut min = f64::MAX;
        let mut max = f64::MIN;
        for n in &self.nodes {
            let u = n.utilisation();
            min = min.min(u);
            max = max.max(u);
        }
        max - min
    }

    /// Node with the lowest utilisation (ties broken by lowest id).
    pub fn least_utilised(&self) -> NodeId {
        self.nodes
            .iter()
            .min_by(|a, b| {
                a.utilisation()
                    .partial_cmp(&b.utilisation())
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .map(|n| n.id)
            .unwrap_or(NodeId(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_node_degradation() {
        let set = NodeSet::new(1);
        assert!(set.is_single_node());
    }

    #[test]
    fn utilisation_spread_with_capacity() {
        let set = NodeSet::new(2);
        set.get(NodeId(0)).unwrap().counters.bytes_allocated.store(0, Ordering::Relaxed);
        // capacity 0 means utilisation always reports 0
        assert_eq!(set.utilisation_spread(), 0.0);
    }

    #[test]
    fn least_utilised_picks_lower_id_on_tie() {
        let set = NodeSet::new(3);
        assert_eq!(set.least_utilised(), NodeId(0));
    }
}
