//! Top-level node-aware allocator: ties the node set, slab classes, pools
//! and direct OS path together behind the public contract of §4.A.
//!
//! Grounded on `rtmalloc::allocator`, which plays the same "tie the tiers
//! together" role for thread-cache/central-cache/page-heap. Dispatch picks
//! the size class for `size + PREFIX_SIZE` and uses whichever backend that
//! class was built with (slab for classes `<= 512`, pool above that, up to
//! 4096); anything the class table can't hold, or that its backend fails to
//! satisfy, falls through to a direct per-node OS allocation.

use crate::config::{self, AllocatorConfig, NUM_SIZE_CLASSES, PREFIX_SIZE, SLAB_MAX_OBJECT};
use crate::node::{NodeId, NodeSet};
use crate::platform;
use crate::pool::Pool;
use crate::prefix::{Origin, PrefixMut, PrefixRef};
use crate::slab::{self, SlabClass};
use std::ptr;

/// One (node, class) pair of slab and pool state. Only one of the two is
/// populated per class, selected once at construction time by whether the
/// class's size is `<= SLAB_MAX_OBJECT`.
enum ClassBackend {
    Slab(Box<SlabClass>),
    Pool(Pool),
}

pub struct NodeAllocator {
    pub nodes: NodeSet,
    /// `backends[node][class]`
    backends: Vec<Vec<ClassBackend>>,
    config: AllocatorConfig,
}

impl NodeAllocator {
    pub fn new(node_count: usize, config: AllocatorConfig) -> Self {
        let nodes = NodeSet::with_capacity(node_count.max(1), config.node_capacity_bytes);
        let mut backends = Vec::with_capacity(nodes.len());
        for node_idx in 0..nodes.len() {
            let node = NodeId(node_idx as i32);
            let mut per_class = Vec::with_capacity(NUM_SIZE_CLASSES);
            for class in 0..NUM_SIZE_CLASSES {
                let size = config::class_to_size(class);
                if size <= SLAB_MAX_OBJECT {
                    per_class.push(ClassBackend::Slab(SlabClass::new(
                        node,
                        class,
                        size,
                        config.empty_slab_cache_bound,
                    )));
                } else {
                    per_class.push(ClassBackend::Pool(Pool::new(node, size)));
                }
            }
            backends.push(per_class);
        }
        Self {
            nodes,
            backends,
            config,
        }
    }

    /// Allocate `size` bytes on `node`, returning a user pointer whose
    /// preceding 16-byte prefix records `size` and `origin`. Null on OOM.
    ///
    /// Dispatch is driven by the size class actually selected for
    /// `size + PREFIX_SIZE`, not by comparing the raw `size` against
    /// `SLAB_MAX_OBJECT`/`POOL_MAX_OBJECT` directly: those constants mark
    /// where the class table itself switches backend (§4.A), but a raw size
    /// close to either boundary can round up into a class served by the
    /// *other* backend once the prefix is added, so the class table is the
    /// single source of truth here.
    pub fn alloc(&self, size: usize, node: NodeId) -> *mut u8 {
        let needed = size + PREFIX_SIZE;

        if let Some(ptr) = self.alloc_classed(size, needed, node) {
            self.nodes.get(node).map(|n| n.record_alloc(size));
            return ptr;
        }

        match self.alloc_direct(size, node) {
            Some(ptr) => {
                self.nodes.get(node).map(|n| n.record_alloc(size));
                ptr
            }
            None => ptr::null_mut(),
        }
    }

    /// Try the slab or pool backend registered for `needed`'s size class,
    /// whichever it is. Returns `None` (never partially allocates) when no
    /// class fits, the node is unknown, or the backend itself is out of
    /// memory — callers fall back to a direct allocation in all three cases.
    fn alloc_classed(&self, size: usize, needed: usize, node: NodeId) -> Option<*mut u8> {
        let class = config::size_to_class(needed)?;
        let backend = self.backends.get(node.index())?.get(class)?;
        match backend {
            ClassBackend::Slab(slab_class) => {
                let cell = slab_class.alloc();
                if cell.is_null() {
                    return None;
                }
                Some(unsafe { PrefixMut::write(cell, size, Origin::Slab, node) })
            }
            ClassBackend::Pool(pool) => {
                let raw = pool.alloc(needed);
                if raw.is_null() {
                    return None;
                }
                Some(unsafe { PrefixMut::write(raw, size, Origin::Pool, node) })
            }
        }
    }

    fn alloc_direct(&self, size: usize, node: NodeId) -> Option<*mut u8> {
        let total = size + PREFIX_SIZE;
        let raw = unsafe { platform::alloc_aligned(total, PREFIX_SIZE, node) };
        if raw.is_null() {
            return None;
        }
        unsafe { Some(PrefixMut::write(raw, size, Origin::Direct, node)) }
    }

    /// Force a direct per-node allocation, bypassing the slab/pool paths
    /// (§4.A `alloc_on_node`).
    pub fn alloc_on_node(&self, size: usize, node: NodeId) -> *mut u8 {
        match self.alloc_direct(size, node) {
            Some(ptr) => {
                self.nodes.get(node).map(|n| n.record_alloc(size));
                ptr
            }
            None => ptr::null_mut(),
        }
    }

    /// Zero-filled allocation (§4.A `calloc`).
    pub fn calloc(&self, size: usize, node: NodeId) -> *mut u8 {
        let ptr = self.alloc(size, node);
        if !ptr.is_null() {
            unsafe { ptr::write_bytes(ptr, 0, size) };
        }
        ptr
    }

    /// Free a user pointer, dispatching by origin read from its prefix
    /// (§4.A `free`). No-op on null.
    pub fn free(&self, user_ptr: *mut u8) {
        if user_ptr.is_null() {
            return;
        }
        let prefix = unsafe { PrefixRef::at(user_ptr) };
        let size = prefix.size();
        let node = prefix.node();
        let origin = prefix.origin();

        match origin {
            // slab.rs expects back exactly the cell pointer it handed out
            // from `SlabClass::alloc` — that's the prefix address, not the
            // user pointer past it.
            Origin::Slab => slab::free(unsafe { user_ptr.sub(PREFIX_SIZE) }),
            Origin::Pool => {
                let class = config::size_to_class(size + PREFIX_SIZE)
                    .unwrap_or(NUM_SIZE_CLASSES - 1);
                if let Some(backend) = self
                    .backends
                    .get(node.index())
                    .and_then(|classes| classes.get(class))
                {
                    if let ClassBackend::Pool(pool) = backend {
                        pool.free(unsafe { user_ptr.sub(PREFIX_SIZE) }, size + PREFIX_SIZE);
                    }
                }
            }
            Origin::Direct => unsafe {
                platform::dealloc_aligned(user_ptr.sub(PREFIX_SIZE), size + PREFIX_SIZE);
            },
        }

        if let Some(n) = self.nodes.get(node) {
            n.record_free(size);
        }
    }

    /// Allocate a new region on the same node, copy `min(old, new)` bytes,
    /// free the old region (§4.A `realloc`).
    pub fn realloc(&self, user_ptr: *mut u8, new_size: usize) -> *mut u8 {
        if user_ptr.is_null() {
            return self.alloc(new_size, NodeId(0));
        }
        let prefix = unsafe { PrefixRef::at(user_ptr) };
        let old_size = prefix.size();
        let node = prefix.node();

        let new_ptr = self.alloc(new_size, node);
        if new_ptr.is_null() {
            return ptr::null_mut();
        }
        let copy_len = old_size.min(new_size);
        unsafe { ptr::copy_nonoverlapping(user_ptr, new_ptr, copy_len) };
        self.free(user_ptr);
        new_ptr
    }

    /// Total bytes allocated across all nodes, matching invariant §8.6.
    pub fn total_bytes_allocated(&self) -> u64 {
        self.nodes
            .iter()
            .map(|n| n.counters.snapshot().bytes_allocated)
            .sum()
    }

    /// Run compaction across every (node, class) pool, per §4.A.
    pub fn compact(&self) {
        for per_class in &self.backends {
            for backend in per_class {
                if let ClassBackend::Pool(pool) = backend {
                    pool.compact(
                        self.config.free_list_discard_threshold,
                        self.config.compact_threshold,
                        self.config.min_free_ratio,
                    );
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AllocatorConfig;

    fn new_allocator(nodes: usize) -> NodeAllocator {
        NodeAllocator::new(nodes, AllocatorConfig::default())
    }

    #[test]
    fn alloc_slab_path_sets_prefix() {
        let alloc = new_allocator(2);
        let p = alloc.alloc(64, NodeId(0));
        assert!(!p.is_null());
        let prefix = unsafe { PrefixRef::at(p) };
        assert_eq!(prefix.size(), 64);
        assert_eq!(prefix.node(), NodeId(0));
        assert_eq!(prefix.origin(), Origin::Slab);
    }

    #[test]
    fn second_same_size_alloc_same_slab_sequential() {
        let alloc = new_allocator(1);
        let p1 = alloc.alloc(64, NodeId(0)) as usize;
        let p2 = alloc.alloc(64, NodeId(0)) as usize;
        // Same slab, next cell: the cell pitch is the class size (96, the
        // smallest class holding 64 + PREFIX_SIZE bytes), not the raw
        // request size.
        let class = crate::config::size_to_class(64 + crate::config::PREFIX_SIZE).unwrap();
        assert_eq!(p2 - p1, crate::config::class_to_size(class));
    }

    #[test]
    fn alloc_pool_path() {
        let alloc = new_allocator(1);
        let p = alloc.alloc(1000, NodeId(0));
        assert!(!p.is_null());
        let prefix = unsafe { PrefixRef::at(p) };
        assert_eq!(prefix.origin(), Origin::Pool);
        assert_eq!(prefix.size(), 1000);
    }

    #[test]
    fn alloc_direct_path_above_pool_max() {
        let alloc = new_allocator(1);
        let p = alloc.alloc(5000, NodeId(0));
        assert!(!p.is_null());
        let prefix = unsafe { PrefixRef::at(p) };
        assert_eq!(prefix.origin(), Origin::Direct);
    }

    #[test]
    fn alloc_free_round_trip_restores_used_memory() {
        let alloc = new_allocator(1);
        let before = alloc.total_bytes_allocated();
        let p = alloc.alloc(100, NodeId(0));
        assert!(alloc.total_bytes_allocated() > before);
        alloc.free(p);
        assert_eq!(alloc.total_bytes_allocated(), before);
    }

    #[test]
    fn calloc_zeroes_memory() {
        let alloc = new_allocator(1);
        let p = alloc.calloc(128, NodeId(0));
        assert!(!p.is_null());
        let bytes = unsafe { std::slice::from_raw_parts(p, 128) };
        assert!(bytes.iter().all(|&b| b == 0));
    }

    #[test]
    fn realloc_preserves_prefix_bytes() {
        let alloc = new_allocator(1);
        let p = alloc.alloc(32, NodeId(0));
        unsafe { ptr::write_bytes(p, 0xAB, 32) };
        let p2 = alloc.realloc(p, 64);
        assert!(!p2.is_null());
        let bytes = unsafe { std::slice::from_raw_parts(p2, 32) };
        assert!(bytes.iter().all(|&b| b == 0xAB));
        let prefix = unsafe { PrefixRef::at(p2) };
        assert_eq!(prefix.size(), 64);
    }

    #[test]
    fn alloc_on_node_bypasses_slab_and_pool() {
        let alloc = new_allocator(1);
        let p = alloc.alloc_on_node(32, NodeId(0));
        assert!(!p.is_null());
        let prefix = unsafe { PrefixRef::at(p) };
        assert_eq!(prefix.origin(), Origin::Direct);
    }

    #[test]
    fn sum_of_node_bytes_matches_total() {
        let alloc = new_allocator(2);
        alloc.alloc(64, NodeId(0));
        alloc.alloc(1000, NodeId(1));
        let sum: u64 = alloc
            .nodes
            .iter()
            .map(|n| n.counters.snapshot().bytes_allocated)
            .sum();
        assert_eq!(sum, alloc.total_bytes_allocated());
    }
}
