//! Size-class table and typed configuration structs.
//!
//! Parsing a config file is the host's job (§1 Non-goals); this module only
//! defines the typed shape and defaults, the same split the source draws
//! between the NUMA module's own config command and the store's config file
//! reader.

use serde::{Deserialize, Serialize};

/// Objects `size <= 512` go through the slab path; `4 KiB` is the slab page
/// size (§3 "Slab").
pub const SLAB_PAGE_SIZE: usize = 4096;
/// Upper bound of the slab path (§4.A dispatch rule).
pub const SLAB_MAX_OBJECT: usize = 512;
/// Upper bound of the pool path; above this, allocation goes direct-to-OS.
pub const POOL_MAX_OBJECT: usize = 4096;

/// 16-byte metadata prefix size (§3, §4.C).
pub const PREFIX_SIZE: usize = 16;

/// Number of size classes (§4.A "Size classes").
pub const NUM_SIZE_CLASSES: usize = 16;

/// The size class table, exactly as specified in §4.A.
pub const SIZE_CLASSES: [usize; NUM_SIZE_CLASSES] = [
    16, 32, 48, 64, 96, 128, 192, 256, 384, 512, 768, 1024, 1536, 2048, 3072, 4096,
];

/// Pool chunk capacities by size-class bucket (§3 "Pool chunk"): 16 KiB for
/// the smaller pool classes, 64 KiB for the middle, 256 KiB for the largest.
pub const POOL_CHUNK_SMALL: usize = 16 * 1024;
pub const POOL_CHUNK_MEDIUM: usize = 64 * 1024;
pub const POOL_CHUNK_LARGE: usize = 256 * 1024;

/// Map a requested size class (already including the prefix) to the chunk
/// capacity its pool should allocate.
pub fn pool_chunk_capacity(class_size: usize) -> usize {
    if class_size <= 1024 {
        POOL_CHUNK_SMALL
    } else if class_size <= 2048 {
        POOL_CHUNK_MEDIUM
    } else {
        POOL_CHUNK_LARGE
    }
}

/// Smallest class whose size is `>= size`. Returns `None` if `size` exceeds
/// the largest class (caller should not be on the slab path at that point).
pub fn size_to_class(size: usize) -> Option<usize> {
    SIZE_CLASSES.iter().position(|&s| s >= size)
}

pub fn class_to_size(class: usize) -> usize {
    SIZE_CLASSES[class]
}

/// §4.B placement configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlacementConfig {
    pub strategy: PlacementStrategyName,
    /// Per-node weights, indexed by node id. Weight 0 excludes a node from
    /// the `weighted` strategy.
    pub node_weights: Vec<u32>,
    /// `0.0..=1.0`; rebalance trigger threshold (§4.B).
    pub balance_threshold: f64,
    pub cxl_optimised: bool,
    pub min_allocation_size: usize,
    pub auto_rebalance: bool,
    pub rebalance_interval_ms: u64,
}

impl Default for PlacementConfig {
    fn default() -> Self {
        Self {
            strategy: PlacementStrategyName::LocalFirst,
            node_weights: Vec::new(),
            balance_threshold: 0.2,
            cxl_optimised: false,
            min_allocation_size: 64,
            auto_rebalance: false,
            rebalance_interval_ms: 60_000,
        }
    }
}

/// The six named strategies of §4.B, exhaustive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PlacementStrategyName {
    LocalFirst,
    Interleave,
    RoundRobin,
    Weighted,
    PressureAware,
    CxlOptimised,
}

impl PlacementStrategyName {
    /// Case-insensitive parse, per §6 admin command surface
    /// (`strategy` "one of the six names, case-insensitive").
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().replace('_', "-").as_str() {
            "local-first" => Some(Self::LocalFirst),
            "interleave" => Some(Self::Interleave),
            "round-robin" => Some(Self::RoundRobin),
            "weighted" => Some(Self::Weighted),
            "pressure-aware" => Some(Self::PressureAware),
            "cxl-optimised" | "cxl-optimized" => Some(Self::CxlOptimised),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::LocalFirst => "local-first",
            Self::Interleave => "interleave",
            Self::RoundRobin => "round-robin",
            Self::Weighted => "weighted",
            Self::PressureAware => "pressure-aware",
            Self::CxlOptimised => "cxl-optimised",
        }
    }
}

/// §4.E hotness tracker configuration (also the composite-LRU strategy's
/// configurable keys, §4.F).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct HotnessConfig {
    pub decay_threshold: u32,
    pub stability_count: u8,
    pub migrate_threshold: u8,
    pub overload_threshold: f64,
    pub bandwidth_threshold: f64,
    pub pressure_threshold: f64,
    pub pending_migration_timeout_ms: u64,
}

impl Default for HotnessConfig {
    fn default() -> Self {
        Self {
            decay_threshold: 100,
            stability_count: 3,
            migrate_threshold: 5,
            overload_threshold: 0.85,
            bandwidth_threshold: 0.85,
            pressure_threshold: 0.85,
            pending_migration_timeout_ms: 30_000,
        }
    }
}

/// §4.A compaction thresholds.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct AllocatorConfig {
    /// Bounded empty-slab cache per (node, class).
    pub empty_slab_cache_bound: usize,
    /// Pool free-list length above which compaction discards it outright.
    pub free_list_discard_threshold: usize,
    /// `used_bytes / size` below which a chunk is a compaction candidate.
    pub compact_threshold: f64,
    /// `1 - utilisation` minimum for a chunk to be released to the OS.
    pub min_free_ratio: f64,
    /// Soft per-node capacity, in bytes, used only to compute `utilisation()`
    /// for pressure-aware placement and rebalance-trigger checks. Does not
    /// bound allocation — a node can exceed it; the allocator has no notion
    /// of "out of node capacity", only "out of memory" from the OS itself.
    pub node_capacity_bytes: u64,
}

impl Default for AllocatorConfig {
    fn default() -> Self {
        Self {
            empty_slab_cache_bound: 4,
            free_list_discard_threshold: 64,
            compact_threshold: 0.3,
            min_free_ratio: 0.5,
            node_capacity_bytes: 64 * 1024 * 1024 * 1024,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn class_boundaries_exact() {
        for &s in &SIZE_CLASSES {
            assert_eq!(class_to_size(size_to_class(s).unwrap()), s);
        }
    }

    #[test]
    fn class_boundary_lower_edge_exclusive_except_minimum() {
        // 16 is the minimum class and is its own lower edge (inclusive at minimum).
        assert_eq!(size_to_class(16), Some(0));
        // 17 must NOT select class 0 (size 16); it selects the next class up.
        assert_eq!(size_to_class(17), Some(1));
    }

    #[test]
    fn size_above_max_class_is_none() {
        assert_eq!(size_to_class(4097), None);
    }

    #[test]
    fn strategy_name_parse_case_insensitive() {
        assert_eq!(
            PlacementStrategyName::parse("ROUND-ROBIN"),
            Some(PlacementStrategyName::RoundRobin)
        );
        assert_eq!(
            PlacementStrategyName::parse("cxl_optimized"),
            Some(PlacementStrategyName::CxlOptimised)
        );
        assert_eq!(PlacementStrategyName::parse("bogus"), None);
    }
}
