//! Payload migration engine: type-polymorphic copy-and-swap for one logical
//! value at a time (§4.D).
//!
//! Grounded on `rtmalloc::stats` for the counter/snapshot shape; the
//! per-kind algorithms themselves are grounded on `original_source`'s
//! `numa_*_migrate` routines (string/hash/list/set/zset, each branching on
//! encoding before choosing a copy strategy) and reproduced here against the
//! opaque traits of [`crate::valuekind`] rather than the source's raw struct
//! walks, per the "model as polymorphic traits" redesign note (§9).

use crate::allocator::NodeAllocator;
use crate::error::{NumaError, Result};
use crate::node::NodeId;
use crate::valuekind::{HostValue, Payload, ValueKind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// A key-addressable collection of host values. The store's dictionary
/// itself stays opaque (§1 Non-goals); this is the narrow seam the engine
/// needs to find a value by key and enumerate a partition's keys.
pub trait KeyStore {
    fn get_mut(&mut self, key: &[u8]) -> Option<&mut dyn HostValue>;
    /// All keys currently resident in the partition this engine operates
    /// over. Used by `migrate_all`; `migrate_many` takes its key set
    /// directly instead.
    fn keys(&self) -> Vec<Vec<u8>>;
}

#[derive(Default)]
struct StatsInner {
    total: AtomicU64,
    successful: AtomicU64,
    failed: AtomicU64,
    cumulative_bytes: AtomicU64,
    cumulative_time_us: AtomicU64,
}

/// Point-in-time view of [`MigrationEngine`]'s counters (§4.D "statistics
/// update on every migration").
#[derive(Clone, Copy, Debug, Default)]
pub struct MigrationStats {
    pub total: u64,
    pub successful: u64,
    pub failed: u64,
    pub cumulative_bytes: u64,
    pub cumulative_time_us: u64,
}

pub struct MigrationEngine {
    stats: StatsInner,
}

impl MigrationEngine {
    pub fn new() -> Self {
        Self {
            stats: StatsInner::default(),
        }
    }

    pub fn stats(&self) -> MigrationStats {
        MigrationStats {
            total: self.stats.total.load(Ordering::Relaxed),
            successful: self.stats.successful.load(Ordering::Relaxed),
            failed: self.stats.failed.load(Ordering::Relaxed),
            cumulative_bytes: self.stats.cumulative_bytes.load(Ordering::Relaxed),
            cumulative_time_us: self.stats.cumulative_time_us.load(Ordering::Relaxed),
        }
    }

    /// Reset all counters to zero (administrative `migrate reset`, §6).
    pub fn reset_stats(&self) {
        self.stats.total.store(0, Ordering::Relaxed);
        self.stats.successful.store(0, Ordering::Relaxed);
        self.stats.failed.store(0, Ordering::Relaxed);
        self.stats.cumulative_bytes.store(0, Ordering::Relaxed);
        self.stats.cumulative_time_us.store(0, Ordering::Relaxed);
    }

    /// Relocate one value to `target_node` (§4.D). Copy-and-swap: a new
    /// structure is built entirely on `target_node` before anything on the
    /// source is released, so a failure midway leaves the source untouched.
    pub fn migrate_value(
        &self,
        store: &mut dyn KeyStore,
        allocator: &NodeAllocator,
        key: &[u8],
        target_node: NodeId,
    ) -> Result<()> {
        self.stats.total.fetch_add(1, Ordering::Relaxed);
        let started = Instant::now();

        let result = (|| -> Result<usize> {
            let value = store.get_mut(key).ok_or(NumaError::NotFound)?;
            if value.current_node() == target_node {
                return Ok(0);
            }
            migrate_one(value, allocator, target_node)
        })();

        let elapsed_us = started.elapsed().as_micros() as u64;
        self.stats.cumulative_time_us.fetch_add(elapsed_us, Ordering::Relaxed);
        match &result {
            Ok(bytes) => {
                self.stats.successful.fetch_add(1, Ordering::Relaxed);
                self.stats.cumulative_bytes.fetch_add(*bytes as u64, Ordering::Relaxed);
            }
            Err(_) => {
                self.stats.failed.fetch_add(1, Ordering::Relaxed);
            }
        }
        result.map(|_| ())
    }

    /// Bulk migration; per-key result is not individually surfaced, but the
    /// overall result is `ok` as soon as at least one key succeeded (§4.D).
    pub fn migrate_many(
        &self,
        store: &mut dyn KeyStore,
        allocator: &NodeAllocator,
        keys: &[Vec<u8>],
        target_node: NodeId,
    ) -> Result<()> {
        let mut any_ok = false;
        let mut last_err = NumaError::NotFound;
        for key in keys {
            match self.migrate_value(store, allocator, key, target_node) {
                Ok(()) => any_ok = true,
                Err(e) => last_err = e,
            }
        }
        if any_ok {
            Ok(())
        } else {
            Err(last_err)
        }
    }

    /// Migrate every key currently in the store's partition (§4.D).
    pub fn migrate_all(
        &self,
        store: &mut dyn KeyStore,
        allocator: &NodeAllocator,
        target_node: NodeId,
    ) -> Result<()> {
        let keys = store.keys();
        self.migrate_many(store, allocator, &keys, target_node)
    }
}

impl Default for MigrationEngine {
    fn default() -> Self {
        Self::new()
    }
}

/// Copy-and-swap one value to `target_node`, returning the number of bytes
/// copied on success. Per-kind dispatch, §4.D.
fn migrate_one(value: &mut dyn HostValue, allocator: &NodeAllocator, target_node: NodeId) -> Result<usize> {
    match value.kind() {
        ValueKind::StringV => migrate_string(value, allocator, target_node),
        ValueKind::Hash => migrate_hash(value, allocator, target_node),
        ValueKind::List => migrate_list(value, allocator, target_node),
        ValueKind::Set => migrate_set(value, allocator, target_node),
        ValueKind::ZSet => migrate_zset(value, allocator, target_node),
    }
}

/// Allocate `old.len` bytes on `target_node`, copy `old`'s bytes into the
/// new region, and return the new payload handle. The old pointer is left
/// untouched — callers free it only after every copy in the migration has
/// succeeded and the new structure has been published.
fn copy_payload_to_node(old: Payload, allocator: &NodeAllocator, target_node: NodeId) -> Result<Payload> {
    let new_ptr = allocator.alloc(old.len, target_node);
    if new_ptr.is_null() {
        return Err(NumaError::OutOfMemory);
    }
    unsafe { std::ptr::copy_nonoverlapping(old.ptr, new_ptr, old.len) };
    Ok(Payload { ptr: new_ptr, len: old.len })
}

/// 1. String (§4.D.1): integer-packed encoding is a no-op; raw encoding is
/// a single-blob copy.
fn migrate_string(value: &mut dyn HostValue, allocator: &NodeAllocator, target_node: NodeId) -> Result<usize> {
    let Some(old) = value.blob() else {
        // Integer-packed: nothing backing it to relocate.
        return Ok(0);
    };
    let new = copy_payload_to_node(old, allocator, target_node)?;
    value.publish_blob(new, target_node);
    allocator.free(old.ptr);
    Ok(new.len)
}

/// 2. Hash (§4.D.2). Packed-list: single-blob copy. Hashtable: rebuild
/// entry by entry, pre-expanded to the source's cardinality, unwinding the
/// partial rebuild on any allocation failure (every pointer copied so far
/// is freed; `value` is never touched until the whole rebuild succeeds).
fn migrate_hash(value: &mut dyn HostValue, allocator: &NodeAllocator, target_node: NodeId) -> Result<usize> {
    if let Some(old) = value.blob() {
        let new = copy_payload_to_node(old, allocator, target_node)?;
        value.publish_blob(new, target_node);
        allocator.free(old.ptr);
        return Ok(new.len);
    }
    migrate_via_hash_entries(value, allocator, target_node)
}

/// Shared by hash (hashtable encoding) and set (hashtable encoding, §4.D.4
/// "same pattern as hash but with null values" — the host's `HashEntries`
/// impl for a set simply yields zero-length value payloads).
fn migrate_via_hash_entries(value: &mut dyn HostValue, allocator: &NodeAllocator, target_node: NodeId) -> Result<usize> {
    let rebuilt = value.hash_entries().map(|entries| {
        let mut old_entries = Vec::with_capacity(entries.len());
        let mut new_entries = Vec::with_capacity(entries.len());
        let mut bytes_copied = 0usize;
        for (field, val) in entries.iter_entries() {
            let result: Result<()> = (|| {
                let field_new = copy_payload_to_node(field, allocator, target_node)?;
                let val_new = copy_payload_to_node(val, allocator, target_node)?;
                bytes_copied += field_new.len + val_new.len;
                new_entries.push((field_new, val_new));
                Ok(())
            })();
            old_entries.push((field, val));
            if let Err(e) = result {
                // Unwind: release every new pointer built so far. The old
                // entries (and `value` itself) were never touched.
                for (f, v) in new_entries {
                    allocator.free(f.ptr);
                    allocator.free(v.ptr);
                }
                return Err(e);
            }
        }
        Ok((old_entries, new_entries, bytes_copied))
    });
    match rebuilt {
        Some(result) => {
            let (old_entries, new_entries, bytes_copied) = result?;
            value.publish_hash_entries(new_entries, target_node);
            for (f, v) in old_entries {
                allocator.free(f.ptr);
                allocator.free(v.ptr);
            }
            Ok(bytes_copied)
        }
        None => Err(NumaError::UnsupportedKind),
    }
}

/// 3. List (§4.D.3): quicklist, node by node, preserving order; the
/// compressed-node case is handled the same as raw since both are copied by
/// their exact serialized size (the host's `ListNodes` impl is responsible
/// for keeping that size self-describing).
fn migrate_list(value: &mut dyn HostValue, allocator: &NodeAllocator, target_node: NodeId) -> Result<usize> {
    if let Some(old) = value.blob() {
        let new = copy_payload_to_node(old, allocator, target_node)?;
        value.publish_blob(new, target_node);
        allocator.free(old.ptr);
        return Ok(new.len);
    }
    let rebuilt = value.list_nodes().map(|nodes| {
        let mut old_nodes = Vec::with_capacity(nodes.len());
        let mut new_nodes = Vec::with_capacity(nodes.len());
        let mut bytes_copied = 0usize;
        for node in nodes.iter_nodes() {
            old_nodes.push(node);
            match copy_payload_to_node(node, allocator, target_node) {
                Ok(copy) => {
                    bytes_copied += copy.len;
                    new_nodes.push(copy);
                }
                Err(e) => {
                    for n in new_nodes {
                        allocator.free(n.ptr);
                    }
                    return Err(e);
                }
            }
        }
        Ok((old_nodes, new_nodes, bytes_copied))
    });
    match rebuilt {
        Some(result) => {
            let (old_nodes, new_nodes, bytes_copied) = result?;
            value.publish_list_nodes(new_nodes, target_node);
            for n in old_nodes {
                allocator.free(n.ptr);
            }
            Ok(bytes_copied)
        }
        None => Err(NumaError::UnsupportedKind),
    }
}

/// 4. Set (§4.D.4): int-set is a single-blob copy; hashtable-encoded set
/// follows the same rebuild pattern as hash, but with null values.
fn migrate_set(value: &mut dyn HostValue, allocator: &NodeAllocator, target_node: NodeId) -> Result<usize> {
    if let Some(old) = value.blob() {
        let new = copy_payload_to_node(old, allocator, target_node)?;
        value.publish_blob(new, target_node);
        allocator.free(old.ptr);
        return Ok(new.len);
    }
    migrate_via_hash_entries(value, allocator, target_node)
}

/// 5. Sorted set (§4.D.5): packed-list is a single-blob copy; skiplist
/// rebuilds tail-to-head, mirroring each element into the parallel dict
/// mapping element identity to the new skiplist node's score field — the
/// host's `publish_sorted_entries` is expected to rebuild both the skiplist
/// and that dict from the same `(element, score)` list, since the dict is
/// fully determined by it.
fn migrate_zset(value: &mut dyn HostValue, allocator: &NodeAllocator, target_node: NodeId) -> Result<usize> {
    if let Some(old) = value.blob() {
        let new = copy_payload_to_node(old, allocator, target_node)?;
        value.publish_blob(new, target_node);
        allocator.free(old.ptr);
        return Ok(new.len);
    }
    let rebuilt = value.sorted_entries().map(|entries| {
        let mut old_entries = Vec::with_capacity(entries.len());
        let mut new_entries = Vec::with_capacity(entries.len());
        let mut bytes_copied = 0usize;
        for (element, score) in entries.iter_tail_to_head() {
            old_entries.push(element);
            match copy_payload_to_node(element, allocator, target_node) {
                Ok(copy) => {
                    bytes_copied += copy.len;
                    new_entries.push((copy, score));
                }
                Err(e) => {
                    for (e, _) in new_entries {
                        allocator.free(e.ptr);
                    }
                    return Err(e);
                }
            }
        }
        Ok((old_entries, new_entries, bytes_copied))
    });
    match rebuilt {
        Some(result) => {
            let (old_entries, new_entries, bytes_copied) = result?;
            value.publish_sorted_entries(new_entries, target_node);
            for e in old_entries {
                allocator.free(e.ptr);
            }
            Ok(bytes_copied)
        }
        None => Err(NumaError::UnsupportedKind),
    }
}
