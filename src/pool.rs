//! Bump-pointer pool allocator for objects whose class size is in
//! `(512, 4096]` bytes (§3 "Pool chunk", §4.A "Pool allocation/free
//! algorithm", "Compaction").
//!
//! Grounded on `rtmalloc`'s central free list (`src/central_free_list.rs`)
//! generalized from "span carved into fixed cells" to "chunk bump-allocated
//! with LIFO free-list reuse", per §4.A: the free-list node here recycles a
//! released block directly (no nested allocation on the hot path — §9
//! "Manual free-list records... prefer [an] arena of fixed-size nodes"):
//! the node is written *into* the freed block itself, exactly like
//! `rtmalloc`'s intrusive `FreeObject`.

use crate::config::pool_chunk_capacity;
use crate::node::NodeId;
use crate::platform;
use parking_lot::Mutex;
use std::ptr;

const ALIGN: usize = 16;

fn align_up(n: usize, align: usize) -> usize {
    (n + align - 1) & !(align - 1)
}

/// Intrusive free-list node, written into the first bytes of a released
/// block.
#[repr(C)]
struct FreeNode {
    next: *mut FreeNode,
    size: usize,
}

struct Chunk {
    base: *mut u8,
    size: usize,
    offset: usize,
    used_bytes: usize,
    next: *mut Chunk,
}

struct PoolInner {
    chunks: *mut Chunk,
    free_list: *mut FreeNode,
    free_list_len: usize,
}

unsafe impl Send for PoolInner {}

impl PoolInner {
    fn new() -> Self {
        Self {
            chunks: ptr::null_mut(),
            free_list: ptr::null_mut(),
            free_list_len: 0,
        }
    }
}

/// A single (node, size-class) pool.
pub struct Pool {
    node: NodeId,
    class_size: usize,
    inner: Mutex<PoolInner>,
}

impl Pool {
    pub fn new(node: NodeId, class_size: usize) -> Self {
        Self {
            node,
            class_size,
            inner: Mutex::new(PoolInner::new()),
        }
    }

    /// Allocate one block of at least `size_needed` bytes, 16-byte aligned.
    /// Returns null on OOM. `size_needed` should already include any
    /// caller-side overhead (e.g. the metadata prefix); this pool is
    /// agnostic to what it holds.
    pub fn alloc(&self, size_needed: usize) -> *mut u8 {
        let mut inner = self.inner.lock();
        let needed = align_up(size_needed, ALIGN);

        // 1. LIFO reuse from the free list.
        if !inner.free_list.is_null() {
            let node = inner.free_list;
            let node_size = unsafe { (*node).size };
            if node_size >= needed {
                inner.free_list = unsafe { (*node).next };
                inner.free_list_len -= 1;
                return node as *mut u8;
            }
        }

        // 2. Bump pointer in the head chunk.
        if !inner.chunks.is_null() {
            let chunk = inner.chunks;
            let aligned_offset = align_up(unsafe { (*chunk).offset }, ALIGN);
            let end = aligned_offset + needed;
            if end <= unsafe { (*chunk).size } {
                unsafe {
                    (*chunk).offset = end;
                    (*chunk).used_bytes += needed;
                    let ptr = (*chunk).base.add(aligned_offset);
                    return ptr;
                }
            }
        }

        // 3. New chunk.
        let capacity = pool_chunk_capacity(self.class_size);
        let base = unsafe { platform::alloc_aligned(capacity, ALIGN, self.node) };
        if base.is_null() {
            return ptr::null_mut();
        }
        let chunk = Box::into_raw(Box::new(Chunk {
            base,
            size: capacity,
            offset: needed,
            used_bytes: needed,
            next: inner.chunks,
        }));
        inner.chunks = chunk;
        base
    }

    /// Release a block back to this pool's free list. Memory is only
    /// actually returned to the OS by [`Pool::compact`] or process
    /// shutdown — the bump-pointer scheme is arena-style (§4.A
    /// "Compaction").
    pub fn free(&self, ptr: *mut u8, size: usize) {
        if ptr.is_null() {
            return;
        }
        let needed = align_up(size, ALIGN);
        let mut inner = self.inner.lock();
        let node = ptr as *mut FreeNode;
        unsafe {
            (*node).next = inner.free_list;
            (*node).size = needed;
        }
        inner.free_list = node;
        inner.free_list_len += 1;
    }

    /// Discard the free list and release chunks below the compaction
    /// thresholds, per §4.A "Compaction". Caller (the host) must guarantee
    /// no live pointers remain into chunks whose utilisation is at or near
    /// zero — compaction does not individually track which bump-allocated
    /// bytes are still referenced.
    pub fn compact(&self, discard_threshold: usize, compact_threshold: f64, min_free_ratio: f64) {
        let mut inner = self.inner.lock();
        if inner.free_list_len > discard_threshold {
            inner.free_list = ptr::null_mut();
            inner.free_list_len = 0;
        }

        let mut prev: *mut Chunk = ptr::null_mut();
        let mut cur = inner.chunks;
        while !cur.is_null() {
            let next = unsafe { (*cur).next };
            let used = unsafe { (*cur).used_bytes } as f64;
            let size = unsafe { (*cur).size } as f64;
            let utilisation = used / size;
            let free_ratio = 1.0 - utilisation;

            if utilisation < compact_threshold && free_ratio >= min_free_ratio {
                if prev.is_null() {
                    inner.chunks = next;
                } else {
                    unsafe { (*prev).next = next };
                }
                let base = unsafe { (*cur).base };
                let size = unsafe { (*cur).size };
                unsafe {
                    platform::dealloc_aligned(base, size);
                    drop(Box::from_raw(cur));
                }
            } else {
                prev = cur;
            }
            cur = next;
        }
    }

    /// Sum of `used_bytes` across all live chunks.
    pub fn used_bytes(&self) -> usize {
        let inner = self.inner.lock();
        let mut total = 0;
        let mut cur = inner.chunks;
        while !cur.is_null() {
            total += unsafe { (*cur).used_bytes };
            cur = unsafe { (*cur).next };
        }
        total
    }

    pub fn chunk_count(&self) -> usize {
        let inner = self.inner.lock();
        let mut count = 0;
        let mut cur = inner.chunks;
        while !cur.is_null() {
            count += 1;
            cur = unsafe { (*cur).next };
        }
        count
    }
}

impl Drop for Pool {
    fn drop(&mut self) {
        let inner = self.inner.get_mut();
        let mut cur = inner.chunks;
        while !cur.is_null() {
            let next = unsafe { (*cur).next };
            unsafe {
                platform::dealloc_aligned((*cur).base, (*cur).size);
                drop(Box::from_raw(cur));
            }
            cur = next;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alloc_free_reuse() {
        let pool = Pool::new(NodeId(0), 768);
        let p1 = pool.alloc(768);
        assert!(!p1.is_null());
        pool.free(p1, 768);
        let p2 = pool.alloc(768);
        assert_eq!(p1, p2, "freed block should be reused LIFO");
    }

    #[test]
    fn bump_allocates_within_chunk() {
        let pool = Pool::new(NodeId(0), 1024);
        let p1 = pool.alloc(1024) as usize;
        let p2 = pool.alloc(1024) as usize;
        assert!(p2 > p1);
        assert_eq!(pool.chunk_count(), 1);
    }

    #[test]
    fn invariant_used_le_offset_le_size() {
        let pool = Pool::new(NodeId(0), 2048);
        for _ in 0..5 {
            pool.alloc(2048);
        }
        assert!(pool.used_bytes() <= pool_chunk_capacity(2048));
    }

    #[test]
    fn compaction_on_all_full_pool_leaves_chunks_intact() {
        let pool = Pool::new(NodeId(0), 4096);
        let capacity = pool_chunk_capacity(4096);
        let n = capacity / align_up(4096, ALIGN);
        for _ in 0..n {
            assert!(!pool.alloc(4096).is_null());
        }
        let before = pool.chunk_count();
        pool.compact(64, 0.3, 0.5);
        assert_eq!(pool.chunk_count(), before);
    }

    #[test]
    fn compaction_discards_free_list_when_too_long() {
        let pool = Pool::new(NodeId(0), 768);
        let mut ptrs = Vec::new();
        for _ in 0..10 {
            ptrs.push(pool.alloc(768));
        }
        for p in ptrs {
            pool.free(p, 768);
        }
        pool.compact(5, 0.3, 0.5);
        // After a threshold-exceeding discard, a fresh alloc must not reuse
        // a discarded free node instantly (it bumps or grows instead).
        let p = pool.alloc(768);
        assert!(!p.is_null());
    }
}
