//! OS memory backend: page-aligned allocation optionally bound to a NUMA
//! node. Grounded on `rtmalloc`'s `platform/unix.rs` mmap wrapper, extended
//! with node binding via `mbind` (Linux only — other platforms fall back to
//! unbound anonymous mappings, which is the single-node degradation mode
//! §6 "Environment" requires anyway).

use crate::node::NodeId;

/// Allocate `size` bytes, `align`-aligned, optionally bound to `node`.
/// Returns null on failure.
///
/// # Safety
/// Caller owns the returned region and must release it with
/// [`dealloc_aligned`] using the same `size`.
pub unsafe fn alloc_aligned(size: usize, align: usize, node: NodeId) -> *mut u8 {
    cfg_if::cfg_if! {
        if #[cfg(target_os = "linux")] {
            unsafe { linux::alloc_aligned(size, align, node) }
        } else {
            let _ = node;
            unsafe { portable::alloc_aligned(size, align) }
        }
    }
}

/// # Safety
/// `ptr`/`size` must match a prior [`alloc_aligned`] call.
pub unsafe fn dealloc_aligned(ptr: *mut u8, size: usize) {
    cfg_if::cfg_if! {
        if #[cfg(target_os = "linux")] {
            unsafe { linux::dealloc_aligned(ptr, size) }
        } else {
            unsafe { portable::dealloc_aligned(ptr, size) }
        }
    }
}

/// Best-effort node binding for a region already allocated via
/// [`alloc_aligned`]. No-op (and never fails observably) on platforms or
/// node counts where binding does not apply — callers treat placement as a
/// preference, never a guarantee (§4.A "falls back ... if the OS honours the
/// binding").
pub fn bind_to_node(ptr: *mut u8, size: usize, node: NodeId) {
    cfg_if::cfg_if! {
        if #[cfg(target_os = "linux")] {
            linux::bind_to_node(ptr, size, node);
        } else {
            let _ = (ptr, size, node);
        }
    }
}

#[cfg(target_os = "linux")]
mod linux {
    use super::*;

    pub unsafe fn alloc_aligned(size: usize, align: usize, node: NodeId) -> *mut u8 {
        let ptr = unsafe { portable::alloc_aligned(size, align) };
        if !ptr.is_null() {
            bind_to_node(ptr, size, node);
        }
        ptr
    }

    pub unsafe fn dealloc_aligned(ptr: *mut u8, size: usize) {
        unsafe { portable::dealloc_aligned(ptr, size) };
    }

    /// Bind `[ptr, ptr+size)` to `node` via `mbind(MPOL_BIND)`. Logged at
    /// `debug` on failure and otherwise ignored — the prefix still records
    /// the *requested* node regardless of whether the OS actually honoured
    /// the binding (§4.A).
    pub fn bind_to_node(ptr: *mut u8, size: usize, node: NodeId) {
        if node.is_none() {
            return;
        }
        const MPOL_BIND: i32 = 2;
        let node_mask: u64 = 1u64 << (node.0 as u32);
        let ret = unsafe {
            libc::syscall(
                libc::SYS_mbind,
                ptr as *mut libc::c_void,
                size as libc::c_ulong,
                MPOL_BIND as libc::c_ulong,
                &node_mask as *const u64,
                64u64,
                0u32,
            )
        };
        if ret != 0 {
            log::debug!(
                "mbind to node {} failed for {} bytes at {:p} (errno {})",
                node,
                size,
                ptr,
                std::io::Error::last_os_error()
            );
        }
    }
}

mod portable {
    use super::*;

    /// Over-allocate and trim to guarantee `align` alignment, the same
    /// trick `rtmalloc::platform::unix::page_alloc` uses for its larger
    /// page size.
    pub unsafe fn alloc_aligned(size: usize, align: usize) -> *mut u8 {
        let map_size = size + align;
        let raw = unsafe {
            libc::mmap(
                core::ptr::null_mut(),
                map_size,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                -1,
                0,
            )
        };
        if raw == libc::MAP_FAILED {
            return core::ptr::null_mut();
        }
        let raw_addr = raw as usize;
        let aligned_addr = (raw_addr + align - 1) & !(align - 1);

        let lead = aligned_addr - raw_addr;
        if lead > 0 {
            unsafe { libc::munmap(raw_addr as *mut libc::c_void, lead) };
        }
        let trail = (raw_addr + map_size) - (aligned_addr + size);
        if trail > 0 {
            unsafe { libc::munmap((aligned_addr + size) as *mut libc::c_void, trail) };
        }
        aligned_addr as *mut u8
    }

    pub unsafe fn dealloc_aligned(ptr: *mut u8, size: usize) {
        unsafe { libc::munmap(ptr as *mut libc::c_void, size) };
    }
}
