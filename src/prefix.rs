//! The 16-byte metadata prefix bound to every payload (§3, §4.C).
//!
//! Modeled as a typed header struct manipulated through a checked,
//! null-aware pointer wrapper rather than raw pointer arithmetic at call
//! sites (§9 "Pointer-arithmetic-based metadata prefix").

use crate::config::PREFIX_SIZE;
use crate::node::NodeId;

/// Where a payload's backing memory came from.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[repr(u8)]
pub enum Origin {
    Slab = 0,
    Pool = 1,
    Direct = 2,
}

impl Origin {
    fn from_u8(v: u8) -> Origin {
        match v {
            0 => Origin::Slab,
            1 => Origin::Pool,
            _ => Origin::Direct,
        }
    }
}

/// Raw, fixed-layout header. Never constructed by value at call sites —
/// callers go through [`PrefixRef`]/[`PrefixMut`].
#[repr(C, align(16))]
struct PrefixData {
    size: u32,
    origin: u8,
    hotness: u8,
    last_access: u16,
    node: i16,
    access_count: u8,
    _reserved: [u8; 5],
}

const _: () = assert!(core::mem::size_of::<PrefixData>() == PREFIX_SIZE);
const _: () = assert!(core::mem::align_of::<PrefixData>() == PREFIX_SIZE);

/// A checked, read-only view over the prefix immediately preceding a user
/// pointer. `ptr` is the *user* pointer (payload start), not the prefix
/// address; [`PrefixRef::at`] performs the `ptr - PREFIX_SIZE` arithmetic
/// once, in one place.
#[derive(Clone, Copy)]
pub struct PrefixRef {
    header: *const PrefixData,
}

/// Mutable counterpart of [`PrefixRef`].
pub struct PrefixMut {
    header: *mut PrefixData,
}

impl PrefixRef {
    /// # Safety
    /// `user_ptr` must either be null, or point past a live, properly
    /// initialized 16-byte-aligned prefix written by [`PrefixMut::write`].
    pub unsafe fn at(user_ptr: *const u8) -> PrefixRef {
        if user_ptr.is_null() {
            return PrefixRef {
                header: core::ptr::null(),
            };
        }
        PrefixRef {
            header: user_ptr.sub(PREFIX_SIZE) as *const PrefixData,
        }
    }

    pub fn size(&self) -> usize {
        if self.header.is_null() {
            return 0;
        }
        unsafe { (*self.header).size as usize }
    }

    pub fn origin(&self) -> Origin {
        if self.header.is_null() {
            return Origin::Direct;
        }
        unsafe { Origin::from_u8((*self.header).origin) }
    }

    pub fn node(&self) -> NodeId {
        if self.header.is_null() {
            return NodeId::NONE;
        }
        unsafe { NodeId((*self.header).node as i32) }
    }

    pub fn hotness(&self) -> u8 {
        if self.header.is_null() {
            return 0;
        }
        unsafe { (*self.header).hotness }
    }

    pub fn last_access(&self) -> u16 {
        if self.header.is_null() {
            return 0;
        }
        unsafe { (*self.header).last_access }
    }

    pub fn access_count(&self) -> u8 {
        if self.header.is_null() {
            return 0;
        }
        unsafe { (*self.header).access_count }
    }
}

impl PrefixMut {
    /// # Safety
    /// Same contract as [`PrefixRef::at`].
    pub unsafe fn at(user_ptr: *mut u8) -> PrefixMut {
        if user_ptr.is_null() {
            return PrefixMut {
                header: core::ptr::null_mut(),
            };
        }
        PrefixMut {
            header: user_ptr.sub(PREFIX_SIZE) as *mut PrefixData,
        }
    }

    /// Write a fresh prefix at `prefix_addr` (the allocation's start, not the
    /// user pointer). Returns the user pointer (`prefix_addr + PREFIX_SIZE`).
    ///
    /// # Safety
    /// `prefix_addr` must be 16-byte aligned and point at
    /// `PREFIX_SIZE + size` writable bytes.
    pub unsafe fn write(prefix_addr: *mut u8, size: usize, origin: Origin, node: NodeId) -> *mut u8 {
        let header = prefix_addr as *mut PrefixData;
        header.write(PrefixData {
            size: size as u32,
            origin: origin as u8,
            hotness: 0,
            last_access: crate::clock::coarse_clock_low16(),
            node: node.0 as i16,
            access_count: 0,
            _reserved: [0; 5],
        });
        prefix_addr.add(PREFIX_SIZE)
    }

    pub fn as_ref(&self) -> PrefixRef {
        PrefixRef {
            header: self.header,
        }
    }

    pub fn set_node(&self, node: NodeId) {
        if self.header.is_null() {
            return;
        }
        unsafe { (*self.header).node = node.0 as i16 };
    }

    /// Saturating increment at 7, per §4.C.
    pub fn bump_hotness(&self) {
        if self.header.is_null() {
            return;
        }
        unsafe {
            let h = &mut (*self.header).hotness;
            *h = (*h).saturating_add(1).min(7);
        }
    }

    pub fn decrement_hotness(&self) {
        if self.header.is_null() {
            return;
        }
        unsafe {
            let h = &mut (*self.header).hotness;
            *h = h.saturating_sub(1);
        }
    }

    pub fn set_last_access(&self, clock: u16) {
        if self.header.is_null() {
            return;
        }
        unsafe { (*self.header).last_access = clock };
    }

    /// Saturating increment at 255, per §4.C.
    pub fn bump_access_count(&self) {
        if self.header.is_null() {
            return;
        }
        unsafe {
            let c = &mut (*self.header).access_count;
            *c = c.saturating_add(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_prefixed(size: usize) -> Vec<u8> {
        vec![0u8; PREFIX_SIZE + size]
    }

    #[test]
    fn round_trip_size_and_origin() {
        let mut buf = make_prefixed(64);
        let user_ptr = unsafe { PrefixMut::write(buf.as_mut_ptr(), 64, Origin::Slab, NodeId(2)) };
        let r = unsafe { PrefixRef::at(user_ptr) };
        assert_eq!(r.size(), 64);
        assert_eq!(r.origin(), Origin::Slab);
        assert_eq!(r.node(), NodeId(2));
        assert_eq!(r.hotness(), 0);
        assert_eq!(r.access_count(), 0);
    }

    #[test]
    fn null_getters_return_neutral_defaults() {
        let r = unsafe { PrefixRef::at(core::ptr::null()) };
        assert_eq!(r.size(), 0);
        assert_eq!(r.hotness(), 0);
        assert_eq!(r.access_count(), 0);
        assert_eq!(r.node(), NodeId::NONE);
    }

    #[test]
    fn null_setters_are_no_ops() {
        let m = unsafe { PrefixMut::at(core::ptr::null_mut()) };
        m.bump_hotness();
        m.set_node(NodeId(3));
        m.bump_access_count();
        // No crash == pass.
    }

    #[test]
    fn hotness_saturates_at_seven() {
        let mut buf = make_prefixed(16);
        let user_ptr = unsafe { PrefixMut::write(buf.as_mut_ptr(), 16, Origin::Slab, NodeId(0)) };
        let m = unsafe { PrefixMut::at(user_ptr) };
        for _ in 0..20 {
            m.bump_hotness();
        }
        assert_eq!(m.as_ref().hotness(), 7);
    }

    #[test]
    fn access_count_saturates_at_255() {
        let mut buf = make_prefixed(16);
        let user_ptr = unsafe { PrefixMut::write(buf.as_mut_ptr(), 16, Origin::Slab, NodeId(0)) };
        let m = unsafe { PrefixMut::at(user_ptr) };
        for _ in 0..300 {
            m.bump_access_count();
        }
        assert_eq!(m.as_ref().access_count(), 255);
    }

    #[test]
    fn prefix_is_sixteen_byte_aligned() {
        assert_eq!(core::mem::size_of::<PrefixData>(), 16);
        assert_eq!(core::mem::align_of::<PrefixData>(), 16);
    }
}
