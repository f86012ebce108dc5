//! The node-allocation seam between the tree and its storage.
//!
//! The tree never allocates directly; it asks a [`NodeAllocator`] for storage
//! for exactly one node at a time, and hands each block back exactly once.
//! This keeps the balancing logic independent of any particular allocation
//! strategy. The default [`HeapAllocator`] forwards to [`std::alloc`], and
//! the test suite swaps in fault-injecting allocators to prove that a failed
//! allocation leaves the tree untouched.

use std::alloc::Layout;
use std::ptr::NonNull;

use crate::error::Error;

/// A source of storage for tree nodes.
///
/// Implementations only need to hand out (and later take back) blocks that
/// fit `layout`; they may not assume anything about what the tree stores in
/// them. Every block returned from [`allocate`] is passed to [`deallocate`]
/// exactly once, with the same layout.
///
/// [`allocate`]: NodeAllocator::allocate
/// [`deallocate`]: NodeAllocator::deallocate
pub trait NodeAllocator {
    /// Obtains storage for one node.
    ///
    /// On failure the caller's operation is abandoned with
    /// [`Error::AllocationFailed`] and no structural change.
    fn allocate(&self, layout: Layout) -> Result<NonNull<u8>, Error>;

    /// Releases storage previously obtained from [`allocate`].
    ///
    /// # Safety
    /// `ptr` must have come from a call to [`allocate`] on this same
    /// allocator with this same `layout`, and must not be used afterwards.
    ///
    /// [`allocate`]: NodeAllocator::allocate
    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout);
}

/// The default allocation strategy: plain global-heap allocation.
#[derive(Debug, Default, Clone, Copy)]
pub struct HeapAllocator;

impl NodeAllocator for HeapAllocator {
    fn allocate(&self, layout: Layout) -> Result<NonNull<u8>, Error> {
        // Nodes always carry links, so a zero-sized layout can't happen; the
        // check keeps the `alloc` precondition honest anyway.
        if layout.size() == 0 {
            return Err(Error::AllocationFailed);
        }
        // SAFETY: layout has nonzero size.
        let ptr = unsafe { std::alloc::alloc(layout) };
        NonNull::new(ptr).ok_or(Error::AllocationFailed)
    }

    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout) {
        // SAFETY: caller guarantees `ptr` came from `alloc` with `layout`.
        unsafe { std::alloc::dealloc(ptr.as_ptr(), layout) }
    }
}
