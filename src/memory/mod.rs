//! Polymorphic memory resources backing per-transaction arenas and
//! short-lived query state.
//!
//! Resources are thread-affine by convention (each query thread owns its
//! own), which keeps the API `&mut self` and free of internal locking.

#![allow(unsafe_code)]

mod monotonic;
mod pool;

pub use monotonic::MonotonicResource;
pub use pool::PoolResource;

use std::alloc::{alloc, dealloc, Layout};
use std::ptr::NonNull;

use crate::error::{GraphError, Result};

/// The strictest alignment the resources serve. Requests above this are
/// rejected with [`GraphError::BadAlloc`].
pub const MAX_NATIVE_ALIGNMENT: usize = std::mem::align_of::<u128>();

/// Allocation source abstraction, patterned after polymorphic memory
/// resources: concrete resources compose over an upstream one.
pub trait MemoryResource {
    fn allocate(&mut self, bytes: usize, alignment: usize) -> Result<NonNull<u8>>;

    /// # Safety
    ///
    /// `ptr` must originate from a call to `allocate(bytes, alignment)` on
    /// this same resource and must not have been deallocated already.
    unsafe fn deallocate(&mut self, ptr: NonNull<u8>, bytes: usize, alignment: usize);
}

/// Upstream resource served directly by the global allocator.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemResource;

impl MemoryResource for SystemResource {
    fn allocate(&mut self, bytes: usize, alignment: usize) -> Result<NonNull<u8>> {
        let layout = layout_for(bytes, alignment)?;
        // SAFETY: layout has non-zero size.
        let ptr = unsafe { alloc(layout) };
        NonNull::new(ptr).ok_or(GraphError::BadAlloc("out of memory"))
    }

    unsafe fn deallocate(&mut self, ptr: NonNull<u8>, bytes: usize, alignment: usize) {
        let layout = Layout::from_size_align_unchecked(bytes.max(1), alignment);
        dealloc(ptr.as_ptr(), layout);
    }
}

fn layout_for(bytes: usize, alignment: usize) -> Result<Layout> {
    Layout::from_size_align(bytes.max(1), alignment)
        .map_err(|_| GraphError::BadAlloc("invalid size or alignment"))
}

fn check_alignment(alignment: usize) -> Result<()> {
    if alignment == 0 || !alignment.is_power_of_two() {
        return Err(GraphError::BadAlloc("alignment must be a power of two"));
    }
    Ok(())
}
