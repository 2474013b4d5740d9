#![allow(unsafe_code)]

use std::ptr::NonNull;

use crate::error::{GraphError, Result};

use super::{check_alignment, MemoryResource, SystemResource, MAX_NATIVE_ALIGNMENT};

/// Growth factor applied to the next buffer in the chain.
const GROWTH_FACTOR: f64 = 1.34;

/// Cap on a single buffer so the growth arithmetic can't overflow.
const MAX_BUFFER_SIZE: usize = usize::MAX / 2;

fn grow_buffer_size(current: usize) -> usize {
    let next = current as f64 * GROWTH_FACTOR;
    if next >= MAX_BUFFER_SIZE as f64 {
        return MAX_BUFFER_SIZE;
    }
    next.ceil() as usize
}

struct Buffer {
    data: NonNull<u8>,
    capacity: usize,
}

/// Bump resource over an owned chain of geometrically-growing buffers.
///
/// `deallocate` is a no-op; all memory is returned at once by [`release`]
/// (or on drop). Intended for scratch allocations whose lifetime equals the
/// query that made them.
///
/// [`release`]: MonotonicResource::release
pub struct MonotonicResource<U: MemoryResource = SystemResource> {
    upstream: U,
    buffers: Vec<Buffer>,
    /// Bytes consumed from the newest buffer.
    allocated: usize,
    next_buffer_size: usize,
    initial_size: usize,
}

impl MonotonicResource<SystemResource> {
    pub fn new(initial_size: usize) -> Self {
        Self::with_upstream(initial_size, SystemResource)
    }
}

impl<U: MemoryResource> MonotonicResource<U> {
    pub fn with_upstream(initial_size: usize, upstream: U) -> Self {
        let initial_size = initial_size.max(1);
        Self {
            upstream,
            buffers: Vec::new(),
            allocated: 0,
            next_buffer_size: initial_size,
            initial_size,
        }
    }

    /// Frees every buffer in the chain at once.
    pub fn release(&mut self) {
        for buffer in self.buffers.drain(..) {
            // SAFETY: each buffer was allocated from `upstream` with this
            // exact capacity and alignment.
            unsafe {
                self.upstream
                    .deallocate(buffer.data, buffer.capacity, MAX_NATIVE_ALIGNMENT);
            }
        }
        self.allocated = 0;
        self.next_buffer_size = self.initial_size;
    }

    pub fn buffer_count(&self) -> usize {
        self.buffers.len()
    }

    pub fn newest_buffer_capacity(&self) -> Option<usize> {
        self.buffers.last().map(|buffer| buffer.capacity)
    }

    /// Chains a fresh buffer of at least `min_capacity` bytes and returns
    /// its base pointer.
    fn push_buffer(&mut self, min_capacity: usize) -> Result<NonNull<u8>> {
        let capacity = self.next_buffer_size.max(min_capacity);
        if capacity > MAX_BUFFER_SIZE {
            return Err(GraphError::BadAlloc("allocation size overflow"));
        }
        let data = self.upstream.allocate(capacity, MAX_NATIVE_ALIGNMENT)?;
        self.buffers.push(Buffer { data, capacity });
        self.allocated = 0;
        self.next_buffer_size = grow_buffer_size(capacity);
        Ok(data)
    }
}

impl<U: MemoryResource> MemoryResource for MonotonicResource<U> {
    fn allocate(&mut self, bytes: usize, alignment: usize) -> Result<NonNull<u8>> {
        check_alignment(alignment)?;
        if alignment > MAX_NATIVE_ALIGNMENT {
            return Err(GraphError::BadAlloc(
                "alignment greater than max native alignment is unsupported",
            ));
        }
        let bytes = bytes.max(1);
        let Some((data, capacity)) = self
            .buffers
            .last()
            .map(|buffer| (buffer.data, buffer.capacity))
        else {
            let data = self.push_buffer(bytes)?;
            self.allocated = bytes;
            return Ok(data);
        };
        // Buffers start at MAX_NATIVE_ALIGNMENT, so aligning the offset
        // aligns the pointer.
        let aligned = self
            .allocated
            .checked_add(alignment - 1)
            .map(|offset| offset & !(alignment - 1))
            .ok_or(GraphError::BadAlloc("allocation alignment overflow"))?;
        let end = aligned
            .checked_add(bytes)
            .ok_or(GraphError::BadAlloc("allocation size overflow"))?;
        if end > capacity {
            let data = self.push_buffer(bytes)?;
            self.allocated = bytes;
            return Ok(data);
        }
        self.allocated = end;
        // SAFETY: `aligned + bytes <= capacity`, so the offset stays inside
        // the buffer allocation.
        Ok(unsafe { NonNull::new_unchecked(data.as_ptr().add(aligned)) })
    }

    unsafe fn deallocate(&mut self, _ptr: NonNull<u8>, _bytes: usize, _alignment: usize) {}
}

impl<U: MemoryResource> Drop for MonotonicResource<U> {
    fn drop(&mut self) {
        self.release();
    }
}
