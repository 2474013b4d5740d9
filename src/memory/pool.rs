#![allow(unsafe_code)]

use std::ptr::NonNull;

use crate::error::{GraphError, Result};

use super::{check_alignment, MemoryResource, SystemResource};

/// Free-list links are single-byte block indexes, so a chunk can hold at
/// most `u8::MAX` blocks.
pub const MAX_BLOCKS_PER_CHUNK: u8 = u8::MAX;

const DEFAULT_BLOCKS_PER_CHUNK: u8 = 128;
const DEFAULT_MAX_BLOCK_SIZE: usize = 1 << 10;

/// Fixed-size slab divided into `blocks_per_chunk` blocks. The first byte
/// of a free block stores the index of the next free block.
struct Chunk {
    data: NonNull<u8>,
    first_free: u8,
    available: u8,
}

struct Pool {
    block_size: usize,
    blocks_per_chunk: u8,
    chunks: Vec<Chunk>,
    last_alloc: usize,
    last_dealloc: usize,
}

impl Pool {
    fn new(block_size: usize, blocks_per_chunk: u8) -> Self {
        Self {
            block_size,
            blocks_per_chunk,
            chunks: Vec::new(),
            last_alloc: 0,
            last_dealloc: 0,
        }
    }

    fn chunk_bytes(&self) -> Result<usize> {
        self.block_size
            .checked_mul(self.blocks_per_chunk as usize)
            .ok_or(GraphError::BadAlloc("allocation size overflow"))
    }

    /// Chunks are aligned to the next power of two of the block size, so
    /// every block satisfies any alignment request up to the block size.
    fn chunk_alignment(&self) -> Result<usize> {
        self.block_size
            .checked_next_power_of_two()
            .ok_or(GraphError::BadAlloc("allocation alignment overflow"))
    }

    fn allocate(&mut self, upstream: &mut dyn MemoryResource) -> Result<NonNull<u8>> {
        if let Some(ptr) = self.try_allocate_from(self.last_alloc) {
            return Ok(ptr);
        }
        for index in 0..self.chunks.len() {
            if let Some(ptr) = self.try_allocate_from(index) {
                self.last_alloc = index;
                return Ok(ptr);
            }
        }
        let bytes = self.chunk_bytes()?;
        let alignment = self.chunk_alignment()?;
        let data = upstream.allocate(bytes, alignment)?;
        // Thread an embedded free list through the fresh blocks.
        for block in 0..self.blocks_per_chunk {
            // SAFETY: block * block_size < chunk_bytes, inside the slab.
            unsafe {
                *data.as_ptr().add(block as usize * self.block_size) = block + 1;
            }
        }
        // Serve block 0 straight out of the fresh chunk.
        self.chunks.push(Chunk {
            data,
            first_free: 1,
            available: self.blocks_per_chunk - 1,
        });
        self.last_alloc = self.chunks.len() - 1;
        self.last_dealloc = self.last_alloc;
        Ok(data)
    }

    fn try_allocate_from(&mut self, index: usize) -> Option<NonNull<u8>> {
        let block_size = self.block_size;
        let chunk = self.chunks.get_mut(index)?;
        if chunk.available == 0 {
            return None;
        }
        let offset = chunk.first_free as usize * block_size;
        // SAFETY: first_free < blocks_per_chunk, so the block is inside the
        // slab; reading its first byte yields the next free index.
        unsafe {
            let block = chunk.data.as_ptr().add(offset);
            chunk.first_free = *block;
            chunk.available -= 1;
            Some(NonNull::new_unchecked(block))
        }
    }

    /// Returns the block to its chunk's free list; `false` when the pointer
    /// does not belong to this pool.
    unsafe fn deallocate(&mut self, ptr: NonNull<u8>) -> bool {
        let chunk_bytes = self.block_size * self.blocks_per_chunk as usize;
        if self.put_back(self.last_dealloc, ptr, chunk_bytes) {
            return true;
        }
        for index in 0..self.chunks.len() {
            if self.put_back(index, ptr, chunk_bytes) {
                // The chunk now has a free block, so steer allocations to it.
                self.last_alloc = index;
                self.last_dealloc = index;
                return true;
            }
        }
        false
    }

    unsafe fn put_back(&mut self, index: usize, ptr: NonNull<u8>, chunk_bytes: usize) -> bool {
        let block_size = self.block_size;
        let Some(chunk) = self.chunks.get_mut(index) else {
            return false;
        };
        let base = chunk.data.as_ptr() as usize;
        let addr = ptr.as_ptr() as usize;
        if addr < base || addr >= base + chunk_bytes {
            return false;
        }
        *ptr.as_ptr() = chunk.first_free;
        chunk.first_free = ((addr - base) / block_size) as u8;
        chunk.available += 1;
        true
    }

    fn release(&mut self, upstream: &mut dyn MemoryResource) {
        let bytes = self.block_size * self.blocks_per_chunk as usize;
        let alignment = self
            .block_size
            .checked_next_power_of_two()
            .unwrap_or(self.block_size);
        for chunk in self.chunks.drain(..) {
            // SAFETY: every chunk was allocated from `upstream` with this
            // exact size and alignment.
            unsafe { upstream.deallocate(chunk.data, bytes, alignment) };
        }
        self.last_alloc = 0;
        self.last_dealloc = 0;
    }
}

struct BigBlock {
    ptr: NonNull<u8>,
    bytes: usize,
    alignment: usize,
}

/// Pooling resource over per-block-size free lists.
///
/// A request of `(bytes, alignment)` is served from the pool whose block
/// size equals `max(bytes, alignment)`, created on demand. Requests above
/// `max_block_size` fall through to the upstream resource and are tracked
/// in an address-sorted list.
pub struct PoolResource<U: MemoryResource = SystemResource> {
    upstream: U,
    /// Sorted by block size.
    pools: Vec<Pool>,
    /// Sorted by block address.
    unpooled: Vec<BigBlock>,
    blocks_per_chunk: u8,
    max_block_size: usize,
    last_alloc_pool: Option<usize>,
    last_dealloc_pool: Option<usize>,
}

impl PoolResource<SystemResource> {
    pub fn new(blocks_per_chunk: u8, max_block_size: usize) -> Self {
        Self::with_upstream(blocks_per_chunk, max_block_size, SystemResource)
    }
}

impl<U: MemoryResource> PoolResource<U> {
    pub fn with_upstream(blocks_per_chunk: u8, max_block_size: usize, upstream: U) -> Self {
        Self {
            upstream,
            pools: Vec::new(),
            unpooled: Vec::new(),
            blocks_per_chunk: blocks_per_chunk.clamp(1, MAX_BLOCKS_PER_CHUNK),
            max_block_size: max_block_size.max(1),
            last_alloc_pool: None,
            last_dealloc_pool: None,
        }
    }

    /// Frees all chunks and unpooled blocks at once.
    pub fn release(&mut self) {
        for pool in &mut self.pools {
            pool.release(&mut self.upstream);
        }
        self.pools.clear();
        for block in self.unpooled.drain(..) {
            // SAFETY: recorded at allocation time with these exact params.
            unsafe {
                self.upstream
                    .deallocate(block.ptr, block.bytes, block.alignment);
            }
        }
        self.last_alloc_pool = None;
        self.last_dealloc_pool = None;
    }

    fn pool_index(&mut self, block_size: usize) -> usize {
        match self
            .pools
            .binary_search_by_key(&block_size, |pool| pool.block_size)
        {
            Ok(index) => index,
            Err(index) => {
                self.pools
                    .insert(index, Pool::new(block_size, self.blocks_per_chunk));
                // Indexes at or past the insertion point shifted by one.
                self.last_alloc_pool = Some(index);
                self.last_dealloc_pool = Some(index);
                index
            }
        }
    }
}

impl<U: MemoryResource> MemoryResource for PoolResource<U> {
    fn allocate(&mut self, bytes: usize, alignment: usize) -> Result<NonNull<u8>> {
        check_alignment(alignment)?;
        let bytes = bytes.max(1);
        // Folding alignment into the block size keeps blocks interchangeable
        // within a pool.
        let block_size = bytes.max(alignment);
        if block_size % alignment != 0 {
            return Err(GraphError::BadAlloc(
                "requested bytes must be a multiple of alignment",
            ));
        }
        if block_size > self.max_block_size {
            let ptr = self.upstream.allocate(bytes, alignment)?;
            let at = match self
                .unpooled
                .binary_search_by_key(&(ptr.as_ptr() as usize), |block| block.ptr.as_ptr() as usize)
            {
                Ok(at) | Err(at) => at,
            };
            self.unpooled.insert(
                at,
                BigBlock {
                    ptr,
                    bytes,
                    alignment,
                },
            );
            return Ok(ptr);
        }
        let index = match self.last_alloc_pool {
            Some(index) if self.pools[index].block_size == block_size => index,
            _ => self.pool_index(block_size),
        };
        self.last_alloc_pool = Some(index);
        self.pools[index].allocate(&mut self.upstream)
    }

    unsafe fn deallocate(&mut self, ptr: NonNull<u8>, bytes: usize, alignment: usize) {
        let bytes = bytes.max(1);
        let block_size = bytes.max(alignment);
        if block_size > self.max_block_size {
            if let Ok(at) = self
                .unpooled
                .binary_search_by_key(&(ptr.as_ptr() as usize), |block| block.ptr.as_ptr() as usize)
            {
                let block = self.unpooled.remove(at);
                debug_assert_eq!(block.bytes, bytes);
                debug_assert_eq!(block.alignment, alignment);
                self.upstream.deallocate(ptr, bytes, alignment);
            } else {
                debug_assert!(false, "unpooled block was never allocated here");
            }
            return;
        }
        if let Some(index) = self.last_dealloc_pool {
            if self.pools[index].block_size == block_size && self.pools[index].deallocate(ptr) {
                return;
            }
        }
        if let Ok(index) = self
            .pools
            .binary_search_by_key(&block_size, |pool| pool.block_size)
        {
            if self.pools[index].deallocate(ptr) {
                self.last_alloc_pool = Some(index);
                self.last_dealloc_pool = Some(index);
                return;
            }
        }
        debug_assert!(false, "block does not belong to any pool");
    }
}

impl<U: MemoryResource> Drop for PoolResource<U> {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    #[test]
    fn blocks_are_reused_after_deallocation() {
        // 100 blocks of 24 bytes aligned to 8, freed in reverse order; the
        // next 100 allocations must reuse the same addresses.
        let mut resource = PoolResource::new(64, 1 << 10);
        let mut blocks = Vec::new();
        for _ in 0..100 {
            blocks.push(resource.allocate(24, 8).unwrap());
        }
        let first_batch: HashSet<usize> =
            blocks.iter().map(|ptr| ptr.as_ptr() as usize).collect();
        assert_eq!(first_batch.len(), 100);
        for ptr in blocks.into_iter().rev() {
            unsafe { resource.deallocate(ptr, 24, 8) };
        }
        let second_batch: HashSet<usize> = (0..100)
            .map(|_| resource.allocate(24, 8).unwrap().as_ptr() as usize)
            .collect();
        assert_eq!(first_batch, second_batch);
    }

    #[test]
    fn blocks_satisfy_alignment() {
        let mut resource = PoolResource::new(8, 1 << 10);
        for _ in 0..32 {
            let ptr = resource.allocate(64, 64).unwrap();
            assert_eq!(ptr.as_ptr() as usize % 64, 0);
        }
    }

    #[test]
    fn rejects_bytes_not_multiple_of_alignment() {
        let mut resource = PoolResource::new(64, 1 << 10);
        assert!(matches!(
            resource.allocate(24, 16),
            Err(GraphError::BadAlloc(_))
        ));
    }

    #[test]
    fn large_requests_fall_through_to_upstream() {
        let mut resource = PoolResource::new(64, 128);
        let big = resource.allocate(4096, 8).unwrap();
        let small = resource.allocate(64, 8).unwrap();
        unsafe {
            resource.deallocate(big, 4096, 8);
            resource.deallocate(small, 64, 8);
        }
    }

    #[test]
    fn allocations_succeed_after_release() {
        let mut resource = PoolResource::new(16, 256);
        for _ in 0..50 {
            resource.allocate(32, 8).unwrap();
        }
        resource.allocate(1024, 8).unwrap();
        resource.release();
        let ptr = resource.allocate(32, 8).unwrap();
        assert_eq!(ptr.as_ptr() as usize % 8, 0);
    }

    #[test]
    fn distinct_block_sizes_use_distinct_pools() {
        let mut resource = PoolResource::new(64, 1 << 10);
        let a = resource.allocate(16, 8).unwrap();
        let b = resource.allocate(32, 8).unwrap();
        let c = resource.allocate(16, 8).unwrap();
        unsafe {
            resource.deallocate(a, 16, 8);
            resource.deallocate(b, 32, 8);
            resource.deallocate(c, 16, 8);
        }
    }
}
