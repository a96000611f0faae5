//! Buffer Suballocator
//!
//! Places element buffers into pooled heaps. Each heap chunk is backed by
//! one placed resource spanning the whole chunk; element allocations are
//! aligned sub-ranges of that resource. Because every allocation in a
//! chunk is a region of the same resource, all of them share one resource
//! state, and a transition barrier covers the whole chunk.

use smallvec::SmallVec;

use crate::errors::{QuarryError, Result};
use crate::gpu::{BarrierDesc, BindFlags, DeviceRef, HeapFlags, HeapKind, ResourceId, ResourceState};

use super::arena::{AllocationStrategy, Arena};
use super::heap_pool::{HeapChunk, HeapPoolRef};
use super::ResourceIdentifier;

/// Element layout of the buffers this allocator hands out.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct BufferInfo {
    pub element_size: u64,
    pub alignment: u64,
}

/// Where a buffer allocation lives: the backing resource, the byte offset
/// of the first element, and the element count.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct BufferHandle {
    pub resource: ResourceId,
    pub offset: u64,
    pub element_count: u64,
}

#[derive(Default)]
struct BufferEntry {
    element_count: u64,
}

struct MemoryChunk {
    heap_chunk: HeapChunk,
    entries: Arena<BufferEntry>,
    resource: ResourceId,
}

/// Suballocator for element buffers.
pub struct BufferAllocator {
    device: DeviceRef,
    pool: HeapPoolRef,
    info: BufferInfo,
    views: BindFlags,
    mapped: bool,
    expansion_size: u64,
    state: ResourceState,
    chunks: Vec<MemoryChunk>,
}

impl BufferAllocator {
    /// Create the allocator and its initial heap chunk.
    pub fn new(
        device: DeviceRef,
        pool: HeapPoolRef,
        info: BufferInfo,
        mapped: bool,
        views: BindFlags,
        initial_heap_size: u64,
        expansion_size: u64,
    ) -> Result<Self> {
        if info.element_size == 0 {
            return Err(QuarryError::InvalidConfiguration(
                "buffer element size must be non-zero".into(),
            ));
        }
        if info.alignment < 2 || !info.alignment.is_power_of_two() {
            return Err(QuarryError::InvalidConfiguration(
                "buffer alignment must be a power of two greater than one".into(),
            ));
        }
        if expansion_size == 0 {
            return Err(QuarryError::InvalidConfiguration(
                "buffer expansion size must be non-zero".into(),
            ));
        }

        let mut allocator = Self {
            device,
            pool,
            info,
            views,
            mapped,
            expansion_size,
            state: ResourceState::COMMON,
            chunks: Vec::new(),
        };
        allocator.add_memory_chunk(initial_heap_size)?;
        Ok(allocator)
    }

    /// Reserve `element_count` consecutive elements. Falls over into a
    /// new heap chunk when no existing chunk has room.
    pub fn allocate(&mut self, element_count: u64) -> Result<ResourceIdentifier> {
        if element_count == 0 {
            return Err(QuarryError::InvalidConfiguration(
                "buffer allocation of zero elements".into(),
            ));
        }
        let bytes = element_count * self.info.element_size;

        for (chunk_index, chunk) in self.chunks.iter_mut().enumerate() {
            if let Ok(index) =
                chunk
                    .entries
                    .allocate(bytes, self.info.alignment, AllocationStrategy::FirstFit)
            {
                chunk.entries.data_mut(index).expect("fresh entry").element_count =
                    element_count;
                return Ok(ResourceIdentifier {
                    chunk: chunk_index,
                    index,
                });
            }
        }

        // Expansion: at least one expansion unit, scaled up for large
        // requests.
        let scaled = self.expansion_size * (bytes / self.expansion_size).max(1);
        let chunk_size = scaled.max(bytes);
        log::debug!(
            "buffer allocator expanding by {chunk_size} bytes for a {bytes} byte request"
        );
        self.add_memory_chunk(chunk_size)?;

        let chunk_index = self.chunks.len() - 1;
        let chunk = self.chunks.last_mut().expect("chunk just added");
        let index = chunk
            .entries
            .allocate(bytes, self.info.alignment, AllocationStrategy::FirstFit)?;
        chunk.entries.data_mut(index).expect("fresh entry").element_count = element_count;
        Ok(ResourceIdentifier {
            chunk: chunk_index,
            index,
        })
    }

    /// Free an allocation. The chunk keeps its backing resource.
    pub fn deallocate(&mut self, identifier: ResourceIdentifier) -> Result<()> {
        let chunk = self.chunk(identifier.chunk)?;
        self.chunks[chunk].entries.deallocate(identifier.index)
    }

    /// Backing resource, byte offset and element count of an allocation.
    pub fn handle(&self, identifier: ResourceIdentifier) -> Result<BufferHandle> {
        let chunk = self.chunk(identifier.chunk)?;
        let chunk = &self.chunks[chunk];
        if !chunk.entries.is_occupied(identifier.index) {
            return Err(QuarryError::NotFound(format!(
                "buffer entry {identifier:?} is not allocated"
            )));
        }
        Ok(BufferHandle {
            resource: chunk.resource,
            offset: chunk.entries.offset_of(identifier.index),
            element_count: chunk
                .entries
                .data(identifier.index)
                .map_or(0, |entry| entry.element_count),
        })
    }

    /// GPU virtual address of the first element of an allocation.
    pub fn gpu_address(&self, identifier: ResourceIdentifier) -> Result<u64> {
        let handle = self.handle(identifier)?;
        Ok(self.device.gpu_address(handle.resource) + handle.offset)
    }

    /// Write CPU data through the mapped resource. Requires a mapped
    /// (upload-heap) allocator.
    pub fn update_mapped(&self, identifier: ResourceIdentifier, data: &[u8]) -> Result<()> {
        if !self.mapped {
            return Err(QuarryError::InvalidConfiguration(
                "mapped update on a non-mapped buffer allocator".into(),
            ));
        }
        let handle = self.handle(identifier)?;
        let max = handle.element_count * self.info.element_size;
        if data.len() as u64 > max {
            return Err(QuarryError::InvalidConfiguration(format!(
                "mapped update of {} bytes exceeds the {max} byte allocation",
                data.len()
            )));
        }
        self.device.write_mapped(handle.resource, handle.offset, data)
    }

    /// Append a transition barrier per chunk moving the pool to
    /// `new_state`. With no `assumed_initial` and an unchanged state, no
    /// barriers are emitted; an `assumed_initial` forces the before-state.
    pub fn create_transition_barrier(
        &mut self,
        new_state: ResourceState,
        barriers: &mut Vec<BarrierDesc>,
        assumed_initial: Option<ResourceState>,
    ) {
        let before = assumed_initial.unwrap_or(self.state);
        if new_state == self.state && assumed_initial.is_none() {
            return;
        }
        let chunk_barriers: SmallVec<[BarrierDesc; 4]> = self
            .chunks
            .iter()
            .map(|chunk| BarrierDesc::Transition {
                resource: chunk.resource,
                before,
                after: new_state,
            })
            .collect();
        barriers.extend(chunk_barriers);
        self.state = new_state;
    }

    /// State currently shared by every chunk of the pool.
    #[must_use]
    pub fn current_state(&self) -> ResourceState {
        self.state
    }

    #[must_use]
    pub fn element_size(&self) -> u64 {
        self.info.element_size
    }

    #[must_use]
    pub fn element_alignment(&self) -> u64 {
        self.info.alignment
    }

    #[must_use]
    pub fn is_mapped(&self) -> bool {
        self.mapped
    }

    /// Number of heap chunks currently backing the pool.
    #[must_use]
    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    // ── Internals ──────────────────────────────────────────────────────────

    fn chunk(&self, index: usize) -> Result<usize> {
        if index >= self.chunks.len() {
            return Err(QuarryError::NotFound(format!(
                "buffer chunk {index} does not exist"
            )));
        }
        Ok(index)
    }

    fn add_memory_chunk(&mut self, min_size: u64) -> Result<()> {
        let kind = if self.mapped {
            HeapKind::Upload
        } else {
            HeapKind::Default
        };
        let heap_chunk =
            self.pool
                .borrow_mut()
                .allocate_chunk(min_size, kind, HeapFlags::BUFFERS)?;
        let resource = self.device.create_placed_buffer(
            heap_chunk.heap,
            heap_chunk.start,
            heap_chunk.size(),
            self.views,
            self.state,
        )?;
        self.chunks.push(MemoryChunk {
            heap_chunk,
            entries: Arena::new(heap_chunk.size(), 0),
            resource,
        });
        Ok(())
    }
}

impl Drop for BufferAllocator {
    fn drop(&mut self) {
        for chunk in &self.chunks {
            self.device.destroy_resource(chunk.resource);
            let _ = self.pool.borrow_mut().deallocate_chunk(&chunk.heap_chunk);
        }
    }
}
