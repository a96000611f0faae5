//! Local Resource Allocator
//!
//! Per-frame scratch memory for shader constants and structured data,
//! carved at fixed alignments out of one upload-heap placed buffer per
//! frame slot. The CPU mirror is kept contiguous in host memory and
//! flushed to the mapped buffer in a single write per frame.

use crate::alloc::{HeapChunk, HeapPoolRef, align_up};
use crate::errors::{QuarryError, Result};
use crate::gpu::{BarrierDesc, BindFlags, DeviceRef, HeapFlags, HeapKind, ResourceId, ResourceState};

use super::FrameRing;

/// Index of a local resource within the current frame.
pub type LocalResourceIndex = usize;

/// Shape of one local allocation.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct LocalResourceDesc {
    pub element_size: u64,
    pub element_count: u64,
    pub alignment: u64,
}

impl LocalResourceDesc {
    #[must_use]
    pub fn new(element_size: u64, element_count: u64, alignment: u64) -> Self {
        Self {
            element_size,
            element_count,
            alignment,
        }
    }

    #[must_use]
    pub const fn size(&self) -> u64 {
        self.element_size * self.element_count
    }
}

/// Where a local allocation landed.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct LocalResourceHandle {
    pub resource: ResourceId,
    pub offset: u64,
    pub size: u64,
}

/// Sizing for the local allocator.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub struct LocalMemoryInfo {
    pub initial_size: u64,
    pub expansion_size: u64,
}

struct InnerLocalAllocator {
    device: DeviceRef,
    pool: HeapPoolRef,
    memory_info: LocalMemoryInfo,
    chunk: Option<HeapChunk>,
    resource: Option<ResourceId>,
    entries: Vec<(u64, u64)>,
    current_size: u64,
    cursor: u64,
}

impl InnerLocalAllocator {
    fn new(device: DeviceRef, pool: HeapPoolRef, memory_info: LocalMemoryInfo) -> Result<Self> {
        let mut inner = Self {
            device,
            pool,
            memory_info,
            chunk: None,
            resource: None,
            entries: Vec::new(),
            current_size: 0,
            cursor: 0,
        };
        if memory_info.initial_size > 0 {
            inner.recreate(memory_info.initial_size)?;
        }
        Ok(inner)
    }

    fn recreate(&mut self, size: u64) -> Result<()> {
        self.release_backing();
        let chunk =
            self.pool
                .borrow_mut()
                .allocate_chunk(size, HeapKind::Upload, HeapFlags::BUFFERS)?;
        let resource = self.device.create_placed_buffer(
            chunk.heap,
            chunk.start,
            chunk.size(),
            BindFlags::empty(),
            ResourceState::COMMON,
        )?;
        self.current_size = chunk.size();
        self.chunk = Some(chunk);
        self.resource = Some(resource);
        Ok(())
    }

    fn release_backing(&mut self) {
        if let Some(resource) = self.resource.take() {
            self.device.destroy_resource(resource);
        }
        if let Some(chunk) = self.chunk.take() {
            let _ = self.pool.borrow_mut().deallocate_chunk(&chunk);
        }
    }

    fn set_minimum_frame_size(&mut self, minimum: u64) -> Result<()> {
        if minimum <= self.current_size {
            return Ok(());
        }
        let grown = minimum.max(self.current_size + self.memory_info.expansion_size);
        log::debug!(
            "local allocator growing {} -> {grown} bytes",
            self.current_size
        );
        self.recreate(grown)
    }

    fn allocate(&mut self, desc: &LocalResourceDesc) -> Result<LocalResourceIndex> {
        if desc.alignment < 2 || !desc.alignment.is_power_of_two() {
            return Err(QuarryError::InvalidConfiguration(
                "local resource alignment must be a power of two greater than one".into(),
            ));
        }
        let offset = align_up(self.cursor, desc.alignment);
        let size = desc.size();
        if offset + size > self.current_size {
            self.set_minimum_frame_size(offset + size)?;
        }
        self.entries.push((offset, size));
        self.cursor = offset + size;
        Ok(self.entries.len() - 1)
    }

    fn handle(&self, index: LocalResourceIndex) -> Result<LocalResourceHandle> {
        let (offset, size) = *self.entries.get(index).ok_or_else(|| {
            QuarryError::NotFound(format!("local resource {index} does not exist"))
        })?;
        Ok(LocalResourceHandle {
            resource: self.resource.ok_or_else(|| {
                QuarryError::InvalidConfiguration("local allocator has no backing buffer".into())
            })?,
            offset,
            size,
        })
    }

    fn initialization_barrier(&self) -> Option<BarrierDesc> {
        self.resource.map(|resource| BarrierDesc::Aliasing {
            before: None,
            after: resource,
        })
    }

    fn upload(&self, data: &[u8]) -> Result<()> {
        let Some(resource) = self.resource else {
            return Ok(());
        };
        let len = (data.len() as u64).min(self.current_size) as usize;
        if len == 0 {
            return Ok(());
        }
        self.device.write_mapped(resource, 0, &data[..len])
    }

    fn reset(&mut self) {
        self.entries.clear();
        self.cursor = 0;
    }
}

impl Drop for InnerLocalAllocator {
    fn drop(&mut self) {
        self.release_backing();
    }
}

/// Ring of per-frame scratch allocators with a shared contiguous CPU
/// mirror.
pub struct LocalAllocator {
    ring: FrameRing<InnerLocalAllocator>,
    data: Vec<u8>,
}

impl LocalAllocator {
    pub fn new(
        device: DeviceRef,
        pool: HeapPoolRef,
        frames: usize,
        memory_info: LocalMemoryInfo,
    ) -> Result<Self> {
        let ring = FrameRing::try_new(frames, |_| {
            InnerLocalAllocator::new(device.clone(), pool.clone(), memory_info)
        })?;
        let size = ring.active().current_size as usize;
        Ok(Self {
            ring,
            data: vec![0; size],
        })
    }

    /// Ensure the active frame can hold `minimum` bytes of local data.
    pub fn set_minimum_frame_size(&mut self, minimum: u64) -> Result<()> {
        self.ring.active_mut().set_minimum_frame_size(minimum)?;
        self.data.resize(self.ring.active().current_size as usize, 0);
        Ok(())
    }

    pub fn create_resource(&mut self, desc: &LocalResourceDesc) -> Result<LocalResourceIndex> {
        let index = self.ring.active_mut().allocate(desc)?;
        self.data.resize(self.ring.active().current_size as usize, 0);
        Ok(index)
    }

    /// Copy `data` into the CPU mirror at the allocation's offset.
    pub fn set_data(&mut self, index: LocalResourceIndex, data: &[u8]) -> Result<()> {
        let handle = self.ring.active().handle(index)?;
        if data.len() as u64 > handle.size {
            return Err(QuarryError::InvalidConfiguration(format!(
                "local data of {} bytes exceeds the {} byte allocation",
                data.len(),
                handle.size
            )));
        }
        let start = handle.offset as usize;
        self.data[start..start + data.len()].copy_from_slice(data);
        Ok(())
    }

    pub fn handle(&self, index: LocalResourceIndex) -> Result<LocalResourceHandle> {
        self.ring.active().handle(index)
    }

    /// Aliasing activation for the active frame's backing buffer.
    #[must_use]
    pub fn initialization_barrier(&self) -> Option<BarrierDesc> {
        self.ring.active().initialization_barrier()
    }

    /// Flush the whole CPU mirror to the active frame's mapped buffer.
    pub fn upload(&self) -> Result<()> {
        self.ring.active().upload(&self.data)
    }

    /// Advance the ring and reset the incoming frame's cursor.
    pub fn swap_frame(&mut self) {
        self.ring.swap_frame();
        self.ring.active_mut().reset();
        self.data.resize(self.ring.active().current_size as usize, 0);
    }

    /// Bytes currently available per frame.
    #[must_use]
    pub fn frame_capacity(&self) -> u64 {
        self.ring.active().current_size
    }
}
