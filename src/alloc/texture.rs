//! Texture Suballocator
//!
//! Places 2D textures into pooled heaps. Unlike the buffer variant, a
//! heap chunk here is a bag of independent placed resources: every
//! allocation creates its own texture at an aligned offset and tracks its
//! own resource state and optimal clear value.

use crate::errors::{QuarryError, Result};
use crate::gpu::{BarrierDesc, DeviceRef, Format, HeapFlags, HeapKind, ResourceId, ResourceState, TextureDesc};

use super::arena::{AllocationStrategy, Arena};
use super::heap_pool::{HeapChunk, HeapPoolRef};
use super::ResourceIdentifier;

/// The placed texture behind an allocation and its dimensions.
#[derive(Clone, Copy, PartialEq, Debug)]
pub struct TextureHandle {
    pub resource: ResourceId,
    pub format: Format,
    pub width: u32,
    pub height: u32,
    pub array_layers: u16,
    pub mip_levels: u16,
}

#[derive(Default)]
struct TextureEntry {
    resource: Option<ResourceId>,
    state: ResourceState,
    desc: Option<TextureDesc>,
}

struct MemoryChunk {
    heap_chunk: HeapChunk,
    entries: Arena<TextureEntry>,
}

/// Suballocator for 2D textures.
pub struct TextureAllocator {
    device: DeviceRef,
    pool: HeapPoolRef,
    expansion_size: u64,
    chunks: Vec<MemoryChunk>,
}

impl TextureAllocator {
    pub fn new(
        device: DeviceRef,
        pool: HeapPoolRef,
        initial_heap_size: u64,
        expansion_size: u64,
    ) -> Result<Self> {
        let mut allocator = Self {
            device,
            pool,
            expansion_size,
            chunks: Vec::new(),
        };
        allocator.add_memory_chunk(initial_heap_size)?;
        Ok(allocator)
    }

    /// Create a placed texture for `desc` in the first chunk with a
    /// fitting free range, expanding into a new heap chunk if none has
    /// room.
    pub fn allocate(
        &mut self,
        desc: &TextureDesc,
        initial_state: ResourceState,
    ) -> Result<ResourceIdentifier> {
        let requirements = self.device.texture_requirements(desc);

        let identifier = match self.try_place(requirements.size, requirements.alignment) {
            Some(identifier) => identifier,
            None => {
                let chunk_size = requirements.size.max(self.expansion_size);
                log::debug!(
                    "texture allocator expanding by {chunk_size} bytes for a {} byte texture",
                    requirements.size
                );
                self.add_memory_chunk(chunk_size)?;
                self.try_place(requirements.size, requirements.alignment)
                    .ok_or_else(|| {
                        QuarryError::OutOfResources(format!(
                            "texture of {} bytes does not fit a fresh chunk",
                            requirements.size
                        ))
                    })?
            }
        };

        let chunk = &mut self.chunks[identifier.chunk];
        let offset = chunk.heap_chunk.start + chunk.entries.offset_of(identifier.index);
        let resource = self.device.create_placed_texture(
            chunk.heap_chunk.heap,
            offset,
            desc,
            initial_state,
        )?;
        let entry = chunk
            .entries
            .data_mut(identifier.index)
            .expect("fresh entry");
        entry.resource = Some(resource);
        entry.state = initial_state;
        entry.desc = Some(*desc);
        Ok(identifier)
    }

    /// Release the placed resource and free its range.
    pub fn deallocate(&mut self, identifier: ResourceIdentifier) -> Result<()> {
        let entry = self.entry(identifier)?;
        if let Some(resource) = entry.resource {
            self.device.destroy_resource(resource);
        }
        self.chunks[identifier.chunk]
            .entries
            .deallocate(identifier.index)
    }

    pub fn handle(&self, identifier: ResourceIdentifier) -> Result<TextureHandle> {
        let entry = self.entry(identifier)?;
        let desc = entry.desc.expect("occupied entries carry a description");
        Ok(TextureHandle {
            resource: entry.resource.expect("occupied entries carry a resource"),
            format: desc.format,
            width: desc.width,
            height: desc.height,
            array_layers: desc.array_layers,
            mip_levels: desc.mip_levels,
        })
    }

    pub fn current_state(&self, identifier: ResourceIdentifier) -> Result<ResourceState> {
        Ok(self.entry(identifier)?.state)
    }

    /// Description the texture was created with.
    pub fn desc(&self, identifier: ResourceIdentifier) -> Result<TextureDesc> {
        Ok(self
            .entry(identifier)?
            .desc
            .expect("occupied entries carry a description"))
    }

    /// Transition one texture, returning the barrier if a state change
    /// (or a forced before-state) requires one.
    pub fn create_transition_barrier(
        &mut self,
        identifier: ResourceIdentifier,
        new_state: ResourceState,
        assumed_initial: Option<ResourceState>,
    ) -> Result<Option<BarrierDesc>> {
        let entry = self.entry_mut(identifier)?;
        let before = assumed_initial.unwrap_or(entry.state);
        if new_state == entry.state && assumed_initial.is_none() {
            return Ok(None);
        }
        let resource = entry.resource.expect("occupied entries carry a resource");
        entry.state = new_state;
        Ok(Some(BarrierDesc::Transition {
            resource,
            before,
            after: new_state,
        }))
    }

    /// Transition every texture in the pool to `new_state`.
    pub fn transition_all(
        &mut self,
        barriers: &mut Vec<BarrierDesc>,
        new_state: ResourceState,
        assumed_initial: Option<ResourceState>,
    ) {
        for chunk in &mut self.chunks {
            for index in 0..chunk.entries.max_index() {
                if !chunk.entries.is_occupied(index) {
                    continue;
                }
                let entry = chunk.entries.data_mut(index).expect("occupied entry");
                let before = assumed_initial.unwrap_or(entry.state);
                if new_state == entry.state && assumed_initial.is_none() {
                    continue;
                }
                barriers.push(BarrierDesc::Transition {
                    resource: entry.resource.expect("occupied entries carry a resource"),
                    before,
                    after: new_state,
                });
                entry.state = new_state;
            }
        }
    }

    /// Number of heap chunks currently backing the pool.
    #[must_use]
    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    // ── Internals ──────────────────────────────────────────────────────────

    fn entry(&self, identifier: ResourceIdentifier) -> Result<&TextureEntry> {
        self.chunks
            .get(identifier.chunk)
            .and_then(|chunk| chunk.entries.data(identifier.index))
            .filter(|entry| entry.resource.is_some())
            .ok_or_else(|| {
                QuarryError::NotFound(format!("texture entry {identifier:?} is not allocated"))
            })
    }

    fn entry_mut(&mut self, identifier: ResourceIdentifier) -> Result<&mut TextureEntry> {
        self.chunks
            .get_mut(identifier.chunk)
            .and_then(|chunk| chunk.entries.data_mut(identifier.index))
            .filter(|entry| entry.resource.is_some())
            .ok_or_else(|| {
                QuarryError::NotFound(format!("texture entry {identifier:?} is not allocated"))
            })
    }

    fn try_place(&mut self, size: u64, alignment: u64) -> Option<ResourceIdentifier> {
        for (chunk_index, chunk) in self.chunks.iter_mut().enumerate() {
            if let Ok(index) = chunk
                .entries
                .allocate(size, alignment, AllocationStrategy::FirstFit)
            {
                return Some(ResourceIdentifier {
                    chunk: chunk_index,
                    index,
                });
            }
        }
        None
    }

    fn add_memory_chunk(&mut self, min_size: u64) -> Result<()> {
        let heap_chunk = self.pool.borrow_mut().allocate_chunk(
            min_size,
            HeapKind::Default,
            HeapFlags::TEXTURES | HeapFlags::TARGETS,
        )?;
        self.chunks.push(MemoryChunk {
            entries: Arena::new(heap_chunk.size(), 0),
            heap_chunk,
        });
        Ok(())
    }
}

impl Drop for TextureAllocator {
    fn drop(&mut self) {
        for chunk in &self.chunks {
            for index in 0..chunk.entries.max_index() {
                if let Some(entry) = chunk.entries.data(index) {
                    if let Some(resource) = entry.resource {
                        self.device.destroy_resource(resource);
                    }
                }
            }
            let _ = self.pool.borrow_mut().deallocate_chunk(&chunk.heap_chunk);
        }
    }
}
