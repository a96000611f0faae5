//! Transient Resource Allocator
//!
//! Short-lived placed resources whose lifetime is exactly one frame.
//! Resources are carved linearly out of a growing list of heap chunks;
//! views live in the allocator's own descriptor allocators. `clear` runs
//! once per frame: all resources and descriptors are released, the heap
//! chunks are kept.

use crate::alloc::{DescriptorAllocator, HeapPoolRef, align_up};
use crate::errors::{QuarryError, Result};
use crate::gpu::{
    AllocationRequirements, BarrierDesc, BindFlags, ClearValue, CommandListId, DescriptorHeapId,
    DescriptorHeapKind, DeviceRef, Format, HeapFlags, HeapKind, ResourceId, ResourceState,
    ResourceView, TextureDepthStencilViewDesc, TextureDesc, TextureShaderViewDesc,
    TextureTargetViewDesc, TextureUnorderedViewDesc, ViewDesc,
};

/// Index of a transient resource within the current frame.
pub type TransientResourceIndex = usize;

/// Index of a transient view within its view-kind table.
pub type TransientViewIndex = usize;

/// What to place: a buffer or a 2D texture, with bind flags and an
/// optional clear value.
#[derive(Clone, Copy, PartialEq, Debug)]
pub enum TransientDesc {
    Buffer {
        size: u64,
        bind: BindFlags,
    },
    Texture2d(TextureDesc),
}

impl TransientDesc {
    #[must_use]
    pub fn buffer(size: u64) -> Self {
        TransientDesc::Buffer {
            size,
            bind: BindFlags::empty(),
        }
    }

    #[must_use]
    pub fn texture2d(format: Format, width: u32, height: u32) -> Self {
        TransientDesc::Texture2d(TextureDesc::texture2d(format, width, height))
    }

    #[must_use]
    pub fn with_bind(self, flags: BindFlags) -> Self {
        match self {
            TransientDesc::Buffer { size, bind } => TransientDesc::Buffer {
                size,
                bind: bind | flags,
            },
            TransientDesc::Texture2d(desc) => {
                TransientDesc::Texture2d(desc.with_bind(desc.bind | flags))
            }
        }
    }

    #[must_use]
    pub fn with_clear(self, clear: ClearValue) -> Self {
        match self {
            TransientDesc::Texture2d(desc) => TransientDesc::Texture2d(desc.with_clear(clear)),
            TransientDesc::Buffer { .. } => self,
        }
    }

    #[must_use]
    pub fn has_render_target(&self) -> bool {
        match self {
            TransientDesc::Buffer { bind, .. } => bind.contains(BindFlags::RENDER_TARGET),
            TransientDesc::Texture2d(desc) => desc.bind.contains(BindFlags::RENDER_TARGET),
        }
    }

    #[must_use]
    pub fn has_depth_stencil(&self) -> bool {
        match self {
            TransientDesc::Buffer { .. } => false,
            TransientDesc::Texture2d(desc) => desc.bind.contains(BindFlags::DEPTH_STENCIL),
        }
    }

    #[must_use]
    pub fn clear_value(&self) -> Option<ClearValue> {
        match self {
            TransientDesc::Buffer { .. } => None,
            TransientDesc::Texture2d(desc) => desc.clear,
        }
    }

    /// Placement size and alignment for this description.
    #[must_use]
    pub fn requirements(&self, device: &DeviceRef) -> AllocationRequirements {
        match self {
            TransientDesc::Buffer { size, .. } => device.buffer_requirements(*size),
            TransientDesc::Texture2d(desc) => device.texture_requirements(desc),
        }
    }
}

/// Sizing for the transient allocator.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct TransientMemoryInfo {
    pub initial_size: u64,
    pub expansion_size: u64,
    pub starting_slots_shader_bindable: u32,
    pub starting_slots_rtv: u32,
    pub starting_slots_dsv: u32,
}

impl Default for TransientMemoryInfo {
    fn default() -> Self {
        Self {
            initial_size: 0,
            expansion_size: 0,
            starting_slots_shader_bindable: 100,
            starting_slots_rtv: 20,
            starting_slots_dsv: 20,
        }
    }
}

struct PlacedTransient {
    resource: ResourceId,
    has_rtv: bool,
    has_dsv: bool,
    clear: Option<ClearValue>,
}

struct MemoryChunk {
    heap_chunk: crate::alloc::HeapChunk,
    resources: Vec<PlacedTransient>,
    cursor: u64,
}

/// One-frame placed resources and their transient descriptors.
pub struct TransientAllocator {
    device: DeviceRef,
    pool: HeapPoolRef,
    memory_info: TransientMemoryInfo,
    chunks: Vec<MemoryChunk>,
    /// `(chunk, position)` per created resource, in creation order.
    identifiers: Vec<(usize, usize)>,
    shader_bindable: DescriptorAllocator,
    rtv: DescriptorAllocator,
    dsv: DescriptorAllocator,
    /// DSV view index per resource that carries one, for the clear pass.
    depth_views: Vec<(TransientResourceIndex, TransientViewIndex)>,
}

impl TransientAllocator {
    pub fn new(
        device: DeviceRef,
        pool: HeapPoolRef,
        memory_info: TransientMemoryInfo,
    ) -> Result<Self> {
        let shader_bindable = DescriptorAllocator::new_owned(
            device.clone(),
            DescriptorHeapKind::ShaderBindable,
            memory_info.starting_slots_shader_bindable,
        )?;
        let rtv = DescriptorAllocator::new_owned(
            device.clone(),
            DescriptorHeapKind::RenderTarget,
            memory_info.starting_slots_rtv,
        )?;
        let dsv = DescriptorAllocator::new_owned(
            device.clone(),
            DescriptorHeapKind::DepthStencil,
            memory_info.starting_slots_dsv,
        )?;
        Ok(Self {
            device,
            pool,
            memory_info,
            chunks: Vec::new(),
            identifiers: Vec::new(),
            shader_bindable,
            rtv,
            dsv,
            depth_views: Vec::new(),
        })
    }

    /// Place a one-frame resource with the given initial state.
    pub fn create_resource(
        &mut self,
        desc: &TransientDesc,
        initial_state: ResourceState,
    ) -> Result<TransientResourceIndex> {
        let requirements = desc.requirements(&self.device);

        let chunk_index = match self.find_chunk(&requirements) {
            Some(index) => index,
            None => {
                let minimum = requirements
                    .size
                    .max(self.memory_info.expansion_size)
                    .max(self.memory_info.initial_size);
                self.add_chunk(minimum)?;
                self.chunks.len() - 1
            }
        };

        let chunk = &mut self.chunks[chunk_index];
        let offset = align_up(chunk.cursor, requirements.alignment);
        let resource = match desc {
            TransientDesc::Buffer { size, bind } => self.device.create_placed_buffer(
                chunk.heap_chunk.heap,
                chunk.heap_chunk.start + offset,
                *size,
                *bind,
                initial_state,
            )?,
            TransientDesc::Texture2d(texture) => self.device.create_placed_texture(
                chunk.heap_chunk.heap,
                chunk.heap_chunk.start + offset,
                texture,
                initial_state,
            )?,
        };
        chunk.cursor = offset + requirements.size;
        chunk.resources.push(PlacedTransient {
            resource,
            has_rtv: desc.has_render_target(),
            has_dsv: desc.has_depth_stencil(),
            clear: desc.clear_value(),
        });
        self.identifiers
            .push((chunk_index, self.chunks[chunk_index].resources.len() - 1));
        Ok(self.identifiers.len() - 1)
    }

    pub fn create_srv(
        &mut self,
        index: TransientResourceIndex,
        desc: Option<TextureShaderViewDesc>,
    ) -> Result<TransientViewIndex> {
        let resource = self.resource(index)?;
        self.shader_bindable.allocate(
            ResourceView {
                resource: Some(resource),
                desc: ViewDesc::TextureShader(desc.unwrap_or_default()),
            },
            None,
        )
    }

    pub fn create_uav(
        &mut self,
        index: TransientResourceIndex,
        desc: Option<TextureUnorderedViewDesc>,
    ) -> Result<TransientViewIndex> {
        let resource = self.resource(index)?;
        self.shader_bindable.allocate(
            ResourceView {
                resource: Some(resource),
                desc: ViewDesc::TextureUnordered(desc.unwrap_or_default()),
            },
            None,
        )
    }

    pub fn create_rtv(
        &mut self,
        index: TransientResourceIndex,
        desc: Option<TextureTargetViewDesc>,
    ) -> Result<TransientViewIndex> {
        let resource = self.resource(index)?;
        self.rtv.allocate(
            ResourceView {
                resource: Some(resource),
                desc: ViewDesc::TextureTarget(desc.unwrap_or_default()),
            },
            None,
        )
    }

    pub fn create_dsv(
        &mut self,
        index: TransientResourceIndex,
        desc: Option<TextureDepthStencilViewDesc>,
    ) -> Result<TransientViewIndex> {
        let resource = self.resource(index)?;
        let view = self.dsv.allocate(
            ResourceView {
                resource: Some(resource),
                desc: ViewDesc::TextureDepthStencil(desc.unwrap_or_default()),
            },
            None,
        )?;
        self.depth_views.push((index, view));
        Ok(view)
    }

    /// The placed resource behind a transient index.
    pub fn resource(&self, index: TransientResourceIndex) -> Result<ResourceId> {
        let (chunk, position) = *self.identifiers.get(index).ok_or_else(|| {
            QuarryError::NotFound(format!("transient resource {index} does not exist"))
        })?;
        Ok(self.chunks[chunk].resources[position].resource)
    }

    /// Number of shader-bindable views created this frame.
    #[must_use]
    pub fn shader_bindable_count(&self) -> usize {
        self.shader_bindable.descriptor_count()
    }

    /// Heap and first slot of the shader-bindable view table.
    #[must_use]
    pub fn shader_bindable_base(&self) -> (DescriptorHeapId, u32) {
        self.shader_bindable.base()
    }

    #[must_use]
    pub fn rtv_handle(&self, view: TransientViewIndex) -> (DescriptorHeapId, u32) {
        self.rtv.handle(view)
    }

    #[must_use]
    pub fn dsv_handle(&self, view: TransientViewIndex) -> (DescriptorHeapId, u32) {
        self.dsv.handle(view)
    }

    /// Aliasing activation barriers for every transient placed this
    /// frame.
    pub fn add_initialization_barriers(&self, out: &mut Vec<BarrierDesc>) {
        for chunk in &self.chunks {
            for placed in &chunk.resources {
                out.push(BarrierDesc::Aliasing {
                    before: None,
                    after: placed.resource,
                });
            }
        }
    }

    /// Record discards for every render-target transient.
    pub fn discard_render_targets(&self, list: CommandListId) -> Result<()> {
        for chunk in &self.chunks {
            for placed in &chunk.resources {
                if placed.has_rtv {
                    self.device.cmd_discard(list, placed.resource)?;
                }
            }
        }
        Ok(())
    }

    /// Record clears for every depth-stencil transient, using the stored
    /// optimal clear value where present.
    pub fn clear_depth_stencils(&self, list: CommandListId) -> Result<()> {
        for (resource_index, view) in &self.depth_views {
            let (chunk, position) = self.identifiers[*resource_index];
            let placed = &self.chunks[chunk].resources[position];
            if !placed.has_dsv {
                continue;
            }
            let (depth, stencil) = match placed.clear {
                Some(ClearValue::DepthStencil { depth, stencil }) => (depth, stencil),
                _ => (1.0, 0),
            };
            let (heap, slot) = self.dsv.handle(*view);
            self.device
                .cmd_clear_depth_stencil(list, heap, slot, depth, stencil)?;
        }
        Ok(())
    }

    /// Per-frame reset: release all resources and descriptors, keep the
    /// heap chunks.
    pub fn clear(&mut self) {
        for chunk in &mut self.chunks {
            for placed in chunk.resources.drain(..) {
                self.device.destroy_resource(placed.resource);
            }
            chunk.cursor = 0;
        }
        self.identifiers.clear();
        self.depth_views.clear();
        self.shader_bindable.reset();
        self.rtv.reset();
        self.dsv.reset();
    }

    /// Number of live transient resources this frame.
    #[must_use]
    pub fn resource_count(&self) -> usize {
        self.identifiers.len()
    }

    // ── Internals ──────────────────────────────────────────────────────────

    fn find_chunk(&self, requirements: &AllocationRequirements) -> Option<usize> {
        self.chunks.iter().position(|chunk| {
            let offset = align_up(chunk.cursor, requirements.alignment);
            offset + requirements.size <= chunk.heap_chunk.size()
        })
    }

    fn add_chunk(&mut self, minimum: u64) -> Result<()> {
        let heap_chunk = self.pool.borrow_mut().allocate_chunk(
            minimum,
            HeapKind::Default,
            HeapFlags::BUFFERS | HeapFlags::TEXTURES | HeapFlags::TARGETS,
        )?;
        self.chunks.push(MemoryChunk {
            heap_chunk,
            resources: Vec::new(),
            cursor: 0,
        });
        Ok(())
    }
}

impl Drop for TransientAllocator {
    fn drop(&mut self) {
        self.clear();
        for chunk in &self.chunks {
            let _ = self.pool.borrow_mut().deallocate_chunk(&chunk.heap_chunk);
        }
    }
}
