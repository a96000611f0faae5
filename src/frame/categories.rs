//! Category Registry
//!
//! The user-facing catalog of named, typed resource pools. A category is
//! identified by (kind, local index, dynamic flag): dynamic categories
//! are frame-multiplexed and re-uploaded through the dynamic uploader
//! ring; static categories keep a single copy and upload through the
//! static ring. The registry publishes every category's descriptor
//! tables into the managed descriptor heap each frame.

use crate::alloc::{AllocationStrategy, HeapPoolRef, StagingUploader};
use crate::component::{
    BufferComponentInfo, BufferDescriptorInfo, BufferReplacementViews, FrameBufferComponent,
    FrameTexture2dComponent, ResourceComponent, ResourceIndex, TextureComponentInfo,
    TextureDescriptorInfo, TextureReplacementViews, UpdateKind,
};
use crate::errors::{QuarryError, Result};
use crate::gpu::{BarrierDesc, ClearValue, CommandListId, DeviceRef, ResourceId, ResourceState};

use super::descriptor_heap::ManagedDescriptorHeap;
use super::FrameRing;

/// Which typed pool family a category belongs to.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum CategoryKind {
    Buffer,
    Texture2d,
}

/// Identifier of one category.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct CategoryId {
    pub kind: CategoryKind,
    pub local_index: usize,
    pub dynamic: bool,
}

/// Identifier of one resource inside a category. Equality is structural
/// on all fields.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct CategoryResourceId {
    pub category: CategoryId,
    pub index: ResourceIndex,
}

/// Live handle of a category resource for the current frame.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct CategoryResourceHandle {
    pub resource: ResourceId,
    pub offset: u64,
    pub element_count: u64,
}

/// Sizing and placement strategy of one staging uploader.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct UploaderSettings {
    pub size: u64,
    pub strategy: AllocationStrategy,
}

impl Default for UploaderSettings {
    fn default() -> Self {
        Self {
            size: 2 * 1024 * 1024,
            strategy: AllocationStrategy::FirstFit,
        }
    }
}

/// Pool defaults for the registry.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub struct CategorySettings {
    pub static_upload: UploaderSettings,
    pub dynamic_upload: UploaderSettings,
}

/// Catalog of static and dynamic buffer/texture categories.
pub struct CategoryRegistry {
    device: DeviceRef,
    pool: HeapPoolRef,
    frames: usize,
    static_buffers: Vec<FrameBufferComponent>,
    dynamic_buffers: Vec<FrameBufferComponent>,
    static_textures: Vec<FrameTexture2dComponent>,
    dynamic_textures: Vec<FrameTexture2dComponent>,
    static_uploaders: FrameRing<StagingUploader>,
    dynamic_uploaders: FrameRing<StagingUploader>,
}

impl CategoryRegistry {
    pub fn new(
        device: DeviceRef,
        pool: HeapPoolRef,
        frames: usize,
        settings: &CategorySettings,
    ) -> Result<Self> {
        let static_uploaders = FrameRing::try_new(frames, |_| {
            StagingUploader::new(
                device.clone(),
                pool.clone(),
                settings.static_upload.size,
                settings.static_upload.strategy,
            )
        })?;
        let dynamic_uploaders = FrameRing::try_new(frames, |_| {
            StagingUploader::new(
                device.clone(),
                pool.clone(),
                settings.dynamic_upload.size,
                settings.dynamic_upload.strategy,
            )
        })?;
        Ok(Self {
            device,
            pool,
            frames,
            static_buffers: Vec::new(),
            dynamic_buffers: Vec::new(),
            static_textures: Vec::new(),
            dynamic_textures: Vec::new(),
            static_uploaders,
            dynamic_uploaders,
        })
    }

    // ── Category creation ──────────────────────────────────────────────────

    /// Create a buffer category. The update kind decides whether the
    /// category is dynamic (frame multiplexed) or static.
    pub fn create_buffer_category(
        &mut self,
        update_kind: UpdateKind,
        mut info: BufferComponentInfo,
        starting_descriptors: u32,
        cbv: bool,
        srv: bool,
        uav: bool,
    ) -> Result<CategoryId> {
        info.mapped = update_kind == UpdateKind::Mapped;
        let mut descriptors = Vec::new();
        if cbv {
            descriptors.push(BufferDescriptorInfo::cbv(starting_descriptors));
        }
        if srv {
            descriptors.push(BufferDescriptorInfo::srv(starting_descriptors));
        }
        if uav {
            descriptors.push(BufferDescriptorInfo::uav(starting_descriptors));
        }

        let dynamic = update_kind.is_dynamic();
        let frames = if dynamic { self.frames } else { 1 };
        let component = FrameBufferComponent::new(
            self.device.clone(),
            self.pool.clone(),
            frames,
            update_kind,
            &info,
            &descriptors,
        )?;

        let list = if dynamic {
            &mut self.dynamic_buffers
        } else {
            &mut self.static_buffers
        };
        list.push(component);
        Ok(CategoryId {
            kind: CategoryKind::Buffer,
            local_index: list.len() - 1,
            dynamic,
        })
    }

    /// Create a 2D texture category.
    pub fn create_texture_category(
        &mut self,
        update_kind: UpdateKind,
        info: TextureComponentInfo,
        starting_descriptors: u32,
        srv: bool,
        uav: bool,
        rtv: bool,
        dsv: bool,
    ) -> Result<CategoryId> {
        let mut descriptors = Vec::new();
        if srv {
            descriptors.push(TextureDescriptorInfo::srv(starting_descriptors));
        }
        if uav {
            descriptors.push(TextureDescriptorInfo::uav(starting_descriptors));
        }
        if rtv {
            descriptors.push(TextureDescriptorInfo::rtv(starting_descriptors));
        }
        if dsv {
            descriptors.push(TextureDescriptorInfo::dsv(starting_descriptors));
        }

        let dynamic = update_kind.is_dynamic();
        let frames = if dynamic { self.frames } else { 1 };
        let component = FrameTexture2dComponent::new(
            self.device.clone(),
            self.pool.clone(),
            frames,
            update_kind,
            &info,
            &descriptors,
        )?;

        let list = if dynamic {
            &mut self.dynamic_textures
        } else {
            &mut self.static_textures
        };
        list.push(component);
        Ok(CategoryId {
            kind: CategoryKind::Texture2d,
            local_index: list.len() - 1,
            dynamic,
        })
    }

    // ── Resource lifetime ──────────────────────────────────────────────────

    pub fn create_buffer(
        &mut self,
        category: CategoryId,
        element_count: u64,
        views: &BufferReplacementViews,
    ) -> Result<CategoryResourceId> {
        let index = self
            .buffer_category_mut(category)?
            .create_buffer(element_count, views)?;
        Ok(CategoryResourceId { category, index })
    }

    pub fn create_texture(
        &mut self,
        category: CategoryId,
        width: u32,
        height: u32,
        array_layers: u16,
        mip_levels: u16,
        sample_count: u8,
        sample_quality: u8,
        clear: Option<ClearValue>,
        views: &TextureReplacementViews,
    ) -> Result<CategoryResourceId> {
        let index = self.texture_category_mut(category)?.create_texture(
            width,
            height,
            array_layers,
            mip_levels,
            sample_count,
            sample_quality,
            clear,
            views,
        )?;
        Ok(CategoryResourceId { category, index })
    }

    pub fn remove_resource(&mut self, id: CategoryResourceId) -> Result<()> {
        match id.category.kind {
            CategoryKind::Buffer => self.buffer_category_mut(id.category)?.remove(id.index),
            CategoryKind::Texture2d => self.texture_category_mut(id.category)?.remove(id.index),
        }
    }

    /// Record CPU data for a resource; `subresource` applies to textures
    /// only.
    pub fn set_resource_data(
        &mut self,
        id: CategoryResourceId,
        data: &[u8],
        subresource: u32,
    ) -> Result<()> {
        match id.category.kind {
            CategoryKind::Buffer => self
                .buffer_category_mut(id.category)?
                .set_data(id.index, data),
            CategoryKind::Texture2d => {
                self.texture_category_mut(id.category)?
                    .set_data(id.index, subresource, data)
            }
        }
    }

    /// Typed variant of [`set_resource_data`](Self::set_resource_data)
    /// for element slices of plain-old-data types.
    pub fn set_resource_slice<T: bytemuck::Pod>(
        &mut self,
        id: CategoryResourceId,
        data: &[T],
        subresource: u32,
    ) -> Result<()> {
        self.set_resource_data(id, bytemuck::cast_slice(data), subresource)
    }

    /// The mirrored CPU copy of a resource, if the category keeps one.
    #[must_use]
    pub fn resource_data(&self, id: CategoryResourceId, subresource: u32) -> Option<&[u8]> {
        match id.category.kind {
            CategoryKind::Buffer => self
                .buffer_category(id.category)
                .ok()?
                .data(id.index),
            CategoryKind::Texture2d => self
                .texture_category(id.category)
                .ok()?
                .data(id.index, subresource),
        }
    }

    // ── State and handles ──────────────────────────────────────────────────

    /// Transition a whole category. Buffers move as one pool; textures
    /// move per resource. The two cases are disjoint.
    pub fn transition_category(
        &mut self,
        id: CategoryId,
        barriers: &mut Vec<BarrierDesc>,
        new_state: ResourceState,
        assumed_initial: Option<ResourceState>,
    ) -> Result<()> {
        match id.kind {
            CategoryKind::Buffer => {
                self.buffer_category_mut(id)?
                    .change_state(barriers, new_state, assumed_initial);
            }
            CategoryKind::Texture2d => {
                self.texture_category_mut(id)?
                    .transition_all(barriers, new_state, assumed_initial);
            }
        }
        Ok(())
    }

    pub fn resource_handle(&self, id: CategoryResourceId) -> Result<CategoryResourceHandle> {
        match id.category.kind {
            CategoryKind::Buffer => {
                let handle = self.buffer_category(id.category)?.handle(id.index)?;
                Ok(CategoryResourceHandle {
                    resource: handle.resource,
                    offset: handle.offset,
                    element_count: handle.element_count,
                })
            }
            CategoryKind::Texture2d => {
                let handle = self.texture_category(id.category)?.handle(id.index)?;
                Ok(CategoryResourceHandle {
                    resource: handle.resource,
                    offset: 0,
                    element_count: 1,
                })
            }
        }
    }

    /// GPU virtual address of a buffer category resource.
    pub fn gpu_address(&self, id: CategoryResourceId) -> Result<u64> {
        match id.category.kind {
            CategoryKind::Buffer => self.buffer_category(id.category)?.gpu_address(id.index),
            CategoryKind::Texture2d => Err(QuarryError::InvalidConfiguration(
                "textures have no GPU virtual address".into(),
            )),
        }
    }

    // ── Per-frame flow ─────────────────────────────────────────────────────

    /// Publish every category's descriptor tables into the managed heap.
    pub fn update_descriptor_heap(&self, heap: &mut ManagedDescriptorHeap) -> Result<()> {
        for (local_index, component) in self.static_buffers.iter().enumerate() {
            heap.add_category_descriptors(
                CategoryId {
                    kind: CategoryKind::Buffer,
                    local_index,
                    dynamic: false,
                },
                component as &dyn ResourceComponent,
            )?;
        }
        for (local_index, component) in self.dynamic_buffers.iter().enumerate() {
            heap.add_category_descriptors(
                CategoryId {
                    kind: CategoryKind::Buffer,
                    local_index,
                    dynamic: true,
                },
                component as &dyn ResourceComponent,
            )?;
        }
        for (local_index, component) in self.static_textures.iter().enumerate() {
            heap.add_category_descriptors(
                CategoryId {
                    kind: CategoryKind::Texture2d,
                    local_index,
                    dynamic: false,
                },
                component as &dyn ResourceComponent,
            )?;
        }
        for (local_index, component) in self.dynamic_textures.iter().enumerate() {
            heap.add_category_descriptors(
                CategoryId {
                    kind: CategoryKind::Texture2d,
                    local_index,
                    dynamic: true,
                },
                component as &dyn ResourceComponent,
            )?;
        }
        Ok(())
    }

    /// Submit aliasing activation barriers for resources created since
    /// the previous frame.
    pub fn activate_new_categories(&mut self, list: CommandListId) -> Result<()> {
        let mut barriers = Vec::new();
        for component in &mut self.static_buffers {
            component.take_initialization_barriers(&mut barriers);
        }
        for component in &mut self.dynamic_buffers {
            component.take_initialization_barriers(&mut barriers);
        }
        for component in &mut self.static_textures {
            component.take_initialization_barriers(&mut barriers);
        }
        for component in &mut self.dynamic_textures {
            component.take_initialization_barriers(&mut barriers);
        }
        if !barriers.is_empty() {
            self.device.cmd_resource_barrier(list, &barriers)?;
        }
        Ok(())
    }

    /// Transition pools with pending mirror updates and record the
    /// staged copies.
    pub fn update_categories(&mut self, list: CommandListId) -> Result<()> {
        let mut barriers = Vec::new();
        for component in &mut self.static_buffers {
            component.prepare_updates(&mut barriers);
        }
        for component in &mut self.dynamic_buffers {
            component.prepare_updates(&mut barriers);
        }
        for component in &mut self.static_textures {
            component.prepare_updates(&mut barriers)?;
        }
        for component in &mut self.dynamic_textures {
            component.prepare_updates(&mut barriers)?;
        }
        if !barriers.is_empty() {
            self.device.cmd_resource_barrier(list, &barriers)?;
        }

        for component in &mut self.static_buffers {
            component.perform_updates(list, self.static_uploaders.active_mut())?;
        }
        for component in &mut self.static_textures {
            component.perform_updates(list, self.static_uploaders.active_mut())?;
        }
        for component in &mut self.dynamic_buffers {
            component.perform_updates(list, self.dynamic_uploaders.active_mut())?;
        }
        for component in &mut self.dynamic_textures {
            component.perform_updates(list, self.dynamic_uploaders.active_mut())?;
        }
        Ok(())
    }

    /// Advance every category and uploader one frame.
    pub fn swap_frame(&mut self) -> Result<()> {
        for component in &mut self.static_buffers {
            component.swap_frame()?;
        }
        for component in &mut self.dynamic_buffers {
            component.swap_frame()?;
        }
        for component in &mut self.static_textures {
            component.swap_frame()?;
        }
        for component in &mut self.dynamic_textures {
            component.swap_frame()?;
        }
        self.static_uploaders.swap_frame();
        self.static_uploaders.active_mut().restore_used_memory();
        self.dynamic_uploaders.swap_frame();
        self.dynamic_uploaders.active_mut().restore_used_memory();
        Ok(())
    }

    /// Total number of categories in the registry.
    #[must_use]
    pub fn category_count(&self) -> usize {
        self.static_buffers.len()
            + self.dynamic_buffers.len()
            + self.static_textures.len()
            + self.dynamic_textures.len()
    }

    // ── Internals ──────────────────────────────────────────────────────────

    fn buffer_category(&self, id: CategoryId) -> Result<&FrameBufferComponent> {
        let list = if id.dynamic {
            &self.dynamic_buffers
        } else {
            &self.static_buffers
        };
        list.get(id.local_index)
            .filter(|_| id.kind == CategoryKind::Buffer)
            .ok_or_else(|| QuarryError::NotFound(format!("no buffer category {id:?}")))
    }

    fn buffer_category_mut(&mut self, id: CategoryId) -> Result<&mut FrameBufferComponent> {
        let list = if id.dynamic {
            &mut self.dynamic_buffers
        } else {
            &mut self.static_buffers
        };
        list.get_mut(id.local_index)
            .filter(|_| id.kind == CategoryKind::Buffer)
            .ok_or_else(|| QuarryError::NotFound(format!("no buffer category {id:?}")))
    }

    fn texture_category(&self, id: CategoryId) -> Result<&FrameTexture2dComponent> {
        let list = if id.dynamic {
            &self.dynamic_textures
        } else {
            &self.static_textures
        };
        list.get(id.local_index)
            .filter(|_| id.kind == CategoryKind::Texture2d)
            .ok_or_else(|| QuarryError::NotFound(format!("no texture category {id:?}")))
    }

    fn texture_category_mut(&mut self, id: CategoryId) -> Result<&mut FrameTexture2dComponent> {
        let list = if id.dynamic {
            &mut self.dynamic_textures
        } else {
            &mut self.static_textures
        };
        list.get_mut(id.local_index)
            .filter(|_| id.kind == CategoryKind::Texture2d)
            .ok_or_else(|| QuarryError::NotFound(format!("no texture category {id:?}")))
    }
}
