//! Frame-Multiplexed Components
//!
//! N independent copies of a resource component, one per in-flight
//! frame. Lifetime operations apply to the active copy immediately and
//! are recorded with `frames_left = N − 1`; each swap replays the queue
//! against the newly active copy and drops operations that have reached
//! every frame.
//!
//! Every placed resource must be activated by an aliasing barrier before
//! its first use in a frame. Components collect these initialization
//! barriers; the orchestrator drains them into the top of the frame's
//! copy command list.

use std::collections::VecDeque;

use rustc_hash::FxHashMap;

use crate::alloc::{BufferHandle, HeapPoolRef, StagingUploader, TextureHandle, TextureUploadInfo};
use crate::errors::{QuarryError, Result};
use crate::gpu::{BarrierDesc, ClearValue, CommandListId, DescriptorHeapId, DeviceRef, ResourceState, ViewKind};

use super::buffer::{BufferComponent, BufferComponentInfo, BufferDescriptorInfo, BufferReplacementViews};
use super::mirror::{BufferMirror, Texture2dMirror};
use super::texture::{
    Texture2dComponent, TextureComponentInfo, TextureDescriptorInfo, TextureReplacementViews,
};
use super::{ResourceComponent, ResourceIndex, UpdateKind};

enum Lifetime<C> {
    Create(C),
    Remove(ResourceIndex),
}

struct StoredOp<C> {
    op: Lifetime<C>,
    frames_left: usize,
}

// ============================================================================
// Buffers
// ============================================================================

#[derive(Clone, Copy)]
struct BufferCreation {
    element_count: u64,
    views: BufferReplacementViews,
}

/// N frame copies of a [`BufferComponent`] with deferred lifetime
/// replay and a CPU data mirror.
pub struct FrameBufferComponent {
    frames: Vec<BufferComponent>,
    active: usize,
    ops: VecDeque<StoredOp<BufferCreation>>,
    init_barriers: Vec<BarrierDesc>,
    mirror: BufferMirror,
    live: FxHashMap<usize, ResourceIndex>,
    element_size: u64,
    element_alignment: u64,
}

impl FrameBufferComponent {
    pub fn new(
        device: DeviceRef,
        pool: HeapPoolRef,
        frame_count: usize,
        update_kind: UpdateKind,
        info: &BufferComponentInfo,
        descriptors: &[BufferDescriptorInfo],
    ) -> Result<Self> {
        if frame_count == 0 {
            return Err(QuarryError::InvalidConfiguration(
                "a frame component needs at least one frame".into(),
            ));
        }
        let mut frames = Vec::with_capacity(frame_count);
        for _ in 0..frame_count {
            frames.push(BufferComponent::new(
                device.clone(),
                pool.clone(),
                info,
                descriptors,
            )?);
        }
        Ok(Self {
            frames,
            // The frame before the first swap; the first swap_frame lands
            // on index zero.
            active: frame_count - 1,
            ops: VecDeque::new(),
            init_barriers: Vec::new(),
            mirror: BufferMirror::new(update_kind, frame_count),
            live: FxHashMap::default(),
            element_size: info.buffer.element_size,
            element_alignment: info.buffer.alignment,
        })
    }

    pub fn create_buffer(
        &mut self,
        element_count: u64,
        views: &BufferReplacementViews,
    ) -> Result<ResourceIndex> {
        let index = self.frames[self.active].create_buffer(element_count, views)?;
        if self.frames.len() > 1 {
            self.ops.push_back(StoredOp {
                op: Lifetime::Create(BufferCreation {
                    element_count,
                    views: *views,
                }),
                frames_left: self.frames.len() - 1,
            });
        }

        let handle = self.frames[self.active].handle(index)?;
        self.init_barriers.push(BarrierDesc::Aliasing {
            before: None,
            after: handle.resource,
        });
        self.mirror.add(
            index.descriptor,
            (element_count * self.element_size) as usize,
            None,
        );
        self.live.insert(index.descriptor, index);
        Ok(index)
    }

    pub fn remove(&mut self, index: ResourceIndex) -> Result<()> {
        self.mirror.remove(index.descriptor);
        self.live.remove(&index.descriptor);
        self.frames[self.active].remove(index)?;
        if self.frames.len() > 1 {
            self.ops.push_back(StoredOp {
                op: Lifetime::Remove(index),
                frames_left: self.frames.len() - 1,
            });
        }
        Ok(())
    }

    /// Record the CPU-side contents; uploads follow per the component's
    /// update kind.
    pub fn set_data(&mut self, index: ResourceIndex, data: &[u8]) -> Result<()> {
        self.mirror.set_data(index.descriptor, data)
    }

    /// The mirrored CPU copy.
    #[must_use]
    pub fn data(&self, index: ResourceIndex) -> Option<&[u8]> {
        self.mirror.data(index.descriptor)
    }

    /// Transition the pool for pending uploader copies.
    pub fn prepare_updates(&mut self, barriers: &mut Vec<BarrierDesc>) {
        if self.mirror.has_pending_updates() {
            self.frames[self.active].create_transition_barrier(
                ResourceState::COPY_DEST,
                barriers,
                None,
            );
        }
    }

    /// Flush pending mirror contents into the active frame's resources.
    pub fn perform_updates(
        &mut self,
        list: CommandListId,
        uploader: &mut StagingUploader,
    ) -> Result<()> {
        let component = &self.frames[self.active];
        let live = &self.live;
        let alignment = self.element_alignment;
        match self.mirror.kind() {
            UpdateKind::Mapped => self.mirror.drain_pending(|descriptor, bytes| {
                let index = live.get(&descriptor).ok_or_else(|| {
                    QuarryError::NotFound(format!("no live buffer for descriptor {descriptor}"))
                })?;
                component.update_mapped(*index, bytes)
            }),
            UpdateKind::InitializeOnce | UpdateKind::Copied => {
                self.mirror.drain_pending(|descriptor, bytes| {
                    let index = live.get(&descriptor).ok_or_else(|| {
                        QuarryError::NotFound(format!(
                            "no live buffer for descriptor {descriptor}"
                        ))
                    })?;
                    let handle = component.handle(*index)?;
                    uploader.upload_buffer(handle.resource, list, bytes, handle.offset, alignment)
                })
            }
            UpdateKind::None => Ok(()),
        }
    }

    /// Aliasing barriers for resources created since the last drain.
    pub fn take_initialization_barriers(&mut self, out: &mut Vec<BarrierDesc>) {
        out.append(&mut self.init_barriers);
    }

    #[must_use]
    pub fn current_state(&self) -> ResourceState {
        self.frames[self.active].current_state()
    }

    /// Whole-pool transition on the active frame.
    pub fn change_state(
        &mut self,
        barriers: &mut Vec<BarrierDesc>,
        new_state: ResourceState,
        assumed_initial: Option<ResourceState>,
    ) {
        self.frames[self.active].create_transition_barrier(new_state, barriers, assumed_initial);
    }

    pub fn handle(&self, index: ResourceIndex) -> Result<BufferHandle> {
        self.frames[self.active].handle(index)
    }

    pub fn gpu_address(&self, index: ResourceIndex) -> Result<u64> {
        self.frames[self.active].gpu_address(index)
    }

    /// Advance to the next frame and replay pending lifetime operations
    /// against it.
    pub fn swap_frame(&mut self) -> Result<()> {
        self.active = (self.active + 1) % self.frames.len();

        for stored in &mut self.ops {
            match &stored.op {
                Lifetime::Create(creation) => {
                    let index = self.frames[self.active]
                        .create_buffer(creation.element_count, &creation.views)?;
                    let handle = self.frames[self.active].handle(index)?;
                    self.init_barriers.push(BarrierDesc::Aliasing {
                        before: None,
                        after: handle.resource,
                    });
                }
                Lifetime::Remove(index) => {
                    self.frames[self.active].remove(*index)?;
                }
            }
            stored.frames_left -= 1;
        }
        while matches!(self.ops.front(), Some(op) if op.frames_left == 0) {
            self.ops.pop_front();
        }
        Ok(())
    }

    /// Number of operations still draining through the frame ring.
    #[must_use]
    pub fn pending_op_count(&self) -> usize {
        self.ops.len()
    }

    #[must_use]
    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    #[must_use]
    pub fn update_kind(&self) -> UpdateKind {
        self.mirror.kind()
    }

    /// Direct access to one frame's component, for inspection.
    #[must_use]
    pub fn frame(&self, index: usize) -> &BufferComponent {
        &self.frames[index]
    }

    #[must_use]
    pub fn active_index(&self) -> usize {
        self.active
    }
}

impl ResourceComponent for FrameBufferComponent {
    fn has_view_kind(&self, kind: ViewKind) -> bool {
        self.frames[self.active].has_view_kind(kind)
    }

    fn descriptor_base(&self, kind: ViewKind) -> Option<(DescriptorHeapId, u32)> {
        self.frames[self.active].descriptor_base(kind)
    }

    fn descriptor_count(&self) -> usize {
        self.frames[self.active].descriptor_count()
    }
}

// ============================================================================
// Textures
// ============================================================================

#[derive(Clone, Copy)]
struct TextureCreation {
    width: u32,
    height: u32,
    array_layers: u16,
    mip_levels: u16,
    sample_count: u8,
    sample_quality: u8,
    clear: Option<ClearValue>,
    views: TextureReplacementViews,
}

/// N frame copies of a [`Texture2dComponent`] with deferred lifetime
/// replay and a per-subresource CPU data mirror.
pub struct FrameTexture2dComponent {
    device: DeviceRef,
    frames: Vec<Texture2dComponent>,
    active: usize,
    ops: VecDeque<StoredOp<TextureCreation>>,
    init_barriers: Vec<BarrierDesc>,
    mirror: Texture2dMirror,
    live: FxHashMap<usize, ResourceIndex>,
}

impl FrameTexture2dComponent {
    pub fn new(
        device: DeviceRef,
        pool: HeapPoolRef,
        frame_count: usize,
        update_kind: UpdateKind,
        info: &TextureComponentInfo,
        descriptors: &[TextureDescriptorInfo],
    ) -> Result<Self> {
        if frame_count == 0 {
            return Err(QuarryError::InvalidConfiguration(
                "a frame component needs at least one frame".into(),
            ));
        }
        let mut frames = Vec::with_capacity(frame_count);
        for _ in 0..frame_count {
            frames.push(Texture2dComponent::new(
                device.clone(),
                pool.clone(),
                info,
                descriptors,
            )?);
        }
        Ok(Self {
            device,
            frames,
            active: frame_count - 1,
            ops: VecDeque::new(),
            init_barriers: Vec::new(),
            mirror: Texture2dMirror::new(update_kind, frame_count),
            live: FxHashMap::default(),
        })
    }

    pub fn create_texture(
        &mut self,
        width: u32,
        height: u32,
        array_layers: u16,
        mip_levels: u16,
        sample_count: u8,
        sample_quality: u8,
        clear: Option<ClearValue>,
        views: &TextureReplacementViews,
    ) -> Result<ResourceIndex> {
        let index = self.frames[self.active].create_texture(
            width,
            height,
            array_layers,
            mip_levels,
            sample_count,
            sample_quality,
            clear,
            views,
        )?;
        if self.frames.len() > 1 {
            self.ops.push_back(StoredOp {
                op: Lifetime::Create(TextureCreation {
                    width,
                    height,
                    array_layers,
                    mip_levels,
                    sample_count,
                    sample_quality,
                    clear,
                    views: *views,
                }),
                frames_left: self.frames.len() - 1,
            });
        }

        let handle = self.frames[self.active].handle(index)?;
        self.init_barriers.push(BarrierDesc::Aliasing {
            before: None,
            after: handle.resource,
        });
        let desc = self.frames[self.active].desc(index)?;
        self.mirror.add(index.descriptor, &desc);
        self.live.insert(index.descriptor, index);
        Ok(index)
    }

    pub fn remove(&mut self, index: ResourceIndex) -> Result<()> {
        self.mirror.remove(index.descriptor);
        self.live.remove(&index.descriptor);
        self.frames[self.active].remove(index)?;
        if self.frames.len() > 1 {
            self.ops.push_back(StoredOp {
                op: Lifetime::Remove(index),
                frames_left: self.frames.len() - 1,
            });
        }
        Ok(())
    }

    /// Record CPU-side contents for one subresource.
    pub fn set_data(&mut self, index: ResourceIndex, subresource: u32, data: &[u8]) -> Result<()> {
        self.mirror.set_data(index.descriptor, subresource, data)
    }

    /// The mirrored CPU copy of one subresource.
    #[must_use]
    pub fn data(&self, index: ResourceIndex, subresource: u32) -> Option<&[u8]> {
        self.mirror.data(index.descriptor, subresource)
    }

    /// Transition textures with pending uploads to the copy destination
    /// state.
    pub fn prepare_updates(&mut self, barriers: &mut Vec<BarrierDesc>) -> Result<()> {
        if !self.mirror.has_pending_updates() {
            return Ok(());
        }
        // Whole-pool transition mirrors the update pass below, which
        // touches every armed subresource of the active frame.
        self.frames[self.active].transition_all(barriers, ResourceState::COPY_DEST, None);
        Ok(())
    }

    /// Flush pending mirror contents into the active frame's resources.
    pub fn perform_updates(
        &mut self,
        list: CommandListId,
        uploader: &mut StagingUploader,
    ) -> Result<()> {
        if !self.mirror.kind().uses_uploader() {
            return Ok(());
        }
        let component = &self.frames[self.active];
        let live = &self.live;
        let copy_alignment = self.device.copy_alignment();
        let format = component.format();
        self.mirror
            .drain_pending(|descriptor, subresource, bytes, width, height| {
                let index = live.get(&descriptor).ok_or_else(|| {
                    QuarryError::NotFound(format!("no live texture for descriptor {descriptor}"))
                })?;
                let handle = component.handle(*index)?;
                let info = TextureUploadInfo {
                    width,
                    height,
                    depth: 1,
                    texel_size: format.texel_size(),
                    dst_x: 0,
                    dst_y: 0,
                    dst_z: 0,
                    format,
                };
                uploader.upload_texture(
                    handle.resource,
                    list,
                    bytes,
                    &info,
                    subresource,
                    copy_alignment,
                )
            })
    }

    /// Aliasing barriers for resources created since the last drain.
    pub fn take_initialization_barriers(&mut self, out: &mut Vec<BarrierDesc>) {
        out.append(&mut self.init_barriers);
    }

    pub fn current_state(&self, index: ResourceIndex) -> Result<ResourceState> {
        self.frames[self.active].current_state(index)
    }

    /// Per-resource transition on the active frame.
    pub fn change_state(
        &mut self,
        index: ResourceIndex,
        barriers: &mut Vec<BarrierDesc>,
        new_state: ResourceState,
        assumed_initial: Option<ResourceState>,
    ) -> Result<()> {
        if let Some(barrier) = self.frames[self.active].create_transition_barrier(
            index,
            new_state,
            assumed_initial,
        )? {
            barriers.push(barrier);
        }
        Ok(())
    }

    /// Transition every texture of the active frame.
    pub fn transition_all(
        &mut self,
        barriers: &mut Vec<BarrierDesc>,
        new_state: ResourceState,
        assumed_initial: Option<ResourceState>,
    ) {
        self.frames[self.active].transition_all(barriers, new_state, assumed_initial);
    }

    pub fn handle(&self, index: ResourceIndex) -> Result<TextureHandle> {
        self.frames[self.active].handle(index)
    }

    /// Advance to the next frame and replay pending lifetime operations
    /// against it.
    pub fn swap_frame(&mut self) -> Result<()> {
        self.active = (self.active + 1) % self.frames.len();

        for stored in &mut self.ops {
            match &stored.op {
                Lifetime::Create(creation) => {
                    let index = self.frames[self.active].create_texture(
                        creation.width,
                        creation.height,
                        creation.array_layers,
                        creation.mip_levels,
                        creation.sample_count,
                        creation.sample_quality,
                        creation.clear,
                        &creation.views,
                    )?;
                    let handle = self.frames[self.active].handle(index)?;
                    self.init_barriers.push(BarrierDesc::Aliasing {
                        before: None,
                        after: handle.resource,
                    });
                }
                Lifetime::Remove(index) => {
                    self.frames[self.active].remove(*index)?;
                }
            }
            stored.frames_left -= 1;
        }
        while matches!(self.ops.front(), Some(op) if op.frames_left == 0) {
            self.ops.pop_front();
        }
        Ok(())
    }

    /// Number of operations still draining through the frame ring.
    #[must_use]
    pub fn pending_op_count(&self) -> usize {
        self.ops.len()
    }

    #[must_use]
    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    #[must_use]
    pub fn update_kind(&self) -> UpdateKind {
        self.mirror.kind()
    }

    /// Direct access to one frame's component, for inspection.
    #[must_use]
    pub fn frame(&self, index: usize) -> &Texture2dComponent {
        &self.frames[index]
    }

    #[must_use]
    pub fn active_index(&self) -> usize {
        self.active
    }
}

impl ResourceComponent for FrameTexture2dComponent {
    fn has_view_kind(&self, kind: ViewKind) -> bool {
        self.frames[self.active].has_view_kind(kind)
    }

    fn descriptor_base(&self, kind: ViewKind) -> Option<(DescriptorHeapId, u32)> {
        self.frames[self.active].descriptor_base(kind)
    }

    fn descriptor_count(&self) -> usize {
        self.frames[self.active].descriptor_count()
    }
}
