//! Frame Blackboard
//!
//! The per-frame context render jobs allocate through: one transient
//! allocator per in-flight frame plus one (internally multiplexed) local
//! allocator, sharing a heap pool. Swapping the frame clears the
//! incoming transient allocator so its heaps can be reused.

use crate::alloc::HeapPoolRef;
use crate::errors::Result;
use crate::gpu::{
    BarrierDesc, CommandListId, DescriptorHeapId, DeviceRef, ResourceId, ResourceState,
    TextureDepthStencilViewDesc, TextureShaderViewDesc, TextureTargetViewDesc,
    TextureUnorderedViewDesc,
};

use super::local::{LocalAllocator, LocalMemoryInfo, LocalResourceDesc, LocalResourceHandle, LocalResourceIndex};
use super::transient::{
    TransientAllocator, TransientDesc, TransientMemoryInfo, TransientResourceIndex,
    TransientViewIndex,
};
use super::FrameRing;

/// Which transient view table a view identifier points into.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum FrameViewKind {
    ShaderBindable,
    RenderTarget,
    DepthStencil,
}

/// A view created over a transient resource this frame.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct ViewIdentifier {
    pub kind: FrameViewKind,
    pub index: TransientViewIndex,
}

/// Per-frame transient + local allocation context.
pub struct Blackboard {
    transients: FrameRing<TransientAllocator>,
    local: LocalAllocator,
}

impl Blackboard {
    pub fn new(
        device: DeviceRef,
        pool: HeapPoolRef,
        frames: usize,
        local_info: LocalMemoryInfo,
        transient_info: TransientMemoryInfo,
    ) -> Result<Self> {
        let transients = FrameRing::try_new(frames, |_| {
            TransientAllocator::new(device.clone(), pool.clone(), transient_info)
        })?;
        let local = LocalAllocator::new(device, pool, frames, local_info)?;
        Ok(Self { transients, local })
    }

    // ── Transients ─────────────────────────────────────────────────────────

    pub fn create_transient_resource(
        &mut self,
        desc: &TransientDesc,
        initial_state: ResourceState,
    ) -> Result<TransientResourceIndex> {
        self.transients
            .active_mut()
            .create_resource(desc, initial_state)
    }

    pub fn create_srv(
        &mut self,
        index: TransientResourceIndex,
        desc: Option<TextureShaderViewDesc>,
    ) -> Result<ViewIdentifier> {
        Ok(ViewIdentifier {
            kind: FrameViewKind::ShaderBindable,
            index: self.transients.active_mut().create_srv(index, desc)?,
        })
    }

    pub fn create_uav(
        &mut self,
        index: TransientResourceIndex,
        desc: Option<TextureUnorderedViewDesc>,
    ) -> Result<ViewIdentifier> {
        Ok(ViewIdentifier {
            kind: FrameViewKind::ShaderBindable,
            index: self.transients.active_mut().create_uav(index, desc)?,
        })
    }

    pub fn create_rtv(
        &mut self,
        index: TransientResourceIndex,
        desc: Option<TextureTargetViewDesc>,
    ) -> Result<ViewIdentifier> {
        Ok(ViewIdentifier {
            kind: FrameViewKind::RenderTarget,
            index: self.transients.active_mut().create_rtv(index, desc)?,
        })
    }

    pub fn create_dsv(
        &mut self,
        index: TransientResourceIndex,
        desc: Option<TextureDepthStencilViewDesc>,
    ) -> Result<ViewIdentifier> {
        Ok(ViewIdentifier {
            kind: FrameViewKind::DepthStencil,
            index: self.transients.active_mut().create_dsv(index, desc)?,
        })
    }

    pub fn transient_resource(&self, index: TransientResourceIndex) -> Result<ResourceId> {
        self.transients.active().resource(index)
    }

    #[must_use]
    pub fn transient_shader_bindable_base(&self) -> (DescriptorHeapId, u32) {
        self.transients.active().shader_bindable_base()
    }

    #[must_use]
    pub fn transient_shader_bindable_count(&self) -> usize {
        self.transients.active().shader_bindable_count()
    }

    #[must_use]
    pub fn transient_rtv(&self, view: ViewIdentifier) -> (DescriptorHeapId, u32) {
        self.transients.active().rtv_handle(view.index)
    }

    #[must_use]
    pub fn transient_dsv(&self, view: ViewIdentifier) -> (DescriptorHeapId, u32) {
        self.transients.active().dsv_handle(view.index)
    }

    // ── Locals ─────────────────────────────────────────────────────────────

    pub fn set_local_frame_requirement(&mut self, bytes: u64) -> Result<()> {
        self.local.set_minimum_frame_size(bytes)
    }

    pub fn create_local_resource(
        &mut self,
        desc: &LocalResourceDesc,
    ) -> Result<LocalResourceIndex> {
        self.local.create_resource(desc)
    }

    pub fn set_local_resource_data(
        &mut self,
        index: LocalResourceIndex,
        data: &[u8],
    ) -> Result<()> {
        self.local.set_data(index, data)
    }

    pub fn local_resource(&self, index: LocalResourceIndex) -> Result<LocalResourceHandle> {
        self.local.handle(index)
    }

    /// Flush the local mirror to the active frame's mapped buffer.
    pub fn upload_local_data(&self) -> Result<()> {
        self.local.upload()
    }

    // ── Frame lifecycle ────────────────────────────────────────────────────

    /// Aliasing activation for this frame's transients and local buffer.
    pub fn initialize_barriers(&self, out: &mut Vec<BarrierDesc>) {
        self.transients.active().add_initialization_barriers(out);
        if let Some(barrier) = self.local.initialization_barrier() {
            out.push(barrier);
        }
    }

    /// Record render-target discards and depth-stencil clears for the
    /// frame's transients.
    pub fn discard_and_clear_resources(&self, list: CommandListId) -> Result<()> {
        self.transients.active().discard_render_targets(list)?;
        self.transients.active().clear_depth_stencils(list)
    }

    /// Advance the ring and reset the incoming transient allocator.
    pub fn swap_frame(&mut self) {
        self.local.swap_frame();
        self.transients.swap_frame();
        self.transients.active_mut().clear();
    }

    /// Number of transient resources live in the active frame.
    #[must_use]
    pub fn transient_count(&self) -> usize {
        self.transients.active().resource_count()
    }
}
