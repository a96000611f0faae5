//! Queue Jobs and Frame Contexts
//!
//! A [`QueueJob`] describes one unit of GPU work in three phases:
//!
//! 1. **Setup** ([`QueueJob::setup_queue`]): declare, once per queue
//!    build, which resources the job touches and in which states.
//! 2. **Prepare** ([`QueueJob::prepare_frame`] /
//!    [`QueueJob::set_resource_info`]): CPU work and per-frame resource
//!    descriptions, every frame before recording.
//! 3. **Execute** ([`QueueJob::execute_frame`]): record GPU commands.
//!
//! The contexts passed to each phase expose exactly the state that phase
//! may touch, which keeps the borrow structure of the frame loop simple.

use crate::errors::{QuarryError, Result};
use crate::frame::{
    Blackboard, CategoryId, CategoryRegistry, CategoryResourceHandle, CategoryResourceId,
    FrameViewKind, LocalResourceDesc, LocalResourceHandle, LocalResourceIndex,
    ManagedDescriptorHeap, TransientDesc, TransientResourceIndex, ViewIdentifier,
};
use crate::gpu::{
    BarrierDesc, CommandListId, DescriptorHeapId, DeviceRef, ResourceId, ResourceState,
    TextureDepthStencilViewDesc, TextureShaderViewDesc, TextureTargetViewDesc,
    TextureUnorderedViewDesc, ViewKind,
};

use super::planner::QueuePlanner;

/// Relative cost of preparing or executing one job; used to balance
/// batches. Jobs should report at least one.
pub type PassCost = u64;

/// One unit of GPU work in the render queue.
pub trait QueueJob {
    /// Declare the resource states this job needs, in request order.
    fn setup_queue(&self, planner: &mut QueuePlanner) -> Result<()>;

    /// Recompute per-frame costs before batching. Default: keep the
    /// static costs.
    fn calculate_frame_costs(&mut self) {}

    fn preparation_cost(&self) -> PassCost {
        1
    }

    fn execution_cost(&self) -> PassCost {
        1
    }

    /// CPU-side work before any command recording.
    fn prepare_frame(&mut self, context: &PreparationContext<'_>) -> Result<()> {
        let _ = context;
        Ok(())
    }

    /// Declare transient view descriptors and local resources for this
    /// frame.
    fn set_resource_info(&mut self, context: &mut SetupContext) -> Result<()> {
        let _ = context;
        Ok(())
    }

    /// Record GPU work. The job's barriers have already been submitted
    /// to `list`.
    fn execute_frame(
        &mut self,
        list: CommandListId,
        context: &mut ResourceContext<'_>,
    ) -> Result<()>;
}

// ============================================================================
// Setup context
// ============================================================================

/// A requested shader-bindable transient view.
#[derive(Clone, Copy, PartialEq, Debug)]
pub enum ShaderBindableViewDesc {
    Shader(Option<TextureShaderViewDesc>),
    Unordered(Option<TextureUnorderedViewDesc>),
}

/// Collects, per frame, the transient resource descriptions, view
/// requests and local resources declared by the queue's jobs.
#[derive(Default)]
pub struct SetupContext {
    transient_descs: Vec<Option<TransientDesc>>,
    shader_bindable_requests: Vec<(TransientResourceIndex, ShaderBindableViewDesc)>,
    rtv_requests: Vec<(TransientResourceIndex, Option<TextureTargetViewDesc>)>,
    dsv_requests: Vec<(TransientResourceIndex, Option<TextureDepthStencilViewDesc>)>,
    local_descs: Vec<LocalResourceDesc>,
    total_local_memory: u64,
}

impl SetupContext {
    /// Reset for a frame with `transient_count` planned transients.
    pub(crate) fn reset(&mut self, transient_count: usize) {
        self.transient_descs.clear();
        self.transient_descs.resize(transient_count, None);
        self.shader_bindable_requests.clear();
        self.rtv_requests.clear();
        self.dsv_requests.clear();
        self.local_descs.clear();
        self.total_local_memory = 0;
    }

    /// Provide (or overwrite) the description of a planned transient.
    pub fn set_transient_desc(&mut self, index: TransientResourceIndex, desc: TransientDesc) {
        if index < self.transient_descs.len() {
            self.transient_descs[index] = Some(desc);
        }
    }

    #[must_use]
    pub fn transient_desc(&self, index: TransientResourceIndex) -> Option<&TransientDesc> {
        self.transient_descs.get(index).and_then(Option::as_ref)
    }

    /// Declare a local (per-frame scratch) resource. Indices are
    /// assigned in declaration order and match the allocation order in
    /// the blackboard.
    pub fn create_local_resource(&mut self, desc: LocalResourceDesc) -> LocalResourceIndex {
        self.total_local_memory =
            crate::alloc::align_up(self.total_local_memory, desc.alignment) + desc.size();
        self.local_descs.push(desc);
        self.local_descs.len() - 1
    }

    /// Request a shader-bindable view over a transient.
    pub fn request_shader_bindable(
        &mut self,
        index: TransientResourceIndex,
        desc: ShaderBindableViewDesc,
    ) -> ViewIdentifier {
        self.shader_bindable_requests.push((index, desc));
        ViewIdentifier {
            kind: FrameViewKind::ShaderBindable,
            index: self.shader_bindable_requests.len() - 1,
        }
    }

    /// Request a render-target view over a transient.
    pub fn request_rtv(
        &mut self,
        index: TransientResourceIndex,
        desc: Option<TextureTargetViewDesc>,
    ) -> ViewIdentifier {
        self.rtv_requests.push((index, desc));
        ViewIdentifier {
            kind: FrameViewKind::RenderTarget,
            index: self.rtv_requests.len() - 1,
        }
    }

    /// Request a depth-stencil view over a transient.
    pub fn request_dsv(
        &mut self,
        index: TransientResourceIndex,
        desc: Option<TextureDepthStencilViewDesc>,
    ) -> ViewIdentifier {
        self.dsv_requests.push((index, desc));
        ViewIdentifier {
            kind: FrameViewKind::DepthStencil,
            index: self.dsv_requests.len() - 1,
        }
    }

    /// Total local memory the declared resources need this frame.
    #[must_use]
    pub fn total_local_memory(&self) -> u64 {
        self.total_local_memory
    }

    pub(crate) fn local_descs(&self) -> &[LocalResourceDesc] {
        &self.local_descs
    }

    /// Create every requested transient view, in request order, so view
    /// indices line up with the identifiers handed out above.
    pub(crate) fn create_transient_descriptors(&self, blackboard: &mut Blackboard) -> Result<()> {
        for (index, desc) in &self.shader_bindable_requests {
            match desc {
                ShaderBindableViewDesc::Shader(desc) => {
                    blackboard.create_srv(*index, *desc)?;
                }
                ShaderBindableViewDesc::Unordered(desc) => {
                    blackboard.create_uav(*index, *desc)?;
                }
            }
        }
        for (index, desc) in &self.rtv_requests {
            blackboard.create_rtv(*index, *desc)?;
        }
        for (index, desc) in &self.dsv_requests {
            blackboard.create_dsv(*index, *desc)?;
        }
        Ok(())
    }
}

// ============================================================================
// Preparation context
// ============================================================================

/// What jobs may read during CPU preparation: the descriptor layout of
/// the frame being built.
pub struct PreparationContext<'a> {
    pub descriptor_heap: &'a ManagedDescriptorHeap,
}

impl PreparationContext<'_> {
    /// Absolute offset of a category's descriptor table for one view
    /// kind.
    pub fn category_descriptor_start(&self, id: CategoryId, kind: ViewKind) -> Result<u64> {
        self.descriptor_heap.category_offset(id, kind)
    }

    /// Absolute offset of one category resource's descriptor.
    pub fn category_resource_descriptor(
        &self,
        id: CategoryResourceId,
        kind: ViewKind,
    ) -> Result<u64> {
        Ok(self.descriptor_heap.category_offset(id.category, kind)? + id.index.descriptor as u64)
    }
}

// ============================================================================
// Resource context
// ============================================================================

/// What jobs may touch while recording: live handles, descriptor
/// offsets, and local-resource data of the current frame.
pub struct ResourceContext<'a> {
    pub device: &'a DeviceRef,
    pub descriptor_heap: &'a ManagedDescriptorHeap,
    pub categories: &'a mut CategoryRegistry,
    pub blackboard: &'a mut Blackboard,
}

impl ResourceContext<'_> {
    pub fn transient_resource(&self, index: TransientResourceIndex) -> Result<ResourceId> {
        self.blackboard.transient_resource(index)
    }

    pub fn local_resource(&self, index: LocalResourceIndex) -> Result<LocalResourceHandle> {
        self.blackboard.local_resource(index)
    }

    pub fn set_local_resource_data(
        &mut self,
        index: LocalResourceIndex,
        data: &[u8],
    ) -> Result<()> {
        self.blackboard.set_local_resource_data(index, data)
    }

    /// Typed variant of [`set_local_resource_data`](Self::set_local_resource_data)
    /// for plain-old-data constant blocks.
    pub fn set_local_resource_typed<T: bytemuck::Pod>(
        &mut self,
        index: LocalResourceIndex,
        value: &T,
    ) -> Result<()> {
        self.blackboard
            .set_local_resource_data(index, bytemuck::bytes_of(value))
    }

    pub fn category_resource(&self, id: CategoryResourceId) -> Result<CategoryResourceHandle> {
        self.categories.resource_handle(id)
    }

    /// Absolute offset of a category's descriptor table for one view
    /// kind.
    pub fn category_descriptor_start(&self, id: CategoryId, kind: ViewKind) -> Result<u64> {
        self.descriptor_heap.category_offset(id, kind)
    }

    /// Absolute offset of one category resource's descriptor.
    pub fn category_resource_descriptor(
        &self,
        id: CategoryResourceId,
        kind: ViewKind,
    ) -> Result<u64> {
        Ok(self.descriptor_heap.category_offset(id.category, kind)? + id.index.descriptor as u64)
    }

    /// Absolute offset of a transient view in the shader-visible heap's
    /// global block.
    pub fn transient_descriptor_offset(&self, view: ViewIdentifier) -> Result<u64> {
        if view.kind != FrameViewKind::ShaderBindable {
            return Err(QuarryError::InvalidConfiguration(
                "only shader-bindable views live in the shader-visible heap".into(),
            ));
        }
        Ok(self.descriptor_heap.global_offset() + view.index as u64)
    }

    /// CPU descriptor handle of a transient render-target view.
    #[must_use]
    pub fn transient_rtv(&self, view: ViewIdentifier) -> (DescriptorHeapId, u32) {
        self.blackboard.transient_rtv(view)
    }

    /// CPU descriptor handle of a transient depth-stencil view.
    #[must_use]
    pub fn transient_dsv(&self, view: ViewIdentifier) -> (DescriptorHeapId, u32) {
        self.blackboard.transient_dsv(view)
    }

    /// Expand a category transition into per-resource barriers, forcing
    /// the recorded before-state.
    pub fn transition_category(
        &mut self,
        id: CategoryId,
        out: &mut Vec<BarrierDesc>,
        before: ResourceState,
        after: ResourceState,
    ) -> Result<()> {
        self.categories
            .transition_category(id, out, after, Some(before))
    }
}
