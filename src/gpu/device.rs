//! Device and Swapchain Traits
//!
//! The object-safe contracts the resource layer is written against. A
//! backend supplies GPU objects as `Copy` ids and performs the actual API
//! calls; the core never touches raw pointers or native handles.
//!
//! Mapped memory is exposed as a memcpy surface
//! ([`GpuDevice::write_mapped`] / [`GpuDevice::read_mapped`]) rather than
//! a raw pointer, which keeps every caller in safe code while preserving
//! upload-heap semantics.

use std::rc::Rc;

use crate::errors::Result;

use super::{
    AllocationRequirements, BarrierDesc, BindFlags, CommandListId, DescriptorHeapId,
    DescriptorHeapKind, FenceId, Format, HeapFlags, HeapId, HeapKind, QueueKind, ResourceId,
    ResourceState, ResourceView, TextureCopyRegion, TextureDesc,
};

/// Shared handle to a device backend.
///
/// The core is single-threaded cooperative; one owner thread drives the
/// render loop and every component borrows the same device through this
/// reference-counted handle.
pub type DeviceRef = Rc<dyn GpuDevice>;

/// An explicit-heap graphics device.
///
/// Fallible calls surface backend failures as
/// [`QuarryError::Fatal`](crate::errors::QuarryError::Fatal); the core
/// aborts the current operation and never retries.
pub trait GpuDevice {
    // ── Capabilities ───────────────────────────────────────────────────────

    /// Granularity heap sizes are rounded up to when created.
    fn heap_alignment(&self) -> u64;

    /// Placement alignment required for buffer→texture copy sources.
    fn copy_alignment(&self) -> u64;

    /// Size and placement alignment required for a texture description.
    fn texture_requirements(&self, desc: &TextureDesc) -> AllocationRequirements;

    /// Size and placement alignment required for a standalone placed
    /// buffer of `size` bytes.
    fn buffer_requirements(&self, size: u64) -> AllocationRequirements;

    // ── Heaps and placed resources ─────────────────────────────────────────

    fn create_heap(&self, size: u64, kind: HeapKind, flags: HeapFlags) -> Result<HeapId>;

    fn destroy_heap(&self, heap: HeapId);

    fn create_placed_buffer(
        &self,
        heap: HeapId,
        offset: u64,
        size: u64,
        bind: BindFlags,
        initial_state: ResourceState,
    ) -> Result<ResourceId>;

    fn create_placed_texture(
        &self,
        heap: HeapId,
        offset: u64,
        desc: &TextureDesc,
        initial_state: ResourceState,
    ) -> Result<ResourceId>;

    fn destroy_resource(&self, resource: ResourceId);

    /// GPU virtual address of a buffer resource.
    fn gpu_address(&self, resource: ResourceId) -> u64;

    /// Copy bytes into a mapped (upload-heap) resource.
    fn write_mapped(&self, resource: ResourceId, offset: u64, data: &[u8]) -> Result<()>;

    /// Copy bytes out of a mapped (upload- or readback-heap) resource.
    fn read_mapped(&self, resource: ResourceId, offset: u64, out: &mut [u8]) -> Result<()>;

    // ── Descriptors ────────────────────────────────────────────────────────

    fn create_descriptor_heap(
        &self,
        kind: DescriptorHeapKind,
        capacity: u32,
        shader_visible: bool,
    ) -> Result<DescriptorHeapId>;

    fn destroy_descriptor_heap(&self, heap: DescriptorHeapId);

    /// Write a view into a descriptor slot.
    fn write_descriptor(
        &self,
        heap: DescriptorHeapId,
        index: u32,
        view: &ResourceView,
    ) -> Result<()>;

    /// Copy `count` consecutive slots between heaps of the same kind.
    fn copy_descriptors(
        &self,
        dst: DescriptorHeapId,
        dst_index: u32,
        src: DescriptorHeapId,
        src_index: u32,
        count: u32,
    ) -> Result<()>;

    /// Content hash of one slot. Two slots holding the same view hash
    /// equal; an empty slot hashes to zero.
    fn descriptor_fingerprint(&self, heap: DescriptorHeapId, index: u32) -> u64;

    // ── Command recording ──────────────────────────────────────────────────

    fn create_command_list(&self, kind: QueueKind) -> Result<CommandListId>;

    /// Reopen a list for recording. Valid once prior submissions of the
    /// list have completed.
    fn reset_command_list(&self, list: CommandListId) -> Result<()>;

    fn close_command_list(&self, list: CommandListId) -> Result<()>;

    fn cmd_resource_barrier(&self, list: CommandListId, barriers: &[BarrierDesc]) -> Result<()>;

    fn cmd_copy_buffer(
        &self,
        list: CommandListId,
        src: ResourceId,
        src_offset: u64,
        dst: ResourceId,
        dst_offset: u64,
        size: u64,
    ) -> Result<()>;

    fn cmd_copy_buffer_to_texture(
        &self,
        list: CommandListId,
        src: ResourceId,
        src_offset: u64,
        dst: ResourceId,
        subresource: u32,
        region: &TextureCopyRegion,
    ) -> Result<()>;

    /// Whole-resource copy (used for the swapchain hand-off).
    fn cmd_copy_resource(&self, list: CommandListId, src: ResourceId, dst: ResourceId)
    -> Result<()>;

    /// Discard the contents of a resource (render-target fast clear path).
    fn cmd_discard(&self, list: CommandListId, resource: ResourceId) -> Result<()>;

    /// Clear a depth-stencil view identified by its descriptor slot.
    fn cmd_clear_depth_stencil(
        &self,
        list: CommandListId,
        heap: DescriptorHeapId,
        index: u32,
        depth: f32,
        stencil: u8,
    ) -> Result<()>;

    /// Bind the shader-visible descriptor heap for subsequent jobs.
    fn cmd_set_descriptor_heap(&self, list: CommandListId, heap: DescriptorHeapId) -> Result<()>;

    // ── Queues and fences ──────────────────────────────────────────────────

    /// Submit closed command lists to a queue in order.
    fn submit(&self, queue: QueueKind, lists: &[CommandListId]) -> Result<()>;

    fn create_fence(&self, initial_value: u64) -> Result<FenceId>;

    fn destroy_fence(&self, fence: FenceId);

    /// Signal `fence` to `value` from the GPU timeline of `queue`.
    fn signal(&self, queue: QueueKind, fence: FenceId, value: u64) -> Result<()>;

    /// Make `queue` wait until `fence` reaches `value`.
    fn wait_gpu(&self, queue: QueueKind, fence: FenceId, value: u64) -> Result<()>;

    /// Latest value the fence has completed.
    fn completed_value(&self, fence: FenceId) -> u64;

    /// Block the host until `fence` reaches `value`.
    fn wait_cpu(&self, fence: FenceId, value: u64) -> Result<()>;
}

/// A presentation surface with a fixed ring of backbuffers.
///
/// Window creation and input handling live outside the core; the
/// orchestrator only needs the backbuffer ring, the frame-latency wait
/// and present itself. Backbuffer state bookkeeping (PRESENT ↔ COPY_DEST
/// ↔ RENDER_TARGET) is done by the caller via ordinary transition
/// barriers.
pub trait GpuSwapchain {
    fn frame_count(&self) -> usize;

    /// Index of the backbuffer the next present targets.
    fn current_index(&self) -> usize;

    fn backbuffer(&self, index: usize) -> ResourceId;

    fn extent(&self) -> (u32, u32);

    fn format(&self) -> Format;

    /// Block until the swapchain allows another frame to begin.
    fn wait_for_latency(&self) -> Result<()>;

    fn present(&self) -> Result<()>;

    fn resize(&self, width: u32, height: u32) -> Result<()>;
}
