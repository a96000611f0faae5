//! Headless Device Backend
//!
//! A complete in-memory implementation of [`GpuDevice`] and
//! [`GpuSwapchain`]. Heaps are byte buffers, command lists record their
//! commands, and `submit` executes copy work immediately, so fences
//! complete at signal time. The backend validates the interface contract
//! (placement bounds, mapped-access rules, descriptor indices, list
//! open/closed state) and reports violations as
//! [`QuarryError::Fatal`](crate::errors::QuarryError::Fatal).
//!
//! Besides driving the test suite, this backend doubles as a reference
//! for what the core expects from a real device: every rule it enforces
//! is a rule the production backend must obey.

use std::cell::RefCell;
use std::hash::{Hash, Hasher};
use std::rc::Rc;

use crate::errors::{QuarryError, Result};

use super::device::{GpuDevice, GpuSwapchain};
use super::{
    AllocationRequirements, BarrierDesc, BindFlags, CommandListId, DescriptorHeapId,
    DescriptorHeapKind, FenceId, Format, HeapFlags, HeapId, HeapKind, QueueKind, ResourceId,
    ResourceState, ResourceView, TextureCopyRegion, TextureDesc,
};

// ============================================================================
// Capabilities
// ============================================================================

/// Tunable capability values reported by the headless device.
#[derive(Clone, Copy, Debug)]
pub struct HeadlessCaps {
    pub heap_alignment: u64,
    pub copy_alignment: u64,
    pub texture_alignment: u64,
    pub buffer_alignment: u64,
}

impl Default for HeadlessCaps {
    fn default() -> Self {
        Self {
            heap_alignment: 64 * 1024,
            copy_alignment: 512,
            texture_alignment: 4096,
            buffer_alignment: 256,
        }
    }
}

// ============================================================================
// Recorded commands
// ============================================================================

/// One recorded command. Public so tests can assert on submission shape.
#[derive(Clone, Debug)]
pub enum HeadlessCommand {
    Barriers(Vec<BarrierDesc>),
    CopyBuffer {
        src: ResourceId,
        src_offset: u64,
        dst: ResourceId,
        dst_offset: u64,
        size: u64,
    },
    CopyBufferToTexture {
        src: ResourceId,
        src_offset: u64,
        dst: ResourceId,
        subresource: u32,
        region: TextureCopyRegion,
    },
    CopyResource {
        src: ResourceId,
        dst: ResourceId,
    },
    Discard(ResourceId),
    ClearDepthStencil {
        heap: DescriptorHeapId,
        index: u32,
        depth: f32,
        stencil: u8,
    },
    SetDescriptorHeap(DescriptorHeapId),
}

// ============================================================================
// Internal object tables
// ============================================================================

struct HeapEntry {
    kind: HeapKind,
    flags: HeapFlags,
    bytes: Vec<u8>,
}

enum ResourcePayload {
    Buffer,
    Texture {
        desc: TextureDesc,
        subresource_offsets: Vec<u64>,
    },
}

struct ResourceEntry {
    heap: HeapId,
    heap_offset: u64,
    size: u64,
    payload: ResourcePayload,
}

struct DescriptorHeapEntry {
    kind: DescriptorHeapKind,
    shader_visible: bool,
    slots: Vec<Option<ResourceView>>,
}

struct ListEntry {
    kind: QueueKind,
    open: bool,
    commands: Vec<HeadlessCommand>,
}

/// One executed submission, kept for inspection.
#[derive(Clone, Debug)]
pub struct HeadlessSubmission {
    pub queue: QueueKind,
    pub commands: Vec<HeadlessCommand>,
}

#[derive(Default)]
struct DeviceState {
    caps: HeadlessCaps,
    heaps: Vec<Option<HeapEntry>>,
    resources: Vec<Option<ResourceEntry>>,
    descriptor_heaps: Vec<Option<DescriptorHeapEntry>>,
    fences: Vec<Option<u64>>,
    lists: Vec<Option<ListEntry>>,
    submissions: Vec<HeadlessSubmission>,
}

// ============================================================================
// Device
// ============================================================================

/// In-memory [`GpuDevice`] implementation. Cheap to clone; clones share
/// the same underlying object tables.
#[derive(Clone, Default)]
pub struct HeadlessDevice {
    state: Rc<RefCell<DeviceState>>,
}

impl HeadlessDevice {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_caps(caps: HeadlessCaps) -> Self {
        let device = Self::default();
        device.state.borrow_mut().caps = caps;
        device
    }

    /// Shared trait-object handle to this device.
    #[must_use]
    pub fn handle(&self) -> super::DeviceRef {
        Rc::new(self.clone())
    }

    // ── Inspection (tests and tooling) ─────────────────────────────────────

    /// Number of live (not yet destroyed) heaps.
    #[must_use]
    pub fn live_heap_count(&self) -> usize {
        self.state.borrow().heaps.iter().flatten().count()
    }

    /// Number of live (not yet destroyed) resources.
    #[must_use]
    pub fn live_resource_count(&self) -> usize {
        self.state.borrow().resources.iter().flatten().count()
    }

    /// Number of live descriptor heaps.
    #[must_use]
    pub fn live_descriptor_heap_count(&self) -> usize {
        self.state.borrow().descriptor_heaps.iter().flatten().count()
    }

    /// Current contents of a resource, resolved through its heap bytes.
    pub fn resource_bytes(&self, resource: ResourceId) -> Result<Vec<u8>> {
        let state = self.state.borrow();
        let entry = state.resource(resource)?;
        let heap = state.heap(entry.heap)?;
        let start = entry.heap_offset as usize;
        let end = start + entry.size as usize;
        Ok(heap.bytes[start..end].to_vec())
    }

    /// The view currently stored in a descriptor slot.
    #[must_use]
    pub fn descriptor_view(&self, heap: DescriptorHeapId, index: u32) -> Option<ResourceView> {
        let state = self.state.borrow();
        let entry = state.descriptor_heap(heap).ok()?;
        entry.slots.get(index as usize).copied().flatten()
    }

    /// Submissions executed so far, oldest first.
    #[must_use]
    pub fn submissions(&self) -> Vec<HeadlessSubmission> {
        self.state.borrow().submissions.clone()
    }

    /// Number of submissions that went to one queue.
    #[must_use]
    pub fn submission_count(&self, queue: QueueKind) -> usize {
        self.state
            .borrow()
            .submissions
            .iter()
            .filter(|s| s.queue == queue)
            .count()
    }

    /// Drop the recorded submission log.
    pub fn clear_submissions(&self) {
        self.state.borrow_mut().submissions.clear();
    }
}

impl DeviceState {
    fn heap(&self, id: HeapId) -> Result<&HeapEntry> {
        self.heaps
            .get(id.raw() as usize)
            .and_then(Option::as_ref)
            .ok_or_else(|| QuarryError::fatal(format!("unknown or destroyed heap {}", id.raw())))
    }

    fn resource(&self, id: ResourceId) -> Result<&ResourceEntry> {
        self.resources
            .get(id.raw() as usize)
            .and_then(Option::as_ref)
            .ok_or_else(|| {
                QuarryError::fatal(format!("unknown or destroyed resource {}", id.raw()))
            })
    }

    fn descriptor_heap(&self, id: DescriptorHeapId) -> Result<&DescriptorHeapEntry> {
        self.descriptor_heaps
            .get(id.raw() as usize)
            .and_then(Option::as_ref)
            .ok_or_else(|| {
                QuarryError::fatal(format!("unknown or destroyed descriptor heap {}", id.raw()))
            })
    }

    fn list_mut(&mut self, id: CommandListId) -> Result<&mut ListEntry> {
        self.lists
            .get_mut(id.raw() as usize)
            .and_then(Option::as_mut)
            .ok_or_else(|| QuarryError::fatal(format!("unknown command list {}", id.raw())))
    }

    fn record(&mut self, list: CommandListId, command: HeadlessCommand) -> Result<()> {
        let entry = self.list_mut(list)?;
        if !entry.open {
            return Err(QuarryError::fatal("recording into a closed command list"));
        }
        entry.commands.push(command);
        Ok(())
    }

    fn resource_span(&self, id: ResourceId) -> Result<(HeapId, u64, u64)> {
        let entry = self.resource(id)?;
        Ok((entry.heap, entry.heap_offset, entry.size))
    }

    /// Read a byte range out of a resource into a scratch vector.
    fn read_resource(&self, id: ResourceId, offset: u64, size: u64) -> Result<Vec<u8>> {
        let (heap, base, total) = self.resource_span(id)?;
        if offset + size > total {
            return Err(QuarryError::fatal("resource read out of bounds"));
        }
        let heap = self.heap(heap)?;
        let start = (base + offset) as usize;
        Ok(heap.bytes[start..start + size as usize].to_vec())
    }

    fn write_resource(&mut self, id: ResourceId, offset: u64, data: &[u8]) -> Result<()> {
        let (heap_id, base, total) = self.resource_span(id)?;
        if offset + data.len() as u64 > total {
            return Err(QuarryError::fatal("resource write out of bounds"));
        }
        let heap = self
            .heaps
            .get_mut(heap_id.raw() as usize)
            .and_then(Option::as_mut)
            .ok_or_else(|| QuarryError::fatal("resource references destroyed heap"))?;
        let start = (base + offset) as usize;
        heap.bytes[start..start + data.len()].copy_from_slice(data);
        Ok(())
    }

    fn execute(&mut self, commands: &[HeadlessCommand]) -> Result<()> {
        for command in commands {
            match command {
                HeadlessCommand::CopyBuffer {
                    src,
                    src_offset,
                    dst,
                    dst_offset,
                    size,
                } => {
                    let data = self.read_resource(*src, *src_offset, *size)?;
                    self.write_resource(*dst, *dst_offset, &data)?;
                }
                HeadlessCommand::CopyBufferToTexture {
                    src,
                    src_offset,
                    dst,
                    subresource,
                    region,
                } => {
                    self.execute_texture_copy(*src, *src_offset, *dst, *subresource, region)?;
                }
                HeadlessCommand::CopyResource { src, dst } => {
                    let (_, _, src_size) = self.resource_span(*src)?;
                    let (_, _, dst_size) = self.resource_span(*dst)?;
                    let size = src_size.min(dst_size);
                    let data = self.read_resource(*src, 0, size)?;
                    self.write_resource(*dst, 0, &data)?;
                }
                HeadlessCommand::Barriers(barriers) => {
                    for barrier in barriers {
                        match barrier {
                            BarrierDesc::Transition { resource, .. }
                            | BarrierDesc::Uav { resource }
                            | BarrierDesc::Aliasing {
                                after: resource, ..
                            } => {
                                self.resource(*resource)?;
                            }
                        }
                    }
                }
                HeadlessCommand::Discard(resource) => {
                    self.resource(*resource)?;
                }
                HeadlessCommand::ClearDepthStencil { heap, index, .. } => {
                    let entry = self.descriptor_heap(*heap)?;
                    if *index as usize >= entry.slots.len() {
                        return Err(QuarryError::fatal("depth-stencil clear slot out of range"));
                    }
                }
                HeadlessCommand::SetDescriptorHeap(heap) => {
                    self.descriptor_heap(*heap)?;
                }
            }
        }
        Ok(())
    }

    fn execute_texture_copy(
        &mut self,
        src: ResourceId,
        src_offset: u64,
        dst: ResourceId,
        subresource: u32,
        region: &TextureCopyRegion,
    ) -> Result<()> {
        let (subresource_base, mip_width, texel) = {
            let entry = self.resource(dst)?;
            let ResourcePayload::Texture {
                desc,
                subresource_offsets,
            } = &entry.payload
            else {
                return Err(QuarryError::fatal("texture copy into a buffer resource"));
            };
            let base = *subresource_offsets.get(subresource as usize).ok_or_else(|| {
                QuarryError::fatal(format!("subresource {subresource} out of range"))
            })?;
            let mip = (subresource % u32::from(desc.mip_levels)) as u16;
            let (w, _) = desc.mip_extent(mip);
            (base, w, u64::from(desc.format.texel_size()))
        };

        let row_bytes = u64::from(region.width) * u64::from(region.texel_size);
        for slice in 0..region.depth {
            for row in 0..region.height {
                let src_row = src_offset
                    + (u64::from(slice) * u64::from(region.height) + u64::from(row))
                        * region.row_pitch;
                let data = self.read_resource(src, src_row, row_bytes)?;
                let dst_row = subresource_base
                    + (u64::from(region.dst_y + row) * u64::from(mip_width)
                        + u64::from(region.dst_x))
                        * texel;
                self.write_resource(dst, dst_row, &data)?;
            }
        }
        Ok(())
    }
}

impl GpuDevice for HeadlessDevice {
    fn heap_alignment(&self) -> u64 {
        self.state.borrow().caps.heap_alignment
    }

    fn copy_alignment(&self) -> u64 {
        self.state.borrow().caps.copy_alignment
    }

    fn texture_requirements(&self, desc: &TextureDesc) -> AllocationRequirements {
        let alignment = self.state.borrow().caps.texture_alignment;
        let packed = desc.total_packed_size().max(1);
        AllocationRequirements {
            size: packed.div_ceil(alignment) * alignment,
            alignment,
        }
    }

    fn buffer_requirements(&self, size: u64) -> AllocationRequirements {
        let alignment = self.state.borrow().caps.buffer_alignment;
        AllocationRequirements {
            size: size.max(1).div_ceil(alignment) * alignment,
            alignment,
        }
    }

    fn create_heap(&self, size: u64, kind: HeapKind, flags: HeapFlags) -> Result<HeapId> {
        let mut state = self.state.borrow_mut();
        if size == 0 || size % state.caps.heap_alignment != 0 {
            return Err(QuarryError::fatal(format!(
                "heap size {size} not a multiple of the heap alignment"
            )));
        }
        let id = HeapId::from_raw(state.heaps.len() as u32);
        state.heaps.push(Some(HeapEntry {
            kind,
            flags,
            bytes: vec![0; size as usize],
        }));
        Ok(id)
    }

    fn destroy_heap(&self, heap: HeapId) {
        let mut state = self.state.borrow_mut();
        if let Some(slot) = state.heaps.get_mut(heap.raw() as usize) {
            *slot = None;
        }
    }

    fn create_placed_buffer(
        &self,
        heap: HeapId,
        offset: u64,
        size: u64,
        _bind: BindFlags,
        _initial_state: ResourceState,
    ) -> Result<ResourceId> {
        let mut state = self.state.borrow_mut();
        let entry = state.heap(heap)?;
        if offset + size > entry.bytes.len() as u64 {
            return Err(QuarryError::fatal("buffer placement exceeds heap bounds"));
        }
        if !entry.flags.contains(HeapFlags::BUFFERS) {
            return Err(QuarryError::fatal("heap does not allow buffers"));
        }
        let id = ResourceId::from_raw(state.resources.len() as u32);
        state.resources.push(Some(ResourceEntry {
            heap,
            heap_offset: offset,
            size,
            payload: ResourcePayload::Buffer,
        }));
        Ok(id)
    }

    fn create_placed_texture(
        &self,
        heap: HeapId,
        offset: u64,
        desc: &TextureDesc,
        _initial_state: ResourceState,
    ) -> Result<ResourceId> {
        let requirements = self.texture_requirements(desc);
        let mut state = self.state.borrow_mut();
        let entry = state.heap(heap)?;
        if offset % requirements.alignment != 0 {
            return Err(QuarryError::fatal("texture placement misaligned"));
        }
        if offset + requirements.size > entry.bytes.len() as u64 {
            return Err(QuarryError::fatal("texture placement exceeds heap bounds"));
        }
        if !entry.flags.contains(HeapFlags::TEXTURES) {
            return Err(QuarryError::fatal("heap does not allow textures"));
        }

        let mut subresource_offsets = Vec::with_capacity(desc.subresource_count() as usize);
        let mut cursor = 0;
        for subresource in 0..desc.subresource_count() {
            subresource_offsets.push(cursor);
            cursor += desc.subresource_size(subresource);
        }

        let id = ResourceId::from_raw(state.resources.len() as u32);
        state.resources.push(Some(ResourceEntry {
            heap,
            heap_offset: offset,
            size: requirements.size,
            payload: ResourcePayload::Texture {
                desc: *desc,
                subresource_offsets,
            },
        }));
        Ok(id)
    }

    fn destroy_resource(&self, resource: ResourceId) {
        let mut state = self.state.borrow_mut();
        if let Some(slot) = state.resources.get_mut(resource.raw() as usize) {
            *slot = None;
        }
    }

    fn gpu_address(&self, resource: ResourceId) -> u64 {
        // Synthetic but stable and non-overlapping: heap base spaced far
        // apart plus the placement offset.
        let state = self.state.borrow();
        state.resource(resource).map_or(0, |entry| {
            (u64::from(entry.heap.raw()) + 1) << 40 | entry.heap_offset
        })
    }

    fn write_mapped(&self, resource: ResourceId, offset: u64, data: &[u8]) -> Result<()> {
        let mut state = self.state.borrow_mut();
        let entry = state.resource(resource)?;
        let heap = state.heap(entry.heap)?;
        if heap.kind != HeapKind::Upload {
            return Err(QuarryError::fatal("mapped write to a non-upload heap"));
        }
        state.write_resource(resource, offset, data)
    }

    fn read_mapped(&self, resource: ResourceId, offset: u64, out: &mut [u8]) -> Result<()> {
        let state = self.state.borrow();
        let entry = state.resource(resource)?;
        let heap = state.heap(entry.heap)?;
        if heap.kind == HeapKind::Default {
            return Err(QuarryError::fatal("mapped read from a device-local heap"));
        }
        let data = state.read_resource(resource, offset, out.len() as u64)?;
        out.copy_from_slice(&data);
        Ok(())
    }

    fn create_descriptor_heap(
        &self,
        kind: DescriptorHeapKind,
        capacity: u32,
        shader_visible: bool,
    ) -> Result<DescriptorHeapId> {
        if shader_visible && kind != DescriptorHeapKind::ShaderBindable {
            return Err(QuarryError::fatal(
                "only shader-bindable heaps may be shader visible",
            ));
        }
        let mut state = self.state.borrow_mut();
        let id = DescriptorHeapId::from_raw(state.descriptor_heaps.len() as u32);
        state.descriptor_heaps.push(Some(DescriptorHeapEntry {
            kind,
            shader_visible,
            slots: vec![None; capacity as usize],
        }));
        Ok(id)
    }

    fn destroy_descriptor_heap(&self, heap: DescriptorHeapId) {
        let mut state = self.state.borrow_mut();
        if let Some(slot) = state.descriptor_heaps.get_mut(heap.raw() as usize) {
            *slot = None;
        }
    }

    fn write_descriptor(
        &self,
        heap: DescriptorHeapId,
        index: u32,
        view: &ResourceView,
    ) -> Result<()> {
        let mut state = self.state.borrow_mut();
        if view.desc.kind().heap_kind() != state.descriptor_heap(heap)?.kind {
            return Err(QuarryError::fatal("view kind does not match heap kind"));
        }
        if let Some(resource) = view.resource {
            state.resource(resource)?;
        }
        let entry = state
            .descriptor_heaps
            .get_mut(heap.raw() as usize)
            .and_then(Option::as_mut)
            .ok_or_else(|| QuarryError::fatal("unknown descriptor heap"))?;
        let slot = entry
            .slots
            .get_mut(index as usize)
            .ok_or_else(|| QuarryError::fatal("descriptor slot out of range"))?;
        *slot = Some(*view);
        Ok(())
    }

    fn copy_descriptors(
        &self,
        dst: DescriptorHeapId,
        dst_index: u32,
        src: DescriptorHeapId,
        src_index: u32,
        count: u32,
    ) -> Result<()> {
        let mut state = self.state.borrow_mut();
        {
            let src_entry = state.descriptor_heap(src)?;
            let dst_entry = state.descriptor_heap(dst)?;
            if src_entry.kind != dst_entry.kind {
                return Err(QuarryError::fatal("descriptor copy across heap kinds"));
            }
            if src_entry.shader_visible {
                return Err(QuarryError::fatal(
                    "descriptor copies must source a non-visible heap",
                ));
            }
            if src_index as usize + count as usize > src_entry.slots.len()
                || dst_index as usize + count as usize > dst_entry.slots.len()
            {
                return Err(QuarryError::fatal("descriptor copy out of range"));
            }
        }
        let copied: Vec<Option<ResourceView>> = {
            let src_entry = state.descriptor_heap(src)?;
            src_entry.slots[src_index as usize..(src_index + count) as usize].to_vec()
        };
        let dst_entry = state
            .descriptor_heaps
            .get_mut(dst.raw() as usize)
            .and_then(Option::as_mut)
            .ok_or_else(|| QuarryError::fatal("unknown descriptor heap"))?;
        dst_entry.slots[dst_index as usize..(dst_index + count) as usize]
            .copy_from_slice(&copied);
        Ok(())
    }

    fn descriptor_fingerprint(&self, heap: DescriptorHeapId, index: u32) -> u64 {
        let state = self.state.borrow();
        let Ok(entry) = state.descriptor_heap(heap) else {
            return 0;
        };
        match entry.slots.get(index as usize).copied().flatten() {
            None => 0,
            Some(view) => {
                let mut hasher = rustc_hash::FxHasher::default();
                view.resource.map(ResourceId::raw).hash(&mut hasher);
                format!("{:?}", view.desc).hash(&mut hasher);
                hasher.finish().max(1)
            }
        }
    }

    fn create_command_list(&self, kind: QueueKind) -> Result<CommandListId> {
        let mut state = self.state.borrow_mut();
        let id = CommandListId::from_raw(state.lists.len() as u32);
        state.lists.push(Some(ListEntry {
            kind,
            open: true,
            commands: Vec::new(),
        }));
        Ok(id)
    }

    fn reset_command_list(&self, list: CommandListId) -> Result<()> {
        let mut state = self.state.borrow_mut();
        let entry = state.list_mut(list)?;
        entry.open = true;
        entry.commands.clear();
        Ok(())
    }

    fn close_command_list(&self, list: CommandListId) -> Result<()> {
        let mut state = self.state.borrow_mut();
        let entry = state.list_mut(list)?;
        if !entry.open {
            return Err(QuarryError::fatal("closing an already closed command list"));
        }
        entry.open = false;
        Ok(())
    }

    fn cmd_resource_barrier(&self, list: CommandListId, barriers: &[BarrierDesc]) -> Result<()> {
        self.state
            .borrow_mut()
            .record(list, HeadlessCommand::Barriers(barriers.to_vec()))
    }

    fn cmd_copy_buffer(
        &self,
        list: CommandListId,
        src: ResourceId,
        src_offset: u64,
        dst: ResourceId,
        dst_offset: u64,
        size: u64,
    ) -> Result<()> {
        self.state.borrow_mut().record(
            list,
            HeadlessCommand::CopyBuffer {
                src,
                src_offset,
                dst,
                dst_offset,
                size,
            },
        )
    }

    fn cmd_copy_buffer_to_texture(
        &self,
        list: CommandListId,
        src: ResourceId,
        src_offset: u64,
        dst: ResourceId,
        subresource: u32,
        region: &TextureCopyRegion,
    ) -> Result<()> {
        self.state.borrow_mut().record(
            list,
            HeadlessCommand::CopyBufferToTexture {
                src,
                src_offset,
                dst,
                subresource,
                region: *region,
            },
        )
    }

    fn cmd_copy_resource(
        &self,
        list: CommandListId,
        src: ResourceId,
        dst: ResourceId,
    ) -> Result<()> {
        self.state
            .borrow_mut()
            .record(list, HeadlessCommand::CopyResource { src, dst })
    }

    fn cmd_discard(&self, list: CommandListId, resource: ResourceId) -> Result<()> {
        self.state
            .borrow_mut()
            .record(list, HeadlessCommand::Discard(resource))
    }

    fn cmd_clear_depth_stencil(
        &self,
        list: CommandListId,
        heap: DescriptorHeapId,
        index: u32,
        depth: f32,
        stencil: u8,
    ) -> Result<()> {
        self.state.borrow_mut().record(
            list,
            HeadlessCommand::ClearDepthStencil {
                heap,
                index,
                depth,
                stencil,
            },
        )
    }

    fn cmd_set_descriptor_heap(&self, list: CommandListId, heap: DescriptorHeapId) -> Result<()> {
        self.state
            .borrow_mut()
            .record(list, HeadlessCommand::SetDescriptorHeap(heap))
    }

    fn submit(&self, queue: QueueKind, lists: &[CommandListId]) -> Result<()> {
        let mut state = self.state.borrow_mut();
        let mut batched = Vec::new();
        for id in lists {
            let entry = state.list_mut(*id)?;
            if entry.open {
                return Err(QuarryError::fatal("submitting an open command list"));
            }
            if entry.kind != queue && !(entry.kind == QueueKind::Direct && queue == QueueKind::Present)
            {
                return Err(QuarryError::fatal("command list kind does not match queue"));
            }
            batched.extend(entry.commands.iter().cloned());
        }
        state.execute(&batched)?;
        state.submissions.push(HeadlessSubmission {
            queue,
            commands: batched,
        });
        Ok(())
    }

    fn create_fence(&self, initial_value: u64) -> Result<FenceId> {
        let mut state = self.state.borrow_mut();
        let id = FenceId::from_raw(state.fences.len() as u32);
        state.fences.push(Some(initial_value));
        Ok(id)
    }

    fn destroy_fence(&self, fence: FenceId) {
        let mut state = self.state.borrow_mut();
        if let Some(slot) = state.fences.get_mut(fence.raw() as usize) {
            *slot = None;
        }
    }

    fn signal(&self, _queue: QueueKind, fence: FenceId, value: u64) -> Result<()> {
        let mut state = self.state.borrow_mut();
        let slot = state
            .fences
            .get_mut(fence.raw() as usize)
            .and_then(Option::as_mut)
            .ok_or_else(|| QuarryError::fatal("signal of unknown fence"))?;
        *slot = (*slot).max(value);
        Ok(())
    }

    fn wait_gpu(&self, _queue: QueueKind, fence: FenceId, value: u64) -> Result<()> {
        // The headless timeline completes work at submit, so a wait on a
        // value that was never signaled would stall a real GPU forever.
        if self.completed_value(fence) < value {
            return Err(QuarryError::fatal("gpu wait on a value never signaled"));
        }
        Ok(())
    }

    fn completed_value(&self, fence: FenceId) -> u64 {
        self.state
            .borrow()
            .fences
            .get(fence.raw() as usize)
            .and_then(|slot| *slot)
            .unwrap_or(0)
    }

    fn wait_cpu(&self, fence: FenceId, value: u64) -> Result<()> {
        if self.completed_value(fence) < value {
            return Err(QuarryError::fatal("cpu wait would block forever"));
        }
        Ok(())
    }
}

// ============================================================================
// Swapchain
// ============================================================================

struct SwapchainState {
    heap: HeapId,
    backbuffers: Vec<ResourceId>,
    current: usize,
    extent: (u32, u32),
    format: Format,
    presented: u64,
}

/// In-memory [`GpuSwapchain`] over headless backbuffer textures.
pub struct HeadlessSwapchain {
    device: HeadlessDevice,
    state: RefCell<SwapchainState>,
}

impl HeadlessSwapchain {
    pub fn new(
        device: &HeadlessDevice,
        frame_count: usize,
        width: u32,
        height: u32,
        format: Format,
    ) -> Result<Self> {
        let (heap, backbuffers) = Self::create_backbuffers(device, frame_count, width, height, format)?;
        Ok(Self {
            device: device.clone(),
            state: RefCell::new(SwapchainState {
                heap,
                backbuffers,
                current: 0,
                extent: (width, height),
                format,
                presented: 0,
            }),
        })
    }

    fn create_backbuffers(
        device: &HeadlessDevice,
        frame_count: usize,
        width: u32,
        height: u32,
        format: Format,
    ) -> Result<(HeapId, Vec<ResourceId>)> {
        let desc = TextureDesc::texture2d(format, width, height).with_bind(
            BindFlags::RENDER_TARGET | BindFlags::SHADER_RESOURCE,
        );
        let requirements = device.texture_requirements(&desc);
        let stride = requirements.size.div_ceil(requirements.alignment) * requirements.alignment;
        let total = (stride * frame_count as u64).div_ceil(device.heap_alignment())
            * device.heap_alignment();
        let heap = device.create_heap(
            total,
            HeapKind::Default,
            HeapFlags::TEXTURES | HeapFlags::TARGETS,
        )?;
        let mut backbuffers = Vec::with_capacity(frame_count);
        for frame in 0..frame_count {
            backbuffers.push(device.create_placed_texture(
                heap,
                stride * frame as u64,
                &desc,
                ResourceState::PRESENT,
            )?);
        }
        Ok((heap, backbuffers))
    }

    /// Number of frames presented so far.
    #[must_use]
    pub fn presented_count(&self) -> u64 {
        self.state.borrow().presented
    }
}

impl Drop for HeadlessSwapchain {
    fn drop(&mut self) {
        let state = self.state.borrow();
        for backbuffer in &state.backbuffers {
            self.device.destroy_resource(*backbuffer);
        }
        self.device.destroy_heap(state.heap);
    }
}

impl GpuSwapchain for HeadlessSwapchain {
    fn frame_count(&self) -> usize {
        self.state.borrow().backbuffers.len()
    }

    fn current_index(&self) -> usize {
        self.state.borrow().current
    }

    fn backbuffer(&self, index: usize) -> ResourceId {
        self.state.borrow().backbuffers[index]
    }

    fn extent(&self) -> (u32, u32) {
        self.state.borrow().extent
    }

    fn format(&self) -> Format {
        self.state.borrow().format
    }

    fn wait_for_latency(&self) -> Result<()> {
        Ok(())
    }

    fn present(&self) -> Result<()> {
        let mut state = self.state.borrow_mut();
        state.current = (state.current + 1) % state.backbuffers.len();
        state.presented += 1;
        Ok(())
    }

    fn resize(&self, width: u32, height: u32) -> Result<()> {
        let mut state = self.state.borrow_mut();
        for backbuffer in &state.backbuffers {
            self.device.destroy_resource(*backbuffer);
        }
        self.device.destroy_heap(state.heap);
        let frame_count = state.backbuffers.len();
        let (heap, backbuffers) =
            Self::create_backbuffers(&self.device, frame_count, width, height, state.format)?;
        state.heap = heap;
        state.backbuffers = backbuffers;
        state.current = 0;
        state.extent = (width, height);
        Ok(())
    }
}
