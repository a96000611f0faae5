//! Buffer Component
//!
//! One [`BufferAllocator`] plus a descriptor allocator per configured
//! view kind (CBV, SRV, UAV and buffer RTVs). Creating a buffer reserves
//! the same slot index in every configured table.

use crate::alloc::{BufferAllocator, BufferHandle, BufferInfo, DescriptorAllocator, HeapPoolRef};
use crate::errors::{QuarryError, Result};
use crate::gpu::{
    BarrierDesc, BindFlags, BufferShaderViewDesc, BufferTargetViewDesc, BufferUnorderedViewDesc,
    ConstantBufferViewDesc, DescriptorHeapId, DeviceRef, ResourceState, ResourceView, ViewDesc,
    ViewKind,
};

use super::{ComponentMemoryInfo, DescriptorSource, ResourceComponent, ResourceIndex};

/// Construction parameters for a buffer component.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct BufferComponentInfo {
    pub buffer: BufferInfo,
    pub mapped: bool,
    pub memory: ComponentMemoryInfo,
}

/// Default view description for one configured view kind.
#[derive(Clone, Copy, PartialEq, Debug)]
pub enum BufferViewDefaultDesc {
    Constant(ConstantBufferViewDesc),
    Shader(BufferShaderViewDesc),
    Unordered(BufferUnorderedViewDesc),
    Target(BufferTargetViewDesc),
}

impl BufferViewDefaultDesc {
    #[must_use]
    pub const fn kind(&self) -> ViewKind {
        match self {
            BufferViewDefaultDesc::Constant(_) => ViewKind::Cbv,
            BufferViewDefaultDesc::Shader(_) => ViewKind::Srv,
            BufferViewDefaultDesc::Unordered(_) => ViewKind::Uav,
            BufferViewDefaultDesc::Target(_) => ViewKind::Rtv,
        }
    }
}

/// One descriptor allocator to configure: the default view description
/// plus where its slots come from.
#[derive(Clone, Copy, PartialEq, Debug)]
pub struct BufferDescriptorInfo {
    pub defaults: BufferViewDefaultDesc,
    pub source: DescriptorSource,
}

impl BufferDescriptorInfo {
    #[must_use]
    pub fn cbv(capacity: u32) -> Self {
        Self {
            defaults: BufferViewDefaultDesc::Constant(ConstantBufferViewDesc::default()),
            source: DescriptorSource::Owned { capacity },
        }
    }

    #[must_use]
    pub fn srv(capacity: u32) -> Self {
        Self {
            defaults: BufferViewDefaultDesc::Shader(BufferShaderViewDesc::default()),
            source: DescriptorSource::Owned { capacity },
        }
    }

    #[must_use]
    pub fn uav(capacity: u32) -> Self {
        Self {
            defaults: BufferViewDefaultDesc::Unordered(BufferUnorderedViewDesc::default()),
            source: DescriptorSource::Owned { capacity },
        }
    }
}

/// Per-slot view overrides applied when creating one buffer.
#[derive(Clone, Copy, PartialEq, Debug, Default)]
pub struct BufferReplacementViews {
    pub cb: Option<ConstantBufferViewDesc>,
    pub sr: Option<BufferShaderViewDesc>,
    pub ua: Option<BufferUnorderedViewDesc>,
    pub rt: Option<BufferTargetViewDesc>,
}

struct ViewTable {
    allocator: DescriptorAllocator,
    defaults: BufferViewDefaultDesc,
}

/// A pool of element buffers with shared state and per-view descriptor
/// tables.
pub struct BufferComponent {
    device: DeviceRef,
    allocator: BufferAllocator,
    views: [Option<ViewTable>; 5],
}

impl BufferComponent {
    pub fn new(
        device: DeviceRef,
        pool: HeapPoolRef,
        info: &BufferComponentInfo,
        descriptors: &[BufferDescriptorInfo],
    ) -> Result<Self> {
        let mut bind = BindFlags::empty();
        let mut views: [Option<ViewTable>; 5] = [None, None, None, None, None];

        for descriptor in descriptors {
            let kind = descriptor.defaults.kind();
            match kind {
                ViewKind::Srv => bind |= BindFlags::SHADER_RESOURCE,
                ViewKind::Uav => bind |= BindFlags::UNORDERED_ACCESS,
                ViewKind::Rtv => bind |= BindFlags::RENDER_TARGET,
                ViewKind::Cbv => {}
                ViewKind::Dsv => {
                    return Err(QuarryError::InvalidConfiguration(
                        "buffers cannot carry depth-stencil views".into(),
                    ));
                }
            }
            let allocator = match descriptor.source {
                DescriptorSource::Owned { capacity } => {
                    DescriptorAllocator::new_owned(device.clone(), kind.heap_kind(), capacity)?
                }
                DescriptorSource::External {
                    heap,
                    start,
                    capacity,
                } => DescriptorAllocator::new_external(
                    device.clone(),
                    kind.heap_kind(),
                    heap,
                    start,
                    capacity,
                )?,
            };
            if views[kind.index()].is_some() {
                return Err(QuarryError::InvalidConfiguration(format!(
                    "view kind {kind:?} configured twice"
                )));
            }
            views[kind.index()] = Some(ViewTable {
                allocator,
                defaults: descriptor.defaults,
            });
        }

        let allocator = BufferAllocator::new(
            device.clone(),
            pool,
            info.buffer,
            info.mapped,
            bind,
            info.memory.initial_heap_size,
            info.memory.expansion_size,
        )?;

        Ok(Self {
            device,
            allocator,
            views,
        })
    }

    /// Allocate `element_count` elements and one slot in every configured
    /// descriptor table, all at the same index.
    pub fn create_buffer(
        &mut self,
        element_count: u64,
        replacements: &BufferReplacementViews,
    ) -> Result<ResourceIndex> {
        let identifier = self.allocator.allocate(element_count)?;
        let handle = self.allocator.handle(identifier)?;

        let mut descriptor: Option<usize> = None;
        for kind in ViewKind::ALL {
            let Some(table) = self.views[kind.index()].as_mut() else {
                continue;
            };
            let view = Self::resolve_view(
                &self.device,
                self.allocator.element_size(),
                table.defaults,
                replacements,
                &handle,
            );
            let slot = table.allocator.allocate(view, descriptor)?;
            match descriptor {
                None => descriptor = Some(slot),
                Some(expected) => {
                    debug_assert_eq!(slot, expected, "descriptor tables out of step");
                }
            }
        }

        Ok(ResourceIndex {
            identifier,
            descriptor: descriptor.unwrap_or(0),
        })
    }

    /// Destroy the buffer and release its descriptor slots.
    pub fn remove(&mut self, index: ResourceIndex) -> Result<()> {
        for table in self.views.iter_mut().flatten() {
            table.allocator.deallocate(index.descriptor)?;
        }
        self.allocator.deallocate(index.identifier)
    }

    pub fn handle(&self, index: ResourceIndex) -> Result<BufferHandle> {
        self.allocator.handle(index.identifier)
    }

    /// GPU virtual address of the buffer's first element.
    pub fn gpu_address(&self, index: ResourceIndex) -> Result<u64> {
        self.allocator.gpu_address(index.identifier)
    }

    /// Write through the mapped resource (mapped components only).
    pub fn update_mapped(&self, index: ResourceIndex, data: &[u8]) -> Result<()> {
        self.allocator.update_mapped(index.identifier, data)
    }

    #[must_use]
    pub fn current_state(&self) -> ResourceState {
        self.allocator.current_state()
    }

    /// Whole-pool transition; all buffers of the component share state.
    pub fn create_transition_barrier(
        &mut self,
        new_state: ResourceState,
        barriers: &mut Vec<BarrierDesc>,
        assumed_initial: Option<ResourceState>,
    ) {
        self.allocator
            .create_transition_barrier(new_state, barriers, assumed_initial);
    }

    #[must_use]
    pub fn element_size(&self) -> u64 {
        self.allocator.element_size()
    }

    #[must_use]
    pub fn element_alignment(&self) -> u64 {
        self.allocator.element_alignment()
    }

    // ── Internals ──────────────────────────────────────────────────────────

    fn resolve_view(
        device: &DeviceRef,
        element_size: u64,
        defaults: BufferViewDefaultDesc,
        replacements: &BufferReplacementViews,
        handle: &BufferHandle,
    ) -> ResourceView {
        let base_element = handle.offset / element_size;
        let desc = match defaults {
            BufferViewDefaultDesc::Constant(default) => {
                let desc = replacements.cb.unwrap_or(default);
                let location = device.gpu_address(handle.resource) + handle.offset;
                ViewDesc::Constant {
                    location: location.saturating_add_signed(desc.byte_offset),
                    size: (handle.element_count * element_size)
                        .saturating_add_signed(desc.size_modifier),
                }
            }
            BufferViewDefaultDesc::Shader(default) => {
                let desc = replacements.sr.unwrap_or(default);
                ViewDesc::BufferShader {
                    first_element: base_element + desc.first_element,
                    element_count: desc.element_count.unwrap_or(handle.element_count),
                    element_size: element_size as u32,
                }
            }
            BufferViewDefaultDesc::Unordered(default) => {
                let desc = replacements.ua.unwrap_or(default);
                ViewDesc::BufferUnordered {
                    first_element: base_element + desc.first_element,
                    element_count: desc.element_count.unwrap_or(handle.element_count),
                    element_size: element_size as u32,
                    counter_offset: desc.counter_offset,
                }
            }
            BufferViewDefaultDesc::Target(default) => {
                let desc = replacements.rt.unwrap_or(default);
                ViewDesc::BufferTarget {
                    format: desc.format,
                    first_element: (handle.offset.saturating_add_signed(desc.byte_offset))
                        / element_size,
                    element_count: desc.element_count.unwrap_or(handle.element_count),
                }
            }
        };
        ResourceView {
            resource: Some(handle.resource),
            desc,
        }
    }
}

impl ResourceComponent for BufferComponent {
    fn has_view_kind(&self, kind: ViewKind) -> bool {
        self.views[kind.index()].is_some()
    }

    fn descriptor_base(&self, kind: ViewKind) -> Option<(DescriptorHeapId, u32)> {
        self.views[kind.index()]
            .as_ref()
            .map(|table| table.allocator.base())
    }

    fn descriptor_count(&self) -> usize {
        self.views
            .iter()
            .flatten()
            .map(|table| table.allocator.descriptor_count())
            .max()
            .unwrap_or(0)
    }
}
