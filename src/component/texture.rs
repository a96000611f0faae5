//! Texture2D Component
//!
//! One [`TextureAllocator`] plus descriptor allocators for SRV, UAV, RTV
//! and DSV tables. Each texture is its own placed resource and tracks
//! its own state; the component exposes both per-resource and whole-pool
//! transitions.

use crate::alloc::{DescriptorAllocator, HeapPoolRef, TextureAllocator, TextureHandle};
use crate::errors::{QuarryError, Result};
use crate::gpu::{
    BarrierDesc, BindFlags, ClearValue, DescriptorHeapId, DeviceRef, Format, ResourceState,
    ResourceView, TextureDepthStencilViewDesc, TextureDesc, TextureShaderViewDesc,
    TextureTargetViewDesc, TextureUnorderedViewDesc, ViewDesc, ViewKind,
};

use super::{ComponentMemoryInfo, DescriptorSource, ResourceComponent, ResourceIndex};

/// Construction parameters for a texture component.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct TextureComponentInfo {
    pub format: Format,
    pub memory: ComponentMemoryInfo,
}

/// Default view description for one configured view kind.
#[derive(Clone, Copy, PartialEq, Debug)]
pub enum TextureViewDefaultDesc {
    Shader(TextureShaderViewDesc),
    Unordered(TextureUnorderedViewDesc),
    Target(TextureTargetViewDesc),
    DepthStencil(TextureDepthStencilViewDesc),
}

impl TextureViewDefaultDesc {
    #[must_use]
    pub const fn kind(&self) -> ViewKind {
        match self {
            TextureViewDefaultDesc::Shader(_) => ViewKind::Srv,
            TextureViewDefaultDesc::Unordered(_) => ViewKind::Uav,
            TextureViewDefaultDesc::Target(_) => ViewKind::Rtv,
            TextureViewDefaultDesc::DepthStencil(_) => ViewKind::Dsv,
        }
    }
}

/// One descriptor allocator to configure.
#[derive(Clone, Copy, PartialEq, Debug)]
pub struct TextureDescriptorInfo {
    pub defaults: TextureViewDefaultDesc,
    pub source: DescriptorSource,
}

impl TextureDescriptorInfo {
    #[must_use]
    pub fn srv(capacity: u32) -> Self {
        Self {
            defaults: TextureViewDefaultDesc::Shader(TextureShaderViewDesc::default()),
            source: DescriptorSource::Owned { capacity },
        }
    }

    #[must_use]
    pub fn uav(capacity: u32) -> Self {
        Self {
            defaults: TextureViewDefaultDesc::Unordered(TextureUnorderedViewDesc::default()),
            source: DescriptorSource::Owned { capacity },
        }
    }

    #[must_use]
    pub fn rtv(capacity: u32) -> Self {
        Self {
            defaults: TextureViewDefaultDesc::Target(TextureTargetViewDesc::default()),
            source: DescriptorSource::Owned { capacity },
        }
    }

    #[must_use]
    pub fn dsv(capacity: u32) -> Self {
        Self {
            defaults: TextureViewDefaultDesc::DepthStencil(TextureDepthStencilViewDesc::default()),
            source: DescriptorSource::Owned { capacity },
        }
    }
}

/// Per-slot view overrides applied when creating one texture.
#[derive(Clone, Copy, PartialEq, Debug, Default)]
pub struct TextureReplacementViews {
    pub sr: Option<TextureShaderViewDesc>,
    pub ua: Option<TextureUnorderedViewDesc>,
    pub rt: Option<TextureTargetViewDesc>,
    pub ds: Option<TextureDepthStencilViewDesc>,
}

struct ViewTable {
    allocator: DescriptorAllocator,
    defaults: TextureViewDefaultDesc,
}

/// A pool of 2D textures with per-resource state and per-view descriptor
/// tables.
pub struct Texture2dComponent {
    format: Format,
    allocator: TextureAllocator,
    views: [Option<ViewTable>; 5],
    bind: BindFlags,
}

impl Texture2dComponent {
    pub fn new(
        device: DeviceRef,
        pool: HeapPoolRef,
        info: &TextureComponentInfo,
        descriptors: &[TextureDescriptorInfo],
    ) -> Result<Self> {
        let mut bind = BindFlags::empty();
        let mut views: [Option<ViewTable>; 5] = [None, None, None, None, None];

        for descriptor in descriptors {
            let kind = descriptor.defaults.kind();
            match kind {
                ViewKind::Srv => bind |= BindFlags::SHADER_RESOURCE,
                ViewKind::Uav => bind |= BindFlags::UNORDERED_ACCESS,
                ViewKind::Rtv => bind |= BindFlags::RENDER_TARGET,
                ViewKind::Dsv => bind |= BindFlags::DEPTH_STENCIL,
                ViewKind::Cbv => {
                    return Err(QuarryError::InvalidConfiguration(
                        "textures cannot carry constant-buffer views".into(),
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

        let allocator = TextureAllocator::new(
            device,
            pool,
            info.memory.initial_heap_size,
            info.memory.expansion_size,
        )?;

        Ok(Self {
            format: info.format,
            allocator,
            views,
            bind,
        })
    }

    /// Create a texture and one slot in every configured descriptor
    /// table, all at the same index.
    pub fn create_texture(
        &mut self,
        width: u32,
        height: u32,
        array_layers: u16,
        mip_levels: u16,
        sample_count: u8,
        sample_quality: u8,
        clear: Option<ClearValue>,
        replacements: &TextureReplacementViews,
    ) -> Result<ResourceIndex> {
        let desc = TextureDesc {
            format: self.format,
            width,
            height,
            array_layers,
            mip_levels,
            sample_count,
            sample_quality,
            bind: self.bind,
            clear,
        };
        let identifier = self.allocator.allocate(&desc, ResourceState::COMMON)?;
        let handle = self.allocator.handle(identifier)?;

        let mut descriptor: Option<usize> = None;
        for kind in ViewKind::ALL {
            let Some(table) = self.views[kind.index()].as_mut() else {
                continue;
            };
            let view = Self::resolve_view(table.defaults, replacements, &handle);
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

    /// Destroy the texture and release its descriptor slots.
    pub fn remove(&mut self, index: ResourceIndex) -> Result<()> {
        for table in self.views.iter_mut().flatten() {
            table.allocator.deallocate(index.descriptor)?;
        }
        self.allocator.deallocate(index.identifier)
    }

    pub fn handle(&self, index: ResourceIndex) -> Result<TextureHandle> {
        self.allocator.handle(index.identifier)
    }

    /// Description the texture was created with.
    pub fn desc(&self, index: ResourceIndex) -> Result<TextureDesc> {
        self.allocator.desc(index.identifier)
    }

    pub fn current_state(&self, index: ResourceIndex) -> Result<ResourceState> {
        self.allocator.current_state(index.identifier)
    }

    /// Per-resource transition barrier; `None` when the state is
    /// unchanged and no before-state is forced.
    pub fn create_transition_barrier(
        &mut self,
        index: ResourceIndex,
        new_state: ResourceState,
        assumed_initial: Option<ResourceState>,
    ) -> Result<Option<BarrierDesc>> {
        self.allocator
            .create_transition_barrier(index.identifier, new_state, assumed_initial)
    }

    /// Transition every texture in the pool.
    pub fn transition_all(
        &mut self,
        barriers: &mut Vec<BarrierDesc>,
        new_state: ResourceState,
        assumed_initial: Option<ResourceState>,
    ) {
        self.allocator
            .transition_all(barriers, new_state, assumed_initial);
    }

    #[must_use]
    pub fn format(&self) -> Format {
        self.format
    }

    // ── Internals ──────────────────────────────────────────────────────────

    fn resolve_view(
        defaults: TextureViewDefaultDesc,
        replacements: &TextureReplacementViews,
        handle: &TextureHandle,
    ) -> ResourceView {
        let desc = match defaults {
            TextureViewDefaultDesc::Shader(default) => {
                ViewDesc::TextureShader(replacements.sr.unwrap_or(default))
            }
            TextureViewDefaultDesc::Unordered(default) => {
                ViewDesc::TextureUnordered(replacements.ua.unwrap_or(default))
            }
            TextureViewDefaultDesc::Target(default) => {
                ViewDesc::TextureTarget(replacements.rt.unwrap_or(default))
            }
            TextureViewDefaultDesc::DepthStencil(default) => {
                ViewDesc::TextureDepthStencil(replacements.ds.unwrap_or(default))
            }
        };
        ResourceView {
            resource: Some(handle.resource),
            desc,
        }
    }
}

impl ResourceComponent for Texture2dComponent {
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
