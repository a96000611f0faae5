//! External Graphics API Boundary
//!
//! The core manages memory, descriptors and barriers for an explicit-heap
//! graphics API (placed resources, descriptor tables, resource-state
//! transitions, command-list recording). This module defines the typed
//! surface the core consumes:
//!
//! - Plain-data descriptions: [`TextureDesc`], view descriptions,
//!   [`ResourceState`], [`BarrierDesc`], …
//! - The object-safe [`GpuDevice`] and [`GpuSwapchain`] traits
//! - [`headless`]: a complete in-memory backend used by the test suite
//!   and by headless tooling
//!
//! All GPU objects are `Copy` ids minted by the backend. The core-side
//! owner of each id is responsible for the matching destroy call; the
//! frame-pipelined layers above delay those calls until no in-flight
//! frame can still reference the object.

pub mod device;
pub mod headless;

pub use device::{DeviceRef, GpuDevice, GpuSwapchain};
pub use headless::{
    HeadlessCaps, HeadlessCommand, HeadlessDevice, HeadlessSubmission, HeadlessSwapchain,
};

use bitflags::bitflags;

// ============================================================================
// Object identifiers
// ============================================================================

macro_rules! gpu_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
        pub struct $name(u32);

        impl $name {
            #[must_use]
            pub const fn from_raw(raw: u32) -> Self {
                Self(raw)
            }

            #[must_use]
            pub const fn raw(self) -> u32 {
                self.0
            }
        }
    };
}

gpu_id!(
    /// A device heap: a large block of GPU memory placed resources live in.
    HeapId
);
gpu_id!(
    /// A GPU resource (buffer or texture), placed inside a heap.
    ResourceId
);
gpu_id!(
    /// A descriptor heap: an array of view slots.
    DescriptorHeapId
);
gpu_id!(
    /// A timeline fence.
    FenceId
);
gpu_id!(
    /// A command list owned by one command allocator.
    CommandListId
);

// ============================================================================
// Heaps
// ============================================================================

/// The memory pool a heap is carved from.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum HeapKind {
    /// Device-local memory; not host visible.
    Default,
    /// Host-visible, write-combined upload memory.
    Upload,
    /// Host-visible readback memory.
    Readback,
}

bitflags! {
    /// What a heap is allowed to contain. Used, together with
    /// [`HeapKind`], as the reuse key of the heap pool.
    #[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
    pub struct HeapFlags: u8 {
        const BUFFERS = 1 << 0;
        const TEXTURES = 1 << 1;
        const TARGETS = 1 << 2;
    }
}

// ============================================================================
// Resource states
// ============================================================================

bitflags! {
    /// Resource usage states, modelled after explicit transition-based
    /// APIs. Read states are individual bits and may be combined; write
    /// states are exclusive.
    #[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Default)]
    pub struct ResourceState: u32 {
        /// The common state; resources promote out of it implicitly.
        const COMMON = 0;
        const VERTEX_AND_CONSTANT_BUFFER = 1 << 0;
        const INDEX_BUFFER = 1 << 1;
        const RENDER_TARGET = 1 << 2;
        const UNORDERED_ACCESS = 1 << 3;
        const DEPTH_WRITE = 1 << 4;
        const DEPTH_READ = 1 << 5;
        const NON_PIXEL_SHADER_RESOURCE = 1 << 6;
        const PIXEL_SHADER_RESOURCE = 1 << 7;
        const COPY_DEST = 1 << 8;
        const COPY_SOURCE = 1 << 9;
        const RESOLVE_DEST = 1 << 10;
        const RESOLVE_SOURCE = 1 << 11;
        /// Presentation state; identical to [`ResourceState::COMMON`].
        const PRESENT = 0;
    }
}

impl ResourceState {
    /// States that imply GPU writes. A resource in one of these cannot
    /// share its transition with additional read states.
    #[must_use]
    pub const fn is_write_state(self) -> bool {
        self.intersects(
            ResourceState::RENDER_TARGET
                .union(ResourceState::UNORDERED_ACCESS)
                .union(ResourceState::DEPTH_WRITE)
                .union(ResourceState::COPY_DEST)
                .union(ResourceState::RESOLVE_DEST),
        )
    }

    /// Non-common, non-write states. These may be merged bitwise into an
    /// existing transition's after-state.
    #[must_use]
    pub const fn is_read_state(self) -> bool {
        !self.is_empty() && !self.is_write_state()
    }
}

// ============================================================================
// Formats and texture descriptions
// ============================================================================

/// Texture and typed-buffer formats used by the core.
///
/// Only formats the resource layer itself needs to reason about are
/// listed; backends may support more through their own surfaces.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Default)]
pub enum Format {
    #[default]
    Unknown,
    R8Unorm,
    Rgba8Unorm,
    Bgra8Unorm,
    Rg16Float,
    Rgba16Float,
    R32Float,
    Rg32Float,
    Rgba32Float,
    Depth32Float,
    Depth24UnormStencil8,
}

impl Format {
    /// Bytes per texel. Zero for `Unknown`.
    #[must_use]
    pub const fn texel_size(self) -> u32 {
        match self {
            Format::Unknown => 0,
            Format::R8Unorm => 1,
            Format::Rgba8Unorm | Format::Bgra8Unorm | Format::R32Float | Format::Rg16Float => 4,
            Format::Rgba16Float | Format::Rg32Float => 8,
            Format::Rgba32Float => 16,
            Format::Depth32Float | Format::Depth24UnormStencil8 => 4,
        }
    }

    #[must_use]
    pub const fn has_depth(self) -> bool {
        matches!(self, Format::Depth32Float | Format::Depth24UnormStencil8)
    }

    #[must_use]
    pub const fn has_stencil(self) -> bool {
        matches!(self, Format::Depth24UnormStencil8)
    }
}

/// Optimal clear value carried by render-target and depth-stencil
/// resources.
#[derive(Clone, Copy, PartialEq, Debug)]
pub enum ClearValue {
    Color([f32; 4]),
    DepthStencil { depth: f32, stencil: u8 },
}

bitflags! {
    /// The view kinds a resource may be bound through. Determines the
    /// bind flags of the placed resource and which descriptor allocators
    /// a component must configure.
    #[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Default)]
    pub struct BindFlags: u8 {
        const SHADER_RESOURCE = 1 << 0;
        const UNORDERED_ACCESS = 1 << 1;
        const RENDER_TARGET = 1 << 2;
        const DEPTH_STENCIL = 1 << 3;
    }
}

/// Description of a 2D texture (optionally an array, optionally
/// multisampled).
#[derive(Clone, Copy, PartialEq, Debug)]
pub struct TextureDesc {
    pub format: Format,
    pub width: u32,
    pub height: u32,
    pub array_layers: u16,
    pub mip_levels: u16,
    pub sample_count: u8,
    pub sample_quality: u8,
    pub bind: BindFlags,
    pub clear: Option<ClearValue>,
}

impl TextureDesc {
    /// A single-layer, single-mip 2D texture with default sampling.
    #[must_use]
    pub fn texture2d(format: Format, width: u32, height: u32) -> Self {
        Self {
            format,
            width,
            height,
            array_layers: 1,
            mip_levels: 1,
            sample_count: 1,
            sample_quality: 0,
            bind: BindFlags::SHADER_RESOURCE,
            clear: None,
        }
    }

    #[must_use]
    pub fn with_bind(mut self, bind: BindFlags) -> Self {
        self.bind = bind;
        self
    }

    #[must_use]
    pub fn with_mips(mut self, mip_levels: u16) -> Self {
        self.mip_levels = mip_levels;
        self
    }

    #[must_use]
    pub fn with_layers(mut self, array_layers: u16) -> Self {
        self.array_layers = array_layers;
        self
    }

    #[must_use]
    pub fn with_clear(mut self, clear: ClearValue) -> Self {
        self.clear = Some(clear);
        self
    }

    #[must_use]
    pub fn subresource_count(&self) -> u32 {
        u32::from(self.array_layers) * u32::from(self.mip_levels)
    }

    /// Extent of one mip level.
    #[must_use]
    pub fn mip_extent(&self, mip: u16) -> (u32, u32) {
        ((self.width >> mip).max(1), (self.height >> mip).max(1))
    }

    /// Packed byte size of one subresource (no row padding).
    #[must_use]
    pub fn subresource_size(&self, subresource: u32) -> u64 {
        let mip = (subresource % u32::from(self.mip_levels)) as u16;
        let (w, h) = self.mip_extent(mip);
        u64::from(w) * u64::from(h) * u64::from(self.format.texel_size())
    }

    /// Packed byte size of the whole texture across all subresources.
    #[must_use]
    pub fn total_packed_size(&self) -> u64 {
        (0..self.subresource_count())
            .map(|s| self.subresource_size(s))
            .sum()
    }
}

/// Size and alignment the device requires for placing a texture.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct AllocationRequirements {
    pub size: u64,
    pub alignment: u64,
}

// ============================================================================
// Views and descriptors
// ============================================================================

/// The five view kinds a descriptor slot may hold.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum ViewKind {
    Cbv = 0,
    Srv = 1,
    Uav = 2,
    Rtv = 3,
    Dsv = 4,
}

impl ViewKind {
    pub const ALL: [ViewKind; 5] = [
        ViewKind::Cbv,
        ViewKind::Srv,
        ViewKind::Uav,
        ViewKind::Rtv,
        ViewKind::Dsv,
    ];

    #[must_use]
    pub const fn index(self) -> usize {
        self as usize
    }

    /// Which descriptor heap kind slots of this view kind live in.
    #[must_use]
    pub const fn heap_kind(self) -> DescriptorHeapKind {
        match self {
            ViewKind::Cbv | ViewKind::Srv | ViewKind::Uav => DescriptorHeapKind::ShaderBindable,
            ViewKind::Rtv => DescriptorHeapKind::RenderTarget,
            ViewKind::Dsv => DescriptorHeapKind::DepthStencil,
        }
    }
}

/// Descriptor heap categories of the underlying API.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum DescriptorHeapKind {
    /// CBV/SRV/UAV slots; may be shader visible.
    ShaderBindable,
    /// Render-target views; never shader visible.
    RenderTarget,
    /// Depth-stencil views; never shader visible.
    DepthStencil,
}

// ── High-level view descriptions ─────────────────────────────────────────────
//
// These are what callers hand to components; they are stored per slot so a
// descriptor can be rebuilt against a different underlying resource when a
// suballocator grows or reshuffles.

/// Constant-buffer view over a buffer region.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub struct ConstantBufferViewDesc {
    /// Offset added to the element's byte offset.
    pub byte_offset: i64,
    /// Adjustment added to the element's byte size.
    pub size_modifier: i64,
}

/// Shader-resource view over a buffer element range.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub struct BufferShaderViewDesc {
    pub first_element: u64,
    /// `None` selects all elements of the allocation.
    pub element_count: Option<u64>,
}

/// Unordered-access view over a buffer element range.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub struct BufferUnorderedViewDesc {
    pub first_element: u64,
    pub element_count: Option<u64>,
    pub counter_offset: u64,
}

/// Render-target view over a buffer.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub struct BufferTargetViewDesc {
    pub format: Format,
    pub byte_offset: i64,
    pub element_count: Option<u64>,
}

/// Shader-resource view over a 2D texture.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub struct TextureShaderViewDesc {
    /// `None` uses the resource format.
    pub format: Option<Format>,
    pub most_detailed_mip: u32,
    /// `None` selects all remaining mips.
    pub mip_levels: Option<u32>,
    pub first_layer: u32,
    /// `None` selects all remaining layers.
    pub layer_count: Option<u32>,
    pub cube: bool,
}

/// Unordered-access view over a 2D texture.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub struct TextureUnorderedViewDesc {
    pub format: Option<Format>,
    pub mip_slice: u32,
    pub first_layer: u32,
    pub layer_count: Option<u32>,
}

/// Render-target view over a 2D texture.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub struct TextureTargetViewDesc {
    pub format: Option<Format>,
    pub mip_slice: u32,
    pub first_layer: u32,
    pub layer_count: Option<u32>,
}

/// Depth-stencil view over a 2D texture.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub struct TextureDepthStencilViewDesc {
    pub format: Option<Format>,
    pub mip_slice: u32,
    pub first_layer: u32,
    pub layer_count: Option<u32>,
    pub read_only: bool,
}

// ── Resolved views ───────────────────────────────────────────────────────────

/// A fully resolved view description, ready to be written into a
/// descriptor slot by the device.
#[derive(Clone, Copy, PartialEq, Debug)]
pub enum ViewDesc {
    Constant {
        /// GPU virtual address of the buffer region.
        location: u64,
        size: u64,
    },
    BufferShader {
        first_element: u64,
        element_count: u64,
        element_size: u32,
    },
    BufferUnordered {
        first_element: u64,
        element_count: u64,
        element_size: u32,
        counter_offset: u64,
    },
    BufferTarget {
        format: Format,
        first_element: u64,
        element_count: u64,
    },
    TextureShader(TextureShaderViewDesc),
    TextureUnordered(TextureUnorderedViewDesc),
    TextureTarget(TextureTargetViewDesc),
    TextureDepthStencil(TextureDepthStencilViewDesc),
}

impl ViewDesc {
    #[must_use]
    pub const fn kind(&self) -> ViewKind {
        match self {
            ViewDesc::Constant { .. } => ViewKind::Cbv,
            ViewDesc::BufferShader { .. } | ViewDesc::TextureShader(_) => ViewKind::Srv,
            ViewDesc::BufferUnordered { .. } | ViewDesc::TextureUnordered(_) => ViewKind::Uav,
            ViewDesc::BufferTarget { .. } | ViewDesc::TextureTarget(_) => ViewKind::Rtv,
            ViewDesc::TextureDepthStencil(_) => ViewKind::Dsv,
        }
    }
}

/// What one descriptor slot holds: an optional underlying resource plus
/// the resolved description. Constant-buffer views address memory
/// directly and carry no resource id.
#[derive(Clone, Copy, PartialEq, Debug)]
pub struct ResourceView {
    pub resource: Option<ResourceId>,
    pub desc: ViewDesc,
}

// ============================================================================
// Barriers, copies, queues
// ============================================================================

/// A device-level resource barrier.
#[derive(Clone, Copy, PartialEq, Debug)]
pub enum BarrierDesc {
    /// State transition of a whole resource.
    Transition {
        resource: ResourceId,
        before: ResourceState,
        after: ResourceState,
    },
    /// Aliasing activation: `after` becomes the live resource on its
    /// memory. `before` of `None` activates over undefined contents.
    Aliasing {
        before: Option<ResourceId>,
        after: ResourceId,
    },
    /// UAV write visibility barrier.
    Uav { resource: ResourceId },
}

/// Region description for a buffer→texture copy. Rows in the source
/// buffer are laid out with `row_pitch` bytes between row starts.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct TextureCopyRegion {
    pub width: u32,
    pub height: u32,
    pub depth: u32,
    pub dst_x: u32,
    pub dst_y: u32,
    pub dst_z: u32,
    pub row_pitch: u64,
    pub texel_size: u32,
}

/// The fixed three-queue topology the orchestrator drives.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum QueueKind {
    Copy,
    Direct,
    Present,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_states_are_exclusive() {
        assert!(ResourceState::RENDER_TARGET.is_write_state());
        assert!(ResourceState::UNORDERED_ACCESS.is_write_state());
        assert!(ResourceState::DEPTH_WRITE.is_write_state());
        assert!(ResourceState::COPY_DEST.is_write_state());
        assert!(!ResourceState::PIXEL_SHADER_RESOURCE.is_write_state());
        assert!(!ResourceState::COMMON.is_write_state());
        assert!(!ResourceState::COMMON.is_read_state());

        let merged =
            ResourceState::PIXEL_SHADER_RESOURCE | ResourceState::NON_PIXEL_SHADER_RESOURCE;
        assert!(merged.is_read_state());
    }

    #[test]
    fn mip_extents_round_down_to_one() {
        let desc = TextureDesc::texture2d(Format::Rgba8Unorm, 16, 4).with_mips(6);
        assert_eq!(desc.mip_extent(0), (16, 4));
        assert_eq!(desc.mip_extent(2), (4, 1));
        assert_eq!(desc.mip_extent(5), (1, 1));
    }

    #[test]
    fn packed_sizes_sum_subresources() {
        let desc = TextureDesc::texture2d(Format::Rgba8Unorm, 4, 4).with_mips(2);
        // 4x4 + 2x2 texels at 4 bytes each.
        assert_eq!(desc.total_packed_size(), (16 + 4) * 4);
    }
}
