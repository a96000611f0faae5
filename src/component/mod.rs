//! Resource Components
//!
//! A component couples one suballocator with up to five descriptor
//! allocators (one per view kind) and exposes create / destroy / get
//! handle over logical indices. The descriptor index of a resource is
//! identical across every view kind the component supports, so a single
//! integer names the resource in CBV, SRV, UAV, RTV and DSV tables
//! alike.
//!
//! [`FrameBufferComponent`] and [`FrameTexture2dComponent`] multiplex N
//! identical components across the in-flight frames, recording lifetime
//! operations and replaying them into each frame's copy on its turn.

pub mod buffer;
pub mod frame;
pub mod mirror;
pub mod texture;

pub use buffer::{
    BufferComponent, BufferComponentInfo, BufferDescriptorInfo, BufferReplacementViews,
    BufferViewDefaultDesc,
};
pub use frame::{FrameBufferComponent, FrameTexture2dComponent};
pub use mirror::{BufferMirror, Texture2dMirror};
pub use texture::{
    Texture2dComponent, TextureComponentInfo, TextureDescriptorInfo, TextureReplacementViews,
    TextureViewDefaultDesc,
};

use crate::alloc::ResourceIdentifier;
use crate::gpu::{DescriptorHeapId, ViewKind};

/// Logical name of a component resource: the suballocation identifier
/// plus the descriptor index shared by all of the component's view
/// kinds.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct ResourceIndex {
    pub identifier: ResourceIdentifier,
    pub descriptor: usize,
}

/// How a component's CPU data mirror tracks resource contents.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub enum UpdateKind {
    /// No CPU copy kept; updates are a no-op.
    #[default]
    None,
    /// CPU data is copied to the GPU once, at first activation.
    InitializeOnce,
    /// The underlying resource is mapped; updates write straight through.
    Mapped,
    /// The CPU buffer is rewritten each frame and copied into each
    /// in-flight frame's resource.
    Copied,
}

impl UpdateKind {
    /// Whether this kind keeps a CPU-side byte mirror at all.
    #[must_use]
    pub const fn keeps_mirror(self) -> bool {
        !matches!(self, UpdateKind::None)
    }

    /// Whether updates flow through the staging uploader (as opposed to
    /// mapped writes or not at all).
    #[must_use]
    pub const fn uses_uploader(self) -> bool {
        matches!(self, UpdateKind::InitializeOnce | UpdateKind::Copied)
    }

    /// Dynamic categories are frame multiplexed; static ones keep a
    /// single copy.
    #[must_use]
    pub const fn is_dynamic(self) -> bool {
        matches!(self, UpdateKind::Mapped | UpdateKind::Copied)
    }
}

/// Where a component's descriptor allocator for one view kind lives.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum DescriptorSource {
    /// The component creates and owns a heap of `capacity` slots.
    Owned { capacity: u32 },
    /// A window of an externally provided heap.
    External {
        heap: DescriptorHeapId,
        start: u32,
        capacity: u32,
    },
}

/// Heap sizing shared by the component suballocators.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct ComponentMemoryInfo {
    pub initial_heap_size: u64,
    pub expansion_size: u64,
}

/// The descriptor-table queries the managed descriptor heap performs
/// against any component when publishing a frame's descriptors.
pub trait ResourceComponent {
    /// Whether the component configures descriptors of `kind`.
    fn has_view_kind(&self, kind: ViewKind) -> bool;

    /// Backing heap and first slot of the component's table for `kind`.
    fn descriptor_base(&self, kind: ViewKind) -> Option<(DescriptorHeapId, u32)>;

    /// Width of the component's descriptor table: the slot span that
    /// preserves the logical-index ↔ slot mapping when copied.
    fn descriptor_count(&self) -> usize;
}
