#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::too_many_arguments)]

pub mod alloc;
pub mod component;
pub mod errors;
pub mod frame;
pub mod gpu;
pub mod queue;
pub mod renderer;

pub use alloc::{AllocationStrategy, Arena, HeapPool, StableVec};
pub use component::{ResourceComponent, ResourceIndex, UpdateKind};
pub use errors::{QuarryError, Result};
pub use frame::{Blackboard, CategoryRegistry, FrameRing, ManagedDescriptorHeap};
pub use gpu::{
    BarrierDesc, BindFlags, DeviceRef, Format, GpuDevice, GpuSwapchain, HeapKind, QueueKind,
    ResourceState, ViewKind,
};
pub use queue::{QueueJob, QueuePlanner, RenderQueue};
pub use renderer::{RenderSettings, Renderer};
