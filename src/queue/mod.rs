//! Render Queue
//!
//! A declaratively described frame: jobs are added in order, each
//! declaring the resource states it needs. The planner turns those
//! declarations into the minimum set of transition/aliasing/UAV barriers
//! (merging redundant read transitions), and the queue batches job
//! preparation and execution by cost across one or more command lists.

pub mod barrier;
pub mod job;
pub mod planner;
pub mod render_queue;
pub mod resource;

pub use barrier::{QueuedBarrier, QueuedResourceId};
pub use job::{
    PassCost, PreparationContext, QueueJob, ResourceContext, SetupContext, ShaderBindableViewDesc,
};
pub use planner::{QueuePlan, QueuePlanner};
pub use render_queue::{EnqueuedJob, RenderQueue};
pub use resource::FrameResource;
