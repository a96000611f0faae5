//! Barrier Planner
//!
//! The planner consumes jobs in order. Each job declares resource
//! requests during its setup phase; the planner answers with the minimum
//! barrier set:
//!
//! - A request that changes a resource's state appends a transition to
//!   the current job and remembers where it landed.
//! - A request that only widens a read state merges into that prior
//!   transition's after-state instead of emitting a new barrier.
//! - First use promotes implicitly from the common-state baseline and
//!   emits nothing.
//!
//! Finalization emits the end-texture hand-off transition and the
//! post-execution barriers returning category resources to their common
//! state, then yields the immutable [`QueuePlan`] the render queue runs
//! every frame.

use std::cell::RefCell;
use std::rc::Rc;

use rustc_hash::FxHashMap;

use crate::errors::{QuarryError, Result};
use crate::frame::{CategoryId, CategoryKind, TransientResourceIndex};
use crate::gpu::ResourceState;

use super::barrier::{QueuedBarrier, QueuedResourceId};
use super::job::QueueJob;
use super::render_queue::EnqueuedJob;
use super::resource::FrameResource;

#[derive(Default)]
struct TrackedResource {
    resource: FrameResource,
    /// `(job, barrier)` of the last transition, if any.
    last_change: Option<(usize, usize)>,
    last_access: Option<usize>,
}

/// The finalized product of a planner run.
pub struct QueuePlan {
    pub jobs: Vec<EnqueuedJob>,
    pub post_execution_barriers: Vec<QueuedBarrier>,
    /// Initial state per transient, in creation order; the blackboard
    /// recreates the resources with these states every frame.
    pub transient_initial_states: Vec<ResourceState>,
    pub end_texture: Option<TransientResourceIndex>,
}

/// Builds a [`QueuePlan`] from jobs and their resource requests.
#[derive(Default)]
pub struct QueuePlanner {
    transients: Vec<TrackedResource>,
    categories: FxHashMap<CategoryId, TrackedResource>,
    jobs: Vec<EnqueuedJob>,
}

impl QueuePlanner {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a transient resource with its initial state. The state
    /// primes the tracker without emitting a barrier.
    pub fn create_transient_resource(
        &mut self,
        initial_state: ResourceState,
    ) -> TransientResourceIndex {
        let mut tracked = TrackedResource::default();
        tracked.resource.update_state(initial_state);
        self.transients.push(tracked);
        self.transients.len() - 1
    }

    /// Append a job and run its setup phase.
    pub fn add_job(&mut self, job: Rc<RefCell<dyn QueueJob>>) -> Result<()> {
        self.jobs.push(EnqueuedJob::new(job.clone()));
        job.borrow().setup_queue(self)
    }

    /// Request a transient resource in `needed` state for the current
    /// job.
    pub fn request_transient_resource(
        &mut self,
        index: TransientResourceIndex,
        needed: ResourceState,
    ) -> Result<()> {
        if index >= self.transients.len() {
            return Err(QuarryError::NotFound(format!(
                "transient resource {index} was never created"
            )));
        }
        self.handle_request(RequestTarget::Transient(index), needed)
    }

    /// Request a category resource pool in `needed` state for the
    /// current job.
    pub fn request_category_resource(
        &mut self,
        id: CategoryId,
        needed: ResourceState,
    ) -> Result<()> {
        self.categories.entry(id).or_default();
        self.handle_request(RequestTarget::Category(id), needed)
    }

    /// Emit the end-texture and post-execution barriers and produce the
    /// final plan. `end_texture` is the texture the swapchain copy reads.
    pub fn finalize(mut self, end_texture: Option<TransientResourceIndex>) -> Result<QueuePlan> {
        let mut post_execution = Vec::new();

        if let Some(end) = end_texture {
            let tracked = self.transients.get_mut(end).ok_or_else(|| {
                QuarryError::NotFound(format!("end texture {end} was never created"))
            })?;
            if let Some((before, after)) = tracked.resource.update_state(ResourceState::COPY_SOURCE)
            {
                post_execution.push(QueuedBarrier::transition(
                    QueuedResourceId::Transient(end),
                    before,
                    after,
                ));
            }
        }

        // Category resources return to the common state so the next
        // queue build can assume the promotion baseline again. That
        // covers pools that were explicitly transitioned as well as
        // non-buffer pools promoted into a write state.
        for (id, tracked) in &self.categories {
            let needs_reset = tracked.last_change.is_some()
                || (tracked.resource.is_in_write_state() && id.kind != CategoryKind::Buffer);
            if needs_reset {
                post_execution.push(QueuedBarrier::transition(
                    QueuedResourceId::Category(*id),
                    tracked.resource.current_state(),
                    ResourceState::COMMON,
                ));
            }
        }

        Ok(QueuePlan {
            jobs: self.jobs,
            post_execution_barriers: post_execution,
            transient_initial_states: self
                .transients
                .iter()
                .map(|tracked| tracked.resource.initial_state())
                .collect(),
            end_texture,
        })
    }

    /// Number of transients declared so far.
    #[must_use]
    pub fn transient_count(&self) -> usize {
        self.transients.len()
    }

    /// Index of the last job that accessed a transient, if any job did.
    #[must_use]
    pub fn transient_last_access(&self, index: TransientResourceIndex) -> Option<usize> {
        self.transients.get(index).and_then(|tracked| tracked.last_access)
    }

    /// Number of jobs added so far.
    #[must_use]
    pub fn job_count(&self) -> usize {
        self.jobs.len()
    }

    // ── Internals ──────────────────────────────────────────────────────────

    fn handle_request(&mut self, target: RequestTarget, needed: ResourceState) -> Result<()> {
        let current_job = self.jobs.len().checked_sub(1).ok_or_else(|| {
            QuarryError::InvalidConfiguration(
                "resource requested before any job was added".into(),
            )
        })?;

        let (id, tracked) = match target {
            RequestTarget::Transient(index) => (
                QueuedResourceId::Transient(index),
                &mut self.transients[index],
            ),
            RequestTarget::Category(category) => (
                QueuedResourceId::Category(category),
                self.categories.get_mut(&category).expect("entry inserted"),
            ),
        };

        if let Some((before, after)) = tracked.resource.update_state(needed) {
            let barrier_index =
                self.jobs[current_job].add_barrier(QueuedBarrier::transition(id, before, after));
            tracked.last_change = Some((current_job, barrier_index));
        } else if let Some((job, barrier)) = tracked.last_change {
            if needed.is_read_state() {
                self.jobs[job].barrier_mut(barrier).merge_after_state(needed);
            }
        }
        tracked.last_access = Some(current_job);
        Ok(())
    }
}

enum RequestTarget {
    Transient(TransientResourceIndex),
    Category(CategoryId),
}
