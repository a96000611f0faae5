//! Render Queue Execution
//!
//! Runs a finalized [`QueuePlan`](super::planner::QueuePlan) every
//! frame: preparation and execution are batched by job cost, and each
//! job's recorded barriers are materialized against the live frame and
//! submitted in a single call before the job records its work.

use std::cell::RefCell;
use std::rc::Rc;

use crate::errors::{QuarryError, Result};
use crate::frame::{Blackboard, TransientResourceIndex};
use crate::gpu::{CommandListId, ResourceState};

use super::barrier::QueuedBarrier;
use super::job::{PreparationContext, QueueJob, ResourceContext, SetupContext};
use super::planner::QueuePlan;

/// A job plus the barriers the planner assigned to it.
pub struct EnqueuedJob {
    job: Rc<RefCell<dyn QueueJob>>,
    barriers: Vec<QueuedBarrier>,
}

impl EnqueuedJob {
    #[must_use]
    pub fn new(job: Rc<RefCell<dyn QueueJob>>) -> Self {
        Self {
            job,
            barriers: Vec::new(),
        }
    }

    /// Append a barrier, returning its index for later merging.
    pub fn add_barrier(&mut self, barrier: QueuedBarrier) -> usize {
        self.barriers.push(barrier);
        self.barriers.len() - 1
    }

    pub fn barrier_mut(&mut self, index: usize) -> &mut QueuedBarrier {
        &mut self.barriers[index]
    }

    #[must_use]
    pub fn barriers(&self) -> &[QueuedBarrier] {
        &self.barriers
    }

    #[must_use]
    pub fn job(&self) -> &Rc<RefCell<dyn QueueJob>> {
        &self.job
    }

    /// Materialize and submit the job's barriers, then record the job.
    fn process(&self, list: CommandListId, context: &mut ResourceContext<'_>) -> Result<()> {
        let mut barriers = Vec::with_capacity(self.barriers.len());
        for barrier in &self.barriers {
            barrier.materialize(context, &mut barriers)?;
        }
        if !barriers.is_empty() {
            context.device.cmd_resource_barrier(list, &barriers)?;
        }
        self.job.borrow_mut().execute_frame(list, context)
    }
}

/// Ordered jobs, their post-execution barriers, and the per-frame
/// setup state.
#[derive(Default)]
pub struct RenderQueue {
    jobs: Vec<EnqueuedJob>,
    post_execution_barriers: Vec<QueuedBarrier>,
    transient_initial_states: Vec<ResourceState>,
    end_texture: Option<TransientResourceIndex>,
    setup: SetupContext,
}

impl RenderQueue {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a finalized plan, replacing any previous one.
    pub fn set_plan(&mut self, plan: QueuePlan) {
        self.jobs = plan.jobs;
        self.post_execution_barriers = plan.post_execution_barriers;
        self.transient_initial_states = plan.transient_initial_states;
        self.end_texture = plan.end_texture;
    }

    /// Drop the installed plan.
    pub fn clear(&mut self) {
        self.jobs.clear();
        self.post_execution_barriers.clear();
        self.transient_initial_states.clear();
        self.end_texture = None;
    }

    /// Run the CPU preparation phase, batched into `partitions` groups
    /// of roughly equal preparation cost.
    pub fn prepare_frame(
        &mut self,
        partitions: usize,
        context: &PreparationContext<'_>,
    ) -> Result<()> {
        for enqueued in &self.jobs {
            enqueued.job.borrow_mut().calculate_frame_costs();
        }
        let costs: Vec<u64> = self
            .jobs
            .iter()
            .map(|enqueued| enqueued.job.borrow().preparation_cost().max(1))
            .collect();

        for batch in split_batches(&costs, partitions) {
            for index in batch {
                self.jobs[index].job.borrow_mut().prepare_frame(context)?;
            }
        }
        Ok(())
    }

    /// Collect this frame's transient descriptions, view requests and
    /// local resources. `global_descs` provides descriptions owned by
    /// the façade (e.g. the end texture).
    pub fn set_resource_info(
        &mut self,
        global_descs: &[(TransientResourceIndex, crate::frame::TransientDesc)],
    ) -> Result<()> {
        self.setup.reset(self.transient_initial_states.len());
        for (index, desc) in global_descs {
            self.setup.set_transient_desc(*index, *desc);
        }
        for enqueued in &self.jobs {
            enqueued.job.borrow_mut().set_resource_info(&mut self.setup)?;
        }
        Ok(())
    }

    /// Create this frame's transient resources, views and local
    /// allocations in the blackboard.
    pub fn setup_transient_resources(&self, blackboard: &mut Blackboard) -> Result<()> {
        for (index, initial_state) in self.transient_initial_states.iter().enumerate() {
            let desc = self.setup.transient_desc(index).ok_or_else(|| {
                QuarryError::InvalidConfiguration(format!(
                    "transient resource {index} has no description this frame"
                ))
            })?;
            blackboard.create_transient_resource(desc, *initial_state)?;
        }
        self.setup.create_transient_descriptors(blackboard)?;
        blackboard.set_local_frame_requirement(self.setup.total_local_memory())?;
        for desc in self.setup.local_descs() {
            blackboard.create_local_resource(desc)?;
        }
        Ok(())
    }

    /// Record every job, batched by execution cost across the given
    /// command lists.
    pub fn execute_jobs(
        &self,
        lists: &[CommandListId],
        context: &mut ResourceContext<'_>,
    ) -> Result<()> {
        if lists.is_empty() {
            return Err(QuarryError::InvalidConfiguration(
                "job execution needs at least one command list".into(),
            ));
        }
        let costs: Vec<u64> = self
            .jobs
            .iter()
            .map(|enqueued| enqueued.job.borrow().execution_cost().max(1))
            .collect();

        for (batch_index, batch) in split_batches(&costs, lists.len()).into_iter().enumerate() {
            let list = lists[batch_index.min(lists.len() - 1)];
            for index in batch {
                self.jobs[index].process(list, context)?;
            }
        }
        Ok(())
    }

    /// Barriers returning category resources to their common state,
    /// submitted just before the swapchain copy.
    #[must_use]
    pub fn post_execution_barriers(&self) -> &[QueuedBarrier] {
        &self.post_execution_barriers
    }

    #[must_use]
    pub fn end_texture(&self) -> Option<TransientResourceIndex> {
        self.end_texture
    }

    #[must_use]
    pub fn job_count(&self) -> usize {
        self.jobs.len()
    }

    #[must_use]
    pub fn transient_count(&self) -> usize {
        self.transient_initial_states.len()
    }

    /// The enqueued jobs, for inspection.
    #[must_use]
    pub fn jobs(&self) -> &[EnqueuedJob] {
        &self.jobs
    }
}

/// Split job indices into at most `partitions` contiguous batches of
/// roughly `total_cost / partitions` each; a batch closes once its
/// cumulative cost reaches that share, and the last batch takes any
/// remainder.
fn split_batches(costs: &[u64], partitions: usize) -> Vec<std::ops::Range<usize>> {
    let mut batches = Vec::new();
    if costs.is_empty() {
        return batches;
    }
    let partitions = partitions.max(1);
    let total: u64 = costs.iter().sum();
    let cost_per_batch = total / partitions as u64;

    let mut batch_start = 0;
    let mut batch_cost = 0;
    for (index, cost) in costs.iter().enumerate() {
        batch_cost += cost;
        if batch_cost >= cost_per_batch && batches.len() + 1 < partitions {
            batches.push(batch_start..index + 1);
            batch_start = index + 1;
            batch_cost = 0;
        }
    }
    if batch_start < costs.len() {
        batches.push(batch_start..costs.len());
    }
    batches
}

#[cfg(test)]
mod tests {
    use super::split_batches;

    #[test]
    fn batches_balance_by_cost() {
        // Total 6 over 2 partitions: the first batch closes at cost 3.
        let batches = split_batches(&[1, 2, 1, 1, 1], 2);
        assert_eq!(batches, vec![0..2, 2..5]);
    }

    #[test]
    fn single_partition_takes_everything() {
        let batches = split_batches(&[5, 1, 1], 1);
        assert_eq!(batches, vec![0..3]);
    }

    #[test]
    fn more_partitions_than_jobs() {
        let batches = split_batches(&[1, 1], 4);
        assert_eq!(batches.len(), 2);
    }
}
