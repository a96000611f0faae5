//! Renderer Façade
//!
//! Wires the resource layers into a per-frame pipeline over the fixed
//! three-queue topology (copy / direct / present):
//!
//! 1. Wait for the next frame slot's previous use to finish; reset its
//!    command recorders.
//! 2. Swap every frame-multiplexed structure.
//! 3. CPU-only preparation and setup (costs, transient descriptions,
//!    descriptor publication).
//! 4. Record category aliasing/upload work on the copy queue; the
//!    direct queue waits on its fence.
//! 5. Record transient discards and clears on the direct queue.
//! 6. Record the render-queue jobs; the present queue waits on the
//!    jobs-done fence.
//! 7. Copy the end texture to the backbuffer behind the post-execution
//!    barriers, present, and signal end-of-frame.
//!
//! The host side is single-threaded; the GPU overlaps through the fence
//! edges above and the N-deep frame ring.

pub mod settings;
pub mod sync;

pub use settings::{
    BlackboardSettings, DebugSettings, DescriptorHeapSettings, DeviceSettings,
    InformationSettings, RenderSettings, WindowSettings,
};
pub use sync::{CommandRecorder, ManagedFence};

use std::rc::Rc;

use crate::errors::{QuarryError, Result};
use crate::frame::{
    Blackboard, CategoryRegistry, FrameRing, ManagedDescriptorHeap, TransientDesc,
    TransientResourceIndex,
};
use crate::gpu::{BarrierDesc, DeviceRef, GpuSwapchain, QueueKind, ResourceState};
use crate::queue::{PreparationContext, QueuePlanner, RenderQueue, ResourceContext};

use crate::alloc::{HeapPool, HeapPoolRef};

/// The per-frame render pipeline over an explicit-heap device.
pub struct Renderer {
    device: DeviceRef,
    swapchain: Rc<dyn GpuSwapchain>,
    settings: RenderSettings,
    pool: HeapPoolRef,
    descriptor_heap: ManagedDescriptorHeap,
    categories: CategoryRegistry,
    blackboard: Blackboard,
    queue: RenderQueue,
    global_transient_descs: Vec<(TransientResourceIndex, TransientDesc)>,
    end_of_frame_fences: FrameRing<ManagedFence>,
    update_fences: FrameRing<ManagedFence>,
    jobs_done_fences: FrameRing<ManagedFence>,
    update_recorders: FrameRing<CommandRecorder>,
    main_recorders: FrameRing<CommandRecorder>,
    backbuffer_states: Vec<ResourceState>,
}

impl Renderer {
    /// Build the façade over an already created device and swapchain.
    pub fn new(
        device: DeviceRef,
        swapchain: Rc<dyn GpuSwapchain>,
        settings: RenderSettings,
    ) -> Result<Self> {
        settings.validate()?;
        let frames = settings.frames_in_flight;

        let pool = HeapPool::new_shared(device.clone());
        let descriptor_heap = ManagedDescriptorHeap::new(
            device.clone(),
            frames,
            settings.descriptor_heap.start_descriptors_per_frame,
        )?;
        let categories =
            CategoryRegistry::new(device.clone(), pool.clone(), frames, &settings.categories)?;
        let blackboard = Blackboard::new(
            device.clone(),
            pool.clone(),
            frames,
            settings.blackboard.local,
            settings.blackboard.transient,
        )?;

        let end_of_frame_fences =
            FrameRing::try_new(frames, |_| ManagedFence::new(device.clone(), 0))?;
        let update_fences = FrameRing::try_new(frames, |_| ManagedFence::new(device.clone(), 0))?;
        let jobs_done_fences =
            FrameRing::try_new(frames, |_| ManagedFence::new(device.clone(), 0))?;
        let update_recorders = FrameRing::try_new(frames, |_| {
            CommandRecorder::new(device.clone(), QueueKind::Copy)
        })?;
        let main_recorders = FrameRing::try_new(frames, |_| {
            CommandRecorder::new(device.clone(), QueueKind::Direct)
        })?;

        let backbuffer_states = vec![ResourceState::PRESENT; swapchain.frame_count()];
        log::debug!(
            "renderer initialized: {frames} frames in flight, {} backbuffers",
            backbuffer_states.len()
        );

        Ok(Self {
            device,
            swapchain,
            settings,
            pool,
            descriptor_heap,
            categories,
            blackboard,
            queue: RenderQueue::new(),
            global_transient_descs: Vec::new(),
            end_of_frame_fences,
            update_fences,
            jobs_done_fences,
            update_recorders,
            main_recorders,
            backbuffer_states,
        })
    }

    // ── Accessors ──────────────────────────────────────────────────────────

    #[must_use]
    pub fn device(&self) -> &DeviceRef {
        &self.device
    }

    #[must_use]
    pub fn categories(&self) -> &CategoryRegistry {
        &self.categories
    }

    pub fn categories_mut(&mut self) -> &mut CategoryRegistry {
        &mut self.categories
    }

    #[must_use]
    pub fn descriptor_heap(&self) -> &ManagedDescriptorHeap {
        &self.descriptor_heap
    }

    #[must_use]
    pub fn heap_pool(&self) -> &HeapPoolRef {
        &self.pool
    }

    #[must_use]
    pub fn frames_in_flight(&self) -> usize {
        self.settings.frames_in_flight
    }

    #[must_use]
    pub fn queue(&self) -> &RenderQueue {
        &self.queue
    }

    // ── Queue programming ──────────────────────────────────────────────────

    /// Build and install a queue plan. The builder declares transients,
    /// adds jobs and returns the end-texture index the swapchain copy
    /// reads from.
    pub fn plan_queue(
        &mut self,
        build: impl FnOnce(&mut QueuePlanner) -> Result<Option<TransientResourceIndex>>,
    ) -> Result<()> {
        let mut planner = QueuePlanner::new();
        let end_texture = build(&mut planner)?;
        self.queue.set_plan(planner.finalize(end_texture)?);
        Ok(())
    }

    /// Drop the installed plan.
    pub fn clear_queue(&mut self) {
        self.queue.clear();
        self.global_transient_descs.clear();
    }

    /// Provide a façade-owned transient description (typically the end
    /// texture) applied before the jobs' own resource info each frame.
    pub fn set_global_transient_desc(
        &mut self,
        index: TransientResourceIndex,
        desc: TransientDesc,
    ) {
        self.global_transient_descs
            .retain(|(existing, _)| *existing != index);
        self.global_transient_descs.push((index, desc));
    }

    // ── Frame loop ─────────────────────────────────────────────────────────

    /// Block on the swapchain's frame-latency gate.
    pub fn wait_for_available_frame(&self) -> Result<()> {
        self.swapchain.wait_for_latency()
    }

    /// Run one frame of the pipeline.
    pub fn render(&mut self) -> Result<()> {
        self.begin_frame()?;
        self.prepare_and_setup()?;
        self.initialize_and_update_categories()?;
        self.discard_and_clear_transients()?;
        self.execute_render_queue()?;
        self.finish_frame()
    }

    /// Wait until every in-flight frame has fully retired.
    pub fn flush(&self) {
        for fence in self.end_of_frame_fences.iter() {
            while !fence.completed() {
                std::hint::spin_loop();
            }
        }
    }

    // ── Frame steps ────────────────────────────────────────────────────────

    fn begin_frame(&mut self) -> Result<()> {
        // The slot about to become active last signaled its end-of-frame
        // fence N frames ago; recording may not touch it earlier.
        while !self.end_of_frame_fences.next().completed() {
            std::hint::spin_loop();
        }
        self.update_recorders.next_mut().reset()?;
        self.main_recorders.next_mut().reset()?;

        self.descriptor_heap.swap_frame();
        self.categories.swap_frame()?;
        self.blackboard.swap_frame();
        self.end_of_frame_fences.swap_frame();
        self.update_fences.swap_frame();
        self.jobs_done_fences.swap_frame();
        self.update_recorders.swap_frame();
        self.main_recorders.swap_frame();
        Ok(())
    }

    fn prepare_and_setup(&mut self) -> Result<()> {
        self.categories
            .update_descriptor_heap(&mut self.descriptor_heap)?;
        {
            let context = PreparationContext {
                descriptor_heap: &self.descriptor_heap,
            };
            self.queue.prepare_frame(1, &context)?;
        }
        self.queue.set_resource_info(&self.global_transient_descs)?;
        self.queue.setup_transient_resources(&mut self.blackboard)?;
        self.descriptor_heap.add_global_descriptors(
            self.blackboard.transient_shader_bindable_base(),
            self.blackboard.transient_shader_bindable_count() as u32,
        )?;
        self.descriptor_heap.upload_current_frame_heap()
    }

    fn initialize_and_update_categories(&mut self) -> Result<()> {
        let list = self.update_recorders.active().active_list();

        let mut barriers = Vec::new();
        self.blackboard.initialize_barriers(&mut barriers);
        if !barriers.is_empty() {
            self.device.cmd_resource_barrier(list, &barriers)?;
        }
        self.categories.activate_new_categories(list)?;
        self.categories.update_categories(list)?;

        self.update_recorders.active_mut().finish_active_list(false)?;
        self.update_recorders.active_mut().execute(QueueKind::Copy)?;
        self.update_fences.active_mut().signal(QueueKind::Copy)?;
        self.update_fences.active().wait_gpu(QueueKind::Direct)
    }

    fn discard_and_clear_transients(&mut self) -> Result<()> {
        let list = self.main_recorders.active().active_list();
        self.blackboard.discard_and_clear_resources(list)?;
        self.main_recorders.active_mut().finish_active_list(true)?;
        self.main_recorders.active_mut().execute(QueueKind::Direct)
    }

    fn execute_render_queue(&mut self) -> Result<()> {
        let list = self.main_recorders.active().active_list();
        self.device
            .cmd_set_descriptor_heap(list, self.descriptor_heap.shader_visible_heap())?;

        {
            let mut context = ResourceContext {
                device: &self.device,
                descriptor_heap: &self.descriptor_heap,
                categories: &mut self.categories,
                blackboard: &mut self.blackboard,
            };
            self.queue.execute_jobs(&[list], &mut context)?;
        }
        self.blackboard.upload_local_data()?;

        self.main_recorders.active_mut().finish_active_list(true)?;
        self.main_recorders.active_mut().execute(QueueKind::Direct)?;
        self.jobs_done_fences.active_mut().signal(QueueKind::Direct)?;
        self.jobs_done_fences.active().wait_gpu(QueueKind::Present)
    }

    fn finish_frame(&mut self) -> Result<()> {
        let list = self.main_recorders.active().active_list();
        let backbuffer_index = self.swapchain.current_index();
        let backbuffer = self.swapchain.backbuffer(backbuffer_index);

        let mut barriers =
            vec![self.transition_backbuffer(backbuffer_index, ResourceState::COPY_DEST)];
        {
            let mut context = ResourceContext {
                device: &self.device,
                descriptor_heap: &self.descriptor_heap,
                categories: &mut self.categories,
                blackboard: &mut self.blackboard,
            };
            for barrier in self.queue.post_execution_barriers() {
                barrier.materialize(&mut context, &mut barriers)?;
            }
        }
        self.device.cmd_resource_barrier(list, &barriers)?;

        if let Some(end) = self.queue.end_texture() {
            let source = self.blackboard.transient_resource(end)?;
            self.device.cmd_copy_resource(list, source, backbuffer)?;
        }

        let present = self.transition_backbuffer(backbuffer_index, ResourceState::PRESENT);
        self.device.cmd_resource_barrier(list, &[present])?;

        self.main_recorders.active_mut().finish_active_list(false)?;
        self.main_recorders.active_mut().execute(QueueKind::Present)?;
        self.swapchain
            .present()
            .map_err(|err| QuarryError::fatal(format!("present failed: {err}")))?;
        self.end_of_frame_fences
            .active_mut()
            .signal(QueueKind::Present)
    }

    fn transition_backbuffer(&mut self, index: usize, new_state: ResourceState) -> BarrierDesc {
        let before = self.backbuffer_states[index];
        self.backbuffer_states[index] = new_state;
        BarrierDesc::Transition {
            resource: self.swapchain.backbuffer(index),
            before,
            after: new_state,
        }
    }
}

impl Drop for Renderer {
    fn drop(&mut self) {
        self.flush();
    }
}
