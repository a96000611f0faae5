//! Barrier Planner and Render Queue Tests
//!
//! Tests for:
//! - Transition emission and read-state merging (S2)
//! - Implicit promotion from the common-state baseline
//! - Post-execution category reset barriers (S6)
//! - Unsupported category aliasing/UAV requests
//! - Transition counting over randomized request sequences

use std::cell::RefCell;
use std::rc::Rc;

use rand::rngs::StdRng;
use rand::{RngExt, SeedableRng};

use quarry::errors::{QuarryError, Result};
use quarry::frame::{CategoryId, CategoryKind};
use quarry::gpu::{CommandListId, ResourceState};
use quarry::queue::{
    QueueJob, QueuePlanner, QueuedBarrier, QueuedResourceId, ResourceContext,
};

/// A job that requests a fixed list of (resource, state) pairs.
struct RequestJob {
    requests: Vec<(QueuedResourceId, ResourceState)>,
}

impl RequestJob {
    fn shared(requests: Vec<(QueuedResourceId, ResourceState)>) -> Rc<RefCell<dyn QueueJob>> {
        Rc::new(RefCell::new(Self { requests }))
    }
}

impl QueueJob for RequestJob {
    fn setup_queue(&self, planner: &mut QueuePlanner) -> Result<()> {
        for (id, state) in &self.requests {
            match id {
                QueuedResourceId::Transient(index) => {
                    planner.request_transient_resource(*index, *state)?;
                }
                QueuedResourceId::Category(category) => {
                    planner.request_category_resource(*category, *state)?;
                }
            }
        }
        Ok(())
    }

    fn execute_frame(
        &mut self,
        _list: CommandListId,
        _context: &mut ResourceContext<'_>,
    ) -> Result<()> {
        Ok(())
    }
}

fn texture_category() -> CategoryId {
    CategoryId {
        kind: CategoryKind::Texture2d,
        local_index: 0,
        dynamic: false,
    }
}

fn transition(barrier: &QueuedBarrier) -> (ResourceState, ResourceState) {
    match barrier {
        QueuedBarrier::Transition { before, after, .. } => (*before, *after),
        other => panic!("expected a transition, got {other:?}"),
    }
}

// ============================================================================
// Transition emission and merging
// ============================================================================

#[test]
fn read_requests_merge_into_the_prior_transition() {
    // S2: three jobs request PS, non-PS, then UAV on the same transient.
    let mut planner = QueuePlanner::new();
    let texture = planner.create_transient_resource(ResourceState::COMMON);

    planner
        .add_job(RequestJob::shared(vec![(
            QueuedResourceId::Transient(texture),
            ResourceState::PIXEL_SHADER_RESOURCE,
        )]))
        .unwrap();
    planner
        .add_job(RequestJob::shared(vec![(
            QueuedResourceId::Transient(texture),
            ResourceState::NON_PIXEL_SHADER_RESOURCE,
        )]))
        .unwrap();
    planner
        .add_job(RequestJob::shared(vec![(
            QueuedResourceId::Transient(texture),
            ResourceState::UNORDERED_ACCESS,
        )]))
        .unwrap();

    let plan = planner.finalize(None).unwrap();
    let barrier_counts: Vec<usize> = plan.jobs.iter().map(|job| job.barriers().len()).collect();
    assert_eq!(barrier_counts, vec![1, 0, 1], "two transitions in total");

    // The first barrier's after-state absorbed the second job's read.
    let (before, after) = transition(&plan.jobs[0].barriers()[0]);
    assert_eq!(before, ResourceState::COMMON);
    assert_eq!(
        after,
        ResourceState::PIXEL_SHADER_RESOURCE | ResourceState::NON_PIXEL_SHADER_RESOURCE
    );

    let (before, after) = transition(&plan.jobs[2].barriers()[0]);
    assert_eq!(
        before,
        ResourceState::PIXEL_SHADER_RESOURCE | ResourceState::NON_PIXEL_SHADER_RESOURCE
    );
    assert_eq!(after, ResourceState::UNORDERED_ACCESS);
}

#[test]
fn first_use_in_the_declared_state_emits_no_barrier() {
    let mut planner = QueuePlanner::new();
    let target = planner.create_transient_resource(ResourceState::RENDER_TARGET);
    planner
        .add_job(RequestJob::shared(vec![(
            QueuedResourceId::Transient(target),
            ResourceState::RENDER_TARGET,
        )]))
        .unwrap();

    let plan = planner.finalize(None).unwrap();
    assert!(plan.jobs[0].barriers().is_empty(), "implicit promotion");
    assert_eq!(
        plan.transient_initial_states,
        vec![ResourceState::RENDER_TARGET]
    );
}

#[test]
fn repeated_requests_of_one_state_stay_silent() {
    let mut planner = QueuePlanner::new();
    let texture = planner.create_transient_resource(ResourceState::COMMON);
    for _ in 0..3 {
        planner
            .add_job(RequestJob::shared(vec![(
                QueuedResourceId::Transient(texture),
                ResourceState::PIXEL_SHADER_RESOURCE,
            )]))
            .unwrap();
    }
    let plan = planner.finalize(None).unwrap();
    let total: usize = plan.jobs.iter().map(|job| job.barriers().len()).sum();
    assert_eq!(total, 1, "one transition for three identical requests");
}

#[test]
fn requests_outside_a_job_are_rejected() {
    let mut planner = QueuePlanner::new();
    let texture = planner.create_transient_resource(ResourceState::COMMON);
    let result =
        planner.request_transient_resource(texture, ResourceState::PIXEL_SHADER_RESOURCE);
    assert!(matches!(result, Err(QuarryError::InvalidConfiguration(_))));

    assert!(matches!(
        planner.request_transient_resource(99, ResourceState::COMMON),
        Err(QuarryError::NotFound(_))
    ));
}

// ============================================================================
// Finalization
// ============================================================================

#[test]
fn finalize_transitions_the_end_texture_to_copy_source() {
    let mut planner = QueuePlanner::new();
    let end = planner.create_transient_resource(ResourceState::COMMON);
    planner
        .add_job(RequestJob::shared(vec![(
            QueuedResourceId::Transient(end),
            ResourceState::RENDER_TARGET,
        )]))
        .unwrap();

    let plan = planner.finalize(Some(end)).unwrap();
    assert_eq!(plan.end_texture, Some(end));
    let (before, after) = transition(&plan.post_execution_barriers[0]);
    assert_eq!(before, ResourceState::RENDER_TARGET);
    assert_eq!(after, ResourceState::COPY_SOURCE);
}

#[test]
fn write_promoted_texture_category_resets_to_common() {
    // S6: one job writes a texture category as UAV.
    let category = texture_category();
    let mut planner = QueuePlanner::new();
    planner
        .add_job(RequestJob::shared(vec![(
            QueuedResourceId::Category(category),
            ResourceState::UNORDERED_ACCESS,
        )]))
        .unwrap();

    let plan = planner.finalize(None).unwrap();
    // Promotion emitted nothing during the queue...
    assert!(plan.jobs[0].barriers().is_empty());
    // ...but the post-execution list returns the pool to common.
    let resets: Vec<_> = plan
        .post_execution_barriers
        .iter()
        .map(transition)
        .collect();
    assert_eq!(
        resets,
        vec![(ResourceState::UNORDERED_ACCESS, ResourceState::COMMON)]
    );
    match plan.post_execution_barriers[0] {
        QueuedBarrier::Transition {
            id: QueuedResourceId::Category(reset_category),
            ..
        } => assert_eq!(reset_category, category),
        ref other => panic!("expected a category transition, got {other:?}"),
    }
}

#[test]
fn read_promoted_category_needs_no_reset() {
    let category = texture_category();
    let mut planner = QueuePlanner::new();
    planner
        .add_job(RequestJob::shared(vec![(
            QueuedResourceId::Category(category),
            ResourceState::PIXEL_SHADER_RESOURCE,
        )]))
        .unwrap();

    let plan = planner.finalize(None).unwrap();
    assert!(plan.post_execution_barriers.is_empty());
}

#[test]
fn buffer_category_in_a_write_state_is_not_reset_by_promotion_alone() {
    let category = CategoryId {
        kind: CategoryKind::Buffer,
        local_index: 0,
        dynamic: true,
    };
    let mut planner = QueuePlanner::new();
    planner
        .add_job(RequestJob::shared(vec![(
            QueuedResourceId::Category(category),
            ResourceState::UNORDERED_ACCESS,
        )]))
        .unwrap();

    let plan = planner.finalize(None).unwrap();
    assert!(
        plan.post_execution_barriers.is_empty(),
        "buffer promotion does not force a reset"
    );
}

#[test]
fn explicitly_transitioned_category_is_always_reset() {
    let category = texture_category();
    let mut planner = QueuePlanner::new();
    planner
        .add_job(RequestJob::shared(vec![(
            QueuedResourceId::Category(category),
            ResourceState::PIXEL_SHADER_RESOURCE,
        )]))
        .unwrap();
    planner
        .add_job(RequestJob::shared(vec![(
            QueuedResourceId::Category(category),
            ResourceState::COPY_SOURCE,
        )]))
        .unwrap();

    let plan = planner.finalize(None).unwrap();
    let (before, after) = transition(&plan.post_execution_barriers[0]);
    assert_eq!(before, ResourceState::COPY_SOURCE);
    assert_eq!(after, ResourceState::COMMON);
}

// ============================================================================
// Unsupported barrier kinds
// ============================================================================

#[test]
fn category_uav_and_aliasing_barriers_are_unsupported() {
    use quarry::alloc::HeapPool;
    use quarry::frame::{
        Blackboard, CategoryRegistry, CategorySettings, LocalMemoryInfo, ManagedDescriptorHeap,
        TransientMemoryInfo,
    };
    use quarry::gpu::{HeadlessCaps, HeadlessDevice};

    let device = HeadlessDevice::with_caps(HeadlessCaps {
        heap_alignment: 4096,
        copy_alignment: 512,
        texture_alignment: 4096,
        buffer_alignment: 256,
    });
    let pool = HeapPool::new_shared(device.handle());
    let heap = ManagedDescriptorHeap::new(device.handle(), 2, 8).unwrap();
    let mut registry =
        CategoryRegistry::new(device.handle(), pool.clone(), 2, &CategorySettings::default())
            .unwrap();
    let mut blackboard = Blackboard::new(
        device.handle(),
        pool,
        2,
        LocalMemoryInfo::default(),
        TransientMemoryInfo::default(),
    )
    .unwrap();
    let device_ref = device.handle();
    let mut context = ResourceContext {
        device: &device_ref,
        descriptor_heap: &heap,
        categories: &mut registry,
        blackboard: &mut blackboard,
    };

    let mut out = Vec::new();
    let uav = QueuedBarrier::Uav {
        id: QueuedResourceId::Category(texture_category()),
    };
    assert!(matches!(
        uav.materialize(&mut context, &mut out),
        Err(QuarryError::Unsupported(_))
    ));

    let aliasing = QueuedBarrier::Aliasing {
        before: QueuedResourceId::Category(texture_category()),
        after: QueuedResourceId::Category(texture_category()),
    };
    assert!(matches!(
        aliasing.materialize(&mut context, &mut out),
        Err(QuarryError::Unsupported(_))
    ));
    assert!(out.is_empty());
}

// ============================================================================
// Transition counting
// ============================================================================

#[test]
fn emitted_transitions_match_state_changes_after_merging() {
    // Invariant: the number of emitted transitions equals the number of
    // needed-state changes once read widening is folded away.
    let mut rng = StdRng::seed_from_u64(0xba55_1e5e);
    let states = [
        ResourceState::PIXEL_SHADER_RESOURCE,
        ResourceState::NON_PIXEL_SHADER_RESOURCE,
        ResourceState::COPY_SOURCE,
        ResourceState::UNORDERED_ACCESS,
        ResourceState::RENDER_TARGET,
        ResourceState::COPY_DEST,
    ];

    for _ in 0..50 {
        let mut planner = QueuePlanner::new();
        let resource = planner.create_transient_resource(ResourceState::COMMON);

        let mut model = ResourceState::COMMON;
        let mut expected = 0usize;
        for _ in 0..rng.random_range(1..30) {
            let needed = states[rng.random_range(0..states.len())];
            planner
                .add_job(RequestJob::shared(vec![(
                    QueuedResourceId::Transient(resource),
                    needed,
                )]))
                .unwrap();

            // Reference model of the merge rule.
            if model.contains(needed) {
                // no change
            } else if needed.is_read_state() && model.is_read_state() {
                model |= needed;
            } else {
                model = needed;
                expected += 1;
            }
        }

        let plan = planner.finalize(None).unwrap();
        let total: usize = plan.jobs.iter().map(|job| job.barriers().len()).sum();
        assert_eq!(total, expected, "redundant or missing transitions");
    }
}
