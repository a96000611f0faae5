//! Component Tests
//!
//! Tests for:
//! - BufferComponent / Texture2dComponent: shared descriptor indices
//!   across view kinds, handles, transitions
//! - FrameBufferComponent / FrameTexture2dComponent: deferred
//!   create/destroy replay across N frames, aliasing init barriers
//! - Data mirrors: byte-for-byte round trips, per-frame copy counters

use quarry::alloc::{BufferInfo, HeapPool};
use quarry::component::{
    BufferComponent, BufferComponentInfo, BufferDescriptorInfo, BufferReplacementViews,
    ComponentMemoryInfo, FrameBufferComponent, FrameTexture2dComponent, ResourceComponent,
    Texture2dComponent, TextureComponentInfo, TextureDescriptorInfo, TextureReplacementViews,
    UpdateKind,
};
use quarry::gpu::{
    BarrierDesc, Format, GpuDevice, HeadlessCaps, HeadlessDevice, QueueKind, ResourceState,
    ViewKind,
};

fn small_device() -> HeadlessDevice {
    HeadlessDevice::with_caps(HeadlessCaps {
        heap_alignment: 4096,
        copy_alignment: 512,
        texture_alignment: 4096,
        buffer_alignment: 256,
    })
}

fn buffer_info() -> BufferComponentInfo {
    BufferComponentInfo {
        buffer: BufferInfo {
            element_size: 64,
            alignment: 64,
        },
        mapped: false,
        memory: ComponentMemoryInfo {
            initial_heap_size: 16 * 1024,
            expansion_size: 16 * 1024,
        },
    }
}

fn texture_info() -> TextureComponentInfo {
    TextureComponentInfo {
        format: Format::Rgba8Unorm,
        memory: ComponentMemoryInfo {
            initial_heap_size: 256 * 1024,
            expansion_size: 256 * 1024,
        },
    }
}

// ============================================================================
// Single components
// ============================================================================

#[test]
fn buffer_component_uses_one_descriptor_index_across_view_kinds() {
    let device = small_device();
    let pool = HeapPool::new_shared(device.handle());
    let mut component = BufferComponent::new(
        device.handle(),
        pool,
        &buffer_info(),
        &[
            BufferDescriptorInfo::cbv(8),
            BufferDescriptorInfo::srv(8),
            BufferDescriptorInfo::uav(8),
        ],
    )
    .unwrap();

    let first = component
        .create_buffer(4, &BufferReplacementViews::default())
        .unwrap();
    let second = component
        .create_buffer(2, &BufferReplacementViews::default())
        .unwrap();
    assert_eq!(first.descriptor, 0);
    assert_eq!(second.descriptor, 1);

    assert!(component.has_view_kind(ViewKind::Cbv));
    assert!(component.has_view_kind(ViewKind::Srv));
    assert!(component.has_view_kind(ViewKind::Uav));
    assert!(!component.has_view_kind(ViewKind::Rtv));

    // Slot `descriptor` holds a view of the same buffer in every table.
    let handle = component.handle(second).unwrap();
    for kind in [ViewKind::Srv, ViewKind::Uav] {
        let (heap, start) = component.descriptor_base(kind).unwrap();
        let view = device
            .descriptor_view(heap, start + second.descriptor as u32)
            .expect("slot written");
        assert_eq!(view.resource, Some(handle.resource));
    }
}

#[test]
fn removed_buffer_frees_slots_for_reuse() {
    let device = small_device();
    let pool = HeapPool::new_shared(device.handle());
    let mut component = BufferComponent::new(
        device.handle(),
        pool,
        &buffer_info(),
        &[BufferDescriptorInfo::srv(8)],
    )
    .unwrap();

    let first = component
        .create_buffer(4, &BufferReplacementViews::default())
        .unwrap();
    component.remove(first).unwrap();
    assert!(component.handle(first).is_err());

    let replacement = component
        .create_buffer(4, &BufferReplacementViews::default())
        .unwrap();
    assert_eq!(
        replacement.descriptor, first.descriptor,
        "freed descriptor slot is reused"
    );
}

#[test]
fn texture_component_tracks_state_per_resource() {
    let device = small_device();
    let pool = HeapPool::new_shared(device.handle());
    let mut component = Texture2dComponent::new(
        device.handle(),
        pool,
        &texture_info(),
        &[
            TextureDescriptorInfo::srv(8),
            TextureDescriptorInfo::rtv(8),
        ],
    )
    .unwrap();

    let a = component
        .create_texture(32, 32, 1, 1, 1, 0, None, &TextureReplacementViews::default())
        .unwrap();
    let b = component
        .create_texture(32, 32, 1, 1, 1, 0, None, &TextureReplacementViews::default())
        .unwrap();

    let barrier = component
        .create_transition_barrier(a, ResourceState::RENDER_TARGET, None)
        .unwrap();
    match barrier {
        Some(BarrierDesc::Transition { before, after, .. }) => {
            assert_eq!(before, ResourceState::COMMON);
            assert_eq!(after, ResourceState::RENDER_TARGET);
        }
        other => panic!("expected a transition barrier, got {other:?}"),
    }
    assert_eq!(
        component.current_state(a).unwrap(),
        ResourceState::RENDER_TARGET
    );
    assert_eq!(component.current_state(b).unwrap(), ResourceState::COMMON);
}

// ============================================================================
// Frame multiplexing
// ============================================================================

#[test]
fn created_resource_exists_in_every_frame_before_use() {
    let frames = 3;
    let device = small_device();
    let pool = HeapPool::new_shared(device.handle());
    let mut component = FrameBufferComponent::new(
        device.handle(),
        pool,
        frames,
        UpdateKind::None,
        &buffer_info(),
        &[BufferDescriptorInfo::srv(8)],
    )
    .unwrap();

    let index = component
        .create_buffer(4, &BufferReplacementViews::default())
        .unwrap();
    assert_eq!(component.pending_op_count(), 1);

    // Each of the following N-1 swaps replays the create into the
    // newly active frame; the handle resolves everywhere.
    for _ in 0..frames - 1 {
        component.swap_frame().unwrap();
        assert!(component.handle(index).is_ok());
    }
    assert_eq!(component.pending_op_count(), 0, "op queue drained");

    // Further swaps are a no-op for the drained queue.
    component.swap_frame().unwrap();
    assert_eq!(component.pending_op_count(), 0);
    assert!(component.handle(index).is_ok());
}

#[test]
fn deferred_destroy_drains_after_n_minus_one_swaps() {
    // S3: with N = 2, create and destroy in the same frame.
    let device = small_device();
    let pool = HeapPool::new_shared(device.handle());
    let mut component = FrameBufferComponent::new(
        device.handle(),
        pool,
        2,
        UpdateKind::None,
        &buffer_info(),
        &[BufferDescriptorInfo::srv(8)],
    )
    .unwrap();

    let index = component
        .create_buffer(4, &BufferReplacementViews::default())
        .unwrap();
    component.remove(index).unwrap();

    // The active frame no longer has the resource.
    assert!(component.handle(index).is_err());
    assert_eq!(component.pending_op_count(), 2);

    // The next swap replays create + remove on the other frame copy and
    // drops both operations.
    component.swap_frame().unwrap();
    assert!(component.handle(index).is_err());
    assert_eq!(component.pending_op_count(), 0);

    component.swap_frame().unwrap();
    assert_eq!(component.pending_op_count(), 0);
}

#[test]
fn aliasing_barriers_cover_creations_in_each_frame() {
    let device = small_device();
    let pool = HeapPool::new_shared(device.handle());
    let mut component = FrameTexture2dComponent::new(
        device.handle(),
        pool,
        2,
        UpdateKind::None,
        &texture_info(),
        &[TextureDescriptorInfo::srv(8)],
    )
    .unwrap();

    component
        .create_texture(16, 16, 1, 1, 1, 0, None, &TextureReplacementViews::default())
        .unwrap();

    let mut barriers = Vec::new();
    component.take_initialization_barriers(&mut barriers);
    assert_eq!(barriers.len(), 1);
    assert!(matches!(barriers[0], BarrierDesc::Aliasing { before: None, .. }));

    // Draining is destructive until the next creation or replay.
    let mut again = Vec::new();
    component.take_initialization_barriers(&mut again);
    assert!(again.is_empty());

    // The replayed create on the next frame arms a new barrier.
    component.swap_frame().unwrap();
    component.take_initialization_barriers(&mut again);
    assert_eq!(again.len(), 1);
}

// ============================================================================
// Data mirrors
// ============================================================================

#[test]
fn mirror_round_trips_buffer_contents() {
    let device = small_device();
    let pool = HeapPool::new_shared(device.handle());
    let mut component = FrameBufferComponent::new(
        device.handle(),
        pool,
        2,
        UpdateKind::Copied,
        &buffer_info(),
        &[BufferDescriptorInfo::srv(8)],
    )
    .unwrap();

    let a = component
        .create_buffer(1, &BufferReplacementViews::default())
        .unwrap();
    let b = component
        .create_buffer(1, &BufferReplacementViews::default())
        .unwrap();

    let data_a: Vec<u8> = (0..64).collect();
    let data_b = vec![0xabu8; 64];
    component.set_data(a, &data_a).unwrap();
    component.set_data(b, &data_b).unwrap();

    assert_eq!(component.data(a).unwrap(), data_a.as_slice());
    assert_eq!(component.data(b).unwrap(), data_b.as_slice());

    // Removing the first entry compacts the mirror; the second entry
    // still reads back byte for byte.
    component.remove(a).unwrap();
    assert!(component.data(a).is_none());
    assert_eq!(component.data(b).unwrap(), data_b.as_slice());
}

#[test]
fn copied_updates_flow_through_the_uploader_for_n_frames() {
    let frames = 2;
    let device = small_device();
    let pool = HeapPool::new_shared(device.handle());
    let mut component = FrameBufferComponent::new(
        device.handle(),
        pool.clone(),
        frames,
        UpdateKind::Copied,
        &buffer_info(),
        &[BufferDescriptorInfo::srv(8)],
    )
    .unwrap();
    let mut uploader = quarry::alloc::StagingUploader::new(
        device.handle(),
        pool,
        64 * 1024,
        quarry::alloc::AllocationStrategy::FirstFit,
    )
    .unwrap();

    let index = component
        .create_buffer(1, &BufferReplacementViews::default())
        .unwrap();
    let payload: Vec<u8> = (100..164).collect();
    component.set_data(index, &payload).unwrap();

    for _ in 0..frames {
        let mut barriers = Vec::new();
        component.prepare_updates(&mut barriers);
        assert!(!barriers.is_empty(), "pending update transitions the pool");

        let list = device.create_command_list(QueueKind::Copy).unwrap();
        component.perform_updates(list, &mut uploader).unwrap();
        device.close_command_list(list).unwrap();
        device.submit(QueueKind::Copy, &[list]).unwrap();

        let handle = component.handle(index).unwrap();
        let bytes = device.resource_bytes(handle.resource).unwrap();
        let start = handle.offset as usize;
        assert_eq!(&bytes[start..start + 64], payload.as_slice());

        component.swap_frame().unwrap();
    }

    // The counter is exhausted: no more uploads are recorded.
    let list = device.create_command_list(QueueKind::Copy).unwrap();
    component.perform_updates(list, &mut uploader).unwrap();
    device.close_command_list(list).unwrap();
    device.clear_submissions();
    device.submit(QueueKind::Copy, &[list]).unwrap();
    let submissions = device.submissions();
    assert!(submissions[0].commands.is_empty());
}

#[test]
fn texture_mirror_round_trips_subresources() {
    let device = small_device();
    let pool = HeapPool::new_shared(device.handle());
    let mut component = FrameTexture2dComponent::new(
        device.handle(),
        pool,
        2,
        UpdateKind::Copied,
        &texture_info(),
        &[TextureDescriptorInfo::srv(8)],
    )
    .unwrap();

    let index = component
        .create_texture(4, 4, 1, 2, 1, 0, None, &TextureReplacementViews::default())
        .unwrap();

    let mip0: Vec<u8> = (0..64).collect();
    let mip1 = vec![9u8; 16];
    component.set_data(index, 0, &mip0).unwrap();
    component.set_data(index, 1, &mip1).unwrap();

    assert_eq!(component.data(index, 0).unwrap(), mip0.as_slice());
    assert_eq!(component.data(index, 1).unwrap(), mip1.as_slice());
}
