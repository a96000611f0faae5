//! Managed Descriptor Heap Tests
//!
//! Tests for:
//! - Slab addressing: CPU staging slab vs per-frame GPU slab
//! - Doubling growth with staged-descriptor preservation
//! - Delayed release of the superseded shader-visible heap
//! - Upload equality between staging and shader-visible slots

use quarry::alloc::{BufferInfo, HeapPool};
use quarry::component::{
    BufferComponentInfo, BufferDescriptorInfo, BufferReplacementViews, ComponentMemoryInfo,
    FrameBufferComponent, ResourceComponent, UpdateKind,
};
use quarry::frame::{CategoryId, CategoryKind, ManagedDescriptorHeap};
use quarry::gpu::{GpuDevice, HeadlessCaps, HeadlessDevice, ViewKind};

fn small_device() -> HeadlessDevice {
    HeadlessDevice::with_caps(HeadlessCaps {
        heap_alignment: 4096,
        copy_alignment: 512,
        texture_alignment: 4096,
        buffer_alignment: 256,
    })
}

fn category_id(local_index: usize) -> CategoryId {
    CategoryId {
        kind: CategoryKind::Buffer,
        local_index,
        dynamic: true,
    }
}

/// A frame component with `count` live buffers carrying SRVs.
fn component_with_buffers(device: &HeadlessDevice, count: usize) -> FrameBufferComponent {
    let pool = HeapPool::new_shared(device.handle());
    let mut component = FrameBufferComponent::new(
        device.handle(),
        pool,
        1,
        UpdateKind::None,
        &BufferComponentInfo {
            buffer: BufferInfo {
                element_size: 64,
                alignment: 64,
            },
            mapped: false,
            memory: ComponentMemoryInfo {
                initial_heap_size: 16 * 1024,
                expansion_size: 16 * 1024,
            },
        },
        &[BufferDescriptorInfo::srv(16)],
    )
    .unwrap();
    for _ in 0..count {
        component
            .create_buffer(1, &BufferReplacementViews::default())
            .unwrap();
    }
    component
}

// ============================================================================
// Slab addressing and upload
// ============================================================================

#[test]
fn staged_descriptors_match_the_gpu_slab_after_upload() {
    let device = small_device();
    let mut heap = ManagedDescriptorHeap::new(device.handle(), 2, 8).unwrap();
    let component = component_with_buffers(&device, 3);

    heap.swap_frame(); // land on frame 0
    heap.add_category_descriptors(category_id(0), &component)
        .unwrap();
    assert_eq!(heap.cursor(), 3);
    heap.upload_current_frame_heap().unwrap();

    let offset = heap.category_offset(category_id(0), ViewKind::Srv).unwrap();
    assert_eq!(offset, 0, "frame 0 slab starts at zero");

    for slot in 0..heap.cursor() {
        let staged = device.descriptor_fingerprint(heap.staging_heap(), slot);
        let uploaded =
            device.descriptor_fingerprint(heap.shader_visible_heap(), offset as u32 + slot);
        assert_ne!(staged, 0, "slot {slot} was staged");
        assert_eq!(staged, uploaded, "slot {slot} differs after upload");
    }
}

#[test]
fn second_frame_uses_a_disjoint_slab() {
    let device = small_device();
    let mut heap = ManagedDescriptorHeap::new(device.handle(), 2, 8).unwrap();
    let component = component_with_buffers(&device, 2);

    heap.swap_frame();
    heap.add_category_descriptors(category_id(0), &component)
        .unwrap();
    let frame0 = heap.category_offset(category_id(0), ViewKind::Srv).unwrap();

    heap.swap_frame();
    heap.add_category_descriptors(category_id(0), &component)
        .unwrap();
    let frame1 = heap.category_offset(category_id(0), ViewKind::Srv).unwrap();

    assert_eq!(frame0, 0);
    assert_eq!(frame1, 8, "second slab starts one capacity further");
}

#[test]
fn cursor_resets_every_frame() {
    let device = small_device();
    let mut heap = ManagedDescriptorHeap::new(device.handle(), 2, 8).unwrap();
    let component = component_with_buffers(&device, 5);

    heap.swap_frame();
    heap.add_category_descriptors(category_id(0), &component)
        .unwrap();
    assert_eq!(heap.cursor(), 5);
    heap.swap_frame();
    assert_eq!(heap.cursor(), 0);
    assert!(
        heap.category_offset(category_id(0), ViewKind::Srv).is_err(),
        "offsets from the previous frame are dropped"
    );
}

// ============================================================================
// Growth and retirement
// ============================================================================

#[test]
fn overflow_doubles_and_retires_the_old_gpu_heap() {
    // S4: P = 4 slots, N = 2; stage five descriptors in one frame.
    let device = small_device();
    let mut heap = ManagedDescriptorHeap::new(device.handle(), 2, 4).unwrap();
    heap.swap_frame();

    let old_gpu = heap.shader_visible_heap();

    let first = component_with_buffers(&device, 4);
    heap.add_category_descriptors(category_id(0), &first)
        .unwrap();
    assert_eq!(heap.descriptors_per_frame(), 4, "exactly full, no growth");

    // Fingerprints of the four staged slots before growth.
    let staged: Vec<u64> = (0..4)
        .map(|slot| device.descriptor_fingerprint(heap.staging_heap(), slot))
        .collect();

    let fifth = component_with_buffers(&device, 1);
    heap.add_category_descriptors(category_id(1), &fifth)
        .unwrap();

    assert_eq!(heap.descriptors_per_frame(), 8, "capacity doubled");
    assert_ne!(heap.shader_visible_heap(), old_gpu);
    assert_eq!(heap.retired_heap_count(), 1);

    // The first four descriptors moved at their old offsets; the fifth
    // landed at offset four.
    for (slot, fingerprint) in staged.iter().enumerate() {
        assert_eq!(
            device.descriptor_fingerprint(heap.staging_heap(), slot as u32),
            *fingerprint
        );
    }
    assert_eq!(
        heap.category_offset(category_id(1), ViewKind::Srv).unwrap() % 8,
        4
    );

    // The old shader-visible heap survives N swaps, then is released.
    let live_before = device.live_descriptor_heap_count();
    heap.swap_frame();
    assert_eq!(heap.retired_heap_count(), 1);
    assert_eq!(device.live_descriptor_heap_count(), live_before);
    heap.swap_frame();
    assert_eq!(heap.retired_heap_count(), 0);
    assert_eq!(device.live_descriptor_heap_count(), live_before - 1);
}

#[test]
fn global_descriptors_follow_the_category_tables() {
    let device = small_device();
    let mut heap = ManagedDescriptorHeap::new(device.handle(), 2, 8).unwrap();
    let component = component_with_buffers(&device, 2);

    heap.swap_frame();
    heap.add_category_descriptors(category_id(0), &component)
        .unwrap();

    let (source_heap, source_start) = component.descriptor_base(ViewKind::Srv).unwrap();
    heap.add_global_descriptors((source_heap, source_start), 2)
        .unwrap();
    assert_eq!(heap.global_offset(), 2, "global block follows the tables");
    assert_eq!(heap.cursor(), 4);
}
