//! Suballocator Stack Tests
//!
//! Tests for:
//! - HeapPool: alignment round-up, whole-heap reuse
//! - BufferAllocator: pack-and-grow expansion, mapped updates, barriers
//! - TextureAllocator: per-resource placement and state
//! - DescriptorAllocator: stored views, forced slots, reallocation
//! - StagingUploader: staged copies, re-pitching, wholesale restore

use quarry::alloc::{
    AllocationStrategy, BufferAllocator, BufferInfo, DescriptorAllocator, HeapPool,
    StagingUploader, TextureAllocator, TextureUploadInfo,
};
use quarry::errors::QuarryError;
use quarry::gpu::{
    BindFlags, DescriptorHeapKind, Format, GpuDevice, HeadlessCaps, HeadlessDevice, HeapFlags,
    HeapKind, QueueKind, ResourceState, ResourceView, TextureDesc, TextureShaderViewDesc,
    ViewDesc,
};

fn small_device() -> HeadlessDevice {
    HeadlessDevice::with_caps(HeadlessCaps {
        heap_alignment: 4096,
        copy_alignment: 512,
        texture_alignment: 4096,
        buffer_alignment: 256,
    })
}

// ============================================================================
// Heap pool
// ============================================================================

#[test]
fn heap_pool_rounds_up_and_reuses_whole_heaps() {
    let device = small_device();
    let mut pool = HeapPool::new(device.handle());

    let chunk = pool
        .allocate_chunk(5000, HeapKind::Default, HeapFlags::BUFFERS)
        .unwrap();
    assert_eq!(chunk.size(), 8192, "5000 rounds up to two 4096 pages");
    assert_eq!(pool.heap_count(HeapKind::Default), 1);

    // While in use a second request creates a second heap.
    let other = pool
        .allocate_chunk(4096, HeapKind::Default, HeapFlags::BUFFERS)
        .unwrap();
    assert_eq!(pool.heap_count(HeapKind::Default), 2);

    // A wholly free heap of sufficient size is reused.
    pool.deallocate_chunk(&chunk).unwrap();
    let reused = pool
        .allocate_chunk(8192, HeapKind::Default, HeapFlags::BUFFERS)
        .unwrap();
    assert_eq!(reused.heap, chunk.heap);
    assert_eq!(pool.heap_count(HeapKind::Default), 2);

    // Kind and flags are part of the reuse key.
    let upload = pool
        .allocate_chunk(4096, HeapKind::Upload, HeapFlags::BUFFERS)
        .unwrap();
    assert_ne!(upload.heap, other.heap);
    assert_eq!(pool.heap_count(HeapKind::Upload), 1);
}

// ============================================================================
// Buffer allocator
// ============================================================================

#[test]
fn buffer_pool_packs_then_grows_into_a_second_chunk() {
    // Initial heap 4 KiB, expansion 8 KiB, 256 byte elements.
    let device = small_device();
    let pool = HeapPool::new_shared(device.handle());
    let mut allocator = BufferAllocator::new(
        device.handle(),
        pool,
        BufferInfo {
            element_size: 256,
            alignment: 256,
        },
        false,
        BindFlags::SHADER_RESOURCE,
        4096,
        8192,
    )
    .unwrap();

    // Sixteen elements exactly fill the initial chunk.
    let first = allocator.allocate(16).unwrap();
    assert_eq!(first.chunk, 0);
    assert_eq!(allocator.chunk_count(), 1);

    // One more element triggers an additional 8 KiB chunk.
    let second = allocator.allocate(1).unwrap();
    assert_eq!(second.chunk, 1);
    assert_eq!(second.index, 0);
    assert_eq!(allocator.chunk_count(), 2);

    let handle = allocator.handle(second).unwrap();
    assert_eq!(handle.offset, 0);
    assert_eq!(handle.element_count, 1);
}

#[test]
fn buffer_allocations_share_one_resource_per_chunk() {
    let device = small_device();
    let pool = HeapPool::new_shared(device.handle());
    let mut allocator = BufferAllocator::new(
        device.handle(),
        pool,
        BufferInfo {
            element_size: 64,
            alignment: 64,
        },
        false,
        BindFlags::SHADER_RESOURCE,
        4096,
        4096,
    )
    .unwrap();

    let a = allocator.allocate(4).unwrap();
    let b = allocator.allocate(4).unwrap();
    let handle_a = allocator.handle(a).unwrap();
    let handle_b = allocator.handle(b).unwrap();
    assert_eq!(handle_a.resource, handle_b.resource);
    assert_ne!(handle_a.offset, handle_b.offset);

    // The shared resource means the GPU addresses differ by the offsets.
    let address_a = allocator.gpu_address(a).unwrap();
    let address_b = allocator.gpu_address(b).unwrap();
    assert_eq!(address_b - address_a, handle_b.offset - handle_a.offset);
}

#[test]
fn buffer_transition_covers_every_chunk_once() {
    let device = small_device();
    let pool = HeapPool::new_shared(device.handle());
    let mut allocator = BufferAllocator::new(
        device.handle(),
        pool,
        BufferInfo {
            element_size: 256,
            alignment: 256,
        },
        false,
        BindFlags::SHADER_RESOURCE | BindFlags::UNORDERED_ACCESS,
        4096,
        4096,
    )
    .unwrap();
    allocator.allocate(16).unwrap();
    allocator.allocate(16).unwrap();
    assert_eq!(allocator.chunk_count(), 2);

    let mut barriers = Vec::new();
    allocator.create_transition_barrier(
        ResourceState::UNORDERED_ACCESS,
        &mut barriers,
        None,
    );
    assert_eq!(barriers.len(), 2, "one barrier per chunk resource");
    assert_eq!(allocator.current_state(), ResourceState::UNORDERED_ACCESS);

    // Unchanged state without a forced before-state emits nothing.
    barriers.clear();
    allocator.create_transition_barrier(
        ResourceState::UNORDERED_ACCESS,
        &mut barriers,
        None,
    );
    assert!(barriers.is_empty());

    // A forced before-state always emits.
    allocator.create_transition_barrier(
        ResourceState::UNORDERED_ACCESS,
        &mut barriers,
        Some(ResourceState::COMMON),
    );
    assert_eq!(barriers.len(), 2);
}

#[test]
fn mapped_buffer_updates_write_through() {
    let device = small_device();
    let pool = HeapPool::new_shared(device.handle());
    let mut allocator = BufferAllocator::new(
        device.handle(),
        pool,
        BufferInfo {
            element_size: 16,
            alignment: 16,
        },
        true,
        BindFlags::empty(),
        4096,
        4096,
    )
    .unwrap();

    let id = allocator.allocate(2).unwrap();
    allocator.update_mapped(id, &[7u8; 32]).unwrap();

    let handle = allocator.handle(id).unwrap();
    let bytes = device.resource_bytes(handle.resource).unwrap();
    let start = handle.offset as usize;
    assert_eq!(&bytes[start..start + 32], &[7u8; 32]);

    // Overlong updates are rejected.
    assert!(matches!(
        allocator.update_mapped(id, &[0u8; 64]),
        Err(QuarryError::InvalidConfiguration(_))
    ));
}

// ============================================================================
// Texture allocator
// ============================================================================

#[test]
fn textures_are_independent_resources_with_own_state() {
    let device = small_device();
    let pool = HeapPool::new_shared(device.handle());
    let mut allocator =
        TextureAllocator::new(device.handle(), pool, 64 * 1024, 64 * 1024).unwrap();

    let desc = TextureDesc::texture2d(Format::Rgba8Unorm, 16, 16)
        .with_bind(BindFlags::SHADER_RESOURCE | BindFlags::RENDER_TARGET);
    let a = allocator.allocate(&desc, ResourceState::COMMON).unwrap();
    let b = allocator.allocate(&desc, ResourceState::COMMON).unwrap();

    let handle_a = allocator.handle(a).unwrap();
    let handle_b = allocator.handle(b).unwrap();
    assert_ne!(handle_a.resource, handle_b.resource);

    // Transitioning one leaves the other untouched.
    let barrier = allocator
        .create_transition_barrier(a, ResourceState::RENDER_TARGET, None)
        .unwrap();
    assert!(barrier.is_some());
    assert_eq!(
        allocator.current_state(a).unwrap(),
        ResourceState::RENDER_TARGET
    );
    assert_eq!(allocator.current_state(b).unwrap(), ResourceState::COMMON);

    // transition_all moves the stragglers.
    let mut barriers = Vec::new();
    allocator.transition_all(&mut barriers, ResourceState::RENDER_TARGET, None);
    assert_eq!(barriers.len(), 1);
}

#[test]
fn texture_deallocation_destroys_the_placed_resource() {
    let device = small_device();
    let pool = HeapPool::new_shared(device.handle());
    let mut allocator =
        TextureAllocator::new(device.handle(), pool, 64 * 1024, 64 * 1024).unwrap();

    let desc = TextureDesc::texture2d(Format::Rgba8Unorm, 8, 8);
    let id = allocator.allocate(&desc, ResourceState::COMMON).unwrap();
    let live_before = device.live_resource_count();
    allocator.deallocate(id).unwrap();
    assert_eq!(device.live_resource_count(), live_before - 1);
    assert!(allocator.handle(id).is_err());
}

// ============================================================================
// Descriptor allocator
// ============================================================================

fn srv_view(device: &HeadlessDevice) -> ResourceView {
    let heap = device
        .create_heap(64 * 1024, HeapKind::Default, HeapFlags::TEXTURES)
        .unwrap();
    let desc = TextureDesc::texture2d(Format::Rgba8Unorm, 4, 4);
    let resource = device
        .create_placed_texture(heap, 0, &desc, ResourceState::COMMON)
        .unwrap();
    ResourceView {
        resource: Some(resource),
        desc: ViewDesc::TextureShader(TextureShaderViewDesc::default()),
    }
}

#[test]
fn descriptor_slots_store_views_and_support_forced_indices() {
    let device = small_device();
    let mut allocator = DescriptorAllocator::new_owned(
        device.handle(),
        DescriptorHeapKind::ShaderBindable,
        8,
    )
    .unwrap();

    let view = srv_view(&device);
    let slot = allocator.allocate(view, None).unwrap();
    assert_eq!(slot, 0);
    assert_eq!(allocator.stored_view(slot), Some(view));

    // A forced slot lands exactly where asked.
    let other = srv_view(&device);
    let forced = allocator.allocate(other, Some(5)).unwrap();
    assert_eq!(forced, 5);

    let (heap, index) = allocator.handle(forced);
    assert_eq!(index, 5);
    assert_eq!(device.descriptor_view(heap, index), Some(other));
}

#[test]
fn reallocate_rebuilds_the_slot_against_a_new_resource() {
    let device = small_device();
    let mut allocator = DescriptorAllocator::new_owned(
        device.handle(),
        DescriptorHeapKind::ShaderBindable,
        4,
    )
    .unwrap();

    let view = srv_view(&device);
    let slot = allocator.allocate(view, None).unwrap();

    let replacement = srv_view(&device);
    let new_resource = replacement.resource.unwrap();
    allocator.reallocate(slot, new_resource).unwrap();

    let stored = allocator.stored_view(slot).unwrap();
    assert_eq!(stored.resource, Some(new_resource));
    assert_eq!(stored.desc, view.desc, "description survives reallocation");

    let (heap, index) = allocator.handle(slot);
    assert_eq!(device.descriptor_view(heap, index), Some(stored));
}

#[test]
fn owned_descriptor_heaps_double_when_exhausted() {
    let device = small_device();
    let mut allocator = DescriptorAllocator::new_owned(
        device.handle(),
        DescriptorHeapKind::ShaderBindable,
        2,
    )
    .unwrap();

    let views: Vec<_> = (0..5).map(|_| srv_view(&device)).collect();
    for view in &views {
        allocator.allocate(*view, None).unwrap();
    }
    // All five slots survived the growth with their contents.
    for (slot, view) in views.iter().enumerate() {
        assert_eq!(allocator.stored_view(slot), Some(*view));
        let (heap, index) = allocator.handle(slot);
        assert_eq!(device.descriptor_view(heap, index), Some(*view));
    }
}

// ============================================================================
// Staging uploader
// ============================================================================

#[test]
fn staged_buffer_uploads_reach_the_destination() {
    let device = small_device();
    let pool = HeapPool::new_shared(device.handle());
    let mut uploader =
        StagingUploader::new(device.handle(), pool.clone(), 64 * 1024, AllocationStrategy::FirstFit)
            .unwrap();

    let dst_chunk = pool
        .borrow_mut()
        .allocate_chunk(4096, HeapKind::Default, HeapFlags::BUFFERS)
        .unwrap();
    let dst = device
        .create_placed_buffer(
            dst_chunk.heap,
            0,
            4096,
            BindFlags::SHADER_RESOURCE,
            ResourceState::COMMON,
        )
        .unwrap();

    let list = device.create_command_list(QueueKind::Copy).unwrap();
    let payload: Vec<u8> = (0..128u8).collect();
    uploader
        .upload_buffer(dst, list, &payload, 256, 256)
        .unwrap();
    assert!(uploader.used_bytes() >= 128);

    device.close_command_list(list).unwrap();
    device.submit(QueueKind::Copy, &[list]).unwrap();

    let bytes = device.resource_bytes(dst).unwrap();
    assert_eq!(&bytes[256..256 + 128], payload.as_slice());

    uploader.restore_used_memory();
    assert_eq!(uploader.used_bytes(), 0);
}

#[test]
fn staged_texture_uploads_repitch_packed_rows() {
    let device = small_device();
    let pool = HeapPool::new_shared(device.handle());
    let mut uploader =
        StagingUploader::new(device.handle(), pool.clone(), 64 * 1024, AllocationStrategy::FirstFit)
            .unwrap();

    let desc = TextureDesc::texture2d(Format::Rgba8Unorm, 4, 4);
    let tex_chunk = pool
        .borrow_mut()
        .allocate_chunk(64 * 1024, HeapKind::Default, HeapFlags::TEXTURES)
        .unwrap();
    let dst = device
        .create_placed_texture(tex_chunk.heap, 0, &desc, ResourceState::COMMON)
        .unwrap();

    // Packed 4x4 RGBA payload: row index in every byte.
    let mut payload = Vec::new();
    for row in 0..4u8 {
        payload.extend(std::iter::repeat_n(row, 16));
    }

    let list = device.create_command_list(QueueKind::Copy).unwrap();
    let info = TextureUploadInfo::texture2d(Format::Rgba8Unorm, 4, 4);
    uploader
        .upload_texture(dst, list, &payload, &info, 0, 512)
        .unwrap();
    device.close_command_list(list).unwrap();
    device.submit(QueueKind::Copy, &[list]).unwrap();

    let bytes = device.resource_bytes(dst).unwrap();
    assert_eq!(&bytes[..64], payload.as_slice());
}

#[test]
fn texture_upload_alignment_below_copy_placement_is_rejected() {
    let device = small_device();
    let pool = HeapPool::new_shared(device.handle());
    let mut uploader =
        StagingUploader::new(device.handle(), pool.clone(), 64 * 1024, AllocationStrategy::FirstFit)
            .unwrap();

    let desc = TextureDesc::texture2d(Format::Rgba8Unorm, 4, 4);
    let tex_chunk = pool
        .borrow_mut()
        .allocate_chunk(64 * 1024, HeapKind::Default, HeapFlags::TEXTURES)
        .unwrap();
    let dst = device
        .create_placed_texture(tex_chunk.heap, 0, &desc, ResourceState::COMMON)
        .unwrap();
    let list = device.create_command_list(QueueKind::Copy).unwrap();

    let info = TextureUploadInfo::texture2d(Format::Rgba8Unorm, 4, 4);
    let result = uploader.upload_texture(dst, list, &[0u8; 64], &info, 0, 256);
    assert!(matches!(result, Err(QuarryError::InvalidConfiguration(_))));
}
