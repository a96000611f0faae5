//! Arena Tests
//!
//! Tests for:
//! - Arena: aligned allocation, split pre-pad/tail chunks, strategies
//! - Coalescing: adjacent free chunks merge transitively
//! - Boundary behaviors: zero sizes, alignment rules, growth from empty
//! - Randomized allocate/free sweeps against the tiling invariants

use rand::rngs::StdRng;
use rand::{RngExt, SeedableRng};

use quarry::alloc::{AllocationStrategy, Arena};
use quarry::errors::QuarryError;

/// Collect `(offset, size, occupied)` sorted by offset.
fn layout(arena: &Arena<()>) -> Vec<(u64, u64, bool)> {
    let mut chunks: Vec<(u64, u64, bool)> = arena
        .iter_chunks()
        .map(|chunk| (chunk.offset, chunk.size, chunk.occupied))
        .collect();
    chunks.sort_unstable();
    chunks
}

/// Chunks must tile the range with no gaps or overlaps.
fn assert_tiles(arena: &Arena<()>) {
    let chunks = layout(arena);
    let mut cursor = 0;
    for (offset, size, _) in &chunks {
        assert_eq!(*offset, cursor, "gap or overlap at offset {offset}");
        cursor = offset + size;
    }
    assert_eq!(cursor, arena.total_size(), "chunks do not cover the range");
}

// ============================================================================
// Allocation
// ============================================================================

#[test]
fn allocation_is_aligned_and_occupied() {
    let mut arena: Arena<()> = Arena::new(4096, 0);
    // Misalign the free space first.
    let first = arena
        .allocate(24, 8, AllocationStrategy::FirstFit)
        .unwrap();
    let second = arena
        .allocate(100, 256, AllocationStrategy::FirstFit)
        .unwrap();

    assert_eq!(arena.offset_of(first) % 8, 0);
    assert_eq!(arena.offset_of(second) % 256, 0);
    assert!(arena.is_occupied(first));
    assert!(arena.is_occupied(second));
    assert_tiles(&arena);
}

#[test]
fn alignment_padding_becomes_a_free_chunk() {
    let mut arena: Arena<()> = Arena::new(1024, 0);
    let first = arena.allocate(10, 2, AllocationStrategy::FirstFit).unwrap();
    assert_eq!(arena.offset_of(first), 0);

    // The next 64-aligned offset is 64; bytes 10..64 stay free.
    let second = arena.allocate(64, 64, AllocationStrategy::FirstFit).unwrap();
    assert_eq!(arena.offset_of(second), 64);

    let pad = arena
        .iter_chunks()
        .find(|chunk| chunk.offset == 10 && !chunk.occupied)
        .expect("pre-pad chunk exists");
    assert_eq!(pad.size, 54);
    assert_tiles(&arena);
}

#[test]
fn strategies_pick_their_holes() {
    // Layout: a(512) b(128) c(1024) d(128), tail free at 1792..4096.
    let mut arena: Arena<()> = Arena::new(4096, 0);
    let a = arena.allocate(512, 2, AllocationStrategy::FirstFit).unwrap();
    let _b = arena.allocate(128, 2, AllocationStrategy::FirstFit).unwrap();
    let c = arena.allocate(1024, 2, AllocationStrategy::FirstFit).unwrap();
    let _d = arena.allocate(128, 2, AllocationStrategy::FirstFit).unwrap();
    // Two non-adjacent holes: 512 bytes at 0 and 1024 bytes at 640.
    arena.deallocate(a).unwrap();
    arena.deallocate(c).unwrap();

    let best = arena.allocate(96, 2, AllocationStrategy::BestFit).unwrap();
    assert_eq!(arena.offset_of(best), 0, "best fit picks the 512 byte hole");

    let worst = arena.allocate(96, 2, AllocationStrategy::WorstFit).unwrap();
    assert_eq!(
        arena.offset_of(worst),
        1792,
        "worst fit picks the large tail hole"
    );
}

#[test]
fn allocation_fails_when_nothing_fits() {
    let mut arena: Arena<()> = Arena::new(256, 0);
    arena.allocate(200, 2, AllocationStrategy::FirstFit).unwrap();
    let result = arena.allocate(100, 2, AllocationStrategy::FirstFit);
    assert!(matches!(result, Err(QuarryError::OutOfResources(_))));
}

// ============================================================================
// Boundary behaviors
// ============================================================================

#[test]
fn zero_size_allocation_is_invalid() {
    let mut arena: Arena<()> = Arena::new(1024, 0);
    let result = arena.allocate(0, 16, AllocationStrategy::FirstFit);
    assert!(matches!(result, Err(QuarryError::InvalidConfiguration(_))));
}

#[test]
fn alignment_one_is_rejected_powers_of_two_accepted() {
    let mut arena: Arena<()> = Arena::new(1024, 0);
    assert!(matches!(
        arena.allocate(16, 1, AllocationStrategy::FirstFit),
        Err(QuarryError::InvalidConfiguration(_))
    ));
    assert!(matches!(
        arena.allocate(16, 0, AllocationStrategy::FirstFit),
        Err(QuarryError::InvalidConfiguration(_))
    ));
    assert!(matches!(
        arena.allocate(16, 24, AllocationStrategy::FirstFit),
        Err(QuarryError::InvalidConfiguration(_))
    ));
    for shift in 1..=6 {
        assert!(arena.allocate(8, 1 << shift, AllocationStrategy::FirstFit).is_ok());
    }
}

#[test]
fn empty_arena_grows_through_add_chunk() {
    let mut arena: Arena<()> = Arena::new(0, 0);
    assert_eq!(arena.total_size(), 0);
    assert!(
        arena
            .allocate(16, 2, AllocationStrategy::FirstFit)
            .is_err()
    );

    arena.add_chunk(512, false);
    assert_eq!(arena.total_size(), 512);
    let index = arena.allocate(16, 2, AllocationStrategy::FirstFit).unwrap();
    assert!(arena.is_occupied(index));
    assert_tiles(&arena);
}

// ============================================================================
// Coalescing
// ============================================================================

#[test]
fn deallocating_out_of_order_reconstitutes_one_free_chunk() {
    // Three consecutive 1 KiB chunks in an 8 KiB arena; free B, A, C.
    let mut arena: Arena<()> = Arena::new(8 * 1024, 0);
    let a = arena.allocate(1024, 2, AllocationStrategy::FirstFit).unwrap();
    let b = arena.allocate(1024, 2, AllocationStrategy::FirstFit).unwrap();
    let c = arena.allocate(1024, 2, AllocationStrategy::FirstFit).unwrap();

    arena.deallocate(b).unwrap();
    arena.deallocate(a).unwrap();
    arena.deallocate(c).unwrap();

    let chunks = layout(&arena);
    assert_eq!(chunks, vec![(0, 8 * 1024, false)]);
    assert_eq!(arena.occupied_count(), 0);
}

#[test]
fn allocate_then_deallocate_restores_the_snapshot() {
    let mut arena: Arena<()> = Arena::new(4096, 0);
    arena.allocate(100, 4, AllocationStrategy::FirstFit).unwrap();
    let before = layout(&arena);

    let index = arena.allocate(256, 16, AllocationStrategy::FirstFit).unwrap();
    arena.deallocate(index).unwrap();

    assert_eq!(layout(&arena), before);
}

#[test]
fn remove_if_frees_matching_side_data() {
    let mut arena: Arena<u32> = Arena::new(4096, 0);
    let keep = arena.allocate(64, 2, AllocationStrategy::FirstFit).unwrap();
    let drop_a = arena.allocate(64, 2, AllocationStrategy::FirstFit).unwrap();
    let drop_b = arena.allocate(64, 2, AllocationStrategy::FirstFit).unwrap();
    *arena.data_mut(keep).unwrap() = 1;
    *arena.data_mut(drop_a).unwrap() = 7;
    *arena.data_mut(drop_b).unwrap() = 7;

    arena.remove_if(|data| *data == 7);

    assert!(arena.is_occupied(keep));
    assert!(!arena.is_occupied(drop_a));
    assert!(!arena.is_occupied(drop_b));
    assert_eq!(arena.occupied_count(), 1);
}

#[test]
fn clear_resets_to_a_single_free_chunk() {
    let mut arena: Arena<()> = Arena::new(2048, 0);
    arena.allocate(256, 2, AllocationStrategy::FirstFit).unwrap();
    arena.allocate(256, 2, AllocationStrategy::FirstFit).unwrap();

    arena.clear(Some(4096));
    assert_eq!(layout(&arena), vec![(0, 4096, false)]);
}

// ============================================================================
// Randomized sweeps
// ============================================================================

#[test]
fn random_operations_preserve_tiling_and_drain_to_one_chunk() {
    let mut rng = StdRng::seed_from_u64(0x51ab_1e5e);
    let mut arena: Arena<()> = Arena::new(64 * 1024, 0);
    let mut live: Vec<usize> = Vec::new();

    for _ in 0..2000 {
        if live.is_empty() || rng.random_range(0..100) < 60 {
            let size = rng.random_range(1..2048);
            let alignment = 1u64 << rng.random_range(1..9);
            if let Ok(index) = arena.allocate(size, alignment, AllocationStrategy::FirstFit) {
                assert_eq!(arena.offset_of(index) % alignment, 0);
                live.push(index);
            }
        } else {
            let pick = rng.random_range(0..live.len());
            let index = live.swap_remove(pick);
            arena.deallocate(index).unwrap();
        }
        assert_tiles(&arena);
    }

    for index in live {
        arena.deallocate(index).unwrap();
    }
    assert_eq!(layout(&arena), vec![(0, 64 * 1024, false)]);
}

#[test]
fn random_strategies_agree_on_the_tiling_invariant() {
    for (seed, strategy) in [
        (11u64, AllocationStrategy::FirstFit),
        (12, AllocationStrategy::BestFit),
        (13, AllocationStrategy::WorstFit),
    ] {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut arena: Arena<()> = Arena::new(16 * 1024, 0);
        let mut live = Vec::new();
        for _ in 0..500 {
            if live.is_empty() || rng.random_range(0..10) < 6 {
                if let Ok(index) = arena.allocate(rng.random_range(1..512), 16, strategy) {
                    live.push(index);
                }
            } else {
                let index = live.swap_remove(rng.random_range(0..live.len()));
                arena.deallocate(index).unwrap();
            }
            assert_tiles(&arena);
        }
    }
}
