//! Stable-Index Container Tests
//!
//! Tests for:
//! - StableVec: stable indices, free-list reuse order
//! - AddAt: placement at a specific index, free-list splicing
//! - Expand: head-first linking of the new tail
//! - Randomized add/remove sweeps against the activity invariants

use rand::rngs::StdRng;
use rand::{RngExt, SeedableRng};

use quarry::alloc::StableVec;

// ============================================================================
// Basic behavior
// ============================================================================

#[test]
fn indices_are_stable_across_removal() {
    let mut vec = StableVec::new();
    let a = vec.add("a");
    let b = vec.add("b");
    let c = vec.add("c");

    assert_eq!(vec.remove(b), Some("b"));
    assert_eq!(vec.get(a), Some(&"a"));
    assert_eq!(vec.get(c), Some(&"c"));
    assert!(!vec.is_active(b));
    assert_eq!(vec.active_len(), 2);
    assert_eq!(vec.total_len(), 3);
}

#[test]
fn removed_slot_is_reused_most_recent_first() {
    let mut vec = StableVec::new();
    let a = vec.add(1);
    let b = vec.add(2);
    let _c = vec.add(3);

    vec.remove(a).unwrap();
    vec.remove(b).unwrap();

    // b was freed last, so it is handed out first.
    assert_eq!(vec.add(20), b);
    assert_eq!(vec.add(10), a);
    assert_eq!(vec.add(40), 3, "exhausted free list appends");
}

#[test]
fn indices_are_not_reused_while_active() {
    let mut vec = StableVec::new();
    let mut seen = std::collections::HashSet::new();
    for value in 0..64 {
        let index = vec.add(value);
        assert!(seen.insert(index), "index {index} handed out twice");
    }
}

#[test]
fn remove_of_inactive_slot_is_none() {
    let mut vec = StableVec::new();
    let a = vec.add(5);
    assert_eq!(vec.remove(a), Some(5));
    assert_eq!(vec.remove(a), None);
    assert_eq!(vec.remove(17), None);
}

// ============================================================================
// AddAt and Expand
// ============================================================================

#[test]
fn add_at_splices_the_free_list() {
    let mut vec = StableVec::new();
    let a = vec.add(1);
    let b = vec.add(2);
    let c = vec.add(3);
    vec.remove(a).unwrap();
    vec.remove(b).unwrap();
    vec.remove(c).unwrap();

    // Take the middle of the free list directly.
    assert_eq!(vec.add_at(20, b), b);
    assert!(vec.is_active(b));

    // The rest of the list still works: c was freed last, then a.
    assert_eq!(vec.add(30), c);
    assert_eq!(vec.add(10), a);
}

#[test]
fn add_at_beyond_the_tail_grows_the_container() {
    let mut vec: StableVec<u32> = StableVec::new();
    assert_eq!(vec.add_at(9, 4), 4);
    assert_eq!(vec.total_len(), 5);
    assert!(vec.is_active(4));
    assert_eq!(vec.active_len(), 1);

    // Slots 0..4 joined the free list and are usable.
    for _ in 0..4 {
        let index = vec.add(0);
        assert!(index < 4);
    }
    assert_eq!(vec.active_len(), 5);
}

#[test]
fn expand_links_new_slots_head_first() {
    let mut vec: StableVec<u32> = StableVec::new();
    vec.expand(4);
    assert_eq!(vec.total_len(), 4);
    assert_eq!(vec.active_len(), 0);

    // The most recently appended free slot is used first.
    assert_eq!(vec.add(0), 3);
    assert_eq!(vec.add(0), 2);
    assert_eq!(vec.add(0), 1);
    assert_eq!(vec.add(0), 0);
}

// ============================================================================
// Randomized sweep
// ============================================================================

#[test]
fn random_add_remove_keeps_activity_consistent() {
    let mut rng = StdRng::seed_from_u64(0xdead_5eed);
    let mut vec = StableVec::new();
    let mut live = std::collections::HashMap::new();

    for step in 0..4000u64 {
        if live.is_empty() || rng.random_range(0..10) < 6 {
            let index = vec.add(step);
            assert!(
                live.insert(index, step).is_none(),
                "index {index} was already live"
            );
        } else {
            let index = *live.keys().nth(rng.random_range(0..live.len())).unwrap();
            let expected = live.remove(&index).unwrap();
            assert_eq!(vec.remove(index), Some(expected));
        }

        assert_eq!(vec.active_len(), live.len());
        for (index, expected) in &live {
            assert!(vec.is_active(*index));
            assert_eq!(vec.get(*index), Some(expected));
        }
    }
}
