//! Descriptor Allocator
//!
//! Manages a range of descriptor slots in a heap the allocator either
//! owns or was handed a window of. Every slot stores the exact view it
//! was created with, so a slot can be rebuilt against a different
//! underlying resource without the caller re-supplying the description;
//! the suballocators rely on this when they grow or reshuffle.

use crate::errors::{QuarryError, Result};
use crate::gpu::{DescriptorHeapId, DescriptorHeapKind, DeviceRef, ResourceId, ResourceView};

use super::stable_vec::StableVec;

enum HeapOwnership {
    /// The allocator created (and will destroy) the heap.
    Owned,
    /// A window `[start, start + capacity)` of somebody else's heap.
    External,
}

/// A descriptor slot range with per-slot view storage.
///
/// Slot indices are stable; the device-visible slot of index `i` is
/// `start + i` in the backing heap.
pub struct DescriptorAllocator {
    device: DeviceRef,
    kind: DescriptorHeapKind,
    heap: DescriptorHeapId,
    ownership: HeapOwnership,
    start: u32,
    capacity: u32,
    slots: StableVec<ResourceView>,
}

impl DescriptorAllocator {
    /// Create an allocator over a freshly created, non-shader-visible
    /// heap of `capacity` slots.
    pub fn new_owned(device: DeviceRef, kind: DescriptorHeapKind, capacity: u32) -> Result<Self> {
        let heap = device.create_descriptor_heap(kind, capacity.max(1), false)?;
        Ok(Self {
            device,
            kind,
            heap,
            ownership: HeapOwnership::Owned,
            start: 0,
            capacity: capacity.max(1),
            slots: StableVec::new(),
        })
    }

    /// Create an allocator over an externally provided heap window.
    pub fn new_external(
        device: DeviceRef,
        kind: DescriptorHeapKind,
        heap: DescriptorHeapId,
        start: u32,
        capacity: u32,
    ) -> Result<Self> {
        if capacity == 0 {
            return Err(QuarryError::InvalidConfiguration(
                "external descriptor range must hold at least one slot".into(),
            ));
        }
        Ok(Self {
            device,
            kind,
            heap,
            ownership: HeapOwnership::External,
            start,
            capacity,
            slots: StableVec::new(),
        })
    }

    /// Write `view` into a slot and return its index. With a `slot_hint`
    /// the view is created at exactly that index, which keeps descriptor
    /// slots aligned one-to-one with a component's logical indices.
    pub fn allocate(&mut self, view: ResourceView, slot_hint: Option<usize>) -> Result<usize> {
        if view.desc.kind().heap_kind() != self.kind {
            return Err(QuarryError::InvalidConfiguration(format!(
                "{:?} view in a {:?} descriptor allocator",
                view.desc.kind(),
                self.kind
            )));
        }

        let slot = match slot_hint {
            Some(index) => self.slots.add_at(view, index),
            None => self.slots.add(view),
        };

        if slot as u32 >= self.capacity {
            self.grow(slot as u32 + 1)?;
        }
        self.device
            .write_descriptor(self.heap, self.start + slot as u32, &view)?;
        Ok(slot)
    }

    /// Rewrite an existing slot with its stored description against a new
    /// underlying resource.
    pub fn reallocate(&mut self, slot: usize, resource: ResourceId) -> Result<()> {
        let view = self
            .slots
            .get_mut(slot)
            .ok_or_else(|| QuarryError::NotFound(format!("descriptor slot {slot} is empty")))?;
        view.resource = Some(resource);
        let view = *view;
        self.device
            .write_descriptor(self.heap, self.start + slot as u32, &view)
    }

    /// Release a slot for reuse. The device-side descriptor stays stale
    /// until the slot is reallocated.
    pub fn deallocate(&mut self, slot: usize) -> Result<()> {
        self.slots
            .remove(slot)
            .map(|_| ())
            .ok_or_else(|| QuarryError::NotFound(format!("descriptor slot {slot} is empty")))
    }

    /// The stored view of a slot.
    #[must_use]
    pub fn stored_view(&self, slot: usize) -> Option<ResourceView> {
        self.slots.get(slot).copied()
    }

    /// Backing heap and absolute device-visible index of a slot.
    #[must_use]
    pub fn handle(&self, slot: usize) -> (DescriptorHeapId, u32) {
        (self.heap, self.start + slot as u32)
    }

    /// Backing heap and the first slot of the range, for bulk copies.
    #[must_use]
    pub fn base(&self) -> (DescriptorHeapId, u32) {
        (self.heap, self.start)
    }

    /// Total slot span (live and free): the copy width that preserves
    /// logical index mapping.
    #[must_use]
    pub fn descriptor_count(&self) -> usize {
        self.slots.total_len()
    }

    #[must_use]
    pub fn kind(&self) -> DescriptorHeapKind {
        self.kind
    }

    /// Drop every slot, keeping the heap.
    pub fn reset(&mut self) {
        self.slots.clear();
    }

    // ── Internals ──────────────────────────────────────────────────────────

    /// Doubling growth for owned heaps. CPU-side descriptor heaps are not
    /// referenced by in-flight work, so the superseded heap is released
    /// immediately after its slots are copied over.
    fn grow(&mut self, needed: u32) -> Result<()> {
        if matches!(self.ownership, HeapOwnership::External) {
            return Err(QuarryError::OutOfResources(format!(
                "external descriptor range of {} slots exhausted",
                self.capacity
            )));
        }
        let mut new_capacity = self.capacity.max(1);
        while new_capacity < needed {
            new_capacity *= 2;
        }
        log::debug!(
            "descriptor allocator growing {} -> {new_capacity} slots",
            self.capacity
        );
        let new_heap = self
            .device
            .create_descriptor_heap(self.kind, new_capacity, false)?;
        self.device
            .copy_descriptors(new_heap, 0, self.heap, 0, self.capacity)?;
        self.device.destroy_descriptor_heap(self.heap);
        self.heap = new_heap;
        self.capacity = new_capacity;
        Ok(())
    }
}

impl Drop for DescriptorAllocator {
    fn drop(&mut self) {
        if matches!(self.ownership, HeapOwnership::Owned) {
            self.device.destroy_descriptor_heap(self.heap);
        }
    }
}
