//! Heap Pool
//!
//! A per-process cache of device heaps keyed by (heap kind, heap flags).
//! Chunks handed out span an entire heap; a heap is reusable only when it
//! is wholly free. There is no coalescing across heaps.

use std::cell::RefCell;
use std::rc::Rc;

use crate::errors::{QuarryError, Result};
use crate::gpu::{DeviceRef, HeapFlags, HeapId, HeapKind};

/// Shared handle to a heap pool. Suballocators borrow the pool while in
/// use; the owning façade keeps it alive for the renderer's lifetime.
pub type HeapPoolRef = Rc<RefCell<HeapPool>>;

/// A span of a device heap handed out by the pool.
///
/// Pool chunks always cover the whole heap (`start == 0`,
/// `end == heap size`); the type still carries the range so suballocators
/// can also operate on externally provided sub-spans.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct HeapChunk {
    pub kind: HeapKind,
    pub flags: HeapFlags,
    pub heap: HeapId,
    pub start: u64,
    pub end: u64,
}

impl HeapChunk {
    #[must_use]
    pub const fn size(&self) -> u64 {
        self.end - self.start
    }
}

struct PooledHeap {
    heap: HeapId,
    size: u64,
    kind: HeapKind,
    flags: HeapFlags,
    in_use: bool,
}

/// Creates and retains large device heaps for reuse.
pub struct HeapPool {
    device: DeviceRef,
    heaps: Vec<PooledHeap>,
}

impl HeapPool {
    #[must_use]
    pub fn new(device: DeviceRef) -> Self {
        Self {
            device,
            heaps: Vec::new(),
        }
    }

    /// Wrap a pool in the shared handle suballocators expect.
    #[must_use]
    pub fn new_shared(device: DeviceRef) -> HeapPoolRef {
        Rc::new(RefCell::new(Self::new(device)))
    }

    /// Hand out a chunk spanning a whole heap of at least `min_size`
    /// bytes. A cached, wholly free heap of matching kind and flags is
    /// reused when large enough; otherwise a new heap is created with the
    /// size rounded up to the device's heap alignment.
    pub fn allocate_chunk(
        &mut self,
        min_size: u64,
        kind: HeapKind,
        flags: HeapFlags,
    ) -> Result<HeapChunk> {
        let alignment = self.device.heap_alignment();
        let size = min_size.max(1).div_ceil(alignment) * alignment;

        if let Some(entry) = self
            .heaps
            .iter_mut()
            .find(|h| !h.in_use && h.kind == kind && h.flags == flags && h.size >= size)
        {
            entry.in_use = true;
            return Ok(HeapChunk {
                kind,
                flags,
                heap: entry.heap,
                start: 0,
                end: entry.size,
            });
        }

        let heap = self.device.create_heap(size, kind, flags).map_err(|err| {
            QuarryError::OutOfResources(format!("failed to create {size} byte heap: {err}"))
        })?;
        log::debug!("heap pool created {size} byte {kind:?} heap {:?}", heap);
        self.heaps.push(PooledHeap {
            heap,
            size,
            kind,
            flags,
            in_use: true,
        });
        Ok(HeapChunk {
            kind,
            flags,
            heap,
            start: 0,
            end: size,
        })
    }

    /// Return a chunk's heap to the cache for reuse.
    pub fn deallocate_chunk(&mut self, chunk: &HeapChunk) -> Result<()> {
        let entry = self
            .heaps
            .iter_mut()
            .find(|h| h.heap == chunk.heap)
            .ok_or_else(|| {
                QuarryError::NotFound(format!("heap {:?} is not pool managed", chunk.heap))
            })?;
        entry.in_use = false;
        Ok(())
    }

    /// Number of cached heaps of one kind, in use or free.
    #[must_use]
    pub fn heap_count(&self, kind: HeapKind) -> usize {
        self.heaps.iter().filter(|h| h.kind == kind).count()
    }
}

impl Drop for HeapPool {
    fn drop(&mut self) {
        for entry in &self.heaps {
            self.device.destroy_heap(entry.heap);
        }
    }
}
