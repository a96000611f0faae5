//! Managed Descriptor Heap
//!
//! A paired CPU-staging heap of P slots and a shader-visible heap of
//! N·P slots, partitioned into one slab per in-flight frame. Category
//! descriptor tables are copied into the staging slab each frame, then
//! uploaded into the active frame's shader-visible slab in one bulk
//! copy.
//!
//! When a copy would overflow the per-frame capacity, both heaps double.
//! The superseded shader-visible heap may still be referenced by
//! in-flight command lists, so it is pushed onto a retirement list and
//! released only after N swaps. The staging heap is CPU-only and is
//! released immediately.

use rustc_hash::FxHashMap;

use crate::component::ResourceComponent;
use crate::errors::{QuarryError, Result};
use crate::gpu::{DescriptorHeapId, DescriptorHeapKind, DeviceRef, ViewKind};

use super::categories::CategoryId;

#[derive(Clone, Copy, Default)]
struct CategoryOffsets {
    /// Slab-relative offsets per shader-bindable view kind.
    cbv: Option<u64>,
    srv: Option<u64>,
    uav: Option<u64>,
}

struct RetiredHeap {
    heap: DescriptorHeapId,
    frames_left: usize,
}

/// Frame-sliced shader-visible descriptor heap with doubling growth.
pub struct ManagedDescriptorHeap {
    device: DeviceRef,
    frames: usize,
    active: usize,
    per_frame: u32,
    cursor: u32,
    cpu_heap: DescriptorHeapId,
    gpu_heap: DescriptorHeapId,
    category_offsets: FxHashMap<CategoryId, CategoryOffsets>,
    global_offset: Option<u64>,
    retired: Vec<RetiredHeap>,
}

impl ManagedDescriptorHeap {
    pub fn new(device: DeviceRef, frames: usize, descriptors_per_frame: u32) -> Result<Self> {
        if frames == 0 || descriptors_per_frame == 0 {
            return Err(QuarryError::InvalidConfiguration(
                "descriptor heap needs at least one frame and one slot".into(),
            ));
        }
        let cpu_heap = device.create_descriptor_heap(
            DescriptorHeapKind::ShaderBindable,
            descriptors_per_frame,
            false,
        )?;
        let gpu_heap = device.create_descriptor_heap(
            DescriptorHeapKind::ShaderBindable,
            descriptors_per_frame * frames as u32,
            true,
        )?;
        Ok(Self {
            device,
            frames,
            active: frames - 1,
            per_frame: descriptors_per_frame,
            cursor: 0,
            cpu_heap,
            gpu_heap,
            category_offsets: FxHashMap::default(),
            global_offset: None,
            retired: Vec::new(),
        })
    }

    /// Copy a component's shader-bindable descriptor tables into the
    /// current frame's staging slab and record where each view kind
    /// landed.
    pub fn add_category_descriptors(
        &mut self,
        id: CategoryId,
        component: &dyn ResourceComponent,
    ) -> Result<()> {
        let count = component.descriptor_count() as u32;
        let mut offsets = CategoryOffsets::default();

        for kind in [ViewKind::Cbv, ViewKind::Srv, ViewKind::Uav] {
            if !component.has_view_kind(kind) {
                continue;
            }
            let (heap, start) = component
                .descriptor_base(kind)
                .expect("component advertises the view kind");
            let offset = u64::from(self.cursor);
            if count > 0 {
                self.store_descriptors(heap, start, count)?;
            }
            match kind {
                ViewKind::Cbv => offsets.cbv = Some(offset),
                ViewKind::Srv => offsets.srv = Some(offset),
                ViewKind::Uav => offsets.uav = Some(offset),
                _ => unreachable!(),
            }
        }

        self.category_offsets.insert(id, offsets);
        Ok(())
    }

    /// Copy a block of descriptors (the transient view table) into the
    /// staging slab and record its offset.
    pub fn add_global_descriptors(
        &mut self,
        source: (DescriptorHeapId, u32),
        count: u32,
    ) -> Result<()> {
        self.global_offset = Some(u64::from(self.cursor));
        if count > 0 {
            self.store_descriptors(source.0, source.1, count)?;
        }
        Ok(())
    }

    /// Absolute offset (into the shader-visible heap) of the global
    /// descriptor block of the current frame.
    #[must_use]
    pub fn global_offset(&self) -> u64 {
        self.slab_base() + self.global_offset.unwrap_or(0)
    }

    /// Absolute offset of a category's table for one view kind.
    pub fn category_offset(&self, id: CategoryId, kind: ViewKind) -> Result<u64> {
        let offsets = self.category_offsets.get(&id).ok_or_else(|| {
            QuarryError::NotFound(format!("category {id:?} has no staged descriptors"))
        })?;
        let relative = match kind {
            ViewKind::Cbv => offsets.cbv,
            ViewKind::Srv => offsets.srv,
            ViewKind::Uav => offsets.uav,
            ViewKind::Rtv | ViewKind::Dsv => None,
        }
        .ok_or_else(|| {
            QuarryError::InvalidConfiguration(format!(
                "category {id:?} staged no {kind:?} descriptors"
            ))
        })?;
        Ok(self.slab_base() + relative)
    }

    /// Copy the staged CPU slab into the current frame's shader-visible
    /// slab.
    pub fn upload_current_frame_heap(&mut self) -> Result<()> {
        self.device.copy_descriptors(
            self.gpu_heap,
            self.slab_base() as u32,
            self.cpu_heap,
            0,
            self.per_frame,
        )
    }

    /// The shader-visible heap jobs bind.
    #[must_use]
    pub fn shader_visible_heap(&self) -> DescriptorHeapId {
        self.gpu_heap
    }

    /// Staging heap and cursor, exposed for inspection.
    #[must_use]
    pub fn staging_heap(&self) -> DescriptorHeapId {
        self.cpu_heap
    }

    #[must_use]
    pub fn cursor(&self) -> u32 {
        self.cursor
    }

    #[must_use]
    pub fn descriptors_per_frame(&self) -> u32 {
        self.per_frame
    }

    #[must_use]
    pub fn retired_heap_count(&self) -> usize {
        self.retired.len()
    }

    /// Advance the frame: reset the staging cursor and drain heap
    /// retirements.
    pub fn swap_frame(&mut self) {
        self.active = (self.active + 1) % self.frames;
        self.cursor = 0;
        self.global_offset = None;
        self.category_offsets.clear();

        let device = self.device.clone();
        self.retired.retain_mut(|retired| {
            retired.frames_left -= 1;
            if retired.frames_left == 0 {
                device.destroy_descriptor_heap(retired.heap);
                false
            } else {
                true
            }
        });
    }

    // ── Internals ──────────────────────────────────────────────────────────

    fn slab_base(&self) -> u64 {
        u64::from(self.per_frame) * self.active as u64
    }

    fn store_descriptors(
        &mut self,
        source: DescriptorHeapId,
        source_start: u32,
        count: u32,
    ) -> Result<()> {
        if self.per_frame - self.cursor < count {
            self.grow(self.cursor + count)?;
        }
        self.device
            .copy_descriptors(self.cpu_heap, self.cursor, source, source_start, count)?;
        self.cursor += count;
        Ok(())
    }

    /// Double both heaps until the staging slab holds `needed` slots.
    /// Already-staged descriptors move into the new staging heap at their
    /// old offsets; the old shader-visible heap is retired for N frames.
    fn grow(&mut self, needed: u32) -> Result<()> {
        let mut new_per_frame = self.per_frame;
        while new_per_frame < needed {
            new_per_frame *= 2;
        }
        log::info!(
            "managed descriptor heap growing {} -> {new_per_frame} descriptors per frame",
            self.per_frame
        );

        let new_cpu = self.device.create_descriptor_heap(
            DescriptorHeapKind::ShaderBindable,
            new_per_frame,
            false,
        )?;
        let new_gpu = self.device.create_descriptor_heap(
            DescriptorHeapKind::ShaderBindable,
            new_per_frame * self.frames as u32,
            true,
        )?;
        if self.cursor > 0 {
            self.device
                .copy_descriptors(new_cpu, 0, self.cpu_heap, 0, self.cursor)?;
        }

        self.device.destroy_descriptor_heap(self.cpu_heap);
        self.retired.push(RetiredHeap {
            heap: self.gpu_heap,
            frames_left: self.frames,
        });

        self.cpu_heap = new_cpu;
        self.gpu_heap = new_gpu;
        self.per_frame = new_per_frame;
        Ok(())
    }
}

impl Drop for ManagedDescriptorHeap {
    fn drop(&mut self) {
        self.device.destroy_descriptor_heap(self.cpu_heap);
        self.device.destroy_descriptor_heap(self.gpu_heap);
        for retired in &self.retired {
            self.device.destroy_descriptor_heap(retired.heap);
        }
    }
}
