//! Component Data Mirrors
//!
//! Per-frame CPU shadows of buffer and texture contents. The mirror
//! keeps one compact byte buffer; per-resource headers are sorted by
//! offset, and removing an entry rewrites the trailing bytes with a
//! memory move and adjusts every subsequent header.
//!
//! Update scheduling follows the frame-multiplexed layer: setting data
//! arms a per-entry `frames_left` counter equal to the in-flight depth,
//! so the copy reaches each frame's resource exactly once.

use crate::errors::{QuarryError, Result};
use crate::gpu::TextureDesc;

use super::UpdateKind;

// ============================================================================
// Compact byte store
// ============================================================================

/// A header into the compact store. `key` is the component descriptor
/// index of the mirrored resource.
#[derive(Clone, Copy, Debug)]
struct Region {
    key: usize,
    start: usize,
    size: usize,
}

/// Compact byte buffer with offset-sorted regions.
#[derive(Default)]
struct CompactStore {
    data: Vec<u8>,
    regions: Vec<Region>,
}

impl CompactStore {
    fn position(&self, key: usize) -> Option<usize> {
        self.regions.iter().position(|region| region.key == key)
    }

    /// Append a region at the end of the buffer.
    fn insert(&mut self, key: usize, size: usize) -> usize {
        let start = self.data.len();
        self.data.resize(start + size, 0);
        self.regions.push(Region { key, start, size });
        self.regions.len() - 1
    }

    /// Remove a region, compacting the buffer and shifting every
    /// subsequent header down.
    fn remove(&mut self, position: usize) {
        let removed = self.regions.remove(position);
        self.data
            .copy_within(removed.start + removed.size.., removed.start);
        self.data.truncate(self.data.len() - removed.size);
        for region in &mut self.regions[position..] {
            region.start -= removed.size;
        }
    }

    fn bytes(&self, position: usize) -> &[u8] {
        let region = self.regions[position];
        &self.data[region.start..region.start + region.size]
    }

    fn bytes_mut(&mut self, position: usize) -> &mut [u8] {
        let region = self.regions[position];
        &mut self.data[region.start..region.start + region.size]
    }
}

// ============================================================================
// Buffer mirror
// ============================================================================

/// CPU shadow of a buffer component's contents.
pub struct BufferMirror {
    kind: UpdateKind,
    frames: usize,
    store: CompactStore,
    /// Parallel to `store.regions`: copies still owed to in-flight
    /// frames.
    frames_left: Vec<usize>,
}

impl BufferMirror {
    #[must_use]
    pub fn new(kind: UpdateKind, frames: usize) -> Self {
        Self {
            kind,
            frames,
            store: CompactStore::default(),
            frames_left: Vec::new(),
        }
    }

    #[must_use]
    pub fn kind(&self) -> UpdateKind {
        self.kind
    }

    /// Register a resource of `size` bytes under `descriptor`, optionally
    /// seeding its contents.
    pub fn add(&mut self, descriptor: usize, size: usize, initial: Option<&[u8]>) {
        if !self.kind.keeps_mirror() {
            return;
        }
        let position = self.store.insert(descriptor, size);
        self.frames_left.push(0);
        if let Some(data) = initial {
            self.store.bytes_mut(position)[..data.len()].copy_from_slice(data);
            self.frames_left[position] = self.frames;
        }
    }

    pub fn remove(&mut self, descriptor: usize) {
        if let Some(position) = self.store.position(descriptor) {
            self.store.remove(position);
            self.frames_left.remove(position);
        }
    }

    /// Replace the CPU copy and arm uploads for the next N frames.
    pub fn set_data(&mut self, descriptor: usize, data: &[u8]) -> Result<()> {
        if !self.kind.keeps_mirror() {
            return Ok(());
        }
        let position = self.store.position(descriptor).ok_or_else(|| {
            QuarryError::NotFound(format!("no mirrored buffer for descriptor {descriptor}"))
        })?;
        let bytes = self.store.bytes_mut(position);
        if data.len() > bytes.len() {
            return Err(QuarryError::InvalidConfiguration(format!(
                "mirror update of {} bytes exceeds the {} byte entry",
                data.len(),
                bytes.len()
            )));
        }
        bytes[..data.len()].copy_from_slice(data);
        self.frames_left[position] = self.frames;
        Ok(())
    }

    /// The CPU copy for a resource.
    #[must_use]
    pub fn data(&self, descriptor: usize) -> Option<&[u8]> {
        self.store.position(descriptor).map(|pos| self.store.bytes(pos))
    }

    /// Whether any entry still owes an upload this frame.
    #[must_use]
    pub fn has_pending_updates(&self) -> bool {
        self.kind.uses_uploader() && self.frames_left.iter().any(|left| *left > 0)
    }

    /// Visit every entry owing an upload, decrementing its counter.
    /// The callback receives `(descriptor, bytes)`.
    pub fn drain_pending(
        &mut self,
        mut upload: impl FnMut(usize, &[u8]) -> Result<()>,
    ) -> Result<()> {
        if !self.kind.keeps_mirror() {
            return Ok(());
        }
        for position in 0..self.store.regions.len() {
            if self.frames_left[position] == 0 {
                continue;
            }
            let key = self.store.regions[position].key;
            upload(key, self.store.bytes(position))?;
            self.frames_left[position] -= 1;
        }
        Ok(())
    }
}

// ============================================================================
// Texture mirror
// ============================================================================

/// Location of one mirrored subresource inside its texture's region.
#[derive(Clone, Copy, Debug)]
struct SubresourceHeader {
    frames_left: usize,
    offset: usize,
    width: u32,
    height: u32,
}

struct TextureEntry {
    descriptor: usize,
    subresources: Vec<SubresourceHeader>,
}

/// CPU shadow of a texture component's contents, tracked per
/// subresource. Rows are stored packed (no pitch padding).
pub struct Texture2dMirror {
    kind: UpdateKind,
    frames: usize,
    store: CompactStore,
    entries: Vec<TextureEntry>,
}

impl Texture2dMirror {
    #[must_use]
    pub fn new(kind: UpdateKind, frames: usize) -> Self {
        Self {
            kind,
            frames,
            store: CompactStore::default(),
            entries: Vec::new(),
        }
    }

    #[must_use]
    pub fn kind(&self) -> UpdateKind {
        self.kind
    }

    /// Register a texture, reserving packed storage for every
    /// subresource.
    pub fn add(&mut self, descriptor: usize, desc: &TextureDesc) {
        if !self.kind.keeps_mirror() {
            return;
        }
        let mut subresources = Vec::with_capacity(desc.subresource_count() as usize);
        let mut offset = 0usize;
        for subresource in 0..desc.subresource_count() {
            let mip = (subresource % u32::from(desc.mip_levels)) as u16;
            let (width, height) = desc.mip_extent(mip);
            subresources.push(SubresourceHeader {
                frames_left: 0,
                offset,
                width,
                height,
            });
            offset += desc.subresource_size(subresource) as usize;
        }
        self.store.insert(descriptor, offset);
        self.entries.push(TextureEntry {
            descriptor,
            subresources,
        });
    }

    pub fn remove(&mut self, descriptor: usize) {
        if let Some(position) = self.store.position(descriptor) {
            self.store.remove(position);
            self.entries.remove(position);
        }
    }

    /// Replace one subresource's CPU copy and arm uploads for the next N
    /// frames. `data` must be packed rows covering the whole subresource.
    pub fn set_data(&mut self, descriptor: usize, subresource: u32, data: &[u8]) -> Result<()> {
        if !self.kind.keeps_mirror() {
            return Ok(());
        }
        let position = self.store.position(descriptor).ok_or_else(|| {
            QuarryError::NotFound(format!("no mirrored texture for descriptor {descriptor}"))
        })?;
        let header = self.entries[position]
            .subresources
            .get(subresource as usize)
            .copied()
            .ok_or_else(|| {
                QuarryError::NotFound(format!(
                    "texture has no subresource {subresource} to mirror"
                ))
            })?;

        let region = self.store.bytes_mut(position);
        if header.offset + data.len() > region.len() {
            return Err(QuarryError::InvalidConfiguration(format!(
                "texture mirror update of {} bytes overruns the entry",
                data.len()
            )));
        }
        region[header.offset..header.offset + data.len()].copy_from_slice(data);
        self.entries[position].subresources[subresource as usize].frames_left = self.frames;
        Ok(())
    }

    /// The CPU copy of one subresource.
    #[must_use]
    pub fn data(&self, descriptor: usize, subresource: u32) -> Option<&[u8]> {
        let position = self.store.position(descriptor)?;
        let headers = &self.entries[position].subresources;
        let header = headers.get(subresource as usize)?;
        let end = headers
            .get(subresource as usize + 1)
            .map_or(self.store.bytes(position).len(), |next| next.offset);
        Some(&self.store.bytes(position)[header.offset..end])
    }

    #[must_use]
    pub fn has_pending_updates(&self) -> bool {
        self.kind.uses_uploader()
            && self.entries.iter().any(|entry| {
                entry
                    .subresources
                    .iter()
                    .any(|subresource| subresource.frames_left > 0)
            })
    }

    /// Visit every subresource owing an upload, decrementing its
    /// counter. The callback receives
    /// `(descriptor, subresource, bytes, width, height)`.
    pub fn drain_pending(
        &mut self,
        mut upload: impl FnMut(usize, u32, &[u8], u32, u32) -> Result<()>,
    ) -> Result<()> {
        if !self.kind.keeps_mirror() {
            return Ok(());
        }
        for position in 0..self.entries.len() {
            let descriptor = self.entries[position].descriptor;
            let count = self.entries[position].subresources.len();
            for subresource in 0..count {
                let header = self.entries[position].subresources[subresource];
                if header.frames_left == 0 {
                    continue;
                }
                let region_len = self.store.bytes(position).len();
                let end = self.entries[position]
                    .subresources
                    .get(subresource + 1)
                    .map_or(region_len, |next| next.offset);
                // Borrow the bytes for the callback only.
                let bytes =
                    &self.store.bytes(position)[header.offset..end];
                upload(
                    descriptor,
                    subresource as u32,
                    bytes,
                    header.width,
                    header.height,
                )?;
                self.entries[position].subresources[subresource].frames_left -= 1;
            }
        }
        Ok(())
    }
}
