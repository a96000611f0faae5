//! Staging Uploader
//!
//! A mapped upload-heap buffer that stages CPU data and records copy
//! commands into placed resources. Sub-ranges are carved out of an
//! [`Arena`] per upload; nothing is freed individually. The whole
//! frame's worth of staging memory is released at once by
//! [`StagingUploader::restore_used_memory`].

use crate::errors::{QuarryError, Result};
use crate::gpu::{
    CommandListId, DeviceRef, Format, HeapFlags, HeapKind, ResourceId, TextureCopyRegion,
};

use super::arena::{AllocationStrategy, Arena};
use super::heap_pool::{HeapChunk, HeapPoolRef};

/// Layout of CPU texture data handed to
/// [`StagingUploader::upload_texture`]. Rows are packed (no pitch
/// padding); the uploader re-pitches them into the staging buffer.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct TextureUploadInfo {
    pub width: u32,
    pub height: u32,
    pub depth: u32,
    pub texel_size: u32,
    pub dst_x: u32,
    pub dst_y: u32,
    pub dst_z: u32,
    pub format: Format,
}

impl TextureUploadInfo {
    #[must_use]
    pub fn texture2d(format: Format, width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            depth: 1,
            texel_size: format.texel_size(),
            dst_x: 0,
            dst_y: 0,
            dst_z: 0,
            format,
        }
    }
}

/// Ring-style staging buffer for CPU→GPU uploads.
pub struct StagingUploader {
    device: DeviceRef,
    pool: HeapPoolRef,
    chunk: HeapChunk,
    buffer: ResourceId,
    ranges: Arena<()>,
    strategy: AllocationStrategy,
}

impl StagingUploader {
    pub fn new(
        device: DeviceRef,
        pool: HeapPoolRef,
        size: u64,
        strategy: AllocationStrategy,
    ) -> Result<Self> {
        if size == 0 {
            return Err(QuarryError::InvalidConfiguration(
                "staging buffer size must be non-zero".into(),
            ));
        }
        let chunk = pool
            .borrow_mut()
            .allocate_chunk(size, HeapKind::Upload, HeapFlags::BUFFERS)?;
        let buffer = device.create_placed_buffer(
            chunk.heap,
            chunk.start,
            chunk.size(),
            crate::gpu::BindFlags::empty(),
            crate::gpu::ResourceState::COMMON,
        )?;
        Ok(Self {
            device,
            pool,
            chunk,
            buffer,
            ranges: Arena::new(chunk.size(), 0),
            strategy,
        })
    }

    /// Stage `data` and record a copy into `dst` at `dst_offset`.
    pub fn upload_buffer(
        &mut self,
        dst: ResourceId,
        list: CommandListId,
        data: &[u8],
        dst_offset: u64,
        alignment: u64,
    ) -> Result<()> {
        let index = self
            .ranges
            .allocate(data.len() as u64, alignment, self.strategy)?;
        let offset = self.ranges.offset_of(index);
        self.device.write_mapped(self.buffer, offset, data)?;
        self.device
            .cmd_copy_buffer(list, self.buffer, offset, dst, dst_offset, data.len() as u64)
    }

    /// Stage packed texture rows and record a copy into one subresource
    /// of `dst`. `alignment` must be at least the device's copy-placement
    /// alignment; weaker alignments are rejected rather than left
    /// unspecified.
    pub fn upload_texture(
        &mut self,
        dst: ResourceId,
        list: CommandListId,
        data: &[u8],
        info: &TextureUploadInfo,
        subresource: u32,
        alignment: u64,
    ) -> Result<()> {
        let copy_alignment = self.device.copy_alignment();
        if alignment < copy_alignment {
            return Err(QuarryError::InvalidConfiguration(format!(
                "texture upload alignment {alignment} below the copy placement alignment \
                 {copy_alignment}"
            )));
        }

        let row_bytes = u64::from(info.width) * u64::from(info.texel_size);
        let rows = u64::from(info.height) * u64::from(info.depth);
        if data.len() as u64 != row_bytes * rows {
            return Err(QuarryError::InvalidConfiguration(format!(
                "texture upload of {} bytes does not match {rows} packed rows of {row_bytes} bytes",
                data.len()
            )));
        }

        let row_pitch = super::align_up(row_bytes, copy_alignment);
        let total = row_pitch * rows;
        let index = self.ranges.allocate(total, alignment, self.strategy)?;
        let base = self.ranges.offset_of(index);

        // Re-pitch row by row so callers never pad their data.
        for row in 0..rows {
            let start = (row * row_bytes) as usize;
            self.device.write_mapped(
                self.buffer,
                base + row * row_pitch,
                &data[start..start + row_bytes as usize],
            )?;
        }

        let region = TextureCopyRegion {
            width: info.width,
            height: info.height,
            depth: info.depth,
            dst_x: info.dst_x,
            dst_y: info.dst_y,
            dst_z: info.dst_z,
            row_pitch,
            texel_size: info.texel_size,
        };
        self.device
            .cmd_copy_buffer_to_texture(list, self.buffer, base, dst, subresource, &region)
    }

    /// Release every sub-range staged since the last restore. Called once
    /// per frame on the active uploader, after the GPU has consumed the
    /// frame's copies.
    pub fn restore_used_memory(&mut self) {
        self.ranges.clear(None);
    }

    /// Bytes currently reserved by staged uploads.
    #[must_use]
    pub fn used_bytes(&self) -> u64 {
        self.ranges
            .iter_chunks()
            .filter(|chunk| chunk.occupied)
            .map(|chunk| chunk.size)
            .sum()
    }
}

impl Drop for StagingUploader {
    fn drop(&mut self) {
        self.device.destroy_resource(self.buffer);
        let _ = self.pool.borrow_mut().deallocate_chunk(&self.chunk);
    }
}
