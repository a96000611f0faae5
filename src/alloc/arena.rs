//! Free-Space Arena
//!
//! [`Arena`] manages a contiguous logical byte range as a set of chunks
//! that tile the range with no gaps or overlaps. Allocation splits a free
//! chunk (an alignment pre-pad and the unused tail become new free
//! chunks); deallocation coalesces with adjacent free chunks until no
//! adjacency remains. Each chunk carries typed side data that is reset to
//! its default when the chunk is freed.
//!
//! Chunk indices come from a [`StableVec`] and stay valid for the chunk's
//! lifetime, so callers can store them in resource identifiers.

use crate::errors::{QuarryError, Result};

use super::stable_vec::StableVec;

/// Placement strategy used when searching for a free chunk.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub enum AllocationStrategy {
    /// First free chunk that fits.
    #[default]
    FirstFit,
    /// Smallest free chunk that fits.
    BestFit,
    /// Largest free chunk that fits.
    WorstFit,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum ChunkStatus {
    Free,
    Occupied,
}

struct Chunk<T> {
    status: ChunkStatus,
    offset: u64,
    size: u64,
    data: T,
}

/// Read-only view of one chunk, used by invariant checks and debugging.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct ChunkInfo {
    pub index: usize,
    pub offset: u64,
    pub size: u64,
    pub occupied: bool,
}

/// Free-space map over a logical byte range with typed per-chunk side
/// data.
pub struct Arena<T: Default> {
    chunks: StableVec<Chunk<T>>,
    total_size: u64,
    occupied: usize,
}

impl<T: Default> Arena<T> {
    /// An arena covering `[start_offset, start_offset + size)`.
    ///
    /// A size of zero is allowed; space is added later through
    /// [`add_chunk`](Self::add_chunk).
    #[must_use]
    pub fn new(size: u64, start_offset: u64) -> Self {
        let mut chunks = StableVec::new();
        if size > 0 {
            chunks.add(Chunk {
                status: ChunkStatus::Free,
                offset: start_offset,
                size,
                data: T::default(),
            });
        }
        Self {
            chunks,
            total_size: size,
            occupied: 0,
        }
    }

    /// Reserve an aligned range of `size` bytes. Returns the stable index
    /// of the occupied chunk.
    ///
    /// Fails with `InvalidConfiguration` for a zero size or an alignment
    /// that is not a power of two greater than one, and with
    /// `OutOfResources` when no free chunk fits.
    pub fn allocate(
        &mut self,
        size: u64,
        alignment: u64,
        strategy: AllocationStrategy,
    ) -> Result<usize> {
        if size == 0 {
            return Err(QuarryError::InvalidConfiguration(
                "allocation size must be non-zero".into(),
            ));
        }
        Self::check_alignment(alignment)?;

        let index = self
            .find_chunk(size, alignment, strategy)
            .ok_or_else(|| {
                QuarryError::OutOfResources(format!(
                    "no free range of {size} bytes at alignment {alignment}"
                ))
            })?;
        self.split_chunk(index, size, alignment);
        self.occupied += 1;
        Ok(index)
    }

    /// Release the chunk at `index` and coalesce with adjacent free
    /// chunks. Side data is reset to its default.
    pub fn deallocate(&mut self, index: usize) -> Result<()> {
        let chunk = self
            .chunks
            .get_mut(index)
            .filter(|chunk| chunk.status == ChunkStatus::Occupied)
            .ok_or_else(|| QuarryError::NotFound(format!("no occupied chunk at index {index}")))?;
        chunk.status = ChunkStatus::Free;
        chunk.data = T::default();
        self.occupied -= 1;
        self.coalesce(index);
        Ok(())
    }

    /// Append `size` bytes of free space at the end of the range,
    /// optionally coalescing with a trailing free chunk.
    pub fn add_chunk(&mut self, size: u64, coalesce: bool) {
        let index = self.chunks.add(Chunk {
            status: ChunkStatus::Free,
            offset: self.total_size,
            size,
            data: T::default(),
        });
        self.total_size += size;
        if coalesce {
            self.coalesce(index);
        }
    }

    /// Deallocate every occupied chunk whose side data satisfies the
    /// predicate.
    pub fn remove_if(&mut self, predicate: impl Fn(&T) -> bool) {
        let candidates: Vec<usize> = self
            .chunks
            .iter()
            .filter(|(_, chunk)| chunk.status == ChunkStatus::Occupied && predicate(&chunk.data))
            .map(|(index, _)| index)
            .collect();
        for index in candidates {
            // Indices gathered above stay valid: coalescing only removes
            // free chunks.
            let _ = self.deallocate(index);
        }
    }

    /// Reset the arena to a single free chunk, optionally resizing the
    /// range.
    pub fn clear(&mut self, new_size: Option<u64>) {
        self.chunks.clear();
        self.occupied = 0;
        if let Some(size) = new_size {
            self.total_size = size;
        }
        if self.total_size > 0 {
            self.chunks.add(Chunk {
                status: ChunkStatus::Free,
                offset: 0,
                size: self.total_size,
                data: T::default(),
            });
        }
    }

    /// Offset of the chunk at `index`.
    #[must_use]
    pub fn offset_of(&self, index: usize) -> u64 {
        self.chunks.get(index).map_or(0, |chunk| chunk.offset)
    }

    /// Size of the chunk at `index`.
    #[must_use]
    pub fn size_of(&self, index: usize) -> u64 {
        self.chunks.get(index).map_or(0, |chunk| chunk.size)
    }

    #[must_use]
    pub fn data(&self, index: usize) -> Option<&T> {
        self.chunks.get(index).map(|chunk| &chunk.data)
    }

    #[must_use]
    pub fn data_mut(&mut self, index: usize) -> Option<&mut T> {
        self.chunks.get_mut(index).map(|chunk| &mut chunk.data)
    }

    /// Whether `index` names a live occupied chunk.
    #[must_use]
    pub fn is_occupied(&self, index: usize) -> bool {
        self.chunks
            .get(index)
            .is_some_and(|chunk| chunk.status == ChunkStatus::Occupied)
    }

    /// Total logical size of the managed range.
    #[must_use]
    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    /// Number of currently occupied chunks.
    #[must_use]
    pub fn occupied_count(&self) -> usize {
        self.occupied
    }

    /// Upper bound (exclusive) of chunk indices ever handed out.
    #[must_use]
    pub fn max_index(&self) -> usize {
        self.chunks.total_len()
    }

    /// Snapshot of all live chunks, unordered.
    pub fn iter_chunks(&self) -> impl Iterator<Item = ChunkInfo> + '_ {
        self.chunks.iter().map(|(index, chunk)| ChunkInfo {
            index,
            offset: chunk.offset,
            size: chunk.size,
            occupied: chunk.status == ChunkStatus::Occupied,
        })
    }

    // ── Internals ──────────────────────────────────────────────────────────

    fn check_alignment(alignment: u64) -> Result<()> {
        if alignment < 2 || !alignment.is_power_of_two() {
            return Err(QuarryError::InvalidConfiguration(format!(
                "alignment must be a power of two greater than one, got {alignment}"
            )));
        }
        Ok(())
    }

    /// Usable size of a free chunk once its offset is aligned, or `None`
    /// when aligning consumes the whole chunk.
    fn aligned_capacity(chunk: &Chunk<T>, alignment: u64) -> Option<u64> {
        let aligned = super::align_up(chunk.offset, alignment);
        let padding = aligned - chunk.offset;
        if padding >= chunk.size {
            return None;
        }
        Some(chunk.size - padding)
    }

    fn find_chunk(
        &self,
        size: u64,
        alignment: u64,
        strategy: AllocationStrategy,
    ) -> Option<usize> {
        let mut selected: Option<(usize, u64)> = None;
        for (index, chunk) in self.chunks.iter() {
            if chunk.status != ChunkStatus::Free {
                continue;
            }
            let Some(capacity) = Self::aligned_capacity(chunk, alignment) else {
                continue;
            };
            if capacity < size {
                continue;
            }
            match strategy {
                AllocationStrategy::FirstFit => return Some(index),
                AllocationStrategy::BestFit => {
                    if selected.is_none_or(|(_, best)| chunk.size < best) {
                        selected = Some((index, chunk.size));
                    }
                }
                AllocationStrategy::WorstFit => {
                    if selected.is_none_or(|(_, worst)| chunk.size > worst) {
                        selected = Some((index, chunk.size));
                    }
                }
            }
        }
        selected.map(|(index, _)| index)
    }

    /// Carve `size` aligned bytes out of the free chunk at `index`. The
    /// pre-pad before the aligned offset and the tail after the request
    /// become new free chunks.
    fn split_chunk(&mut self, index: usize, size: u64, alignment: u64) {
        let (offset, chunk_size) = {
            let chunk = self.chunks.get(index).expect("split target exists");
            (chunk.offset, chunk.size)
        };
        let aligned = super::align_up(offset, alignment);

        if aligned != offset {
            self.chunks.add(Chunk {
                status: ChunkStatus::Free,
                offset,
                size: aligned - offset,
                data: T::default(),
            });
        }

        let tail_start = aligned + size;
        let tail_size = (offset + chunk_size) - tail_start;
        if tail_size != 0 {
            self.chunks.add(Chunk {
                status: ChunkStatus::Free,
                offset: tail_start,
                size: tail_size,
                data: T::default(),
            });
        }

        let chunk = self.chunks.get_mut(index).expect("split target exists");
        chunk.offset = aligned;
        chunk.size = size;
        chunk.status = ChunkStatus::Occupied;
        chunk.data = T::default();
    }

    /// Merge the free chunk at `index` with any adjacent free chunk,
    /// repeating until no adjacency remains.
    fn coalesce(&mut self, index: usize) {
        let mut current = index;
        loop {
            let (start, end) = {
                let chunk = self.chunks.get(current).expect("coalesce target exists");
                (chunk.offset, chunk.offset + chunk.size)
            };

            let neighbor = self.chunks.iter().find_map(|(other_index, other)| {
                if other_index == current || other.status != ChunkStatus::Free {
                    return None;
                }
                let other_end = other.offset + other.size;
                (other.offset == end || other_end == start).then_some(other_index)
            });

            let Some(other_index) = neighbor else {
                return;
            };

            let (other_offset, other_size) = {
                let other = self.chunks.get(other_index).expect("neighbor exists");
                (other.offset, other.size)
            };

            // Keep the lower chunk, absorb the upper one.
            let (keep, drop_index) = if other_offset == end {
                (current, other_index)
            } else {
                (other_index, current)
            };
            let merged_size = self.size_of(current) + other_size;
            {
                let kept = self.chunks.get_mut(keep).expect("kept chunk exists");
                kept.size = merged_size;
            }
            self.chunks.remove(drop_index);
            current = keep;
        }
    }
}
