//! Chunk layouts along the leading axis

use crate::{Error, Result};
use std::ops::Range;
use std::sync::Arc;

/// One chunk of a layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Chunk {
    /// Position of the chunk in its layout
    pub index: usize,
    /// First row
    pub start: usize,
    /// One past the last row
    pub end: usize,
}

impl Chunk {
    /// Rows in this chunk
    #[must_use]
    pub const fn len(&self) -> usize {
        self.end - self.start
    }

    /// `true` if the chunk holds no rows
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.start == self.end
    }

    /// Rows as a range
    #[must_use]
    pub const fn rows(&self) -> Range<usize> {
        self.start..self.end
    }
}

/// Part of a source chunk covered by a sliced layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkPiece {
    /// Chunk of the source layout
    pub source: usize,
    /// First row within that chunk
    pub local_start: usize,
    /// One past the last row within that chunk
    pub local_end: usize,
    /// Whether the piece is the whole source chunk
    pub whole: bool,
}

/// Partition of the leading axis into contiguous, non-empty chunks.
///
/// Stored as cumulative offsets `[0, o1, ..., total]`. Layouts are shared
/// cheaply between nodes and compare by value.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChunkLayout {
    offsets: Arc<[usize]>,
}

impl ChunkLayout {
    /// Layout from cumulative offsets.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidLayout`] unless the offsets start at zero and
    /// strictly increase.
    pub fn from_offsets(offsets: Vec<usize>) -> Result<Self> {
        if offsets.first() != Some(&0) {
            return Err(Error::invalid_layout("offsets must start at 0"));
        }
        if offsets.windows(2).any(|w| w[1] <= w[0]) {
            return Err(Error::invalid_layout(format!(
                "offsets must strictly increase: {offsets:?}"
            )));
        }
        Ok(Self {
            offsets: offsets.into(),
        })
    }

    /// Layout from chunk lengths; empty chunks are dropped.
    #[must_use]
    pub fn from_chunk_sizes(sizes: impl IntoIterator<Item = usize>) -> Self {
        let mut offsets = vec![0];
        let mut total = 0;
        for size in sizes {
            if size > 0 {
                total += size;
                offsets.push(total);
            }
        }
        Self {
            offsets: offsets.into(),
        }
    }

    /// `total` rows cut into chunks of `chunk_rows`, the last one shorter.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidLayout`] if `chunk_rows` is zero.
    pub fn uniform(total: usize, chunk_rows: usize) -> Result<Self> {
        if chunk_rows == 0 {
            return Err(Error::invalid_layout("chunk size must be positive"));
        }
        let full = total / chunk_rows;
        let rest = total % chunk_rows;
        Ok(Self::from_chunk_sizes(
            std::iter::repeat_n(chunk_rows, full).chain(std::iter::once(rest)),
        ))
    }

    /// All `rows` in one chunk (no chunks if `rows` is zero).
    #[must_use]
    pub fn single(rows: usize) -> Self {
        Self::from_chunk_sizes([rows])
    }

    /// Cumulative offsets
    #[must_use]
    pub fn offsets(&self) -> &[usize] {
        &self.offsets
    }

    /// Number of chunks
    #[must_use]
    pub fn num_chunks(&self) -> usize {
        self.offsets.len() - 1
    }

    /// Rows covered by the layout
    #[must_use]
    pub fn total_rows(&self) -> usize {
        self.offsets[self.offsets.len() - 1]
    }

    /// Chunk at `index`
    #[must_use]
    pub fn chunk(&self, index: usize) -> Option<Chunk> {
        let start = *self.offsets.get(index)?;
        let end = *self.offsets.get(index + 1)?;
        Some(Chunk { index, start, end })
    }

    /// Iterate over all chunks in order.
    pub fn chunks(&self) -> impl Iterator<Item = Chunk> + '_ {
        self.offsets.windows(2).enumerate().map(|(index, w)| Chunk {
            index,
            start: w[0],
            end: w[1],
        })
    }

    /// Chunk containing `row`
    #[must_use]
    pub fn locate(&self, row: usize) -> Option<usize> {
        if row >= self.total_rows() {
            return None;
        }
        match self.offsets.binary_search(&row) {
            Ok(index) => Some(index),
            Err(insert) => Some(insert - 1),
        }
    }

    /// Layout of `self` followed by `other`.
    #[must_use]
    pub fn concat(&self, other: &Self) -> Self {
        Self::from_chunk_sizes(
            self.chunks()
                .map(|c| c.len())
                .chain(other.chunks().map(|c| c.len())),
        )
    }

    /// Layout of rows `range`, keeping the source chunk boundaries that fall
    /// inside it, plus the source piece behind each resulting chunk.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OutOfBounds`] if the range is reversed or runs past
    /// the last row.
    pub fn slice(&self, range: Range<usize>) -> Result<(Self, Vec<ChunkPiece>)> {
        if range.start > range.end || range.end > self.total_rows() {
            return Err(Error::out_of_bounds(
                "slice",
                format!(
                    "rows {}..{} of {} rows",
                    range.start,
                    range.end,
                    self.total_rows()
                ),
            ));
        }
        let pieces: Vec<ChunkPiece> = self
            .chunks()
            .filter(|c| c.start < range.end && c.end > range.start)
            .map(|c| {
                let start = c.start.max(range.start);
                let end = c.end.min(range.end);
                ChunkPiece {
                    source: c.index,
                    local_start: start - c.start,
                    local_end: end - c.start,
                    whole: start == c.start && end == c.end,
                }
            })
            .collect();
        let layout =
            Self::from_chunk_sizes(pieces.iter().map(|p| p.local_end - p.local_start));
        Ok((layout, pieces))
    }
}
