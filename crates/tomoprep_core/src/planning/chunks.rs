//! Chunk planning for array jobs.

use thiserror::Error;

use crate::models::ChunkDescriptor;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChunkError {
    #[error("Chunk count must be at least 1")]
    ZeroChunks,

    #[error("Invalid slice range: first {first} is after last {last}")]
    InvalidRange { first: usize, last: usize },

    #[error("Cannot split {slices} slices into {chunks} chunks")]
    TooManyChunks { chunks: usize, slices: usize },
}

pub type ChunkResult<T> = Result<T, ChunkError>;

/// Partitions inclusive slice ranges.
pub struct ChunkPlanner;

impl ChunkPlanner {
    /// Split `[first, last]` into exactly `n` contiguous chunks.
    ///
    /// Every chunk gets `(last - first + 1) / n` slices; the final chunk
    /// also absorbs the remainder.
    pub fn plan(first: usize, last: usize, n: usize) -> ChunkResult<Vec<ChunkDescriptor>> {
        if n == 0 {
            return Err(ChunkError::ZeroChunks);
        }
        if first > last {
            return Err(ChunkError::InvalidRange { first, last });
        }
        let slices = last - first + 1;
        if n > slices {
            return Err(ChunkError::TooManyChunks { chunks: n, slices });
        }

        let size = slices / n;
        let chunks = (0..n)
            .map(|i| ChunkDescriptor {
                chunk_id: i,
                task_id: i + 1,
                start_slice: first + i * size,
                end_slice: if i + 1 == n {
                    last
                } else {
                    first + (i + 1) * size - 1
                },
            })
            .collect();
        Ok(chunks)
    }
}
