//! Chunk, scheduler task and rotation-centre structures.

use serde::{Deserialize, Serialize};

use super::enums::TaskState;

/// A contiguous slice range handled by one scheduler task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkDescriptor {
    /// Zero-based chunk number.
    pub chunk_id: usize,
    /// One-based scheduler task number (`chunk_id + 1`).
    pub task_id: usize,
    /// First slice, inclusive.
    pub start_slice: usize,
    /// Last slice, inclusive.
    pub end_slice: usize,
}

impl ChunkDescriptor {
    /// Number of slices covered.
    pub fn slice_count(&self) -> usize {
        self.end_slice - self.start_slice + 1
    }

    /// Manifest line written to `chunklist.txt`.
    pub fn manifest_line(&self) -> String {
        format!(
            "chunk {} sge-task {} start {} end {} num {}",
            self.chunk_id,
            self.task_id,
            self.start_slice,
            self.end_slice,
            self.slice_count()
        )
    }
}

/// Scheduler-assigned job identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    /// Wrap an identifier that has already been validated as numeric.
    pub(crate) fn new_unchecked(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One task of a submitted array job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobTask {
    pub job_id: JobId,
    pub task_id: usize,
    pub state: TaskState,
}

impl JobTask {
    pub fn new(job_id: JobId, task_id: usize) -> Self {
        Self {
            job_id,
            task_id,
            state: TaskState::Pending,
        }
    }

    /// Move to `next` if the transition is monotonic.
    ///
    /// Returns false (leaving the state untouched) otherwise.
    pub fn advance(&mut self, next: TaskState) -> bool {
        if self.state.can_transition_to(next) {
            self.state = next;
            true
        } else {
            false
        }
    }
}

/// Estimated rotation axis, in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CorResult {
    pub axis_x: f64,
    pub axis_y: f64,
}
