//! Data models shared across the pipeline.
//!
//! This module contains the core data structures:
//! - Enums for frame categories, task states and policies
//! - Frame records and contiguous sub-sequences
//! - Chunk descriptors, scheduler tasks and rotation-centre results

mod enums;
mod frame;
mod jobs;

// Re-export all public types
pub use enums::{Category, FlatDarkMode, MissingReferencePolicy, TaskState};
pub use frame::{Frame, SubSequence};
pub use jobs::{ChunkDescriptor, CorResult, JobId, JobTask};
