//! Slice partitioning and per-chunk configuration.
//!
//! - [`ChunkPlanner`] splits an inclusive slice range into `n` contiguous chunks
//! - [`SettingsTemplater`] renders one reconstruction config per chunk from
//!   a TOML template, plus a provenance copy and a chunk manifest

mod chunks;
mod template;

pub use chunks::{ChunkError, ChunkPlanner, ChunkResult};
pub use template::{
    ReconInputs, SettingsTemplater, TemplateError, TemplateOutput, TemplateResult,
    DEFAULT_TEMPLATE, RESOURCE_KEY,
};
