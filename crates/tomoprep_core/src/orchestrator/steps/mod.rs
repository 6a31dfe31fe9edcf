//! Pipeline step implementations.
//!
//! Each step handles one stage of a scan's processing run.

mod classify;
mod jobs;
mod layout;
mod preview;
mod reconstruction;
mod sinogram;

pub use classify::ClassifyStep;
pub use layout::LayoutStep;
pub use preview::QuickPreviewStep;
pub use reconstruction::ReconstructionStep;
pub use sinogram::SinogramStep;
