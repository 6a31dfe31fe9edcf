//! Processing directory layout and link management.
//!
//! The processing tree under a root looks like:
//!
//! ```text
//! <root>/
//!     rawdata/<scan>/projections/p_00000.tif ...
//!     rawdata/<scan>/{dark,flat}/<k>/        (optional holding dirs)
//!     sino/<scan>/{dark,flat}/{dark,flat}.tif
//!     sino/<scan>/sinograms/sino_00000.tiff ...
//!     reconstruction/<scan>/
//! ```
//!
//! Links are idempotent: re-creating an identical link is a no-op, while a
//! link that already points elsewhere is a conflict and is never replaced.

mod links;
mod manager;
mod types;

pub use links::{
    create_link, decimate, ensure_dir, reindex, step_through, wait_for_dir, LinkOutcome,
    NumberedName,
};
pub use manager::LayoutManager;
pub use types::{LayoutError, LayoutResult, LinkSummary, ProcessingLayout};
