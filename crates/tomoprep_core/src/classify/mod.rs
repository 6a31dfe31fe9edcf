//! Frame classification into dark, flat and projection categories.
//!
//! Explicit image keys are used directly when the dataset carries them;
//! otherwise shutter and stage positions are thresholded against their
//! physical reference values. Consecutive frames of one category are
//! grouped into sub-sequences.

mod classifier;
mod types;

pub use classifier::{map_to_logical, FrameClassifier};
pub use types::{Classification, ClassifyError, ClassifyResult, ReferenceSide};
