//! Rotation-axis estimation.
//!
//! The 180 degree projection is mirrored so that an object rotating about
//! `x = c` appears shifted by `width - 2c` against the 0 degree image. Both
//! images are inverted (absorbing sample becomes bright), Otsu-thresholded,
//! stripped of the timestamp band and reduced to a centroid; the centroid
//! shift gives the axis.

mod estimator;
mod threshold;
mod types;

pub use estimator::{CorPair, RotationCenterEstimator};
pub use threshold::{binarize, centroid, otsu_threshold, zero_band};
pub use types::{Centroid, CorError, EstimateResult, Mask, Projection};
