//! Scan dataset access.
//!
//! A dataset carries parallel per-frame arrays (shutter position, stage
//! translation, rotation angle, image file path and optionally an explicit
//! image key). Readers hide the container format behind [`DatasetReader`].

mod json;
mod types;

pub use json::JsonDatasetReader;
pub use types::{
    detect_dimensions, DatasetError, DatasetReader, DatasetResult, ImageSize, ScanData,
};
