//! Frame records read from a scan dataset.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::enums::Category;

/// One acquired detector frame.
///
/// Immutable once produced by a dataset reader.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    /// Zero-based acquisition index.
    pub index: usize,
    /// Physical shutter position.
    pub shutter_pos: f64,
    /// Physical sample-stage translation.
    pub stage_pos: f64,
    /// Rotation angle in degrees.
    pub rotation_angle: f64,
    /// Image file holding this frame.
    pub file_path: PathBuf,
    /// Explicit image-key code, when the dataset carries one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_key: Option<i64>,
}

/// A run of consecutive frames sharing one category.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubSequence {
    pub category: Category,
    /// Contiguous, ascending frame indices.
    pub frame_indices: Vec<usize>,
}

impl SubSequence {
    pub fn new(category: Category, first_index: usize) -> Self {
        Self {
            category,
            frame_indices: vec![first_index],
        }
    }

    pub fn len(&self) -> usize {
        self.frame_indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frame_indices.is_empty()
    }

    pub fn first(&self) -> Option<usize> {
        self.frame_indices.first().copied()
    }

    pub fn last(&self) -> Option<usize> {
        self.frame_indices.last().copied()
    }
}
