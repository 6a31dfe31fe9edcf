//! Classification results and errors.

use serde::Serialize;
use thiserror::Error;

use crate::models::{Category, FlatDarkMode, Frame, SubSequence};

/// Errors that abort classification.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ClassifyError {
    #[error("Array '{array}' has {found} entries, expected {expected}")]
    LengthMismatch {
        array: &'static str,
        expected: usize,
        found: usize,
    },

    #[error("Missing classification parameter: {0}")]
    MissingParameter(&'static str),

    #[error("Dataset contains no frames")]
    Empty,

    #[error("Only {found} projections found, at least {required} required")]
    InsufficientProjections { found: usize, required: usize },

    #[error("{found} unclassified frames exceed the allowed {allowed}")]
    TooManyUnclassified { found: usize, allowed: usize },

    #[error("No {0} frames found")]
    NoReferenceFrames(Category),

    #[error("Rotation range check failed: {0}")]
    RotationRange(String),
}

pub type ClassifyResult<T> = Result<T, ClassifyError>;

/// Which side of a projection to look for a reference frame first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReferenceSide {
    Before,
    After,
}

/// Outcome of classifying a whole scan.
#[derive(Debug, Clone, Serialize)]
pub struct Classification {
    pub frames: Vec<Frame>,
    /// One category per frame, same order as `frames`.
    pub categories: Vec<Category>,
    pub sub_sequences: Vec<SubSequence>,
    /// True when explicit image keys drove the result.
    pub used_image_keys: bool,
    /// Non-fatal findings (e.g. missing flats under the warn policy).
    pub warnings: Vec<String>,
}

impl Classification {
    /// Frame indices of one category, ascending.
    pub fn indices(&self, category: Category) -> Vec<usize> {
        self.categories
            .iter()
            .enumerate()
            .filter(|(_, c)| **c == category)
            .map(|(i, _)| i)
            .collect()
    }

    pub fn count(&self, category: Category) -> usize {
        self.categories.iter().filter(|c| **c == category).count()
    }

    pub fn first_of(&self, category: Category) -> Option<&Frame> {
        self.categories
            .iter()
            .position(|c| *c == category)
            .map(|i| &self.frames[i])
    }

    /// Sub-sequences of one category, in acquisition order.
    pub fn sub_sequences_of(&self, category: Category) -> impl Iterator<Item = &SubSequence> {
        self.sub_sequences
            .iter()
            .filter(move |s| s.category == category)
    }

    /// Row-derived correction when real frames exist, constant otherwise.
    pub fn flat_dark_mode(&self, category: Category) -> FlatDarkMode {
        if self.count(category) > 0 {
            FlatDarkMode::Row
        } else {
            FlatDarkMode::Constant
        }
    }

    /// First and last projection frame indices.
    pub fn projection_pair(&self) -> Option<(usize, usize)> {
        let projections = self.indices(Category::Projection);
        Some((*projections.first()?, *projections.last()?))
    }

    /// Nearest frame of `category` to `frame_index`, searching `side` first
    /// and falling back to the other side.
    pub fn nearest_reference(
        &self,
        category: Category,
        frame_index: usize,
        side: ReferenceSide,
    ) -> Option<usize> {
        let indices = self.indices(category);
        let before = indices.iter().rev().find(|&&i| i < frame_index).copied();
        let after = indices.iter().find(|&&i| i > frame_index).copied();
        match side {
            ReferenceSide::Before => before.or(after),
            ReferenceSide::After => after.or(before),
        }
    }

    /// Verify the first projection is at 0 degrees and the last at 180.
    pub fn check_rotation_range(&self, tolerance: f64) -> ClassifyResult<(usize, usize)> {
        let (lo, hi) = self
            .projection_pair()
            .ok_or(ClassifyError::InsufficientProjections {
                found: 0,
                required: 2,
            })?;
        let theta_lo = self.frames[lo].rotation_angle;
        let theta_hi = self.frames[hi].rotation_angle;
        if theta_lo.abs() > tolerance {
            return Err(ClassifyError::RotationRange(format!(
                "first projection (frame {}) is at {} degrees, expected 0",
                lo, theta_lo
            )));
        }
        if (theta_hi - 180.0).abs() > tolerance {
            return Err(ClassifyError::RotationRange(format!(
                "last projection (frame {}) is at {} degrees, expected 180",
                hi, theta_hi
            )));
        }
        Ok((lo, hi))
    }
}
