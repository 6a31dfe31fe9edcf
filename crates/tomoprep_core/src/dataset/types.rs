//! Dataset types and the reader trait.

use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::models::Frame;

/// Errors raised while reading a scan dataset.
#[derive(Error, Debug)]
pub enum DatasetError {
    #[error("Failed to read dataset {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse dataset {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Dataset has no array at '{0}'")]
    MissingPath(String),

    #[error("Dataset entry '{path}' is not an array of {expected}")]
    WrongType { path: String, expected: &'static str },
}

pub type DatasetResult<T> = Result<T, DatasetError>;

/// Source of per-frame scan arrays.
pub trait DatasetReader {
    fn read(&self) -> DatasetResult<ScanData>;
}

/// Parallel per-frame arrays as read from a dataset.
///
/// Lengths are not guaranteed to agree; the classifier checks them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScanData {
    pub shutter: Vec<f64>,
    pub stage: Vec<f64>,
    pub rotation: Vec<f64>,
    pub file_paths: Vec<PathBuf>,
    pub image_keys: Option<Vec<i64>>,
}

impl ScanData {
    /// Named array lengths, used for mismatch reporting.
    pub fn array_lengths(&self) -> Vec<(&'static str, usize)> {
        let mut lengths = vec![
            ("shutter", self.shutter.len()),
            ("stage", self.stage.len()),
            ("rotation", self.rotation.len()),
            ("file_path", self.file_paths.len()),
        ];
        if let Some(keys) = &self.image_keys {
            lengths.push(("image_key", keys.len()));
        }
        lengths
    }

    /// Zip the arrays into frames. Stops at the shortest array.
    pub fn frames(&self) -> Vec<Frame> {
        self.shutter
            .iter()
            .zip(&self.stage)
            .zip(&self.rotation)
            .zip(&self.file_paths)
            .enumerate()
            .map(|(index, (((shutter, stage), rotation), path))| Frame {
                index,
                shutter_pos: *shutter,
                stage_pos: *stage,
                rotation_angle: *rotation,
                file_path: path.clone(),
                image_key: self
                    .image_keys
                    .as_ref()
                    .and_then(|keys| keys.get(index).copied()),
            })
            .collect()
    }
}

/// In-memory data reads as itself.
impl DatasetReader for ScanData {
    fn read(&self) -> DatasetResult<ScanData> {
        Ok(self.clone())
    }
}

/// Detector image size in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ImageSize {
    pub width: u32,
    pub height: u32,
}

impl ImageSize {
    /// Full-frame detector size assumed when an image cannot be read.
    pub const DEFAULT: ImageSize = ImageSize {
        width: 4008,
        height: 2672,
    };
}

/// Read an image's dimensions, falling back to [`ImageSize::DEFAULT`].
pub fn detect_dimensions(path: &Path) -> ImageSize {
    match image::image_dimensions(path) {
        Ok((width, height)) => ImageSize { width, height },
        Err(e) => {
            tracing::warn!(
                "Could not read dimensions of {} ({}); assuming {}x{}",
                path.display(),
                e,
                ImageSize::DEFAULT.width,
                ImageSize::DEFAULT.height
            );
            ImageSize::DEFAULT
        }
    }
}
