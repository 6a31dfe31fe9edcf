//! Layout types and errors.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors from directory and link management.
#[derive(Error, Debug)]
pub enum LayoutError {
    #[error("I/O error in {operation} ({path}): {source}")]
    Io {
        operation: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Cannot link to {0}: source does not exist")]
    SourceMissing(PathBuf),

    #[error("Link {dst} already exists and points to {existing}, not {requested}")]
    LinkConflict {
        dst: PathBuf,
        existing: PathBuf,
        requested: PathBuf,
    },

    #[error("Reference path {0} is too shallow to derive the processing layout")]
    InvalidReference(PathBuf),

    #[error("Reindex lists differ in length ({from} vs {to})")]
    ReindexMismatch { from: usize, to: usize },

    #[error("Directory {path} did not appear within {waited:?}")]
    Timeout { path: PathBuf, waited: Duration },

    #[error("No {0} frame available to link")]
    NothingToLink(&'static str),
}

impl LayoutError {
    pub(crate) fn io(operation: &'static str, path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            operation,
            path: path.to_path_buf(),
            source,
        }
    }
}

pub type LayoutResult<T> = Result<T, LayoutError>;

/// Resolved directory tree for one scan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessingLayout {
    /// Processing root (always ends with the mandatory directory name).
    pub root: PathBuf,
    /// Scan identifier, taken from the reference file's grandparent.
    pub scan_name: String,
    pub projections_dir: PathBuf,
    /// Sinogram stage root: `sino/<scan>`.
    pub sino_dir: PathBuf,
    pub sino_dark_dir: PathBuf,
    pub sino_flat_dir: PathBuf,
    pub reconstruction_dir: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_dark_dir: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_flat_dir: Option<PathBuf>,
}

impl ProcessingLayout {
    /// Where the sinogram program writes `sino_NNNNN.tiff`.
    pub fn sinograms_dir(&self) -> PathBuf {
        self.sino_dir.join("sinograms")
    }

    pub fn dark_file(&self) -> PathBuf {
        self.sino_dark_dir.join("dark.tif")
    }

    pub fn flat_file(&self) -> PathBuf {
        self.sino_flat_dir.join("flat.tif")
    }

    /// Settings folder of one sinogram submission.
    pub fn sinogram_settings_dir(&self, stamp: &str) -> PathBuf {
        self.sino_dir
            .join("sino_output")
            .join(format!("sino_{}_files", stamp))
    }

    /// Configs, scripts and logs of one reconstruction run.
    pub fn reconstruction_files_dir(&self, run_id: &str) -> PathBuf {
        self.reconstruction_dir.join(format!("r_{}_files", run_id))
    }

    /// Output images of one reconstruction run.
    pub fn reconstruction_images_dir(&self, run_id: &str) -> PathBuf {
        self.reconstruction_dir.join(format!("r_{}_images", run_id))
    }

    /// Decimated sinograms for the quick preview.
    pub fn quick_sino_dir(&self) -> PathBuf {
        self.sino_dir.join("sino_quick")
    }

    /// Quick preview output, a sibling of the full reconstruction dir.
    pub fn quick_reconstruction_dir(&self) -> PathBuf {
        self.root
            .join("reconstruction")
            .join(format!("{}_quick", self.scan_name))
    }

    /// Run manifest location.
    pub fn run_state_path(&self) -> PathBuf {
        self.root.join(format!("{}_run_state.json", self.scan_name))
    }
}

/// Counts of links written while populating a layout.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkSummary {
    pub dark_links: usize,
    pub flat_links: usize,
    pub projection_links: usize,
    /// Links in the raw dark/flat holding dirs.
    pub held_links: usize,
    /// Links that already existed with the right target.
    pub unchanged: usize,
}
