//! JSON scan-document reader.
//!
//! Array locations are JSON pointers (`/entry1/instrument/...`), which
//! mirror the group/dataset paths of the acquisition file.

use std::fs;
use std::path::{Path, PathBuf};

use serde_json::Value;

use super::types::{DatasetError, DatasetReader, DatasetResult, ScanData};
use crate::config::DatasetSettings;

/// Reads scan arrays from a JSON document on disk.
#[derive(Debug, Clone)]
pub struct JsonDatasetReader {
    path: PathBuf,
    settings: DatasetSettings,
}

impl JsonDatasetReader {
    pub fn new(path: impl Into<PathBuf>, settings: DatasetSettings) -> Self {
        Self {
            path: path.into(),
            settings,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn base_dir(&self) -> PathBuf {
        self.path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default()
    }
}

impl DatasetReader for JsonDatasetReader {
    fn read(&self) -> DatasetResult<ScanData> {
        let content = fs::read_to_string(&self.path).map_err(|source| DatasetError::Io {
            path: self.path.clone(),
            source,
        })?;
        let doc: Value = serde_json::from_str(&content).map_err(|source| DatasetError::Parse {
            path: self.path.clone(),
            source,
        })?;

        let base_dir = self.base_dir();
        let file_paths = string_array(&doc, &self.settings.file_path_path)?
            .into_iter()
            .map(|p| resolve_relative(&base_dir, &p))
            .collect();

        let image_keys = match self.settings.image_key_path.as_deref() {
            Some(pointer) if !pointer.is_empty() && doc.pointer(pointer).is_some() => {
                Some(int_array(&doc, pointer)?)
            }
            Some(pointer) if !pointer.is_empty() => {
                tracing::debug!("No image keys at '{}'; using physical positions", pointer);
                None
            }
            _ => None,
        };

        let data = ScanData {
            shutter: float_array(&doc, &self.settings.shutter_path)?,
            stage: float_array(&doc, &self.settings.stage_path)?,
            rotation: float_array(&doc, &self.settings.rotation_path)?,
            file_paths,
            image_keys,
        };

        tracing::debug!(
            "Read {} frames from {}",
            data.shutter.len(),
            self.path.display()
        );
        Ok(data)
    }
}

/// Paths starting with `.` are relative to the dataset's own directory.
fn resolve_relative(base_dir: &Path, raw: &str) -> PathBuf {
    if raw.starts_with('.') {
        base_dir.join(raw)
    } else {
        PathBuf::from(raw)
    }
}

fn array<'a>(doc: &'a Value, pointer: &str) -> DatasetResult<&'a Vec<Value>> {
    let value = doc
        .pointer(pointer)
        .ok_or_else(|| DatasetError::MissingPath(pointer.to_string()))?;
    value.as_array().ok_or_else(|| DatasetError::WrongType {
        path: pointer.to_string(),
        expected: "values",
    })
}

fn float_array(doc: &Value, pointer: &str) -> DatasetResult<Vec<f64>> {
    array(doc, pointer)?
        .iter()
        .map(|v| {
            v.as_f64().ok_or_else(|| DatasetError::WrongType {
                path: pointer.to_string(),
                expected: "numbers",
            })
        })
        .collect()
}

fn int_array(doc: &Value, pointer: &str) -> DatasetResult<Vec<i64>> {
    array(doc, pointer)?
        .iter()
        .map(|v| {
            v.as_i64()
                .or_else(|| v.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64))
                .ok_or_else(|| DatasetError::WrongType {
                    path: pointer.to_string(),
                    expected: "integers",
                })
        })
        .collect()
}

fn string_array(doc: &Value, pointer: &str) -> DatasetResult<Vec<String>> {
    array(doc, pointer)?
        .iter()
        .map(|v| {
            v.as_str()
                .map(str::to_string)
                .ok_or_else(|| DatasetError::WrongType {
                    path: pointer.to_string(),
                    expected: "strings",
                })
        })
        .collect()
}
