//! Core enums used throughout the pipeline.

use serde::{Deserialize, Serialize};

/// Category assigned to an acquired frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    /// Shutter closed, sample in beam.
    Dark,
    /// Shutter open, sample out of beam.
    Flat,
    /// Shutter open, sample in beam.
    Projection,
    /// None of the above (or a position outside tolerance).
    Unclassified,
}

impl Category {
    /// Map an explicit image-key code (2 = dark, 1 = flat, 0 = projection).
    pub fn from_image_key(key: i64) -> Self {
        match key {
            2 => Category::Dark,
            1 => Category::Flat,
            0 => Category::Projection,
            _ => Category::Unclassified,
        }
    }

    /// Image-key code for this category, if it has one.
    pub fn image_key(&self) -> Option<i64> {
        match self {
            Category::Dark => Some(2),
            Category::Flat => Some(1),
            Category::Projection => Some(0),
            Category::Unclassified => None,
        }
    }

    /// Classify from logical shutter (0 = closed, 1 = open) and
    /// stage (0 = out of beam, 1 = in beam) states.
    pub fn from_logical(shutter: Option<u8>, stage: Option<u8>) -> Self {
        match (shutter, stage) {
            (Some(0), Some(1)) => Category::Dark,
            (Some(1), Some(0)) => Category::Flat,
            (Some(1), Some(1)) => Category::Projection,
            _ => Category::Unclassified,
        }
    }

    /// Short name used for directory and link naming.
    pub fn dir_name(&self) -> &'static str {
        match self {
            Category::Dark => "dark",
            Category::Flat => "flat",
            Category::Projection => "projections",
            Category::Unclassified => "unclassified",
        }
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Category::Dark => write!(f, "DARK"),
            Category::Flat => write!(f, "FLAT"),
            Category::Projection => write!(f, "PROJECTION"),
            Category::Unclassified => write!(f, "UNCLASSIFIED"),
        }
    }
}

/// State of a single scheduler task.
///
/// Transitions are monotonic: `Pending -> Running | Unknown -> Done`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskState {
    #[default]
    Pending,
    Running,
    Done,
    Unknown,
}

impl TaskState {
    fn rank(&self) -> u8 {
        match self {
            TaskState::Pending => 0,
            TaskState::Running | TaskState::Unknown => 1,
            TaskState::Done => 2,
        }
    }

    /// Whether moving from `self` to `next` keeps the state machine monotonic.
    pub fn can_transition_to(&self, next: TaskState) -> bool {
        self.rank() <= next.rank()
    }

    /// Pending or running tasks keep a monitor waiting.
    pub fn is_active(&self) -> bool {
        matches!(self, TaskState::Pending | TaskState::Running)
    }

    /// Map a scheduler state code (e.g. `qw`, `r`, `hqw`, `Eqw`).
    pub fn from_scheduler_code(code: &str) -> Self {
        if code.contains('E') {
            TaskState::Unknown
        } else if code.contains('r') || code.contains('t') {
            TaskState::Running
        } else if code.chars().any(|c| matches!(c, 'q' | 'w' | 'h' | 's' | 'S')) {
            TaskState::Pending
        } else {
            TaskState::Unknown
        }
    }
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskState::Pending => write!(f, "PENDING"),
            TaskState::Running => write!(f, "RUNNING"),
            TaskState::Done => write!(f, "DONE"),
            TaskState::Unknown => write!(f, "UNKNOWN"),
        }
    }
}

/// Policy applied when a scan contains no dark or no flat frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MissingReferencePolicy {
    /// Abort classification.
    #[default]
    Fatal,
    /// Log a warning and fall back to constant flat/dark values.
    Warn,
}

impl std::fmt::Display for MissingReferencePolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MissingReferencePolicy::Fatal => write!(f, "fatal"),
            MissingReferencePolicy::Warn => write!(f, "warn"),
        }
    }
}

/// Flat/dark correction mode written into reconstruction configs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FlatDarkMode {
    /// Derived row-by-row from real reference frames.
    Row,
    /// Constant value, used when no reference frames were acquired.
    Constant,
}

impl FlatDarkMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            FlatDarkMode::Row => "Row",
            FlatDarkMode::Constant => "Constant",
        }
    }
}
