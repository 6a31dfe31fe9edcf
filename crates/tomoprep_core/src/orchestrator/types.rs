//! Core types for the orchestrator pipeline.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::classify::Classification;
use crate::config::Settings;
use crate::dataset::{DatasetReader, DatasetResult, ImageSize, ScanData};
use crate::layout::{LinkSummary, ProcessingLayout};
use crate::logging::RunLogger;
use crate::models::{Category, CorResult, JobId, JobTask};
use crate::scheduler::{CommandRunner, JobMonitor, JobScheduler};

/// Progress callback type for reporting pipeline progress.
///
/// Arguments: (stage_name, percent_complete, message)
pub type ProgressCallback = Box<dyn Fn(&str, u32, &str) + Send + Sync>;

/// Read-only context passed to pipeline steps.
///
/// Contains run configuration and shared resources that steps can read
/// but not modify. Mutable state goes in `RunState`.
pub struct Context {
    /// Application settings.
    pub settings: Settings,
    /// Run name, used for the log file and job names.
    pub run_name: String,
    /// Per-run logger.
    pub logger: Arc<RunLogger>,
    /// Executes scheduler commands.
    pub runner: Arc<dyn CommandRunner>,
    reader: Box<dyn DatasetReader + Send + Sync>,
    cancel: Arc<AtomicBool>,
    progress_callback: Option<ProgressCallback>,
}

impl Context {
    pub fn new(
        settings: Settings,
        run_name: impl Into<String>,
        reader: Box<dyn DatasetReader + Send + Sync>,
        logger: Arc<RunLogger>,
        runner: Arc<dyn CommandRunner>,
    ) -> Self {
        Self {
            settings,
            run_name: run_name.into(),
            logger,
            runner,
            reader,
            cancel: Arc::new(AtomicBool::new(false)),
            progress_callback: None,
        }
    }

    /// Set the progress callback.
    pub fn with_progress_callback(mut self, callback: ProgressCallback) -> Self {
        self.progress_callback = Some(callback);
        self
    }

    /// Share the pipeline's cancellation flag.
    pub fn with_cancel_flag(mut self, cancel: Arc<AtomicBool>) -> Self {
        self.cancel = cancel;
        self
    }

    /// Report progress to callback (if set).
    pub fn report_progress(&self, stage_name: &str, percent: u32, message: &str) {
        if let Some(ref callback) = self.progress_callback {
            callback(stage_name, percent, message);
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }

    pub fn read_dataset(&self) -> DatasetResult<ScanData> {
        self.reader.read()
    }

    /// Processing root override from `paths.output_dir`.
    pub fn output_override(&self) -> Option<PathBuf> {
        let dir = self.settings.paths.output_dir.trim();
        (!dir.is_empty()).then(|| PathBuf::from(dir))
    }

    pub fn scheduler(&self) -> JobScheduler {
        JobScheduler::new(self.settings.scheduler.clone(), Arc::clone(&self.runner))
    }

    /// Monitor sharing this run's cancellation flag.
    pub fn monitor(&self) -> JobMonitor {
        let scheduler = self.scheduler();
        JobMonitor::new(
            self.settings.scheduler.status_program.clone(),
            scheduler.environment(),
            &self.settings.monitor,
            Arc::clone(&self.runner),
        )
        .with_cancel_flag(Arc::clone(&self.cancel))
    }
}

/// Outcome of a single step execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    /// Step completed successfully.
    Success,
    /// Step was skipped (with reason).
    Skipped(String),
}

/// Furthest stage a run has completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    #[default]
    Init,
    Classified,
    LaidOut,
    Sinograms,
    Reconstructed,
    Previewed,
    Done,
}

/// Mutable run state that accumulates results from pipeline steps and is
/// saved as `<root>/<scan>_run_state.json` once the layout is known.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunState {
    pub run_id: String,
    pub started_at: Option<String>,
    pub stage: Stage,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub classification: Option<ClassificationSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub layout: Option<LayoutOutput>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sinogram: Option<SinogramOutput>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reconstruction: Option<ReconstructionOutput>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preview: Option<PreviewOutput>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cor: Option<CorResult>,
    /// Full frame classification; only lives for the current process.
    #[serde(skip)]
    pub scan: Option<Classification>,
}

impl RunState {
    pub fn new(run_id: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            started_at: Some(chrono::Local::now().to_rfc3339()),
            ..Default::default()
        }
    }

    /// Record `stage` if it is further than the current one.
    pub fn reach(&mut self, stage: Stage) {
        if stage > self.stage {
            self.stage = stage;
        }
    }

    pub fn processing_layout(&self) -> Option<&ProcessingLayout> {
        self.layout.as_ref().map(|l| &l.layout)
    }

    pub fn state_path(&self) -> Option<PathBuf> {
        self.processing_layout().map(ProcessingLayout::run_state_path)
    }

    /// Save to the layout's run-state path; a no-op before the layout exists.
    pub fn persist(&self) -> io::Result<Option<PathBuf>> {
        match self.state_path() {
            Some(path) => self.save(&path).map(|_| Some(path)),
            None => Ok(None),
        }
    }

    /// Atomic write (temp file, then rename).
    pub fn save(&self, path: &Path) -> io::Result<()> {
        let content = serde_json::to_string_pretty(self).map_err(io::Error::other)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let temp_path = path.with_extension("json.tmp");
        fs::write(&temp_path, content)?;
        fs::rename(&temp_path, path)
    }

    pub fn load(path: &Path) -> io::Result<Self> {
        let content = fs::read_to_string(path)?;
        serde_json::from_str(&content).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }
}

/// Frame counts from classification.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassificationSummary {
    pub frames: usize,
    pub darks: usize,
    pub flats: usize,
    pub projections: usize,
    pub unclassified: usize,
    pub sub_sequences: usize,
    pub used_image_keys: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

impl ClassificationSummary {
    pub fn from_classification(c: &Classification) -> Self {
        Self {
            frames: c.frames.len(),
            darks: c.count(Category::Dark),
            flats: c.count(Category::Flat),
            projections: c.count(Category::Projection),
            unclassified: c.count(Category::Unclassified),
            sub_sequences: c.sub_sequences.len(),
            used_image_keys: c.used_image_keys,
            warnings: c.warnings.clone(),
        }
    }
}

/// Output from the Layout step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LayoutOutput {
    pub layout: ProcessingLayout,
    pub links: LinkSummary,
    pub image_size: ImageSize,
}

/// One array job and the finishing job held on it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmittedJob {
    pub name: String,
    pub job_id: JobId,
    pub finish_job_id: JobId,
    pub tasks: usize,
    /// Array tasks followed by the finishing job's task, as last observed.
    #[serde(default)]
    pub task_states: Vec<JobTask>,
    /// Where failing tasks append their return values.
    pub error_file: PathBuf,
    /// Error-file lines found after the job finished.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failed_tasks: Vec<String>,
}

/// Output from the Sinogram step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SinogramOutput {
    pub sinogram_dir: PathBuf,
    /// Existing outputs were reused and nothing was submitted.
    pub reused: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub settings_dir: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job: Option<SubmittedJob>,
}

/// Where the rotation centre came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CentreSource {
    User,
    Estimated,
    Preview,
}

/// Output from the Reconstruction step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconstructionOutput {
    pub run_id: String,
    pub files_dir: PathBuf,
    pub images_dir: PathBuf,
    pub first_slice: usize,
    pub last_slice: usize,
    pub centre: f64,
    pub centre_source: CentreSource,
    pub job: SubmittedJob,
}

/// Output from the QuickPreview step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreviewOutput {
    pub sino_dir: PathBuf,
    pub output_dir: PathBuf,
    /// Original sinogram rows that were reconstructed.
    pub rows: Vec<usize>,
    pub centre: f64,
    pub centre_source: CentreSource,
    pub images_linked: usize,
    pub job: SubmittedJob,
}
