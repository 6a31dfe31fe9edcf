//! Scan processor for running scans through the standard pipeline.
//!
//! [`ScanProcessor`] owns the settings and the command runner, builds a
//! per-scan logger and context, and turns a pipeline run into a
//! [`RunResult`].

use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use crate::config::Settings;
use crate::dataset::DatasetReader;
use crate::logging::{LogCallback, LogConfig, RunLogger};
use crate::scheduler::CommandRunner;

use super::pipeline::CancelHandle;
use super::types::{Context, ProgressCallback, RunState, Stage};
use super::{create_standard_pipeline, PipelineRunResult};

/// Result of processing a single scan.
#[derive(Debug, Clone)]
pub struct RunResult {
    pub run_name: String,
    pub success: bool,
    /// Everything the run recorded, including a failed run's partial state.
    pub state: RunState,
    pub state_path: Option<PathBuf>,
    pub error: Option<String>,
    pub steps_completed: Vec<String>,
    pub steps_skipped: Vec<String>,
}

impl RunResult {
    fn success(run_name: String, state: RunState, run_result: PipelineRunResult) -> Self {
        Self {
            run_name,
            success: true,
            state_path: state.state_path(),
            state,
            error: None,
            steps_completed: run_result.steps_completed,
            steps_skipped: run_result.steps_skipped,
        }
    }

    fn failure(run_name: String, state: RunState, error: impl Into<String>) -> Self {
        Self {
            run_name,
            success: false,
            state_path: state.state_path(),
            state,
            error: Some(error.into()),
            steps_completed: Vec::new(),
            steps_skipped: Vec::new(),
        }
    }
}

/// Runs scans through the standard pipeline.
///
/// All runs share one cancellation flag: cancelling stops the current run
/// at its next stage boundary or monitor tick, and no further scans start.
pub struct ScanProcessor {
    settings: Settings,
    runner: Arc<dyn CommandRunner>,
    log_dir: PathBuf,
    cancel: Arc<AtomicBool>,
}

impl ScanProcessor {
    /// Logs go to `paths.logs_dir`.
    pub fn new(settings: Settings, runner: Arc<dyn CommandRunner>) -> Self {
        let log_dir = PathBuf::from(&settings.paths.logs_dir);
        Self {
            settings,
            runner,
            log_dir,
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_log_dir(mut self, log_dir: impl Into<PathBuf>) -> Self {
        self.log_dir = log_dir.into();
        self
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        create_standard_pipeline()
            .with_cancel_flag(Arc::clone(&self.cancel))
            .cancel_handle()
    }

    /// Process one scan.
    ///
    /// # Arguments
    /// * `run_name` - Names the log file and the run state
    /// * `reader` - Source of the scan's per-frame arrays
    /// * `log_callback` - Optional callback receiving every log line
    /// * `progress_callback` - Optional callback for stage progress
    pub fn process(
        &self,
        run_name: &str,
        reader: Box<dyn DatasetReader + Send + Sync>,
        log_callback: Option<LogCallback>,
        progress_callback: Option<ProgressCallback>,
    ) -> RunResult {
        let mut state = RunState::new(run_name);

        let logger = match RunLogger::new(
            run_name,
            &self.log_dir,
            LogConfig::from_settings(&self.settings.logging),
            log_callback,
        ) {
            Ok(l) => Arc::new(l),
            Err(e) => {
                return RunResult::failure(
                    run_name.to_string(),
                    state,
                    format!("Failed to create logger: {}", e),
                );
            }
        };

        let mut ctx = Context::new(
            self.settings.clone(),
            run_name,
            reader,
            Arc::clone(&logger),
            Arc::clone(&self.runner),
        )
        .with_cancel_flag(Arc::clone(&self.cancel));
        if let Some(callback) = progress_callback {
            ctx = ctx.with_progress_callback(callback);
        }

        let pipeline = create_standard_pipeline().with_cancel_flag(Arc::clone(&self.cancel));
        logger.info(&format!("Starting run: {}", run_name));

        let result = match pipeline.run(&ctx, &mut state) {
            Ok(run_result) => {
                state.reach(Stage::Done);
                if let Err(e) = state.persist() {
                    logger.warn(&format!("Could not save run state: {}", e));
                }
                if let Some(path) = state.state_path() {
                    logger.info(&format!("Run state saved to {}", path.display()));
                }
                RunResult::success(run_name.to_string(), state, run_result)
            }
            Err(e) => {
                let error_msg = format!("Pipeline failed: {}", e);
                logger.error(&error_msg);
                logger.show_tail("Recent output");
                RunResult::failure(run_name.to_string(), state, error_msg)
            }
        };
        logger.close();
        result
    }

    /// Process scans sequentially, stopping early once cancelled.
    pub fn process_all<F, G>(
        &self,
        scans: Vec<(String, Box<dyn DatasetReader + Send + Sync>)>,
        log_callback_factory: F,
        progress_callback_factory: G,
    ) -> Vec<RunResult>
    where
        F: Fn(&str) -> Option<LogCallback>,
        G: Fn(&str) -> Option<ProgressCallback>,
    {
        let total = scans.len();
        let handle = self.cancel_handle();
        let mut results = Vec::with_capacity(total);

        for (i, (name, reader)) in scans.into_iter().enumerate() {
            if handle.is_cancelled() {
                tracing::info!("Processing cancelled at scan {}/{}", i + 1, total);
                break;
            }
            tracing::info!("Processing scan {}/{}: {}", i + 1, total, name);
            let result = self.process(
                &name,
                reader,
                log_callback_factory(&name),
                progress_callback_factory(&name),
            );
            results.push(result);
        }

        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::ScanData;
    use crate::layout::NumberedName;
    use crate::models::TaskState;
    use crate::orchestrator::types::CentreSource;
    use crate::scheduler::runner::fake::ScriptedRunner;
    use crate::scheduler::{CommandOutput, SchedulerResult};
    use std::fs;
    use std::path::Path;
    use tempfile::tempdir;

    /// Drops `images` numbered outputs into the run's images folder when a
    /// job is submitted, standing in for the reconstruction program.
    struct ImageWritingRunner {
        inner: ScriptedRunner,
        images: usize,
    }

    impl CommandRunner for ImageWritingRunner {
        fn run(
            &self,
            program: &str,
            args: &[String],
            env: &[(String, String)],
        ) -> SchedulerResult<CommandOutput> {
            let files_dir = args
                .iter()
                .position(|a| a == "-o")
                .and_then(|i| args.get(i + 1))
                .map(PathBuf::from);
            if let Some(files_dir) = files_dir.filter(|_| program == "qsub") {
                let name = files_dir.file_name().unwrap().to_string_lossy();
                let images_dir = files_dir.with_file_name(name.replace("_files", "_images"));
                for n in 0..self.images {
                    let path = NumberedName::image().in_dir(&images_dir, n);
                    fs::write(path, format!("slice {}", n)).unwrap();
                }
            }
            self.inner.run(program, args, env)
        }
    }

    /// 5 dark, 5 flat and 20 projection frames under `<dir>/raw/scan_7/images`.
    fn scan(dir: &Path) -> ScanData {
        let images = dir.join("raw").join("scan_7").join("images");
        fs::create_dir_all(&images).unwrap();
        let mut data = ScanData::default();
        let mut keys = Vec::new();
        for i in 0..30usize {
            let path = images.join(format!("f_{:05}.tif", i));
            fs::write(&path, b"").unwrap();
            let key = match i {
                0..=4 => 2,
                5..=9 => 1,
                _ => 0,
            };
            keys.push(key);
            data.shutter.push(if key == 2 { 0.0 } else { 1.0 });
            data.stage.push(0.0);
            data.rotation
                .push(if key == 0 { (i - 10) as f64 * 180.0 / 19.0 } else { 0.0 });
            data.file_paths.push(path);
        }
        data.image_keys = Some(keys);
        data
    }

    fn settings(dir: &Path) -> Settings {
        let mut settings = Settings::default();
        settings.paths.output_dir = dir.join("out").to_string_lossy().into_owned();
        settings.paths.logs_dir = dir.join("logs").to_string_lossy().into_owned();
        settings.classification.min_projections = 10;
        settings.sinogram.width = Some(64);
        settings.sinogram.height = Some(32);
        settings.sinogram.chunks = 4;
        settings.sinogram.wait_for_output_secs = 0;
        settings.reconstruction.chunks = 2;
        settings.reconstruction.centre = Some(31.5);
        settings.reconstruction.run_id = Some("t1".to_string());
        settings.monitor.poll_interval_ms = 1;
        settings.monitor.total_wait_ms = 1_000;
        settings
    }

    fn sinograms_dir(dir: &Path) -> PathBuf {
        dir.join("out/processing/sino/scan_7/sinograms")
    }

    fn scripted_submissions() -> Arc<ScriptedRunner> {
        let runner = Arc::new(ScriptedRunner::new());
        runner
            .reply(
                "qsub",
                CommandOutput::success(
                    "Your job-array 101.1-4:1 (\"sino_scan_7\") has been submitted",
                ),
            )
            .reply(
                "qsub",
                CommandOutput::success("Your job 102 (\"f_sino_scan_7\") has been submitted"),
            )
            .reply(
                "qsub",
                CommandOutput::success(
                    "Your job-array 103.1-2:1 (\"recon_scan_7\") has been submitted",
                ),
            )
            .reply(
                "qsub",
                CommandOutput::success("Your job 104 (\"f_recon_scan_7\") has been submitted"),
            );
        runner
    }

    #[test]
    fn full_run_submits_sinogram_and_reconstruction_jobs() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(sinograms_dir(dir.path())).unwrap();
        let runner = scripted_submissions();
        let processor = ScanProcessor::new(settings(dir.path()), runner.clone());

        let result = processor.process("scan_7", Box::new(scan(dir.path())), None, None);

        assert!(result.success, "{:?}", result.error);
        assert_eq!(result.state.stage, Stage::Done);
        assert_eq!(
            result.steps_completed,
            vec!["Classify", "Layout", "Sinogram", "Reconstruction"]
        );
        assert_eq!(result.steps_skipped, vec!["QuickPreview"]);

        let summary = result.state.classification.as_ref().unwrap();
        assert_eq!((summary.darks, summary.flats, summary.projections), (5, 5, 20));

        let root = dir.path().join("out/processing");
        assert!(fs::symlink_metadata(root.join("rawdata/scan_7/projections/p_00019.tif")).is_ok());
        assert!(fs::symlink_metadata(root.join("sino/scan_7/dark/dark.tif")).is_ok());

        let sino = result.state.sinogram.as_ref().unwrap();
        assert!(!sino.reused);
        let sino_job = sino.job.as_ref().unwrap();
        assert_eq!(sino_job.job_id.as_str(), "101");
        assert_eq!(sino_job.finish_job_id.as_str(), "102");
        assert_eq!(sino_job.tasks, 4);
        assert_eq!(sino_job.task_states.len(), 5);
        assert!(sino_job
            .task_states
            .iter()
            .all(|t| t.state == TaskState::Done));
        let settings_dir = sino.settings_dir.as_ref().unwrap();
        assert!(settings_dir.join("sinochunk.qsh").exists());
        assert_eq!(
            fs::read_to_string(settings_dir.join("chunklist.txt"))
                .unwrap()
                .lines()
                .count(),
            4
        );

        let recon = result.state.reconstruction.as_ref().unwrap();
        assert_eq!(recon.job.job_id.as_str(), "103");
        assert_eq!((recon.first_slice, recon.last_slice), (0, 31));
        assert!(recon.files_dir.ends_with("r_t1_files"));
        assert!(recon.files_dir.join("chunk_001.toml").exists());
        assert!(recon.files_dir.join("chunk_002.toml").exists());
        assert!(recon.files_dir.join("settings_used.toml").exists());
        assert!(recon.images_dir.is_dir());

        let submissions = runner.calls_to("qsub");
        assert_eq!(submissions.len(), 4);
        let finish_args = &submissions[1].args;
        let hold = finish_args.iter().position(|a| a == "-hold_jid").unwrap();
        assert_eq!(finish_args[hold + 1], "sino_scan_7");
        assert!(submissions[0].args.contains(&"1-4".to_string()));
        assert!(!runner.calls_to("qstat").is_empty());

        let state_path = result.state_path.unwrap();
        assert_eq!(state_path, root.join("scan_7_run_state.json"));
        assert_eq!(RunState::load(&state_path).unwrap().stage, Stage::Done);
    }

    #[test]
    fn existing_sinograms_are_reused() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(sinograms_dir(dir.path())).unwrap();
        fs::write(sinograms_dir(dir.path()).join("sino_00000.tiff"), b"").unwrap();
        let mut settings = settings(dir.path());
        settings.reconstruction.enabled = false;
        let runner = Arc::new(ScriptedRunner::new());
        let processor = ScanProcessor::new(settings, runner.clone());

        let result = processor.process("scan_7", Box::new(scan(dir.path())), None, None);

        assert!(result.success, "{:?}", result.error);
        assert!(result.state.sinogram.as_ref().unwrap().reused);
        assert!(result.state.reconstruction.is_none());
        assert!(runner.calls().is_empty());
    }

    #[test]
    fn quick_preview_restores_row_numbers() {
        let dir = tempdir().unwrap();
        let sinograms = sinograms_dir(dir.path());
        fs::create_dir_all(&sinograms).unwrap();
        for row in 0..32 {
            let path = NumberedName::sinogram().in_dir(&sinograms, row);
            fs::write(path, format!("row {}", row)).unwrap();
        }
        let mut settings = settings(dir.path());
        settings.reconstruction.enabled = false;
        settings.preview.enabled = true;
        settings.preview.step = 10;

        let inner = ScriptedRunner::new();
        inner
            .reply(
                "qsub",
                CommandOutput::success(
                    "Your job-array 201.1-2:1 (\"quick_scan_7\") has been submitted",
                ),
            )
            .reply(
                "qsub",
                CommandOutput::success("Your job 202 (\"f_quick_scan_7\") has been submitted"),
            );
        let runner = Arc::new(ImageWritingRunner { inner, images: 4 });
        let processor = ScanProcessor::new(settings, runner.clone());

        let result = processor.process("scan_7", Box::new(scan(dir.path())), None, None);

        assert!(result.success, "{:?}", result.error);
        assert!(result.steps_completed.contains(&"QuickPreview".to_string()));
        assert!(result.steps_skipped.contains(&"Reconstruction".to_string()));

        let preview = result.state.preview.as_ref().unwrap();
        assert_eq!(preview.rows, vec![0, 10, 20, 30]);
        assert_eq!(preview.centre, 31.5);
        assert_eq!(preview.centre_source, CentreSource::User);
        assert_eq!(preview.images_linked, 4);
        assert_eq!(preview.job.job_id.as_str(), "201");

        let quick_out = dir.path().join("out/processing/reconstruction/scan_7_quick");
        assert_eq!(preview.output_dir, quick_out);
        assert_eq!(
            fs::read_to_string(quick_out.join("image_00030.tif")).unwrap(),
            "slice 3"
        );
        assert_eq!(
            fs::read_to_string(quick_out.join("image_00010.tif")).unwrap(),
            "slice 1"
        );
        assert!(fs::symlink_metadata(quick_out.join("image_00001.tif")).is_err());

        let quick_sino = dir.path().join("out/processing/sino/scan_7/sino_quick");
        assert_eq!(
            fs::read_to_string(quick_sino.join("sino_00020.tiff")).unwrap(),
            "row 20"
        );
        assert!(fs::symlink_metadata(quick_sino.join("sino_00002.tiff")).is_err());

        let submissions = runner.inner.calls_to("qsub");
        assert_eq!(submissions.len(), 2);
        assert!(submissions[0].args.contains(&"1-2".to_string()));
    }

    #[test]
    fn failed_submission_keeps_partial_state() {
        let dir = tempdir().unwrap();
        let runner = Arc::new(ScriptedRunner::new());
        runner.reply("qsub", CommandOutput::failure(1, "Unable to run job: denied."));
        let processor = ScanProcessor::new(settings(dir.path()), runner.clone());

        let result = processor.process("scan_7", Box::new(scan(dir.path())), None, None);

        assert!(!result.success);
        assert!(result.error.as_ref().unwrap().contains("Sinogram"));
        assert_eq!(result.state.stage, Stage::LaidOut);
        let saved = RunState::load(&result.state_path.unwrap()).unwrap();
        assert_eq!(saved.stage, Stage::LaidOut);
        assert!(saved.layout.is_some());
    }

    #[test]
    fn cancelled_processor_starts_nothing() {
        let dir = tempdir().unwrap();
        let runner = Arc::new(ScriptedRunner::new());
        let processor = ScanProcessor::new(settings(dir.path()), runner);
        processor.cancel_handle().cancel();

        let scans: Vec<(String, Box<dyn DatasetReader + Send + Sync>)> =
            vec![("scan_7".to_string(), Box::new(scan(dir.path())))];
        let results = processor.process_all(scans, |_| None, |_| None);
        assert!(results.is_empty());
    }
}
