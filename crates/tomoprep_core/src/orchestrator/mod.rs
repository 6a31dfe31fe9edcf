//! Pipeline orchestrator for processing one tomography scan.
//!
//! A run is a fixed sequence of stages. Each stage validates what earlier
//! stages left in the [`RunState`], does its work (possibly through the
//! batch scheduler) and records its results. The state is saved next to
//! the processing tree after every stage.
//!
//! # Architecture
//!
//! ```text
//! Pipeline
//!     ├── Step: Classify
//!     ├── Step: Layout
//!     ├── Step: Sinogram        (optional)
//!     ├── Step: Reconstruction  (optional)
//!     └── Step: QuickPreview    (optional)
//! ```
//!
//! # Example
//!
//! ```ignore
//! use tomoprep_core::orchestrator::ScanProcessor;
//!
//! let processor = ScanProcessor::new(settings, Arc::new(SystemRunner));
//! let result = processor.process("scan_564", Box::new(reader), None, None);
//! println!("Reached {:?}", result.state.stage);
//! ```

mod errors;
mod pipeline;
mod processor;
mod step;
pub mod steps;
mod types;

pub use errors::{PipelineError, PipelineResult, StepError, StepResult};
pub use pipeline::{CancelHandle, Pipeline, PipelineRunResult};
pub use processor::{RunResult, ScanProcessor};
pub use step::PipelineStep;
pub use steps::{ClassifyStep, LayoutStep, QuickPreviewStep, ReconstructionStep, SinogramStep};
pub use types::{
    CentreSource, ClassificationSummary, Context, LayoutOutput, PreviewOutput, ProgressCallback,
    ReconstructionOutput, RunState, SinogramOutput, Stage, StepOutcome, SubmittedJob,
};

/// Create a standard pipeline with all steps in the correct order.
///
/// 1. Classify - sort frames into dark, flat and projection
/// 2. Layout - build the processing tree and link frames
/// 3. Sinogram - projections to sinograms on the cluster
/// 4. Reconstruction - sinograms to slices on the cluster
/// 5. QuickPreview - reconstruct every n-th row
pub fn create_standard_pipeline() -> Pipeline {
    Pipeline::new()
        .with_step(ClassifyStep::new())
        .with_step(LayoutStep::new())
        .with_step(SinogramStep::new())
        .with_step(ReconstructionStep::new())
        .with_step(QuickPreviewStep::new())
}

#[cfg(test)]
pub(crate) mod testing {
    use std::path::Path;
    use std::sync::Arc;

    use super::Context;
    use crate::config::Settings;
    use crate::dataset::ScanData;
    use crate::logging::{LogConfig, RunLogger};
    use crate::scheduler::runner::fake::ScriptedRunner;

    /// Context over an empty dataset, logging into `dir`.
    pub fn test_context(dir: &Path) -> Context {
        test_context_with(
            dir,
            Settings::default(),
            ScanData::default(),
            Arc::new(ScriptedRunner::new()),
        )
    }

    pub fn test_context_with(
        dir: &Path,
        settings: Settings,
        scan: ScanData,
        runner: Arc<ScriptedRunner>,
    ) -> Context {
        let logger = RunLogger::new("test_run", dir, LogConfig::debug(), None)
            .expect("test logger");
        Context::new(settings, "test_run", Box::new(scan), Arc::new(logger), runner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_pipeline_order() {
        let pipeline = create_standard_pipeline();
        assert_eq!(
            pipeline.step_names(),
            vec!["Classify", "Layout", "Sinogram", "Reconstruction", "QuickPreview"]
        );
    }
}
