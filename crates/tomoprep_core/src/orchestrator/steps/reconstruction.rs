//! Reconstruction step - templates per-chunk configs and runs the
//! reconstruction program on the accelerator nodes.

use std::path::PathBuf;

use super::jobs::{job_name, run_reconstruction, timestamp};
use crate::classify::Classification;
use crate::cor::{CorPair, RotationCenterEstimator};
use crate::layout::ProcessingLayout;
use crate::models::{Category, CorResult};
use crate::orchestrator::errors::{StepError, StepResult};
use crate::orchestrator::step::PipelineStep;
use crate::orchestrator::types::{
    CentreSource, Context, ReconstructionOutput, RunState, Stage, StepOutcome,
};
use crate::planning::{ChunkPlanner, ReconInputs};

/// Reconstructs slices from the sinograms.
pub struct ReconstructionStep;

impl ReconstructionStep {
    pub fn new() -> Self {
        Self
    }
}

impl Default for ReconstructionStep {
    fn default() -> Self {
        Self::new()
    }
}

/// Template inputs for reconstructing `sinogram_dir` into `output_dir`.
#[allow(clippy::too_many_arguments)]
pub(super) fn recon_inputs(
    ctx: &Context,
    layout: &ProcessingLayout,
    classification: &Classification,
    sinogram_dir: PathBuf,
    files_dir: PathBuf,
    output_dir: PathBuf,
    centre: f64,
    slice_step: usize,
) -> ReconInputs {
    let settings = &ctx.settings.reconstruction;
    ReconInputs {
        sinogram_dir,
        output_dir,
        files_dir,
        flat_file: layout.flat_file(),
        dark_file: layout.dark_file(),
        flat_mode: classification.flat_dark_mode(Category::Flat),
        dark_mode: classification.flat_dark_mode(Category::Dark),
        flat_value: settings.flat_value,
        dark_value: settings.dark_value,
        centre,
        slice_step,
    }
}

/// Estimate the axis from the 0/180 degree pair, reusing an earlier estimate.
fn estimated_centre(
    ctx: &Context,
    state: &mut RunState,
    classification: &Classification,
) -> StepResult<CorResult> {
    if let Some(cor) = state.cor {
        return Ok(cor);
    }
    let settings = &ctx.settings.cor;
    let pair = CorPair::select(classification, settings.angle_tolerance)?;
    ctx.logger.info(&format!(
        "Estimating rotation centre from {} and {}",
        pair.projection_0.display(),
        pair.projection_180.display()
    ));
    let cor = RotationCenterEstimator::new(settings).estimate_files(&pair)?;
    ctx.logger.info(&format!(
        "Rotation axis at x = {:.2}, y shift {:.2}",
        cor.axis_x, cor.axis_y
    ));
    state.cor = Some(cor);
    Ok(cor)
}

impl PipelineStep for ReconstructionStep {
    fn name(&self) -> &str {
        "Reconstruction"
    }

    fn description(&self) -> &str {
        "Reconstruct slices from sinograms on the cluster"
    }

    fn validate_input(&self, ctx: &Context, state: &RunState) -> StepResult<()> {
        if !ctx.settings.reconstruction.enabled {
            return Ok(());
        }
        if state.scan.is_none() {
            return Err(StepError::invalid_input("frames have not been classified"));
        }
        let layout = state
            .processing_layout()
            .ok_or_else(|| StepError::invalid_input("processing layout not created"))?;
        let sinograms = layout.sinograms_dir();
        if !sinograms.is_dir() {
            return Err(StepError::invalid_input(format!(
                "sinogram folder {} does not exist",
                sinograms.display()
            )));
        }
        Ok(())
    }

    fn execute(&self, ctx: &Context, state: &mut RunState) -> StepResult<StepOutcome> {
        let settings = &ctx.settings.reconstruction;
        if !settings.enabled {
            return Ok(StepOutcome::Skipped(
                "reconstruction stage disabled".to_string(),
            ));
        }
        let classification = state
            .scan
            .take()
            .ok_or_else(|| StepError::invalid_input("frames have not been classified"))?;
        let result = self.reconstruct(ctx, state, &classification);
        state.scan = Some(classification);
        result
    }

    fn validate_output(&self, _ctx: &Context, state: &RunState) -> StepResult<()> {
        let output = state
            .reconstruction
            .as_ref()
            .ok_or_else(|| StepError::invalid_output("reconstruction not recorded"))?;
        if !output.images_dir.is_dir() {
            return Err(StepError::invalid_output(format!(
                "image folder {} missing",
                output.images_dir.display()
            )));
        }
        Ok(())
    }

    fn is_optional(&self) -> bool {
        true
    }
}

impl ReconstructionStep {
    fn reconstruct(
        &self,
        ctx: &Context,
        state: &mut RunState,
        classification: &Classification,
    ) -> StepResult<StepOutcome> {
        let settings = &ctx.settings.reconstruction;
        let (centre, centre_source) = match settings.centre {
            Some(centre) => (centre, CentreSource::User),
            None if settings.estimate_centre => (
                estimated_centre(ctx, state, classification)?.axis_x,
                CentreSource::Estimated,
            ),
            None => {
                return Err(StepError::config(
                    "no rotation centre given and estimation is disabled",
                ))
            }
        };
        ctx.logger
            .info(&format!("Using rotation centre {:.2} ({:?})", centre, centre_source));

        let output = state
            .layout
            .as_ref()
            .ok_or_else(|| StepError::invalid_input("processing layout not created"))?;
        let layout = &output.layout;
        let height = output.image_size.height as usize;
        if height == 0 {
            return Err(StepError::config("image height is zero"));
        }
        let first_slice = settings.first_slice as usize;
        let last_slice = settings
            .last_slice
            .map(|l| l as usize)
            .unwrap_or(height - 1);
        let chunks = ChunkPlanner::plan(first_slice, last_slice, settings.chunks as usize)?;

        let run_id = settings.run_id.clone().unwrap_or_else(timestamp);
        let files_dir = layout.reconstruction_files_dir(&run_id);
        let images_dir = layout.reconstruction_images_dir(&run_id);
        ctx.logger.info(&format!(
            "Slices {}..={} in {} chunks, run {}",
            first_slice,
            last_slice,
            chunks.len(),
            run_id
        ));

        let inputs = recon_inputs(
            ctx,
            layout,
            classification,
            layout.sinograms_dir(),
            files_dir.clone(),
            images_dir.clone(),
            centre,
            settings.slice_step.max(1) as usize,
        );
        let job = run_reconstruction(ctx, job_name("recon", &layout.scan_name), &inputs, &chunks)?;

        state.reconstruction = Some(ReconstructionOutput {
            run_id,
            files_dir,
            images_dir,
            first_slice,
            last_slice,
            centre,
            centre_source,
            job,
        });
        state.reach(Stage::Reconstructed);
        Ok(StepOutcome::Success)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;
    use crate::dataset::ScanData;
    use crate::orchestrator::testing::test_context_with;
    use crate::scheduler::runner::fake::ScriptedRunner;
    use std::sync::Arc;
    use tempfile::tempdir;

    fn empty_classification() -> Classification {
        Classification {
            frames: Vec::new(),
            categories: Vec::new(),
            sub_sequences: Vec::new(),
            used_image_keys: true,
            warnings: Vec::new(),
        }
    }

    #[test]
    fn disabled_stage_is_skipped() {
        let dir = tempdir().unwrap();
        let mut settings = Settings::default();
        settings.reconstruction.enabled = false;
        let runner = Arc::new(ScriptedRunner::new());
        let ctx = test_context_with(dir.path(), settings, ScanData::default(), Arc::clone(&runner));

        let mut state = RunState::new("r");
        let step = ReconstructionStep::new();
        assert!(step.validate_input(&ctx, &state).is_ok());
        assert!(matches!(
            step.execute(&ctx, &mut state).unwrap(),
            StepOutcome::Skipped(_)
        ));
        assert!(runner.calls().is_empty());
    }

    #[test]
    fn missing_centre_without_estimation_is_config_error() {
        let dir = tempdir().unwrap();
        let mut settings = Settings::default();
        settings.reconstruction.centre = None;
        settings.reconstruction.estimate_centre = false;
        let ctx = test_context_with(
            dir.path(),
            settings,
            ScanData::default(),
            Arc::new(ScriptedRunner::new()),
        );

        let mut state = RunState::new("r");
        state.scan = Some(empty_classification());
        let err = ReconstructionStep::new()
            .execute(&ctx, &mut state)
            .unwrap_err();
        assert!(matches!(err, StepError::Config(_)));
        // The classification survives a failed attempt.
        assert!(state.scan.is_some());
    }

    #[test]
    fn earlier_estimate_is_reused() {
        let dir = tempdir().unwrap();
        let ctx = test_context_with(
            dir.path(),
            Settings::default(),
            ScanData::default(),
            Arc::new(ScriptedRunner::new()),
        );
        let mut state = RunState::new("r");
        state.cor = Some(CorResult {
            axis_x: 1998.5,
            axis_y: -0.5,
        });

        let cor = estimated_centre(&ctx, &mut state, &empty_classification()).unwrap();
        assert_eq!(cor.axis_x, 1998.5);
    }

    #[test]
    fn estimation_needs_a_rotation_pair() {
        let dir = tempdir().unwrap();
        let ctx = test_context_with(
            dir.path(),
            Settings::default(),
            ScanData::default(),
            Arc::new(ScriptedRunner::new()),
        );
        let mut state = RunState::new("r");

        let err = estimated_centre(&ctx, &mut state, &empty_classification()).unwrap_err();
        assert!(matches!(err, StepError::Cor(_)));
        assert!(state.cor.is_none());
    }
}
