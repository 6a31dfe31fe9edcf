//! Quick preview step - reconstructs every n-th sinogram row.
//!
//! The selected sinograms are linked into `sino_quick` under consecutive
//! numbers so the reconstruction program sees a compact set. Afterwards
//! both the sinograms and the output images are renamed back to their
//! original row numbers.

use std::fs;

use super::jobs::{job_name, run_reconstruction, timestamp};
use super::reconstruction::recon_inputs;
use crate::layout::{create_link, ensure_dir, reindex, step_through, LayoutManager, NumberedName};
use crate::orchestrator::errors::{StepError, StepResult};
use crate::orchestrator::step::PipelineStep;
use crate::orchestrator::types::{
    CentreSource, Context, PreviewOutput, RunState, Stage, StepOutcome,
};
use crate::planning::ChunkPlanner;

/// Reconstructs a decimated set of rows for a fast look at the sample.
pub struct QuickPreviewStep;

impl QuickPreviewStep {
    pub fn new() -> Self {
        Self
    }
}

impl Default for QuickPreviewStep {
    fn default() -> Self {
        Self::new()
    }
}

impl PipelineStep for QuickPreviewStep {
    fn name(&self) -> &str {
        "QuickPreview"
    }

    fn description(&self) -> &str {
        "Reconstruct a decimated set of slices"
    }

    fn validate_input(&self, ctx: &Context, state: &RunState) -> StepResult<()> {
        if !ctx.settings.preview.enabled {
            return Ok(());
        }
        if state.scan.is_none() {
            return Err(StepError::invalid_input("frames have not been classified"));
        }
        let layout = state
            .processing_layout()
            .ok_or_else(|| StepError::invalid_input("processing layout not created"))?;
        if !layout.sinograms_dir().is_dir() {
            return Err(StepError::invalid_input("no sinograms to preview"));
        }
        Ok(())
    }

    fn execute(&self, ctx: &Context, state: &mut RunState) -> StepResult<StepOutcome> {
        let preview = &ctx.settings.preview;
        if !preview.enabled {
            return Ok(StepOutcome::Skipped("quick preview disabled".to_string()));
        }
        let classification = state
            .scan
            .as_ref()
            .ok_or_else(|| StepError::invalid_input("frames have not been classified"))?;
        let output = state
            .layout
            .as_ref()
            .ok_or_else(|| StepError::invalid_input("processing layout not created"))?;
        let layout = &output.layout;

        let all_rows: Vec<usize> = (0..output.image_size.height as usize).collect();
        let rows = step_through(&all_rows, preview.step as usize);
        if rows.is_empty() {
            return Err(StepError::config("image height is zero"));
        }

        // Compact copy of the selected sinograms.
        let sino = NumberedName::sinogram();
        let sinograms_dir = layout.sinograms_dir();
        let quick_sino = layout.quick_sino_dir();
        if quick_sino.exists() {
            fs::remove_dir_all(&quick_sino).map_err(|e| {
                StepError::io_error(format!("remove {}", quick_sino.display()), e)
            })?;
        }
        ensure_dir(&quick_sino)?;
        for (n, row) in rows.iter().enumerate() {
            create_link(&sino.in_dir(&sinograms_dir, *row), &sino.in_dir(&quick_sino, n))?;
        }
        ctx.logger.info(&format!(
            "Linked {} of {} sinograms into {}",
            rows.len(),
            all_rows.len(),
            quick_sino.display()
        ));

        let (centre, centre_source) = match (state.cor, ctx.settings.reconstruction.centre) {
            (Some(cor), _) => (cor.axis_x, CentreSource::Estimated),
            (None, Some(centre)) => (centre, CentreSource::User),
            (None, None) => (preview.centre, CentreSource::Preview),
        };

        let run_id = format!("quick_{}", timestamp());
        let files_dir = layout.reconstruction_files_dir(&run_id);
        let images_dir = layout.reconstruction_images_dir(&run_id);
        let n_chunks = (ctx.settings.reconstruction.chunks as usize).clamp(1, rows.len());
        let chunks = ChunkPlanner::plan(0, rows.len() - 1, n_chunks)?;
        let inputs = recon_inputs(
            ctx,
            layout,
            classification,
            quick_sino.clone(),
            files_dir,
            images_dir.clone(),
            centre,
            1,
        );
        let job = run_reconstruction(ctx, job_name("quick", &layout.scan_name), &inputs, &chunks)?;

        // Link whatever images the job produced, then restore row numbers.
        let image = NumberedName::image();
        let quick_out = LayoutManager::new(ctx.settings.layout.clone(), ctx.output_override())
            .reset_quick_dir(layout)?;
        let mut produced = Vec::new();
        for n in 0..rows.len() {
            let src = image.in_dir(&images_dir, n);
            if src.exists() {
                create_link(&src, &image.in_dir(&quick_out, n))?;
                produced.push(n);
            }
        }
        if produced.len() < rows.len() {
            ctx.logger.warn(&format!(
                "Only {} of {} preview images were produced",
                produced.len(),
                rows.len()
            ));
        }
        let targets: Vec<usize> = produced.iter().map(|n| rows[*n]).collect();
        reindex(&quick_out, &image, &image, &produced, &targets)?;

        let compact: Vec<usize> = (0..rows.len()).collect();
        reindex(&quick_sino, &sino, &sino, &compact, &rows)?;
        ctx.logger.info(&format!(
            "Preview images in {} at original row numbers",
            quick_out.display()
        ));

        state.preview = Some(PreviewOutput {
            sino_dir: quick_sino,
            output_dir: quick_out,
            rows,
            centre,
            centre_source,
            images_linked: produced.len(),
            job,
        });
        state.reach(Stage::Previewed);
        Ok(StepOutcome::Success)
    }

    fn validate_output(&self, _ctx: &Context, state: &RunState) -> StepResult<()> {
        match &state.preview {
            Some(p) if p.output_dir.is_dir() => Ok(()),
            Some(p) => Err(StepError::invalid_output(format!(
                "preview folder {} missing",
                p.output_dir.display()
            ))),
            None => Err(StepError::invalid_output("preview not recorded")),
        }
    }

    fn is_optional(&self) -> bool {
        true
    }
}
