//! Layout step - builds the processing tree and links frames into it.

use crate::dataset::{detect_dimensions, ImageSize};
use crate::layout::LayoutManager;
use crate::models::Category;
use crate::orchestrator::errors::{StepError, StepResult};
use crate::orchestrator::step::PipelineStep;
use crate::orchestrator::types::{Context, LayoutOutput, RunState, Stage, StepOutcome};

/// Creates the directory tree and the dark, flat and projection links.
pub struct LayoutStep;

impl LayoutStep {
    pub fn new() -> Self {
        Self
    }
}

impl Default for LayoutStep {
    fn default() -> Self {
        Self::new()
    }
}

impl PipelineStep for LayoutStep {
    fn name(&self) -> &str {
        "Layout"
    }

    fn description(&self) -> &str {
        "Create processing directories and frame links"
    }

    fn validate_input(&self, _ctx: &Context, state: &RunState) -> StepResult<()> {
        if state.scan.is_none() {
            return Err(StepError::invalid_input("frames have not been classified"));
        }
        Ok(())
    }

    fn execute(&self, ctx: &Context, state: &mut RunState) -> StepResult<StepOutcome> {
        let classification = state
            .scan
            .as_ref()
            .ok_or_else(|| StepError::invalid_input("frames have not been classified"))?;
        let reference = classification
            .first_of(Category::Projection)
            .map(|f| f.file_path.clone())
            .ok_or_else(|| StepError::invalid_input("no projection frames"))?;

        let manager = LayoutManager::new(ctx.settings.layout.clone(), ctx.output_override());
        let layout = manager.resolve(&reference)?;
        ctx.logger.info(&format!(
            "Processing root {} for scan {}",
            layout.root.display(),
            layout.scan_name
        ));
        manager.create_dirs(&layout)?;
        let links = manager.populate(&layout, classification)?;
        ctx.logger.info(&format!(
            "{} projection, {} dark, {} flat, {} held links ({} already present)",
            links.projection_links,
            links.dark_links,
            links.flat_links,
            links.held_links,
            links.unchanged
        ));

        let sino = &ctx.settings.sinogram;
        let image_size = match (sino.width, sino.height) {
            (Some(width), Some(height)) => ImageSize { width, height },
            (width, height) => {
                let detected = detect_dimensions(&reference);
                ImageSize {
                    width: width.unwrap_or(detected.width),
                    height: height.unwrap_or(detected.height),
                }
            }
        };
        ctx.logger.info(&format!(
            "Image size {}x{}",
            image_size.width, image_size.height
        ));

        state.layout = Some(LayoutOutput {
            layout,
            links,
            image_size,
        });
        state.reach(Stage::LaidOut);
        Ok(StepOutcome::Success)
    }

    fn validate_output(&self, _ctx: &Context, state: &RunState) -> StepResult<()> {
        let output = state
            .layout
            .as_ref()
            .ok_or_else(|| StepError::invalid_output("layout not recorded"))?;
        if !output.layout.projections_dir.is_dir() {
            return Err(StepError::invalid_output(format!(
                "projection folder {} missing",
                output.layout.projections_dir.display()
            )));
        }
        if output.links.projection_links == 0 {
            return Err(StepError::invalid_output("no projections linked"));
        }
        Ok(())
    }
}
