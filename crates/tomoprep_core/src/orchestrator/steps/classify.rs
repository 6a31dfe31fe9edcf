//! Classify step - reads the dataset and sorts frames into categories.

use crate::classify::FrameClassifier;
use crate::models::Category;
use crate::orchestrator::errors::{StepError, StepResult};
use crate::orchestrator::step::PipelineStep;
use crate::orchestrator::types::{ClassificationSummary, Context, RunState, Stage, StepOutcome};

/// Reads the scan arrays and classifies every frame.
pub struct ClassifyStep;

impl ClassifyStep {
    pub fn new() -> Self {
        Self
    }
}

impl Default for ClassifyStep {
    fn default() -> Self {
        Self::new()
    }
}

impl PipelineStep for ClassifyStep {
    fn name(&self) -> &str {
        "Classify"
    }

    fn description(&self) -> &str {
        "Classify frames as dark, flat or projection"
    }

    fn validate_input(&self, _ctx: &Context, _state: &RunState) -> StepResult<()> {
        Ok(())
    }

    fn execute(&self, ctx: &Context, state: &mut RunState) -> StepResult<StepOutcome> {
        let scan = ctx.read_dataset()?;
        ctx.logger
            .info(&format!("Read {} frames from dataset", scan.file_paths.len()));

        let classification =
            FrameClassifier::new(ctx.settings.classification.clone()).classify(&scan)?;
        let summary = ClassificationSummary::from_classification(&classification);

        ctx.logger.info(&format!(
            "{} dark, {} flat, {} projection, {} unclassified in {} sub-sequences ({})",
            summary.darks,
            summary.flats,
            summary.projections,
            summary.unclassified,
            summary.sub_sequences,
            if summary.used_image_keys {
                "image keys"
            } else {
                "physical positions"
            }
        ));
        for warning in &summary.warnings {
            ctx.logger.warn(warning);
        }

        state.classification = Some(summary);
        state.scan = Some(classification);
        state.reach(Stage::Classified);
        Ok(StepOutcome::Success)
    }

    fn validate_output(&self, _ctx: &Context, state: &RunState) -> StepResult<()> {
        match &state.scan {
            Some(c) if c.count(Category::Projection) > 0 => Ok(()),
            Some(_) => Err(StepError::invalid_output("no projection frames")),
            None => Err(StepError::invalid_output("classification not recorded")),
        }
    }
}
