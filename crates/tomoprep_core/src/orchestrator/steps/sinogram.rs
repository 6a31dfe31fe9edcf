//! Sinogram step - splits detector rows into chunks and runs the sinogram
//! program as an array job.

use std::fs;
use std::path::Path;
use std::time::Duration;

use super::jobs::{error_file, job_name, submit_array, timestamp, wait_for, ArrayJob};
use crate::layout::{ensure_dir, wait_for_dir, NumberedName};
use crate::orchestrator::errors::{StepError, StepResult};
use crate::orchestrator::step::PipelineStep;
use crate::orchestrator::types::{Context, RunState, SinogramOutput, Stage, StepOutcome};
use crate::planning::ChunkPlanner;
use crate::scheduler::{quote, ResourceClass, ScriptBuilder};

/// Builds one sinogram per detector row through the batch scheduler.
pub struct SinogramStep;

impl SinogramStep {
    pub fn new() -> Self {
        Self
    }
}

impl Default for SinogramStep {
    fn default() -> Self {
        Self::new()
    }
}

/// Whether `dir` already holds sinogram outputs.
fn has_sinograms(dir: &Path) -> bool {
    let prefix = NumberedName::sinogram();
    fs::read_dir(dir)
        .map(|entries| {
            entries
                .filter_map(Result::ok)
                .any(|e| e.file_name().to_string_lossy().starts_with(prefix.prefix()))
        })
        .unwrap_or(false)
}

impl PipelineStep for SinogramStep {
    fn name(&self) -> &str {
        "Sinogram"
    }

    fn description(&self) -> &str {
        "Convert projections to sinograms on the cluster"
    }

    fn validate_input(&self, _ctx: &Context, state: &RunState) -> StepResult<()> {
        if state.layout.is_none() {
            return Err(StepError::invalid_input("processing layout not created"));
        }
        Ok(())
    }

    fn execute(&self, ctx: &Context, state: &mut RunState) -> StepResult<StepOutcome> {
        let settings = &ctx.settings.sinogram;
        if !settings.enabled {
            return Ok(StepOutcome::Skipped("sinogram stage disabled".to_string()));
        }
        let output = state
            .layout
            .as_ref()
            .ok_or_else(|| StepError::invalid_input("processing layout not created"))?;
        let layout = &output.layout;
        let sinogram_dir = layout.sinograms_dir();

        if has_sinograms(&sinogram_dir) {
            ctx.logger.warn(&format!(
                "Sinograms already present in {}, reusing them",
                sinogram_dir.display()
            ));
            state.sinogram = Some(SinogramOutput {
                sinogram_dir,
                reused: true,
                settings_dir: None,
                job: None,
            });
            state.reach(Stage::Sinograms);
            return Ok(StepOutcome::Success);
        }

        let size = output.image_size;
        if size.height == 0 {
            return Err(StepError::config("image height is zero"));
        }
        let chunks = ChunkPlanner::plan(0, size.height as usize - 1, settings.chunks as usize)?;

        let settings_dir = layout.sinogram_settings_dir(&timestamp());
        ensure_dir(&settings_dir)?;
        let manifest: String = chunks
            .iter()
            .map(|c| format!("{}\n", c.manifest_line()))
            .collect();
        let chunklist = settings_dir.join("chunklist.txt");
        fs::write(&chunklist, manifest)
            .map_err(|e| StepError::io_error(format!("write {}", chunklist.display()), e))?;
        ctx.logger.info(&format!(
            "{} rows in {} chunks, settings in {}",
            size.height,
            chunks.len(),
            settings_dir.display()
        ));

        let name = job_name("sino", &layout.scan_name);
        let mut command = format!(
            "{} -i {} -o \"$odir\" -w {} -l {} -n {}",
            quote(&settings.program),
            quote(&layout.projections_dir.to_string_lossy()),
            size.width,
            size.height,
            output.links.projection_links
        );
        if output.links.dark_links > 0 {
            command.push_str(&format!(" -d {}", quote(&layout.dark_file().to_string_lossy())));
        }
        if output.links.flat_links > 0 {
            command.push_str(&format!(" -f {}", quote(&layout.flat_file().to_string_lossy())));
        }
        command.push_str(&format!(
            " -s \"$start\" -e \"$end\" -m \"$mytask\" -J {}${{myjob}}_t${{mytask}}",
            name
        ));

        let error_file = error_file(&settings_dir);
        let script = ScriptBuilder::new("sinogram chunk")
            .path_var("chunklist", &chunklist)
            .path_var("odir", &sinogram_dir)
            .ensure_dir("odir")
            .chunk_range("chunklist")
            .run(&command)
            .record_failure(&error_file)
            .build();

        let mut job = submit_array(
            ctx,
            ArrayJob {
                name,
                queue: &settings.queue,
                dir: &settings_dir,
                script_name: "sinochunk.qsh",
                script,
                tasks: chunks.len(),
                resources: ResourceClass::Cpu,
                error_file,
            },
        )?;
        ctx.report_progress("Sinogram", 10, "sinogram job submitted");
        wait_for(ctx, &mut job, "sinogram job")?;

        let waited = wait_for_dir(
            &sinogram_dir,
            Duration::from_millis(ctx.settings.monitor.poll_interval_ms),
            Duration::from_secs(settings.wait_for_output_secs),
        )?;
        ctx.logger.info(&format!(
            "Sinogram folder {} ready after {:.0?}",
            sinogram_dir.display(),
            waited
        ));

        state.sinogram = Some(SinogramOutput {
            sinogram_dir,
            reused: false,
            settings_dir: Some(settings_dir),
            job: Some(job),
        });
        state.reach(Stage::Sinograms);
        Ok(StepOutcome::Success)
    }

    fn validate_output(&self, _ctx: &Context, state: &RunState) -> StepResult<()> {
        match &state.sinogram {
            Some(s) if s.sinogram_dir.is_dir() => Ok(()),
            Some(s) => Err(StepError::invalid_output(format!(
                "sinogram folder {} missing",
                s.sinogram_dir.display()
            ))),
            None => Err(StepError::invalid_output("sinogram output not recorded")),
        }
    }

    fn is_optional(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn detects_existing_sinograms() {
        let dir = tempdir().unwrap();
        assert!(!has_sinograms(&dir.path().join("missing")));
        assert!(!has_sinograms(dir.path()));

        fs::write(dir.path().join("notes.txt"), "").unwrap();
        assert!(!has_sinograms(dir.path()));

        fs::write(dir.path().join("sino_00000.tiff"), "").unwrap();
        assert!(has_sinograms(dir.path()));
    }
}
