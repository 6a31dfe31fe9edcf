//! Submission and waiting shared by the scheduler-backed stages.

use std::fs;
use std::path::{Path, PathBuf};

use crate::layout::ensure_dir;
use crate::logging::sanitize_filename;
use crate::models::ChunkDescriptor;
use crate::orchestrator::errors::{StepError, StepResult};
use crate::orchestrator::types::{Context, SubmittedJob};
use crate::planning::{ReconInputs, SettingsTemplater};
use crate::scheduler::{
    finish_script, quote, write_script, JobRequest, LockPool, MonitorOutcome, ResourceClass,
    ScriptBuilder,
};

/// Folder-name timestamp, e.g. `2026_1014_093012`.
pub(crate) fn timestamp() -> String {
    chrono::Local::now().format("%Y_%m%d_%H%M%S").to_string()
}

/// Scheduler job name for a stage of a scan.
pub(crate) fn job_name(prefix: &str, scan_name: &str) -> String {
    format!("{}_{}", prefix, sanitize_filename(scan_name))
}

/// Per-process error file inside `dir`.
pub(crate) fn error_file(dir: &Path) -> PathBuf {
    dir.join(format!("error_{}.txt", std::process::id()))
}

/// An array job ready to be written and submitted.
pub(crate) struct ArrayJob<'a> {
    pub name: String,
    pub queue: &'a str,
    /// Holds the script, scheduler output and error file.
    pub dir: &'a Path,
    pub script_name: &'a str,
    pub script: String,
    pub tasks: usize,
    pub resources: ResourceClass,
    pub error_file: PathBuf,
}

/// Write and submit `job`, then a finishing job held on it.
pub(crate) fn submit_array(ctx: &Context, job: ArrayJob<'_>) -> StepResult<SubmittedJob> {
    let scheduler = ctx.scheduler();

    let script_path = job.dir.join(job.script_name);
    write_script(&script_path, &job.script)?;

    let request = JobRequest::array(&job.name, job.queue, job.dir, &script_path, job.tasks)
        .with_resources(job.resources);
    ctx.logger.command(
        &scheduler.settings().submit_program,
        &scheduler.submit_args(&request)?,
    );
    let (job_id, mut task_states) = scheduler.submit_tasks(&request)?;
    ctx.logger
        .info(&format!("{} submitted as job {} ({} tasks)", job.name, job_id, job.tasks));

    let finish_name = format!("f_{}", job.name);
    let finish_path = job
        .dir
        .join(format!("finish_{}.qsh", job.script_name.trim_end_matches(".qsh")));
    write_script(
        &finish_path,
        &finish_script(
            &job.name,
            &job.error_file,
            scheduler.settings().notify_address.as_deref(),
        ),
    )?;
    let finish_request = JobRequest::single(
        &finish_name,
        &scheduler.settings().finish_queue,
        job.dir,
        &finish_path,
    )
    .hold_on(&job.name);
    let (finish_job_id, finish_tasks) = scheduler.submit_tasks(&finish_request)?;
    task_states.extend(finish_tasks);
    ctx.logger
        .info(&format!("{} submitted as job {}", finish_name, finish_job_id));

    Ok(SubmittedJob {
        name: job.name,
        job_id,
        finish_job_id,
        tasks: job.tasks,
        task_states,
        error_file: job.error_file,
        failed_tasks: Vec::new(),
    })
}

/// Block until the job and its finishing job leave the queue, then collect
/// any failures the tasks recorded.
pub(crate) fn wait_for(ctx: &Context, job: &mut SubmittedJob, what: &str) -> StepResult<()> {
    ctx.logger.section(&format!("Waiting for {}", what));
    let outcome = ctx.monitor().wait(&mut job.task_states)?;

    match outcome {
        MonitorOutcome::Done { polls, waited } => {
            ctx.logger.info(&format!(
                "{} finished after {} polls ({:.0?})",
                what, polls, waited
            ));
        }
        MonitorOutcome::TimedOut { waited, .. } => {
            return Err(StepError::TimedOut {
                what: what.to_string(),
                waited,
            });
        }
        MonitorOutcome::Cancelled { .. } => return Err(StepError::Cancelled(what.to_string())),
    }

    job.failed_tasks = read_failures(&job.error_file)?;
    if !job.failed_tasks.is_empty() {
        ctx.logger.warn(&format!(
            "{} task(s) of {} failed, see {}",
            job.failed_tasks.len(),
            job.name,
            job.error_file.display()
        ));
        for line in &job.failed_tasks {
            ctx.logger.output_line(line, true);
        }
    }
    Ok(())
}

fn read_failures(path: &Path) -> StepResult<Vec<String>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let text = fs::read_to_string(path)
        .map_err(|e| StepError::io_error(format!("read {}", path.display()), e))?;
    Ok(text
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect())
}

/// Template one config per chunk into `inputs.files_dir`, then submit and
/// wait for the reconstruction array job.
pub(crate) fn run_reconstruction(
    ctx: &Context,
    name: String,
    inputs: &ReconInputs,
    chunks: &[ChunkDescriptor],
) -> StepResult<SubmittedJob> {
    let settings = &ctx.settings.reconstruction;
    ensure_dir(&inputs.files_dir)?;
    ensure_dir(&inputs.output_dir)?;

    let template = ctx.settings.paths.template_path.trim();
    let templater = if template.is_empty() {
        SettingsTemplater::builtin()?
    } else {
        SettingsTemplater::load(Path::new(template))?
    };
    let written = templater.write_all(inputs, chunks)?;
    ctx.logger.info(&format!(
        "Wrote {} chunk configs to {}",
        written.chunk_files.len(),
        inputs.files_dir.display()
    ));

    let error_file = error_file(&inputs.files_dir);
    let script = ScriptBuilder::new("reconstruction chunk")
        .path_var("mypath", &inputs.files_dir)
        .var("myconfig", "\"$mypath/chunk_$mynum.toml\"")
        .lock_pool(&LockPool::from_settings(&ctx.settings.scheduler))
        .patch_resource("myconfig")
        .run(&format!("{} \"$myconfig\"", quote(&settings.program)))
        .record_failure(&error_file)
        .build();

    let mut job = submit_array(
        ctx,
        ArrayJob {
            name,
            queue: &settings.queue,
            dir: &inputs.files_dir,
            script_name: "reconchunk.qsh",
            script,
            tasks: chunks.len(),
            resources: ResourceClass::Accelerator,
            error_file,
        },
    )?;
    wait_for(ctx, &mut job, "reconstruction job")?;
    Ok(job)
}
