//! Array-job submission.

use std::sync::Arc;

use crate::config::SchedulerSettings;
use crate::models::{JobId, JobTask};

use super::runner::CommandRunner;
use super::types::{JobRequest, ResourceProfile, SchedulerError, SchedulerResult};

/// Submits jobs through the configured submit program.
#[derive(Clone)]
pub struct JobScheduler {
    settings: SchedulerSettings,
    profile: ResourceProfile,
    runner: Arc<dyn CommandRunner>,
}

impl JobScheduler {
    pub fn new(settings: SchedulerSettings, runner: Arc<dyn CommandRunner>) -> Self {
        let profile = ResourceProfile::from_settings(&settings);
        Self {
            settings,
            profile,
            runner,
        }
    }

    pub fn settings(&self) -> &SchedulerSettings {
        &self.settings
    }

    pub fn profile(&self) -> &ResourceProfile {
        &self.profile
    }

    /// Environment for every scheduler command.
    pub fn environment(&self) -> Vec<(String, String)> {
        scheduler_environment(&self.settings)
    }

    /// Submission arguments, in the order the submit program expects.
    pub fn submit_args(&self, request: &JobRequest) -> SchedulerResult<Vec<String>> {
        if request.tasks == Some(0) {
            return Err(SchedulerError::InvalidRequest(format!(
                "array job '{}' has no tasks",
                request.name
            )));
        }
        if request.name.trim().is_empty() {
            return Err(SchedulerError::InvalidRequest("empty job name".to_string()));
        }

        let out = request.output_dir.to_string_lossy().into_owned();
        let mut args = vec![
            "-P".to_string(),
            self.settings.project.clone(),
            "-e".to_string(),
            out.clone(),
            "-o".to_string(),
            out,
            "-q".to_string(),
            request.queue.clone(),
            "-N".to_string(),
            request.name.clone(),
        ];
        if let Some(hold) = &request.hold_on {
            args.push("-hold_jid".to_string());
            args.push(hold.clone());
        }
        args.push("-cwd".to_string());
        args.extend(self.profile.args(request.resources));
        if let Some(n) = request.tasks {
            args.push("-t".to_string());
            args.push(format!("1-{}", n));
        }
        args.push(request.script.to_string_lossy().into_owned());
        Ok(args)
    }

    /// Submit and return the scheduler-assigned job id.
    pub fn submit(&self, request: &JobRequest) -> SchedulerResult<JobId> {
        let args = self.submit_args(request)?;
        let program = &self.settings.submit_program;
        tracing::info!("Submitting {} to {}", request.name, request.queue);

        let output = self
            .runner
            .run(program, &args, &self.environment())?
            .check(program)?;
        let id = parse_job_id(&output.stdout)?;
        tracing::info!("{} submitted as job {}", request.name, id);
        Ok(id)
    }

    /// Submit and return one pending task per array index, or a single task
    /// for a plain job.
    pub fn submit_tasks(&self, request: &JobRequest) -> SchedulerResult<(JobId, Vec<JobTask>)> {
        let id = self.submit(request)?;
        let tasks = (1..=request.tasks.unwrap_or(1))
            .map(|task_id| JobTask::new(id.clone(), task_id))
            .collect();
        Ok((id, tasks))
    }
}

/// `scheduler.environment` plus `PATH` with `path_prefix` prepended.
pub fn scheduler_environment(settings: &SchedulerSettings) -> Vec<(String, String)> {
    let mut env: Vec<(String, String)> = settings
        .environment
        .iter()
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    if !settings.path_prefix.is_empty() {
        let path = match std::env::var("PATH") {
            Ok(current) if !current.is_empty() => format!("{}:{}", settings.path_prefix, current),
            _ => settings.path_prefix.clone(),
        };
        env.retain(|(k, _)| k != "PATH");
        env.push(("PATH".to_string(), path));
    }
    env
}

/// Extract the job id from submission output.
///
/// Accepts `Your job 123 ("name") has been submitted` and
/// `Your job-array 123.1-16:1 ("name") has been submitted`.
pub fn parse_job_id(stdout: &str) -> SchedulerResult<JobId> {
    for line in stdout.lines() {
        let mut tokens = line.split_whitespace();
        while let Some(token) = tokens.next() {
            if token != "job" && token != "job-array" {
                continue;
            }
            let Some(raw) = tokens.next() else {
                break;
            };
            let id = raw.split('.').next().unwrap_or(raw);
            if id.is_empty() || !id.bytes().all(|b| b.is_ascii_digit()) {
                return Err(SchedulerError::InvalidJobId(raw.to_string()));
            }
            return Ok(JobId::new_unchecked(id));
        }
    }
    Err(SchedulerError::UnparsableSubmission(stdout.trim().to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::runner::fake::ScriptedRunner;
    use crate::models::TaskState;
    use crate::scheduler::types::{CommandOutput, ResourceClass};
    use std::path::PathBuf;

    fn request() -> JobRequest {
        JobRequest::array(
            "sino_scan_1",
            "low.q",
            "/data/sino_files",
            "/data/sino_files/sinochunk.qsh",
            16,
        )
    }

    #[test]
    fn parses_captured_outputs() {
        assert_eq!(
            parse_job_id("Your job 4817301 (\"f_sino_scan\") has been submitted\n")
                .unwrap()
                .as_str(),
            "4817301"
        );
        assert_eq!(
            parse_job_id("Your job-array 4817300.1-16:1 (\"sino_scan\") has been submitted\n")
                .unwrap()
                .as_str(),
            "4817300"
        );
    }

    #[test]
    fn rejects_malformed_ids() {
        assert!(matches!(
            parse_job_id("Your job abc (\"x\") has been submitted"),
            Err(SchedulerError::InvalidJobId(_))
        ));
        assert!(matches!(
            parse_job_id("Unable to run job: denied.\nExiting."),
            Err(SchedulerError::UnparsableSubmission(_))
        ));
        assert!(matches!(
            parse_job_id(""),
            Err(SchedulerError::UnparsableSubmission(_))
        ));
    }

    #[test]
    fn args_in_submit_order() {
        let scheduler = JobScheduler::new(
            SchedulerSettings::default(),
            Arc::new(ScriptedRunner::new()),
        );
        let args = scheduler
            .submit_args(&request().hold_on("prev").with_resources(ResourceClass::Accelerator))
            .unwrap();
        assert_eq!(
            args,
            [
                "-P", "i12", "-e", "/data/sino_files", "-o", "/data/sino_files", "-q", "low.q",
                "-N", "sino_scan_1", "-hold_jid", "prev", "-cwd", "-pe", "smp", "4", "-l",
                "gpus=1", "-t", "1-16", "/data/sino_files/sinochunk.qsh",
            ]
        );
    }

    #[test]
    fn single_job_has_no_array_range() {
        let scheduler = JobScheduler::new(
            SchedulerSettings::default(),
            Arc::new(ScriptedRunner::new()),
        );
        let args = scheduler
            .submit_args(&JobRequest::single("f_x", "high.q", "/d", PathBuf::from("/d/f.qsh")))
            .unwrap();
        assert!(!args.iter().any(|a| a == "-t"));
        assert_eq!(args.last().map(String::as_str), Some("/d/f.qsh"));
    }

    #[test]
    fn zero_task_array_is_rejected() {
        let scheduler = JobScheduler::new(
            SchedulerSettings::default(),
            Arc::new(ScriptedRunner::new()),
        );
        let mut req = request();
        req.tasks = Some(0);
        assert!(matches!(
            scheduler.submit_args(&req),
            Err(SchedulerError::InvalidRequest(_))
        ));
    }

    #[test]
    fn submit_runs_program_with_environment() {
        let runner = Arc::new(ScriptedRunner::new());
        runner.reply(
            "qsub",
            CommandOutput::success("Your job-array 99.1-16:1 (\"sino_scan_1\") has been submitted"),
        );
        let mut settings = SchedulerSettings::default();
        settings.path_prefix = "/opt/sge/bin".to_string();
        let scheduler = JobScheduler::new(settings, runner.clone());

        let id = scheduler.submit(&request()).unwrap();
        assert_eq!(id.as_str(), "99");

        let calls = runner.calls_to("qsub");
        assert_eq!(calls.len(), 1);
        assert!(calls[0]
            .env
            .iter()
            .any(|(k, v)| k == "SGE_CELL" && v == "DLS"));
        assert!(calls[0]
            .env
            .iter()
            .any(|(k, v)| k == "PATH" && v.starts_with("/opt/sge/bin")));
    }

    #[test]
    fn submit_surfaces_failed_command() {
        let runner = Arc::new(ScriptedRunner::new());
        runner.reply("qsub", CommandOutput::failure(1, "Unable to run job"));
        let scheduler = JobScheduler::new(SchedulerSettings::default(), runner);
        assert!(matches!(
            scheduler.submit(&request()),
            Err(SchedulerError::CommandFailed { exit_code: 1, .. })
        ));
    }

    #[test]
    fn submitted_tasks_start_pending() {
        let runner = Arc::new(ScriptedRunner::new());
        runner
            .reply(
                "qsub",
                CommandOutput::success("Your job-array 99.1-16:1 (\"s\") has been submitted"),
            )
            .reply("qsub", CommandOutput::success("Your job 100 (\"f_sino\") has been submitted"));
        let scheduler = JobScheduler::new(SchedulerSettings::default(), runner);

        let (id, tasks) = scheduler.submit_tasks(&request()).unwrap();
        assert_eq!(id.as_str(), "99");
        assert_eq!(tasks.len(), 16);
        assert_eq!(tasks[15].task_id, 16);
        assert!(tasks.iter().all(|t| t.state == TaskState::Pending && t.job_id == id));

        let single = JobRequest::single("f_sino", "high.q", "/d", PathBuf::from("/d/f.qsh"));
        let (_, tasks) = scheduler.submit_tasks(&single).unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].task_id, 1);
    }
}
