//! Poll loop over the scheduler status command.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crate::config::MonitorSettings;
use crate::models::{JobId, JobTask};

use super::runner::CommandRunner;
use super::status::{active_jobs, apply_status, parse_status, status_line, summarize};
use super::types::{MonitorError, MonitorOutcome, MonitorResult, SchedulerError, SchedulerResult};

/// Waits for tracked jobs to leave the scheduler's active states.
pub struct JobMonitor {
    program: String,
    env: Vec<(String, String)>,
    poll_interval: Duration,
    total_wait: Duration,
    runner: Arc<dyn CommandRunner>,
    cancel: Arc<AtomicBool>,
}

impl JobMonitor {
    pub fn new(
        program: impl Into<String>,
        env: Vec<(String, String)>,
        settings: &MonitorSettings,
        runner: Arc<dyn CommandRunner>,
    ) -> Self {
        Self {
            program: program.into(),
            env,
            poll_interval: Duration::from_millis(settings.poll_interval_ms.max(1)),
            total_wait: Duration::from_millis(settings.total_wait_ms),
            runner,
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Share a cancellation flag, checked once per tick.
    pub fn with_cancel_flag(mut self, cancel: Arc<AtomicBool>) -> Self {
        self.cancel = cancel;
        self
    }

    /// One status listing applied to `tasks`; returns the jobs that still
    /// have active tasks.
    pub fn poll(&self, tasks: &mut [JobTask]) -> SchedulerResult<Vec<JobId>> {
        let output = self
            .runner
            .run(&self.program, &["-u".to_string(), "*".to_string()], &self.env)?
            .check(&self.program)?;
        let rows = parse_status(&output.stdout);
        apply_status(&rows, tasks);

        let tracked: Vec<JobId> = tasks.iter().map(|t| t.job_id.clone()).collect();
        tracing::debug!("Job status: {}", status_line(&summarize(&rows, &tracked)));
        Ok(active_jobs(tasks))
    }

    /// Block until no tracked task is pending or running, the total wait
    /// elapses, or the cancel flag is raised. Task states are advanced in
    /// place.
    pub fn wait(&self, tasks: &mut [JobTask]) -> MonitorResult<MonitorOutcome> {
        if tasks.is_empty() {
            return Err(MonitorError::NothingToMonitor);
        }

        let start = Instant::now();
        let mut polls = 0u32;
        let mut last_error: Option<SchedulerError>;

        loop {
            if self.cancel.load(Ordering::SeqCst) {
                tracing::warn!("Monitoring cancelled; submitted tasks keep running");
                return Ok(MonitorOutcome::Cancelled {
                    waited: start.elapsed(),
                });
            }

            polls += 1;
            match self.poll(tasks) {
                Ok(active) if active.is_empty() => {
                    return Ok(MonitorOutcome::Done {
                        polls,
                        waited: start.elapsed(),
                    });
                }
                Ok(_) => last_error = None,
                Err(e) => {
                    tracing::warn!("Status poll {} failed, retrying: {}", polls, e);
                    last_error = Some(e);
                }
            }

            let waited = start.elapsed();
            if waited >= self.total_wait {
                if let Some(last_error) = last_error {
                    return Err(MonitorError::StatusUnavailable { waited, last_error });
                }
                let still_active = active_jobs(tasks);
                tracing::warn!(
                    "Gave up after {:?} with {} job(s) active",
                    waited,
                    still_active.len()
                );
                return Ok(MonitorOutcome::TimedOut {
                    waited,
                    still_active,
                });
            }

            thread::sleep(self.poll_interval.min(self.total_wait - waited));
        }
    }
}
