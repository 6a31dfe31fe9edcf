//! Types shared by submission and monitoring.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::config::SchedulerSettings;
use crate::models::JobId;

/// Error type for script generation and job submission.
#[derive(Error, Debug)]
pub enum SchedulerError {
    #[error("I/O error in {operation} ({path}): {source}")]
    Io {
        operation: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to run {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{program} exited with code {exit_code}: {stderr}")]
    CommandFailed {
        program: String,
        exit_code: i32,
        stderr: String,
    },

    #[error("No job id in submission output: {0:?}")]
    UnparsableSubmission(String),

    #[error("Submission returned a malformed job id: {0:?}")]
    InvalidJobId(String),

    #[error("Invalid job request: {0}")]
    InvalidRequest(String),
}

pub type SchedulerResult<T> = Result<T, SchedulerError>;

/// Error type for the job monitor.
#[derive(Error, Debug)]
pub enum MonitorError {
    #[error("No jobs to monitor")]
    NothingToMonitor,

    #[error("Status command kept failing for {waited:?}: {last_error}")]
    StatusUnavailable {
        waited: Duration,
        #[source]
        last_error: SchedulerError,
    },
}

pub type MonitorResult<T> = Result<T, MonitorError>;

/// Captured result of an external command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code; `None` when terminated by a signal.
    pub status: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(stdout: impl Into<String>) -> Self {
        Self {
            status: Some(0),
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    pub fn failure(code: i32, stderr: impl Into<String>) -> Self {
        Self {
            status: Some(code),
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == Some(0)
    }

    /// Map a non-zero exit to [`SchedulerError::CommandFailed`].
    pub fn check(self, program: &str) -> SchedulerResult<Self> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(SchedulerError::CommandFailed {
                program: program.to_string(),
                exit_code: self.status.unwrap_or(-1),
                stderr: self.stderr.trim().to_string(),
            })
        }
    }
}

/// How much of the node a job asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceClass {
    /// Bookkeeping jobs (finish/notification).
    Minimal,
    /// CPU-bound chunk work.
    Cpu,
    /// Chunk work that holds an accelerator.
    Accelerator,
}

/// Site-specific resource request, selected by project name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceProfile {
    /// Slot count plus an accelerator count (`-pe smp N -l gpus=M`).
    Accelerator { slots: u32, accelerators: u32 },
    /// Named node resource plus slot count (`-l NAME -pe smp N`).
    Named { resource: String, slots: u32 },
}

impl ResourceProfile {
    pub fn from_settings(settings: &SchedulerSettings) -> Self {
        if settings
            .accelerator_projects
            .iter()
            .any(|p| p == &settings.project)
        {
            ResourceProfile::Accelerator {
                slots: settings.slots,
                accelerators: settings.accelerators,
            }
        } else {
            ResourceProfile::Named {
                resource: settings.named_resource.clone(),
                slots: settings.named_slots,
            }
        }
    }

    /// Submission arguments for a job of the given class.
    pub fn args(&self, class: ResourceClass) -> Vec<String> {
        match self {
            ResourceProfile::Accelerator {
                slots,
                accelerators,
            } => match class {
                ResourceClass::Minimal => Vec::new(),
                ResourceClass::Cpu => smp(*slots),
                ResourceClass::Accelerator => {
                    let mut args = smp(*slots);
                    args.push("-l".to_string());
                    args.push(format!("gpus={}", accelerators));
                    args
                }
            },
            // Named-resource sites route every job to the same node class.
            ResourceProfile::Named { resource, slots } => {
                let mut args = vec!["-l".to_string(), resource.clone()];
                args.extend(smp(*slots));
                args
            }
        }
    }
}

fn smp(slots: u32) -> Vec<String> {
    vec!["-pe".to_string(), "smp".to_string(), slots.to_string()]
}

/// One submission.
#[derive(Debug, Clone)]
pub struct JobRequest {
    pub name: String,
    pub queue: String,
    /// Receives the scheduler's stdout/stderr files.
    pub output_dir: PathBuf,
    pub script: PathBuf,
    /// Array size; tasks run as `1..=n`. `None` submits a single job.
    pub tasks: Option<usize>,
    /// Name of a job that must finish first.
    pub hold_on: Option<String>,
    pub resources: ResourceClass,
}

impl JobRequest {
    pub fn array(
        name: impl Into<String>,
        queue: impl Into<String>,
        output_dir: impl Into<PathBuf>,
        script: impl Into<PathBuf>,
        tasks: usize,
    ) -> Self {
        Self {
            name: name.into(),
            queue: queue.into(),
            output_dir: output_dir.into(),
            script: script.into(),
            tasks: Some(tasks),
            hold_on: None,
            resources: ResourceClass::Cpu,
        }
    }

    pub fn single(
        name: impl Into<String>,
        queue: impl Into<String>,
        output_dir: impl Into<PathBuf>,
        script: impl Into<PathBuf>,
    ) -> Self {
        Self {
            name: name.into(),
            queue: queue.into(),
            output_dir: output_dir.into(),
            script: script.into(),
            tasks: None,
            hold_on: None,
            resources: ResourceClass::Minimal,
        }
    }

    pub fn hold_on(mut self, name: impl Into<String>) -> Self {
        self.hold_on = Some(name.into());
        self
    }

    pub fn with_resources(mut self, resources: ResourceClass) -> Self {
        self.resources = resources;
        self
    }
}

/// Final state of a monitoring loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MonitorOutcome {
    /// No tracked job has a pending or running task.
    Done { polls: u32, waited: Duration },
    /// The total wait elapsed with tasks still active.
    TimedOut {
        waited: Duration,
        still_active: Vec<JobId>,
    },
    /// Stopped by the cancel flag. Submitted tasks keep running.
    Cancelled { waited: Duration },
}

impl MonitorOutcome {
    pub fn is_done(&self) -> bool {
        matches!(self, MonitorOutcome::Done { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn profile_follows_project() {
        let mut settings = SchedulerSettings::default();
        assert_eq!(
            ResourceProfile::from_settings(&settings),
            ResourceProfile::Accelerator {
                slots: 4,
                accelerators: 1
            }
        );

        settings.project = "i13".to_string();
        assert_eq!(
            ResourceProfile::from_settings(&settings),
            ResourceProfile::Named {
                resource: "tesla64".to_string(),
                slots: 6
            }
        );
    }

    #[test]
    fn profile_args_by_class() {
        let accel = ResourceProfile::Accelerator {
            slots: 4,
            accelerators: 1,
        };
        assert!(accel.args(ResourceClass::Minimal).is_empty());
        assert_eq!(accel.args(ResourceClass::Cpu), ["-pe", "smp", "4"]);
        assert_eq!(
            accel.args(ResourceClass::Accelerator),
            ["-pe", "smp", "4", "-l", "gpus=1"]
        );

        let named = ResourceProfile::Named {
            resource: "tesla64".to_string(),
            slots: 6,
        };
        assert_eq!(
            named.args(ResourceClass::Minimal),
            ["-l", "tesla64", "-pe", "smp", "6"]
        );
    }

    #[test]
    fn check_maps_nonzero_exit() {
        assert!(CommandOutput::success("ok").check("qsub").is_ok());
        let err = CommandOutput::failure(2, "denied\n").check("qsub").unwrap_err();
        match err {
            SchedulerError::CommandFailed {
                program,
                exit_code,
                stderr,
            } => {
                assert_eq!(program, "qsub");
                assert_eq!(exit_code, 2);
                assert_eq!(stderr, "denied");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
