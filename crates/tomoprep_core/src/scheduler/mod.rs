//! Batch scheduler integration.
//!
//! - [`ScriptBuilder`] writes per-task bash launchers (lock pool, config
//!   patch, failure record) and [`finish_script`] the job held on them
//! - [`JobScheduler`] submits array jobs and parses the returned job id
//! - [`JobMonitor`] polls the status command, advancing each tracked
//!   [`JobTask`](crate::models::JobTask) until none is active
//!
//! All process execution goes through [`CommandRunner`].

mod monitor;
pub(crate) mod runner;
mod script;
mod status;
mod submit;
mod types;

pub use monitor::JobMonitor;
pub use runner::{CommandRunner, SystemRunner};
pub use script::{finish_script, quote, write_script, LockPool, ScriptBuilder};
pub use status::{
    active_jobs, apply_status, parse_status, parse_task_ids, status_line, summarize, JobSummary,
    StatusRow,
};
pub use submit::{parse_job_id, scheduler_environment, JobScheduler};
pub use types::{
    CommandOutput, JobRequest, MonitorError, MonitorOutcome, MonitorResult, ResourceClass,
    ResourceProfile, SchedulerError, SchedulerResult,
};
