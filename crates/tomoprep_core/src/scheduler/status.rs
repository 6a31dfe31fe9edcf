//! Status table parsing.
//!
//! ```text
//! job-ID  prior   name   user  state submit/start at     queue      slots ja-task-ID
//! -------------------------------------------------------------------------------
//!  4817300 0.505 sino_s abc12 r     10/14/2026 10:00:01 low.q@node1    1 3
//!  4817300 0.000 sino_s abc12 qw    10/14/2026 09:59:58                1 4-16:1
//! ```

use std::collections::BTreeMap;
use std::fmt;

use crate::models::{JobId, JobTask, TaskState};

/// One listed row, expanded to its task ids.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusRow {
    pub job_id: String,
    pub state: TaskState,
    /// Empty when the task column is absent or unparsable.
    pub tasks: Vec<usize>,
}

/// Parse the listing, skipping the two header lines and short rows.
pub fn parse_status(text: &str) -> Vec<StatusRow> {
    text.lines()
        .skip(2)
        .filter_map(|line| {
            let cols: Vec<&str> = line.split_whitespace().collect();
            if cols.len() <= 4 {
                return None;
            }
            Some(StatusRow {
                job_id: cols[0].to_string(),
                state: TaskState::from_scheduler_code(cols[4]),
                tasks: cols.last().map(|c| parse_task_ids(c)).unwrap_or_default(),
            })
        })
        .collect()
}

/// Expand `N`, `a-b:s` or a comma list of either.
pub fn parse_task_ids(column: &str) -> Vec<usize> {
    let mut ids = Vec::new();
    for part in column.split(',') {
        if let Some((range, step)) = part.split_once(':') {
            let step = step.parse::<usize>().unwrap_or(1).max(1);
            if let Some((a, b)) = range.split_once('-') {
                if let (Ok(a), Ok(b)) = (a.parse::<usize>(), b.parse::<usize>()) {
                    ids.extend((a..=b).step_by(step));
                }
            }
        } else if let Some((a, b)) = part.split_once('-') {
            if let (Ok(a), Ok(b)) = (a.parse::<usize>(), b.parse::<usize>()) {
                ids.extend(a..=b);
            }
        } else if let Ok(id) = part.parse::<usize>() {
            ids.push(id);
        }
    }
    ids
}

/// Task counts for one tracked job.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JobSummary {
    pub pending: usize,
    pub running: usize,
    pub unknown: usize,
}

impl JobSummary {
    pub fn active(&self) -> usize {
        self.pending + self.running
    }

    pub fn is_done(&self) -> bool {
        self.active() == 0
    }
}

impl fmt::Display for JobSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_done() && self.unknown == 0 {
            return write!(f, "done");
        }
        write!(f, "{} running, {} pending", self.running, self.pending)?;
        if self.unknown > 0 {
            write!(f, ", {} unknown", self.unknown)?;
        }
        Ok(())
    }
}

/// Summarise `rows` for each tracked job. A tracked job missing from the
/// listing comes back empty, which reads as done.
pub fn summarize(rows: &[StatusRow], tracked: &[JobId]) -> BTreeMap<JobId, JobSummary> {
    let mut summaries: BTreeMap<JobId, JobSummary> = tracked
        .iter()
        .map(|id| (id.clone(), JobSummary::default()))
        .collect();

    for row in rows {
        let Some(summary) = summaries
            .iter_mut()
            .find(|(id, _)| id.as_str() == row.job_id)
            .map(|(_, s)| s)
        else {
            continue;
        };
        let count = row.tasks.len().max(1);
        match row.state {
            TaskState::Pending => summary.pending += count,
            TaskState::Running => summary.running += count,
            TaskState::Unknown | TaskState::Done => summary.unknown += count,
        }
    }
    summaries
}

/// Advance each tracked task from the listing. A task that is no longer
/// listed has finished; a row without a task column covers every task of
/// its job. Backward moves (a stale row after `Done`) are refused.
pub fn apply_status(rows: &[StatusRow], tasks: &mut [JobTask]) {
    for task in tasks.iter_mut() {
        let next = rows
            .iter()
            .find(|row| {
                row.job_id == task.job_id.as_str()
                    && (row.tasks.is_empty() || row.tasks.contains(&task.task_id))
            })
            .map_or(TaskState::Done, |row| row.state);
        if !task.advance(next) {
            tracing::debug!(
                "Ignoring {} -> {} for task {}.{}",
                task.state,
                next,
                task.job_id,
                task.task_id
            );
        }
    }
}

/// Distinct jobs that still have a pending or running task.
pub fn active_jobs(tasks: &[JobTask]) -> Vec<JobId> {
    let mut ids: Vec<JobId> = tasks
        .iter()
        .filter(|t| t.state.is_active())
        .map(|t| t.job_id.clone())
        .collect();
    ids.sort();
    ids.dedup();
    ids
}

/// One-line status for logging, e.g. `4817300: 1 running, 13 pending`.
pub fn status_line(summaries: &BTreeMap<JobId, JobSummary>) -> String {
    summaries
        .iter()
        .map(|(id, s)| format!("{}: {}", id, s))
        .collect::<Vec<_>>()
        .join("; ")
}
