//! Bash launch scripts for array tasks.
//!
//! Each task script sets `myjob`/`mytask` from the scheduler environment,
//! optionally acquires one slot of a host-local lock pool, patches its
//! chunk config with the slot index, runs the processing program and
//! appends a line to the run's error file when the program fails.

use std::fmt::Write as _;
use std::fs;
use std::path::Path;

use crate::config::SchedulerSettings;
use crate::planning::RESOURCE_KEY;

use super::types::{SchedulerError, SchedulerResult};

/// Host-local pool of exclusive `flock` slots.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockPool {
    pub dir: String,
    pub slots: u32,
    pub attempts: u32,
    pub wait_secs: u32,
    pub backoff_secs: u32,
}

impl LockPool {
    pub fn from_settings(settings: &SchedulerSettings) -> Self {
        let dir = if settings.lock_dir.is_empty() {
            format!("/tmp/tomo-{}-$USER/lock", settings.project)
        } else {
            settings.lock_dir.clone()
        };
        Self {
            dir,
            slots: settings.lock_slots.max(1),
            attempts: settings.lock_attempts.max(1),
            wait_secs: settings.lock_wait_secs,
            backoff_secs: settings.lock_backoff_secs,
        }
    }
}

/// Incremental builder for a task script.
#[derive(Debug, Clone)]
pub struct ScriptBuilder {
    body: String,
}

impl ScriptBuilder {
    /// Shebang, tracing and the task identity variables.
    pub fn new(description: &str) -> Self {
        let mut body = String::new();
        body.push_str("#!/bin/bash\n");
        let _ = writeln!(body, "# {}", description);
        body.push_str("set -x\n");
        body.push_str("myjob=$JOB_ID\n");
        body.push_str("mytask=$SGE_TASK_ID\n");
        body.push_str("mynum=`printf \"%03d\" $mytask`\n");
        Self { body }
    }

    /// Assign a shell variable. The value is written verbatim.
    pub fn var(mut self, name: &str, value: &str) -> Self {
        let _ = writeln!(self.body, "{}={}", name, value);
        self
    }

    /// Assign a shell variable to a quoted path.
    pub fn path_var(self, name: &str, path: &Path) -> Self {
        let quoted = quote(&path.to_string_lossy());
        self.var(name, &quoted)
    }

    /// Create a directory if missing.
    pub fn ensure_dir(mut self, var: &str) -> Self {
        let _ = writeln!(self.body, "mkdir -p \"${}\"", var);
        self
    }

    /// Read this task's `start`/`end` rows from its manifest line.
    pub fn chunk_range(mut self, manifest_var: &str) -> Self {
        let _ = writeln!(
            self.body,
            "read -r _ _ _ _ _ start _ end _ _ <<< \"$(sed -n \"${{mytask}}p\" \"${}\")\"",
            manifest_var
        );
        self.body.push_str("if [[ -z \"$start\" || -z \"$end\" ]]\nthen\n");
        let _ = writeln!(
            self.body,
            "  echo \"No chunk entry for task $mytask in ${}\"",
            manifest_var
        );
        self.body.push_str("  exit 1\nfi\n");
        self
    }

    /// Acquire one slot of `pool` into `$myslot`, or exit non-zero.
    pub fn lock_pool(mut self, pool: &LockPool) -> Self {
        let slots = (0..pool.slots)
            .map(|s| s.to_string())
            .collect::<Vec<_>>()
            .join(" ");
        let _ = write!(
            self.body,
            r#"mylockdir="{dir}"
mkdir -p "$mylockdir"
myslot=-1
tries=0
while [[ $myslot -lt 0 ]]
do
  for slot in {slots}
  do
    mylockf="$mylockdir/slot$slot"
    exec 8>>"$mylockf"
    if flock -w {wait} -x 8
    then
      myslot=$slot
      echo "host $HOSTNAME date `date` job $myjob task $mytask" >> "$mylockf"
      break
    fi
  done
  if [[ $myslot -lt 0 ]]
  then
    tries=$((tries + 1))
    if [[ $tries -ge {attempts} ]]
    then
      echo "Could not acquire a device lock in $mylockdir after $tries attempts" >&2
      exit 75
    fi
    sleep {backoff}
  fi
done
echo "using slot $myslot"
"#,
            dir = pool.dir,
            slots = slots,
            wait = pool.wait_secs,
            attempts = pool.attempts,
            backoff = pool.backoff_secs,
        );
        self
    }

    /// Record the acquired slot in the config named by `config_var`.
    pub fn patch_resource(mut self, config_var: &str) -> Self {
        let _ = writeln!(
            self.body,
            "sed -i \"s/^{key}[[:space:]]*=.*/{key} = $myslot/\" \"${var}\"",
            key = RESOURCE_KEY,
            var = config_var
        );
        self
    }

    /// Run a command line (written verbatim) and keep its exit status.
    pub fn run(mut self, command: &str) -> Self {
        self.body.push_str(command);
        self.body.push('\n');
        self.body.push_str("retval=$?\n");
        self
    }

    /// Append a failure line to `error_file` when `$retval` is non-zero,
    /// then exit with it.
    pub fn record_failure(mut self, error_file: &Path) -> Self {
        let _ = write!(
            self.body,
            "if [[ $retval -ne 0 ]]\nthen\n  echo \"job $myjob task $mytask return-value $retval\" >> {}\nfi\nexit $retval\n",
            quote(&error_file.to_string_lossy())
        );
        self
    }

    pub fn build(self) -> String {
        self.body
    }
}

/// Script for the job held on a chunk job: reports the error file, mailing
/// it when a recipient is configured.
pub fn finish_script(job_name: &str, error_file: &Path, notify: Option<&str>) -> String {
    let mut body = String::new();
    body.push_str("#!/bin/bash\n");
    let _ = writeln!(body, "# completion check for {}", job_name);
    body.push_str("set -x\n");
    let _ = writeln!(body, "errfile={}", quote(&error_file.to_string_lossy()));
    body.push_str("if [[ -e \"$errfile\" ]]\nthen\n");
    let _ = writeln!(body, "  echo \"Tasks of {} failed:\"", job_name);
    body.push_str("  cat \"$errfile\"\n");
    if let Some(address) = notify {
        let _ = writeln!(
            body,
            "  mail -s \"{} finished with errors\" {} < \"$errfile\"",
            job_name,
            quote(address)
        );
    }
    body.push_str("  exit 1\nfi\n");
    let _ = writeln!(body, "echo \"All tasks of {} succeeded\"", job_name);
    body
}

/// Write a script and mark it executable.
pub fn write_script(path: &Path, content: &str) -> SchedulerResult<()> {
    fs::write(path, content).map_err(|source| SchedulerError::Io {
        operation: "write script",
        path: path.to_path_buf(),
        source,
    })?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(0o755)).map_err(|source| {
            SchedulerError::Io {
                operation: "chmod script",
                path: path.to_path_buf(),
                source,
            }
        })?;
    }

    Ok(())
}

/// Single-quote for bash.
pub fn quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}
