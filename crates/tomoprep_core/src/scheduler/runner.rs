//! External process execution.

use std::process::Command;

use super::types::{CommandOutput, SchedulerError, SchedulerResult};

/// Runs scheduler commands. Swapped for a scripted fake in tests.
pub trait CommandRunner: Send + Sync {
    fn run(
        &self,
        program: &str,
        args: &[String],
        env: &[(String, String)],
    ) -> SchedulerResult<CommandOutput>;
}

/// Runs commands with [`std::process::Command`].
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    fn run(
        &self,
        program: &str,
        args: &[String],
        env: &[(String, String)],
    ) -> SchedulerResult<CommandOutput> {
        tracing::debug!("Running: {} {}", program, args.join(" "));

        let output = Command::new(program)
            .args(args)
            .envs(env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .output()
            .map_err(|source| SchedulerError::Spawn {
                program: program.to_string(),
                source,
            })?;

        Ok(CommandOutput {
            status: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}


#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[test]
    fn system_runner_captures_output_and_env() {
        let out = SystemRunner
            .run(
                "sh",
                &["-c".to_string(), "echo $TOMO_TEST_VAR; echo oops >&2; exit 3".to_string()],
                &[("TOMO_TEST_VAR".to_string(), "hello".to_string())],
            )
            .unwrap();
        assert_eq!(out.status, Some(3));
        assert_eq!(out.stdout.trim(), "hello");
        assert_eq!(out.stderr.trim(), "oops");
        assert!(!out.is_success());
    }

    #[test]
    fn missing_program_is_spawn_error() {
        let err = SystemRunner
            .run("definitely-not-a-real-binary-xyz", &[], &[])
            .unwrap_err();
        assert!(matches!(err, SchedulerError::Spawn { .. }));
    }
}
