//! Subprocess seam.
//!
//! Everything the engine spawns (virtualenv creation, pip, lock compiling,
//! user commands) goes through [`ProcessRunner`] so tests can substitute a
//! recording fake and assert on the exact command sequence. The production
//! implementation runs shell strings through `$SHELL -c` with a scrubbed
//! environment, which is how venv activation strings are executed.

use std::collections::HashMap;
use std::process::{Command, Stdio};

use crate::error::{Error, Result};

/// Completed process: exit code plus captured stdout (empty when stdout was
/// inherited).
#[derive(Debug, Clone, Default)]
pub struct CmdOutput {
    pub code: i32,
    pub stdout: String,
}

pub trait ProcessRunner {
    /// Run a shell command with exactly `env` as the environment. Returns
    /// `Err(Error::CommandFailure)` on a non-zero exit, carrying the
    /// captured output.
    fn run(&self, cmd: &str, env: &HashMap<String, String>, capture: bool) -> Result<CmdOutput>;
}

/// `$SHELL -c` backed runner (falls back to `/bin/bash`).
#[derive(Debug, Clone)]
pub struct ShellRunner {
    shell: String,
}

impl ShellRunner {
    pub fn from_env() -> Self {
        Self {
            shell: std::env::var("SHELL").unwrap_or_else(|_| "/bin/bash".to_string()),
        }
    }
}

impl ProcessRunner for ShellRunner {
    fn run(&self, cmd: &str, env: &HashMap<String, String>, capture: bool) -> Result<CmdOutput> {
        tracing::debug!(cmd, "running command");

        let mut command = Command::new(&self.shell);
        command.arg("-c").arg(cmd).env_clear().envs(env);

        let (code, stdout) = if capture {
            command.stdout(Stdio::piped()).stderr(Stdio::piped());
            let output = command.output()?;
            // virtualenv and pip report their failures on stderr; fold it
            // into the captured output so error payloads carry it.
            let mut captured = String::from_utf8_lossy(&output.stdout).into_owned();
            captured.push_str(&String::from_utf8_lossy(&output.stderr));
            (output.status.code().unwrap_or(1), captured)
        } else {
            let status = command.status()?;
            (status.code().unwrap_or(1), String::new())
        };

        tracing::debug!(code, "command finished");
        if code != 0 {
            return Err(Error::CommandFailure {
                code,
                output: stdout,
            });
        }
        Ok(CmdOutput { code, stdout })
    }
}

/// Platform separator for `PATH`-like variables.
pub const PATH_LIST_SEP: &str = if cfg!(windows) { ";" } else { ":" };

/// Join path-like components with the platform path separator, skipping
/// nothing: empty strings are kept (a leading empty entry on `PYTHONPATH`
/// means "current directory" to the interpreter).
pub fn join_paths<I, S>(paths: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    paths
        .into_iter()
        .map(|p| p.as_ref().to_string())
        .collect::<Vec<_>>()
        .join(PATH_LIST_SEP)
}

/// POSIX single-quote a string for interpolation into a shell command.
pub fn shell_quote(s: &str) -> String {
    if !s.is_empty() && s.chars().all(|c| c.is_ascii_alphanumeric() || "-_=./:".contains(c)) {
        return s.to_string();
    }
    format!("'{}'", s.replace('\'', r"'\''"))
}

/// Quote and join extra CLI arguments for `{cmdargs}` substitution.
pub fn quote_args(args: &[String]) -> String {
    args.iter()
        .map(|a| shell_quote(a))
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_paths_keeps_empty_entries() {
        assert_eq!(join_paths(["", "/a", "/b"]), ":/a:/b");
        assert_eq!(join_paths(Vec::<String>::new()), "");
    }

    #[test]
    fn test_shell_quote() {
        assert_eq!(shell_quote("plain-arg_1.0"), "plain-arg_1.0");
        assert_eq!(shell_quote("has space"), "'has space'");
        assert_eq!(shell_quote("it's"), r"'it'\''s'");
        assert_eq!(shell_quote(""), "''");
    }

    #[test]
    fn test_quote_args() {
        let args = vec!["-k".to_string(), "test one".to_string()];
        assert_eq!(quote_args(&args), "-k 'test one'");
    }

    #[test]
    fn test_capture_folds_stderr_into_failure_output() {
        let runner = ShellRunner::from_env();
        let err = runner
            .run(
                "echo 'creation exploded' >&2; exit 3",
                &std::collections::HashMap::new(),
                true,
            )
            .unwrap_err();
        match err {
            crate::Error::CommandFailure { code, output } => {
                assert_eq!(code, 3);
                assert!(output.contains("creation exploded"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
