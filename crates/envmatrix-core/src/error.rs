//! Error taxonomy for the engine.
//!
//! Per-instance failures (`VenvCreation`, `Installation`, `CommandFailure`)
//! are caught at the run loop and recorded as failed results; `ConfigLoad`
//! is always fatal at startup. `InterpreterNotFound` is deferred until an
//! instance actually needs the interpreter.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// No interpreter could be resolved for a hint. Raised lazily, when the
    /// interpreter is first required, not at spec load time.
    #[error("no Python interpreter found for hint '{hint}'")]
    InterpreterNotFound { hint: String },

    /// The environment creation tool exited non-zero.
    #[error("failed to create virtualenv '{}'\n{output}", path.display())]
    VenvCreation { path: PathBuf, output: String },

    /// The package installer or lock compiler exited non-zero.
    #[error("failed to install dependencies {pkgs}\n{output}")]
    Installation { pkgs: String, output: String },

    /// The user command exited non-zero. Carries the captured stdout.
    #[error("command failed with exit code {code}")]
    CommandFailure { code: i32, output: String },

    /// An instance identifier matched nothing, or matched more than one
    /// instance.
    #[error("no venv instance matches '{ident}'")]
    InstanceNotFound { ident: String },

    /// Malformed spec file. Fatal at startup.
    #[error("failed to load spec file '{}': {reason}", path.display())]
    ConfigLoad { path: PathBuf, reason: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
