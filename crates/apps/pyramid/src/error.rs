use std::fmt;
use std::path::PathBuf;

use runtime::PipelineError;

/// Errors that end the process before a run report can be produced.
#[derive(Debug)]
pub enum CliError {
    Config(String),
    Connection(String),
    Pipeline(PipelineError),
    Report { path: PathBuf, error: String },
}

impl CliError {
    pub fn exit_code(&self) -> u8 {
        match self {
            CliError::Config(_) => 2,
            CliError::Connection(_) | CliError::Pipeline(_) | CliError::Report { .. } => 1,
        }
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CliError::Config(msg) => write!(f, "invalid configuration: {msg}"),
            CliError::Connection(msg) => write!(f, "database unreachable: {msg}"),
            CliError::Pipeline(err) => write!(f, "{err}"),
            CliError::Report { path, error } => {
                write!(f, "failed to write {}: {error}", path.display())
            }
        }
    }
}

impl std::error::Error for CliError {}

impl From<PipelineError> for CliError {
    fn from(err: PipelineError) -> Self {
        CliError::Pipeline(err)
    }
}
