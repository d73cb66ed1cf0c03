//! Error types for the command-line front end.

use std::path::PathBuf;
use truthloop_core::TruthloopError;

#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error("{0}\n\n{usage}", usage = crate::args::USAGE)]
    Usage(String),

    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid dataset: {0}")]
    Dataset(String),

    #[error("Failed to render output: {0}")]
    Output(#[from] serde_json::Error),

    #[error(transparent)]
    Truthloop(#[from] TruthloopError),
}

impl CliError {
    pub fn usage(message: impl Into<String>) -> Self {
        CliError::Usage(message.into())
    }
}

pub type CliResult<T> = Result<T, CliError>;
