use camino::Utf8PathBuf;
use thiserror::Error;

use crate::compiler::Diagnostic;

pub type Result<T, E = MutatorError> = std::result::Result<T, E>;

/// Unit-wide failures. Anything that only concerns a single mutant is
/// recorded as a `MutantStatus` instead and never surfaces here.
#[derive(Debug, Error)]
pub enum MutatorError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse {path}")]
    Parse { path: Utf8PathBuf },

    #[error("malformed JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// The build cannot be repaired by excluding mutants.
    #[error("build failed: {reason}")]
    FatalBuild {
        reason: String,
        diagnostics: Vec<Diagnostic>,
    },

    #[error("test executor unavailable: {0}")]
    ExecutorUnavailable(String),

    #[error("tests fail before mutation:\n{0}")]
    BaselineFailed(String),

    #[error("no tests were discovered")]
    NoTests,

    #[error("invalid options: {0}")]
    InvalidOptions(String),
}

impl MutatorError {
    pub fn fatal_build(reason: impl Into<String>, diagnostics: Vec<Diagnostic>) -> Self {
        MutatorError::FatalBuild {
            reason: reason.into(),
            diagnostics,
        }
    }
}
