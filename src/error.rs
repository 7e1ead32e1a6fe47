//! Error types for the fix pipeline.

use std::path::PathBuf;
use thiserror::Error;

/// Classification of a single failed repair attempt.
///
/// The retry loop decides between backoff and abort by matching on this
/// value rather than re-inspecting exception text at the call site.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Failure {
    /// Transient throttling; worth a backoff wait and another attempt.
    Recoverable(String),
    /// Anything else; the whole run aborts.
    Fatal(String),
}

impl Failure {
    pub fn reason(&self) -> &str {
        match self {
            Failure::Recoverable(reason) | Failure::Fatal(reason) => reason,
        }
    }
}

#[derive(Debug, Error)]
pub enum Error {
    /// No resolvable build configuration. Fatal before any file is processed.
    #[error("no build configuration found under {0}")]
    Config(PathBuf),

    /// A repair call failed in a non-recoverable way; the run was abandoned.
    #[error("repair failed for {file}: {reason}")]
    Repair { file: PathBuf, reason: String },

    /// Another run already holds the workspace lock.
    #[error("another run is already active for this workspace")]
    Locked,

    #[error("compiler invocation failed: {0}")]
    Compiler(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
