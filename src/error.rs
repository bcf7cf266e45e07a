use crate::catalog::SettingsKind;
use std::{io, path::PathBuf};
use thiserror::Error;

/// Failure of one remote name lookup call.
#[derive(Debug, Clone, Error)]
pub enum LookupError {
    #[error("name lookup transport failed: {0}")]
    Transport(String),
    #[error("name lookup rejected the batch (HTTP {status})")]
    Rejected { status: u16 },
    #[error("name lookup server error (HTTP {status})")]
    Server { status: u16 },
    #[error("name lookup returned a malformed body: {0}")]
    Malformed(String),
}

impl LookupError {
    /// Transport problems and 5xx responses may succeed on a later attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, LookupError::Transport(_) | LookupError::Server { .. })
    }
}

#[derive(Debug, Error)]
pub enum CopyError {
    #[error("no {kind} settings file found for {identity}")]
    UnknownSource { identity: u64, kind: SettingsKind },
    #[error("copy request has no targets")]
    NoTargets,
}

/// Why a single (target, root) write failed. Kept cloneable so results can be shared.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{action} {path}: {message}")]
pub struct CopyFailure {
    pub action: &'static str,
    pub path: PathBuf,
    pub kind: io::ErrorKind,
    pub message: String,
}

impl CopyFailure {
    pub fn new(action: &'static str, path: PathBuf, err: &io::Error) -> Self {
        Self {
            action,
            path,
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

#[derive(Debug, Clone, Error)]
pub enum LoadError {
    #[error("no EVE settings folders were found (checked {probed} location(s))")]
    NoSettingsRoots { probed: usize },
    #[error("load worker stopped unexpectedly")]
    WorkerLost,
}

#[derive(Debug, Error)]
pub enum BackupError {
    #[error("profile folder does not exist: {0}")]
    MissingProfile(PathBuf),
    #[error("no files found to back up in {0}")]
    Empty(PathBuf),
    #[error("backup archive not found: {0}")]
    MissingArchive(PathBuf),
    #[error("backup archive is invalid or corrupted: {0}")]
    Corrupt(#[from] zip::result::ZipError),
    #[error("backup io failed: {context}: {source}")]
    Io {
        context: String,
        #[source]
        source: io::Error,
    },
}

impl BackupError {
    pub fn io(context: impl Into<String>, source: io::Error) -> Self {
        BackupError::Io {
            context: context.into(),
            source,
        }
    }
}

#[derive(Debug, Error)]
pub enum NoteError {
    #[error("note is {chars} characters long; the limit is {max}")]
    TooLong { chars: usize, max: usize },
    #[error("notes file could not be serialized: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("notes io failed: {context}: {source}")]
    Io {
        context: String,
        #[source]
        source: io::Error,
    },
}

impl NoteError {
    pub fn io(context: impl Into<String>, source: io::Error) -> Self {
        NoteError::Io {
            context: context.into(),
            source,
        }
    }
}
