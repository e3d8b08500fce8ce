use thiserror::Error;

use crate::state::TaskId;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Fetch failed for {url}: {message}")]
    Fetch { url: String, message: String },

    #[error("HTTP {status} from {url}")]
    HttpStatus { url: String, status: u16 },

    #[error("Download of {target} was rejected: {reason}")]
    DownloadRejected { target: String, reason: String },

    #[error("Archive error: {0}")]
    Archive(#[from] ArchiveError),

    #[error("Task {task} advanced past its {total} images")]
    TaskOverrun { task: TaskId, total: usize },

    #[error("Task {0} is not registered")]
    UnknownTask(TaskId),

    #[error("Invalid message: {0}")]
    InvalidMessage(String),
}

impl Error {
    pub fn fetch<S: Into<String>, M: ToString>(url: S, message: M) -> Self {
        Error::Fetch {
            url: url.into(),
            message: message.to_string(),
        }
    }

    pub fn rejected<S: Into<String>, R: ToString>(target: S, reason: R) -> Self {
        Error::DownloadRejected {
            target: target.into(),
            reason: reason.to_string(),
        }
    }
}

/// Failures that would leave a corrupt archive behind.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ArchiveError {
    #[error("more than 65535 entries")]
    TooManyEntries,

    #[error("entry name is longer than 65535 bytes: {name}")]
    NameTooLong { name: String },

    #[error("archive does not fit 32-bit ZIP offsets")]
    TooLarge,

    #[error("central directory expected at offset {expected}, found {actual}")]
    OffsetMismatch { expected: u64, actual: u64 },
}
