use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("URL parsing error: {0}")]
    UrlParse(#[from] url::ParseError),

    #[error("Serde JSON error: {0}")]
    SerdeJson(#[from] serde_json::Error),

    #[error("Source directory unreadable: {0}")]
    SourceUnreadable(PathBuf),

    #[error("Destination not writable: {path}: {source}")]
    DestinationUnwritable {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Archive is corrupt or not a recognized container: {0}")]
    ArchiveCorrupt(PathBuf),

    #[error("Archive not found: {0}")]
    ArchiveNotFound(String),

    #[error("Database unavailable: {0}")]
    DatabaseUnavailable(String),

    #[error("Restore partially completed (finished: {completed:?}): {failed}")]
    PartialRestore {
        completed: Vec<&'static str>,
        failed: String,
    },

    #[error("Upload to {provider} failed: {message}")]
    UploadFailed { provider: String, message: String },

    #[error("Configuration fixup skipped: {0}")]
    ConfigFixupSkipped(String),

    #[error("Another operation holds the lock: {0}")]
    Locked(PathBuf),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, AppError>;
