//! Error types for storage operations.

use thiserror::Error;

/// Errors that can occur during upload operations.
///
/// Whether an error is worth retrying is decided by the backend's
/// [`should_reupload`](crate::Backend::should_reupload) predicate, not by
/// inspecting these variants; the engine only special-cases `Cancelled`.
#[derive(Error, Debug, Clone)]
pub enum StorageError {
    /// Transport-level failure talking to the service.
    #[error("network error: {message}")]
    Network { message: String, retryable: bool },

    /// The service rejected a request.
    #[error("service error {status} ({code}): {message}")]
    Service {
        status: u16,
        code: String,
        message: String,
    },

    /// Local I/O error while buffering chunk data.
    #[error("I/O error for {path}: {message}")]
    Io { path: String, message: String },

    /// Operation cancelled, either by the caller or because another failure
    /// already poisoned the writer.
    #[error("operation cancelled")]
    Cancelled,

    /// A resumed upload found a part on the server whose checksum does not
    /// match the locally recomputed stream.
    #[error("resumed upload part {part} does not match local data")]
    ResumeMismatch { part: u32 },

    /// The requested operation is not supported by this buffer or writer.
    #[error("unsupported operation: {message}")]
    Unsupported { message: String },

    /// Invalid configuration.
    #[error("invalid configuration: {message}")]
    InvalidConfig { message: String },

    /// Other error.
    #[error("{message}")]
    Other { message: String },
}

impl From<std::io::Error> for StorageError {
    fn from(err: std::io::Error) -> Self {
        StorageError::Io {
            path: String::new(),
            message: err.to_string(),
        }
    }
}

impl StorageError {
    /// Wrap an I/O error with the path it occurred on.
    pub(crate) fn io(path: impl Into<String>, err: std::io::Error) -> Self {
        StorageError::Io {
            path: path.into(),
            message: err.to_string(),
        }
    }
}
