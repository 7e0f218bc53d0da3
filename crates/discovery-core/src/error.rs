//! Error types for Discovery contextualization flows.

use thiserror::Error;

/// Result type alias using Discovery's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for job, file, and relationship operations.
///
/// The `Display` text of every variant is suitable for showing to the
/// operator as-is.
#[derive(Error, Debug)]
pub enum Error {
    /// The remote service refused to start a job
    #[error("Job submission failed: {0}")]
    Submission(String),

    /// A status check failed or returned a non-success status
    #[error("Job status check failed: {0}")]
    Poll(String),

    /// The remote job itself reported `Failed`
    #[error("Job {job_id} failed: {message}")]
    JobFailed { job_id: String, message: String },

    /// Download, upload, or linking failed after the job completed
    #[error("Post-processing failed: {0}")]
    PostProcessing(String),

    /// The job did not reach a terminal state in time
    #[error("Job {job_id} did not finish within {waited_secs}s")]
    Timeout { job_id: String, waited_secs: u64 },

    /// The flow was cancelled by its initiator
    #[error("Operation cancelled")]
    Cancelled,

    /// The platform answered with a non-success HTTP status
    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },

    /// HTTP/network request failed before a response arrived
    #[error("Request error: {0}")]
    Request(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// File I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// HTTP status carried by this error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            Error::Http { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// True when the platform rejected a create because the external id exists.
    pub fn is_conflict(&self) -> bool {
        self.status() == Some(409)
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::Request(e.to_string())
    }
}
