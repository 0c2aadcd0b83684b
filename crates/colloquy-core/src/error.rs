use thiserror::Error;

/// A convenience `Result` alias using [`ColloquyError`].
pub type ColloquyResult<T> = Result<T, ColloquyError>;

/// Top-level error type for the context engine.
///
/// Each variant corresponds to a failure class the engine distinguishes when
/// deciding whether a call may be retried.
#[derive(Error, Debug)]
pub enum ColloquyError {
    /// Invalid or missing configuration (e.g. no endpoint). Never retried.
    #[error("Config error: {0}")]
    Config(String),

    /// Session persistence or lookup failed.
    #[error("Session error: {0}")]
    Session(String),

    /// The AI summarization step of a compaction failed.
    #[error("Compaction error: {0}")]
    Compaction(String),

    /// The serialized request body exceeds the local size limit.
    #[error("Request too large: {size} bytes exceeds limit of {limit} bytes")]
    RequestTooLarge {
        /// Serialized body size in bytes.
        size: usize,
        /// Maximum accepted body size in bytes.
        limit: usize,
    },

    /// The endpoint answered with a non-2xx status.
    #[error("HTTP error {status}: {body}")]
    HttpStatus {
        /// HTTP status code.
        status: u16,
        /// Response body, as far as it could be read.
        body: String,
    },

    /// Network, timeout, or body-read failure.
    #[error("Transport error: {0}")]
    Transport(String),

    /// Every attempt of a request failed; `last` is the final attempt's error.
    #[error("All {attempts} attempts failed, last error: {last}")]
    AllAttemptsFailed {
        /// Number of attempts made.
        attempts: u32,
        /// Error raised by the last attempt.
        last: Box<ColloquyError>,
    },

    /// A JSON serialization or deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A standard I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ColloquyError {
    /// Whether another attempt of the same request may succeed.
    ///
    /// HTTP status errors are retried regardless of the status code.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::HttpStatus { .. } | Self::Transport(_))
    }
}
