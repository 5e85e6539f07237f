// src/error.rs
//! Typed failures at the pipeline seams. Startup and I/O paths use `anyhow`.

use thiserror::Error;

/// Content extraction failure. Every variant is retryable.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("timed out after {0}s")]
    Timeout(u64),

    /// Connect or client-side timeout raised by the HTTP client itself.
    #[error("request timed out")]
    RequestTimeout,

    #[error("extraction service returned status {0}")]
    Status(u16),

    #[error("network error: {0}")]
    Network(String),

    #[error("extraction service returned empty content")]
    Empty,
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            FetchError::RequestTimeout
        } else if let Some(status) = err.status() {
            FetchError::Status(status.as_u16())
        } else {
            FetchError::Network(err.to_string())
        }
    }
}

/// Inference call failure (transport level, not content level).
#[derive(Debug, Error)]
pub enum InferenceError {
    #[error("inference timed out after {0}s")]
    Timeout(u64),

    #[error("inference request timed out")]
    RequestTimeout,

    #[error("inference backend returned status {status}: {message}")]
    Status { status: u16, message: String },

    #[error("inference backend rejected credentials")]
    Unauthorized,

    #[error("network error: {0}")]
    Network(String),

    #[error("could not decode backend response: {0}")]
    Decode(String),
}

impl InferenceError {
    /// Transient transport failures only: timeouts, connection errors,
    /// 429 and 5xx. Other 4xx, bad credentials and undecodable bodies repeat
    /// identically on retry.
    pub fn is_retryable(&self) -> bool {
        match self {
            InferenceError::Timeout(_) | InferenceError::RequestTimeout | InferenceError::Network(_) => true,
            InferenceError::Status { status, .. } => *status == 429 || *status >= 500,
            InferenceError::Unauthorized | InferenceError::Decode(_) => false,
        }
    }
}

impl From<reqwest::Error> for InferenceError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            InferenceError::RequestTimeout
        } else if err.is_decode() {
            InferenceError::Decode(err.to_string())
        } else {
            InferenceError::Network(err.to_string())
        }
    }
}

/// Slow-pass output that does not conform to the signal schema.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("no JSON object found in model output")]
    NoJson,

    #[error("malformed JSON: {0}")]
    Malformed(String),

    #[error("missing field `{0}`")]
    MissingField(&'static str),

    #[error("field `{field}` has wrong type")]
    WrongType { field: &'static str },

    #[error("field `{field}` = {value} outside {min}..={max}")]
    OutOfRange {
        field: &'static str,
        value: i64,
        min: i64,
        max: i64,
    },

    #[error("invalid time_horizon `{0}`")]
    InvalidHorizon(String),
}

/// Why the engine gave up on one article.
#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error(transparent)]
    Inference(#[from] InferenceError),

    #[error(transparent)]
    Validation(#[from] ValidationError),
}
