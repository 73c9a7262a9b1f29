//! Error taxonomy for the callable endpoints.
//!
//! Every failure a caller can observe falls into one of four categories.
//! Upstream failures (non-2xx from Keepa, or an `error` object embedded in a
//! 200 response) are a single category distinguished only by their message.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ScoutError {
    #[error("{0}")]
    Unauthenticated(String),

    #[error("{0}")]
    InvalidArgument(String),

    #[error("{0}")]
    UpstreamPrecondition(String),

    #[error("{0}")]
    Internal(String),
}

impl ScoutError {
    /// Wire code used in error response bodies.
    pub fn code(&self) -> &'static str {
        match self {
            ScoutError::Unauthenticated(_) => "unauthenticated",
            ScoutError::InvalidArgument(_) => "invalid-argument",
            ScoutError::UpstreamPrecondition(_) => "failed-precondition",
            ScoutError::Internal(_) => "internal",
        }
    }

    pub fn message(&self) -> &str {
        match self {
            ScoutError::Unauthenticated(m)
            | ScoutError::InvalidArgument(m)
            | ScoutError::UpstreamPrecondition(m)
            | ScoutError::Internal(m) => m,
        }
    }
}

impl From<sqlx::Error> for ScoutError {
    fn from(e: sqlx::Error) -> Self {
        ScoutError::Internal(format!("store error: {}", e))
    }
}

impl From<serde_json::Error> for ScoutError {
    fn from(e: serde_json::Error) -> Self {
        ScoutError::Internal(format!("serialization error: {}", e))
    }
}

pub type Result<T> = std::result::Result<T, ScoutError>;
