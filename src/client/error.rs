use std::time::Duration;
use thiserror::Error;

use crate::features::quota::dtos::QuotaExceededDto;

/// Failures seen by the upload client
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("network error: {0}")]
    Network(String),

    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("server responded {status}: {message}")]
    Status { status: u16, message: String },

    #[error("storage quota exceeded: {0}")]
    QuotaExceeded(QuotaExceededDto),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("transfer queue is closed")]
    QueueClosed,
}

impl ClientError {
    /// Transient failures worth retrying with backoff
    pub fn is_retryable(&self) -> bool {
        match self {
            ClientError::Network(_) | ClientError::Timeout(_) => true,
            ClientError::Status { status, .. } => {
                matches!(*status, 408 | 429) || (*status >= 500 && *status != 507)
            }
            _ => false,
        }
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(e: reqwest::Error) -> Self {
        ClientError::Network(e.to_string())
    }
}
