// src/ingest/error.rs
use thiserror::Error;

/// Failure of a single species fetch. No partial data accompanies it.
#[derive(Debug, Error)]
pub enum FetchError {
    /// The service answered with a non-success status.
    #[error("occurrence service returned {status} {reason}")]
    Status { status: u16, reason: String },

    #[error("occurrence service request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("occurrence page could not be decoded: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("invalid occurrence query: {0}")]
    InvalidQuery(String),

    #[error("fetch for '{scientific_name}' was cancelled")]
    Cancelled { scientific_name: String },
}

impl FetchError {
    /// HTTP-like status, when the failure came from a service response.
    pub fn status(&self) -> Option<u16> {
        match self {
            FetchError::Status { status, .. } => Some(*status),
            FetchError::Transport(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }

    /// Short reason text suitable for a user-facing message.
    pub fn reason(&self) -> String {
        match self {
            FetchError::Status { reason, .. } => reason.clone(),
            FetchError::Transport(e) if e.is_timeout() => "timed out".to_string(),
            FetchError::Transport(e) if e.is_decode() => "malformed response".to_string(),
            FetchError::Transport(_) => "connection failed".to_string(),
            FetchError::Decode(_) => "malformed response".to_string(),
            FetchError::InvalidQuery(msg) => msg.clone(),
            FetchError::Cancelled { .. } => "cancelled".to_string(),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, FetchError::Cancelled { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_error_exposes_code_and_reason() {
        let e = FetchError::Status {
            status: 503,
            reason: "Service Unavailable".into(),
        };
        assert_eq!(e.status(), Some(503));
        assert_eq!(e.reason(), "Service Unavailable");
        assert_eq!(e.to_string(), "occurrence service returned 503 Service Unavailable");
    }

    #[test]
    fn cancelled_has_no_status() {
        let e = FetchError::Cancelled {
            scientific_name: "Sus scrofa".into(),
        };
        assert!(e.is_cancelled());
        assert_eq!(e.status(), None);
    }
}
