//! Error types for cibridge-gateway

use thiserror::Error;

/// Errors that can occur while talking to the CI server
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GatewayError {
    /// Referenced job, build, queue item or artifact does not exist
    #[error("not found: {0}")]
    NotFound(String),

    /// Network failure, timeout or server-side error; safe to retry
    #[error("transient failure: {0}")]
    Transient(String),

    /// Server refused the request (auth, validation, permissions)
    #[error("request rejected with HTTP {status}: {message}")]
    Rejected { status: u16, message: String },

    /// Response body did not have the expected shape
    #[error("malformed response: {0}")]
    Decode(String),

    /// Gateway is not configured correctly
    #[error("configuration error: {0}")]
    Config(String),
}

impl GatewayError {
    /// Whether retrying the same call may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, GatewayError::Transient(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, GatewayError::NotFound(_))
    }
}

impl From<reqwest::Error> for GatewayError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() || err.is_connect() || err.is_request() {
            return GatewayError::Transient(err.to_string());
        }
        if err.is_decode() {
            return GatewayError::Decode(err.to_string());
        }
        match err.status() {
            Some(status) if status.is_server_error() => GatewayError::Transient(err.to_string()),
            Some(status) => GatewayError::Rejected {
                status: status.as_u16(),
                message: err.to_string(),
            },
            None => GatewayError::Transient(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for GatewayError {
    fn from(err: serde_json::Error) -> Self {
        GatewayError::Decode(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(GatewayError::Transient("timed out".to_string()).is_transient());
        assert!(!GatewayError::NotFound("job x".to_string()).is_transient());
        assert!(!GatewayError::Rejected {
            status: 403,
            message: "forbidden".to_string()
        }
        .is_transient());
    }

    #[test]
    fn test_rejected_display_includes_status() {
        let err = GatewayError::Rejected {
            status: 401,
            message: "bad credentials".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("401"));
        assert!(msg.contains("bad credentials"));
    }
}
