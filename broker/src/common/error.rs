use std::io;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

/// Errors that can occur while acquiring or using tenant credentials.
///
/// Every variant is `Clone` so a single refresh can hand the same failure to
/// all callers waiting on it. Messages never carry the web identity token or
/// credential secrets.
#[derive(Error, Debug, Clone)]
pub enum BrokerError {
    #[error("web identity token at {path} is empty")]
    EmptyToken { path: String },

    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: Arc<io::Error>,
    },

    #[error("failed to load certificates from {origin}: {message}")]
    CertificateLoad { origin: String, message: String },

    #[error("transport error for {endpoint}: {message}")]
    Transport {
        endpoint: String,
        status: Option<u16>,
        attempts: u32,
        retryable: bool,
        message: String,
    },

    #[error("identity rejected by {endpoint} (status {status}, code {code}): {message}")]
    Signature {
        endpoint: String,
        status: u16,
        code: String,
        message: String,
        request_id: Option<String>,
    },

    #[error("request rejected by {endpoint} (status {status}, code {code}): {message}")]
    Rejected {
        endpoint: String,
        status: u16,
        code: String,
        message: String,
        request_id: Option<String>,
    },

    #[error("malformed response from {endpoint}: {message}")]
    MalformedResponse { endpoint: String, message: String },

    #[error("{operation} was cancelled")]
    Cancelled { operation: String },

    #[error("invalid configuration: {}", .problems.join("; "))]
    Config { problems: Vec<String> },

    #[error("invalid request: {message}")]
    InvalidRequest { message: String },
}

impl BrokerError {
    pub fn empty_token(path: &Path) -> Self {
        Self::EmptyToken {
            path: path.display().to_string(),
        }
    }

    pub fn io(path: &Path, source: io::Error) -> Self {
        Self::Io {
            path: path.display().to_string(),
            source: Arc::new(source),
        }
    }

    pub fn certificate_load(origin: impl Into<String>, message: impl Into<String>) -> Self {
        Self::CertificateLoad {
            origin: origin.into(),
            message: message.into(),
        }
    }

    /// A transport failure where no HTTP response was received.
    pub fn transport(endpoint: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Transport {
            endpoint: endpoint.into(),
            status: None,
            attempts: 1,
            retryable: false,
            message: message.into(),
        }
    }

    /// A connection-level failure that the retry layer may attempt again.
    pub fn connection(endpoint: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Transport {
            endpoint: endpoint.into(),
            status: None,
            attempts: 1,
            retryable: true,
            message: message.into(),
        }
    }

    pub fn malformed_response(endpoint: impl Into<String>, message: impl Into<String>) -> Self {
        Self::MalformedResponse {
            endpoint: endpoint.into(),
            message: message.into(),
        }
    }

    pub fn cancelled(operation: impl Into<String>) -> Self {
        Self::Cancelled {
            operation: operation.into(),
        }
    }

    pub fn config(problems: Vec<String>) -> Self {
        Self::Config { problems }
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest {
            message: message.into(),
        }
    }

    /// Whether the retry layer is allowed to send the request again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport { retryable: true, .. })
    }

    /// Records how many attempts were spent before this error surfaced.
    pub fn with_attempts(self, count: u32) -> Self {
        match self {
            Self::Transport {
                endpoint,
                status,
                retryable,
                message,
                ..
            } => Self::Transport {
                endpoint,
                status,
                attempts: count,
                retryable,
                message,
            },
            other => other,
        }
    }

    /// Marks a transport failure as final, e.g. once the retry budget is spent.
    pub fn into_final(self) -> Self {
        match self {
            Self::Transport {
                endpoint,
                status,
                attempts,
                message,
                ..
            } => Self::Transport {
                endpoint,
                status,
                attempts,
                retryable: false,
                message,
            },
            other => other,
        }
    }

    /// HTTP status associated with the failure, when the server answered.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Transport { status, .. } => *status,
            Self::Signature { status, .. } | Self::Rejected { status, .. } => Some(*status),
            _ => None,
        }
    }
}

pub type BrokerResult<T> = Result<T, BrokerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error_lists_every_problem() {
        let err = BrokerError::config(vec![
            "sts_endpoint is required".to_string(),
            "tenant_namespace is required".to_string(),
        ]);
        let rendered = err.to_string();
        assert!(rendered.contains("sts_endpoint is required"));
        assert!(rendered.contains("tenant_namespace is required"));
    }

    #[test]
    fn test_with_attempts_only_touches_transport() {
        let err = BrokerError::connection("http://sts", "connection reset").with_attempts(5);
        match err {
            BrokerError::Transport { attempts, .. } => assert_eq!(attempts, 5),
            other => panic!("unexpected error: {other:?}"),
        }

        let err = BrokerError::cancelled("exchange").with_attempts(5);
        assert!(matches!(err, BrokerError::Cancelled { .. }));
    }

    #[test]
    fn test_only_connection_errors_are_retryable() {
        assert!(BrokerError::connection("http://sts", "reset").is_retryable());
        assert!(!BrokerError::transport("http://sts", "timed out").is_retryable());
        assert!(!BrokerError::malformed_response("http://sts", "missing field").is_retryable());
    }
}
