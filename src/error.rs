use std::fmt;

use reqwest::StatusCode;
use serde::{Deserialize, Serialize};

use crate::{storage::StoreError, ResponseBody};

/// Coarse classification of a failed attempt.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorKind {
    /// The attempt exceeded the request timeout.
    Timeout,
    /// DNS failure, refused connection, broken body stream.
    Network,
    /// The backend answered with a 5xx status.
    Server,
    Unknown,
}

impl ErrorKind {
    /// 5xx maps to `Server`; any other status is `Unknown`.
    pub fn from_status(status: StatusCode) -> Self {
        if status.is_server_error() {
            Self::Server
        } else {
            Self::Unknown
        }
    }

    /// Classifies a transport failure that never produced a status.
    pub fn from_transport(err: &reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else if err.is_connect() || err.is_request() || err.is_body() {
            Self::Network
        } else {
            Self::Unknown
        }
    }

    /// Transport kinds that are retried regardless of status.
    pub fn is_transient(self) -> bool {
        matches!(self, Self::Timeout | Self::Network)
    }

    /// Message suitable for a status banner.
    pub fn user_message(self) -> &'static str {
        match self {
            Self::Timeout => "The server took too long to respond. Please try again.",
            Self::Network => "Could not reach the server. Check your internet connection.",
            Self::Server => "The server is having problems. Please try again later.",
            Self::Unknown => "An unexpected error occurred. Please try again.",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Timeout => "timeout",
            Self::Network => "network",
            Self::Server => "server",
            Self::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

/// Error type returned by this crate.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Request could not complete: timeout, connection or body failure.
    #[error("{kind} error: {message}")]
    Transport {
        kind: ErrorKind,
        message: String,
        #[source]
        source: reqwest::Error,
    },
    /// Non-success HTTP status with the decoded response body.
    #[error("http error {status}: {message}")]
    Http {
        status: u16,
        kind: ErrorKind,
        message: String,
        body: ResponseBody,
    },
    /// 401/403: the stored session has been cleared.
    #[error("unauthorized ({status}): {message}")]
    Unauthorized {
        status: u16,
        message: String,
        body: ResponseBody,
    },
    /// Response body did not match the expected shape.
    #[error("decode error: {0}")]
    Decode(String),
    /// Session storage could not be read or written.
    #[error("storage error: {0}")]
    Storage(#[from] StoreError),
    #[error("invalid url: {0}")]
    InvalidUrl(String),
    /// The backend answered 2xx but refused the credentials.
    #[error("login rejected: {0}")]
    LoginRejected(String),
}

impl ApiError {
    /// Classification used for the connection state.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Transport { kind, .. } | Self::Http { kind, .. } => *kind,
            Self::Unauthorized { .. }
            | Self::Decode(_)
            | Self::Storage(_)
            | Self::InvalidUrl(_)
            | Self::LoginRejected(_) => ErrorKind::Unknown,
        }
    }

    /// HTTP status, if the backend answered.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Http { status, .. } | Self::Unauthorized { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Human-readable message, preferring the one the backend sent.
    pub fn message(&self) -> String {
        match self {
            Self::Transport { message, .. }
            | Self::Http { message, .. }
            | Self::Unauthorized { message, .. } => message.clone(),
            Self::LoginRejected(message) => message.clone(),
            other => other.to_string(),
        }
    }

    /// Raw response body, when the backend answered at all.
    pub fn body(&self) -> Option<&ResponseBody> {
        match self {
            Self::Http { body, .. } | Self::Unauthorized { body, .. } => Some(body),
            _ => None,
        }
    }

    /// True when the failure means the backend is unreachable or unhealthy,
    /// as opposed to rejecting this particular request.
    pub fn is_backend_unavailable(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::Timeout | ErrorKind::Network | ErrorKind::Server
        )
    }
}

#[cfg(test)]
mod tests {
    use reqwest::StatusCode;
    use serde_json::json;

    use super::{ApiError, ErrorKind};
    use crate::ResponseBody;

    #[test]
    fn classifies_statuses() {
        assert_eq!(
            ErrorKind::from_status(StatusCode::SERVICE_UNAVAILABLE),
            ErrorKind::Server
        );
        assert_eq!(
            ErrorKind::from_status(StatusCode::from_u16(599).expect("valid status")),
            ErrorKind::Server
        );
        assert_eq!(
            ErrorKind::from_status(StatusCode::NOT_FOUND),
            ErrorKind::Unknown
        );
        assert_eq!(
            ErrorKind::from_status(StatusCode::TOO_MANY_REQUESTS),
            ErrorKind::Unknown
        );
    }

    #[test]
    fn only_timeout_and_network_are_transient() {
        assert!(ErrorKind::Timeout.is_transient());
        assert!(ErrorKind::Network.is_transient());
        assert!(!ErrorKind::Server.is_transient());
        assert!(!ErrorKind::Unknown.is_transient());
    }

    #[test]
    fn kind_serializes_lowercase() {
        let encoded = serde_json::to_string(&ErrorKind::Network).expect("must encode");
        assert_eq!(encoded, "\"network\"");
    }

    #[test]
    fn http_error_exposes_typed_view() {
        let err = ApiError::Http {
            status: 502,
            kind: ErrorKind::Server,
            message: "bad gateway".to_owned(),
            body: ResponseBody::Json(json!({"message": "bad gateway"})),
        };
        assert_eq!(err.kind(), ErrorKind::Server);
        assert_eq!(err.status(), Some(502));
        assert_eq!(err.message(), "bad gateway");
        assert!(err.body().is_some());
        assert!(err.is_backend_unavailable());
    }

    #[test]
    fn validation_error_is_not_backend_unavailable() {
        let err = ApiError::Http {
            status: 422,
            kind: ErrorKind::Unknown,
            message: "amount must be positive".to_owned(),
            body: ResponseBody::Text(String::new()),
        };
        assert!(!err.is_backend_unavailable());
    }
}
