use std::{fmt, time::Duration};

/// Why an in-flight request was aborted.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AbortReason {
    /// The per-client timeout elapsed before the request settled.
    Timeout(Duration),
    /// The caller's cancellation token fired first.
    Cancelled,
}

impl fmt::Display for AbortReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout(after) => write!(f, "request timed out after {}ms", after.as_millis()),
            Self::Cancelled => f.write_str("request cancelled by caller"),
        }
    }
}

/// Error type returned by this crate.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    /// Invalid client or request configuration. Never retried.
    #[error("configuration error: {0}")]
    Config(String),
    /// Non-success HTTP status other than 401.
    #[error("http error {status}: {message}")]
    Http {
        status: u16,
        /// Best-effort message extracted from the response body.
        message: String,
        /// Parsed JSON error body, when the server sent one.
        body: Option<serde_json::Value>,
    },
    /// HTTP 401; handed to the refresh coordinator before it can reach a caller.
    #[error("unauthorized: {message}")]
    Token {
        message: String,
        body: Option<serde_json::Value>,
    },
    /// Transport-level failure (DNS, refused connection, broken body stream).
    #[error("network error: {message}")]
    Network {
        message: String,
        #[source]
        source: Option<reqwest::Error>,
    },
    /// Request aborted by timeout or caller cancellation.
    #[error("request aborted: {0}")]
    Aborted(AbortReason),
    /// A success response whose body could not be decoded.
    #[error("decode error: {message}")]
    Decode { message: String },
    /// Authentication cannot be recovered; the session hook has been notified.
    #[error("session invalid: {reason}")]
    SessionInvalid { reason: String },
}

impl FetchError {
    pub(crate) fn network(err: reqwest::Error) -> Self {
        Self::Network {
            message: err.to_string(),
            source: Some(err),
        }
    }

    pub(crate) fn session_invalid(reason: impl Into<String>) -> Self {
        Self::SessionInvalid {
            reason: reason.into(),
        }
    }

    /// HTTP status carried by the error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Http { status, .. } => Some(*status),
            Self::Token { .. } => Some(401),
            _ => None,
        }
    }

    pub fn is_abort(&self) -> bool {
        matches!(self, Self::Aborted(_))
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Aborted(AbortReason::Timeout(_)))
    }

    pub fn is_session_invalid(&self) -> bool {
        matches!(self, Self::SessionInvalid { .. })
    }
}

/// Failure of a token refresh, shared with every request queued behind it.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("token refresh failed: {0}")]
pub struct RefreshFailure(pub String);

impl RefreshFailure {
    pub fn new(reason: impl Into<String>) -> Self {
        Self(reason.into())
    }
}

impl From<FetchError> for RefreshFailure {
    fn from(err: FetchError) -> Self {
        Self(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::{AbortReason, FetchError};

    #[test]
    fn timeout_reason_names_the_elapsed_budget() {
        let err = FetchError::Aborted(AbortReason::Timeout(Duration::from_millis(1500)));
        assert!(err.is_abort());
        assert!(err.is_timeout());
        assert_eq!(err.to_string(), "request aborted: request timed out after 1500ms");
    }

    #[test]
    fn caller_cancellation_is_not_a_timeout() {
        let err = FetchError::Aborted(AbortReason::Cancelled);
        assert!(err.is_abort());
        assert!(!err.is_timeout());
    }

    #[test]
    fn status_is_exposed_for_http_and_token_errors() {
        let http = FetchError::Http {
            status: 404,
            message: "Not Found".to_owned(),
            body: None,
        };
        let token = FetchError::Token {
            message: "expired".to_owned(),
            body: None,
        };
        assert_eq!(http.status(), Some(404));
        assert_eq!(token.status(), Some(401));
        assert_eq!(FetchError::Config("x".to_owned()).status(), None);
    }
}
