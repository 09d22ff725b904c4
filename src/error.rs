#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// Missing or malformed input (email, code, profile fields).
    #[error("Invalid input: {0}")]
    Validation(String),

    /// Upstream endpoint answered with a non-success status.
    #[error("{operation} failed (status {status:?}): {detail}")]
    Upstream {
        operation: &'static str,
        status: Option<u16>,
        detail: String,
    },

    /// Upstream endpoint did not answer within the request deadline.
    #[error("{operation} timed out")]
    UpstreamUnavailable { operation: &'static str },

    /// Upstream rejected submitted customer fields.
    #[error("Upstream rejected input: {}", .0.join("; "))]
    UpstreamValidation(Vec<String>),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Token verification error: {0}")]
    Token(String),

    #[error("Session error: {0}")]
    Session(String),

    #[error("No active session")]
    NoSession,

    #[error("One-time code delivery failed: {0}")]
    Delivery(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Classify a transport failure: timeouts become [`Error::UpstreamUnavailable`].
    pub(crate) fn transport(operation: &'static str, e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::UpstreamUnavailable { operation }
        } else {
            Self::Http(e)
        }
    }

    /// `true` for failures caused by the upstream platform being unreachable or slow.
    #[must_use]
    pub fn is_unavailable(&self) -> bool {
        match self {
            Self::UpstreamUnavailable { .. } => true,
            Self::Http(e) => e.is_timeout() || e.is_connect(),
            _ => false,
        }
    }
}
