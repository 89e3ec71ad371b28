//! Failures talking to the fork source.

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ForkError {
    #[error("network error: {0}")]
    Network(String),
    #[error("upstream request timed out")]
    Timeout,
    #[error("upstream rpc error {code}: {message}")]
    Rpc { code: i64, message: String },
    #[error("invalid upstream response: {0}")]
    InvalidResponse(String),
    #[error("invalid fork url: {0}")]
    InvalidUrl(String),
}

impl ForkError {
    /// Whether another attempt may succeed. JSON-RPC errors are answers, not
    /// transport faults.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ForkError::Network(_) | ForkError::Timeout)
    }

    pub(crate) fn from_reqwest(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ForkError::Timeout
        } else if err.is_decode() {
            ForkError::InvalidResponse(err.to_string())
        } else {
            ForkError::Network(err.to_string())
        }
    }
}
