//! Backend RPC client errors.

#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("backend request failed: {0}")]
    Network(String),
    #[error("backend returned invalid JSON: {0}")]
    InvalidResponse(String),
    #[error("backend request timed out")]
    Timeout,
}

impl From<reqwest::Error> for BackendError {
    fn from(err: reqwest::Error) -> Self {
        BackendError::Network(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, BackendError>;
