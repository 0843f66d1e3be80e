//! Pipeline errors.

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("tts request failed: {0}")]
    Tts(String),

    #[error("stt request failed: {0}")]
    Stt(String),

    #[error("vendor request timed out")]
    Timeout,

    #[error("vendor request failed: {0}")]
    Network(String),
}

impl From<reqwest::Error> for PipelineError {
    fn from(err: reqwest::Error) -> Self {
        PipelineError::Network(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;
