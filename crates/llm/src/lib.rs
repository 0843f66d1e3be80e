//! Chat completion backend and background field extraction.
//!
//! - [`backend`] — vendor-agnostic [`backend::LlmBackend`] trait plus
//!   an OpenAI-compatible implementation, used for the main dialog LLM.
//! - [`prompt`] — the role/message vocabulary passed to a backend.
//! - [`extractor`] — the background, firewalled field-extraction pass.
//!
//! A speculative SLM-racing executor, a Claude-specific native
//! tool_use backend, and a `LanguageModelAdapter` have no counterpart
//! here — tool calls are decided deterministically by the state
//! machine, not by the LLM — and were dropped.

pub mod backend;
pub mod extractor;
pub mod prompt;

pub use backend::{FinishReason, GenerationResult, LlmBackend, OpenAiBackend, OpenAiConfig};
pub use extractor::{apply_extraction, ExtractionProposal, Extractor};
pub use prompt::{Message, Role};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum LlmError {
    #[error("API error: {0}")]
    Api(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("configuration error: {0}")]
    Configuration(String),
}

impl From<reqwest::Error> for LlmError {
    fn from(err: reqwest::Error) -> Self {
        LlmError::Network(err.to_string())
    }
}
