//! Shared error type for `voice-agent-core`.

use crate::session::State;

/// Errors produced by codec, resampling, and session bookkeeping operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("odd-length PCM16 buffer ({0} bytes)")]
    OddPcmLength(usize),

    #[error("unsupported sample rate conversion: {from} -> {to}")]
    UnsupportedRateConversion { from: u32, to: u32 },

    #[error("resampler state error: {0}")]
    Resampler(String),

    #[error("illegal state transition: {from:?} -> {to:?}")]
    IllegalTransition { from: State, to: State },
}

pub type Result<T> = std::result::Result<T, Error>;
