//! Streaming STT: vendor backend trait only.
//!
//! Streaming STT is treated as an external interface here, not a
//! subsystem to build — there is no on-device speech model in this
//! repo. `SttBackend` is the seam `voice-agent-server`'s call
//! orchestrator drives; [`http_backend::HttpSttBackend`] is one
//! concrete vendor adapter, grounded on
//! `stt/http_backend.rs::HttpSttBackend` trait shape (`process`/
//! `finalize_sync`/`reset`/`partial`), reworked from its synchronous
//! `reqwest::blocking` buffering loop into an async stream that
//! forwards vendor partial/final results and VAD edges upstream as
//! they arrive.

pub mod http_backend;

pub use http_backend::{HttpSttBackend, HttpSttConfig};

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::Result;

/// An event surfaced from a live STT stream.
#[derive(Debug, Clone)]
pub enum SttEvent {
    /// Caller started speaking (vendor-reported VAD edge).
    SpeechStarted,
    /// Caller stopped speaking (vendor-reported VAD edge).
    SpeechStopped,
    /// Unstable, still-updating transcript for the current utterance.
    Partial(String),
    /// Finalized transcript for one utterance.
    Final(String),
}

#[async_trait]
pub trait SttBackend: Send + Sync {
    /// Consume decoded PCM16 frames from `pcm_rx` (as produced by
    /// `voice-agent-transport`) and emit [`SttEvent`]s to `event_tx`
    /// until `pcm_rx` closes (call ended).
    async fn stream(&self, pcm_rx: mpsc::Receiver<Vec<u8>>, event_tx: mpsc::Sender<SttEvent>) -> Result<()>;

    fn name(&self) -> &str;
}
