//! Text-to-speech: the vendor backend trait and the primary/fallback
//! failover layer that sits in front of it.

pub mod fallback;
pub mod http_backend;

pub use fallback::{TtsFallback, TtsFrame};
pub use http_backend::{HttpTtsBackend, HttpTtsConfig};

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::Result;

/// One vendor TTS connection. `synthesize` streams PCM16 (little-endian,
/// mono, `sample_rate()` Hz) chunks to `tx` as they're produced —
/// `TtsFallback` watches the first chunk to decide whether the vendor
/// is healthy for this utterance.
#[async_trait]
pub trait TtsBackend: Send + Sync {
    async fn synthesize(&self, text: &str, tx: mpsc::Sender<Vec<u8>>) -> Result<()>;

    fn sample_rate(&self) -> u32;

    fn name(&self) -> &str;
}
