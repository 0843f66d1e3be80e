//! HTTP vendor STT backend.
//!
//! Grounded on `stt/http_backend.rs`: buffer PCM until a
//! configured chunk size is reached, POST it to the vendor, surface
//! whatever partial text comes back; on stream close, flush the
//! remaining buffer as the final transcript. Speech start/stop edges
//! are taken directly from the vendor's response (`speech_started`)
//! since no on-device VAD model is in scope for this repo.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::{PipelineError, Result};
use crate::stt::{SttBackend, SttEvent};

#[derive(Debug, Clone)]
pub struct HttpSttConfig {
    pub base_url: String,
    pub api_key: String,
    /// PCM16 bytes to accumulate before sending an interim chunk to
    /// the vendor (8 kHz mono PCM16: 3200 bytes ≈ 200ms).
    pub chunk_bytes: usize,
    pub timeout: std::time::Duration,
}

impl HttpSttConfig {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: api_key.into(),
            chunk_bytes: 3200,
            timeout: std::time::Duration::from_secs(10),
        }
    }
}

#[derive(Serialize)]
struct TranscribeRequest<'a> {
    #[serde(with = "base64_bytes")]
    audio_pcm16: &'a [u8],
    is_final: bool,
}

#[derive(Deserialize)]
struct TranscribeResponse {
    text: String,
    #[serde(default)]
    speech_started: bool,
}

mod base64_bytes {
    use base64::Engine;
    use serde::Serializer;

    pub fn serialize<S: Serializer>(bytes: &&[u8], serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&base64::engine::general_purpose::STANDARD.encode(bytes))
    }
}

pub struct HttpSttBackend {
    config: HttpSttConfig,
    client: reqwest::Client,
    label: String,
}

impl HttpSttBackend {
    pub fn new(label: impl Into<String>, config: HttpSttConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| PipelineError::Stt(e.to_string()))?;
        Ok(Self { config, client, label: label.into() })
    }

    async fn transcribe(&self, pcm16: &[u8], is_final: bool) -> Result<TranscribeResponse> {
        let url = format!("{}/v1/transcribe", self.config.base_url.trim_end_matches('/'));
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.config.api_key)
            .json(&TranscribeRequest { audio_pcm16: pcm16, is_final })
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(PipelineError::Stt(format!("{status}: {body}")));
        }

        response.json().await.map_err(|e| PipelineError::Stt(e.to_string()))
    }
}

#[async_trait]
impl SttBackend for HttpSttBackend {
    async fn stream(&self, mut pcm_rx: mpsc::Receiver<Vec<u8>>, event_tx: mpsc::Sender<SttEvent>) -> Result<()> {
        let mut buffer: Vec<u8> = Vec::with_capacity(self.config.chunk_bytes * 2);
        let mut speech_seen = false;

        while let Some(frame) = pcm_rx.recv().await {
            buffer.extend_from_slice(&frame);
            if buffer.len() < self.config.chunk_bytes {
                continue;
            }

            match self.transcribe(&buffer, false).await {
                Ok(response) => {
                    if response.speech_started && !speech_seen {
                        speech_seen = true;
                        if event_tx.send(SttEvent::SpeechStarted).await.is_err() {
                            return Ok(());
                        }
                    }
                    if !response.text.is_empty() && event_tx.send(SttEvent::Partial(response.text)).await.is_err() {
                        return Ok(());
                    }
                }
                Err(e) => tracing::warn!("interim stt request failed: {e}"),
            }
            buffer.clear();
        }

        if !buffer.is_empty() {
            match self.transcribe(&buffer, true).await {
                Ok(response) => {
                    if speech_seen && event_tx.send(SttEvent::SpeechStopped).await.is_err() {
                        return Ok(());
                    }
                    if !response.text.is_empty() {
                        let _ = event_tx.send(SttEvent::Final(response.text)).await;
                    }
                }
                Err(e) => tracing::warn!("final stt request failed: {e}"),
            }
        } else if speech_seen {
            let _ = event_tx.send(SttEvent::SpeechStopped).await;
        }

        Ok(())
    }

    fn name(&self) -> &str {
        &self.label
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_defaults_match_200ms_at_8khz() {
        let config = HttpSttConfig::new("https://stt.example.com", "key");
        assert_eq!(config.chunk_bytes, 3200);
    }
}
