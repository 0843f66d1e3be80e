//! Generic HTTP vendor TTS backend.
//!
//! Grounded on the client-construction and config shape of
//! `pipeline/src/stt/http_backend.rs::HttpSttBackend` (reqwest client
//! with a fixed timeout, vendor base URL + API key), adapted into a
//! streaming TTS call: the vendor response body is
//! forwarded to the caller chunk-by-chunk as it arrives rather than
//! buffered, so `TtsFallback` can judge health from the first chunk.

use async_trait::async_trait;
use futures::StreamExt;
use serde::Serialize;
use tokio::sync::mpsc;

use crate::error::{PipelineError, Result};
use crate::tts::TtsBackend;

#[derive(Debug, Clone)]
pub struct HttpTtsConfig {
    pub base_url: String,
    pub api_key: String,
    pub voice_id: String,
    pub sample_rate: u32,
    pub timeout: std::time::Duration,
}

impl HttpTtsConfig {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>, voice_id: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: api_key.into(),
            voice_id: voice_id.into(),
            sample_rate: 24000,
            timeout: std::time::Duration::from_secs(10),
        }
    }
}

/// Speaks to any vendor whose streaming synthesis endpoint accepts
/// `{voice_id, text, sample_rate}` and returns raw PCM16LE bytes in
/// the HTTP response body — the exact shape is vendor-specific, since
/// TTS is treated as an opaque external interface here.
pub struct HttpTtsBackend {
    config: HttpTtsConfig,
    client: reqwest::Client,
    label: String,
}

#[derive(Serialize)]
struct SynthesizeRequest<'a> {
    voice_id: &'a str,
    text: &'a str,
    sample_rate: u32,
}

impl HttpTtsBackend {
    pub fn new(label: impl Into<String>, config: HttpTtsConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| PipelineError::Tts(e.to_string()))?;
        Ok(Self { config, client, label: label.into() })
    }
}

#[async_trait]
impl TtsBackend for HttpTtsBackend {
    async fn synthesize(&self, text: &str, tx: mpsc::Sender<Vec<u8>>) -> Result<()> {
        let url = format!("{}/v1/synthesize", self.config.base_url.trim_end_matches('/'));
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.config.api_key)
            .json(&SynthesizeRequest {
                voice_id: &self.config.voice_id,
                text,
                sample_rate: self.config.sample_rate,
            })
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(PipelineError::Tts(format!("{status}: {body}")));
        }

        let mut bytes = response.bytes_stream();
        while let Some(chunk) = bytes.next().await {
            let chunk = chunk?;
            if tx.send(chunk.to_vec()).await.is_err() {
                break;
            }
        }
        Ok(())
    }

    fn sample_rate(&self) -> u32 {
        self.config.sample_rate
    }

    fn name(&self) -> &str {
        &self.label
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_defaults_to_24khz() {
        let config = HttpTtsConfig::new("https://tts.example.com", "key", "voice-1");
        assert_eq!(config.sample_rate, 24000);
    }

    #[test]
    fn backend_reports_configured_sample_rate() {
        let mut config = HttpTtsConfig::new("https://tts.example.com", "key", "voice-1");
        config.sample_rate = 16000;
        let backend = HttpTtsBackend::new("primary", config).unwrap();
        assert_eq!(backend.sample_rate(), 16000);
        assert_eq!(backend.name(), "primary");
    }
}
