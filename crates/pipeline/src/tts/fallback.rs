//! Primary/fallback TTS failover.
//!
//! Grounded verbatim on `original_source/.../tts_fallback.py`'s
//! `FallbackTTSService`: buffer the primary's stream until its first
//! audio chunk arrives (within `primary_timeout`), then flush the
//! buffer and stream the rest directly; on timeout, error, or an
//! already-open breaker, skip straight to (or fail over to) the
//! fallback vendor without ever emitting partial primary audio.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use voice_agent_core::CircuitBreaker;

use crate::error::Result;
use crate::tts::TtsBackend;

/// One synthesized audio chunk, tagged with the sample rate of the
/// backend that produced it (primary and fallback vendors may differ).
#[derive(Debug, Clone)]
pub struct TtsFrame {
    pub pcm16: Vec<u8>,
    pub sample_rate: u32,
}

pub struct TtsFallback {
    primary: Arc<dyn TtsBackend>,
    fallback: Arc<dyn TtsBackend>,
    breaker: Arc<CircuitBreaker>,
    /// Default 5s.
    primary_timeout: Duration,
}

impl TtsFallback {
    pub fn new(primary: Arc<dyn TtsBackend>, fallback: Arc<dyn TtsBackend>, breaker: Arc<CircuitBreaker>) -> Self {
        Self { primary, fallback, breaker, primary_timeout: Duration::from_secs(5) }
    }

    pub fn with_primary_timeout(mut self, timeout: Duration) -> Self {
        self.primary_timeout = timeout;
        self
    }

    /// Synthesize `text`, streaming PCM16 frames to `out_tx`. Returns
    /// `Err` only when both primary and fallback fail before any audio
    /// was produced — the caller emits a single silent turn and keeps
    /// the call alive rather than dropping it.
    pub async fn synthesize(&self, text: &str, out_tx: mpsc::Sender<TtsFrame>) -> Result<()> {
        if self.breaker.should_try_primary() {
            if self.try_primary(text, &out_tx).await {
                return Ok(());
            }
        } else {
            tracing::info!("tts circuit breaker open, using fallback directly");
        }

        self.run_fallback(text, &out_tx).await
    }

    async fn run_fallback(&self, text: &str, out_tx: &mpsc::Sender<TtsFrame>) -> Result<()> {
        let (inner_tx, mut inner_rx) = mpsc::channel::<Vec<u8>>(16);
        let fallback = self.fallback.clone();
        let text_owned = text.to_string();
        let task = tokio::spawn(async move { fallback.synthesize(&text_owned, inner_tx).await });

        let sample_rate = self.fallback.sample_rate();
        while let Some(chunk) = inner_rx.recv().await {
            if out_tx.send(TtsFrame { pcm16: chunk, sample_rate }).await.is_err() {
                task.abort();
                return Ok(());
            }
        }

        match task.await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => {
                tracing::error!("fallback tts also failed: {e}");
                Err(e)
            }
            Err(e) => {
                tracing::error!("fallback tts task panicked: {e}");
                Err(crate::error::PipelineError::Tts(e.to_string()))
            }
        }
    }

    /// Returns `true` if the primary vendor produced at least one
    /// audio chunk for this utterance (success or a recoverable
    /// mid-stream error after partial audio both count as "handled" —
    /// the utterance already has sound on the wire and can't sanely
    /// fail over mid-sentence).
    async fn try_primary(&self, text: &str, out_tx: &mpsc::Sender<TtsFrame>) -> bool {
        let (inner_tx, mut inner_rx) = mpsc::channel::<Vec<u8>>(16);
        let primary = self.primary.clone();
        let text_owned = text.to_string();
        let task = tokio::spawn(async move { primary.synthesize(&text_owned, inner_tx).await });

        let first_chunk = match tokio::time::timeout(self.primary_timeout, inner_rx.recv()).await {
            Ok(Some(chunk)) => chunk,
            Ok(None) => {
                task.abort();
                self.breaker.record_failure();
                tracing::info!("primary tts finished with no audio, falling back");
                return false;
            }
            Err(_) => {
                task.abort();
                self.breaker.record_failure();
                tracing::warn!(
                    "primary tts timed out after {:?} waiting for first audio",
                    self.primary_timeout
                );
                return false;
            }
        };

        let sample_rate = self.primary.sample_rate();
        if out_tx.send(TtsFrame { pcm16: first_chunk, sample_rate }).await.is_err() {
            return true;
        }
        while let Some(chunk) = inner_rx.recv().await {
            if out_tx.send(TtsFrame { pcm16: chunk, sample_rate }).await.is_err() {
                return true;
            }
        }

        match task.await {
            Ok(Ok(())) => {
                self.breaker.record_success();
                true
            }
            Ok(Err(e)) => {
                tracing::warn!("primary tts mid-stream error, utterance already partly spoken: {e}");
                self.breaker.record_failure();
                true
            }
            Err(e) => {
                tracing::warn!("primary tts task panicked: {e}");
                self.breaker.record_failure();
                true
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct ScriptedBackend {
        name: &'static str,
        sample_rate: u32,
        calls: Arc<AtomicU32>,
        behavior: Behavior,
    }

    #[derive(Clone, Copy)]
    enum Behavior {
        Succeeds,
        NeverProducesAudio,
        TimesOut,
    }

    #[async_trait]
    impl TtsBackend for ScriptedBackend {
        async fn synthesize(&self, _text: &str, tx: mpsc::Sender<Vec<u8>>) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.behavior {
                Behavior::Succeeds => {
                    let _ = tx.send(vec![1, 2, 3]).await;
                    let _ = tx.send(vec![4, 5, 6]).await;
                    Ok(())
                }
                Behavior::NeverProducesAudio => Ok(()),
                Behavior::TimesOut => {
                    tokio::time::sleep(Duration::from_secs(60)).await;
                    Ok(())
                }
            }
        }

        fn sample_rate(&self) -> u32 {
            self.sample_rate
        }

        fn name(&self) -> &str {
            self.name
        }
    }

    fn backend(name: &'static str, behavior: Behavior, calls: Arc<AtomicU32>) -> Arc<dyn TtsBackend> {
        Arc::new(ScriptedBackend { name, sample_rate: 24000, calls, behavior })
    }

    #[tokio::test]
    async fn healthy_primary_never_touches_fallback() {
        let primary_calls = Arc::new(AtomicU32::new(0));
        let fallback_calls = Arc::new(AtomicU32::new(0));
        let tts = TtsFallback::new(
            backend("primary", Behavior::Succeeds, primary_calls.clone()),
            backend("fallback", Behavior::Succeeds, fallback_calls.clone()),
            Arc::new(CircuitBreaker::new("tts")),
        );

        let (tx, mut rx) = mpsc::channel(16);
        tts.synthesize("hello", tx).await.unwrap();
        drop(rx.recv().await); // first frame
        drop(rx.recv().await); // second frame
        assert_eq!(primary_calls.load(Ordering::SeqCst), 1);
        assert_eq!(fallback_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn primary_with_no_audio_falls_back() {
        let primary_calls = Arc::new(AtomicU32::new(0));
        let fallback_calls = Arc::new(AtomicU32::new(0));
        let tts = TtsFallback::new(
            backend("primary", Behavior::NeverProducesAudio, primary_calls.clone()),
            backend("fallback", Behavior::Succeeds, fallback_calls.clone()),
            Arc::new(CircuitBreaker::new("tts")),
        );

        let (tx, mut rx) = mpsc::channel(16);
        tts.synthesize("hello", tx).await.unwrap();
        let frame = rx.recv().await.unwrap();
        assert_eq!(frame.sample_rate, 24000);
        assert_eq!(fallback_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn primary_timeout_falls_back_and_records_failure() {
        let primary_calls = Arc::new(AtomicU32::new(0));
        let fallback_calls = Arc::new(AtomicU32::new(0));
        let tts = TtsFallback::new(
            backend("primary", Behavior::TimesOut, primary_calls.clone()),
            backend("fallback", Behavior::Succeeds, fallback_calls.clone()),
            Arc::new(CircuitBreaker::new("tts")),
        )
        .with_primary_timeout(Duration::from_millis(20));

        let (tx, mut rx) = mpsc::channel(16);
        tts.synthesize("hello", tx).await.unwrap();
        assert!(rx.recv().await.is_some());
        assert_eq!(fallback_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn open_breaker_skips_primary_entirely() {
        let primary_calls = Arc::new(AtomicU32::new(0));
        let fallback_calls = Arc::new(AtomicU32::new(0));
        let breaker = Arc::new(CircuitBreaker::with_params("tts", 1, Duration::from_secs(60)));
        breaker.record_failure();
        assert!(!breaker.should_try_primary());

        let tts = TtsFallback::new(
            backend("primary", Behavior::Succeeds, primary_calls.clone()),
            backend("fallback", Behavior::Succeeds, fallback_calls.clone()),
            breaker,
        );

        let (tx, mut rx) = mpsc::channel(16);
        tts.synthesize("hello", tx).await.unwrap();
        assert!(rx.recv().await.is_some());
        assert_eq!(primary_calls.load(Ordering::SeqCst), 0);
        assert_eq!(fallback_calls.load(Ordering::SeqCst), 1);
    }
}
