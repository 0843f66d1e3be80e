//! Per-call orchestrator tying the carrier transport, STT/TTS vendors,
//! the dialog processor, and post-call delivery together. Owns one
//! call's lifetime end to end and runs its turn loop.
//!
//! Grounded on
//! `other_examples/dcd41259_dnacenta-voice-echo__src-twilio-media.rs.rs`'s
//! `handle_media_stream` task-spawning shape, generalized from an echo
//! loop into the full transport → STT → dialog → LLM → TTS → transport
//! pipeline. One `Call` owns exactly one [`Session`] for the lifetime
//! of the WebSocket connection.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::Instrument;

use voice_agent_agent::{DialogProcessor, OutputFrame};
use voice_agent_backend::BackendClient;
use voice_agent_core::session::Session;
use voice_agent_core::StreamResampler;
use voice_agent_llm::{Extractor, LlmBackend, Message};
use voice_agent_pipeline::stt::{SttBackend, SttEvent};
use voice_agent_pipeline::tts::{TtsFallback, TtsFrame};
use voice_agent_transport::ws::MediaStream;

use crate::post_call::{self, DashboardClient};

/// A telephony sample rate; STT/TTS vendors are free to run at any
/// other rate, `StreamResampler` bridges the difference at the edges.
const TELEPHONY_RATE: u32 = 8000;

pub struct Call {
    backend: Arc<BackendClient>,
    llm: Arc<dyn LlmBackend>,
    extractor: Arc<Extractor>,
    stt: Arc<dyn SttBackend>,
    tts: Arc<TtsFallback>,
    dashboard: Arc<DashboardClient>,
    dashboard_user_email: String,
}

impl Call {
    pub fn new(
        backend: Arc<BackendClient>,
        llm: Arc<dyn LlmBackend>,
        extractor: Arc<Extractor>,
        stt: Arc<dyn SttBackend>,
        tts: Arc<TtsFallback>,
        dashboard: Arc<DashboardClient>,
        dashboard_user_email: impl Into<String>,
    ) -> Self {
        Self { backend, llm, extractor, stt, tts, dashboard, dashboard_user_email: dashboard_user_email.into() }
    }

    /// Drives one call from an accepted [`MediaStream`] to completion:
    /// spawns the STT stream task, runs the turn loop until the
    /// transport or dialog processor signals the end, then runs the
    /// post-call webhook pipeline unconditionally, regardless of how
    /// the call ended.
    pub async fn run(&self, stream: MediaStream) {
        let call_sid = stream.call_sid.clone();
        let span = tracing::info_span!("call", call_sid = %call_sid);
        self.run_inner(stream).instrument(span).await
    }

    async fn run_inner(&self, mut stream: MediaStream) {
        let call_sid = stream.call_sid.clone();
        let phone_number = stream.caller_number.clone().unwrap_or_default();
        let session = Session::new(call_sid.clone(), phone_number);

        let mut processor = DialogProcessor::new(session, Arc::clone(&self.backend), Arc::clone(&self.llm), Arc::clone(&self.extractor));
        let mut llm_context: Vec<Message> = Vec::new();

        let (stt_event_tx, mut stt_event_rx) = mpsc::channel::<SttEvent>(32);
        let stt = Arc::clone(&self.stt);
        let inbound_pcm = std::mem::replace(&mut stream.inbound_pcm, mpsc::channel(1).1);
        let stt_task = tokio::spawn(async move {
            if let Err(e) = stt.stream(inbound_pcm, stt_event_tx).await {
                tracing::warn!(call_sid = %call_sid, error = %e, "stt stream ended with error");
            }
        });

        let mut resampler = StreamResampler::new();
        let mut debounce_tick = tokio::time::interval(Duration::from_millis(250));

        let end_timer = tokio::time::sleep(Duration::from_secs(u64::MAX / 2));
        tokio::pin!(end_timer);
        let mut end_timer_armed = false;

        loop {
            tokio::select! {
                biased;
                _ = stream.ended.wait() => break,

                _ = &mut end_timer, if end_timer_armed => {
                    stream.ended.fire();
                    break;
                }

                _ = debounce_tick.tick(), if processor.is_debouncing() => {
                    let frames = processor.flush_debounce(&mut llm_context).await;
                    if self.apply_frames(frames, &mut processor, &mut llm_context, &mut stream, &mut resampler, end_timer.as_mut(), &mut end_timer_armed).await {
                        break;
                    }
                }

                event = stt_event_rx.recv() => {
                    let Some(event) = event else { break };
                    match event {
                        SttEvent::Final(text) => {
                            let frames = processor.handle_transcription(&text, &mut llm_context).await;
                            if self.apply_frames(frames, &mut processor, &mut llm_context, &mut stream, &mut resampler, end_timer.as_mut(), &mut end_timer_armed).await {
                                break;
                            }
                        }
                        SttEvent::Partial(_) | SttEvent::SpeechStarted | SttEvent::SpeechStopped => {}
                    }
                }
            }
        }

        stt_task.abort();
        resampler.reset();

        post_call::run(&self.dashboard, &processor.session, &self.dashboard_user_email).await;
    }

    /// Applies a batch of [`OutputFrame`]s: speaks immediately-available
    /// text, forwards text to the dialog LLM and speaks its reply,
    /// and arms or fires the end-of-call timer. Returns `true` once the
    /// call should stop accepting further turns.
    async fn apply_frames(
        &self,
        frames: Vec<OutputFrame>,
        processor: &mut DialogProcessor,
        llm_context: &mut Vec<Message>,
        stream: &mut MediaStream,
        resampler: &mut StreamResampler,
        mut end_timer: std::pin::Pin<&mut tokio::time::Sleep>,
        end_timer_armed: &mut bool,
    ) -> bool {
        let mut should_stop = false;
        for frame in frames {
            match frame {
                OutputFrame::Speak(text) => {
                    processor.session.log_agent(&text);
                    self.speak(&text, stream, resampler).await;
                }
                OutputFrame::ForwardToLlm(text) => {
                    llm_context.push(Message::user(text));
                    let reply = match self.llm.generate(llm_context.as_slice()).await {
                        Ok(result) => result.text,
                        Err(e) => {
                            tracing::warn!(error = %e, "dialog llm generation failed");
                            "Sorry, could you say that again?".to_string()
                        }
                    };
                    llm_context.push(Message::assistant(reply.clone()));
                    processor.capture_agent_responses(llm_context.as_slice());
                    self.speak(&reply, stream, resampler).await;
                }
                OutputFrame::EndCallNow => {
                    should_stop = true;
                }
                OutputFrame::EndCallAfter(delay) => {
                    end_timer.as_mut().reset(tokio::time::Instant::now() + delay);
                    *end_timer_armed = true;
                }
            }
        }
        should_stop
    }

    /// Synthesizes `text` through the primary/fallback TTS layer,
    /// resampling each chunk back to telephony rate before handing it
    /// to the transport's outbound channel.
    async fn speak(&self, text: &str, stream: &mut MediaStream, resampler: &mut StreamResampler) {
        let (tts_tx, mut tts_rx) = mpsc::channel::<TtsFrame>(16);
        let tts = Arc::clone(&self.tts);
        let text_owned = text.to_string();
        let synth_task = tokio::spawn(async move {
            if let Err(e) = tts.synthesize(&text_owned, tts_tx).await {
                tracing::warn!(error = %e, "tts synthesis failed for this utterance");
            }
        });

        while let Some(frame) = tts_rx.recv().await {
            let pcm = match resampler.resample(&frame.pcm16, frame.sample_rate, TELEPHONY_RATE) {
                Ok(pcm) => pcm,
                Err(e) => {
                    tracing::warn!(error = %e, "dropping tts frame: resample failed");
                    continue;
                }
            };
            if stream.outbound_pcm.send(pcm).await.is_err() {
                synth_task.abort();
                return;
            }
        }

        let _ = synth_task.await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use voice_agent_core::CircuitBreaker;
    use voice_agent_llm::{FinishReason, GenerationResult, LlmError};
    use voice_agent_pipeline::tts::TtsBackend;

    struct SilentLlm;

    #[async_trait]
    impl LlmBackend for SilentLlm {
        async fn generate(&self, _messages: &[Message]) -> Result<GenerationResult, LlmError> {
            Ok(GenerationResult { text: "noted".to_string(), finish_reason: FinishReason::Stop, total_time_ms: 1 })
        }
        async fn generate_stream(&self, _messages: &[Message], _tx: mpsc::Sender<String>) -> Result<GenerationResult, LlmError> {
            unimplemented!()
        }
        fn model_name(&self) -> &str {
            "stub"
        }
    }

    struct SilentTts;

    #[async_trait]
    impl TtsBackend for SilentTts {
        async fn synthesize(&self, _text: &str, tx: mpsc::Sender<Vec<u8>>) -> voice_agent_pipeline::error::Result<()> {
            let _ = tx.send(vec![0, 0, 0, 0]).await;
            Ok(())
        }
        fn sample_rate(&self) -> u32 {
            8000
        }
        fn name(&self) -> &str {
            "silent"
        }
    }

    fn build_call() -> Call {
        let llm: Arc<dyn LlmBackend> = Arc::new(SilentLlm);
        let backend = Arc::new(BackendClient::new("http://127.0.0.1:1", None).with_breaker(Arc::new(CircuitBreaker::with_params("backend", 1, Duration::from_secs(60)))));
        let extractor = Arc::new(Extractor::new(Arc::clone(&llm)));
        let tts_backend: Arc<dyn TtsBackend> = Arc::new(SilentTts);
        let tts = Arc::new(TtsFallback::new(Arc::clone(&tts_backend), tts_backend, Arc::new(CircuitBreaker::new("tts"))));
        let stt: Arc<dyn SttBackend> = Arc::new(NeverSpeaksStt);
        let dashboard = Arc::new(DashboardClient::new(voice_agent_config::DashboardConfig {
            job_webhook_url: "http://127.0.0.1:1/job".to_string(),
            call_webhook_url: "http://127.0.0.1:1/call".to_string(),
            emergency_webhook_url: "http://127.0.0.1:1/alert".to_string(),
            webhook_secret: "s".to_string(),
            retry_delay_ms: 1,
            user_email: "ops@example.com".to_string(),
        }));
        Call::new(backend, llm, extractor, stt, tts, dashboard, "ops@example.com")
    }

    struct NeverSpeaksStt;

    #[async_trait]
    impl SttBackend for NeverSpeaksStt {
        async fn stream(&self, mut pcm_rx: mpsc::Receiver<Vec<u8>>, _event_tx: mpsc::Sender<SttEvent>) -> voice_agent_pipeline::error::Result<()> {
            while pcm_rx.recv().await.is_some() {}
            Ok(())
        }
        fn name(&self) -> &str {
            "never"
        }
    }

    #[tokio::test]
    async fn call_runs_to_completion_when_transport_ends_immediately() {
        let call = build_call();
        let (_inbound_tx, inbound_rx) = mpsc::channel(1);
        let (outbound_tx, _outbound_rx) = mpsc::channel(1);
        let ended = voice_agent_transport::ws::EndSignal::new();
        ended.fire();
        let stream = MediaStream {
            call_sid: "CA1".to_string(),
            stream_sid: "ST1".to_string(),
            caller_number: Some("+15125550100".to_string()),
            inbound_pcm: inbound_rx,
            outbound_pcm: outbound_tx,
            ended,
        };
        // Must return promptly: the end signal is already fired.
        tokio::time::timeout(Duration::from_secs(2), call.run(stream)).await.expect("call.run must not hang");
    }
}
