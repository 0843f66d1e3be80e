//! Carrier WebSocket session handling.
//!
//! Grounded on
//! `other_examples/dcd41259_dnacenta-voice-echo__src-twilio-media.rs.rs`'s
//! `handle_media_stream`: a `tokio::select!` loop multiplexing inbound
//! carrier frames against an outbound channel, reworked into a
//! `MediaStream` handle so the caller (`voice-agent-server::call`) owns
//! the actual dialog logic while this module owns only wire framing,
//! codec decode/encode, and real-time outbound pacing.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use base64::Engine;
use tokio::sync::{mpsc, Notify};
use tokio::time::timeout;

use voice_agent_core::CodecTranscoder;

use crate::error::{Result, TransportError};
use crate::protocol::{InboundEvent, OutboundEvent, OUTBOUND_CHUNK_BYTES, OUTBOUND_FRAME_PERIOD_MS};

pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(30);

/// Shared disconnect signal: set once by the reader or writer task,
/// observed by the call orchestrator as the cue to run post-call.
#[derive(Clone, Default)]
pub struct EndSignal(Arc<(AtomicBool, Notify)>);

impl EndSignal {
    pub fn new() -> Self {
        Self(Arc::new((AtomicBool::new(false), Notify::new())))
    }

    pub fn fire(&self) {
        self.0 .0.store(true, Ordering::SeqCst);
        self.0 .1.notify_waiters();
    }

    pub fn is_set(&self) -> bool {
        self.0 .0.load(Ordering::SeqCst)
    }

    pub async fn wait(&self) {
        if self.is_set() {
            return;
        }
        self.0 .1.notified().await;
    }
}

/// A live carrier media session: identity extracted from the start
/// handshake, plus channels for PCM16-in / PCM16-out.
pub struct MediaStream {
    pub call_sid: String,
    pub stream_sid: String,
    pub caller_number: Option<String>,
    /// Decoded mono 8 kHz PCM16 (little-endian) frames, one per inbound
    /// `media` event.
    pub inbound_pcm: mpsc::Receiver<Vec<u8>>,
    /// Send mono 8 kHz PCM16 here; it is µ-law encoded and paced to the
    /// carrier in 160-byte/20 ms chunks.
    pub outbound_pcm: mpsc::Sender<Vec<u8>>,
    pub ended: EndSignal,
}

/// Accept a carrier WebSocket: wait for the `start` handshake (a 30 s
/// timeout), then spawn the reader/writer tasks and return
/// a handle. Returns `Err` if the handshake doesn't arrive in time or
/// the socket closes first.
pub async fn accept(mut socket: WebSocket) -> Result<MediaStream> {
    let (call_sid, stream_sid, caller_number) = timeout(HANDSHAKE_TIMEOUT, await_start(&mut socket))
        .await
        .map_err(|_| TransportError::HandshakeTimeout(HANDSHAKE_TIMEOUT))??;

    let ended = EndSignal::new();
    let (inbound_tx, inbound_rx) = mpsc::channel::<Vec<u8>>(64);
    let (outbound_tx, outbound_rx) = mpsc::channel::<Vec<u8>>(64);

    let (ws_sink, ws_stream) = socket.split();

    tokio::spawn(run_reader(ws_stream, inbound_tx, ended.clone()));
    tokio::spawn(run_writer(
        ws_sink,
        outbound_rx,
        stream_sid.clone(),
        ended.clone(),
    ));

    Ok(MediaStream {
        call_sid,
        stream_sid,
        caller_number,
        inbound_pcm: inbound_rx,
        outbound_pcm: outbound_tx,
        ended,
    })
}

async fn await_start(socket: &mut WebSocket) -> Result<(String, String, Option<String>)> {
    loop {
        match socket.recv().await {
            Some(Ok(Message::Text(text))) => {
                let event: InboundEvent = match serde_json::from_str(&text) {
                    Ok(e) => e,
                    Err(e) => {
                        tracing::warn!("malformed inbound frame during handshake: {e}");
                        continue;
                    }
                };
                if let InboundEvent::Start { stream_sid, start } = event {
                    return Ok((start.call_sid, stream_sid, start.caller_number));
                }
            }
            Some(Ok(Message::Close(_))) | None => {
                return Err(TransportError::ClosedBeforeHandshake)
            }
            Some(Err(e)) => {
                tracing::warn!("websocket error during handshake: {e}");
                return Err(TransportError::ClosedBeforeHandshake);
            }
            _ => continue,
        }
    }
}

async fn run_reader(
    mut ws_stream: futures::stream::SplitStream<WebSocket>,
    inbound_tx: mpsc::Sender<Vec<u8>>,
    ended: EndSignal,
) {
    use futures::StreamExt;
    let codec = CodecTranscoder::new();

    while let Some(msg) = ws_stream.next().await {
        let text = match msg {
            Ok(Message::Text(t)) => t,
            Ok(Message::Close(_)) | Err(_) => break,
            Ok(_) => continue,
        };

        let event: InboundEvent = match serde_json::from_str(&text) {
            Ok(e) => e,
            Err(e) => {
                tracing::warn!("dropping malformed inbound frame: {e}");
                continue;
            }
        };

        match event {
            InboundEvent::Media { media, .. } => {
                let mulaw = match base64::engine::general_purpose::STANDARD.decode(&media.payload)
                {
                    Ok(b) => b,
                    Err(e) => {
                        tracing::warn!("dropping frame with invalid base64: {e}");
                        continue;
                    }
                };
                let pcm = codec.mulaw_to_pcm16(&mulaw);
                if inbound_tx.send(pcm).await.is_err() {
                    break;
                }
            }
            InboundEvent::Stop { .. } => break,
            InboundEvent::Connected { .. } | InboundEvent::Mark { .. } => {}
            InboundEvent::Start { .. } => {
                tracing::debug!("ignoring duplicate start event mid-stream");
            }
        }
    }

    ended.fire();
}

async fn run_writer(
    mut ws_sink: futures::stream::SplitSink<WebSocket, Message>,
    mut outbound_rx: mpsc::Receiver<Vec<u8>>,
    stream_sid: String,
    ended: EndSignal,
) {
    use futures::SinkExt;
    let codec = CodecTranscoder::new();
    let mut ticker = tokio::time::interval(Duration::from_millis(OUTBOUND_FRAME_PERIOD_MS));

    loop {
        tokio::select! {
            biased;
            _ = ended.wait() => break,
            pcm = outbound_rx.recv() => {
                let Some(pcm) = pcm else { break };
                let mulaw = match codec.pcm16_to_mulaw(&pcm) {
                    Ok(m) => m,
                    Err(e) => {
                        tracing::warn!("dropping malformed outbound pcm: {e}");
                        continue;
                    }
                };
                for chunk in mulaw.chunks(OUTBOUND_CHUNK_BYTES) {
                    ticker.tick().await;
                    let event = OutboundEvent::media(stream_sid.clone(), chunk);
                    let json = serde_json::to_string(&event).expect("serializable event");
                    if ws_sink.send(Message::Text(json.into())).await.is_err() {
                        ended.fire();
                        return;
                    }
                }
            }
        }
    }

    let _ = ws_sink
        .send(Message::Close(None))
        .await;
}

trait WebSocketSplitExt {
    fn split(self) -> (futures::stream::SplitSink<WebSocket, Message>, futures::stream::SplitStream<WebSocket>);
}

impl WebSocketSplitExt for WebSocket {
    fn split(self) -> (futures::stream::SplitSink<WebSocket, Message>, futures::stream::SplitStream<WebSocket>) {
        use futures::StreamExt;
        StreamExt::split(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn end_signal_fires_and_is_observed() {
        let sig = EndSignal::new();
        assert!(!sig.is_set());
        let sig2 = sig.clone();
        let waiter = tokio::spawn(async move {
            sig2.wait().await;
        });
        sig.fire();
        waiter.await.unwrap();
        assert!(sig.is_set());
    }

    #[tokio::test]
    async fn wait_returns_immediately_if_already_set() {
        let sig = EndSignal::new();
        sig.fire();
        tokio::time::timeout(Duration::from_millis(50), sig.wait())
            .await
            .expect("must not block once already set");
    }
}
