//! Call orchestration and the HTTP admin surface.
//!
//! - [`call`] — the `Call` orchestrator: one live WebSocket media
//!   session driven through transport, STT, dialog, LLM, and TTS.
//! - [`classifier`] — deterministic HVAC tag taxonomy, priority
//!   cascade, revenue-tier ladder, optional LLM-summary enrichment.
//! - [`post_call`] — webhook payload assembly, delivery, and the
//!   chunked transcript-dump log format.
//! - [`http`] — `/healthz`, `/metrics`, `/twiml`, and the carrier
//!   WebSocket upgrade route.
//! - [`state`] — `AppState`, built once in `main` and shared per call.
//!
//! A session-recovery store (Scylla/in-memory), push-to-talk REST
//! surface, WebRTC signaling, MCP JSON-RPC endpoint, auth middleware,
//! and rate limiter have no counterpart here — a call lives and dies
//! with its one WebSocket connection, there is no multi-domain session
//! registry to recover — and were dropped.

pub mod call;
pub mod classifier;
pub mod http;
pub mod post_call;
pub mod state;

pub use call::Call;
pub use http::create_router;
pub use state::AppState;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ServerError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("transport error: {0}")]
    Transport(String),
}
