//! TTS primary/fallback failover and the vendor STT/TTS backend traits.
//!
//! - [`tts`] — `TtsBackend` trait, `TtsFallback` failover layer, one
//!   concrete HTTP vendor adapter.
//! - [`stt`] — `SttBackend` trait and one concrete HTTP vendor adapter.
//!   Streaming STT is treated as an external interface here, not a
//!   subsystem to build, so there is no on-device model.
//!
//! VAD (Silero/MagicNet), turn-detection, IndicConformer/Whisper-style
//! on-device STT, and G2P/ONNX/Candle TTS inference have no on-device
//! speech model counterpart here and were not adapted.

pub mod error;
pub mod stt;
pub mod tts;

pub use error::{PipelineError, Result};
pub use stt::{HttpSttBackend, HttpSttConfig, SttBackend, SttEvent};
pub use tts::{HttpTtsBackend, HttpTtsConfig, TtsBackend, TtsFallback, TtsFrame};
