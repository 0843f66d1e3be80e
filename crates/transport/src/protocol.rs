//! Carrier media WebSocket event shapes.
//!
//! Grounded on
//! `other_examples/dcd41259_dnacenta-voice-echo__src-twilio-media.rs.rs`'s
//! `StreamEvent` enum: a `#[serde(tag = "event", rename_all =
//! "lowercase")]` enum with `Connected`/`Start`/`Media`/`Mark`/`Stop`
//! variants, adapted to carry the exact field names the carrier
//! requires (`streamSid`, `callSid`, `customParameters`).

use serde::{Deserialize, Serialize};

/// Inbound (client → server) carrier event.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum InboundEvent {
    Connected {
        #[serde(default)]
        protocol: Option<String>,
    },
    Start {
        #[serde(rename = "streamSid")]
        stream_sid: String,
        start: StartMetadata,
    },
    Media {
        #[serde(rename = "streamSid")]
        stream_sid: String,
        media: MediaPayload,
    },
    Mark {
        #[serde(rename = "streamSid")]
        stream_sid: String,
        #[serde(default)]
        mark: Option<MarkPayload>,
    },
    Stop {
        #[serde(rename = "streamSid")]
        stream_sid: String,
    },
}

#[derive(Debug, Clone, Deserialize)]
pub struct StartMetadata {
    #[serde(rename = "callSid")]
    pub call_sid: String,
    #[serde(default)]
    pub custom_parameters: Option<serde_json::Value>,
    #[serde(default)]
    pub caller_number: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MediaPayload {
    /// base64(µ-law bytes).
    pub payload: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MarkPayload {
    pub name: String,
}

/// Outbound (server → client) media event: `{event:"media",
/// streamSid:S, media:{payload:base64(mulaw)}}`.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum OutboundEvent {
    Media {
        #[serde(rename = "streamSid")]
        stream_sid: String,
        media: MediaPayload,
    },
    Mark {
        #[serde(rename = "streamSid")]
        stream_sid: String,
        mark: MarkPayload,
    },
    Clear {
        #[serde(rename = "streamSid")]
        stream_sid: String,
    },
}

impl OutboundEvent {
    pub fn media(stream_sid: impl Into<String>, mulaw_chunk: &[u8]) -> Self {
        Self::Media {
            stream_sid: stream_sid.into(),
            media: MediaPayload {
                payload: base64::Engine::encode(
                    &base64::engine::general_purpose::STANDARD,
                    mulaw_chunk,
                ),
            },
        }
    }

    pub fn mark(stream_sid: impl Into<String>, name: impl Into<String>) -> Self {
        Self::Mark {
            stream_sid: stream_sid.into(),
            mark: MarkPayload { name: name.into() },
        }
    }
}

/// Outbound media frames are sent in this many bytes per chunk, paced
/// at 20 ms each — 160 bytes of 8 kHz µ-law.
pub const OUTBOUND_CHUNK_BYTES: usize = 160;
pub const OUTBOUND_FRAME_PERIOD_MS: u64 = 20;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_start_event() {
        let json = r#"{"event":"start","streamSid":"SS1","start":{"callSid":"CA1"}}"#;
        let ev: InboundEvent = serde_json::from_str(json).unwrap();
        match ev {
            InboundEvent::Start { stream_sid, start } => {
                assert_eq!(stream_sid, "SS1");
                assert_eq!(start.call_sid, "CA1");
            }
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn parses_media_event() {
        let json = r#"{"event":"media","streamSid":"SS1","media":{"payload":"AAA="}}"#;
        let ev: InboundEvent = serde_json::from_str(json).unwrap();
        assert!(matches!(ev, InboundEvent::Media { .. }));
    }

    #[test]
    fn media_event_serializes_with_carrier_field_names() {
        let ev = OutboundEvent::media("SS1", &[0u8, 1, 2]);
        let v = serde_json::to_value(&ev).unwrap();
        assert_eq!(v["event"], "media");
        assert_eq!(v["streamSid"], "SS1");
        assert!(v["media"]["payload"].is_string());
    }
}
