//! Transport adapters between the provider media leg and the bridge.
//!
//! Two shapes: a packetized byte-stream leg (RTP datagrams and a JSON
//! signaling envelope) and a media-track leg where a WebRTC-style binding
//! hands over already-decoded PCM. Both surface the same `Transport` trait.

pub mod packetized;
pub mod track;

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::BridgeError;

pub use packetized::{G711Encoding, PacketizedTransport};
pub use track::{MediaTrackSink, MediaTrackSource, TrackTransport};

/// Inbound audio callback: mono PCM16 plus its rate.
pub type InboundAudioCallback = Arc<dyn Fn(&[i16], u32) + Send + Sync>;

/// Callback for non-audio transport signals.
pub type SignalCallback = Arc<dyn Fn(TransportSignal) + Send + Sync>;

/// Signaling envelope sent by packetized providers, parsed once at the
/// boundary. Unknown kinds collapse into `Ignored`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum TelephonyEvent {
    Start {
        #[serde(rename = "callId")]
        call_id: String,
        #[serde(rename = "providerCallId", default)]
        provider_call_id: Option<String>,
        #[serde(default)]
        codec: Option<String>,
    },
    Media {
        /// Base64 codec bytes in the negotiated encoding.
        payload: String,
        #[serde(default)]
        timestamp: Option<u64>,
    },
    /// Warm-transfer annotation. Providers disagree on the field name, so
    /// both spellings are accepted.
    Mark {
        #[serde(default)]
        name: Option<String>,
        #[serde(default)]
        queue: Option<String>,
    },
    Stop {
        #[serde(default)]
        reason: Option<String>,
    },
    Transcription {
        text: String,
        #[serde(rename = "isFinal", default)]
        is_final: bool,
    },
    #[serde(other)]
    Ignored,
}

/// Non-audio events a transport surfaces to the orchestrator.
#[derive(Debug, Clone)]
pub enum TransportSignal {
    Started {
        call_id: String,
        provider_call_id: Option<String>,
    },
    WarmTransfer {
        queue: String,
    },
    Transcription {
        text: String,
        is_final: bool,
    },
    Stopped {
        reason: Option<String>,
    },
    Disconnected,
}

/// One audio leg of a call. Registration is one callback per kind; sends
/// are non-blocking.
pub trait Transport: Send + Sync {
    /// Register the inbound audio callback. Audio arriving before
    /// registration is dropped.
    fn on_inbound_audio(&self, callback: InboundAudioCallback);

    /// Register the signal callback.
    fn on_signal(&self, callback: SignalCallback);

    /// Push PCM toward the caller. Per-frame failures after a clean start
    /// are reported but callers are expected to drop, not abort.
    fn send_outbound_audio(&self, pcm: &[i16], rate_hz: u32) -> Result<(), BridgeError>;

    /// The rate this transport wants outbound audio in.
    fn preferred_rate(&self) -> u32;
}
