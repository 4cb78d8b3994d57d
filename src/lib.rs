//! Bridges live phone and WebRTC calls to a realtime speech backend.
//!
//! A call comes in over one of two transport shapes (RTP byte streams with
//! a JSON signaling envelope, or a media-track pair), gets decoded and
//! resampled to the canonical backend rate, and is relayed over a WebSocket
//! to the speech backend; synthesized audio flows back the same way. Around
//! that core sit a live call registry, best-effort event publishing with
//! idempotent opt-out handling, and per-call orchestration with race-safe
//! teardown.
//!
//! HTTP surfaces, auth, and persistence are the embedding service's job.

pub mod audio;
pub mod call;
pub mod config;
pub mod error;
pub mod events;
pub mod rtp;
pub mod speech;
pub mod transport;

pub use call::{CallOrchestrator, CallParams, CallRegistry, CallStatus};
pub use config::BridgeConfig;
pub use error::BridgeError;
pub use events::{EventPublisher, IdempotencyStore};
pub use speech::SpeechSessionClient;
pub use transport::{PacketizedTransport, TrackTransport, Transport};
