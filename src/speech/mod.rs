pub mod client;
pub mod events;

pub use client::{
    AudioDeltaCallback, CloseCallback, SpeechSessionClient, TranscriptCallback, TranscriptRole,
};
pub use events::{
    ClientEvent, ServerEvent, SessionNegotiationResult, SessionSettings, TurnDetection,
};
