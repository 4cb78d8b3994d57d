pub mod orchestrator;
pub mod registry;

pub use orchestrator::{CallOrchestrator, CallParams, OptOutDetector, transcript_preview};
pub use registry::{
    CallDirection, CallRecord, CallRegistry, CallStatus, RegistrySnapshot, TranscriptLine,
};
