pub mod idempotency;
pub mod publisher;

pub use idempotency::IdempotencyStore;
pub use publisher::{EventEnvelope, EventPublisher, EventSink, MemorySink, topic};
