//! Best-effort event publishing.
//!
//! `EventPublisher` is a clonable handle over an unbounded channel; a drain
//! task forwards envelopes into the concrete bus behind `EventSink`.
//! Publishing never blocks a call and failures are logged, not surfaced.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::error::BridgeError;

/// Well-known topics.
pub mod topic {
    pub const CALL_START: &str = "call.start";
    pub const CALL_STOP: &str = "call.stop";
    pub const CALL_OPT_OUT: &str = "call.opt_out";
    pub const CALL_MEDIA: &str = "call.media";
}

/// Envelope published for every call event.
#[derive(Debug, Clone, Serialize)]
pub struct EventEnvelope {
    pub call_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider_call_id: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub payload: serde_json::Value,
}

impl EventEnvelope {
    pub fn new(call_id: &str, provider_call_id: Option<String>, payload: serde_json::Value) -> Self {
        Self {
            call_id: call_id.to_string(),
            provider_call_id,
            timestamp: Utc::now(),
            payload,
        }
    }
}

/// Seam to the concrete event bus.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn publish(&self, topic: &str, envelope: &EventEnvelope) -> Result<(), BridgeError>;
}

#[derive(Debug)]
enum BusMessage {
    Publish { topic: String, envelope: EventEnvelope },
    Shutdown,
}

/// Clonable fire-and-forget handle.
#[derive(Clone)]
pub struct EventPublisher {
    tx: mpsc::UnboundedSender<BusMessage>,
}

impl EventPublisher {
    /// Spawns the drain task and returns the handle.
    pub fn new(sink: Arc<dyn EventSink>) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                match msg {
                    BusMessage::Publish { topic, envelope } => {
                        if let Err(e) = sink.publish(&topic, &envelope).await {
                            warn!(topic = %topic, call_id = %envelope.call_id, error = %e,
                                "event publish failed, dropping");
                        }
                    }
                    BusMessage::Shutdown => {
                        info!("event publisher shutting down");
                        break;
                    }
                }
            }
        });

        Self { tx }
    }

    /// Publisher that discards everything; for contexts with no bus.
    pub fn null() -> Self {
        let (tx, _rx) = mpsc::unbounded_channel();
        Self { tx }
    }

    pub fn send(&self, topic: &str, envelope: EventEnvelope) {
        let _ = self.tx.send(BusMessage::Publish {
            topic: topic.to_string(),
            envelope,
        });
    }

    pub fn shutdown(&self) {
        let _ = self.tx.send(BusMessage::Shutdown);
    }
}

/// Sink that records everything in memory.
#[derive(Default)]
pub struct MemorySink {
    records: std::sync::Mutex<Vec<(String, EventEnvelope)>>,
}

impl MemorySink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn recorded(&self) -> Vec<(String, EventEnvelope)> {
        self.records.lock().map(|r| r.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl EventSink for MemorySink {
    async fn publish(&self, topic: &str, envelope: &EventEnvelope) -> Result<(), BridgeError> {
        if let Ok(mut records) = self.records.lock() {
            records.push((topic.to_string(), envelope.clone()));
        }
        Ok(())
    }
}
