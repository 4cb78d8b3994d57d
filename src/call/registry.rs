//! Live call registry.
//!
//! Concurrent map of in-flight calls; the entry API serializes
//! read-modify-write per key. Ended entries linger until the orchestrator's
//! grace timer removes them.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;

/// Where a call currently is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CallStatus {
    Starting,
    Active,
    Handoff,
    Ended,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CallDirection {
    Inbound,
    Outbound,
}

/// One line of the rolling transcript.
#[derive(Debug, Clone, Serialize)]
pub struct TranscriptLine {
    pub role: String,
    pub text: String,
    pub at: DateTime<Utc>,
}

/// Everything the registry knows about one call.
#[derive(Debug, Clone, Serialize)]
pub struct CallRecord {
    pub call_id: String,
    pub provider_call_id: Option<String>,
    pub backend_session_id: Option<String>,
    pub direction: CallDirection,
    pub peer: Option<String>,
    pub status: CallStatus,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub last_media_at: Option<DateTime<Utc>>,
    pub media_frames: u64,
    pub media_bytes: u64,
    pub warm_transfer_queue: Option<String>,
    pub opt_out_detected: bool,
    pub transcript_preview: Option<String>,
    #[serde(skip)]
    pub transcript: Vec<TranscriptLine>,
}

impl CallRecord {
    /// Elapsed call time; frozen once the call ends. Never negative.
    pub fn duration_ms(&self) -> i64 {
        let end = self.ended_at.unwrap_or_else(Utc::now);
        (end - self.started_at).num_milliseconds().max(0)
    }
}

/// Point-in-time view of the registry.
#[derive(Debug, Clone, Serialize)]
pub struct RegistrySnapshot {
    pub generated_at: DateTime<Utc>,
    pub calls: Vec<CallRecord>,
}

const TRANSCRIPT_CAP: usize = 500;

#[derive(Default)]
pub struct CallRegistry {
    calls: DashMap<String, CallRecord>,
}

impl CallRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start_session(&self, call_id: &str, direction: CallDirection, peer: Option<String>) {
        self.calls.insert(
            call_id.to_string(),
            CallRecord {
                call_id: call_id.to_string(),
                provider_call_id: None,
                backend_session_id: None,
                direction,
                peer,
                status: CallStatus::Starting,
                started_at: Utc::now(),
                ended_at: None,
                last_media_at: None,
                media_frames: 0,
                media_bytes: 0,
                warm_transfer_queue: None,
                opt_out_detected: false,
                transcript_preview: None,
                transcript: Vec::new(),
            },
        );
    }

    pub fn set_status(&self, call_id: &str, status: CallStatus) {
        if let Some(mut record) = self.calls.get_mut(call_id) {
            if record.status != CallStatus::Ended {
                record.status = status;
            }
        }
    }

    pub fn set_provider_call_id(&self, call_id: &str, provider_call_id: Option<String>) {
        if let Some(mut record) = self.calls.get_mut(call_id) {
            record.provider_call_id = provider_call_id;
        }
    }

    pub fn set_backend_session(&self, call_id: &str, backend_session_id: Option<String>) {
        if let Some(mut record) = self.calls.get_mut(call_id) {
            record.backend_session_id = backend_session_id;
        }
    }

    /// Account one inbound frame. Returns the running frame count.
    pub fn update_media(&self, call_id: &str, sample_count: usize) -> Option<u64> {
        let mut record = self.calls.get_mut(call_id)?;
        record.media_frames += 1;
        record.media_bytes += sample_count as u64 * 2;
        record.last_media_at = Some(Utc::now());
        Some(record.media_frames)
    }

    pub fn mark_warm_transfer(&self, call_id: &str, queue: &str) {
        if let Some(mut record) = self.calls.get_mut(call_id) {
            record.warm_transfer_queue = Some(queue.to_string());
        }
    }

    pub fn register_opt_out(&self, call_id: &str, preview: String) {
        if let Some(mut record) = self.calls.get_mut(call_id) {
            record.opt_out_detected = true;
            record.transcript_preview = Some(preview);
        }
    }

    pub fn append_transcript(&self, call_id: &str, role: &str, text: &str) {
        if let Some(mut record) = self.calls.get_mut(call_id) {
            if record.transcript.len() == TRANSCRIPT_CAP {
                record.transcript.remove(0);
            }
            record.transcript.push(TranscriptLine {
                role: role.to_string(),
                text: text.to_string(),
                at: Utc::now(),
            });
        }
    }

    /// Mark ended and freeze the duration. Safe to call more than once.
    pub fn end_session(&self, call_id: &str) {
        if let Some(mut record) = self.calls.get_mut(call_id) {
            if record.status != CallStatus::Ended {
                record.status = CallStatus::Ended;
                record.ended_at = Some(Utc::now());
            }
        }
    }

    pub fn remove(&self, call_id: &str) {
        self.calls.remove(call_id);
    }

    pub fn get(&self, call_id: &str) -> Option<CallRecord> {
        self.calls.get(call_id).map(|r| r.clone())
    }

    pub fn transcript(&self, call_id: &str) -> Vec<TranscriptLine> {
        self.calls
            .get(call_id)
            .map(|r| r.transcript.clone())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.calls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }

    /// Newest-first listing of every known call.
    pub fn snapshot(&self) -> RegistrySnapshot {
        let mut calls: Vec<CallRecord> = self.calls.iter().map(|r| r.clone()).collect();
        calls.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        RegistrySnapshot {
            generated_at: Utc::now(),
            calls,
        }
    }
}
