//! Per-call orchestration.
//!
//! Wires one transport leg to one backend session: bootstrap (connect,
//! negotiate, greet), the two audio directions, signaling, opt-out
//! detection, and idempotent teardown.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use regex::Regex;
use serde_json::json;
use tracing::{debug, info, warn};

use crate::audio::{BACKEND_RATE, resample};
use crate::config::BridgeConfig;
use crate::error::BridgeError;
use crate::events::{EventEnvelope, EventPublisher, IdempotencyStore, topic};
use crate::speech::{SessionSettings, SpeechSessionClient, TranscriptRole};
use crate::speech::events::SessionNegotiationResult;
use crate::transport::{Transport, TransportSignal};

use super::registry::{CallDirection, CallRegistry, CallStatus};

/// Frames between `call.media` telemetry events (500 frames = 10 s).
const MEDIA_TELEMETRY_EVERY: u64 = 500;

const PREVIEW_CHARS: usize = 120;

/// Case-insensitive whole-word matcher for opt-out phrases.
pub struct OptOutDetector {
    pattern: Regex,
}

impl OptOutDetector {
    pub fn new(alternatives: &str) -> Result<Self, BridgeError> {
        let pattern = Regex::new(&format!(r"(?i)\b(?:{alternatives})\b"))
            .map_err(|e| BridgeError::Config(format!("bad opt-out pattern: {e}")))?;
        Ok(Self { pattern })
    }

    pub fn matches(&self, text: &str) -> bool {
        self.pattern.is_match(text)
    }
}

/// First `PREVIEW_CHARS` characters, on a char boundary.
pub fn transcript_preview(text: &str) -> String {
    text.chars().take(PREVIEW_CHARS).collect()
}

/// Identity of one bridged call.
#[derive(Debug, Clone)]
pub struct CallParams {
    pub call_id: String,
    pub provider_call_id: Option<String>,
    pub direction: CallDirection,
    pub peer: Option<String>,
}

pub struct CallOrchestrator {
    params: CallParams,
    config: BridgeConfig,
    transport: Arc<dyn Transport>,
    speech: Arc<SpeechSessionClient>,
    registry: Arc<CallRegistry>,
    publisher: EventPublisher,
    idempotency: Arc<IdempotencyStore>,
    opt_out: OptOutDetector,
    negotiation: SessionNegotiationResult,
    /// Captured at wiring time so the grace timer can be spawned from
    /// callbacks running on non-runtime threads.
    runtime: Option<tokio::runtime::Handle>,
    ended: AtomicBool,
}

impl CallOrchestrator {
    /// Bootstrap a call: connect the backend, negotiate, attach the audio
    /// paths, greet. Fails before any callback is attached, so a failed
    /// bootstrap leaves nothing to tear down beyond the socket itself.
    pub async fn start(
        config: BridgeConfig,
        params: CallParams,
        transport: Arc<dyn Transport>,
        registry: Arc<CallRegistry>,
        publisher: EventPublisher,
        idempotency: Arc<IdempotencyStore>,
    ) -> Result<Arc<Self>, BridgeError> {
        let speech = SpeechSessionClient::connect(&config, &params.call_id).await?;

        speech.initialize_session(SessionSettings {
            voice: config.voice.clone(),
            instructions: config.instructions.clone(),
            ..SessionSettings::default()
        });
        let negotiation = speech
            .await_negotiation(config.connect_timeout)
            .await
            .map_err(|e| {
                speech.close();
                e
            })?;
        info!(
            call_id = %params.call_id,
            backend_session = ?negotiation.backend_session_id,
            "session negotiated"
        );

        Ok(Self::wire(
            config,
            params,
            transport,
            Arc::new(speech),
            negotiation,
            registry,
            publisher,
            idempotency,
        )?)
    }

    /// Attach a negotiated backend session to a transport leg.
    #[allow(clippy::too_many_arguments)]
    fn wire(
        config: BridgeConfig,
        params: CallParams,
        transport: Arc<dyn Transport>,
        speech: Arc<SpeechSessionClient>,
        negotiation: SessionNegotiationResult,
        registry: Arc<CallRegistry>,
        publisher: EventPublisher,
        idempotency: Arc<IdempotencyStore>,
    ) -> Result<Arc<Self>, BridgeError> {
        let opt_out = OptOutDetector::new(&config.opt_out_pattern)?;

        registry.start_session(&params.call_id, params.direction, params.peer.clone());
        registry.set_provider_call_id(&params.call_id, params.provider_call_id.clone());
        registry.set_backend_session(&params.call_id, negotiation.backend_session_id.clone());

        let orchestrator = Arc::new(Self {
            params,
            config,
            transport,
            speech,
            registry,
            publisher,
            idempotency,
            opt_out,
            negotiation,
            runtime: tokio::runtime::Handle::try_current().ok(),
            ended: AtomicBool::new(false),
        });

        // Caller audio: decode rate -> canonical backend rate -> socket.
        {
            let speech = orchestrator.speech.clone();
            let registry = orchestrator.registry.clone();
            let publisher = orchestrator.publisher.clone();
            let call_id = orchestrator.params.call_id.clone();
            let provider_call_id = orchestrator.params.provider_call_id.clone();
            orchestrator
                .transport
                .on_inbound_audio(Arc::new(move |pcm, rate_hz| {
                    if let Some(frames) = registry.update_media(&call_id, pcm.len()) {
                        if frames % MEDIA_TELEMETRY_EVERY == 0 {
                            publisher.send(
                                topic::CALL_MEDIA,
                                EventEnvelope::new(
                                    &call_id,
                                    provider_call_id.clone(),
                                    json!({ "frames": frames }),
                                ),
                            );
                        }
                    }
                    speech.send_audio(&resample(pcm, rate_hz, BACKEND_RATE));
                }));
        }

        // Backend audio: deltas head back out the transport, which adapts
        // the rate itself. Per-frame failures are drops.
        {
            let transport = orchestrator.transport.clone();
            let call_id = orchestrator.params.call_id.clone();
            orchestrator
                .speech
                .on_output_audio_delta(Arc::new(move |pcm| {
                    if let Err(e) = transport.send_outbound_audio(pcm, BACKEND_RATE) {
                        debug!(call_id = %call_id, error = %e, "dropping outbound frame");
                    }
                }));
        }

        // Backend transcripts feed the rolling transcript; caller lines
        // also get the opt-out scan.
        {
            let weak = Arc::downgrade(&orchestrator);
            orchestrator.speech.on_transcript(Arc::new(move |role, text| {
                let Some(orchestrator) = weak.upgrade() else {
                    return;
                };
                let role_name = match role {
                    TranscriptRole::Caller => "caller",
                    TranscriptRole::Assistant => "assistant",
                };
                orchestrator
                    .registry
                    .append_transcript(&orchestrator.params.call_id, role_name, text);
                if role == TranscriptRole::Caller {
                    orchestrator.scan_opt_out(text);
                }
            }));
        }

        // Backend hangup ends the call.
        {
            let weak = Arc::downgrade(&orchestrator);
            orchestrator.speech.on_close(Arc::new(move || {
                if let Some(orchestrator) = weak.upgrade() {
                    orchestrator.shutdown();
                }
            }));
        }

        // Transport signaling.
        {
            let weak = Arc::downgrade(&orchestrator);
            orchestrator.transport.on_signal(Arc::new(move |signal| {
                if let Some(orchestrator) = weak.upgrade() {
                    orchestrator.handle_signal(signal);
                }
            }));
        }

        orchestrator
            .registry
            .set_status(&orchestrator.params.call_id, CallStatus::Active);
        orchestrator.publisher.send(
            topic::CALL_START,
            orchestrator.envelope(json!({
                "direction": orchestrator.params.direction,
                "peer": orchestrator.params.peer,
            })),
        );

        if let Some(greeting) = &orchestrator.config.greeting {
            orchestrator.speech.send_text(greeting);
        }

        Ok(orchestrator)
    }

    pub fn call_id(&self) -> &str {
        &self.params.call_id
    }

    pub fn negotiation(&self) -> &SessionNegotiationResult {
        &self.negotiation
    }

    pub fn is_ended(&self) -> bool {
        self.ended.load(Ordering::SeqCst)
    }

    fn handle_signal(&self, signal: TransportSignal) {
        match signal {
            TransportSignal::Started {
                provider_call_id, ..
            } => {
                if provider_call_id.is_some() {
                    self.registry
                        .set_provider_call_id(&self.params.call_id, provider_call_id);
                }
            }
            TransportSignal::WarmTransfer { queue } => {
                info!(call_id = %self.params.call_id, queue = %queue, "warm transfer marked");
                self.registry.mark_warm_transfer(&self.params.call_id, &queue);
                self.registry
                    .set_status(&self.params.call_id, CallStatus::Handoff);
            }
            TransportSignal::Transcription { text, .. } => {
                self.registry
                    .append_transcript(&self.params.call_id, "caller", &text);
                self.scan_opt_out(&text);
                // The conversation continues either way.
                self.speech.send_text(&text);
            }
            TransportSignal::Stopped { reason } => {
                info!(call_id = %self.params.call_id, reason = ?reason, "transport stopped");
                self.shutdown();
            }
            TransportSignal::Disconnected => {
                warn!(call_id = %self.params.call_id, "transport disconnected");
                self.shutdown();
            }
        }
    }

    fn scan_opt_out(&self, text: &str) {
        if !self.opt_out.matches(text) {
            return;
        }
        let key = format!("{}:optout", self.params.call_id);
        let fired = self.idempotency.execute(&key, || {
            self.publisher.send(
                topic::CALL_OPT_OUT,
                self.envelope(json!({ "utterance": transcript_preview(text) })),
            );
        });
        if fired {
            info!(call_id = %self.params.call_id, "opt-out detected");
            self.registry
                .register_opt_out(&self.params.call_id, transcript_preview(text));
        }
    }

    /// Idempotent teardown; safe under racing triggers from either leg.
    pub fn shutdown(&self) {
        if self.ended.swap(true, Ordering::SeqCst) {
            return;
        }
        info!(call_id = %self.params.call_id, "tearing down call");

        self.speech.close();
        self.registry.end_session(&self.params.call_id);
        self.publisher
            .send(topic::CALL_STOP, self.envelope(json!({})));

        let registry = self.registry.clone();
        let call_id = self.params.call_id.clone();
        let grace = self.config.registry_grace;
        let handle = self
            .runtime
            .clone()
            .or_else(|| tokio::runtime::Handle::try_current().ok());
        match handle {
            Some(handle) => {
                handle.spawn(async move {
                    tokio::time::sleep(grace).await;
                    registry.remove(&call_id);
                });
            }
            // Never remove synchronously; trailing status queries still
            // need the ended entry.
            None => warn!(call_id = %call_id, "no runtime for grace timer, entry retained"),
        }
    }

    fn envelope(&self, payload: serde_json::Value) -> EventEnvelope {
        EventEnvelope::new(
            &self.params.call_id,
            self.params.provider_call_id.clone(),
            payload,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::audio;
    use crate::events::MemorySink;
    use crate::transport::{G711Encoding, PacketizedTransport};

    #[test]
    fn opt_out_detector_is_word_bound() {
        let detector = OptOutDetector::new("STOP|END|CANCEL").unwrap();
        assert!(detector.matches("please STOP calling me"));
        assert!(detector.matches("stop"));
        assert!(detector.matches("I want to cancel."));
        assert!(!detector.matches("nonstop flights"));
        assert!(!detector.matches("the weekend was fine"));
    }

    #[test]
    fn bad_pattern_is_a_config_error() {
        assert!(matches!(
            OptOutDetector::new("(unclosed"),
            Err(BridgeError::Config(_))
        ));
    }

    #[test]
    fn preview_truncates_on_char_boundary() {
        let long = "é".repeat(200);
        let preview = transcript_preview(&long);
        assert_eq!(preview.chars().count(), 120);
        let short = transcript_preview("hello");
        assert_eq!(short, "hello");
    }

    struct Harness {
        orchestrator: Arc<CallOrchestrator>,
        transport: Arc<PacketizedTransport>,
        registry: Arc<CallRegistry>,
        sink: Arc<MemorySink>,
    }

    fn harness(config: BridgeConfig) -> Harness {
        let (transport, _outbound) = PacketizedTransport::new(G711Encoding::Mulaw);
        let transport = Arc::new(transport);
        let registry = Arc::new(CallRegistry::new());
        let sink = MemorySink::new();
        let publisher = EventPublisher::new(sink.clone());
        let idempotency = Arc::new(IdempotencyStore::new(config.idempotency_ttl));

        let params = CallParams {
            call_id: "c-1".to_string(),
            provider_call_id: Some("prov-1".to_string()),
            direction: CallDirection::Inbound,
            peer: Some("+15550100".to_string()),
        };
        let orchestrator = CallOrchestrator::wire(
            config,
            params,
            transport.clone(),
            Arc::new(SpeechSessionClient::detached("c-1")),
            SessionNegotiationResult {
                backend_session_id: Some("sess-1".to_string()),
                voice: None,
                model: None,
            },
            registry.clone(),
            publisher,
            idempotency,
        )
        .unwrap();

        Harness {
            orchestrator,
            transport,
            registry,
            sink,
        }
    }

    #[tokio::test]
    async fn wire_marks_call_active_and_publishes_start() {
        let h = harness(BridgeConfig::default());
        assert_eq!(h.registry.get("c-1").unwrap().status, CallStatus::Active);

        tokio::time::sleep(Duration::from_millis(20)).await;
        let recorded = h.sink.recorded();
        assert_eq!(recorded[0].0, topic::CALL_START);
        assert_eq!(recorded[0].1.provider_call_id.as_deref(), Some("prov-1"));
    }

    #[tokio::test]
    async fn inbound_media_is_accounted() {
        let h = harness(BridgeConfig::default());
        let payload = base64_payload(&vec![800i16; 160]);
        h.transport
            .handle_message(&format!(r#"{{"event":"media","payload":"{payload}"}}"#));
        let record = h.registry.get("c-1").unwrap();
        assert_eq!(record.media_frames, 1);
        assert!(record.last_media_at.is_some());
    }

    fn base64_payload(pcm: &[i16]) -> String {
        use base64::Engine as _;
        base64::engine::general_purpose::STANDARD.encode(audio::encode_mulaw(pcm))
    }

    #[tokio::test]
    async fn transcription_triggers_opt_out_once() {
        let h = harness(BridgeConfig::default());

        h.transport
            .handle_message(r#"{"event":"transcription","text":"please STOP","isFinal":true}"#);
        h.transport
            .handle_message(r#"{"event":"transcription","text":"I said stop","isFinal":true}"#);

        let record = h.registry.get("c-1").unwrap();
        assert!(record.opt_out_detected);
        assert_eq!(record.transcript_preview.as_deref(), Some("please STOP"));
        assert_eq!(h.registry.transcript("c-1").len(), 2);

        tokio::time::sleep(Duration::from_millis(20)).await;
        let opt_outs = h
            .sink
            .recorded()
            .iter()
            .filter(|(t, _)| t == topic::CALL_OPT_OUT)
            .count();
        assert_eq!(opt_outs, 1);
        // The call keeps going after an opt-out.
        assert!(!h.orchestrator.is_ended());
    }

    #[tokio::test]
    async fn mark_moves_call_to_handoff() {
        let h = harness(BridgeConfig::default());
        h.transport
            .handle_message(r#"{"event":"mark","name":"human-queue"}"#);
        let record = h.registry.get("c-1").unwrap();
        assert_eq!(record.status, CallStatus::Handoff);
        assert_eq!(record.warm_transfer_queue.as_deref(), Some("human-queue"));
        assert!(!h.orchestrator.is_ended());
    }

    #[tokio::test]
    async fn stop_tears_down_idempotently() {
        let h = harness(BridgeConfig {
            registry_grace: Duration::from_millis(30),
            ..BridgeConfig::default()
        });

        h.transport.handle_message(r#"{"event":"stop"}"#);
        h.transport.handle_message(r#"{"event":"stop"}"#);
        h.orchestrator.shutdown();

        assert!(h.orchestrator.is_ended());
        assert_eq!(h.registry.get("c-1").unwrap().status, CallStatus::Ended);

        tokio::time::sleep(Duration::from_millis(40)).await;
        let recorded = h.sink.recorded();
        let stops = recorded.iter().filter(|(t, _)| t == topic::CALL_STOP).count();
        assert_eq!(stops, 1);
        // Grace period elapsed, registry entry gone.
        assert!(h.registry.get("c-1").is_none());
    }

    #[tokio::test]
    async fn shutdown_from_plain_thread_keeps_grace_period() {
        let h = harness(BridgeConfig {
            registry_grace: Duration::from_millis(40),
            ..BridgeConfig::default()
        });

        let orchestrator = h.orchestrator.clone();
        std::thread::spawn(move || orchestrator.shutdown())
            .join()
            .unwrap();

        // Ended but still visible: removal is deferred, never synchronous.
        let record = h.registry.get("c-1").unwrap();
        assert_eq!(record.status, CallStatus::Ended);

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(h.registry.get("c-1").is_none());
    }

    #[tokio::test]
    async fn inbound_audio_after_shutdown_is_harmless() {
        let h = harness(BridgeConfig {
            registry_grace: Duration::from_secs(60),
            ..BridgeConfig::default()
        });
        h.orchestrator.shutdown();

        let payload = base64_payload(&vec![100i16; 160]);
        h.transport
            .handle_message(&format!(r#"{{"event":"media","payload":"{payload}"}}"#));

        // Still ended, entry still in its grace window.
        assert_eq!(h.registry.get("c-1").unwrap().status, CallStatus::Ended);
    }

    #[tokio::test]
    async fn telemetry_fires_on_frame_cadence() {
        let h = harness(BridgeConfig::default());
        let payload = base64_payload(&vec![0i16; 160]);
        let message = format!(r#"{{"event":"media","payload":"{payload}"}}"#);
        for _ in 0..MEDIA_TELEMETRY_EVERY {
            h.transport.handle_message(&message);
        }

        tokio::time::sleep(Duration::from_millis(30)).await;
        let media_events = h
            .sink
            .recorded()
            .iter()
            .filter(|(t, _)| t == topic::CALL_MEDIA)
            .count();
        assert_eq!(media_events, 1);
    }
}
