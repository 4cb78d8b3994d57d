//! WebSocket client for the realtime speech backend, one instance per call.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tracing::{debug, error, info, warn};

use crate::config::BridgeConfig;
use crate::error::BridgeError;

use super::events::{
    ClientEvent, ConversationItem, ServerEvent, SessionNegotiationResult, SessionSettings,
};

/// Who said a transcribed line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TranscriptRole {
    Caller,
    Assistant,
}

/// Callback for backend audio deltas, PCM16 at the backend rate.
pub type AudioDeltaCallback = Arc<dyn Fn(&[i16]) + Send + Sync>;
pub type TranscriptCallback = Arc<dyn Fn(TranscriptRole, &str) + Send + Sync>;
pub type CloseCallback = Arc<dyn Fn() + Send + Sync>;

struct Shared {
    call_id: String,
    closed: AtomicBool,
    audio_subs: Mutex<Vec<AudioDeltaCallback>>,
    transcript_subs: Mutex<Vec<TranscriptCallback>>,
    close_subs: Mutex<Vec<CloseCallback>>,
    negotiated_tx: watch::Sender<Option<SessionNegotiationResult>>,
}

impl Shared {
    fn handle_text(&self, text: &str) {
        let event: ServerEvent = match serde_json::from_str(text) {
            Ok(event) => event,
            Err(e) => {
                debug!(call_id = %self.call_id, error = %e, "unparseable backend event");
                return;
            }
        };

        match event {
            ServerEvent::SessionCreated { session } | ServerEvent::SessionUpdated { session } => {
                self.negotiated_tx.send_if_modified(|slot| {
                    if slot.is_none() {
                        *slot = Some(session.into());
                        true
                    } else {
                        false
                    }
                });
            }
            ServerEvent::AudioDelta { delta } | ServerEvent::OutputAudioDelta { delta } => {
                let Some(pcm) = decode_pcm16(&delta) else {
                    debug!(call_id = %self.call_id, "dropping audio delta with bad base64");
                    return;
                };
                if let Ok(subs) = self.audio_subs.lock() {
                    for sub in subs.iter() {
                        sub(&pcm);
                    }
                }
            }
            ServerEvent::AudioTranscriptDelta { delta } => {
                self.emit_transcript(TranscriptRole::Assistant, &delta);
            }
            ServerEvent::InputTranscriptionCompleted { transcript } => {
                self.emit_transcript(TranscriptRole::Caller, &transcript);
            }
            ServerEvent::Error { error } => {
                error!(call_id = %self.call_id, error = %error, "backend error event");
            }
            ServerEvent::Unknown => debug!(call_id = %self.call_id, "ignoring backend event"),
        }
    }

    fn emit_transcript(&self, role: TranscriptRole, text: &str) {
        if let Ok(subs) = self.transcript_subs.lock() {
            for sub in subs.iter() {
                sub(role, text);
            }
        }
    }

    fn mark_closed(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            info!(call_id = %self.call_id, "backend session closed");
            if let Ok(subs) = self.close_subs.lock() {
                for sub in subs.iter() {
                    sub();
                }
            }
        }
    }
}

fn decode_pcm16(b64: &str) -> Option<Vec<i16>> {
    let raw = BASE64.decode(b64).ok()?;
    Some(
        raw.chunks_exact(2)
            .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
            .collect(),
    )
}

fn encode_pcm16(pcm: &[i16]) -> String {
    let mut raw = Vec::with_capacity(pcm.len() * 2);
    for sample in pcm {
        raw.extend_from_slice(&sample.to_le_bytes());
    }
    BASE64.encode(raw)
}

/// One backend session. Sends are non-blocking; a closed socket drops the
/// frame silently and call-level failure surfaces via the close callback.
pub struct SpeechSessionClient {
    shared: Arc<Shared>,
    outbound: mpsc::UnboundedSender<Message>,
    negotiated_rx: watch::Receiver<Option<SessionNegotiationResult>>,
}

impl SpeechSessionClient {
    /// Open the backend socket, bounded by the configured connect timeout.
    pub async fn connect(config: &BridgeConfig, call_id: &str) -> Result<Self, BridgeError> {
        let url = config.backend_url_with_model();
        let mut request = url
            .into_client_request()
            .map_err(|e| BridgeError::Connect(e.to_string()))?;

        let auth = HeaderValue::from_str(&format!("Bearer {}", config.api_key))
            .map_err(|_| BridgeError::Config("api key is not header-safe".to_string()))?;
        request.headers_mut().insert(AUTHORIZATION, auth);
        request
            .headers_mut()
            .insert("OpenAI-Beta", HeaderValue::from_static("realtime=v1"));

        let (stream, _) = tokio::time::timeout(config.connect_timeout, connect_async(request))
            .await
            .map_err(|_| BridgeError::ConnectTimeout(config.connect_timeout))?
            .map_err(|e| BridgeError::Connect(e.to_string()))?;
        info!(call_id, "backend socket open");

        let (mut write, mut read) = stream.split();
        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Message>();
        let (negotiated_tx, negotiated_rx) = watch::channel(None);

        let shared = Arc::new(Shared {
            call_id: call_id.to_string(),
            closed: AtomicBool::new(false),
            audio_subs: Mutex::new(Vec::new()),
            transcript_subs: Mutex::new(Vec::new()),
            close_subs: Mutex::new(Vec::new()),
            negotiated_tx,
        });

        tokio::spawn(async move {
            while let Some(msg) = out_rx.recv().await {
                let closing = matches!(msg, Message::Close(_));
                if write.send(msg).await.is_err() || closing {
                    break;
                }
            }
            let _ = write.close().await;
        });

        let reader_shared = shared.clone();
        tokio::spawn(async move {
            while let Some(msg) = read.next().await {
                match msg {
                    Ok(Message::Text(text)) => reader_shared.handle_text(&text),
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(e) => {
                        warn!(call_id = %reader_shared.call_id, error = %e, "backend read failed");
                        break;
                    }
                }
            }
            reader_shared.mark_closed();
        });

        Ok(Self {
            shared,
            outbound: out_tx,
            negotiated_rx,
        })
    }

    /// Send the one-shot `session.update`.
    pub fn initialize_session(&self, settings: SessionSettings) {
        self.send_event(&ClientEvent::SessionUpdate { session: settings });
    }

    /// Wait for the backend to acknowledge the session.
    pub async fn await_negotiation(
        &self,
        wait: Duration,
    ) -> Result<SessionNegotiationResult, BridgeError> {
        let mut rx = self.negotiated_rx.clone();
        let settled = async {
            loop {
                let current = rx.borrow().clone();
                if let Some(result) = current {
                    return Ok(result);
                }
                if rx.changed().await.is_err() {
                    return Err(BridgeError::Negotiation(
                        "backend closed before the session was established".to_string(),
                    ));
                }
            }
        };
        tokio::time::timeout(wait, settled)
            .await
            .map_err(|_| BridgeError::Negotiation(format!("no session event within {wait:?}")))?
    }

    /// Forward caller audio (PCM16 at the backend rate) and ask for output.
    pub fn send_audio(&self, pcm: &[i16]) {
        if pcm.is_empty() {
            return;
        }
        self.send_event(&ClientEvent::InputAudioBufferAppend {
            audio: encode_pcm16(pcm),
        });
        self.send_event(&ClientEvent::ResponseCreate);
    }

    /// Inject a user text turn.
    pub fn send_text(&self, text: &str) {
        self.send_event(&ClientEvent::ConversationItemCreate {
            item: ConversationItem::user_text(text),
        });
        self.send_event(&ClientEvent::ResponseCreate);
    }

    pub fn on_output_audio_delta(&self, callback: AudioDeltaCallback) {
        if let Ok(mut subs) = self.shared.audio_subs.lock() {
            subs.push(callback);
        }
    }

    pub fn on_transcript(&self, callback: TranscriptCallback) {
        if let Ok(mut subs) = self.shared.transcript_subs.lock() {
            subs.push(callback);
        }
    }

    pub fn on_close(&self, callback: CloseCallback) {
        if let Ok(mut subs) = self.shared.close_subs.lock() {
            subs.push(callback);
        }
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::SeqCst)
    }

    /// Idempotent: the first call queues a close frame, later calls no-op.
    pub fn close(&self) {
        if !self.shared.closed.swap(true, Ordering::SeqCst) {
            let _ = self.outbound.send(Message::Close(None));
        }
    }

    fn send_event(&self, event: &ClientEvent) {
        if self.is_closed() {
            return;
        }
        match serde_json::to_string(event) {
            Ok(json) => {
                // A dead writer means the socket is gone; drop the frame.
                let _ = self.outbound.send(Message::Text(json.into()));
            }
            Err(e) => warn!(call_id = %self.shared.call_id, error = %e, "unserializable event"),
        }
    }

    /// Client with no socket behind it; every send is a silent drop.
    #[cfg(test)]
    pub(crate) fn detached(call_id: &str) -> Self {
        let (out_tx, _out_rx) = mpsc::unbounded_channel();
        let (negotiated_tx, negotiated_rx) = watch::channel(None);
        Self {
            shared: Arc::new(Shared {
                call_id: call_id.to_string(),
                closed: AtomicBool::new(false),
                audio_subs: Mutex::new(Vec::new()),
                transcript_subs: Mutex::new(Vec::new()),
                close_subs: Mutex::new(Vec::new()),
                negotiated_tx,
            }),
            outbound: out_tx,
            negotiated_rx,
        }
    }

    /// Feed a raw backend event as if it arrived on the socket.
    #[cfg(test)]
    pub(crate) fn inject_server_text(&self, text: &str) {
        self.shared.handle_text(text);
    }

    /// Simulate the socket dropping.
    #[cfg(test)]
    pub(crate) fn simulate_close(&self) {
        self.shared.mark_closed();
    }
}
