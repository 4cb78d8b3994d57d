//! Typed wire events for the realtime speech backend.

use serde::{Deserialize, Serialize};

/// Server-side voice activity detection settings.
#[derive(Debug, Clone, Serialize)]
pub struct TurnDetection {
    #[serde(rename = "type")]
    pub kind: String,
    pub threshold: f32,
    pub prefix_padding_ms: u32,
    pub silence_duration_ms: u32,
}

impl Default for TurnDetection {
    fn default() -> Self {
        Self {
            kind: "server_vad".to_string(),
            threshold: 0.5,
            prefix_padding_ms: 300,
            silence_duration_ms: 500,
        }
    }
}

/// Payload of the one-shot `session.update` sent after connect.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSettings {
    pub voice: String,
    pub instructions: String,
    pub input_audio_format: String,
    pub output_audio_format: String,
    pub turn_detection: TurnDetection,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_audio_transcription: Option<TranscriptionSettings>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TranscriptionSettings {
    pub model: String,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            voice: "alloy".to_string(),
            instructions: String::new(),
            // The backend leg runs PCM16 at 24 kHz.
            input_audio_format: "pcm16".to_string(),
            output_audio_format: "pcm16".to_string(),
            turn_detection: TurnDetection::default(),
            input_audio_transcription: Some(TranscriptionSettings {
                model: "whisper-1".to_string(),
            }),
        }
    }
}

/// A user message item for `conversation.item.create`.
#[derive(Debug, Clone, Serialize)]
pub struct ConversationItem {
    #[serde(rename = "type")]
    pub kind: String,
    pub role: String,
    pub content: Vec<ContentPart>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ContentPart {
    #[serde(rename = "type")]
    pub kind: String,
    pub text: String,
}

impl ConversationItem {
    pub fn user_text(text: &str) -> Self {
        Self {
            kind: "message".to_string(),
            role: "user".to_string(),
            content: vec![ContentPart {
                kind: "input_text".to_string(),
                text: text.to_string(),
            }],
        }
    }
}

/// Events this client sends.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum ClientEvent {
    #[serde(rename = "session.update")]
    SessionUpdate { session: SessionSettings },
    #[serde(rename = "input_audio_buffer.append")]
    InputAudioBufferAppend { audio: String },
    #[serde(rename = "response.create")]
    ResponseCreate,
    #[serde(rename = "conversation.item.create")]
    ConversationItemCreate { item: ConversationItem },
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SessionInfo {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub voice: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
}

/// Events the backend sends. Unknown types collapse into `Unknown`.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum ServerEvent {
    #[serde(rename = "session.created")]
    SessionCreated {
        #[serde(default)]
        session: SessionInfo,
    },
    #[serde(rename = "session.updated")]
    SessionUpdated {
        #[serde(default)]
        session: SessionInfo,
    },
    #[serde(rename = "response.audio.delta")]
    AudioDelta { delta: String },
    #[serde(rename = "response.output_audio.delta")]
    OutputAudioDelta { delta: String },
    #[serde(rename = "response.audio_transcript.delta")]
    AudioTranscriptDelta { delta: String },
    #[serde(rename = "conversation.item.input_audio_transcription.completed")]
    InputTranscriptionCompleted { transcript: String },
    #[serde(rename = "error")]
    Error { error: serde_json::Value },
    #[serde(other)]
    Unknown,
}

/// What session negotiation produced.
#[derive(Debug, Clone)]
pub struct SessionNegotiationResult {
    pub backend_session_id: Option<String>,
    pub voice: Option<String>,
    pub model: Option<String>,
}

impl From<SessionInfo> for SessionNegotiationResult {
    fn from(info: SessionInfo) -> Self {
        Self {
            backend_session_id: info.id,
            voice: info.voice,
            model: info.model,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_update_wire_shape() {
        let event = ClientEvent::SessionUpdate {
            session: SessionSettings::default(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "session.update");
        assert_eq!(json["session"]["turn_detection"]["type"], "server_vad");
        assert_eq!(json["session"]["input_audio_format"], "pcm16");
    }

    #[test]
    fn response_create_is_bare() {
        let json = serde_json::to_string(&ClientEvent::ResponseCreate).unwrap();
        assert_eq!(json, r#"{"type":"response.create"}"#);
    }

    #[test]
    fn user_text_item_shape() {
        let event = ClientEvent::ConversationItemCreate {
            item: ConversationItem::user_text("hello"),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["item"]["role"], "user");
        assert_eq!(json["item"]["content"][0]["type"], "input_text");
        assert_eq!(json["item"]["content"][0]["text"], "hello");
    }

    #[test]
    fn audio_delta_parses() {
        let json = r#"{"type":"response.audio.delta","delta":"AAA=","response_id":"r1"}"#;
        let event: ServerEvent = serde_json::from_str(json).unwrap();
        assert!(matches!(event, ServerEvent::AudioDelta { delta } if delta == "AAA="));
    }

    #[test]
    fn transcription_completed_parses() {
        let json = r#"{"type":"conversation.item.input_audio_transcription.completed","transcript":"hi there"}"#;
        let event: ServerEvent = serde_json::from_str(json).unwrap();
        assert!(matches!(
            event,
            ServerEvent::InputTranscriptionCompleted { transcript } if transcript == "hi there"
        ));
    }

    #[test]
    fn unknown_server_event() {
        let json = r#"{"type":"rate_limits.updated","rate_limits":[]}"#;
        let event: ServerEvent = serde_json::from_str(json).unwrap();
        assert!(matches!(event, ServerEvent::Unknown));
    }
}
