//! Hume EVI WebSocket message types.
//!
//! # Message Flow
//!
//! ```text
//! Client → Server:
//!   - SessionSettings (configure audio format)
//!   - AudioInput (base64-encoded audio chunks)
//!
//! Server → Client:
//!   - ChatMetadata (on connection)
//!   - UserMessage (transcription + prosody)
//!   - AssistantMessage (response text)
//!   - AudioOutput (response audio, base64 WAV)
//!   - UserInterruption (caller barged in)
//!   - Error (error occurred)
//! ```
//!
//! Any other server message type decodes to [`EVIServerMessage::Unknown`].

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use serde::{Deserialize, Serialize};

use crate::core::realtime::base::EmotionScores;

// =============================================================================
// Constants
// =============================================================================

/// Hume EVI WebSocket endpoint URL.
pub const HUME_EVI_WEBSOCKET_URL: &str = "wss://api.hume.ai/v0/evi/chat";

/// Default sample rate for EVI audio input on phone calls (Hz).
pub const HUME_EVI_DEFAULT_SAMPLE_RATE: u32 = 16_000;

/// Default number of audio channels (mono).
pub const HUME_EVI_DEFAULT_CHANNELS: u16 = 1;

// =============================================================================
// Client → Server Messages
// =============================================================================

/// Messages sent from client to Hume EVI server.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EVIClientMessage {
    /// Configure session settings (audio format).
    SessionSettings(SessionSettings),
    /// Send audio input chunk.
    AudioInput(AudioInput),
}

/// Session settings for configuring audio input format.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSettings {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio: Option<AudioSettings>,
}

/// Audio format settings.
#[derive(Debug, Clone, Serialize)]
pub struct AudioSettings {
    /// Encoding format (linear16 or webm).
    pub encoding: AudioEncoding,
    /// Sample rate in Hz.
    pub sample_rate: u32,
    /// Number of channels.
    pub channels: u16,
}

/// Supported audio encodings for EVI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioEncoding {
    /// Linear 16-bit PCM, little-endian.
    #[default]
    Linear16,
    /// WebM container format.
    Webm,
}

/// Audio input message containing base64-encoded audio.
#[derive(Debug, Clone, Serialize)]
pub struct AudioInput {
    /// Base64-encoded audio data.
    pub data: String,
}

impl AudioInput {
    /// Create new AudioInput from raw audio bytes.
    pub fn from_bytes(audio_data: &[u8]) -> Self {
        Self {
            data: BASE64.encode(audio_data),
        }
    }
}

// =============================================================================
// Server → Client Messages
// =============================================================================

/// Messages received from Hume EVI server.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EVIServerMessage {
    /// Chat metadata on connection.
    ChatMetadata(ChatMetadata),
    /// User message with transcription and prosody.
    UserMessage(UserMessage),
    /// The user started speaking while the assistant was talking.
    UserInterruption(UserInterruption),
    /// Assistant message (response text).
    AssistantMessage(AssistantMessage),
    /// Audio output chunk.
    AudioOutput(AudioOutput),
    /// Error message.
    Error(EVIError),
    /// Any other message type.
    #[serde(other)]
    Unknown,
}

/// Chat metadata received on WebSocket connection.
#[derive(Debug, Clone, Deserialize)]
pub struct ChatMetadata {
    /// Chat ID for this session.
    pub chat_id: String,
    /// Chat group ID for resuming conversations.
    #[serde(default)]
    pub chat_group_id: Option<String>,
    #[serde(default)]
    pub request_id: Option<String>,
}

/// User message with transcription and prosody scores.
#[derive(Debug, Clone, Deserialize)]
pub struct UserMessage {
    #[serde(default)]
    pub id: Option<String>,
    /// Transcribed text.
    #[serde(default)]
    pub message: Option<ChatMessage>,
    /// Prosody scores (emotional expression).
    #[serde(default)]
    pub models: Option<ProsodyModels>,
    /// Whether this is an interim transcript.
    #[serde(default)]
    pub interim: Option<bool>,
}

/// Role and content of a transcript message.
#[derive(Debug, Clone, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    #[serde(default)]
    pub content: Option<String>,
}

/// Prosody models container.
#[derive(Debug, Clone, Deserialize)]
pub struct ProsodyModels {
    #[serde(default)]
    pub prosody: Option<ProsodyData>,
}

/// Prosody data container.
#[derive(Debug, Clone, Deserialize)]
pub struct ProsodyData {
    /// Emotion scores in wire order.
    #[serde(default)]
    pub scores: Option<EmotionScores>,
}

/// User interruption event.
#[derive(Debug, Clone, Deserialize)]
pub struct UserInterruption {
    /// Interruption time in milliseconds.
    #[serde(default)]
    pub time: Option<u64>,
}

/// Assistant message (response text).
#[derive(Debug, Clone, Deserialize)]
pub struct AssistantMessage {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub message: Option<ChatMessage>,
}

/// Audio output chunk from assistant.
#[derive(Debug, Clone, Deserialize)]
pub struct AudioOutput {
    #[serde(default)]
    pub id: Option<String>,
    /// Base64-encoded WAV data.
    #[serde(default)]
    pub data: String,
}

impl AudioOutput {
    /// Decode the audio data to bytes.
    pub fn decode_audio(&self) -> Result<Vec<u8>, base64::DecodeError> {
        BASE64.decode(&self.data)
    }
}

/// EVI error message.
#[derive(Debug, Clone, Deserialize)]
pub struct EVIError {
    #[serde(default = "unknown_code")]
    pub code: String,
    #[serde(default)]
    pub slug: Option<String>,
    #[serde(default)]
    pub message: String,
}

fn unknown_code() -> String {
    "unknown".to_string()
}

impl ChatMessage {
    /// Message content, or an empty string when absent.
    pub fn text(&self) -> &str {
        self.content.as_deref().unwrap_or_default()
    }
}

impl UserMessage {
    /// Prosody scores if the message carried any.
    pub fn scores(&self) -> Option<&EmotionScores> {
        self.models
            .as_ref()?
            .prosody
            .as_ref()?
            .scores
            .as_ref()
            .filter(|s| !s.is_empty())
    }
}

// =============================================================================
// Helper Functions
// =============================================================================

/// Serialize a client message to JSON.
pub fn serialize_client_message(msg: &EVIClientMessage) -> Result<String, serde_json::Error> {
    serde_json::to_string(msg)
}

/// Deserialize a server message from JSON.
pub fn deserialize_server_message(json: &str) -> Result<EVIServerMessage, serde_json::Error> {
    serde_json::from_str(json)
}

/// Read only the `type` tag of a server message.
pub fn message_type(json: &str) -> Option<String> {
    #[derive(Deserialize)]
    struct Tag {
        #[serde(rename = "type")]
        kind: String,
    }

    serde_json::from_str::<Tag>(json).ok().map(|t| t.kind)
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serialize_session_settings() {
        let msg = EVIClientMessage::SessionSettings(SessionSettings {
            audio: Some(AudioSettings {
                encoding: AudioEncoding::Linear16,
                sample_rate: 16000,
                channels: 1,
            }),
        });

        let json: serde_json::Value =
            serde_json::from_str(&serialize_client_message(&msg).unwrap()).unwrap();
        assert_eq!(json["type"], "session_settings");
        assert_eq!(json["audio"]["encoding"], "linear16");
        assert_eq!(json["audio"]["sample_rate"], 16000);
        assert_eq!(json["audio"]["channels"], 1);
    }

    #[test]
    fn test_serialize_audio_input() {
        let msg = EVIClientMessage::AudioInput(AudioInput::from_bytes(&[1, 2, 3]));
        let json = serialize_client_message(&msg).unwrap();
        assert_eq!(json, r#"{"type":"audio_input","data":"AQID"}"#);
    }

    #[test]
    fn test_deserialize_chat_metadata() {
        let json = r#"{"type":"chat_metadata","chat_id":"chat_1","chat_group_id":"grp_1","request_id":"r"}"#;
        match deserialize_server_message(json).unwrap() {
            EVIServerMessage::ChatMetadata(meta) => {
                assert_eq!(meta.chat_id, "chat_1");
                assert_eq!(meta.chat_group_id.as_deref(), Some("grp_1"));
            }
            _ => panic!("Expected ChatMetadata"),
        }
    }

    #[test]
    fn test_deserialize_user_message_with_prosody() {
        let json = r#"{
            "type": "user_message",
            "id": "msg_1",
            "message": {"role": "user", "content": "I feel great"},
            "models": {"prosody": {"scores": {"Joy": 0.9, "Calmness": 0.4, "Anger": 0.1, "Sadness": 0.3}}},
            "interim": false
        }"#;

        match deserialize_server_message(json).unwrap() {
            EVIServerMessage::UserMessage(msg) => {
                assert_eq!(msg.message.as_ref().unwrap().text(), "I feel great");
                let scores = msg.scores().unwrap();
                assert_eq!(
                    scores.top(3),
                    vec![("Joy", 0.9), ("Calmness", 0.4), ("Sadness", 0.3)]
                );
            }
            _ => panic!("Expected UserMessage"),
        }
    }

    #[test]
    fn test_deserialize_user_message_without_models() {
        let json = r#"{"type":"user_message","message":{"role":"user","content":"hi"}}"#;
        match deserialize_server_message(json).unwrap() {
            EVIServerMessage::UserMessage(msg) => assert!(msg.scores().is_none()),
            _ => panic!("Expected UserMessage"),
        }
    }

    #[test]
    fn test_deserialize_audio_output() {
        let json = r#"{"type":"audio_output","id":"a1","index":0,"data":"AQID"}"#;
        match deserialize_server_message(json).unwrap() {
            EVIServerMessage::AudioOutput(out) => {
                assert_eq!(out.decode_audio().unwrap(), vec![1, 2, 3]);
            }
            _ => panic!("Expected AudioOutput"),
        }
    }

    #[test]
    fn test_deserialize_error() {
        let json = r#"{"type":"error","code":"I0100","slug":"internal","message":"boom"}"#;
        match deserialize_server_message(json).unwrap() {
            EVIServerMessage::Error(err) => {
                assert_eq!(err.code, "I0100");
                assert_eq!(err.message, "boom");
            }
            _ => panic!("Expected Error"),
        }
    }

    #[test]
    fn test_deserialize_unknown_type() {
        let json = r#"{"type":"assistant_end"}"#;
        assert!(matches!(
            deserialize_server_message(json).unwrap(),
            EVIServerMessage::Unknown
        ));
        assert_eq!(message_type(json).as_deref(), Some("assistant_end"));
    }

    #[test]
    fn test_deserialize_user_interruption() {
        let json = r#"{"type":"user_interruption","time":1200}"#;
        match deserialize_server_message(json).unwrap() {
            EVIServerMessage::UserInterruption(i) => assert_eq!(i.time, Some(1200)),
            _ => panic!("Expected UserInterruption"),
        }
    }
}
