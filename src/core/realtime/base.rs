//! Base traits and types for the remote speech session.
//!
//! A remote speech session is one full-duplex conversation with an
//! empathic speech-to-speech service: caller audio goes up, and a stream of
//! typed [`InboundEvent`]s (transcripts, emotion scores, synthesized audio,
//! interruptions, errors) comes back.
//!
//! # Audio Format
//!
//! Sessions declare the PCM16 layout they accept and the layout of the audio
//! they emit through [`SpeechSession::input_format`] and
//! [`SpeechSession::output_format`].

use async_trait::async_trait;
use bytes::Bytes;
use serde::de::{Deserialize, Deserializer, MapAccess, Visitor};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::core::audio::AudioFormat;

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur during remote session operations.
#[derive(Debug, Error)]
pub enum RealtimeError {
    /// A required credential or identifier is absent
    #[error("Missing credential: {0}")]
    MissingCredential(String),

    /// Connection to the provider failed
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// WebSocket error
    #[error("WebSocket error: {0}")]
    WebSocketError(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Operation timeout
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// Not connected
    #[error("Not connected")]
    NotConnected,

    /// Session error
    #[error("Session error: {0}")]
    SessionError(String),
}

/// Result type for remote session operations.
pub type RealtimeResult<T> = Result<T, RealtimeError>;

// =============================================================================
// Connection State
// =============================================================================

/// Transport-level state of a remote session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Failed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

// =============================================================================
// Emotion Scores
// =============================================================================

/// Emotion name to intensity mapping, kept in the order the provider sent it.
///
/// Order matters for [`EmotionScores::top`]: equal scores keep their original
/// relative order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EmotionScores(Vec<(String, f32)>);

impl EmotionScores {
    pub fn new(scores: Vec<(String, f32)>) -> Self {
        Self(scores)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f32)> {
        self.0.iter().map(|(name, score)| (name.as_str(), *score))
    }

    /// The `n` highest scores in descending order.
    pub fn top(&self, n: usize) -> Vec<(&str, f32)> {
        let mut ranked: Vec<(&str, f32)> = self.iter().collect();
        // sort_by is stable
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1));
        ranked.truncate(n);
        ranked
    }

    /// `name (0.90) | name (0.40)` rendering of the top `n` scores.
    pub fn summary(&self, n: usize) -> String {
        self.top(n)
            .iter()
            .map(|(name, score)| format!("{name} ({score:.2})"))
            .collect::<Vec<_>>()
            .join(" | ")
    }
}

impl<S: Into<String>> FromIterator<(S, f32)> for EmotionScores {
    fn from_iter<I: IntoIterator<Item = (S, f32)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }
}

impl<'de> Deserialize<'de> for EmotionScores {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct ScoresVisitor;

        impl<'de> Visitor<'de> for ScoresVisitor {
            type Value = EmotionScores;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a map of emotion names to scores")
            }

            fn visit_map<A>(self, mut map: A) -> Result<Self::Value, A::Error>
            where
                A: MapAccess<'de>,
            {
                let mut scores = Vec::with_capacity(map.size_hint().unwrap_or(48));
                while let Some((name, score)) = map.next_entry::<String, f32>()? {
                    scores.push((name, score));
                }
                Ok(EmotionScores(scores))
            }
        }

        deserializer.deserialize_map(ScoresVisitor)
    }
}

// =============================================================================
// Inbound Events
// =============================================================================

/// Typed event received from a remote speech session.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundEvent {
    /// Session metadata, sent once after the handshake.
    ChatMetadata {
        chat_id: String,
        chat_group_id: Option<String>,
    },
    /// Transcript of the caller's speech with emotion scores.
    UserMessage {
        text: String,
        prosody: Option<EmotionScores>,
        interim: bool,
    },
    /// Text of the assistant's reply.
    AssistantMessage { text: String },
    /// Decoded PCM16 audio in the session's output format.
    AudioOutput { payload: Bytes },
    /// The caller started speaking over the assistant.
    UserInterruption,
    /// Application error reported by the remote service.
    Error { code: String, message: String },
    /// A message type this bridge does not model.
    Unknown { kind: String },
}

impl InboundEvent {
    /// Wire tag of the event, used for logging.
    pub fn kind(&self) -> &str {
        match self {
            InboundEvent::ChatMetadata { .. } => "chat_metadata",
            InboundEvent::UserMessage { .. } => "user_message",
            InboundEvent::AssistantMessage { .. } => "assistant_message",
            InboundEvent::AudioOutput { .. } => "audio_output",
            InboundEvent::UserInterruption => "user_interruption",
            InboundEvent::Error { .. } => "error",
            InboundEvent::Unknown { kind } => kind,
        }
    }
}

/// Ordered stream of inbound events. Ends when the session closes.
pub type EventStream = mpsc::Receiver<InboundEvent>;

// =============================================================================
// Session Traits
// =============================================================================

/// One conversation with a remote speech service.
///
/// All methods take `&self` so one session handle can be shared between the
/// event loop and the forwarding pumps.
#[async_trait]
pub trait SpeechSession: Send + Sync {
    /// Perform the handshake and return the inbound event stream.
    async fn connect(&self) -> RealtimeResult<EventStream>;

    /// Publish one chunk of PCM16 audio in [`Self::input_format`].
    async fn send_audio(&self, audio: Bytes) -> RealtimeResult<()>;

    /// Close the session. Safe to call more than once.
    async fn disconnect(&self) -> RealtimeResult<()>;

    fn connection_state(&self) -> ConnectionState;

    /// Layout of audio accepted by [`Self::send_audio`].
    fn input_format(&self) -> AudioFormat;

    /// Layout of [`InboundEvent::AudioOutput`] payloads.
    fn output_format(&self) -> AudioFormat;
}

/// Creates one fresh session per call.
pub trait SpeechSessionFactory: Send + Sync {
    fn create(&self, call_id: &str) -> RealtimeResult<Arc<dyn SpeechSession>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scores() -> EmotionScores {
        EmotionScores::from_iter([("joy", 0.9), ("calm", 0.4), ("anger", 0.1), ("sadness", 0.3)])
    }

    #[test]
    fn test_top_three_descending() {
        let scores = scores();
        let top = scores.top(3);
        assert_eq!(top, vec![("joy", 0.9), ("calm", 0.4), ("sadness", 0.3)]);
    }

    #[test]
    fn test_top_ties_keep_original_order() {
        let scores = EmotionScores::from_iter([("b", 0.5), ("a", 0.5), ("c", 0.7), ("d", 0.5)]);
        let top = scores.top(3);
        assert_eq!(top, vec![("c", 0.7), ("b", 0.5), ("a", 0.5)]);
    }

    #[test]
    fn test_top_more_than_available() {
        let scores = EmotionScores::from_iter([("joy", 0.2)]);
        assert_eq!(scores.top(3).len(), 1);
        assert!(EmotionScores::default().top(3).is_empty());
    }

    #[test]
    fn test_summary_format() {
        assert_eq!(scores().summary(2), "joy (0.90) | calm (0.40)");
    }

    #[test]
    fn test_deserialize_preserves_wire_order() {
        let json = r#"{"Tiredness": 0.5, "Awe": 0.5, "Joy": 0.1}"#;
        let scores: EmotionScores = serde_json::from_str(json).unwrap();
        let names: Vec<&str> = scores.iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["Tiredness", "Awe", "Joy"]);
        assert_eq!(scores.top(1), vec![("Tiredness", 0.5)]);
    }

    #[test]
    fn test_event_kind() {
        assert_eq!(InboundEvent::UserInterruption.kind(), "user_interruption");
        assert_eq!(
            InboundEvent::Unknown {
                kind: "assistant_end".to_string()
            }
            .kind(),
            "assistant_end"
        );
    }

    #[test]
    fn test_connection_state_display() {
        assert_eq!(ConnectionState::Connected.to_string(), "connected");
        assert_eq!(ConnectionState::default(), ConnectionState::Disconnected);
    }
}
