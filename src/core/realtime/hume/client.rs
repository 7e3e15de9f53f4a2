//! Hume EVI WebSocket client implementation.
//!
//! This module implements [`SpeechSession`] for Hume's Empathic Voice
//! Interface (EVI). One [`HumeEVI`] is one chat: caller audio is published
//! as base64 `audio_input` messages and every server message is decoded once
//! into an [`InboundEvent`] on the returned event stream.
//!
//! # Example
//!
//! ```rust,ignore
//! use mello_phone_agent::core::realtime::hume::{HumeEVI, HumeEVIConfig};
//! use mello_phone_agent::core::realtime::SpeechSession;
//!
//! let config = HumeEVIConfig::new("your-api-key").with_config_id("your-config-id");
//! let evi = HumeEVI::from_hume_config(config)?;
//! let mut events = evi.connect().await?;
//!
//! evi.send_audio(audio_bytes).await?;
//! while let Some(event) = events.recv().await {
//!     println!("{}", event.kind());
//! }
//! ```

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message};
use tracing::{debug, error, info, trace, warn};

use super::config::HumeEVIConfig;
use super::messages::{
    AudioInput, AudioSettings, EVIClientMessage, EVIServerMessage, SessionSettings,
    deserialize_server_message, message_type, serialize_client_message,
};
use crate::core::audio::{AudioFormat, WavDecoder};
use crate::core::realtime::base::{
    ConnectionState, EventStream, InboundEvent, RealtimeError, RealtimeResult, SpeechSession,
    SpeechSessionFactory,
};

/// Inbound events buffered between the socket reader and the bridge.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Client messages queued for the socket writer. Audio beyond this is
/// dropped rather than buffered while the socket is stalled.
const OUTGOING_CHANNEL_CAPACITY: usize = 64;

/// How long `disconnect` waits for the socket task to send its close frame.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

// =============================================================================
// HumeEVI Client
// =============================================================================

/// Hume EVI (Empathic Voice Interface) session.
pub struct HumeEVI {
    /// Configuration for this EVI session.
    config: HumeEVIConfig,

    /// Current connection state.
    state: Arc<RwLock<ConnectionState>>,

    /// WebSocket sender for outgoing messages.
    ws_sender: Mutex<Option<mpsc::Sender<EVIClientMessage>>>,

    /// Chat metadata from connection.
    chat_metadata: Arc<RwLock<Option<ChatMetadataInfo>>>,

    /// Handle to the socket task.
    task_handle: Mutex<Option<JoinHandle<()>>>,
}

/// Chat metadata information.
#[derive(Debug, Clone)]
struct ChatMetadataInfo {
    chat_id: String,
    chat_group_id: Option<String>,
}

impl HumeEVI {
    /// Create a new HumeEVI client from HumeEVIConfig.
    pub fn from_hume_config(config: HumeEVIConfig) -> RealtimeResult<Self> {
        config.validate()?;

        Ok(Self {
            config,
            state: Arc::new(RwLock::new(ConnectionState::Disconnected)),
            ws_sender: Mutex::new(None),
            chat_metadata: Arc::new(RwLock::new(None)),
            task_handle: Mutex::new(None),
        })
    }

    /// Get the chat ID for the current session.
    pub fn chat_id(&self) -> Option<String> {
        self.chat_metadata.read().as_ref().map(|m| m.chat_id.clone())
    }

    /// Get the chat group ID for resuming conversations.
    pub fn chat_group_id(&self) -> Option<String> {
        self.chat_metadata
            .read()
            .as_ref()
            .and_then(|m| m.chat_group_id.clone())
    }

    /// Queue a client message for the socket writer.
    ///
    /// Audio input is dropped when the queue is full; other messages fail.
    fn send_message(&self, msg: EVIClientMessage) -> RealtimeResult<()> {
        let guard = self.ws_sender.lock();
        let sender = guard.as_ref().ok_or(RealtimeError::NotConnected)?;

        match sender.try_send(msg) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(EVIClientMessage::AudioInput(_))) => {
                debug!("EVI send queue full, dropping audio input");
                Ok(())
            }
            Err(mpsc::error::TrySendError::Full(_)) => Err(RealtimeError::WebSocketError(
                "Failed to queue message: send queue full".to_string(),
            )),
            Err(mpsc::error::TrySendError::Closed(_)) => Err(RealtimeError::WebSocketError(
                "Failed to queue message: socket closed".to_string(),
            )),
        }
    }

    /// Session settings announcing the PCM layout we send.
    fn session_settings(&self) -> EVIClientMessage {
        EVIClientMessage::SessionSettings(SessionSettings {
            audio: Some(AudioSettings {
                encoding: self.config.input_encoding,
                sample_rate: self.config.sample_rate,
                channels: self.config.channels,
            }),
        })
    }

    /// Main socket loop: writes queued client messages and decodes server
    /// messages into events until either side closes.
    async fn message_loop(
        mut ws_write: SplitSink<WsStream, Message>,
        mut ws_read: SplitStream<WsStream>,
        mut rx: mpsc::Receiver<EVIClientMessage>,
        events: mpsc::Sender<InboundEvent>,
        state: Arc<RwLock<ConnectionState>>,
        chat_metadata: Arc<RwLock<Option<ChatMetadataInfo>>>,
        output_format: AudioFormat,
    ) {
        let mut decoder = WavDecoder::new(output_format);
        loop {
            tokio::select! {
                outgoing = rx.recv() => {
                    let Some(msg) = outgoing else {
                        // Sender dropped by disconnect
                        let _ = ws_write.send(Message::Close(None)).await;
                        break;
                    };
                    match serialize_client_message(&msg) {
                        Ok(json) => {
                            trace!("Sending EVI message: {}", json.chars().take(100).collect::<String>());
                            if let Err(e) = ws_write.send(Message::Text(json.into())).await {
                                error!("Failed to send WebSocket message: {e}");
                                break;
                            }
                        }
                        Err(e) => {
                            error!("Failed to serialize message: {e}");
                        }
                    }
                }

                incoming = ws_read.next() => {
                    let event = match incoming {
                        Some(Ok(Message::Text(text))) => {
                            trace!("Received EVI message: {}", text.chars().take(100).collect::<String>());
                            Self::handle_server_message(&text, &chat_metadata, &mut decoder)
                        }
                        Some(Ok(Message::Binary(data))) => {
                            debug!("Received binary message: {} bytes", data.len());
                            Self::decode_audio(&data, &mut decoder)
                        }
                        Some(Ok(Message::Close(frame))) => {
                            info!("WebSocket closed: {:?}", frame);
                            break;
                        }
                        Some(Ok(Message::Ping(data))) => {
                            let _ = ws_write.send(Message::Pong(data)).await;
                            None
                        }
                        Some(Ok(_)) => None,
                        Some(Err(e)) => {
                            error!("WebSocket error: {e}");
                            break;
                        }
                        None => break,
                    };

                    if let Some(event) = event
                        && events.send(event).await.is_err()
                    {
                        debug!("Event receiver dropped, closing EVI socket");
                        let _ = ws_write.send(Message::Close(None)).await;
                        break;
                    }
                }
            }
        }

        *state.write() = ConnectionState::Disconnected;
        info!("Hume EVI message loop ended");
    }

    /// Decode one text frame into an event.
    fn handle_server_message(
        text: &str,
        chat_metadata: &RwLock<Option<ChatMetadataInfo>>,
        decoder: &mut WavDecoder,
    ) -> Option<InboundEvent> {
        let msg = match deserialize_server_message(text) {
            Ok(m) => m,
            Err(e) => {
                warn!("Failed to deserialize EVI message: {e}");
                return None;
            }
        };

        match msg {
            EVIServerMessage::ChatMetadata(meta) => {
                *chat_metadata.write() = Some(ChatMetadataInfo {
                    chat_id: meta.chat_id.clone(),
                    chat_group_id: meta.chat_group_id.clone(),
                });
                Some(InboundEvent::ChatMetadata {
                    chat_id: meta.chat_id,
                    chat_group_id: meta.chat_group_id,
                })
            }

            EVIServerMessage::UserMessage(user_msg) => Some(InboundEvent::UserMessage {
                text: user_msg
                    .message
                    .as_ref()
                    .map(|m| m.text().to_string())
                    .unwrap_or_default(),
                prosody: user_msg.scores().cloned(),
                interim: user_msg.interim.unwrap_or(false),
            }),

            EVIServerMessage::AssistantMessage(asst_msg) => Some(InboundEvent::AssistantMessage {
                text: asst_msg
                    .message
                    .as_ref()
                    .map(|m| m.text().to_string())
                    .unwrap_or_default(),
            }),

            EVIServerMessage::AudioOutput(output) => match output.decode_audio() {
                Ok(data) => Self::decode_audio(&data, decoder),
                Err(e) => {
                    warn!("Failed to decode audio output: {e}");
                    None
                }
            },

            EVIServerMessage::UserInterruption(interruption) => {
                trace!("User interruption at {:?}ms", interruption.time);
                Some(InboundEvent::UserInterruption)
            }

            EVIServerMessage::Error(err) => Some(InboundEvent::Error {
                code: err.code,
                message: err.message,
            }),

            EVIServerMessage::Unknown => Some(InboundEvent::Unknown {
                kind: message_type(text).unwrap_or_else(|| "unknown".to_string()),
            }),
        }
    }

    /// Strip the WAV container from an audio chunk.
    fn decode_audio(data: &[u8], decoder: &mut WavDecoder) -> Option<InboundEvent> {
        match decoder.decode(data) {
            Ok(payload) if payload.is_empty() => None,
            Ok(payload) => Some(InboundEvent::AudioOutput { payload }),
            Err(e) => {
                warn!("Failed to decode WAV audio chunk: {e}");
                None
            }
        }
    }
}

// =============================================================================
// SpeechSession Implementation
// =============================================================================

#[async_trait]
impl SpeechSession for HumeEVI {
    async fn connect(&self) -> RealtimeResult<EventStream> {
        {
            let mut state = self.state.write();
            if matches!(
                *state,
                ConnectionState::Connecting | ConnectionState::Connected
            ) {
                return Err(RealtimeError::SessionError(format!(
                    "Session already {}",
                    *state
                )));
            }
            *state = ConnectionState::Connecting;
        }

        let url = self.config.build_websocket_url();
        debug!(
            "Connecting to Hume EVI: {}",
            url.split('?').next().unwrap_or(&url)
        );

        let connect_timeout = Duration::from_secs(self.config.connection_timeout_seconds);
        let (ws_stream, response) = match timeout(connect_timeout, connect_async(&url)).await {
            Ok(Ok(connected)) => connected,
            Ok(Err(e)) => {
                *self.state.write() = ConnectionState::Failed;
                return Err(RealtimeError::ConnectionFailed(format!(
                    "WebSocket connection failed: {e}"
                )));
            }
            Err(_) => {
                *self.state.write() = ConnectionState::Failed;
                return Err(RealtimeError::Timeout("Connection timed out".to_string()));
            }
        };

        info!("Connected to Hume EVI (status: {})", response.status());

        let (ws_write, ws_read) = ws_stream.split();
        let (tx, rx) = mpsc::channel(OUTGOING_CHANNEL_CAPACITY);
        let (events_tx, events_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);

        // Queue settings before the loop starts so they go out first
        tx.try_send(self.session_settings())
            .map_err(|e| RealtimeError::WebSocketError(format!("Failed to queue message: {e}")))?;
        *self.ws_sender.lock() = Some(tx);

        let handle = tokio::spawn(Self::message_loop(
            ws_write,
            ws_read,
            rx,
            events_tx,
            self.state.clone(),
            self.chat_metadata.clone(),
            self.output_format(),
        ));
        *self.task_handle.lock() = Some(handle);

        *self.state.write() = ConnectionState::Connected;

        Ok(events_rx)
    }

    async fn send_audio(&self, audio: Bytes) -> RealtimeResult<()> {
        self.send_message(EVIClientMessage::AudioInput(AudioInput::from_bytes(&audio)))
    }

    async fn disconnect(&self) -> RealtimeResult<()> {
        // Dropping the sender makes the loop send a close frame and exit
        self.ws_sender.lock().take();

        let handle = self.task_handle.lock().take();
        if let Some(mut handle) = handle
            && timeout(CLOSE_TIMEOUT, &mut handle).await.is_err()
        {
            warn!("Hume EVI socket did not close in time, aborting");
            handle.abort();
        }

        *self.state.write() = ConnectionState::Disconnected;
        info!("Disconnected from Hume EVI");

        Ok(())
    }

    fn connection_state(&self) -> ConnectionState {
        *self.state.read()
    }

    fn input_format(&self) -> AudioFormat {
        self.config.audio_format()
    }

    fn output_format(&self) -> AudioFormat {
        self.config.audio_format()
    }
}

// =============================================================================
// Session Factory
// =============================================================================

/// Builds one [`HumeEVI`] per call from a shared configuration template.
#[derive(Debug, Clone)]
pub struct HumeSessionFactory {
    config: HumeEVIConfig,
}

impl HumeSessionFactory {
    pub fn new(config: HumeEVIConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &HumeEVIConfig {
        &self.config
    }
}

impl SpeechSessionFactory for HumeSessionFactory {
    fn create(&self, call_id: &str) -> RealtimeResult<Arc<dyn SpeechSession>> {
        debug!(call_id = %call_id, "Creating Hume EVI session");
        Ok(Arc::new(HumeEVI::from_hume_config(self.config.clone())?))
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;
    use tokio_tungstenite::accept_async;

    fn config() -> HumeEVIConfig {
        HumeEVIConfig::new("test-key").with_config_id("cfg_test")
    }

    fn format() -> AudioFormat {
        AudioFormat::mono(16_000)
    }

    fn decoder() -> WavDecoder {
        WavDecoder::new(format())
    }

    #[test]
    fn test_hume_evi_creation() {
        assert!(HumeEVI::from_hume_config(config()).is_ok());
    }

    #[test]
    fn test_hume_evi_creation_missing_credentials() {
        let result = HumeEVI::from_hume_config(HumeEVIConfig::default());
        assert!(matches!(result, Err(RealtimeError::MissingCredential(_))));
    }

    #[test]
    fn test_hume_evi_initial_state() {
        let evi = HumeEVI::from_hume_config(config()).unwrap();
        assert_eq!(evi.connection_state(), ConnectionState::Disconnected);
        assert!(evi.chat_id().is_none());
        assert_eq!(evi.input_format(), format());
    }

    #[tokio::test]
    async fn test_hume_evi_send_without_connection() {
        let evi = HumeEVI::from_hume_config(config()).unwrap();
        let result = evi.send_audio(Bytes::from_static(&[1, 2, 3])).await;
        assert!(matches!(result, Err(RealtimeError::NotConnected)));
    }

    #[tokio::test]
    async fn test_audio_dropped_when_send_queue_full() {
        let evi = HumeEVI::from_hume_config(config()).unwrap();
        let (tx, mut rx) = mpsc::channel(1);
        *evi.ws_sender.lock() = Some(tx);

        evi.send_audio(Bytes::from_static(&[1, 2])).await.unwrap();
        evi.send_audio(Bytes::from_static(&[3, 4])).await.unwrap();

        match rx.try_recv() {
            Ok(EVIClientMessage::AudioInput(input)) => assert_eq!(input.data, "AQI="),
            other => panic!("Expected first audio input, got {other:?}"),
        }
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_send_after_socket_closed_fails() {
        let evi = HumeEVI::from_hume_config(config()).unwrap();
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        *evi.ws_sender.lock() = Some(tx);

        let result = evi.send_audio(Bytes::from_static(&[1, 2])).await;
        assert!(matches!(result, Err(RealtimeError::WebSocketError(_))));
    }

    #[tokio::test]
    async fn test_disconnect_without_connection_is_ok() {
        let evi = HumeEVI::from_hume_config(config()).unwrap();
        assert!(evi.disconnect().await.is_ok());
        assert!(evi.disconnect().await.is_ok());
    }

    #[test]
    fn test_handle_server_message_user_message() {
        let meta = RwLock::new(None);
        let json = r#"{"type":"user_message","message":{"role":"user","content":"hello"},
            "models":{"prosody":{"scores":{"Joy":0.9,"Calmness":0.4}}},"interim":true}"#;

        match HumeEVI::handle_server_message(json, &meta, &mut decoder()) {
            Some(InboundEvent::UserMessage {
                text,
                prosody,
                interim,
            }) => {
                assert_eq!(text, "hello");
                assert!(interim);
                assert_eq!(prosody.unwrap().top(1), vec![("Joy", 0.9)]);
            }
            other => panic!("Expected UserMessage, got {other:?}"),
        }
    }

    #[test]
    fn test_handle_server_message_records_metadata() {
        let meta = RwLock::new(None);
        let json = r#"{"type":"chat_metadata","chat_id":"c1","chat_group_id":"g1"}"#;
        let event = HumeEVI::handle_server_message(json, &meta, &mut decoder());

        assert!(matches!(event, Some(InboundEvent::ChatMetadata { ref chat_id, .. }) if chat_id == "c1"));
        assert_eq!(meta.read().as_ref().unwrap().chat_id, "c1");
    }

    #[test]
    fn test_handle_server_message_unknown_keeps_tag() {
        let meta = RwLock::new(None);
        let event =
            HumeEVI::handle_server_message(r#"{"type":"assistant_end"}"#, &meta, &mut decoder());
        assert_eq!(
            event,
            Some(InboundEvent::Unknown {
                kind: "assistant_end".to_string()
            })
        );
    }

    #[test]
    fn test_handle_server_message_invalid_json() {
        let meta = RwLock::new(None);
        assert!(HumeEVI::handle_server_message("not json", &meta, &mut decoder()).is_none());
    }

    #[test]
    fn test_handle_server_message_raw_audio() {
        let meta = RwLock::new(None);
        // base64 of [1, 0, 2, 0]
        let json = r#"{"type":"audio_output","id":"a","data":"AQACAA=="}"#;
        let event = HumeEVI::handle_server_message(json, &meta, &mut decoder());
        assert_eq!(
            event,
            Some(InboundEvent::AudioOutput {
                payload: Bytes::from_static(&[1, 0, 2, 0])
            })
        );
    }

    #[tokio::test]
    async fn test_connect_sends_session_settings_first() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(stream).await.unwrap();
            let mut received = Vec::new();
            while let Some(Ok(msg)) = ws.next().await {
                match msg {
                    Message::Text(text) => {
                        received.push(serde_json::from_str::<serde_json::Value>(&text).unwrap())
                    }
                    Message::Close(_) => break,
                    _ => {}
                }
            }
            received
        });

        let evi = HumeEVI::from_hume_config(config().with_websocket_url(format!("ws://{addr}")))
            .unwrap();
        let _events = evi.connect().await.unwrap();
        assert_eq!(evi.connection_state(), ConnectionState::Connected);

        evi.send_audio(Bytes::from_static(&[1, 2, 3])).await.unwrap();
        evi.disconnect().await.unwrap();

        let received = server.await.unwrap();
        assert_eq!(received[0]["type"], "session_settings");
        assert_eq!(received[0]["audio"]["sample_rate"], 16000);
        assert_eq!(received[1]["type"], "audio_input");
        assert_eq!(received[1]["data"], "AQID");
        assert_eq!(evi.connection_state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let evi = HumeEVI::from_hume_config(config().with_websocket_url(format!("ws://{addr}")))
            .unwrap();
        let result = evi.connect().await;
        assert!(matches!(result, Err(RealtimeError::ConnectionFailed(_))));
        assert_eq!(evi.connection_state(), ConnectionState::Failed);
    }

    #[test]
    fn test_factory_creates_independent_sessions() {
        let factory = HumeSessionFactory::new(config());
        let a = factory.create("call-a").unwrap();
        let b = factory.create("call-b").unwrap();
        assert!(!Arc::ptr_eq(&a, &b));

        let bad = HumeSessionFactory::new(HumeEVIConfig::new("key"));
        assert!(matches!(
            bad.create("call-c"),
            Err(RealtimeError::MissingCredential(_))
        ));
    }
}
