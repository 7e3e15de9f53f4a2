//! Local Hume EVI WebSocket server.
//!
//! Speaks enough of the EVI protocol to drive a bridge: it records the
//! `session_settings` message, answers with `chat_metadata`, and then
//! behaves according to [`HumeBehavior`].

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::{Value, json};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};

/// How the mock reacts after the session settings arrive.
#[derive(Debug, Clone)]
pub enum HumeBehavior {
    /// Every `audio_input` is played straight back as `audio_output`.
    Echo,
    /// Send an `error` message right after the handshake.
    ErrorAfterSettings { code: String, message: String },
    /// Accept TCP but never complete the WebSocket handshake.
    NeverHandshake,
}

/// Counters and captured messages.
#[derive(Debug, Default)]
pub struct HumeMockState {
    pub connections: AtomicU64,
    pub audio_inputs: AtomicU64,
    pub closed_sessions: AtomicU64,
    /// First message of every session, in connection order.
    pub first_messages: Mutex<Vec<Value>>,
    /// Query strings of accepted connections.
    pub queries: Mutex<Vec<String>>,
}

pub struct HumeMockServer {
    pub url: String,
    pub state: Arc<HumeMockState>,
    handle: JoinHandle<()>,
}

impl HumeMockServer {
    pub async fn start(behavior: HumeBehavior) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind mock Hume server");
        let addr = listener.local_addr().expect("mock address");
        let state = Arc::new(HumeMockState::default());

        let server_state = state.clone();
        let handle = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let state = server_state.clone();
                let behavior = behavior.clone();
                tokio::spawn(async move {
                    handle_connection(stream, state, behavior).await;
                });
            }
        });

        Self {
            url: format!("ws://{addr}/v0/evi/chat"),
            state,
            handle,
        }
    }

    pub fn connections(&self) -> u64 {
        self.state.connections.load(Ordering::SeqCst)
    }

    pub fn audio_inputs(&self) -> u64 {
        self.state.audio_inputs.load(Ordering::SeqCst)
    }

    pub fn closed_sessions(&self) -> u64 {
        self.state.closed_sessions.load(Ordering::SeqCst)
    }
}

impl Drop for HumeMockServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn handle_connection(stream: TcpStream, state: Arc<HumeMockState>, behavior: HumeBehavior) {
    state.connections.fetch_add(1, Ordering::SeqCst);

    if matches!(behavior, HumeBehavior::NeverHandshake) {
        // Hold the socket open without answering.
        let _stream = stream;
        std::future::pending::<()>().await;
        return;
    }

    let query_state = state.clone();
    let callback = move |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
        query_state
            .queries
            .lock()
            .push(request.uri().query().unwrap_or_default().to_string());
        Ok(response)
    };

    let Ok(ws) = accept_hdr_async(stream, callback).await else {
        return;
    };
    let (mut write, mut read) = ws.split();

    let mut first = true;
    while let Some(Ok(message)) = read.next().await {
        let text = match message {
            Message::Text(text) => text.to_string(),
            Message::Close(_) => break,
            _ => continue,
        };
        let Ok(value) = serde_json::from_str::<Value>(&text) else {
            continue;
        };

        if first {
            first = false;
            state.first_messages.lock().push(value.clone());

            let metadata = json!({
                "type": "chat_metadata",
                "chat_id": format!("chat-{}", state.connections.load(Ordering::SeqCst)),
                "chat_group_id": "group-1"
            });
            if write.send(Message::Text(metadata.to_string().into())).await.is_err() {
                break;
            }

            if let HumeBehavior::ErrorAfterSettings { ref code, ref message } = behavior {
                let error = json!({
                    "type": "error",
                    "code": code,
                    "slug": "mock_error",
                    "message": message
                });
                let _ = write.send(Message::Text(error.to_string().into())).await;
            }
            continue;
        }

        if value["type"] == "audio_input" {
            state.audio_inputs.fetch_add(1, Ordering::SeqCst);
            if matches!(behavior, HumeBehavior::Echo) {
                let output = json!({
                    "type": "audio_output",
                    "id": "out-1",
                    "data": value["data"]
                });
                if write.send(Message::Text(output.to_string().into())).await.is_err() {
                    break;
                }
            }
        }
    }

    state.closed_sessions.fetch_add(1, Ordering::SeqCst);
}
