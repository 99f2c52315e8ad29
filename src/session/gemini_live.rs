//! Gemini Live (BidiGenerateContent) over WebSocket.

use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use super::pcm::{decode_base64, encode_base64};
use super::transport::{LiveConfig, LiveConnector, LiveSession, ServerEvent, Turn, TurnPart};

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;
const LOG_TAG: &str = "gemini";

use crate::{log_debug, log_warn};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;
type WsSource = SplitStream<WsStream>;

#[derive(Debug, Default, Clone)]
pub struct GeminiLiveConnector;

impl GeminiLiveConnector {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl LiveConnector for GeminiLiveConnector {
    async fn connect(
        &self,
        config: &LiveConfig,
        events: mpsc::UnboundedSender<ServerEvent>,
    ) -> Result<Arc<dyn LiveSession>> {
        let url = format!("{}?key={}", config.endpoint, config.api_key);
        let (ws_stream, _) = tokio_tungstenite::connect_async(url.as_str())
            .await
            .context("failed to open live WebSocket")?;
        log_debug!("connected to {}", config.endpoint);

        let (mut ws_sink, ws_source) = ws_stream.split();
        ws_sink
            .send(Message::Text(setup_message(config).to_string().into()))
            .await
            .context("failed to send setup message")?;

        let recv_task = tokio::spawn(receive_loop(ws_source, events));
        Ok(Arc::new(GeminiLiveSession {
            ws_tx: Arc::new(Mutex::new(ws_sink)),
            recv_task,
        }))
    }
}

struct GeminiLiveSession {
    ws_tx: Arc<Mutex<WsSink>>,
    recv_task: JoinHandle<()>,
}

impl GeminiLiveSession {
    async fn send_json(&self, value: Value) -> Result<()> {
        let mut ws = self.ws_tx.lock().await;
        ws.send(Message::Text(value.to_string().into()))
            .await
            .context("live WebSocket send failed")
    }
}

#[async_trait]
impl LiveSession for GeminiLiveSession {
    async fn send_turn(&self, turn: &Turn) -> Result<()> {
        self.send_json(client_content_message(turn)).await
    }

    async fn send_audio(&self, pcm16: &[u8], sample_rate: u32) -> Result<()> {
        self.send_json(json!({
            "realtimeInput": {
                "audio": {
                    "mimeType": format!("audio/pcm;rate={}", sample_rate),
                    "data": encode_base64(pcm16),
                }
            }
        }))
        .await
    }

    async fn close(&self) {
        let mut ws = self.ws_tx.lock().await;
        let _ = ws.send(Message::Close(None)).await;
        let _ = ws.close().await;
        self.recv_task.abort();
    }
}

fn setup_message(config: &LiveConfig) -> Value {
    json!({
        "setup": {
            "model": config.model,
            "generationConfig": {
                "responseModalities": ["AUDIO"],
                "speechConfig": {
                    "voiceConfig": {
                        "prebuiltVoiceConfig": { "voiceName": config.voice }
                    }
                }
            },
            "systemInstruction": {
                "parts": [{ "text": config.system_prompt }]
            }
        }
    })
}

fn client_content_message(turn: &Turn) -> Value {
    let parts: Vec<Value> = turn
        .parts
        .iter()
        .map(|part| match part {
            TurnPart::Text(text) => json!({ "text": text }),
            TurnPart::InlineData { mime_type, data } => json!({
                "inlineData": { "mimeType": mime_type, "data": data }
            }),
        })
        .collect();

    json!({
        "clientContent": {
            "turns": [{ "role": "user", "parts": parts }],
            "turnComplete": turn.turn_complete,
        }
    })
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct ServerMessage {
    setup_complete: Option<Value>,
    server_content: Option<ServerContent>,
    go_away: Option<Value>,
    error: Option<ServerError>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct ServerContent {
    model_turn: Option<ModelTurn>,
    #[serde(default)]
    turn_complete: bool,
    #[serde(default)]
    interrupted: bool,
}

#[derive(Debug, Deserialize, Default)]
struct ModelTurn {
    #[serde(default)]
    parts: Vec<ModelPart>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct ModelPart {
    text: Option<String>,
    inline_data: Option<InlineData>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InlineData {
    #[serde(default)]
    mime_type: String,
    data: String,
}

#[derive(Debug, Deserialize)]
struct ServerError {
    message: String,
}

/// Map one server frame to transport events.
fn parse_server_message(raw: &str) -> Vec<ServerEvent> {
    let message: ServerMessage = match serde_json::from_str(raw) {
        Ok(message) => message,
        Err(err) => {
            log_warn!("unparseable live message: {}", err);
            return Vec::new();
        }
    };

    let mut events = Vec::new();
    if message.setup_complete.is_some() {
        events.push(ServerEvent::Open);
    }
    if let Some(error) = message.error {
        events.push(ServerEvent::Error(error.message));
    }
    if let Some(content) = message.server_content {
        if content.interrupted {
            events.push(ServerEvent::Interrupted);
        }
        for part in content.model_turn.map(|turn| turn.parts).unwrap_or_default() {
            if let Some(inline) = part.inline_data {
                if !inline.mime_type.is_empty() && !inline.mime_type.starts_with("audio/") {
                    continue;
                }
                match decode_base64(&inline.data) {
                    Ok(pcm) => events.push(ServerEvent::Audio(pcm)),
                    Err(err) => log_warn!("bad audio payload: {}", err),
                }
            }
            if let Some(text) = part.text {
                events.push(ServerEvent::Text(text));
            }
        }
        if content.turn_complete {
            events.push(ServerEvent::TurnComplete);
        }
    }
    if message.go_away.is_some() {
        log_debug!("server asked us to go away");
    }
    events
}

async fn receive_loop(mut ws_source: WsSource, events: mpsc::UnboundedSender<ServerEvent>) {
    while let Some(msg) = ws_source.next().await {
        let raw = match msg {
            Ok(Message::Text(text)) => text.as_str().to_string(),
            Ok(Message::Binary(bytes)) => match String::from_utf8(bytes.to_vec()) {
                Ok(text) => text,
                Err(_) => continue,
            },
            Ok(Message::Close(frame)) => {
                match frame {
                    Some(frame) if frame.code != CloseCode::Normal => {
                        let _ = events.send(ServerEvent::Error(format!(
                            "closed by server ({}): {}",
                            u16::from(frame.code),
                            frame.reason.as_str()
                        )));
                    }
                    _ => {
                        let _ = events.send(ServerEvent::Closed);
                    }
                }
                return;
            }
            Ok(_) => continue,
            Err(err) => {
                let _ = events.send(ServerEvent::Error(err.to_string()));
                return;
            }
        };

        for event in parse_server_message(&raw) {
            if events.send(event).is_err() {
                return;
            }
        }
    }
    let _ = events.send(ServerEvent::Closed);
}
