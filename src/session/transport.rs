//! Boundary between the orchestrator and a bidirectional live model.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::mpsc;

#[derive(Debug, Clone, PartialEq)]
pub enum TurnPart {
    Text(String),
    InlineData { mime_type: String, data: String },
}

/// One user turn. The orchestrator always completes its turns so the model
/// answers right away.
#[derive(Debug, Clone, PartialEq)]
pub struct Turn {
    pub parts: Vec<TurnPart>,
    pub turn_complete: bool,
}

impl Turn {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            parts: vec![TurnPart::Text(text.into())],
            turn_complete: true,
        }
    }

    pub fn with_inline(mut self, mime_type: impl Into<String>, data: impl Into<String>) -> Self {
        self.parts.push(TurnPart::InlineData {
            mime_type: mime_type.into(),
            data: data.into(),
        });
        self
    }

    pub fn text_content(&self) -> String {
        self.parts
            .iter()
            .filter_map(|part| match part {
                TurnPart::Text(text) => Some(text.as_str()),
                TurnPart::InlineData { .. } => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn has_inline_data(&self) -> bool {
        self.parts
            .iter()
            .any(|part| matches!(part, TurnPart::InlineData { .. }))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    /// Handshake complete; the session accepts turns.
    Open,
    /// Little-endian PCM16 mono at the configured output rate. May be empty.
    Audio(Vec<u8>),
    Text(String),
    TurnComplete,
    /// The model stopped its own output because it heard the user.
    Interrupted,
    Closed,
    Error(String),
}

#[derive(Debug, Clone)]
pub struct LiveConfig {
    pub endpoint: String,
    pub api_key: String,
    pub model: String,
    pub voice: String,
    pub system_prompt: String,
}

#[async_trait]
pub trait LiveSession: Send + Sync {
    async fn send_turn(&self, turn: &Turn) -> Result<()>;
    async fn send_audio(&self, pcm16: &[u8], sample_rate: u32) -> Result<()>;
    async fn close(&self);
}

#[async_trait]
pub trait LiveConnector: Send + Sync {
    /// Open a session. Server events, starting with `Open` once the
    /// handshake completes, are delivered on `events`.
    async fn connect(
        &self,
        config: &LiveConfig,
        events: mpsc::UnboundedSender<ServerEvent>,
    ) -> Result<Arc<dyn LiveSession>>;
}
