use thiserror::Error;

/// Failures the user gets to see on the status line.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("No API key configured")]
    MissingApiKey,

    #[error("A session is already running")]
    AlreadyActive,

    #[error("Could not connect: {0}")]
    Handshake(String),

    #[error("Connection lost: {0}")]
    Transport(String),

    #[error("Microphone unavailable: {0}")]
    Microphone(String),
}
