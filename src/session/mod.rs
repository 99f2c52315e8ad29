pub mod config;
pub mod controller;
pub mod error;
pub mod gemini_live;
pub mod pcm;
pub mod playback;
pub mod prompt;
pub mod state;
pub mod transport;
pub mod vad;

pub use config::SessionConfig;
pub use controller::SessionOrchestrator;
pub use error::SessionError;
pub use gemini_live::GeminiLiveConnector;
pub use playback::{AudioSink, NullAudioSink, PlaybackSchedule};
pub use state::{ContextDecision, SkipReason};
pub use transport::{LiveConfig, LiveConnector, LiveSession, ServerEvent, Turn, TurnPart};
