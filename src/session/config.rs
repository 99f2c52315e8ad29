use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::prompt::DEFAULT_SYSTEM_PROMPT;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub endpoint: String,
    pub model: String,
    pub voice: String,
    pub system_prompt: String,

    /// Quiet period after the model finished speaking.
    pub post_speech_cooldown_ms: u64,
    /// Minimum spacing between two prompts.
    pub prompt_cooldown_ms: u64,
    /// Silence after the last scheduled chunk before the model counts as
    /// done speaking.
    pub playback_settle_ms: u64,

    pub output_sample_rate: u32,
    pub input_sample_rate: u32,

    pub vad_threshold: f32,
    pub vad_debounce_ms: u64,
    /// How long a detected utterance keeps the user marked as speaking.
    pub user_speech_hold_ms: u64,

    /// Page text carried in navigation prompts.
    pub excerpt_max_chars: usize,
    pub send_initial_context: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            endpoint: "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent".into(),
            model: "models/gemini-2.5-flash-native-audio-preview-09-2025".into(),
            voice: "Kore".into(),
            system_prompt: DEFAULT_SYSTEM_PROMPT.into(),
            post_speech_cooldown_ms: 3_000,
            prompt_cooldown_ms: 3_000,
            playback_settle_ms: 150,
            output_sample_rate: 24_000,
            input_sample_rate: 16_000,
            vad_threshold: 0.05,
            vad_debounce_ms: 500,
            user_speech_hold_ms: 1_500,
            excerpt_max_chars: 600,
            send_initial_context: true,
        }
    }
}

impl SessionConfig {
    pub fn post_speech_cooldown(&self) -> Duration {
        Duration::from_millis(self.post_speech_cooldown_ms)
    }

    pub fn prompt_cooldown(&self) -> Duration {
        Duration::from_millis(self.prompt_cooldown_ms)
    }

    pub fn playback_settle(&self) -> Duration {
        Duration::from_millis(self.playback_settle_ms)
    }

    pub fn vad_debounce(&self) -> Duration {
        Duration::from_millis(self.vad_debounce_ms)
    }

    pub fn user_speech_hold(&self) -> Duration {
        Duration::from_millis(self.user_speech_hold_ms)
    }
}
