use std::time::Duration;

use tokio::time::Instant;

use crate::models::{ActivityKind, ActivitySignal, SessionContext, SessionStatus};

use super::config::SessionConfig;
use super::playback::PlaybackSchedule;
use super::vad::VoiceActivityGate;

/// Why a context update did not turn into a prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    EmptyContext,
    NotIdle(SessionStatus),
    UserSpeaking,
    PostSpeechCooldown,
    PromptCooldown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextDecision {
    Prompted,
    Skipped(SkipReason),
}

/// Everything the orchestrator decides on, minus the async plumbing.
#[derive(Debug)]
pub struct OrchestratorState {
    pub status: SessionStatus,
    pub session_id: Option<String>,
    /// Bumped on every connect and teardown; callbacks carrying an older
    /// value are ignored.
    pub generation: u64,
    pub context: Option<ActivitySignal>,
    pub error: Option<String>,
    pub carried_selection: Option<String>,
    pub last_prompt_at: Option<Instant>,
    pub last_speech_end_at: Option<Instant>,
    pub user_speaking_until: Option<Instant>,
    pub playback: PlaybackSchedule,
    pub vad: VoiceActivityGate,
    pub microphone_error_reported: bool,
}

impl OrchestratorState {
    pub fn new(config: &SessionConfig) -> Self {
        Self {
            status: SessionStatus::Disconnected,
            session_id: None,
            generation: 0,
            context: None,
            error: None,
            carried_selection: None,
            last_prompt_at: None,
            last_speech_end_at: None,
            user_speaking_until: None,
            playback: PlaybackSchedule::new(),
            vad: VoiceActivityGate::new(config.vad_threshold, config.vad_debounce()),
            microphone_error_reported: false,
        }
    }

    /// Apply a lifecycle edge; illegal edges are refused.
    pub fn transition(&mut self, next: SessionStatus) -> bool {
        if !self.status.can_transition_to(next) {
            return false;
        }
        self.status = next;
        true
    }

    /// Reset per-session state for a new connection attempt and return its
    /// generation.
    pub fn begin_connect(&mut self, session_id: String, config: &SessionConfig) -> u64 {
        self.generation += 1;
        self.status = SessionStatus::Connecting;
        self.session_id = Some(session_id);
        self.error = None;
        self.last_prompt_at = None;
        self.last_speech_end_at = None;
        self.user_speaking_until = None;
        self.playback = PlaybackSchedule::new();
        self.vad = VoiceActivityGate::new(config.vad_threshold, config.vad_debounce());
        self.microphone_error_reported = false;
        self.generation
    }

    /// Invalidate the running session after a transport failure. The
    /// message stays on the status line until the next connect.
    pub fn enter_error(&mut self, message: String) {
        self.generation += 1;
        self.status = SessionStatus::Error;
        self.error = Some(message);
        self.session_id = None;
        self.user_speaking_until = None;
    }

    /// Invalidate the running session (if any) and settle in `Disconnected`.
    pub fn teardown(&mut self) {
        if self.status != SessionStatus::Error {
            self.generation += 1;
        }
        self.status = SessionStatus::Disconnected;
        self.session_id = None;
        self.user_speaking_until = None;
    }

    pub fn is_current(&self, generation: u64) -> bool {
        self.generation == generation
    }

    pub fn user_speaking(&self, now: Instant) -> bool {
        self.user_speaking_until.map_or(false, |until| now < until)
    }

    /// Record a new context signal for display and selection carry-over.
    pub fn observe_context(&mut self, signal: &ActivitySignal) {
        self.context = Some(signal.clone());
        if signal.kind == ActivityKind::Navigate {
            self.carried_selection = None;
        } else if signal.is_text_selection() {
            self.carried_selection = signal.detail.clone();
        }
    }

    pub fn prompt_gate(&self, signal: &ActivitySignal, now: Instant, config: &SessionConfig) -> Result<(), SkipReason> {
        if signal.is_empty() {
            return Err(SkipReason::EmptyContext);
        }
        if self.status != SessionStatus::Idle {
            return Err(SkipReason::NotIdle(self.status));
        }
        if self.user_speaking(now) {
            return Err(SkipReason::UserSpeaking);
        }
        if within(self.last_speech_end_at, now, config.post_speech_cooldown()) {
            return Err(SkipReason::PostSpeechCooldown);
        }
        if within(self.last_prompt_at, now, config.prompt_cooldown()) {
            return Err(SkipReason::PromptCooldown);
        }
        Ok(())
    }

    /// First audio of a reply.
    pub fn begin_speaking(&mut self) -> bool {
        self.status == SessionStatus::Idle && self.transition(SessionStatus::Speaking)
    }

    pub fn finish_speaking(&mut self, now: Instant) -> bool {
        if self.status != SessionStatus::Speaking {
            return false;
        }
        self.last_speech_end_at = Some(now);
        self.transition(SessionStatus::Idle)
    }

    pub fn snapshot(&self) -> SessionContext {
        SessionContext {
            status: self.status,
            current: self.context.clone(),
            error: self.error.clone(),
        }
    }
}

fn within(since: Option<Instant>, now: Instant, window: Duration) -> bool {
    since.map_or(false, |at| now.saturating_duration_since(at) < window)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{PageLocation, SELECTION_DESCRIPTION};

    fn signal(kind: ActivityKind, description: &str) -> ActivitySignal {
        ActivitySignal::new(&PageLocation::new("https://a.test", "A"), kind, description)
    }

    fn idle_state(config: &SessionConfig) -> OrchestratorState {
        let mut state = OrchestratorState::new(config);
        state.begin_connect("s".into(), config);
        assert!(state.transition(SessionStatus::Idle));
        state
    }

    #[test]
    fn gate_requires_idle() {
        let config = SessionConfig::default();
        let state = OrchestratorState::new(&config);
        let now = Instant::now();
        assert_eq!(
            state.prompt_gate(&signal(ActivityKind::Navigate, "n"), now, &config),
            Err(SkipReason::NotIdle(SessionStatus::Disconnected))
        );
    }

    #[test]
    fn gate_applies_both_cooldowns() {
        let config = SessionConfig::default();
        let mut state = idle_state(&config);
        let t0 = Instant::now();
        let nav = signal(ActivityKind::Navigate, "n");

        state.last_speech_end_at = Some(t0);
        assert_eq!(state.prompt_gate(&nav, t0 + Duration::from_secs(2), &config), Err(SkipReason::PostSpeechCooldown));
        assert!(state.prompt_gate(&nav, t0 + Duration::from_secs(3), &config).is_ok());

        state.last_prompt_at = Some(t0 + Duration::from_secs(3));
        assert_eq!(state.prompt_gate(&nav, t0 + Duration::from_secs(5), &config), Err(SkipReason::PromptCooldown));
        assert!(state.prompt_gate(&nav, t0 + Duration::from_secs(6), &config).is_ok());
    }

    #[test]
    fn gate_respects_user_speech() {
        let config = SessionConfig::default();
        let mut state = idle_state(&config);
        let t0 = Instant::now();
        state.user_speaking_until = Some(t0 + Duration::from_secs(1));
        let nav = signal(ActivityKind::Navigate, "n");
        assert_eq!(state.prompt_gate(&nav, t0, &config), Err(SkipReason::UserSpeaking));
        assert!(state.prompt_gate(&nav, t0 + Duration::from_secs(1), &config).is_ok());
    }

    #[test]
    fn selection_is_carried_until_navigation() {
        let config = SessionConfig::default();
        let mut state = OrchestratorState::new(&config);
        let selection = signal(ActivityKind::Interaction, SELECTION_DESCRIPTION).with_detail(Some("quote".into()));
        state.observe_context(&selection);
        state.observe_context(&signal(ActivityKind::Interaction, "Scrolling fast"));
        assert_eq!(state.carried_selection.as_deref(), Some("quote"));
        state.observe_context(&signal(ActivityKind::Navigate, "Navigated"));
        assert_eq!(state.carried_selection, None);
    }

    #[test]
    fn teardown_keeps_error_and_lands_disconnected() {
        let config = SessionConfig::default();
        let mut state = idle_state(&config);
        let generation = state.generation;
        state.enter_error("Connection lost: reset".into());
        assert_eq!(state.status, SessionStatus::Error);
        state.teardown();
        assert_eq!(state.status, SessionStatus::Disconnected);
        assert!(!state.is_current(generation));
        assert_eq!(state.snapshot().status_line(), "🔥 Connection lost: reset");
    }
}
