use serde::{Deserialize, Serialize};

use super::signal::ActivitySignal;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub enum SessionStatus {
    #[default]
    Disconnected,
    Connecting,
    Idle,
    Speaking,
    Error,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Disconnected => "Disconnected",
            SessionStatus::Connecting => "Connecting",
            SessionStatus::Idle => "Idle",
            SessionStatus::Speaking => "Speaking",
            SessionStatus::Error => "Error",
        }
    }

    /// Short status line shown next to the mascot.
    pub fn label(&self) -> &'static str {
        match self {
            SessionStatus::Disconnected => "Sleeping",
            SessionStatus::Connecting => "Connecting...",
            SessionStatus::Idle => "Watching...",
            SessionStatus::Speaking => "Judging you...",
            SessionStatus::Error => "Error",
        }
    }

    pub fn icon(&self) -> &'static str {
        match self {
            SessionStatus::Disconnected => "💤",
            SessionStatus::Connecting => "🔌",
            SessionStatus::Idle => "👀",
            SessionStatus::Speaking => "🗣️",
            SessionStatus::Error => "🔥",
        }
    }

    /// A live, non-failing session exists.
    pub fn is_active(&self) -> bool {
        matches!(self, SessionStatus::Idle | SessionStatus::Speaking)
    }

    /// Legal lifecycle edges. `Error` is reachable from anywhere and can only
    /// be left towards `Disconnected`.
    pub fn can_transition_to(&self, next: SessionStatus) -> bool {
        use SessionStatus::*;
        match (*self, next) {
            (_, Error) => true,
            (Error, Disconnected) => true,
            (Error, _) => false,
            (_, Disconnected) => true,
            (Disconnected, Connecting) => true,
            (Connecting, Idle) => true,
            (Idle, Speaking) | (Speaking, Idle) => true,
            (a, b) => a == b,
        }
    }
}

/// What the status panel renders: the lifecycle state, the last forwarded
/// signal and the last user-facing error, if any.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct SessionContext {
    pub status: SessionStatus,
    pub current: Option<ActivitySignal>,
    pub error: Option<String>,
}

impl SessionContext {
    pub fn status_line(&self) -> String {
        match &self.error {
            Some(message) => format!("{} {}", SessionStatus::Error.icon(), message),
            None => format!("{} {}", self.status.icon(), self.status.label()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_only_leads_back_to_disconnected() {
        assert!(SessionStatus::Error.can_transition_to(SessionStatus::Disconnected));
        assert!(!SessionStatus::Error.can_transition_to(SessionStatus::Idle));
        assert!(!SessionStatus::Error.can_transition_to(SessionStatus::Connecting));
    }

    #[test]
    fn lifecycle_edges() {
        assert!(SessionStatus::Disconnected.can_transition_to(SessionStatus::Connecting));
        assert!(SessionStatus::Connecting.can_transition_to(SessionStatus::Idle));
        assert!(SessionStatus::Idle.can_transition_to(SessionStatus::Speaking));
        assert!(SessionStatus::Speaking.can_transition_to(SessionStatus::Idle));
        assert!(SessionStatus::Speaking.can_transition_to(SessionStatus::Error));
        assert!(!SessionStatus::Disconnected.can_transition_to(SessionStatus::Speaking));
        assert!(!SessionStatus::Connecting.can_transition_to(SessionStatus::Speaking));
    }

    #[test]
    fn status_line_prefers_error_message() {
        let mut ctx = SessionContext::default();
        assert_eq!(ctx.status_line(), "💤 Sleeping");
        ctx.error = Some("Connection lost".into());
        assert_eq!(ctx.status_line(), "🔥 Connection lost");
    }
}
