use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Thresholds the activity classifier applies to raw page events.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    /// Shorter selections are treated as accidental.
    pub selection_min_chars: usize,

    /// Scroll displacement (px) from the last anchor that counts as
    /// "scrolling fast".
    pub scroll_threshold_px: f64,

    /// Keystrokes in an editable field within `keystroke_window_ms` that
    /// form a burst.
    pub keystroke_burst: u32,
    pub keystroke_window_ms: u64,

    /// Media shorter than this (ads, previews) is ignored.
    pub media_min_duration_secs: f64,

    pub idle_timeout_secs: u64,

    /// Minimum gap between two non-navigation signals.
    pub cooldown_ms: u64,

    pub rage_click_count: u32,
    pub rage_click_radius_px: f64,
    pub rage_click_window_ms: u64,

    /// Cap on the characters carried in a signal's detail.
    pub detail_max_chars: usize,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            selection_min_chars: 3,
            scroll_threshold_px: 1_000.0,
            keystroke_burst: 15,
            keystroke_window_ms: 10_000,
            media_min_duration_secs: 10.0,
            idle_timeout_secs: 60,
            cooldown_ms: 5_000,
            rage_click_count: 4,
            rage_click_radius_px: 30.0,
            rage_click_window_ms: 1_000,
            detail_max_chars: 500,
        }
    }
}

impl ClassifierConfig {
    pub fn cooldown(&self) -> Duration {
        Duration::from_millis(self.cooldown_ms)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs.max(1))
    }

    pub fn keystroke_window(&self) -> Duration {
        Duration::from_millis(self.keystroke_window_ms)
    }

    pub fn rage_click_window(&self) -> Duration {
        Duration::from_millis(self.rage_click_window_ms)
    }
}
