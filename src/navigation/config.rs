use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Tunable thresholds for the navigation stability detector.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StabilityConfig {
    /// How often an open window re-reads the page's `(url, title)`.
    pub poll_interval_ms: u64,

    /// Identical, non-generic title observations needed to confirm.
    pub required_stable_polls: u32,

    /// Forced-emission budget for ordinary pages.
    pub max_wait_ms: u64,

    /// Forced-emission budget for video-like SPA routes, whose titles tend
    /// to land late.
    pub video_max_wait_ms: u64,

    /// Substrings of a URL that mark it as a video route.
    pub video_route_patterns: Vec<String>,

    /// Titles (lowercase) that are always treated as placeholders.
    pub placeholder_titles: Vec<String>,
}

impl Default for StabilityConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 150,
            required_stable_polls: 3,
            max_wait_ms: 3_000,
            video_max_wait_ms: 5_000,
            video_route_patterns: vec![
                "youtube.com/watch".into(),
                "youtube.com/shorts".into(),
                "twitch.tv/".into(),
                "netflix.com/watch".into(),
                "vimeo.com/".into(),
            ],
            placeholder_titles: vec!["loading...".into(), "untitled".into(), "new tab".into()],
        }
    }
}

impl StabilityConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn max_wait_for(&self, url: &str) -> Duration {
        let url = url.to_ascii_lowercase();
        if self
            .video_route_patterns
            .iter()
            .any(|pattern| url.contains(&pattern.to_ascii_lowercase()))
        {
            Duration::from_millis(self.video_max_wait_ms)
        } else {
            Duration::from_millis(self.max_wait_ms)
        }
    }
}
