use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Spacing between flushes of queued (non-navigation) signals.
    pub flush_interval_ms: u64,

    /// Once `high + medium` exceeds this, every enqueue evicts the oldest
    /// low-priority signal.
    pub priority_budget: usize,

    /// How long a video-frame request waits on the active tab.
    pub frame_timeout_ms: u64,

    /// Media snapshots kept for prompt attachments.
    pub media_cache_size: usize,

    pub inbox_capacity: usize,
    pub broadcast_capacity: usize,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            flush_interval_ms: 300,
            priority_budget: 10,
            frame_timeout_ms: 2_000,
            media_cache_size: 8,
            inbox_capacity: 256,
            broadcast_capacity: 32,
        }
    }
}

impl DispatchConfig {
    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms.max(1))
    }

    pub fn frame_timeout(&self) -> Duration {
        Duration::from_millis(self.frame_timeout_ms)
    }
}
