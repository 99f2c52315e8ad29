use std::time::Duration;

use tokio::time::Instant;

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = false;
const LOG_TAG: &str = "playback";

use crate::log_debug;

/// Where decoded model audio goes. Device output lives outside this crate.
pub trait AudioSink: Send + Sync {
    fn play(&self, samples: &[f32], sample_rate: u32);
    fn stop_all(&self);
}

/// Discards audio. Used when no output device is attached.
#[derive(Debug, Default)]
pub struct NullAudioSink;

impl AudioSink for NullAudioSink {
    fn play(&self, samples: &[f32], sample_rate: u32) {
        log_debug!("dropping {} samples @ {}Hz", samples.len(), sample_rate);
    }

    fn stop_all(&self) {}
}

/// Back-to-back schedule of model audio chunks.
#[derive(Debug, Default)]
pub struct PlaybackSchedule {
    next_start: Option<Instant>,
    queued_chunks: usize,
}

impl PlaybackSchedule {
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedule a chunk right after whatever is queued, or now if the queue
    /// ran dry. Returns when the chunk finishes.
    pub fn schedule(&mut self, duration: Duration, now: Instant) -> Instant {
        let start = match self.next_start {
            Some(next) if next > now => next,
            _ => now,
        };
        let end = start + duration;
        self.next_start = Some(end);
        self.queued_chunks += 1;
        end
    }

    pub fn ends_at(&self) -> Option<Instant> {
        self.next_start
    }

    pub fn queued_chunks(&self) -> usize {
        self.queued_chunks
    }

    pub fn is_playing(&self, now: Instant) -> bool {
        self.next_start.map_or(false, |end| now < end)
    }

    /// Nothing has been scheduled to play within the last `settle`.
    pub fn is_settled(&self, now: Instant, settle: Duration) -> bool {
        self.next_start.map_or(true, |end| now >= end + settle)
    }

    /// Drop everything queued; later chunks start from `now`.
    pub fn reset(&mut self, now: Instant) {
        self.next_start = Some(now);
        self.queued_chunks = 0;
    }
}
