use std::time::Duration;

use tokio::time::Instant;

pub fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum: f32 = samples.iter().map(|s| s * s).sum();
    (sum / samples.len() as f32).sqrt()
}

/// Energy gate over microphone frames. A loud frame only counts once per
/// debounce period so a single utterance does not fire repeatedly.
#[derive(Debug)]
pub struct VoiceActivityGate {
    threshold: f32,
    debounce: Duration,
    last_trigger: Option<Instant>,
}

impl VoiceActivityGate {
    pub fn new(threshold: f32, debounce: Duration) -> Self {
        Self {
            threshold,
            debounce,
            last_trigger: None,
        }
    }

    pub fn detect(&mut self, samples: &[f32], now: Instant) -> bool {
        if rms(samples) <= self.threshold {
            return false;
        }
        let debounced = self
            .last_trigger
            .map_or(false, |last| now.saturating_duration_since(last) <= self.debounce);
        if debounced {
            return false;
        }
        self.last_trigger = Some(now);
        true
    }
}
