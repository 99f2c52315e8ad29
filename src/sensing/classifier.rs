//! Turns raw page events into activity signals.
//!
//! The classifier is synchronous and owns no timers; the sensor loop passes
//! the current instant with every call.

use std::time::Duration;

use tokio::time::Instant;

use crate::models::{ActivityKind, ActivitySignal, PageLocation, SELECTION_DESCRIPTION};
use crate::navigation::Navigation;
use crate::utils::text::{cap_chars, collapse_whitespace};

use super::config::ClassifierConfig;
use super::event::UserEvent;

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;
const LOG_TAG: &str = "classifier";

use crate::log_debug;

#[derive(Debug, Default)]
struct RageClickTracker {
    count: u32,
    last: Option<(f64, f64, Instant)>,
}

impl RageClickTracker {
    /// Returns the click count when this click completes a rage burst.
    fn record(&mut self, x: f64, y: f64, now: Instant, config: &ClassifierConfig) -> Option<u32> {
        let chained = match self.last {
            Some((last_x, last_y, at)) => {
                let distance = ((x - last_x).powi(2) + (y - last_y).powi(2)).sqrt();
                distance <= config.rage_click_radius_px
                    && now.saturating_duration_since(at) <= config.rage_click_window()
            }
            None => false,
        };

        self.count = if chained { self.count + 1 } else { 1 };
        self.last = Some((x, y, now));

        if self.count >= config.rage_click_count {
            let burst = self.count;
            self.count = 0;
            self.last = None;
            Some(burst)
        } else {
            None
        }
    }
}

#[derive(Debug, Default)]
struct KeystrokeBurst {
    count: u32,
    started_at: Option<Instant>,
}

impl KeystrokeBurst {
    fn record(&mut self, now: Instant, config: &ClassifierConfig) -> bool {
        let expired = self
            .started_at
            .map_or(true, |start| now.saturating_duration_since(start) > config.keystroke_window());
        if expired {
            self.count = 0;
            self.started_at = Some(now);
        }

        self.count += 1;
        if self.count >= config.keystroke_burst {
            self.count = 0;
            self.started_at = None;
            true
        } else {
            false
        }
    }
}

pub struct ActivityClassifier {
    config: ClassifierConfig,
    last_emitted_at: Option<Instant>,
    rage: RageClickTracker,
    keys: KeystrokeBurst,
    scroll_anchor: Option<f64>,
}

impl ActivityClassifier {
    pub fn new(config: ClassifierConfig) -> Self {
        Self {
            config,
            last_emitted_at: None,
            rage: RageClickTracker::default(),
            keys: KeystrokeBurst::default(),
            scroll_anchor: None,
        }
    }

    pub fn config(&self) -> &ClassifierConfig {
        &self.config
    }

    pub fn on_user_event(
        &mut self,
        event: &UserEvent,
        location: &PageLocation,
        now: Instant,
    ) -> Option<ActivitySignal> {
        let candidate = match event {
            UserEvent::Click { x, y, target } => {
                if let Some(burst) = self.rage.record(*x, *y, now, &self.config) {
                    let detail = target
                        .as_ref()
                        .map(|element| format!("{} clicks on \"{}\"", burst, element.display_name()))
                        .unwrap_or_else(|| format!("{} clicks in the same spot", burst));
                    let signal = ActivitySignal::new(location, ActivityKind::Interaction, "Rage clicking")
                        .with_detail(Some(detail));
                    // A burst outranks the cooldown its own first click started.
                    self.last_emitted_at = Some(now);
                    return Some(signal);
                }
                target
                    .as_ref()
                    .filter(|element| element.interactive)
                    .map(|element| {
                        ActivitySignal::new(
                            location,
                            ActivityKind::Interaction,
                            format!("Clicked \"{}\"", cap_chars(&element.display_name(), 80)),
                        )
                    })
            }
            UserEvent::Selection { text } => {
                let text = collapse_whitespace(text);
                if text.chars().count() >= self.config.selection_min_chars {
                    Some(
                        ActivitySignal::new(location, ActivityKind::Interaction, SELECTION_DESCRIPTION)
                            .with_detail(Some(cap_chars(&text, self.config.detail_max_chars))),
                    )
                } else {
                    None
                }
            }
            UserEvent::Scroll { y } => match self.scroll_anchor {
                None => {
                    self.scroll_anchor = Some(*y);
                    None
                }
                Some(anchor) => {
                    let displacement = (y - anchor).abs();
                    if displacement > self.config.scroll_threshold_px {
                        self.scroll_anchor = Some(*y);
                        let direction = if *y > anchor { "down" } else { "up" };
                        Some(
                            ActivitySignal::new(location, ActivityKind::Interaction, "Scrolling fast")
                                .with_detail(Some(format!("{:.0}px {}", displacement, direction))),
                        )
                    } else {
                        None
                    }
                }
            },
            UserEvent::Key { editable } => {
                if *editable && self.keys.record(now, &self.config) {
                    Some(ActivitySignal::new(location, ActivityKind::Input, "Typing furiously"))
                } else {
                    None
                }
            }
            UserEvent::MediaPlay {
                duration_secs,
                label,
            } => {
                if duration_secs.is_finite() && *duration_secs >= self.config.media_min_duration_secs {
                    let what = label
                        .as_deref()
                        .map(str::trim)
                        .filter(|label| !label.is_empty())
                        .unwrap_or("media");
                    Some(
                        ActivitySignal::new(location, ActivityKind::Media, format!("Started playing {}", what))
                            .with_detail(Some(format!("{:.0}s long", duration_secs))),
                    )
                } else {
                    None
                }
            }
            UserEvent::PointerMove | UserEvent::Touch => None,
        };

        candidate.and_then(|signal| self.admit(signal, now))
    }

    /// Build the signal for a settled navigation. The location is the pair
    /// the detector read when it closed the window.
    pub fn navigation_signal(&mut self, navigation: &Navigation, excerpt: Option<String>, now: Instant) -> Option<ActivitySignal> {
        let location = &navigation.location;
        let subject = if location.title.is_empty() {
            location.url.clone()
        } else {
            location.title.clone()
        };
        let signal = ActivitySignal::new(location, ActivityKind::Navigate, format!("Navigated to \"{}\"", subject))
            .with_detail(excerpt.map(|text| cap_chars(&collapse_whitespace(&text), self.config.detail_max_chars)));
        self.admit(signal, now)
    }

    pub fn idle_signal(&mut self, location: &PageLocation, idle_for: Duration, now: Instant) -> Option<ActivitySignal> {
        let signal = ActivitySignal::new(
            location,
            ActivityKind::Idle,
            format!("Idle for {}s", idle_for.as_secs()),
        );
        self.admit(signal, now)
    }

    /// Cooldown gate. Navigations and idle reports always pass and do not
    /// restart the cooldown; idle is one-shot per quiet period.
    fn admit(&mut self, signal: ActivitySignal, now: Instant) -> Option<ActivitySignal> {
        if matches!(signal.kind, ActivityKind::Navigate | ActivityKind::Idle) {
            return Some(signal);
        }

        if let Some(last) = self.last_emitted_at {
            if now.saturating_duration_since(last) < self.config.cooldown() {
                log_debug!("suppressed {} during cooldown: {}", signal.kind.as_str(), signal.description);
                return None;
            }
        }

        self.last_emitted_at = Some(now);
        Some(signal)
    }
}
