//! Navigation stability detection.
//!
//! SPA frameworks rewrite `document.title` several times after a route change
//! (site name first, real content later) and may fire history events before
//! the DOM catches up. The detector holds a short window open per navigation
//! and only reports once the title has settled, or once the wait budget runs
//! out.
//!
//! The detector is a plain state machine: callers feed it observations and
//! the current instant, and drive the polling cadence themselves (see
//! `sensing::loop_worker`).

use std::time::Duration;

use tokio::time::Instant;

use crate::models::{NavigationKey, PageLocation};

use super::config::StabilityConfig;
use super::title::{clean_title, is_generic_title, normalize_url};

#[derive(Debug, Clone)]
pub struct StabilityWindow {
    pub candidate_url: String,
    pub last_observed_title: Option<String>,
    pub consecutive_stable_observations: u32,
    pub window_started_at: Instant,
    pub deadline: Instant,
}

/// A settled navigation, carrying the `(url, title)` read on the poll that
/// closed the window.
#[derive(Debug, Clone, PartialEq)]
pub struct Navigation {
    pub location: PageLocation,
    pub key: NavigationKey,
    pub forced: bool,
    pub waited: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbandonReason {
    /// A newer URL replaced the candidate before it settled.
    Superseded,
    /// The settled pair equals the last emitted one: an echo, not a navigation.
    Duplicate,
}

#[derive(Debug, Clone, PartialEq)]
pub enum WindowOutcome {
    /// No window is open.
    Inactive,
    /// Still waiting for the title to settle.
    Pending,
    Confirmed(Navigation),
    Forced(Navigation),
    Abandoned(AbandonReason),
    /// Budget ran out on a title identical to the last emission. Nothing is
    /// emitted; the next title mutation reopens the window.
    Waiting,
}

impl WindowOutcome {
    pub fn navigation(&self) -> Option<&Navigation> {
        match self {
            WindowOutcome::Confirmed(nav) | WindowOutcome::Forced(nav) => Some(nav),
            _ => None,
        }
    }
}

enum PollDecision {
    Confirm,
    Timeout,
    Continue,
}

pub struct NavigationDetector {
    config: StabilityConfig,
    window: Option<StabilityWindow>,
    last_emitted: Option<NavigationKey>,
    awaiting_mutation: bool,
    retries: u32,
}

impl NavigationDetector {
    pub fn new(config: StabilityConfig) -> Self {
        Self {
            config,
            window: None,
            last_emitted: None,
            awaiting_mutation: false,
            retries: 0,
        }
    }

    /// Seed dedup state persisted by an earlier incarnation of this tab's
    /// sensor.
    pub fn restore(&mut self, last_emitted: Option<NavigationKey>, retries: u32) {
        self.last_emitted = last_emitted;
        self.retries = retries;
    }

    pub fn config(&self) -> &StabilityConfig {
        &self.config
    }

    pub fn is_open(&self) -> bool {
        self.window.is_some()
    }

    pub fn window(&self) -> Option<&StabilityWindow> {
        self.window.as_ref()
    }

    pub fn last_emitted(&self) -> Option<&NavigationKey> {
        self.last_emitted.as_ref()
    }

    /// Forced fallbacks that were swallowed because they repeated the last
    /// emitted title. Resets on every emission.
    pub fn retries(&self) -> u32 {
        self.retries
    }

    /// A URL change, including history-API navigation. Returns the reason an
    /// open window was dropped, if one was.
    pub fn observe_url_change(&mut self, location: &PageLocation, now: Instant) -> Option<AbandonReason> {
        let superseded = match &self.window {
            Some(window) if normalize_url(&window.candidate_url) == normalize_url(&location.url) => {
                return None;
            }
            Some(_) => true,
            None => false,
        };

        if location.is_reportable() {
            self.open(location, now);
        } else {
            self.window = None;
        }

        superseded.then_some(AbandonReason::Superseded)
    }

    /// A `<title>` mutation. Only reopens detection when the previous window
    /// closed without settling; a running window sees the new title on its
    /// next poll anyway.
    pub fn observe_title_mutation(&mut self, location: &PageLocation, now: Instant) -> bool {
        if self.window.is_some() || !self.awaiting_mutation || !location.is_reportable() {
            return false;
        }
        self.open(location, now);
        true
    }

    pub fn poll(&mut self, location: &PageLocation, now: Instant) -> WindowOutcome {
        let required = self.config.required_stable_polls.max(1);
        let placeholders = &self.config.placeholder_titles;

        let Some(window) = self.window.as_mut() else {
            return WindowOutcome::Inactive;
        };

        if normalize_url(&window.candidate_url) != normalize_url(&location.url) {
            if location.is_reportable() {
                self.open(location, now);
            } else {
                self.window = None;
            }
            return WindowOutcome::Abandoned(AbandonReason::Superseded);
        }

        let title = clean_title(&location.title);
        if is_generic_title(&title, &location.url, placeholders) {
            window.consecutive_stable_observations = 0;
            window.last_observed_title = None;
        } else if window.last_observed_title.as_deref() == Some(title.as_str()) {
            window.consecutive_stable_observations += 1;
        } else {
            window.last_observed_title = Some(title.clone());
            window.consecutive_stable_observations = 1;
        }

        let decision = if window.consecutive_stable_observations >= required {
            PollDecision::Confirm
        } else if now >= window.deadline {
            PollDecision::Timeout
        } else {
            PollDecision::Continue
        };
        let started = window.window_started_at;

        let key = NavigationKey::new(&location.url, &title);
        let is_echo = self.last_emitted.as_ref() == Some(&key);

        match decision {
            PollDecision::Continue => WindowOutcome::Pending,
            PollDecision::Confirm => {
                self.window = None;
                if is_echo {
                    return WindowOutcome::Abandoned(AbandonReason::Duplicate);
                }
                WindowOutcome::Confirmed(self.commit(location, title, key, false, now.saturating_duration_since(started)))
            }
            PollDecision::Timeout => {
                self.window = None;
                if is_echo {
                    self.awaiting_mutation = true;
                    self.retries = self.retries.saturating_add(1);
                    return WindowOutcome::Waiting;
                }
                WindowOutcome::Forced(self.commit(location, title, key, true, now.saturating_duration_since(started)))
            }
        }
    }

    /// Drop any open window without emitting.
    pub fn cancel(&mut self) {
        self.window = None;
    }

    fn open(&mut self, location: &PageLocation, now: Instant) {
        self.awaiting_mutation = false;
        self.window = Some(StabilityWindow {
            candidate_url: location.url.clone(),
            last_observed_title: None,
            consecutive_stable_observations: 0,
            window_started_at: now,
            deadline: now + self.config.max_wait_for(&location.url),
        });
    }

    fn commit(
        &mut self,
        location: &PageLocation,
        title: String,
        key: NavigationKey,
        forced: bool,
        waited: Duration,
    ) -> Navigation {
        self.last_emitted = Some(key.clone());
        self.awaiting_mutation = false;
        self.retries = 0;
        Navigation {
            location: PageLocation::new(location.url.clone(), title),
            key,
            forced,
            waited,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TICK: Duration = Duration::from_millis(150);

    fn loc(url: &str, title: &str) -> PageLocation {
        PageLocation::new(url, title)
    }

    /// Feed one title per poll, `TICK` apart, and collect emissions.
    fn run_polls(
        detector: &mut NavigationDetector,
        start: Instant,
        url: &str,
        titles: &[&str],
    ) -> (Vec<WindowOutcome>, Instant) {
        let mut now = start;
        let mut outcomes = Vec::new();
        for title in titles {
            now += TICK;
            outcomes.push(detector.poll(&loc(url, title), now));
        }
        (outcomes, now)
    }

    fn emissions(outcomes: &[WindowOutcome]) -> Vec<Navigation> {
        outcomes.iter().filter_map(|o| o.navigation().cloned()).collect()
    }

    #[test]
    fn placeholder_then_real_title_emits_once() {
        let mut detector = NavigationDetector::new(StabilityConfig::default());
        let url = "https://example.com/";
        let start = Instant::now();
        detector.observe_url_change(&loc(url, "Example"), start);

        let titles = [
            "Example",
            "Example",
            "Welcome - Example",
            "Welcome - Example",
            "Welcome - Example",
            "Welcome - Example",
        ];
        let (outcomes, _) = run_polls(&mut detector, start, url, &titles);
        let emitted = emissions(&outcomes);

        assert_eq!(emitted.len(), 1);
        assert_eq!(emitted[0].location.title, "Welcome - Example");
        assert!(!emitted[0].forced);
        assert!(!detector.is_open());
    }

    #[test]
    fn rapid_title_mutations_emit_only_final_stable_title() {
        let mut detector = NavigationDetector::new(StabilityConfig::default());
        let url = "https://shop.test/item/1";
        let start = Instant::now();
        detector.observe_url_change(&loc(url, ""), start);

        let titles = ["A", "B", "C", "D", "Final", "Final", "Final", "Final", "Other"];
        let (outcomes, _) = run_polls(&mut detector, start, url, &titles);
        let emitted = emissions(&outcomes);

        assert_eq!(emitted.len(), 1);
        assert_eq!(emitted[0].location.title, "Final");
        assert_eq!(outcomes.last(), Some(&WindowOutcome::Inactive));
    }

    #[test]
    fn url_changes_faster_than_confirmation_only_emit_last() {
        let mut detector = NavigationDetector::new(StabilityConfig::default());
        let mut now = Instant::now();
        let mut abandoned = 0;

        for i in 0..5 {
            let url = format!("https://spa.test/page/{i}");
            if detector.observe_url_change(&loc(&url, "Page"), now).is_some() {
                abandoned += 1;
            }
            now += TICK;
            assert_eq!(detector.poll(&loc(&url, &format!("Page {i}")), now), WindowOutcome::Pending);
        }
        assert_eq!(abandoned, 4);

        let url = "https://spa.test/page/4";
        let (outcomes, _) = run_polls(&mut detector, now, url, &["Page 4", "Page 4", "Page 4"]);
        let emitted = emissions(&outcomes);
        assert_eq!(emitted.len(), 1);
        assert_eq!(emitted[0].location.url, url);
    }

    #[test]
    fn poll_on_new_url_supersedes_window() {
        let mut detector = NavigationDetector::new(StabilityConfig::default());
        let start = Instant::now();
        detector.observe_url_change(&loc("https://a.test/1", "One"), start);

        let outcome = detector.poll(&loc("https://a.test/2", "Two"), start + TICK);
        assert_eq!(outcome, WindowOutcome::Abandoned(AbandonReason::Superseded));
        assert_eq!(detector.window().map(|w| w.candidate_url.as_str()), Some("https://a.test/2"));
    }

    #[test]
    fn same_url_change_keeps_window_running() {
        let mut detector = NavigationDetector::new(StabilityConfig::default());
        let start = Instant::now();
        detector.observe_url_change(&loc("https://a.test/1", "One"), start);
        detector.poll(&loc("https://a.test/1", "One"), start + TICK);

        assert_eq!(detector.observe_url_change(&loc("https://a.test/1#frag", "One"), start + TICK), None);
        assert_eq!(detector.window().map(|w| w.consecutive_stable_observations), Some(1));
    }

    #[test]
    fn timeout_forces_emission_with_current_title() {
        let mut detector = NavigationDetector::new(StabilityConfig::default());
        let url = "https://flaky.test/";
        let start = Instant::now();
        detector.observe_url_change(&loc(url, ""), start);

        let mut now = start;
        let mut forced = None;
        for i in 0..40 {
            now += TICK;
            let outcome = detector.poll(&loc(url, &format!("Tick {}", i % 2)), now);
            if let WindowOutcome::Forced(nav) = outcome {
                forced = Some(nav);
                break;
            }
        }

        let nav = forced.expect("expected forced emission");
        assert!(nav.forced);
        assert!(nav.waited >= Duration::from_millis(3_000));
        assert!(nav.location.title.starts_with("Tick"));
    }

    #[test]
    fn video_routes_wait_longer() {
        let config = StabilityConfig::default();
        assert_eq!(config.max_wait_for("https://www.youtube.com/watch?v=1"), Duration::from_millis(5_000));
        assert_eq!(config.max_wait_for("https://example.com"), Duration::from_millis(3_000));
    }

    #[test]
    fn repeated_observation_of_emitted_pair_never_re_emits() {
        let mut detector = NavigationDetector::new(StabilityConfig::default());
        let url = "https://example.com/docs";
        let mut now = Instant::now();

        detector.observe_url_change(&loc(url, "Docs"), now);
        let (outcomes, after) = run_polls(&mut detector, now, url, &["Docs", "Docs", "Docs"]);
        assert_eq!(emissions(&outcomes).len(), 1);
        now = after;

        for _ in 0..5 {
            now += TICK;
            detector.observe_url_change(&loc("https://example.com/other", "Other"), now);
            detector.observe_url_change(&loc(url, "Docs"), now);
            let (outcomes, after) = run_polls(&mut detector, now, url, &["Docs", "Docs", "Docs"]);
            now = after;
            assert!(emissions(&outcomes).is_empty());
            assert_eq!(outcomes.last(), Some(&WindowOutcome::Abandoned(AbandonReason::Duplicate)));
        }
    }

    #[test]
    fn timeout_on_last_emitted_title_waits_for_mutation() {
        let mut detector = NavigationDetector::new(StabilityConfig::default());
        let url = "https://social.test/";
        detector.restore(Some(NavigationKey::new(url, "Feed")), 0);

        let start = Instant::now();
        detector.observe_url_change(&loc(url, "Feed"), start);

        // Alternate so the title never settles; the deadline lands on "Feed".
        let mut now = start;
        let mut outcome = WindowOutcome::Pending;
        let mut i = 0;
        while outcome == WindowOutcome::Pending {
            now += TICK;
            let title = if i % 2 == 0 { "Other" } else { "Feed" };
            outcome = detector.poll(&loc(url, title), now);
            i += 1;
        }
        assert_eq!(outcome, WindowOutcome::Waiting);
        assert_eq!(detector.retries(), 1);
        assert!(!detector.is_open());

        assert!(detector.observe_title_mutation(&loc(url, "Feed (new post)"), now));
        let (outcomes, _) = run_polls(&mut detector, now, url, &["Fresh", "Fresh", "Fresh"]);
        let emitted = emissions(&outcomes);
        assert_eq!(emitted.len(), 1);
        assert_eq!(emitted[0].location.title, "Fresh");
        assert_eq!(detector.retries(), 0);
    }

    #[test]
    fn title_mutation_without_pending_navigation_is_ignored() {
        let mut detector = NavigationDetector::new(StabilityConfig::default());
        assert!(!detector.observe_title_mutation(&loc("https://a.test", "A"), Instant::now()));
        assert!(!detector.is_open());
    }

    #[test]
    fn internal_pages_never_open_windows() {
        let mut detector = NavigationDetector::new(StabilityConfig::default());
        detector.observe_url_change(&loc("about:blank", ""), Instant::now());
        assert!(!detector.is_open());
    }
}
