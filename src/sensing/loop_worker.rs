use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::messages::{HubMessage, HubSender, MediaCapture, SensorCommand};
use crate::models::{NavigationKey, PageLocation};
use crate::navigation::{NavigationDetector, StabilityConfig, WindowOutcome};
use crate::store::SessionStore;

use super::classifier::ActivityClassifier;
use super::config::ClassifierConfig;
use super::event::UserEvent;
use super::idle::{sleep_until_deadline, IdleTracker};
use super::probe::PageProbe;

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;
const LOG_TAG: &str = "sensor";

use crate::{log_debug, log_info};

const LAST_KEY_FIELD: &str = "nav.last_key";
const RETRIES_FIELD: &str = "nav.retries";

/// What the page shim reports about its tab.
#[derive(Debug, Clone)]
pub enum PageInput {
    /// The URL may have changed (full load, pushState, replaceState).
    Location(PageLocation),
    TitleMutated(PageLocation),
    /// popstate / back-forward navigation.
    HistoryNavigated(PageLocation),
    Event(UserEvent),
    MediaCaptured(MediaCapture),
}

pub struct SensorSetup {
    pub probe: Arc<dyn PageProbe>,
    pub hub: HubSender,
    pub store: Option<SessionStore>,
    pub stability: StabilityConfig,
    pub classifier: ClassifierConfig,
}

pub fn store_scope(tab_id: i64) -> String {
    format!("tab:{tab_id}")
}

struct Sensor {
    probe: Arc<dyn PageProbe>,
    hub: HubSender,
    store: Option<SessionStore>,
    scope: String,
    detector: NavigationDetector,
    classifier: ActivityClassifier,
    idle: IdleTracker,
    last_url: Option<String>,
}

pub async fn sensing_loop(
    setup: SensorSetup,
    mut inputs: mpsc::Receiver<PageInput>,
    mut commands: mpsc::Receiver<SensorCommand>,
    cancel_token: CancellationToken,
) {
    let mut ticker = tokio::time::interval(setup.stability.poll_interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut sensor = Sensor::new(setup).await;
    sensor.start(Instant::now(), &mut ticker);

    loop {
        let idle_deadline = sensor.idle.deadline();
        tokio::select! {
            _ = cancel_token.cancelled() => {
                log_info!("tab {} sensor shutting down", sensor.hub.tab_id());
                break;
            }
            input = inputs.recv() => match input {
                Some(input) => sensor.handle_input(input, &mut ticker).await,
                None => {
                    log_debug!("tab {} page input closed", sensor.hub.tab_id());
                    break;
                }
            },
            Some(command) = commands.recv() => sensor.handle_command(command, &mut ticker),
            _ = ticker.tick(), if sensor.detector.is_open() => sensor.poll_detector().await,
            _ = sleep_until_deadline(idle_deadline) => sensor.fire_idle(),
        }
    }
}

impl Sensor {
    async fn new(setup: SensorSetup) -> Self {
        let scope = store_scope(setup.hub.tab_id());
        let mut detector = NavigationDetector::new(setup.stability);

        if let Some(store) = &setup.store {
            let last_key = store
                .get_json::<NavigationKey>(&scope, LAST_KEY_FIELD)
                .await
                .unwrap_or_else(|err| {
                    log_debug!("could not restore last navigation for {}: {err:?}", scope);
                    None
                });
            let retries = store
                .get_json::<u32>(&scope, RETRIES_FIELD)
                .await
                .ok()
                .flatten()
                .unwrap_or(0);
            if last_key.is_some() || retries > 0 {
                log_debug!("restored {} (retries={})", scope, retries);
            }
            detector.restore(last_key, retries);
        }

        Self {
            probe: setup.probe,
            hub: setup.hub,
            store: setup.store,
            scope,
            detector,
            idle: IdleTracker::new(setup.classifier.idle_timeout()),
            classifier: ActivityClassifier::new(setup.classifier),
            last_url: None,
        }
    }

    /// Treat the tab's current page as a fresh load and arm the idle timer.
    fn start(&mut self, now: Instant, ticker: &mut Interval) {
        self.idle.touch(now);
        if let Some(location) = self.probe.location() {
            self.track_url(&location, now, ticker);
        }
    }

    fn track_url(&mut self, location: &PageLocation, now: Instant, ticker: &mut Interval) {
        self.last_url = Some(location.url.clone());
        if let Some(reason) = self.detector.observe_url_change(location, now) {
            log_debug!("abandoned pending navigation: {:?}", reason);
        }
        if self.detector.is_open() {
            ticker.reset();
        }
    }

    async fn handle_input(&mut self, input: PageInput, ticker: &mut Interval) {
        let now = Instant::now();
        match input {
            PageInput::Location(location) => {
                if self.last_url.as_deref() != Some(location.url.as_str()) {
                    self.track_url(&location, now, ticker);
                }
            }
            PageInput::TitleMutated(location) => {
                if self.detector.observe_title_mutation(&location, now) {
                    log_debug!("title mutation reopened detection for {}", location.url);
                    ticker.reset();
                }
            }
            PageInput::HistoryNavigated(location) => {
                log_debug!("history navigation to {}", location.url);
                self.hub.send(HubMessage::ContextRefreshRequested);
            }
            PageInput::Event(event) => {
                if event.is_qualifying_input() {
                    self.idle.touch(now);
                }
                let Some(location) = self.probe.location() else {
                    return;
                };
                if !location.is_reportable() {
                    return;
                }
                if let Some(signal) = self.classifier.on_user_event(&event, &location, now) {
                    self.hub.send(HubMessage::BrowserActivity(signal));
                }
            }
            PageInput::MediaCaptured(capture) => {
                self.hub.send(HubMessage::MediaCaptured(capture));
            }
        }
    }

    fn handle_command(&mut self, command: SensorCommand, ticker: &mut Interval) {
        match command {
            SensorCommand::Recheck => {
                if let Some(location) = self.probe.location() {
                    self.track_url(&location, Instant::now(), ticker);
                }
            }
            SensorCommand::CaptureFrame(reply) => {
                let probe = Arc::clone(&self.probe);
                tokio::spawn(async move {
                    let frame = match probe.capture_video_frame().await {
                        Ok(frame) => frame,
                        Err(err) => {
                            log_debug!("video frame capture failed: {err:?}");
                            None
                        }
                    };
                    let _ = reply.send(frame);
                });
            }
        }
    }

    async fn poll_detector(&mut self) {
        let Some(location) = self.probe.location() else {
            return;
        };
        let now = Instant::now();

        match self.detector.poll(&location, now) {
            WindowOutcome::Confirmed(navigation) | WindowOutcome::Forced(navigation) => {
                log_info!(
                    "navigation settled after {}ms{}: {}",
                    navigation.waited.as_millis(),
                    if navigation.forced { " (forced)" } else { "" },
                    navigation.location.url
                );

                let excerpt = self.probe.text_excerpt();
                if let Some(signal) = self.classifier.navigation_signal(&navigation, excerpt, now) {
                    self.hub.send(HubMessage::BrowserActivity(signal));
                }
                self.persist(&navigation.key).await;
            }
            WindowOutcome::Waiting => {
                log_debug!(
                    "forced title equals last emission, waiting for a mutation (retry {})",
                    self.detector.retries()
                );
                self.persist_retries().await;
            }
            WindowOutcome::Abandoned(reason) => {
                log_debug!("navigation window abandoned: {:?}", reason);
            }
            WindowOutcome::Pending | WindowOutcome::Inactive => {}
        }
    }

    fn fire_idle(&mut self) {
        let now = Instant::now();
        let Some(idle_for) = self.idle.fire(now) else {
            return;
        };
        let Some(location) = self.probe.location().filter(PageLocation::is_reportable) else {
            return;
        };
        if let Some(signal) = self.classifier.idle_signal(&location, idle_for, now) {
            self.hub.send(HubMessage::BrowserActivity(signal));
        }
    }

    async fn persist(&self, key: &NavigationKey) {
        if let Some(store) = &self.store {
            if let Err(err) = store.put_json(&self.scope, LAST_KEY_FIELD, key).await {
                log_debug!("failed to persist last navigation: {err:?}");
            }
        }
        self.persist_retries().await;
    }

    async fn persist_retries(&self) {
        if let Some(store) = &self.store {
            if let Err(err) = store
                .put_json(&self.scope, RETRIES_FIELD, &self.detector.retries())
                .await
            {
                log_debug!("failed to persist retry counter: {err:?}");
            }
        }
    }
}
