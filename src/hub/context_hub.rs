//! Process-wide owner of the current browsing context.
//!
//! Sensors post into a single inbox. Navigations from the active tab become
//! current immediately; everything else waits in the dispatch queue and is
//! released one signal per flush tick, so a burst of interactions cannot
//! drown out the page the user is actually on.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, oneshot, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::messages::{Envelope, HubMessage, HubSender, MediaCapture, SensorCommand, TabId, VideoFrame};
use crate::models::{ActivityKind, ActivitySignal};
use crate::navigation::title::normalize_url;

use super::config::DispatchConfig;
use super::queue::DispatchQueue;

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;
const LOG_TAG: &str = "hub";

use crate::{log_debug, log_info};

struct QueueState {
    queue: DispatchQueue,
    flushing: bool,
}

#[derive(Default)]
struct TabRegistry {
    commands: HashMap<TabId, mpsc::Sender<SensorCommand>>,
    active: Option<TabId>,
}

struct HubInner {
    config: DispatchConfig,
    current: RwLock<Option<ActivitySignal>>,
    queue: Mutex<QueueState>,
    tabs: Mutex<TabRegistry>,
    media: Mutex<VecDeque<MediaCapture>>,
    updates: broadcast::Sender<ActivitySignal>,
    inbox_tx: mpsc::Sender<Envelope>,
}

#[derive(Clone)]
pub struct ContextHub {
    inner: Arc<HubInner>,
}

impl ContextHub {
    /// Build a hub and the receiving end of its inbox; hand the receiver to
    /// [`ContextHub::spawn`].
    pub fn new(config: DispatchConfig) -> (Self, mpsc::Receiver<Envelope>) {
        let (inbox_tx, inbox_rx) = mpsc::channel(config.inbox_capacity.max(1));
        let (updates, _) = broadcast::channel(config.broadcast_capacity.max(1));
        let hub = Self {
            inner: Arc::new(HubInner {
                queue: Mutex::new(QueueState {
                    queue: DispatchQueue::new(config.priority_budget),
                    flushing: false,
                }),
                config,
                current: RwLock::new(None),
                tabs: Mutex::new(TabRegistry::default()),
                media: Mutex::new(VecDeque::new()),
                updates,
                inbox_tx,
            }),
        };
        (hub, inbox_rx)
    }

    pub fn sender(&self, tab_id: TabId) -> HubSender {
        HubSender::new(tab_id, self.inner.inbox_tx.clone())
    }

    /// Context updates, in commit order. Slow subscribers lose the oldest
    /// updates rather than blocking the hub.
    pub fn subscribe(&self) -> broadcast::Receiver<ActivitySignal> {
        self.inner.updates.subscribe()
    }

    pub fn spawn(&self, inbox: mpsc::Receiver<Envelope>, cancel_token: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(self.clone().run(inbox, cancel_token))
    }

    pub async fn run(self, mut inbox: mpsc::Receiver<Envelope>, cancel_token: CancellationToken) {
        loop {
            tokio::select! {
                _ = cancel_token.cancelled() => {
                    log_info!("context hub shutting down");
                    break;
                }
                envelope = inbox.recv() => match envelope {
                    Some(envelope) => self.handle(envelope).await,
                    None => break,
                },
            }
        }
    }

    pub async fn handle(&self, envelope: Envelope) {
        let Envelope { tab_id, message } = envelope;
        match message {
            HubMessage::BrowserActivity(signal) => {
                let from_active = self.mark_active(tab_id).await;
                if signal.kind == ActivityKind::Navigate && from_active {
                    self.commit(signal).await;
                } else {
                    self.enqueue(signal).await;
                }
            }
            HubMessage::ContextRefreshRequested => {
                self.mark_active(tab_id).await;
                let tabs = self.inner.tabs.lock().await;
                match tabs.commands.get(&tab_id) {
                    Some(commands) => {
                        if commands.try_send(SensorCommand::Recheck).is_err() {
                            log_debug!("tab {} could not take a recheck", tab_id);
                        }
                    }
                    None => log_debug!("refresh requested by unregistered tab {}", tab_id),
                }
            }
            HubMessage::MediaCaptured(capture) => {
                let mut media = self.inner.media.lock().await;
                media.retain(|cached| normalize_url(&cached.url) != normalize_url(&capture.url));
                media.push_back(capture);
                while media.len() > self.inner.config.media_cache_size {
                    media.pop_front();
                }
            }
        }
    }

    /// The current signal, or the empty placeholder before anything arrived.
    pub async fn last_context(&self) -> ActivitySignal {
        self.inner
            .current
            .read()
            .await
            .clone()
            .unwrap_or_else(ActivitySignal::empty)
    }

    pub async fn register_tab(&self, tab_id: TabId, commands: mpsc::Sender<SensorCommand>) {
        let mut tabs = self.inner.tabs.lock().await;
        tabs.commands.insert(tab_id, commands);
        if tabs.active.is_none() {
            tabs.active = Some(tab_id);
        }
        log_debug!("registered tab {} ({} connected)", tab_id, tabs.commands.len());
    }

    pub async fn unregister_tab(&self, tab_id: TabId) {
        let mut tabs = self.inner.tabs.lock().await;
        tabs.commands.remove(&tab_id);
        if tabs.active == Some(tab_id) {
            tabs.active = None;
        }
        log_debug!("unregistered tab {} ({} connected)", tab_id, tabs.commands.len());
    }

    pub async fn active_tab(&self) -> Option<TabId> {
        self.inner.tabs.lock().await.active
    }

    /// Ask the active tab for a frame of its playing video. Any failure,
    /// including a slow page, yields `None`.
    pub async fn request_video_frame(&self) -> Option<VideoFrame> {
        let commands = {
            let tabs = self.inner.tabs.lock().await;
            let active = tabs.active?;
            tabs.commands.get(&active).cloned()?
        };

        // The deadline covers queueing the command as well as the reply.
        let request = async move {
            let (reply_tx, reply_rx) = oneshot::channel();
            commands.send(SensorCommand::CaptureFrame(reply_tx)).await.ok()?;
            reply_rx.await.ok().flatten()
        };

        match time::timeout(self.inner.config.frame_timeout(), request).await {
            Ok(frame) => frame,
            Err(_) => {
                log_debug!("video frame request timed out");
                None
            }
        }
    }

    /// Most recent media snapshot captured on `url`.
    pub async fn latest_media(&self, url: &str) -> Option<MediaCapture> {
        let wanted = normalize_url(url);
        let media = self.inner.media.lock().await;
        media
            .iter()
            .rev()
            .find(|capture| normalize_url(&capture.url) == wanted)
            .cloned()
    }

    pub async fn pending(&self) -> usize {
        self.inner.queue.lock().await.queue.len()
    }

    /// Returns whether `tab_id` already was the active tab.
    async fn mark_active(&self, tab_id: TabId) -> bool {
        let mut tabs = self.inner.tabs.lock().await;
        let was_active = tabs.active.map_or(true, |active| active == tab_id);
        tabs.active = Some(tab_id);
        was_active
    }

    async fn commit(&self, signal: ActivitySignal) {
        log_debug!("context -> {} {}", signal.kind.as_str(), signal.description);
        *self.inner.current.write().await = Some(signal.clone());
        // No subscriber is fine.
        let _ = self.inner.updates.send(signal);
    }

    async fn enqueue(&self, signal: ActivitySignal) {
        let mut state = self.inner.queue.lock().await;
        if let Some(evicted) = state.queue.enqueue(signal) {
            log_debug!("backpressure evicted {}", evicted.description);
        }
        if !state.flushing {
            state.flushing = true;
            self.spawn_flush();
        }
    }

    fn spawn_flush(&self) {
        let hub = self.clone();
        let period = self.inner.config.flush_interval();
        tokio::spawn(async move {
            let mut ticker = time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticker.tick().await;

            loop {
                ticker.tick().await;
                let next = {
                    let mut state = hub.inner.queue.lock().await;
                    match state.queue.pop() {
                        Some(signal) => signal,
                        None => {
                            state.flushing = false;
                            break;
                        }
                    }
                };
                hub.commit(next).await;

                let mut state = hub.inner.queue.lock().await;
                if state.queue.is_empty() {
                    state.flushing = false;
                    break;
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{PageLocation, SELECTION_DESCRIPTION};
    use std::time::Duration;

    fn location() -> PageLocation {
        PageLocation::new("https://a.test/page", "A page")
    }

    fn activity(tab_id: TabId, kind: ActivityKind, description: &str) -> Envelope {
        Envelope {
            tab_id,
            message: HubMessage::BrowserActivity(ActivitySignal::new(&location(), kind, description)),
        }
    }

    #[tokio::test]
    async fn last_context_defaults_to_placeholder() {
        let (hub, _inbox) = ContextHub::new(DispatchConfig::default());
        assert!(hub.last_context().await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn navigation_commits_immediately() {
        let (hub, _inbox) = ContextHub::new(DispatchConfig::default());
        let mut updates = hub.subscribe();
        hub.handle(activity(1, ActivityKind::Navigate, "Navigated")).await;

        assert_eq!(hub.last_context().await.kind, ActivityKind::Navigate);
        assert_eq!(updates.try_recv().unwrap().description, "Navigated");
    }

    #[tokio::test(start_paused = true)]
    async fn queued_signals_flush_one_per_tick_in_priority_order() {
        let (hub, _inbox) = ContextHub::new(DispatchConfig::default());
        let mut updates = hub.subscribe();

        hub.handle(activity(1, ActivityKind::Idle, "Idle for 60s")).await;
        hub.handle(activity(1, ActivityKind::Interaction, "Scrolling fast")).await;
        hub.handle(activity(1, ActivityKind::Interaction, SELECTION_DESCRIPTION)).await;
        assert!(updates.try_recv().is_err());

        time::sleep(Duration::from_millis(310)).await;
        assert_eq!(updates.try_recv().unwrap().description, SELECTION_DESCRIPTION);
        assert!(updates.try_recv().is_err());

        time::sleep(Duration::from_millis(300)).await;
        assert_eq!(updates.try_recv().unwrap().description, "Idle for 60s");
        time::sleep(Duration::from_millis(300)).await;
        assert_eq!(updates.try_recv().unwrap().description, "Scrolling fast");
        assert_eq!(hub.pending().await, 0);

        // Drained flusher restarts on the next enqueue.
        hub.handle(activity(1, ActivityKind::Input, "Typing furiously")).await;
        time::sleep(Duration::from_millis(310)).await;
        assert_eq!(updates.try_recv().unwrap().description, "Typing furiously");
    }

    #[tokio::test(start_paused = true)]
    async fn navigation_from_background_tab_waits_in_queue() {
        let (hub, _inbox) = ContextHub::new(DispatchConfig::default());
        hub.handle(activity(1, ActivityKind::Navigate, "Tab one")).await;
        hub.handle(activity(2, ActivityKind::Navigate, "Tab two")).await;
        assert_eq!(hub.last_context().await.description, "Tab one");
        assert_eq!(hub.active_tab().await, Some(2));

        time::sleep(Duration::from_millis(310)).await;
        assert_eq!(hub.last_context().await.description, "Tab two");
    }

    #[tokio::test(start_paused = true)]
    async fn refresh_request_rechecks_the_tab() {
        let (hub, _inbox) = ContextHub::new(DispatchConfig::default());
        let (tx, mut rx) = mpsc::channel(4);
        hub.register_tab(3, tx).await;
        hub.handle(Envelope {
            tab_id: 3,
            message: HubMessage::ContextRefreshRequested,
        })
        .await;
        assert!(matches!(rx.try_recv(), Ok(SensorCommand::Recheck)));
    }

    #[tokio::test(start_paused = true)]
    async fn video_frame_request_times_out_to_none() {
        let (hub, _inbox) = ContextHub::new(DispatchConfig::default());
        assert!(hub.request_video_frame().await.is_none());

        let (tx, mut rx) = mpsc::channel(4);
        hub.register_tab(5, tx).await;
        // Hold the request without answering.
        let holder = tokio::spawn(async move {
            let command = rx.recv().await;
            time::sleep(Duration::from_secs(10)).await;
            drop(command);
        });
        assert!(hub.request_video_frame().await.is_none());
        holder.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn video_frame_request_gives_up_on_a_stalled_tab() {
        let (hub, _inbox) = ContextHub::new(DispatchConfig::default());
        let (tx, _rx) = mpsc::channel(1);
        tx.try_send(SensorCommand::Recheck).unwrap();
        hub.register_tab(5, tx).await;

        let deadline = DispatchConfig::default().frame_timeout() + Duration::from_millis(100);
        let started = time::Instant::now();
        let outcome = time::timeout(deadline, hub.request_video_frame()).await;
        assert!(matches!(outcome, Ok(None)));
        assert!(started.elapsed() >= DispatchConfig::default().frame_timeout());
    }

    #[tokio::test(start_paused = true)]
    async fn video_frame_request_reaches_active_tab() {
        let (hub, _inbox) = ContextHub::new(DispatchConfig::default());
        let (tx, mut rx) = mpsc::channel(4);
        hub.register_tab(5, tx).await;
        tokio::spawn(async move {
            if let Some(SensorCommand::CaptureFrame(reply)) = rx.recv().await {
                let _ = reply.send(Some(VideoFrame {
                    mime_type: "image/jpeg".into(),
                    data: "Zm9v".into(),
                    url: "https://video.test".into(),
                }));
            }
        });
        let frame = hub.request_video_frame().await.unwrap();
        assert_eq!(frame.data, "Zm9v");
    }

    #[tokio::test]
    async fn media_cache_keeps_latest_per_url() {
        let (hub, _inbox) = ContextHub::new(DispatchConfig {
            media_cache_size: 2,
            ..DispatchConfig::default()
        });
        for (url, data) in [("https://a.test/", "1"), ("https://a.test", "2"), ("https://b.test", "3"), ("https://c.test", "4")] {
            hub.handle(Envelope {
                tab_id: 1,
                message: HubMessage::MediaCaptured(MediaCapture {
                    media_type: "image/png".into(),
                    data: data.into(),
                    url: url.into(),
                    title: String::new(),
                    captured_at: chrono::Utc::now(),
                }),
            })
            .await;
        }
        assert!(hub.latest_media("https://a.test").await.is_none());
        assert_eq!(hub.latest_media("https://c.test").await.unwrap().data, "4");
    }
}
