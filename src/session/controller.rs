//! The session orchestrator: one live voice session, fed by the context hub.
//!
//! Every task spawned for a session (transport event pump, writer, drain
//! checks, media attachment) carries the generation it was started under and
//! turns into a no-op once a newer connect or a teardown bumps it.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, oneshot, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::hub::ContextHub;
use crate::messages::MediaCapture;
use crate::models::{ActivityKind, ActivitySignal, SessionContext, SessionStatus};

use super::config::SessionConfig;
use super::error::SessionError;
use super::pcm::{duration_secs, f32_to_pcm16, pcm16_to_f32};
use super::playback::AudioSink;
use super::prompt::{activity_prompt, initial_context_prompt};
use super::state::{ContextDecision, OrchestratorState};
use super::transport::{LiveConfig, LiveConnector, LiveSession, ServerEvent, Turn};

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;
const LOG_TAG: &str = "session";

use crate::{log_debug, log_error, log_info, log_warn};

enum Outbound {
    Turn(Turn),
    Audio { pcm: Vec<u8>, sample_rate: u32 },
}

/// Plumbing for the running session.
struct LiveLink {
    generation: u64,
    outbound: mpsc::UnboundedSender<Outbound>,
    ready: Option<oneshot::Sender<Arc<dyn LiveSession>>>,
    session: Option<Arc<dyn LiveSession>>,
}

struct Inner {
    state: OrchestratorState,
    live: Option<LiveLink>,
}

#[derive(Clone)]
pub struct SessionOrchestrator {
    inner: Arc<Mutex<Inner>>,
    config: Arc<SessionConfig>,
    connector: Arc<dyn LiveConnector>,
    hub: ContextHub,
    sink: Arc<dyn AudioSink>,
    status_tx: Arc<watch::Sender<SessionContext>>,
}

impl SessionOrchestrator {
    pub fn new(
        config: SessionConfig,
        connector: Arc<dyn LiveConnector>,
        hub: ContextHub,
        sink: Arc<dyn AudioSink>,
    ) -> Self {
        let state = OrchestratorState::new(&config);
        let (status_tx, _) = watch::channel(state.snapshot());
        Self {
            inner: Arc::new(Mutex::new(Inner { state, live: None })),
            config: Arc::new(config),
            connector,
            hub,
            sink,
            status_tx: Arc::new(status_tx),
        }
    }

    /// Display state: lifecycle, current context and last error.
    pub fn subscribe_status(&self) -> watch::Receiver<SessionContext> {
        self.status_tx.subscribe()
    }

    pub async fn snapshot(&self) -> SessionContext {
        self.inner.lock().await.state.snapshot()
    }

    pub async fn status(&self) -> SessionStatus {
        self.inner.lock().await.state.status
    }

    pub async fn connect(&self, api_key: Option<String>) -> Result<(), SessionError> {
        let api_key = api_key
            .map(|key| key.trim().to_string())
            .filter(|key| !key.is_empty())
            .ok_or(SessionError::MissingApiKey)?;

        let session_id = Uuid::new_v4().to_string();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (ready_tx, ready_rx) = oneshot::channel();

        let generation = {
            let mut inner = self.inner.lock().await;
            if matches!(
                inner.state.status,
                SessionStatus::Connecting | SessionStatus::Idle | SessionStatus::Speaking
            ) {
                return Err(SessionError::AlreadyActive);
            }
            let generation = inner.state.begin_connect(session_id.clone(), &self.config);
            inner.live = Some(LiveLink {
                generation,
                outbound: outbound_tx,
                ready: Some(ready_tx),
                session: None,
            });
            self.publish(&inner.state);
            generation
        };
        log_info!("session {} connecting (generation {})", session_id, generation);

        tokio::spawn(self.clone().run_writer(generation, ready_rx, outbound_rx));

        let live_config = LiveConfig {
            endpoint: self.config.endpoint.clone(),
            api_key,
            model: self.config.model.clone(),
            voice: self.config.voice.clone(),
            system_prompt: self.config.system_prompt.clone(),
        };
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        match self.connector.connect(&live_config, events_tx).await {
            Ok(session) => {
                let attached = {
                    let mut inner = self.inner.lock().await;
                    match inner.live.as_mut() {
                        Some(live) if live.generation == generation => {
                            live.session = Some(Arc::clone(&session));
                            true
                        }
                        _ => false,
                    }
                };
                if !attached {
                    log_debug!("session {} superseded while connecting", session_id);
                    session.close().await;
                    return Ok(());
                }
                tokio::spawn(self.clone().pump_events(generation, events_rx));
                Ok(())
            }
            Err(err) => {
                let error = SessionError::Handshake(format!("{err:#}"));
                self.fail(generation, error.clone()).await;
                Err(error)
            }
        }
    }

    pub async fn disconnect(&self) {
        let session = {
            let mut inner = self.inner.lock().await;
            if inner.state.status == SessionStatus::Disconnected && inner.live.is_none() {
                return;
            }
            inner.state.teardown();
            inner.state.playback.reset(Instant::now());
            self.publish(&inner.state);
            inner.live.take().and_then(|live| live.session)
        };

        self.sink.stop_all();
        if let Some(session) = session {
            session.close().await;
        }
        log_info!("session disconnected");
    }

    /// Feed a new context signal. The display always follows; a prompt is
    /// only sent when the session is ready for one.
    pub async fn handle_context(&self, signal: ActivitySignal, now: Instant) -> ContextDecision {
        let (generation, selection) = {
            let mut inner = self.inner.lock().await;
            inner.state.observe_context(&signal);
            self.publish(&inner.state);

            if let Err(reason) = inner.state.prompt_gate(&signal, now, &self.config) {
                log_debug!("not prompting for {}: {:?}", signal.kind.as_str(), reason);
                return ContextDecision::Skipped(reason);
            }
            inner.state.last_prompt_at = Some(now);
            (inner.state.generation, inner.state.carried_selection.clone())
        };

        let turn = Turn::text(activity_prompt(
            &signal,
            selection.as_deref(),
            self.config.excerpt_max_chars,
        ));

        log_info!("prompted for {} on {}", signal.kind.as_str(), signal.source_url);
        if signal.kind == ActivityKind::Media {
            let this = self.clone();
            tokio::spawn(async move {
                let turn = this.attach_media(turn, &signal).await;
                this.submit_for(generation, turn).await;
            });
        } else {
            self.submit_for(generation, turn).await;
        }
        ContextDecision::Prompted
    }

    /// Queue a turn on the current session. Turns submitted before the
    /// handshake completes go out, in order, right after it.
    pub async fn submit(&self, turn: Turn) -> bool {
        let generation = self.inner.lock().await.state.generation;
        self.submit_for(generation, turn).await
    }

    /// One microphone frame at the configured input rate.
    pub async fn on_microphone_frame(&self, samples: &[f32], now: Instant) {
        let (outbound, interrupted) = {
            let mut inner = self.inner.lock().await;
            if !inner.state.status.is_active() {
                return;
            }

            let mut interrupted = false;
            if inner.state.vad.detect(samples, now) {
                if inner.state.playback.is_playing(now) {
                    inner.state.playback.reset(now);
                    inner.state.finish_speaking(now);
                    interrupted = true;
                }
                inner.state.user_speaking_until = Some(now + self.config.user_speech_hold());
                self.publish(&inner.state);
            }
            (inner.live.as_ref().map(|live| live.outbound.clone()), interrupted)
        };

        if interrupted {
            log_debug!("user spoke over the model, playback stopped");
            self.sink.stop_all();
        }
        if let Some(outbound) = outbound {
            let _ = outbound.send(Outbound::Audio {
                pcm: f32_to_pcm16(samples),
                sample_rate: self.config.input_sample_rate,
            });
        }
    }

    /// Report that the microphone could not be opened. Only the first report
    /// per session reaches the status line.
    pub async fn microphone_unavailable(&self, reason: impl Into<String>) {
        let mut inner = self.inner.lock().await;
        if inner.state.microphone_error_reported {
            return;
        }
        inner.state.microphone_error_reported = true;
        let error = SessionError::Microphone(reason.into());
        log_warn!("{}", error);
        inner.state.error = Some(error.to_string());
        self.publish(&inner.state);
    }

    /// Forward every hub context update into [`Self::handle_context`].
    pub fn spawn_context_listener(&self, cancel_token: CancellationToken) -> JoinHandle<()> {
        let mut updates = self.hub.subscribe();
        let this = self.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel_token.cancelled() => break,
                    update = updates.recv() => match update {
                        Ok(signal) => {
                            this.handle_context(signal, Instant::now()).await;
                        }
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            log_debug!("context listener skipped {} updates", skipped);
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                }
            }
        })
    }

    fn publish(&self, state: &OrchestratorState) {
        self.status_tx.send_replace(state.snapshot());
    }

    async fn is_current(&self, generation: u64) -> bool {
        self.inner.lock().await.state.is_current(generation)
    }

    async fn submit_for(&self, generation: u64, turn: Turn) -> bool {
        let inner = self.inner.lock().await;
        match &inner.live {
            Some(live) if live.generation == generation => live.outbound.send(Outbound::Turn(turn)).is_ok(),
            _ => false,
        }
    }

    /// Attach a just-in-time video frame, or failing that the latest media
    /// snapshot of the page.
    async fn attach_media(&self, turn: Turn, signal: &ActivitySignal) -> Turn {
        if let Some(frame) = self.hub.request_video_frame().await {
            return turn.with_inline(frame.mime_type, frame.data);
        }
        match self.hub.latest_media(&signal.source_url).await.as_ref().and_then(inline_payload) {
            Some((mime_type, data)) => turn.with_inline(mime_type, data),
            None => turn,
        }
    }

    async fn run_writer(
        self,
        generation: u64,
        ready: oneshot::Receiver<Arc<dyn LiveSession>>,
        mut outbound: mpsc::UnboundedReceiver<Outbound>,
    ) {
        let Ok(session) = ready.await else {
            return;
        };

        while let Some(item) = outbound.recv().await {
            if !self.is_current(generation).await {
                break;
            }
            let result = match &item {
                Outbound::Turn(turn) => session.send_turn(turn).await,
                Outbound::Audio { pcm, sample_rate } => session.send_audio(pcm, *sample_rate).await,
            };
            if let Err(err) = result {
                self.fail(generation, SessionError::Transport(format!("{err:#}"))).await;
                break;
            }
        }
    }

    async fn pump_events(self, generation: u64, mut events: mpsc::UnboundedReceiver<ServerEvent>) {
        while let Some(event) = events.recv().await {
            if !self.is_current(generation).await {
                return;
            }
            match event {
                ServerEvent::Open => self.on_open(generation).await,
                ServerEvent::Audio(pcm) => self.on_audio(generation, &pcm, Instant::now()).await,
                ServerEvent::Text(text) => log_debug!("model text: {}", text),
                ServerEvent::TurnComplete => log_debug!("model turn complete"),
                ServerEvent::Interrupted => self.interrupt_playback(generation, Instant::now()).await,
                ServerEvent::Closed => break,
                ServerEvent::Error(message) => {
                    self.fail(generation, SessionError::Transport(message)).await;
                    return;
                }
            }
        }
        self.close_from_server(generation).await;
    }

    async fn on_open(&self, generation: u64) {
        let ready = {
            let mut inner = self.inner.lock().await;
            if !inner.state.is_current(generation) || !inner.state.transition(SessionStatus::Idle) {
                return;
            }
            self.publish(&inner.state);
            inner
                .live
                .as_mut()
                .and_then(|live| live.ready.take().zip(live.session.clone()))
        };
        if let Some((ready_tx, session)) = ready {
            let _ = ready_tx.send(session);
        }
        log_info!("session open");

        if !self.config.send_initial_context {
            return;
        }
        let context = self.hub.last_context().await;
        if context.is_empty() {
            log_debug!("no initial context, staying quiet");
            return;
        }
        {
            let mut inner = self.inner.lock().await;
            if !inner.state.is_current(generation) {
                return;
            }
            inner.state.observe_context(&context);
            inner.state.last_prompt_at = Some(Instant::now());
            self.publish(&inner.state);
        }
        self.submit_for(generation, Turn::text(initial_context_prompt(&context))).await;
    }

    async fn on_audio(&self, generation: u64, pcm: &[u8], now: Instant) {
        let samples = pcm16_to_f32(pcm);
        let rate = self.config.output_sample_rate;

        let ends_at = {
            let mut inner = self.inner.lock().await;
            if !inner.state.is_current(generation) {
                return;
            }
            if samples.is_empty() {
                // An empty chunk must not leave the status stuck on speaking.
                if inner.state.finish_speaking(now) {
                    self.publish(&inner.state);
                }
                return;
            }
            let duration = Duration::from_secs_f64(duration_secs(samples.len(), rate));
            let ends_at = inner.state.playback.schedule(duration, now);
            if inner.state.begin_speaking() {
                self.publish(&inner.state);
            }
            ends_at
        };

        self.sink.play(&samples, rate);

        let this = self.clone();
        let check_at = ends_at + self.config.playback_settle();
        tokio::spawn(async move {
            time::sleep_until(check_at).await;
            this.check_drained(generation).await;
        });
    }

    async fn check_drained(&self, generation: u64) {
        let now = Instant::now();
        let mut inner = self.inner.lock().await;
        if !inner.state.is_current(generation) {
            return;
        }
        if inner.state.playback.is_settled(now, self.config.playback_settle()) && inner.state.finish_speaking(now) {
            self.publish(&inner.state);
        }
    }

    async fn interrupt_playback(&self, generation: u64, now: Instant) {
        {
            let mut inner = self.inner.lock().await;
            if !inner.state.is_current(generation) {
                return;
            }
            inner.state.playback.reset(now);
            if inner.state.finish_speaking(now) {
                self.publish(&inner.state);
            }
        }
        self.sink.stop_all();
    }

    async fn close_from_server(&self, generation: u64) {
        let session = {
            let mut inner = self.inner.lock().await;
            if !inner.state.is_current(generation) {
                return;
            }
            inner.state.teardown();
            self.publish(&inner.state);
            inner.live.take().and_then(|live| live.session)
        };
        log_info!("session closed by server");
        self.sink.stop_all();
        if let Some(session) = session {
            session.close().await;
        }
    }

    /// Transport failure: surface the error, then settle in `Disconnected`.
    /// Reconnecting is left to the user.
    async fn fail(&self, generation: u64, error: SessionError) {
        let session = {
            let mut inner = self.inner.lock().await;
            if !inner.state.is_current(generation) {
                return;
            }
            log_error!("{}", error);
            inner.state.enter_error(error.to_string());
            self.publish(&inner.state);
            inner.state.teardown();
            self.publish(&inner.state);
            inner.live.take().and_then(|live| live.session)
        };
        self.sink.stop_all();
        if let Some(session) = session {
            session.close().await;
        }
    }
}

/// `(mime_type, base64)` for snapshots that can be sent inline. Remote URLs
/// cannot.
fn inline_payload(capture: &MediaCapture) -> Option<(String, String)> {
    let data = capture.data.trim();
    if let Some(rest) = data.strip_prefix("data:") {
        let (header, payload) = rest.split_once(',')?;
        let mime_type = header.strip_suffix(";base64")?;
        return Some((mime_type.to_string(), payload.to_string()));
    }
    if data.starts_with("http://") || data.starts_with("https://") || data.is_empty() {
        return None;
    }
    Some((capture.media_type.clone(), data.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn capture(media_type: &str, data: &str) -> MediaCapture {
        MediaCapture {
            media_type: media_type.into(),
            data: data.into(),
            url: "https://a.test".into(),
            title: String::new(),
            captured_at: chrono::Utc::now(),
        }
    }

    #[test]
    fn inline_payload_accepts_data_urls_and_raw_base64() {
        assert_eq!(
            inline_payload(&capture("image/png", "data:image/jpeg;base64,QUJD")),
            Some(("image/jpeg".into(), "QUJD".into()))
        );
        assert_eq!(
            inline_payload(&capture("image/png", "QUJD")),
            Some(("image/png".into(), "QUJD".into()))
        );
        assert_eq!(inline_payload(&capture("image/png", "https://cdn.test/a.png")), None);
        assert_eq!(inline_payload(&capture("image/png", "data:text/plain,hello")), None);
    }
}
