//! Local WebSocket endpoint the page shim connects to, one connection per
//! tab.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

use crate::hub::ContextHub;
use crate::messages::TabId;
use crate::models::PageLocation;
use crate::navigation::StabilityConfig;
use crate::sensing::{ClassifierConfig, PageInput, SensorController, SensorSetup};
use crate::store::SessionStore;

use super::config::BridgeConfig;
use super::page_probe::BridgePage;
use super::protocol::{HostMessage, PageMessage};

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;
const LOG_TAG: &str = "bridge";

use crate::{log_debug, log_info, log_warn};

/// Everything a connection needs to stand up a sensor for its tab.
#[derive(Clone)]
struct BridgeServices {
    config: BridgeConfig,
    hub: ContextHub,
    store: Option<SessionStore>,
    stability: StabilityConfig,
    classifier: ClassifierConfig,
}

pub struct BrowserBridge {
    services: Arc<BridgeServices>,
}

impl BrowserBridge {
    pub fn new(
        config: BridgeConfig,
        hub: ContextHub,
        store: Option<SessionStore>,
        stability: StabilityConfig,
        classifier: ClassifierConfig,
    ) -> Self {
        Self {
            services: Arc::new(BridgeServices {
                config,
                hub,
                store,
                stability,
                classifier,
            }),
        }
    }

    /// Bind and start accepting tabs. Returns the bound address and the
    /// accept loop, which ends when `cancel_token` fires.
    pub async fn start(&self, cancel_token: CancellationToken) -> Result<(SocketAddr, JoinHandle<()>)> {
        let addr = self.services.config.address();
        let listener = TcpListener::bind(&addr)
            .await
            .with_context(|| format!("failed to bind browser bridge on {}", addr))?;
        let local_addr = listener.local_addr().context("bridge has no local address")?;
        log_info!("browser bridge listening on ws://{}", local_addr);

        let services = self.services.clone();
        let handle = tokio::spawn(async move {
            loop {
                let accepted = tokio::select! {
                    _ = cancel_token.cancelled() => break,
                    accepted = listener.accept() => accepted,
                };
                match accepted {
                    Ok((stream, peer)) => {
                        log_debug!("page connected from {}", peer);
                        let services = services.clone();
                        let cancel = cancel_token.child_token();
                        tokio::spawn(async move {
                            if let Err(err) = serve_connection(stream, services, cancel).await {
                                log_warn!("connection from {} ended: {:#}", peer, err);
                            }
                        });
                    }
                    Err(err) => log_warn!("accept failed: {}", err),
                }
            }
            log_debug!("browser bridge stopped");
        });

        Ok((local_addr, handle))
    }
}

/// A tab that has said hello and has a running sensor.
struct ConnectedTab {
    tab_id: TabId,
    page: Arc<BridgePage>,
    sensor: SensorController,
    hub: ContextHub,
}

impl ConnectedTab {
    async fn open(
        services: &BridgeServices,
        tab_id: TabId,
        location: PageLocation,
        browser_session: Option<String>,
        outbound: mpsc::UnboundedSender<HostMessage>,
    ) -> Result<Self> {
        if let (Some(store), Some(session)) = (&services.store, browser_session) {
            match store.begin_epoch(session).await {
                Ok(0) => {}
                Ok(purged) => log_info!("new browser session, dropped {} stale entries", purged),
                Err(err) => log_warn!("could not switch store epoch: {:#}", err),
            }
        }

        let page = Arc::new(BridgePage::new(location, outbound, services.config.frame_timeout()));
        let (command_tx, command_rx) = mpsc::channel(services.config.command_capacity.max(1));
        services.hub.register_tab(tab_id, command_tx).await;

        let mut sensor = SensorController::new();
        let setup = SensorSetup {
            probe: page.clone(),
            hub: services.hub.sender(tab_id),
            store: services.store.clone(),
            stability: services.stability.clone(),
            classifier: services.classifier.clone(),
        };
        if let Err(err) = sensor.start_sensing(setup, command_rx) {
            services.hub.unregister_tab(tab_id).await;
            return Err(err);
        }

        Ok(Self {
            tab_id,
            page,
            sensor,
            hub: services.hub.clone(),
        })
    }

    fn apply(&self, message: PageMessage) {
        let accepted = match message {
            PageMessage::Hello { .. } => {
                log_debug!("tab {} repeated hello", self.tab_id);
                true
            }
            PageMessage::Location { url, title } => {
                let location = PageLocation::new(url, title);
                self.page.set_location(location.clone());
                self.sensor.feed(PageInput::Location(location))
            }
            PageMessage::TitleMutated { title } => {
                let location = self.page.set_title(title);
                self.sensor.feed(PageInput::TitleMutated(location))
            }
            PageMessage::HistoryNavigated { url, title } => {
                let location = PageLocation::new(url, title);
                self.page.set_location(location.clone());
                self.sensor.feed(PageInput::HistoryNavigated(location))
            }
            PageMessage::Excerpt { text } => {
                self.page.set_excerpt(text);
                true
            }
            PageMessage::Event { event } => self.sensor.feed(PageInput::Event(event)),
            PageMessage::MediaCaptured(capture) => self.sensor.feed(PageInput::MediaCaptured(capture)),
            PageMessage::Frame { request_id, frame } => {
                self.page.resolve_frame(request_id, frame);
                true
            }
        };
        if !accepted {
            log_debug!("tab {} sensor is backed up, dropped a report", self.tab_id);
        }
    }

    async fn close(mut self) {
        if let Err(err) = self.sensor.stop_sensing().await {
            log_warn!("tab {} sensor did not stop cleanly: {:#}", self.tab_id, err);
        }
        self.hub.unregister_tab(self.tab_id).await;
        log_info!("tab {} disconnected", self.tab_id);
    }
}

async fn serve_connection(
    stream: TcpStream,
    services: Arc<BridgeServices>,
    cancel_token: CancellationToken,
) -> Result<()> {
    let ws_stream = accept_async(stream).await.context("WebSocket handshake failed")?;
    let (mut write, mut read) = ws_stream.split();

    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<HostMessage>();
    let writer = tokio::spawn(async move {
        while let Some(message) = outbound_rx.recv().await {
            let json = match serde_json::to_string(&message) {
                Ok(json) => json,
                Err(err) => {
                    log_warn!("could not encode {:?}: {}", message, err);
                    continue;
                }
            };
            if write.send(Message::Text(json.into())).await.is_err() {
                break;
            }
        }
        let _ = write.close().await;
    });

    let mut tab: Option<ConnectedTab> = None;
    loop {
        let next = tokio::select! {
            _ = cancel_token.cancelled() => break,
            next = read.next() => next,
        };
        let text = match next {
            Some(Ok(Message::Text(text))) => text.as_str().to_string(),
            Some(Ok(Message::Close(_))) | None => break,
            Some(Ok(_)) => continue,
            Some(Err(err)) => {
                log_debug!("WebSocket error: {}", err);
                break;
            }
        };

        let message = match serde_json::from_str::<PageMessage>(&text) {
            Ok(message) => message,
            Err(err) => {
                log_debug!("ignoring malformed page message: {}", err);
                continue;
            }
        };

        if let Some(connected) = &tab {
            connected.apply(message);
            continue;
        }

        let PageMessage::Hello {
            tab_id,
            url,
            title,
            browser_session,
        } = message
        else {
            log_debug!("ignoring page message before hello");
            continue;
        };
        log_info!("tab {} connected on {}", tab_id, url);
        let location = PageLocation::new(url, title);
        match ConnectedTab::open(&services, tab_id, location, browser_session, outbound_tx.clone()).await {
            Ok(connected) => tab = Some(connected),
            Err(err) => {
                writer.abort();
                return Err(err);
            }
        }
    }

    if let Some(connected) = tab {
        connected.close().await;
    }
    drop(outbound_tx);
    writer.abort();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use tokio_tungstenite::connect_async;

    use crate::hub::DispatchConfig;
    use crate::models::ActivityKind;

    async fn start_bridge() -> (ContextHub, SocketAddr, CancellationToken) {
        let cancel = CancellationToken::new();
        let (hub, inbox) = ContextHub::new(DispatchConfig::default());
        hub.spawn(inbox, cancel.clone());

        let config = BridgeConfig {
            port: 0,
            ..BridgeConfig::default()
        };
        let stability = StabilityConfig {
            poll_interval_ms: 10,
            ..StabilityConfig::default()
        };
        let bridge = BrowserBridge::new(config, hub.clone(), None, stability, ClassifierConfig::default());
        let (addr, _) = bridge.start(cancel.clone()).await.unwrap();
        (hub, addr, cancel)
    }

    #[tokio::test]
    async fn hello_starts_a_sensor_that_reports_navigation() {
        let (hub, addr, cancel) = start_bridge().await;
        let mut updates = hub.subscribe();

        let (mut ws, _) = connect_async(format!("ws://{}", addr)).await.unwrap();
        ws.send(Message::Text(
            r#"{"type":"hello","tabId":3,"url":"https://alpha.test/read","title":"Alpha article"}"#.into(),
        ))
        .await
        .unwrap();

        let signal = tokio::time::timeout(Duration::from_secs(5), updates.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(signal.kind, ActivityKind::Navigate);
        assert_eq!(signal.page_title, "Alpha article");
        assert_eq!(hub.active_tab().await, Some(3));

        ws.close(None).await.unwrap();
        tokio::time::timeout(Duration::from_secs(5), async {
            while hub.active_tab().await.is_some() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
        cancel.cancel();
    }

    #[tokio::test]
    async fn frame_requests_reach_the_page() {
        let (hub, addr, cancel) = start_bridge().await;
        let mut updates = hub.subscribe();

        let (mut ws, _) = connect_async(format!("ws://{}", addr)).await.unwrap();
        ws.send(Message::Text(
            r#"{"type":"hello","tabId":8,"url":"https://video.test/clip","title":"Clip of the day"}"#.into(),
        ))
        .await
        .unwrap();
        tokio::time::timeout(Duration::from_secs(5), updates.recv())
            .await
            .unwrap()
            .unwrap();

        let request = {
            let hub = hub.clone();
            tokio::spawn(async move { hub.request_video_frame().await })
        };

        let request_id = loop {
            let msg = tokio::time::timeout(Duration::from_secs(5), ws.next())
                .await
                .unwrap()
                .unwrap()
                .unwrap();
            if let Message::Text(text) = msg {
                let value: serde_json::Value = serde_json::from_str(text.as_str()).unwrap();
                assert_eq!(value["type"], "captureFrame");
                break value["requestId"].as_u64().unwrap();
            }
        };
        let reply = format!(
            r#"{{"type":"frame","requestId":{},"frame":{{"mimeType":"image/jpeg","data":"QUJD"}}}}"#,
            request_id
        );
        ws.send(Message::Text(reply.into())).await.unwrap();

        let frame = request.await.unwrap().unwrap();
        assert_eq!(frame.mime_type, "image/jpeg");
        assert_eq!(frame.data, "QUJD");
        cancel.cancel();
    }
}
