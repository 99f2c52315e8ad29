use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use cyberpet_lib::messages::{Envelope, HubMessage, HubSender, VideoFrame};
use cyberpet_lib::models::{ActivityKind, ActivitySignal, PageLocation};
use cyberpet_lib::navigation::StabilityConfig;
use cyberpet_lib::sensing::{
    ClassifierConfig, PageInput, PageProbe, SensorController, SensorSetup, UserEvent,
};

struct ScriptedPage {
    location: Mutex<PageLocation>,
}

impl ScriptedPage {
    fn new(url: &str, title: &str) -> Arc<Self> {
        Arc::new(Self {
            location: Mutex::new(PageLocation::new(url, title)),
        })
    }

    fn set_title(&self, title: &str) {
        self.location.lock().unwrap().title = title.to_string();
    }
}

#[async_trait]
impl PageProbe for ScriptedPage {
    fn location(&self) -> Option<PageLocation> {
        Some(self.location.lock().unwrap().clone())
    }

    fn text_excerpt(&self) -> Option<String> {
        None
    }

    async fn capture_video_frame(&self) -> anyhow::Result<Option<VideoFrame>> {
        Ok(None)
    }
}

struct Sensor {
    controller: SensorController,
    hub_rx: mpsc::Receiver<Envelope>,
    _commands: mpsc::Sender<cyberpet_lib::messages::SensorCommand>,
}

fn start(page: Arc<ScriptedPage>) -> Sensor {
    let (hub_tx, hub_rx) = mpsc::channel(64);
    let (command_tx, command_rx) = mpsc::channel(4);
    let mut controller = SensorController::new();
    controller
        .start_sensing(
            SensorSetup {
                probe: page,
                hub: HubSender::new(1, hub_tx),
                store: None,
                stability: StabilityConfig::default(),
                classifier: ClassifierConfig::default(),
            },
            command_rx,
        )
        .unwrap();
    Sensor {
        controller,
        hub_rx,
        _commands: command_tx,
    }
}

fn signals(rx: &mut mpsc::Receiver<Envelope>, kind: ActivityKind) -> Vec<ActivitySignal> {
    let mut out = Vec::new();
    while let Ok(envelope) = rx.try_recv() {
        if let HubMessage::BrowserActivity(signal) = envelope.message {
            if signal.kind == kind {
                out.push(signal);
            }
        }
    }
    out
}

#[tokio::test(start_paused = true)]
async fn placeholder_title_settles_into_one_navigation() {
    let page = ScriptedPage::new("https://example.com/", "Example");
    let mut sensor = start(page.clone());

    tokio::time::sleep(Duration::from_millis(160)).await;
    page.set_title("Example");
    tokio::time::sleep(Duration::from_millis(150)).await;
    page.set_title("Welcome - Example");
    tokio::time::sleep(Duration::from_secs(5)).await;

    sensor.controller.stop_sensing().await.unwrap();
    let navigations = signals(&mut sensor.hub_rx, ActivityKind::Navigate);
    assert_eq!(navigations.len(), 1);
    assert_eq!(navigations[0].page_title, "Welcome - Example");
    assert_eq!(navigations[0].source_url, "https://example.com/");
}

#[tokio::test(start_paused = true)]
async fn idle_fires_once_until_the_user_returns() {
    let page = ScriptedPage::new("https://docs.test/guide", "Install guide");
    let mut sensor = start(page);

    tokio::time::sleep(Duration::from_secs(61)).await;
    assert_eq!(signals(&mut sensor.hub_rx, ActivityKind::Idle).len(), 1);

    tokio::time::sleep(Duration::from_secs(120)).await;
    assert!(signals(&mut sensor.hub_rx, ActivityKind::Idle).is_empty());

    assert!(sensor.controller.feed(PageInput::Event(UserEvent::PointerMove)));
    tokio::time::sleep(Duration::from_secs(59)).await;
    assert!(signals(&mut sensor.hub_rx, ActivityKind::Idle).is_empty());

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(signals(&mut sensor.hub_rx, ActivityKind::Idle).len(), 1);

    sensor.controller.stop_sensing().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn movement_before_the_limit_prevents_idle() {
    let page = ScriptedPage::new("https://docs.test/guide", "Install guide");
    let mut sensor = start(page);

    tokio::time::sleep(Duration::from_secs(45)).await;
    assert!(sensor.controller.feed(PageInput::Event(UserEvent::PointerMove)));
    tokio::time::sleep(Duration::from_secs(45)).await;
    assert!(signals(&mut sensor.hub_rx, ActivityKind::Idle).is_empty());

    sensor.controller.stop_sensing().await.unwrap();
}
