//! Message contract between sensors, the context hub and the session
//! orchestrator.
//!
//! | message                   | direction            | delivery                 |
//! |---------------------------|----------------------|--------------------------|
//! | `BrowserActivity`         | sensor → hub         | fire-and-forget          |
//! | `ContextRefreshRequested` | sensor → hub         | fire-and-forget          |
//! | `MediaCaptured`           | sensor → hub         | fire-and-forget          |
//! | `GetLastContext`          | orchestrator → hub   | `ContextHub::last_context` |
//! | `ContextUpdated`          | hub → orchestrator   | broadcast, best effort   |
//! | `GetVideoFrame`           | orchestrator → hub → sensor | `ContextHub::request_video_frame` |
//!
//! Sensor → hub traffic rides a bounded channel with at-most-once semantics:
//! a full or closed channel drops the message. Ordering is only guaranteed
//! per sender.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};

use crate::models::ActivitySignal;

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;
const LOG_TAG: &str = "messages";

use crate::log_debug;

pub type TabId = i64;

/// A still image the page captured (screenshot, poster, canvas) for on-demand
/// visual description.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MediaCapture {
    pub media_type: String,
    /// Base64 payload or a data/http URL.
    pub data: String,
    pub url: String,
    pub title: String,
    #[serde(default = "Utc::now")]
    pub captured_at: DateTime<Utc>,
}

/// A just-in-time frame grabbed from the page's playing video.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VideoFrame {
    pub mime_type: String,
    pub data: String,
    #[serde(default)]
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "payload", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HubMessage {
    BrowserActivity(ActivitySignal),
    ContextRefreshRequested,
    MediaCaptured(MediaCapture),
}

impl HubMessage {
    pub fn name(&self) -> &'static str {
        match self {
            HubMessage::BrowserActivity(_) => "BROWSER_ACTIVITY",
            HubMessage::ContextRefreshRequested => "CONTEXT_REFRESH_REQUESTED",
            HubMessage::MediaCaptured(_) => "MEDIA_CAPTURED",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Envelope {
    pub tab_id: TabId,
    pub message: HubMessage,
}

/// Requests the hub makes of a tab's sensor.
#[derive(Debug)]
pub enum SensorCommand {
    /// Re-run navigation detection against the tab's current location.
    Recheck,
    CaptureFrame(oneshot::Sender<Option<VideoFrame>>),
}

/// A sensor's handle on the hub inbox.
#[derive(Debug, Clone)]
pub struct HubSender {
    tab_id: TabId,
    tx: mpsc::Sender<Envelope>,
}

impl HubSender {
    pub fn new(tab_id: TabId, tx: mpsc::Sender<Envelope>) -> Self {
        Self { tab_id, tx }
    }

    pub fn tab_id(&self) -> TabId {
        self.tab_id
    }

    /// Best-effort delivery. Returns whether the message was accepted; a
    /// missing or saturated hub is not an error for the sender.
    pub fn send(&self, message: HubMessage) -> bool {
        let name = message.name();
        match self.tx.try_send(Envelope {
            tab_id: self.tab_id,
            message,
        }) {
            Ok(()) => true,
            Err(err) => {
                log_debug!("tab {} dropped {}: {}", self.tab_id, name, err);
                false
            }
        }
    }
}
