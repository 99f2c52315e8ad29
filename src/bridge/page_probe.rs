use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, RwLock};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};

use crate::messages::VideoFrame;
use crate::models::PageLocation;
use crate::sensing::PageProbe;

use super::protocol::HostMessage;

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = false;
const LOG_TAG: &str = "bridge.probe";

use crate::log_debug;

#[derive(Debug, Default)]
struct PageView {
    location: Option<PageLocation>,
    excerpt: Option<String>,
}

/// What the host knows about one connected page, kept current by the
/// connection's read loop.
pub struct BridgePage {
    view: RwLock<PageView>,
    outbound: mpsc::UnboundedSender<HostMessage>,
    pending_frames: Mutex<HashMap<u64, oneshot::Sender<Option<VideoFrame>>>>,
    next_request_id: AtomicU64,
    frame_timeout: Duration,
}

impl BridgePage {
    pub fn new(
        location: PageLocation,
        outbound: mpsc::UnboundedSender<HostMessage>,
        frame_timeout: Duration,
    ) -> Self {
        Self {
            view: RwLock::new(PageView {
                location: Some(location),
                excerpt: None,
            }),
            outbound,
            pending_frames: Mutex::new(HashMap::new()),
            next_request_id: AtomicU64::new(1),
            frame_timeout,
        }
    }

    pub fn set_location(&self, location: PageLocation) {
        let mut view = self.view.write().unwrap_or_else(|e| e.into_inner());
        if view.location.as_ref().map(|l| l.url.as_str()) != Some(location.url.as_str()) {
            view.excerpt = None;
        }
        view.location = Some(location);
    }

    /// Apply a title change to the current URL and return the new location.
    pub fn set_title(&self, title: String) -> PageLocation {
        let mut view = self.view.write().unwrap_or_else(|e| e.into_inner());
        let location = view.location.get_or_insert_with(PageLocation::default);
        location.title = title;
        location.clone()
    }

    pub fn set_excerpt(&self, text: String) {
        let text = text.trim();
        let mut view = self.view.write().unwrap_or_else(|e| e.into_inner());
        view.excerpt = (!text.is_empty()).then(|| text.to_string());
    }

    /// Hand a frame reply to whoever asked for it. Unknown or late ids are
    /// ignored.
    pub fn resolve_frame(&self, request_id: u64, frame: Option<VideoFrame>) {
        let waiter = self
            .pending_frames
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&request_id);
        match waiter {
            Some(tx) => {
                let _ = tx.send(frame);
            }
            None => log_debug!("late frame reply {}", request_id),
        }
    }

    fn forget_request(&self, request_id: u64) {
        self.pending_frames
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&request_id);
    }
}

#[async_trait]
impl PageProbe for BridgePage {
    fn location(&self) -> Option<PageLocation> {
        self.view
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .location
            .clone()
    }

    fn text_excerpt(&self) -> Option<String> {
        self.view
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .excerpt
            .clone()
    }

    async fn capture_video_frame(&self) -> Result<Option<VideoFrame>> {
        let request_id = self.next_request_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.pending_frames
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(request_id, tx);

        if self
            .outbound
            .send(HostMessage::CaptureFrame { request_id })
            .is_err()
        {
            self.forget_request(request_id);
            return Ok(None);
        }

        match tokio::time::timeout(self.frame_timeout, rx).await {
            Ok(Ok(frame)) => Ok(frame),
            Ok(Err(_)) => Ok(None),
            Err(_) => {
                log_debug!("frame request {} timed out", request_id);
                self.forget_request(request_id);
                Ok(None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn page() -> (Arc<BridgePage>, mpsc::UnboundedReceiver<HostMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let page = BridgePage::new(
            PageLocation::new("https://a.test", "A"),
            tx,
            Duration::from_millis(500),
        );
        (Arc::new(page), rx)
    }

    #[test]
    fn new_url_clears_excerpt() {
        let (page, _rx) = page();
        page.set_excerpt("  body text ".into());
        assert_eq!(page.text_excerpt().as_deref(), Some("body text"));

        page.set_location(PageLocation::new("https://a.test", "A again"));
        assert!(page.text_excerpt().is_some());

        page.set_location(PageLocation::new("https://b.test", "B"));
        assert_eq!(page.text_excerpt(), None);
        assert_eq!(page.set_title("B2".into()), PageLocation::new("https://b.test", "B2"));
    }

    #[tokio::test]
    async fn frame_request_round_trips_through_the_page() {
        let (page, mut rx) = page();
        let requester = {
            let page = page.clone();
            tokio::spawn(async move { page.capture_video_frame().await })
        };

        let HostMessage::CaptureFrame { request_id } = rx.recv().await.unwrap();
        page.resolve_frame(
            request_id,
            Some(VideoFrame {
                mime_type: "image/jpeg".into(),
                data: "QUJD".into(),
                url: "https://a.test".into(),
            }),
        );

        let frame = requester.await.unwrap().unwrap().unwrap();
        assert_eq!(frame.data, "QUJD");
    }

    #[tokio::test(start_paused = true)]
    async fn silent_page_times_out_to_none() {
        let (page, _rx) = page();
        assert_eq!(page.capture_video_frame().await.unwrap(), None);
        assert!(page.pending_frames.lock().unwrap().is_empty());
    }
}
