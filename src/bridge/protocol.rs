//! JSON spoken between the page shim and the host.

use serde::{Deserialize, Serialize};

use crate::messages::{MediaCapture, TabId, VideoFrame};
use crate::sensing::UserEvent;

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum PageMessage {
    /// First message on every connection.
    Hello {
        tab_id: TabId,
        url: String,
        #[serde(default)]
        title: String,
        /// Stable for the lifetime of the browser process.
        #[serde(default)]
        browser_session: Option<String>,
    },
    Location {
        url: String,
        #[serde(default)]
        title: String,
    },
    TitleMutated {
        title: String,
    },
    HistoryNavigated {
        url: String,
        #[serde(default)]
        title: String,
    },
    /// Visible text of the page, trimmed by the shim.
    Excerpt {
        text: String,
    },
    Event {
        event: UserEvent,
    },
    MediaCaptured(MediaCapture),
    Frame {
        request_id: u64,
        #[serde(default)]
        frame: Option<VideoFrame>,
    },
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum HostMessage {
    CaptureFrame { request_id: u64 },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_hello_and_events() {
        let hello: PageMessage = serde_json::from_str(
            r#"{"type":"hello","tabId":12,"url":"https://a.test","title":"A","browserSession":"b-1"}"#,
        )
        .unwrap();
        assert_eq!(
            hello,
            PageMessage::Hello {
                tab_id: 12,
                url: "https://a.test".into(),
                title: "A".into(),
                browser_session: Some("b-1".into()),
            }
        );

        let event: PageMessage = serde_json::from_str(
            r#"{"type":"event","event":{"kind":"scroll","y":1400}}"#,
        )
        .unwrap();
        assert_eq!(
            event,
            PageMessage::Event {
                event: UserEvent::Scroll { y: 1400.0 }
            }
        );
    }

    #[test]
    fn decodes_media_and_frames() {
        let media: PageMessage = serde_json::from_str(
            r#"{"type":"mediaCaptured","mediaType":"image/png","data":"QUJD","url":"https://a.test","title":"A"}"#,
        )
        .unwrap();
        assert!(matches!(media, PageMessage::MediaCaptured(ref capture) if capture.data == "QUJD"));

        let empty: PageMessage = serde_json::from_str(r#"{"type":"frame","requestId":4}"#).unwrap();
        assert_eq!(
            empty,
            PageMessage::Frame {
                request_id: 4,
                frame: None
            }
        );
    }

    #[test]
    fn encodes_capture_request() {
        let json = serde_json::to_string(&HostMessage::CaptureFrame { request_id: 9 }).unwrap();
        assert_eq!(json, r#"{"type":"captureFrame","requestId":9}"#);
    }
}
