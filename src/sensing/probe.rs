use anyhow::Result;
use async_trait::async_trait;

use crate::messages::VideoFrame;
use crate::models::PageLocation;

/// Read access to a live page.
///
/// Implementations must not block: reads answer from the latest state the
/// page reported, and a page that cannot be read yields `None` rather than an
/// error.
#[async_trait]
pub trait PageProbe: Send + Sync {
    fn location(&self) -> Option<PageLocation>;

    /// Visible text of the page, already trimmed by the page shim.
    fn text_excerpt(&self) -> Option<String>;

    /// Grab the current frame of the page's playing video, if there is one.
    async fn capture_video_frame(&self) -> Result<Option<VideoFrame>>;
}
