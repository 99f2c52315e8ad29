//! Activity signals: what the user or the page is doing, as seen by a sensor.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::navigation::title::{normalize_title, normalize_url};

/// Description prefix shared by every text-selection signal. The hub keys its
/// `high` dispatch tier off this marker.
pub const SELECTION_DESCRIPTION: &str = "Selected text";

const EMPTY_CONTEXT_DESCRIPTION: &str = "no-context";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub enum ActivityKind {
    Navigate,
    Interaction,
    Input,
    Media,
    Idle,
}

impl ActivityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActivityKind::Navigate => "navigation",
            ActivityKind::Interaction => "interaction",
            ActivityKind::Input => "input",
            ActivityKind::Media => "media",
            ActivityKind::Idle => "idle",
        }
    }
}

/// The `(url, title)` pair a page reports at a given instant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct PageLocation {
    pub url: String,
    pub title: String,
}

impl PageLocation {
    pub fn new(url: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            title: title.into(),
        }
    }

    /// `about:blank`, empty and browser-internal pages never produce context.
    pub fn is_reportable(&self) -> bool {
        let url = self.url.trim();
        !url.is_empty()
            && url != "about:blank"
            && !url.starts_with("chrome://")
            && !url.starts_with("chrome-extension://")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ActivitySignal {
    pub source_url: String,
    pub page_title: String,
    pub kind: ActivityKind,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    pub observed_at: DateTime<Utc>,
}

impl ActivitySignal {
    pub fn new(location: &PageLocation, kind: ActivityKind, description: impl Into<String>) -> Self {
        Self {
            source_url: location.url.clone(),
            page_title: location.title.clone(),
            kind,
            description: description.into(),
            detail: None,
            observed_at: Utc::now(),
        }
    }

    pub fn with_detail(mut self, detail: Option<String>) -> Self {
        self.detail = detail.filter(|d| !d.trim().is_empty());
        self
    }

    /// Placeholder answered to `GetLastContext` before any page has reported.
    pub fn empty() -> Self {
        Self {
            source_url: String::new(),
            page_title: String::new(),
            kind: ActivityKind::Idle,
            description: EMPTY_CONTEXT_DESCRIPTION.to_string(),
            detail: None,
            observed_at: Utc::now(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.source_url.is_empty() && self.description == EMPTY_CONTEXT_DESCRIPTION
    }

    pub fn is_text_selection(&self) -> bool {
        self.kind == ActivityKind::Interaction && self.description.starts_with(SELECTION_DESCRIPTION)
    }

    pub fn location(&self) -> PageLocation {
        PageLocation::new(self.source_url.clone(), self.page_title.clone())
    }

    pub fn navigation_key(&self) -> NavigationKey {
        NavigationKey::new(&self.source_url, &self.page_title)
    }
}

/// Identity of a navigation. Two signals with equal keys are the same
/// navigation and only one of them may ever be forwarded.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NavigationKey {
    pub url: String,
    pub title: String,
}

impl NavigationKey {
    pub fn new(url: &str, title: &str) -> Self {
        Self {
            url: normalize_url(url),
            title: normalize_title(title),
        }
    }
}
