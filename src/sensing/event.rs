//! Raw page events as reported by the page shim.

use serde::{Deserialize, Serialize};

/// The element a click landed on.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ElementInfo {
    pub tag: String,
    /// Accessible name or visible text of the element.
    #[serde(default)]
    pub label: Option<String>,
    /// Links, buttons, form controls and anything with a click role.
    #[serde(default)]
    pub interactive: bool,
}

impl ElementInfo {
    pub fn display_name(&self) -> String {
        self.label
            .as_deref()
            .map(str::trim)
            .filter(|label| !label.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| self.tag.to_ascii_lowercase())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum UserEvent {
    Click {
        x: f64,
        y: f64,
        #[serde(default)]
        target: Option<ElementInfo>,
    },
    Selection {
        text: String,
    },
    /// Absolute vertical scroll offset of the document.
    Scroll {
        y: f64,
    },
    Key {
        editable: bool,
    },
    MediaPlay {
        duration_secs: f64,
        #[serde(default)]
        label: Option<String>,
    },
    PointerMove,
    Touch,
}

impl UserEvent {
    /// Whether the event proves a human is at the keyboard and should push
    /// the idle deadline back.
    pub fn is_qualifying_input(&self) -> bool {
        !matches!(self, UserEvent::MediaPlay { .. })
    }
}
