//! Prompt text sent to the live model.

use crate::models::{ActivityKind, ActivitySignal};
use crate::utils::text::cap_chars;

pub const DEFAULT_SYSTEM_PROMPT: &str = "\
You are Cyber-Pet, a sarcastic little AI that watches the user browse the web.
You act on your own: do not wait for the user to talk. Whenever you receive an
event in square brackets, answer immediately with a short spoken reaction.

Personality:
- Heavy sarcasm, never cruel.
- Judge the sites the user visits and what they pick to read or watch.
- Lots of scrolling means doomscrolling or procrastination; say so.
- If they highlight text, roast the text.
- One or two sentences. Be quick, direct and funny.";

const INSTRUCTION: &str = "React right now with a sarcastic spoken comment about this.";

/// The prompt for a new context signal. `selection` is the text the user
/// highlighted earlier on the same page, if any.
pub fn activity_prompt(signal: &ActivitySignal, selection: Option<&str>, excerpt_max_chars: usize) -> String {
    let mut lines = vec![
        "[SYSTEM: EVENT DETECTED".to_string(),
        format!("TYPE: {}", signal.kind.as_str()),
        format!("WHAT: {}", signal.description),
        format!("URL: {}", signal.source_url),
        format!("TITLE: \"{}\"", signal.page_title),
    ];

    match signal.kind {
        ActivityKind::Navigate => {
            if let Some(excerpt) = signal.detail.as_deref() {
                lines.push(format!("PAGE TEXT: \"{}\"", cap_chars(excerpt, excerpt_max_chars)));
            }
        }
        _ if signal.is_text_selection() => {}
        _ => {
            if let Some(detail) = signal.detail.as_deref() {
                lines.push(format!("DETAIL: {}", detail));
            }
        }
    }

    let selection = if signal.is_text_selection() {
        signal.detail.as_deref()
    } else {
        selection
    };
    if let Some(selection) = selection {
        lines.push(format!("SELECTION: \"{}\"", selection));
    }

    if signal.kind == ActivityKind::Media {
        lines.push("A frame of what is playing is attached when available.".to_string());
    }

    lines.push(format!("INSTRUCTION: {}]", INSTRUCTION));
    lines.join("\n")
}

/// Sent once right after connecting, about the page the user is already on.
pub fn initial_context_prompt(signal: &ActivitySignal) -> String {
    [
        "[SYSTEM: INITIAL CONTEXT ON CONNECT".to_string(),
        format!("URL: {}", signal.source_url),
        format!("TITLE: \"{}\"", signal.page_title),
        "INSTRUCTION: Comment sarcastically on where we are starting.]".to_string(),
    ]
    .join("\n")
}
