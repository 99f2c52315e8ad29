//! Title and URL normalisation used to decide whether a page title is real
//! content or a loading placeholder.

use url::Url;

use crate::utils::text::collapse_whitespace;

const SEPARATORS: &[char] = &['-', '|', '·', '—', '–', ':', '•'];

/// Strip notification-count prefixes (`(3) `, `[12] `, `(99+) `, `• `) and
/// surrounding whitespace. Sites bump these counters constantly, so they must
/// not count as title changes.
pub fn clean_title(raw: &str) -> String {
    let mut title = raw.trim();
    loop {
        let stripped = strip_count_prefix(title).trim_start();
        if stripped.len() == title.len() {
            break;
        }
        title = stripped;
    }
    collapse_whitespace(title)
}

fn strip_count_prefix(title: &str) -> &str {
    for (open, close) in [('(', ')'), ('[', ']')] {
        let Some(rest) = title.strip_prefix(open) else {
            continue;
        };
        let Some(end) = rest.find(close) else {
            continue;
        };
        let digits = rest[..end].trim_end_matches('+');
        if !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit()) {
            return &rest[end + close.len_utf8()..];
        }
    }

    title
        .strip_prefix('•')
        .or_else(|| title.strip_prefix('●'))
        .unwrap_or(title)
}

pub fn normalize_title(raw: &str) -> String {
    clean_title(raw).to_lowercase()
}

/// Drop the fragment and a trailing slash; lowercase scheme and host.
/// Unparseable input is only trimmed and lowercased.
pub fn normalize_url(raw: &str) -> String {
    match Url::parse(raw.trim()) {
        Ok(mut parsed) => {
            parsed.set_fragment(None);
            let mut out = parsed.to_string();
            if out.ends_with('/') {
                out.pop();
            }
            out
        }
        Err(_) => raw.trim().trim_end_matches('/').to_lowercase(),
    }
}

/// Names a site is likely to put in its placeholder title: the host without
/// `www.` and the registrable label (`youtube` for `www.youtube.com`,
/// `bbc` for `www.bbc.co.uk`).
pub fn site_names(url: &str) -> Vec<String> {
    let Ok(parsed) = Url::parse(url.trim()) else {
        return Vec::new();
    };
    let Some(host) = parsed.host_str() else {
        return Vec::new();
    };

    let host = host.trim_start_matches("www.").to_lowercase();
    let labels: Vec<&str> = host.split('.').filter(|l| !l.is_empty()).collect();
    let mut names = vec![host.clone()];

    let registrable = match labels.len() {
        0 | 1 => None,
        2 => Some(labels[0]),
        n => {
            let tld = labels[n - 1];
            let second = labels[n - 2];
            if tld.len() == 2 && second.len() <= 3 {
                Some(labels[n - 3])
            } else {
                Some(second)
            }
        }
    };

    if let Some(name) = registrable {
        if name != host {
            names.push(name.to_string());
        }
    }
    names
}

/// A title is generic when it carries no page-specific content: empty, the
/// URL itself, a known placeholder, or just the site name optionally followed
/// by a separator.
pub fn is_generic_title(title: &str, url: &str, placeholders: &[String]) -> bool {
    let cleaned = normalize_title(title);
    if cleaned.is_empty() {
        return true;
    }

    if placeholders.iter().any(|p| p.to_lowercase() == cleaned) {
        return true;
    }

    let raw_url = url.trim().to_lowercase();
    let bare_url = raw_url
        .trim_start_matches("https://")
        .trim_start_matches("http://")
        .trim_end_matches('/');
    if cleaned == raw_url || cleaned == normalize_url(url) || cleaned == bare_url {
        return true;
    }

    let stem = cleaned.trim_end_matches(|c: char| SEPARATORS.contains(&c) || c.is_whitespace());
    site_names(url).iter().any(|name| stem == name)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn placeholders() -> Vec<String> {
        vec!["loading...".into(), "untitled".into()]
    }

    #[test]
    fn strips_notification_prefixes() {
        assert_eq!(clean_title("(3) Inbox - Mail"), "Inbox - Mail");
        assert_eq!(clean_title("[12]  (99+) Feed"), "Feed");
        assert_eq!(clean_title("• Chat  room "), "Chat room");
        assert_eq!(clean_title("(beta) Release notes"), "(beta) Release notes");
    }

    #[test]
    fn site_name_alone_is_generic() {
        let url = "https://www.youtube.com/watch?v=abc";
        assert!(is_generic_title("YouTube", url, &placeholders()));
        assert!(is_generic_title("YouTube -", url, &placeholders()));
        assert!(is_generic_title("(2) YouTube", url, &placeholders()));
        assert!(!is_generic_title("Cats compilation - YouTube", url, &placeholders()));
    }

    #[test]
    fn example_placeholder_flip() {
        let url = "https://example.com/";
        assert!(is_generic_title("Example", url, &placeholders()));
        assert!(!is_generic_title("Welcome - Example", url, &placeholders()));
    }

    #[test]
    fn url_and_placeholders_are_generic() {
        let url = "https://news.site.org/a/b";
        assert!(is_generic_title("news.site.org/a/b", url, &placeholders()));
        assert!(is_generic_title("Loading...", url, &placeholders()));
        assert!(is_generic_title("   ", url, &placeholders()));
    }

    #[test]
    fn country_code_domains_use_registrable_label() {
        assert_eq!(site_names("https://www.bbc.co.uk/news"), vec!["bbc.co.uk", "bbc"]);
    }

    #[test]
    fn normalize_url_drops_fragment_and_trailing_slash() {
        assert_eq!(normalize_url("HTTPS://Example.COM/#section"), "https://example.com");
        assert_eq!(normalize_url("https://example.com/a/?q=1#x"), "https://example.com/a/?q=1");
    }
}
