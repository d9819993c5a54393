use std::sync::LazyLock;

use regex::Regex;
use scraper::{Html, Node};

static WS_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());

pub const ELLIPSIS: char = '…';

/// Collapse runs of whitespace to a single space and trim.
pub fn collapse_ws(s: &str) -> String {
    WS_RE.replace_all(s.trim(), " ").to_string()
}

/// Visible text of an HTML fragment: script/style dropped, whitespace collapsed.
pub fn strip_html(html: &str) -> String {
    if html.trim().is_empty() {
        return String::new();
    }
    let fragment = Html::parse_fragment(html);
    let mut parts: Vec<&str> = Vec::new();

    for node in fragment.root_element().descendants() {
        let Some(text) = node.value().as_text() else {
            continue;
        };
        let hidden = node.ancestors().any(|a| match a.value() {
            Node::Element(e) => matches!(e.name(), "script" | "style"),
            _ => false,
        });
        if !hidden {
            parts.push(&**text);
        }
    }

    collapse_ws(&parts.join(" "))
}

/// Bound `text` to `max` chars without splitting a word; appends an ellipsis when cut.
pub fn truncate_words(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    if max == 0 {
        return String::new();
    }

    let budget = max - 1; // room for the ellipsis
    let cut = text
        .char_indices()
        .nth(budget)
        .map(|(i, _)| i)
        .unwrap_or(text.len());
    let head = &text[..cut];
    let next_is_space = text[cut..].chars().next().is_some_and(char::is_whitespace);

    let kept = if next_is_space {
        head
    } else {
        match head.rfind(char::is_whitespace) {
            Some(pos) => &head[..pos],
            None => head,
        }
    };

    format!("{}{}", kept.trim_end(), ELLIPSIS)
}

/// Plain char-count cut, no ellipsis.
pub fn take_chars(s: &str, n: usize) -> String {
    s.chars().take(n).collect()
}

/// "my-cool-site" -> "My Cool Site"
pub fn title_from_slug(slug: &str) -> String {
    slug.split(['-', '_'])
        .filter(|w| !w.is_empty())
        .map(|w| {
            let mut chars = w.chars();
            match chars.next() {
                Some(c) => c.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<String>>()
        .join(" ")
}

// ── Tests ──
