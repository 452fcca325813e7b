//! Text helpers shared by the normalizer and the exporters.

use once_cell::sync::Lazy;
use scraper::{Html, Selector};

// Parsed once, shared by every call.
static BODY_SELECTOR: Lazy<Selector> = Lazy::new(|| {
    Selector::parse("body").expect("Failed to parse body selector")
});

static TITLE_SELECTOR: Lazy<Selector> = Lazy::new(|| {
    Selector::parse("title").expect("Failed to parse title selector")
});

/// Returns at most `max_chars` characters of `text`, never splitting a code point.
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => &text[..byte_idx],
        None => text,
    }
}

/// Visible text of an HTML document's body, one non-empty line per text node.
///
/// Fragments without a `<body>` fall back to the whole fragment's text.
pub fn html_to_text(html: &str) -> String {
    let document = Html::parse_document(html);

    let text: Vec<&str> = match document.select(&BODY_SELECTOR).next() {
        Some(body) => body.text().collect(),
        None => document.root_element().text().collect(),
    };

    collapse_lines(&text.join("\n"))
}

pub fn html_title(html: &str) -> Option<String> {
    let document = Html::parse_document(html);
    document
        .select(&TITLE_SELECTOR)
        .next()
        .map(|el| el.text().collect::<String>().trim().to_string())
        .filter(|title| !title.is_empty())
}

/// Trims every line and drops blank ones.
pub fn collapse_lines(text: &str) -> String {
    let mut result = String::with_capacity(text.len());
    let mut first = true;

    for line in text.lines() {
        let trimmed = line.trim();
        if !trimmed.is_empty() {
            if !first {
                result.push('\n');
            }
            result.push_str(trimmed);
            first = false;
        }
    }

    result
}
