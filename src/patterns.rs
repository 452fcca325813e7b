//! Regex fallback for pulling one data kind out of raw page text.
//!
//! These patterns approximate, they do not validate: the phone pattern will
//! happily match any run of ten digits. Callers only reach for this when the
//! model-driven extraction came back empty.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::detector::DataKind;
use crate::row::Row;

/// Characters of surrounding text kept on each side of a match.
pub const CONTEXT_CHARS: usize = 50;

static EMAIL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}\b").expect("valid email regex")
});

static PHONE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(\+?1?[-.\s]?)?\(?([0-9]{3})\)?[-.\s]?([0-9]{3})[-.\s]?([0-9]{4})")
        .expect("valid phone regex")
});

static PRICE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\$[\d,]+\.?\d*|\$\d+|[\d,]+\.?\d*\s*(?:dollars?|USD|usd)").expect("valid price regex")
});

pub(crate) static URL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"https?://[^\s)]+").expect("valid url regex"));

fn pattern_for(kind: DataKind) -> Option<(&'static Regex, &'static str, &'static str)> {
    match kind {
        DataKind::Emails => Some((&EMAIL_RE, "email", "email")),
        DataKind::PhoneNumbers => Some((&PHONE_RE, "phone", "phone")),
        DataKind::Prices => Some((&PRICE_RE, "price", "price")),
        DataKind::Links => Some((&URL_RE, "url", "url")),
        DataKind::Addresses | DataKind::Names | DataKind::Dates => None,
    }
}

/// Every match of `kind`'s pattern in `text`, with up to [`CONTEXT_CHARS`]
/// characters of context on each side.
///
/// Kinds without a pattern yield nothing.
pub fn extract(text: &str, kind: DataKind) -> Vec<Row> {
    let Some((regex, field, type_tag)) = pattern_for(kind) else {
        return Vec::new();
    };

    regex
        .find_iter(text)
        .enumerate()
        .map(|(index, m)| {
            Row::new()
                .with(field, m.as_str().trim())
                .with("context", context_around(text, m.start(), m.end()))
                .with("_index", index)
                .with("_type", type_tag)
                .with("_extraction_method", "regex")
        })
        .collect()
}

/// Text from `CONTEXT_CHARS` characters before `start` to `CONTEXT_CHARS`
/// characters after `end`, clamped to the string and trimmed.
fn context_around(text: &str, start: usize, end: usize) -> String {
    let from = text[..start]
        .char_indices()
        .rev()
        .nth(CONTEXT_CHARS - 1)
        .map(|(i, _)| i)
        .unwrap_or(0);
    let to = text[end..]
        .char_indices()
        .nth(CONTEXT_CHARS)
        .map(|(i, _)| end + i)
        .unwrap_or(text.len());

    text[from..to].trim().to_string()
}
