//! Flattens one extraction API response into rows.
//!
//! Paths are tried in a fixed priority order: structured extraction output,
//! model-driven extraction of a specific data kind, the regex fallback for
//! that kind, markdown line heuristics, and finally a single HTML excerpt.
//! Each path that runs but finds nothing is remembered, so an empty result
//! says why it is empty.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::content::{html_title, html_to_text, truncate_chars};
use crate::detector::DataKind;
use crate::firecrawl::{ExtractPayload, RawScrapeResponse};
use crate::llm::{self, LlmClient};
use crate::patterns;
use crate::prompts;
use crate::row::{Row, Source};

/// Upper bound on rows produced from one markdown document.
pub const MAX_MARKDOWN_ROWS: usize = 500;
/// Lines scanned before markdown parsing gives up.
pub const MAX_MARKDOWN_LINES: usize = 5000;
/// Plain lines must be longer than this to become text rows.
pub const MIN_TEXT_LINE_CHARS: usize = 20;
pub const HTML_EXCERPT_CHARS: usize = 1000;
/// Page text handed to the model for specific-kind extraction.
pub const SPECIFIC_CONTENT_CHARS: usize = 12_000;

static LINK_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[([^\]]*)\]\(([^)]+)\)").expect("valid markdown link regex"));

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EmptyReason {
    /// Nothing usable came back: no extract, markdown or HTML.
    NoContent,
    /// Structured output was present but held no rows.
    ExtractEmpty,
    /// Neither the model nor the regex fallback found the requested kind.
    NoSpecificMatches,
    /// The markdown had no headings, links or long lines.
    NoMarkdownRows,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Normalized {
    Rows { rows: Vec<Row>, source: Source },
    Empty(EmptyReason),
}

impl Normalized {
    pub fn rows(&self) -> &[Row] {
        match self {
            Normalized::Rows { rows, .. } => rows,
            Normalized::Empty(_) => &[],
        }
    }

    fn from_rows(rows: Vec<Row>, source: Source) -> Option<Self> {
        (!rows.is_empty()).then_some(Normalized::Rows { rows, source })
    }
}

pub struct Normalizer {
    llm: Option<LlmClient>,
}

impl Normalizer {
    /// Without a model client, specific-kind requests go straight to regex.
    pub fn new(llm: Option<LlmClient>) -> Self {
        Self { llm }
    }

    pub async fn normalize(
        &self,
        response: &RawScrapeResponse,
        url: &str,
        query: &str,
        kind: Option<DataKind>,
    ) -> Normalized {
        let mut reason = EmptyReason::NoContent;

        if response.extract.is_present() {
            if let Some(found) = Normalized::from_rows(rows_from_extract(&response.extract, url), Source::Extract) {
                return found;
            }
            reason = EmptyReason::ExtractEmpty;
        }

        if let (Some(kind), Some(text)) = (kind, raw_text(response)) {
            if let Some(found) = self.specific_rows(&text, url, query, kind).await {
                return found;
            }
            reason = EmptyReason::NoSpecificMatches;
        }

        if let Some(markdown) = response.markdown() {
            if let Some(found) = Normalized::from_rows(rows_from_markdown(markdown, url), Source::Markdown) {
                return found;
            }
            reason = EmptyReason::NoMarkdownRows;
        } else if let Some(html) = response.any_html() {
            return Normalized::Rows {
                rows: vec![row_from_html(html, response, url)],
                source: Source::HtmlFallback,
            };
        }

        debug!(url, ?reason, "response produced no rows");
        Normalized::Empty(reason)
    }

    async fn specific_rows(&self, text: &str, url: &str, query: &str, kind: DataKind) -> Option<Normalized> {
        if let Some(llm) = &self.llm {
            let content = truncate_chars(text, SPECIFIC_CONTENT_CHARS);
            let prompt = prompts::specific_kind_prompt(content, query, kind);
            match llm.complete(prompt).await {
                Ok(reply) => {
                    let items = llm::parse_json_array(&reply).unwrap_or_else(|| {
                        warn!(url, %kind, "specific-kind reply is not a JSON array");
                        Vec::new()
                    });
                    let rows = items
                        .into_iter()
                        .enumerate()
                        .map(|(index, item)| {
                            let mut row = Row::from_value(item);
                            row.insert("_extraction_method", "llm");
                            row.tag(url, Source::LlmSpecific, index, None);
                            row
                        })
                        .collect();
                    if let Some(found) = Normalized::from_rows(rows, Source::LlmSpecific) {
                        return Some(found);
                    }
                }
                Err(e) => warn!(url, %kind, error = %e, "specific-kind extraction failed"),
            }
            debug!(url, %kind, "model found nothing, trying regex");
        }

        let rows = patterns::extract(text, kind)
            .into_iter()
            .enumerate()
            .map(|(index, mut row)| {
                row.tag(url, Source::Regex, index, None);
                row
            })
            .collect();
        Normalized::from_rows(rows, Source::Regex)
    }
}

/// Page text for kind-specific extraction: markdown, else visible HTML text,
/// else the structured output rendered as JSON.
fn raw_text(response: &RawScrapeResponse) -> Option<String> {
    if let Some(markdown) = response.markdown() {
        return Some(markdown.to_string());
    }
    if let Some(html) = response.any_html() {
        return Some(html_to_text(html));
    }
    response
        .extract
        .to_json()
        .and_then(|value| serde_json::to_string_pretty(&value).ok())
}

/// Rows from structured output. Members of an array group keep their
/// position within the group; single-object and scalar groups take their
/// position in the flattened output so `_index` stays distinct.
pub fn rows_from_extract(extract: &ExtractPayload, url: &str) -> Vec<Row> {
    match extract {
        ExtractPayload::ArrayOfRows(items) => items
            .iter()
            .enumerate()
            .map(|(index, item)| {
                let mut row = Row::from_value(item.clone());
                row.tag(url, Source::Extract, index, None);
                row
            })
            .collect(),
        ExtractPayload::KeyedGroups(groups) => {
            let mut rows = Vec::new();
            for (key, value) in groups {
                match value {
                    Value::Array(items) => {
                        for (index, item) in items.iter().enumerate() {
                            let mut row = Row::from_value(item.clone());
                            row.tag(url, Source::Extract, index, Some(key.as_str()));
                            rows.push(row);
                        }
                    }
                    Value::Object(fields) => {
                        let mut row = Row::from(fields.clone());
                        row.tag(url, Source::Extract, rows.len(), Some(key.as_str()));
                        rows.push(row);
                    }
                    Value::Null => {}
                    scalar => {
                        let mut row = Row::new().with(key, scalar.clone());
                        row.tag(url, Source::Extract, rows.len(), Some(key.as_str()));
                        rows.push(row);
                    }
                }
            }
            rows
        }
        ExtractPayload::Absent => Vec::new(),
    }
}

pub fn rows_from_markdown(markdown: &str, url: &str) -> Vec<Row> {
    let mut rows: Vec<Row> = Vec::new();

    let lines = markdown
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .take(MAX_MARKDOWN_LINES);

    for line in lines {
        if rows.len() >= MAX_MARKDOWN_ROWS {
            break;
        }

        if line.starts_with('#') {
            let title = line.trim_start_matches('#');
            let level = line.len() - title.len();
            let title = title.trim();
            if !title.is_empty() {
                rows.push(Row::new().with("type", "heading").with("title", title).with("level", level));
            }
        } else if line.contains('[') && line.contains("](") {
            for caps in LINK_RE.captures_iter(line) {
                let title = caps.get(1).map(|m| m.as_str()).filter(|t| !t.is_empty()).unwrap_or("Link");
                rows.push(Row::new().with("type", "link").with("title", title).with("url", &caps[2]));
            }
        } else if line.contains("http://") || line.contains("https://") {
            for found in patterns::URL_RE.find_iter(line) {
                rows.push(Row::new().with("type", "url").with("url", found.as_str()).with("context", line));
            }
        } else if line.chars().count() > MIN_TEXT_LINE_CHARS && !line.starts_with('*') && !line.starts_with('-') {
            rows.push(Row::new().with("type", "text").with("content", line));
        }
    }

    rows.truncate(MAX_MARKDOWN_ROWS);
    for (index, row) in rows.iter_mut().enumerate() {
        row.tag(url, Source::Markdown, index, None);
    }
    rows
}

pub fn row_from_html(html: &str, response: &RawScrapeResponse, url: &str) -> Row {
    let text = html_to_text(html);
    let title = response.metadata.title.clone().or_else(|| html_title(html));

    let mut row = Row::new()
        .with("type", "raw_content")
        .with("content", truncate_chars(&text, HTML_EXCERPT_CHARS))
        .with("title", title)
        .with("description", response.metadata.description.clone());
    row.tag(url, Source::HtmlFallback, 0, None);
    row
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Server;
    use reqwest::Client;
    use serde_json::json;

    const URL: &str = "https://example.com";

    fn response(value: Value) -> RawScrapeResponse {
        serde_json::from_value(value).unwrap()
    }

    #[tokio::test]
    async fn headlines_come_from_markdown_in_document_order() {
        let raw = response(json!({
            "markdown": "# Title One\n\nSome body text that is long enough to count.\n\n# Title Two"
        }));

        let normalized = Normalizer::new(None).normalize(&raw, URL, "all headlines", None).await;
        let Normalized::Rows { rows, source } = normalized else {
            panic!("expected rows");
        };

        assert_eq!(source, Source::Markdown);
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].get_str("type"), Some("heading"));
        assert_eq!(rows[0].get_str("title"), Some("Title One"));
        assert_eq!(rows[1].get_str("type"), Some("text"));
        assert_eq!(rows[2].get_str("type"), Some("heading"));
        assert_eq!(rows[2].get_str("title"), Some("Title Two"));
        for (index, row) in rows.iter().enumerate() {
            assert_eq!(row.get_str("_url"), Some(URL));
            assert_eq!(row.get("_index"), Some(&json!(index)));
        }
    }

    #[test]
    fn structured_arrays_pass_through_in_order() {
        let items = vec![
            json!({"title": "A", "url": "/a"}),
            json!({"title": "B", "url": "/b"}),
            json!({"title": "C", "url": "/c"}),
        ];
        let rows = rows_from_extract(&ExtractPayload::ArrayOfRows(items.clone()), URL);

        assert_eq!(rows.len(), items.len());
        for (index, (row, item)) in rows.iter().zip(&items).enumerate() {
            for (key, value) in item.as_object().unwrap() {
                assert_eq!(row.get(key), Some(value));
            }
            assert_eq!(row.get_str("_url"), Some(URL));
            assert_eq!(row.get_str("_source"), Some("extract"));
            assert_eq!(row.get("_index"), Some(&json!(index)));
            assert_eq!(row.len(), item.as_object().unwrap().len() + 3);
        }
    }

    #[test]
    fn keyed_groups_flatten_by_member_shape() {
        let raw = response(json!({"extract": {
            "emails": [{"email": "a@b.io"}, {"email": "c@d.io"}],
            "company": {"name": "Acme"},
            "summary": "Widgets",
            "missing": null
        }}));
        let rows = rows_from_extract(&raw.extract, URL);

        assert_eq!(rows.len(), 4);
        assert_eq!(rows[0].get_str("_category"), Some("emails"));
        assert_eq!(rows[1].get("_index"), Some(&json!(1)));
        assert_eq!(rows[2].get_str("name"), Some("Acme"));
        assert_eq!(rows[2].get_str("_category"), Some("company"));
        assert_eq!(rows[3].get_str("summary"), Some("Widgets"));

        let indexes: Vec<_> = rows.iter().map(|r| r.get("_index").cloned()).collect();
        assert_eq!(indexes, vec![Some(json!(0)), Some(json!(1)), Some(json!(2)), Some(json!(3))]);
    }

    #[test]
    fn markdown_links_urls_and_noise() {
        let md = "See [Docs](https://d.test) and [](https://e.test)\nRaw link https://f.test/page here\n- a bullet line that is definitely long\nshort";
        let rows = rows_from_markdown(md, URL);

        let kinds: Vec<_> = rows.iter().filter_map(|r| r.get_str("type")).collect();
        assert_eq!(kinds, vec!["link", "link", "url"]);
        assert_eq!(rows[0].get_str("title"), Some("Docs"));
        assert_eq!(rows[1].get_str("title"), Some("Link"));
        assert_eq!(rows[2].get_str("url"), Some("https://f.test/page"));
    }

    #[test]
    fn markdown_rows_are_capped() {
        let md = (0..MAX_MARKDOWN_ROWS + 50)
            .map(|i| format!("## Heading {i}"))
            .collect::<Vec<_>>()
            .join("\n");
        assert_eq!(rows_from_markdown(&md, URL).len(), MAX_MARKDOWN_ROWS);
    }

    #[tokio::test]
    async fn html_only_yields_single_excerpt() {
        let long = "word ".repeat(400);
        let raw = response(json!({
            "html": format!("<html><head><title>Shop</title></head><body><p>{long}</p></body></html>"),
            "metadata": {"description": "A shop"}
        }));

        let normalized = Normalizer::new(None).normalize(&raw, URL, "everything", None).await;
        let Normalized::Rows { rows, source } = normalized else {
            panic!("expected rows");
        };

        assert_eq!(source, Source::HtmlFallback);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get_str("title"), Some("Shop"));
        assert_eq!(rows[0].get_str("description"), Some("A shop"));
        assert!(rows[0].get_str("content").unwrap().chars().count() <= HTML_EXCERPT_CHARS);
    }

    #[tokio::test]
    async fn empty_results_say_why() {
        let normalizer = Normalizer::new(None);

        let nothing = normalizer.normalize(&response(json!({})), URL, "q", None).await;
        assert_eq!(nothing, Normalized::Empty(EmptyReason::NoContent));

        let empty_extract = normalizer
            .normalize(&response(json!({"extract": {"items": []}})), URL, "q", None)
            .await;
        assert_eq!(empty_extract, Normalized::Empty(EmptyReason::ExtractEmpty));

        let bullets_only = normalizer
            .normalize(&response(json!({"markdown": "- one\n- two"})), URL, "q", None)
            .await;
        assert_eq!(bullets_only, Normalized::Empty(EmptyReason::NoMarkdownRows));
    }

    #[tokio::test]
    async fn specific_kind_without_model_uses_regex() {
        let raw = response(json!({"markdown": "Reach us at hello@example.com today."}));
        let normalized = Normalizer::new(None)
            .normalize(&raw, URL, "emails", Some(DataKind::Emails))
            .await;

        let Normalized::Rows { rows, source } = normalized else {
            panic!("expected rows");
        };
        assert_eq!(source, Source::Regex);
        assert_eq!(rows[0].get_str("email"), Some("hello@example.com"));
        assert_eq!(rows[0].get_str("_source"), Some("regex"));
    }

    #[tokio::test]
    async fn specific_kind_prefers_model_rows() {
        let mut server = Server::new_async().await;
        server
            .mock("POST", "/chat/completions")
            .with_status(200)
            .with_body(
                json!({"choices": [{"message": {"content": "```json\n[{\"phone\": \"555-123-4567\", \"context\": \"call\"}]\n```"}}]})
                    .to_string(),
            )
            .expect(1)
            .create_async()
            .await;

        let llm = LlmClient::new(Client::new(), &server.url(), "sk-test", "gpt-4o-mini");
        let raw = response(json!({"markdown": "call 555-123-4567"}));
        let normalized = Normalizer::new(Some(llm))
            .normalize(&raw, URL, "phone numbers", Some(DataKind::PhoneNumbers))
            .await;

        let Normalized::Rows { rows, source } = normalized else {
            panic!("expected rows");
        };
        assert_eq!(source, Source::LlmSpecific);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get_str("_extraction_method"), Some("llm"));
    }

    #[tokio::test]
    async fn empty_model_answer_falls_back_to_regex() {
        let mut server = Server::new_async().await;
        server
            .mock("POST", "/chat/completions")
            .with_status(200)
            .with_body(json!({"choices": [{"message": {"content": "[]"}}]}).to_string())
            .create_async()
            .await;

        let llm = LlmClient::new(Client::new(), &server.url(), "sk-test", "gpt-4o-mini");
        let raw = response(json!({"html": "<body><p>Write to team@example.org</p></body>"}));
        let normalized = Normalizer::new(Some(llm))
            .normalize(&raw, URL, "contact emails", Some(DataKind::Emails))
            .await;

        let Normalized::Rows { rows, source } = normalized else {
            panic!("expected rows");
        };
        assert_eq!(source, Source::Regex);
        assert_eq!(rows[0].get_str("email"), Some("team@example.org"));
    }

    #[tokio::test]
    async fn structured_rows_win_over_specific_kind() {
        let raw = response(json!({
            "extract": [{"email": "a@b.io"}],
            "markdown": "other@c.io"
        }));
        let normalized = Normalizer::new(None)
            .normalize(&raw, URL, "emails", Some(DataKind::Emails))
            .await;

        assert!(matches!(normalized, Normalized::Rows { source: Source::Extract, .. }));
        assert_eq!(normalized.rows()[0].get_str("email"), Some("a@b.io"));
    }
}
