//! Selector mode: fetch one page directly and pull rows out of it with CSS
//! selectors picked from the query's keywords. No extraction API or model
//! call is involved.

use std::time::Duration;

use reqwest::Client;
use reqwest::header::{ACCEPT, USER_AGENT};
use scraper::{ElementRef, Html, Selector};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::{AppError, Result};
use crate::row::{Row, Source};

const PAGE_USER_AGENT: &str = "DataGlass/1.0 (Web Scraper)";
const PAGE_ACCEPT: &str = "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8";

/// Query keywords and the selectors they suggest, in output order.
const SELECTOR_HINTS: &[(&[&str], &[&str])] = &[
    (&["title", "headline", "header"], &["h1", "h2", "h3", ".title", ".headline", ".header"]),
    (&["price", "cost", "amount"], &[".price", ".cost", ".amount", "[data-price]"]),
    (&["description", "content", "text"], &["p", ".description", ".content", ".text"]),
    (&["link", "url", "href"], &["a[href]"]),
    (&["image", "img", "photo"], &["img[src]"]),
    (&["email", "contact"], &["a[href^=\"mailto:\"]", ".email", ".contact"]),
    (&["phone", "tel"], &["a[href^=\"tel:\"]", ".phone", ".tel"]),
    (&["date", "time"], &["time", ".date", ".time", "[datetime]"]),
    (&["name", "author"], &[".name", ".author", ".by"]),
    (&["table", "row", "data"], &["table tr", "tbody tr"]),
];

/// Used when no keyword matches.
const GENERIC_SELECTORS: &[&str] = &["p", "div", "span", "h1", "h2", "h3", "li"];

/// Rows from one selector-mode scrape.
#[derive(Debug, Clone, Serialize)]
pub struct SelectorScrape {
    pub url: String,
    pub selectors_used: Vec<String>,
    pub total_items: usize,
    pub rows: Vec<Row>,
}

/// Selectors suggested by `query`'s keywords, before checking any page.
pub fn candidate_selectors(query: &str) -> Vec<&'static str> {
    let query = query.to_lowercase();
    let mut selectors: Vec<&'static str> = Vec::new();

    for (keywords, hinted) in SELECTOR_HINTS {
        if keywords.iter().any(|keyword| query.contains(keyword)) {
            for &selector in hinted.iter() {
                if !selectors.contains(&selector) {
                    selectors.push(selector);
                }
            }
        }
    }

    if selectors.is_empty() {
        selectors.extend_from_slice(GENERIC_SELECTORS);
    }
    selectors
}

/// The candidate selectors for `query` that match at least one element of
/// `document`.
pub fn infer_selectors(query: &str, document: &Html) -> Vec<String> {
    candidate_selectors(query)
        .into_iter()
        .filter(|candidate| match Selector::parse(candidate) {
            Ok(selector) => document.select(&selector).next().is_some(),
            Err(_) => false,
        })
        .map(String::from)
        .collect()
}

/// One row per matched element carrying `selector`, `index` (position among
/// that selector's matches) and `text`. Links add `href`, images add `src` and
/// `alt`, and any element with a `datetime` attribute adds it. Elements with
/// no text, href or src are skipped; unparseable selectors are logged and
/// skipped.
pub fn extract_by_selectors(document: &Html, selectors: &[String], url: &str) -> Vec<Row> {
    let mut rows = Vec::new();

    for raw in selectors {
        let selector = match Selector::parse(raw) {
            Ok(selector) => selector,
            Err(e) => {
                warn!(selector = %raw, error = ?e, "skipping invalid selector");
                continue;
            }
        };

        for (index, element) in document.select(&selector).enumerate() {
            if let Some(mut row) = element_row(raw, index, element) {
                row.tag(url, Source::Selector, rows.len(), None);
                rows.push(row);
            }
        }
    }

    rows
}

fn element_row(selector: &str, index: usize, element: ElementRef<'_>) -> Option<Row> {
    let text = element.text().flat_map(str::split_whitespace).collect::<Vec<_>>().join(" ");
    let mut row = Row::new()
        .with("selector", selector)
        .with("index", index)
        .with("text", text.as_str());

    let mut linked = false;
    match element.value().name() {
        "a" => {
            let href = attr(&element, "href");
            linked = !href.is_empty();
            row.insert("href", href);
        }
        "img" => {
            let src = attr(&element, "src");
            linked = !src.is_empty();
            row.insert("src", src);
            row.insert("alt", attr(&element, "alt"));
        }
        _ => {}
    }
    let datetime = attr(&element, "datetime");
    if !datetime.is_empty() {
        row.insert("datetime", datetime);
    }

    (linked || !text.is_empty()).then_some(row)
}

fn attr<'a>(element: &ElementRef<'a>, name: &str) -> &'a str {
    element.value().attr(name).unwrap_or_default()
}

/// Runs selector extraction over already-fetched HTML.
///
/// Fails with [`AppError::NothingExtracted`] when no selector matches the
/// page or the matches carry no content.
pub fn scrape_html(url: &str, query: &str, html: &str) -> Result<SelectorScrape> {
    let document = Html::parse_document(html);

    let selectors_used = infer_selectors(query, &document);
    if selectors_used.is_empty() {
        return Err(AppError::NothingExtracted(
            "no relevant selectors found for the query".to_string(),
        ));
    }
    debug!(url, selectors = ?selectors_used, "selectors inferred");

    let rows = extract_by_selectors(&document, &selectors_used, url);
    if rows.is_empty() {
        return Err(AppError::NothingExtracted("no data extracted from the page".to_string()));
    }

    Ok(SelectorScrape {
        url: url.to_string(),
        selectors_used,
        total_items: rows.len(),
        rows,
    })
}

/// Fetches pages directly for selector mode.
#[derive(Clone)]
pub struct PageScraper {
    http: Client,
    request_timeout: Duration,
}

impl PageScraper {
    pub fn new(http: Client, request_timeout: Duration) -> Self {
        Self { http, request_timeout }
    }

    pub async fn fetch_html(&self, url: &str) -> Result<String> {
        let response = self
            .http
            .get(url)
            .header(USER_AGENT, PAGE_USER_AGENT)
            .header(ACCEPT, PAGE_ACCEPT)
            .timeout(self.request_timeout)
            .send()
            .await
            .map_err(|e| AppError::PageFetchError(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            warn!(url, status = status.as_u16(), "page fetch rejected");
            return Err(AppError::PageFetchError(format!("{} from {}", status, url)));
        }

        response
            .text()
            .await
            .map_err(|e| AppError::PageFetchError(e.to_string()))
    }

    pub async fn scrape(&self, url: &str, query: &str) -> Result<SelectorScrape> {
        let html = self.fetch_html(url).await?;
        let scrape = scrape_html(url, query, &html)?;
        info!(url, items = scrape.total_items, selectors = scrape.selectors_used.len(), "selector scrape done");
        Ok(scrape)
    }
}
