//! Fetches every URL of a run concurrently and normalizes each response.

use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::content::truncate_chars;
use crate::detector::{self, DataKind};
use crate::firecrawl::{FetchFailure, FirecrawlClient, RawScrapeResponse, ScrapeConfiguration, ScrapePayload};
use crate::normalizer::{EmptyReason, Normalized, Normalizer};
use crate::row::{Row, Source};

/// Characters of raw markdown/HTML kept on each result.
pub const RAW_EXCERPT_CHARS: usize = 2000;

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total attempts, first one included.
    pub attempts: u32,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 2,
            backoff: Duration::from_secs(1),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultMetadata {
    pub title: Option<String>,
    pub description: Option<String>,
    #[serde(rename = "sourceURL")]
    pub source_url: String,
    pub scraped_at: DateTime<Utc>,
    pub user_query: String,
    pub item_count: usize,
    pub format: &'static str,
    pub extraction_method: Option<Source>,
    pub specific_data_type: Option<DataKind>,
    pub used_llm: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub empty_reason: Option<EmptyReason>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RawExcerpts {
    pub markdown: Option<String>,
    pub html: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ScrapeData {
    pub extract: Vec<Row>,
    pub metadata: ResultMetadata,
    pub raw: RawExcerpts,
}

/// Outcome for one target URL.
#[derive(Debug, Clone, Serialize)]
pub struct ScrapeResult {
    pub url: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<ScrapeData>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ScrapeResult {
    fn failed(url: &str, error: String) -> Self {
        Self {
            url: url.to_string(),
            success: false,
            data: None,
            error: Some(error),
        }
    }

    pub fn rows(&self) -> &[Row] {
        self.data.as_ref().map(|d| d.extract.as_slice()).unwrap_or_default()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub total_urls: usize,
    pub successful_scrapes: usize,
    pub failed_scrapes: usize,
    pub total_items_extracted: usize,
}

impl RunSummary {
    pub fn from_results(results: &[ScrapeResult]) -> Self {
        results.iter().fold(RunSummary::default(), |mut summary, result| {
            summary.total_urls += 1;
            if result.success {
                summary.successful_scrapes += 1;
            } else {
                summary.failed_scrapes += 1;
            }
            summary.total_items_extracted += result.rows().len();
            summary
        })
    }
}

pub struct Orchestrator {
    firecrawl: FirecrawlClient,
    normalizer: Normalizer,
    retry: RetryPolicy,
    wait_for_ms: u64,
}

impl Orchestrator {
    pub fn new(firecrawl: FirecrawlClient, normalizer: Normalizer, retry: RetryPolicy, wait_for_ms: u64) -> Self {
        Self {
            firecrawl,
            normalizer,
            retry,
            wait_for_ms,
        }
    }

    /// One result per URL, in input order. Waits for every URL; a
    /// cancelled token turns unfinished URLs into failures.
    pub async fn run(
        &self,
        urls: &[String],
        query: &str,
        config: &ScrapeConfiguration,
        cancel: &CancellationToken,
    ) -> Vec<ScrapeResult> {
        let kind = detector::detect(query);
        let start = Instant::now();
        info!(urls = urls.len(), ?kind, format = config.primary_format().as_str(), "starting run");

        let tasks = urls.iter().map(|url| async move {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    warn!(url = %url, "scrape cancelled");
                    ScrapeResult::failed(url, "cancelled".to_string())
                }
                result = self.scrape_one(url, query, kind, config) => result,
            }
        });
        let results = join_all(tasks).await;

        info!(elapsed = ?start.elapsed(), "run finished");
        results
    }

    async fn scrape_one(
        &self,
        url: &str,
        query: &str,
        kind: Option<DataKind>,
        config: &ScrapeConfiguration,
    ) -> ScrapeResult {
        let payload = ScrapePayload::for_config(url, config, self.wait_for_ms, Some(self.firecrawl.request_timeout()));

        let raw = match self.fetch_with_retry(&payload).await {
            Ok(raw) => raw,
            Err(failure) => {
                warn!(url, error = %failure, "scrape failed");
                return ScrapeResult::failed(url, failure.to_string());
            }
        };

        let normalized = self.normalizer.normalize(&raw, url, query, kind).await;
        let (rows, method, empty_reason) = match normalized {
            Normalized::Rows { rows, source } => (rows, Some(source), None),
            Normalized::Empty(reason) => (Vec::new(), None, Some(reason)),
        };
        info!(url, items = rows.len(), method = method.map(|m| m.as_str()), "scrape succeeded");

        ScrapeResult {
            url: url.to_string(),
            success: true,
            data: Some(ScrapeData {
                metadata: ResultMetadata {
                    title: raw.metadata.title.clone(),
                    description: raw.metadata.description.clone(),
                    source_url: url.to_string(),
                    scraped_at: Utc::now(),
                    user_query: query.to_string(),
                    item_count: rows.len(),
                    format: config.primary_format().as_str(),
                    extraction_method: method,
                    specific_data_type: kind,
                    used_llm: method == Some(Source::LlmSpecific),
                    empty_reason,
                },
                raw: excerpts(&raw),
                extract: rows,
            }),
            error: None,
        }
    }

    async fn fetch_with_retry(&self, payload: &ScrapePayload) -> Result<RawScrapeResponse, FetchFailure> {
        let attempts = self.retry.attempts.max(1);
        let mut attempt = 1;
        loop {
            debug!(url = %payload.url, attempt, "calling extraction API");
            match self.firecrawl.scrape(payload).await {
                Err(failure) if failure.is_retryable() && attempt < attempts => {
                    warn!(url = %payload.url, attempt, error = %failure, "retrying after backoff");
                    tokio::time::sleep(self.retry.backoff).await;
                    attempt += 1;
                }
                result => return result,
            }
        }
    }
}

fn excerpts(raw: &RawScrapeResponse) -> RawExcerpts {
    RawExcerpts {
        markdown: raw.markdown().map(|md| truncate_chars(md, RAW_EXCERPT_CHARS).to_string()),
        html: raw.any_html().map(|html| truncate_chars(html, RAW_EXCERPT_CHARS).to_string()),
    }
}
