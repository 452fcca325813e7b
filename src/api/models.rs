use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::firecrawl::ScrapeConfiguration;
use crate::history::{HistoryRecord, RecordStatus};
use crate::pipeline::RunOutput;
use crate::row::Row;
use crate::selectors::SelectorScrape;

/// URLs as sent by clients: one (possibly comma-separated) string or a list.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum UrlInput {
    One(String),
    Many(Vec<String>),
}

impl UrlInput {
    pub fn into_vec(self) -> Vec<String> {
        match self {
            UrlInput::One(url) => vec![url],
            UrlInput::Many(urls) => urls,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ExtractRequest {
    pub urls: UrlInput,
    pub query: String,
    #[serde(default)]
    pub persist: bool,
}

#[derive(Debug, Deserialize)]
pub struct CompileRequest {
    pub urls: UrlInput,
    pub query: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteRequest {
    pub urls: UrlInput,
    pub query: String,
    pub firecrawl_config: ScrapeConfiguration,
}

/// Selector mode takes exactly one page.
#[derive(Debug, Deserialize)]
pub struct SelectorScrapeRequest {
    pub url: String,
    pub query: String,
    #[serde(default)]
    pub persist: bool,
}

#[derive(Debug, Deserialize)]
pub struct ExportRequest {
    pub rows: Vec<Row>,
}

#[derive(Serialize)]
pub struct ExtractResponse {
    #[serde(flatten)]
    pub output: RunOutput,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub history_id: Option<Uuid>,
}

#[derive(Serialize)]
pub struct SelectorScrapeResponse {
    #[serde(flatten)]
    pub scrape: SelectorScrape,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub history_id: Option<Uuid>,
}

/// A history record without its full result set.
#[derive(Serialize)]
pub struct HistoryListItem {
    pub id: Uuid,
    pub target_urls: Vec<String>,
    pub user_query: String,
    pub preview_data: Vec<Row>,
    pub status: RecordStatus,
    pub total_items: usize,
    pub created_at: DateTime<Utc>,
}

impl From<&HistoryRecord> for HistoryListItem {
    fn from(record: &HistoryRecord) -> Self {
        Self {
            id: record.id,
            target_urls: record.target_urls.clone(),
            user_query: record.user_query.clone(),
            preview_data: record.preview_data.clone(),
            status: record.status,
            total_items: record.total_items,
            created_at: record.created_at,
        }
    }
}
