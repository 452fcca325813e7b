//! Run history: newest first, capped, optionally mirrored to a JSON file.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{AppError, Result};
use crate::row::Row;

pub const MAX_RECORDS: usize = 50;
pub const PREVIEW_ROWS: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordStatus {
    Completed,
    Pending,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub id: Uuid,
    pub target_urls: Vec<String>,
    pub user_query: String,
    pub results: Vec<Row>,
    pub preview_data: Vec<Row>,
    pub status: RecordStatus,
    pub total_items: usize,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl HistoryRecord {
    fn set_results(&mut self, rows: Vec<Row>) {
        self.preview_data = rows.iter().take(PREVIEW_ROWS).cloned().collect();
        self.total_items = rows.len();
        self.status = if rows.is_empty() {
            RecordStatus::Pending
        } else {
            RecordStatus::Completed
        };
        self.results = rows;
        self.updated_at = Utc::now();
    }
}

#[derive(Debug, Default)]
pub struct HistoryStore {
    records: Vec<HistoryRecord>,
    path: Option<PathBuf>,
}

impl HistoryStore {
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Loads `path` if it exists; every change is written back to it.
    pub async fn open(path: PathBuf) -> Result<Self> {
        let mut records: Vec<HistoryRecord> = match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map_err(|e| AppError::StorageError(format!("{}: {}", path.display(), e)))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(AppError::StorageError(format!("{}: {}", path.display(), e))),
        };
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        records.truncate(MAX_RECORDS);

        info!(path = %path.display(), records = records.len(), "history loaded");
        Ok(Self {
            records,
            path: Some(path),
        })
    }

    pub async fn create(&mut self, urls: &[String], query: &str, rows: Vec<Row>) -> Result<HistoryRecord> {
        let now = Utc::now();
        let mut record = HistoryRecord {
            id: Uuid::new_v4(),
            target_urls: urls.to_vec(),
            user_query: query.to_string(),
            results: Vec::new(),
            preview_data: Vec::new(),
            status: RecordStatus::Pending,
            total_items: 0,
            created_at: now,
            updated_at: now,
        };
        record.set_results(rows);

        self.records.insert(0, record.clone());
        if self.records.len() > MAX_RECORDS {
            let dropped = self.records.len() - MAX_RECORDS;
            self.records.truncate(MAX_RECORDS);
            debug!(dropped, "oldest history records evicted");
        }
        self.persist().await?;
        Ok(record)
    }

    /// Most recent first.
    pub fn list(&self) -> &[HistoryRecord] {
        &self.records
    }

    pub fn get(&self, id: Uuid) -> Option<&HistoryRecord> {
        self.records.iter().find(|r| r.id == id)
    }

    pub async fn replace_results(&mut self, id: Uuid, rows: Vec<Row>) -> Result<HistoryRecord> {
        let record = self
            .records
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or_else(|| not_found(id))?;
        record.set_results(rows);
        let updated = record.clone();
        self.persist().await?;
        Ok(updated)
    }

    pub async fn delete(&mut self, id: Uuid) -> Result<()> {
        let before = self.records.len();
        self.records.retain(|r| r.id != id);
        if self.records.len() == before {
            return Err(not_found(id));
        }
        self.persist().await
    }

    pub async fn clear(&mut self) -> Result<()> {
        self.records.clear();
        self.persist().await
    }

    async fn persist(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let bytes = serde_json::to_vec_pretty(&self.records)
            .map_err(|e| AppError::StorageError(e.to_string()))?;
        tokio::fs::write(path, bytes).await.map_err(|e| {
            warn!(path = %path.display(), error = %e, "could not write history");
            AppError::StorageError(format!("{}: {}", path.display(), e))
        })
    }
}

fn not_found(id: Uuid) -> AppError {
    AppError::NotFound(format!("history record {}", id))
}
