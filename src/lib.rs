pub mod api;
pub mod compiler;
pub mod config;
pub mod content;
pub mod detector;
pub mod error;
pub mod export;
pub mod firecrawl;
pub mod history;
pub mod llm;
pub mod normalizer;
pub mod orchestrator;
pub mod patterns;
pub mod pipeline;
pub mod prompts;
pub mod row;
pub mod selectors;

#[cfg(test)]
mod test_support;

use std::sync::Arc;
use std::time::Duration;

use reqwest::{Client, ClientBuilder};
use tokio::sync::Mutex;

use config::Config;
use error::{AppError, Result};
use history::HistoryStore;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    /// One connection pool for both upstream services.
    pub http: Client,
    pub history: Arc<Mutex<HistoryStore>>,
}

impl AppState {
    pub async fn new(config: Config) -> Result<Self> {
        let http = ClientBuilder::new()
            .connect_timeout(Duration::from_secs(5))
            .pool_max_idle_per_host(10)
            .build()
            .map_err(|e| AppError::ConfigError(format!("Failed to build HTTP client: {}", e)))?;

        let history = match &config.history_path {
            Some(path) => HistoryStore::open(path.clone()).await?,
            None => HistoryStore::in_memory(),
        };

        Ok(Self {
            config: Arc::new(config),
            http,
            history: Arc::new(Mutex::new(history)),
        })
    }
}
