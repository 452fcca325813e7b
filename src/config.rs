use std::env;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{AppError, Result};

pub const DEFAULT_FIRECRAWL_BASE_URL: &str = "https://api.firecrawl.dev/v1";
pub const DEFAULT_LLM_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_LLM_MODEL: &str = "gpt-4o-mini";

/// Process configuration, read once at startup and handed to every run.
///
/// API keys are optional here: a missing key is reported as
/// [`AppError::ConfigurationMissing`] when a run starts, not at boot.
#[derive(Clone, Debug)]
pub struct Config {
    pub server_addr: SocketAddr,
    pub firecrawl_api_key: Option<String>,
    pub firecrawl_base_url: String,
    pub llm_api_key: Option<String>,
    pub llm_base_url: String,
    pub llm_model: String,
    /// Ceiling for one model completion.
    pub llm_timeout: Duration,
    /// Per-attempt ceiling for one extraction API call.
    pub scrape_timeout: Duration,
    pub scrape_attempts: u32,
    pub scrape_backoff: Duration,
    /// `waitFor` hint forwarded to the extraction API.
    pub wait_for_ms: u64,
    /// Whole-request ceiling applied by the HTTP handlers.
    pub run_timeout: Duration,
    pub history_path: Option<PathBuf>,
}

impl Config {
    pub fn load() -> Result<Self> {
        // Load environment variables from .env file if it exists
        dotenv::dotenv().ok();

        let host = env::var("HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port: u16 = parse_var("PORT", 3000)?;
        let ip = IpAddr::from_str(&host)
            .map_err(|e| AppError::ConfigError(format!("Invalid host address: {}", e)))?;

        Ok(Config {
            server_addr: SocketAddr::new(ip, port),
            firecrawl_api_key: non_empty_var("FIRECRAWL_API_KEY"),
            firecrawl_base_url: env::var("FIRECRAWL_BASE_URL")
                .unwrap_or_else(|_| DEFAULT_FIRECRAWL_BASE_URL.to_string()),
            llm_api_key: non_empty_var("OPENAI_API_KEY"),
            llm_base_url: env::var("LLM_BASE_URL")
                .unwrap_or_else(|_| DEFAULT_LLM_BASE_URL.to_string()),
            llm_model: env::var("LLM_MODEL").unwrap_or_else(|_| DEFAULT_LLM_MODEL.to_string()),
            llm_timeout: Duration::from_secs(parse_var("LLM_TIMEOUT_SECS", 60)?),
            scrape_timeout: Duration::from_secs(parse_var("SCRAPE_TIMEOUT_SECS", 30)?),
            scrape_attempts: parse_var::<u32>("SCRAPE_ATTEMPTS", 2)?.max(1),
            scrape_backoff: Duration::from_millis(parse_var("SCRAPE_BACKOFF_MS", 1000)?),
            wait_for_ms: parse_var("SCRAPE_WAIT_FOR_MS", 3000)?,
            run_timeout: Duration::from_secs(parse_var("RUN_TIMEOUT_SECS", 90)?),
            history_path: non_empty_var("HISTORY_PATH").map(PathBuf::from),
        })
    }

    pub fn firecrawl_key(&self) -> Result<&str> {
        self.firecrawl_api_key
            .as_deref()
            .ok_or_else(|| AppError::ConfigurationMissing("FIRECRAWL_API_KEY".to_string()))
    }

    pub fn llm_key(&self) -> Result<&str> {
        self.llm_api_key
            .as_deref()
            .ok_or_else(|| AppError::ConfigurationMissing("OPENAI_API_KEY".to_string()))
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn parse_var<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|e| AppError::ConfigError(format!("Invalid {}: {}", name, e))),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
impl Config {
    /// Configuration pointing both upstream services at local stubs.
    pub fn for_tests(firecrawl_base_url: &str, llm_base_url: &str) -> Self {
        Config {
            server_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
            firecrawl_api_key: Some("fc-test".to_string()),
            firecrawl_base_url: firecrawl_base_url.to_string(),
            llm_api_key: Some("sk-test".to_string()),
            llm_base_url: llm_base_url.to_string(),
            llm_model: DEFAULT_LLM_MODEL.to_string(),
            llm_timeout: Duration::from_secs(5),
            scrape_timeout: Duration::from_secs(5),
            scrape_attempts: 2,
            scrape_backoff: Duration::from_millis(10),
            wait_for_ms: 0,
            run_timeout: Duration::from_secs(10),
            history_path: None,
        }
    }
}
