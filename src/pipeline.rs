//! The extraction entry point: compile the query once, then run every URL.

use reqwest::Client;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::info;
use url::Url;

use crate::compiler::{CompiledQuery, Compiler};
use crate::config::Config;
use crate::error::{AppError, Result};
use crate::firecrawl::{FirecrawlClient, ScrapeConfiguration};
use crate::llm::LlmClient;
use crate::normalizer::Normalizer;
use crate::orchestrator::{Orchestrator, RetryPolicy, RunSummary, ScrapeResult};

/// URLs and query of one run, validated.
#[derive(Debug, Clone)]
pub struct TargetRequest {
    urls: Vec<String>,
    query: String,
}

impl TargetRequest {
    /// Entries may hold several comma-separated URLs. Blank pieces are
    /// dropped; everything left must be an absolute http(s) URL.
    pub fn new<I, S>(urls: I, query: &str) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut parsed = Vec::new();
        for entry in urls {
            for piece in entry.as_ref().split(',').map(str::trim).filter(|p| !p.is_empty()) {
                let url = Url::parse(piece)
                    .map_err(|e| AppError::InvalidRequest(format!("invalid URL '{}': {}", piece, e)))?;
                if !matches!(url.scheme(), "http" | "https") {
                    return Err(AppError::InvalidRequest(format!("unsupported URL scheme: {}", piece)));
                }
                parsed.push(piece.to_string());
            }
        }

        if parsed.is_empty() {
            return Err(AppError::InvalidRequest("at least one URL is required".to_string()));
        }
        let query = query.trim();
        if query.is_empty() {
            return Err(AppError::InvalidRequest("query must not be empty".to_string()));
        }

        Ok(Self {
            urls: parsed,
            query: query.to_string(),
        })
    }

    pub fn urls(&self) -> &[String] {
        &self.urls
    }

    pub fn query(&self) -> &str {
        &self.query
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunOutput {
    pub results: Vec<ScrapeResult>,
    pub summary: RunSummary,
}

impl RunOutput {
    fn new(results: Vec<ScrapeResult>) -> Self {
        let summary = RunSummary::from_results(&results);
        Self { results, summary }
    }
}

pub struct Pipeline {
    compiler: Compiler,
    orchestrator: Orchestrator,
}

impl Pipeline {
    /// Fails with [`AppError::ConfigurationMissing`] when either API key is unset.
    pub fn from_config(config: &Config, http: Client) -> Result<Self> {
        let firecrawl = FirecrawlClient::new(
            http.clone(),
            &config.firecrawl_base_url,
            config.firecrawl_key()?,
            config.scrape_timeout,
        );
        let llm = LlmClient::new(http, &config.llm_base_url, config.llm_key()?, &config.llm_model)
            .with_timeout(config.llm_timeout);

        let retry = RetryPolicy {
            attempts: config.scrape_attempts,
            backoff: config.scrape_backoff,
        };
        Ok(Self {
            compiler: Compiler::new(firecrawl.clone(), llm.clone()),
            orchestrator: Orchestrator::new(firecrawl, Normalizer::new(Some(llm)), retry, config.wait_for_ms),
        })
    }

    pub async fn compile(&self, request: &TargetRequest) -> Result<CompiledQuery> {
        self.compiler.compile(request.query(), request.urls()).await
    }

    /// Compiles the query, then fetches and normalizes every URL.
    ///
    /// Compilation failures end the run before any URL is fetched;
    /// per-URL failures only show up in their own result.
    pub async fn run_extraction(&self, request: &TargetRequest, cancel: &CancellationToken) -> Result<RunOutput> {
        let compiled = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(AppError::Cancelled),
            compiled = self.compile(request) => compiled?,
        };
        Ok(self.execute(request, &compiled.config, cancel).await)
    }

    /// Runs with a configuration compiled earlier.
    pub async fn execute(
        &self,
        request: &TargetRequest,
        config: &ScrapeConfiguration,
        cancel: &CancellationToken,
    ) -> RunOutput {
        let results = self
            .orchestrator
            .run(request.urls(), request.query(), config, cancel)
            .await;
        let output = RunOutput::new(results);
        info!(
            total = output.summary.total_urls,
            failed = output.summary.failed_scrapes,
            items = output.summary.total_items_extracted,
            "extraction complete"
        );
        output
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::StubServer;
    use mockito::{Matcher, Server};
    use std::time::Duration;
    use serde_json::json;

    #[test]
    fn comma_separated_entries_are_split() {
        let request = TargetRequest::new(
            ["https://a.test, https://b.test", " ", "https://c.test/path"],
            "  all headlines ",
        )
        .unwrap();
        assert_eq!(request.urls(), ["https://a.test", "https://b.test", "https://c.test/path"]);
        assert_eq!(request.query(), "all headlines");
    }

    #[test]
    fn bad_requests_are_rejected() {
        let invalid = |urls: &[&str], query: &str| {
            matches!(TargetRequest::new(urls.iter(), query), Err(AppError::InvalidRequest(_)))
        };
        assert!(invalid(&[], "q"));
        assert!(invalid(&[" , "], "q"));
        assert!(invalid(&["not a url"], "q"));
        assert!(invalid(&["ftp://files.test"], "q"));
        assert!(invalid(&["https://a.test"], "   "));
    }

    #[test]
    fn missing_keys_fail_before_any_work() {
        let mut config = Config::for_tests("http://127.0.0.1:1", "http://127.0.0.1:1");
        config.llm_api_key = None;
        assert!(matches!(
            Pipeline::from_config(&config, Client::new()),
            Err(AppError::ConfigurationMissing(var)) if var == "OPENAI_API_KEY"
        ));
    }

    #[tokio::test]
    async fn headlines_run_end_to_end() {
        let mut server = Server::new_async().await;
        server
            .mock("POST", "/scrape")
            .with_status(200)
            .with_body(
                json!({"success": true, "data": {
                    "markdown": "# Title One\n\nSome body text that is long enough to count.\n\n# Title Two"
                }})
                .to_string(),
            )
            .create_async()
            .await;
        let llm = server
            .mock("POST", "/chat/completions")
            .match_body(Matcher::Regex("all headlines".to_string()))
            .with_status(200)
            .with_body(
                json!({"choices": [{"message": {"content": "{\"firecrawlConfig\": {\"formats\": [\"markdown\"]}}"}}]})
                    .to_string(),
            )
            .expect(1)
            .create_async()
            .await;

        let config = Config::for_tests(&server.url(), &server.url());
        let pipeline = Pipeline::from_config(&config, Client::new()).unwrap();
        let request = TargetRequest::new(["https://example.com"], "all headlines").unwrap();

        let output = pipeline
            .run_extraction(&request, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(output.summary.total_urls, 1);
        assert_eq!(output.summary.successful_scrapes, 1);
        let rows = output.results[0].rows();
        let titles: Vec<_> = rows.iter().map(|r| (r.get_str("type"), r.get_str("title"))).collect();
        assert_eq!(
            titles,
            vec![
                (Some("heading"), Some("Title One")),
                (Some("text"), None),
                (Some("heading"), Some("Title Two")),
            ]
        );
        assert!(rows.iter().all(|r| r.get_str("_url") == Some("https://example.com")));
        llm.assert_async().await;
    }

    #[tokio::test]
    async fn silent_model_ends_run_with_llm_error() {
        let model = StubServer::silent().await;
        let mut config = Config::for_tests("http://127.0.0.1:1", &model.url);
        config.llm_timeout = Duration::from_millis(200);
        let pipeline = Pipeline::from_config(&config, Client::new()).unwrap();
        let request = TargetRequest::new(["https://example.com"], "q").unwrap();

        let result = tokio::time::timeout(
            Duration::from_secs(5),
            pipeline.run_extraction(&request, &CancellationToken::new()),
        )
        .await
        .expect("model timeout bounds compilation");

        assert!(matches!(result, Err(AppError::LlmError(msg)) if msg.contains("no reply")));
    }

    #[tokio::test]
    async fn cancelled_before_compilation() {
        let config = Config::for_tests("http://127.0.0.1:1", "http://127.0.0.1:1");
        let pipeline = Pipeline::from_config(&config, Client::new()).unwrap();
        let request = TargetRequest::new(["https://example.com"], "q").unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = pipeline.run_extraction(&request, &cancel).await;
        assert!(matches!(result, Err(AppError::Cancelled)));
    }
}
