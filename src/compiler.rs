//! Turns a plain-language query into a [`ScrapeConfiguration`] with one model call.

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::content::truncate_chars;
use crate::error::{AppError, Result};
use crate::firecrawl::{FirecrawlClient, ScrapeConfiguration, ScrapePayload};
use crate::llm::{self, LlmClient};
use crate::prompts;

/// Characters of the sample page shown to the model.
pub const SAMPLE_CHARS: usize = 3000;
const SAMPLE_WAIT_FOR_MS: u64 = 2000;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompileDebug {
    pub webpage_content_length: usize,
    pub has_webpage_content: bool,
    pub sample_url: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompiledQuery {
    #[serde(rename = "firecrawlConfig")]
    pub config: ScrapeConfiguration,
    pub extraction_schema: Option<Value>,
    pub debug: CompileDebug,
}

pub struct Compiler {
    firecrawl: FirecrawlClient,
    llm: LlmClient,
}

impl Compiler {
    pub fn new(firecrawl: FirecrawlClient, llm: LlmClient) -> Self {
        Self { firecrawl, llm }
    }

    /// Samples `urls[0]`, asks the model for a configuration and repairs it.
    ///
    /// A failed sample fetch only means the model sees no page content.
    pub async fn compile(&self, query: &str, urls: &[String]) -> Result<CompiledQuery> {
        let sample_url = urls
            .first()
            .ok_or_else(|| AppError::InvalidRequest("at least one URL is required".to_string()))?;

        let sample = self.fetch_sample(sample_url).await;
        let prompt = prompts::configuration_prompt(query, urls, &sample);

        info!(query, sample_chars = sample.chars().count(), "requesting scrape configuration");
        let reply = self.llm.complete(prompt).await?;
        debug!(reply = %reply, "configuration reply");

        let parsed = llm::parse_json_object(&reply).ok_or_else(|| {
            warn!(reply = %reply, "configuration reply is not JSON");
            AppError::CompilationError("unparseable model output".to_string())
        })?;

        let (config, extraction_schema) = repair(&parsed);
        info!(
            formats = ?config.formats(),
            structured = config.is_structured(),
            "scrape configuration ready"
        );

        Ok(CompiledQuery {
            config,
            extraction_schema,
            debug: CompileDebug {
                webpage_content_length: sample.chars().count(),
                has_webpage_content: !sample.is_empty(),
                sample_url: sample_url.clone(),
            },
        })
    }

    async fn fetch_sample(&self, url: &str) -> String {
        match self.firecrawl.scrape(&ScrapePayload::sample(url, SAMPLE_WAIT_FOR_MS)).await {
            Ok(raw) => {
                let markdown = raw.markdown.unwrap_or_default();
                if markdown.chars().count() > SAMPLE_CHARS {
                    format!("{}...", truncate_chars(&markdown, SAMPLE_CHARS))
                } else {
                    markdown
                }
            }
            Err(e) => {
                warn!(url, error = %e, "sample fetch failed, compiling without page content");
                String::new()
            }
        }
    }
}

/// Splits a parsed model reply into a valid configuration and the optional
/// top-level extraction schema.
pub fn repair(parsed: &Value) -> (ScrapeConfiguration, Option<Value>) {
    let extraction_schema = parsed
        .get("extractionSchema")
        .filter(|schema| schema.is_object())
        .cloned();
    let raw_config = parsed.get("firecrawlConfig").cloned().unwrap_or(Value::Null);
    let config = ScrapeConfiguration::from_model(&raw_config, extraction_schema.as_ref());
    (config, extraction_schema)
}
