use std::time::Duration;

use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::Client;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, error};

use crate::error::{AppError, Result};

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

static OBJECT_SPAN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{[\s\S]*\}").expect("valid object span regex"));
static ARRAY_SPAN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[[\s\S]*\]").expect("valid array span regex"));

#[derive(Serialize)]
struct Message {
    role: String,
    content: String,
}

#[derive(Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<Message>,
    temperature: f64,
    max_tokens: u32,
}

/// A system + user prompt pair sent as one completion request.
pub struct Prompt {
    pub system: String,
    pub user: String,
    pub temperature: f64,
    pub max_tokens: u32,
}

/// Client for an OpenAI-compatible chat completion endpoint.
#[derive(Clone)]
pub struct LlmClient {
    http: Client,
    base_url: String,
    api_key: String,
    model: String,
    request_timeout: Duration,
}

impl LlmClient {
    pub fn new(http: Client, base_url: &str, api_key: &str, model: &str) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            model: model.to_string(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    /// Caps how long one completion may take, response body included.
    pub fn with_timeout(mut self, request_timeout: Duration) -> Self {
        self.request_timeout = request_timeout;
        self
    }

    /// Sends `prompt` and returns the first choice's text, untouched.
    ///
    /// A reply that does not arrive within the request timeout is an
    /// [`AppError::LlmError`], same as a rejected call.
    pub async fn complete(&self, prompt: Prompt) -> Result<String> {
        match tokio::time::timeout(self.request_timeout, self.send(prompt)).await {
            Ok(result) => result,
            Err(_) => {
                error!(timeout = ?self.request_timeout, "completion request timed out");
                Err(AppError::LlmError(format!(
                    "no reply within {:?}",
                    self.request_timeout
                )))
            }
        }
    }

    async fn send(&self, prompt: Prompt) -> Result<String> {
        let body = ChatRequest {
            model: self.model.clone(),
            messages: vec![
                Message {
                    role: "system".into(),
                    content: prompt.system,
                },
                Message {
                    role: "user".into(),
                    content: prompt.user,
                },
            ],
            temperature: prompt.temperature,
            max_tokens: prompt.max_tokens,
        };

        let res = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| AppError::LlmError(format!("request failed: {}", e)))?;

        let status = res.status();
        if !status.is_success() {
            let text = res.text().await.unwrap_or_default();
            error!(status = status.as_u16(), body = %text, "completion request rejected");
            return Err(AppError::LlmError(format!("{} - {}", status.as_u16(), text)));
        }

        let json: Value = res
            .json()
            .await
            .map_err(|e| AppError::LlmError(format!("invalid response body: {}", e)))?;
        let reply = json["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| AppError::LlmError("Invalid response format from LLM".to_string()))?
            .to_string();

        debug!(chars = reply.len(), "completion received");
        Ok(reply)
    }
}

/// Removes a surrounding Markdown code fence (```json or bare ```), if any.
pub fn strip_code_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let inner = if let Some(rest) = trimmed.strip_prefix("```json") {
        rest
    } else if let Some(rest) = trimmed.strip_prefix("```") {
        rest
    } else {
        return trimmed;
    };
    inner.trim().strip_suffix("```").unwrap_or(inner).trim()
}

/// Reads a JSON object out of model output: fences stripped first, then the
/// widest `{...}` span as a second attempt.
pub fn parse_json_object(text: &str) -> Option<Value> {
    parse_with_fallback(text, &OBJECT_SPAN).filter(Value::is_object)
}

/// Like [`parse_json_object`] but for a top-level array.
pub fn parse_json_array(text: &str) -> Option<Vec<Value>> {
    match parse_with_fallback(text, &ARRAY_SPAN)? {
        Value::Array(items) => Some(items),
        _ => None,
    }
}

fn parse_with_fallback(text: &str, span: &Regex) -> Option<Value> {
    let cleaned = strip_code_fences(text);
    match serde_json::from_str::<Value>(cleaned) {
        Ok(value) => Some(value),
        Err(first) => {
            debug!(error = %first, "model output is not plain JSON, trying span recovery");
            let candidate = span.find(text)?;
            serde_json::from_str(candidate.as_str()).ok()
        }
    }
}
