//! Client and wire types for the content-extraction API.

use std::time::Duration;

use reqwest::Client;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value, json};
use tracing::{debug, warn};

/// Output formats the extraction API understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Format {
    Markdown,
    Html,
    RawHtml,
    Extract,
    Screenshot,
}

impl Format {
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "markdown" => Some(Format::Markdown),
            "html" => Some(Format::Html),
            "rawHtml" => Some(Format::RawHtml),
            "extract" => Some(Format::Extract),
            "screenshot" => Some(Format::Screenshot),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Format::Markdown => "markdown",
            Format::Html => "html",
            Format::RawHtml => "rawHtml",
            Format::Extract => "extract",
            Format::Screenshot => "screenshot",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExtractSpec {
    pub schema: Value,
}

/// Schema used when structured extraction is requested without one.
pub fn default_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "content": { "type": "string" }
        }
    })
}

/// How every URL of a run is fetched.
///
/// Structured extraction and the content formats are mutually exclusive:
/// `formats == [extract]` exactly when `extract` holds a schema. The
/// constructors are the only way in, deserialization included.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", from = "Value")]
pub struct ScrapeConfiguration {
    formats: Vec<Format>,
    only_main_content: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    extract: Option<ExtractSpec>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    include_tags: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    exclude_tags: Vec<String>,
}

impl ScrapeConfiguration {
    pub fn structured(schema: Value, only_main_content: bool) -> Self {
        Self {
            formats: vec![Format::Extract],
            only_main_content,
            extract: Some(ExtractSpec { schema }),
            include_tags: Vec::new(),
            exclude_tags: Vec::new(),
        }
    }

    /// Content formats only; `extract` is dropped and an empty list means markdown.
    pub fn content(formats: Vec<Format>, only_main_content: bool) -> Self {
        let mut kept: Vec<Format> = Vec::new();
        for format in formats {
            if format != Format::Extract && !kept.contains(&format) {
                kept.push(format);
            }
        }
        if kept.is_empty() {
            kept.push(Format::Markdown);
        }

        Self {
            formats: kept,
            only_main_content,
            extract: None,
            include_tags: Vec::new(),
            exclude_tags: Vec::new(),
        }
    }

    pub fn with_tags(mut self, include: Vec<String>, exclude: Vec<String>) -> Self {
        if self.extract.is_none() {
            self.include_tags = include;
            self.exclude_tags = exclude;
        }
        self
    }

    /// Repairs a model-written configuration object.
    ///
    /// When the formats mention `extract`, the schema comes from
    /// `extract.schema`, then `fallback_schema`, then [`default_schema`].
    pub fn from_model(config: &Value, fallback_schema: Option<&Value>) -> Self {
        let formats: Vec<Format> = config
            .get("formats")
            .and_then(Value::as_array)
            .map(|names| names.iter().filter_map(Value::as_str).filter_map(Format::parse).collect())
            .unwrap_or_default();
        let only_main_content = config
            .get("onlyMainContent")
            .and_then(Value::as_bool)
            .unwrap_or(true);

        if formats.contains(&Format::Extract) {
            let schema = config
                .get("extract")
                .and_then(|extract| extract.get("schema"))
                .filter(|schema| schema.is_object())
                .or_else(|| fallback_schema.filter(|schema| schema.is_object()))
                .cloned()
                .unwrap_or_else(|| {
                    debug!("structured format without a schema, using the default");
                    default_schema()
                });
            return Self::structured(schema, only_main_content);
        }

        Self::content(formats, only_main_content)
            .with_tags(string_list(config, "includeTags"), string_list(config, "excludeTags"))
    }

    pub fn formats(&self) -> &[Format] {
        &self.formats
    }

    pub fn only_main_content(&self) -> bool {
        self.only_main_content
    }

    pub fn extract(&self) -> Option<&ExtractSpec> {
        self.extract.as_ref()
    }

    pub fn is_structured(&self) -> bool {
        self.extract.is_some()
    }

    pub fn primary_format(&self) -> Format {
        self.formats.first().copied().unwrap_or(Format::Markdown)
    }
}

impl From<Value> for ScrapeConfiguration {
    fn from(value: Value) -> Self {
        ScrapeConfiguration::from_model(&value, None)
    }
}

fn string_list(config: &Value, key: &str) -> Vec<String> {
    config
        .get(key)
        .and_then(Value::as_array)
        .map(|items| items.iter().filter_map(Value::as_str).map(str::to_string).collect())
        .unwrap_or_default()
}

/// Request body for one scrape call.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScrapePayload {
    pub url: String,
    pub formats: Vec<Format>,
    pub only_main_content: bool,
    pub wait_for: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extract: Option<ExtractSpec>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub include_tags: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub exclude_tags: Vec<String>,
}

impl ScrapePayload {
    pub fn for_config(
        url: &str,
        config: &ScrapeConfiguration,
        wait_for_ms: u64,
        timeout: Option<Duration>,
    ) -> Self {
        Self {
            url: url.to_string(),
            formats: config.formats.clone(),
            only_main_content: config.only_main_content,
            wait_for: wait_for_ms,
            timeout: timeout.map(|t| t.as_millis() as u64),
            extract: config.extract.clone(),
            include_tags: config.include_tags.clone(),
            exclude_tags: config.exclude_tags.clone(),
        }
    }

    /// Markdown of the main content, used to show the model what a page holds.
    pub fn sample(url: &str, wait_for_ms: u64) -> Self {
        Self::for_config(
            url,
            &ScrapeConfiguration::content(vec![Format::Markdown], true),
            wait_for_ms,
            None,
        )
    }
}

/// Structured extraction output, by shape.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(from = "Option<Value>")]
pub enum ExtractPayload {
    /// A top-level array: one row per element.
    ArrayOfRows(Vec<Value>),
    /// A top-level object whose members are groups of rows or single values.
    /// A bare scalar arrives here under the `content` key.
    KeyedGroups(Map<String, Value>),
    #[default]
    Absent,
}

impl From<Option<Value>> for ExtractPayload {
    fn from(value: Option<Value>) -> Self {
        match value {
            None | Some(Value::Null) => ExtractPayload::Absent,
            Some(Value::Array(items)) => ExtractPayload::ArrayOfRows(items),
            Some(Value::Object(map)) => ExtractPayload::KeyedGroups(map),
            Some(scalar) => {
                let mut map = Map::new();
                map.insert("content".to_string(), scalar);
                ExtractPayload::KeyedGroups(map)
            }
        }
    }
}

impl ExtractPayload {
    pub fn is_present(&self) -> bool {
        !matches!(self, ExtractPayload::Absent)
    }

    pub fn to_json(&self) -> Option<Value> {
        match self {
            ExtractPayload::ArrayOfRows(items) => Some(Value::Array(items.clone())),
            ExtractPayload::KeyedGroups(map) => Some(Value::Object(map.clone())),
            ExtractPayload::Absent => None,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PageMetadata {
    #[serde(default, deserialize_with = "lenient_string")]
    pub title: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub description: Option<String>,
}

/// What the extraction API returned for one URL. Any part may be missing.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawScrapeResponse {
    #[serde(default)]
    pub markdown: Option<String>,
    #[serde(default)]
    pub html: Option<String>,
    #[serde(default)]
    pub raw_html: Option<String>,
    #[serde(default)]
    pub extract: ExtractPayload,
    #[serde(default)]
    pub metadata: PageMetadata,
}

impl RawScrapeResponse {
    /// HTML in whichever flavour was returned, cleaned before raw.
    pub fn any_html(&self) -> Option<&str> {
        self.html
            .as_deref()
            .or(self.raw_html.as_deref())
            .filter(|html| !html.trim().is_empty())
    }

    pub fn markdown(&self) -> Option<&str> {
        self.markdown.as_deref().filter(|md| !md.trim().is_empty())
    }
}

#[derive(Debug, Deserialize)]
struct ScrapeEnvelope {
    #[serde(default)]
    success: Option<bool>,
    #[serde(default)]
    data: Option<RawScrapeResponse>,
    #[serde(default)]
    error: Option<String>,
}

fn lenient_string<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::String(s) => Some(s),
        Value::Array(items) => items.into_iter().find_map(|v| v.as_str().map(str::to_string)),
        _ => None,
    })
}

/// Why one scrape call produced no response.
#[derive(Debug, thiserror::Error)]
pub enum FetchFailure {
    #[error("Extraction API error ({status}): {body}")]
    Status { status: u16, body: String },

    #[error("Extraction API rejected the request: {0}")]
    Rejected(String),

    #[error("Transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    #[error("Could not decode extraction API response: {0}")]
    Decode(String),
}

impl FetchFailure {
    /// Only failures that never reached a response are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            FetchFailure::Transport(_) | FetchFailure::Timeout(_) => true,
            FetchFailure::Status { .. } | FetchFailure::Rejected(_) | FetchFailure::Decode(_) => {
                false
            }
        }
    }
}

#[derive(Clone)]
pub struct FirecrawlClient {
    http: Client,
    base_url: String,
    api_key: String,
    request_timeout: Duration,
}

impl FirecrawlClient {
    pub fn new(http: Client, base_url: &str, api_key: &str, request_timeout: Duration) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            request_timeout,
        }
    }

    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    /// One scrape call, bounded by the client's request timeout.
    pub async fn scrape(&self, payload: &ScrapePayload) -> Result<RawScrapeResponse, FetchFailure> {
        match tokio::time::timeout(self.request_timeout, self.send(payload)).await {
            Ok(result) => result,
            Err(_) => Err(FetchFailure::Timeout(self.request_timeout)),
        }
    }

    async fn send(&self, payload: &ScrapePayload) -> Result<RawScrapeResponse, FetchFailure> {
        let response = self
            .http
            .post(format!("{}/scrape", self.base_url))
            .bearer_auth(&self.api_key)
            .json(payload)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        debug!(url = %payload.url, status = status.as_u16(), bytes = body.len(), "extraction API responded");

        if !status.is_success() {
            warn!(url = %payload.url, status = status.as_u16(), "extraction API returned an error");
            return Err(FetchFailure::Status {
                status: status.as_u16(),
                body,
            });
        }

        let envelope: ScrapeEnvelope =
            serde_json::from_str(&body).map_err(|e| FetchFailure::Decode(e.to_string()))?;

        if envelope.success == Some(false) {
            return Err(FetchFailure::Rejected(
                envelope.error.unwrap_or_else(|| "no reason given".to_string()),
            ));
        }

        Ok(envelope.data.unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::{Matcher, Server};

    #[test]
    fn structured_format_forces_single_format_and_schema() {
        let config = ScrapeConfiguration::from_model(
            &json!({"formats": ["markdown", "extract"], "includeTags": ["main"]}),
            None,
        );
        assert_eq!(config.formats(), &[Format::Extract]);
        assert_eq!(config.extract().map(|e| &e.schema), Some(&default_schema()));
        assert!(config.only_main_content());
        assert!(config.include_tags.is_empty());
    }

    #[test]
    fn fallback_schema_beats_default() {
        let schema = json!({"type": "object", "properties": {"emails": {"type": "array"}}});
        let config = ScrapeConfiguration::from_model(&json!({"formats": ["extract"]}), Some(&schema));
        assert_eq!(config.extract().map(|e| &e.schema), Some(&schema));
    }

    #[test]
    fn content_formats_drop_stray_schema() {
        let config = ScrapeConfiguration::from_model(
            &json!({
                "formats": ["html", "bogus"],
                "onlyMainContent": false,
                "extract": {"schema": {"type": "object"}},
                "excludeTags": ["nav"]
            }),
            None,
        );
        assert_eq!(config.formats(), &[Format::Html]);
        assert!(config.extract().is_none());
        assert!(!config.only_main_content());
        assert_eq!(config.exclude_tags, vec!["nav".to_string()]);

        let empty = ScrapeConfiguration::from_model(&json!({}), None);
        assert_eq!(empty.formats(), &[Format::Markdown]);
    }

    #[test]
    fn deserialization_goes_through_repair() {
        let config: ScrapeConfiguration =
            serde_json::from_value(json!({"formats": ["extract"], "onlyMainContent": true})).unwrap();
        assert!(config.is_structured());

        let wire = serde_json::to_value(&config).unwrap();
        assert_eq!(wire["formats"], json!(["extract"]));
        assert_eq!(wire["extract"]["schema"], default_schema());
    }

    #[test]
    fn extract_payload_shapes() {
        let parse = |v: Value| -> RawScrapeResponse { serde_json::from_value(v).unwrap() };

        assert_eq!(parse(json!({})).extract, ExtractPayload::Absent);
        assert_eq!(parse(json!({"extract": null})).extract, ExtractPayload::Absent);
        assert!(matches!(parse(json!({"extract": [1]})).extract, ExtractPayload::ArrayOfRows(_)));
        assert!(matches!(
            parse(json!({"extract": "text"})).extract,
            ExtractPayload::KeyedGroups(map) if map["content"] == "text"
        ));
    }

    #[test]
    fn metadata_tolerates_list_values() {
        let raw: RawScrapeResponse =
            serde_json::from_value(json!({"metadata": {"title": ["A", "B"], "description": 5}}))
                .unwrap();
        assert_eq!(raw.metadata.title.as_deref(), Some("A"));
        assert_eq!(raw.metadata.description, None);
    }

    #[tokio::test]
    async fn scrape_sends_payload_and_reads_data() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/scrape")
            .match_header("authorization", "Bearer fc-test")
            .match_body(Matcher::PartialJson(json!({
                "url": "https://example.com",
                "formats": ["markdown"],
                "onlyMainContent": true,
                "waitFor": 2000
            })))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r##"{"success":true,"data":{"markdown":"# Hi","metadata":{"title":"Home"}}}"##)
            .expect(1)
            .create_async()
            .await;

        let client = FirecrawlClient::new(Client::new(), &server.url(), "fc-test", Duration::from_secs(5));
        let raw = client
            .scrape(&ScrapePayload::sample("https://example.com", 2000))
            .await
            .unwrap();

        assert_eq!(raw.markdown(), Some("# Hi"));
        assert_eq!(raw.metadata.title.as_deref(), Some("Home"));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn non_success_status_keeps_body() {
        let mut server = Server::new_async().await;
        server
            .mock("POST", "/scrape")
            .with_status(500)
            .with_body("upstream exploded")
            .create_async()
            .await;

        let client = FirecrawlClient::new(Client::new(), &server.url(), "fc-test", Duration::from_secs(5));
        let err = client
            .scrape(&ScrapePayload::sample("https://example.com", 0))
            .await
            .unwrap_err();

        assert!(!err.is_retryable());
        assert!(matches!(err, FetchFailure::Status { status: 500, ref body } if body == "upstream exploded"));
    }
}
