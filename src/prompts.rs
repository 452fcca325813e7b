//! Prompt text for the two model calls a run can make.

use crate::detector::DataKind;
use crate::llm::Prompt;

const CONFIG_SYSTEM_PROMPT: &str = r#"You turn a user's plain-language scraping request into a configuration for a web content extraction API.

Rules for the configuration:
1. Available formats: "markdown", "html", "rawHtml", "extract", "screenshot".
2. To pull structured data use exactly ["extract"] and provide "extract": {"schema": <JSON schema>}.
3. Never combine "extract" with other formats.
4. Without structured extraction, use ["markdown"].
5. Prefer a schema with one array property per kind of item, each item an object with descriptive string properties (for example title, url, email, price, context).

Respond with a single JSON object of this shape and nothing else:
{
  "firecrawlConfig": {
    "formats": ["extract"],
    "onlyMainContent": true,
    "extract": {"schema": {"type": "object", "properties": {"headlines": {"type": "array", "items": {"type": "object", "properties": {"title": {"type": "string"}, "url": {"type": "string"}}}}}}}
  },
  "extractionSchema": {"type": "object", "properties": {"headlines": {"type": "array"}}}
}"#;

const SPECIFIC_SYSTEM_PROMPT: &str = r#"You extract exactly one kind of data from web page content.

Rules:
1. Return only items of the requested kind, nothing similar but different.
2. Answer with a JSON array of objects and nothing else; return [] when nothing matches.
3. Give each object a field named after the kind (email, phone, address, price, name, date, url) and a short "context" with the surrounding text.
4. Add other fields only when they describe the same item (formatted value, currency, link title)."#;

/// Prompt asking the model for a scrape configuration.
///
/// `sample` is the (possibly empty) markdown of the first target page.
pub fn configuration_prompt(query: &str, urls: &[String], sample: &str) -> Prompt {
    let mut user = String::with_capacity(sample.len() + query.len() * 2 + 512);

    if sample.is_empty() {
        user.push_str("No page content could be fetched for analysis.\n\n");
    } else {
        user.push_str("Content of the first target page (");
        user.push_str(urls.first().map(String::as_str).unwrap_or_default());
        user.push_str("):\n\n");
        user.push_str(sample);
        user.push_str("\n\n");
    }

    user.push_str("User request: \"");
    user.push_str(query);
    user.push_str("\"\n\nTarget URLs: ");
    user.push_str(&urls.join(", "));
    user.push_str(
        "\n\nUse the page content to see which elements hold the requested data and build a \
         configuration that extracts only that data. Return only the JSON object.",
    );

    Prompt {
        system: CONFIG_SYSTEM_PROMPT.to_string(),
        user,
        temperature: 0.1,
        max_tokens: 2500,
    }
}

/// Prompt asking the model to pull one data kind out of page text.
pub fn specific_kind_prompt(content: &str, query: &str, kind: DataKind) -> Prompt {
    let mut user = String::with_capacity(content.len() + query.len() + 256);
    user.push_str("Page content:\n");
    user.push_str(content);
    user.push_str("\n\nUser request: \"");
    user.push_str(query);
    user.push_str("\"\nExtract only: ");
    user.push_str(kind.as_str());
    user.push_str("\n\nReturn a JSON array of objects.");

    Prompt {
        system: SPECIFIC_SYSTEM_PROMPT.to_string(),
        user,
        temperature: 0.1,
        max_tokens: 2000,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn configuration_prompt_embeds_inputs() {
        let urls = vec!["https://a.test".to_string(), "https://b.test".to_string()];
        let prompt = configuration_prompt("all prices", &urls, "# Pricing");

        assert!(prompt.user.contains("(https://a.test)"));
        assert!(prompt.user.contains("# Pricing"));
        assert!(prompt.user.contains("\"all prices\""));
        assert!(prompt.user.contains("https://a.test, https://b.test"));
        assert!(prompt.temperature < 0.5);
    }

    #[test]
    fn empty_sample_is_called_out() {
        let prompt = configuration_prompt("q", &["https://a.test".to_string()], "");
        assert!(prompt.user.starts_with("No page content"));
    }

    #[test]
    fn specific_prompt_names_the_kind() {
        let prompt = specific_kind_prompt("call 555-123-4567", "phones", DataKind::PhoneNumbers);
        assert!(prompt.user.contains("Extract only: phone_numbers"));
    }
}
