//! Web 搜索（进程内能力）：DuckDuckGo Instant Answer API
//!
//! GET 请求带超时与 User-Agent；按 AbstractText → Definition → Answer → RelatedTopics 的顺序取摘要，
//! 都没有时给出可直接打开的搜索链接。

use async_trait::async_trait;
use reqwest::{Client, Url};
use serde_json::Value;

use crate::config::SearchSection;
use crate::nlu::Entities;
use crate::tools::entities::entity_text;
use crate::tools::Capability;

const USER_AGENT: &str = "MobiusAssistant/1.0";

pub struct WebSearchCapability {
    client: Client,
    endpoint: String,
    max_related_topics: usize,
}

impl WebSearchCapability {
    pub fn new(cfg: &SearchSection) -> Self {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(cfg.timeout_secs))
            .user_agent(USER_AGENT)
            .build()
            .unwrap_or_default();
        Self {
            client,
            endpoint: cfg.endpoint.clone(),
            max_related_topics: cfg.max_related_topics,
        }
    }

    fn request_url(&self, query: &str) -> Result<Url, String> {
        Url::parse_with_params(
            &self.endpoint,
            &[
                ("q", query),
                ("format", "json"),
                ("pretty", "0"),
                ("no_html", "1"),
                ("skip_disambig", "1"),
            ],
        )
        .map_err(|e| format!("Invalid search endpoint: {e}"))
    }
}

fn non_empty<'a>(data: &'a Value, key: &str) -> Option<&'a str> {
    data.get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

fn with_source(data: &Value, summary: &mut String, source_key: &str, url_key: &str) {
    if let (Some(source), Some(url)) = (non_empty(data, source_key), non_empty(data, url_key)) {
        summary.push_str(&format!("\nSource: {source} ({url})"));
    }
}

/// 把 Instant Answer JSON 整理成一段可读文本
pub fn format_instant_answer(data: &Value, query: &str, max_related_topics: usize) -> String {
    if let Some(text) = non_empty(data, "AbstractText") {
        let mut summary = format!("Summary: {text}");
        with_source(data, &mut summary, "AbstractSource", "AbstractURL");
        return summary;
    }
    if let Some(text) = non_empty(data, "Definition") {
        let mut summary = format!("Definition: {text}");
        with_source(data, &mut summary, "DefinitionSource", "DefinitionURL");
        return summary;
    }
    if let Some(answer) = non_empty(data, "Answer") {
        return format!("Answer: {answer}");
    }
    let topics: Vec<&str> = data
        .get("RelatedTopics")
        .and_then(Value::as_array)
        .map(|items| items.iter().filter_map(|t| non_empty(t, "Text")).collect())
        .unwrap_or_default();
    if !topics.is_empty() {
        let mut summary = String::from("Related Topics:");
        for topic in topics.iter().take(max_related_topics) {
            summary.push_str(&format!("\n- {topic}"));
        }
        if topics.len() > max_related_topics {
            summary.push_str("\n- ...and more.");
        }
        return summary;
    }

    let link = Url::parse_with_params("https://duckduckgo.com/", &[("q", query)])
        .map(|u| u.to_string())
        .unwrap_or_else(|_| "https://duckduckgo.com/".to_string());
    format!("I couldn't find a direct answer for '{query}'. You can try searching directly: {link}")
}

#[async_trait]
impl Capability for WebSearchCapability {
    fn name(&self) -> &str {
        "web_search"
    }

    async fn invoke(&self, entities: &Entities) -> Result<String, String> {
        let query = entity_text(entities, "search_query")
            .ok_or_else(|| "No search query specified".to_string())?;
        let url = self.request_url(&query)?;
        tracing::info!(query = %query, "web search");

        let resp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| format!("Could not connect to the search service: {e}"))?;
        if !resp.status().is_success() {
            return Err(format!("Search service returned HTTP {}", resp.status()));
        }
        let data: Value = resp
            .json()
            .await
            .map_err(|e| format!("Unreadable search response: {e}"))?;
        Ok(format_instant_answer(&data, &query, self.max_related_topics))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_abstract_with_source() {
        let data = json!({
            "AbstractText": "Rust is a systems programming language.",
            "AbstractSource": "Wikipedia",
            "AbstractURL": "https://en.wikipedia.org/wiki/Rust",
            "Answer": "ignored",
        });
        assert_eq!(
            format_instant_answer(&data, "rust", 5),
            "Summary: Rust is a systems programming language.\nSource: Wikipedia (https://en.wikipedia.org/wiki/Rust)"
        );
    }

    #[test]
    fn test_related_topics_are_capped() {
        let topics: Vec<Value> = (0..7).map(|i| json!({"Text": format!("topic {i}")})).collect();
        let data = json!({"AbstractText": "", "RelatedTopics": topics});
        let out = format_instant_answer(&data, "x", 3);
        assert!(out.starts_with("Related Topics:\n- topic 0"));
        assert!(out.contains("- topic 2"));
        assert!(!out.contains("- topic 3"));
        assert!(out.ends_with("- ...and more."));
    }

    #[test]
    fn test_fallback_link_is_encoded() {
        let out = format_instant_answer(&json!({}), "rust async", 5);
        assert!(out.contains("https://duckduckgo.com/?q=rust+async"));
    }

    #[test]
    fn test_request_url_params() {
        let cap = WebSearchCapability::new(&SearchSection::default());
        let url = cap.request_url("a&b").unwrap();
        assert!(url.as_str().starts_with("https://api.duckduckgo.com/?q=a%26b&format=json"));
    }
}
