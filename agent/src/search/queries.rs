use crate::llm::{CompletionRequest, LLM, Message, ResponseSchema};
use crate::{Error, Result};
use regex::Regex;
use schemars::JsonSchema;
use serde::Deserialize;
use std::sync::{Arc, LazyLock};

#[derive(Deserialize, JsonSchema)]
struct QueryList {
    queries: Vec<String>,
}

const SYSTEM_PROMPT: &str =
    "You are a precise JSON generator. Output ONLY valid JSON with no extra text.";

fn user_prompt(n: usize, topic: &str) -> String {
    format!(
        "You are a research assistant. Your task is to generate exactly {n} diverse web search \
queries for the following research topic.

RULES:
- Each query must approach the topic from a DIFFERENT angle (e.g., overview, recent \
developments, technical details, comparisons, expert opinions, case studies).
- Queries should be concise (3-8 words each).
- Respond ONLY with a JSON object of the form {{\"queries\": [\"...\"]}}. No explanation, \
no markdown fences, no preamble.

TOPIC: {topic}

RESPOND WITH ONLY JSON:"
    )
}

/// Asks the language model for a handful of diverse search queries.
pub struct QueryGenerator {
    llm: Arc<dyn LLM + Send + Sync>,
    num_queries: usize,
    temperature: f32,
}

impl QueryGenerator {
    pub fn new(llm: Arc<dyn LLM + Send + Sync>, num_queries: usize, temperature: f32) -> Self {
        Self {
            llm,
            num_queries,
            temperature,
        }
    }

    pub async fn generate(&self, topic: &str) -> Result<Vec<String>> {
        let schema = ResponseSchema::new::<QueryList>("search_queries")?;
        let messages = [
            Message::System(SYSTEM_PROMPT.to_string()),
            Message::User(user_prompt(self.num_queries, topic)),
        ];

        let response = self
            .llm
            .completion(CompletionRequest {
                messages: &messages,
                temperature: Some(self.temperature),
                response_schema: Some(&schema),
            })
            .await?;

        let raw = response.content.trim();
        tracing::debug!(raw, "raw query generation response");

        let mut queries = parse_queries(raw);
        if queries.is_empty() {
            return Err(Error::QueryParseError(raw.to_string()));
        }
        queries.truncate(self.num_queries);

        tracing::info!(count = queries.len(), ?queries, "generated search queries");
        Ok(queries)
    }
}

static FENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"```(?:json)?\s*").expect("valid regex"));

static EMBEDDED_ARRAY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)\[.*?\]").expect("valid regex"));

static NUMBERED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^\s*\d+[.)]\s*(.+)$").expect("valid regex"));

fn clean_query(q: &str) -> String {
    q.trim().trim_matches(|c| c == '"' || c == '\'').trim().to_string()
}

fn from_json_array(items: &[serde_json::Value]) -> Vec<String> {
    items
        .iter()
        .map(|v| match v {
            serde_json::Value::String(s) => clean_query(s),
            other => clean_query(&other.to_string()),
        })
        .filter(|q| !q.is_empty())
        .collect()
}

fn from_json(text: &str) -> Option<Vec<String>> {
    match serde_json::from_str::<serde_json::Value>(text).ok()? {
        serde_json::Value::Array(items) => Some(from_json_array(&items)),
        serde_json::Value::Object(map) => match map.get("queries")? {
            serde_json::Value::Array(items) => Some(from_json_array(items)),
            _ => None,
        },
        _ => None,
    }
}

/// Pull query strings out of whatever the model answered with: JSON (bare
/// array or `{"queries": [...]}`), fenced JSON, an array embedded in prose,
/// a numbered list, or plain lines.
pub fn parse_queries(raw: &str) -> Vec<String> {
    let cleaned = FENCE.replace_all(raw, "");
    let cleaned = cleaned.trim().trim_end_matches('`').trim();

    if let Some(queries) = from_json(cleaned) {
        return queries;
    }

    if let Some(queries) = EMBEDDED_ARRAY
        .find(cleaned)
        .and_then(|m| from_json(m.as_str()))
    {
        return queries;
    }

    let numbered: Vec<String> = NUMBERED
        .captures_iter(cleaned)
        .map(|caps| clean_query(&caps[1]))
        .filter(|q| !q.is_empty())
        .collect();
    if !numbered.is_empty() {
        return numbered;
    }

    cleaned
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with(['{', '[', ']', '}']))
        .map(clean_query)
        .filter(|q| !q.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::CompletionResponse;
    use async_trait::async_trait;

    #[test]
    fn test_parse_json_array() {
        assert_eq!(
            parse_queries(r#"["llm drug discovery", " protein folding ai "]"#),
            vec!["llm drug discovery", "protein folding ai"]
        );
    }

    #[test]
    fn test_parse_json_object() {
        assert_eq!(
            parse_queries(r#"{"queries": ["a one", "b two"]}"#),
            vec!["a one", "b two"]
        );
    }

    #[test]
    fn test_parse_fenced_json() {
        let raw = "```json\n[\"first query\", \"second query\"]\n```";
        assert_eq!(parse_queries(raw), vec!["first query", "second query"]);
    }

    #[test]
    fn test_parse_embedded_array() {
        let raw = "Sure! Here are your queries: [\"x y z\", \"u v w\"] hope that helps";
        assert_eq!(parse_queries(raw), vec!["x y z", "u v w"]);
    }

    #[test]
    fn test_parse_numbered_list() {
        let raw = "1. \"quantum error correction\"\n2) topological qubits 2024\n";
        assert_eq!(
            parse_queries(raw),
            vec!["quantum error correction", "topological qubits 2024"]
        );
    }

    #[test]
    fn test_parse_plain_lines() {
        let raw = "solar storage costs\n\n'grid batteries overview'\n]";
        assert_eq!(
            parse_queries(raw),
            vec!["solar storage costs", "grid batteries overview"]
        );
    }

    #[test]
    fn test_parse_nothing() {
        assert!(parse_queries("   ").is_empty());
        assert!(parse_queries("[]").is_empty());
    }

    struct MockLLM(&'static str);

    #[async_trait]
    impl LLM for MockLLM {
        async fn completion<'a>(
            &self,
            request: CompletionRequest<'a>,
        ) -> Result<CompletionResponse> {
            assert!(request.response_schema.is_some());
            assert!(matches!(
                request.messages.last(),
                Some(Message::User(p)) if p.contains("TOPIC: fusion")
            ));
            Ok(CompletionResponse {
                content: self.0.to_string(),
            })
        }

        async fn models(&self) -> Result<Vec<String>> {
            Ok(vec![])
        }
    }

    #[tokio::test]
    async fn test_generate_truncates() -> Result<()> {
        let generator = QueryGenerator::new(Arc::new(MockLLM(r#"["a","b","c","d"]"#)), 2, 0.7);
        assert_eq!(generator.generate("fusion").await?, vec!["a", "b"]);
        Ok(())
    }

    #[tokio::test]
    async fn test_generate_unparsable() {
        let generator = QueryGenerator::new(Arc::new(MockLLM("{}")), 3, 0.7);
        let err = generator.generate("fusion").await.unwrap_err();
        assert!(matches!(err, Error::QueryParseError(_)));
    }
}
