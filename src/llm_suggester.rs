//! LLM Suggester — turns a simplified DOM plus content snippets into
//! candidate XPath locators via a remote chat-completion endpoint.

use crate::config::LlmConfig;
use crate::error::LlmError;
use crate::types::LlmXPathSuggestion;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::warn;

#[async_trait]
pub trait LlmSuggester: Send + Sync {
    /// Never returns `Err` for a degradable failure (transport or parse) —
    /// those yield an empty vector. Only a policy error that survives all
    /// retries escalates.
    async fn suggest(
        &self,
        simplified_dom: &str,
        snippets: &[String],
    ) -> Result<Vec<LlmXPathSuggestion>, LlmError>;
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    temperature: f64,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    content: String,
}

pub struct HttpLlmSuggester {
    client: reqwest::Client,
    config: LlmConfig,
}

impl HttpLlmSuggester {
    pub fn new(config: LlmConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
        }
    }

    fn build_prompt(&self, simplified_dom: &str, snippets: &[String], previous_failure_hint: Option<&str>) -> String {
        let mut prompt = String::new();
        prompt.push_str(
            "You identify the main-article-content XPath locator for a web page. \
             Given a simplified DOM and a few text snippets, return a JSON array of \
             objects with \"xpath\" and \"explanation\" fields, most likely candidate first. \
             Return only the JSON array, no prose.\n\n",
        );
        if let Some(hint) = previous_failure_hint {
            prompt.push_str("Your previous suggestion failed: ");
            prompt.push_str(hint);
            prompt.push_str("\nTry a different locator.\n\n");
        }
        prompt.push_str("Simplified DOM:\n");
        prompt.push_str(simplified_dom);
        prompt.push_str("\n\nSnippets:\n");
        for (i, snippet) in snippets.iter().enumerate() {
            prompt.push_str(&format!("{}. {}\n", i + 1, snippet));
        }
        prompt
    }

    async fn call_once(&self, prompt: String) -> Result<String, LlmError> {
        let api_key = self
            .config
            .api_key
            .as_deref()
            .ok_or_else(|| LlmError::Transport("llm api key not configured".to_string()))?;

        let body = ChatRequest {
            model: &self.config.model,
            temperature: self.config.temperature,
            messages: vec![ChatMessage { role: "user", content: prompt }],
        };

        let response = self
            .client
            .post(&self.config.endpoint)
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| LlmError::Transport(e.to_string()))?;

        let status = response.status();
        if status == reqwest::StatusCode::FORBIDDEN || status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(LlmError::Policy(format!("llm endpoint returned {status}")));
        }
        if !status.is_success() {
            return Err(LlmError::Transport(format!("llm endpoint returned {status}")));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| LlmError::Parse(e.to_string()))?;

        parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| LlmError::Parse("no choices in llm response".to_string()))
    }
}

#[async_trait]
impl LlmSuggester for HttpLlmSuggester {
    async fn suggest(
        &self,
        simplified_dom: &str,
        snippets: &[String],
    ) -> Result<Vec<LlmXPathSuggestion>, LlmError> {
        let capped_snippets: Vec<String> = snippets.iter().take(self.config.max_snippets).cloned().collect();

        let mut previous_failure_hint: Option<String> = None;
        for attempt in 0..=self.config.max_retries {
            let prompt = self.build_prompt(simplified_dom, &capped_snippets, previous_failure_hint.as_deref());
            match self.call_once(prompt).await {
                Ok(content) => return Ok(parse_suggestions(&content)),
                Err(LlmError::Policy(reason)) if attempt < self.config.max_retries => {
                    warn!("llm suggester policy error on attempt {attempt}, retrying: {reason}");
                    previous_failure_hint = Some(reason);
                }
                Err(_) => return Ok(Vec::new()),
            }
        }
        Ok(Vec::new())
    }
}

/// Parse a JSON array of `{xpath, explanation}`, tolerating a response
/// wrapped in a fenced code block. Any parse failure degrades to an empty
/// vector rather than propagating an error.
fn parse_suggestions(raw: &str) -> Vec<LlmXPathSuggestion> {
    let unwrapped = strip_code_fence(raw);
    serde_json::from_str(unwrapped).unwrap_or_default()
}

fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(after_open) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let after_open = after_open
        .strip_prefix("json")
        .unwrap_or(after_open)
        .trim_start_matches(['\r', '\n']);
    after_open.strip_suffix("```").map(str::trim).unwrap_or(after_open)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_json_array() {
        let raw = r#"[{"xpath": "//article", "explanation": "main content"}]"#;
        let suggestions = parse_suggestions(raw);
        assert_eq!(suggestions.len(), 1);
        assert_eq!(suggestions[0].xpath, "//article");
    }

    #[test]
    fn parses_fenced_json_array() {
        let raw = "```json\n[{\"xpath\": \"//main\", \"explanation\": \"x\"}]\n```";
        let suggestions = parse_suggestions(raw);
        assert_eq!(suggestions.len(), 1);
        assert_eq!(suggestions[0].xpath, "//main");
    }

    #[test]
    fn malformed_json_degrades_to_empty() {
        assert!(parse_suggestions("not json at all").is_empty());
    }

    #[test]
    fn empty_array_is_empty() {
        assert!(parse_suggestions("[]").is_empty());
    }
}
