//! Anthropic Messages API.

use std::collections::BTreeMap;

use serde::Deserialize;
use serde_json::{Map, Value, json};

use super::{Provider, ProviderRegistry, to_body};
use crate::error::{LlmError, Result};
use crate::types::{Message, RequestParams, Role};

/// Messages API endpoint.
pub const ANTHROPIC_ENDPOINT: &str = "https://api.anthropic.com/v1/messages";
/// API version header value.
pub const ANTHROPIC_VERSION: &str = "2023-06-01";
/// The Messages API requires `max_tokens`; used when none is configured.
const DEFAULT_MAX_TOKENS: u32 = 1024;

/// Register `anthropic`.
pub fn register(registry: &mut ProviderRegistry) {
    registry.register("anthropic", |key, model| Box::new(AnthropicProvider::new(key, model)));
}

/// Adapter for Claude models.
#[derive(Debug, Clone)]
pub struct AnthropicProvider {
    api_key: String,
    model: String,
}

impl AnthropicProvider {
    /// Create the adapter.
    #[must_use]
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self { api_key: api_key.into(), model: model.into() }
    }

    fn body(&self, system: Option<String>, messages: Vec<Value>, params: &RequestParams) -> Result<Vec<u8>> {
        let mut body = Map::new();
        body.insert("model".into(), json!(self.model));
        body.insert("max_tokens".into(), json!(params.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS)));
        body.insert("messages".into(), Value::Array(messages));

        if let Some(system) = system {
            body.insert("system".into(), json!(system));
        }
        if let Some(t) = params.temperature {
            body.insert("temperature".into(), json!(t));
        }
        if let Some(p) = params.top_p {
            body.insert("top_p".into(), json!(p));
        }
        if !params.stop.is_empty() {
            body.insert("stop_sequences".into(), json!(params.stop));
        }

        to_body(&Value::Object(body))
    }
}

#[derive(Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
}

#[derive(Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<String>,
}

impl Provider for AnthropicProvider {
    fn name(&self) -> &str {
        "anthropic"
    }

    fn endpoint(&self) -> &str {
        ANTHROPIC_ENDPOINT
    }

    fn headers(&self) -> BTreeMap<String, String> {
        let mut headers = BTreeMap::new();
        headers.insert("Content-Type".to_string(), "application/json".to_string());
        headers.insert("x-api-key".to_string(), self.api_key.clone());
        headers.insert("anthropic-version".to_string(), ANTHROPIC_VERSION.to_string());
        headers
    }

    fn prepare_request(&self, prompt: &str, params: &RequestParams) -> Result<Vec<u8>> {
        self.body(None, vec![json!({ "role": "user", "content": prompt })], params)
    }

    fn prepare_chat_request(&self, messages: &[Message], params: &RequestParams) -> Result<Vec<u8>> {
        // System text travels in its own field, not in the message list.
        let system: Vec<&str> = messages
            .iter()
            .filter(|m| m.role == Role::System)
            .map(|m| m.content.as_str())
            .collect();
        let turns = messages
            .iter()
            .filter(|m| m.role != Role::System)
            .map(|m| json!({ "role": m.role, "content": m.content }))
            .collect();

        let system = (!system.is_empty()).then(|| system.join("\n\n"));
        self.body(system, turns, params)
    }

    fn parse_response(&self, body: &[u8]) -> Result<String> {
        let response: MessagesResponse = serde_json::from_slice(body)?;
        let text: String = response
            .content
            .into_iter()
            .filter(|block| block.kind == "text")
            .filter_map(|block| block.text)
            .collect();

        if text.is_empty() {
            return Err(LlmError::EmptyResponse);
        }
        Ok(text)
    }
}
