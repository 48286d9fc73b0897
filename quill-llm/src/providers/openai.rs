//! OpenAI chat-completions API and the backends that speak the same dialect
//! (Groq, ZhiPu GLM, Tongyi Qwen).

use std::collections::BTreeMap;

use serde::Deserialize;
use serde_json::{Map, Value, json};

use super::{CustomEndpoint, Provider, ProviderRegistry, bearer_headers, to_body};
use crate::error::{LlmError, Result};
use crate::types::{Message, RequestParams};

/// OpenAI's public endpoint.
pub const OPENAI_ENDPOINT: &str = "https://api.openai.com/v1/chat/completions";
/// Groq's OpenAI-compatible endpoint.
pub const GROQ_ENDPOINT: &str = "https://api.groq.com/openai/v1/chat/completions";
/// ZhiPu GLM chat endpoint.
pub const ZHIPU_ENDPOINT: &str = "https://open.bigmodel.cn/api/paas/v4/chat/completions";
/// Alibaba DashScope compatible-mode endpoint.
pub const TONGYI_ENDPOINT: &str =
    "https://dashscope.aliyuncs.com/compatible-mode/v1/chat/completions";

/// Register `openai`, `groq`, `zhipu` and `tongyi`.
pub fn register(registry: &mut ProviderRegistry) {
    registry.register("openai", |key, model| {
        Box::new(OpenAiCompatible::new("openai", OPENAI_ENDPOINT, key, model).with_json_mode())
    });
    registry.register("groq", |key, model| {
        Box::new(OpenAiCompatible::new("groq", GROQ_ENDPOINT, key, model).with_json_mode())
    });
    registry.register("zhipu", |key, model| {
        Box::new(OpenAiCompatible::new("zhipu", ZHIPU_ENDPOINT, key, model))
    });
    registry.register("tongyi", |key, model| {
        Box::new(OpenAiCompatible::new("tongyi", TONGYI_ENDPOINT, key, model))
    });
}

/// A backend that accepts OpenAI-style `messages` and answers with `choices`.
#[derive(Debug, Clone)]
pub struct OpenAiCompatible {
    name: String,
    endpoint: String,
    api_key: String,
    model: String,
    json_mode: bool,
}

impl OpenAiCompatible {
    /// Create an adapter for an OpenAI-compatible endpoint.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        endpoint: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            endpoint: endpoint.into(),
            api_key: api_key.into(),
            model: model.into(),
            json_mode: false,
        }
    }

    /// Send `response_format: json_object` when JSON output is requested.
    #[must_use]
    pub fn with_json_mode(mut self) -> Self {
        self.json_mode = true;
        self
    }

    fn body(&self, messages: Value, params: &RequestParams) -> Result<Vec<u8>> {
        let mut body = Map::new();
        body.insert("model".into(), json!(self.model));
        body.insert("messages".into(), messages);

        if let Some(t) = params.temperature {
            body.insert("temperature".into(), json!(t));
        }
        if let Some(n) = params.max_tokens {
            body.insert("max_tokens".into(), json!(n));
        }
        if let Some(p) = params.top_p {
            body.insert("top_p".into(), json!(p));
        }
        if let Some(s) = params.seed {
            body.insert("seed".into(), json!(s));
        }
        if !params.stop.is_empty() {
            body.insert("stop".into(), json!(params.stop));
        }
        if params.json_mode && self.json_mode {
            body.insert("response_format".into(), json!({ "type": "json_object" }));
        }

        to_body(&Value::Object(body))
    }
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

impl Provider for OpenAiCompatible {
    fn name(&self) -> &str {
        &self.name
    }

    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn headers(&self) -> BTreeMap<String, String> {
        bearer_headers(&self.api_key)
    }

    fn prepare_request(&self, prompt: &str, params: &RequestParams) -> Result<Vec<u8>> {
        self.body(json!([{ "role": "user", "content": prompt }]), params)
    }

    fn prepare_chat_request(&self, messages: &[Message], params: &RequestParams) -> Result<Vec<u8>> {
        let messages = serde_json::to_value(messages)
            .map_err(|e| LlmError::Config(format!("failed to encode messages: {e}")))?;
        self.body(messages, params)
    }

    fn parse_response(&self, body: &[u8]) -> Result<String> {
        let response: ChatResponse = serde_json::from_slice(body)?;
        response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|text| !text.is_empty())
            .ok_or(LlmError::EmptyResponse)
    }

    fn custom_endpoint(&mut self) -> Option<&mut dyn CustomEndpoint> {
        Some(self)
    }
}

impl CustomEndpoint for OpenAiCompatible {
    fn set_endpoint(&mut self, endpoint: String) {
        self.endpoint = endpoint;
    }
}
