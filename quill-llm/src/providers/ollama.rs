//! Ollama running locally (`/api/generate`).

use std::collections::BTreeMap;

use serde::Deserialize;
use serde_json::{Map, Value, json};

use super::{CustomEndpoint, Provider, ProviderRegistry, bearer_headers, to_body};
use crate::error::{LlmError, Result};
use crate::types::RequestParams;

/// Default local endpoint.
pub const OLLAMA_ENDPOINT: &str = "http://localhost:11434/api/generate";

/// Register `ollama`.
pub fn register(registry: &mut ProviderRegistry) {
    registry.register("ollama", |key, model| Box::new(OllamaProvider::new(key, model)));
}

/// Adapter for a local or remote Ollama server.
#[derive(Debug, Clone)]
pub struct OllamaProvider {
    endpoint: String,
    api_key: String,
    model: String,
}

impl OllamaProvider {
    /// Create the adapter against the default local endpoint.
    #[must_use]
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            endpoint: OLLAMA_ENDPOINT.to_string(),
            api_key: api_key.into(),
            model: model.into(),
        }
    }
}

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    response: Option<String>,
}

impl Provider for OllamaProvider {
    fn name(&self) -> &str {
        "ollama"
    }

    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn headers(&self) -> BTreeMap<String, String> {
        // Local servers ignore auth; reverse proxies in front of them may not.
        bearer_headers(&self.api_key)
    }

    fn prepare_request(&self, prompt: &str, params: &RequestParams) -> Result<Vec<u8>> {
        let mut options = Map::new();
        if let Some(t) = params.temperature {
            options.insert("temperature".into(), json!(t));
        }
        if let Some(n) = params.max_tokens {
            options.insert("num_predict".into(), json!(n));
        }
        if let Some(p) = params.top_p {
            options.insert("top_p".into(), json!(p));
        }
        if let Some(s) = params.seed {
            options.insert("seed".into(), json!(s));
        }
        if !params.stop.is_empty() {
            options.insert("stop".into(), json!(params.stop));
        }

        let mut body = json!({
            "model": self.model,
            "prompt": prompt,
            "stream": false,
            "options": Value::Object(options),
        });
        if params.json_mode {
            body["format"] = json!("json");
        }

        to_body(&body)
    }

    fn parse_response(&self, body: &[u8]) -> Result<String> {
        let response: GenerateResponse = serde_json::from_slice(body)?;
        response
            .response
            .filter(|text| !text.is_empty())
            .ok_or(LlmError::EmptyResponse)
    }

    fn custom_endpoint(&mut self) -> Option<&mut dyn CustomEndpoint> {
        Some(self)
    }
}

impl CustomEndpoint for OllamaProvider {
    fn set_endpoint(&mut self, endpoint: String) {
        self.endpoint = endpoint;
    }
}
