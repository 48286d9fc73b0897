//! Image generation backends whose "answer" is the URL of the generated image.

use std::collections::BTreeMap;

use serde::Deserialize;
use serde_json::json;

use super::{Provider, ProviderRegistry, bearer_headers, to_body};
use crate::error::{LlmError, Result};
use crate::types::RequestParams;

/// ZhiPu CogView endpoint.
pub const ZHIPU_VIEW_ENDPOINT: &str = "https://open.bigmodel.cn/api/paas/v4/images/generations";

/// Register `zhipu_view`.
pub fn register(registry: &mut ProviderRegistry) {
    registry.register("zhipu_view", |key, model| {
        Box::new(ImageProvider::new("zhipu_view", ZHIPU_VIEW_ENDPOINT, key, model))
    });
}

/// Text-to-image adapter.
#[derive(Debug, Clone)]
pub struct ImageProvider {
    name: String,
    endpoint: String,
    api_key: String,
    model: String,
}

impl ImageProvider {
    /// Create the adapter.
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
        }
    }
}

#[derive(Deserialize)]
struct ImageResponse {
    #[serde(default)]
    data: Vec<ImageData>,
}

#[derive(Deserialize)]
struct ImageData {
    #[serde(default)]
    url: Option<String>,
}

impl Provider for ImageProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn headers(&self) -> BTreeMap<String, String> {
        bearer_headers(&self.api_key)
    }

    fn prepare_request(&self, prompt: &str, _params: &RequestParams) -> Result<Vec<u8>> {
        // Sampling parameters have no meaning for image generation.
        to_body(&json!({ "model": self.model, "prompt": prompt }))
    }

    fn parse_response(&self, body: &[u8]) -> Result<String> {
        let response: ImageResponse = serde_json::from_slice(body)?;
        response
            .data
            .into_iter()
            .next()
            .and_then(|d| d.url)
            .filter(|url| !url.is_empty())
            .ok_or(LlmError::EmptyResponse)
    }
}
