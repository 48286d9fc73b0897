//! Provider adapters and the name → constructor registry.
//!
//! A [`Provider`] only knows how to turn a prompt into a request body for one
//! backend and how to pull the answer text back out of that backend's response.
//! HTTP, retries and post-processing live in [`crate::client`].

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use crate::error::{LlmError, Result};
use crate::types::{Message, RequestParams};

pub mod anthropic;
pub mod image;
pub mod ollama;
pub mod openai;

pub use anthropic::AnthropicProvider;
pub use image::ImageProvider;
pub use ollama::OllamaProvider;
pub use openai::OpenAiCompatible;

/// Adapter between the generic request model and one backend's wire format.
///
/// Providers hold no per-call state and may be shared across concurrent calls.
pub trait Provider: Send + Sync + fmt::Debug {
    /// Registry name, e.g. `"openai"`.
    fn name(&self) -> &str;

    /// URL the request is POSTed to.
    fn endpoint(&self) -> &str;

    /// HTTP headers, including authentication.
    fn headers(&self) -> BTreeMap<String, String>;

    /// Build a request body for a single prompt.
    ///
    /// # Errors
    /// Returns [`LlmError::Config`] if the body cannot be serialized.
    fn prepare_request(&self, prompt: &str, params: &RequestParams) -> Result<Vec<u8>>;

    /// Build a request body for a whole conversation.
    ///
    /// Providers without a native message list receive a flattened
    /// `role: content` transcript.
    ///
    /// # Errors
    /// Returns [`LlmError::Config`] if the body cannot be serialized.
    fn prepare_chat_request(&self, messages: &[Message], params: &RequestParams) -> Result<Vec<u8>> {
        self.prepare_request(&flatten_transcript(messages), params)
    }

    /// Extract the answer text from a response body.
    ///
    /// # Errors
    /// [`LlmError::MalformedResponse`] when the body does not decode,
    /// [`LlmError::EmptyResponse`] when it decodes but carries no text.
    fn parse_response(&self, body: &[u8]) -> Result<String>;

    /// Capability query: can this provider be pointed at another URL?
    fn custom_endpoint(&mut self) -> Option<&mut dyn CustomEndpoint> {
        None
    }
}

/// Optional capability for providers whose endpoint can be overridden
/// (self-hosted gateways, local servers, test doubles).
pub trait CustomEndpoint {
    /// Replace the endpoint URL.
    fn set_endpoint(&mut self, endpoint: String);
}

/// Render a conversation as plain text for single-prompt backends.
#[must_use]
pub fn flatten_transcript(messages: &[Message]) -> String {
    messages
        .iter()
        .map(|m| format!("{}: {}", m.role, m.content))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Standard JSON + bearer-token headers.
pub(crate) fn bearer_headers(api_key: &str) -> BTreeMap<String, String> {
    let mut headers = BTreeMap::new();
    headers.insert("Content-Type".to_string(), "application/json".to_string());
    if !api_key.is_empty() {
        headers.insert("Authorization".to_string(), format!("Bearer {api_key}"));
    }
    headers
}

/// Serialize a request body, mapping failures to a configuration error.
pub(crate) fn to_body(body: &serde_json::Value) -> Result<Vec<u8>> {
    serde_json::to_vec(body).map_err(|e| LlmError::Config(format!("failed to encode request: {e}")))
}

/// Constructs a provider from `(api_key, model)`.
pub type ProviderConstructor = Arc<dyn Fn(&str, &str) -> Box<dyn Provider> + Send + Sync>;

/// Maps provider names to constructors.
///
/// Registering a name that already exists replaces the previous constructor.
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    constructors: HashMap<String, ProviderConstructor>,
}

impl ProviderRegistry {
    /// An empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry pre-loaded with every built-in provider.
    #[must_use]
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        openai::register(&mut registry);
        anthropic::register(&mut registry);
        ollama::register(&mut registry);
        image::register(&mut registry);
        registry
    }

    /// Register a constructor under `name`. Last writer wins.
    pub fn register<F>(&mut self, name: impl Into<String>, constructor: F)
    where
        F: Fn(&str, &str) -> Box<dyn Provider> + Send + Sync + 'static,
    {
        let name = name.into();
        if self.constructors.insert(name.clone(), Arc::new(constructor)).is_some() {
            tracing::debug!(provider = %name, "replaced registered provider constructor");
        }
    }

    /// Build a provider instance.
    ///
    /// # Errors
    /// [`LlmError::UnknownProvider`] if `name` was never registered.
    pub fn resolve(&self, name: &str, api_key: &str, model: &str) -> Result<Box<dyn Provider>> {
        let constructor = self
            .constructors
            .get(name)
            .ok_or_else(|| LlmError::UnknownProvider(name.to_string()))?;
        Ok(constructor(api_key, model))
    }

    /// Whether `name` is registered.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.constructors.contains_key(name)
    }

    /// Registered names, sorted.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.constructors.keys().cloned().collect();
        names.sort();
        names
    }
}

impl fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderRegistry").field("providers", &self.names()).finish()
    }
}
