//! Core types for LLM requests: prompts, chat messages and request parameters.

use std::fmt;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{LlmError, Result};

/// Who authored a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Instructions that frame the whole conversation.
    System,
    /// The caller.
    User,
    /// The model.
    Assistant,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::System => write!(f, "system"),
            Self::User => write!(f, "user"),
            Self::Assistant => write!(f, "assistant"),
        }
    }
}

/// One turn of a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Message {
    /// Author of the message.
    pub role: Role,
    /// Message text.
    pub content: String,
}

impl Message {
    /// Create a system message.
    #[must_use]
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: Role::System, content: content.into() }
    }

    /// Create a user message.
    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self { role: Role::User, content: content.into() }
    }

    /// Create an assistant message.
    #[must_use]
    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: Role::Assistant, content: content.into() }
    }
}

/// A prompt: the input text plus optional structured directives.
///
/// [`Prompt::render`] flattens everything into the single string a provider
/// receives.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Prompt {
    /// The instruction or question itself.
    pub input: String,
    /// Rules the model must follow.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub directives: Vec<String>,
    /// Expected shape of the answer (e.g. "JSON object with keys a, b").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_format: Option<String>,
    /// Background information.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
    /// Example answers.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub examples: Vec<String>,
    /// Soft cap on answer length, in words.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_length: Option<u32>,
}

impl Prompt {
    /// Create a prompt from its input text.
    #[must_use]
    pub fn new(input: impl Into<String>) -> Self {
        Self { input: input.into(), ..Self::default() }
    }

    /// Add directives.
    #[must_use]
    pub fn with_directives<I, S>(mut self, directives: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.directives.extend(directives.into_iter().map(Into::into));
        self
    }

    /// Set the expected output format.
    #[must_use]
    pub fn with_output(mut self, output_format: impl Into<String>) -> Self {
        self.output_format = Some(output_format.into());
        self
    }

    /// Set background context.
    #[must_use]
    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    /// Add example answers.
    #[must_use]
    pub fn with_examples<I, S>(mut self, examples: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.examples.extend(examples.into_iter().map(Into::into));
        self
    }

    /// Cap the answer length in words.
    #[must_use]
    pub fn with_max_length(mut self, words: u32) -> Self {
        self.max_length = Some(words);
        self
    }

    /// Flatten the prompt into the text sent to a provider.
    #[must_use]
    pub fn render(&self) -> String {
        let mut out = String::new();

        if let Some(context) = &self.context {
            out.push_str("Context: ");
            out.push_str(context);
            out.push_str("\n\n");
        }

        if !self.directives.is_empty() {
            out.push_str("Directives:\n");
            for directive in &self.directives {
                out.push_str("- ");
                out.push_str(directive);
                out.push('\n');
            }
            out.push('\n');
        }

        out.push_str(&self.input);

        if let Some(format) = &self.output_format {
            out.push_str("\n\nOutput Format:\n");
            out.push_str(format);
        }

        if !self.examples.is_empty() {
            out.push_str("\n\nExamples:");
            for example in &self.examples {
                out.push_str("\n- ");
                out.push_str(example);
            }
        }

        if let Some(words) = self.max_length {
            out.push_str(&format!(
                "\n\nPlease limit your response to approximately {words} words."
            ));
        }

        out
    }

    /// Check the prompt against its structural rules.
    ///
    /// # Errors
    /// Returns [`LlmError::Validation`] describing the first violation.
    pub fn validate(&self) -> Result<()> {
        if self.input.trim().is_empty() {
            return Err(LlmError::Validation("prompt input must not be empty".into()));
        }
        if self.directives.iter().any(|d| d.trim().is_empty()) {
            return Err(LlmError::Validation("directives must not be blank".into()));
        }
        if self.examples.iter().any(|e| e.trim().is_empty()) {
            return Err(LlmError::Validation("examples must not be blank".into()));
        }
        if matches!(&self.output_format, Some(f) if f.trim().is_empty()) {
            return Err(LlmError::Validation("output format must not be blank when set".into()));
        }
        if self.max_length == Some(0) {
            return Err(LlmError::Validation("max_length must be positive".into()));
        }
        Ok(())
    }

    /// JSON Schema describing the prompt structure.
    ///
    /// # Errors
    /// Returns [`LlmError::Config`] if the schema cannot be serialized.
    pub fn json_schema() -> Result<Value> {
        let schema = schemars::schema_for!(Prompt);
        serde_json::to_value(&schema).map_err(|e| LlmError::Config(e.to_string()))
    }
}

impl fmt::Display for Prompt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}

impl From<&str> for Prompt {
    fn from(input: &str) -> Self {
        Self::new(input)
    }
}

impl From<String> for Prompt {
    fn from(input: String) -> Self {
        Self::new(input)
    }
}

/// Sampling parameters sent to a provider.
///
/// Held as construction-time defaults on an LLM and merged with per-call
/// [`GenerateOptions`] before each request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RequestParams {
    /// Temperature (0.0 = deterministic).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    /// Maximum tokens to generate.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    /// Nucleus sampling mass.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    /// Sampling seed, where supported.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
    /// Stop sequences.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stop: Vec<String>,
    /// Ask the provider for a JSON answer, where supported.
    #[serde(default)]
    pub json_mode: bool,
}

impl RequestParams {
    /// Keys accepted by [`RequestParams::set`].
    pub const KEYS: &'static [&'static str] = &["temperature", "max_tokens", "top_p", "seed", "stop"];

    /// Set one parameter by name.
    ///
    /// # Errors
    /// [`LlmError::UnknownOption`] for keys outside [`Self::KEYS`],
    /// [`LlmError::Config`] when the value has the wrong type.
    pub fn set(&mut self, key: &str, value: &Value) -> Result<()> {
        let type_error = |expected: &str| {
            LlmError::Config(format!("option '{key}' expects {expected}, got {value}"))
        };

        match key {
            "temperature" => {
                let t = value.as_f64().ok_or_else(|| type_error("a number"))?;
                self.temperature = Some(t as f32);
            }
            "max_tokens" => {
                let n = value.as_u64().ok_or_else(|| type_error("a positive integer"))?;
                let n = u32::try_from(n).map_err(|_| type_error("a 32-bit integer"))?;
                self.max_tokens = Some(n);
            }
            "top_p" => {
                let p = value.as_f64().ok_or_else(|| type_error("a number"))?;
                self.top_p = Some(p as f32);
            }
            "seed" => {
                let s = value.as_u64().ok_or_else(|| type_error("a positive integer"))?;
                self.seed = Some(s);
            }
            "stop" => {
                self.stop = match value {
                    Value::String(s) => vec![s.clone()],
                    Value::Array(items) => items
                        .iter()
                        .map(|v| v.as_str().map(str::to_owned))
                        .collect::<Option<Vec<_>>>()
                        .ok_or_else(|| type_error("a string or list of strings"))?,
                    _ => return Err(type_error("a string or list of strings")),
                };
            }
            other => return Err(LlmError::UnknownOption(other.to_string())),
        }
        Ok(())
    }
}

/// Per-call overrides for a single `generate` call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GenerateOptions {
    /// Overrides the default temperature.
    pub temperature: Option<f32>,
    /// Overrides the default token cap.
    pub max_tokens: Option<u32>,
    /// Overrides the default nucleus mass.
    pub top_p: Option<f32>,
    /// Overrides the default seed.
    pub seed: Option<u64>,
    /// Replaces the default stop sequences when non-empty.
    pub stop: Vec<String>,
    /// Expect a JSON object back; the answer is cleaned to a bare object.
    pub json_output: bool,
    /// Validate the prompt before sending.
    pub validate_prompt: bool,
}

impl GenerateOptions {
    /// Options for a call whose answer must be a bare JSON object.
    #[must_use]
    pub fn json() -> Self {
        Self { json_output: true, ..Self::default() }
    }

    /// Enable prompt validation.
    #[must_use]
    pub fn validated(mut self) -> Self {
        self.validate_prompt = true;
        self
    }

    /// Override the temperature.
    #[must_use]
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    /// Override the token cap.
    #[must_use]
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    /// Merge these overrides over `defaults`. Call-specific values win.
    #[must_use]
    pub fn merged_over(&self, defaults: &RequestParams) -> RequestParams {
        RequestParams {
            temperature: self.temperature.or(defaults.temperature),
            max_tokens: self.max_tokens.or(defaults.max_tokens),
            top_p: self.top_p.or(defaults.top_p),
            seed: self.seed.or(defaults.seed),
            stop: if self.stop.is_empty() { defaults.stop.clone() } else { self.stop.clone() },
            json_mode: self.json_output || defaults.json_mode,
        }
    }
}
