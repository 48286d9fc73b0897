//! # quill-llm: LLM Abstraction Layer for Quill
//!
//! Provides a unified interface for text generation across multiple backends:
//!   - **OpenAI** and OpenAI-compatible APIs (Groq, ZhiPu GLM, Tongyi Qwen)
//!   - **Anthropic** Messages API
//!   - **Ollama** (local)
//!   - **ZhiPu CogView** image generation (answers with an image URL)
//!
//! Every call goes through the same pipeline:
//!   - Provider-specific request building and response parsing
//!   - Fixed-delay retry of transient failures
//!   - Prompt cancellation via `CancellationToken`
//!   - JSON answer cleaning for structured output
//!
//! # Architecture
//!
//! ```text
//! Llm ──┬── Plain(BaseLlm) ─────────────────────────┐
//!       └── WithMemory(MemoryLlm ─▶ MemoryWindow) ──┤
//!                                                   ▼
//!                          Provider (from ProviderRegistry) ─▶ HTTP
//! ```

#![deny(clippy::unwrap_used)]
#![deny(missing_docs)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::cast_possible_truncation)]

pub mod client;
pub mod config;
pub mod error;
pub mod logging;
pub mod memory;
pub mod providers;
pub mod retry;
pub mod types;

pub use client::{BaseLlm, Generator, Llm, clean_response};
pub use config::{LlmConfig, LogLevel, MemoryMode};
pub use error::LlmError;
pub use memory::{HeuristicTokenCounter, MemoryLlm, MemoryWindow, TokenCounter};
pub use providers::{Provider, ProviderRegistry};
pub use retry::RetryPolicy;
pub use types::{GenerateOptions, Message, Prompt, RequestParams, Role};

/// Re-exported so callers don't need a direct `tokio-util` dependency.
pub use tokio_util::sync::CancellationToken;
