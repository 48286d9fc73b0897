//! # quill-optimize: Self-Refining Prompts
//!
//! Uses an LLM both as grader and as rewriter to improve a prompt against a
//! task description:
//!
//! ```text
//! seed ─▶ assess ─▶ score ≥ threshold? ── yes ─▶ done
//!           ▲              │ no
//!           └── rewrite ◀──┘   (until the iteration cap)
//! ```
//!
//! Works with any [`quill_llm::Generator`], memory-backed or not.
//!
//! ```no_run
//! # async fn demo() -> Result<(), quill_llm::LlmError> {
//! use quill_llm::{CancellationToken, Llm, LlmConfig};
//! use quill_optimize::{OptimizerConfig, PromptOptimizer};
//!
//! let llm = Llm::new(&LlmConfig::from_env()?)?;
//! let config = OptimizerConfig::default().with_iterations(3).with_threshold(0.9);
//! let mut optimizer =
//!     PromptOptimizer::new(&llm, "write a haiku", "produce a vivid haiku about rain", config)?;
//! let best = optimizer.optimize_prompt(&CancellationToken::new()).await?;
//! println!("{best}");
//! # Ok(())
//! # }
//! ```

#![deny(clippy::unwrap_used)]
#![deny(missing_docs)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod assessment;
pub mod config;
pub mod optimizer;
pub mod prompts;

pub use assessment::{Assessment, Finding, Metric, MetricDefinition, RatingSystem, Suggestion};
pub use config::OptimizerConfig;
pub use optimizer::{
    IterationCallback, OptimizationEntry, OptimizerState, PromptOptimizer, TerminationReason,
};
