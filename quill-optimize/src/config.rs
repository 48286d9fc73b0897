//! Optimizer configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use quill_llm::{LlmError, RetryPolicy};

use crate::assessment::{MetricDefinition, RatingSystem};

/// Default goal handed to the grader and the rewriter.
pub const DEFAULT_GOAL: &str =
    "Make the prompt clearer, more specific and more effective for the task.";

/// Settings for one [`PromptOptimizer`](crate::PromptOptimizer) run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizerConfig {
    /// Maximum iterations (assessed candidates) per run.
    pub iterations: usize,
    /// Retries for each grader or rewriter call.
    pub max_retries: u32,
    /// Pause between those retries, in milliseconds.
    pub retry_delay_ms: u64,
    /// Recent history entries shown to the rewriter.
    pub memory_size: usize,
    /// What "better" means for this run.
    pub optimization_goal: String,
    /// How the grader expresses its verdict.
    pub rating_system: RatingSystem,
    /// Extra or replacement metrics for the grader.
    pub custom_metrics: Vec<MetricDefinition>,
    /// Normalized score at which a candidate is accepted.
    pub threshold: f64,
    /// Log every iteration at `info` when no callback is installed.
    pub verbose: bool,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            iterations: 5,
            max_retries: 3,
            retry_delay_ms: 2000,
            memory_size: 2,
            optimization_goal: DEFAULT_GOAL.to_string(),
            rating_system: RatingSystem::Numerical,
            custom_metrics: Vec::new(),
            threshold: 0.85,
            verbose: false,
        }
    }
}

impl OptimizerConfig {
    /// Check invariants.
    ///
    /// # Errors
    /// [`LlmError::Config`] for zero iterations or a threshold outside
    /// `0.0..=1.0`.
    pub fn validate(&self) -> Result<(), LlmError> {
        if self.iterations == 0 {
            return Err(LlmError::Config("iterations must be at least 1".into()));
        }
        if !(0.0..=1.0).contains(&self.threshold) {
            return Err(LlmError::Config(format!(
                "threshold must be between 0.0 and 1.0, got {}",
                self.threshold
            )));
        }
        Ok(())
    }

    /// Retry policy for grader and rewriter calls.
    #[must_use]
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_retries, Duration::from_millis(self.retry_delay_ms))
    }

    /// Builder: iteration cap.
    #[must_use]
    pub fn with_iterations(mut self, iterations: usize) -> Self {
        self.iterations = iterations;
        self
    }

    /// Builder: acceptance threshold.
    #[must_use]
    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.threshold = threshold;
        self
    }

    /// Builder: retry settings for grader and rewriter calls.
    #[must_use]
    pub fn with_retries(mut self, max_retries: u32, delay: Duration) -> Self {
        self.max_retries = max_retries;
        self.retry_delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Builder: how many recent entries the rewriter sees.
    #[must_use]
    pub fn with_memory_size(mut self, memory_size: usize) -> Self {
        self.memory_size = memory_size;
        self
    }

    /// Builder: optimization goal.
    #[must_use]
    pub fn with_goal(mut self, goal: impl Into<String>) -> Self {
        self.optimization_goal = goal.into();
        self
    }

    /// Builder: rating system.
    #[must_use]
    pub fn with_rating_system(mut self, rating_system: RatingSystem) -> Self {
        self.rating_system = rating_system;
        self
    }

    /// Builder: add a custom metric.
    #[must_use]
    pub fn with_metric(mut self, metric: MetricDefinition) -> Self {
        self.custom_metrics.push(metric);
        self
    }

    /// Builder: verbose iteration logging.
    #[must_use]
    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }
}
