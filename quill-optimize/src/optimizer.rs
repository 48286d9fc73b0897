//! The prompt optimization loop.
//!
//! ```text
//! Initial ─▶ Evaluating ─┬─▶ Accepted ─▶ Terminated(ThresholdMet)
//!               ▲        └─▶ Improving ─┐
//!               └───────────────────────┘   (until the iteration cap)
//! ```
//!
//! Every iteration grades one candidate and appends it to the history.
//! Later candidates are rewrites of the most recent one; the loop never
//! falls back to an earlier, better-scoring entry on its own. Use
//! [`PromptOptimizer::best_entry`] for that.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{Instrument, debug, info, info_span, warn};
use uuid::Uuid;

use quill_llm::retry::sleep_or_cancel;
use quill_llm::{CancellationToken, GenerateOptions, Generator, LlmError, Prompt};

use crate::assessment::Assessment;
use crate::config::OptimizerConfig;
use crate::prompts::{Revision, assessment_prompt, revision_prompt};

/// Why a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TerminationReason {
    /// A candidate scored at or above the threshold.
    ThresholdMet,
    /// The iteration cap was reached.
    IterationLimit,
    /// The caller's cancellation token fired.
    Cancelled,
    /// A grader or rewriter call failed after its retries.
    Failed,
}

/// Where the optimizer is in its loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptimizerState {
    /// Not started, or reset for a new run.
    Initial,
    /// Grading a candidate.
    Evaluating,
    /// Asking for a rewrite of the latest candidate.
    Improving,
    /// The latest candidate met the threshold.
    Accepted,
    /// Finished.
    Terminated(TerminationReason),
}

/// One completed iteration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizationEntry {
    /// 1-based iteration index.
    pub iteration: usize,
    /// The candidate that was graded.
    pub prompt: Prompt,
    /// The grader's verdict.
    pub assessment: Assessment,
    /// When the entry was recorded.
    pub recorded_at: DateTime<Utc>,
}

/// Invoked in-line after each iteration is recorded.
pub type IterationCallback<'a> = Box<dyn FnMut(usize, &OptimizationEntry) + Send + 'a>;

/// Iteratively grades and rewrites a prompt with the help of an LLM.
pub struct PromptOptimizer<'a, G: Generator + ?Sized> {
    llm: &'a G,
    task: String,
    seed: Prompt,
    current: Prompt,
    config: OptimizerConfig,
    history: Vec<OptimizationEntry>,
    state: OptimizerState,
    callback: Option<IterationCallback<'a>>,
}

impl<'a, G: Generator + ?Sized> PromptOptimizer<'a, G> {
    /// Create an optimizer for `seed`, judged against `task`.
    ///
    /// # Errors
    /// [`LlmError::Config`] if `config` is invalid.
    pub fn new(
        llm: &'a G,
        seed: impl Into<Prompt>,
        task: impl Into<String>,
        config: OptimizerConfig,
    ) -> Result<Self, LlmError> {
        config.validate()?;
        let seed = seed.into();
        Ok(Self {
            llm,
            task: task.into(),
            current: seed.clone(),
            seed,
            config,
            history: Vec::new(),
            state: OptimizerState::Initial,
            callback: None,
        })
    }

    /// Install a callback receiving the 1-based iteration index and the new
    /// entry.
    #[must_use]
    pub fn with_callback(mut self, callback: impl FnMut(usize, &OptimizationEntry) + Send + 'a) -> Self {
        self.callback = Some(Box::new(callback));
        self
    }

    /// Every completed iteration, oldest first.
    #[must_use]
    pub fn history(&self) -> &[OptimizationEntry] {
        &self.history
    }

    /// Current loop state.
    #[must_use]
    pub fn state(&self) -> OptimizerState {
        self.state
    }

    /// Why the last run ended, once it has.
    #[must_use]
    pub fn termination(&self) -> Option<TerminationReason> {
        match self.state {
            OptimizerState::Terminated(reason) => Some(reason),
            _ => None,
        }
    }

    /// The most recently graded candidate (the seed before any iteration).
    #[must_use]
    pub fn current_prompt(&self) -> &Prompt {
        &self.current
    }

    /// The highest-scoring entry; the latest one wins ties.
    #[must_use]
    pub fn best_entry(&self) -> Option<&OptimizationEntry> {
        self.history
            .iter()
            .max_by(|a, b| a.assessment.overall_score.total_cmp(&b.assessment.overall_score))
    }

    /// Active configuration.
    #[must_use]
    pub fn config(&self) -> &OptimizerConfig {
        &self.config
    }

    /// Run the loop and return the final candidate's prompt text.
    ///
    /// History from a previous run is discarded.
    ///
    /// # Errors
    /// [`LlmError::Cancelled`] if `cancel` fires before the first iteration is
    /// recorded, [`LlmError::OptimizationExhausted`] when the first iteration
    /// fails for any other reason. Once an iteration is recorded, later
    /// failures end the run with the last recorded candidate instead.
    pub async fn optimize_prompt(&mut self, cancel: &CancellationToken) -> Result<String, LlmError> {
        let span = info_span!(
            "optimize_prompt",
            run_id = %Uuid::new_v4(),
            provider = self.llm.provider_name(),
            max_iterations = self.config.iterations,
        );
        self.run(cancel).instrument(span).await
    }

    async fn run(&mut self, cancel: &CancellationToken) -> Result<String, LlmError> {
        self.history.clear();
        self.current = self.seed.clone();
        self.state = OptimizerState::Initial;
        info!(task = %self.task, threshold = self.config.threshold, "optimization started");

        let mut candidate = self.seed.clone();
        for iteration in 1..=self.config.iterations {
            if iteration > 1 {
                if cancel.is_cancelled() {
                    return self.fail(LlmError::Cancelled);
                }
                candidate = match self.revise(cancel).await {
                    Ok(next) => next,
                    Err(err) => return self.fail(err),
                };
            }

            self.transition(OptimizerState::Evaluating);
            let assessment = match self.assess(&candidate, cancel).await {
                Ok(assessment) => assessment,
                Err(err) => return self.fail(err),
            };
            let score = assessment.overall_score;
            self.record(iteration, candidate.clone(), assessment);

            if score >= self.config.threshold {
                self.transition(OptimizerState::Accepted);
                return Ok(self.finish(TerminationReason::ThresholdMet));
            }
            if iteration < self.config.iterations {
                self.transition(OptimizerState::Improving);
            }
        }

        Ok(self.finish(TerminationReason::IterationLimit))
    }

    async fn assess(&self, candidate: &Prompt, cancel: &CancellationToken) -> Result<Assessment, LlmError> {
        let request = assessment_prompt(
            &self.task,
            &self.config.optimization_goal,
            candidate,
            self.config.rating_system,
            &self.config.custom_metrics,
        );
        let rating = self.config.rating_system;
        self.ask("assess", &request, cancel, |reply| Assessment::from_grader_json(reply, rating)).await
    }

    async fn revise(&self, cancel: &CancellationToken) -> Result<Prompt, LlmError> {
        let Some(latest) = self.history.last() else {
            return Ok(self.current.clone());
        };
        let recent = &self.history[self.history.len().saturating_sub(self.config.memory_size)..];
        let request = revision_prompt(
            &self.task,
            &self.config.optimization_goal,
            &latest.prompt,
            &latest.assessment,
            recent,
        );
        let revision = self.ask("revise", &request, cancel, Revision::from_reply).await?;

        debug!(reasoning = %revision.reasoning, "received revision");
        Ok(revision.apply(&latest.prompt))
    }

    /// Send `request` and parse the reply, asking again only when the reply
    /// does not parse. Transport failures are left to the generator's own
    /// retry policy.
    async fn ask<T>(
        &self,
        step: &str,
        request: &Prompt,
        cancel: &CancellationToken,
        parse: impl Fn(&str) -> Result<T, LlmError>,
    ) -> Result<T, LlmError> {
        let policy = self.config.retry_policy();
        let options = GenerateOptions::json();
        let attempts = policy.max_retries.saturating_add(1);
        let mut attempt = 0;

        loop {
            if cancel.is_cancelled() {
                return Err(LlmError::Cancelled);
            }
            attempt += 1;
            let reply = self.llm.generate(request, &options, cancel).await?;
            match parse(&reply) {
                Ok(value) => return Ok(value),
                Err(err) if !err.is_retryable() || attempt >= attempts => {
                    warn!(step, attempts = attempt, error = %err, "unusable reply");
                    return Err(err);
                }
                Err(err) => {
                    warn!(step, attempt, attempts, error = %err, "unusable reply, asking again");
                    sleep_or_cancel(policy.delay, cancel).await?;
                }
            }
        }
    }

    fn record(&mut self, iteration: usize, prompt: Prompt, assessment: Assessment) {
        debug!(
            iteration,
            score = assessment.overall_score,
            grade = %assessment.overall_grade,
            weaknesses = assessment.weaknesses.len(),
            "iteration recorded"
        );
        self.current = prompt.clone();
        self.history.push(OptimizationEntry { iteration, prompt, assessment, recorded_at: Utc::now() });

        let Some(entry) = self.history.last() else { return };
        match &mut self.callback {
            Some(callback) => callback(iteration, entry),
            None if self.config.verbose => info!(
                iteration,
                score = entry.assessment.overall_score,
                grade = %entry.assessment.overall_grade,
                strengths = entry.assessment.strengths.len(),
                weaknesses = entry.assessment.weaknesses.len(),
                suggestions = entry.assessment.suggestions.len(),
                prompt = %entry.prompt.input,
                "iteration assessed"
            ),
            None => {}
        }
    }

    fn finish(&mut self, reason: TerminationReason) -> String {
        self.transition(OptimizerState::Terminated(reason));
        info!(
            ?reason,
            iterations = self.history.len(),
            score = self.history.last().map(|e| e.assessment.overall_score),
            "optimization finished"
        );
        self.current.input.clone()
    }

    fn fail(&mut self, err: LlmError) -> Result<String, LlmError> {
        let reason = if err.is_cancelled() { TerminationReason::Cancelled } else { TerminationReason::Failed };
        self.transition(OptimizerState::Terminated(reason));

        if self.history.is_empty() {
            warn!(error = %err, "optimization ended before any iteration completed");
            if err.is_cancelled() {
                return Err(LlmError::Cancelled);
            }
            return Err(LlmError::OptimizationExhausted { iterations: 0, source: Box::new(err) });
        }

        warn!(
            error = %err,
            iterations = self.history.len(),
            "optimization stopped early, keeping the last recorded candidate"
        );
        Ok(self.current.input.clone())
    }

    fn transition(&mut self, next: OptimizerState) {
        debug!(from = ?self.state, to = ?next, "optimizer state");
        self.state = next;
    }
}

impl<G: Generator + ?Sized> fmt::Debug for PromptOptimizer<'_, G> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PromptOptimizer")
            .field("provider", &self.llm.provider_name())
            .field("task", &self.task)
            .field("state", &self.state)
            .field("iterations", &self.history.len())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use async_trait::async_trait;
    use serde_json::Value;

    struct Offline;

    #[async_trait]
    impl Generator for Offline {
        async fn generate(
            &self,
            _prompt: &Prompt,
            _options: &GenerateOptions,
            _cancel: &CancellationToken,
        ) -> quill_llm::error::Result<String> {
            Err(LlmError::Transport("offline".into()))
        }

        fn set_option(&mut self, key: &str, _value: &Value) -> quill_llm::error::Result<()> {
            Err(LlmError::UnknownOption(key.into()))
        }

        fn provider_name(&self) -> &str {
            "offline"
        }

        fn model(&self) -> &str {
            "none"
        }
    }

    fn entry(iteration: usize, score: f64) -> OptimizationEntry {
        OptimizationEntry {
            iteration,
            prompt: Prompt::new(format!("candidate {iteration}")),
            assessment: Assessment {
                overall_score: score,
                overall_grade: String::new(),
                metrics: Vec::new(),
                strengths: Vec::new(),
                weaknesses: Vec::new(),
                suggestions: Vec::new(),
            },
            recorded_at: Utc::now(),
        }
    }

    #[test]
    fn new_validates_config() {
        let err = PromptOptimizer::new(&Offline, "seed", "task", OptimizerConfig::default().with_iterations(0))
            .expect_err("invalid");
        assert!(matches!(err, LlmError::Config(_)));
    }

    #[test]
    fn starts_in_initial_state() {
        let optimizer = PromptOptimizer::new(&Offline, "seed", "task", OptimizerConfig::default()).expect("valid");
        assert_eq!(optimizer.state(), OptimizerState::Initial);
        assert_eq!(optimizer.termination(), None);
        assert_eq!(optimizer.current_prompt().input, "seed");
        assert!(optimizer.best_entry().is_none());
    }

    #[test]
    fn best_entry_prefers_highest_then_latest() {
        let mut optimizer =
            PromptOptimizer::new(&Offline, "seed", "task", OptimizerConfig::default()).expect("valid");
        optimizer.history = vec![entry(1, 0.4), entry(2, 0.8), entry(3, 0.6), entry(4, 0.8)];

        assert_eq!(optimizer.best_entry().map(|e| e.iteration), Some(4));
    }

    #[tokio::test]
    async fn transport_failure_on_first_iteration_exhausts() {
        let config = OptimizerConfig::default().with_retries(0, std::time::Duration::ZERO);
        let mut optimizer = PromptOptimizer::new(&Offline, "seed", "task", config).expect("valid");

        let err = optimizer.optimize_prompt(&CancellationToken::new()).await.expect_err("offline");
        match err {
            LlmError::OptimizationExhausted { iterations, source } => {
                assert_eq!(iterations, 0);
                assert!(matches!(*source, LlmError::Transport(_)));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(optimizer.termination(), Some(TerminationReason::Failed));
        assert!(optimizer.history().is_empty());
    }
}
