//! Property-based tests for the optimization loop's stopping rules.

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use proptest::prelude::*;
use serde_json::{Value, json};

use quill_llm::error::Result;
use quill_llm::{CancellationToken, GenerateOptions, Generator, LlmError, Prompt};
use quill_optimize::{OptimizerConfig, PromptOptimizer, TerminationReason};

const THRESHOLD: f64 = 0.9;

struct Replay {
    replies: Mutex<VecDeque<String>>,
    calls: Mutex<usize>,
}

impl Replay {
    /// Grades `scores` in order, with a rewrite to `candidate N` between them.
    fn grading(scores: &[f64]) -> Self {
        let mut replies = VecDeque::new();
        for (i, score) in scores.iter().enumerate() {
            if i > 0 {
                replies.push_back(json!({ "input": format!("candidate {}", i + 1) }).to_string());
            }
            replies.push_back(json!({ "overall_score": score }).to_string());
        }
        Self { replies: Mutex::new(replies), calls: Mutex::new(0) }
    }
}

#[async_trait]
impl Generator for Replay {
    async fn generate(
        &self,
        _prompt: &Prompt,
        _options: &GenerateOptions,
        _cancel: &CancellationToken,
    ) -> Result<String> {
        *self.calls.lock() += 1;
        self.replies
            .lock()
            .pop_front()
            .ok_or_else(|| LlmError::Transport("replay exhausted".into()))
    }

    fn set_option(&mut self, key: &str, _value: &Value) -> Result<()> {
        Err(LlmError::UnknownOption(key.into()))
    }

    fn provider_name(&self) -> &str {
        "replay"
    }

    fn model(&self) -> &str {
        "replay-1"
    }
}

fn run(llm: &Replay, iterations: usize) -> (String, Vec<usize>, Option<TerminationReason>) {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("runtime");
    let config = OptimizerConfig::default()
        .with_iterations(iterations)
        .with_threshold(THRESHOLD)
        .with_retries(0, Duration::ZERO);
    let mut optimizer = PromptOptimizer::new(llm, "seed", "task", config).expect("valid");
    let result = runtime
        .block_on(optimizer.optimize_prompt(&CancellationToken::new()))
        .expect("run");
    let iterations = optimizer.history().iter().map(|e| e.iteration).collect();
    (result, iterations, optimizer.termination())
}

proptest! {
    #[test]
    fn scores_below_threshold_run_to_the_cap(
        scores in prop::collection::vec(0.0f64..0.89, 1..7),
    ) {
        let llm = Replay::grading(&scores);
        let (result, iterations, reason) = run(&llm, scores.len());

        prop_assert_eq!(iterations, (1..=scores.len()).collect::<Vec<_>>());
        prop_assert_eq!(reason, Some(TerminationReason::IterationLimit));
        prop_assert_eq!(*llm.calls.lock(), 2 * scores.len() - 1);
        let expected = if scores.len() == 1 { "seed".to_string() } else { format!("candidate {}", scores.len()) };
        prop_assert_eq!(result, expected);
    }

    #[test]
    fn first_passing_score_stops_the_loop(
        below in prop::collection::vec(0.0f64..0.89, 0..5),
        passing in 0.9f64..=1.0,
        cap_slack in 0usize..3,
    ) {
        let mut scores = below.clone();
        scores.push(passing);
        let llm = Replay::grading(&scores);
        let (_, iterations, reason) = run(&llm, scores.len() + cap_slack);

        prop_assert_eq!(iterations.len(), scores.len());
        prop_assert_eq!(reason, Some(TerminationReason::ThresholdMet));
    }
}
