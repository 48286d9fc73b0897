//! Grader and rewriter prompt templates.
//!
//! Templates use `{key}` placeholders filled by [`render_template`]. Literal
//! braces in the JSON examples are left alone because they never name a
//! known key.

use serde::Deserialize;

use quill_llm::{LlmError, Prompt, clean_response};

use crate::assessment::{Assessment, Finding, MetricDefinition, RatingSystem, merge_metrics};
use crate::optimizer::OptimizationEntry;

/// Asks the LLM to grade a candidate prompt.
pub const ASSESSMENT_TEMPLATE: &str = r#"You are an expert prompt engineer reviewing a prompt written for a language model.

Task the prompt must accomplish:
{task}

Optimization goal:
{goal}

Prompt under review:
"""
{prompt}
"""

Score the prompt on each of these metrics, from 0.0 to 1.0:
{metrics}

{rating}

Return only a JSON object of this shape:
{"overall_score": 0.0, "overall_grade": "label", "metrics": [{"name": "metric", "value": 0.0}], "strengths": [{"point": "what works", "example": "quote"}], "weaknesses": [{"point": "what fails", "example": "quote"}], "suggestions": [{"description": "change", "expected_impact": 0.0, "reasoning": "why"}]}"#;

/// Asks the LLM to rewrite the current candidate.
pub const REVISION_TEMPLATE: &str = r#"You are an expert prompt engineer. Rewrite the prompt below so it better accomplishes the task.

Task:
{task}

Optimization goal:
{goal}

Current prompt:
"""
{prompt}
"""

Its weaknesses:
{weaknesses}

Suggested changes:
{suggestions}

Recent attempts, oldest first:
{history}

Return only a JSON object of this shape:
{"input": "the revised prompt text", "directives": ["instruction"], "examples": ["example"], "reasoning": "why this revision is better"}"#;

/// Fill `{key}` placeholders from `vars` in a single pass.
///
/// Unknown placeholders are kept verbatim, and substituted values are never
/// re-scanned.
#[must_use]
pub fn render_template(template: &str, vars: &[(&str, &str)]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        let hit = after.find('}').and_then(|close| {
            let key = &after[..close];
            vars.iter().find(|(k, _)| *k == key).map(|(_, value)| (close, *value))
        });
        match hit {
            Some((close, value)) => {
                out.push_str(value);
                rest = &after[close + 1..];
            }
            None => {
                out.push('{');
                rest = after;
            }
        }
    }

    out.push_str(rest);
    out
}

fn bullets<T>(items: &[T], line: impl Fn(&T) -> String) -> String {
    if items.is_empty() {
        return "(none)".to_string();
    }
    items.iter().map(|item| format!("- {}", line(item))).collect::<Vec<_>>().join("\n")
}

fn finding_line(finding: &Finding) -> String {
    if finding.example.is_empty() {
        finding.point.clone()
    } else {
        format!("{} (e.g. \"{}\")", finding.point, finding.example)
    }
}

/// Build the grader request for `candidate`.
#[must_use]
pub fn assessment_prompt(
    task: &str,
    goal: &str,
    candidate: &Prompt,
    rating: RatingSystem,
    custom_metrics: &[MetricDefinition],
) -> Prompt {
    let metrics = bullets(&merge_metrics(custom_metrics), |m| format!("{}: {}", m.name, m.description));
    let text = render_template(
        ASSESSMENT_TEMPLATE,
        &[
            ("task", task),
            ("goal", goal),
            ("prompt", &candidate.render()),
            ("metrics", &metrics),
            ("rating", rating.instructions()),
        ],
    );
    Prompt::new(text)
}

/// Build the rewriter request from the latest candidate, its assessment and
/// the `recent` history entries.
#[must_use]
pub fn revision_prompt(
    task: &str,
    goal: &str,
    current: &Prompt,
    assessment: &Assessment,
    recent: &[OptimizationEntry],
) -> Prompt {
    let weaknesses = bullets(&assessment.weaknesses, finding_line);
    let suggestions = bullets(&assessment.suggestions, |s| {
        if s.reasoning.is_empty() {
            s.description.clone()
        } else {
            format!("{} ({})", s.description, s.reasoning)
        }
    });
    let history = bullets(recent, |entry| {
        format!(
            "#{} scored {:.2}: {}",
            entry.iteration,
            entry.assessment.overall_score,
            entry.prompt.input.replace('\n', " ")
        )
    });

    let text = render_template(
        REVISION_TEMPLATE,
        &[
            ("task", task),
            ("goal", goal),
            ("prompt", &current.render()),
            ("weaknesses", &weaknesses),
            ("suggestions", &suggestions),
            ("history", &history),
        ],
    );
    Prompt::new(text)
}

/// The rewriter's proposed prompt.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Revision {
    /// New prompt body.
    pub input: String,
    /// New directives.
    #[serde(default)]
    pub directives: Vec<String>,
    /// New examples.
    #[serde(default)]
    pub examples: Vec<String>,
    /// The rewriter's explanation.
    #[serde(default)]
    pub reasoning: String,
}

impl Revision {
    /// Decode a rewriter reply.
    ///
    /// # Errors
    /// [`LlmError::EmptyResponse`] for a blank reply or blank `input`,
    /// [`LlmError::MalformedResponse`] when the JSON does not decode.
    pub fn from_reply(text: &str) -> Result<Self, LlmError> {
        let cleaned = clean_response(text);
        if cleaned.is_empty() {
            return Err(LlmError::EmptyResponse);
        }
        let revision: Self = serde_json::from_str(&cleaned)?;
        if revision.input.trim().is_empty() {
            return Err(LlmError::EmptyResponse);
        }
        Ok(revision)
    }

    /// Apply to `base`, keeping its context, output format and length cap.
    #[must_use]
    pub fn apply(self, base: &Prompt) -> Prompt {
        Prompt {
            input: self.input,
            directives: self.directives,
            examples: self.examples,
            ..base.clone()
        }
    }
}
