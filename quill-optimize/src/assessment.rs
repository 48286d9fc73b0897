//! Grader output: scores, metrics and feedback for one candidate prompt.
//!
//! The grader answers in JSON. [`Assessment::from_grader_json`] decodes it
//! and normalizes the overall score onto `0.0..=1.0` according to the
//! configured [`RatingSystem`], so thresholds compare like with like.

use std::fmt;

use serde::{Deserialize, Serialize};

use quill_llm::{LlmError, clean_response};

/// How the grader expresses its overall verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RatingSystem {
    /// A score between 0.0 and 1.0.
    #[default]
    Numerical,
    /// A school grade from `A+` down to `F`.
    Letter,
}

impl RatingSystem {
    /// Grading instructions for the grader prompt.
    #[must_use]
    pub fn instructions(self) -> &'static str {
        match self {
            Self::Numerical => {
                "Give overall_score as a number between 0.0 (useless) and 1.0 (flawless). \
                 Set overall_grade to a short label such as \"good\" or \"needs work\"."
            }
            Self::Letter => {
                "Give overall_grade as a letter grade: A+, A, A-, B+, B, B-, C+, C, C-, D+, D, D- or F. \
                 overall_score may be omitted."
            }
        }
    }
}

impl fmt::Display for RatingSystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Numerical => f.write_str("numerical"),
            Self::Letter => f.write_str("letter"),
        }
    }
}

/// Map a letter grade onto `0.0..=1.0`. Case and surrounding whitespace are
/// ignored.
#[must_use]
pub fn letter_score(grade: &str) -> Option<f64> {
    let score = match grade.trim().to_ascii_uppercase().as_str() {
        "A+" => 1.0,
        "A" => 0.95,
        "A-" => 0.9,
        "B+" => 0.85,
        "B" => 0.8,
        "B-" => 0.75,
        "C+" => 0.7,
        "C" => 0.65,
        "C-" => 0.6,
        "D+" => 0.55,
        "D" => 0.5,
        "D-" => 0.45,
        "F" => 0.0,
        _ => return None,
    };
    Some(score)
}

/// A named quality dimension the grader is asked to score.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricDefinition {
    /// Metric name, matched case-insensitively.
    pub name: String,
    /// What the grader should look for.
    pub description: String,
}

impl MetricDefinition {
    /// Create a metric definition.
    #[must_use]
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self { name: name.into(), description: description.into() }
    }
}

/// Metrics every assessment covers unless overridden.
#[must_use]
pub fn builtin_metrics() -> Vec<MetricDefinition> {
    vec![
        MetricDefinition::new("Relevance", "How well the prompt targets the stated task."),
        MetricDefinition::new("Clarity", "How unambiguous and easy to follow the prompt is."),
        MetricDefinition::new("Specificity", "How precisely it states constraints and expected output."),
        MetricDefinition::new("Adaptability", "How well it holds up across varied inputs and models."),
        MetricDefinition::new("Efficiency", "How much it achieves per word without padding."),
    ]
}

/// Built-in metrics with `custom` merged in. A custom metric whose name
/// matches a built-in one replaces it in place; the rest are appended.
#[must_use]
pub fn merge_metrics(custom: &[MetricDefinition]) -> Vec<MetricDefinition> {
    let mut metrics = builtin_metrics();
    for metric in custom {
        match metrics.iter_mut().find(|m| m.name.eq_ignore_ascii_case(&metric.name)) {
            Some(existing) => *existing = metric.clone(),
            None => metrics.push(metric.clone()),
        }
    }
    metrics
}

/// One scored metric in an assessment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metric {
    /// Metric name.
    pub name: String,
    /// Score the grader gave.
    pub value: f64,
}

/// A strength or weakness, with an optional illustration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Finding {
    /// The observation.
    pub point: String,
    /// Where it shows up in the prompt.
    #[serde(default)]
    pub example: String,
}

/// A proposed change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Suggestion {
    /// What to change.
    pub description: String,
    /// Estimated improvement, 0.0 to 1.0.
    #[serde(default, alias = "expectedImpact")]
    pub expected_impact: f64,
    /// Why it would help.
    #[serde(default)]
    pub reasoning: String,
}

/// The grader's verdict on one candidate prompt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Assessment {
    /// Normalized score, `0.0..=1.0`, higher is better.
    pub overall_score: f64,
    /// Categorical label (a letter grade under [`RatingSystem::Letter`]).
    pub overall_grade: String,
    /// Per-metric scores.
    pub metrics: Vec<Metric>,
    /// What works.
    pub strengths: Vec<Finding>,
    /// What does not.
    pub weaknesses: Vec<Finding>,
    /// How to improve.
    pub suggestions: Vec<Suggestion>,
}

#[derive(Deserialize)]
struct GraderReply {
    #[serde(default, alias = "overallScore")]
    overall_score: Option<f64>,
    #[serde(default, alias = "overallGrade")]
    overall_grade: String,
    #[serde(default)]
    metrics: Vec<Metric>,
    #[serde(default)]
    strengths: Vec<Finding>,
    #[serde(default)]
    weaknesses: Vec<Finding>,
    #[serde(default)]
    suggestions: Vec<Suggestion>,
}

impl Assessment {
    /// Decode a grader reply and normalize its score.
    ///
    /// Code fences and surrounding prose are tolerated.
    ///
    /// # Errors
    /// [`LlmError::EmptyResponse`] for a blank reply, and
    /// [`LlmError::MalformedResponse`] when the JSON does not decode or the
    /// score/grade required by `rating` is missing or out of range.
    pub fn from_grader_json(text: &str, rating: RatingSystem) -> Result<Self, LlmError> {
        let cleaned = clean_response(text);
        if cleaned.is_empty() {
            return Err(LlmError::EmptyResponse);
        }
        let reply: GraderReply = serde_json::from_str(&cleaned)?;

        let overall_score = match rating {
            RatingSystem::Numerical => {
                let score = reply.overall_score.ok_or_else(|| {
                    LlmError::MalformedResponse("assessment is missing overall_score".into())
                })?;
                if !score.is_finite() {
                    return Err(LlmError::MalformedResponse(format!(
                        "overall_score is not a number: {score}"
                    )));
                }
                score.clamp(0.0, 1.0)
            }
            RatingSystem::Letter => letter_score(&reply.overall_grade).ok_or_else(|| {
                LlmError::MalformedResponse(format!(
                    "unrecognized letter grade '{}'",
                    reply.overall_grade
                ))
            })?,
        };

        Ok(Self {
            overall_score,
            overall_grade: reply.overall_grade,
            metrics: reply.metrics,
            strengths: reply.strengths,
            weaknesses: reply.weaknesses,
            suggestions: reply.suggestions,
        })
    }
}
