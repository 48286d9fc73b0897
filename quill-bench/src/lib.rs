//! Shared fixtures for the Quill benchmarks.

use quill_llm::{Message, Prompt};
use serde_json::json;

/// A conversation of `turns` user/assistant pairs with varied lengths.
#[must_use]
pub fn conversation(turns: usize) -> Vec<Message> {
    (0..turns)
        .flat_map(|i| {
            let question = format!("Question {i}: {}", "how does the window evict? ".repeat(i % 5 + 1));
            let answer = format!("Answer {i}: {}", "oldest messages go first. ".repeat(i % 7 + 1));
            [Message::user(question), Message::assistant(answer)]
        })
        .collect()
}

/// A prompt using every structured section.
#[must_use]
pub fn full_prompt() -> Prompt {
    Prompt::new("Summarize the incident report for an executive audience.")
        .with_context("Production outage on the payments API, 42 minutes, 3% of requests failed.")
        .with_directives(["Be concise", "Lead with customer impact", "Avoid jargon"])
        .with_output("Three bullet points")
        .with_examples(["Customers could not pay for 42 minutes"])
        .with_max_length(80)
}

/// A chat-completions reply whose content is a fenced JSON grade.
#[must_use]
pub fn fenced_grade_reply() -> String {
    let grade = json!({
        "overall_score": 0.82,
        "overall_grade": "good",
        "metrics": [
            { "name": "Relevance", "value": 0.9 },
            { "name": "Clarity", "value": 0.8 },
            { "name": "Specificity", "value": 0.75 }
        ],
        "strengths": [{ "point": "clear audience", "example": "executive audience" }],
        "weaknesses": [{ "point": "no time frame", "example": "incident report" }],
        "suggestions": [{ "description": "name the incident date", "expected_impact": 0.2, "reasoning": "context" }]
    });
    format!("Here is my assessment:\n```json\n{grade:#}\n```\nLet me know if you need more.")
}
