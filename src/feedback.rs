//! Interpreting judge verdicts.
//!
//! Judges answer with loosely structured JSON. Each known verdict shape has an
//! adapter that knows where its score and its justification live; when the
//! shape's own field is empty the generic field priority applies.

use crate::judge::Metric;
use serde_json::Value;

/// Marker used when an evaluation could not run or failed
pub const NO_EVALUATION: &str = "no evaluation possible";
/// Marker used when a verdict carries nothing usable as feedback
pub const NO_FEEDBACK: &str = "no feedback available from evaluator";
/// Feedback longer than this many characters is truncated
pub const MAX_FEEDBACK_CHARS: usize = 500;

const FEEDBACK_FIELDS: [&str; 5] = ["feedback", "reason", "explanation", "details", "message"];
const NESTED_FEEDBACK_FIELDS: [&str; 3] = ["feedback", "reason", "explanation"];
const NESTED_CONTAINERS: [&str; 2] = ["metadata", "feedback"];

/// Reads score and justification out of one verdict shape
pub trait ResultShape: Send + Sync {
    /// Numeric score carried by the verdict, before range validation
    fn score(&self, verdict: &Value) -> Option<f64>;

    /// The shape's preferred justification field
    fn primary_feedback<'v>(&self, verdict: &'v Value) -> Option<&'v str>;

    /// Pass/fail flag, if the shape has one
    fn passing(&self, verdict: &Value) -> Option<bool> {
        verdict.get("passing").and_then(Value::as_bool)
    }
}

/// `{"score": 1-5, "reasoning": "..."}`
pub struct GradedShape {
    /// Minimum score that counts as passing
    pub passing_threshold: f64,
}

impl ResultShape for GradedShape {
    fn score(&self, verdict: &Value) -> Option<f64> {
        verdict.get("score").and_then(number)
    }

    fn primary_feedback<'v>(&self, verdict: &'v Value) -> Option<&'v str> {
        non_empty(verdict.get("reasoning"))
    }

    fn passing(&self, verdict: &Value) -> Option<bool> {
        self.score(verdict).map(|s| s >= self.passing_threshold)
    }
}

/// `{"passing": bool, "<field>": "..."}`, scored 1.0 when passing and 0.0 otherwise
pub struct BinaryShape {
    pub feedback_field: &'static str,
}

impl ResultShape for BinaryShape {
    fn score(&self, verdict: &Value) -> Option<f64> {
        match verdict.get("score").and_then(number) {
            Some(score) => Some(score),
            None => self
                .passing(verdict)
                .map(|passing| if passing { 1.0 } else { 0.0 }),
        }
    }

    fn primary_feedback<'v>(&self, verdict: &'v Value) -> Option<&'v str> {
        non_empty(verdict.get(self.feedback_field))
    }
}

/// The adapter for the verdicts a metric's judge produces
pub fn shape_for(metric: Metric) -> Box<dyn ResultShape> {
    match metric {
        Metric::Correctness => Box::new(GradedShape {
            passing_threshold: 4.0,
        }),
        Metric::Relevance => Box::new(BinaryShape {
            feedback_field: "explanation",
        }),
        Metric::Faithfulness => Box::new(BinaryShape {
            feedback_field: "reason",
        }),
    }
}

fn number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn non_empty(value: Option<&Value>) -> Option<&str> {
    value
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

/// Justification text for a verdict, never empty
pub fn extract_feedback(shape: &dyn ResultShape, verdict: &Value) -> String {
    if let Some(text) = shape.primary_feedback(verdict) {
        return text.to_string();
    }

    if let Some(text) = FEEDBACK_FIELDS
        .iter()
        .find_map(|field| non_empty(verdict.get(*field)))
    {
        return text.to_string();
    }

    let nested = NESTED_CONTAINERS
        .iter()
        .filter_map(|container| verdict.get(*container).filter(|v| v.is_object()))
        .find_map(|map| {
            NESTED_FEEDBACK_FIELDS
                .iter()
                .find_map(|field| non_empty(map.get(*field)))
        });
    if let Some(text) = nested {
        return text.to_string();
    }

    let mut parts = Vec::new();
    if let Some(passing) = shape.passing(verdict) {
        parts.push(if passing { "passed" } else { "not passed" }.to_string());
    }
    if let Some(score) = shape.score(verdict) {
        parts.push(format!("score={}", score));
    }
    if parts.is_empty() {
        NO_FEEDBACK.to_string()
    } else {
        parts.join(", ")
    }
}

/// Cut feedback to [`MAX_FEEDBACK_CHARS`] characters, marking the cut
pub fn truncate_feedback(text: String) -> String {
    if text.chars().count() <= MAX_FEEDBACK_CHARS {
        return text;
    }
    let mut short: String = text.chars().take(MAX_FEEDBACK_CHARS).collect();
    short.push_str(" ...");
    short
}
