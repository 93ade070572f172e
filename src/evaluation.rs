use crate::feedback::{NO_EVALUATION, ResultShape, extract_feedback, shape_for, truncate_feedback};
use crate::judge::{Judge, JudgeRequest, Metric};
use crate::models::{Example, FeedbackRow, ScoreRow};
use crate::statistics::apply_row_averages;
use std::ops::RangeInclusive;

/// Scores outside this range are recorded as absent
pub const VALID_SCORE_RANGE: RangeInclusive<f64> = 0.0..=10.0;

/// Result of one contained metric evaluation
#[derive(Debug, Clone, PartialEq)]
pub struct MetricOutcome {
    pub score: Option<f64>,
    pub feedback: String,
}

impl MetricOutcome {
    fn not_possible() -> Self {
        Self {
            score: None,
            feedback: NO_EVALUATION.to_string(),
        }
    }
}

/// Runs the metric judges over example collections
pub struct Evaluator<J: Judge> {
    judge: J,
    provide_feedback: bool,
    shapes: [Box<dyn ResultShape>; 3],
}

impl<J: Judge> Evaluator<J> {
    /// Create an evaluator; verdict adapters are fixed per metric here
    pub fn new(judge: J, provide_feedback: bool) -> Self {
        Self {
            judge,
            provide_feedback,
            shapes: Metric::ALL.map(shape_for),
        }
    }

    fn shape(&self, metric: Metric) -> &dyn ResultShape {
        self.shapes[metric.position()].as_ref()
    }

    /// Run one metric, containing any failure to this metric alone
    pub async fn evaluate_metric(
        &self,
        metric: Metric,
        request: &JudgeRequest<'_>,
        provide_feedback: bool,
    ) -> MetricOutcome {
        if metric.needs_reference() && request.reference.is_none() {
            return MetricOutcome::not_possible();
        }

        let verdict = match self.judge.judge(metric, request, provide_feedback).await {
            Ok(verdict) => verdict,
            Err(e) => {
                tracing::warn!(%metric, error = %format!("{:#}", e), "evaluation failed");
                return MetricOutcome::not_possible();
            }
        };

        let shape = self.shape(metric);
        let score = match shape.score(&verdict) {
            Some(score) if !VALID_SCORE_RANGE.contains(&score) => {
                tracing::warn!(%metric, score, "score out of range, recording as absent");
                None
            }
            score => score,
        };

        MetricOutcome {
            score,
            feedback: truncate_feedback(extract_feedback(shape, &verdict)),
        }
    }

    /// Score pass: one row per example, row averages filled in
    pub async fn score_examples(&self, examples: &[Example]) -> Vec<ScoreRow> {
        let total = examples.len();
        let mut rows = Vec::with_capacity(total);

        for (position, example) in examples.iter().enumerate() {
            tracing::info!(example = position + 1, total, "evaluating");

            let response = example.response.clone().unwrap_or_default();
            let contexts = dummy_contexts(&response);
            let request = JudgeRequest {
                query: &example.query,
                response: &response,
                contexts: &contexts,
                reference: example.reference(),
            };

            let mut scores = [None; 3];
            for (slot, metric) in scores.iter_mut().zip(Metric::ALL) {
                *slot = self.evaluate_metric(metric, &request, false).await.score;
            }
            tracing::info!(
                correctness = ?scores[0],
                relevance = ?scores[1],
                faithfulness = ?scores[2],
                "scores"
            );

            rows.push(ScoreRow {
                index: position + 1,
                question: example.query.clone(),
                response,
                reference_answer: example.reference_answer.clone().unwrap_or_default(),
                correctness_score: scores[0],
                relevance_score: scores[1],
                faithfulness_score: scores[2],
                overall_average_score: None,
            });
        }

        apply_row_averages(&mut rows);
        rows
    }

    /// Feedback pass: re-run every judge for justifications only.
    ///
    /// Scores from this pass are discarded; the rows are not modified.
    pub async fn collect_feedback(&self, rows: &[ScoreRow]) -> Vec<FeedbackRow> {
        let total = rows.len();
        let mut feedback = Vec::with_capacity(total);

        for (position, row) in rows.iter().enumerate() {
            let contexts = dummy_contexts(&row.response);
            let reference = Some(row.reference_answer.as_str()).filter(|r| !r.trim().is_empty());
            let request = JudgeRequest {
                query: &row.question,
                response: &row.response,
                contexts: &contexts,
                reference,
            };

            let mut texts = Vec::with_capacity(3);
            for metric in Metric::ALL {
                let provide_feedback =
                    self.provide_feedback && self.judge.supports_feedback(metric);
                texts.push(
                    self.evaluate_metric(metric, &request, provide_feedback)
                        .await
                        .feedback,
                );
            }
            let mut texts = texts.into_iter();
            feedback.push(FeedbackRow {
                correctness_feedback: texts.next().unwrap_or_default(),
                relevance_feedback: texts.next().unwrap_or_default(),
                faithfulness_feedback: texts.next().unwrap_or_default(),
            });

            let done = position + 1;
            if done % 10 == 0 || done == total {
                tracing::info!(done, total, "feedback progress");
            }
        }

        feedback
    }
}

/// Stand-in retrieval context: the response itself, or one empty string
fn dummy_contexts(response: &str) -> Vec<String> {
    vec![response.to_string()]
}
