use crate::config::{Config, GenerationCredentials, secret_from_env};
use crate::evaluation::Evaluator;
use crate::generation::{RagChatClient, Responder, fill_missing_responses};
use crate::judge::{Judge, OpenAiJudge};
use crate::models::{EvaluationReport, Example, ExampleSet};
use crate::output::{self, OutputFormat};
use crate::statistics::summarize;
use anyhow::{Context, Result};
use std::path::Path;
use std::time::Duration;

/// Orchestrates the generation and evaluation stages of a run file
pub struct Runner {
    config: Config,
}

impl Runner {
    /// Create a new runner with the given configuration
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    /// Answer every unanswered example in `input` and write the collection to `output`
    pub async fn run_generation(&self, input: &Path, output: &Path) -> Result<usize> {
        let generation = self.config.generation()?;
        let credentials = GenerationCredentials::from_env(generation)?;
        let system_prompt = self.config.system_prompt()?;
        tracing::debug!(
            endpoint = %generation.endpoint,
            deployment = %generation.deployment,
            index = %generation.retrieval.index_name,
            "generation settings"
        );

        let mut set = ExampleSet::from_file(input)?;
        let client = RagChatClient::new(generation, credentials, system_prompt)?;
        let generated =
            Self::generate_into(&client, &mut set, output, generation.retry.pace()).await?;

        tracing::info!(generated, total = set.examples.len(), path = %output.display(), "all responses generated and stored");
        Ok(generated)
    }

    /// Fill the collection, then persist it once the whole pass succeeded
    async fn generate_into<R: Responder>(
        responder: &R,
        set: &mut ExampleSet,
        output: &Path,
        pace: Duration,
    ) -> Result<usize> {
        let generated = fill_missing_responses(responder, &mut set.examples, pace).await?;
        set.write_to(output)?;
        Ok(generated)
    }

    /// Score, justify and summarize the examples in `input`, writing the tables into `out_dir`
    pub async fn run_evaluation(
        &self,
        input: &Path,
        out_dir: &Path,
        limit: Option<usize>,
        format: OutputFormat,
    ) -> Result<EvaluationReport> {
        let evaluation = &self.config.evaluation;
        let api_key = secret_from_env(&evaluation.env_var_api_key)
            .context("The evaluation stage needs an API key")?;

        let set = ExampleSet::from_file(input)?;
        let limit = limit.or(evaluation.limit);
        let judge = OpenAiJudge::new(evaluation, api_key);
        let evaluator = Evaluator::new(judge, evaluation.provide_feedback);

        let report = Self::evaluate(&evaluator, &set.examples, limit).await;
        let paths = output::write_reports(&report, out_dir)?;
        output::print_summary(&report, &paths, format);
        Ok(report)
    }

    /// Both evaluation passes plus the summary
    async fn evaluate<J: Judge>(
        evaluator: &Evaluator<J>,
        examples: &[Example],
        limit: Option<usize>,
    ) -> EvaluationReport {
        let examples = match limit {
            Some(limit) => &examples[..limit.min(examples.len())],
            None => examples,
        };

        let rows = evaluator.score_examples(examples).await;
        let summary = summarize(&rows);
        tracing::info!(rows = rows.len(), "score pass finished, collecting feedback");
        let feedback = evaluator.collect_feedback(&rows).await;

        EvaluationReport {
            summary,
            rows,
            feedback,
        }
    }
}
