use crate::config::EvaluationConfig;
use anyhow::{Context, Result};
use async_openai::types::{
    ChatCompletionRequestMessage, ChatCompletionRequestSystemMessageArgs,
    ChatCompletionRequestUserMessageArgs,
    CreateChatCompletionRequest, CreateChatCompletionRequestArgs, CreateChatCompletionResponse,
};
use async_openai::{Client, config::OpenAIConfig};
use serde_json::Value;
use std::fmt;

/// The three scoring metrics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Metric {
    Correctness,
    Relevance,
    Faithfulness,
}

impl Metric {
    pub const ALL: [Metric; 3] = [Metric::Correctness, Metric::Relevance, Metric::Faithfulness];

    pub fn as_str(&self) -> &'static str {
        match self {
            Metric::Correctness => "correctness",
            Metric::Relevance => "relevance",
            Metric::Faithfulness => "faithfulness",
        }
    }

    /// Column order of the metric in result tables
    pub fn position(&self) -> usize {
        match self {
            Metric::Correctness => 0,
            Metric::Relevance => 1,
            Metric::Faithfulness => 2,
        }
    }

    /// Name of the score column in the result tables
    pub fn score_column(&self) -> String {
        format!("{}_score", self.as_str())
    }

    /// Name of the feedback column in the result tables
    pub fn feedback_column(&self) -> String {
        format!("{}_feedback", self.as_str())
    }

    /// Whether the metric can only run against a reference answer
    pub fn needs_reference(&self) -> bool {
        matches!(self, Metric::Correctness)
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything a judge sees about one example
#[derive(Debug, Clone)]
pub struct JudgeRequest<'a> {
    pub query: &'a str,
    pub response: &'a str,
    pub contexts: &'a [String],
    pub reference: Option<&'a str>,
}

/// An evaluation capability that scores one response for one metric.
///
/// Returns the judge's structured verdict as loosely-typed JSON; interpreting
/// it is up to the result-shape adapters.
pub trait Judge {
    async fn judge(
        &self,
        metric: Metric,
        request: &JudgeRequest<'_>,
        provide_feedback: bool,
    ) -> Result<Value>;

    /// Whether this judge has a dedicated feedback configuration for `metric`
    fn supports_feedback(&self, _metric: Metric) -> bool {
        true
    }
}

/// LLM-as-judge over an OpenAI-compatible chat endpoint
pub struct OpenAiJudge {
    client: Client<OpenAIConfig>,
    model: String,
    temperature: f32,
}

impl OpenAiJudge {
    pub fn new(config: &EvaluationConfig, api_key: String) -> Self {
        let openai_config = OpenAIConfig::new()
            .with_api_key(api_key)
            .with_api_base(&config.api_endpoint);

        Self {
            client: Client::with_config(openai_config),
            model: config.model.clone(),
            temperature: config.temperature as f32,
        }
    }

    /// Build the chat completion request for one metric
    fn build_request(&self, system: &str, user: String) -> Result<CreateChatCompletionRequest> {
        let system_message: ChatCompletionRequestMessage = ChatCompletionRequestSystemMessageArgs::default()
            .content(system.to_string())
            .build()
            .context("Failed to build judge system message")?
            .into();

        let user_message: ChatCompletionRequestMessage = ChatCompletionRequestUserMessageArgs::default()
            .content(user)
            .build()
            .context("Failed to build judge user message")?
            .into();

        CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .messages([system_message, user_message])
            .temperature(self.temperature)
            .build()
            .context("Failed to build judge completion request")
    }

    /// Extract content from the judge response
    fn extract_content(response: CreateChatCompletionResponse) -> String {
        match response.choices.first() {
            Some(choice) => match &choice.message.content {
                Some(content) => content.clone(),
                None => String::new(),
            },
            None => String::new(),
        }
    }
}

impl Judge for OpenAiJudge {
    async fn judge(
        &self,
        metric: Metric,
        request: &JudgeRequest<'_>,
        provide_feedback: bool,
    ) -> Result<Value> {
        let request = self.build_request(
            system_prompt(metric, provide_feedback),
            user_prompt(metric, request),
        )?;
        let response = self
            .client
            .chat()
            .create(request)
            .await
            .with_context(|| format!("Failed to run {} judge", metric))?;

        parse_json_response(&Self::extract_content(response))
    }
}

/// System prompt for a metric; the feedback variant asks for a justification
fn system_prompt(metric: Metric, provide_feedback: bool) -> &'static str {
    match (metric, provide_feedback) {
        (Metric::Correctness, false) => {
            "You are an expert evaluation system for a question answering chatbot. \
             Given a user query, a reference answer and a generated answer, grade the \
             generated answer from 1 to 5: 1 if it is irrelevant to the query, 2 or 3 if it \
             is relevant but contains mistakes, 4 or 5 if it is relevant and fully correct. \
             Respond with JSON only: {\"score\": <number>}"
        }
        (Metric::Correctness, true) => {
            "You are an expert evaluation system for a question answering chatbot. \
             Given a user query, a reference answer and a generated answer, grade the \
             generated answer from 1 to 5: 1 if it is irrelevant to the query, 2 or 3 if it \
             is relevant but contains mistakes, 4 or 5 if it is relevant and fully correct. \
             Respond with JSON only: {\"score\": <number>, \"reasoning\": \"<one or two sentences>\"}"
        }
        (Metric::Relevance, false) => {
            "You judge whether a response, together with its source context, is in line \
             with the query. Respond with JSON only: {\"passing\": true|false}"
        }
        (Metric::Relevance, true) => {
            "You judge whether a response, together with its source context, is in line \
             with the query. Respond with JSON only: \
             {\"passing\": true|false, \"explanation\": \"<why>\"}"
        }
        (Metric::Faithfulness, false) => {
            "You judge whether a response is supported by the given context, i.e. contains \
             no information that the context does not back. Respond with JSON only: \
             {\"passing\": true|false}"
        }
        (Metric::Faithfulness, true) => {
            "You judge whether a response is supported by the given context, i.e. contains \
             no information that the context does not back. Respond with JSON only: \
             {\"passing\": true|false, \"reason\": \"<why>\"}"
        }
    }
}

fn user_prompt(metric: Metric, request: &JudgeRequest<'_>) -> String {
    let context = request.contexts.join("\n\n");
    match metric {
        Metric::Correctness => format!(
            "## User Query\n{}\n\n## Reference Answer\n{}\n\n## Generated Answer\n{}",
            request.query,
            request.reference.unwrap_or_default(),
            request.response
        ),
        Metric::Relevance => format!(
            "## Query\n{}\n\n## Response\n{}\n\n## Context\n{}",
            request.query, request.response, context
        ),
        Metric::Faithfulness => format!(
            "## Response\n{}\n\n## Context\n{}",
            request.response, context
        ),
    }
}

/// Parse JSON from the judge reply, handling JSON embedded in prose
pub fn parse_json_response(response: &str) -> Result<Value> {
    match serde_json::from_str(response) {
        Ok(parsed) => Ok(parsed),
        Err(_) => try_extract_embedded_json(response),
    }
}

/// Try to extract JSON that might be embedded in text
fn try_extract_embedded_json(response: &str) -> Result<Value> {
    match response.find('{') {
        Some(start) => match response.rfind('}') {
            Some(end) if end > start => serde_json::from_str(&response[start..=end])
                .context("Failed to parse extracted JSON"),
            _ => anyhow::bail!("Found opening brace but no closing brace in response"),
        },
        None => anyhow::bail!("No JSON found in response"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn request<'a>(contexts: &'a [String], reference: Option<&'a str>) -> JudgeRequest<'a> {
        JudgeRequest {
            query: "What is the capital of France?",
            response: "Paris is the capital of France.",
            contexts,
            reference,
        }
    }

    #[test]
    fn test_metric_columns() {
        assert_eq!(Metric::Correctness.score_column(), "correctness_score");
        assert_eq!(Metric::Faithfulness.feedback_column(), "faithfulness_feedback");
        assert!(Metric::Correctness.needs_reference());
        assert!(!Metric::Relevance.needs_reference());
    }

    #[test]
    fn test_user_prompt_contents() {
        let contexts = vec!["Paris is the capital of France.".to_string()];
        let correctness = user_prompt(Metric::Correctness, &request(&contexts, Some("Paris")));
        assert!(correctness.contains("## Reference Answer\nParis"));

        let faithfulness = user_prompt(Metric::Faithfulness, &request(&contexts, None));
        assert!(faithfulness.contains("## Context\nParis is the capital"));
        assert!(!faithfulness.contains("Reference"));
    }

    #[test]
    fn test_feedback_prompts_ask_for_justification() {
        assert!(system_prompt(Metric::Correctness, true).contains("reasoning"));
        assert!(!system_prompt(Metric::Correctness, false).contains("reasoning"));
        assert!(system_prompt(Metric::Relevance, true).contains("explanation"));
        assert!(system_prompt(Metric::Faithfulness, true).contains("reason"));
    }

    #[test]
    fn test_parse_json_response_valid_json() {
        let parsed = parse_json_response(r#"{"score": 4.5, "reasoning": "Correct."}"#).unwrap();
        assert_eq!(parsed["score"], 4.5);
        assert_eq!(parsed["reasoning"], "Correct.");
    }

    #[test]
    fn test_parse_json_response_embedded_json() {
        let parsed =
            parse_json_response("Here is my verdict: {\"passing\": true} That's all.").unwrap();
        assert_eq!(parsed["passing"], true);
    }

    #[test]
    fn test_parse_json_response_invalid() {
        assert!(parse_json_response("invalid json content").is_err());
        assert!(parse_json_response(r#"{"score": 4"#).is_err());
        assert!(parse_json_response(r#"} {"#).is_err());
    }

    #[tokio::test]
    async fn test_openai_judge_round_trip() {
        let mut server = mockito::Server::new_async().await;
        let reply = json!({
            "id": "chatcmpl-1",
            "object": "chat.completion",
            "created": 1,
            "model": "gpt-4o",
            "choices": [{
                "index": 0,
                "message": {"role": "assistant", "content": "{\"score\": 5, \"reasoning\": \"Matches the reference.\"}"},
                "finish_reason": "stop"
            }]
        });
        let mock = server
            .mock("POST", "/chat/completions")
            .match_header("authorization", "Bearer judge-key")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(reply.to_string())
            .create_async()
            .await;

        let config = EvaluationConfig {
            api_endpoint: server.url(),
            ..EvaluationConfig::default()
        };
        let judge = OpenAiJudge::new(&config, "judge-key".to_string());
        let contexts = vec!["Paris is the capital of France.".to_string()];

        let verdict = judge
            .judge(Metric::Correctness, &request(&contexts, Some("Paris")), true)
            .await
            .unwrap();

        assert_eq!(verdict["score"], 5);
        assert_eq!(verdict["reasoning"], "Matches the reference.");
        mock.assert_async().await;
    }
}
