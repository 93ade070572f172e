use crate::config::{GenerationConfig, GenerationCredentials};
use crate::models::Example;
use crate::retry::{RetryPolicy, retry_with_backoff};
use anyhow::{Context, Result};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::time::Duration;
use thiserror::Error;
use tokio::time::sleep;

/// Failure of a single chat completion call
#[derive(Debug, Error)]
pub enum ChatError {
    #[error("HTTP {status}: {body}")]
    Status { status: StatusCode, body: String },
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("malformed completion reply: {0}")]
    Malformed(String),
}

/// Anything that can answer a single question
pub trait Responder {
    async fn respond(&self, question: &str) -> Result<String>;
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct CompletionReply {
    #[serde(default)]
    choices: Vec<CompletionChoice>,
}

#[derive(Debug, Deserialize)]
struct CompletionChoice {
    message: CompletionMessage,
}

#[derive(Debug, Deserialize)]
struct CompletionMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Chat completion client for a hosted deployment with a search index as data source
pub struct RagChatClient<'a> {
    http: reqwest::Client,
    config: &'a GenerationConfig,
    credentials: GenerationCredentials,
    system_prompt: String,
    policy: RetryPolicy,
}

impl<'a> RagChatClient<'a> {
    pub fn new(
        config: &'a GenerationConfig,
        credentials: GenerationCredentials,
        system_prompt: String,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            http,
            config,
            credentials,
            system_prompt,
            policy: RetryPolicy::from(&config.retry),
        })
    }

    #[cfg(test)]
    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    fn completions_url(&self) -> String {
        format!(
            "{}/openai/deployments/{}/chat/completions",
            self.config.endpoint.trim_end_matches('/'),
            self.config.deployment
        )
    }

    /// Build the request body: fixed sampling parameters plus the retrieval block
    fn build_body(&self, question: &str) -> Value {
        let retrieval = &self.config.retrieval;
        json!({
            "messages": [
                ChatMessage { role: "system", content: &self.system_prompt },
                ChatMessage { role: "user", content: question },
            ],
            "max_tokens": self.config.max_tokens,
            "temperature": self.config.temperature,
            "top_p": self.config.top_p,
            "frequency_penalty": self.config.frequency_penalty,
            "presence_penalty": self.config.presence_penalty,
            "stop": null,
            "stream": false,
            "data_sources": [{
                "type": "azure_search",
                "parameters": {
                    "filter": null,
                    "endpoint": retrieval.search_endpoint,
                    "index_name": retrieval.index_name,
                    "semantic_configuration": "",
                    "authentication": {
                        "type": "api_key",
                        "key": self.credentials.search_key,
                    },
                    "query_type": retrieval.query_type,
                    "in_scope": retrieval.in_scope,
                    "strictness": retrieval.strictness,
                    "top_n_documents": retrieval.top_n_documents,
                }
            }]
        })
    }

    /// Issue one request without retrying
    async fn send_once(&self, question: &str) -> Result<String, ChatError> {
        let response = self
            .http
            .post(self.completions_url())
            .query(&[("api-version", self.config.api_version.as_str())])
            .header("api-key", &self.credentials.api_key)
            .json(&self.build_body(question))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ChatError::Status { status, body });
        }

        let reply: CompletionReply = response.json().await?;
        extract_content(reply)
    }
}

fn extract_content(reply: CompletionReply) -> Result<String, ChatError> {
    reply
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| ChatError::Malformed("no choices".to_string()))?
        .message
        .content
        .ok_or_else(|| ChatError::Malformed("choice has no content".to_string()))
}

impl Responder for RagChatClient<'_> {
    async fn respond(&self, question: &str) -> Result<String> {
        retry_with_backoff(&self.policy, |_| self.send_once(question))
            .await
            .context("Failed to generate response")
    }
}

/// Shorten a question for progress logs
fn preview(text: &str, max_chars: usize) -> String {
    let mut short: String = text.chars().take(max_chars).collect();
    if text.chars().count() > max_chars {
        short.push_str("...");
    }
    short
}

/// Fill in every missing response, in order, pausing `pace` after each answer.
///
/// Examples that already carry a non-empty response are left untouched.
/// Returns the number of responses generated.
pub async fn fill_missing_responses<R: Responder>(
    responder: &R,
    examples: &mut [Example],
    pace: Duration,
) -> Result<usize> {
    let total = examples.len();
    let mut generated = 0;

    for (index, example) in examples.iter_mut().enumerate() {
        if example.answered().is_some() {
            tracing::debug!(example = index + 1, total, "already answered, skipping");
            continue;
        }

        tracing::info!(
            example = index + 1,
            total,
            query = %preview(&example.query, 60),
            "generating response"
        );
        let answer = responder
            .respond(&example.query)
            .await
            .with_context(|| format!("Failed to answer example {}", index + 1))?;
        example.response = Some(answer);
        generated += 1;

        sleep(pace).await;
    }

    Ok(generated)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{RetrievalConfig, RetryConfig};
    use mockito::Matcher;
    use std::cell::RefCell;

    fn create_test_config(endpoint: &str) -> GenerationConfig {
        GenerationConfig {
            endpoint: endpoint.to_string(),
            deployment: "gpt-4o".to_string(),
            api_version: "2025-01-01-preview".to_string(),
            env_var_api_key: "TEST_AZURE_KEY".to_string(),
            system_prompt: Some("Only answer from PlanQK resources.".to_string()),
            system_prompt_file: None,
            max_tokens: 800,
            temperature: 0.7,
            top_p: 0.95,
            frequency_penalty: 0.0,
            presence_penalty: 0.0,
            request_timeout_secs: 120.0,
            retrieval: RetrievalConfig {
                search_endpoint: "https://search.example.net".to_string(),
                index_name: "planqk-docs".to_string(),
                env_var_search_key: "TEST_SEARCH_KEY".to_string(),
                query_type: "simple".to_string(),
                strictness: 1,
                top_n_documents: 10,
                in_scope: false,
            },
            retry: RetryConfig::default(),
        }
    }

    fn credentials() -> GenerationCredentials {
        GenerationCredentials {
            api_key: "test-key".to_string(),
            search_key: "search-secret".to_string(),
        }
    }

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 5,
            rate_limit_wait: Duration::from_millis(1),
            error_wait: Duration::from_millis(1),
        }
    }

    fn completion_body(content: &str) -> String {
        json!({
            "id": "chatcmpl-1",
            "object": "chat.completion",
            "choices": [{"index": 0, "message": {"role": "assistant", "content": content}}]
        })
        .to_string()
    }

    /// Scripted responder that records the questions it was asked
    struct ScriptedResponder {
        asked: RefCell<Vec<String>>,
        fail: bool,
    }

    impl ScriptedResponder {
        fn new() -> Self {
            Self {
                asked: RefCell::new(Vec::new()),
                fail: false,
            }
        }
    }

    impl Responder for ScriptedResponder {
        async fn respond(&self, question: &str) -> Result<String> {
            self.asked.borrow_mut().push(question.to_string());
            if self.fail {
                anyhow::bail!("Mock generate failure");
            }
            Ok(format!("Answer to: {question}"))
        }
    }

    fn example(query: &str, response: Option<&str>) -> Example {
        Example {
            query: query.to_string(),
            response: response.map(str::to_string),
            ..Default::default()
        }
    }

    #[test]
    fn test_build_body_carries_sampling_and_retrieval() {
        let config = create_test_config("https://example.openai.azure.com/");
        let client =
            RagChatClient::new(&config, credentials(), "system text".to_string()).unwrap();

        let body = client.build_body("What is PlanQK?");
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][0]["content"], "system text");
        assert_eq!(body["messages"][1]["content"], "What is PlanQK?");
        assert_eq!(body["max_tokens"], 800);
        assert_eq!(body["top_p"], 0.95);
        assert_eq!(body["stream"], false);
        assert!(body["stop"].is_null());

        let parameters = &body["data_sources"][0]["parameters"];
        assert_eq!(body["data_sources"][0]["type"], "azure_search");
        assert_eq!(parameters["index_name"], "planqk-docs");
        assert_eq!(parameters["authentication"]["key"], "search-secret");
        assert_eq!(parameters["query_type"], "simple");
        assert_eq!(parameters["strictness"], 1);
        assert_eq!(parameters["top_n_documents"], 10);
        assert_eq!(
            client.completions_url(),
            "https://example.openai.azure.com/openai/deployments/gpt-4o/chat/completions"
        );
    }

    #[test]
    fn test_extract_content_without_choices() {
        let reply: CompletionReply = serde_json::from_str(r#"{"choices": []}"#).unwrap();
        assert!(matches!(extract_content(reply), Err(ChatError::Malformed(_))));
    }

    #[tokio::test]
    async fn test_respond_success() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/openai/deployments/gpt-4o/chat/completions")
            .match_query(Matcher::UrlEncoded(
                "api-version".into(),
                "2025-01-01-preview".into(),
            ))
            .match_header("api-key", "test-key")
            .match_body(Matcher::AllOf(vec![
                Matcher::PartialJson(json!({"temperature": 0.7, "max_tokens": 800})),
                Matcher::Regex(r#""index_name":"planqk-docs""#.to_string()),
            ]))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(completion_body("Paris is the capital of France."))
            .create_async()
            .await;

        let config = create_test_config(&server.url());
        let client =
            RagChatClient::new(&config, credentials(), "system".to_string()).unwrap();

        let answer = client.respond("Capital of France?").await.unwrap();
        assert_eq!(answer, "Paris is the capital of France.");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_respond_rate_limited_on_every_attempt() {
        let mut server = mockito::Server::new_async().await;
        let limited = server
            .mock("POST", "/openai/deployments/gpt-4o/chat/completions")
            .match_query(Matcher::Any)
            .with_status(429)
            .with_body("Requests to the deployment have exceeded the rate limit")
            .expect(5)
            .create_async()
            .await;

        let config = create_test_config(&server.url());
        let client = RagChatClient::new(&config, credentials(), "system".to_string())
            .unwrap()
            .with_policy(fast_policy());

        let err = client.respond("q").await.unwrap_err();
        assert!(format!("{:#}", err).contains("maximum attempts reached (5)"));
        limited.assert_async().await;
    }

    #[tokio::test]
    async fn test_respond_gives_up_after_persistent_server_errors() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/openai/deployments/gpt-4o/chat/completions")
            .match_query(Matcher::Any)
            .with_status(500)
            .with_body("internal error")
            .expect(5)
            .create_async()
            .await;

        let config = create_test_config(&server.url());
        let client = RagChatClient::new(&config, credentials(), "system".to_string())
            .unwrap()
            .with_policy(fast_policy());

        let err = client.respond("q").await.unwrap_err();
        let message = format!("{:#}", err);
        assert!(message.contains("Failed to generate response"));
        assert!(message.contains("500"));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_respond_times_out_on_silent_server() {
        // accepts connections but never answers
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();
        let held = tokio::spawn(async move {
            let mut open = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                open.push(socket);
            }
        });

        let mut config = create_test_config(&format!("http://{}", address));
        config.request_timeout_secs = 0.2;
        let client = RagChatClient::new(&config, credentials(), "system".to_string())
            .unwrap()
            .with_policy(RetryPolicy {
                max_attempts: 2,
                rate_limit_wait: Duration::ZERO,
                error_wait: Duration::ZERO,
            });

        let result = tokio::time::timeout(Duration::from_secs(5), client.respond("q"))
            .await
            .expect("request should time out before the guard");
        let err = result.unwrap_err();
        assert!(err.to_string().contains("Failed to generate response"));
        held.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn test_fill_missing_responses_skips_answered() {
        let responder = ScriptedResponder::new();
        let mut examples = vec![
            example("already answered", Some("kept as is")),
            example("empty response", Some("")),
            example("no response", None),
        ];

        let generated = fill_missing_responses(&responder, &mut examples, Duration::from_secs(5))
            .await
            .unwrap();

        assert_eq!(generated, 2);
        assert_eq!(examples[0].response.as_deref(), Some("kept as is"));
        assert_eq!(
            examples[1].response.as_deref(),
            Some("Answer to: empty response")
        );
        assert_eq!(examples[2].response.as_deref(), Some("Answer to: no response"));
        assert_eq!(
            *responder.asked.borrow(),
            vec!["empty response".to_string(), "no response".to_string()]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_fill_missing_responses_paces_each_answer() {
        let responder = ScriptedResponder::new();
        let mut examples = vec![example("a", None), example("b", None), example("c", Some("x"))];
        let start = tokio::time::Instant::now();

        fill_missing_responses(&responder, &mut examples, Duration::from_secs(5))
            .await
            .unwrap();

        assert_eq!(start.elapsed(), Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_fill_missing_responses_failure_aborts() {
        let responder = ScriptedResponder {
            asked: RefCell::new(Vec::new()),
            fail: true,
        };
        let mut examples = vec![example("first", None), example("second", None)];

        let err = fill_missing_responses(&responder, &mut examples, Duration::ZERO)
            .await
            .unwrap_err();

        assert!(err.to_string().contains("Failed to answer example 1"));
        assert_eq!(responder.asked.borrow().len(), 1);
    }

    #[test]
    fn test_preview_truncates_on_char_boundary() {
        assert_eq!(preview("short", 60), "short");
        assert_eq!(preview("äöüäöü", 3), "äöü...");
    }
}
