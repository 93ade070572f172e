use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Settings for the response generation stage
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GenerationConfig {
    /// Base URL of the hosted chat deployment (e.g. https://name.openai.azure.com)
    pub endpoint: String,
    /// Deployment (model) name
    pub deployment: String,
    /// API version query parameter
    #[serde(default = "default_api_version")]
    pub api_version: String,
    /// Environment variable name containing the API key
    pub env_var_api_key: String,
    /// Inline system prompt
    #[serde(default)]
    pub system_prompt: Option<String>,
    /// System prompt loaded from a file, relative to the run file
    #[serde(default)]
    pub system_prompt_file: Option<PathBuf>,
    /// Maximum tokens for response generation
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    /// Temperature for response generation (0.0 to 1.0)
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    /// Nucleus sampling
    #[serde(default = "default_top_p")]
    pub top_p: f64,
    #[serde(default)]
    pub frequency_penalty: f64,
    #[serde(default)]
    pub presence_penalty: f64,
    /// Seconds before a single request is abandoned
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: f64,
    /// Search index feeding the model's context
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub retry: RetryConfig,
}

impl GenerationConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.request_timeout_secs)
    }

    fn validate(&self) -> Result<()> {
        if !(self.request_timeout_secs.is_finite() && self.request_timeout_secs > 0.0) {
            bail!(
                "Invalid [generation] request_timeout_secs: {} (must be a positive number)",
                self.request_timeout_secs
            );
        }
        self.retry.validate()
    }
}

/// Retrieval augmentation block attached to every generation request
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RetrievalConfig {
    /// Search service endpoint
    pub search_endpoint: String,
    /// Index name
    pub index_name: String,
    /// Environment variable name containing the search key
    pub env_var_search_key: String,
    #[serde(default = "default_query_type")]
    pub query_type: String,
    #[serde(default = "default_strictness")]
    pub strictness: u8,
    #[serde(default = "default_top_n_documents")]
    pub top_n_documents: u32,
    /// Restrict answers to retrieved documents
    #[serde(default)]
    pub in_scope: bool,
}

/// Retry and pacing behaviour of the generation stage
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Seconds to wait after a rate-limit error
    #[serde(default = "default_rate_limit_wait")]
    pub rate_limit_wait_secs: f64,
    /// Seconds to wait after any other error
    #[serde(default = "default_error_wait")]
    pub error_wait_secs: f64,
    /// Seconds to wait after every successful request
    #[serde(default = "default_pace")]
    pub pace_secs: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            rate_limit_wait_secs: default_rate_limit_wait(),
            error_wait_secs: default_error_wait(),
            pace_secs: default_pace(),
        }
    }
}

impl RetryConfig {
    pub fn pace(&self) -> Duration {
        Duration::from_secs_f64(self.pace_secs)
    }

    /// Every wait must convert into a duration
    fn validate(&self) -> Result<()> {
        let waits = [
            ("rate_limit_wait_secs", self.rate_limit_wait_secs),
            ("error_wait_secs", self.error_wait_secs),
            ("pace_secs", self.pace_secs),
        ];
        for (name, secs) in waits {
            Duration::try_from_secs_f64(secs)
                .with_context(|| format!("Invalid [generation.retry] {}: {}", name, secs))?;
        }
        Ok(())
    }
}

/// Settings for the evaluation stage
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EvaluationConfig {
    /// OpenAI-compatible API endpoint used by the judge
    #[serde(default = "default_eval_endpoint")]
    pub api_endpoint: String,
    /// Environment variable name for the judge API key
    #[serde(default = "default_eval_env_var")]
    pub env_var_api_key: String,
    /// Model to use for evaluation
    #[serde(default = "default_eval_model")]
    pub model: String,
    #[serde(default = "default_eval_temperature")]
    pub temperature: f64,
    /// Ask the judge for justifications in the feedback pass
    #[serde(default = "default_true")]
    pub provide_feedback: bool,
    /// Only evaluate the first N examples
    #[serde(default)]
    pub limit: Option<usize>,
}

impl Default for EvaluationConfig {
    fn default() -> Self {
        Self {
            api_endpoint: default_eval_endpoint(),
            env_var_api_key: default_eval_env_var(),
            model: default_eval_model(),
            temperature: default_eval_temperature(),
            provide_feedback: true,
            limit: None,
        }
    }
}

fn default_api_version() -> String {
    "2025-01-01-preview".to_string()
}

fn default_max_tokens() -> u32 {
    800
}

fn default_temperature() -> f64 {
    0.7
}

fn default_top_p() -> f64 {
    0.95
}

fn default_request_timeout() -> f64 {
    120.0
}

fn default_query_type() -> String {
    "simple".to_string()
}

fn default_strictness() -> u8 {
    1
}

fn default_top_n_documents() -> u32 {
    10
}

fn default_max_attempts() -> u32 {
    5
}

fn default_rate_limit_wait() -> f64 {
    15.0
}

fn default_error_wait() -> f64 {
    10.0
}

fn default_pace() -> f64 {
    5.0
}

fn default_eval_endpoint() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_eval_env_var() -> String {
    "OPENAI_API_KEY".to_string()
}

fn default_eval_model() -> String {
    "gpt-4o".to_string()
}

fn default_eval_temperature() -> f64 {
    0.1
}

fn default_true() -> bool {
    true
}

/// Root configuration of a run file
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// Required by `generate`
    #[serde(default)]
    pub generation: Option<GenerationConfig>,
    #[serde(default)]
    pub evaluation: EvaluationConfig,
    /// Directory of the run file, used to resolve relative paths
    #[serde(skip)]
    pub base_dir: PathBuf,
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let mut config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse TOML config: {}", path.display()))?;
        config.base_dir = path.parent().map(Path::to_path_buf).unwrap_or_default();
        config
            .validate()
            .with_context(|| format!("Invalid run file: {}", path.display()))?;
        Ok(config)
    }

    /// Reject values that deserialize fine but cannot drive a run
    pub fn validate(&self) -> Result<()> {
        match &self.generation {
            Some(generation) => generation.validate(),
            None => Ok(()),
        }
    }

    pub fn generation(&self) -> Result<&GenerationConfig> {
        self.generation
            .as_ref()
            .context("Run file has no [generation] section")
    }

    /// Resolve the generation system prompt from inline text or a prompt file
    pub fn system_prompt(&self) -> Result<String> {
        let generation = self.generation()?;
        match (&generation.system_prompt, &generation.system_prompt_file) {
            (Some(_), Some(_)) => bail!("Set either system_prompt or system_prompt_file, not both"),
            (Some(prompt), None) => Ok(prompt.clone()),
            (None, Some(file)) => {
                let path = self.base_dir.join(file);
                std::fs::read_to_string(&path)
                    .with_context(|| format!("Failed to read system prompt: {}", path.display()))
            }
            (None, None) => bail!("No system prompt configured (system_prompt or system_prompt_file)"),
        }
    }
}

/// Read a secret from the environment variable named in the run file
pub fn secret_from_env(var: &str) -> Result<String> {
    let value =
        std::env::var(var).with_context(|| format!("Environment variable {} not found", var))?;
    if value.trim().is_empty() {
        bail!("Environment variable {} not found", var);
    }
    Ok(value)
}

/// Secrets needed by the generation stage
#[derive(Clone)]
pub struct GenerationCredentials {
    pub api_key: String,
    pub search_key: String,
}

impl GenerationCredentials {
    pub fn from_env(config: &GenerationConfig) -> Result<Self> {
        Ok(Self {
            api_key: secret_from_env(&config.env_var_api_key)?,
            search_key: secret_from_env(&config.retrieval.env_var_search_key)?,
        })
    }
}
