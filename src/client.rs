//! Sonar API client
//!
//! Provides free-text and schema-validated structured requests against the
//! Perplexity chat completions API. Structured requests embed the target
//! type's JSON schema in a strict system instruction and recover the reply
//! through [`extract_json`](crate::extract::extract_json), retrying when the
//! model answers with pure tool-use narration instead of content.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use tracing::{debug, instrument, warn};

use crate::config::SonarConfig;
use crate::error::{SonarError, SonarResult};
use crate::extract::extract_json;
use crate::types::{ChatCompletionRequest, ChatCompletionResponse, ChatMessage, SearchRecency};

/// Default model for structured JSON output. Answers directly, without the
/// `<think>` blocks that consume output tokens and leak into the reply.
pub const MODEL_DIRECT: &str = "sonar-pro";

/// Default model for free-form research text
pub const MODEL_REASONING: &str = "sonar-reasoning";

/// Extra attempts after the initial request when the reply is classified
/// incomplete (3 attempts total)
const MAX_RETRIES: u32 = 2;

/// Fixed delay between retry attempts. The failure mode is a stochastic
/// model glitch, not load, so no backoff.
const RETRY_DELAY: Duration = Duration::from_secs(1);

/// Length bound on the raw-text prefix attached to extraction failures
const RAW_SNIPPET_LEN: usize = 500;

/// Narration indicators for the incompleteness check. A reply containing
/// one of these and no `{` anywhere is the model describing a step it never
/// took, with no embedded answer to recover.
const INCOMPLETE_INDICATORS: &[&str] = &[
    "let me fetch",
    "let me search",
    "let me look",
    "i will search",
    "i'll search",
    "i will fetch",
    "searching for",
    "fetching",
    "looking up",
];

/// Async transport for one chat completions call
///
/// The real implementation is [`HttpTransport`]; tests inject scripted
/// transports to drive the retry and recovery paths.
#[async_trait]
pub trait ChatTransport: Send + Sync {
    async fn chat(&self, request: &ChatCompletionRequest) -> SonarResult<ChatCompletionResponse>;
}

/// reqwest-backed transport for the Perplexity API
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    base_url: String,
    api_key: String,
}

impl HttpTransport {
    pub fn new(config: &SonarConfig) -> SonarResult<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| SonarError::network(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: config.base_url.clone(),
            api_key: config.api_key.clone(),
        })
    }
}

#[async_trait]
impl ChatTransport for HttpTransport {
    async fn chat(&self, request: &ChatCompletionRequest) -> SonarResult<ChatCompletionResponse> {
        let url = format!("{}/chat/completions", self.base_url);

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .header("Content-Type", "application/json")
            .json(request)
            .send()
            .await
            .map_err(|e| SonarError::network(format!("Sonar API request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(SonarError::Api { status, body });
        }

        response
            .json()
            .await
            .map_err(|e| SonarError::network(format!("Failed to decode Sonar response: {}", e)))
    }
}

/// Per-request generation parameters
#[derive(Debug, Clone)]
pub struct RequestOptions {
    /// Model override; falls back to the config default, then the mode default
    pub model: Option<String>,
    pub temperature: f64,
    pub max_tokens: Option<u32>,
    pub search_recency: Option<SearchRecency>,
}

impl RequestOptions {
    /// Defaults for free-form text requests
    pub fn text() -> Self {
        Self {
            model: None,
            temperature: 0.2,
            max_tokens: Some(4096),
            search_recency: Some(SearchRecency::Day),
        }
    }

    /// Defaults for structured JSON requests
    pub fn structured() -> Self {
        Self {
            model: None,
            temperature: 0.1,
            max_tokens: Some(16384),
            search_recency: Some(SearchRecency::Day),
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }
}

impl Default for RequestOptions {
    fn default() -> Self {
        Self::text()
    }
}

/// Client for the Perplexity Sonar API
#[derive(Clone)]
pub struct SonarClient {
    pub(crate) transport: Arc<dyn ChatTransport>,
    pub(crate) config: SonarConfig,
}

impl SonarClient {
    /// Create a client with the reqwest transport
    pub fn new(config: SonarConfig) -> SonarResult<Self> {
        let transport = HttpTransport::new(&config)?;
        Ok(Self {
            transport: Arc::new(transport),
            config,
        })
    }

    /// Create a client with an injected transport
    pub fn with_transport(transport: Arc<dyn ChatTransport>, config: SonarConfig) -> Self {
        Self { transport, config }
    }

    /// Request a free-form grounded text response
    ///
    /// Sends once with no retry, extraction, or validation. Empty content is
    /// an explicit [`SonarError::EmptyResponse`] rather than an empty string.
    #[instrument(skip(self, messages))]
    pub async fn request_text(
        &self,
        messages: Vec<ChatMessage>,
        options: RequestOptions,
    ) -> SonarResult<String> {
        let request = ChatCompletionRequest {
            model: self.resolve_model(&options, MODEL_REASONING),
            messages,
            temperature: options.temperature,
            max_tokens: options.max_tokens,
            search_recency_filter: options.search_recency,
            return_citations: false,
        };

        let response = self.transport.chat(&request).await?;
        first_content(&response)
    }

    /// Request a response conforming to the JSON schema of `T`
    ///
    /// Prepends a strict schema instruction, classifies narration-only
    /// replies as incomplete (retrying up to 2 times with a fixed 1 s
    /// delay), recovers a JSON object from the reply text, and validates it
    /// against `T`.
    #[instrument(skip(self, messages))]
    pub async fn request_structured<T>(
        &self,
        messages: Vec<ChatMessage>,
        options: RequestOptions,
    ) -> SonarResult<T>
    where
        T: DeserializeOwned + JsonSchema,
    {
        let schema = schemars::schema_for!(T);
        let schema_str = serde_json::to_string_pretty(&schema)
            .map_err(|e| SonarError::internal(format!("Failed to render schema: {}", e)))?;

        let mut full_messages = Vec::with_capacity(messages.len() + 1);
        full_messages.push(ChatMessage::system(schema_instruction(&schema_str)));
        full_messages.extend(messages);

        let request = ChatCompletionRequest {
            model: self.resolve_model(&options, MODEL_DIRECT),
            messages: full_messages,
            temperature: options.temperature,
            max_tokens: options.max_tokens,
            search_recency_filter: options.search_recency,
            return_citations: false,
        };

        let mut attempt = 1u32;
        let content = loop {
            let response = self.transport.chat(&request).await?;
            let content = first_content(&response)?;

            if !is_incomplete(&content) {
                break content;
            }
            if attempt > MAX_RETRIES {
                return Err(SonarError::IncompleteResponse { attempts: attempt });
            }
            warn!(
                attempt,
                "Sonar returned action narration without an answer, retrying"
            );
            tokio::time::sleep(RETRY_DELAY).await;
            attempt += 1;
        };

        debug!(len = content.len(), "Extracting JSON from Sonar response");

        let json_str = extract_json(&content).ok_or_else(|| SonarError::Extraction {
            snippet: truncate(&content, RAW_SNIPPET_LEN),
        })?;

        // The extractor already verified parseability, but re-parse failures
        // must still surface as a typed error rather than a panic.
        let value: serde_json::Value =
            serde_json::from_str(&json_str).map_err(SonarError::MalformedJson)?;

        serde_json::from_value::<T>(value.clone()).map_err(|e| SonarError::SchemaValidation {
            message: e.to_string(),
            value,
        })
    }

    fn resolve_model(&self, options: &RequestOptions, mode_default: &str) -> String {
        options
            .model
            .clone()
            .or_else(|| self.config.model.clone())
            .unwrap_or_else(|| mode_default.to_string())
    }
}

/// Content of the first choice, or [`SonarError::EmptyResponse`]
fn first_content(response: &ChatCompletionResponse) -> SonarResult<String> {
    let content = response
        .choices
        .first()
        .map(|choice| choice.message.content.as_str())
        .unwrap_or("");

    if content.trim().is_empty() {
        return Err(SonarError::EmptyResponse);
    }
    Ok(content.to_string())
}

/// A reply is incomplete when it is pure tool-use narration: it contains a
/// known narration indicator and no `{` anywhere. Narration followed by an
/// embedded object is left for extraction to handle.
fn is_incomplete(content: &str) -> bool {
    if content.contains('{') {
        return false;
    }
    let lower = content.to_lowercase();
    INCOMPLETE_INDICATORS
        .iter()
        .any(|indicator| lower.contains(indicator))
}

fn schema_instruction(schema_str: &str) -> String {
    format!(
        "You are a JSON generation assistant. Your ONLY task is to output valid JSON.\n\n\
         CRITICAL INSTRUCTIONS:\n\
         1. Output ONLY a valid JSON object - no explanations, no markdown, no code blocks\n\
         2. Do NOT include any thinking, reasoning, or analysis text\n\
         3. Do NOT use headers, tables, or bullet points\n\
         4. Start your response directly with the opening brace {{ and end with the closing brace }}\n\
         5. The JSON must conform to this schema:\n\n{}",
        schema_str
    )
}

fn truncate(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_narration_without_braces_is_incomplete() {
        assert!(is_incomplete("Let me search for that information"));
        assert!(is_incomplete("I'll search the latest polls now."));
        assert!(is_incomplete("Searching for current standings"));
    }

    #[test]
    fn test_narration_with_embedded_object_is_not_incomplete() {
        assert!(!is_incomplete(
            "Let me search for that. {\"price\": 42.5}"
        ));
    }

    #[test]
    fn test_plain_answer_is_not_incomplete() {
        assert!(!is_incomplete("The current price is $42.50"));
    }

    #[test]
    fn test_incompleteness_is_case_insensitive() {
        assert!(is_incomplete("LET ME SEARCH for it"));
    }

    #[test]
    fn test_schema_instruction_embeds_schema_verbatim() {
        let instruction = schema_instruction("{\"type\": \"object\"}");
        assert!(instruction.contains("{\"type\": \"object\"}"));
        assert!(instruction.contains("opening brace {"));
        assert!(instruction.contains("no markdown"));
    }

    #[test]
    fn test_first_content_empty_cases() {
        let no_choices = ChatCompletionResponse {
            choices: vec![],
            citations: vec![],
        };
        assert!(matches!(
            first_content(&no_choices),
            Err(SonarError::EmptyResponse)
        ));

        let blank: ChatCompletionResponse = serde_json::from_str(
            r#"{"choices": [{"message": {"content": "   "}}]}"#,
        )
        .unwrap();
        assert!(matches!(
            first_content(&blank),
            Err(SonarError::EmptyResponse)
        ));
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        assert_eq!(truncate("héllo", 2), "hé");
        assert_eq!(truncate("ab", 10), "ab");
    }
}
