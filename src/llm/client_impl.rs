use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

use super::client::{Completion, LlmClient, Prompt, TokenUsage};
use crate::config::{ReasoningEffort, Verbosity};
use crate::util::SecretString;

pub const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
pub const OPENROUTER_BASE_URL: &str = "https://openrouter.ai/api/v1";
pub const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

fn build_http_client(timeout_secs: u64) -> Result<Client> {
    Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .context("failed to build HTTP client")
}

fn png_data_url(image_base64: &str) -> String {
    format!("data:image/png;base64,{}", image_base64)
}

// ============================================================================
// OpenAI Responses API
// ============================================================================

const RESPONSES_USER_TEXT: &str = "Follow the instructions above.";

pub struct OpenAIResponsesClient {
    api_key: SecretString,
    model: String,
    base_url: String,
    max_tokens: Option<u32>,
    reasoning_effort: ReasoningEffort,
    reasoning_summary: String,
    verbosity: Verbosity,
    client: Client,
}

#[derive(Debug, Serialize)]
struct ResponsesRequest {
    model: String,
    instructions: String,
    input: Vec<ResponsesInputMessage>,
    reasoning: ResponsesReasoning,
    text: ResponsesText,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_output_tokens: Option<u32>,
}

#[derive(Debug, Serialize)]
struct ResponsesInputMessage {
    role: String,
    content: Vec<ResponsesInputPart>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ResponsesInputPart {
    InputText { text: String },
    InputImage { image_url: String },
}

#[derive(Debug, Serialize)]
struct ResponsesReasoning {
    effort: ReasoningEffort,
    summary: String,
}

#[derive(Debug, Serialize)]
struct ResponsesText {
    verbosity: Verbosity,
}

#[derive(Debug, Deserialize)]
struct ResponsesResponse {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    output: Vec<ResponsesOutputItem>,
    #[serde(default)]
    usage: Option<ResponsesUsage>,
}

#[derive(Debug, Deserialize)]
struct ResponsesOutputItem {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    content: Vec<ResponsesOutputContent>,
    #[serde(default)]
    summary: Vec<ResponsesSummary>,
}

#[derive(Debug, Deserialize)]
struct ResponsesOutputContent {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: String,
}

#[derive(Debug, Deserialize)]
struct ResponsesSummary {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Deserialize)]
struct ResponsesUsage {
    #[serde(default)]
    input_tokens: u64,
    #[serde(default)]
    output_tokens: u64,
    #[serde(default)]
    total_tokens: u64,
    #[serde(default)]
    output_tokens_details: Option<ResponsesOutputDetails>,
}

#[derive(Debug, Deserialize)]
struct ResponsesOutputDetails {
    #[serde(default)]
    reasoning_tokens: u64,
}

impl ResponsesResponse {
    fn output_text(&self) -> String {
        self.output
            .iter()
            .filter(|item| item.kind == "message")
            .flat_map(|item| item.content.iter())
            .filter(|c| c.kind == "output_text")
            .map(|c| c.text.as_str())
            .collect::<Vec<_>>()
            .join("")
    }

    fn reasoning_summary(&self) -> Option<String> {
        let parts: Vec<&str> = self
            .output
            .iter()
            .filter(|item| item.kind == "reasoning")
            .flat_map(|item| item.summary.iter())
            .map(|s| s.text.as_str())
            .filter(|t| !t.is_empty())
            .collect();
        if parts.is_empty() {
            None
        } else {
            Some(parts.join("\n\n"))
        }
    }

    fn token_usage(&self) -> TokenUsage {
        self.usage
            .as_ref()
            .map(|u| TokenUsage {
                input_tokens: u.input_tokens,
                output_tokens: u.output_tokens,
                reasoning_tokens: u
                    .output_tokens_details
                    .as_ref()
                    .map(|d| d.reasoning_tokens)
                    .unwrap_or(0),
                total_tokens: u.total_tokens,
            })
            .unwrap_or_default()
    }
}

impl OpenAIResponsesClient {
    pub fn new(
        api_key: String,
        model: String,
        max_tokens: Option<u32>,
        timeout_secs: u64,
    ) -> Result<Self> {
        Ok(Self {
            api_key: api_key.into(),
            model,
            base_url: OPENAI_BASE_URL.to_string(),
            max_tokens,
            reasoning_effort: ReasoningEffort::default(),
            reasoning_summary: "auto".to_string(),
            verbosity: Verbosity::default(),
            client: build_http_client(timeout_secs)?,
        })
    }

    pub fn with_base_url(mut self, base_url: String) -> Self {
        self.base_url = base_url;
        self
    }

    pub fn with_reasoning(mut self, effort: ReasoningEffort, summary: String) -> Self {
        self.reasoning_effort = effort;
        self.reasoning_summary = summary;
        self
    }

    pub fn with_verbosity(mut self, verbosity: Verbosity) -> Self {
        self.verbosity = verbosity;
        self
    }

    /// The composed document travels as `instructions`; the user turn only
    /// carries the screenshots.
    fn build_request(&self, prompt: &Prompt) -> ResponsesRequest {
        let mut content = vec![ResponsesInputPart::InputText {
            text: RESPONSES_USER_TEXT.to_string(),
        }];
        content.extend(
            prompt
                .images
                .iter()
                .map(|img| ResponsesInputPart::InputImage {
                    image_url: png_data_url(img),
                }),
        );

        ResponsesRequest {
            model: self.model.clone(),
            instructions: prompt.text.clone(),
            input: vec![ResponsesInputMessage {
                role: "user".to_string(),
                content,
            }],
            reasoning: ResponsesReasoning {
                effort: self.reasoning_effort,
                summary: self.reasoning_summary.clone(),
            },
            text: ResponsesText {
                verbosity: self.verbosity,
            },
            max_output_tokens: self.max_tokens,
        }
    }
}

#[async_trait]
impl LlmClient for OpenAIResponsesClient {
    async fn complete(&self, prompt: &Prompt) -> Result<Completion> {
        let request = self.build_request(prompt);

        debug!(
            "Calling OpenAI Responses API with model: {} (reasoning={}, verbosity={}, images={})",
            self.model,
            self.reasoning_effort,
            self.verbosity,
            prompt.images.len()
        );

        let url = format!("{}/responses", self.base_url);
        let response = self
            .client
            .post(&url)
            .header("authorization", format!("Bearer {}", self.api_key.expose()))
            .header("content-type", "application/json")
            .json(&request)
            .send()
            .await
            .context("Failed to send request to OpenAI API")?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            bail!("OpenAI API error {}: {}", status, error_text);
        }

        let raw: serde_json::Value = response
            .json()
            .await
            .context("Failed to parse OpenAI API response")?;
        let parsed: ResponsesResponse = serde_json::from_value(raw.clone())
            .context("Unexpected OpenAI Responses API payload")?;

        if parsed.status.as_deref() == Some("failed") {
            bail!("OpenAI response finished with status 'failed'");
        }

        let text = parsed.output_text();
        if text.is_empty() {
            bail!("No output text in OpenAI response");
        }

        Ok(Completion {
            usage: parsed.token_usage(),
            reasoning: parsed.reasoning_summary(),
            text,
            raw,
        })
    }

    fn model(&self) -> &str {
        &self.model
    }
}

// ============================================================================
// Chat Completions (OpenRouter and OpenAI-compatible gateways)
// ============================================================================

pub struct ChatCompletionsClient {
    api_key: SecretString,
    model: String,
    base_url: String,
    max_tokens: Option<u32>,
    extra_body: HashMap<String, serde_json::Value>,
    client: Client,
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatRequestMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

#[derive(Debug, Serialize)]
struct ChatRequestMessage {
    role: String,
    content: Vec<ChatContentPart>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ChatContentPart {
    Text { text: String },
    ImageUrl { image_url: ChatImageUrl },
}

#[derive(Debug, Serialize)]
struct ChatImageUrl {
    url: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<ChatUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    reasoning: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
    #[serde(default)]
    total_tokens: u64,
    #[serde(default)]
    completion_tokens_details: Option<ChatCompletionDetails>,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionDetails {
    #[serde(default)]
    reasoning_tokens: u64,
}

impl ChatCompletionsClient {
    pub fn new(
        api_key: String,
        model: String,
        base_url: String,
        max_tokens: Option<u32>,
        timeout_secs: u64,
    ) -> Result<Self> {
        Ok(Self {
            api_key: api_key.into(),
            model,
            base_url,
            max_tokens,
            extra_body: HashMap::new(),
            client: build_http_client(timeout_secs)?,
        })
    }

    /// Extra top-level request fields (e.g. OpenRouter's `reasoning`).
    /// These may override core fields.
    pub fn with_extra_body(mut self, extra_body: HashMap<String, serde_json::Value>) -> Self {
        self.extra_body = extra_body;
        self
    }

    fn build_body(&self, prompt: &Prompt) -> Result<serde_json::Value> {
        let mut content = vec![ChatContentPart::Text {
            text: prompt.text.clone(),
        }];
        content.extend(prompt.images.iter().map(|img| ChatContentPart::ImageUrl {
            image_url: ChatImageUrl {
                url: png_data_url(img),
            },
        }));

        let request = ChatRequest {
            model: self.model.clone(),
            messages: vec![ChatRequestMessage {
                role: "user".to_string(),
                content,
            }],
            max_tokens: self.max_tokens,
        };

        let mut body = serde_json::to_value(&request).context("Failed to serialize request")?;
        if let serde_json::Value::Object(ref mut map) = body {
            for (key, value) in &self.extra_body {
                map.insert(key.clone(), value.clone());
            }
        }
        Ok(body)
    }
}

#[async_trait]
impl LlmClient for ChatCompletionsClient {
    async fn complete(&self, prompt: &Prompt) -> Result<Completion> {
        let body = self.build_body(prompt)?;

        debug!(
            "Calling chat completions API at {} with model: {}",
            self.base_url, self.model
        );

        let url = format!("{}/chat/completions", self.base_url);
        let mut req = self
            .client
            .post(&url)
            .header("content-type", "application/json")
            .json(&body);

        // Local gateways run without a key
        if !self.api_key.is_empty() && !self.api_key.expose().eq_ignore_ascii_case("none") {
            req = req.header("authorization", format!("Bearer {}", self.api_key.expose()));
        }

        let response = req
            .send()
            .await
            .context("Failed to send request to chat completions API")?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            bail!("Chat completions API error {}: {}", status, error_text);
        }

        let raw: serde_json::Value = response
            .json()
            .await
            .context("Failed to parse chat completions response")?;
        let parsed: ChatResponse = serde_json::from_value(raw.clone())
            .context("Unexpected chat completions payload")?;

        let message = &parsed
            .choices
            .first()
            .context("No choices in chat completions response")?
            .message;
        let text = message
            .content
            .clone()
            .filter(|c| !c.is_empty())
            .context("Empty message content in chat completions response")?;

        let usage = parsed
            .usage
            .as_ref()
            .map(|u| TokenUsage {
                input_tokens: u.prompt_tokens,
                output_tokens: u.completion_tokens,
                reasoning_tokens: u
                    .completion_tokens_details
                    .as_ref()
                    .map(|d| d.reasoning_tokens)
                    .unwrap_or(0),
                total_tokens: u.total_tokens,
            })
            .unwrap_or_default();

        Ok(Completion {
            text,
            usage,
            reasoning: message.reasoning.clone(),
            raw,
        })
    }

    fn model(&self) -> &str {
        &self.model
    }
}

// ============================================================================
// Gemini Client (Google Generative AI)
// ============================================================================

pub struct GeminiClient {
    api_key: SecretString,
    model: String,
    base_url: String,
    max_tokens: Option<u32>,
    thinking_budget: Option<u32>,
    client: Client,
}

#[derive(Debug, Serialize)]
struct GeminiRequest {
    contents: Vec<GeminiContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    generation_config: Option<GeminiGenerationConfig>,
}

#[derive(Debug, Serialize)]
struct GeminiGenerationConfig {
    #[serde(rename = "maxOutputTokens", skip_serializing_if = "Option::is_none")]
    max_output_tokens: Option<u32>,
    #[serde(rename = "thinkingConfig", skip_serializing_if = "Option::is_none")]
    thinking_config: Option<GeminiThinkingConfig>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiThinkingConfig {
    thinking_budget: u32,
    include_thoughts: bool,
}

/// Thinking token budget standing in for a reasoning effort level.
pub fn gemini_thinking_budget(effort: ReasoningEffort) -> u32 {
    match effort {
        ReasoningEffort::Minimal => 128,
        ReasoningEffort::Low => 1024,
        ReasoningEffort::Medium => 8192,
        ReasoningEffort::High => 24576,
    }
}

#[derive(Debug, Serialize)]
struct GeminiContent {
    role: String,
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum GeminiPart {
    Text { text: String },
    InlineData { inline_data: GeminiInlineData },
}

#[derive(Debug, Serialize)]
struct GeminiInlineData {
    mime_type: String,
    data: String,
}

#[derive(Debug, Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
    #[serde(default, rename = "usageMetadata")]
    usage_metadata: Option<GeminiUsage>,
}

#[derive(Debug, Deserialize)]
struct GeminiCandidate {
    content: GeminiResponseContent,
}

#[derive(Debug, Deserialize)]
struct GeminiResponseContent {
    #[serde(default)]
    parts: Vec<GeminiResponsePart>,
}

#[derive(Debug, Deserialize)]
struct GeminiResponsePart {
    #[serde(default)]
    text: String,
    #[serde(default)]
    thought: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiUsage {
    #[serde(default)]
    prompt_token_count: u64,
    #[serde(default)]
    candidates_token_count: u64,
    #[serde(default)]
    thoughts_token_count: u64,
    #[serde(default)]
    total_token_count: u64,
}

impl GeminiClient {
    pub fn new(
        api_key: String,
        model: String,
        max_tokens: Option<u32>,
        timeout_secs: u64,
    ) -> Result<Self> {
        Ok(Self {
            api_key: api_key.into(),
            model,
            base_url: GEMINI_BASE_URL.to_string(),
            max_tokens,
            thinking_budget: None,
            client: build_http_client(timeout_secs)?,
        })
    }

    pub fn with_base_url(mut self, base_url: String) -> Self {
        self.base_url = base_url;
        self
    }

    pub fn with_reasoning(mut self, effort: ReasoningEffort) -> Self {
        self.thinking_budget = Some(gemini_thinking_budget(effort));
        self
    }

    fn build_request(&self, prompt: &Prompt) -> GeminiRequest {
        let mut parts = vec![GeminiPart::Text {
            text: prompt.text.clone(),
        }];
        parts.extend(prompt.images.iter().map(|img| GeminiPart::InlineData {
            inline_data: GeminiInlineData {
                mime_type: "image/png".to_string(),
                data: img.clone(),
            },
        }));

        GeminiRequest {
            contents: vec![GeminiContent {
                role: "user".to_string(),
                parts,
            }],
            generation_config: (self.max_tokens.is_some() || self.thinking_budget.is_some())
                .then(|| GeminiGenerationConfig {
                    max_output_tokens: self.max_tokens,
                    thinking_config: self.thinking_budget.map(|budget| GeminiThinkingConfig {
                        thinking_budget: budget,
                        include_thoughts: true,
                    }),
                }),
        }
    }
}

#[async_trait]
impl LlmClient for GeminiClient {
    async fn complete(&self, prompt: &Prompt) -> Result<Completion> {
        let request = self.build_request(prompt);

        debug!("Calling Gemini API with model: {}", self.model);

        let url = format!("{}/models/{}:generateContent", self.base_url, self.model);

        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", self.api_key.expose())
            .header("content-type", "application/json")
            .json(&request)
            .send()
            .await
            .context("Failed to send request to Gemini API")?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            bail!("Gemini API error {}: {}", status, error_text);
        }

        let raw: serde_json::Value = response
            .json()
            .await
            .context("Failed to parse Gemini API response")?;
        let parsed: GeminiResponse =
            serde_json::from_value(raw.clone()).context("Unexpected Gemini payload")?;

        let candidate = parsed
            .candidates
            .first()
            .context("No candidates in Gemini response")?;
        let text: String = candidate
            .content
            .parts
            .iter()
            .filter(|p| !p.thought)
            .map(|p| p.text.as_str())
            .collect();
        if text.is_empty() {
            bail!("No content in Gemini response");
        }
        let thoughts: Vec<&str> = candidate
            .content
            .parts
            .iter()
            .filter(|p| p.thought)
            .map(|p| p.text.as_str())
            .collect();

        let usage = parsed
            .usage_metadata
            .as_ref()
            .map(|u| TokenUsage {
                input_tokens: u.prompt_token_count,
                output_tokens: u.candidates_token_count + u.thoughts_token_count,
                reasoning_tokens: u.thoughts_token_count,
                total_tokens: u.total_token_count,
            })
            .unwrap_or_default();

        Ok(Completion {
            text,
            usage,
            reasoning: (!thoughts.is_empty()).then(|| thoughts.join("\n\n")),
            raw,
        })
    }

    fn model(&self) -> &str {
        &self.model
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn prompt_with_image() -> Prompt {
        Prompt::text("convert this model").with_images(vec!["iVBORw0KGgo=".to_string()])
    }

    #[test]
    fn test_responses_client_creation() {
        let client = OpenAIResponsesClient::new(
            "test_key".to_string(),
            "gpt-5-mini-2025-08-07".to_string(),
            None,
            120,
        )
        .unwrap();
        assert_eq!(client.api_key.expose(), "test_key");
        assert_eq!(client.base_url, OPENAI_BASE_URL);
        assert_eq!(client.model(), "gpt-5-mini-2025-08-07");
    }

    #[test]
    fn test_responses_request_structure() {
        let client = OpenAIResponsesClient::new("k".into(), "gpt-5".into(), Some(2048), 120)
            .unwrap()
            .with_reasoning(ReasoningEffort::High, "auto".to_string())
            .with_verbosity(Verbosity::Low);
        let json = serde_json::to_value(client.build_request(&prompt_with_image())).unwrap();

        assert_eq!(json["model"], "gpt-5");
        assert_eq!(json["reasoning"]["effort"], "high");
        assert_eq!(json["reasoning"]["summary"], "auto");
        assert_eq!(json["text"]["verbosity"], "low");
        assert_eq!(json["max_output_tokens"], 2048);
        assert_eq!(json["input"][0]["role"], "user");
        assert_eq!(json["input"][0]["content"][0]["type"], "input_text");
        assert_eq!(json["instructions"], "convert this model");
        assert_eq!(json["input"][0]["content"][0]["text"], RESPONSES_USER_TEXT);
        assert_eq!(json["input"][0]["content"][1]["type"], "input_image");
        assert_eq!(
            json["input"][0]["content"][1]["image_url"],
            "data:image/png;base64,iVBORw0KGgo="
        );
    }

    #[test]
    fn test_responses_request_omits_max_tokens_when_unset() {
        let client =
            OpenAIResponsesClient::new("k".into(), "gpt-5".into(), None, 120).unwrap();
        let json = serde_json::to_value(client.build_request(&Prompt::text("x"))).unwrap();
        assert!(json.get("max_output_tokens").is_none());
    }

    #[test]
    fn test_responses_response_parsing() {
        let json = r#"{
            "status": "completed",
            "output": [
                {"type": "reasoning", "summary": [{"type": "summary_text", "text": "Thinking about actors"}]},
                {"type": "message", "content": [
                    {"type": "output_text", "text": "Hello, "},
                    {"type": "output_text", "text": "world!"}
                ]}
            ],
            "usage": {
                "input_tokens": 1200,
                "output_tokens": 800,
                "total_tokens": 2000,
                "output_tokens_details": {"reasoning_tokens": 300}
            }
        }"#;

        let response: ResponsesResponse = serde_json::from_str(json).unwrap();
        assert_eq!(response.output_text(), "Hello, world!");
        assert_eq!(
            response.reasoning_summary().as_deref(),
            Some("Thinking about actors")
        );
        let usage = response.token_usage();
        assert_eq!(usage.input_tokens, 1200);
        assert_eq!(usage.reasoning_tokens, 300);
        assert_eq!(usage.visible_output_tokens(), 500);
    }

    #[test]
    fn test_responses_response_without_usage() {
        let json = r#"{"output": []}"#;
        let response: ResponsesResponse = serde_json::from_str(json).unwrap();
        assert!(response.output_text().is_empty());
        assert!(response.reasoning_summary().is_none());
        assert_eq!(response.token_usage(), TokenUsage::default());
    }

    #[test]
    fn test_chat_body_with_images_and_extra_body() {
        let mut extra = HashMap::new();
        extra.insert(
            "reasoning".to_string(),
            serde_json::json!({"effort": "high"}),
        );
        let client = ChatCompletionsClient::new(
            "key".into(),
            "mistral-reasoning-latest".into(),
            OPENROUTER_BASE_URL.into(),
            None,
            120,
        )
        .unwrap()
        .with_extra_body(extra);

        let body = client.build_body(&prompt_with_image()).unwrap();
        assert_eq!(body["model"], "mistral-reasoning-latest");
        assert_eq!(body["reasoning"]["effort"], "high");
        assert_eq!(body["messages"][0]["content"][0]["type"], "text");
        assert_eq!(body["messages"][0]["content"][1]["type"], "image_url");
        assert_eq!(
            body["messages"][0]["content"][1]["image_url"]["url"],
            "data:image/png;base64,iVBORw0KGgo="
        );
        assert!(body.get("max_tokens").is_none());
    }

    #[test]
    fn test_chat_response_parsing() {
        let json = r#"{
            "choices": [{"message": {"role": "assistant", "content": "Hi", "reasoning": "short"}}],
            "usage": {"prompt_tokens": 10, "completion_tokens": 4, "total_tokens": 14}
        }"#;
        let response: ChatResponse = serde_json::from_str(json).unwrap();
        assert_eq!(response.choices[0].message.content.as_deref(), Some("Hi"));
        assert_eq!(response.choices[0].message.reasoning.as_deref(), Some("short"));
        assert_eq!(response.usage.unwrap().total_tokens, 14);
    }

    #[test]
    fn test_gemini_request_structure() {
        let client =
            GeminiClient::new("k".into(), "gemini-2.5-pro".into(), Some(8192), 120).unwrap();
        let json = serde_json::to_value(client.build_request(&prompt_with_image())).unwrap();
        assert_eq!(json["contents"][0]["parts"][0]["text"], "convert this model");
        assert_eq!(
            json["contents"][0]["parts"][1]["inline_data"]["mime_type"],
            "image/png"
        );
        assert_eq!(json["generation_config"]["maxOutputTokens"], 8192);
        assert!(json["generation_config"].get("thinkingConfig").is_none());
    }

    #[test]
    fn test_gemini_request_carries_thinking_budget() {
        let client = GeminiClient::new("k".into(), "gemini-2.5-pro".into(), None, 120)
            .unwrap()
            .with_reasoning(ReasoningEffort::High);
        let json = serde_json::to_value(client.build_request(&prompt_with_image())).unwrap();
        let config = &json["generation_config"];
        assert!(config.get("maxOutputTokens").is_none());
        assert_eq!(config["thinkingConfig"]["thinkingBudget"], 24576);
        assert_eq!(config["thinkingConfig"]["includeThoughts"], true);
    }

    #[test]
    fn test_gemini_request_without_settings_has_no_generation_config() {
        let client = GeminiClient::new("k".into(), "gemini-2.5-pro".into(), None, 120).unwrap();
        let json = serde_json::to_value(client.build_request(&prompt_with_image())).unwrap();
        assert!(json.get("generation_config").is_none());
    }

    #[test]
    fn test_gemini_response_parsing_skips_thoughts() {
        let json = r#"{
            "candidates": [{"content": {"parts": [
                {"text": "planning", "thought": true},
                {"text": "@startuml\n@enduml"}
            ]}}],
            "usageMetadata": {"promptTokenCount": 50, "candidatesTokenCount": 20, "thoughtsTokenCount": 7, "totalTokenCount": 77}
        }"#;
        let response: GeminiResponse = serde_json::from_str(json).unwrap();
        let visible: Vec<&str> = response.candidates[0]
            .content
            .parts
            .iter()
            .filter(|p| !p.thought)
            .map(|p| p.text.as_str())
            .collect();
        assert_eq!(visible, vec!["@startuml\n@enduml"]);
        let usage = response.usage_metadata.unwrap();
        assert_eq!(usage.thoughts_token_count, 7);
        assert_eq!(usage.total_token_count, 77);
    }

    #[test]
    fn test_gemini_response_empty_candidates() {
        let json = r#"{"candidates": []}"#;
        let response: GeminiResponse = serde_json::from_str(json).unwrap();
        assert!(response.candidates.is_empty());
    }
}
