use anyhow::Result;
use std::collections::HashMap;
use tracing::debug;

use super::client::{LlmClient, MockLlmClient};
use super::client_impl::{
    ChatCompletionsClient, GeminiClient, OpenAIResponsesClient, OPENROUTER_BASE_URL,
};
use crate::config::{Config, LlmConfig, Provider};

const OPENAI_COMPATIBLE_DEFAULT_URL: &str = "http://localhost:11434/v1";

/// Create an LLM client for the configured model.
pub fn create_client(config: &Config, dry_run: bool) -> Result<Box<dyn LlmClient>> {
    create_client_from_llm_config(&config.llm, dry_run)
}

pub fn create_client_from_llm_config(
    llm_config: &LlmConfig,
    dry_run: bool,
) -> Result<Box<dyn LlmClient>> {
    if dry_run {
        return Ok(Box::new(MockLlmClient::new()));
    }

    let api_key = llm_config.api_key()?;
    let model = llm_config.model.clone();
    let max_tokens = llm_config.max_tokens;
    let timeout = llm_config.timeout_secs;

    match llm_config.resolved_provider() {
        Provider::OpenAI => {
            let mut client = OpenAIResponsesClient::new(api_key, model, max_tokens, timeout)?
                .with_reasoning(
                    llm_config.reasoning_effort,
                    llm_config.reasoning_summary.clone(),
                )
                .with_verbosity(llm_config.verbosity);
            if let Some(base_url) = &llm_config.base_url {
                client = client.with_base_url(base_url.clone());
            }
            Ok(Box::new(client))
        }

        Provider::Gemini => {
            debug!(
                "Gemini has no verbosity setting; ignoring verbosity = {}",
                llm_config.verbosity
            );
            let mut client = GeminiClient::new(api_key, model, max_tokens, timeout)?
                .with_reasoning(llm_config.reasoning_effort);
            if let Some(base_url) = &llm_config.base_url {
                client = client.with_base_url(base_url.clone());
            }
            Ok(Box::new(client))
        }

        Provider::OpenRouter => {
            let base_url = llm_config
                .base_url
                .clone()
                .unwrap_or_else(|| OPENROUTER_BASE_URL.to_string());
            Ok(Box::new(
                ChatCompletionsClient::new(api_key, model, base_url, max_tokens, timeout)?
                    .with_extra_body(openrouter_extra_body(llm_config)),
            ))
        }

        Provider::OpenAICompatible => {
            let base_url = llm_config
                .base_url
                .clone()
                .unwrap_or_else(|| OPENAI_COMPATIBLE_DEFAULT_URL.to_string());
            debug!(
                "openai-compatible gateway: reasoning_effort = {} and verbosity = {} are not sent",
                llm_config.reasoning_effort, llm_config.verbosity
            );
            Ok(Box::new(ChatCompletionsClient::new(
                api_key, model, base_url, max_tokens, timeout,
            )?))
        }
    }
}

/// OpenRouter request fields for reasoning effort and verbosity.
fn openrouter_extra_body(llm_config: &LlmConfig) -> HashMap<String, serde_json::Value> {
    let mut extra = HashMap::new();
    extra.insert(
        "reasoning".to_string(),
        serde_json::json!({ "effort": llm_config.reasoning_effort.as_str() }),
    );
    extra.insert(
        "verbosity".to_string(),
        serde_json::Value::from(llm_config.verbosity.as_str()),
    );
    extra
}
