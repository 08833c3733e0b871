//! HTTP adapter for an OpenAI-compatible chat-completions API

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use super::prompt_builder::PromptBuilder;
use super::{Generation, GenerationFailed, GenerationRequest, LanguageModel};

#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<ChatMessage>,
    max_tokens: u32,
    temperature: f32,
    stream: bool,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    model: Option<String>,
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: Option<ChatMessage>,
}

#[derive(Debug, Deserialize, Default)]
struct Usage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
    #[serde(default)]
    total_tokens: u32,
}

#[derive(Debug, Clone)]
pub struct LlmGatewayConfig {
    pub api_url: String,
    pub api_key: String,
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub request_timeout: Duration,
}

pub struct LlmGateway {
    config: LlmGatewayConfig,
    http_client: reqwest::Client,
    prompts: PromptBuilder,
}

impl LlmGateway {
    pub fn new(config: LlmGatewayConfig) -> Self {
        info!("LLM gateway initialized with backend: {} (model {})", config.api_url, config.model);
        let http_client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .unwrap_or_default();
        Self {
            config,
            http_client,
            prompts: PromptBuilder::default(),
        }
    }

    fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.config.api_url.trim_end_matches('/'))
    }

    fn build_messages(system_prompt: &str, request: &GenerationRequest) -> Vec<ChatMessage> {
        let mut messages = Vec::with_capacity(request.history.len() + 2);
        messages.push(ChatMessage {
            role: "system".to_string(),
            content: system_prompt.to_string(),
        });
        messages.extend(request.history.iter().map(|(role, text)| ChatMessage {
            role: role.as_str().to_string(),
            content: text.clone(),
        }));
        messages.push(ChatMessage {
            role: "user".to_string(),
            content: request.user_text.clone(),
        });
        messages
    }
}

#[async_trait]
impl LanguageModel for LlmGateway {
    fn model_name(&self) -> &str {
        &self.config.model
    }

    async fn generate(&self, request: GenerationRequest) -> Result<Generation, GenerationFailed> {
        let system_prompt = self.prompts.build_system_prompt(&request.store_name, &request.context);
        let body = ChatCompletionRequest {
            model: self.config.model.clone(),
            messages: Self::build_messages(&system_prompt, &request),
            max_tokens: self.config.max_tokens,
            temperature: self.config.temperature,
            stream: false,
        };
        let prompt = serde_json::to_string(&body.messages)
            .map_err(|e| GenerationFailed::new(format!("Failed to encode prompt: {}", e)))?;
        debug!(
            "Requesting completion with {} history turns and {} products in context",
            request.history.len(),
            request.context.products.len()
        );

        let started = Instant::now();
        let response = self.http_client
            .post(self.completions_url())
            .bearer_auth(&self.config.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| GenerationFailed::new(format!("LLM request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            warn!("LLM backend returned {}: {}", status, body);
            return Err(GenerationFailed::new(format!("LLM backend returned {}", status)));
        }

        let completion: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| GenerationFailed::new(format!("Failed to parse LLM response: {}", e)))?;
        let latency_ms = started.elapsed().as_millis() as u64;

        let content = completion.choices
            .first()
            .and_then(|c| c.message.as_ref())
            .map(|m| m.content.trim().to_string())
            .filter(|c| !c.is_empty())
            .ok_or_else(|| GenerationFailed::new("LLM response contained no reply"))?;

        let usage = completion.usage.unwrap_or_default();
        Ok(Generation {
            content,
            prompt_tokens: usage.prompt_tokens,
            completion_tokens: usage.completion_tokens,
            total_tokens: usage.total_tokens,
            latency_ms,
            model: completion.model.unwrap_or_else(|| self.config.model.clone()),
            prompt,
        })
    }
}
