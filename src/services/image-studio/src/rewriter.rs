//! Prompt rewriting against a text-generation capability.
//!
//! The rewriter fills a role-specific template with the caller's instruction
//! and asks a language model backend to elaborate it. Backends are reached
//! over HTTP and hidden behind the [`TextGeneration`] trait so the pipeline
//! can be exercised with test doubles.

use crate::config::RewriterConfig;
use crate::error::{generation_failed, AppError, ErrorContext, Result};
use crate::extract::{extract_improved_prompt, CLOSING_TAG, OPENING_TAG};

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use atelier_shared::PromptRole;
use reqwest::{Client, RequestBuilder};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, warn};

/// One completion call against a text-generation backend.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub system: Option<String>,
    pub prompt: String,
    pub max_tokens: u32,
    pub temperature: f32,
}

/// Narrow contract for the text-generation capability.
#[async_trait]
pub trait TextGeneration: Send + Sync {
    /// Return a single text completion for the request.
    async fn complete(&self, request: &CompletionRequest) -> Result<String>;

    /// Cheap reachability probe.
    async fn health(&self) -> Result<()>;

    fn model_name(&self) -> &str;
}

// ============================================================================
// Rewrite templates
// ============================================================================

/// Fixed textual scaffold for one rewrite role: system framing, a one-shot
/// example, and a prefix for the caller's instruction. Built once at startup.
#[derive(Debug, Clone)]
pub struct RewriteTemplate {
    system: String,
    user_prefix: &'static str,
}

/// A template with the caller's instruction substituted in.
#[derive(Debug, Clone)]
pub struct FilledTemplate {
    pub system: String,
    pub user: String,
}

impl RewriteTemplate {
    pub fn generation() -> Self {
        let system = format!(
            "You are an expert prompt engineer for AI image generation. Rewrite the \
             user's prompt into a single, detailed, high-quality image generation \
             prompt. Add concrete details about subject, style, lighting, and \
             composition. Output the improved prompt inside {open} and {close} tags. \
             Output only ONE improved prompt and nothing else.\n\n\
             Here is an example:\n\
             User prompt: a dog in a park\n\
             {open}A photorealistic golden retriever sitting on fresh-cut grass in a \
             sunlit city park, shallow depth of field, golden hour lighting, highly \
             detailed fur, shot on an 85mm lens{close}",
            open = OPENING_TAG,
            close = CLOSING_TAG,
        );
        Self {
            system,
            user_prefix: "User prompt: ",
        }
    }

    pub fn editing() -> Self {
        let system = format!(
            "You are an expert prompt engineer for AI image editing. Rewrite the \
             user's edit instruction into a single, clear, actionable instruction \
             for an image-to-image model. Keep it terse and concrete. Output the \
             improved instruction inside {open} and {close} tags. Output only ONE \
             improved instruction and nothing else.\n\n\
             Here is an example:\n\
             Edit instruction: make it look like a watercolor painting\n\
             {open}Convert the image into a soft watercolor painting with visible \
             paper texture, delicate brush strokes, and muted pastel washes{close}",
            open = OPENING_TAG,
            close = CLOSING_TAG,
        );
        Self {
            system,
            user_prefix: "Edit instruction: ",
        }
    }

    pub fn fill(&self, instruction: &str) -> FilledTemplate {
        FilledTemplate {
            system: self.system.clone(),
            user: format!("{}{}", self.user_prefix, instruction),
        }
    }
}

// ============================================================================
// HTTP client for text-generation backends
// ============================================================================

#[derive(Clone)]
pub enum RewriterProvider {
    LlamaCpp,
    Ollama,
    OpenAi,
}

/// HTTP client speaking the wire protocol of the configured backend.
#[derive(Clone)]
pub struct LlmClient {
    client: Client,
    config: RewriterConfig,
    provider: RewriterProvider,
}

#[derive(Debug, Deserialize)]
struct LlamaCppCompletion {
    content: String,
}

#[derive(Debug, Deserialize)]
struct OllamaCompletion {
    response: String,
}

#[derive(Debug, Deserialize)]
struct ChatCompletion {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: Option<String>,
}

impl LlmClient {
    pub fn new(config: &RewriterConfig) -> Result<Self> {
        let provider = match config.provider.as_str() {
            "llamacpp" => RewriterProvider::LlamaCpp,
            "ollama" => RewriterProvider::Ollama,
            "openai" => RewriterProvider::OpenAi,
            _ => {
                return Err(AppError::ConfigurationError(format!(
                    "Unsupported rewriter provider: {}",
                    config.provider
                )))
            }
        };

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .map_err(|e| {
                AppError::InternalServerError(format!("Failed to create HTTP client: {}", e))
            })?;

        Ok(Self {
            client,
            config: config.clone(),
            provider,
        })
    }

    /// Bounded retry with exponential backoff. The request is never mutated
    /// between attempts.
    async fn send_request(&self, request: &CompletionRequest) -> Result<String> {
        let mut attempts = 0;
        let max_retries = self.config.max_retries;

        while attempts <= max_retries {
            match self.send_request_once(request).await {
                Ok(text) => return Ok(text),
                Err(e) if attempts < max_retries && e.is_retryable() => {
                    attempts += 1;
                    let delay = Duration::from_millis(1000 * (2_u64.pow(attempts - 1)));
                    warn!(
                        "Rewriter request failed (attempt {}/{}), retrying in {:?}: {:?}",
                        attempts,
                        max_retries + 1,
                        delay,
                        e
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }

        Err(AppError::InternalServerError(
            "Maximum retry attempts exceeded".to_string(),
        ))
    }

    async fn send_request_once(&self, request: &CompletionRequest) -> Result<String> {
        let req_builder = match &self.provider {
            RewriterProvider::LlamaCpp => self.build_llamacpp_request(request),
            RewriterProvider::Ollama => self.build_ollama_request(request),
            RewriterProvider::OpenAi => self.build_openai_request(request),
        };

        let response = req_builder.send().await?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(AppError::GenerationFailed(format!(
                "Rewriter backend returned error {}: {}",
                status, error_text
            )));
        }

        match &self.provider {
            RewriterProvider::LlamaCpp => {
                let completion: LlamaCppCompletion = response.json().await?;
                Ok(completion.content)
            }
            RewriterProvider::Ollama => {
                let completion: OllamaCompletion = response.json().await?;
                Ok(completion.response)
            }
            RewriterProvider::OpenAi => {
                let completion: ChatCompletion = response.json().await?;
                completion
                    .choices
                    .into_iter()
                    .next()
                    .and_then(|choice| choice.message.content)
                    .ok_or_else(|| {
                        AppError::GenerationFailed(
                            "Rewriter backend returned no completion choices".to_string(),
                        )
                    })
            }
        }
    }

    fn build_llamacpp_request(&self, request: &CompletionRequest) -> RequestBuilder {
        // llama.cpp server takes a single prompt string
        let prompt = match &request.system {
            Some(system) => format!("{}\n\n{}", system, request.prompt),
            None => request.prompt.clone(),
        };

        let body = json!({
            "prompt": prompt,
            "n_predict": request.max_tokens,
            "temperature": request.temperature,
            "stream": false,
        });

        self.client
            .post(format!("{}/completion", self.config.base_url))
            .header("Content-Type", "application/json")
            .json(&body)
    }

    fn build_ollama_request(&self, request: &CompletionRequest) -> RequestBuilder {
        let mut body = json!({
            "model": self.config.model,
            "prompt": request.prompt,
            "options": {
                "temperature": request.temperature,
                "num_predict": request.max_tokens,
            },
            "stream": false,
        });

        if let Some(system) = &request.system {
            body["system"] = json!(system);
        }

        self.client
            .post(format!("{}/api/generate", self.config.base_url))
            .header("Content-Type", "application/json")
            .json(&body)
    }

    fn build_openai_request(&self, request: &CompletionRequest) -> RequestBuilder {
        let mut messages = Vec::new();
        if let Some(system) = &request.system {
            messages.push(json!({"role": "system", "content": system}));
        }
        messages.push(json!({"role": "user", "content": request.prompt}));

        let body = json!({
            "model": self.config.model,
            "messages": messages,
            "temperature": request.temperature,
            "max_tokens": request.max_tokens,
        });

        let mut builder = self
            .client
            .post(format!("{}/v1/chat/completions", self.config.base_url))
            .header("Content-Type", "application/json");

        if let Some(api_key) = &self.config.api_key {
            builder = builder.header("Authorization", format!("Bearer {}", api_key));
        }

        builder.json(&body)
    }
}

#[async_trait]
impl TextGeneration for LlmClient {
    async fn complete(&self, request: &CompletionRequest) -> Result<String> {
        self.send_request(request).await
    }

    async fn health(&self) -> Result<()> {
        let url = match &self.provider {
            RewriterProvider::LlamaCpp => format!("{}/health", self.config.base_url),
            RewriterProvider::Ollama => format!("{}/api/tags", self.config.base_url),
            RewriterProvider::OpenAi => format!("{}/v1/models", self.config.base_url),
        };

        let mut builder = self.client.get(url);
        if let Some(api_key) = &self.config.api_key {
            builder = builder.header("Authorization", format!("Bearer {}", api_key));
        }

        builder.send().await?.error_for_status()?;
        Ok(())
    }

    fn model_name(&self) -> &str {
        &self.config.model
    }
}

// ============================================================================
// Text rewriter
// ============================================================================

/// Result of one rewrite: the extracted prompt plus the raw model response
/// kept for caller transparency.
#[derive(Debug, Clone)]
pub struct RewriteOutcome {
    pub rewritten: String,
    pub raw_response: String,
    pub role: PromptRole,
}

/// Fills role templates and drives the text-generation capability.
pub struct TextRewriter {
    backend: Arc<dyn TextGeneration>,
    generation_template: RewriteTemplate,
    editing_template: RewriteTemplate,
    temperature: f32,
    generation_max_tokens: u32,
    editing_max_tokens: u32,
}

impl TextRewriter {
    pub fn new(backend: Arc<dyn TextGeneration>, config: &RewriterConfig) -> Self {
        Self {
            backend,
            generation_template: RewriteTemplate::generation(),
            editing_template: RewriteTemplate::editing(),
            temperature: config.temperature,
            generation_max_tokens: config.generation_max_tokens,
            editing_max_tokens: config.editing_max_tokens,
        }
    }

    pub fn template_for(&self, role: PromptRole) -> &RewriteTemplate {
        match role {
            PromptRole::Generation => &self.generation_template,
            PromptRole::Editing => &self.editing_template,
        }
    }

    pub fn model_name(&self) -> &str {
        self.backend.model_name()
    }

    pub async fn backend_health(&self) -> Result<()> {
        self.backend.health().await
    }

    /// Rewrite an already-validated instruction for the given role.
    ///
    /// An empty result after extraction is a failed generation: downstream
    /// image capabilities must never see an empty prompt.
    pub async fn rewrite(&self, instruction: &str, role: PromptRole) -> Result<RewriteOutcome> {
        let filled = self.template_for(role).fill(instruction);
        let max_tokens = match role {
            PromptRole::Generation => self.generation_max_tokens,
            PromptRole::Editing => self.editing_max_tokens,
        };

        debug!(role = %role, max_tokens, "Requesting prompt rewrite");

        let raw_response = self
            .backend
            .complete(&CompletionRequest {
                system: Some(filled.system),
                prompt: filled.user,
                max_tokens,
                temperature: self.temperature,
            })
            .await
            .with_context("Prompt rewrite failed")?;

        let rewritten = extract_improved_prompt(&raw_response).to_string();
        if rewritten.is_empty() {
            return generation_failed("Rewriter produced an empty prompt");
        }

        debug!(role = %role, rewritten = %rewritten, "Prompt rewrite complete");

        Ok(RewriteOutcome {
            rewritten,
            raw_response,
            role,
        })
    }
}
