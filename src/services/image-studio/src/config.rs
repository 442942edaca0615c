use crate::error::{AppError, Result};

use std::env;

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub environment: String,
    pub log_level: String,
    pub request_timeout_seconds: u64,
    pub rewriter: RewriterConfig,
    pub diffusion: DiffusionConfig,
    pub pipeline: PipelineConfig,
}

/// Settings for the text-generation capability performing prompt rewrites.
#[derive(Debug, Clone)]
pub struct RewriterConfig {
    pub provider: String,
    pub base_url: String,
    pub api_key: Option<String>,
    pub model: String,
    pub temperature: f32,
    pub generation_max_tokens: u32,
    pub editing_max_tokens: u32,
    pub timeout_seconds: u64,
    pub max_retries: u32,
}

/// Settings for the diffusion capability performing synthesis and edits.
#[derive(Debug, Clone)]
pub struct DiffusionConfig {
    pub base_url: String,
    pub negative_prompt: String,
    pub steps: u32,
    pub guidance_scale: f32,
    pub edit_strength: f32,
    pub edit_guidance_scale: f32,
    pub width: u32,
    pub height: u32,
    pub timeout_seconds: u64,
}

/// Orchestration policy knobs.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub fallback_to_raw_on_rewrite_failure: bool,
    pub max_instruction_chars: usize,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let environment = env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string());

        // Load environment-specific defaults
        let (default_host, default_port, default_log_level) = match environment.as_str() {
            "production" => ("0.0.0.0", 8087, "info"),
            "staging" => ("0.0.0.0", 8087, "debug"),
            _ => ("127.0.0.1", 8087, "debug"),
        };

        Ok(Config {
            host: env::var("IMAGE_STUDIO_HOST").unwrap_or_else(|_| default_host.to_string()),
            port: env::var("IMAGE_STUDIO_PORT")
                .unwrap_or_else(|_| default_port.to_string())
                .parse()
                .map_err(|e| AppError::ConfigurationError(format!("Invalid port: {}", e)))?,
            environment,
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| default_log_level.to_string()),
            request_timeout_seconds: env::var("REQUEST_TIMEOUT_SECONDS")
                .unwrap_or_else(|_| "300".to_string())
                .parse()
                .map_err(|e| {
                    AppError::ConfigurationError(format!("Invalid request_timeout_seconds: {}", e))
                })?,
            rewriter: RewriterConfig::from_env()?,
            diffusion: DiffusionConfig::from_env()?,
            pipeline: PipelineConfig::from_env()?,
        })
    }

    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }

    pub fn is_development(&self) -> bool {
        self.environment == "development"
    }

    pub fn validate(&self) -> Result<()> {
        if self.host.is_empty() {
            return Err(AppError::ConfigurationError(
                "Host cannot be empty".to_string(),
            ));
        }

        if self.port == 0 {
            return Err(AppError::ConfigurationError(format!(
                "Invalid port: {}",
                self.port
            )));
        }

        self.rewriter.validate()?;
        self.diffusion.validate()?;
        self.pipeline.validate()?;

        Ok(())
    }
}

impl RewriterConfig {
    pub fn from_env() -> Result<Self> {
        let provider = env::var("REWRITER_PROVIDER").unwrap_or_else(|_| "llamacpp".to_string());

        let (default_base_url, default_model) = match provider.as_str() {
            "llamacpp" => ("http://127.0.0.1:8080", "local-gguf"),
            "ollama" => ("http://127.0.0.1:11434", "llama3"),
            "openai" => ("https://api.openai.com", "gpt-4o-mini"),
            _ => {
                return Err(AppError::ConfigurationError(format!(
                    "Unsupported rewriter provider: {}",
                    provider
                )))
            }
        };

        Ok(RewriterConfig {
            provider,
            base_url: env::var("REWRITER_BASE_URL")
                .unwrap_or_else(|_| default_base_url.to_string()),
            api_key: env::var("REWRITER_API_KEY").ok(),
            model: env::var("REWRITER_MODEL").unwrap_or_else(|_| default_model.to_string()),
            temperature: env::var("REWRITER_TEMPERATURE")
                .unwrap_or_else(|_| "0.7".to_string())
                .parse()
                .map_err(|e| {
                    AppError::ConfigurationError(format!("Invalid REWRITER_TEMPERATURE: {}", e))
                })?,
            generation_max_tokens: env::var("REWRITER_GENERATION_MAX_TOKENS")
                .unwrap_or_else(|_| "512".to_string())
                .parse()
                .map_err(|e| {
                    AppError::ConfigurationError(format!(
                        "Invalid REWRITER_GENERATION_MAX_TOKENS: {}",
                        e
                    ))
                })?,
            editing_max_tokens: env::var("REWRITER_EDITING_MAX_TOKENS")
                .unwrap_or_else(|_| "256".to_string())
                .parse()
                .map_err(|e| {
                    AppError::ConfigurationError(format!(
                        "Invalid REWRITER_EDITING_MAX_TOKENS: {}",
                        e
                    ))
                })?,
            timeout_seconds: env::var("REWRITER_TIMEOUT_SECONDS")
                .unwrap_or_else(|_| "120".to_string())
                .parse()
                .map_err(|e| {
                    AppError::ConfigurationError(format!(
                        "Invalid REWRITER_TIMEOUT_SECONDS: {}",
                        e
                    ))
                })?,
            max_retries: env::var("REWRITER_MAX_RETRIES")
                .unwrap_or_else(|_| "3".to_string())
                .parse()
                .map_err(|e| {
                    AppError::ConfigurationError(format!("Invalid REWRITER_MAX_RETRIES: {}", e))
                })?,
        })
    }

    pub fn validate(&self) -> Result<()> {
        if self.base_url.is_empty() {
            return Err(AppError::ConfigurationError(
                "Rewriter base URL cannot be empty".to_string(),
            ));
        }

        if self.model.is_empty() {
            return Err(AppError::ConfigurationError(
                "Rewriter model cannot be empty".to_string(),
            ));
        }

        if !["llamacpp", "ollama", "openai"].contains(&self.provider.as_str()) {
            return Err(AppError::ConfigurationError(format!(
                "Unsupported rewriter provider: {}",
                self.provider
            )));
        }

        if self.provider == "openai" && self.api_key.is_none() {
            return Err(AppError::ConfigurationError(
                "REWRITER_API_KEY is required for the openai provider".to_string(),
            ));
        }

        if !self.temperature.is_finite() || self.temperature < 0.0 || self.temperature > 2.0 {
            return Err(AppError::ConfigurationError(format!(
                "Invalid temperature: {} (must be 0.0-2.0)",
                self.temperature
            )));
        }

        for (name, value) in [
            ("generation_max_tokens", self.generation_max_tokens),
            ("editing_max_tokens", self.editing_max_tokens),
        ] {
            if value == 0 || value > 8192 {
                return Err(AppError::ConfigurationError(format!(
                    "Invalid {}: {} (must be 1-8192)",
                    name, value
                )));
            }
        }

        if self.max_retries > 10 {
            return Err(AppError::ConfigurationError(format!(
                "Invalid max_retries: {} (must be 0-10)",
                self.max_retries
            )));
        }

        Ok(())
    }
}

impl DiffusionConfig {
    pub fn from_env() -> Result<Self> {
        Ok(DiffusionConfig {
            base_url: env::var("DIFFUSION_BASE_URL")
                .unwrap_or_else(|_| "http://127.0.0.1:7860".to_string()),
            negative_prompt: env::var("DIFFUSION_NEGATIVE_PROMPT")
                .unwrap_or_else(|_| "blurry, low quality, distorted, deformed".to_string()),
            steps: env::var("DIFFUSION_STEPS")
                .unwrap_or_else(|_| "30".to_string())
                .parse()
                .map_err(|e| {
                    AppError::ConfigurationError(format!("Invalid DIFFUSION_STEPS: {}", e))
                })?,
            guidance_scale: env::var("DIFFUSION_GUIDANCE_SCALE")
                .unwrap_or_else(|_| "7.5".to_string())
                .parse()
                .map_err(|e| {
                    AppError::ConfigurationError(format!(
                        "Invalid DIFFUSION_GUIDANCE_SCALE: {}",
                        e
                    ))
                })?,
            edit_strength: env::var("DIFFUSION_EDIT_STRENGTH")
                .unwrap_or_else(|_| "0.7".to_string())
                .parse()
                .map_err(|e| {
                    AppError::ConfigurationError(format!(
                        "Invalid DIFFUSION_EDIT_STRENGTH: {}",
                        e
                    ))
                })?,
            edit_guidance_scale: env::var("DIFFUSION_EDIT_GUIDANCE_SCALE")
                .unwrap_or_else(|_| "8.0".to_string())
                .parse()
                .map_err(|e| {
                    AppError::ConfigurationError(format!(
                        "Invalid DIFFUSION_EDIT_GUIDANCE_SCALE: {}",
                        e
                    ))
                })?,
            width: env::var("DIFFUSION_WIDTH")
                .unwrap_or_else(|_| "512".to_string())
                .parse()
                .map_err(|e| {
                    AppError::ConfigurationError(format!("Invalid DIFFUSION_WIDTH: {}", e))
                })?,
            height: env::var("DIFFUSION_HEIGHT")
                .unwrap_or_else(|_| "512".to_string())
                .parse()
                .map_err(|e| {
                    AppError::ConfigurationError(format!("Invalid DIFFUSION_HEIGHT: {}", e))
                })?,
            timeout_seconds: env::var("DIFFUSION_TIMEOUT_SECONDS")
                .unwrap_or_else(|_| "300".to_string())
                .parse()
                .map_err(|e| {
                    AppError::ConfigurationError(format!(
                        "Invalid DIFFUSION_TIMEOUT_SECONDS: {}",
                        e
                    ))
                })?,
        })
    }

    pub fn validate(&self) -> Result<()> {
        if self.base_url.is_empty() {
            return Err(AppError::ConfigurationError(
                "Diffusion base URL cannot be empty".to_string(),
            ));
        }

        if self.steps == 0 || self.steps > 150 {
            return Err(AppError::ConfigurationError(format!(
                "Invalid steps: {} (must be 1-150)",
                self.steps
            )));
        }

        for (name, value) in [
            ("guidance_scale", self.guidance_scale),
            ("edit_guidance_scale", self.edit_guidance_scale),
        ] {
            if !value.is_finite() || value <= 0.0 || value > 30.0 {
                return Err(AppError::ConfigurationError(format!(
                    "Invalid {}: {} (must be in (0, 30])",
                    name, value
                )));
            }
        }

        if !self.edit_strength.is_finite()
            || self.edit_strength <= 0.0
            || self.edit_strength > 1.0
        {
            return Err(AppError::ConfigurationError(format!(
                "Invalid edit_strength: {} (must be in (0, 1])",
                self.edit_strength
            )));
        }

        // Stable Diffusion latents work on 8-pixel blocks
        for (name, value) in [("width", self.width), ("height", self.height)] {
            if value < 64 || value > 2048 || value % 8 != 0 {
                return Err(AppError::ConfigurationError(format!(
                    "Invalid {}: {} (must be 64-2048 and a multiple of 8)",
                    name, value
                )));
            }
        }

        Ok(())
    }
}

impl PipelineConfig {
    pub fn from_env() -> Result<Self> {
        Ok(PipelineConfig {
            fallback_to_raw_on_rewrite_failure: env::var("FALLBACK_TO_RAW_ON_REWRITE_FAILURE")
                .unwrap_or_else(|_| "false".to_string())
                .parse()
                .map_err(|e| {
                    AppError::ConfigurationError(format!(
                        "Invalid FALLBACK_TO_RAW_ON_REWRITE_FAILURE: {}",
                        e
                    ))
                })?,
            max_instruction_chars: env::var("MAX_INSTRUCTION_CHARS")
                .unwrap_or_else(|_| "4000".to_string())
                .parse()
                .map_err(|e| {
                    AppError::ConfigurationError(format!("Invalid MAX_INSTRUCTION_CHARS: {}", e))
                })?,
        })
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_instruction_chars == 0 || self.max_instruction_chars > 100_000 {
            return Err(AppError::ConfigurationError(format!(
                "Invalid max_instruction_chars: {} (must be 1-100000)",
                self.max_instruction_chars
            )));
        }

        Ok(())
    }
}

// Development configuration defaults
impl Default for Config {
    fn default() -> Self {
        Config {
            host: "127.0.0.1".to_string(),
            port: 8087,
            environment: "development".to_string(),
            log_level: "debug".to_string(),
            request_timeout_seconds: 300,
            rewriter: RewriterConfig::default(),
            diffusion: DiffusionConfig::default(),
            pipeline: PipelineConfig::default(),
        }
    }
}

impl Default for RewriterConfig {
    fn default() -> Self {
        RewriterConfig {
            provider: "llamacpp".to_string(),
            base_url: "http://127.0.0.1:8080".to_string(),
            api_key: None,
            model: "local-gguf".to_string(),
            temperature: 0.7,
            generation_max_tokens: 512,
            editing_max_tokens: 256,
            timeout_seconds: 120,
            max_retries: 3,
        }
    }
}

impl Default for DiffusionConfig {
    fn default() -> Self {
        DiffusionConfig {
            base_url: "http://127.0.0.1:7860".to_string(),
            negative_prompt: "blurry, low quality, distorted, deformed".to_string(),
            steps: 30,
            guidance_scale: 7.5,
            edit_strength: 0.7,
            edit_guidance_scale: 8.0,
            width: 512,
            height: 512,
            timeout_seconds: 300,
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        PipelineConfig {
            fallback_to_raw_on_rewrite_failure: false,
            max_instruction_chars: 4000,
        }
    }
}
