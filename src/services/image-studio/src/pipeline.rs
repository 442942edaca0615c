//! Request pipeline orchestrating rewrite, extraction, and diffusion.
//!
//! Both entry paths share the same skeleton: validate the instruction, ask
//! the text capability to rewrite it under the matching role template, then
//! dispatch the extracted prompt to the diffusion capability. Capability
//! failures surface unchanged; the only policy knob is the explicit
//! fallback-to-raw flag applied when a rewrite fails on an image path.

use crate::config::{DiffusionConfig, PipelineConfig};
use crate::diffusion::{ImageDiffusion, SynthesisRequest, TransformRequest};
use crate::error::{invalid_input, ErrorContext, Result};
use crate::rewriter::{RewriteOutcome, TextRewriter};

use std::sync::Arc;

use atelier_shared::{ImageArtifact, PromptRole};
use tracing::{info, warn};

/// Caller-tunable sampling knobs for the generation path. Unset fields fall
/// back to the configured defaults.
#[derive(Debug, Clone, Default)]
pub struct GenerationParams {
    pub steps: Option<u32>,
    pub guidance_scale: Option<f32>,
    pub width: Option<u32>,
    pub height: Option<u32>,
}

/// Caller-tunable knobs for the editing path.
#[derive(Debug, Clone, Default)]
pub struct EditParams {
    pub strength: Option<f32>,
    pub guidance_scale: Option<f32>,
}

/// The instruction a pipeline run settled on, with provenance for caller
/// transparency.
#[derive(Debug, Clone)]
pub struct EngineeredPrompt {
    pub text: String,
    pub role: PromptRole,
    /// True when the raw instruction was substituted after a rewrite failure.
    pub used_fallback: bool,
    /// Raw model response the prompt was extracted from, absent on fallback.
    pub raw_response: Option<String>,
}

impl From<RewriteOutcome> for EngineeredPrompt {
    fn from(outcome: RewriteOutcome) -> Self {
        Self {
            text: outcome.rewritten,
            role: outcome.role,
            used_fallback: false,
            raw_response: Some(outcome.raw_response),
        }
    }
}

/// Orchestrates the injected capabilities for one request at a time.
pub struct StudioPipeline {
    rewriter: TextRewriter,
    diffusion: Arc<dyn ImageDiffusion>,
    diffusion_defaults: DiffusionConfig,
    policy: PipelineConfig,
}

impl StudioPipeline {
    pub fn new(
        rewriter: TextRewriter,
        diffusion: Arc<dyn ImageDiffusion>,
        diffusion_defaults: DiffusionConfig,
        policy: PipelineConfig,
    ) -> Self {
        Self {
            rewriter,
            diffusion,
            diffusion_defaults,
            policy,
        }
    }

    pub fn rewriter_model(&self) -> &str {
        self.rewriter.model_name()
    }

    pub fn diffusion_backend(&self) -> &str {
        self.diffusion.backend_name()
    }

    pub fn defaults(&self) -> &DiffusionConfig {
        &self.diffusion_defaults
    }

    pub fn policy(&self) -> &PipelineConfig {
        &self.policy
    }

    pub async fn rewriter_health(&self) -> Result<()> {
        self.rewriter.backend_health().await
    }

    pub async fn diffusion_health(&self) -> Result<()> {
        self.diffusion.health().await
    }

    /// Rewrite only, without touching the diffusion capability.
    ///
    /// The fallback flag does not apply here: with no image step to salvage,
    /// a failed rewrite has nothing to fall back for.
    pub async fn engineer(&self, instruction: &str, role: PromptRole) -> Result<EngineeredPrompt> {
        let instruction = self.validate_instruction(instruction)?;
        let outcome = self.rewriter.rewrite(instruction, role).await?;
        Ok(EngineeredPrompt::from(outcome))
    }

    /// Generation path: rewrite under the generation role, then synthesize.
    pub async fn generate(
        &self,
        instruction: &str,
        params: &GenerationParams,
    ) -> Result<(EngineeredPrompt, ImageArtifact)> {
        let instruction = self.validate_instruction(instruction)?;
        self.validate_generation_params(params)?;

        let engineered = self
            .rewrite_or_fallback(instruction, PromptRole::Generation)
            .await?;

        let request = SynthesisRequest {
            prompt: engineered.text.clone(),
            steps: params.steps.unwrap_or(self.diffusion_defaults.steps),
            guidance_scale: params
                .guidance_scale
                .unwrap_or(self.diffusion_defaults.guidance_scale),
            width: params.width.unwrap_or(self.diffusion_defaults.width),
            height: params.height.unwrap_or(self.diffusion_defaults.height),
        };

        let artifact = self
            .diffusion
            .synthesize(&request)
            .await
            .with_context("Image synthesis failed")?;

        info!(
            role = %engineered.role,
            used_fallback = engineered.used_fallback,
            width = artifact.width(),
            height = artifact.height(),
            "Generated image"
        );

        Ok((engineered, artifact))
    }

    /// Editing path: rewrite under the editing role, then transform the
    /// source. The source may be a fresh upload or an artifact from an
    /// earlier generation; it is normalized to RGB at the configured edit
    /// resolution before dispatch.
    pub async fn edit(
        &self,
        source: ImageArtifact,
        instruction: &str,
        params: &EditParams,
    ) -> Result<(EngineeredPrompt, ImageArtifact)> {
        let instruction = self.validate_instruction(instruction)?;
        self.validate_edit_params(params)?;

        let engineered = self
            .rewrite_or_fallback(instruction, PromptRole::Editing)
            .await?;

        let source = source
            .to_rgb()
            .resized(self.diffusion_defaults.width, self.diffusion_defaults.height);

        let request = TransformRequest {
            source,
            instruction: engineered.text.clone(),
            strength: params
                .strength
                .unwrap_or(self.diffusion_defaults.edit_strength),
            guidance_scale: params
                .guidance_scale
                .unwrap_or(self.diffusion_defaults.edit_guidance_scale),
            steps: self.diffusion_defaults.steps,
        };

        let artifact = self
            .diffusion
            .transform(&request)
            .await
            .with_context("Image edit failed")?;

        info!(
            role = %engineered.role,
            used_fallback = engineered.used_fallback,
            strength = request.strength,
            "Edited image"
        );

        Ok((engineered, artifact))
    }

    async fn rewrite_or_fallback(
        &self,
        instruction: &str,
        role: PromptRole,
    ) -> Result<EngineeredPrompt> {
        match self.rewriter.rewrite(instruction, role).await {
            Ok(outcome) => Ok(EngineeredPrompt::from(outcome)),
            Err(e) if self.policy.fallback_to_raw_on_rewrite_failure => {
                warn!(
                    role = %role,
                    error = ?e,
                    "Rewrite failed, proceeding with the raw instruction"
                );
                Ok(EngineeredPrompt {
                    text: instruction.to_string(),
                    role,
                    used_fallback: true,
                    raw_response: None,
                })
            }
            Err(e) => Err(e),
        }
    }

    fn validate_instruction<'a>(&self, instruction: &'a str) -> Result<&'a str> {
        let trimmed = instruction.trim();
        if trimmed.is_empty() {
            return invalid_input("Instruction cannot be empty");
        }
        if trimmed.chars().count() > self.policy.max_instruction_chars {
            return invalid_input(format!(
                "Instruction too long (max {} characters)",
                self.policy.max_instruction_chars
            ));
        }
        Ok(trimmed)
    }

    fn validate_generation_params(&self, params: &GenerationParams) -> Result<()> {
        if let Some(steps) = params.steps {
            if steps == 0 || steps > 150 {
                return invalid_input(format!("Invalid steps: {} (must be 1-150)", steps));
            }
        }
        if let Some(guidance) = params.guidance_scale {
            if !guidance.is_finite() || guidance <= 0.0 || guidance > 30.0 {
                return invalid_input(format!(
                    "Invalid guidance_scale: {} (must be in (0, 30])",
                    guidance
                ));
            }
        }
        for dimension in [params.width, params.height].into_iter().flatten() {
            if dimension < 64 || dimension > 2048 || dimension % 8 != 0 {
                return invalid_input(format!(
                    "Invalid dimension: {} (must be 64-2048 and a multiple of 8)",
                    dimension
                ));
            }
        }
        Ok(())
    }

    fn validate_edit_params(&self, params: &EditParams) -> Result<()> {
        if let Some(strength) = params.strength {
            if !strength.is_finite() || strength <= 0.0 || strength > 1.0 {
                return invalid_input(format!(
                    "Invalid strength: {} (must be in (0, 1])",
                    strength
                ));
            }
        }
        if let Some(guidance) = params.guidance_scale {
            if !guidance.is_finite() || guidance <= 0.0 || guidance > 30.0 {
                return invalid_input(format!(
                    "Invalid guidance_scale: {} (must be in (0, 30])",
                    guidance
                ));
            }
        }
        Ok(())
    }
}
