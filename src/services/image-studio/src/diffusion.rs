//! Image synthesis and editing against a diffusion capability.
//!
//! The production backend is a Stable Diffusion WebUI instance reached over
//! its `/sdapi/v1` HTTP API. Images cross this boundary as base64 PNG; the
//! client hands decoded [`ImageArtifact`]s to the rest of the service.

use crate::config::DiffusionConfig;
use crate::error::{AppError, Result};

use std::time::Duration;

use async_trait::async_trait;
use atelier_shared::ImageArtifact;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

/// Parameters for synthesizing a new image from a text prompt.
#[derive(Debug, Clone)]
pub struct SynthesisRequest {
    pub prompt: String,
    pub steps: u32,
    pub guidance_scale: f32,
    pub width: u32,
    pub height: u32,
}

/// Parameters for transforming a source image under a text instruction.
///
/// `strength` controls how far the result may drift from the source (lower
/// preserves more of the original), `guidance_scale` how strongly the
/// instruction steers the sampler.
#[derive(Debug, Clone)]
pub struct TransformRequest {
    pub source: ImageArtifact,
    pub instruction: String,
    pub strength: f32,
    pub guidance_scale: f32,
    pub steps: u32,
}

/// Narrow contract for the image diffusion capability.
#[async_trait]
pub trait ImageDiffusion: Send + Sync {
    /// Produce a new image from a text prompt.
    async fn synthesize(&self, request: &SynthesisRequest) -> Result<ImageArtifact>;

    /// Produce a transformed version of the source image.
    async fn transform(&self, request: &TransformRequest) -> Result<ImageArtifact>;

    /// Cheap reachability probe.
    async fn health(&self) -> Result<()>;

    fn backend_name(&self) -> &str;
}

/// Client for the Stable Diffusion WebUI HTTP API.
#[derive(Clone)]
pub struct SdWebUiClient {
    client: Client,
    config: DiffusionConfig,
}

#[derive(Debug, Deserialize)]
struct SdImagesResponse {
    images: Vec<String>,
}

impl SdWebUiClient {
    pub fn new(config: &DiffusionConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .map_err(|e| {
                AppError::InternalServerError(format!("Failed to create HTTP client: {}", e))
            })?;

        Ok(Self {
            client,
            config: config.clone(),
        })
    }

    async fn post_diffusion(
        &self,
        endpoint: &str,
        body: serde_json::Value,
    ) -> Result<ImageArtifact> {
        let response = self
            .client
            .post(format!("{}/sdapi/v1/{}", self.config.base_url, endpoint))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(AppError::GenerationFailed(format!(
                "Diffusion backend returned error {}: {}",
                status, error_text
            )));
        }

        let payload: SdImagesResponse = response.json().await?;
        let first = payload.images.into_iter().next().ok_or_else(|| {
            AppError::GenerationFailed("Diffusion backend returned no images".to_string())
        })?;

        // The capability emitting a broken image is its failure, not the caller's
        ImageArtifact::from_base64(&first).map_err(|e| {
            AppError::GenerationFailed(format!(
                "Diffusion backend returned an undecodable image: {}",
                e
            ))
        })
    }
}

#[async_trait]
impl ImageDiffusion for SdWebUiClient {
    async fn synthesize(&self, request: &SynthesisRequest) -> Result<ImageArtifact> {
        debug!(
            steps = request.steps,
            guidance_scale = request.guidance_scale,
            width = request.width,
            height = request.height,
            "Dispatching txt2img"
        );

        let body = json!({
            "prompt": request.prompt,
            "negative_prompt": self.config.negative_prompt,
            "steps": request.steps,
            "cfg_scale": request.guidance_scale,
            "width": request.width,
            "height": request.height,
            "save_images": false,
            "send_images": true,
        });

        self.post_diffusion("txt2img", body).await
    }

    async fn transform(&self, request: &TransformRequest) -> Result<ImageArtifact> {
        let (width, height) = request.source.dimensions();
        debug!(
            steps = request.steps,
            guidance_scale = request.guidance_scale,
            strength = request.strength,
            width,
            height,
            "Dispatching img2img"
        );

        let init_image = request.source.to_base64_png()?;

        let body = json!({
            "init_images": [init_image],
            "prompt": request.instruction,
            "negative_prompt": self.config.negative_prompt,
            "denoising_strength": request.strength,
            "cfg_scale": request.guidance_scale,
            "steps": request.steps,
            "width": width,
            "height": height,
            "save_images": false,
            "send_images": true,
        });

        self.post_diffusion("img2img", body).await
    }

    async fn health(&self) -> Result<()> {
        self.client
            .get(format!("{}/sdapi/v1/options", self.config.base_url))
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    fn backend_name(&self) -> &str {
        "stable-diffusion-webui"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{DynamicImage, RgbImage};
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_config(base_url: &str) -> DiffusionConfig {
        DiffusionConfig {
            base_url: base_url.to_string(),
            timeout_seconds: 5,
            ..DiffusionConfig::default()
        }
    }

    fn tiny_png_b64(width: u32, height: u32) -> String {
        ImageArtifact::new(DynamicImage::ImageRgb8(RgbImage::new(width, height)))
            .to_base64_png()
            .unwrap()
    }

    #[tokio::test]
    async fn synthesize_sends_sampling_params_and_decodes_image() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/sdapi/v1/txt2img"))
            .and(body_partial_json(json!({
                "prompt": "a majestic cat",
                "steps": 30,
                "cfg_scale": 7.5,
                "width": 512,
                "height": 512,
            })))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"images": [tiny_png_b64(16, 16)]})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let client = SdWebUiClient::new(&test_config(&server.uri())).unwrap();
        let artifact = client
            .synthesize(&SynthesisRequest {
                prompt: "a majestic cat".to_string(),
                steps: 30,
                guidance_scale: 7.5,
                width: 512,
                height: 512,
            })
            .await
            .unwrap();
        assert_eq!(artifact.dimensions(), (16, 16));
    }

    #[tokio::test]
    async fn transform_forwards_strength_and_source_dimensions() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/sdapi/v1/img2img"))
            .and(body_partial_json(json!({
                "denoising_strength": 0.3,
                "cfg_scale": 8.0,
                "width": 32,
                "height": 24,
            })))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"images": [tiny_png_b64(32, 24)]})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let source =
            ImageArtifact::new(DynamicImage::ImageRgb8(RgbImage::new(32, 24)));
        let client = SdWebUiClient::new(&test_config(&server.uri())).unwrap();
        let artifact = client
            .transform(&TransformRequest {
                source,
                instruction: "make it black and white".to_string(),
                strength: 0.3,
                guidance_scale: 8.0,
                steps: 30,
            })
            .await
            .unwrap();
        assert_eq!(artifact.dimensions(), (32, 24));
    }

    #[tokio::test]
    async fn empty_image_list_is_generation_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/sdapi/v1/txt2img"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"images": []})))
            .mount(&server)
            .await;

        let client = SdWebUiClient::new(&test_config(&server.uri())).unwrap();
        let err = client
            .synthesize(&SynthesisRequest {
                prompt: "a cat".to_string(),
                steps: 30,
                guidance_scale: 7.5,
                width: 512,
                height: 512,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::GenerationFailed(_)));
    }

    #[tokio::test]
    async fn backend_error_body_is_surfaced() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/sdapi/v1/img2img"))
            .respond_with(ResponseTemplate::new(500).set_body_string("CUDA out of memory"))
            .mount(&server)
            .await;

        let source = ImageArtifact::new(DynamicImage::ImageRgb8(RgbImage::new(8, 8)));
        let client = SdWebUiClient::new(&test_config(&server.uri())).unwrap();
        let err = client
            .transform(&TransformRequest {
                source,
                instruction: "sharpen".to_string(),
                strength: 0.7,
                guidance_scale: 8.0,
                steps: 30,
            })
            .await
            .unwrap_err();
        match err {
            AppError::GenerationFailed(msg) => assert!(msg.contains("CUDA out of memory")),
            other => panic!("unexpected error: {:?}", other),
        }
    }
}
