//! Integration tests for the Image Studio HTTP API
//!
//! These tests exercise the full router with doubled capabilities, covering
//! prompt engineering, generation, both edit paths, and error envelopes.

use std::io::Write;
use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{Method, Request, StatusCode},
};
use image::{DynamicImage, RgbImage};
use serde_json::{json, Value};
use tower::ServiceExt;

use atelier_shared::ImageArtifact;
use image_studio::config::{Config, PipelineConfig};
use image_studio::diffusion::{ImageDiffusion, SynthesisRequest, TransformRequest};
use image_studio::error::{AppError, Result};
use image_studio::pipeline::StudioPipeline;
use image_studio::rewriter::{CompletionRequest, TextGeneration, TextRewriter};
use image_studio::server::{create_router, AppState, HealthStatus};

const TAGGED_RESPONSE: &str =
    "Here you go.\n<improved_prompt>a luminous, highly detailed scene</improved_prompt>";

/// Text capability double that returns a canned completion, or fails when
/// constructed without one.
struct ScriptedText {
    response: Option<String>,
}

impl ScriptedText {
    fn tagged() -> Self {
        Self {
            response: Some(TAGGED_RESPONSE.to_string()),
        }
    }

    fn failing() -> Self {
        Self { response: None }
    }
}

#[async_trait]
impl TextGeneration for ScriptedText {
    async fn complete(&self, _request: &CompletionRequest) -> Result<String> {
        match &self.response {
            Some(response) => Ok(response.clone()),
            None => Err(AppError::CapabilityUnavailable(
                "text backend is down".to_string(),
            )),
        }
    }

    async fn health(&self) -> Result<()> {
        Ok(())
    }

    fn model_name(&self) -> &str {
        "scripted-rewriter"
    }
}

/// Diffusion double rendering a flat image at the requested resolution.
struct StubDiffusion;

fn flat_artifact(width: u32, height: u32) -> ImageArtifact {
    ImageArtifact::new(DynamicImage::ImageRgb8(RgbImage::from_pixel(
        width,
        height,
        image::Rgb([40, 90, 160]),
    )))
}

#[async_trait]
impl ImageDiffusion for StubDiffusion {
    async fn synthesize(&self, request: &SynthesisRequest) -> Result<ImageArtifact> {
        Ok(flat_artifact(request.width, request.height))
    }

    async fn transform(&self, request: &TransformRequest) -> Result<ImageArtifact> {
        let (width, height) = request.source.dimensions();
        Ok(flat_artifact(width, height))
    }

    async fn health(&self) -> Result<()> {
        Ok(())
    }

    fn backend_name(&self) -> &str {
        "stub-diffusion"
    }
}

/// Test helper to create application state around the given doubles.
fn create_test_state(text: ScriptedText, fallback: bool) -> AppState {
    let config = Config::default();
    let rewriter = TextRewriter::new(Arc::new(text), &config.rewriter);
    let pipeline = StudioPipeline::new(
        rewriter,
        Arc::new(StubDiffusion),
        config.diffusion.clone(),
        PipelineConfig {
            fallback_to_raw_on_rewrite_failure: fallback,
            ..PipelineConfig::default()
        },
    );

    AppState {
        config: Arc::new(config),
        pipeline: Arc::new(pipeline),
        health_status: Arc::new(tokio::sync::RwLock::new(HealthStatus::starting())),
    }
}

/// Test helper to make HTTP requests to the API
async fn make_request(
    app: &axum::Router,
    method: Method,
    uri: &str,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let request_builder = Request::builder().method(method).uri(uri);

    let request = if let Some(body) = body {
        request_builder
            .header("Content-Type", "application/json")
            .body(Body::from(serde_json::to_vec(&body).unwrap()))
            .unwrap()
    } else {
        request_builder.body(Body::empty()).unwrap()
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();

    let body_bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();

    let body_json: Value = if body_bytes.is_empty() {
        json!({})
    } else {
        serde_json::from_slice(&body_bytes).unwrap_or(json!({}))
    };

    (status, body_json)
}

#[tokio::test]
async fn test_health_endpoint() {
    let app = create_router(create_test_state(ScriptedText::tagged(), false));

    let (status, body) = make_request(&app, Method::GET, "/health", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["rewriter_status"], "connected");
    assert!(body["version"].as_str().is_some());
}

#[tokio::test]
async fn test_capabilities_endpoint() {
    let app = create_router(create_test_state(ScriptedText::tagged(), false));

    let (status, body) = make_request(&app, Method::GET, "/v1/capabilities", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["service"], "image-studio");
    assert_eq!(body["rewriter"]["model"], "scripted-rewriter");
    assert_eq!(body["rewriter"]["roles"], json!(["generation", "editing"]));
    assert_eq!(body["diffusion"]["defaults"]["steps"], 30);
    assert_eq!(body["diffusion"]["defaults"]["edit_strength"], 0.7);
    assert_eq!(body["media_type"], "image/png");
    assert_eq!(body["fallback_to_raw_on_rewrite_failure"], false);
}

#[tokio::test]
async fn test_engineer_prompt() {
    let app = create_router(create_test_state(ScriptedText::tagged(), false));

    let (status, body) = make_request(
        &app,
        Method::POST,
        "/v1/prompts/engineer",
        Some(json!({"instruction": "a cat wearing a hat", "role": "editing"})),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["instruction"], "a cat wearing a hat");
    assert_eq!(
        body["engineered_prompt"],
        "a luminous, highly detailed scene"
    );
    assert_eq!(body["role"], "editing");
    assert_eq!(body["model"], "scripted-rewriter");
}

#[tokio::test]
async fn test_engineer_prompt_defaults_to_generation_role() {
    let app = create_router(create_test_state(ScriptedText::tagged(), false));

    let (status, body) = make_request(
        &app,
        Method::POST,
        "/v1/prompts/engineer",
        Some(json!({"instruction": "a cat wearing a hat"})),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["role"], "generation");
}

#[tokio::test]
async fn test_generate_image() {
    let app = create_router(create_test_state(ScriptedText::tagged(), false));

    let (status, body) = make_request(
        &app,
        Method::POST,
        "/v1/images/generate",
        Some(json!({"instruction": "a cat wearing a hat"})),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body["engineered_prompt"],
        "a luminous, highly detailed scene"
    );
    assert_eq!(body["media_type"], "image/png");
    assert_eq!(body["width"], 512);
    assert_eq!(body["height"], 512);

    // The payload decodes back into the advertised image
    let artifact = ImageArtifact::from_base64(body["image_b64"].as_str().unwrap()).unwrap();
    assert_eq!(artifact.dimensions(), (512, 512));
}

#[tokio::test]
async fn test_generate_honors_requested_dimensions() {
    let app = create_router(create_test_state(ScriptedText::tagged(), false));

    let (status, body) = make_request(
        &app,
        Method::POST,
        "/v1/images/generate",
        Some(json!({"instruction": "a cat", "width": 640, "height": 384})),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["width"], 640);
    assert_eq!(body["height"], 384);
}

#[tokio::test]
async fn test_generate_rejects_empty_instruction() {
    let app = create_router(create_test_state(ScriptedText::tagged(), false));

    let (status, body) = make_request(
        &app,
        Method::POST,
        "/v1/images/generate",
        Some(json!({"instruction": "   "})),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "INVALID_INPUT");
    assert!(body["message"].as_str().unwrap().contains("empty"));
    assert!(body["timestamp"].as_str().is_some());
}

#[tokio::test]
async fn test_generate_surfaces_capability_outage() {
    let app = create_router(create_test_state(ScriptedText::failing(), false));

    let (status, body) = make_request(
        &app,
        Method::POST,
        "/v1/images/generate",
        Some(json!({"instruction": "a cat"})),
    )
    .await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["error"], "CAPABILITY_UNAVAILABLE");
}

#[tokio::test]
async fn test_generate_with_fallback_still_produces_image() {
    let app = create_router(create_test_state(ScriptedText::failing(), true));

    let (status, body) = make_request(
        &app,
        Method::POST,
        "/v1/images/generate",
        Some(json!({"instruction": "a cat wearing a hat"})),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    // The raw instruction stands in for the failed rewrite
    assert_eq!(body["engineered_prompt"], "a cat wearing a hat");
}

#[tokio::test]
async fn test_edit_generated_round_trip() {
    let app = create_router(create_test_state(ScriptedText::tagged(), false));

    let (status, generated) = make_request(
        &app,
        Method::POST,
        "/v1/images/generate",
        Some(json!({"instruction": "a cat wearing a hat"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, edited) = make_request(
        &app,
        Method::POST,
        "/v1/images/edit-generated",
        Some(json!({
            "image_b64": generated["image_b64"],
            "instruction": "make it black and white",
            "strength": 0.3
        })),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(edited["instruction"], "make it black and white");
    assert_eq!(
        edited["engineered_instruction"],
        "a luminous, highly detailed scene"
    );
    assert_eq!(edited["width"], 512);
    assert_eq!(edited["height"], 512);
}

#[tokio::test]
async fn test_edit_generated_rejects_bad_base64() {
    let app = create_router(create_test_state(ScriptedText::tagged(), false));

    let (status, body) = make_request(
        &app,
        Method::POST,
        "/v1/images/edit-generated",
        Some(json!({
            "image_b64": "definitely not an image",
            "instruction": "make it black and white"
        })),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "INVALID_INPUT");
}

fn multipart_body(boundary: &str, parts: &[(&str, Option<&str>, &[u8])]) -> Vec<u8> {
    let mut body = Vec::new();
    for (name, filename, data) in parts {
        write!(body, "--{}\r\n", boundary).unwrap();
        match filename {
            Some(filename) => write!(
                body,
                "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\nContent-Type: image/png\r\n\r\n",
                name, filename
            )
            .unwrap(),
            None => write!(body, "Content-Disposition: form-data; name=\"{}\"\r\n\r\n", name)
                .unwrap(),
        }
        body.extend_from_slice(data);
        body.extend_from_slice(b"\r\n");
    }
    write!(body, "--{}--\r\n", boundary).unwrap();
    body
}

async fn send_multipart(app: &axum::Router, uri: &str, body: Vec<u8>) -> (StatusCode, Value) {
    let request = Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header(
            "Content-Type",
            "multipart/form-data; boundary=studio-test-boundary",
        )
        .body(Body::from(body))
        .unwrap();

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let body_bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body_json = serde_json::from_slice(&body_bytes).unwrap_or(json!({}));

    (status, body_json)
}

#[tokio::test]
async fn test_edit_upload_multipart() {
    let app = create_router(create_test_state(ScriptedText::tagged(), false));

    let png = flat_artifact(96, 64).to_png_bytes().unwrap();
    let body = multipart_body(
        "studio-test-boundary",
        &[
            ("image", Some("source.png"), &png),
            ("instruction", None, b"make it black and white"),
            ("strength", None, b"0.3"),
        ],
    );

    let (status, body) = send_multipart(&app, "/v1/images/edit", body).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["instruction"], "make it black and white");
    assert_eq!(
        body["engineered_instruction"],
        "a luminous, highly detailed scene"
    );
    // Uploads are normalized to the configured edit resolution
    assert_eq!(body["width"], 512);
    assert_eq!(body["height"], 512);
}

#[tokio::test]
async fn test_edit_upload_requires_image_field() {
    let app = create_router(create_test_state(ScriptedText::tagged(), false));

    let body = multipart_body(
        "studio-test-boundary",
        &[("instruction", None, b"make it black and white".as_slice())],
    );

    let (status, body) = send_multipart(&app, "/v1/images/edit", body).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "INVALID_INPUT");
    assert!(body["message"].as_str().unwrap().contains("image"));
}

#[tokio::test]
async fn test_edit_upload_rejects_non_image_payload() {
    let app = create_router(create_test_state(ScriptedText::tagged(), false));

    let body = multipart_body(
        "studio-test-boundary",
        &[
            ("image", Some("notes.txt"), b"just some text".as_slice()),
            ("instruction", None, b"make it black and white"),
        ],
    );

    let (status, body) = send_multipart(&app, "/v1/images/edit", body).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "INVALID_INPUT");
}

#[tokio::test]
async fn test_edit_upload_rejects_non_finite_strength() {
    let app = create_router(create_test_state(ScriptedText::tagged(), false));

    // f32 parsing accepts "NaN", so the range validator has to catch it
    let png = flat_artifact(96, 64).to_png_bytes().unwrap();
    let body = multipart_body(
        "studio-test-boundary",
        &[
            ("image", Some("source.png"), &png),
            ("instruction", None, b"make it black and white"),
            ("strength", None, b"NaN"),
        ],
    );

    let (status, body) = send_multipart(&app, "/v1/images/edit", body).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "INVALID_INPUT");
    assert!(body["message"].as_str().unwrap().contains("strength"));
}

#[tokio::test]
async fn test_unknown_route_returns_not_found() {
    let app = create_router(create_test_state(ScriptedText::tagged(), false));

    let (status, _) = make_request(&app, Method::GET, "/v1/unknown", None).await;

    assert_eq!(status, StatusCode::NOT_FOUND);
}
