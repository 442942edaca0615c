//! HTTP surface: application state, router, and request handlers.

use crate::config::Config;
use crate::error::{AppError, Result};
use crate::pipeline::{EditParams, EngineeredPrompt, GenerationParams, StudioPipeline};

use std::sync::Arc;
use std::time::Instant;

use atelier_shared::{
    EditImageRequest, EditImageResponse, EngineerPromptRequest, EngineerPromptResponse,
    GenerateImageRequest, GenerateImageResponse, ImageArtifact, ARTIFACT_MEDIA_TYPE,
};
use axum::{
    extract::{DefaultBodyLimit, Multipart, State},
    middleware,
    response::Json,
    routing::{get, post},
    Router,
};
use serde::Serialize;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{debug, info};
use uuid::Uuid;

/// Upload cap for multipart image fields.
const MAX_UPLOAD_BYTES: usize = 32 * 1024 * 1024;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub pipeline: Arc<StudioPipeline>,
    pub health_status: Arc<tokio::sync::RwLock<HealthStatus>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthStatus {
    pub status: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub rewriter_status: String,
    pub diffusion_status: String,
    pub version: String,
    pub uptime_seconds: u64,
}

impl HealthStatus {
    pub fn starting() -> Self {
        Self {
            status: "healthy".to_string(),
            timestamp: chrono::Utc::now(),
            rewriter_status: "connected".to_string(),
            diffusion_status: "connected".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            uptime_seconds: 0,
        }
    }
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/v1/capabilities", get(get_capabilities))
        .route("/v1/prompts/engineer", post(engineer_prompt))
        .route("/v1/images/generate", post(generate_image))
        .route("/v1/images/edit", post(edit_image))
        .route("/v1/images/edit-generated", post(edit_generated))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive())
                .layer(middleware::from_fn(request_logging_middleware)),
        )
        .with_state(state)
}

// Health check endpoint
async fn health_check(State(state): State<AppState>) -> Result<Json<HealthStatus>> {
    let health = state.health_status.read().await;
    Ok(Json(health.clone()))
}

// Advertise the configured capabilities and defaults
async fn get_capabilities(State(state): State<AppState>) -> Json<serde_json::Value> {
    let defaults = state.pipeline.defaults();
    Json(serde_json::json!({
        "service": "image-studio",
        "version": env!("CARGO_PKG_VERSION"),
        "rewriter": {
            "model": state.pipeline.rewriter_model(),
            "roles": ["generation", "editing"],
        },
        "diffusion": {
            "backend": state.pipeline.diffusion_backend(),
            "defaults": {
                "steps": defaults.steps,
                "guidance_scale": defaults.guidance_scale,
                "edit_strength": defaults.edit_strength,
                "edit_guidance_scale": defaults.edit_guidance_scale,
                "width": defaults.width,
                "height": defaults.height,
            },
        },
        "media_type": ARTIFACT_MEDIA_TYPE,
        "fallback_to_raw_on_rewrite_failure": state
            .pipeline
            .policy()
            .fallback_to_raw_on_rewrite_failure,
    }))
}

// Rewrite an instruction without generating an image
async fn engineer_prompt(
    State(state): State<AppState>,
    Json(request): Json<EngineerPromptRequest>,
) -> Result<Json<EngineerPromptResponse>> {
    let started = Instant::now();

    let engineered = state
        .pipeline
        .engineer(&request.instruction, request.role)
        .await?;

    info!(role = %engineered.role, "Engineered prompt");

    Ok(Json(EngineerPromptResponse {
        id: Uuid::new_v4(),
        instruction: request.instruction,
        engineered_prompt: engineered.text,
        role: engineered.role,
        model: state.pipeline.rewriter_model().to_string(),
        processing_time_ms: started.elapsed().as_millis() as u64,
        created_at: chrono::Utc::now(),
    }))
}

// Full generation path: rewrite then synthesize
async fn generate_image(
    State(state): State<AppState>,
    Json(request): Json<GenerateImageRequest>,
) -> Result<Json<GenerateImageResponse>> {
    let started = Instant::now();

    let params = GenerationParams {
        steps: request.steps,
        guidance_scale: request.guidance_scale,
        width: request.width,
        height: request.height,
    };
    let (engineered, artifact) = state.pipeline.generate(&request.instruction, &params).await?;
    let (width, height) = artifact.dimensions();

    Ok(Json(GenerateImageResponse {
        id: Uuid::new_v4(),
        instruction: request.instruction,
        engineered_prompt: engineered.text,
        image_b64: artifact.to_base64_png()?,
        media_type: ARTIFACT_MEDIA_TYPE.to_string(),
        width,
        height,
        model: state.pipeline.diffusion_backend().to_string(),
        processing_time_ms: started.elapsed().as_millis() as u64,
        created_at: chrono::Utc::now(),
    }))
}

// Edit a freshly uploaded image
async fn edit_image(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<EditImageResponse>> {
    let started = Instant::now();

    let mut image_bytes: Option<axum::body::Bytes> = None;
    let mut instruction: Option<String> = None;
    let mut strength: Option<f32> = None;
    let mut guidance_scale: Option<f32> = None;

    while let Some(field) = multipart.next_field().await? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "image" => image_bytes = Some(field.bytes().await?),
            "instruction" => instruction = Some(field.text().await?),
            "strength" => strength = Some(parse_float_field("strength", &field.text().await?)?),
            "guidance_scale" => {
                guidance_scale = Some(parse_float_field(
                    "guidance_scale",
                    &field.text().await?,
                )?)
            }
            other => {
                debug!(field = other, "Ignoring unknown multipart field");
            }
        }
    }

    let image_bytes = image_bytes
        .ok_or_else(|| AppError::InvalidInput("Missing required field: image".to_string()))?;
    let instruction = instruction
        .ok_or_else(|| AppError::InvalidInput("Missing required field: instruction".to_string()))?;

    let source = ImageArtifact::from_bytes(&image_bytes)?;
    let params = EditParams {
        strength,
        guidance_scale,
    };
    let (engineered, artifact) = state.pipeline.edit(source, &instruction, &params).await?;

    edit_response(&state, instruction, engineered, &artifact, started).map(Json)
}

// Edit a previously generated artifact carried inline as base64
async fn edit_generated(
    State(state): State<AppState>,
    Json(request): Json<EditImageRequest>,
) -> Result<Json<EditImageResponse>> {
    let started = Instant::now();

    let source = ImageArtifact::from_base64(&request.image_b64)?;
    let params = EditParams {
        strength: request.strength,
        guidance_scale: request.guidance_scale,
    };
    let (engineered, artifact) = state
        .pipeline
        .edit(source, &request.instruction, &params)
        .await?;

    edit_response(&state, request.instruction, engineered, &artifact, started).map(Json)
}

fn edit_response(
    state: &AppState,
    instruction: String,
    engineered: EngineeredPrompt,
    artifact: &ImageArtifact,
    started: Instant,
) -> Result<EditImageResponse> {
    let (width, height) = artifact.dimensions();
    Ok(EditImageResponse {
        id: Uuid::new_v4(),
        instruction,
        engineered_instruction: engineered.text,
        image_b64: artifact.to_base64_png()?,
        media_type: ARTIFACT_MEDIA_TYPE.to_string(),
        width,
        height,
        model: state.pipeline.diffusion_backend().to_string(),
        processing_time_ms: started.elapsed().as_millis() as u64,
        created_at: chrono::Utc::now(),
    })
}

fn parse_float_field(name: &str, raw: &str) -> Result<f32> {
    raw.trim()
        .parse()
        .map_err(|_| AppError::InvalidInput(format!("Invalid value for {}: {}", name, raw)))
}

// Request logging middleware
async fn request_logging_middleware(
    req: axum::http::Request<axum::body::Body>,
    next: axum::middleware::Next,
) -> impl axum::response::IntoResponse {
    let method = req.method().clone();
    let uri = req.uri().clone();
    let start_time = Instant::now();

    let response = next.run(req).await;

    let duration = start_time.elapsed();
    info!(
        "{} {} - {:?} - {}ms",
        method,
        uri,
        response.status(),
        duration.as_millis()
    );

    response
}
