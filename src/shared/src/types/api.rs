//! API request and response type definitions for the Atelier platform
//!
//! This module contains the HTTP API models used for communication between
//! clients and the image studio service. Images always travel as base64 PNG
//! strings; decoded artifacts never cross the wire.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::core::PromptRole;

// =============================================================================
// Prompt Engineering API Types
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineerPromptRequest {
    pub instruction: String,
    #[serde(default)]
    pub role: PromptRole,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineerPromptResponse {
    pub id: Uuid,
    pub instruction: String,
    pub engineered_prompt: String,
    pub role: PromptRole,
    pub model: String,
    pub processing_time_ms: u64,
    pub created_at: DateTime<Utc>,
}

// =============================================================================
// Image Generation API Types
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateImageRequest {
    pub instruction: String,
    pub steps: Option<u32>,
    pub guidance_scale: Option<f32>,
    pub width: Option<u32>,
    pub height: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateImageResponse {
    pub id: Uuid,
    pub instruction: String,
    pub engineered_prompt: String,
    pub image_b64: String,
    pub media_type: String,
    pub width: u32,
    pub height: u32,
    pub model: String,
    pub processing_time_ms: u64,
    pub created_at: DateTime<Utc>,
}

// =============================================================================
// Image Editing API Types
// =============================================================================

/// JSON editing request carrying the source image inline, used for the
/// round trip of a previously generated artifact. Fresh uploads use the
/// multipart endpoint instead.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EditImageRequest {
    pub image_b64: String,
    pub instruction: String,
    pub strength: Option<f32>,
    pub guidance_scale: Option<f32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EditImageResponse {
    pub id: Uuid,
    pub instruction: String,
    pub engineered_instruction: String,
    pub image_b64: String,
    pub media_type: String,
    pub width: u32,
    pub height: u32,
    pub model: String,
    pub processing_time_ms: u64,
    pub created_at: DateTime<Utc>,
}

// =============================================================================
// Error Body
// =============================================================================

/// Error envelope returned by the service for every failed request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiErrorBody {
    pub error: String,
    pub message: String,
    pub code: String,
    pub details: Option<serde_json::Value>,
    pub timestamp: DateTime<Utc>,
    pub request_id: Option<String>,
}
