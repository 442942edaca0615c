//! Shared type definitions for the Atelier image studio platform
//!
//! This module provides the type definitions used across the platform,
//! ensuring consistency between the image studio service and its clients.

pub mod api;
pub mod core;

// Re-export core types
pub use self::core::{ArtifactError, ImageArtifact, PromptRole, ARTIFACT_MEDIA_TYPE};

// Re-export API types
pub use self::api::{
    ApiErrorBody, EditImageRequest, EditImageResponse, EngineerPromptRequest,
    EngineerPromptResponse, GenerateImageRequest, GenerateImageResponse,
};
