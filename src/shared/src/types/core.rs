//! Core type definitions for the Atelier image studio platform
//!
//! This module contains the shared types used by the image studio service and
//! its clients: prompt roles, decoded image artifacts, and the conversions
//! between artifacts and their transportable base64 PNG form.

use std::fmt;
use std::io::Cursor;
use std::str::FromStr;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use image::{imageops::FilterType, DynamicImage, GenericImageView, ImageFormat};
use serde::{Deserialize, Serialize};
use thiserror::Error;

// ============================================================================
// PROMPT ROLES
// ============================================================================

/// Which rewrite template an instruction is destined for.
///
/// Generation prompts benefit from elaborate scene descriptions while edit
/// instructions should stay terse, so the two roles carry different templates
/// and output budgets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PromptRole {
    Generation,
    Editing,
}

impl Default for PromptRole {
    fn default() -> Self {
        PromptRole::Generation
    }
}

impl fmt::Display for PromptRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PromptRole::Generation => write!(f, "generation"),
            PromptRole::Editing => write!(f, "editing"),
        }
    }
}

impl FromStr for PromptRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "generation" | "generate" => Ok(PromptRole::Generation),
            "editing" | "edit" => Ok(PromptRole::Editing),
            other => Err(format!("unknown prompt role: {}", other)),
        }
    }
}

// ============================================================================
// IMAGE ARTIFACTS
// ============================================================================

/// Media type used for every encoded artifact on the wire.
pub const ARTIFACT_MEDIA_TYPE: &str = "image/png";

/// Errors produced while decoding or encoding an [`ImageArtifact`].
#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("invalid base64 image payload: {0}")]
    InvalidBase64(#[from] base64::DecodeError),

    #[error("failed to decode image: {0}")]
    Decode(#[source] image::ImageError),

    #[error("failed to encode image: {0}")]
    Encode(#[source] image::ImageError),
}

/// A decoded bitmap image flowing through the pipeline.
///
/// Artifacts are request-scoped: synthesized, uploaded, or carried forward
/// from a previous edit, then dropped once the response is written. Transport
/// encoding is always PNG inside base64; the pipeline itself only ever sees
/// the decoded form.
#[derive(Debug, Clone)]
pub struct ImageArtifact {
    image: DynamicImage,
}

impl ImageArtifact {
    pub fn new(image: DynamicImage) -> Self {
        Self { image }
    }

    /// Decode an artifact from a raw container format (PNG, JPEG, ...).
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ArtifactError> {
        let image = image::load_from_memory(bytes).map_err(ArtifactError::Decode)?;
        Ok(Self { image })
    }

    /// Decode an artifact from a base64 payload, tolerating an optional
    /// `data:image/...;base64,` prefix as produced by some backends and
    /// browsers.
    pub fn from_base64(payload: &str) -> Result<Self, ArtifactError> {
        let trimmed = payload.trim();
        let encoded = match trimmed.find("base64,") {
            Some(idx) if trimmed.starts_with("data:") => &trimmed[idx + "base64,".len()..],
            _ => trimmed,
        };
        let bytes = BASE64.decode(encoded)?;
        Self::from_bytes(&bytes)
    }

    /// Encode as PNG bytes.
    pub fn to_png_bytes(&self) -> Result<Vec<u8>, ArtifactError> {
        let mut cursor = Cursor::new(Vec::new());
        self.image
            .write_to(&mut cursor, ImageFormat::Png)
            .map_err(ArtifactError::Encode)?;
        Ok(cursor.into_inner())
    }

    /// Encode as a base64 PNG string, the wire form used by the HTTP API.
    pub fn to_base64_png(&self) -> Result<String, ArtifactError> {
        Ok(BASE64.encode(self.to_png_bytes()?))
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.image.dimensions()
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    /// Normalize to 8-bit RGB, dropping any alpha channel. Diffusion
    /// backends expect plain RGB input.
    pub fn to_rgb(&self) -> Self {
        Self {
            image: DynamicImage::ImageRgb8(self.image.to_rgb8()),
        }
    }

    /// Resample to exactly the given dimensions.
    pub fn resized(&self, width: u32, height: u32) -> Self {
        if self.dimensions() == (width, height) {
            return self.clone();
        }
        Self {
            image: self.image.resize_exact(width, height, FilterType::Lanczos3),
        }
    }

    pub fn as_image(&self) -> &DynamicImage {
        &self.image
    }

    pub fn into_image(self) -> DynamicImage {
        self.image
    }
}

impl From<DynamicImage> for ImageArtifact {
    fn from(image: DynamicImage) -> Self {
        Self::new(image)
    }
}
