//! Image Studio Service Library
//!
//! This library stitches a text-generation capability and a diffusion
//! capability into one pipeline: instructions are rewritten into engineered
//! prompts, then dispatched to image synthesis or image editing.

pub mod config;
pub mod diffusion;
pub mod error;
pub mod extract;
pub mod pipeline;
pub mod rewriter;
pub mod server;

pub use config::Config;
pub use error::{AppError, Result};
pub use pipeline::StudioPipeline;
pub use server::{create_router, AppState, HealthStatus};
