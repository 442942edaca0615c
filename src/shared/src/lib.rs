//! Shared types and utilities for the Atelier image studio platform

pub mod types;

// Export all types from types module
pub use types::*;
