//! Inference module for saved models
//!
//! This module provides:
//! - Model metadata and weight persistence
//! - Single image prediction with top-k ranking

pub mod metadata;
pub mod predictor;

// Re-export main types for convenience
pub use metadata::{metadata_path, save_model, weights_path, ModelMetadata};
pub use predictor::{LoadedModel, PredictionResult, Predictor};
