//! Dataset module for loading herb images
//!
//! This module handles:
//! - Category discovery from the directory layout
//! - Per-category training/validation split
//! - Burn dataset and batcher integration
//! - Sample grid rendering

pub mod burn_dataset;
pub mod loader;
pub mod samples;
pub mod split;

pub use burn_dataset::{HerbBatch, HerbBatcher, HerbBurnDataset, HerbItem};
pub use loader::{discover_categories, load_image_tensor, DatasetStats, HerbDataset, ImageSample};
pub use samples::render_sample_grid;
pub use split::{split_validation, DataSplit};
