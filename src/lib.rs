//! # Herb Classifier
//!
//! Image classification of herb species with the Burn framework.
//!
//! ## Features
//!
//! - **Category discovery** from a directory of per-herb image folders
//! - **Baseline CNN** with three convolution/pooling blocks
//! - **Transfer learning** on a frozen, pretrained ResNet-18 backbone
//! - **Callbacks**: early stopping with best-weight restore and reduce-on-plateau
//! - **Charts** of accuracy and loss per epoch, written as SVG
//!
//! ## Modules
//!
//! - `dataset`: Category discovery, the validation split, Burn datasets and the sample grid
//! - `model`: Baseline CNN, ResNet-18 backbone and the enhanced classifier
//! - `training`: Training loop, learning rate schedules, callbacks and history
//! - `inference`: Saved model artifacts and single-image prediction
//! - `classifier`: The end-to-end pipeline
//! - `utils`: Errors, logging and charts
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use herb_classifier::{backend::TrainingBackend, HerbClassifier, HerbConfig, ModelSelection};
//!
//! let mut config = HerbConfig::default();
//! config.data.data_dir = "data/herbs".into();
//!
//! let mut classifier =
//!     HerbClassifier::<TrainingBackend>::new(config, herb_classifier::backend::default_device())?;
//! let outcomes = classifier.run(ModelSelection::Baseline)?;
//! ```

pub mod backend;
pub mod classifier;
pub mod config;
pub mod dataset;
pub mod inference;
pub mod model;
pub mod training;
pub mod utils;

// Re-export commonly used items for convenience
pub use classifier::{HerbClassifier, ModelSelection, RunOutcome};
pub use config::HerbConfig;
pub use dataset::{DataSplit, HerbBatch, HerbBatcher, HerbBurnDataset, HerbDataset, HerbItem};
pub use inference::{ModelMetadata, PredictionResult, Predictor};
pub use model::{BaselineCnn, EnhancedClassifier, ImageClassifier, ModelKind};
pub use training::{fit, CallbackSet, LrSchedule, TrainingHistory};
pub use utils::error::{HerbError, Result};

/// Default square image size fed to both models
pub const IMAGE_SIZE: usize = 224;

/// Default fraction of each category held out for validation
pub const DEFAULT_VALIDATION_SPLIT: f64 = 0.2;

/// Version of the library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
