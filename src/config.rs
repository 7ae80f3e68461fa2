//! Configuration
//!
//! All run settings live in [`HerbConfig`], loadable from a TOML file. Every
//! section is defaulted so a partial file (or no file at all) is valid, and
//! CLI flags override individual values after loading.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::training::callbacks::Monitor;
use crate::utils::error::{HerbError, Result};

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HerbConfig {
    pub data: DataConfig,
    pub model: ModelSection,
    pub training: TrainingSection,
    pub callbacks: CallbackSection,
    pub output: OutputConfig,
}

/// Where the images live and how they are fed to the network
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DataConfig {
    /// Root directory; each immediate subdirectory is one category
    pub data_dir: PathBuf,
    /// Images are resized to `image_size x image_size`
    pub image_size: usize,
    /// Fraction of each category held out for validation
    pub validation_split: f64,
    pub batch_size: usize,
    /// Decode every image once up front instead of on each access
    pub cache_images: bool,
    /// Images per category in the sample grid
    pub samples_per_category: usize,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data/herbs"),
            image_size: crate::IMAGE_SIZE,
            validation_split: crate::DEFAULT_VALIDATION_SPLIT,
            batch_size: 32,
            cache_images: false,
            samples_per_category: crate::dataset::samples::DEFAULT_SAMPLES_PER_CATEGORY,
        }
    }
}

/// Architecture settings for both model variants
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelSection {
    /// Baseline: filters of the three conv blocks
    pub filters: [usize; 3],
    /// Baseline: width of the dense hidden layer
    pub hidden_units: usize,
    /// Enhanced: burn record holding the pretrained backbone weights
    pub backbone_weights: PathBuf,
    /// Enhanced: widths of the two dense blocks
    pub dense_units: [usize; 2],
    /// Enhanced: dropout after each dense block
    pub dropout: [f64; 2],
}

impl Default for ModelSection {
    fn default() -> Self {
        Self {
            filters: [32, 64, 128],
            hidden_units: 128,
            backbone_weights: PathBuf::from("weights/resnet18_backbone"),
            dense_units: [256, 128],
            dropout: [0.5, 0.3],
        }
    }
}

/// Optimizer and schedule settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingSection {
    pub epochs: usize,
    pub learning_rate: f64,
    /// Exponential decay, enhanced model only
    pub decay_steps: usize,
    pub decay_rate: f64,
    pub staircase: bool,
    pub weight_decay: Option<f64>,
    pub seed: u64,
}

impl Default for TrainingSection {
    fn default() -> Self {
        Self {
            epochs: 20,
            learning_rate: 1e-3,
            decay_steps: 1000,
            decay_rate: 0.9,
            staircase: false,
            weight_decay: None,
            seed: 42,
        }
    }
}

/// Early stopping and reduce-on-plateau settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CallbackSection {
    pub monitor: Monitor,
    pub early_stopping_patience: usize,
    pub restore_best_weights: bool,
    pub min_delta: f64,
    pub reduce_lr_factor: f64,
    pub reduce_lr_patience: usize,
    pub min_lr: f64,
}

impl Default for CallbackSection {
    fn default() -> Self {
        Self {
            monitor: Monitor::ValLoss,
            early_stopping_patience: 5,
            restore_best_weights: true,
            min_delta: 0.0,
            reduce_lr_factor: 0.2,
            reduce_lr_patience: 3,
            min_lr: 1e-6,
        }
    }
}

/// Where artifacts go
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub output_dir: PathBuf,
    /// Persist trained weights, metadata and history
    pub save_model: bool,
    /// Render the sample grid before training
    pub show_samples: bool,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("output"),
            save_model: false,
            show_samples: false,
        }
    }
}

impl HerbConfig {
    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(HerbError::PathNotFound(path.to_path_buf()));
        }
        let content = fs::read_to_string(path)?;
        let config: HerbConfig = toml::from_str(&content).map_err(|e| {
            HerbError::Config(format!("Failed to parse config {}: {e}", path.display()))
        })?;
        Ok(config)
    }

    /// Write configuration as TOML
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| HerbError::Serialization(e.to_string()))?;
        fs::write(path, content)?;
        Ok(())
    }

    /// Reject values that would make a run meaningless
    pub fn validate(&self) -> Result<()> {
        let data = &self.data;
        if !(0.0..1.0).contains(&data.validation_split) {
            return Err(HerbError::Config(
                "validation_split must be in range [0.0, 1.0)".to_string(),
            ));
        }
        if data.batch_size == 0 {
            return Err(HerbError::Config("batch_size must be greater than 0".to_string()));
        }
        if data.image_size < 32 {
            return Err(HerbError::Config("image_size must be at least 32".to_string()));
        }

        let training = &self.training;
        if training.epochs == 0 {
            return Err(HerbError::Config("epochs must be greater than 0".to_string()));
        }
        if training.learning_rate <= 0.0 {
            return Err(HerbError::Config("learning_rate must be positive".to_string()));
        }
        if training.decay_steps == 0 {
            return Err(HerbError::Config("decay_steps must be greater than 0".to_string()));
        }
        if training.decay_rate <= 0.0 || training.decay_rate > 1.0 {
            return Err(HerbError::Config("decay_rate must be in range (0.0, 1.0]".to_string()));
        }

        if self.model.dropout.iter().any(|p| !(0.0..1.0).contains(p)) {
            return Err(HerbError::Config("dropout must be in range [0.0, 1.0)".to_string()));
        }
        if self.model.hidden_units == 0 || self.model.dense_units.contains(&0) {
            return Err(HerbError::Config("dense layer widths must be positive".to_string()));
        }

        let callbacks = &self.callbacks;
        if callbacks.reduce_lr_factor <= 0.0 || callbacks.reduce_lr_factor >= 1.0 {
            return Err(HerbError::Config(
                "reduce_lr_factor must be in range (0.0, 1.0)".to_string(),
            ));
        }
        if callbacks.min_delta < 0.0 {
            return Err(HerbError::Config("min_delta must not be negative".to_string()));
        }

        Ok(())
    }
}
