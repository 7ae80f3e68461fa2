//! Saved model artifacts
//!
//! A trained model is stored as two files in the output directory:
//! `<kind>_model.mpk` (burn `CompactRecorder` weights) and
//! `<kind>_metadata.json` describing how to rebuild the architecture.

use std::fs;
use std::path::{Path, PathBuf};

use burn::{module::Module, prelude::Backend, record::CompactRecorder};
use chrono::Local;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::model::{BaselineCnnConfig, EnhancedClassifierConfig, ModelKind};
use crate::training::history::TrainingHistory;
use crate::utils::error::{HerbError, Result};

/// Everything needed to rebuild a trained model
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelMetadata {
    pub kind: ModelKind,
    /// Category names; the position is the output index
    pub categories: Vec<String>,
    pub image_size: usize,
    pub baseline: Option<BaselineCnnConfig>,
    pub enhanced: Option<EnhancedClassifierConfig>,
    pub epochs_trained: usize,
    pub train_accuracy: Option<f64>,
    pub train_loss: Option<f64>,
    /// `None` when there was no validation split
    pub val_accuracy: Option<f64>,
    pub val_loss: Option<f64>,
    pub backend: String,
    pub created_at: String,
}

fn finite(value: f64) -> Option<f64> {
    value.is_finite().then_some(value)
}

impl ModelMetadata {
    fn new(kind: ModelKind, categories: &[String], image_size: usize, history: &TrainingHistory) -> Self {
        let final_metrics = history.final_metrics();
        Self {
            kind,
            categories: categories.to_vec(),
            image_size,
            baseline: None,
            enhanced: None,
            epochs_trained: history.epochs(),
            train_accuracy: final_metrics.and_then(|m| finite(m.train_accuracy)),
            train_loss: final_metrics.and_then(|m| finite(m.train_loss)),
            val_accuracy: final_metrics.and_then(|m| finite(m.val_accuracy)),
            val_loss: final_metrics.and_then(|m| finite(m.val_loss)),
            backend: crate::backend::backend_name().to_string(),
            created_at: Local::now().format("%Y-%m-%d %H:%M:%S").to_string(),
        }
    }

    pub fn for_baseline(
        config: &BaselineCnnConfig,
        categories: &[String],
        history: &TrainingHistory,
    ) -> Self {
        Self {
            baseline: Some(config.clone()),
            ..Self::new(ModelKind::Baseline, categories, config.image_size, history)
        }
    }

    pub fn for_enhanced(
        config: &EnhancedClassifierConfig,
        categories: &[String],
        image_size: usize,
        history: &TrainingHistory,
    ) -> Self {
        Self {
            enhanced: Some(config.clone()),
            ..Self::new(ModelKind::Enhanced, categories, image_size, history)
        }
    }

    pub fn num_classes(&self) -> usize {
        self.categories.len()
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(HerbError::PathNotFound(path.to_path_buf()));
        }
        let content = fs::read_to_string(path)?;
        let metadata: ModelMetadata = serde_json::from_str(&content)?;

        let has_config = match metadata.kind {
            ModelKind::Baseline => metadata.baseline.is_some(),
            ModelKind::Enhanced => metadata.enhanced.is_some(),
        };
        if !has_config {
            return Err(HerbError::Model(format!(
                "Metadata {} has no {} architecture section",
                path.display(),
                metadata.kind
            )));
        }
        Ok(metadata)
    }
}

/// `<dir>/<kind>_model` (the recorder appends `.mpk`)
pub fn weights_path(dir: &Path, kind: ModelKind) -> PathBuf {
    dir.join(format!("{}_model", kind))
}

/// `<dir>/<kind>_metadata.json`
pub fn metadata_path(dir: &Path, kind: ModelKind) -> PathBuf {
    dir.join(format!("{}_metadata.json", kind))
}

/// Save model weights and metadata into `dir`
pub fn save_model<B: Backend, M: Module<B>>(
    model: M,
    metadata: &ModelMetadata,
    dir: &Path,
) -> Result<PathBuf> {
    fs::create_dir_all(dir)?;
    let weights = weights_path(dir, metadata.kind);
    model
        .save_file(weights.clone(), &CompactRecorder::new())
        .map_err(|e| HerbError::Model(format!("Failed to save model: {e:?}")))?;
    metadata.save(&metadata_path(dir, metadata.kind))?;

    info!("Saved {} model to {:?}", metadata.kind, weights);
    Ok(weights)
}
