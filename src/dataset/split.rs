//! Training / validation split
//!
//! Within each category the files are taken in name order and the first
//! `floor(n * validation_split)` of them form the validation subset; the rest
//! are used for training. The assignment is deterministic and every image
//! lands in exactly one subset.

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::dataset::loader::{HerbDataset, ImageSample};
use crate::utils::error::{HerbError, Result};

/// Default fraction of each category used for validation
pub const DEFAULT_VALIDATION_SPLIT: f64 = 0.2;

/// Training and validation subsets of one directory tree
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataSplit {
    pub train: Vec<ImageSample>,
    pub validation: Vec<ImageSample>,
    pub validation_split: f64,
}

impl DataSplit {
    /// Total number of images across both subsets
    pub fn total(&self) -> usize {
        self.train.len() + self.validation.len()
    }

    /// Fraction of all images that ended up in validation
    pub fn actual_validation_fraction(&self) -> f64 {
        if self.total() == 0 {
            0.0
        } else {
            self.validation.len() as f64 / self.total() as f64
        }
    }

    /// `(path, label)` pairs for the training subset
    pub fn train_pairs(&self) -> Vec<(std::path::PathBuf, usize)> {
        self.train.iter().map(|s| (s.path.clone(), s.label)).collect()
    }

    /// `(path, label)` pairs for the validation subset
    pub fn validation_pairs(&self) -> Vec<(std::path::PathBuf, usize)> {
        self.validation
            .iter()
            .map(|s| (s.path.clone(), s.label))
            .collect()
    }
}

/// Split a dataset per category into training and validation subsets
pub fn split_validation(dataset: &HerbDataset, validation_split: f64) -> Result<DataSplit> {
    if !(0.0..1.0).contains(&validation_split) {
        return Err(HerbError::Config(format!(
            "validation_split must be in range [0.0, 1.0), got {}",
            validation_split
        )));
    }

    let mut train = Vec::new();
    let mut validation = Vec::new();

    for label in 0..dataset.num_classes() {
        let class_samples = dataset.samples_for(label);
        let n_val = (class_samples.len() as f64 * validation_split).floor() as usize;

        if n_val == 0 && validation_split > 0.0 && !class_samples.is_empty() {
            warn!(
                "Category '{}' has only {} images; none held out for validation",
                dataset.categories[label],
                class_samples.len()
            );
        }

        let (val_part, train_part) = class_samples.split_at(n_val);
        validation.extend(val_part.iter().map(|s| (*s).clone()));
        train.extend(train_part.iter().map(|s| (*s).clone()));
    }

    info!(
        "Split {} images: {} training, {} validation",
        dataset.len(),
        train.len(),
        validation.len()
    );

    Ok(DataSplit {
        train,
        validation,
        validation_split,
    })
}
