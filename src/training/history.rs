//! Per-epoch training history

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::utils::error::{HerbError, Result};

/// Metrics of one finished epoch
///
/// Accuracies are fractions in `[0, 1]`. Validation values are NaN when the
/// validation split is empty.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EpochMetrics {
    /// 1-based epoch number
    pub epoch: usize,
    pub train_loss: f64,
    pub train_accuracy: f64,
    pub val_loss: f64,
    pub val_accuracy: f64,
    /// Learning rate in effect at the end of the epoch
    pub learning_rate: f64,
}

/// Everything a fit produced, epoch by epoch
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TrainingHistory {
    pub train_accuracy: Vec<f64>,
    pub train_loss: Vec<f64>,
    #[serde(with = "nan_as_null")]
    pub val_accuracy: Vec<f64>,
    #[serde(with = "nan_as_null")]
    pub val_loss: Vec<f64>,
    pub learning_rate: Vec<f64>,
    /// Epoch whose weights were returned, if early stopping restored them
    pub best_epoch: Option<usize>,
    pub stopped_early: bool,
}

impl TrainingHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, metrics: &EpochMetrics) {
        self.train_accuracy.push(metrics.train_accuracy);
        self.train_loss.push(metrics.train_loss);
        self.val_accuracy.push(metrics.val_accuracy);
        self.val_loss.push(metrics.val_loss);
        self.learning_rate.push(metrics.learning_rate);
    }

    /// Number of completed epochs
    pub fn epochs(&self) -> usize {
        self.train_loss.len()
    }

    pub fn is_empty(&self) -> bool {
        self.train_loss.is_empty()
    }

    /// Metrics of epoch `index` (0-based)
    pub fn epoch(&self, index: usize) -> Option<EpochMetrics> {
        Some(EpochMetrics {
            epoch: index + 1,
            train_loss: *self.train_loss.get(index)?,
            train_accuracy: *self.train_accuracy.get(index)?,
            val_loss: *self.val_loss.get(index)?,
            val_accuracy: *self.val_accuracy.get(index)?,
            learning_rate: *self.learning_rate.get(index)?,
        })
    }

    pub fn last(&self) -> Option<EpochMetrics> {
        self.epochs().checked_sub(1).and_then(|i| self.epoch(i))
    }

    /// Metrics of the epoch whose weights the model carries
    pub fn final_metrics(&self) -> Option<EpochMetrics> {
        match self.best_epoch {
            Some(best) => self.epoch(best.saturating_sub(1)),
            None => self.last(),
        }
    }

    /// Highest validation accuracy seen, ignoring NaN
    pub fn best_val_accuracy(&self) -> Option<f64> {
        self.val_accuracy
            .iter()
            .copied()
            .filter(|v| !v.is_nan())
            .fold(None, |best, v| Some(best.map_or(v, |b: f64| b.max(v))))
    }

    pub fn save_json(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }

    pub fn load_json(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(HerbError::PathNotFound(path.to_path_buf()));
        }
        let content = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// One row per epoch
    pub fn save_csv(&self, path: &Path) -> Result<()> {
        let mut csv =
            String::from("epoch,train_loss,train_accuracy,val_loss,val_accuracy,learning_rate\n");
        for m in (0..self.epochs()).filter_map(|i| self.epoch(i)) {
            csv.push_str(&format!(
                "{},{:.6},{:.6},{:.6},{:.6},{:.8}\n",
                m.epoch, m.train_loss, m.train_accuracy, m.val_loss, m.val_accuracy, m.learning_rate
            ));
        }
        fs::write(path, csv)?;
        Ok(())
    }
}

/// JSON has no NaN; missing validation values are written as `null`
mod nan_as_null {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(values: &[f64], serializer: S) -> Result<S::Ok, S::Error> {
        values
            .iter()
            .map(|v| if v.is_nan() { None } else { Some(*v) })
            .collect::<Vec<_>>()
            .serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<f64>, D::Error> {
        let values = Vec::<Option<f64>>::deserialize(deserializer)?;
        Ok(values.into_iter().map(|v| v.unwrap_or(f64::NAN)).collect())
    }
}
