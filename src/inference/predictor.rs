//! Inference Predictor Module
//!
//! Rebuilds a saved model from its metadata and weights and classifies single
//! images with it.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use burn::{
    module::Module,
    prelude::*,
    record::{CompactRecorder, RecorderError},
};
use serde::{Deserialize, Serialize};
use tracing::info;

use super::metadata::{metadata_path, weights_path, ModelMetadata};
use crate::dataset::load_image_tensor;
use crate::model::{BaselineCnn, EnhancedClassifier, ImageClassifier, ModelKind};
use crate::utils::error::{HerbError, Result};

/// Number of ranked predictions kept in a result
pub const TOP_K: usize = 5;

/// Result of a single prediction
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictionResult {
    /// Path to the input image (if applicable)
    pub image_path: Option<PathBuf>,

    /// Predicted class index
    pub class_index: usize,

    /// Predicted class name
    pub class_name: String,

    /// Probability of the predicted class
    pub confidence: f32,

    /// Full probability distribution over all classes
    pub probabilities: Vec<f32>,

    /// Top-k predictions with their probabilities
    pub top_k: Vec<(usize, String, f32)>,

    /// Inference time in milliseconds
    pub inference_time_ms: f64,
}

impl PredictionResult {
    pub fn new(
        probabilities: Vec<f32>,
        categories: &[String],
        inference_time: Duration,
        image_path: Option<PathBuf>,
    ) -> Self {
        let name_of = |idx: usize| {
            categories
                .get(idx)
                .cloned()
                .unwrap_or_else(|| "Unknown".to_string())
        };

        let mut indexed: Vec<(usize, f32)> = probabilities.iter().copied().enumerate().collect();
        indexed.sort_by(|a, b| b.1.total_cmp(&a.1));

        let (class_index, confidence) = indexed.first().copied().unwrap_or((0, 0.0));
        let top_k = indexed
            .iter()
            .take(TOP_K)
            .map(|&(idx, prob)| (idx, name_of(idx), prob))
            .collect();

        Self {
            image_path,
            class_index,
            class_name: name_of(class_index),
            confidence,
            probabilities,
            top_k,
            inference_time_ms: inference_time.as_secs_f64() * 1000.0,
        }
    }

    /// Pretty print the prediction result
    pub fn display(&self) -> String {
        let mut output = String::new();

        if let Some(path) = &self.image_path {
            output.push_str(&format!("Image: {:?}\n", path));
        }
        output.push_str(&format!(
            "Prediction: {} (class {})\n",
            self.class_name, self.class_index
        ));
        output.push_str(&format!("Confidence: {:.2}%\n", self.confidence * 100.0));
        output.push_str(&format!("Inference time: {:.2} ms\n", self.inference_time_ms));

        output.push_str(&format!("\nTop-{} predictions:\n", self.top_k.len()));
        for (rank, (idx, name, prob)) in self.top_k.iter().enumerate() {
            output.push_str(&format!(
                "  {}. {} (class {}) - {:.2}%\n",
                rank + 1,
                name,
                idx,
                prob * 100.0
            ));
        }

        output
    }
}

/// Either model variant, rebuilt for inference
#[derive(Debug)]
pub enum LoadedModel<B: Backend> {
    Baseline(BaselineCnn<B>),
    Enhanced(EnhancedClassifier<B>),
}

impl<B: Backend> ImageClassifier<B> for LoadedModel<B> {
    fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        match self {
            LoadedModel::Baseline(model) => model.forward(images),
            LoadedModel::Enhanced(model) => model.forward(images),
        }
    }

    fn num_classes(&self) -> usize {
        match self {
            LoadedModel::Baseline(model) => ImageClassifier::num_classes(model),
            LoadedModel::Enhanced(model) => ImageClassifier::num_classes(model),
        }
    }
}

/// Classifies images with a saved model
pub struct Predictor<B: Backend> {
    model: LoadedModel<B>,
    metadata: ModelMetadata,
    device: B::Device,
}

impl<B: Backend> Predictor<B> {
    /// Load `<kind>_metadata.json` and `<kind>_model.mpk` from `model_dir`
    pub fn load(model_dir: &Path, kind: ModelKind, device: &B::Device) -> Result<Self> {
        let metadata = ModelMetadata::load(&metadata_path(model_dir, kind))?;
        if metadata.kind != kind {
            return Err(HerbError::Model(format!(
                "Metadata describes a {} model, expected {}",
                metadata.kind, kind
            )));
        }

        let weights = weights_path(model_dir, kind);
        let recorder = CompactRecorder::new();
        let load_err = |e: RecorderError| {
            HerbError::Model(format!("Failed to load weights from {}: {e:?}", weights.display()))
        };

        let model = match (&metadata.baseline, &metadata.enhanced, kind) {
            (Some(config), _, ModelKind::Baseline) => LoadedModel::Baseline(
                config
                    .init::<B>(device)?
                    .load_file(weights.clone(), &recorder, device)
                    .map_err(load_err)?,
            ),
            (_, Some(config), ModelKind::Enhanced) => LoadedModel::Enhanced(
                config
                    .init_untrained::<B>(device)?
                    .load_file(weights.clone(), &recorder, device)
                    .map_err(load_err)?,
            ),
            _ => {
                return Err(HerbError::Model(format!(
                    "Metadata has no {} architecture section",
                    kind
                )))
            }
        };

        info!(
            "Loaded {} model ({} categories) from {:?}",
            kind,
            metadata.num_classes(),
            model_dir
        );

        Ok(Self {
            model,
            metadata,
            device: device.clone(),
        })
    }

    pub fn metadata(&self) -> &ModelMetadata {
        &self.metadata
    }

    /// Classify one image file
    pub fn predict(&self, image_path: &Path) -> Result<PredictionResult> {
        let size = self.metadata.image_size;
        let pixels = load_image_tensor(image_path, size)?;

        let start = Instant::now();
        let input =
            Tensor::<B, 4>::from_data(TensorData::new(pixels, [1, 3, size, size]), &self.device);
        let probabilities: Vec<f32> = self
            .model
            .forward_softmax(input)
            .into_data()
            .convert::<f32>()
            .to_vec()
            .map_err(|e| HerbError::Model(format!("Failed to read model output: {e:?}")))?;

        Ok(PredictionResult::new(
            probabilities,
            &self.metadata.categories,
            start.elapsed(),
            Some(image_path.to_path_buf()),
        ))
    }

    /// Classify several images, stopping at the first failure
    pub fn predict_many(&self, image_paths: &[PathBuf]) -> Result<Vec<PredictionResult>> {
        image_paths.iter().map(|p| self.predict(p)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::loader::tests::create_test_image;
    use crate::inference::metadata::save_model;
    use crate::model::BaselineCnnConfig;
    use crate::training::history::TrainingHistory;
    use burn::backend::NdArray;
    use tempfile::TempDir;

    type TestBackend = NdArray;

    #[test]
    fn test_prediction_result_ranking() {
        let categories = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        let result = PredictionResult::new(
            vec![0.2, 0.7, 0.1],
            &categories,
            Duration::from_millis(3),
            None,
        );
        assert_eq!(result.class_index, 1);
        assert_eq!(result.class_name, "b");
        assert_eq!(result.top_k[1].1, "a");
        assert_eq!(result.top_k.len(), 3);
        assert!(result.display().contains("Prediction: b"));
    }

    #[test]
    fn test_save_then_predict() {
        let dir = TempDir::new().unwrap();
        let device = Default::default();
        let categories = vec!["ginger".to_string(), "mint".to_string(), "sage".to_string()];

        let config = BaselineCnnConfig::new(3)
            .with_image_size(32)
            .with_filters([4, 4, 4])
            .with_hidden_units(8);
        let model = config.init::<TestBackend>(&device).unwrap();
        let metadata = ModelMetadata::for_baseline(&config, &categories, &TrainingHistory::new());
        save_model(model, &metadata, dir.path()).unwrap();

        let image = dir.path().join("leaf.png");
        create_test_image(&image, [30, 160, 60]);

        let predictor = Predictor::<TestBackend>::load(dir.path(), ModelKind::Baseline, &device).unwrap();
        let result = predictor.predict(&image).unwrap();

        assert_eq!(result.probabilities.len(), 3);
        let sum: f32 = result.probabilities.iter().sum();
        assert!((sum - 1.0).abs() < 1e-4);
        assert!(categories.contains(&result.class_name));

        let batch = predictor.predict_many(&[image.clone(), image.clone()]).unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(batch[1].class_index, result.class_index);

        let missing = dir.path().join("missing.png");
        assert!(predictor.predict_many(&[image, missing]).is_err());
    }

    #[test]
    fn test_missing_artifacts() {
        let dir = TempDir::new().unwrap();
        let device = Default::default();
        let result = Predictor::<TestBackend>::load(dir.path(), ModelKind::Enhanced, &device);
        assert!(matches!(result, Err(HerbError::PathNotFound(_))));
    }
}
