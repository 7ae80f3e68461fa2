//! Herb classifier pipeline
//!
//! [`HerbClassifier`] runs the stages in a fixed order: category discovery,
//! optional sample grid, data split, model construction, training and
//! plotting. Model construction and training failures are logged and returned
//! to the caller; plotting failures are logged and ignored.

use std::path::{Path, PathBuf};
use std::str::FromStr;

use burn::{module::Module, tensor::backend::AutodiffBackend};
use colored::Colorize;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::config::HerbConfig;
use crate::dataset::{render_sample_grid, split_validation, DataSplit, HerbBurnDataset, HerbDataset};
use crate::inference::{save_model, ModelMetadata};
use crate::model::{
    BaselineCnn, BaselineCnnConfig, EnhancedClassifier, EnhancedClassifierConfig,
    ImageClassifier, ModelKind,
};
use crate::training::{fit, CallbackSet, FitConfig, LrSchedule, TrainingHistory};
use crate::utils::charts;
use crate::utils::error::{HerbError, Result};

/// Side length of the thumbnails in the sample grid
pub const SAMPLE_THUMB_SIZE: u32 = 128;

/// Which models a run trains
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelSelection {
    Baseline,
    Enhanced,
    Both,
}

impl ModelSelection {
    pub fn kinds(&self) -> Vec<ModelKind> {
        match self {
            ModelSelection::Baseline => vec![ModelKind::Baseline],
            ModelSelection::Enhanced => vec![ModelKind::Enhanced],
            ModelSelection::Both => vec![ModelKind::Baseline, ModelKind::Enhanced],
        }
    }
}

impl FromStr for ModelSelection {
    type Err = HerbError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "both" => Ok(ModelSelection::Both),
            other => match other.parse::<ModelKind>()? {
                ModelKind::Baseline => Ok(ModelSelection::Baseline),
                ModelKind::Enhanced => Ok(ModelSelection::Enhanced),
            },
        }
    }
}

/// What one trained model produced
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub kind: ModelKind,
    pub history: TrainingHistory,
    /// Chart files; empty if plotting failed
    pub plots: Vec<PathBuf>,
    /// Weights file, when the model was saved
    pub saved_to: Option<PathBuf>,
}

/// Training pipeline over one herb image directory
pub struct HerbClassifier<B: AutodiffBackend> {
    config: HerbConfig,
    device: B::Device,
    dataset: HerbDataset,
    split: Option<DataSplit>,
    train_data: Option<HerbBurnDataset>,
    val_data: Option<HerbBurnDataset>,
}

impl<B: AutodiffBackend> HerbClassifier<B> {
    /// Validate the configuration and discover the categories
    pub fn new(config: HerbConfig, device: B::Device) -> Result<Self> {
        config.validate()?;
        let dataset = HerbDataset::new(&config.data.data_dir)?;
        info!(
            "Categories ({}): {}",
            dataset.num_classes(),
            dataset.categories.join(", ")
        );

        Ok(Self {
            config,
            device,
            dataset,
            split: None,
            train_data: None,
            val_data: None,
        })
    }

    pub fn categories(&self) -> &[String] {
        &self.dataset.categories
    }

    pub fn num_classes(&self) -> usize {
        self.dataset.num_classes()
    }

    pub fn dataset(&self) -> &HerbDataset {
        &self.dataset
    }

    pub fn config(&self) -> &HerbConfig {
        &self.config
    }

    /// The split, once [`HerbClassifier::setup_data`] has run
    pub fn split(&self) -> Option<&DataSplit> {
        self.split.as_ref()
    }

    /// Render a grid of sample images per category.
    ///
    /// Defaults to `<output_dir>/sample_images.png`.
    pub fn show_sample_images(&self, output: Option<&Path>) -> Result<PathBuf> {
        let output = output
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.config.output.output_dir.join("sample_images.png"));
        let path = render_sample_grid(
            &self.dataset,
            self.config.data.samples_per_category,
            SAMPLE_THUMB_SIZE,
            &output,
        )?;
        println!("  {} Sample grid: {}", "→".cyan(), path.display());
        Ok(path)
    }

    /// Split the images and build the training and validation sources
    pub fn setup_data(&mut self) -> Result<&DataSplit> {
        let data = &self.config.data;
        let split = split_validation(&self.dataset, data.validation_split)?;

        let (train, val) = if data.cache_images {
            println!("{}", "Pre-loading images...".cyan());
            (
                HerbBurnDataset::new_cached(split.train_pairs(), data.image_size)?,
                HerbBurnDataset::new_cached(split.validation_pairs(), data.image_size)?,
            )
        } else {
            (
                HerbBurnDataset::new(split.train_pairs(), data.image_size),
                HerbBurnDataset::new(split.validation_pairs(), data.image_size),
            )
        };

        println!(
            "  Training images: {} | Validation images: {}",
            split.train.len(),
            split.validation.len()
        );
        for (label, count) in train.class_distribution().iter().enumerate() {
            debug!("  train {:>4} images of '{}'", count, self.dataset.categories[label]);
        }

        self.train_data = Some(train);
        self.val_data = Some(val);
        Ok(self.split.insert(split))
    }

    pub fn baseline_config(&self) -> BaselineCnnConfig {
        let model = &self.config.model;
        BaselineCnnConfig::new(self.num_classes())
            .with_image_size(self.config.data.image_size)
            .with_filters(model.filters)
            .with_hidden_units(model.hidden_units)
    }

    pub fn enhanced_config(&self) -> EnhancedClassifierConfig {
        let model = &self.config.model;
        EnhancedClassifierConfig::new(self.num_classes(), model.backbone_weights.clone())
            .with_dense_units(model.dense_units)
            .with_dropout(model.dropout)
    }

    /// Three conv/pool blocks, a dense hidden layer and a softmax head
    pub fn build_baseline_model(&self) -> Result<BaselineCnn<B>> {
        let model = self.baseline_config().init(&self.device)?;
        info!("Baseline CNN: {} parameters", model.num_params());
        Ok(model)
    }

    /// Frozen pretrained backbone with a trainable head
    pub fn build_enhanced_model(&self) -> Result<EnhancedClassifier<B>> {
        self.enhanced_config().init(&self.device).map_err(|e| {
            error!("Error building enhanced model: {}", e);
            e
        })
    }

    /// Fit a model on the prepared split.
    ///
    /// `enhanced` selects the decaying learning rate and adds
    /// reduce-on-plateau to early stopping.
    pub fn train<M>(&mut self, model: M, enhanced: bool) -> Result<(M, TrainingHistory)>
    where
        M: burn::module::AutodiffModule<B> + ImageClassifier<B>,
        M::InnerModule: ImageClassifier<B::InnerBackend>,
    {
        if self.train_data.is_none() {
            self.setup_data()?;
        }
        let (Some(train), Some(val)) = (&self.train_data, &self.val_data) else {
            return Err(HerbError::Training("Data has not been set up".to_string()));
        };

        let schedule = LrSchedule::for_model(enhanced, &self.config.training);
        let callbacks = CallbackSet::for_model(enhanced, &self.config.callbacks);
        let fit_config = FitConfig::from_config(&self.config);

        fit(model, train, val, &schedule, callbacks, &fit_config, &self.device).map_err(|e| {
            error!("Error during training: {}", e);
            e
        })
    }

    /// Write accuracy and loss charts; failures are logged and ignored
    pub fn plot_history(&self, history: &TrainingHistory, prefix: &str) -> Vec<PathBuf> {
        match charts::plot_history(history, &self.config.output.output_dir, prefix) {
            Ok(paths) => paths,
            Err(e) => {
                warn!("Error plotting training history: {}", e);
                Vec::new()
            }
        }
    }

    /// Save weights, metadata and history for a trained model
    pub fn save_artifacts<M: Module<B>>(
        &self,
        model: M,
        metadata: &ModelMetadata,
        history: &TrainingHistory,
    ) -> Result<PathBuf> {
        let dir = &self.config.output.output_dir;
        let weights = save_model(model, metadata, dir)?;
        history.save_json(&dir.join(format!("{}_history.json", metadata.kind)))?;
        history.save_csv(&dir.join(format!("{}_history.csv", metadata.kind)))?;
        Ok(weights)
    }

    /// Run the whole pipeline for the selected models
    pub fn run(&mut self, selection: ModelSelection) -> Result<Vec<RunOutcome>> {
        if self.config.output.show_samples {
            self.show_sample_images(None)?;
        }
        self.setup_data()?;

        let mut outcomes = Vec::new();
        for kind in selection.kinds() {
            println!();
            println!("{}", format!("Training {} model", kind).green().bold());
            let outcome = match kind {
                ModelKind::Baseline => self.run_baseline()?,
                ModelKind::Enhanced => self.run_enhanced()?,
            };
            outcomes.push(outcome);
        }
        Ok(outcomes)
    }

    fn run_baseline(&mut self) -> Result<RunOutcome> {
        let model = self.build_baseline_model()?;
        let (model, history) = self.train(model, false)?;
        let plots = self.plot_history(&history, ModelKind::Baseline.as_str());

        let saved_to = if self.config.output.save_model {
            let metadata =
                ModelMetadata::for_baseline(&self.baseline_config(), self.categories(), &history);
            Some(self.save_artifacts(model, &metadata, &history)?)
        } else {
            None
        };

        Ok(RunOutcome {
            kind: ModelKind::Baseline,
            history,
            plots,
            saved_to,
        })
    }

    fn run_enhanced(&mut self) -> Result<RunOutcome> {
        let model = self.build_enhanced_model()?;
        let (model, history) = self.train(model, true)?;
        let plots = self.plot_history(&history, ModelKind::Enhanced.as_str());

        let saved_to = if self.config.output.save_model {
            let metadata = ModelMetadata::for_enhanced(
                &self.enhanced_config(),
                self.categories(),
                self.config.data.image_size,
                &history,
            );
            Some(self.save_artifacts(model, &metadata, &history)?)
        } else {
            None
        };

        Ok(RunOutcome {
            kind: ModelKind::Enhanced,
            history,
            plots,
            saved_to,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::loader::tests::create_herb_tree;
    use crate::model::{ResNet18BackboneConfig, BACKBONE_FEATURES};
    use burn::backend::{Autodiff, NdArray};
    use burn::module::AutodiffModule;
    use burn::tensor::{Distribution, Tensor};
    use tempfile::TempDir;

    type TestBackend = Autodiff<NdArray>;

    fn test_config(root: &Path) -> HerbConfig {
        let mut config = HerbConfig::default();
        config.data.data_dir = root.join("herbs");
        config.data.image_size = 32;
        config.data.batch_size = 4;
        config.model.filters = [4, 8, 8];
        config.model.hidden_units = 16;
        config.model.dense_units = [16, 8];
        config.model.backbone_weights = root.join("missing_backbone");
        config.training.epochs = 1;
        config.output.output_dir = root.join("out");
        config
    }

    #[test]
    fn test_head_width_matches_category_count() {
        let dir = TempDir::new().unwrap();
        create_herb_tree(&dir.path().join("herbs"), &["a", "b", "c", "d"], &[1, 2, 1, 3]);

        let classifier =
            HerbClassifier::<TestBackend>::new(test_config(dir.path()), Default::default()).unwrap();
        assert_eq!(classifier.num_classes(), 4);
        assert_eq!(classifier.categories(), ["a", "b", "c", "d"]);

        let model = classifier.build_baseline_model().unwrap();
        let input =
            Tensor::<TestBackend, 4>::random([2, 3, 32, 32], Distribution::Default, &Default::default());
        assert_eq!(model.forward(input).dims(), [2, 4]);
    }

    #[test]
    fn test_enhanced_without_weights_fails_every_time() {
        let dir = TempDir::new().unwrap();
        create_herb_tree(&dir.path().join("herbs"), &["a", "b"], &[1, 1]);

        let classifier =
            HerbClassifier::<TestBackend>::new(test_config(dir.path()), Default::default()).unwrap();
        for _ in 0..2 {
            assert!(matches!(
                classifier.build_enhanced_model(),
                Err(HerbError::Model(_))
            ));
        }
    }

    #[test]
    fn test_setup_data_splits_every_image() {
        let dir = TempDir::new().unwrap();
        create_herb_tree(&dir.path().join("herbs"), &["a", "b"], &[10, 5]);

        let mut classifier =
            HerbClassifier::<TestBackend>::new(test_config(dir.path()), Default::default()).unwrap();
        let split = classifier.setup_data().unwrap();
        assert_eq!(split.validation.len(), 3);
        assert_eq!(split.train.len(), 12);
    }

    #[test]
    fn test_run_baseline_writes_artifacts() {
        let dir = TempDir::new().unwrap();
        create_herb_tree(&dir.path().join("herbs"), &["ginger", "mint"], &[5, 5]);

        let mut config = test_config(dir.path());
        config.output.save_model = true;
        config.output.show_samples = true;

        let mut classifier = HerbClassifier::<TestBackend>::new(config, Default::default()).unwrap();
        let outcomes = classifier.run(ModelSelection::Baseline).unwrap();

        assert_eq!(outcomes.len(), 1);
        assert_eq!(outcomes[0].history.epochs(), 1);
        assert_eq!(outcomes[0].plots.len(), 2);

        let out = dir.path().join("out");
        assert!(out.join("sample_images.png").exists());
        assert!(out.join("baseline_accuracy.svg").exists());
        assert!(out.join("baseline_loss.svg").exists());
        assert!(out.join("baseline_model.mpk").exists());
        assert!(out.join("baseline_metadata.json").exists());
        assert!(out.join("baseline_history.csv").exists());
    }

    #[test]
    fn test_enhanced_training_keeps_backbone_fixed() {
        let dir = TempDir::new().unwrap();
        create_herb_tree(&dir.path().join("herbs"), &["ginger", "mint", "sage"], &[3, 3, 3]);

        let weights = dir.path().join("resnet18_backbone");
        ResNet18BackboneConfig::new()
            .init::<NdArray>(&Default::default())
            .save_weights(&weights)
            .unwrap();

        let mut config = test_config(dir.path());
        config.model.backbone_weights = weights;

        let mut classifier = HerbClassifier::<TestBackend>::new(config, Default::default()).unwrap();
        let model = classifier.build_enhanced_model().unwrap();
        assert_eq!(ImageClassifier::num_classes(&model), 3);
        assert!(model.trainable_params() < model.num_params());
        assert_eq!(model.norm.gamma.dims(), [BACKBONE_FEATURES]);

        let fixed_input = Tensor::<NdArray, 4>::ones([1, 3, 32, 32], &Default::default()).mul_scalar(0.5);
        let before: Vec<f32> = model
            .valid()
            .backbone
            .forward(fixed_input.clone())
            .into_data()
            .convert::<f32>()
            .to_vec()
            .unwrap();

        classifier.config.training.epochs = 2;
        let (model, history) = classifier.train(model, true).unwrap();
        assert_eq!(history.epochs(), 2);

        let after: Vec<f32> = model
            .valid()
            .backbone
            .forward(fixed_input)
            .into_data()
            .convert::<f32>()
            .to_vec()
            .unwrap();
        for (b, a) in before.iter().zip(&after) {
            assert!((b - a).abs() < 1e-6, "backbone output changed: {} vs {}", b, a);
        }
    }

    #[test]
    fn test_model_selection_parsing() {
        assert_eq!("both".parse::<ModelSelection>().unwrap().kinds().len(), 2);
        assert_eq!(
            "Enhanced".parse::<ModelSelection>().unwrap(),
            ModelSelection::Enhanced
        );
        assert!("vgg".parse::<ModelSelection>().is_err());
    }
}
