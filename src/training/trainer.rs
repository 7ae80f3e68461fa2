//! Supervised training loop
//!
//! A custom loop over Burn primitives rather than the high-level learner:
//! shuffled mini-batches, cross-entropy on logits, Adam with a per-step
//! learning rate, validation on the inner backend after every epoch and the
//! callbacks deciding when to stop.

use std::time::Instant;

use burn::{
    data::dataloader::batcher::Batcher,
    data::dataset::Dataset,
    module::AutodiffModule,
    nn::loss::CrossEntropyLossConfig,
    optim::{decay::WeightDecayConfig, AdamConfig, GradientsParams, Optimizer},
    prelude::*,
    tensor::{backend::AutodiffBackend, ElementConversion},
};
use indicatif::{ProgressBar, ProgressStyle};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use tracing::{debug, info};

use crate::config::HerbConfig;
use crate::dataset::{HerbBatch, HerbBatcher, HerbBurnDataset, HerbItem};
use crate::model::ImageClassifier;
use crate::training::callbacks::{CallbackSet, StopDecision};
use crate::training::history::{EpochMetrics, TrainingHistory};
use crate::training::scheduler::LrSchedule;
use crate::utils::error::{HerbError, Result};

/// Loop settings independent of the model variant
#[derive(Debug, Clone)]
pub struct FitConfig {
    pub epochs: usize,
    pub batch_size: usize,
    pub weight_decay: Option<f64>,
    /// Seed for the per-epoch shuffle
    pub seed: u64,
    /// Draw a progress bar per epoch
    pub show_progress: bool,
}

impl FitConfig {
    pub fn from_config(config: &HerbConfig) -> Self {
        Self {
            epochs: config.training.epochs,
            batch_size: config.data.batch_size,
            weight_decay: config.training.weight_decay,
            seed: config.training.seed,
            show_progress: true,
        }
    }
}

/// Train `model` and return it together with its history.
///
/// With early stopping configured to restore the best weights, the returned
/// model is the one from the best monitored epoch.
pub fn fit<B, M>(
    model: M,
    train_dataset: &HerbBurnDataset,
    val_dataset: &HerbBurnDataset,
    schedule: &LrSchedule,
    mut callbacks: CallbackSet,
    config: &FitConfig,
    device: &B::Device,
) -> Result<(M, TrainingHistory)>
where
    B: AutodiffBackend,
    M: AutodiffModule<B> + ImageClassifier<B>,
    M::InnerModule: ImageClassifier<B::InnerBackend>,
{
    if train_dataset.is_empty() {
        return Err(HerbError::Training(
            "Training split is empty; nothing to fit".to_string(),
        ));
    }
    if config.batch_size == 0 {
        return Err(HerbError::Training("batch_size must be greater than 0".to_string()));
    }
    if val_dataset.is_empty() {
        info!("Validation split is empty; validation metrics will be NaN");
    }

    let batcher = HerbBatcher::new(train_dataset.image_size());
    let mut optimizer = AdamConfig::new()
        .with_weight_decay(config.weight_decay.map(|w| WeightDecayConfig::new(w as f32)))
        .init();

    info!(
        "Fitting on {} images ({} validation), {} epochs, batch size {}, {}",
        train_dataset.len(),
        val_dataset.len(),
        config.epochs,
        config.batch_size,
        schedule.description()
    );

    let mut model = model;
    let mut best_model: Option<M> = None;
    let mut history = TrainingHistory::new();
    let mut rng = ChaCha8Rng::seed_from_u64(config.seed);
    let mut step = 0usize;
    let restore_best = callbacks.restores_best();

    for epoch in 1..=config.epochs {
        let started = Instant::now();

        let mut indices: Vec<usize> = (0..train_dataset.len()).collect();
        indices.shuffle(&mut rng);
        let num_batches = indices.len().div_ceil(config.batch_size);

        let progress = epoch_progress_bar(num_batches, epoch, config);

        let mut loss_sum = 0.0f64;
        let mut correct = 0usize;
        let mut seen = 0usize;
        let mut lr = callbacks.effective_lr(schedule.lr_at(step));

        for batch_indices in indices.chunks(config.batch_size) {
            let Some(batch) = load_batch::<B>(train_dataset, batch_indices, &batcher, device)?
            else {
                continue;
            };
            let batch_len = batch.targets.dims()[0];

            let logits = model.forward(batch.images);
            let loss = CrossEntropyLossConfig::new()
                .init(&logits.device())
                .forward(logits.clone(), batch.targets.clone());

            let loss_value: f64 = loss.clone().into_scalar().elem();
            loss_sum += loss_value * batch_len as f64;
            correct += count_correct(logits, batch.targets);
            seen += batch_len;

            lr = callbacks.effective_lr(schedule.lr_at(step));
            let grads = GradientsParams::from_grads(loss.backward(), &model);
            model = optimizer.step(lr, model, grads);
            step += 1;

            progress.set_message(format!("loss {:.4}", loss_value));
            progress.inc(1);
        }
        progress.finish_and_clear();

        let (val_loss, val_accuracy) =
            evaluate::<B::InnerBackend, _>(&model.valid(), val_dataset, config.batch_size, device)?;
        let metrics = EpochMetrics {
            epoch,
            train_loss: loss_sum / seen.max(1) as f64,
            train_accuracy: correct as f64 / seen.max(1) as f64,
            val_loss,
            val_accuracy,
            learning_rate: lr,
        };
        history.push(&metrics);

        info!(
            "Epoch {}/{}: loss {:.4}, acc {:.2}% | val_loss {:.4}, val_acc {:.2}% | lr {:.2e} ({:.1}s)",
            epoch,
            config.epochs,
            metrics.train_loss,
            metrics.train_accuracy * 100.0,
            metrics.val_loss,
            metrics.val_accuracy * 100.0,
            lr,
            started.elapsed().as_secs_f64()
        );

        match callbacks.on_epoch_end(&metrics, schedule.lr_at(step)) {
            StopDecision::Improved => {
                if restore_best {
                    best_model = Some(model.clone());
                    history.best_epoch = Some(epoch);
                }
            }
            StopDecision::Continue => {}
            StopDecision::Stop => {
                history.stopped_early = true;
                break;
            }
        }
    }

    let model = match best_model {
        Some(best) => {
            let best_value = callbacks
                .early_stopping
                .as_ref()
                .and_then(|early| early.best_value());
            debug!(
                "Restoring weights from epoch {:?} (best monitored value {:?})",
                history.best_epoch, best_value
            );
            best
        }
        None => model,
    };

    Ok((model, history))
}

/// Mean loss and accuracy over a dataset; NaN for an empty one
pub fn evaluate<B, M>(
    model: &M,
    dataset: &HerbBurnDataset,
    batch_size: usize,
    device: &B::Device,
) -> Result<(f64, f64)>
where
    B: Backend,
    M: ImageClassifier<B>,
{
    if dataset.is_empty() {
        return Ok((f64::NAN, f64::NAN));
    }

    let batcher = HerbBatcher::new(dataset.image_size());
    let indices: Vec<usize> = (0..dataset.len()).collect();

    let mut loss_sum = 0.0f64;
    let mut correct = 0usize;
    let mut seen = 0usize;

    for batch_indices in indices.chunks(batch_size.max(1)) {
        let Some(batch) = load_batch::<B>(dataset, batch_indices, &batcher, device)? else {
            continue;
        };
        let batch_len = batch.targets.dims()[0];

        let logits = model.forward(batch.images);
        let loss = CrossEntropyLossConfig::new()
            .init(&logits.device())
            .forward(logits.clone(), batch.targets.clone());
        let loss_value: f64 = loss.into_scalar().elem();

        loss_sum += loss_value * batch_len as f64;
        correct += count_correct(logits, batch.targets);
        seen += batch_len;
    }

    if seen == 0 {
        return Ok((f64::NAN, f64::NAN));
    }
    Ok((loss_sum / seen as f64, correct as f64 / seen as f64))
}

fn load_batch<B: Backend>(
    dataset: &HerbBurnDataset,
    indices: &[usize],
    batcher: &HerbBatcher,
    device: &B::Device,
) -> Result<Option<HerbBatch<B>>> {
    let mut items = Vec::with_capacity(indices.len());
    for &index in indices {
        if let Some(item) = dataset.try_get(index)? {
            items.push(item);
        }
    }
    if items.is_empty() {
        return Ok(None);
    }
    Ok(Some(Batcher::<B, HerbItem, HerbBatch<B>>::batch(
        batcher, items, device,
    )))
}

fn count_correct<B: Backend>(logits: Tensor<B, 2>, targets: Tensor<B, 1, Int>) -> usize {
    let predictions = logits.argmax(1).flatten::<1>(0, 1);
    let correct: i64 = predictions
        .equal(targets)
        .int()
        .sum()
        .into_scalar()
        .elem();
    correct as usize
}

fn epoch_progress_bar(num_batches: usize, epoch: usize, config: &FitConfig) -> ProgressBar {
    if !config.show_progress {
        return ProgressBar::hidden();
    }
    let progress = ProgressBar::new(num_batches as u64);
    progress.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} batches {prefix} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=>-"),
    );
    progress.set_prefix(format!("epoch {}/{}", epoch, config.epochs));
    progress
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CallbackSection;
    use crate::dataset::loader::tests::create_herb_tree;
    use crate::dataset::{split_validation, HerbDataset};
    use crate::model::BaselineCnnConfig;
    use burn::backend::{Autodiff, NdArray};
    use tempfile::TempDir;

    type TestBackend = Autodiff<NdArray>;

    fn fit_config(epochs: usize) -> FitConfig {
        FitConfig {
            epochs,
            batch_size: 4,
            weight_decay: None,
            seed: 7,
            show_progress: false,
        }
    }

    fn tiny_model(device: &<TestBackend as Backend>::Device) -> crate::model::BaselineCnn<TestBackend> {
        BaselineCnnConfig::new(2)
            .with_image_size(32)
            .with_filters([4, 4, 4])
            .with_hidden_units(8)
            .init(device)
            .unwrap()
    }

    #[test]
    fn test_fit_records_one_entry_per_epoch() {
        let dir = TempDir::new().unwrap();
        create_herb_tree(dir.path(), &["mint", "sage"], &[5, 5]);
        let dataset = HerbDataset::new(dir.path()).unwrap();
        let split = split_validation(&dataset, 0.2).unwrap();

        let train = HerbBurnDataset::new(split.train_pairs(), 32);
        let val = HerbBurnDataset::new(split.validation_pairs(), 32);
        assert_eq!(train.len(), 8);
        assert_eq!(val.len(), 2);

        let device = Default::default();
        let callbacks = CallbackSet::for_model(false, &CallbackSection::default());
        let (_model, history) = fit::<TestBackend, _>(
            tiny_model(&device),
            &train,
            &val,
            &LrSchedule::constant(1e-3),
            callbacks,
            &fit_config(2),
            &device,
        )
        .unwrap();

        assert_eq!(history.epochs(), 2);
        assert_eq!(history.val_loss.len(), 2);
        for m in (0..2).filter_map(|i| history.epoch(i)) {
            assert!(m.train_loss.is_finite());
            assert!((0.0..=1.0).contains(&m.train_accuracy));
            assert!((0.0..=1.0).contains(&m.val_accuracy));
        }
    }

    #[test]
    fn test_empty_validation_gives_nan() {
        let dir = TempDir::new().unwrap();
        create_herb_tree(dir.path(), &["a", "b"], &[2, 2]);
        let dataset = HerbDataset::new(dir.path()).unwrap();
        let split = split_validation(&dataset, 0.0).unwrap();

        let train = HerbBurnDataset::new(split.train_pairs(), 32);
        let val = HerbBurnDataset::new(Vec::new(), 32);

        let device = Default::default();
        let callbacks = CallbackSet::for_model(true, &CallbackSection::default());
        let (_model, history) = fit::<TestBackend, _>(
            tiny_model(&device),
            &train,
            &val,
            &LrSchedule::exponential_decay(1e-3, 10, 0.9, false),
            callbacks,
            &fit_config(1),
            &device,
        )
        .unwrap();

        assert_eq!(history.epochs(), 1);
        assert!(history.val_loss[0].is_nan());
        assert!(history.val_accuracy[0].is_nan());
        assert!(!history.stopped_early);
    }

    #[test]
    fn test_empty_training_split_is_an_error() {
        let device = Default::default();
        let empty = HerbBurnDataset::new(Vec::new(), 32);
        let result = fit::<TestBackend, _>(
            tiny_model(&device),
            &empty,
            &empty,
            &LrSchedule::constant(1e-3),
            CallbackSet::default(),
            &fit_config(1),
            &device,
        );
        assert!(matches!(result, Err(HerbError::Training(_))));
    }

    #[test]
    fn test_plateau_stops_early_and_restores_best_epoch() {
        let dir = TempDir::new().unwrap();
        create_herb_tree(dir.path(), &["mint", "sage"], &[5, 5]);
        let dataset = HerbDataset::new(dir.path()).unwrap();
        let split = split_validation(&dataset, 0.2).unwrap();
        let train = HerbBurnDataset::new(split.train_pairs(), 32);
        let val = HerbBurnDataset::new(split.validation_pairs(), 32);

        // A vanishing learning rate keeps the validation loss flat, so every
        // epoch after the first is a plateau.
        let section = CallbackSection {
            early_stopping_patience: 2,
            restore_best_weights: true,
            min_delta: 0.05,
            reduce_lr_factor: 0.5,
            reduce_lr_patience: 1,
            min_lr: 1e-15,
            ..CallbackSection::default()
        };
        let callbacks = CallbackSet::for_model(true, &section);

        let device = Default::default();
        let (model, history) = fit::<TestBackend, _>(
            tiny_model(&device),
            &train,
            &val,
            &LrSchedule::constant(1e-9),
            callbacks,
            &fit_config(6),
            &device,
        )
        .unwrap();

        assert!(history.stopped_early);
        assert_eq!(history.epochs(), 3);
        assert_eq!(history.best_epoch, Some(1));

        // Reduced once after epoch 2
        assert!((history.learning_rate[0] - 1e-9).abs() < 1e-18);
        assert!((history.learning_rate[2] - 5e-10).abs() < 1e-18);

        let (val_loss, _) = evaluate::<NdArray, _>(&model.valid(), &val, 4, &device).unwrap();
        assert!((val_loss - history.val_loss[0]).abs() < 1e-4);
    }

    #[test]
    fn test_restores_best_weights_after_budget() {
        let dir = TempDir::new().unwrap();
        create_herb_tree(dir.path(), &["mint", "sage"], &[5, 5]);
        let dataset = HerbDataset::new(dir.path()).unwrap();
        let split = split_validation(&dataset, 0.2).unwrap();
        let train = HerbBurnDataset::new(split.train_pairs(), 32);
        let val = HerbBurnDataset::new(split.validation_pairs(), 32);

        let section = CallbackSection {
            early_stopping_patience: 10,
            restore_best_weights: true,
            ..CallbackSection::default()
        };
        let device = Default::default();
        let (model, history) = fit::<TestBackend, _>(
            tiny_model(&device),
            &train,
            &val,
            &LrSchedule::constant(5e-2),
            CallbackSet::for_model(false, &section),
            &fit_config(4),
            &device,
        )
        .unwrap();

        assert!(!history.stopped_early);
        let best_epoch = history.best_epoch.unwrap();
        let best_loss = history.val_loss[..]
            .iter()
            .copied()
            .fold(f64::INFINITY, f64::min);
        assert!((history.val_loss[best_epoch - 1] - best_loss).abs() < 1e-12);

        let (val_loss, _) = evaluate::<NdArray, _>(&model.valid(), &val, 4, &device).unwrap();
        assert!((val_loss - best_loss).abs() < 1e-4);
    }
}
