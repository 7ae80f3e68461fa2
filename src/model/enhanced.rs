//! Transfer-learning classifier
//!
//! A frozen, pretrained ResNet-18 trunk followed by a small trainable head:
//! global average pooling, batch normalization and two dense+dropout blocks.

use std::path::PathBuf;

use burn::{
    config::Config,
    module::Module,
    nn::{
        pool::{AdaptiveAvgPool2d, AdaptiveAvgPool2dConfig},
        BatchNorm, BatchNormConfig, Dropout, DropoutConfig, Linear, LinearConfig, Relu,
    },
    tensor::{backend::Backend, Tensor},
};
use tracing::{debug, info};

use super::backbone::{ResNet18Backbone, ResNet18BackboneConfig, BACKBONE_FEATURES};
use super::ImageClassifier;
use crate::utils::error::{HerbError, Result};

/// Configuration for the transfer-learning classifier
#[derive(Config, Debug)]
pub struct EnhancedClassifierConfig {
    /// Number of output classes
    pub num_classes: usize,

    /// Burn record with the pretrained backbone (without `.mpk`)
    pub backbone_weights: PathBuf,

    /// Widths of the two dense blocks
    #[config(default = "[256, 128]")]
    pub dense_units: [usize; 2],

    /// Dropout after each dense block
    #[config(default = "[0.5, 0.3]")]
    pub dropout: [f64; 2],
}

/// Frozen backbone with a batch-normalized dense head
///
/// Architecture:
/// - ResNet-18 trunk (fixed normalization statistics, no gradients, features detached)
/// - Global Average Pooling
/// - BatchNorm over the pooled channels
/// - 2 × (Linear → ReLU → Dropout)
/// - Output layer sized to the category count
#[derive(Module, Debug)]
pub struct EnhancedClassifier<B: Backend> {
    pub backbone: ResNet18Backbone<B>,
    pub global_pool: AdaptiveAvgPool2d,
    pub norm: BatchNorm<B>,
    pub dense1: Linear<B>,
    pub dropout1: Dropout,
    pub dense2: Linear<B>,
    pub dropout2: Dropout,
    pub output: Linear<B>,
    num_classes: usize,
}

impl EnhancedClassifierConfig {
    /// Build the model around the pretrained backbone.
    ///
    /// Fails with [`HerbError::Model`] when the weights are missing or cannot
    /// be read.
    pub fn init<B: Backend>(&self, device: &B::Device) -> Result<EnhancedClassifier<B>> {
        self.check()?;
        let backbone = ResNet18BackboneConfig::new()
            .init(device)
            .load_pretrained(&self.backbone_weights, device)?;
        Ok(self.assemble(backbone, device))
    }

    /// Same architecture with a randomly initialised backbone
    pub fn init_untrained<B: Backend>(&self, device: &B::Device) -> Result<EnhancedClassifier<B>> {
        self.check()?;
        debug!("Building enhanced classifier without pretrained weights");
        let backbone = ResNet18BackboneConfig::new().init(device);
        Ok(self.assemble(backbone, device))
    }

    fn check(&self) -> Result<()> {
        if self.num_classes == 0 {
            return Err(HerbError::Model(
                "Enhanced classifier needs at least one class".to_string(),
            ));
        }
        if self.dense_units.contains(&0) {
            return Err(HerbError::Model("Dense layer widths must be positive".to_string()));
        }
        if self.dropout.iter().any(|p| !(0.0..1.0).contains(p)) {
            return Err(HerbError::Model("Dropout must be in range [0.0, 1.0)".to_string()));
        }
        Ok(())
    }

    fn assemble<B: Backend>(
        &self,
        backbone: ResNet18Backbone<B>,
        device: &B::Device,
    ) -> EnhancedClassifier<B> {
        let [units1, units2] = self.dense_units;
        let model = EnhancedClassifier {
            backbone: backbone.no_grad(),
            global_pool: AdaptiveAvgPool2dConfig::new([1, 1]).init(),
            norm: BatchNormConfig::new(BACKBONE_FEATURES).init(device),
            dense1: LinearConfig::new(BACKBONE_FEATURES, units1).init(device),
            dropout1: DropoutConfig::new(self.dropout[0]).init(),
            dense2: LinearConfig::new(units1, units2).init(device),
            dropout2: DropoutConfig::new(self.dropout[1]).init(),
            output: LinearConfig::new(units2, self.num_classes).init(device),
            num_classes: self.num_classes,
        };
        info!(
            "Enhanced classifier: {} trainable of {} parameters",
            model.trainable_params(),
            model.num_params()
        );
        model
    }
}

impl<B: Backend> EnhancedClassifier<B> {
    /// Forward pass returning logits `[batch_size, num_classes]`
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 2> {
        let features = self.backbone.forward(x).detach();

        // [B, 512, h, w] -> [B, 512, 1, 1]
        let x = self.global_pool.forward(features);
        let x = self.norm.forward(x);
        let x = x.flatten::<2>(1, 3);

        let x = self.dense1.forward(x);
        let x = Relu::new().forward(x);
        let x = self.dropout1.forward(x);

        let x = self.dense2.forward(x);
        let x = Relu::new().forward(x);
        let x = self.dropout2.forward(x);

        self.output.forward(x)
    }

    /// Parameters outside the frozen backbone
    pub fn trainable_params(&self) -> usize {
        self.num_params() - self.backbone.num_params()
    }
}

impl<B: Backend> ImageClassifier<B> for EnhancedClassifier<B> {
    fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        EnhancedClassifier::forward(self, images)
    }

    fn num_classes(&self) -> usize {
        self.num_classes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::{Autodiff, NdArray};
    use burn::module::AutodiffModule;
    use burn::nn::loss::CrossEntropyLossConfig;
    use burn::optim::{AdamConfig, GradientsParams, Optimizer};
    use burn::tensor::{Distribution, Int};
    use tempfile::TempDir;

    type TestBackend = NdArray;

    fn to_vec<const D: usize>(tensor: Tensor<TestBackend, D>) -> Vec<f32> {
        tensor.into_data().convert::<f32>().to_vec().unwrap()
    }

    fn small_config(num_classes: usize, weights: PathBuf) -> EnhancedClassifierConfig {
        EnhancedClassifierConfig::new(num_classes, weights).with_dense_units([16, 8])
    }

    #[test]
    fn test_missing_backbone_weights_fail_reproducibly() {
        let device = Default::default();
        let config = small_config(3, PathBuf::from("/nowhere/resnet18_backbone"));

        for _ in 0..2 {
            let err = config.init::<TestBackend>(&device).unwrap_err();
            assert!(matches!(err, HerbError::Model(_)));
        }
    }

    #[test]
    fn test_loads_saved_backbone() {
        let dir = TempDir::new().unwrap();
        let weights = dir.path().join("resnet18_backbone");
        let device = Default::default();
        ResNet18BackboneConfig::new()
            .init::<TestBackend>(&device)
            .save_weights(&weights)
            .unwrap();

        let model = small_config(5, weights).init::<TestBackend>(&device).unwrap();
        let input = Tensor::<TestBackend, 4>::random([2, 3, 32, 32], Distribution::Default, &device);
        assert_eq!(model.forward(input).dims(), [2, 5]);
    }

    #[test]
    fn test_softmax_rows_sum_to_one() {
        let device = Default::default();
        let model = small_config(4, PathBuf::from("unused"))
            .init_untrained::<TestBackend>(&device)
            .unwrap();
        assert_eq!(ImageClassifier::num_classes(&model), 4);

        let input = Tensor::<TestBackend, 4>::random([3, 3, 32, 32], Distribution::Default, &device);
        let probs: Vec<f32> = model
            .forward_softmax(input)
            .into_data()
            .convert::<f32>()
            .to_vec()
            .unwrap();

        assert_eq!(probs.len(), 12);
        for row in probs.chunks(4) {
            let sum: f32 = row.iter().sum();
            assert!((sum - 1.0).abs() < 1e-4);
        }
    }

    #[test]
    fn test_only_head_is_trainable() {
        let device = Default::default();
        let model = small_config(2, PathBuf::from("unused"))
            .init_untrained::<TestBackend>(&device)
            .unwrap();

        // BatchNorm(512) gamma/beta + 512*16+16 + 16*8+8 + 8*2+2
        let expected = 2 * 512 + (512 * 16 + 16) + (16 * 8 + 8) + (8 * 2 + 2);
        assert_eq!(model.trainable_params(), expected);
    }

    #[test]
    fn test_optimizer_steps_leave_backbone_untouched() {
        let device = Default::default();
        let mut model = small_config(2, PathBuf::from("unused"))
            .init_untrained::<Autodiff<NdArray>>(&device)
            .unwrap();

        let fixed_input = Tensor::<TestBackend, 4>::ones([1, 3, 32, 32], &device).mul_scalar(0.5);
        let backbone_before = to_vec(model.valid().backbone.forward(fixed_input.clone()));
        let head_before = to_vec(model.valid().dense1.weight.val());

        let images =
            Tensor::<Autodiff<NdArray>, 4>::random([4, 3, 32, 32], Distribution::Default, &device);
        let targets = Tensor::<Autodiff<NdArray>, 1, Int>::from_ints([0, 1, 0, 1], &device);
        let mut optimizer = AdamConfig::new().init();
        for _ in 0..3 {
            let logits = model.forward(images.clone());
            let loss = CrossEntropyLossConfig::new()
                .init(&device)
                .forward(logits, targets.clone());
            let grads = GradientsParams::from_grads(loss.backward(), &model);
            model = optimizer.step(0.1, model, grads);
        }

        let backbone_after = to_vec(model.valid().backbone.forward(fixed_input));
        for (before, after) in backbone_before.iter().zip(&backbone_after) {
            assert!((before - after).abs() < 1e-6);
        }

        let head_after = to_vec(model.valid().dense1.weight.val());
        assert!(head_before
            .iter()
            .zip(&head_after)
            .any(|(before, after)| (before - after).abs() > 1e-6));
    }
}
