//! ResNet-18 feature extractor
//!
//! The convolutional trunk of ResNet-18 without its pooling and
//! fully-connected head. Pretrained weights are loaded from a burn record and
//! the trunk is then frozen by the enhanced classifier.
//!
//! Batch normalization in the trunk always uses the stored running
//! statistics, on every backend. Training the classifier head never updates
//! them and a batch never normalizes with its own statistics.

use std::path::Path;

use burn::{
    module::{Module, Param, RunningState},
    nn::{
        conv::{Conv2d, Conv2dConfig},
        pool::{MaxPool2d, MaxPool2dConfig},
        Initializer, PaddingConfig2d, Relu,
    },
    prelude::*,
    record::CompactRecorder,
};
use tracing::info;

use crate::utils::error::{HerbError, Result};

/// Channels of the last residual stage
pub const BACKBONE_FEATURES: usize = 512;

/// Batch normalization with fixed statistics
///
/// Field names follow burn's `BatchNorm`.
#[derive(Module, Debug)]
pub struct FrozenBatchNorm<B: Backend> {
    pub gamma: Param<Tensor<B, 1>>,
    pub beta: Param<Tensor<B, 1>>,
    pub running_mean: RunningState<Tensor<B, 1>>,
    pub running_var: RunningState<Tensor<B, 1>>,
    pub epsilon: f64,
}

impl<B: Backend> FrozenBatchNorm<B> {
    /// Identity statistics: zero mean, unit variance, unit scale
    pub fn new(channels: usize, device: &B::Device) -> Self {
        Self {
            gamma: Param::from_tensor(Tensor::ones([channels], device)),
            beta: Param::from_tensor(Tensor::zeros([channels], device)),
            running_mean: RunningState::new(Tensor::zeros([channels], device)),
            running_var: RunningState::new(Tensor::ones([channels], device)),
            epsilon: 1e-5,
        }
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let [_, channels, _, _] = x.dims();
        let shape = [1, channels, 1, 1];

        let mean = self.running_mean.value().reshape(shape);
        let std = self
            .running_var
            .value()
            .add_scalar(self.epsilon)
            .sqrt()
            .reshape(shape);
        let gamma = self.gamma.val().reshape(shape);
        let beta = self.beta.val().reshape(shape);

        x.sub(mean).div(std).mul(gamma).add(beta)
    }
}

/// ResNet-18 trunk producing `[N, 512, h, w]` feature maps
#[derive(Module, Debug)]
pub struct ResNet18Backbone<B: Backend> {
    conv1: Conv2d<B>,
    bn1: FrozenBatchNorm<B>,
    activation: Relu,
    maxpool: MaxPool2d,

    layer1: ResNetLayer<B>,
    layer2: ResNetLayer<B>,
    layer3: ResNetLayer<B>,
    layer4: ResNetLayer<B>,
}

impl<B: Backend> ResNet18Backbone<B> {
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = self.conv1.forward(x);
        let x = self.bn1.forward(x);
        let x = self.activation.forward(x);
        let x = self.maxpool.forward(x);

        let x = self.layer1.forward(x);
        let x = self.layer2.forward(x);
        let x = self.layer3.forward(x);
        self.layer4.forward(x)
    }

    /// Load pretrained weights saved with `CompactRecorder`.
    ///
    /// `path` is given without the recorder's `.mpk` extension.
    pub fn load_pretrained(self, path: &Path, device: &B::Device) -> Result<Self> {
        let record_file = path.with_extension("mpk");
        if !path.is_file() && !record_file.is_file() {
            return Err(HerbError::Model(format!(
                "Pretrained backbone weights not found at {}",
                record_file.display()
            )));
        }

        let backbone = self
            .load_file(path.to_path_buf(), &CompactRecorder::new(), device)
            .map_err(|e| {
                HerbError::Model(format!(
                    "Failed to load backbone weights from {}: {e:?}",
                    path.display()
                ))
            })?;
        info!("Loaded pretrained backbone from {:?}", record_file);
        Ok(backbone)
    }

    /// Save the trunk weights in the format `load_pretrained` reads
    pub fn save_weights(self, path: &Path) -> Result<()> {
        self.save_file(path.to_path_buf(), &CompactRecorder::new())
            .map_err(|e| HerbError::Model(format!("Failed to save backbone weights: {e:?}")))
    }
}

#[derive(Config, Debug)]
pub struct ResNet18BackboneConfig {
    #[config(default = "3")]
    pub input_channels: usize,
}

impl ResNet18BackboneConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> ResNet18Backbone<B> {
        ResNet18Backbone {
            conv1: Conv2dConfig::new([self.input_channels, 64], [7, 7])
                .with_stride([2, 2])
                .with_padding(PaddingConfig2d::Explicit(3, 3))
                .with_bias(false)
                .with_initializer(Initializer::KaimingNormal {
                    gain: (2.0_f64).sqrt(),
                    fan_out_only: true,
                })
                .init(device),
            bn1: FrozenBatchNorm::new(64, device),
            activation: Relu::new(),
            maxpool: MaxPool2dConfig::new([3, 3])
                .with_strides([2, 2])
                .with_padding(PaddingConfig2d::Explicit(1, 1))
                .init(),

            layer1: ResNetLayerConfig::new(64, 64, [1, 1]).init(device),
            layer2: ResNetLayerConfig::new(64, 128, [2, 2]).init(device),
            layer3: ResNetLayerConfig::new(128, 256, [2, 2]).init(device),
            layer4: ResNetLayerConfig::new(256, BACKBONE_FEATURES, [2, 2]).init(device),
        }
    }
}

/// Two basic blocks; the first may downsample
#[derive(Module, Debug)]
pub struct ResNetLayer<B: Backend> {
    blocks: Vec<BasicBlock<B>>,
}

impl<B: Backend> ResNetLayer<B> {
    fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        self.blocks.iter().fold(x, |x, block| block.forward(x))
    }
}

#[derive(Config, Debug)]
struct ResNetLayerConfig {
    in_planes: usize,
    out_planes: usize,
    stride: [usize; 2],
}

impl ResNetLayerConfig {
    fn init<B: Backend>(&self, device: &B::Device) -> ResNetLayer<B> {
        let downsample = if self.stride != [1, 1] || self.in_planes != self.out_planes {
            Some(DownSampleConfig::new(
                self.in_planes,
                self.out_planes,
                self.stride,
            ))
        } else {
            None
        };

        ResNetLayer {
            blocks: vec![
                BasicBlockConfig::new(self.in_planes, self.out_planes)
                    .with_stride(self.stride)
                    .with_downsample(downsample)
                    .init(device),
                BasicBlockConfig::new(self.out_planes, self.out_planes).init(device),
            ],
        }
    }
}

#[derive(Module, Debug)]
pub struct BasicBlock<B: Backend> {
    conv1: Conv2d<B>,
    bn1: FrozenBatchNorm<B>,
    conv2: Conv2d<B>,
    bn2: FrozenBatchNorm<B>,
    shortcut: Option<DownSample<B>>,
    activation: Relu,
}

impl<B: Backend> BasicBlock<B> {
    fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let shortcut = match &self.shortcut {
            Some(downsample) => downsample.forward(x.clone()),
            None => x.clone(),
        };

        let x = self.conv1.forward(x);
        let x = self.bn1.forward(x);
        let x = self.activation.forward(x);

        let x = self.conv2.forward(x);
        let x = self.bn2.forward(x);

        self.activation.forward(x + shortcut)
    }
}

#[derive(Config, Debug)]
struct BasicBlockConfig {
    in_planes: usize,
    out_planes: usize,
    #[config(default = "[1, 1]")]
    stride: [usize; 2],
    #[config(default = "None")]
    downsample: Option<DownSampleConfig>,
}

impl BasicBlockConfig {
    fn init<B: Backend>(&self, device: &B::Device) -> BasicBlock<B> {
        BasicBlock {
            conv1: Conv2dConfig::new([self.in_planes, self.out_planes], [3, 3])
                .with_stride(self.stride)
                .with_padding(PaddingConfig2d::Explicit(1, 1))
                .with_bias(false)
                .init(device),
            bn1: FrozenBatchNorm::new(self.out_planes, device),
            conv2: Conv2dConfig::new([self.out_planes, self.out_planes], [3, 3])
                .with_padding(PaddingConfig2d::Explicit(1, 1))
                .with_bias(false)
                .init(device),
            bn2: FrozenBatchNorm::new(self.out_planes, device),
            shortcut: self.downsample.as_ref().map(|ds| ds.init(device)),
            activation: Relu::new(),
        }
    }
}

/// 1×1 strided convolution matching the shortcut to the main path
#[derive(Module, Debug)]
pub struct DownSample<B: Backend> {
    conv: Conv2d<B>,
    bn: FrozenBatchNorm<B>,
}

impl<B: Backend> DownSample<B> {
    fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = self.conv.forward(x);
        self.bn.forward(x)
    }
}

#[derive(Config, Debug)]
struct DownSampleConfig {
    in_planes: usize,
    out_planes: usize,
    stride: [usize; 2],
}

impl DownSampleConfig {
    fn init<B: Backend>(&self, device: &B::Device) -> DownSample<B> {
        DownSample {
            conv: Conv2dConfig::new([self.in_planes, self.out_planes], [1, 1])
                .with_stride(self.stride)
                .with_bias(false)
                .init(device),
            bn: FrozenBatchNorm::new(self.out_planes, device),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;
    use tempfile::TempDir;

    type TestBackend = NdArray;

    #[test]
    fn test_feature_map_shape() {
        let device = Default::default();
        let backbone = ResNet18BackboneConfig::new().init::<TestBackend>(&device);

        // 32 -> 16 (stem) -> 8 (pool) -> 8 -> 4 -> 2 -> 1
        let input = Tensor::<TestBackend, 4>::zeros([2, 3, 32, 32], &device);
        let features = backbone.forward(input);
        assert_eq!(features.dims(), [2, BACKBONE_FEATURES, 1, 1]);
    }

    #[test]
    fn test_frozen_norm_ignores_batch_statistics() {
        type AdBackend = burn::backend::Autodiff<NdArray>;
        let device = Default::default();
        let norm = FrozenBatchNorm::<AdBackend>::new(4, &device);

        let first = Tensor::<AdBackend, 4>::ones([1, 4, 2, 2], &device).mul_scalar(3.0);
        let other = Tensor::<AdBackend, 4>::zeros([1, 4, 2, 2], &device);
        let alone = norm.forward(first.clone());
        let batched = norm.forward(Tensor::cat(vec![first, other], 0)).narrow(0, 0, 1);

        let alone: Vec<f32> = alone.into_data().convert::<f32>().to_vec().unwrap();
        let batched: Vec<f32> = batched.into_data().convert::<f32>().to_vec().unwrap();
        assert_eq!(alone, batched);
        // Identity statistics: 3 / sqrt(1 + eps)
        assert!((alone[0] - 3.0).abs() < 1e-4);

        let mean: Vec<f32> = norm.running_mean.value().into_data().convert::<f32>().to_vec().unwrap();
        assert!(mean.iter().all(|m| *m == 0.0));
    }

    #[test]
    fn test_missing_weights_fail() {
        let device = Default::default();
        let backbone = ResNet18BackboneConfig::new().init::<TestBackend>(&device);
        let err = backbone
            .load_pretrained(Path::new("/no/such/backbone"), &device)
            .unwrap_err();
        assert!(matches!(err, HerbError::Model(_)));
    }

    #[test]
    fn test_save_and_reload_weights() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("backbone");
        let device = Default::default();

        let original = ResNet18BackboneConfig::new().init::<TestBackend>(&device);
        let input = Tensor::<TestBackend, 4>::ones([1, 3, 32, 32], &device);
        let expected = original.forward(input.clone());
        original.save_weights(&path).unwrap();

        let reloaded = ResNet18BackboneConfig::new()
            .init::<TestBackend>(&device)
            .load_pretrained(&path, &device)
            .unwrap();
        let actual = reloaded.forward(input);

        let expected: Vec<f32> = expected.into_data().convert::<f32>().to_vec().unwrap();
        let actual: Vec<f32> = actual.into_data().convert::<f32>().to_vec().unwrap();
        for (a, b) in expected.iter().zip(&actual) {
            assert!((a - b).abs() < 1e-5);
        }
    }
}
