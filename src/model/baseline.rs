//! Baseline CNN
//!
//! Three convolution/pooling blocks, a dense hidden layer and the output
//! layer. Convolutions use valid padding, so the flatten width depends on the
//! input size and is computed up front.

use burn::{
    config::Config,
    module::Module,
    nn::{
        conv::{Conv2d, Conv2dConfig},
        pool::{MaxPool2d, MaxPool2dConfig},
        Linear, LinearConfig, PaddingConfig2d, Relu,
    },
    tensor::{backend::Backend, Tensor},
};

use super::ImageClassifier;
use crate::utils::error::{HerbError, Result};

/// Configuration for the baseline CNN
#[derive(Config, Debug)]
pub struct BaselineCnnConfig {
    /// Number of output classes
    pub num_classes: usize,

    /// Input image size (assumes square images)
    #[config(default = "224")]
    pub image_size: usize,

    /// Number of input channels (3 for RGB)
    #[config(default = "3")]
    pub in_channels: usize,

    /// Filters of the three convolutional blocks
    #[config(default = "[32, 64, 128]")]
    pub filters: [usize; 3],

    #[config(default = "3")]
    pub kernel_size: usize,

    /// Width of the dense hidden layer
    #[config(default = "128")]
    pub hidden_units: usize,
}

/// Convolution (valid padding) → ReLU → 2×2 max pooling
#[derive(Module, Debug)]
pub struct ConvPoolBlock<B: Backend> {
    conv: Conv2d<B>,
    relu: Relu,
    pool: MaxPool2d,
}

impl<B: Backend> ConvPoolBlock<B> {
    fn new(in_channels: usize, out_channels: usize, kernel_size: usize, device: &B::Device) -> Self {
        let conv = Conv2dConfig::new([in_channels, out_channels], [kernel_size, kernel_size])
            .with_padding(PaddingConfig2d::Valid)
            .init(device);

        Self {
            conv,
            relu: Relu::new(),
            pool: MaxPool2dConfig::new([2, 2]).with_strides([2, 2]).init(),
        }
    }

    fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = self.conv.forward(x);
        let x = self.relu.forward(x);
        self.pool.forward(x)
    }
}

/// Baseline herb classifier
///
/// Architecture:
/// - 3 × (Conv2d → ReLU → MaxPool 2×2)
/// - Flatten
/// - Dense hidden layer with ReLU
/// - Output layer sized to the category count
#[derive(Module, Debug)]
pub struct BaselineCnn<B: Backend> {
    pub block1: ConvPoolBlock<B>,
    pub block2: ConvPoolBlock<B>,
    pub block3: ConvPoolBlock<B>,
    pub hidden: Linear<B>,
    pub output: Linear<B>,
    num_classes: usize,
}

impl BaselineCnnConfig {
    /// Spatial side length after the three blocks, if the input is large enough
    pub fn feature_map_size(&self) -> Option<usize> {
        let mut size = self.image_size;
        for _ in 0..3 {
            // valid convolution, then floor division by the pool
            size = size.checked_sub(self.kernel_size.saturating_sub(1))?;
            size /= 2;
            if size == 0 {
                return None;
            }
        }
        Some(size)
    }

    /// Number of features entering the dense hidden layer
    pub fn calculate_flatten_size(&self) -> Option<usize> {
        self.feature_map_size()
            .map(|side| self.filters[2] * side * side)
    }

    /// Initialize the model
    pub fn init<B: Backend>(&self, device: &B::Device) -> Result<BaselineCnn<B>> {
        if self.num_classes == 0 {
            return Err(HerbError::Model(
                "Baseline CNN needs at least one class".to_string(),
            ));
        }
        if self.kernel_size == 0 || self.filters.contains(&0) || self.hidden_units == 0 {
            return Err(HerbError::Model(
                "Baseline CNN layer sizes must be positive".to_string(),
            ));
        }
        let flatten_size = self.calculate_flatten_size().ok_or_else(|| {
            HerbError::Model(format!(
                "Image size {} is too small for three conv/pool blocks",
                self.image_size
            ))
        })?;

        let [f1, f2, f3] = self.filters;
        Ok(BaselineCnn {
            block1: ConvPoolBlock::new(self.in_channels, f1, self.kernel_size, device),
            block2: ConvPoolBlock::new(f1, f2, self.kernel_size, device),
            block3: ConvPoolBlock::new(f2, f3, self.kernel_size, device),
            hidden: LinearConfig::new(flatten_size, self.hidden_units).init(device),
            output: LinearConfig::new(self.hidden_units, self.num_classes).init(device),
            num_classes: self.num_classes,
        })
    }
}

impl<B: Backend> BaselineCnn<B> {
    /// Forward pass returning logits `[batch_size, num_classes]`
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 2> {
        let x = self.block1.forward(x);
        let x = self.block2.forward(x);
        let x = self.block3.forward(x);

        let x = x.flatten::<2>(1, 3);

        let x = self.hidden.forward(x);
        let x = Relu::new().forward(x);
        self.output.forward(x)
    }
}

impl<B: Backend> ImageClassifier<B> for BaselineCnn<B> {
    fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        BaselineCnn::forward(self, images)
    }

    fn num_classes(&self) -> usize {
        self.num_classes
    }
}
