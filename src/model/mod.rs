//! Model module for the herb classifiers
//!
//! This module provides:
//! - A baseline CNN built from three convolution/pooling blocks
//! - A transfer-learning model on a frozen ResNet-18 backbone
//! - The [`ImageClassifier`] trait both models implement
//!
//! Both models return logits; softmax is applied by
//! [`ImageClassifier::forward_softmax`] and by the loss.

pub mod backbone;
pub mod baseline;
pub mod enhanced;

use std::fmt;
use std::str::FromStr;

use burn::tensor::{activation::softmax, backend::Backend, Tensor};
use serde::{Deserialize, Serialize};

use crate::utils::error::HerbError;

pub use backbone::{ResNet18Backbone, ResNet18BackboneConfig, BACKBONE_FEATURES};
pub use baseline::{BaselineCnn, BaselineCnnConfig};
pub use enhanced::{EnhancedClassifier, EnhancedClassifierConfig};

/// A network mapping `[N, 3, H, W]` images to `[N, C]` class scores
pub trait ImageClassifier<B: Backend> {
    /// Logits of shape `[batch_size, num_classes]`
    fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 2>;

    /// Width of the output layer
    fn num_classes(&self) -> usize;

    /// Class probabilities; every row sums to 1
    fn forward_softmax(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        softmax(self.forward(images), 1)
    }
}

/// The two model variants
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelKind {
    Baseline,
    Enhanced,
}

impl ModelKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModelKind::Baseline => "baseline",
            ModelKind::Enhanced => "enhanced",
        }
    }

    /// Whether training uses the enhanced callback set and decaying LR
    pub fn is_enhanced(&self) -> bool {
        matches!(self, ModelKind::Enhanced)
    }
}

impl fmt::Display for ModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ModelKind {
    type Err = HerbError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "baseline" => Ok(ModelKind::Baseline),
            "enhanced" => Ok(ModelKind::Enhanced),
            other => Err(HerbError::Config(format!("Unknown model kind: {other}"))),
        }
    }
}
