//! Burn Dataset Integration
//!
//! Implements Burn's `Dataset` trait and `Batcher` for herb images. The only
//! preprocessing is the `1/255` rescale done while decoding.

use std::path::PathBuf;

use burn::data::dataloader::batcher::Batcher;
use burn::data::dataset::Dataset;
use burn::prelude::*;
use indicatif::{ProgressBar, ProgressStyle};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::dataset::loader::load_image_tensor;
use crate::utils::error::Result;

/// A single herb image ready for Burn
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HerbItem {
    /// Image data as flattened CHW float array [3 * H * W]
    pub image: Vec<f32>,
    /// Category index
    pub label: usize,
}

impl HerbItem {
    /// Load and preprocess an image from disk
    pub fn from_path(path: &PathBuf, label: usize, image_size: usize) -> Result<Self> {
        Ok(Self {
            image: load_image_tensor(path, image_size)?,
            label,
        })
    }
}

/// Herb dataset implementing Burn's Dataset trait
///
/// Images are decoded on access unless the dataset was built with
/// [`HerbBurnDataset::new_cached`].
#[derive(Debug, Clone)]
pub struct HerbBurnDataset {
    samples: Vec<(PathBuf, usize)>,
    image_size: usize,
    cached_items: Option<Vec<HerbItem>>,
}

impl HerbBurnDataset {
    /// Create a lazily loading dataset from `(path, label)` pairs
    pub fn new(samples: Vec<(PathBuf, usize)>, image_size: usize) -> Self {
        Self {
            samples,
            image_size,
            cached_items: None,
        }
    }

    /// Create a dataset with every image decoded into memory up front
    pub fn new_cached(samples: Vec<(PathBuf, usize)>, image_size: usize) -> Result<Self> {
        let progress = ProgressBar::new(samples.len() as u64);
        progress.set_style(
            ProgressStyle::default_bar()
                .template("  [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} images")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("=>-"),
        );

        let mut cached_items = Vec::with_capacity(samples.len());
        for (path, label) in &samples {
            cached_items.push(HerbItem::from_path(path, *label, image_size)?);
            progress.inc(1);
        }
        progress.finish_and_clear();

        Ok(Self {
            samples,
            image_size,
            cached_items: Some(cached_items),
        })
    }

    /// Load one item, surfacing decode errors
    pub fn try_get(&self, index: usize) -> Result<Option<HerbItem>> {
        if let Some(cached) = &self.cached_items {
            return Ok(cached.get(index).cloned());
        }

        match self.samples.get(index) {
            Some((path, label)) => HerbItem::from_path(path, *label, self.image_size).map(Some),
            None => Ok(None),
        }
    }

    /// Target side length of every image
    pub fn image_size(&self) -> usize {
        self.image_size
    }

    /// Samples per label, indexed by label
    pub fn class_distribution(&self) -> Vec<usize> {
        let num_classes = self
            .samples
            .iter()
            .map(|(_, label)| *label + 1)
            .max()
            .unwrap_or(0);
        let mut counts = vec![0usize; num_classes];
        for (_, label) in &self.samples {
            counts[*label] += 1;
        }
        counts
    }
}

impl Dataset<HerbItem> for HerbBurnDataset {
    fn get(&self, index: usize) -> Option<HerbItem> {
        match self.try_get(index) {
            Ok(item) => item,
            Err(e) => {
                warn!("Skipping unreadable image at index {}: {}", index, e);
                None
            }
        }
    }

    fn len(&self) -> usize {
        self.samples.len()
    }
}

/// A batch of herb images
#[derive(Clone, Debug)]
pub struct HerbBatch<B: Backend> {
    /// Images with shape [batch_size, 3, height, width]
    pub images: Tensor<B, 4>,
    /// Labels with shape [batch_size]
    pub targets: Tensor<B, 1, Int>,
}

/// Batcher stacking [`HerbItem`]s into tensors
#[derive(Clone, Debug)]
pub struct HerbBatcher {
    image_size: usize,
}

impl HerbBatcher {
    /// Create a batcher for square images of `image_size`
    pub fn new(image_size: usize) -> Self {
        Self { image_size }
    }
}

impl<B: Backend> Batcher<B, HerbItem, HerbBatch<B>> for HerbBatcher {
    fn batch(&self, items: Vec<HerbItem>, device: &B::Device) -> HerbBatch<B> {
        let batch_size = items.len();
        let size = self.image_size;

        let images_data: Vec<f32> = items
            .iter()
            .flat_map(|item| item.image.iter().copied())
            .collect();
        let images = Tensor::<B, 4>::from_data(
            TensorData::new(images_data, [batch_size, 3, size, size]),
            device,
        );

        let targets_data: Vec<i64> = items.iter().map(|item| item.label as i64).collect();
        let targets =
            Tensor::<B, 1, Int>::from_data(TensorData::new(targets_data, [batch_size]), device);

        HerbBatch { images, targets }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::loader::tests::create_herb_tree;
    use crate::dataset::loader::HerbDataset;
    use burn::backend::NdArray;
    use tempfile::TempDir;

    type TestBackend = NdArray;

    fn pairs(dataset: &HerbDataset) -> Vec<(PathBuf, usize)> {
        dataset
            .samples
            .iter()
            .map(|s| (s.path.clone(), s.label))
            .collect()
    }

    #[test]
    fn test_lazy_and_cached_agree() {
        let dir = TempDir::new().unwrap();
        create_herb_tree(dir.path(), &["a", "b"], &[2, 1]);
        let dataset = HerbDataset::new(dir.path()).unwrap();

        let lazy = HerbBurnDataset::new(pairs(&dataset), 16);
        let cached = HerbBurnDataset::new_cached(pairs(&dataset), 16).unwrap();

        assert_eq!(lazy.len(), 3);
        assert_eq!(cached.len(), 3);
        let a = lazy.get(2).unwrap();
        let b = cached.get(2).unwrap();
        assert_eq!(a.label, 1);
        assert_eq!(a.image, b.image);
        assert!(lazy.get(3).is_none());
        assert_eq!(lazy.class_distribution(), vec![2, 1]);
    }

    #[test]
    fn test_batcher_shapes() {
        let dir = TempDir::new().unwrap();
        create_herb_tree(dir.path(), &["a", "b", "c"], &[1, 1, 1]);
        let dataset = HerbDataset::new(dir.path()).unwrap();
        let burn_dataset = HerbBurnDataset::new(pairs(&dataset), 20);

        let items: Vec<_> = (0..3).filter_map(|i| burn_dataset.get(i)).collect();
        let device = Default::default();
        let batch: HerbBatch<TestBackend> = HerbBatcher::new(20).batch(items, &device);

        assert_eq!(batch.images.dims(), [3, 3, 20, 20]);
        assert_eq!(batch.targets.dims(), [3]);

        let labels: Vec<i64> = batch.targets.into_data().convert::<i64>().to_vec().unwrap();
        assert_eq!(labels, vec![0, 1, 2]);
    }

    #[test]
    fn test_unreadable_image_is_reported() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bad.png");
        std::fs::write(&path, b"garbage").unwrap();

        let dataset = HerbBurnDataset::new(vec![(path.clone(), 0)], 8);
        assert!(dataset.try_get(0).is_err());
        assert!(dataset.get(0).is_none());
        assert!(HerbBurnDataset::new_cached(vec![(path, 0)], 8).is_err());
    }
}
