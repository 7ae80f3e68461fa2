//! Herb Dataset Loader
//!
//! Discovers categories from the directory layout and lists the image files
//! of every category. Images are decoded lazily.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use image::imageops::FilterType;
use image::{DynamicImage, ImageReader};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::utils::error::{HerbError, Result};

/// File extensions treated as images (compared lowercase)
pub const IMAGE_EXTENSIONS: [&str; 8] = ["jpg", "jpeg", "png", "bmp", "gif", "tif", "tiff", "webp"];

/// A single image file with its category
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageSample {
    /// Path to the image file
    pub path: PathBuf,
    /// Category index
    pub label: usize,
    /// Category name (the directory name)
    pub class_name: String,
}

/// All categories and image files under a root directory
#[derive(Debug, Clone)]
pub struct HerbDataset {
    /// Root directory of the dataset
    pub root_dir: PathBuf,
    /// Category names; the position is the label
    pub categories: Vec<String>,
    /// All samples, grouped by category and sorted by file name within it
    pub samples: Vec<ImageSample>,
}

/// Enumerate the immediate subdirectories of `root`, sorted by name.
///
/// Hidden directories (leading `.`) are skipped.
pub fn discover_categories<P: AsRef<Path>>(root: P) -> Result<Vec<String>> {
    let root = root.as_ref();
    if !root.is_dir() {
        return Err(HerbError::PathNotFound(root.to_path_buf()));
    }

    let mut categories = Vec::new();
    for entry in std::fs::read_dir(root)? {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        match entry.file_name().to_str() {
            Some(name) if !name.starts_with('.') => categories.push(name.to_string()),
            Some(_) => {}
            None => warn!("Skipping category with non UTF-8 name: {:?}", entry.path()),
        }
    }
    categories.sort();

    if categories.is_empty() {
        return Err(HerbError::Dataset(format!(
            "No category directories found in {:?}",
            root
        )));
    }

    Ok(categories)
}

/// Check whether a path has one of the recognised image extensions
pub fn is_image_file(path: &Path) -> bool {
    path.extension()
        .map(|ext| {
            let ext = ext.to_string_lossy().to_lowercase();
            IMAGE_EXTENSIONS.contains(&ext.as_str())
        })
        .unwrap_or(false)
}

impl HerbDataset {
    /// Scan a dataset directory.
    ///
    /// The directory should be structured as:
    /// ```text
    /// root_dir/
    /// ├── angelica/
    /// │   ├── 0001.jpg
    /// │   └── 0002.jpg
    /// ├── ginseng/
    /// │   └── ...
    /// └── ...
    /// ```
    pub fn new<P: AsRef<Path>>(root_dir: P) -> Result<Self> {
        let root_dir = root_dir.as_ref().to_path_buf();
        info!("Loading herb dataset from: {:?}", root_dir);

        let categories = discover_categories(&root_dir)?;
        info!("Found {} categories", categories.len());

        let mut samples = Vec::new();
        for (label, class_name) in categories.iter().enumerate() {
            let class_dir = root_dir.join(class_name);

            let mut files: Vec<PathBuf> = WalkDir::new(&class_dir)
                .min_depth(1)
                .max_depth(1)
                .into_iter()
                .filter_map(|e| e.ok())
                .filter(|e| e.file_type().is_file())
                .map(|e| e.into_path())
                .filter(|p| is_image_file(p))
                .collect();
            files.sort();

            if files.is_empty() {
                warn!("Category '{}' contains no images", class_name);
            }
            debug!("Category '{}' (label {}): {} images", class_name, label, files.len());

            samples.extend(files.into_iter().map(|path| ImageSample {
                path,
                label,
                class_name: class_name.clone(),
            }));
        }

        info!("Loaded {} total samples", samples.len());

        Ok(Self {
            root_dir,
            categories,
            samples,
        })
    }

    /// Get the number of samples in the dataset
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Check if the dataset is empty
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Get the number of categories
    pub fn num_classes(&self) -> usize {
        self.categories.len()
    }

    /// Samples of one category, in file-name order
    pub fn samples_for(&self, label: usize) -> Vec<&ImageSample> {
        self.samples.iter().filter(|s| s.label == label).collect()
    }

    /// Get statistics about the dataset
    pub fn stats(&self) -> DatasetStats {
        let mut class_counts = vec![0usize; self.num_classes()];
        for sample in &self.samples {
            class_counts[sample.label] += 1;
        }

        DatasetStats {
            total_samples: self.samples.len(),
            num_classes: self.num_classes(),
            class_counts,
            class_names: self
                .categories
                .iter()
                .enumerate()
                .map(|(idx, name)| (idx, name.clone()))
                .collect(),
        }
    }
}

/// Decode an image and resize it to a square of `image_size`
pub fn load_image(path: &Path, image_size: usize) -> Result<DynamicImage> {
    let img = ImageReader::open(path)
        .map_err(|e| HerbError::ImageLoad(path.to_path_buf(), e.to_string()))?
        .with_guessed_format()
        .map_err(|e| HerbError::ImageLoad(path.to_path_buf(), e.to_string()))?
        .decode()
        .map_err(|e| HerbError::ImageLoad(path.to_path_buf(), e.to_string()))?;

    Ok(img.resize_exact(image_size as u32, image_size as u32, FilterType::Triangle))
}

/// Load an image as a CHW float vector rescaled to `[0, 1]`
pub fn load_image_tensor(path: &Path, image_size: usize) -> Result<Vec<f32>> {
    let rgb = load_image(path, image_size)?.to_rgb8();

    let plane = image_size * image_size;
    let mut tensor = vec![0.0f32; 3 * plane];

    for (i, pixel) in rgb.pixels().enumerate() {
        tensor[i] = pixel[0] as f32 / 255.0;
        tensor[plane + i] = pixel[1] as f32 / 255.0;
        tensor[2 * plane + i] = pixel[2] as f32 / 255.0;
    }

    Ok(tensor)
}

/// Statistics about the dataset
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetStats {
    pub total_samples: usize,
    pub num_classes: usize,
    pub class_counts: Vec<usize>,
    pub class_names: HashMap<usize, String>,
}

impl DatasetStats {
    /// Print statistics to console
    pub fn print(&self) {
        println!("\n📊 Dataset Statistics:");
        println!("  Total samples: {}", self.total_samples);
        println!("  Number of categories: {}", self.num_classes);
        println!("\n  Samples per category:");

        let mut sorted: Vec<_> = self.class_names.iter().collect();
        sorted.sort_by_key(|(idx, _)| *idx);

        for (idx, name) in sorted {
            let count = self.class_counts[*idx];
            let bar_len = if self.total_samples > 0 {
                (count as f32 / self.total_samples as f32 * 40.0) as usize
            } else {
                0
            };
            println!("    {:3}. {:30} {:5} {}", idx, name, count, "█".repeat(bar_len));
        }
    }
}
