//! Sample image grid
//!
//! Renders a quick visual check of the dataset: one row per category, up to
//! `per_category` thumbnails per row, written as a PNG.

use std::path::{Path, PathBuf};

use image::{imageops, Rgb, RgbImage};
use tracing::{info, warn};

use crate::dataset::loader::{load_image, HerbDataset};
use crate::utils::error::{HerbError, Result};

/// Default number of images shown per category
pub const DEFAULT_SAMPLES_PER_CATEGORY: usize = 2;

/// Pixels between thumbnails and around the border
const CELL_PADDING: u32 = 4;

const BACKGROUND: Rgb<u8> = Rgb([255, 255, 255]);

/// Render the sample grid and save it to `output`.
///
/// Thumbnails are resized to `thumb_size x thumb_size`. A category with fewer
/// than `per_category` images leaves the remaining cells blank, and an image
/// that fails to decode is skipped with a warning.
pub fn render_sample_grid(
    dataset: &HerbDataset,
    per_category: usize,
    thumb_size: u32,
    output: &Path,
) -> Result<PathBuf> {
    if per_category == 0 || thumb_size == 0 {
        return Err(HerbError::Config(
            "sample grid needs at least one column and a non-zero thumbnail size".to_string(),
        ));
    }

    let rows = dataset.num_classes() as u32;
    let cols = per_category as u32;
    let cell = thumb_size + CELL_PADDING;
    let mut canvas = RgbImage::from_pixel(
        cols * cell + CELL_PADDING,
        rows * cell + CELL_PADDING,
        BACKGROUND,
    );

    for (row, name) in dataset.categories.iter().enumerate() {
        let samples = dataset.samples_for(row);
        if samples.len() < per_category {
            warn!(
                "Category '{}' has {} images, grid row will be partly blank",
                name,
                samples.len()
            );
        }

        for (col, sample) in samples.iter().take(per_category).enumerate() {
            let thumb = match load_image(&sample.path, thumb_size as usize) {
                Ok(img) => img.to_rgb8(),
                Err(e) => {
                    warn!("Leaving grid cell blank: {}", e);
                    continue;
                }
            };
            let x = CELL_PADDING + col as u32 * cell;
            let y = CELL_PADDING + row as u32 * cell;
            imageops::overlay(&mut canvas, &thumb, x as i64, y as i64);
        }
    }

    if let Some(parent) = output.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    canvas
        .save(output)
        .map_err(|e| HerbError::Plot(format!("Failed to save sample grid: {e}")))?;

    info!(
        "Sample grid ({} categories x {} images) saved to {:?}",
        rows, cols, output
    );
    Ok(output.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::loader::tests::create_herb_tree;
    use tempfile::TempDir;

    #[test]
    fn test_grid_dimensions_follow_categories() {
        let dir = TempDir::new().unwrap();
        create_herb_tree(dir.path(), &["a", "b", "c"], &[2, 3, 1]);
        let dataset = HerbDataset::new(dir.path()).unwrap();

        let out = dir.path().join("plots").join("samples.png");
        let path = render_sample_grid(&dataset, 2, 10, &out).unwrap();
        assert!(path.exists());

        let grid = image::open(&path).unwrap();
        assert_eq!(grid.width(), 2 * 14 + 4);
        assert_eq!(grid.height(), 3 * 14 + 4);
    }

    #[test]
    fn test_missing_images_leave_blank_cells() {
        let dir = TempDir::new().unwrap();
        create_herb_tree(dir.path(), &["only_one"], &[1]);
        let dataset = HerbDataset::new(dir.path()).unwrap();

        let out = dir.path().join("grid.png");
        render_sample_grid(&dataset, 2, 10, &out).unwrap();

        let grid = image::open(&out).unwrap().to_rgb8();
        // Centre of the second cell stays background
        assert_eq!(*grid.get_pixel(4 + 14 + 5, 4 + 5), BACKGROUND);
        assert_ne!(*grid.get_pixel(4 + 5, 4 + 5), BACKGROUND);
    }

    #[test]
    fn test_zero_columns_rejected() {
        let dir = TempDir::new().unwrap();
        create_herb_tree(dir.path(), &["a"], &[1]);
        let dataset = HerbDataset::new(dir.path()).unwrap();
        assert!(render_sample_grid(&dataset, 0, 10, &dir.path().join("x.png")).is_err());
    }
}
