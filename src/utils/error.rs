//! Error Handling Module
//!
//! Defines the error type shared by the dataset, model, training and
//! reporting layers. The binary wraps these in `anyhow` at the top level.

use std::path::PathBuf;

use thiserror::Error;

/// Main error type for herb classifier operations
#[derive(Error, Debug)]
pub enum HerbError {
    /// A required file or directory does not exist
    #[error("Path not found: {0}")]
    PathNotFound(PathBuf),

    /// Error loading or decoding an image
    #[error("Failed to load image at '{0}': {1}")]
    ImageLoad(PathBuf, String),

    /// Error with dataset discovery or splitting
    #[error("Dataset error: {0}")]
    Dataset(String),

    /// Error building or loading a model
    #[error("Model error: {0}")]
    Model(String),

    /// Error while fitting a model
    #[error("Training error: {0}")]
    Training(String),

    /// Error rendering a chart or sample grid
    #[error("Plot error: {0}")]
    Plot(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for HerbError {
    fn from(err: serde_json::Error) -> Self {
        HerbError::Serialization(err.to_string())
    }
}

impl From<toml::de::Error> for HerbError {
    fn from(err: toml::de::Error) -> Self {
        HerbError::Config(err.to_string())
    }
}

/// Convenience Result type for herb classifier operations
pub type Result<T, E = HerbError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_result_alias_takes_custom_error() {
        fn parse_count(s: &str) -> Result<u32, std::num::ParseIntError> {
            s.trim().parse()
        }
        fn require_count(s: &str) -> Result<u32> {
            parse_count(s).map_err(|e| HerbError::Config(e.to_string()))
        }

        assert_eq!(parse_count(" 12 ").unwrap(), 12);
        assert!(matches!(require_count("twelve"), Err(HerbError::Config(_))));
    }

    #[test]
    fn test_error_display() {
        let err = HerbError::Dataset("no categories".to_string());
        assert_eq!(format!("{}", err), "Dataset error: no categories");
    }

    #[test]
    fn test_image_load_error() {
        let path = PathBuf::from("/herbs/ginseng/001.jpg");
        let err = HerbError::ImageLoad(path, "truncated file".to_string());
        let msg = err.to_string();
        assert!(msg.contains("001.jpg"));
        assert!(msg.contains("truncated file"));
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: HerbError = io_err.into();
        assert!(matches!(err, HerbError::Io(_)));
    }

    #[test]
    fn test_json_error_conversion() {
        let parse: std::result::Result<u32, _> = serde_json::from_str::<u32>("not json");
        let err: HerbError = parse.unwrap_err().into();
        assert!(matches!(err, HerbError::Serialization(_)));
    }
}
